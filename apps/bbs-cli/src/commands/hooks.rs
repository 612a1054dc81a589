//! `bbsource hooks`

use anyhow::{Context, Result};
use bbs_webhook::Registration;

use crate::app::{cancel_on_ctrl_c, App};
use crate::cli::HookAction;

pub async fn run(app: &App, action: &HookAction) -> Result<()> {
    let manager = app.manager();
    match action {
        HookAction::Register { owner, repo } => {
            let client = app
                .factory
                .repository_client(app.endpoint()?, owner, repo, cancel_on_ctrl_c())
                .context("Failed to create client")?;
            let outcome = manager
                .register(client.as_ref())
                .await
                .with_context(|| format!("Failed to register webhook on {}/{}", owner, repo))?;
            match outcome {
                Registration::Created(hook) => println!("created {}", hook.id),
                Registration::Updated(hook) => println!("updated {}", hook.id),
                Registration::Unchanged(hook) => println!("unchanged {}", hook.id),
                Registration::Disabled => println!("hook management is disabled for this endpoint"),
            }
        }
        HookAction::Remove { owner, repo, id } => {
            let client = app
                .factory
                .repository_client(app.endpoint()?, owner, repo, cancel_on_ctrl_c())
                .context("Failed to create client")?;
            let removed = manager
                .remove(client.as_ref(), id)
                .await
                .with_context(|| format!("Failed to remove webhook {} from {}/{}", id, owner, repo))?;
            if removed {
                println!("removed {}", id);
            } else {
                println!("{} was already absent", id);
            }
        }
    }
    Ok(())
}
