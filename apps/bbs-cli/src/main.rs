//! `bbsource`: Bitbucket source connector CLI

mod app;
mod cli;
mod commands;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use crate::app::App;
use crate::cli::{Args, Command};
use crate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init_telemetry(&args)?;

    let result = run(&args).await;
    if let Err(ref e) = result {
        error!("{:#}", e);
    }
    result
}

async fn run(args: &Args) -> Result<()> {
    let app = App::build(args)?;

    match &args.command {
        Command::Repos { owner, role } => commands::repos::run(&app, owner, role.as_deref()).await,
        Command::Hooks { action } => commands::hooks::run(&app, action).await,
        Command::Replay {
            headers,
            body,
            query,
        } => commands::replay::run(&app, headers, body, query.as_deref()).await,
        Command::Serve { bind } => commands::serve::run(&app, *bind).await,
    }
}
