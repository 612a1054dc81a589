//! `bbsource repos`

use anyhow::{Context, Result};
use bbs_client::RepositoryRole;

use crate::app::{cancel_on_ctrl_c, App};

fn parse_role(role: &str) -> Option<RepositoryRole> {
    match role {
        "owner" => Some(RepositoryRole::Owner),
        "admin" => Some(RepositoryRole::Admin),
        "contributor" => Some(RepositoryRole::Contributor),
        "member" => Some(RepositoryRole::Member),
        _ => None,
    }
}

pub async fn run(app: &App, owner: &str, role: Option<&str>) -> Result<()> {
    let client = app
        .factory
        .owner_client(app.endpoint()?, owner, cancel_on_ctrl_c())
        .context("Failed to create client")?;

    let repositories = client
        .get_repositories(role.and_then(parse_role))
        .await
        .with_context(|| format!("Failed to list repositories of {}", owner))?;

    for repository in &repositories {
        let visibility = if repository.is_private { "private" } else { "public" };
        println!(
            "{}\t{}\t{}",
            repository.full_name(),
            visibility,
            repository.default_branch.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("admin"), Some(RepositoryRole::Admin));
        assert_eq!(parse_role("reader"), None);
    }
}
