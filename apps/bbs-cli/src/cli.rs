//! Command-line argument parsing

use bbs_core::CLOUD_SERVER_URL;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "bbsource",
    about = "Bitbucket source connector",
    version,
    long_about = "Lists repositories, manages webhooks and receives webhook \
                  deliveries for Bitbucket Cloud and Bitbucket Server endpoints."
)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "BBS_CONFIG", default_value = "config/bbsource.toml")]
    pub config: PathBuf,

    /// Server URL of the endpoint to talk to
    #[arg(short, long, env = "BBS_SERVER_URL", default_value = CLOUD_SERVER_URL)]
    pub server_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the repositories of an owner
    Repos {
        /// Workspace, project key or ~user
        owner: String,

        /// Only repositories where the user has this role (cloud)
        #[arg(long, value_parser = ["owner", "admin", "contributor", "member"])]
        role: Option<String>,
    },

    /// Manage this instance's repository webhook
    Hooks {
        #[command(subcommand)]
        action: HookAction,
    },

    /// Dispatch a saved delivery as if it had just been received
    Replay {
        /// JSON object of header names to values
        headers: PathBuf,

        /// Raw request body
        body: PathBuf,

        /// Raw query string, e.g. `server_url=https%3A%2F%2Fgit.example.com`
        #[arg(long)]
        query: Option<String>,
    },

    /// Serve the webhook receive route
    Serve {
        #[arg(long, env = "BBS_BIND", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum HookAction {
    /// Create or reconcile the webhook
    Register { owner: String, repo: String },

    /// Remove a webhook by id
    Remove {
        owner: String,
        repo: String,
        id: String,
    },
}
