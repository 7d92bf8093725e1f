// Command-line surface.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "assistant")]
#[command(about = "Scaffold, package and deploy assistant projects", version)]
pub struct Cli {
    /// API base URL (overrides ASSISTANT_API_URL)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Initialise a project from the server template
    Init {
        /// Project directory (default: current directory)
        #[arg(long, short = 'd')]
        dir: Option<PathBuf>,

        /// Overwrite existing files without asking
        #[arg(long)]
        force: bool,
    },

    /// Package the project and upload it
    Deploy {
        /// Project directory (default: current directory)
        #[arg(long, short = 'd')]
        dir: Option<PathBuf>,
    },

    /// Manage the stored auth token
    Token {
        #[command(subcommand)]
        action: TokenCommands,
    },

    /// List organisations of the stored token's user
    Orgs,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum TokenCommands {
    /// Store a token (prompts when omitted)
    Set { token: Option<String> },

    /// Show the stored token and its claims
    Show,

    /// Check the stored token with the server
    Verify,

    /// Forget the stored token
    Clear,
}
