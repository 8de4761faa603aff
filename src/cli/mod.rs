use clap::{Parser, Subcommand};

/// Taskrelay Server - background tasks with live progress events
#[derive(Parser)]
#[command(name = "taskrelay-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run the server (default)
    Serve,

    /// Print the effective configuration and exit
    Config,
}
