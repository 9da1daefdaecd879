// Omnia operator CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Use reqwest for HTTP client (already in workspace).

mod client;
mod commands;
mod output;

use clap::{Parser, Subcommand};
use commands::NamespacedName;

#[derive(Parser)]
#[command(name = "omnia")]
#[command(about = "Operator CLI for the Omnia control plane")]
#[command(version)]
pub struct Cli {
    /// Control plane HTTP base URL
    #[arg(long, env = "OMNIA_API_URL", default_value = "http://localhost:9000")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show a reconciled object's generation, status, and conditions
    Status {
        /// Resource kind, e.g. ArenaSource, AgentRuntime, PromptPack
        kind: String,

        /// `<namespace>/<name>`, or bare `<name>` for cluster-scoped kinds
        object: NamespacedName,
    },

    /// Force an object to be re-enqueued for reconciliation
    Resync {
        /// Resource kind, e.g. ArenaSource, AgentRuntime, PromptPack
        kind: String,

        /// `<namespace>/<name>`, or bare `<name>` for cluster-scoped kinds
        object: NamespacedName,
    },

    /// Inspect and requeue dead-lettered reconcile keys
    Dlq {
        #[command(subcommand)]
        command: commands::dlq::DlqCommand,
    },

    /// Watch a PromptPack rollout's canary weight progress
    Rollout {
        #[command(subcommand)]
        command: commands::rollout::RolloutCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = client::Client::new(&cli.api_url);
    let output_format = output::OutputFormat::from_str(&cli.output);

    match cli.command {
        Commands::Status { kind, object } => commands::status::run(&client, output_format, kind, object).await,
        Commands::Resync { kind, object } => commands::resync::run(&client, output_format, kind, object).await,
        Commands::Dlq { command } => commands::dlq::run(command, &client, output_format).await,
        Commands::Rollout { command } => commands::rollout::run(command, &client, output_format).await,
    }
}
