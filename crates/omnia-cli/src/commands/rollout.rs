// `omnia rollout watch <ns>/<name>` — poll a PromptPack's status and print
// canary weight progress as the rollout state machine advances it
// (spec.md §4.5: Pending -> Active, then Active <-> Canary <-> Active).

use std::time::Duration;

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};

use crate::client::{Client, ClientError};
use crate::commands::NamespacedName;
use crate::output::OutputFormat;

#[derive(Subcommand)]
pub enum RolloutCommand {
    /// Poll a PromptPack and print canary weight progress until it settles
    Watch {
        /// `<namespace>/<name>`
        object: NamespacedName,

        /// Poll interval in seconds
        #[arg(long, default_value = "2")]
        interval: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectResponse {
    status: PromptPackStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PromptPackStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    active_version: Option<String>,
    #[serde(default)]
    canary_version: Option<String>,
    #[serde(default)]
    canary_weight: Option<u8>,
}

pub async fn run(command: RolloutCommand, client: &Client, output: OutputFormat) -> Result<()> {
    match command {
        RolloutCommand::Watch { object, interval } => watch(client, output, object, interval).await,
    }
}

async fn watch(client: &Client, output: OutputFormat, object: NamespacedName, interval: u64) -> Result<()> {
    let path = format!("/v1/objects/PromptPack/{}?namespace={}", object.name, object.namespace);
    let mut last: Option<PromptPackStatus> = None;

    loop {
        let response: ObjectResponse = client.get(&path).await.map_err(|e| match e {
            ClientError::NotFound => anyhow::anyhow!("PromptPack {}/{} not found", object.namespace, object.name),
            e => e.into(),
        })?;
        let status = response.status;

        let changed = match &last {
            Some(prev) => {
                prev.phase != status.phase
                    || prev.canary_weight != status.canary_weight
                    || prev.canary_version != status.canary_version
            }
            None => true,
        };

        if changed {
            if output.is_text() {
                let phase = status.phase.as_deref().unwrap_or("Pending");
                match (status.canary_version.as_deref(), status.canary_weight) {
                    (Some(canary), Some(weight)) => println!(
                        "phase={phase} active={} canary={canary} weight={weight}%",
                        status.active_version.as_deref().unwrap_or("-")
                    ),
                    _ => println!("phase={phase} active={}", status.active_version.as_deref().unwrap_or("-")),
                }
            } else {
                output.print_value(&status);
            }
        }

        let settled = matches!(status.phase.as_deref(), Some("Active")) && status.canary_version.is_none()
            || matches!(status.phase.as_deref(), Some("Failed") | Some("Superseded"));
        last = Some(status);
        if settled {
            break;
        }

        tokio::time::sleep(Duration::from_secs(interval)).await;
    }

    Ok(())
}
