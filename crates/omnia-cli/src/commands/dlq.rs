// `omnia dlq list|requeue` — dead-letter visibility (SPEC_FULL.md §11):
// reconcile keys that exhaust their backoff ceiling land here instead of
// retrying forever; an operator inspects and requeues them explicitly.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};

use crate::client::{Client, ClientError};
use crate::commands::NamespacedName;
use crate::output::{print_table_header, print_table_row, OutputFormat};

#[derive(Subcommand)]
pub enum DlqCommand {
    /// List every dead-lettered reconcile key
    List,

    /// Remove an entry from the dead-letter queue and re-enqueue it
    Requeue {
        /// Resource kind, e.g. ArenaSource
        kind: String,

        /// `<namespace>/<name>`, or bare `<name>` for cluster-scoped kinds
        object: NamespacedName,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DlqEntryResponse {
    kind: String,
    namespace: String,
    name: String,
    last_error: String,
    attempts: u32,
    observed_generation: i64,
    dead_lettered_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResyncResponse {
    enqueued: bool,
}

pub async fn run(command: DlqCommand, client: &Client, output: OutputFormat) -> Result<()> {
    match command {
        DlqCommand::List => list(client, output).await,
        DlqCommand::Requeue { kind, object } => requeue(client, output, kind, object).await,
    }
}

async fn list(client: &Client, output: OutputFormat) -> Result<()> {
    let entries: Vec<DlqEntryResponse> = client.get("/v1/dlq").await?;

    if output.is_text() {
        if entries.is_empty() {
            println!("No dead-lettered objects");
            return Ok(());
        }

        print_table_header(&[("KIND", 18), ("NAMESPACE", 14), ("NAME", 20), ("ATTEMPTS", 8), ("LAST ERROR", 40)]);
        for e in &entries {
            print_table_row(&[
                (e.kind.as_str(), 18),
                (e.namespace.as_str(), 14),
                (e.name.as_str(), 20),
                (e.attempts.to_string().as_str(), 8),
                (e.last_error.as_str(), 40),
            ]);
        }
    } else {
        output.print_value(&entries);
    }

    Ok(())
}

async fn requeue(client: &Client, output: OutputFormat, kind: String, object: NamespacedName) -> Result<()> {
    let path = format!("/v1/dlq/{kind}/{}?namespace={}", object.name, object.namespace);
    let response: ResyncResponse = client
        .post(&path, &serde_json::json!({}))
        .await
        .map_err(|e| match e {
            ClientError::NotFound => anyhow::anyhow!("{kind} {}/{} not found", object.namespace, object.name),
            e => e.into(),
        })?;

    if output.is_text() {
        if response.enqueued {
            println!("Requeued {kind} {}/{} from the dead-letter queue", object.namespace, object.name);
        }
    } else {
        output.print_value(&response);
    }

    Ok(())
}
