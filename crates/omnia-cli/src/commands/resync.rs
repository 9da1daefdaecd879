// `omnia resync <kind> <ns>/<name>` — force an immediate re-enqueue, bypassing
// the watch-substitute poll interval (spec.md §4.2/§4.3).

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::client::{Client, ClientError};
use crate::commands::NamespacedName;
use crate::output::OutputFormat;

#[derive(Debug, Serialize, Deserialize)]
struct ResyncResponse {
    enqueued: bool,
}

pub async fn run(client: &Client, output: OutputFormat, kind: String, object: NamespacedName) -> Result<()> {
    let path = format!("/v1/resync/{kind}/{}?namespace={}", object.name, object.namespace);
    let response: ResyncResponse = client
        .post(&path, &serde_json::json!({}))
        .await
        .map_err(|e| match e {
            ClientError::NotFound => anyhow::anyhow!("{kind} {}/{} not found", object.namespace, object.name),
            e => e.into(),
        })?;

    if output.is_text() {
        if response.enqueued {
            println!("Enqueued {kind} {}/{} for reconciliation", object.namespace, object.name);
        }
    } else {
        output.print_value(&response);
    }

    Ok(())
}
