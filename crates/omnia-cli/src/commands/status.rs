// `omnia status <kind> <ns>/<name>` — print an object's current generation,
// observed generation, spec, status and conditions (spec.md §3, §6).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::{Client, ClientError};
use crate::commands::NamespacedName;
use crate::output::{print_field, OutputFormat};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectResponse {
    kind: String,
    namespace: String,
    name: String,
    generation: i64,
    observed_generation: i64,
    spec: serde_json::Value,
    status: serde_json::Value,
    conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    reason: String,
    message: String,
    #[serde(rename = "lastTransitionTime")]
    last_transition_time: chrono::DateTime<chrono::Utc>,
}

pub async fn run(client: &Client, output: OutputFormat, kind: String, object: NamespacedName) -> Result<()> {
    let path = format!("/v1/objects/{kind}/{}?namespace={}", object.name, object.namespace);
    let response: ObjectResponse = client.get(&path).await.map_err(|e| match e {
        ClientError::NotFound => anyhow::anyhow!("{kind} {}/{} not found", object.namespace, object.name),
        e => e.into(),
    })?;

    if output.is_text() {
        print_field("Kind", &response.kind);
        print_field("Namespace", &response.namespace);
        print_field("Name", &response.name);
        print_field("Generation", &response.generation.to_string());
        print_field("Observed", &response.observed_generation.to_string());
        if response.conditions.is_empty() {
            print_field("Conditions", "-");
        } else {
            println!("Conditions:");
            for c in &response.conditions {
                println!(
                    "  {:<20} {:<6} {:<24} {}",
                    c.kind, c.status, c.reason, c.message
                );
            }
        }
        println!("Status:");
        println!("{}", serde_yaml::to_string(&response.status).context("failed to render status as YAML")?);
    } else {
        output.print_value(&response);
    }

    Ok(())
}
