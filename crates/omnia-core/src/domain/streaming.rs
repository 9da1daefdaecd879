// SessionStreamingConfig: realtime event bus configuration (spec.md §3, §6).

use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingProvider {
    Kafka,
    Kinesis,
    Pulsar,
    Nats,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderBlocks {
    #[serde(default)]
    pub kafka: Option<KafkaBlock>,
    #[serde(default)]
    pub kinesis: Option<KinesisBlock>,
    #[serde(default)]
    pub pulsar: Option<PulsarBlock>,
    #[serde(default)]
    pub nats: Option<NatsBlock>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaBlock {
    pub brokers: Vec<String>,
    pub topic: String,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisBlock {
    pub stream_name: String,
    pub region: String,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PulsarBlock {
    pub service_url: String,
    pub topic: String,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsBlock {
    pub servers: Vec<String>,
    pub subject: String,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingFilter {
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub workspaces: Vec<String>,
    #[serde(default)]
    pub agents: Vec<String>,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Json,
    Avro,
    Protobuf,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingTransform {
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
    #[serde(default)]
    pub field_projection: Vec<String>,
    #[serde(default)]
    pub redact_pii: bool,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStreamingConfigSpec {
    pub provider: StreamingProvider,
    #[serde(default)]
    pub provider_blocks: ProviderBlocks,
    #[serde(default)]
    pub filter: StreamingFilter,
    #[serde(default)]
    pub transform: StreamingTransform,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStreamingConfigStatus {
    #[serde(default)]
    pub active: bool,
}
