//! Tool Registry Engine (C6, spec.md §4.6).
//!
//! Resolves each handler's endpoint (direct or via service selector),
//! discovers tool schemas from self-describing handlers (`openapi`, `mcp`),
//! and periodically probes availability. `http`/`grpc` handlers carry their
//! tool definition inline and are never "discovered".

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use omnia_core::domain::{
    AvailabilityStatus, DiscoveredTool, Handler, HandlerType, ServiceSelector, ToolRegistryPhase, ToolRegistryStatus,
};
use omnia_core::{Condition, ConditionStatus, ReconcileError, RequeueHint};
use omnia_storage::StoredObject;

use crate::dispatcher::{ReconcileOutput, Reconciler};

/// Resolves a `ServiceSelector` to exactly one endpoint (spec.md §4.6:
/// "zero or multiple match" is an error). Named so it can be swapped for a
/// real cluster-API client.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    async fn resolve(&self, selector: &ServiceSelector, default_namespace: &str) -> Result<String, String>;
}

/// Enumerates tools from a self-describing handler (`openapi`/`mcp`).
#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    async fn discover_openapi(&self, handler: &Handler, endpoint: &str) -> Result<Vec<(String, serde_json::Value)>, String>;
    async fn discover_mcp(&self, handler: &Handler, endpoint: &str) -> Result<Vec<(String, serde_json::Value)>, String>;
}

/// A lightweight handshake against a resolved endpoint (spec.md §4.6: "HTTP
/// HEAD / gRPC reflection / MCP ping").
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn probe(&self, handler_type: HandlerType, endpoint: &str) -> AvailabilityStatus;
}

pub struct ToolRegistryReconciler {
    resolver: Arc<dyn ServiceResolver>,
    discovery: Arc<dyn ToolDiscovery>,
    probe: Arc<dyn AvailabilityProbe>,
    probe_interval: std::time::Duration,
}

impl ToolRegistryReconciler {
    pub fn new(
        resolver: Arc<dyn ServiceResolver>,
        discovery: Arc<dyn ToolDiscovery>,
        probe: Arc<dyn AvailabilityProbe>,
        probe_interval: std::time::Duration,
    ) -> Self {
        Self { resolver, discovery, probe, probe_interval }
    }

    async fn resolve_endpoint(&self, handler: &Handler, namespace: &str) -> Result<String, String> {
        if let Some(selector) = &handler.selector {
            return self.resolver.resolve(selector, namespace).await;
        }
        match handler.handler_type {
            HandlerType::Http => handler.http_config.as_ref().and_then(|c| c.endpoint.clone()),
            HandlerType::Grpc => handler.grpc_config.as_ref().and_then(|c| c.endpoint.clone()),
            HandlerType::Openapi => handler.open_api_config.as_ref().and_then(|c| c.spec_url.clone()),
            HandlerType::Mcp => handler
                .mcp_config
                .as_ref()
                .and_then(|c| c.endpoint.clone().or_else(|| c.command.clone())),
        }
        .ok_or_else(|| "no selector and no inline endpoint configured".to_string())
    }

    async fn discover_handler(&self, handler: &Handler, endpoint: &str) -> Result<Vec<DiscoveredTool>, String> {
        let now = Utc::now();
        match handler.handler_type {
            HandlerType::Http | HandlerType::Grpc => {
                let tool = handler
                    .tool
                    .clone()
                    .ok_or_else(|| format!("handler {} of type {:?} carries no inline tool definition", handler.name, handler.handler_type))?;
                let availability = self.probe.probe(handler.handler_type, endpoint).await;
                Ok(vec![DiscoveredTool {
                    handler_name: handler.name.clone(),
                    tool,
                    endpoint: endpoint.to_string(),
                    availability,
                    last_checked: Some(now),
                    unavailable_reason: None,
                }])
            }
            HandlerType::Openapi => {
                let operations = self.discovery.discover_openapi(handler, endpoint).await?;
                self.to_discovered(handler, endpoint, operations).await
            }
            HandlerType::Mcp => {
                let operations = self.discovery.discover_mcp(handler, endpoint).await?;
                self.to_discovered(handler, endpoint, operations).await
            }
        }
    }

    async fn to_discovered(
        &self,
        handler: &Handler,
        endpoint: &str,
        operations: Vec<(String, serde_json::Value)>,
    ) -> Result<Vec<DiscoveredTool>, String> {
        let now = Utc::now();
        let filter = handler.open_api_config.as_ref().map(|c| &c.operation_filter);
        let mut out = Vec::new();
        for (name, input_schema) in operations {
            if let Some(filter) = filter {
                if !filter.is_empty() && !filter.contains(&name) {
                    continue;
                }
            }
            let availability = self.probe.probe(handler.handler_type, endpoint).await;
            out.push(DiscoveredTool {
                handler_name: handler.name.clone(),
                tool: omnia_core::domain::ToolDefinition {
                    name: name.clone(),
                    description: format!("discovered operation {name}"),
                    input_schema,
                    output_schema: None,
                },
                endpoint: endpoint.to_string(),
                availability,
                last_checked: Some(now),
                unavailable_reason: None,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl Reconciler for ToolRegistryReconciler {
    fn kind(&self) -> &'static str {
        "ToolRegistry"
    }

    async fn reconcile(&self, object: &StoredObject) -> Result<ReconcileOutput, ReconcileError> {
        let spec: omnia_core::domain::ToolRegistrySpec = serde_json::from_value(object.spec.clone())
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;
        let mut status = ToolRegistryStatus::default();
        let mut resolution_failures = 0usize;
        let mut discovered = Vec::new();

        for handler in &spec.handlers {
            let endpoint = match self.resolve_endpoint(handler, &object.key.namespace).await {
                Ok(endpoint) => endpoint,
                Err(reason) => {
                    resolution_failures += 1;
                    discovered.push(DiscoveredTool {
                        handler_name: handler.name.clone(),
                        tool: omnia_core::domain::ToolDefinition {
                            name: handler.name.clone(),
                            description: String::new(),
                            input_schema: serde_json::Value::Null,
                            output_schema: None,
                        },
                        endpoint: String::new(),
                        availability: AvailabilityStatus::Unavailable,
                        last_checked: Some(Utc::now()),
                        unavailable_reason: Some(reason),
                    });
                    continue;
                }
            };

            match self.discover_handler(handler, &endpoint).await {
                Ok(tools) => discovered.extend(tools),
                Err(reason) => {
                    discovered.push(DiscoveredTool {
                        handler_name: handler.name.clone(),
                        tool: omnia_core::domain::ToolDefinition {
                            name: handler.name.clone(),
                            description: String::new(),
                            input_schema: serde_json::Value::Null,
                            output_schema: None,
                        },
                        endpoint,
                        availability: AvailabilityStatus::Unavailable,
                        last_checked: Some(Utc::now()),
                        unavailable_reason: Some(reason),
                    });
                }
            }
        }

        let total = spec.handlers.len();
        status.phase = Some(if total > 0 && resolution_failures == total {
            ToolRegistryPhase::Failed
        } else if discovered.iter().any(|t| t.availability == AvailabilityStatus::Unavailable) {
            ToolRegistryPhase::Degraded
        } else if total == 0 {
            ToolRegistryPhase::Pending
        } else {
            ToolRegistryPhase::Ready
        });
        status.discovered_tools = discovered;

        let mut conditions = object.conditions.clone();
        let (cond_status, reason) = match status.phase {
            Some(ToolRegistryPhase::Ready) => (ConditionStatus::True, "AllToolsAvailable"),
            Some(ToolRegistryPhase::Degraded) => (ConditionStatus::False, "SomeToolsUnavailable"),
            Some(ToolRegistryPhase::Failed) => (ConditionStatus::False, "AllHandlersFailed"),
            _ => (ConditionStatus::Unknown, "NoHandlers"),
        };
        set_condition(&mut conditions, "Ready", cond_status, reason, "");

        Ok(ReconcileOutput::new(serde_json::to_value(&status).unwrap(), conditions)
            .requeue_after(RequeueHint::After(self.probe_interval)))
    }
}

fn set_condition(conditions: &mut Vec<Condition>, kind: &str, status: ConditionStatus, reason: &str, message: &str) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.kind == kind) {
        if existing.status != status {
            existing.status = status;
            existing.last_transition_time = Utc::now();
        }
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        conditions.push(Condition::new(kind, status, reason, message));
    }
}

/// No-op/in-memory stand-ins for the cluster-API and handler-transport
/// collaborators spec.md §1 names as out of scope ("the specific
/// container-cluster client library" and upstream handler protocols).
/// `main` wires these in place of a real adapter until one exists; swapping
/// them out never touches reconciler logic.
pub mod fakes {
    use super::*;

    pub struct DnsServiceResolver;
    #[async_trait]
    impl ServiceResolver for DnsServiceResolver {
        async fn resolve(&self, selector: &ServiceSelector, default_namespace: &str) -> Result<String, String> {
            if selector.labels.is_empty() {
                return Err("selector matched zero services".to_string());
            }
            let namespace = selector.namespace.as_deref().unwrap_or(default_namespace);
            let service = selector
                .labels
                .get("app")
                .or_else(|| selector.labels.values().next())
                .cloned()
                .ok_or_else(|| "selector matched zero services".to_string())?;
            Ok(format!("{service}.{namespace}.svc.cluster.local:{}", selector.port_number.unwrap_or(80)))
        }
    }

    #[derive(Default)]
    pub struct NullToolDiscovery;
    #[async_trait]
    impl ToolDiscovery for NullToolDiscovery {
        async fn discover_openapi(&self, _handler: &Handler, _endpoint: &str) -> Result<Vec<(String, serde_json::Value)>, String> {
            Ok(Vec::new())
        }
        async fn discover_mcp(&self, _handler: &Handler, _endpoint: &str) -> Result<Vec<(String, serde_json::Value)>, String> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    pub struct AlwaysAvailableProbe;
    #[async_trait]
    impl AvailabilityProbe for AlwaysAvailableProbe {
        async fn probe(&self, _handler_type: HandlerType, _endpoint: &str) -> AvailabilityStatus {
            AvailabilityStatus::Available
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_storage::ObjectKey;
    use serde_json::json;

    struct FakeResolver;
    #[async_trait]
    impl ServiceResolver for FakeResolver {
        async fn resolve(&self, selector: &ServiceSelector, namespace: &str) -> Result<String, String> {
            if selector.labels.is_empty() {
                return Err("selector matched zero services".to_string());
            }
            Ok(format!("svc.{namespace}.svc.cluster.local:{}", selector.port_number.unwrap_or(80)))
        }
    }

    struct FakeDiscovery;
    #[async_trait]
    impl ToolDiscovery for FakeDiscovery {
        async fn discover_openapi(&self, _handler: &Handler, _endpoint: &str) -> Result<Vec<(String, serde_json::Value)>, String> {
            Ok(vec![("listWidgets".to_string(), json!({"type": "object"}))])
        }
        async fn discover_mcp(&self, _handler: &Handler, _endpoint: &str) -> Result<Vec<(String, serde_json::Value)>, String> {
            Ok(vec![("ping".to_string(), json!({"type": "object"}))])
        }
    }

    struct AlwaysAvailable;
    #[async_trait]
    impl AvailabilityProbe for AlwaysAvailable {
        async fn probe(&self, _handler_type: HandlerType, _endpoint: &str) -> AvailabilityStatus {
            AvailabilityStatus::Available
        }
    }

    fn reconciler() -> ToolRegistryReconciler {
        ToolRegistryReconciler::new(
            Arc::new(FakeResolver),
            Arc::new(FakeDiscovery),
            Arc::new(AlwaysAvailable),
            std::time::Duration::from_secs(30),
        )
    }

    fn object(spec: serde_json::Value) -> StoredObject {
        StoredObject {
            key: ObjectKey::new("ToolRegistry", "default", "tr"),
            generation: 1,
            spec,
            observed_generation: 0,
            status: json!({}),
            conditions: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn http_handler_records_inline_tool_verbatim() {
        let spec = json!({"handlers": [{
            "name": "h1", "type": "http",
            "httpConfig": {"endpoint": "http://svc:8080"},
            "tool": {"name": "get_weather", "description": "d", "inputSchema": {"type": "object"}}
        }]});
        let output = reconciler().reconcile(&object(spec)).await.unwrap();
        let status: ToolRegistryStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(ToolRegistryPhase::Ready));
        assert_eq!(status.discovered_tools.len(), 1);
        assert_eq!(status.discovered_tools[0].tool.name, "get_weather");
    }

    #[tokio::test]
    async fn openapi_handler_is_discovered_and_filtered() {
        let spec = json!({"handlers": [{
            "name": "h1", "type": "openapi",
            "openAPIConfig": {"specURL": "http://svc/openapi.json", "operationFilter": ["listWidgets"]},
        }]});
        let output = reconciler().reconcile(&object(spec)).await.unwrap();
        let status: ToolRegistryStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.discovered_tools.len(), 1);
        assert_eq!(status.discovered_tools[0].tool.name, "listWidgets");
    }

    #[tokio::test]
    async fn unresolvable_selector_marks_handler_unavailable_and_registry_degraded() {
        let spec = json!({"handlers": [
            {"name": "h1", "type": "http", "httpConfig": {"endpoint": "http://svc:8080"},
             "tool": {"name": "t", "description": "d", "inputSchema": {}}},
            {"name": "h2", "type": "http", "selector": {"labels": {}}},
        ]});
        let output = reconciler().reconcile(&object(spec)).await.unwrap();
        let status: ToolRegistryStatus = serde_json::from_value(output.status).unwrap();
        assert_eq!(status.phase, Some(ToolRegistryPhase::Degraded));
        assert!(status
            .discovered_tools
            .iter()
            .any(|t| t.handler_name == "h2" && t.availability == AvailabilityStatus::Unavailable));
    }
}
