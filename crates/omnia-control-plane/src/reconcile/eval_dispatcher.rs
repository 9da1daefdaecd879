//! Eval Dispatcher (C9, spec.md §4.9).
//!
//! Unlike every other component in this module this is not a
//! [`Reconciler`](crate::dispatcher::Reconciler): it does not own a desired-state
//! kind, it processes a stream of session events. It is kept alongside the
//! reconcilers because it consumes the same `DesiredStateStore` (to look up
//! an AgentRuntime's `evals` config and its active PromptPack) and the same
//! collaborator traits used elsewhere in this crate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use omnia_core::domain::{AgentRuntimeSpec, ObjectRef, PromptPackSpec};
use omnia_storage::collaborators::{CollaboratorError, JudgeClient, StreamingBusProducer};
use omnia_storage::{DesiredStateStore, ObjectKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::reconcile::cel::{self, CelEnv};
use crate::reconcile::rollout::PackConfigMapSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    MessageAppended,
    ToolExecuted,
    SessionMarkedComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalTrigger {
    OnMessage,
    OnToolExecuted,
    OnSessionComplete,
}

impl SessionEventKind {
    fn trigger(self) -> EvalTrigger {
        match self {
            SessionEventKind::MessageAppended => EvalTrigger::OnMessage,
            SessionEventKind::ToolExecuted => EvalTrigger::OnToolExecuted,
            SessionEventKind::SessionMarkedComplete => EvalTrigger::OnSessionComplete,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionEvent {
    pub namespace: String,
    pub agent_runtime: String,
    pub session_id: String,
    pub turn_index: u64,
    pub kind: SessionEventKind,
    pub payload: Value,
}

/// One `evals[]` entry from a PromptPack's fetched `pack.json` (spec.md
/// §4.9 step 2: "eval definition in the agent's active PromptPack").
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvalDefinition {
    name: String,
    trigger: EvalTrigger,
    #[serde(default)]
    judge: bool,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    rule: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PackEvalManifest {
    #[serde(default)]
    evals: Vec<EvalDefinition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalResult {
    pub eval_name: String,
    pub session_id: String,
    pub turn_index: u64,
    pub passed: Option<bool>,
    pub score: Option<f64>,
    pub rationale: Option<String>,
}

/// Admits iff `hash(session_id:turn_index) mod 100 < rate`. Deterministic
/// per `(session_id, turn_index)` — independent of process restarts, unlike
/// `DefaultHasher` (spec.md §4.9 step 2).
fn admit(session_id: &str, turn_index: u64, rate: u8) -> bool {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b":");
    hasher.update(turn_index.to_string().as_bytes());
    let digest = hasher.finalize();
    let value = u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest is 32 bytes"));
    (value % 100) < rate as u64
}

struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.max(1) as f64,
            tokens: capacity.max(1) as f64,
            refill_per_sec: capacity.max(1) as f64,
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct QueuedEval {
    def: EvalDefinition,
    event: SessionEvent,
}

struct AgentDispatchState {
    bucket: Mutex<TokenBucket>,
    judge_permits: Arc<Semaphore>,
    queue: Mutex<VecDeque<QueuedEval>>,
    queue_capacity: usize,
}

struct SessionActivity {
    agent_runtime: ObjectKey,
    last_activity: Instant,
    last_turn_index: u64,
    completed: bool,
}

/// Dispatches session events to the evals declared in each agent's active
/// PromptPack, honoring sampling, rate limiting, and session-completion
/// detection (spec.md §4.9).
pub struct EvalDispatcher {
    store: Arc<dyn DesiredStateStore>,
    pack_source: Arc<dyn PackConfigMapSource>,
    judge: Arc<dyn JudgeClient>,
    bus: Arc<dyn StreamingBusProducer>,
    agents: dashmap::DashMap<ObjectKey, Arc<AgentDispatchState>>,
    /// Per-session mutex enforcing in-order processing within a session
    /// (spec.md §4.9: "within a session, events are processed in the order
    /// received"), mirroring the source fetcher's per-source fetch lock.
    session_locks: dashmap::DashMap<(String, String), Arc<AsyncMutex<()>>>,
    last_activity: dashmap::DashMap<(String, String), SessionActivity>,
}

impl EvalDispatcher {
    pub fn new(
        store: Arc<dyn DesiredStateStore>,
        pack_source: Arc<dyn PackConfigMapSource>,
        judge: Arc<dyn JudgeClient>,
        bus: Arc<dyn StreamingBusProducer>,
    ) -> Self {
        Self {
            store,
            pack_source,
            judge,
            bus,
            agents: dashmap::DashMap::new(),
            session_locks: dashmap::DashMap::new(),
            last_activity: dashmap::DashMap::new(),
        }
    }

    fn session_lock(&self, namespace: &str, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.session_locks
            .entry((namespace.to_string(), session_id.to_string()))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    async fn agent_spec(&self, namespace: &str, name: &str) -> Result<AgentRuntimeSpec, String> {
        let key = ObjectKey::new("AgentRuntime", namespace, name);
        let object = self
            .store
            .get(&key)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("AgentRuntime {namespace}/{name} not found"))?;
        serde_json::from_value(object.spec).map_err(|e| e.to_string())
    }

    async fn active_pack_evals(&self, namespace: &str, prompt_pack_ref: &ObjectRef) -> Result<Vec<EvalDefinition>, String> {
        let pack_namespace = prompt_pack_ref.namespace_or(namespace);
        let key = ObjectKey::new("PromptPack", pack_namespace, &prompt_pack_ref.name);
        let pack_object = self
            .store
            .get(&key)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("PromptPack {pack_namespace}/{} not found", prompt_pack_ref.name))?;
        let pack_spec: PromptPackSpec = serde_json::from_value(pack_object.spec).map_err(|e| e.to_string())?;
        let content = self.pack_source.read_pack_json(&pack_spec.source, pack_namespace).await?;
        let manifest: PackEvalManifest = serde_json::from_value(content).unwrap_or_default();
        Ok(manifest.evals)
    }

    fn state_for(&self, key: &ObjectKey, queue_capacity: u32, max_evals_per_second: u32, max_concurrent_judge_calls: u32) -> Arc<AgentDispatchState> {
        self.agents
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(AgentDispatchState {
                    bucket: Mutex::new(TokenBucket::new(max_evals_per_second)),
                    judge_permits: Arc::new(Semaphore::new(max_concurrent_judge_calls.max(1) as usize)),
                    queue: Mutex::new(VecDeque::new()),
                    queue_capacity: queue_capacity.max(1) as usize,
                })
            })
            .clone()
    }

    /// Admit, rate-limit, and (synchronously or via the bounded queue)
    /// execute every eval matching `event`.
    pub async fn submit_event(&self, event: SessionEvent) -> Result<(), CollaboratorError> {
        let _guard = self.session_lock(&event.namespace, &event.session_id).lock().await;

        self.last_activity
            .entry((event.namespace.clone(), event.session_id.clone()))
            .and_modify(|a| {
                a.last_activity = Instant::now();
                a.last_turn_index = event.turn_index;
                if event.kind == SessionEventKind::SessionMarkedComplete {
                    a.completed = true;
                }
            })
            .or_insert_with(|| SessionActivity {
                agent_runtime: ObjectKey::new("AgentRuntime", &event.namespace, &event.agent_runtime),
                last_activity: Instant::now(),
                last_turn_index: event.turn_index,
                completed: event.kind == SessionEventKind::SessionMarkedComplete,
            });

        let spec = match self.agent_spec(&event.namespace, &event.agent_runtime).await {
            Ok(spec) => spec,
            Err(e) => {
                warn!(error = %e, "eval dispatcher: agent runtime lookup failed, dropping event");
                return Ok(());
            }
        };
        let Some(evals) = spec.evals.clone() else {
            return Ok(());
        };
        if !evals.enabled {
            return Ok(());
        }

        let defs = match self.active_pack_evals(&event.namespace, &spec.prompt_pack_ref).await {
            Ok(defs) => defs,
            Err(e) => {
                warn!(error = %e, "eval dispatcher: prompt pack lookup failed, dropping event");
                return Ok(());
            }
        };

        let agent_key = ObjectKey::new("AgentRuntime", &event.namespace, &event.agent_runtime);
        let state = self.state_for(
            &agent_key,
            evals.queue_capacity,
            evals.max_evals_per_second,
            evals.max_concurrent_judge_calls,
        );

        let trigger = event.kind.trigger();
        for def in defs.into_iter().filter(|d| d.trigger == trigger) {
            let rate = if def.judge { evals.sampling.llm_judge_rate } else { evals.sampling.default_rate };
            if !admit(&event.session_id, event.turn_index, rate) {
                continue;
            }
            self.dispatch_or_queue(&state, def, event.clone()).await;
        }

        Ok(())
    }

    async fn dispatch_or_queue(&self, state: &Arc<AgentDispatchState>, def: EvalDefinition, event: SessionEvent) {
        let acquired = state.bucket.lock().try_acquire();
        if !acquired {
            Self::bounded_push(state, QueuedEval { def, event });
            return;
        }

        if def.judge {
            match state.judge_permits.clone().try_acquire_owned() {
                Ok(permit) => {
                    let judge = self.judge.clone();
                    let bus = self.bus.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::execute_and_publish(&judge, &bus, def, event).await;
                    });
                }
                Err(_) => {
                    Self::bounded_push(state, QueuedEval { def, event });
                }
            }
        } else {
            let bus = self.bus.clone();
            let judge = self.judge.clone();
            tokio::spawn(async move {
                Self::execute_and_publish(&judge, &bus, def, event).await;
            });
        }
    }

    /// Drop the oldest LLM-judge item first when the bounded queue is full
    /// so that cheaper non-judge evals keep flowing (spec.md §4.9 step 3).
    fn bounded_push(state: &Arc<AgentDispatchState>, item: QueuedEval) {
        let mut queue = state.queue.lock();
        if queue.len() >= state.queue_capacity {
            if let Some(pos) = queue.iter().position(|q| q.def.judge) {
                queue.remove(pos);
            } else {
                debug!("eval queue full and no judge item to evict, dropping incoming item");
                return;
            }
        }
        queue.push_back(item);
    }

    /// Runs [`Self::drain_once`] on a fixed interval so items that missed an
    /// immediate token/permit at admission time still get executed as
    /// capacity frees up.
    pub async fn run_queue_drain(self: &Arc<Self>, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            self.drain_once().await;
        }
    }

    /// Drains every agent's bounded queue as rate-limit/semaphore capacity
    /// frees up. Intended to run on a fixed interval via [`Self::run_queue_drain`].
    pub async fn drain_once(&self) {
        for entry in self.agents.iter() {
            let state = entry.value().clone();
            loop {
                let next = {
                    let mut queue = state.queue.lock();
                    queue.front().map(|q| q.def.judge)
                };
                let Some(is_judge) = next else { break };

                if !state.bucket.lock().try_acquire() {
                    break;
                }

                if is_judge {
                    match state.judge_permits.clone().try_acquire_owned() {
                        Ok(permit) => {
                            let item = state.queue.lock().pop_front().expect("just peeked");
                            let judge = self.judge.clone();
                            let bus = self.bus.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                Self::execute_and_publish(&judge, &bus, item.def, item.event).await;
                            });
                        }
                        Err(_) => break,
                    }
                } else {
                    let item = state.queue.lock().pop_front().expect("just peeked");
                    let judge = self.judge.clone();
                    let bus = self.bus.clone();
                    tokio::spawn(async move {
                        Self::execute_and_publish(&judge, &bus, item.def, item.event).await;
                    });
                }
            }
        }
    }

    async fn execute_and_publish(judge: &Arc<dyn JudgeClient>, bus: &Arc<dyn StreamingBusProducer>, def: EvalDefinition, event: SessionEvent) {
        let result = if def.judge {
            let prompt = def.prompt.unwrap_or_default();
            match judge.judge(&prompt, &event.payload).await {
                Ok(verdict) => EvalResult {
                    eval_name: def.name,
                    session_id: event.session_id,
                    turn_index: event.turn_index,
                    passed: Some(verdict.score >= 0.5),
                    score: Some(verdict.score),
                    rationale: Some(verdict.rationale),
                },
                Err(e) => {
                    warn!(error = %e, "judge call failed");
                    return;
                }
            }
        } else {
            let rule = def.rule.unwrap_or_else(|| "true".to_string());
            let headers = std::collections::BTreeMap::new();
            let env = CelEnv { headers: &headers, body: &event.payload };
            let passed = match cel::compile(&rule).and_then(|c| c.eval_bool(&env)) {
                Ok(passed) => passed,
                Err(e) => {
                    warn!(error = %e, %rule, "inline eval rule failed to evaluate");
                    return;
                }
            };
            EvalResult {
                eval_name: def.name,
                session_id: event.session_id,
                turn_index: event.turn_index,
                passed: Some(passed),
                score: None,
                rationale: None,
            }
        };

        if let Err(e) = bus.publish("eval-results", serde_json::to_value(&result).unwrap()).await {
            warn!(error = %e, "failed to publish eval result");
        }
    }

    /// Background timer (spec.md §4.9 step 5): every tick, any session whose
    /// `now - lastActivityAt >= inactivityTimeout` and not already marked
    /// complete gets a synthetic `session_marked_complete` event.
    pub async fn run_inactivity_timer(self: &Arc<Self>, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            self.fire_inactivity_timeouts().await;
        }
    }

    async fn fire_inactivity_timeouts(&self) {
        let now = Instant::now();
        let candidates: Vec<(String, String, ObjectKey, u64, Duration)> = self
            .last_activity
            .iter()
            .filter(|entry| !entry.value().completed)
            .map(|entry| {
                let (namespace, session_id) = entry.key().clone();
                let activity = entry.value();
                (
                    namespace,
                    session_id,
                    activity.agent_runtime.clone(),
                    activity.last_turn_index,
                    now.duration_since(activity.last_activity),
                )
            })
            .collect();

        for (namespace, session_id, agent_key, turn_index, idle_for) in candidates {
            let spec = match self.agent_spec(&namespace, &agent_key.name).await {
                Ok(spec) => spec,
                Err(_) => continue,
            };
            let Some(evals) = spec.evals else { continue };
            if idle_for < Duration::from_secs(evals.inactivity_timeout_secs) {
                continue;
            }

            let synthetic = SessionEvent {
                namespace: namespace.clone(),
                agent_runtime: agent_key.name.clone(),
                session_id: session_id.clone(),
                turn_index,
                kind: SessionEventKind::SessionMarkedComplete,
                payload: serde_json::json!({"sessionId": session_id, "firedAt": Utc::now().to_rfc3339()}),
            };
            if let Err(e) = self.bus.publish("session-events", serde_json::to_value(&synthetic_json(&synthetic)).unwrap()).await {
                warn!(error = %e, "failed to publish synthetic session_marked_complete");
            }
            if let Err(e) = self.submit_event(synthetic).await {
                warn!(error = %e, "failed to dispatch synthetic session_marked_complete");
            }
        }
    }
}

fn synthetic_json(event: &SessionEvent) -> Value {
    serde_json::json!({
        "kind": "session_marked_complete",
        "namespace": event.namespace,
        "agentRuntime": event.agent_runtime,
        "sessionId": event.session_id,
        "turnIndex": event.turn_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_storage::collaborators::fakes::{FakeJudge, FakeStreamingBus};
    use omnia_storage::InMemoryDesiredStateStore;
    use serde_json::json;

    struct FakePackSource {
        content: Value,
    }

    #[async_trait::async_trait]
    impl PackConfigMapSource for FakePackSource {
        async fn read_pack_json(&self, _source: &ObjectRef, _namespace: &str) -> Result<Value, String> {
            Ok(self.content.clone())
        }
    }

    fn dispatcher(evals_content: Value) -> (Arc<EvalDispatcher>, Arc<InMemoryDesiredStateStore>, Arc<FakeJudge>, Arc<FakeStreamingBus>) {
        let store = Arc::new(InMemoryDesiredStateStore::new());
        let judge = Arc::new(FakeJudge { fixed_score: parking_lot::Mutex::new(0.9) });
        let bus = Arc::new(FakeStreamingBus::default());
        let pack_source = Arc::new(FakePackSource { content: evals_content });
        let dispatcher = Arc::new(EvalDispatcher::new(
            store.clone() as Arc<dyn DesiredStateStore>,
            pack_source as Arc<dyn PackConfigMapSource>,
            judge.clone() as Arc<dyn JudgeClient>,
            bus.clone() as Arc<dyn StreamingBusProducer>,
        ));
        (dispatcher, store, judge, bus)
    }

    async fn seed_runtime(store: &InMemoryDesiredStateStore, evals_enabled: bool) {
        store
            .put_spec(
                ObjectKey::new("PromptPack", "default", "pp1"),
                json!({"version": "1.0.0", "source": {"name": "cm"}, "rollout": {"type": "immediate"}}),
            )
            .await
            .unwrap();
        store
            .put_spec(
                ObjectKey::new("AgentRuntime", "default", "agent1"),
                json!({
                    "promptPackRef": {"name": "pp1"},
                    "facade": {"protocol": "websocket", "port": 8080},
                    "framework": {"type": "custom"},
                    "replicas": 1,
                    "evals": {
                        "enabled": evals_enabled,
                        "sampling": {"defaultRate": 100, "llmJudgeRate": 100},
                        "maxEvalsPerSecond": 50,
                        "maxConcurrentJudgeCalls": 10,
                        "inactivityTimeoutSecs": 1800,
                        "queueCapacity": 1000,
                    },
                }),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disabled_evals_drop_the_event_without_error() {
        let (dispatcher, store, _judge, bus) = dispatcher(json!({"evals": []}));
        seed_runtime(&store, false).await;
        let event = SessionEvent {
            namespace: "default".into(),
            agent_runtime: "agent1".into(),
            session_id: "s1".into(),
            turn_index: 1,
            kind: SessionEventKind::MessageAppended,
            payload: json!({}),
        };
        dispatcher.submit_event(event).await.unwrap();
        assert!(bus.published.lock().is_empty());
    }

    #[tokio::test]
    async fn inline_rule_eval_passes_when_cel_expression_is_true() {
        let (dispatcher, store, _judge, bus) = dispatcher(json!({
            "evals": [{"name": "nonempty", "trigger": "on_message", "judge": false, "rule": "body[\"text\"] != \"\""}],
        }));
        seed_runtime(&store, true).await;
        let event = SessionEvent {
            namespace: "default".into(),
            agent_runtime: "agent1".into(),
            session_id: "s1".into(),
            turn_index: 1,
            kind: SessionEventKind::MessageAppended,
            payload: json!({"text": "hello"}),
        };
        dispatcher.submit_event(event).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let published = bus.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "eval-results");
    }

    #[tokio::test]
    async fn judge_eval_invokes_configured_judge_client() {
        let (dispatcher, store, judge, bus) = dispatcher(json!({
            "evals": [{"name": "quality", "trigger": "on_message", "judge": true, "prompt": "rate this"}],
        }));
        seed_runtime(&store, true).await;
        let event = SessionEvent {
            namespace: "default".into(),
            agent_runtime: "agent1".into(),
            session_id: "s1".into(),
            turn_index: 1,
            kind: SessionEventKind::MessageAppended,
            payload: json!({"text": "hello"}),
        };
        dispatcher.submit_event(event).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*judge.fixed_score.lock(), 0.9);
        assert_eq!(bus.published.lock().len(), 1);
    }

    #[tokio::test]
    async fn sampling_is_deterministic_for_the_same_session_and_turn() {
        assert_eq!(admit("s1", 1, 50), admit("s1", 1, 50));
    }
}
