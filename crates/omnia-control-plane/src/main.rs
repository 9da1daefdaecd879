//! `omnia-control-plane`: the reconciliation process described by spec.md
//! §4-§5 — per-kind reconcilers draining a shared work queue, a Postgres
//! advisory-lock leader election gate when replicated, the eval dispatcher's
//! two background loops, and the operator-facing HTTP surface.
//!
//! No real Kubernetes/etcd watch API is part of this stack (spec.md §1 names
//! "the specific container-cluster client library" as a collaborator out of
//! scope), so in place of a watch stream this process periodically re-lists
//! every registered kind and enqueues every object it finds (see DESIGN.md).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use omnia_control_plane::config::ProcessConfig;
use omnia_control_plane::dispatcher::Dispatcher;
use omnia_control_plane::http::{self, HttpState};
use omnia_control_plane::leader::{LeaderElector, DEFAULT_LOCK_KEY};
use omnia_control_plane::queue::WorkQueue;
use omnia_control_plane::reconcile::agent_runtime::{self, AgentRuntimeReconciler};
use omnia_control_plane::reconcile::analytics_sync::AnalyticsSyncReconciler;
use omnia_control_plane::reconcile::eval_dispatcher::EvalDispatcher;
use omnia_control_plane::reconcile::policy::{self, AgentPolicyReconciler, ToolPolicyReconciler};
use omnia_control_plane::reconcile::retention::RetentionReconciler;
use omnia_control_plane::reconcile::rollout::{self, RolloutReconciler};
use omnia_control_plane::reconcile::source_fetcher::{self, SourceFetcherReconciler};
use omnia_control_plane::reconcile::tool_registry::{self, ToolRegistryReconciler};
use omnia_core::registry::build_default_registry;
use omnia_core::telemetry::{init_telemetry, TelemetryConfig};
use omnia_storage::collaborators::fakes::{
    FakeColdArchive, FakeHotCache, FakeJudge, FakeSourceTier, FakeStreamingBus, FakeWarehouse, FakeWarmStore,
};
use omnia_storage::{
    DesiredStateStore, InMemoryDesiredStateStore, InMemoryDlqStore, InMemoryVersionHistoryStore, InMemoryWatermarkStore,
    PostgresDesiredStateStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ProcessConfig::from_env();

    let mut telemetry_config = TelemetryConfig::from_env();
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some("omnia_control_plane=info,tower_http=info".to_string());
    }
    let _telemetry_guard = init_telemetry(telemetry_config);

    tracing::info!("omnia-control-plane starting");

    // Desired-state store: Postgres-backed when DATABASE_URL is configured,
    // in-memory otherwise (e.g. local dev, tests). The other four stores
    // (queue, DLQ, watermark, version history) have no Postgres-backed
    // implementation yet in this corpus and stay in-memory regardless — see
    // DESIGN.md. That means queue/DLQ state and ArenaSource version history
    // do not currently survive a process restart.
    let store: Arc<dyn DesiredStateStore> = match &config.database_url {
        Some(url) => {
            let pool = sqlx::PgPool::connect(url).await.context("failed to connect to DATABASE_URL")?;
            let store = PostgresDesiredStateStore::new(Arc::new(pool));
            store.migrate().await.context("failed to run desired-state migrations")?;
            tracing::info!("desired-state store: Postgres");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using an in-memory desired-state store (state does not survive a restart)");
            Arc::new(InMemoryDesiredStateStore::new())
        }
    };

    let versions = Arc::new(InMemoryVersionHistoryStore::new());
    let watermarks = Arc::new(InMemoryWatermarkStore::new());
    let dlq = Arc::new(InMemoryDlqStore::new());

    let queue = Arc::new(WorkQueue::new(config.queue_config()));

    // Named external-collaborator stand-ins (spec.md §1: the container-cluster
    // client library, upstream handler/transport protocols, and the session
    // storage/judge/streaming tiers are all out of scope). Each is a
    // functional no-op that drives its reconciler to a steady state rather
    // than erroring forever — see DESIGN.md.
    let hot_cache = Arc::new(FakeHotCache::default());
    let warm_store = Arc::new(FakeWarmStore::default());
    let cold_archive = Arc::new(FakeColdArchive::default());
    let source_tier_cold = Arc::new(FakeSourceTier::default());
    let source_tier_warm = Arc::new(FakeSourceTier::default());
    let warehouse = Arc::new(FakeWarehouse::default());
    let judge = Arc::new(FakeJudge::default());
    let streaming_bus = Arc::new(FakeStreamingBus::default());
    let configmaps = Arc::new(rollout::fakes::InMemoryConfigMapSource::default());
    let schema_validator = Arc::new(rollout::fakes::MinimalPackSchemaValidator);
    let service_resolver = Arc::new(tool_registry::fakes::DnsServiceResolver);
    let tool_discovery = Arc::new(tool_registry::fakes::NullToolDiscovery::default());
    let availability_probe = Arc::new(tool_registry::fakes::AlwaysAvailableProbe::default());
    let cluster_applier = Arc::new(agent_runtime::fakes::InertClusterApplier::default());
    let source_transport = Arc::new(source_fetcher::fakes::EmptyTreeTransport::default());
    let content_volume = Arc::new(source_fetcher::fakes::NullContentVolume::default());
    let policy_publisher = Arc::new(policy::fakes::NullPolicyPublisher::default());

    let mut dispatcher = Dispatcher::new(Arc::clone(&queue), Arc::clone(&store), Arc::clone(&dlq), config.dispatcher_config());
    dispatcher.register(Arc::new(SourceFetcherReconciler::new(source_transport, content_volume, versions)));
    dispatcher.register(Arc::new(RolloutReconciler::new(configmaps.clone(), schema_validator)));
    dispatcher.register(Arc::new(ToolRegistryReconciler::new(
        service_resolver,
        tool_discovery,
        availability_probe,
        std::time::Duration::from_secs(30),
    )));
    dispatcher.register(Arc::new(AgentPolicyReconciler::new(Arc::clone(&store), Arc::clone(&policy_publisher))));
    dispatcher.register(Arc::new(ToolPolicyReconciler::new(policy_publisher)));
    dispatcher.register(Arc::new(RetentionReconciler::new(
        Arc::clone(&store),
        hot_cache,
        warm_store,
        cold_archive,
    )));
    dispatcher.register(Arc::new(AnalyticsSyncReconciler::new(
        watermarks,
        source_tier_cold,
        source_tier_warm,
        warehouse,
    )));
    dispatcher.register(Arc::new(AgentRuntimeReconciler::new(Arc::clone(&store), cluster_applier)));
    let dispatcher = Arc::new(dispatcher);

    let eval_dispatcher = Arc::new(EvalDispatcher::new(Arc::clone(&store), configmaps, judge, streaming_bus));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let is_leader = Arc::new(AtomicBool::new(!config.leader_election_enabled));
    let ready = Arc::new(AtomicBool::new(false));

    let mut background_tasks = Vec::new();

    let leader_handle_opt = if config.leader_election_enabled {
        let database_url = config
            .database_url
            .as_ref()
            .context("OMNIA_LEADER_ELECTION requires DATABASE_URL")?;
        let pool = sqlx::PgPool::connect(database_url).await.context("failed to connect for leader election")?;
        let elector = Arc::new(LeaderElector::new(pool, DEFAULT_LOCK_KEY, config.leader_poll_interval));
        let is_leader_handle = elector.is_leader_handle();
        background_tasks.push(tokio::spawn({
            let elector = Arc::clone(&elector);
            let shutdown_rx = shutdown_rx.clone();
            async move { elector.run(shutdown_rx).await }
        }));
        Some(is_leader_handle)
    } else {
        None
    };

    // Workers (and the watch-substitute poll loop) only ever run on the
    // leader when replication is enabled (spec.md §5: "when replicated, only
    // the leader runs reconcilers; followers stand by").
    let registry = Arc::new(build_default_registry());
    {
        let dispatcher = Arc::clone(&dispatcher);
        let queue = Arc::clone(&queue);
        let store = Arc::clone(&store);
        let registry = Arc::clone(&registry);
        let is_leader = is_leader.clone();
        let leader_handle = leader_handle_opt.clone();
        let watch_poll_interval = config.watch_poll_interval;
        let mut shutdown_rx = shutdown_rx.clone();
        background_tasks.push(tokio::spawn(async move {
            let mut worker_handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();
            loop {
                let leading = leader_handle.as_ref().map(|h| h.load(Ordering::SeqCst)).unwrap_or(true);
                is_leader.store(leading, Ordering::SeqCst);

                if leading && worker_handles.is_empty() {
                    tracing::info!("became leader; starting reconcile workers");
                    worker_handles = dispatcher.spawn_workers(shutdown_rx.clone());
                } else if !leading && !worker_handles.is_empty() {
                    tracing::warn!("lost leadership; reconcile workers will observe shutdown on next tick");
                    for handle in worker_handles.drain(..) {
                        handle.abort();
                    }
                }

                if leading {
                    for kind in registry.kinds() {
                        match store.list(kind, None).await {
                            Ok(objects) => {
                                for object in objects {
                                    queue
                                        .enqueue(omnia_control_plane::ReconcileKey::new(
                                            object.key.kind.clone(),
                                            object.key.namespace.clone(),
                                            object.key.name.clone(),
                                        ))
                                        .await;
                                }
                            }
                            Err(e) => tracing::error!(kind, error = %e, "watch-substitute list failed"),
                        }
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(watch_poll_interval) => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            for handle in worker_handles.drain(..) {
                                handle.abort();
                            }
                            return;
                        }
                    }
                }
            }
        }));
    }

    background_tasks.push(tokio::spawn({
        let eval_dispatcher = Arc::clone(&eval_dispatcher);
        async move { eval_dispatcher.run_queue_drain(std::time::Duration::from_secs(1)).await }
    }));
    background_tasks.push(tokio::spawn({
        let eval_dispatcher = Arc::clone(&eval_dispatcher);
        async move { eval_dispatcher.run_inactivity_timer(std::time::Duration::from_secs(30)).await }
    }));

    ready.store(true, Ordering::SeqCst);

    let http_state = HttpState {
        dispatcher: Arc::clone(&dispatcher),
        store: Arc::clone(&store),
        queue: Arc::clone(&queue),
        dlq,
        eval_dispatcher,
        is_leader,
        ready,
    };

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP address {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, "HTTP server listening");

    let app = http::router(http_state);
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await.context("HTTP server error")?;

    for handle in background_tasks {
        handle.abort();
    }

    Ok(())
}
