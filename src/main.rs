use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use clap::Parser;
use index_lifecycle::ack::handlers::{handle_schema_announce, handle_schema_confirm};
use index_lifecycle::ack::messenger::HttpMessenger;
use index_lifecycle::ack::protocol::{ENDPOINT_SCHEMA_ANNOUNCE, ENDPOINT_SCHEMA_CONFIRM};
use index_lifecycle::ack::view::SchemaView;
use index_lifecycle::config::LifecycleArgs;
use index_lifecycle::executor::backend::{InMemoryIndexBackend, IndexBackends};
use index_lifecycle::executor::coordinator::ScanResources;
use index_lifecycle::executor::elements::InMemoryGraph;
use index_lifecycle::executor::handlers::{
    handle_cancel_job, handle_clear_job, handle_get_job, handle_list_jobs,
};
use index_lifecycle::executor::partitioner::RangePartitioner;
use index_lifecycle::executor::protocol::{ENDPOINT_JOB, ENDPOINT_JOB_CANCEL, ENDPOINT_JOBS};
use index_lifecycle::management::handlers::*;
use index_lifecycle::management::manager::IndexManager;
use index_lifecycle::management::protocol::*;
use index_lifecycle::membership::registry::InstanceRegistry;
use index_lifecycle::membership::types::{InstanceId, InstanceRecord};
use index_lifecycle::schema::store::{FileSchemaStore, InMemorySchemaStore, SchemaStatusStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const MESSENGER_ATTEMPTS: usize = 2;

/// Index lifecycle coordination node
#[derive(Parser, Debug)]
#[command(name = "lifecycle-node")]
struct NodeArgs {
    /// Address the admin and internal HTTP endpoints listen on
    #[arg(long, env = "LIFECYCLE_BIND")]
    bind: SocketAddr,

    /// Seed node to join; omit to start as the seed (admin coordinator)
    #[arg(long, env = "LIFECYCLE_SEED")]
    seed: Option<SocketAddr>,

    /// Stable instance id; a random one is generated when omitted
    #[arg(long, env = "LIFECYCLE_INSTANCE_ID")]
    instance_id: Option<String>,

    #[command(flatten)]
    lifecycle: LifecycleArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = NodeArgs::parse();
    let bind_addr = args.bind;
    let seed = args.seed;
    let instance_id = args.instance_id.map(InstanceId::named).unwrap_or_default();
    let config = args.lifecycle.resolve()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level()?)
        .init();

    tracing::info!("Starting instance {} on {}", instance_id, bind_addr);
    match seed {
        Some(seed) => tracing::info!("Seed node: {}", seed),
        None => tracing::info!("Starting as seed node (admin coordinator)"),
    }

    // 1. Schema status store:
    let store: Arc<dyn SchemaStatusStore> = match &config.store_path {
        Some(path) => {
            tracing::info!("Schema status store: {}", path.display());
            Arc::new(FileSchemaStore::open(path)?)
        }
        None => {
            tracing::warn!("No store path configured, schema status kept in memory");
            Arc::new(InMemorySchemaStore::new())
        }
    };

    // 2. Local schema view, caught up with whatever the store already holds:
    let view = Arc::new(SchemaView::new(instance_id.clone(), store.clone()));
    let loaded = view.load_all();
    tracing::info!("Loaded {} schema entries into the local view", loaded);

    // 3. Membership registry, this instance first:
    let registry = InstanceRegistry::new(config.heartbeat_stale_after());
    let local = registry.register_instance(instance_id.clone(), Some(bind_addr));

    // 4. Scan resources and the engine:
    let backends = IndexBackends::new(InMemoryIndexBackend::new());
    let resources = ScanResources {
        partitioner: Arc::new(RangePartitioner::new(config.num_partitions)),
        source: Arc::new(InMemoryGraph::new()),
        backends,
    };
    // Requests stay well inside one round; the round deadline still caps the whole poll
    let request_timeout = (config.ack_timeout() / 4).max(Duration::from_millis(50));
    let messenger = Arc::new(HttpMessenger::new(request_timeout, MESSENGER_ATTEMPTS));
    let manager = IndexManager::from_config(&config, store, registry.clone(), messenger, resources);
    let tracker = manager.tracker().clone();

    // 5. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_INDEX, post(handle_build_index))
        .route(ENDPOINT_INDEX_ACTION, post(handle_update_index))
        .route(ENDPOINT_INDEX_STATUS, get(handle_index_status))
        .route(ENDPOINT_INDEX_AWAIT, get(handle_await_status))
        .route(ENDPOINT_INSTANCES, get(handle_list_instances))
        .route(ENDPOINT_INSTANCE_REGISTER, post(handle_register_instance))
        .route(ENDPOINT_INSTANCE_EVICT, post(handle_evict_instance))
        .route(ENDPOINT_INSTANCE_HEARTBEAT, post(handle_heartbeat))
        .route(ENDPOINT_JOBS, get(handle_list_jobs))
        .route(ENDPOINT_JOB, get(handle_get_job).delete(handle_clear_job))
        .route(ENDPOINT_JOB_CANCEL, post(handle_cancel_job))
        .route(ENDPOINT_SCHEMA_ANNOUNCE, post(handle_schema_announce))
        .route(ENDPOINT_SCHEMA_CONFIRM, post(handle_schema_confirm))
        .layer(Extension(manager.clone()))
        .layer(Extension(tracker.clone()))
        .layer(Extension(view));

    // 6. Join the seed and keep the lease alive:
    if let Some(seed) = seed {
        let record = join_seed(seed, &instance_id, bind_addr).await?;
        let client = reqwest::Client::new();
        let interval_ms = (config.heartbeat_stale_after_ms / 3).max(100);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            let url = format!(
                "http://{}{}",
                seed,
                ENDPOINT_INSTANCE_HEARTBEAT.replace(":id", &record.id.0)
            );

            loop {
                interval.tick().await;
                let result = client
                    .post(&url)
                    .json(&HeartbeatRequest {
                        lease_token: record.lease_token,
                    })
                    .send()
                    .await;
                if let Err(e) = result {
                    tracing::warn!("Heartbeat to seed {} failed: {}", seed, e);
                }
            }
        });
    } else {
        let registry = registry.clone();
        let interval_ms = (config.heartbeat_stale_after_ms / 3).max(100);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                if let Err(e) = registry.heartbeat(&local.id, local.lease_token) {
                    tracing::warn!("Local heartbeat failed: {}", e);
                }
            }
        });
    }

    // 7. Spawn stats reporter and job retention sweep:
    let stats_manager = manager.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let instances = stats_manager.registry().liveness();
            let jobs = stats_manager.tracker().status_counts();
            tracing::info!(
                "Cluster stats: {} instance(s), active rounds: {}, jobs: {:?}",
                instances.len(),
                stats_manager.acks().active_rounds().len(),
                jobs
            );
            for (record, liveness) in instances {
                tracing::debug!(
                    "  - {} http={:?} (token={}) {:?}",
                    record.id,
                    record.http_addr,
                    record.lease_token,
                    liveness
                );
            }

            let swept = stats_manager.tracker().sweep_expired();
            if swept > 0 {
                tracing::info!("Dropped {} expired job record(s)", swept);
            }
        }
    });

    // 8. Start HTTP server:
    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn join_seed(
    seed: SocketAddr,
    id: &InstanceId,
    http_addr: SocketAddr,
) -> anyhow::Result<InstanceRecord> {
    let url = format!("http://{}{}", seed, ENDPOINT_INSTANCE_REGISTER);
    let record: InstanceRecord = reqwest::Client::new()
        .post(url)
        .json(&RegisterInstanceRequest {
            id: id.clone(),
            http_addr: Some(http_addr),
        })
        .timeout(Duration::from_secs(5))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    tracing::info!(
        "Joined seed {} as {} (lease token {})",
        seed,
        record.id,
        record.lease_token
    );
    Ok(record)
}
