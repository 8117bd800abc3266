mod health;

use capv_client::{ResourceStore, WatchEventType};
use capv_controller::{ControllerConfig, Manager, ManagerConfig, VirtualMachineGroupReconciler};
use capv_core::{
    Cluster, MachineDeployment, ObjectKey, Resource, ResourceKey, VSphereMachine,
    VirtualMachineGroup,
};
use capv_storage::RedbBackend;
use clap::{Parser, Subcommand, ValueEnum};
use health::{HealthConfig, HealthServer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "capv", about = "VirtualMachineGroup placement controller")]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "CAPV_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Directory holding the resource store
    #[arg(long, global = true, env = "CAPV_DATA_DIR", default_value = "./capv-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller manager with health probes
    Run {
        /// Address for /healthz, /livez and /readyz
        #[arg(long, env = "CAPV_HEALTH_ADDR", default_value = "0.0.0.0:9440")]
        health_addr: String,
        /// Number of clusters reconciled at once
        #[arg(long, env = "CAPV_MAX_CONCURRENT_RECONCILES", default_value_t = 10)]
        max_concurrent_reconciles: usize,
        /// Seconds between full resyncs of every cluster
        #[arg(long, env = "CAPV_SYNC_PERIOD", default_value_t = 600)]
        sync_period: u64,
        /// Only handle objects in this namespace
        #[arg(long, env = "CAPV_NAMESPACE")]
        namespace: Option<String>,
        /// Only handle objects labelled cluster.x-k8s.io/watch-filter=<value>
        #[arg(long, env = "CAPV_WATCH_FILTER")]
        watch_filter: Option<String>,
    },
    /// Create or update resources from a multi-document YAML file
    Apply {
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
    },
    /// Print a resource as YAML
    Get {
        /// Kind, plural or short name (e.g. vmg)
        kind: String,
        /// namespace/name, or a bare name in "default"
        key: String,
    },
    /// Delete a resource
    Delete {
        kind: String,
        key: String,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run {
            health_addr,
            max_concurrent_reconciles,
            sync_period,
            namespace,
            watch_filter,
        } => {
            let config = ManagerConfig {
                max_concurrent_reconciles,
                sync_period: Duration::from_secs(sync_period),
                namespace,
                watch_filter,
                ..Default::default()
            };
            run_manager(&cli.data_dir, &health_addr, config).await
        }
        Commands::Apply { file } => run_apply(&cli.data_dir, &file).await,
        Commands::Get { kind, key } => run_get(&cli.data_dir, &kind, &key).await,
        Commands::Delete { kind, key } => run_delete(&cli.data_dir, &kind, &key).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Open the store under `data_dir`, creating the directory when missing
fn open_store(data_dir: &Path) -> miette::Result<ResourceStore> {
    std::fs::create_dir_all(data_dir).map_err(|e| {
        miette::miette!("Failed to create data directory {}: {}", data_dir.display(), e)
    })?;
    let backend = RedbBackend::open_in(data_dir)
        .map_err(|e| miette::miette!("Failed to open store in {}: {}", data_dir.display(), e))?;
    Ok(ResourceStore::new(Arc::new(backend)))
}

/// Run the manager and the health server until Ctrl+C
async fn run_manager(
    data_dir: &Path,
    health_addr: &str,
    config: ManagerConfig,
) -> miette::Result<()> {
    info!("Starting capv controller manager");

    let listen_addr: std::net::SocketAddr = health_addr
        .parse()
        .map_err(|e| miette::miette!("Invalid health address '{}': {}", health_addr, e))?;

    let store = Arc::new(open_store(data_dir)?);
    let token = CancellationToken::new();

    let reconciler = Arc::new(VirtualMachineGroupReconciler::new(
        store.clone(),
        ControllerConfig::default(),
    ));
    let manager = Manager::new(reconciler, store.clone(), store.subscribe(), config);
    let readiness = manager.readiness();

    let manager_token = token.clone();
    let manager_handle = tokio::spawn(async move {
        if let Err(e) = manager.run(manager_token).await {
            error!("Controller manager error: {}", e);
        }
    });

    let health = HealthServer::new(HealthConfig { listen_addr }, readiness);
    let health_token = token.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health.run(health_token).await {
            error!("Health server error: {}", e);
        }
    });

    info!("capv is running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down...");
    token.cancel();

    let shutdown = async {
        let _ = manager_handle.await;
        let _ = health_handle.await;
    };
    if tokio::time::timeout(Duration::from_secs(5), shutdown)
        .await
        .is_err()
    {
        error!("Shutdown timed out after 5 seconds");
    }

    info!("capv stopped");
    Ok(())
}

async fn run_apply(data_dir: &Path, file: &Path) -> miette::Result<()> {
    let data = std::fs::read_to_string(file)
        .map_err(|e| miette::miette!("Failed to read {}: {}", file.display(), e))?;
    let documents = capv_core::yaml_documents(&data)?;
    let store = open_store(data_dir)?;

    for document in documents {
        let api_version = document["apiVersion"].as_str().unwrap_or_default();
        let kind = document["kind"].as_str().unwrap_or_default();
        let gvk = store.scheme().resolve(api_version, kind)?;

        let key = if gvk == Cluster::type_gvk() {
            apply_as::<Cluster>(&store, document).await?
        } else if gvk == MachineDeployment::type_gvk() {
            apply_as::<MachineDeployment>(&store, document).await?
        } else if gvk == VSphereMachine::type_gvk() {
            apply_as::<VSphereMachine>(&store, document).await?
        } else if gvk == VirtualMachineGroup::type_gvk() {
            apply_as::<VirtualMachineGroup>(&store, document).await?
        } else {
            return Err(miette::miette!("No apply handler for {}", gvk));
        };
        println!("{} applied", key);
    }
    Ok(())
}

async fn apply_as<R: Resource>(
    store: &ResourceStore,
    document: serde_json::Value,
) -> miette::Result<String> {
    let resource: R = serde_json::from_value(document)
        .map_err(|e| miette::miette!("Invalid {} document: {}", R::KIND, e))?;
    let applied = store.apply(resource).await?;
    Ok(format!("{} {}", R::KIND, applied.object_key()))
}

/// Storage key of `kind` (any alias) and `namespace/name`
fn resolve_target(store: &ResourceStore, kind: &str, key: &str) -> miette::Result<ResourceKey> {
    let gvk = store.scheme().resolve_alias(kind)?;
    let object_key = ObjectKey::parse(key)
        .ok_or_else(|| miette::miette!("Invalid key '{}', expected namespace/name", key))?;
    Ok(ResourceKey::from_object_key(gvk, &object_key))
}

async fn run_get(data_dir: &Path, kind: &str, key: &str) -> miette::Result<()> {
    let store = open_store(data_dir)?;
    let resource_key = resolve_target(&store, kind, key)?;
    let object = store.get_value(&resource_key).await?;
    print!("{}", capv_core::to_yaml(&object)?);
    Ok(())
}

async fn run_delete(data_dir: &Path, kind: &str, key: &str) -> miette::Result<()> {
    let store = open_store(data_dir)?;
    let mut events = store.subscribe();
    let resource_key = resolve_target(&store, kind, key)?;
    store.delete_key(&resource_key).await?;

    while let Ok(event) = events.try_recv() {
        match event.event_type {
            WatchEventType::Deleted => println!("{} deleted", event.resource_key),
            _ => println!("{} marked for deletion", event.resource_key),
        }
    }
    Ok(())
}
