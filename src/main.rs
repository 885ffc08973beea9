use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use tracing::{info, warn};
use vdb_operator::controller::{
    self, Context, ControllerState, Engine, KubeBuilds, KubeConfigResolver, KubeStore,
    KubeWorkloads, OperatorConfig, SystemClock, TarGzPackager,
};
use vdb_operator::crd::VirtualDatabase;
use vdb_operator::{telemetry, Error};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version information
    Version,
    /// List the VirtualDatabases in a namespace and their phases
    Info(InfoArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Operator namespace, where the leader election lease lives
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Image the per-VDB builder images are layered on
    #[arg(
        long,
        env = "VDB_BASE_IMAGE",
        default_value = "registry.access.redhat.com/ubi9/openjdk-17:latest"
    )]
    base_image: String,

    /// Seconds between passes over a VDB that needs no write
    #[arg(long, env = "VDB_REQUEUE_SECONDS", default_value_t = 5)]
    requeue_seconds: u64,

    /// Seconds a rollout may take before the VDB is marked failed
    #[arg(long, env = "VDB_ROLLOUT_TIMEOUT_SECONDS", default_value_t = 600)]
    rollout_timeout_seconds: u64,

    /// Seconds to wait for a Route host within one pass
    #[arg(long, env = "VDB_ROUTE_WAIT_SECONDS", default_value_t = 30)]
    route_wait_seconds: u64,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl RunArgs {
    fn operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            requeue_interval: Duration::from_secs(self.requeue_seconds),
            rollout_timeout: Duration::from_secs(self.rollout_timeout_seconds),
            route_wait_timeout: Duration::from_secs(self.route_wait_seconds),
            ..Default::default()
        }
    }
}

#[derive(Parser, Debug)]
struct InfoArgs {
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("vdb-operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    let api: Api<VirtualDatabase> = Api::namespaced(client, &args.namespace);
    let vdbs = api
        .list(&Default::default())
        .await
        .map_err(Error::KubeError)?;

    println!("Managed VirtualDatabases: {}", vdbs.items.len());
    for vdb in &vdbs.items {
        println!("  {:<32} {}", vdb.name_any(), vdb.phase());
    }
    Ok(())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    if telemetry::init_telemetry(args.log_json)? {
        info!("OpenTelemetry tracing initialized");
    } else {
        info!(
            "OpenTelemetry tracing disabled ({} not set)",
            telemetry::OTLP_ENDPOINT_ENV
        );
    }

    info!("Starting vdb-operator v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;

    info!("Connected to Kubernetes cluster");

    // Leader election configuration
    let leader_namespace =
        std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.namespace.clone());
    let holder_identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });

    info!("Leader election using holder ID: {}", holder_identity);

    let is_leader = Arc::new(AtomicBool::new(false));

    {
        let lease_client = client.clone();
        let lease_ns = leader_namespace.clone();
        let identity = holder_identity.clone();
        let is_leader_bg = Arc::clone(&is_leader);

        tokio::spawn(async move {
            run_leader_election(lease_client, &lease_ns, &identity, is_leader_bg).await;
        });
    }

    let context = Context {
        store: Arc::new(KubeStore::new(client.clone())),
        resolver: Arc::new(KubeConfigResolver::new(client.clone())),
        builds: Arc::new(KubeBuilds::new(client.clone(), args.base_image.clone())),
        packager: Arc::new(TarGzPackager),
        workloads: Arc::new(KubeWorkloads::new(client.clone())),
        clock: Arc::new(SystemClock),
        config: args.operator_config(),
    };

    let state = Arc::new(ControllerState {
        client: client.clone(),
        engine: Engine::new(Arc::new(context)),
        is_leader: Arc::clone(&is_leader),
    });

    #[cfg(feature = "rest-api")]
    {
        let api_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = vdb_operator::rest_api::run_server(api_state).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    let result = controller::run_controller(state).await;

    telemetry::shutdown_telemetry();

    result
}

const LEASE_NAME: &str = "vdb-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

async fn run_leader_election(
    client: kube::Client,
    namespace: &str,
    identity: &str,
    is_leader: Arc<AtomicBool>,
) {
    let leases: Api<Lease> = Api::namespaced(client, namespace);

    loop {
        match try_acquire_or_renew(&leases, namespace, identity).await {
            Ok(true) => {
                if !is_leader.load(Ordering::Relaxed) {
                    info!("Acquired leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(true, Ordering::Relaxed);
                tokio::time::sleep(RENEW_INTERVAL).await;
            }
            Ok(false) => {
                if is_leader.load(Ordering::Relaxed) {
                    warn!("Lost leadership for lease {}", LEASE_NAME);
                }
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                warn!("Leader election error: {:?}", e);
                is_leader.store(false, Ordering::Relaxed);
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
}

async fn try_acquire_or_renew(
    leases: &Api<Lease>,
    namespace: &str,
    identity: &str,
) -> Result<bool, kube::Error> {
    let now = Utc::now();

    let Some(existing) = leases.get_opt(LEASE_NAME).await? else {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(identity.to_string()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                ..Default::default()
            }),
        };
        leases.create(&PostParams::default(), &lease).await?;
        info!("Created lease {} with holder {}", LEASE_NAME, identity);
        return Ok(true);
    };

    let spec = existing.spec.as_ref();
    let current_holder = spec.and_then(|s| s.holder_identity.as_deref());

    if current_holder == Some(identity) {
        let patch = serde_json::json!({
            "spec": {
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
            }
        });
        leases
            .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        return Ok(true);
    }

    let expired = spec
        .and_then(|s| s.renew_time.as_ref())
        .map(|renew| {
            let duration = spec
                .and_then(|s| s.lease_duration_seconds)
                .unwrap_or(LEASE_DURATION_SECS);
            now > renew.0 + chrono::Duration::seconds(duration as i64)
        })
        .unwrap_or(true);

    if !expired {
        return Ok(false);
    }

    info!(
        "Lease held by {:?} has expired, taking over",
        current_holder
    );
    // A stale resourceVersion fails the takeover with 409.
    let patch = serde_json::json!({
        "metadata": { "resourceVersion": existing.resource_version() },
        "spec": {
            "holderIdentity": identity,
            "acquireTime": MicroTime(now),
            "renewTime": MicroTime(now),
            "leaseDurationSeconds": LEASE_DURATION_SECS,
        }
    });
    match leases
        .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
        Err(e) => Err(e),
    }
}
