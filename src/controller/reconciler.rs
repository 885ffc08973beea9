//! kube-runtime wiring for VirtualDatabase reconciliation
//!
//! The runtime decides when a VDB needs a pass; the [`Engine`] decides what
//! the pass does. Owned Deployments, Services and Secrets trigger passes for
//! their VDB.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{self, Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::engine::{Engine, Outcome};
#[cfg(feature = "metrics")]
use super::metrics;
use super::store::ObjectKey;
use crate::crd::VirtualDatabase;
use crate::error::{Error, Result};

pub const CONTROLLER_NAME: &str = "virtualdatabase";

/// Requeue used while this replica is not the leader
const STANDBY_REQUEUE: Duration = Duration::from_secs(5);

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub engine: Engine,
    pub is_leader: Arc<AtomicBool>,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let vdbs: Api<VirtualDatabase> = Api::all(client.clone());

    info!("Starting VirtualDatabase controller");

    match vdbs.list(&Default::default()).await {
        Ok(_) => info!("VirtualDatabase CRD is available"),
        Err(e) => {
            error!(
                "VirtualDatabase CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "VirtualDatabase CRD not installed".to_string(),
            ));
        }
    }

    Controller::new(vdbs, Config::default())
        .owns::<Deployment>(Api::all(client.clone()), Config::default())
        .owns::<Service>(Api::all(client.clone()), Config::default())
        .owns::<Secret>(Api::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.clone())
        .for_each(|res| {
            let state = state.clone();
            async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled: {}", obj),
                    // The object is gone before the engine saw its deletion;
                    // let it clean up whatever owner references cannot.
                    Err(controller::Error::ObjectNotFound(obj)) => {
                        let key = ObjectKey::new(
                            obj.namespace.clone().unwrap_or_else(|| "default".to_string()),
                            obj.name.clone(),
                        );
                        if let Err(e) = state.engine.reconcile(&key).await {
                            warn!("Cleanup of {} failed: {}", key, e);
                        }
                    }
                    Err(e) => error!("Reconcile error: {:?}", e),
                }
            }
        })
        .await;

    Ok(())
}

/// The main reconciliation function
///
/// Called whenever a VirtualDatabase or one of its owned objects changes,
/// and when a requeue timer expires.
#[instrument(skip(obj, state), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<VirtualDatabase>, state: Arc<ControllerState>) -> Result<Action> {
    let key = ObjectKey::from_resource(&obj);

    if !state.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping {}", key);
        return Ok(Action::requeue(STANDBY_REQUEUE));
    }

    let started = Instant::now();
    let outcome = state.engine.reconcile(&key).await;
    let elapsed = started.elapsed();
    debug!("Pass for {} took {:?}", key, elapsed);

    #[cfg(feature = "metrics")]
    metrics::observe_reconcile_duration_seconds(CONTROLLER_NAME, elapsed.as_secs_f64());

    Ok(to_action(outcome?))
}

pub(crate) fn to_action(outcome: Outcome) -> Action {
    match outcome {
        Outcome::Done => Action::await_change(),
        Outcome::RequeueAfter(delay) => Action::requeue(delay),
    }
}

/// Error policy for the controller
fn error_policy(vdb: Arc<VirtualDatabase>, error: &Error, _state: Arc<ControllerState>) -> Action {
    let key = ObjectKey::from_resource(&vdb);

    #[cfg(feature = "metrics")]
    metrics::inc_reconcile_error(CONTROLLER_NAME, error.metric_label());

    let retry_duration = if error.is_retriable() {
        warn!("Retriable error reconciling {}: {}", key, error);
        Duration::from_secs(5)
    } else {
        error!("Reconciliation error for {}: {:?}", key, error);
        Duration::from_secs(30)
    };

    Action::requeue(retry_duration)
}
