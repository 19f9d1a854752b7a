//! `ClusterMapping` reconciler (§4.1): verifies connectivity from the
//! management cluster into `targetCluster` via the [`ClusterBroker`], and
//! records the result on `status.phase`. Generalizes
//! `clusters::reconcile::run`'s leader-election + `Controller` shape from one
//! hardcoded kind to `ClusterMapping`.

use dr_syncer_types::{ClusterMapping, ClusterMappingPhase, ClusterMappingStatus};
use futures::stream::StreamExt;
use kube::{
    Api, ResourceExt,
    client::Client,
    runtime::{Controller, controller::Action},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::broker::ClusterBroker;
use crate::util::{
    Error, PROBE_INTERVAL,
    colors::{FG1, FG2},
    metrics::ControllerMetrics,
    patch::patch_status,
};

pub async fn run(client: Client, broker: ClusterBroker) -> Result<(), Error> {
    println!("{}", "⚙️ Starting ClusterMapping controller...".green());

    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("dr-syncer-cluster-mapping-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "dr-syncer-cluster-mapping-lock".to_string(),
            lease_ttl: Duration::from_secs(15),
        },
    );
    let renew_every = Duration::from_secs(5);

    let context = Arc::new(ContextData {
        client: client.clone(),
        broker,
        metrics: ControllerMetrics::new("cluster_mapping"),
    });

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        dr_syncer_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(());
            }
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };
        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "👑 Acquired leadership; starting ClusterMapping controller".green());
                let api: Api<ClusterMapping> = Api::all(client.clone());
                let context = context.clone();
                controller_task = Some(tokio::spawn(async move {
                    Controller::new(api, Default::default())
                        .run(reconcile, on_error, context)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping ClusterMapping controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    broker: ClusterBroker,
    metrics: ControllerMetrics,
}

async fn reconcile(instance: Arc<ClusterMapping>, context: Arc<ContextData>) -> Result<Action, Error> {
    let namespace = instance.namespace().ok_or_else(|| {
        Error::UserInput("ClusterMapping must be namespaced".to_string())
    })?;
    let name = instance.name_any();
    context.metrics.record_reconcile(&name, &namespace);

    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let timeout = Duration::from_secs(instance.spec.connectivity_timeout_seconds);
    let start = std::time::Instant::now();

    let remote_clusters: Api<dr_syncer_types::RemoteCluster> =
        Api::namespaced(context.client.clone(), &namespace);
    let resolved = match remote_clusters.get(&instance.spec.target_cluster).await {
        Ok(remote) => {
            context
                .broker
                .resolve(&instance.spec.target_cluster, &remote.spec.credential_ref, &namespace)
                .await
        }
        Err(e) => Err(Error::from(e)),
    };

    let (phase, message) = match resolved {
        Ok(target_client) => {
            let reachable = context
                .broker
                .verify_connectivity(&instance.spec.target_cluster, &target_client, timeout)
                .await;
            if reachable {
                (ClusterMappingPhase::Verified, None)
            } else {
                (
                    ClusterMappingPhase::Unreachable,
                    Some(format!("'{}' did not respond within {timeout:?}", instance.spec.target_cluster)),
                )
            }
        }
        Err(e) => (ClusterMappingPhase::Unreachable, Some(e.to_string())),
    };
    context
        .metrics
        .observe_read(&name, &namespace, phase_label(phase), start.elapsed().as_secs_f64());

    println!(
        "🔧 {}{}{}{}{}",
        namespace.color(FG2),
        "/".color(FG1),
        name.color(FG2),
        " PHASE: ".color(FG1),
        phase_label(phase).color(FG2),
    );

    patch_status(context.client.clone(), instance.as_ref(), |status: &mut ClusterMappingStatus| {
        status.phase = phase;
        status.message = message.clone();
        status.last_verified = Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
            k8s_openapi::jiff::Timestamp::now(),
        ));
    })
    .await?;

    if phase == ClusterMappingPhase::Verified {
        Ok(Action::requeue(PROBE_INTERVAL))
    } else {
        Ok(Action::requeue(Duration::from_secs(15)))
    }
}

fn phase_label(phase: ClusterMappingPhase) -> &'static str {
    match phase {
        ClusterMappingPhase::Pending => "Pending",
        ClusterMappingPhase::Verified => "Verified",
        ClusterMappingPhase::Unreachable => "Unreachable",
    }
}

fn on_error(instance: Arc<ClusterMapping>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("ClusterMapping reconciliation error: {error:?} {:?}", instance.name_any()).red()
    );
    Action::requeue(Duration::from_secs(5))
}
