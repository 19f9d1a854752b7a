//! `NamespaceMapping` reconciler (§4.7): the top-level controller. Drives a
//! passive replica of `sourceNamespace` into `destinationNamespace` per the
//! `ClusterMapping` it references, dispatching Scheduled/Continuous/Manual
//! sync triggers and handling cutover/failback and teardown.
//!
//! Generalizes `shards::reconcile`'s leader-election + `determine_action` +
//! `ClusterAction` shape: one hardcoded `Cluster`/`Pod` pair becomes
//! `NamespaceMapping` driving an arbitrary pair of clusters through the
//! [`ClusterBroker`].

pub mod schedule;

mod continuous;

use chrono::Utc;
use dr_syncer_types::{
    ClusterMapping, ClusterMappingPhase, NamespaceMapping, NamespaceMappingPhase,
    NamespaceMappingStatus, OperationKind,
};
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::{
    Api, ResourceExt,
    api::{ObjectMeta, Patch, PatchParams, PostParams},
    client::Client,
    runtime::{Controller, controller::Action},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::{sync::Mutex, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::broker::ClusterBroker;
use crate::sync::{self, retry, transform::TransformConfig};
use crate::util::{
    Error, PROBE_INTERVAL,
    colors::{FG1, FG2},
    metrics::ControllerMetrics,
    patch::patch_status,
};

const FINALIZER: &str = "dr-syncer.io/cleanup";

pub async fn run(client: Client, broker: ClusterBroker) -> Result<(), Error> {
    println!("{}", "⚙️ Starting NamespaceMapping controller...".green());

    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("dr-syncer-namespace-mapping-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "dr-syncer-namespace-mapping-lock".to_string(),
            lease_ttl: Duration::from_secs(15),
        },
    );
    let renew_every = Duration::from_secs(5);

    let context = Arc::new(ContextData::new(client.clone(), broker));

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
                println!("{}", "👑 Acquired leadership; starting NamespaceMapping controller".green());
                let api: Api<NamespaceMapping> = Api::all(client.clone());
                let context = context.clone();
                controller_task = Some(tokio::spawn(async move {
                    Controller::new(api, Default::default())
                        .run(reconcile, on_error, context)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping NamespaceMapping controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    broker: ClusterBroker,
    metrics: ControllerMetrics,
    last_action: Mutex<HashMap<(String, String), (String, Instant)>>,
    continuous_watchers: Mutex<HashMap<(String, String), continuous::Supervisor>>,
}

impl ContextData {
    fn new(client: Client, broker: ClusterBroker) -> Self {
        Self {
            client,
            broker,
            metrics: ControllerMetrics::new("namespace_mapping"),
            last_action: Mutex::new(HashMap::new()),
            continuous_watchers: Mutex::new(HashMap::new()),
        }
    }
}

#[derive(Debug, Clone)]
enum NamespaceMappingAction {
    /// Referenced `ClusterMapping` isn't `Verified` yet; wait and retry.
    Blocked(String),
    /// Being deleted; tear down destination objects and drop the finalizer.
    Finalizing,
    /// Ensure the finalizer is present before doing anything else.
    EnsureFinalizer,
    Paused,
    NotDue,
    Sync,
    /// Continuous mode (§4.7/§4.9): ensure the per-kind watch supervisor is
    /// running rather than running a full sync on every poll.
    ContinuousWatch,
    Cutover,
    Failback,
    Error(String),
}

impl NamespaceMappingAction {
    fn to_str(&self) -> &str {
        match self {
            Self::Blocked(_) => "Blocked",
            Self::Finalizing => "Finalizing",
            Self::EnsureFinalizer => "EnsureFinalizer",
            Self::Paused => "Paused",
            Self::NotDue => "NotDue",
            Self::Sync => "Sync",
            Self::ContinuousWatch => "ContinuousWatch",
            Self::Cutover => "Cutover",
            Self::Failback => "Failback",
            Self::Error(_) => "Error",
        }
    }
}

async fn reconcile(instance: Arc<NamespaceMapping>, context: Arc<ContextData>) -> Result<Action, Error> {
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("NamespaceMapping must be namespaced".to_string()))?;
    let name = instance.name_any();
    context.metrics.record_reconcile(&name, &namespace);

    let start = Instant::now();
    let action = determine_action(&context, &namespace, &instance).await?;
    let action_label = action.to_str().to_string();

    {
        let mut last = context.last_action.lock().await;
        let key = (namespace.clone(), name.clone());
        let changed = last
            .get(&key)
            .map(|(prev, _)| prev != &action_label)
            .unwrap_or(true);
        if changed {
            println!(
                "🔧 {}{}{}{}{}",
                namespace.color(FG2),
                "/".color(FG1),
                name.color(FG2),
                " ACTION: ".color(FG1),
                action_label.color(FG2),
            );
        }
        last.insert(key, (action_label.clone(), Instant::now()));
    }

    context
        .metrics
        .observe_read(&name, &namespace, &action_label, start.elapsed().as_secs_f64());
    context.metrics.record_action(&name, &namespace, &action_label);

    let write_start = Instant::now();
    let result = match action {
        NamespaceMappingAction::Blocked(reason) => {
            set_phase(&context, &instance, NamespaceMappingPhase::Pending, Some(reason)).await?;
            Action::requeue(Duration::from_secs(15))
        }
        NamespaceMappingAction::EnsureFinalizer => {
            ensure_finalizer(&context.client, &instance).await?;
            Action::requeue(Duration::from_secs(1))
        }
        NamespaceMappingAction::Finalizing => {
            finalize(&context, &instance).await?;
            Action::await_change()
        }
        NamespaceMappingAction::Paused => Action::requeue(Duration::from_secs(30)),
        NamespaceMappingAction::NotDue => Action::requeue(Duration::from_secs(10)),
        NamespaceMappingAction::Sync => {
            let retry_status = run_sync(&context, &instance).await?;
            requeue_for_retry(retry_status)
        }
        NamespaceMappingAction::ContinuousWatch => {
            ensure_continuous_watch(&context, &instance).await?;
            Action::requeue(Duration::from_secs(3600))
        }
        NamespaceMappingAction::Cutover => {
            let retry_status = run_cutover_or_failback(&context, &instance, OperationKind::Cutover).await?;
            requeue_for_retry(retry_status)
        }
        NamespaceMappingAction::Failback => {
            let retry_status = run_cutover_or_failback(&context, &instance, OperationKind::Failback).await?;
            requeue_for_retry(retry_status)
        }
        NamespaceMappingAction::Error(message) => {
            set_phase(&context, &instance, NamespaceMappingPhase::Failed, Some(message)).await?;
            Action::requeue(Duration::from_secs(15))
        }
    };

    context
        .metrics
        .observe_write(&name, &namespace, &action_label, write_start.elapsed().as_secs_f64());

    Ok(result)
}

async fn determine_action(
    context: &ContextData,
    namespace: &str,
    instance: &NamespaceMapping,
) -> Result<NamespaceMappingAction, Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(if has_finalizer(instance) {
            NamespaceMappingAction::Finalizing
        } else {
            NamespaceMappingAction::NotDue
        });
    }
    if !has_finalizer(instance) {
        return Ok(NamespaceMappingAction::EnsureFinalizer);
    }
    if instance.spec.paused {
        return Ok(NamespaceMappingAction::Paused);
    }

    let cluster_mappings: Api<ClusterMapping> = Api::namespaced(context.client.clone(), namespace);
    let mapping = cluster_mappings.get(&instance.spec.cluster_mapping_ref).await?;
    let verified = mapping
        .status
        .as_ref()
        .is_some_and(|s| s.phase == ClusterMappingPhase::Verified);
    if !verified {
        return Ok(NamespaceMappingAction::Blocked(format!(
            "ClusterMapping '{}' is not Verified",
            instance.spec.cluster_mapping_ref
        )));
    }

    if let Some(operation) = instance.spec.operation {
        return Ok(match operation {
            OperationKind::Cutover => NamespaceMappingAction::Cutover,
            OperationKind::Failback => NamespaceMappingAction::Failback,
        });
    }

    use dr_syncer_types::ReplicationMode;
    match instance.spec.replication_mode {
        // §4.7 Manual: do nothing until the sync-now annotation is present.
        ReplicationMode::Manual => {
            if instance
                .metadata
                .annotations
                .as_ref()
                .is_some_and(|a| a.get(dr_syncer_common::annotations::SYNC_NOW).is_some_and(|v| v == "true"))
            {
                Ok(NamespaceMappingAction::Sync)
            } else {
                Ok(NamespaceMappingAction::NotDue)
            }
        }
        ReplicationMode::Continuous => Ok(NamespaceMappingAction::ContinuousWatch),
        ReplicationMode::Scheduled => {
            let Some(expr) = instance.spec.schedule.as_deref() else {
                return Ok(NamespaceMappingAction::Error(
                    "replicationMode Scheduled requires a schedule".to_string(),
                ));
            };
            let next_sync = instance
                .status
                .as_ref()
                .and_then(|s| s.next_sync_time.as_ref())
                .and_then(time_to_chrono);
            if schedule::is_due(next_sync, Utc::now()) {
                Ok(NamespaceMappingAction::Sync)
            } else {
                Ok(NamespaceMappingAction::NotDue)
            }
        }
    }
}

fn has_finalizer(instance: &NamespaceMapping) -> bool {
    instance
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == FINALIZER))
}

fn time_to_chrono(time: &Time) -> Option<chrono::DateTime<Utc>> {
    chrono::DateTime::from_timestamp(time.0.as_second(), 0)
}

fn chrono_to_time(dt: chrono::DateTime<Utc>) -> Time {
    let timestamp = k8s_openapi::jiff::Timestamp::from_second(dt.timestamp())
        .unwrap_or(k8s_openapi::jiff::Timestamp::UNIX_EPOCH);
    Time::from(timestamp)
}

async fn ensure_finalizer(client: &Client, instance: &NamespaceMapping) -> Result<(), Error> {
    let namespace = instance.namespace().expect("checked by caller");
    let api: Api<NamespaceMapping> = Api::namespaced(client.clone(), &namespace);
    let mut finalizers = instance.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());
    api.patch(
        &instance.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "metadata": { "finalizers": finalizers } })),
    )
    .await?;
    Ok(())
}

/// Clears destination objects carrying the management label, then drops the
/// finalizer so the `NamespaceMapping` can finish deleting (§4.7, §9).
async fn finalize(context: &ContextData, instance: &NamespaceMapping) -> Result<(), Error> {
    let namespace = instance.namespace().expect("checked by caller");

    let key = (namespace.clone(), instance.name_any());
    if let Some(supervisor) = context.continuous_watchers.lock().await.remove(&key) {
        supervisor.cancel.cancel();
        supervisor.handle.abort();
    }

    let mapping: Api<ClusterMapping> = Api::namespaced(context.client.clone(), &namespace);
    if let Ok(cluster_mapping) = mapping.get(&instance.spec.cluster_mapping_ref).await {
        let remote_clusters: Api<dr_syncer_types::RemoteCluster> =
            Api::namespaced(context.client.clone(), &namespace);
        if let Ok(remote) = remote_clusters.get(&cluster_mapping.spec.target_cluster).await {
            if let Ok(target) = context
                .broker
                .resolve(&cluster_mapping.spec.target_cluster, &remote.spec.credential_ref, &namespace)
                .await
            {
                let deployments: Api<k8s_openapi::api::apps::v1::Deployment> =
                    Api::namespaced(target, &instance.spec.destination_namespace);
                if let Ok(list) = deployments.list(&Default::default()).await {
                    for d in list.items {
                        if d.metadata.labels.as_ref().is_some_and(|l| {
                            l.contains_key(dr_syncer_common::MANAGEMENT_LABEL)
                        }) {
                            let _ = deployments
                                .delete(&d.name_any(), &Default::default())
                                .await;
                        }
                    }
                }
            }
        }
    }

    let api: Api<NamespaceMapping> = Api::namespaced(context.client.clone(), &namespace);
    let remaining: Vec<String> = instance
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();
    api.patch(
        &instance.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "metadata": { "finalizers": remaining } })),
    )
    .await?;
    Ok(())
}

async fn set_phase(
    context: &ContextData,
    instance: &NamespaceMapping,
    phase: NamespaceMappingPhase,
    message: Option<String>,
) -> Result<(), Error> {
    patch_status(context.client.clone(), instance, |status: &mut NamespaceMappingStatus| {
        status.phase = phase;
        status.last_error = message.clone().map(|m| dr_syncer_types::LastError {
            message: m,
            time: Some(Time::from(k8s_openapi::jiff::Timestamp::now())),
        });
    })
    .await?;
    Ok(())
}

/// Picks the next reconcile `Action` off the `RetryStatus` envelope `run_sync`
/// computed (§4.7 "if retries remain, requeue after backoff... else surface
/// terminal failure and stop requeuing for that generation"): `None` means
/// the last sync succeeded outright, so the normal poll cadence resumes.
fn requeue_for_retry(retry_status: Option<dr_syncer_types::RetryStatus>) -> Action {
    match &retry_status {
        None => Action::requeue(PROBE_INTERVAL),
        Some(envelope) if retry::should_retry(envelope) => {
            Action::requeue(Duration::from_secs(envelope.backoff_seconds))
        }
        Some(_) => Action::await_change(),
    }
}

async fn ensure_namespace(client: &Client, name: &str) -> Result<(), Error> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    match namespaces.get(name).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            let namespace = Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
            match namespaces.create(&PostParams::default(), &namespace).await {
                Ok(_) | Err(kube::Error::Api(_)) => Ok(()),
                Err(e) => Err(Error::from(e)),
            }
        }
        Err(e) => Err(Error::from(e)),
    }
}

/// Ensures the Continuous-mode watch supervisor is running for this mapping
/// (§4.7/§4.9), starting one if absent or if a previous one has exited.
async fn ensure_continuous_watch(
    context: &Arc<ContextData>,
    instance: &Arc<NamespaceMapping>,
) -> Result<(), Error> {
    let namespace = instance.namespace().expect("checked by caller");
    let key = (namespace.clone(), instance.name_any());

    {
        let watchers = context.continuous_watchers.lock().await;
        if watchers.get(&key).is_some_and(|s| !s.handle.is_finished()) {
            return Ok(());
        }
    }

    let mapping: Api<ClusterMapping> = Api::namespaced(context.client.clone(), &namespace);
    let cluster_mapping = mapping.get(&instance.spec.cluster_mapping_ref).await?;
    let remote_clusters: Api<dr_syncer_types::RemoteCluster> =
        Api::namespaced(context.client.clone(), &namespace);
    let source_remote = remote_clusters.get(&cluster_mapping.spec.source_cluster).await?;
    let source = context
        .broker
        .resolve(&cluster_mapping.spec.source_cluster, &source_remote.spec.credential_ref, &namespace)
        .await?;

    let interval = instance
        .spec
        .continuous
        .as_ref()
        .and_then(|c| c.background_sync_interval.as_deref())
        .and_then(|s| parse_duration::parse(s).ok())
        .unwrap_or(continuous::DEFAULT_BACKGROUND_SYNC_INTERVAL);

    let requested_kinds = dr_syncer_types::expand_resource_kinds(&instance.spec.resource_kinds);
    let supervisor = continuous::spawn(
        context.clone(),
        instance.clone(),
        source,
        instance.spec.source_namespace.clone(),
        requested_kinds,
        interval,
    );
    context.continuous_watchers.lock().await.insert(key, supervisor);
    Ok(())
}

async fn run_sync(
    context: &ContextData,
    instance: &NamespaceMapping,
) -> Result<Option<dr_syncer_types::RetryStatus>, Error> {
    let namespace = instance.namespace().expect("checked by caller");
    let mapping: Api<ClusterMapping> = Api::namespaced(context.client.clone(), &namespace);
    let cluster_mapping = mapping.get(&instance.spec.cluster_mapping_ref).await?;

    let remote_clusters: Api<dr_syncer_types::RemoteCluster> =
        Api::namespaced(context.client.clone(), &namespace);
    let source_remote = remote_clusters.get(&cluster_mapping.spec.source_cluster).await?;
    let target_remote = remote_clusters.get(&cluster_mapping.spec.target_cluster).await?;

    let source = context
        .broker
        .resolve(&cluster_mapping.spec.source_cluster, &source_remote.spec.credential_ref, &namespace)
        .await?;
    let target = context
        .broker
        .resolve(&cluster_mapping.spec.target_cluster, &target_remote.spec.credential_ref, &namespace)
        .await?;

    ensure_namespace(&target, &instance.spec.destination_namespace).await?;

    let synchronizer = sync::SyncNamespaceResources {
        source,
        target,
        source_namespace: instance.spec.source_namespace.clone(),
        destination_namespace: instance.spec.destination_namespace.clone(),
        config: TransformConfig {
            scale_to_zero: instance.spec.scale_to_zero,
            pvc: instance.spec.pvc_config.clone(),
            ingress: instance.spec.ingress_config.clone(),
            immutable: instance.spec.immutable_resource_config.clone(),
        },
    };
    let started = Instant::now();
    let outcomes = synchronizer.run(&instance.spec.resource_kinds).await;

    let failed = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, sync::SyncOutcome::Failed(_)))
        .count();
    let total = outcomes.len() as u64;
    let successful = total - failed as u64;

    let retry_status = if failed > 0 {
        let previous = instance.status.as_ref().and_then(|s| s.retry_status.as_ref());
        Some(retry::on_failure(&instance.spec.retry_config, previous))
    } else {
        retry::on_success()
    };

    // §4.7 Scheduled: invalid cron falls back to a 5-minute default interval
    // rather than blocking reconciliation.
    let next_sync_time = if instance.spec.replication_mode == dr_syncer_types::ReplicationMode::Scheduled {
        let next = instance
            .spec
            .schedule
            .as_deref()
            .and_then(|expr| schedule::next_occurrence(expr, Utc::now()));
        Some(next.unwrap_or_else(|| {
            eprintln!(
                "invalid cron expression {:?}; defaulting nextSyncTime to +5m",
                instance.spec.schedule
            );
            Utc::now() + chrono::Duration::minutes(5)
        }))
        .map(chrono_to_time)
    } else {
        None
    };

    let phase = if failed > 0 {
        NamespaceMappingPhase::Failed
    } else {
        NamespaceMappingPhase::Completed
    };
    let duration = started.elapsed().as_secs_f64();
    let synced_condition = Condition {
        type_: "Synced".to_string(),
        status: if failed == 0 { "True" } else { "False" }.to_string(),
        reason: if failed == 0 { "SyncSucceeded" } else { "SyncFailed" }.to_string(),
        message: format!("{successful}/{total} objects synced"),
        last_transition_time: Time::from(k8s_openapi::jiff::Timestamp::now()),
        observed_generation: instance.metadata.generation,
    };

    patch_status(context.client.clone(), instance, |status: &mut NamespaceMappingStatus| {
        status.phase = phase;
        status.last_sync_time = Some(Time::from(k8s_openapi::jiff::Timestamp::now()));
        status.next_sync_time = next_sync_time.clone();
        status.sync_stats.total += total;
        status.sync_stats.successful += successful;
        status.sync_stats.failed += failed as u64;
        status.sync_stats.last_duration_seconds = duration;
        status.retry_status = retry_status.clone();
        if failed == 0 {
            status.last_error = None;
        }
        upsert_condition(&mut status.conditions, synced_condition.clone());
    })
    .await?;

    if instance.spec.replication_mode == dr_syncer_types::ReplicationMode::Manual {
        clear_sync_now(&context.client, instance).await?;
    }

    if instance.spec.pvc_config.enabled && instance.spec.pvc_config.migrate_data {
        if let Err(e) = crate::pvc::orchestrator::migrate(
            synchronizer.source.clone(),
            synchronizer.target.clone(),
            instance,
        )
        .await
        {
            eprintln!("data-mover: migration pass failed: {e}");
        }
    }

    Ok(retry_status)
}

/// Displaces any prior condition of the same `type_`, keeping at most one
/// entry per type (§4.7 "upsert a Synced=True condition, displace any
/// prior").
fn upsert_condition(conditions: &mut Vec<Condition>, new: Condition) {
    conditions.retain(|c| c.type_ != new.type_);
    conditions.push(new);
}

/// Clears the sync-now annotation after a Manual-mode sync runs (§4.7
/// "clear/ignore the annotation on the next observed generation").
async fn clear_sync_now(client: &Client, instance: &NamespaceMapping) -> Result<(), Error> {
    let namespace = instance.namespace().expect("checked by caller");
    let api: Api<NamespaceMapping> = Api::namespaced(client.clone(), &namespace);
    api.patch(
        &instance.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({
            "metadata": { "annotations": { dr_syncer_common::annotations::SYNC_NOW: null } }
        })),
    )
    .await?;
    Ok(())
}

/// Cutover = sync + source-annotate-and-scale-down + destination-scale-up;
/// Failback = sync in reverse + destination-annotate-and-scale-down +
/// source-scale-up (§4.7). Both directions are driven by the same pair of
/// helpers (`scale_down_and_annotate`/`scale_up_from_annotation`) with the
/// "from"/"to" clusters swapped, since the two operations are mirror images
/// of each other.
async fn run_cutover_or_failback(
    context: &ContextData,
    instance: &NamespaceMapping,
    operation: OperationKind,
) -> Result<Option<dr_syncer_types::RetryStatus>, Error> {
    let namespace = instance.namespace().expect("checked by caller");
    let mapping: Api<ClusterMapping> = Api::namespaced(context.client.clone(), &namespace);
    let cluster_mapping = mapping.get(&instance.spec.cluster_mapping_ref).await?;
    let remote_clusters: Api<dr_syncer_types::RemoteCluster> =
        Api::namespaced(context.client.clone(), &namespace);
    let source_remote = remote_clusters.get(&cluster_mapping.spec.source_cluster).await?;
    let target_remote = remote_clusters.get(&cluster_mapping.spec.target_cluster).await?;
    let source = context
        .broker
        .resolve(&cluster_mapping.spec.source_cluster, &source_remote.spec.credential_ref, &namespace)
        .await?;
    let target = context
        .broker
        .resolve(&cluster_mapping.spec.target_cluster, &target_remote.spec.credential_ref, &namespace)
        .await?;

    let retry_status = match operation {
        OperationKind::Cutover => {
            let retry_status = run_sync(context, instance).await?;
            scale_down_and_annotate(&source, &instance.spec.source_namespace).await?;
            scale_up_from_annotation(&target, &instance.spec.destination_namespace).await?;
            retry_status
        }
        OperationKind::Failback => {
            ensure_namespace(&source, &instance.spec.source_namespace).await?;
            let reverse = sync::SyncNamespaceResources {
                source: target.clone(),
                target: source.clone(),
                source_namespace: instance.spec.destination_namespace.clone(),
                destination_namespace: instance.spec.source_namespace.clone(),
                config: TransformConfig {
                    scale_to_zero: instance.spec.scale_to_zero,
                    pvc: instance.spec.pvc_config.clone(),
                    ingress: instance.spec.ingress_config.clone(),
                    immutable: instance.spec.immutable_resource_config.clone(),
                },
            };
            let outcomes = reverse.run(&instance.spec.resource_kinds).await;
            let failed = outcomes.iter().any(|(_, o)| matches!(o, sync::SyncOutcome::Failed(_)));
            let previous = instance.status.as_ref().and_then(|s| s.retry_status.as_ref());
            let retry_status = if failed {
                Some(retry::on_failure(&instance.spec.retry_config, previous))
            } else {
                retry::on_success()
            };
            scale_down_and_annotate(&target, &instance.spec.destination_namespace).await?;
            scale_up_from_annotation(&source, &instance.spec.source_namespace).await?;
            retry_status
        }
    };

    let namespace_mappings: Api<NamespaceMapping> = Api::namespaced(context.client.clone(), &namespace);
    namespace_mappings
        .patch(
            &instance.name_any(),
            &PatchParams::default(),
            &Patch::Merge(json!({ "spec": { "operation": null } })),
        )
        .await?;

    set_phase(
        context,
        instance,
        NamespaceMappingPhase::Completed,
        Some(format!("{operation:?} complete")),
    )
    .await?;

    Ok(retry_status)
}

/// Records each Deployment's current replica count in the
/// `originalReplicas` annotation (default 1 if already zero/missing) and
/// scales it to zero, so the mirrored `scale_up_from_annotation` call on the
/// other side of a later reversal can restore it exactly.
async fn scale_down_and_annotate(client: &Client, namespace: &str) -> Result<(), Error> {
    let deployments: Api<k8s_openapi::api::apps::v1::Deployment> =
        Api::namespaced(client.clone(), namespace);
    let list = deployments.list(&Default::default()).await?;
    for deployment in list.items {
        let name = deployment.name_any();
        let current = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let original = if current > 0 {
            current
        } else {
            crate::sync::transform::original_replicas(&deployment.metadata)
        };
        deployments
            .patch(
                &name,
                &PatchParams::apply(crate::util::MANAGER_NAME).force(),
                &Patch::Apply(json!({
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "metadata": {
                        "annotations": {
                            dr_syncer_common::annotations::ORIGINAL_REPLICAS: original.to_string(),
                        },
                    },
                    "spec": { "replicas": 0 },
                })),
            )
            .await?;
    }
    Ok(())
}

/// Scales every Deployment back up from its `originalReplicas` annotation
/// (missing or unparseable defaults to 1, per §4.7).
async fn scale_up_from_annotation(client: &Client, namespace: &str) -> Result<(), Error> {
    let deployments: Api<k8s_openapi::api::apps::v1::Deployment> =
        Api::namespaced(client.clone(), namespace);
    let list = deployments.list(&Default::default()).await?;
    for deployment in list.items {
        let name = deployment.name_any();
        let desired = crate::sync::transform::original_replicas(&deployment.metadata);
        deployments
            .patch(
                &name,
                &PatchParams::apply(crate::util::MANAGER_NAME).force(),
                &Patch::Apply(json!({
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "spec": { "replicas": desired },
                })),
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizer_absent_by_default() {
        let instance = NamespaceMapping::new("test", Default::default());
        assert!(!has_finalizer(&instance));
    }
}

fn on_error(instance: Arc<NamespaceMapping>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("NamespaceMapping reconciliation error: {error:?} {:?}", instance.name_any()).red()
    );
    Action::requeue(Duration::from_secs(5))
}
