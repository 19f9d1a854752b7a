//! Continuous-mode watch supervisor (§4.7 continuous path): starts one
//! `kube::runtime::watcher` per requested resource kind against the source
//! namespace, plus a `backgroundSyncInterval` ticker, and triggers a full
//! `run_sync` pass whenever either fires. Mirrors
//! `btrfs-provisioner::controller`'s `stream::select_all` of per-kind
//! watchers, but collapses each watcher down to a bare tick since a
//! continuous-mode resync always re-reads every kind, not just the one that
//! changed.

use std::sync::Arc;
use std::time::Duration;

use dr_syncer_types::NamespaceMapping;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;

use super::ContextData;
use crate::util::patch::patch_status;

pub const DEFAULT_BACKGROUND_SYNC_INTERVAL: Duration = Duration::from_secs(300);

pub struct Supervisor {
    pub cancel: CancellationToken,
    pub handle: tokio::task::JoinHandle<()>,
}

/// Spawns the supervisor task for one `NamespaceMapping` and returns its
/// handle; the caller owns cancellation.
pub fn spawn(
    context: Arc<ContextData>,
    instance: Arc<NamespaceMapping>,
    source: Client,
    source_namespace: String,
    requested_kinds: Vec<String>,
    background_sync_interval: Duration,
) -> Supervisor {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        run_supervisor(
            context,
            instance,
            source,
            source_namespace,
            requested_kinds,
            background_sync_interval,
            task_cancel,
        )
        .await;
    });
    Supervisor { cancel, handle }
}

fn kind_stream(kind: &str, client: Client, namespace: &str) -> Option<BoxStream<'static, ()>> {
    let cfg = watcher::Config::default();
    let s: BoxStream<'static, ()> = match kind {
        "deployments" => {
            let api: Api<Deployment> = Api::namespaced(client, namespace);
            watcher(api, cfg).touched_objects().map(|_| ()).boxed()
        }
        "services" => {
            let api: Api<Service> = Api::namespaced(client, namespace);
            watcher(api, cfg).touched_objects().map(|_| ()).boxed()
        }
        "configmaps" => {
            let api: Api<ConfigMap> = Api::namespaced(client, namespace);
            watcher(api, cfg).touched_objects().map(|_| ()).boxed()
        }
        "secrets" => {
            let api: Api<Secret> = Api::namespaced(client, namespace);
            watcher(api, cfg).touched_objects().map(|_| ()).boxed()
        }
        "ingresses" => {
            let api: Api<Ingress> = Api::namespaced(client, namespace);
            watcher(api, cfg).touched_objects().map(|_| ()).boxed()
        }
        "persistentvolumeclaims" => {
            let api: Api<PersistentVolumeClaim> = Api::namespaced(client, namespace);
            watcher(api, cfg).touched_objects().map(|_| ()).boxed()
        }
        // Cluster-scoped; a namespaced watch can't cover it and a full
        // cluster-wide PV watch is unnecessary noise for one mapping.
        "persistentvolumes" => return None,
        other => {
            eprintln!("continuous watch: skipping unrecognized kind '{other}'");
            return None;
        }
    };
    Some(s)
}

async fn run_supervisor(
    context: Arc<ContextData>,
    instance: Arc<NamespaceMapping>,
    source: Client,
    source_namespace: String,
    requested_kinds: Vec<String>,
    background_sync_interval: Duration,
    cancel: CancellationToken,
) {
    let streams: Vec<_> = requested_kinds
        .iter()
        .filter_map(|kind| kind_stream(kind, source.clone(), &source_namespace))
        .collect();
    if streams.is_empty() {
        eprintln!("continuous watch: no watchable kinds for namespace '{source_namespace}'; nothing to do");
        return;
    }
    let mut merged = stream::select_all(streams.into_iter().map(|s| s.map(|_| Signal::Watch)));
    let mut tick = tokio::time::interval(background_sync_interval);
    tick.tick().await; // first tick is immediate; don't resync on supervisor startup

    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => Signal::Tick,
            next = merged.next() => match next {
                Some(signal) => signal,
                None => break,
            },
        };
        match signal {
            Signal::Watch => record_watch_event(&context, &instance).await,
            Signal::Tick => {}
        }
        trigger_sync(&context, &instance).await;
    }
}

enum Signal {
    Watch,
    Tick,
}

async fn trigger_sync(context: &ContextData, instance: &NamespaceMapping) {
    if let Err(e) = super::run_sync(context, instance).await {
        eprintln!("continuous watch: resync failed for '{}': {e}", instance.name_any());
    }
}

async fn record_watch_event(context: &ContextData, instance: &NamespaceMapping) {
    let result = patch_status(
        context.client.clone(),
        instance,
        |status: &mut dr_syncer_types::NamespaceMappingStatus| {
            status.last_watch_event = Some(Time::from(k8s_openapi::jiff::Timestamp::now()));
        },
    )
    .await;
    if let Err(e) = result {
        eprintln!("continuous watch: failed to record lastWatchEvent: {e}");
    }
}
