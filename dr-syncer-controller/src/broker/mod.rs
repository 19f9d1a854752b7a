//! Cluster Broker: loads and caches connection credentials for named
//! `RemoteCluster`s, and exposes typed/dynamic client handles into them.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use dr_syncer_types::{SyncCredential, SyncCredentialSpec};
use futures::stream::StreamExt;
use kube::{
    Api, Client, Config, ResourceExt,
    config::Kubeconfig,
    runtime::{watcher, WatchStreamExt},
};
use owo_colors::OwoColorize;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::RwLock;

use crate::util::Error;

struct CachedCluster {
    client: Client,
    cached_at: Instant,
}

/// Caches one [`Client`] per named `RemoteCluster`, keyed by the
/// `RemoteCluster`'s own name (not the credential name, though today the two
/// coincide one-to-one via `credentialRef`). A watch on [`SyncCredential`]
/// invalidates the matching cache entry on change.
#[derive(Clone)]
pub struct ClusterBroker {
    management: Client,
    cache: Arc<RwLock<HashMap<String, CachedCluster>>>,
}

impl ClusterBroker {
    pub fn new(management: Client) -> Self {
        Self {
            management,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Invalidates the cache entry for `cluster_name`, forcing the next
    /// `resolve` to rebuild the client from the credential payload. Called
    /// from the `SyncCredential` watcher when a credential changes.
    pub async fn invalidate(&self, cluster_name: &str) {
        self.cache.write().await.remove(cluster_name);
    }

    /// Resolves a named `RemoteCluster` to a live [`Client`], building and
    /// caching it from the credential payload on first use.
    pub async fn resolve(
        &self,
        cluster_name: &str,
        credential_ref: &str,
        credential_namespace: &str,
    ) -> Result<Client, Error> {
        if let Some(cached) = self.cache.read().await.get(cluster_name) {
            return Ok(cached.client.clone());
        }

        let credential_api: Api<SyncCredential> =
            Api::namespaced(self.management.clone(), credential_namespace);
        let credential = credential_api.get(credential_ref).await.map_err(|e| {
            if matches!(&e, kube::Error::Api(ae) if ae.code == 404) {
                Error::CredentialMissing(cluster_name.to_string())
            } else {
                Error::Kube { source: e }
            }
        })?;

        let client = build_client(cluster_name, &credential.spec).await?;

        self.cache.write().await.insert(
            cluster_name.to_string(),
            CachedCluster {
                client: client.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(client)
    }

    /// Success criterion (§4.1): a namespace list succeeds within `timeout`.
    /// Idempotent and safe to call on every Agent Health Prober tick.
    pub async fn verify_connectivity(
        &self,
        cluster_name: &str,
        client: &Client,
        timeout: std::time::Duration,
    ) -> bool {
        let namespaces: Api<k8s_openapi::api::core::v1::Namespace> = Api::all(client.clone());
        match tokio::time::timeout(timeout, namespaces.list(&Default::default())).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                eprintln!("verify_connectivity({cluster_name}): {e}");
                false
            }
            Err(_) => {
                eprintln!("verify_connectivity({cluster_name}): timed out after {timeout:?}");
                false
            }
        }
    }
}

/// Watches every `SyncCredential` cluster-wide and invalidates the
/// matching cache entry on apply or delete, so a rotated or revoked
/// credential is picked up by the next `resolve` rather than surviving the
/// cache's lifetime (§3.3). Relies on `SyncCredential`'s name coinciding
/// one-to-one with its `RemoteCluster`'s name, per `ClusterBroker`'s own
/// doc comment.
pub async fn watch_credentials(client: Client, broker: ClusterBroker) -> Result<(), Error> {
    println!("{}", "⚙️ Starting SyncCredential cache-invalidation watcher...".green());
    let credentials: Api<SyncCredential> = Api::all(client);
    let mut stream = watcher(credentials, watcher::Config::default()).touched_objects().boxed();
    loop {
        match stream.next().await {
            Some(Ok(credential)) => broker.invalidate(&credential.name_any()).await,
            Some(Err(e)) => eprintln!("SyncCredential watch error: {e}"),
            None => break Ok(()),
        }
    }
}

async fn build_client(cluster_name: &str, spec: &SyncCredentialSpec) -> Result<Client, Error> {
    if let Some(kubeconfig_b64) = &spec.kubeconfig {
        let raw = BASE64
            .decode(kubeconfig_b64)
            .map_err(|e| Error::CredentialInvalid(cluster_name.to_string(), e.to_string()))?;
        let kubeconfig: Kubeconfig = serde_yaml::from_slice(&raw)
            .map_err(|e| Error::CredentialInvalid(cluster_name.to_string(), e.to_string()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &Default::default())
            .await
            .map_err(|e| Error::CredentialInvalid(cluster_name.to_string(), e.to_string()))?;
        return Client::try_from(config).map_err(|e| Error::Kube { source: e });
    }

    let (server, token) = match (&spec.server, &spec.token) {
        (Some(server), Some(token)) => (server.clone(), token.clone()),
        _ => {
            return Err(Error::CredentialInvalid(
                cluster_name.to_string(),
                "must set either `kubeconfig` or both `server` and `token`".to_string(),
            ));
        }
    };

    let mut config = Config::new(
        server
            .parse()
            .map_err(|_| Error::CredentialInvalid(cluster_name.to_string(), "invalid server URL".to_string()))?,
    );
    config.auth_info.token = Some(token.into());
    if let Some(ca_bundle) = &spec.ca_bundle {
        let decoded = BASE64
            .decode(ca_bundle)
            .map_err(|e| Error::CredentialInvalid(cluster_name.to_string(), e.to_string()))?;
        config.root_cert = Some(vec![decoded]);
    }
    Client::try_from(config).map_err(|e| Error::Kube { source: e })
}
