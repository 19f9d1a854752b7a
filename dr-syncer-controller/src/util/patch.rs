use super::MANAGER_NAME;
use dr_syncer_types::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    Api, Client, Error as KubeError,
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
};
use serde::{Serialize, de::DeserializeOwned};
use std::{clone::Clone, fmt::Debug};

pub trait Object<S: Status> {
    /// Returns a mutable reference to the status object, initializing
    /// it with the default value if it does not exist.
    fn mut_status(&mut self) -> &mut S;
}

pub trait Status {
    /// Sets the last updated timestamp to the given value.
    fn set_last_updated(&mut self, last_updated: Time);
}

impl Object<RemoteClusterStatus> for RemoteCluster {
    fn mut_status(&mut self) -> &mut RemoteClusterStatus {
        if self.status.is_none() {
            self.status = Some(Default::default());
        }
        self.status.as_mut().unwrap()
    }
}

impl Status for RemoteClusterStatus {
    fn set_last_updated(&mut self, last_updated: Time) {
        self.last_updated = Some(last_updated);
    }
}

impl Object<ClusterMappingStatus> for ClusterMapping {
    fn mut_status(&mut self) -> &mut ClusterMappingStatus {
        if self.status.is_none() {
            self.status = Some(Default::default());
        }
        self.status.as_mut().unwrap()
    }
}

impl Status for ClusterMappingStatus {
    fn set_last_updated(&mut self, _last_updated: Time) {}
}

impl Object<NamespaceMappingStatus> for NamespaceMapping {
    fn mut_status(&mut self) -> &mut NamespaceMappingStatus {
        if self.status.is_none() {
            self.status = Some(Default::default());
        }
        self.status.as_mut().unwrap()
    }
}

impl Status for NamespaceMappingStatus {
    fn set_last_updated(&mut self, last_updated: Time) {
        self.last_updated = Some(last_updated);
    }
}

/// Patches the resource's status subresource with the provided function,
/// retrying on write conflicts per spec's optimistic-concurrency discipline
/// (§5): re-read up to 5 times with a 250ms, 20%-growth backoff; if the
/// server's state already matches our intended state, the conflict counts as
/// success.
pub async fn patch_status<S: Status, T>(
    client: Client,
    instance: &T,
    f: impl Fn(&mut S) + Clone,
) -> Result<T, KubeError>
where
    <T as Resource>::DynamicType: Default,
    T: Clone
        + Resource
        + Object<S>
        + Serialize
        + DeserializeOwned
        + Debug
        + Resource<Scope = NamespaceResourceScope>,
{
    let name = instance.meta().name.clone().expect("object must have a name");
    let namespace = instance
        .meta()
        .namespace
        .clone()
        .expect("object must be namespaced");
    let api: Api<T> = Api::namespaced(client, &namespace);

    let mut current = instance.clone();
    let mut attempt = 0u32;
    let mut backoff = std::time::Duration::from_millis(250);

    loop {
        let mut modified = current.clone();
        let status = modified.mut_status();
        f(status);
        status.set_last_updated(Time::from(k8s_openapi::jiff::Timestamp::now()));

        let patch = Patch::Json::<T>(json_patch::diff(
            &serde_json::to_value(&current).unwrap(),
            &serde_json::to_value(&modified).unwrap(),
        ));

        match api
            .patch_status(&name, &PatchParams::apply(MANAGER_NAME), &patch)
            .await
        {
            Ok(updated) => return Ok(updated),
            Err(KubeError::Api(ae)) if ae.code == 409 && attempt < 5 => {
                attempt += 1;
                tokio::time::sleep(backoff).await;
                backoff = dr_syncer_common::backoff::grow_backoff(
                    backoff,
                    120,
                    std::time::Duration::from_secs(5),
                );
                current = api.get(&name).await?;
            }
            Err(e) => return Err(e),
        }
    }
}
