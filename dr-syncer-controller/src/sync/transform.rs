//! Pure transform functions applied to every synced object (§4.6), kept
//! separate from `sync::mod`'s I/O so they're directly unit-testable, the
//! same shape as `util::patch::patch_status`'s mutate-then-submit split.

use dr_syncer_types::{ImmutableResourceConfig, IngressConfig, NameMapping, PvcConfig};
use kube::api::{DynamicObject, ObjectMeta};

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

#[derive(Clone, Debug)]
pub struct TransformConfig {
    pub scale_to_zero: bool,
    pub pvc: PvcConfig,
    pub ingress: IngressConfig,
    pub immutable: ImmutableResourceConfig,
}

/// Clears every field the API server sets on write, so a re-apply of an
/// object read from the source cluster doesn't fight the destination
/// server's own bookkeeping (§4.6 step 1).
pub fn strip_server_fields(meta: &mut ObjectMeta) {
    meta.resource_version = None;
    meta.uid = None;
    meta.creation_timestamp = None;
    meta.generation = None;
    meta.managed_fields = None;
    meta.owner_references = None;
    meta.finalizers = None;
    if let Some(annotations) = meta.annotations.as_mut() {
        annotations.remove(LAST_APPLIED_ANNOTATION);
    }
}

/// Strips the `status` subresource from a `DynamicObject` read off an
/// arbitrary kind, since `status` is always server-managed and this system
/// never has a typed view into it (§4.6 dynamic path).
pub fn strip_dynamic_status(object: &mut DynamicObject) {
    if let Some(map) = object.data.as_object_mut() {
        map.remove("status");
    }
}

/// Records the pre-scale-down replica count so a later failback can restore
/// it (§4.6 step 3). Idempotent: re-running with the same original count is
/// a no-op write.
pub fn annotate_original_replicas(meta: &mut ObjectMeta, original: i32) {
    meta.annotations
        .get_or_insert_with(Default::default)
        .insert(
            dr_syncer_common::annotations::ORIGINAL_REPLICAS.to_string(),
            original.to_string(),
        );
}

/// Reads back the annotation `annotate_original_replicas` wrote. Missing or
/// unparseable annotations default to `1` (§4.7 cutover/failback note).
pub fn original_replicas(meta: &ObjectMeta) -> i32 {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(dr_syncer_common::annotations::ORIGINAL_REPLICAS))
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

/// Applies a `from -> to` access-mode remapping in place, passing unmapped
/// modes through unchanged (§4.6 step 4, mirrors
/// `pvc::coordinator::remap_storage_class`'s fallback behavior).
pub fn remap_access_modes(modes: &mut [String], mappings: &[NameMapping]) {
    for mode in modes.iter_mut() {
        if let Some(mapping) = mappings.iter().find(|m| &m.from == mode) {
            *mode = mapping.to.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with_annotations(pairs: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            annotations: Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            resource_version: Some("123".to_string()),
            uid: Some("abc".to_string()),
            generation: Some(4),
            owner_references: Some(vec![]),
            finalizers: Some(vec!["foo".to_string()]),
            ..Default::default()
        }
    }

    #[test]
    fn strip_clears_server_set_fields() {
        let mut meta = meta_with_annotations(&[("keep", "me")]);
        strip_server_fields(&mut meta);
        assert!(meta.resource_version.is_none());
        assert!(meta.uid.is_none());
        assert!(meta.generation.is_none());
        assert!(meta.owner_references.is_none());
        assert!(meta.finalizers.is_none());
        assert_eq!(
            meta.annotations.unwrap().get("keep").map(String::as_str),
            Some("me")
        );
    }

    #[test]
    fn strip_removes_last_applied_annotation() {
        let mut meta = meta_with_annotations(&[(LAST_APPLIED_ANNOTATION, "{...}"), ("keep", "me")]);
        strip_server_fields(&mut meta);
        let annotations = meta.annotations.unwrap();
        assert!(!annotations.contains_key(LAST_APPLIED_ANNOTATION));
        assert!(annotations.contains_key("keep"));
    }

    #[test]
    fn original_replicas_round_trips() {
        let mut meta = ObjectMeta::default();
        annotate_original_replicas(&mut meta, 5);
        assert_eq!(original_replicas(&meta), 5);
    }

    #[test]
    fn missing_annotation_defaults_to_one() {
        let meta = ObjectMeta::default();
        assert_eq!(original_replicas(&meta), 1);
    }

    #[test]
    fn access_mode_remap_passes_through_unmapped() {
        let mappings = vec![NameMapping {
            from: "ReadWriteOnce".to_string(),
            to: "ReadWriteOncePod".to_string(),
        }];
        let mut modes = vec!["ReadWriteOnce".to_string(), "ReadWriteMany".to_string()];
        remap_access_modes(&mut modes, &mappings);
        assert_eq!(modes, vec!["ReadWriteOncePod".to_string(), "ReadWriteMany".to_string()]);
    }
}
