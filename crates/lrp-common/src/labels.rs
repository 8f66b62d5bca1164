//! Label, annotation and naming vocabulary shared by every component
//!
//! Labels are the only index the cluster gives us: every read path selects
//! by `{guid, version}` and never by derived name. Annotations are the
//! persisted-state surface read back by `Get`/`List`.

/// Label holding the LRP GUID
pub const LABEL_GUID: &str = "guid";

/// Label holding the LRP version
pub const LABEL_VERSION: &str = "version";

/// Label marking what kind of platform workload owns the pod
pub const LABEL_SOURCE_TYPE: &str = "source_type";

/// Label holding the configured rootfs version, when one is set
pub const LABEL_ROOTFS_VERSION: &str = "rootfs-version";

/// `source_type` value for long-running application processes
pub const SOURCE_TYPE_APP: &str = "APP";

/// Prefix for all annotations written by the bridge
const ANNOTATION_PREFIX: &str = "lrp.platform.io";

/// The raw desire request, kept verbatim for audit and replay
pub const ANNOTATION_ORIGINAL_REQUEST: &str = "lrp.platform.io/original-request";
/// Process GUID (also stamped on the pod template)
pub const ANNOTATION_PROCESS_GUID: &str = "lrp.platform.io/process-guid";
/// Application id (also stamped on the pod template)
pub const ANNOTATION_APP_ID: &str = "lrp.platform.io/app-id";
/// Human-readable application name
pub const ANNOTATION_APP_NAME: &str = "lrp.platform.io/app-name";
/// Application version
pub const ANNOTATION_VERSION: &str = "lrp.platform.io/version";
/// Space name
pub const ANNOTATION_SPACE_NAME: &str = "lrp.platform.io/space-name";
/// Space GUID
pub const ANNOTATION_SPACE_GUID: &str = "lrp.platform.io/space-guid";
/// Org name
pub const ANNOTATION_ORG_NAME: &str = "lrp.platform.io/org-name";
/// Org GUID
pub const ANNOTATION_ORG_GUID: &str = "lrp.platform.io/org-guid";
/// Declared routes payload, opaque to the bridge
pub const ANNOTATION_REGISTERED_ROUTES: &str = "lrp.platform.io/registered-routes";
/// Last-updated marker supplied by the caller
pub const ANNOTATION_LAST_UPDATED: &str = "lrp.platform.io/last-updated";

/// Name of the application container in every LRP pod
pub const APP_CONTAINER_NAME: &str = "app";

/// Suffix of the per-workload private registry credential secret
const REGISTRY_CREDENTIALS_SUFFIX: &str = "registry-credentials";

/// Environment variable carrying the pod name
pub const ENV_POD_NAME: &str = "POD_NAME";
/// Environment variable carrying the externally addressable instance IP
pub const ENV_INSTANCE_IP: &str = "CF_INSTANCE_IP";
/// Environment variable carrying the internal instance IP
pub const ENV_INSTANCE_INTERNAL_IP: &str = "CF_INSTANCE_INTERNAL_IP";
/// Environment variable carrying the ordinal index, set by the admission hook
pub const ENV_INSTANCE_INDEX: &str = "CF_INSTANCE_INDEX";

/// Name of the pull-credential secret created for a workload
pub fn registry_secret_name(workload_name: &str) -> String {
    format!("{}-{}", workload_name, REGISTRY_CREDENTIALS_SUFFIX)
}

/// Name of the ordinal pod `index` of a workload
pub fn pod_name(workload_name: &str, index: u32) -> String {
    format!("{}-{}", workload_name, index)
}

/// Parse the ordinal index from the trailing `-N` segment of a pod name.
///
/// Returns `None` for names without a purely numeric trailing segment
/// (one-off task pods, for instance).
pub fn pod_ordinal(pod_name: &str) -> Option<u32> {
    let (_, suffix) = pod_name.rsplit_once('-')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// True when the annotation key belongs to the bridge
pub fn is_bridge_annotation(key: &str) -> bool {
    key.split_once('/')
        .is_some_and(|(prefix, _)| prefix == ANNOTATION_PREFIX)
}
