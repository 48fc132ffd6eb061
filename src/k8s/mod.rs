mod cache;
mod watch;

pub use self::{
    cache::ObjectCache,
    watch::{Event, Watch},
};
pub use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, Namespace, Node, Service};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
pub use kube::api::ResourceExt;

/// Builds the `"namespace/name"` cache key for an object, or just `"name"`
/// for cluster-scoped resources, matching the API server's own notion of
/// object identity.
pub fn object_key<T: kube::Resource>(obj: &T) -> String {
    match obj.namespace() {
        Some(ref ns) if !ns.is_empty() => format!("{}/{}", ns, obj.name()),
        _ => obj.name(),
    }
}
