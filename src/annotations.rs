//! Status-annotation writes back onto config maps.

use crate::k8s::ConfigMap;
use anyhow::Result;
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;

/// Writes object annotations. The controller treats annotation updates as
/// best-effort status reporting, so implementations only need to surface the
/// error; callers log and move on.
#[async_trait]
pub trait AnnotationWriter: Send + Sync {
    async fn set_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;

    async fn remove_annotation(&self, namespace: &str, name: &str, key: &str) -> Result<()>;
}

/// Annotation writes against the cluster API, as JSON merge patches so only
/// the one key is touched (a null value removes it).
pub struct ApiAnnotationWriter {
    client: kube::Client,
}

// === impl ApiAnnotationWriter ===

impl ApiAnnotationWriter {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl AnnotationWriter for ApiAnnotationWriter {
    async fn set_annotation(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        self.config_maps(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn remove_annotation(&self, namespace: &str, name: &str, key: &str) -> Result<()> {
        let patch = json!({ "metadata": { "annotations": { key: serde_json::Value::Null } } });
        self.config_maps(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) enum Op {
        Set {
            namespace: String,
            name: String,
            key: String,
            value: String,
        },
        Remove {
            namespace: String,
            name: String,
            key: String,
        },
    }

    /// Records annotation operations for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingAnnotationWriter {
        ops: Mutex<Vec<Op>>,
    }

    impl RecordingAnnotationWriter {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn ops(&self) -> Vec<Op> {
            self.ops.lock().clone()
        }
    }

    #[async_trait]
    impl AnnotationWriter for RecordingAnnotationWriter {
        async fn set_annotation(
            &self,
            namespace: &str,
            name: &str,
            key: &str,
            value: &str,
        ) -> Result<()> {
            self.ops.lock().push(Op::Set {
                namespace: namespace.to_string(),
                name: name.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            });
            Ok(())
        }

        async fn remove_annotation(&self, namespace: &str, name: &str, key: &str) -> Result<()> {
            self.ops.lock().push(Op::Remove {
                namespace: namespace.to_string(),
                name: name.to_string(),
                key: key.to_string(),
            });
            Ok(())
        }
    }
}
