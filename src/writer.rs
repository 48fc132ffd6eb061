//! The hand-off to the agent that programs the load balancer.

use anyhow::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};
use tokio::sync::oneshot;
use tracing::debug;

/// Signals for one in-flight section write. The writer fires exactly one of
/// the two; the other side simply never resolves.
pub struct SectionHandle {
    pub done: oneshot::Receiver<()>,
    pub error: oneshot::Receiver<anyhow::Error>,
}

/// Accepts named config sections for delivery to the load-balancer agent.
///
/// `send_section` returns immediately with a handle; the caller bounds its
/// wait on the completion signals itself.
pub trait ConfigWriter: Send + Sync {
    fn send_section(&self, name: &str, value: Value) -> Result<SectionHandle>;
}

/// Resolves a completion signal, treating a dropped sender as "never fires"
/// so a `select!` over done/error/timeout sees at most one outcome.
pub(crate) async fn recv_or_pending<T>(rx: oneshot::Receiver<T>) -> T {
    match rx.await {
        Ok(value) => value,
        Err(_) => futures::future::pending().await,
    }
}

/// Writes the merged section document to a JSON file, replacing the whole
/// file on every send. This is the deliverable the out-of-process agent
/// tails; the transport beyond the file is not this controller's concern.
pub struct JsonFileWriter {
    path: PathBuf,
    sections: Arc<Mutex<BTreeMap<String, Value>>>,
}

// === impl JsonFileWriter ===

impl JsonFileWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            sections: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

impl ConfigWriter for JsonFileWriter {
    fn send_section(&self, name: &str, value: Value) -> Result<SectionHandle> {
        let doc = {
            let mut sections = self.sections.lock();
            sections.insert(name.to_string(), value);
            Value::Object(sections.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        };
        let bytes = serde_json::to_vec_pretty(&doc)?;

        let (done_tx, done) = oneshot::channel();
        let (error_tx, error) = oneshot::channel();
        let path = self.path.clone();
        tokio::spawn(async move {
            match tokio::fs::write(&path, bytes).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Wrote config document");
                    let _ = done_tx.send(());
                }
                Err(e) => {
                    let _ = error_tx.send(e.into());
                }
            }
        });
        Ok(SectionHandle { done, error })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;

    /// Records every section sent and, unless told otherwise, completes each
    /// write immediately.
    pub(crate) struct MockWriter {
        sections: Mutex<Vec<(String, Value)>>,
        respond: bool,
        // Error senders are parked here so the error signal stays pending
        // rather than reading as a closed channel.
        pending: Mutex<Vec<oneshot::Sender<anyhow::Error>>>,
    }

    impl MockWriter {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self {
                sections: Mutex::new(Vec::new()),
                respond: true,
                pending: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn silent() -> Arc<Self> {
            Arc::new(Self {
                sections: Mutex::new(Vec::new()),
                respond: false,
                pending: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn sent(&self) -> Vec<(String, Value)> {
            self.sections.lock().clone()
        }

        pub(crate) fn sent_count(&self) -> usize {
            self.sections.lock().len()
        }

        pub(crate) fn last_section(&self) -> Option<(String, Value)> {
            self.sections.lock().last().cloned()
        }
    }

    impl ConfigWriter for MockWriter {
        fn send_section(&self, name: &str, value: Value) -> Result<SectionHandle> {
            self.sections.lock().push((name.to_string(), value));
            let (done_tx, done) = oneshot::channel();
            let (error_tx, error) = oneshot::channel();
            if self.respond {
                let _ = done_tx.send(());
            }
            self.pending.lock().push(error_tx);
            Ok(SectionHandle { done, error })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn file_writer_merges_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let writer = JsonFileWriter::new(path.clone());

        let handle = writer
            .send_section("services", json!([{"name": "vs-1"}]))
            .unwrap();
        recv_or_pending(handle.done).await;

        let handle = writer.send_section("global", json!({"verify": true})).unwrap();
        recv_or_pending(handle.done).await;

        let doc: Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc["services"][0]["name"], "vs-1");
        assert_eq!(doc["global"]["verify"], true);
    }

    #[tokio::test]
    async fn mock_writer_records_sections() {
        let writer = mock::MockWriter::new();
        let handle = writer.send_section("services", json!([])).unwrap();
        recv_or_pending(handle.done).await;
        assert_eq!(writer.sent_count(), 1);
        assert_eq!(writer.last_section().unwrap().0, "services");
    }
}
