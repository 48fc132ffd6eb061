use futures::prelude::*;
use kube::api::Resource;
use serde::de::DeserializeOwned;
use std::{fmt, hash::Hash, pin::Pin};
use tokio::{sync::watch, time};
use tracing::info;

pub use kube_runtime::watcher::{Event, Result};

/// A boxed list/watch stream for one resource of an informer set.
///
/// Watch errors are transient by construction (the watcher re-lists after a
/// disconnect), so `recv` absorbs them with a short pause instead of
/// surfacing them. Cancellation comes from the informer set's shared stop
/// signal, which `recv` observes directly.
pub struct Watch<T>(Pin<Box<dyn Stream<Item = Result<Event<T>>> + Send + 'static>>);

// === impl Watch ===

impl<T, W> From<W> for Watch<T>
where
    W: Stream<Item = Result<Event<T>>> + Send + 'static,
{
    fn from(watch: W) -> Self {
        Watch(watch.boxed())
    }
}

impl<T> Watch<T>
where
    T: Resource + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
    T::DynamicType: Clone + Eq + Hash + Default,
{
    /// Waits for the next event. Resolves to `None` once the stop signal
    /// fires; the underlying stream never terminates on its own.
    pub async fn recv(&mut self, stop: &mut watch::Receiver<bool>) -> Option<Event<T>> {
        if *stop.borrow() {
            return None;
        }
        loop {
            let item = tokio::select! {
                _ = stop.changed() => return None,
                item = self.0.next() => item,
            };
            match item.expect("watch stream must not terminate") {
                Ok(ev) => return Some(ev),
                Err(error) => {
                    info!(%error, "Watch disconnected");
                    time::sleep(time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}
