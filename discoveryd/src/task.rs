use std::future::Future;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Holds at most one running background loop for a component with
/// `start`/`stop` semantics.
#[derive(Default)]
pub struct TaskSlot {
    inner: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl TaskSlot {
    pub fn is_running(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Spawn the loop built by `make` unless one is already running.
    /// Returns false if the slot was occupied.
    pub fn start<F, Fut>(&self, make: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(make(cancel.clone()));
        *inner = Some((cancel, handle));
        true
    }

    /// Cancel the loop and wait for it to wind down. Work already in flight
    /// finishes on its own time bound. Safe to call when stopped.
    pub async fn stop(&self) {
        let running = self.inner.lock().take();
        if let Some((cancel, handle)) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!("Background task ended abnormally: {}", e);
            }
        }
    }
}
