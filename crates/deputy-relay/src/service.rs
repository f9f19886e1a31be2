//! Runs one relay loop per stream and stops them together.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::relay::RelayLoop;

/// A set of relay loops sharing one cancellation token.
pub struct RelayService {
    loops: Vec<RelayLoop>,
    cancel: CancellationToken,
}

impl RelayService {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { loops: Vec::new(), cancel }
    }

    /// Token the loops of this service should be built with.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn add(&mut self, relay: RelayLoop) {
        self.loops.push(relay);
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Spawn every loop as its own task.
    pub fn start(self) -> RunningService {
        let handles = self
            .loops
            .into_iter()
            .map(|relay| {
                let stream_id = relay.stream_id().to_string();
                let handle = tokio::spawn(async move { relay.run().await });
                (stream_id, handle)
            })
            .collect::<Vec<_>>();
        info!(streams = handles.len(), "relay service started");
        RunningService { handles, cancel: self.cancel }
    }
}

/// Handle to the spawned loops.
pub struct RunningService {
    handles: Vec<(String, JoinHandle<()>)>,
    cancel: CancellationToken,
}

impl RunningService {
    /// Wait for every loop to exit.
    pub async fn join(self) {
        for (stream_id, handle) in self.handles {
            if let Err(e) = handle.await {
                error!(%stream_id, error = %e, "relay task ended abnormally");
            }
        }
        info!("relay service stopped");
    }

    /// Cancel every loop and wait for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.join().await;
    }
}
