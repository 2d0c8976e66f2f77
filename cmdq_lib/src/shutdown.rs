use std::io;

use tokio::{
    signal::unix::{signal, SignalKind},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::slot::ProcessSlot;

/// Stops a running [`QueueProcessor`](crate::QueueProcessor) from outside.
#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    slot: ProcessSlot,
}

impl ShutdownHandle {
    pub(crate) fn new(token: CancellationToken, slot: ProcessSlot) -> Self {
        Self { token, slot }
    }

    /// No further job is claimed and the job in flight, if any, is killed.
    /// Calling it more than once is harmless.
    pub fn stop(&self) {
        self.token.cancel();
        self.slot.terminate();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// The first signal received stops the processor behind `handle`.
pub fn install_signal_handler(handle: ShutdownHandle) -> io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
            }
            _ = handle.stopped() => return,
        }

        handle.stop();
    }))
}

#[cfg(test)]
mod test {
    use tokio_util::sync::CancellationToken;

    use super::ShutdownHandle;
    use crate::slot::ProcessSlot;

    #[test]
    fn test_stop_cancels_and_closes_slot() {
        let slot = ProcessSlot::new();
        let handle = ShutdownHandle::new(CancellationToken::new(), slot.clone());
        assert!(!handle.is_stopped());
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        assert!(slot.is_closed());
    }
}
