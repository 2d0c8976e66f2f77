use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::info;

#[derive(Default)]
struct SlotState {
    kill_tx: Option<oneshot::Sender<()>>,
    // set once a stop was requested, every later arm() starts out killed
    closed: bool,
}

/// Single slot holding the kill switch of the job that is currently running.
///
/// Only the executor arms it, only the shutdown path fires it.
#[derive(Clone, Default)]
pub struct ProcessSlot {
    state: Arc<Mutex<SlotState>>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new running process. The slot is emptied again when the
    /// returned guard is dropped.
    pub fn arm(&self) -> (SlotGuard, oneshot::Receiver<()>) {
        let (kill_tx, kill_rx) = oneshot::channel();
        let mut state = self.lock();
        if state.closed {
            let _ = kill_tx.send(());
        } else {
            state.kill_tx = Some(kill_tx);
        }
        (SlotGuard { slot: self.clone() }, kill_rx)
    }

    /// Kills the running process, if any, and refuses to run further ones.
    pub fn terminate(&self) {
        let mut state = self.lock();
        state.closed = true;
        if let Some(kill_tx) = state.kill_tx.take() {
            info!("terminating running job process");
            if kill_tx.send(()).is_err() {
                info!("kill signal receiver dropped, process already finished");
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock().kill_tx.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        // the state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct SlotGuard {
    slot: ProcessSlot,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.lock().kill_tx = None;
    }
}
