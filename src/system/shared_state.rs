//! State shared between the session handle and the tracking loop thread.
//!
//! Only flags and a read-only status snapshot cross threads; the tracking
//! state itself stays owned by the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::tracking::state::SlotPhase;

/// Status of one target slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub target_index: usize,
    pub phase: SlotPhase,
    pub track_count: usize,
    pub miss_count: usize,
}

/// Snapshot published after every processed frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub frames_processed: u64,
    pub slots: Vec<SlotStatus>,
}

pub struct SharedState {
    status: RwLock<SessionStatus>,
    interested_target: RwLock<Option<usize>>,
    /// Checked at the top of every loop iteration.
    stop_requested: AtomicBool,
    running: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn publish(&self, status: SessionStatus) {
        *self.status.write() = status;
    }

    pub fn interested_target(&self) -> Option<usize> {
        *self.interested_target.read()
    }

    pub fn set_interested_target(&self, target: Option<usize>) {
        *self.interested_target.write() = target;
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        if running {
            self.stop_requested.store(false, Ordering::SeqCst);
        }
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            status: RwLock::new(SessionStatus::default()),
            interested_target: RwLock::new(None),
            stop_requested: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }
}
