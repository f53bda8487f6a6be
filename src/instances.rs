use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::engine::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Idle,
    Loading { expected: usize, loaded: usize },
    Ready { count: usize },
}

/// Tracks the asynchronous preparation of per-instance output. Only one
/// load may be in flight at a time.
#[derive(Debug)]
pub struct InstanceBank {
    state: Mutex<LoadState>,
}

impl Default for InstanceBank {
    fn default() -> Self {
        Self {
            state: Mutex::new(LoadState::Idle),
        }
    }
}

impl InstanceBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_load(&self, expected: usize) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if matches!(*state, LoadState::Loading { .. }) {
            return Err(EngineError::AlreadyLoading);
        }
        *state = if expected == 0 {
            LoadState::Ready { count: 0 }
        } else {
            LoadState::Loading {
                expected,
                loaded: 0,
            }
        };
        debug!(expected, "instance load started");
        Ok(())
    }

    /// Record one finished instance. Returns true once all are loaded.
    pub fn instance_loaded(&self) -> Result<bool, EngineError> {
        let mut state = self.state.lock();
        match *state {
            LoadState::Loading { expected, loaded } => {
                let loaded = loaded + 1;
                if loaded >= expected {
                    *state = LoadState::Ready { count: expected };
                    debug!(count = expected, "all instances loaded");
                    Ok(true)
                } else {
                    *state = LoadState::Loading { expected, loaded };
                    Ok(false)
                }
            }
            _ => Err(EngineError::NotLoading),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), LoadState::Ready { .. })
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.state.lock(), LoadState::Loading { .. })
    }

    /// Number of instances available, 0 unless ready.
    pub fn ready_count(&self) -> usize {
        match *self.state.lock() {
            LoadState::Ready { count } => count,
            _ => 0,
        }
    }

    /// Abandon the current load.
    pub fn fail(&self) {
        let mut state = self.state.lock();
        if let LoadState::Loading { expected, loaded } = *state {
            warn!(expected, loaded, "instance load failed");
        }
        *state = LoadState::Idle;
    }
}
