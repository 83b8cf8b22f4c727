use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::BatchError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GateState {
    Open,
    Paused,
    Cancelled,
}

/// Suspension token shared by a walker and whoever controls it.
///
/// A pause only takes effect at the walker's next [`PauseHandle::checkpoint`], which runs
/// between pages. `resume` and `cancel` settle a pending pause and are no-ops otherwise;
/// a second `pause` while one is pending keeps the single pending suspension.
#[derive(Clone, Debug)]
pub struct PauseHandle {
    run_id: RunId,
    state: Arc<watch::Sender<GateState>>,
}

impl PauseHandle {
    pub fn new(run_id: RunId) -> Self {
        let (state, _) = watch::channel(GateState::Open);
        Self {
            run_id,
            state: Arc::new(state),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn pause(&self) -> bool {
        self.transition(GateState::Open, GateState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(GateState::Paused, GateState::Open)
    }

    pub fn cancel(&self) -> bool {
        self.transition(GateState::Paused, GateState::Cancelled)
    }

    pub fn is_paused(&self) -> bool {
        *self.state.borrow() == GateState::Paused
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow() == GateState::Cancelled
    }

    /// Waits out a pending pause. Fails with [`BatchError::Cancelled`] once cancelled.
    pub async fn checkpoint(&self) -> Result<(), BatchError> {
        let mut receiver = self.state.subscribe();
        loop {
            let state = *receiver.borrow_and_update();
            match state {
                GateState::Open => return Ok(()),
                GateState::Cancelled => {
                    return Err(BatchError::Cancelled {
                        run_id: self.run_id.clone(),
                    });
                }
                GateState::Paused => {
                    debug!("run_id={} walker suspended at checkpoint", self.run_id);
                    if receiver.changed().await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn transition(&self, from: GateState, to: GateState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

/// Run-id keyed registry of pause handles for call sites that only know the id.
#[derive(Clone, Default)]
pub struct PauseGate {
    handles: Arc<Mutex<HashMap<RunId, PauseHandle>>>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh handle for `run_id`. A handle already registered under the same id
    /// is force-resumed and replaced.
    pub fn register(&self, run_id: RunId) -> PauseHandle {
        let handle = PauseHandle::new(run_id.clone());
        let previous = self
            .handles
            .lock()
            .expect("pause gate lock poisoned")
            .insert(run_id, handle.clone());
        if let Some(previous) = previous {
            previous.resume();
        }
        handle
    }

    pub fn handle(&self, run_id: &RunId) -> Option<PauseHandle> {
        self.handles
            .lock()
            .expect("pause gate lock poisoned")
            .get(run_id)
            .cloned()
    }

    pub fn pause(&self, run_id: &RunId) -> bool {
        let paused = self
            .handle(run_id)
            .map(|handle| handle.pause())
            .unwrap_or(false);
        if paused {
            info!("run_id={} pause requested", run_id);
        }
        paused
    }

    pub fn resume(&self, run_id: &RunId) -> bool {
        let resumed = self
            .handle(run_id)
            .map(|handle| handle.resume())
            .unwrap_or(false);
        if resumed {
            info!("run_id={} resume requested", run_id);
        }
        resumed
    }

    pub fn cancel(&self, run_id: &RunId) -> bool {
        let cancelled = self
            .handle(run_id)
            .map(|handle| handle.cancel())
            .unwrap_or(false);
        if cancelled {
            info!("run_id={} cancel requested", run_id);
        }
        cancelled
    }

    pub fn is_paused(&self, run_id: &RunId) -> bool {
        self.handle(run_id)
            .map(|handle| handle.is_paused())
            .unwrap_or(false)
    }

    pub fn remove(&self, run_id: &RunId) -> Option<PauseHandle> {
        self.handles
            .lock()
            .expect("pause gate lock poisoned")
            .remove(run_id)
    }

    /// Force-resumes every pending pause and clears the registry. Returns how many runs
    /// were waiting.
    pub fn release_all(&self) -> usize {
        let drained = {
            let mut guard = self.handles.lock().expect("pause gate lock poisoned");
            guard.drain().map(|(_, handle)| handle).collect::<Vec<_>>()
        };
        let released = drained.iter().filter(|handle| handle.resume()).count();
        if released > 0 {
            info!("force-resumed {} paused runs on release", released);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.handles.lock().expect("pause gate lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn scope(&self) -> GateScope {
        GateScope {
            gate: self.clone(),
            owned: Vec::new(),
        }
    }
}

/// Registrations made on behalf of one owner. Dropping the scope force-resumes the owner's
/// pending pauses and removes its registrations, so no walk is left waiting forever.
pub struct GateScope {
    gate: PauseGate,
    owned: Vec<RunId>,
}

impl GateScope {
    /// Registers `run_id` for this owner. Ids whose registration was already removed from the
    /// gate are forgotten first, so a long-lived owner only tracks live runs.
    pub fn register(&mut self, run_id: RunId) -> PauseHandle {
        self.owned.retain(|owned| self.gate.handle(owned).is_some());
        let handle = self.gate.register(run_id.clone());
        if !self.owned.contains(&run_id) {
            self.owned.push(run_id);
        }
        handle
    }

    pub fn owns(&self, run_id: &RunId) -> bool {
        self.owned.contains(run_id)
    }

    pub fn owned_len(&self) -> usize {
        self.owned.len()
    }

    pub fn release(mut self) -> usize {
        self.release_owned()
    }

    fn release_owned(&mut self) -> usize {
        let mut released = 0;
        for run_id in self.owned.drain(..) {
            if let Some(handle) = self.gate.remove(&run_id)
                && handle.resume()
            {
                released += 1;
            }
        }
        released
    }
}

impl Drop for GateScope {
    fn drop(&mut self) {
        self.release_owned();
    }
}
