use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::H5Error;
use crate::values::DatasetValues;

type SlotResult = Result<Arc<DatasetValues>, H5Error>;

struct Slot {
    state: Mutex<Option<SlotResult>>,
    ready: Condvar,
}

/// A fulfillable mapping from requested dataset path to its eventual
/// result. Each key has its own readiness latch: `get` blocks until that
/// dataset's worker publishes, independent of its siblings.
///
/// Results are shared (`Arc`), so once a `get` succeeds every later `get`
/// returns the identical value.
#[derive(Clone)]
pub struct Promise {
    order: Arc<Vec<String>>,
    slots: Arc<HashMap<String, Slot>>,
}

impl Promise {
    pub(crate) fn new(paths: &[String]) -> Self {
        let mut slots = HashMap::with_capacity(paths.len());
        for path in paths {
            slots.insert(
                path.clone(),
                Slot {
                    state: Mutex::new(None),
                    ready: Condvar::new(),
                },
            );
        }
        Self {
            order: Arc::new(paths.to_vec()),
            slots: Arc::new(slots),
        }
    }

    /// Publish a worker's result. The first write wins; later writes for
    /// the same key are ignored so a published value never changes.
    pub(crate) fn fulfill(&self, path: &str, result: SlotResult) {
        if let Some(slot) = self.slots.get(path) {
            let mut state = slot.state.lock();
            if state.is_none() {
                *state = Some(result);
                slot.ready.notify_all();
            }
        }
    }

    /// Block until the dataset's result is available.
    pub fn get(&self, path: &str) -> Result<Arc<DatasetValues>, H5Error> {
        let slot = self
            .slots
            .get(path)
            .ok_or_else(|| H5Error::MissingDataset(path.to_string()))?;
        let mut state = slot.state.lock();
        loop {
            if let Some(result) = &*state {
                return result.clone();
            }
            slot.ready.wait(&mut state);
        }
    }

    /// Block for at most `timeout`; a still-pending result is a
    /// [`H5Error::Timeout`].
    pub fn get_timeout(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<Arc<DatasetValues>, H5Error> {
        let slot = self
            .slots
            .get(path)
            .ok_or_else(|| H5Error::MissingDataset(path.to_string()))?;
        let deadline = Instant::now() + timeout;
        let mut state = slot.state.lock();
        loop {
            if let Some(result) = &*state {
                return result.clone();
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(H5Error::Timeout(path.to_string()));
            }
            if slot
                .ready
                .wait_for(&mut state, deadline - now)
                .timed_out()
                && state.is_none()
            {
                return Err(H5Error::Timeout(path.to_string()));
            }
        }
    }

    /// Whether the dataset's result has been published yet.
    pub fn is_ready(&self, path: &str) -> bool {
        self.slots
            .get(path)
            .is_some_and(|slot| slot.state.lock().is_some())
    }

    /// The requested paths, in request order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Block until every dataset has a result.
    pub fn wait_all(&self) {
        for path in self.order.iter() {
            let _ = self.get(path);
        }
    }
}
