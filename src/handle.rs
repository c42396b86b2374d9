//! Opaque handle ids over loaded models.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{EngineError, Result};
use crate::loader::LoadedModel;
use crate::registry::ModelFamily;

/// Ids start at 1 and are never reused within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct HandleId(u64);

impl HandleId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for HandleId {
    fn from(id: u64) -> Self {
        HandleId(id)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Ready,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleInfo {
    pub id: HandleId,
    pub family: ModelFamily,
    pub code: String,
    pub dimension: Option<usize>,
}

pub(crate) struct Slot {
    info: HandleInfo,
    model: Mutex<LoadedModel>,
}

impl Slot {
    pub(crate) fn info(&self) -> &HandleInfo {
        &self.info
    }

    /// Exclusive access to the model for one call. Calls on the same handle
    /// serialize here; a panic in an earlier call leaves the model usable
    /// since models keep no state between calls.
    pub(crate) fn with_model<R>(&self, f: impl FnOnce(&mut LoadedModel) -> R) -> R {
        let mut model = lock(&self.model);
        f(&mut model)
    }
}

struct Inner {
    next_id: u64,
    live: HashMap<HandleId, Arc<Slot>>,
}

pub(crate) struct HandleTable {
    inner: Mutex<Inner>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                live: HashMap::new(),
            }),
        }
    }
}

impl HandleTable {
    /// Register a fully loaded model and hand out its id.
    pub(crate) fn insert(&self, model: LoadedModel) -> HandleInfo {
        let spec = model.spec();
        let mut inner = lock(&self.inner);
        let id = HandleId(inner.next_id);
        inner.next_id += 1;
        let info = HandleInfo {
            id,
            family: spec.family,
            code: spec.code.to_string(),
            dimension: spec.dimension,
        };
        inner.live.insert(
            id,
            Arc::new(Slot {
                info: info.clone(),
                model: Mutex::new(model),
            }),
        );
        info
    }

    pub(crate) fn get(&self, id: HandleId) -> Result<Arc<Slot>> {
        let inner = lock(&self.inner);
        match inner.live.get(&id) {
            Some(slot) => Ok(Arc::clone(slot)),
            None => Err(missing(&inner, id)),
        }
    }

    /// Returns whether the id was live.
    pub(crate) fn remove(&self, id: HandleId) -> bool {
        let removed = lock(&self.inner).live.remove(&id);
        // The model drops here, outside the table lock.
        removed.is_some()
    }

    pub(crate) fn state(&self, id: HandleId) -> Result<HandleState> {
        let inner = lock(&self.inner);
        if inner.live.contains_key(&id) {
            Ok(HandleState::Ready)
        } else if issued(&inner, id) {
            Ok(HandleState::Closed)
        } else {
            Err(missing(&inner, id))
        }
    }

    pub(crate) fn list(&self) -> Vec<HandleInfo> {
        let inner = lock(&self.inner);
        let mut infos: Vec<HandleInfo> = inner.live.values().map(|s| s.info.clone()).collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.inner).live.len()
    }

    /// Remove every live handle, returning how many there were.
    pub(crate) fn drain(&self) -> usize {
        let slots: Vec<Arc<Slot>> = lock(&self.inner).live.drain().map(|(_, s)| s).collect();
        // Models drop outside the table lock.
        let n = slots.len();
        drop(slots);
        n
    }
}

fn issued(inner: &Inner, id: HandleId) -> bool {
    id.0 > 0 && id.0 < inner.next_id
}

fn missing(inner: &Inner, id: HandleId) -> EngineError {
    if issued(inner, id) {
        EngineError::HandleClosed { id: id.0 }
    } else {
        EngineError::invalid_argument(format!("unknown handle {id}"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
