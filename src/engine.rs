//! Handle-based facade over the loader and the typed models.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::ModelCache;
use crate::config::EngineConfig;
use crate::encode::{Embedding, RerankResult, SparseEmbedding};
use crate::error::{EngineError, Result};
use crate::handle::{HandleId, HandleInfo, HandleState, HandleTable};
use crate::loader::{LoadedModel, ModelLoader};
use crate::metrics::MetricsRegistry;
use crate::registry::{self, ModelDescriptor, ModelFamily};

/// Owns every loaded model. Safe to share across threads; calls on distinct
/// handles run in parallel, calls on one handle serialize.
pub struct Engine {
    loader: ModelLoader,
    handles: HandleTable,
    metrics: Arc<MetricsRegistry>,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        Self::with_loader(ModelLoader::from_config(config)?)
    }

    /// Engine over a custom loader, e.g. one with a different backend factory.
    pub fn with_loader(loader: ModelLoader) -> Result<Self> {
        let metrics = Arc::new(
            MetricsRegistry::new()
                .map_err(|e| EngineError::inference(format!("failed to register metrics: {e}")))?,
        );
        Ok(Self {
            loader: loader.with_metrics(metrics.clone()),
            handles: HandleTable::default(),
            metrics,
        })
    }

    pub fn list_models(&self, family: ModelFamily) -> Vec<ModelDescriptor> {
        registry::list_models(family)
    }

    /// Load a model and return a handle to it. Nothing is registered when the
    /// load fails.
    pub fn create_handle(&self, family: ModelFamily, code: Option<&str>) -> Result<HandleId> {
        let model = self.observe(self.loader.load(family, code))?;
        let info = self.handles.insert(model);
        self.metrics.set_live_handles(self.handles.len());
        info!(id = %info.id, family = family.slug(), code = %info.code, "Handle created");
        Ok(info.id)
    }

    /// Dense embeddings. Text handles take strings, image handles take file paths.
    pub fn embed<S: AsRef<str>>(
        &self,
        id: HandleId,
        items: &[S],
        batch_size: Option<usize>,
    ) -> Result<Vec<Embedding>> {
        self.call(id, items.len(), |model| match model {
            LoadedModel::Text(m) => m.embed(items, batch_size),
            LoadedModel::Image(m) => {
                let paths: Vec<&Path> = items.iter().map(|s| Path::new(s.as_ref())).collect();
                m.embed(&paths, batch_size)
            }
            other => Err(wrong_family(id, other, "embed")),
        })
    }

    pub fn embed_sparse<S: AsRef<str>>(
        &self,
        id: HandleId,
        texts: &[S],
        batch_size: Option<usize>,
    ) -> Result<Vec<SparseEmbedding>> {
        self.call(id, texts.len(), |model| match model {
            LoadedModel::Sparse(m) => m.embed(texts, batch_size),
            other => Err(wrong_family(id, other, "embed_sparse")),
        })
    }

    pub fn rerank<S: AsRef<str>>(
        &self,
        id: HandleId,
        query: &str,
        documents: &[S],
        return_documents: bool,
        batch_size: Option<usize>,
    ) -> Result<Vec<RerankResult>> {
        self.call(id, documents.len(), |model| match model {
            LoadedModel::Rerank(m) => m.rerank(query, documents, return_documents, batch_size),
            other => Err(wrong_family(id, other, "rerank")),
        })
    }

    /// Release a handle. Closing an already closed handle is a no-op; a call
    /// in flight on the handle finishes before its model is dropped.
    pub fn close_handle(&self, id: HandleId) -> Result<()> {
        if self.handles.remove(id) {
            self.metrics.set_live_handles(self.handles.len());
            info!(id = %id, "Handle closed");
            return Ok(());
        }
        // Distinguish "already closed" from "never issued".
        match self.handles.state(id) {
            Ok(_) => Ok(()),
            Err(e) => self.observe(Err(e)),
        }
    }

    pub fn handle_state(&self, id: HandleId) -> Result<HandleState> {
        self.handles.state(id)
    }

    pub fn handle_info(&self, id: HandleId) -> Result<HandleInfo> {
        let slot = self.handles.get(id)?;
        Ok(slot.info().clone())
    }

    pub fn live_handles(&self) -> Vec<HandleInfo> {
        self.handles.list()
    }

    /// Close every live handle. Returns how many were closed.
    pub fn shutdown(&self) -> usize {
        let closed = self.handles.drain();
        self.metrics.set_live_handles(0);
        if closed > 0 {
            info!(closed, "Engine shut down");
        }
        closed
    }

    /// A handle that closes itself when dropped.
    pub fn scoped(&self, family: ModelFamily, code: Option<&str>) -> Result<ScopedHandle<'_>> {
        let id = self.create_handle(family, code)?;
        Ok(ScopedHandle { engine: self, id })
    }

    pub fn cache(&self) -> &ModelCache {
        self.loader.cache()
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    fn call<T>(
        &self,
        id: HandleId,
        items: usize,
        f: impl FnOnce(&mut LoadedModel) -> Result<T>,
    ) -> Result<T> {
        let slot = self.observe(self.handles.get(id))?;
        let family = slot.info().family;
        let start = Instant::now();

        let result = slot.with_model(|model| {
            catch_unwind(AssertUnwindSafe(|| f(model))).unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(id = %id, %message, "Model call panicked");
                Err(EngineError::inference(format!("model call panicked: {message}")))
            })
        });

        if result.is_ok() {
            self.metrics.record_inference(family, items, start.elapsed());
        }
        debug!(id = %id, items, ok = result.is_ok(), "Handle call finished");
        self.observe(result)
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.metrics.record_error(e.kind());
        }
        result
    }
}

pub struct ScopedHandle<'a> {
    engine: &'a Engine,
    id: HandleId,
}

impl ScopedHandle<'_> {
    pub fn id(&self) -> HandleId {
        self.id
    }
}

impl Drop for ScopedHandle<'_> {
    fn drop(&mut self) {
        let _ = self.engine.close_handle(self.id);
    }
}

fn wrong_family(id: HandleId, model: &LoadedModel, op: &str) -> EngineError {
    EngineError::invalid_argument(format!(
        "handle {id} holds a {} model, which does not support {op}",
        model.family()
    ))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
