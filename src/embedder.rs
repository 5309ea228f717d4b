use std::sync::{Arc, Mutex};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::error::Result;
use crate::model::EmbeddingModel;

/// Batches texts through a shared model, reporting `(done, total)` after each
/// slab so a CLI or caller can render progress.
pub struct Embedder {
    model: Arc<Mutex<dyn EmbeddingModel>>,
    pub batch_size: usize,
}

impl Embedder {
    pub fn new(model: Arc<Mutex<dyn EmbeddingModel>>) -> Self {
        Self { model, batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_batch_size(model: Arc<Mutex<dyn EmbeddingModel>>, batch_size: usize) -> Self {
        Self { model, batch_size: batch_size.max(1) }
    }

    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.model.lock().expect("model mutex poisoned").embed(texts)
    }

    pub fn embed_all(&self, texts: &[String], mut progress: impl FnMut(usize, usize)) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let total = texts.len();
        let mut out = Vec::with_capacity(total);
        for slab in texts.chunks(self.batch_size) {
            let mut rows = self.embed_batch(slab)?;
            out.append(&mut rows);
            progress(out.len(), total);
        }
        Ok(out)
    }
}
