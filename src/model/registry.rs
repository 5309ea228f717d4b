use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::encoder::{Pooling, TransformerEmbeddingModel};
use super::EmbeddingModel;
use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingKind {
    ClsPoolingRope,
    LastTokenPooling,
    MeanPoolingDecoder,
}

impl PoolingKind {
    fn pooling(self) -> Pooling {
        match self {
            PoolingKind::ClsPoolingRope => Pooling::Cls,
            PoolingKind::LastTokenPooling => Pooling::LastToken,
            PoolingKind::MeanPoolingDecoder => Pooling::Mean,
        }
    }

    fn causal(self) -> bool {
        matches!(self, PoolingKind::MeanPoolingDecoder)
    }
}

/// A named model's typed configuration: what kind of pooling/masking it uses,
/// its architecture dims, and its prefix convention — the persisted analogue
/// of the original `DEFAULT_MODELS_CONFIG` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    #[serde(rename = "type")]
    pub kind: PoolingKind,
    pub hidden_size: usize,
    pub num_heads: usize,
    pub intermediate_size: usize,
    pub num_layers: usize,
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub weight_path: Option<String>,
    pub query_prefix: String,
    pub document_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub active_indexing_model: String,
    pub active_reranking_model: Option<String>,
    pub models: HashMap<String, ModelSpec>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            "indexing-default".to_string(),
            ModelSpec {
                kind: PoolingKind::ClsPoolingRope,
                hidden_size: 768,
                num_heads: 12,
                intermediate_size: 3072,
                num_layers: 6,
                max_position_embeddings: 2048,
                weight_path: None,
                query_prefix: "search_query: ".to_string(),
                document_prefix: "search_document: ".to_string(),
            },
        );
        models.insert(
            "rerank-default".to_string(),
            ModelSpec {
                kind: PoolingKind::LastTokenPooling,
                hidden_size: 768,
                num_heads: 12,
                intermediate_size: 3072,
                num_layers: 8,
                max_position_embeddings: 2048,
                weight_path: None,
                query_prefix: "search_query: ".to_string(),
                document_prefix: "search_document: ".to_string(),
            },
        );
        Self {
            active_indexing_model: "indexing-default".to_string(),
            active_reranking_model: Some("rerank-default".to_string()),
            models,
        }
    }
}

impl ModelConfig {
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_else(|_| Self::default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| IndexError::runtime(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| IndexError::io(path, e))
    }
}

type SharedModel = Arc<Mutex<dyn EmbeddingModel>>;

/// Lazily constructs and caches model instances by name, switching the active
/// indexing/reranking selection without rebuilding already-loaded models.
pub struct ModelRegistry {
    config: ModelConfig,
    cache: HashMap<String, SharedModel>,
}

impl ModelRegistry {
    pub fn new(config: ModelConfig) -> Self {
        Self { config, cache: HashMap::new() }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn select(&mut self, name: &str, task: Task) -> Result<()> {
        if !self.config.models.contains_key(name) {
            return Err(IndexError::configuration(format!("unknown model '{name}'")));
        }
        match task {
            Task::Indexing => self.config.active_indexing_model = name.to_string(),
            Task::Reranking => self.config.active_reranking_model = Some(name.to_string()),
        }
        Ok(())
    }

    fn get_or_build(&mut self, name: &str) -> Result<SharedModel> {
        if let Some(m) = self.cache.get(name) {
            return Ok(m.clone());
        }
        let spec = self
            .config
            .models
            .get(name)
            .ok_or_else(|| IndexError::configuration(format!("unknown model '{name}'")))?
            .clone();
        let model = build_model(name, &spec)?;
        let shared: SharedModel = Arc::new(Mutex::new(model));
        self.cache.insert(name.to_string(), shared.clone());
        Ok(shared)
    }

    pub fn get_indexing_model(&mut self) -> Result<SharedModel> {
        let name = self.config.active_indexing_model.clone();
        self.get_or_build(&name)
    }

    pub fn get_reranking_model(&mut self) -> Result<Option<SharedModel>> {
        match self.config.active_reranking_model.clone() {
            Some(name) => Ok(Some(self.get_or_build(&name)?)),
            None => Ok(None),
        }
    }

    pub fn unload(&mut self, name: &str) {
        self.cache.remove(name);
    }

    pub fn unload_all(&mut self) {
        self.cache.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Indexing,
    Reranking,
}

fn build_model(name: &str, spec: &ModelSpec) -> Result<TransformerEmbeddingModel> {
    if !spec.hidden_size.is_multiple_of(spec.num_heads) {
        return Err(IndexError::configuration(format!(
            "model '{name}': hidden_size must be divisible by num_heads"
        )));
    }
    if let Some(path) = &spec.weight_path {
        if !path.is_empty() && !Path::new(path).exists() {
            return Err(IndexError::resource(format!("weight path for '{name}' does not exist: {path}")));
        }
    }
    let seed = name.bytes().fold(0u64, |acc, b| acc.wrapping_mul(131).wrapping_add(b as u64));
    Ok(TransformerEmbeddingModel::random(
        seed,
        spec.hidden_size,
        spec.num_heads,
        spec.intermediate_size,
        spec.num_layers,
        spec.max_position_embeddings,
        spec.kind.pooling(),
        spec.kind.causal(),
        spec.query_prefix.clone(),
        spec.document_prefix.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_resolves_both_tasks() {
        let mut reg = ModelRegistry::new(ModelConfig::default());
        assert!(reg.get_indexing_model().is_ok());
        assert!(reg.get_reranking_model().unwrap().is_some());
    }

    #[test]
    fn select_unknown_model_is_configuration_error() {
        let mut reg = ModelRegistry::new(ModelConfig::default());
        let err = reg.select("does-not-exist", Task::Indexing).unwrap_err();
        assert!(matches!(err, IndexError::Configuration(_)));
    }

    #[test]
    fn second_fetch_of_same_model_reuses_cache() {
        let mut reg = ModelRegistry::new(ModelConfig::default());
        let a = reg.get_indexing_model().unwrap();
        let b = reg.get_indexing_model().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        let cfg = ModelConfig::default();
        cfg.save(&path).unwrap();
        let loaded = ModelConfig::load(&path);
        assert_eq!(loaded.active_indexing_model, cfg.active_indexing_model);
    }
}
