use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default embedding dimension; a store rebuild is required to change it.
pub const EMBEDDING_DIM: usize = 768;
pub const DEFAULT_BATCH_SIZE: usize = 256;
pub const DEFAULT_CHUNK_MAX_LINES: usize = 100;
pub const DEFAULT_CHUNK_MIN_LINES: usize = 5;
pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const DEFAULT_RERANK_CANDIDATES: usize = 100;

/// Hard safety ceiling: files larger than this are always skipped by the crawler.
pub const ABSOLUTE_MAX_FILE_BYTES: u64 = 1_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub min_lines: usize,
    pub max_lines: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_lines: DEFAULT_CHUNK_MIN_LINES,
            max_lines: DEFAULT_CHUNK_MAX_LINES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub batch_size: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE }
    }
}

/// Root directory layout this crate owns on disk, rooted at `root`:
/// `root/external/<host>/<owner>/<repo>` for clones, `root/index/state/index_state.json`
/// for pipeline state, `root/index/models.json` for the model registry, and
/// `root/index/vectors/` owned by the vector store implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub root: PathBuf,
    pub chunk: ChunkConfig,
    pub embedder: EmbedderConfig,
    pub default_search_limit: usize,
    pub rerank_candidates: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            chunk: ChunkConfig::default(),
            embedder: EmbedderConfig::default(),
            default_search_limit: DEFAULT_SEARCH_LIMIT,
            rerank_candidates: DEFAULT_RERANK_CANDIDATES,
        }
    }
}

impl Config {
    pub fn external_dir(&self) -> PathBuf {
        self.root.join("external")
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join("index").join("state").join("index_state.json")
    }

    pub fn models_path(&self) -> PathBuf {
        self.root.join("index").join("models.json")
    }

    pub fn vectors_dir(&self) -> PathBuf {
        self.root.join("index").join("vectors")
    }
}

/// Reads `<repo_root>/.xlindex.json`, falling back to defaults on any error
/// (missing file, malformed JSON) — mirroring the teacher's own tolerant config load.
pub fn load_config(repo_root: &Path) -> Config {
    let primary = repo_root.join(".xlindex.json");
    let mut config = std::fs::read_to_string(&primary)
        .ok()
        .and_then(|text| serde_json::from_str::<Config>(&text).ok())
        .unwrap_or_default();
    config.root = repo_root.to_path_buf();
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.default_search_limit, DEFAULT_SEARCH_LIMIT);
    }

    #[test]
    fn malformed_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".xlindex.json"), b"not json").unwrap();
        let cfg = load_config(dir.path());
        assert_eq!(cfg.chunk.min_lines, DEFAULT_CHUNK_MIN_LINES);
    }
}
