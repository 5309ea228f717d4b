use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::chunk::chunk as chunk_source;
use crate::config::Config;
use crate::crawler::{crawl, repo_id_from_url, repo_path_from_url, SourceFile};
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::model::{Mode, ModelRegistry};
use crate::registry::{resolve_version, LanguageRegistry};
use crate::store::{ChunkRecord, VectorStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileState {
    pub mtime: u64,
    pub chunks: usize,
    pub indexed_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageState {
    pub version: String,
    pub files: usize,
    pub chunks: usize,
    pub indexed_at: u64,
}

/// Persisted incremental-indexing state: per-file mtimes/chunk counts and
/// per-language summaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexState {
    pub files: HashMap<String, FileState>,
    pub languages: HashMap<String, LanguageState>,
}

impl IndexState {
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|e| IndexError::runtime(e.to_string()))?;
        std::fs::write(path, text).map_err(|e| IndexError::io(path, e))
    }

    pub fn is_indexed(&self, rel_path: &str, mtime: u64) -> bool {
        self.files.get(rel_path).map(|f| f.mtime >= mtime).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageIndexResult {
    pub language: String,
    pub version: String,
    pub files: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub enum IndexOutcome {
    Indexed(LanguageIndexResult),
    Skipped { language: String, reason: String },
}

fn unix_time(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn file_mtime(path: &Path) -> u64 {
    std::fs::metadata(path).and_then(|m| m.modified()).map(unix_time).unwrap_or(0)
}

fn now() -> u64 {
    unix_time(SystemTime::now())
}

pub type Progress<'a> = dyn FnMut(&str, usize, usize) + 'a;

pub struct IndexingPipeline<'a> {
    pub registry: &'a LanguageRegistry,
    pub config: &'a Config,
    pub store: Arc<dyn VectorStore>,
    pub models: &'a mut ModelRegistry,
}

impl<'a> IndexingPipeline<'a> {
    fn repo_dir_for(&self, entry: &crate::registry::LanguageEntry) -> (String, PathBuf) {
        let repo_id = repo_id_from_url(&entry.repo_url);
        let dir = self.config.external_dir().join(repo_path_from_url(&entry.repo_url));
        (repo_id, dir)
    }

    pub fn index_language(&mut self, name: &str, incremental: bool, max_files: usize, progress: &mut Progress) -> Result<IndexOutcome> {
        let Some(entry) = self.registry.resolve(name) else {
            return Ok(IndexOutcome::Skipped { language: name.to_string(), reason: "unknown language".to_string() });
        };
        let (repo_id, repo_dir) = self.repo_dir_for(entry);
        if !repo_dir.is_dir() {
            return Ok(IndexOutcome::Skipped { language: entry.name.clone(), reason: "no cloned repository".to_string() });
        }

        let version = resolve_version(&repo_dir);
        entry.set_version(version.clone());

        if !incremental {
            self.store.delete_by_language(&entry.name)?;
        }

        let mut files: Vec<SourceFile> = crawl(&repo_dir, &repo_id, &entry.name, self.registry)?;

        let mut state = IndexState::load(&self.config.state_path());

        if incremental {
            let mut kept = Vec::new();
            for f in files.into_iter() {
                let rel = f.rel_path.to_string_lossy().to_string();
                let mtime = file_mtime(&f.abs_path);
                if state.is_indexed(&rel, mtime) {
                    continue;
                }
                if state.files.contains_key(&rel) {
                    self.store.delete_by_file(&rel)?;
                }
                kept.push(f);
            }
            files = kept;
        }

        if max_files > 0 {
            files.truncate(max_files);
        }

        let mut pending: Vec<(SourceFile, crate::chunk::CodeChunk)> = Vec::new();
        for file in &files {
            let bytes = match std::fs::read(&file.abs_path) {
                Ok(b) => b,
                Err(_) => continue,
            };
            let text = String::from_utf8_lossy(&bytes).into_owned();
            for c in chunk_source(&text, &entry.name, self.config.chunk.min_lines, self.config.chunk.max_lines) {
                pending.push((file.clone(), c));
            }
        }

        let model = self.models.get_indexing_model()?;
        model.lock().expect("model mutex poisoned").set_mode(Mode::Document);
        let embedder = Embedder::with_batch_size(model, self.config.embedder.batch_size);

        let total = pending.len();
        let mut chunks_per_file: HashMap<String, usize> = HashMap::new();
        let mut done = 0usize;
        for batch in pending.chunks(self.config.embedder.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, c)| c.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts)?;
            let records: Vec<ChunkRecord> = batch
                .iter()
                .zip(vectors)
                .map(|((file, c), vector)| ChunkRecord {
                    chunk_id: ChunkRecord::new_id(),
                    language: entry.name.clone(),
                    version: version.clone(),
                    file_path: file.rel_path.to_string_lossy().to_string(),
                    repo: repo_id.clone(),
                    start_line: c.start_line,
                    end_line: c.end_line,
                    ast_type: c.ast_type.clone(),
                    name: c.name.clone(),
                    text: c.text.clone(),
                    vector,
                })
                .collect();
            for r in &records {
                *chunks_per_file.entry(r.file_path.clone()).or_default() += 1;
            }
            self.store.insert(&records)?;
            done += batch.len();
            progress("embed", done, total.max(1));
        }

        let indexed_at = now();
        for file in &files {
            let rel = file.rel_path.to_string_lossy().to_string();
            let mtime = file_mtime(&file.abs_path);
            let n_chunks = chunks_per_file.get(&rel).copied().unwrap_or(0);
            if n_chunks > 0 || !incremental {
                state.files.insert(rel, FileState { mtime, chunks: n_chunks, indexed_at });
            }
        }
        let total_chunks_for_lang = self.store.count(Some(&entry.name))?;
        state.languages.insert(
            entry.name.clone(),
            LanguageState { version: version.clone(), files: files.len(), chunks: total_chunks_for_lang, indexed_at },
        );
        state.save(&self.config.state_path())?;

        Ok(IndexOutcome::Indexed(LanguageIndexResult {
            language: entry.name.clone(),
            version,
            files: files.len(),
            chunks: total,
        }))
    }

    pub fn index_all(&mut self, incremental: bool, languages: Option<&[String]>, progress: &mut Progress) -> Result<Vec<IndexOutcome>> {
        let names: Vec<String> = match languages {
            Some(ls) => ls.to_vec(),
            None => self.registry.entries().map(|e| e.name.clone()).collect(),
        };
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            out.push(self.index_language(&name, incremental, 0, progress)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelConfig;
    use crate::store::FlatFileStore;

    fn setup() -> (tempfile::TempDir, LanguageRegistry, Config) {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("external/github.com/rust-lang/rust");
        std::fs::create_dir_all(&repo_dir).unwrap();
        std::fs::write(repo_dir.join("main.rs"), "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n").unwrap();

        let registry = LanguageRegistry::from_catalog("Rust\trs\tLanguage\t.rs\t\thttps://github.com/rust-lang/rust\trust-lang\n").unwrap();
        let mut config = Config::default();
        config.root = dir.path().to_path_buf();
        (dir, registry, config)
    }

    #[test]
    fn indexes_a_language_and_persists_state() {
        let (_dir, registry, config) = setup();
        let store = Arc::new(FlatFileStore::open(config.vectors_dir().join("chunks.json")).unwrap());
        let mut models = ModelRegistry::new(ModelConfig::default());
        let mut pipeline = IndexingPipeline { registry: &registry, config: &config, store: store.clone(), models: &mut models };

        let outcome = pipeline.index_language("Rust", false, 0, &mut |_, _, _| {}).unwrap();
        let IndexOutcome::Indexed(result) = outcome else { panic!("expected Indexed") };
        assert_eq!(result.files, 1);
        assert!(result.chunks >= 1);
        assert_eq!(store.count(Some("Rust")).unwrap(), result.chunks);

        let state = IndexState::load(&config.state_path());
        assert!(state.languages.contains_key("Rust"));
    }

    #[test]
    fn incremental_rerun_with_no_changes_inserts_nothing_new() {
        let (_dir, registry, config) = setup();
        let store = Arc::new(FlatFileStore::open(config.vectors_dir().join("chunks.json")).unwrap());
        let mut models = ModelRegistry::new(ModelConfig::default());
        {
            let mut pipeline = IndexingPipeline { registry: &registry, config: &config, store: store.clone(), models: &mut models };
            pipeline.index_language("Rust", false, 0, &mut |_, _, _| {}).unwrap();
        }
        let before = store.stats().unwrap().total_chunks;

        let mut pipeline = IndexingPipeline { registry: &registry, config: &config, store: store.clone(), models: &mut models };
        pipeline.index_language("Rust", true, 0, &mut |_, _, _| {}).unwrap();
        let after = store.stats().unwrap().total_chunks;
        assert_eq!(before, after);
    }

    #[test]
    fn unknown_language_is_skipped_not_an_error() {
        let (_dir, registry, config) = setup();
        let store = Arc::new(FlatFileStore::open(config.vectors_dir().join("chunks.json")).unwrap());
        let mut models = ModelRegistry::new(ModelConfig::default());
        let mut pipeline = IndexingPipeline { registry: &registry, config: &config, store, models: &mut models };
        let outcome = pipeline.index_language("Cobol", false, 0, &mut |_, _, _| {}).unwrap();
        assert!(matches!(outcome, IndexOutcome::Skipped { .. }));
    }
}
