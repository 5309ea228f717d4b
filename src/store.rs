use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EMBEDDING_DIM;
use crate::error::{IndexError, Result};

/// One persisted row: provenance, chunk metadata, the original text, and its
/// L2-normalized embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub language: String,
    pub version: String,
    pub file_path: String,
    pub repo: String,
    pub start_line: u32,
    pub end_line: u32,
    pub ast_type: String,
    pub name: String,
    pub text: String,
    pub vector: Vec<f32>,
}

impl ChunkRecord {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// Conjunctive filter applied before the top-k cut: every `Some` field must
/// match exactly, and no result may carry a language in `exclude_languages`.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub language: Option<String>,
    pub version: Option<String>,
    pub ast_type: Option<String>,
    pub repo: Option<String>,
    pub exclude_languages: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: ChunkRecord,
    pub distance: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LanguageCount {
    pub language: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub languages: usize,
    pub repos: usize,
}

/// Escapes a filter value the way a SQL-backed store would need to before
/// splicing it into a `WHERE` clause: doubling single quotes. The in-process
/// engine below never builds SQL text, but the escaping rule is a documented
/// invariant of this trait that any future SQL-backed implementation must honor.
pub fn escape_filter_value(value: &str) -> String {
    value.replace('\'', "''")
}

/// Narrow collaborator contract: append rows, run a filtered k-NN search,
/// and support bulk deletes by language or by file.
pub trait VectorStore: Send + Sync {
    fn insert(&self, records: &[ChunkRecord]) -> Result<usize>;
    fn search(&self, query_vector: &[f32], limit: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>>;
    fn count(&self, language: Option<&str>) -> Result<usize>;
    fn languages(&self) -> Result<Vec<LanguageCount>>;
    fn stats(&self) -> Result<StoreStats>;
    fn delete_by_language(&self, language: &str) -> Result<usize>;
    fn delete_by_file(&self, file_path: &str) -> Result<usize>;
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[derive(Default, Serialize, Deserialize)]
struct FlatFileDocument {
    rows: Vec<ChunkRecord>,
}

/// In-process, append-only flat-file implementation of [`VectorStore`],
/// persisted as one JSON document — generalized from the teacher's own
/// per-file flat-file index to this crate's chunk-level `ChunkRecord` schema.
pub struct FlatFileStore {
    path: PathBuf,
    rows: RwLock<Vec<ChunkRecord>>,
}

impl FlatFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let rows = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| IndexError::io(&path, e))?;
            serde_json::from_str::<FlatFileDocument>(&text).map(|d| d.rows).unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(Self { path, rows: RwLock::new(rows) })
    }

    fn persist(&self, rows: &[ChunkRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
        }
        let doc = FlatFileDocument { rows: rows.to_vec() };
        let text = serde_json::to_string_pretty(&doc).map_err(|e| IndexError::runtime(e.to_string()))?;
        std::fs::write(&self.path, text).map_err(|e| IndexError::io(&self.path, e))
    }

    fn matches(record: &ChunkRecord, filters: &SearchFilters) -> bool {
        if let Some(l) = &filters.language {
            if &record.language != l {
                return false;
            }
        }
        if let Some(v) = &filters.version {
            if &record.version != v {
                return false;
            }
        }
        if let Some(a) = &filters.ast_type {
            if &record.ast_type != a {
                return false;
            }
        }
        if let Some(r) = &filters.repo {
            if &record.repo != r {
                return false;
            }
        }
        if filters.exclude_languages.iter().any(|l| l == &record.language) {
            return false;
        }
        true
    }
}

impl VectorStore for FlatFileStore {
    fn insert(&self, records: &[ChunkRecord]) -> Result<usize> {
        for r in records {
            if r.vector.len() != EMBEDDING_DIM {
                return Err(IndexError::contract(format!(
                    "chunk {} has vector length {} (expected {EMBEDDING_DIM})",
                    r.chunk_id,
                    r.vector.len()
                )));
            }
        }
        let mut rows = self.rows.write().expect("store lock poisoned");
        rows.extend(records.iter().cloned());
        self.persist(&rows)?;
        Ok(records.len())
    }

    fn search(&self, query_vector: &[f32], limit: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
        let rows = self.rows.read().expect("store lock poisoned");
        let mut hits: Vec<SearchHit> = rows
            .iter()
            .filter(|r| Self::matches(r, filters))
            .map(|r| SearchHit {
                record: r.clone(),
                distance: 1.0 - cosine_similarity(query_vector, &r.vector),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    fn count(&self, language: Option<&str>) -> Result<usize> {
        let rows = self.rows.read().expect("store lock poisoned");
        Ok(match language {
            Some(l) => rows.iter().filter(|r| r.language == l).count(),
            None => rows.len(),
        })
    }

    fn languages(&self) -> Result<Vec<LanguageCount>> {
        let rows = self.rows.read().expect("store lock poisoned");
        let mut counts: HashMap<String, usize> = HashMap::new();
        for r in rows.iter() {
            *counts.entry(r.language.clone()).or_default() += 1;
        }
        let mut out: Vec<LanguageCount> = counts.into_iter().map(|(language, count)| LanguageCount { language, count }).collect();
        out.sort_by(|a, b| a.language.cmp(&b.language));
        Ok(out)
    }

    fn stats(&self) -> Result<StoreStats> {
        let rows = self.rows.read().expect("store lock poisoned");
        let languages: std::collections::HashSet<&str> = rows.iter().map(|r| r.language.as_str()).collect();
        let repos: std::collections::HashSet<&str> = rows.iter().map(|r| r.repo.as_str()).collect();
        Ok(StoreStats { total_chunks: rows.len(), languages: languages.len(), repos: repos.len() })
    }

    fn delete_by_language(&self, language: &str) -> Result<usize> {
        let mut rows = self.rows.write().expect("store lock poisoned");
        let before = rows.len();
        rows.retain(|r| r.language != language);
        let removed = before - rows.len();
        self.persist(&rows)?;
        Ok(removed)
    }

    fn delete_by_file(&self, file_path: &str) -> Result<usize> {
        let mut rows = self.rows.write().expect("store lock poisoned");
        let before = rows.len();
        rows.retain(|r| r.file_path != file_path);
        let removed = before - rows.len();
        self.persist(&rows)?;
        Ok(removed)
    }
}

pub fn score_file_entry(query: &[f32], chunk_vectors: &[Vec<f32>]) -> f32 {
    chunk_vectors.iter().map(|v| cosine_similarity(query, v)).fold(f32::MIN, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, lang: &str, file: &str, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            chunk_id: id.to_string(),
            language: lang.to_string(),
            version: "1.0".to_string(),
            file_path: file.to_string(),
            repo: "acme/widgets".to_string(),
            start_line: 1,
            end_line: 2,
            ast_type: "function_item".to_string(),
            name: "f".to_string(),
            text: "fn f() {}".to_string(),
            vector,
        }
    }

    fn unit_vector(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn insert_rejects_wrong_dimension_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileStore::open(dir.path().join("chunks.json")).unwrap();
        let bad = record("a", "Rust", "a.rs", vec![0.0, 1.0]);
        let err = store.insert(&[bad]).unwrap_err();
        assert!(matches!(err, IndexError::Contract(_)));
    }

    #[test]
    fn search_respects_language_filter_and_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileStore::open(dir.path().join("chunks.json")).unwrap();
        let rust = record("a", "Rust", "a.rs", unit_vector(EMBEDDING_DIM, 0));
        let python = record("b", "Python", "b.py", unit_vector(EMBEDDING_DIM, 0));
        store.insert(&[rust, python]).unwrap();

        let hits = store.search(&unit_vector(EMBEDDING_DIM, 0), 10, &SearchFilters { language: Some("Rust".into()), ..Default::default() }).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.language, "Rust");

        let hits = store
            .search(&unit_vector(EMBEDDING_DIM, 0), 10, &SearchFilters { exclude_languages: vec!["Rust".into()], ..Default::default() })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.language, "Python");
    }

    #[test]
    fn search_orders_by_ascending_distance() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileStore::open(dir.path().join("chunks.json")).unwrap();
        store
            .insert(&[
                record("near", "Rust", "a.rs", unit_vector(EMBEDDING_DIM, 0)),
                record("far", "Rust", "b.rs", unit_vector(EMBEDDING_DIM, 1)),
            ])
            .unwrap();
        let hits = store.search(&unit_vector(EMBEDDING_DIM, 0), 10, &SearchFilters::default()).unwrap();
        assert_eq!(hits[0].record.chunk_id, "near");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn delete_by_file_removes_only_matching_rows_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        let store = FlatFileStore::open(&path).unwrap();
        store
            .insert(&[record("a", "Rust", "a.rs", unit_vector(EMBEDDING_DIM, 0)), record("b", "Rust", "b.rs", unit_vector(EMBEDDING_DIM, 0))])
            .unwrap();
        let removed = store.delete_by_file("a.rs").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(None).unwrap(), 1);

        let reopened = FlatFileStore::open(&path).unwrap();
        assert_eq!(reopened.count(None).unwrap(), 1);
    }

    #[test]
    fn escape_filter_value_doubles_single_quotes() {
        assert_eq!(escape_filter_value("O'Brien"), "O''Brien");
    }

    #[test]
    fn score_file_entry_is_the_max_similarity_across_chunks() {
        let query = unit_vector(4, 0);
        let chunks = vec![unit_vector(4, 1), unit_vector(4, 0)];
        assert!((score_file_entry(&query, &chunks) - 1.0).abs() < 1e-6);
    }
}
