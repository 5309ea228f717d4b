use std::sync::Arc;

use crate::config::DEFAULT_SEARCH_LIMIT;
use crate::error::Result;
use crate::model::{ModelRegistry, Mode};
use crate::store::{SearchFilters, SearchHit, VectorStore};

/// Embeds a query in query mode and delegates to the store with the caller's
/// filter set; results are ranked by the store's distance (lower = closer).
pub struct SemanticSearch<'a> {
    pub store: Arc<dyn VectorStore>,
    pub models: &'a mut ModelRegistry,
}

impl<'a> SemanticSearch<'a> {
    pub fn search(&mut self, query: &str, limit: usize, filters: SearchFilters) -> Result<Vec<SearchHit>> {
        let model = self.models.get_indexing_model()?;
        let vector = {
            let mut guard = model.lock().expect("model mutex poisoned");
            guard.set_mode(Mode::Query);
            guard.embed(&[query.to_string()])?
        };
        let limit = if limit == 0 { DEFAULT_SEARCH_LIMIT } else { limit };
        self.store.search(&vector[0], limit, &filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelConfig;
    use crate::store::{ChunkRecord, FlatFileStore};

    #[test]
    fn search_returns_hits_ranked_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn VectorStore> = Arc::new(FlatFileStore::open(dir.path().join("chunks.json")).unwrap());
        let mut models = ModelRegistry::new(ModelConfig::default());

        let model = models.get_indexing_model().unwrap();
        let vector = {
            let mut guard = model.lock().unwrap();
            guard.set_mode(Mode::Document);
            guard.embed(&["fn add(a, b) { a + b }".to_string()]).unwrap().remove(0)
        };
        store
            .insert(&[ChunkRecord {
                chunk_id: "a".into(),
                language: "Rust".into(),
                version: "1.0".into(),
                file_path: "lib.rs".into(),
                repo: "acme/widgets".into(),
                start_line: 1,
                end_line: 3,
                ast_type: "function_item".into(),
                name: "add".into(),
                text: "fn add(a, b) { a + b }".into(),
                vector,
            }])
            .unwrap();

        let mut search = SemanticSearch { store, models: &mut models };
        let hits = search.search("fn add(a, b) { a + b }", 5, SearchFilters::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].distance < 0.5);
    }
}
