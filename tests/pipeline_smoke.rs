use std::sync::Arc;

use xlindex::config::Config;
use xlindex::cross_lang::CrossLanguageFinder;
use xlindex::model::{ModelConfig, ModelRegistry};
use xlindex::pipeline::{IndexOutcome, IndexingPipeline};
use xlindex::registry::LanguageRegistry;
use xlindex::search::SemanticSearch;
use xlindex::store::{FlatFileStore, SearchFilters, VectorStore};

fn write_repo(root: &std::path::Path, host_owner_repo: &str, files: &[(&str, &str)]) {
    let dir = root.join("external").join(host_owner_repo);
    std::fs::create_dir_all(&dir).unwrap();
    for (name, body) in files {
        std::fs::write(dir.join(name), body).unwrap();
    }
}

/// Indexes two tiny repos in different languages, then confirms semantic
/// search and cross-language equivalence search both operate end to end
/// against the resulting flat-file store.
#[test]
fn index_search_and_find_equivalents_round_trip() {
    let workdir = tempfile::tempdir().unwrap();

    write_repo(
        workdir.path(),
        "github.com/acme/widgets",
        &[("add.rs", "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n")],
    );
    write_repo(
        workdir.path(),
        "github.com/acme/widgets-py",
        &[("add.py", "def add(a, b):\n    return a + b\n")],
    );

    let registry = LanguageRegistry::from_catalog(
        "Rust\trs\tLanguage\t.rs\t\thttps://github.com/acme/widgets\trust\n\
         Python\tpy\tLanguage\t.py\t\thttps://github.com/acme/widgets-py\tpython\n",
    )
    .unwrap();

    let mut config = Config::default();
    config.root = workdir.path().to_path_buf();

    let store: Arc<dyn VectorStore> = Arc::new(FlatFileStore::open(config.vectors_dir().join("chunks.json")).unwrap());
    let mut models = ModelRegistry::new(ModelConfig::default());

    {
        let mut pipeline = IndexingPipeline { registry: &registry, config: &config, store: store.clone(), models: &mut models };
        for lang in ["Rust", "Python"] {
            let outcome = pipeline.index_language(lang, false, 0, &mut |_, _, _| {}).unwrap();
            assert!(matches!(outcome, IndexOutcome::Indexed(_)), "{lang} should index");
        }
    }

    let stats = store.stats().unwrap();
    assert_eq!(stats.languages, 2);
    assert!(stats.total_chunks >= 2);

    {
        let mut search = SemanticSearch { store: store.clone(), models: &mut models };
        let hits = search.search("add two numbers", 10, SearchFilters::default()).unwrap();
        assert!(!hits.is_empty());
    }

    {
        let mut finder = CrossLanguageFinder { store: store.clone(), models: &mut models };
        let results = finder
            .find_equivalents("fn add(a: i32, b: i32) -> i32 { a + b }", "Rust", 4, true, true, None)
            .unwrap();
        assert!(results.iter().all(|r| r.hit.record.language != "Rust"));
        let scores: Vec<f32> = results.iter().map(|r| r.combined_score).collect();
        assert!(scores.windows(2).all(|w| w[0] <= w[1]), "results must be sorted by combined score");
    }
}
