use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use xlindex::config::{load_config, Config};
use xlindex::cross_lang::CrossLanguageFinder;
use xlindex::model::{ModelConfig, ModelRegistry};
use xlindex::pipeline::{IndexOutcome, IndexingPipeline};
use xlindex::registry::LanguageRegistry;
use xlindex::search::SemanticSearch;
use xlindex::store::{FlatFileStore, SearchFilters, VectorStore};
use xlindex::structural::compare as structural_compare;

#[derive(Debug, Parser)]
#[command(name = "xlindex")]
#[command(version)]
#[command(about = "Cross-language code search and equivalence engine")]
struct Cli {
    /// Path to the tab-delimited language catalog.
    #[arg(long, global = true, default_value = "index.tsv")]
    catalog: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index one language (or "all") from its cloned repository.
    Index {
        language: String,
        #[arg(long)]
        incremental: bool,
        #[arg(long, default_value_t = 0)]
        max_files: usize,
    },
    /// Semantic search over the indexed store.
    Search {
        query: String,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long)]
        language: Option<String>,
    },
    /// Find equivalent implementations of a code fragment in other languages.
    FindEquivalents {
        file: PathBuf,
        #[arg(long)]
        source_language: String,
        #[arg(long, value_delimiter = ',')]
        target_languages: Option<Vec<String>>,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long)]
        no_rerank: bool,
        #[arg(long)]
        no_structural: bool,
    },
    /// Structurally compare two code fragments.
    Compare {
        file_a: PathBuf,
        lang_a: String,
        file_b: PathBuf,
        lang_b: String,
    },
    /// List catalog languages.
    Languages,
    /// Print vector store statistics.
    Stats,
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner} {msg}").unwrap().tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb.set_message(msg.to_string());
    pb
}

fn open_store(config: &Config) -> Result<std::sync::Arc<dyn VectorStore>> {
    Ok(std::sync::Arc::new(FlatFileStore::open(config.vectors_dir().join("chunks.json"))?))
}

fn main() -> Result<()> {
    xlindex::logging::init();
    let cli = Cli::parse();
    let repo_root = std::env::current_dir().context("failed to get current dir")?;
    let config = load_config(&repo_root);

    let registry = LanguageRegistry::load_file(&cli.catalog).with_context(|| format!("loading catalog {}", cli.catalog.display()))?;
    let mut model_registry = ModelRegistry::new(ModelConfig::load(&config.models_path()));

    match cli.cmd {
        Command::Index { language, incremental, max_files } => {
            let store = open_store(&config)?;
            let mut pipeline = IndexingPipeline { registry: &registry, config: &config, store, models: &mut model_registry };
            let pb = spinner("indexing...");
            let mut progress = |phase: &str, done: usize, total: usize| pb.set_message(format!("{phase}: {done}/{total}"));

            let outcomes = if language.eq_ignore_ascii_case("all") {
                pipeline.index_all(incremental, None, &mut progress)?
            } else {
                vec![pipeline.index_language(&language, incremental, max_files, &mut progress)?]
            };
            pb.finish_and_clear();
            model_registry.config().save(&config.models_path())?;
            for outcome in outcomes {
                match outcome {
                    IndexOutcome::Indexed(r) => println!("{}", serde_json::to_string(&r)?),
                    IndexOutcome::Skipped { language, reason } => eprintln!("skipped {language}: {reason}"),
                }
            }
        }
        Command::Search { query, limit, language } => {
            let store = open_store(&config)?;
            let mut search = SemanticSearch { store, models: &mut model_registry };
            let filters = SearchFilters { language, ..Default::default() };
            let hits = search.search(&query, limit, filters)?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Command::FindEquivalents { file, source_language, target_languages, limit, no_rerank, no_structural } => {
            let code = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let store = open_store(&config)?;
            let mut finder = CrossLanguageFinder { store, models: &mut model_registry };
            let results = finder.find_equivalents(&code, &source_language, limit, !no_rerank, !no_structural, target_languages.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Compare { file_a, lang_a, file_b, lang_b } => {
            let code_a = std::fs::read_to_string(&file_a)?;
            let code_b = std::fs::read_to_string(&file_b)?;
            let score = structural_compare(&code_a, &lang_a, &code_b, &lang_b);
            println!("{}", serde_json::to_string(&serde_json::json!({ "similarity": score }))?);
        }
        Command::Languages => {
            for entry in registry.entries() {
                println!("{}\t{}", entry.name, entry.extensions.join(","));
            }
        }
        Command::Stats => {
            let store = open_store(&config)?;
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
    }

    Ok(())
}
