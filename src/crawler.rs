use std::path::{Path, PathBuf};

use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;

use crate::config::ABSOLUTE_MAX_FILE_BYTES;
use crate::error::{IndexError, Result};
use crate::registry::LanguageRegistry;

const SKIP_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    ".venv",
    "venv",
    "__pycache__",
    ".cache",
    ".idea",
    ".vscode",
];

fn skip_overrides(repo_root: &Path) -> Result<Override> {
    let mut ob = OverrideBuilder::new(repo_root);
    for d in SKIP_DIRS {
        ob.add(&format!("!**/{d}")).map_err(|e| IndexError::runtime(e.to_string()))?;
        ob.add(&format!("!**/{d}/**")).map_err(|e| IndexError::runtime(e.to_string()))?;
    }
    ob.add("!**/*.egg-info").map_err(|e| IndexError::runtime(e.to_string()))?;
    ob.add("!**/*.egg-info/**").map_err(|e| IndexError::runtime(e.to_string()))?;
    ob.build().map_err(|e| IndexError::runtime(e.to_string()))
}

/// A source file discovered by the crawler: its absolute path, the language it
/// was matched under, the repo identifier it belongs to, and its path relative
/// to the repo root.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub abs_path: PathBuf,
    pub rel_path: PathBuf,
    pub language: String,
    pub repo: String,
}

/// Returns the file's primary extension (the last `.ext`), matching the
/// original crawler's handling of compound extensions like `.tar.gz` (primary
/// extension `.gz`).
fn primary_extension(path: &Path) -> Option<String> {
    path.extension().map(|e| format!(".{}", e.to_string_lossy()))
}

/// Derives a stable repo identifier from a language entry's canonical URL,
/// e.g. `https://github.com/rust-lang/rust` -> `rust-lang/rust`.
pub fn repo_id_from_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    trimmed
        .rsplit("://")
        .next()
        .unwrap_or(trimmed)
        .split_once('/')
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed)
        .to_string()
}

/// Splits a canonical URL into its `host/owner/repo` path components, matching
/// the `<root>/external/<host>/<owner>/<repo>` clone layout.
pub fn repo_path_from_url(url: &str) -> PathBuf {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let without_scheme = trimmed.rsplit("://").next().unwrap_or(trimmed);
    without_scheme.split('/').collect()
}

/// Walks `repo_root`, matching each file's primary extension against `registry`
/// and restricting the match to languages whose canonical dir/url resolves to
/// `repo_id`. Files over 1 MB or in a skip directory are silently dropped.
pub fn crawl(repo_root: &Path, repo_id: &str, language: &str, registry: &LanguageRegistry) -> Result<Vec<SourceFile>> {
    if !repo_root.is_dir() {
        return Err(IndexError::resource(format!(
            "no cloned repository at {}",
            repo_root.display()
        )));
    }

    let overrides = skip_overrides(repo_root)?;
    let walker = WalkBuilder::new(repo_root).standard_filters(true).overrides(overrides).build();

    // Directory traversal is inherently sequential (the `ignore` walker owns
    // that order), but the per-candidate size stat is independent work, so it
    // runs as a rayon parallel sweep over the matched paths.
    let mut candidates = Vec::new();
    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let abs_path = entry.into_path();
        let Some(ext) = primary_extension(&abs_path) else { continue };
        let langs = registry.languages_for_extension(&ext);
        if !langs.iter().any(|l| l.name.eq_ignore_ascii_case(language)) {
            continue;
        }
        candidates.push(abs_path);
    }

    let mut out: Vec<SourceFile> = candidates
        .into_par_iter()
        .filter_map(|abs_path| {
            let size = std::fs::metadata(&abs_path).ok()?.len();
            if size > ABSOLUTE_MAX_FILE_BYTES {
                return None;
            }
            let rel_path = abs_path.strip_prefix(repo_root).ok()?.to_path_buf();
            Some(SourceFile {
                abs_path,
                rel_path,
                language: language.to_string(),
                repo: repo_id.to_string(),
            })
        })
        .collect();
    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(out)
}
