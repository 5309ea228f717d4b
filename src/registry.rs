use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{IndexError, Result};

/// One row of the language catalog. `version` is resolved lazily the first time
/// the entry is indexed, so the struct stores it behind a lock even though the
/// registry itself is otherwise read-only after construction.
#[derive(Debug)]
pub struct LanguageEntry {
    pub name: String,
    pub aliases: Vec<String>,
    pub category: String,
    pub extensions: Vec<String>,
    pub source_urls: Vec<String>,
    pub repo_url: String,
    pub dir_name: Option<String>,
    version: Mutex<Option<String>>,
}

impl Clone for LanguageEntry {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            aliases: self.aliases.clone(),
            category: self.category.clone(),
            extensions: self.extensions.clone(),
            source_urls: self.source_urls.clone(),
            repo_url: self.repo_url.clone(),
            dir_name: self.dir_name.clone(),
            version: Mutex::new(self.version.lock().unwrap().clone()),
        }
    }
}

impl LanguageEntry {
    pub fn version(&self) -> Option<String> {
        self.version.lock().unwrap().clone()
    }

    pub fn set_version(&self, v: impl Into<String>) {
        *self.version.lock().unwrap() = Some(v.into());
    }
}

/// Parses a tab-delimited catalog and resolves languages by name, alias, or
/// directory name, all case-insensitively. Mirrors the original registry's
/// three-namespace lookup scheme.
#[derive(Debug, Default)]
pub struct LanguageRegistry {
    entries: Vec<LanguageEntry>,
    by_key: HashMap<String, usize>,
    by_extension: HashMap<String, Vec<usize>>,
}

impl LanguageRegistry {
    pub fn from_catalog(text: &str) -> Result<Self> {
        let mut reg = LanguageRegistry::default();
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            reg.add_row(line).map_err(|e| {
                IndexError::configuration(format!("catalog line {}: {e}", lineno + 1))
            })?;
        }
        Ok(reg)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| IndexError::io(path, e))?;
        Self::from_catalog(&text)
    }

    fn add_row(&mut self, line: &str) -> std::result::Result<(), String> {
        let mut fields = line.split('\t');
        let name = fields.next().ok_or("missing name field")?.trim().to_string();
        if name.is_empty() {
            return Err("empty language name".to_string());
        }
        let aliases = fields
            .next()
            .unwrap_or("")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        let category = fields.next().unwrap_or("").trim().to_string();
        let extensions = fields
            .next()
            .unwrap_or("")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        let source_urls = fields
            .next()
            .unwrap_or("")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        let repo_url = fields.next().unwrap_or("").trim().to_string();
        let dir_name = fields.next().unwrap_or("").trim();
        let dir_name = if dir_name.is_empty() { None } else { Some(dir_name.to_string()) };

        let idx = self.entries.len();
        let mut keys = vec![name.to_lowercase()];
        keys.extend(aliases.iter().map(|a| a.to_lowercase()));
        if let Some(d) = &dir_name {
            keys.push(d.to_lowercase());
        }
        for key in keys {
            self.by_key.entry(key).or_insert(idx);
        }
        for ext in &extensions {
            self.by_extension.entry(ext.clone()).or_default().push(idx);
        }

        self.entries.push(LanguageEntry {
            name,
            aliases,
            category,
            extensions,
            source_urls,
            repo_url,
            dir_name,
            version: Mutex::new(None),
        });
        Ok(())
    }

    pub fn resolve(&self, key: &str) -> Option<&LanguageEntry> {
        self.by_key.get(&key.to_lowercase()).map(|&idx| &self.entries[idx])
    }

    pub fn languages_for_extension(&self, ext: &str) -> Vec<&LanguageEntry> {
        self.by_extension
            .get(ext)
            .map(|idxs| idxs.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }

    pub fn entries(&self) -> impl Iterator<Item = &LanguageEntry> {
        self.entries.iter()
    }
}

/// Resolves a language's current version from the cloned repo: latest tag, else
/// short HEAD hash, else `"unknown"`. All VCS failures (missing binary, timeout,
/// not a repo) are silent by design.
pub fn resolve_version(repo_dir: &Path) -> String {
    if let Some(tag) = run_git(repo_dir, &["describe", "--tags", "--abbrev=0"]) {
        return tag;
    }
    if let Some(hash) = run_git(repo_dir, &["rev-parse", "--short", "HEAD"]) {
        return hash;
    }
    "unknown".to_string()
}

const GIT_TIMEOUT: Duration = Duration::from_secs(5);

fn run_git(repo_dir: &Path, args: &[&str]) -> Option<String> {
    if !repo_dir.is_dir() {
        return None;
    }
    let mut child = Command::new("git")
        .arg("-C")
        .arg(repo_dir)
        .args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .spawn()
        .ok()?;

    let start = std::time::Instant::now();
    loop {
        match child.try_wait().ok()? {
            Some(status) => {
                if !status.success() {
                    return None;
                }
                let mut out = String::new();
                use std::io::Read;
                child.stdout.take()?.read_to_string(&mut out).ok()?;
                let out = out.trim();
                return if out.is_empty() { None } else { Some(out.to_string()) };
            }
            None => {
                if start.elapsed() > GIT_TIMEOUT {
                    let _ = child.kill();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_row_and_resolves_by_name_alias_and_dir_name() {
        let reg = LanguageRegistry::from_catalog(
            "Rust\trs\tLanguage\t.rs\t\thttps://github.com/rust-lang/rust\trust-lang\n",
        )
        .unwrap();

        let by_name = reg.resolve("Rust").unwrap();
        assert_eq!(by_name.extensions, vec![".rs".to_string()]);
        assert!(reg.resolve("rs").is_some());
        assert!(reg.resolve("rust-lang").is_some());
    }

    #[test]
    fn missing_trailing_fields_are_empty() {
        let reg = LanguageRegistry::from_catalog("Foo\n").unwrap();
        let e = reg.resolve("Foo").unwrap();
        assert!(e.aliases.is_empty());
        assert!(e.extensions.is_empty());
        assert!(e.dir_name.is_none());
    }

    #[test]
    fn extension_can_map_to_multiple_languages_in_order() {
        let reg = LanguageRegistry::from_catalog(
            "C\t\tLanguage\t.h\t\t\t\nC++\t\tLanguage\t.h\t\t\t\n",
        )
        .unwrap();
        let langs = reg.languages_for_extension(".h");
        assert_eq!(langs.len(), 2);
        assert_eq!(langs[0].name, "C");
        assert_eq!(langs[1].name, "C++");
    }

    #[test]
    fn version_resolution_on_non_repo_dir_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_version(dir.path()), "unknown");
    }

    #[test]
    fn empty_name_row_is_rejected() {
        let err = LanguageRegistry::from_catalog("\t\t\t\t\t\t\nReal\n");
        assert!(err.is_ok(), "blank lines must be skipped, not rejected");
    }
}
