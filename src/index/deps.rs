// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dependency search
//!
//! Reads declared dependencies from manifest files (requirements lists,
//! pyproject tables, lock files) and installed-package metadata, and
//! cross-references them against import sites found by CodeIndex.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::FingerprintCache;
use crate::config::{CodeSearchKind, DepSearchKind, SearchConfig};
use crate::index::code::CodeIndex;
use crate::index::{IndexKind, SearchIndex};
use crate::model::{
    sort_matches, DependencyRecord, DependencySource, Match, MatchKind, SearchResult,
};
use crate::scanner::FileScanner;

const DEPS_CACHE_VERSION: &str = "v1";

/// A dependency declaration as read from one manifest line/entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeclaredDep {
    name: String,
    version: Option<String>,
    source: DependencySource,
    section: Option<String>,
    file: PathBuf,
    line: usize,
    content: String,
}

pub struct DependencyIndex {
    cache: Arc<FingerprintCache>,
}

impl DependencyIndex {
    pub fn new(cache: Arc<FingerprintCache>) -> Self {
        Self { cache }
    }

    pub fn search(&self, config: &SearchConfig) -> Result<SearchResult> {
        let started = Instant::now();
        let pattern = config.compile_pattern()?;

        let mut errors = Vec::new();
        let mut matches = if config.dep_kind == DepSearchKind::Imports {
            let usage = self.import_usage(config)?;
            usage
                .into_iter()
                .filter(|(module, _)| pattern.is_match(module))
                .flat_map(|(_, sites)| sites)
                .collect()
        } else {
            let declared = self.declared(config, &mut errors);
            let used = if config.unused_only {
                Some(
                    self.import_usage(config)?
                        .into_keys()
                        .map(|m| normalize_name(&m))
                        .collect::<std::collections::BTreeSet<_>>(),
                )
            } else {
                None
            };

            declared
                .into_iter()
                .filter(|dep| pattern.is_match(&dep.name))
                .filter(|dep| {
                    used.as_ref()
                        .map_or(true, |used| !used.contains(&normalize_name(&dep.name)))
                })
                .map(|dep| dep.into_match())
                .collect::<Vec<_>>()
        };

        sort_matches(&mut matches);
        let mut result = SearchResult {
            matches,
            errors,
            ..Default::default()
        };
        result.cap(config.max_results);
        result.execution_time = started.elapsed();
        Ok(result)
    }

    /// Declared dependencies joined with their usage sites. An unused
    /// dependency is a record whose `usage_sites` is empty.
    pub fn records(&self, config: &SearchConfig) -> Result<Vec<DependencyRecord>> {
        let pattern = config.compile_pattern()?;
        let mut errors = Vec::new();
        let declared = self.declared(config, &mut errors);
        let usage = self.import_usage(config)?;
        let usage_by_name: BTreeMap<String, Vec<Match>> = usage
            .into_iter()
            .map(|(module, sites)| (normalize_name(&module), sites))
            .collect();
        let installed_versions: BTreeMap<String, String> =
            if config.dep_kind == DepSearchKind::Installed {
                BTreeMap::new()
            } else {
                let mut sink = Vec::new();
                self.scan_installed(config, &mut sink)
                    .into_iter()
                    .filter_map(|dep| {
                        dep.version
                            .as_ref()
                            .map(|v| (normalize_name(&dep.name), v.clone()))
                    })
                    .collect()
            };

        Ok(declared
            .into_iter()
            .filter(|dep| pattern.is_match(&dep.name))
            .map(|dep| {
                let key = normalize_name(&dep.name);
                let usage_sites = usage_by_name.get(&key).cloned().unwrap_or_default();
                let mut record = DependencyRecord {
                    name: dep.name,
                    version: dep.version,
                    source: dep.source,
                    section: dep.section,
                    usage_sites,
                };
                let outdated = match (record.version.as_deref(), installed_versions.get(&key)) {
                    (Some(declared_version), Some(installed)) => {
                        compare_versions(installed, declared_version) == Some(Ordering::Less)
                    }
                    _ => false,
                };
                if outdated {
                    if let Some(installed) = installed_versions.get(&key) {
                        record.version = record
                            .version
                            .map(|v| format!("{} (installed {})", v, installed));
                    }
                }
                record
            })
            .collect())
    }

    fn declared(&self, config: &SearchConfig, errors: &mut Vec<String>) -> Vec<DeclaredDep> {
        match config.dep_kind {
            DepSearchKind::Requirements => self.scan_requirements(config, errors),
            DepSearchKind::Pyproject => self.scan_pyproject(config, errors),
            DepSearchKind::Lockfile => self.scan_lockfiles(config, errors),
            DepSearchKind::Installed => self.scan_installed(config, errors),
            DepSearchKind::Imports => Vec::new(),
        }
    }

    fn manifest_files(&self, config: &SearchConfig, wanted: fn(&str) -> bool) -> Vec<PathBuf> {
        FileScanner::with_excludes(&config.root, config.exclude.clone())
            .with_hidden(config.include_hidden)
            .list_files()
            .unwrap_or_default()
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(wanted)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Parse one manifest through the fingerprint cache.
    fn parse_cached(
        &self,
        config: &SearchConfig,
        path: &Path,
        parse: impl Fn(&str, &Path) -> Vec<DeclaredDep>,
        errors: &mut Vec<String>,
    ) -> Vec<DeclaredDep> {
        let key = format!("deps:{}:{}", DEPS_CACHE_VERSION, path.display());
        if config.cache_enabled {
            if let Some(cached) = self.cache.get_json::<Vec<DeclaredDep>>(&key) {
                return cached;
            }
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                errors.push(format!("{}: {}", path.display(), e));
                return Vec::new();
            }
        };
        let deps = parse(&content, path);
        if config.cache_enabled {
            self.cache.set_json(&key, &deps, &[path]);
        }
        deps
    }

    fn scan_requirements(
        &self,
        config: &SearchConfig,
        errors: &mut Vec<String>,
    ) -> Vec<DeclaredDep> {
        self.manifest_files(config, |name| {
            name.starts_with("requirements") && name.ends_with(".txt")
        })
        .iter()
        .flat_map(|path| self.parse_cached(config, path, parse_requirements, errors))
        .collect()
    }

    fn scan_pyproject(&self, config: &SearchConfig, errors: &mut Vec<String>) -> Vec<DeclaredDep> {
        self.manifest_files(config, |name| name == "pyproject.toml")
            .iter()
            .flat_map(|path| self.parse_cached(config, path, parse_pyproject, errors))
            .collect()
    }

    fn scan_lockfiles(&self, config: &SearchConfig, errors: &mut Vec<String>) -> Vec<DeclaredDep> {
        self.manifest_files(config, |name| name == "poetry.lock" || name == "uv.lock")
            .iter()
            .flat_map(|path| self.parse_cached(config, path, parse_lockfile, errors))
            .collect()
    }

    /// Read-only scan of installed-package metadata (`*.dist-info/METADATA`)
    /// below the root. The package manager itself is never invoked.
    fn scan_installed(&self, config: &SearchConfig, errors: &mut Vec<String>) -> Vec<DeclaredDep> {
        const PRUNED: &[&str] = &[".git", "node_modules", "target", "__pycache__", ".scour"];

        let mut deps = Vec::new();
        let walker = walkdir::WalkDir::new(&config.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !PRUNED.contains(&name))
                    .unwrap_or(true)
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(dir_name) = entry.file_name().to_str() else {
                continue;
            };
            if !dir_name.ends_with(".dist-info") {
                continue;
            }
            let metadata_path = entry.path().join("METADATA");
            match std::fs::read_to_string(&metadata_path) {
                Ok(content) => {
                    if let Some(dep) = parse_dist_info(&content, &metadata_path) {
                        deps.push(dep);
                    }
                }
                Err(e) => errors.push(format!("{}: {}", metadata_path.display(), e)),
            }
        }
        deps
    }

    /// All import sites under the root, grouped by root module name.
    fn import_usage(&self, config: &SearchConfig) -> Result<BTreeMap<String, Vec<Match>>> {
        let mut import_config = config.clone();
        import_config.pattern = String::new();
        import_config.literal = false;
        import_config.exact_match = false;
        import_config.whole_word = false;
        import_config.code_kind = CodeSearchKind::Import;
        import_config.max_results = usize::MAX;

        let result = CodeIndex::new(Arc::clone(&self.cache)).search(&import_config)?;
        let mut usage: BTreeMap<String, Vec<Match>> = BTreeMap::new();
        for m in result.matches {
            if m.kind != MatchKind::Import {
                continue;
            }
            let Some(module) = m.metadata.get("module").cloned() else {
                continue;
            };
            if module.is_empty() {
                // Relative imports carry no package root.
                continue;
            }
            usage.entry(module).or_default().push(m);
        }
        Ok(usage)
    }
}

impl SearchIndex for DependencyIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Dependency
    }

    fn search(&self, config: &SearchConfig) -> Result<SearchResult> {
        DependencyIndex::search(self, config)
    }
}

impl DeclaredDep {
    fn into_match(self) -> Match {
        let mut m = Match::new(self.file, self.line.max(1), MatchKind::Import, self.content);
        m.name = Some(self.name);
        m.metadata.insert("source".into(), self.source.to_string());
        if let Some(version) = self.version {
            m.metadata.insert("version".into(), version);
        }
        if let Some(section) = self.section {
            m.metadata.insert("section".into(), section);
        }
        m
    }
}

/// Package names compare case-insensitively with `-`/`_` folded.
fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase().replace('-', "_")
}

/// Naive dotted-numeric comparison; `None` when either side is not numeric.
fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    let parse = |v: &str| -> Option<Vec<u64>> {
        v.trim()
            .trim_start_matches(['=', '>', '<', '~', '^', '!'])
            .split('.')
            .map(|part| part.trim().parse::<u64>().ok())
            .collect()
    };
    let a = parse(a)?;
    let b = parse(b)?;
    Some(a.cmp(&b))
}

/// PEP 508-ish requirement line: `name[extras] spec ; marker`.
fn parse_requirement_entry(raw: &str) -> Option<(String, Option<String>)> {
    let line = raw.split('#').next().unwrap_or("").trim();
    let line = line.split(';').next().unwrap_or("").trim();
    if line.is_empty() || line.starts_with('-') || line.contains("://") {
        return None;
    }

    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if name.is_empty() {
        return None;
    }

    let rest = line[name_end..].trim_start_matches(|c: char| c == '[');
    let rest = match rest.find(']') {
        Some(idx) => &rest[idx + 1..],
        None => &line[name_end..],
    };
    let spec = rest.trim();
    let version = if spec.is_empty() {
        None
    } else if let Some(exact) = spec.strip_prefix("==") {
        Some(exact.trim().to_string())
    } else {
        Some(spec.to_string())
    };
    Some((name.to_string(), version))
}

fn parse_requirements(content: &str, path: &Path) -> Vec<DeclaredDep> {
    let section = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string());
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            parse_requirement_entry(line).map(|(name, version)| DeclaredDep {
                name,
                version,
                source: DependencySource::Requirements,
                section: section.clone(),
                file: path.to_path_buf(),
                line: index + 1,
                content: line.trim().to_string(),
            })
        })
        .collect()
}

/// First line mentioning `needle`, for manifests parsed without spans.
fn find_line(content: &str, needle: &str) -> usize {
    content
        .lines()
        .position(|line| line.contains(needle))
        .map(|idx| idx + 1)
        .unwrap_or(1)
}

fn parse_pyproject(content: &str, path: &Path) -> Vec<DeclaredDep> {
    let Ok(value) = content.parse::<toml::Value>() else {
        return Vec::new();
    };
    let mut deps = Vec::new();

    {
        let mut push_pep508 = |entries: &[toml::Value], section: &str| {
            for entry in entries {
                let Some(raw) = entry.as_str() else { continue };
                if let Some((name, version)) = parse_requirement_entry(raw) {
                    deps.push(DeclaredDep {
                        line: find_line(content, &name),
                        name,
                        version,
                        source: DependencySource::Pyproject,
                        section: Some(section.to_string()),
                        file: path.to_path_buf(),
                        content: raw.trim().to_string(),
                    });
                }
            }
        };

        if let Some(project) = value.get("project") {
            if let Some(list) = project.get("dependencies").and_then(|d| d.as_array()) {
                push_pep508(list, "project");
            }
            if let Some(groups) = project
                .get("optional-dependencies")
                .and_then(|d| d.as_table())
            {
                for (group, list) in groups {
                    if let Some(list) = list.as_array() {
                        push_pep508(list, group);
                    }
                }
            }
        }
    }

    {
        let mut push_poetry = |table: &toml::value::Table, section: &str| {
            for (name, spec) in table {
                if name == "python" {
                    continue;
                }
                let version = match spec {
                    toml::Value::String(v) => Some(v.clone()),
                    toml::Value::Table(t) => t
                        .get("version")
                        .and_then(|v| v.as_str())
                        .map(|v| v.to_string()),
                    _ => None,
                };
                deps.push(DeclaredDep {
                    name: name.clone(),
                    version,
                    source: DependencySource::Pyproject,
                    section: Some(section.to_string()),
                    file: path.to_path_buf(),
                    line: find_line(content, name),
                    content: name.clone(),
                });
            }
        };

        if let Some(poetry) = value.get("tool").and_then(|t| t.get("poetry")) {
            if let Some(table) = poetry.get("dependencies").and_then(|d| d.as_table()) {
                push_poetry(table, "tool.poetry");
            }
            if let Some(groups) = poetry.get("group").and_then(|g| g.as_table()) {
                for (group, body) in groups {
                    if let Some(table) = body.get("dependencies").and_then(|d| d.as_table()) {
                        push_poetry(table, group);
                    }
                }
            }
        }
    }

    deps
}

fn parse_lockfile(content: &str, path: &Path) -> Vec<DeclaredDep> {
    let Ok(value) = content.parse::<toml::Value>() else {
        return Vec::new();
    };
    let Some(packages) = value.get("package").and_then(|p| p.as_array()) else {
        return Vec::new();
    };
    packages
        .iter()
        .filter_map(|package| {
            let name = package.get("name")?.as_str()?.to_string();
            let version = package
                .get("version")
                .and_then(|v| v.as_str())
                .map(|v| v.to_string());
            Some(DeclaredDep {
                line: find_line(content, &format!("name = \"{}\"", name)),
                content: match &version {
                    Some(v) => format!("{} {}", name, v),
                    None => name.clone(),
                },
                name,
                version,
                source: DependencySource::Lockfile,
                section: None,
                file: path.to_path_buf(),
            })
        })
        .collect()
}

fn parse_dist_info(content: &str, path: &Path) -> Option<DeclaredDep> {
    let mut name = None;
    let mut version = None;
    for line in content.lines() {
        if line.is_empty() {
            // End of the headers block.
            break;
        }
        if let Some(value) = line.strip_prefix("Name:") {
            name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Version:") {
            version = Some(value.trim().to_string());
        }
    }
    let name = name?;
    Some(DeclaredDep {
        content: match &version {
            Some(v) => format!("{} {}", name, v),
            None => name.clone(),
        },
        name,
        version,
        source: DependencySource::Installed,
        section: None,
        file: path.to_path_buf(),
        line: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requirement_entry_variants() {
        assert_eq!(
            parse_requirement_entry("requests==2.31.0"),
            Some(("requests".into(), Some("2.31.0".into())))
        );
        assert_eq!(
            parse_requirement_entry("uvicorn[standard]>=0.23 ; python_version > '3.8'"),
            Some(("uvicorn".into(), Some(">=0.23".into())))
        );
        assert_eq!(parse_requirement_entry("flask"), Some(("flask".into(), None)));
        assert_eq!(parse_requirement_entry("# comment"), None);
        assert_eq!(parse_requirement_entry("-r base.txt"), None);
        assert_eq!(
            parse_requirement_entry("git+https://example.com/repo.git"),
            None
        );
    }

    #[test]
    fn test_parse_pyproject_sections() {
        let content = r#"
[project]
dependencies = ["requests>=2.0", "click==8.1.7"]

[project.optional-dependencies]
dev = ["pytest"]

[tool.poetry.dependencies]
python = "^3.11"
httpx = "0.27"

[tool.poetry.group.test.dependencies]
coverage = { version = "7.4" }
"#;
        let deps = parse_pyproject(content, Path::new("pyproject.toml"));
        let find = |name: &str| deps.iter().find(|d| d.name == name).unwrap();
        assert_eq!(find("requests").section.as_deref(), Some("project"));
        assert_eq!(find("pytest").section.as_deref(), Some("dev"));
        assert_eq!(find("httpx").section.as_deref(), Some("tool.poetry"));
        assert_eq!(find("coverage").section.as_deref(), Some("test"));
        assert_eq!(find("coverage").version.as_deref(), Some("7.4"));
        assert!(!deps.iter().any(|d| d.name == "python"));
    }

    #[test]
    fn test_parse_lockfile_packages() {
        let content = r#"
[[package]]
name = "requests"
version = "2.31.0"

[[package]]
name = "idna"
version = "3.6"
"#;
        let deps = parse_lockfile(content, Path::new("poetry.lock"));
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[0].version.as_deref(), Some("2.31.0"));
        assert_eq!(deps[0].line, 3);
    }

    #[test]
    fn test_parse_dist_info_headers() {
        let content = "Metadata-Version: 2.1\nName: charset-normalizer\nVersion: 3.3.2\n\nBody text Name: decoy\n";
        let dep = parse_dist_info(content, Path::new("METADATA")).unwrap();
        assert_eq!(dep.name, "charset-normalizer");
        assert_eq!(dep.version.as_deref(), Some("3.3.2"));
    }

    #[test]
    fn test_normalize_name_folds_dashes() {
        assert_eq!(normalize_name("Charset-Normalizer"), "charset_normalizer");
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.2.3", "1.10.0"), Some(Ordering::Less));
        assert_eq!(compare_versions("2.0", "2.0"), Some(Ordering::Equal));
        assert_eq!(compare_versions(">=1.5", "1.4"), Some(Ordering::Greater));
        assert_eq!(compare_versions("1.2.post1", "1.2"), None);
    }
}
