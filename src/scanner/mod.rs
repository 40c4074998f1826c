//! File scanner for discovering and filtering workspace source files.
//!
//! Respects the configured extensions, excludes, file size and file count
//! limits, and an optional path scope inside the workspace.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Configuration for file scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to include (e.g., ["rs", "py", "ts"])
    pub extensions: Vec<String>,
    /// Directory or file names to skip (e.g., ["node_modules", "target"])
    pub excludes: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: usize,
    /// Maximum number of files to scan
    pub max_files: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from(&crate::config::ScannerConfig::default())
    }
}

impl From<&crate::config::ScannerConfig> for ScanConfig {
    fn from(config: &crate::config::ScannerConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            excludes: config.excludes.clone(),
            max_file_size: config.max_file_size,
            max_files: Some(config.max_files),
        }
    }
}

/// Scanned file information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Path relative to the workspace root, `/`-separated
    pub path: String,
    /// File size in bytes
    pub size: u64,
}

/// A matching file whose contents could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// File contents keyed by relative path, plus the files that failed to read.
#[derive(Debug, Clone, Default)]
pub struct CollectedFiles {
    pub contents: BTreeMap<String, String>,
    pub skipped: Vec<SkippedFile>,
}

/// File scanner for discovering source files.
pub struct FileScanner {
    config: ScanConfig,
    root: PathBuf,
    scope: Vec<PathBuf>,
}

impl FileScanner {
    /// Create a scanner over the whole workspace.
    pub fn new(root: PathBuf, config: ScanConfig) -> Self {
        Self {
            config,
            root,
            scope: Vec::new(),
        }
    }

    /// Limit the scan to these files or directories. Relative paths resolve
    /// against the workspace root; an empty list means the whole workspace.
    pub fn with_scope(mut self, paths: &[PathBuf]) -> Self {
        self.scope = paths
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    self.root.join(p)
                }
            })
            .collect();
        self
    }

    /// Scan for all matching files, sorted by path.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        if !self.root.is_dir() {
            anyhow::bail!("Workspace not found: {}", self.root.display());
        }

        let starts = if self.scope.is_empty() {
            vec![self.root.clone()]
        } else {
            self.scope.clone()
        };

        let mut seen = BTreeSet::new();
        let mut files = Vec::new();

        for start in starts {
            if !start.exists() {
                warn!("Scan path does not exist: {}", start.display());
                continue;
            }
            if !self.is_within_root(&start) {
                warn!("Skipping path outside workspace: {}", start.display());
                continue;
            }
            self.walk(&start, &mut seen, &mut files);
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));

        // Apply max_files limit if set
        if let Some(max) = self.config.max_files {
            if files.len() > max {
                debug!("Truncating scan from {} to {} files", files.len(), max);
                files.truncate(max);
            }
        }

        Ok(files)
    }

    /// Collect all matching files with their contents, keyed by relative path.
    ///
    /// Invalid UTF-8 is replaced rather than rejected. Files that cannot be
    /// read at all are reported in `skipped`.
    pub fn collect_files(&self) -> Result<CollectedFiles> {
        let scanned = self.scan().context("Failed to scan workspace")?;
        let mut collected = CollectedFiles::default();
        let mut bytes_read = 0;

        for file in scanned {
            let full_path = self.root.join(&file.path);
            match fs::read(&full_path) {
                Ok(bytes) => {
                    bytes_read += file.size;
                    let content = String::from_utf8_lossy(&bytes).into_owned();
                    collected.contents.insert(file.path, content);
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", file.path, e);
                    collected.skipped.push(SkippedFile {
                        path: file.path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            "Read {} file(s), {} bytes",
            collected.contents.len(),
            bytes_read
        );
        Ok(collected)
    }

    /// Check if a file matches scan criteria.
    fn matches(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !self.config.extensions.iter().any(|e| e == ext) {
            return false;
        }

        match fs::metadata(path) {
            Ok(metadata) => metadata.len() <= self.config.max_file_size as u64,
            Err(_) => false,
        }
    }

    fn walk(&self, start: &Path, seen: &mut BTreeSet<PathBuf>, files: &mut Vec<ScannedFile>) {
        let walker = WalkDir::new(start)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !self.is_excluded(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file() || !self.matches(path) {
                continue;
            }
            if !seen.insert(path.to_path_buf()) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);

            files.push(ScannedFile {
                path: self.relative(path),
                size,
            });
        }
    }

    /// Path relative to the root with `/` separators.
    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Check if a name matches exclusion patterns.
    fn is_excluded(&self, name: &str) -> bool {
        // Hidden files
        if name.starts_with('.') {
            return true;
        }

        self.config.excludes.iter().any(|pattern| name == pattern)
    }

    /// Check if a path is within the workspace root.
    fn is_within_root(&self, path: &Path) -> bool {
        // Canonicalize to handle symlinks and ..
        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        path.starts_with(root)
    }
}

/// Language family of a source file, by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    JavaScript,
    Python,
    Rust,
    /// C-like comment syntax without symbol extraction.
    CLike,
    Other,
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        match ext {
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => Language::JavaScript,
            "py" => Language::Python,
            "rs" => Language::Rust,
            "go" | "java" | "c" | "cpp" | "h" | "hpp" | "cs" | "swift" | "kt" | "scala" => {
                Language::CLike
            }
            _ => Language::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join(".hidden")).unwrap();
        fs::write(root.join("src/a.ts"), "export const a = 1;").unwrap();
        fs::write(root.join("src/nested/b.py"), "def b(): pass").unwrap();
        fs::write(root.join("src/notes.txt"), "not code").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        fs::write(root.join(".hidden/c.rs"), "fn c() {}").unwrap();
        dir
    }

    fn paths(files: &[ScannedFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = workspace();
        let scanner = FileScanner::new(dir.path().to_path_buf(), ScanConfig::default());
        let files = scanner.scan().unwrap();

        assert_eq!(paths(&files), vec!["src/a.ts", "src/nested/b.py"]);
        assert_eq!(files[0].size, 19);
    }

    #[test]
    fn test_scope_and_limits() {
        let dir = workspace();
        let scanner = FileScanner::new(dir.path().to_path_buf(), ScanConfig::default())
            .with_scope(&[PathBuf::from("src/nested"), PathBuf::from("missing")]);
        assert_eq!(paths(&scanner.scan().unwrap()), vec!["src/nested/b.py"]);

        let config = ScanConfig {
            max_files: Some(1),
            ..ScanConfig::default()
        };
        let scanner = FileScanner::new(dir.path().to_path_buf(), config);
        assert_eq!(scanner.scan().unwrap().len(), 1);

        let config = ScanConfig {
            max_file_size: 5,
            ..ScanConfig::default()
        };
        let scanner = FileScanner::new(dir.path().to_path_buf(), config);
        assert!(scanner.scan().unwrap().is_empty());
    }

    #[test]
    fn test_collect_files_reads_contents() {
        let dir = workspace();
        let scanner = FileScanner::new(dir.path().to_path_buf(), ScanConfig::default());
        let files = scanner.collect_files().unwrap();

        assert_eq!(
            files.contents.get("src/a.ts").map(String::as_str),
            Some("export const a = 1;")
        );
        assert_eq!(files.contents.len(), 2);
        assert!(files.skipped.is_empty());
    }

    #[test]
    fn test_collect_files_keeps_non_utf8_text() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.ts"), b"// caf\xe9\nhelper();\n").unwrap();

        let scanner = FileScanner::new(dir.path().to_path_buf(), ScanConfig::default());
        let files = scanner.collect_files().unwrap();

        let content = &files.contents["b.ts"];
        assert!(content.contains("helper();"));
        assert!(content.contains('\u{FFFD}'));
        assert!(files.skipped.is_empty());
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_path("a/b.tsx"), Language::JavaScript);
        assert_eq!(Language::from_path("x.py"), Language::Python);
        assert_eq!(Language::from_path("lib.rs"), Language::Rust);
        assert_eq!(Language::from_path("main.go"), Language::CLike);
        assert_eq!(Language::from_path("README"), Language::Other);
    }
}
