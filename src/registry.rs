//! Definition registry
//!
//! Scans a directory for parametric-geometry definition files and exposes
//! lookup by name or content-hash id. The id doubles as a cache-busting
//! signal: editing a definition file rotates its hash, which rotates every
//! cache key derived from it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::Result;

/// Preferred definition file extension
const PRIMARY_EXTENSION: &str = "gh";
/// Fallback extension, only registered when no primary file shares the base name
const SECONDARY_EXTENSION: &str = "ghx";

/// A registered geometry definition
#[derive(Debug, Clone)]
pub struct Definition {
    /// File name including extension, e.g. `box.gh`
    pub name: String,
    /// SHA-256 hex digest of the file contents
    pub id: String,
    /// Location on disk
    pub path: PathBuf,
}

impl Definition {
    /// Read the definition bytes from disk.
    ///
    /// Always reads fresh so that a hot-edited file reaches the backend
    /// without a process restart.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }
}

/// Registry of definitions found in the configured directory
pub struct DefinitionRegistry {
    /// Directory scanned for definition files
    directory: PathBuf,
    /// Definitions from the most recent scan
    definitions: RwLock<Vec<Arc<Definition>>>,
}

impl DefinitionRegistry {
    /// Create a registry over a directory. No scan happens until
    /// [`DefinitionRegistry::scan`] is called.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            definitions: RwLock::new(Vec::new()),
        }
    }

    /// Scan the directory and replace the registered set.
    ///
    /// A missing directory yields an empty set rather than an error, so a
    /// gateway can boot before its definitions are deployed.
    pub fn scan(&self) -> Vec<Arc<Definition>> {
        let found = scan_directory(&self.directory);
        info!(
            directory = %self.directory.display(),
            count = found.len(),
            "Scanned definition directory"
        );
        let found: Vec<Arc<Definition>> = found.into_iter().map(Arc::new).collect();
        *self.definitions.write() = found.clone();
        found
    }

    /// All currently registered definitions
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Definition>> {
        self.definitions.read().clone()
    }

    /// Whether the registry currently holds no definitions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.read().is_empty()
    }

    /// Drop all registered definitions (the next lookup path re-scans)
    pub fn clear(&self) {
        self.definitions.write().clear();
    }

    /// Look up a definition by file name
    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<Definition>> {
        self.definitions
            .read()
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    /// Look up a definition by content-hash id
    #[must_use]
    pub fn lookup_by_id(&self, id: &str) -> Option<Arc<Definition>> {
        self.definitions
            .read()
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }
}

/// Walk the directory and build the definition set.
///
/// Files are grouped by base name; when both `foo.gh` and `foo.ghx` exist
/// only the `gh` file is registered.
fn scan_directory(directory: &Path) -> Vec<Definition> {
    if !directory.is_dir() {
        warn!(directory = %directory.display(), "Definition directory missing, registry empty");
        return Vec::new();
    }

    let mut primaries: Vec<PathBuf> = Vec::new();
    let mut secondaries: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(directory)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        match path.extension().and_then(|e| e.to_str()) {
            Some(PRIMARY_EXTENSION) => primaries.push(path),
            Some(SECONDARY_EXTENSION) => secondaries.push(path),
            _ => {}
        }
    }

    let primary_stems: Vec<String> = primaries
        .iter()
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(String::from))
        .collect();

    // Keep a ghx only when no gh shares its stem
    let chosen = primaries.into_iter().chain(
        secondaries
            .into_iter()
            .filter(|p| {
                let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                !primary_stems.iter().any(|s| s == stem)
            }),
    );

    let mut definitions = Vec::new();
    for path in chosen {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        match std::fs::read(&path) {
            Ok(bytes) => {
                let id = content_hash(&bytes);
                debug!(definition = %name, id = %id, "Registered definition");
                definitions.push(Definition { name, id, path });
            }
            Err(e) => {
                warn!(definition = %name, error = %e, "Skipping unreadable definition file");
            }
        }
    }

    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    definitions
}

/// SHA-256 hex digest of definition bytes
fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_definition(dir: &Path, name: &str, contents: &[u8]) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_scan_missing_directory_is_empty() {
        let registry = DefinitionRegistry::new("/nonexistent/definitions");
        assert!(registry.scan().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_extension_preference() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "box.gh", b"binary gh payload");
        write_definition(dir.path(), "box.ghx", b"<xml payload/>");
        write_definition(dir.path(), "lamp.ghx", b"<xml only/>");

        let registry = DefinitionRegistry::new(dir.path());
        let found = registry.scan();

        let names: Vec<&str> = found.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["box.gh", "lamp.ghx"]);
    }

    #[test]
    fn test_id_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "box.gh", b"v1");

        let registry = DefinitionRegistry::new(dir.path());
        let first = registry.scan()[0].id.clone();

        write_definition(dir.path(), "box.gh", b"v2");
        let second = registry.scan()[0].id.clone();

        assert_ne!(first, second);
    }

    #[test]
    fn test_lookup() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "box.gh", b"payload");

        let registry = DefinitionRegistry::new(dir.path());
        registry.scan();

        let by_name = registry.lookup_by_name("box.gh").unwrap();
        let by_id = registry.lookup_by_id(&by_name.id).unwrap();
        assert_eq!(by_name.name, by_id.name);
        assert!(registry.lookup_by_name("missing.gh").is_none());
    }

    #[test]
    fn test_ignores_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        write_definition(dir.path(), "notes.txt", b"not a definition");
        write_definition(dir.path(), "box.gh", b"payload");

        let registry = DefinitionRegistry::new(dir.path());
        assert_eq!(registry.scan().len(), 1);
    }
}
