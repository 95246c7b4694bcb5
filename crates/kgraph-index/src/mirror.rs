//! On-disk mirror of each workspace's files, the source of truth for re-extraction.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{IndexError, Result};

/// Directory segments that are never mirrored or indexed: dependency trees,
/// virtual environments, build output and version-control metadata.
pub const DENYLIST: &[&str] = &[
    "node_modules",
    ".git",
    ".venv",
    "venv",
    "env",
    "ENV",
    "Lib",
    "lib",
    "site-packages",
    "dist",
    "build",
    "out",
    "__pycache__",
    ".python_packages",
];

/// Normalize a caller-supplied relative path.
///
/// Backslashes become `/`, leading `./` and `/` are stripped and `.` segments
/// dropped. Returns `None` for empty paths, `..` traversal, drive-qualified
/// segments and any denylisted segment.
#[must_use]
pub fn normalize_path(raw: &str) -> Option<String> {
    let unified = raw.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s if s.contains(':') || DENYLIST.contains(&s) => return None,
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// Reject workspace ids that are not a single plain path segment.
///
/// # Errors
///
/// Returns [`IndexError::InvalidWorkspace`] for empty ids, ids containing
/// separators or `:`, `.`/`..`, and ids starting with a dot.
pub fn validate_workspace_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\', ':', '\0'])
        && id.trim() == id;
    if ok {
        Ok(())
    } else {
        Err(IndexError::InvalidWorkspace(id.to_string()))
    }
}

/// Workspace file tree rooted at `<root>/<workspace id>/`.
#[derive(Debug, Clone)]
pub struct Mirror {
    root: PathBuf,
}

impl Mirror {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one workspace's files.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidWorkspace`] if the id is not a safe segment.
    pub fn workspace_dir(&self, workspace: &str) -> Result<PathBuf> {
        validate_workspace_id(workspace)?;
        Ok(self.root.join(workspace))
    }

    fn file_path(&self, workspace: &str, rel: &str) -> Result<PathBuf> {
        let dir = self.workspace_dir(workspace)?;
        let rel = normalize_path(rel)
            .ok_or_else(|| IndexError::Other(format!("unsafe path: {rel}")))?;
        Ok(rel.split('/').fold(dir, |acc, seg| acc.join(seg)))
    }

    /// Current content of a mirrored file, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error for unsafe ids/paths or if the file cannot be read.
    pub async fn read(&self, workspace: &str, rel: &str) -> Result<Option<String>> {
        let path = self.file_path(workspace, rel)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite a mirrored file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error for unsafe ids/paths or if the write fails.
    pub async fn write(&self, workspace: &str, rel: &str, content: &str) -> Result<()> {
        let path = self.file_path(workspace, rel)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(())
    }

    /// Remove a mirrored file. Returns `false` if it was already absent.
    ///
    /// # Errors
    ///
    /// Returns an error for unsafe ids/paths or if removal fails.
    pub async fn remove(&self, workspace: &str, rel: &str) -> Result<bool> {
        let path = self.file_path(workspace, rel)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete one workspace's mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists and cannot be removed.
    pub async fn clear(&self, workspace: &str) -> Result<()> {
        remove_tree(&self.workspace_dir(workspace)?).await
    }

    /// Delete every workspace mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if the root exists and cannot be removed.
    pub async fn clear_all(&self) -> Result<()> {
        remove_tree(&self.root).await
    }

    /// Map of relative path to SHA-256 hex digest for every mirrored file.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid id or if the walk task fails.
    pub async fn manifest(&self, workspace: &str) -> Result<BTreeMap<String, String>> {
        let dir = self.workspace_dir(workspace)?;
        let manifest = tokio::task::spawn_blocking(move || walk_manifest(&dir)).await?;
        Ok(manifest)
    }

    /// Mirrored content of `rel`, or an empty string when the file is absent,
    /// unreadable or the path is unsafe.
    pub async fn file_content(&self, workspace: &str, rel: &str) -> String {
        match self.read(workspace, rel).await {
            Ok(Some(content)) => content,
            Ok(None) => String::new(),
            Err(e) => {
                tracing::debug!(workspace, path = rel, "file content unavailable: {e}");
                String::new()
            }
        }
    }
}

async fn remove_tree(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn walk_manifest(dir: &Path) -> BTreeMap<String, String> {
    let mut manifest = BTreeMap::new();
    if !dir.is_dir() {
        return manifest;
    }

    let entries = ignore::WalkBuilder::new(dir)
        .standard_filters(false)
        .build()
        .flatten()
        .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()));

    for entry in entries {
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let Some(key) = normalize_path(&rel.to_string_lossy()) else {
            continue;
        };
        match std::fs::read(entry.path()) {
            Ok(bytes) => {
                manifest.insert(key, format!("{:x}", Sha256::digest(&bytes)));
            }
            Err(e) => tracing::warn!(path = %entry.path().display(), "manifest skip: {e}"),
        }
    }
    manifest
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn normalize_strips_and_unifies() {
        assert_eq!(normalize_path("./src/a.py").as_deref(), Some("src/a.py"));
        assert_eq!(normalize_path("/src//a.py").as_deref(), Some("src/a.py"));
        assert_eq!(normalize_path("src\\pkg\\.\\m.py").as_deref(), Some("src/pkg/m.py"));
    }

    #[test]
    fn normalize_rejects_unsafe() {
        assert!(normalize_path("").is_none());
        assert!(normalize_path("./").is_none());
        assert!(normalize_path("../etc/passwd").is_none());
        assert!(normalize_path("a/../../b").is_none());
        assert!(normalize_path("C:/x.py").is_none());
        assert!(normalize_path("node_modules/react/index.js").is_none());
        assert!(normalize_path("proj/.venv/lib/x.py").is_none());
        assert!(normalize_path("pkg/__pycache__/m.pyc").is_none());
        assert!(normalize_path("build/out.js").is_none());
    }

    #[test]
    fn workspace_ids() {
        assert!(validate_workspace_id("ws1").is_ok());
        assert!(validate_workspace_id("my-project_2").is_ok());
        for bad in ["", ".", "..", ".hidden", "a/b", "a\\b", "c:", " ws"] {
            assert!(
                matches!(validate_workspace_id(bad), Err(IndexError::InvalidWorkspace(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = Mirror::new(dir.path());

        mirror.write("ws", "src/a.py", "x = 1\n").await.unwrap();
        assert_eq!(mirror.read("ws", "./src/a.py").await.unwrap().as_deref(), Some("x = 1\n"));
        assert!(dir.path().join("ws/src/a.py").is_file());

        assert!(mirror.remove("ws", "src/a.py").await.unwrap());
        assert!(!mirror.remove("ws", "src/a.py").await.unwrap());
        assert!(mirror.read("ws", "src/a.py").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_content_is_empty_when_missing_or_unsafe() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = Mirror::new(dir.path());
        mirror.write("ws", "a.py", "pass\n").await.unwrap();

        assert_eq!(mirror.file_content("ws", "a.py").await, "pass\n");
        assert_eq!(mirror.file_content("ws", "missing.py").await, "");
        assert_eq!(mirror.file_content("ws", "../a.py").await, "");
        assert_eq!(mirror.file_content("../ws", "a.py").await, "");
    }

    #[tokio::test]
    async fn manifest_hashes_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = Mirror::new(dir.path());
        mirror.write("ws", "a.py", "abc").await.unwrap();
        mirror.write("ws", "pkg/.hidden.py", "").await.unwrap();

        let manifest = mirror.manifest("ws").await.unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(
            manifest["a.py"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(manifest.contains_key("pkg/.hidden.py"));

        assert!(mirror.manifest("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_is_per_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = Mirror::new(dir.path());
        mirror.write("a", "x.py", "1").await.unwrap();
        mirror.write("b", "x.py", "2").await.unwrap();

        mirror.clear("a").await.unwrap();
        mirror.clear("a").await.unwrap();
        assert!(mirror.manifest("a").await.unwrap().is_empty());
        assert_eq!(mirror.manifest("b").await.unwrap().len(), 1);

        mirror.clear_all().await.unwrap();
        assert!(mirror.manifest("b").await.unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn normalized_paths_are_safe(raw in "[a-z./\\\\:]{0,24}") {
            if let Some(p) = normalize_path(&raw) {
                prop_assert!(!p.is_empty());
                prop_assert!(!p.starts_with('/'));
                prop_assert!(!p.contains('\\'));
                prop_assert!(p.split('/').all(|s| !s.is_empty() && s != "." && s != ".."));
                prop_assert_eq!(normalize_path(&p), Some(p.clone()));
            }
        }
    }
}
