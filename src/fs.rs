//! Working Tree
//!
//! The filesystem contract the file steps consume: create-with-
//! directories writes, atomic rename, unlink, read. Paths are canonical
//! relative paths with forward slashes, validated against traversal and
//! joined to a configured data root by the production backend.

use crate::record::paths::is_safe_relative;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

#[async_trait]
pub trait WorkingTree: Send + Sync {
    /// Write a file, creating parent directories as needed.
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<Option<String>>;

    /// Atomic rename; parent directories of the target are created.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Returns whether a file was removed.
    async fn remove_file(&self, path: &str) -> Result<bool>;

    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Real filesystem backend rooted at a data directory.
pub struct FsWorkingTree {
    root: PathBuf,
}

impl FsWorkingTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if !is_safe_relative(path) {
            return Err(anyhow!("unsafe relative path: '{path}'"));
        }
        let mut full = self.root.clone();
        for segment in path.split('/') {
            full.push(segment);
        }
        Ok(full)
    }
}

#[async_trait]
impl WorkingTree for FsWorkingTree {
    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directories for {path}"))?;
        }
        tokio::fs::write(&full, content)
            .await
            .with_context(|| format!("writing {path}"))
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {path}")),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directories for {to}"))?;
        }
        tokio::fs::rename(&source, &target)
            .await
            .with_context(|| format!("renaming {from} -> {to}"))
    }

    async fn remove_file(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("removing {path}")),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await.unwrap_or(false))
    }
}

/// In-memory working tree for tests and the POC path.
pub struct MemoryWorkingTree {
    files: RwLock<HashMap<String, String>>,
}

impl MemoryWorkingTree {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Every stored path, sorted. Test hook.
    pub async fn paths(&self) -> Vec<String> {
        let r = self.files.read().await;
        let mut paths: Vec<String> = r.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Default for MemoryWorkingTree {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkingTree for MemoryWorkingTree {
    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        if !is_safe_relative(path) {
            return Err(anyhow!("unsafe relative path: '{path}'"));
        }
        let mut w = self.files.write().await;
        w.insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        let r = self.files.read().await;
        Ok(r.get(path).cloned())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        if !is_safe_relative(to) {
            return Err(anyhow!("unsafe relative path: '{to}'"));
        }
        let mut w = self.files.write().await;
        let content = w
            .remove(from)
            .ok_or_else(|| anyhow!("no such file: '{from}'"))?;
        w.insert(to.to_string(), content);
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<bool> {
        let mut w = self.files.write().await;
        Ok(w.remove(path).is_some())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let r = self.files.read().await;
        Ok(r.contains_key(path))
    }
}
