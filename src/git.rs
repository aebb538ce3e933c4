//! Content Repository
//!
//! The commit-log contract: `commit(message, paths) -> hash`, idempotent
//! over identical content. The in-memory backend content-addresses
//! commits over the working tree; the git2 backend (feature `git`)
//! commits against a real repository.

use crate::fs::WorkingTree;
use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Record the given paths with a message; returns the commit hash.
    /// Committing identical content again returns the same hash without
    /// creating a new commit.
    async fn commit(&self, message: &str, paths: &[String]) -> Result<String>;
}

/// One entry in the in-memory commit log.
#[derive(Debug, Clone)]
pub struct CommitEntry {
    pub hash: String,
    pub message: String,
    pub paths: Vec<String>,
    /// Fingerprint of (message, paths, contents); identical re-commits
    /// are detected against this.
    content_hash: String,
}

/// In-memory commit log over a working tree. Hashes are content-derived,
/// chained on the previous commit, so identical re-commits collapse.
pub struct MemoryContentRepository {
    tree: Arc<dyn WorkingTree>,
    log: Mutex<Vec<CommitEntry>>,
    fail_next: std::sync::atomic::AtomicBool,
}

impl MemoryContentRepository {
    pub fn new(tree: Arc<dyn WorkingTree>) -> Self {
        Self {
            tree,
            log: Mutex::new(Vec::new()),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Make the next commit fail. Test hook for commit-failure scenarios.
    pub fn fail_next_commit(&self) {
        self.fail_next
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn commits(&self) -> Vec<CommitEntry> {
        self.log.lock().await.clone()
    }
}

#[async_trait]
impl ContentRepository for MemoryContentRepository {
    async fn commit(&self, message: &str, paths: &[String]) -> Result<String> {
        if self
            .fail_next
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            anyhow::bail!("content repository unavailable");
        }

        let mut hasher = Sha256::new();
        hasher.update(message.as_bytes());
        for path in paths {
            hasher.update(b"\0");
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            if let Some(content) = self.tree.read_file(path).await? {
                hasher.update(content.as_bytes());
            }
        }
        let content_hash = hex::encode(hasher.finalize());

        let mut log = self.log.lock().await;
        // Identical content on top of the same tip is a no-op.
        if let Some(previous) = log.last() {
            if previous.content_hash == content_hash {
                return Ok(previous.hash.clone());
            }
        }

        let mut id_hasher = Sha256::new();
        if let Some(previous) = log.last() {
            id_hasher.update(previous.hash.as_bytes());
        }
        id_hasher.update(content_hash.as_bytes());
        let hash = hex::encode(id_hasher.finalize());

        log.push(CommitEntry {
            hash: hash.clone(),
            message: message.to_string(),
            paths: paths.to_vec(),
            content_hash,
        });
        tracing::debug!(message, paths = ?paths, "recorded commit");
        Ok(hash)
    }
}

#[cfg(feature = "git")]
pub use git_backend::GitContentRepository;

#[cfg(feature = "git")]
mod git_backend {
    use super::*;
    use std::path::{Path, PathBuf};

    /// git2-backed content repository. Commits go to HEAD of the
    /// repository at the data root; an unchanged index returns the
    /// current HEAD id, keeping commits idempotent over identical
    /// content.
    pub struct GitContentRepository {
        repo_path: PathBuf,
        author_name: String,
        author_email: String,
    }

    impl GitContentRepository {
        pub fn new(
            repo_path: impl Into<PathBuf>,
            author_name: impl Into<String>,
            author_email: impl Into<String>,
        ) -> Self {
            Self {
                repo_path: repo_path.into(),
                author_name: author_name.into(),
                author_email: author_email.into(),
            }
        }

        fn commit_sync(&self, message: &str, paths: &[String]) -> Result<String> {
            let repo = git2::Repository::open(&self.repo_path)?;
            let mut index = repo.index()?;
            for path in paths {
                let on_disk = self.repo_path.join(path);
                if on_disk.exists() {
                    index.add_path(Path::new(path))?;
                } else {
                    // A moved or deleted source path.
                    let _ = index.remove_path(Path::new(path));
                }
            }
            index.write()?;
            let tree_id = index.write_tree()?;
            let tree = repo.find_tree(tree_id)?;

            let parent = match repo.head() {
                Ok(head) => Some(head.peel_to_commit()?),
                Err(_) => None,
            };
            if let Some(parent) = &parent {
                if parent.tree_id() == tree_id {
                    return Ok(parent.id().to_string());
                }
            }

            let signature =
                git2::Signature::now(&self.author_name, &self.author_email)?;
            let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
            let commit_id = repo.commit(
                Some("HEAD"),
                &signature,
                &signature,
                message,
                &tree,
                &parents,
            )?;
            Ok(commit_id.to_string())
        }
    }

    #[async_trait]
    impl ContentRepository for GitContentRepository {
        async fn commit(&self, message: &str, paths: &[String]) -> Result<String> {
            // libgit2 is blocking; keep it off the async workers.
            let repo = Self {
                repo_path: self.repo_path.clone(),
                author_name: self.author_name.clone(),
                author_email: self.author_email.clone(),
            };
            let message = message.to_string();
            let paths = paths.to_vec();
            tokio::task::spawn_blocking(move || repo.commit_sync(&message, &paths))
                .await?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryWorkingTree;

    #[tokio::test]
    async fn test_commit_is_idempotent_over_identical_content() {
        let tree = Arc::new(MemoryWorkingTree::new());
        tree.write_file("records/policy/p.md", "v1").await.unwrap();
        let repo = MemoryContentRepository::new(tree.clone());

        let first = repo
            .commit("Create record: P", &["records/policy/p.md".to_string()])
            .await
            .unwrap();
        let second = repo
            .commit("Create record: P", &["records/policy/p.md".to_string()])
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.commits().await.len(), 1);

        tree.write_file("records/policy/p.md", "v2").await.unwrap();
        let third = repo
            .commit("Update record: P", &["records/policy/p.md".to_string()])
            .await
            .unwrap();
        assert_ne!(second, third);
        assert_eq!(repo.commits().await.len(), 2);
    }

    #[tokio::test]
    async fn test_fail_next_commit() {
        let tree = Arc::new(MemoryWorkingTree::new());
        let repo = MemoryContentRepository::new(tree);
        repo.fail_next_commit();
        assert!(repo.commit("boom", &[]).await.is_err());
        // Recovers afterwards.
        assert!(repo.commit("fine", &[]).await.is_ok());
    }
}
