//! Per-project JSON document storage.
//!
//! Each project keeps its generated artifacts as independent JSON documents
//! under `<project>/meta/`. Documents are small and read-modify-written
//! whole; a store-level mutex serializes those cycles so concurrently
//! running batch units cannot lose each other's appends to a shared
//! document.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Document key for chapter summaries.
pub const CHAPTER_SUMMARY: &str = "chapter_summary";
/// Document key for final chapter prose.
pub const NOVEL_TEXT: &str = "novel_text";
/// Document key for the chapter outline.
pub const CHAPTER_OUTLINE: &str = "chapter_outline";
/// Append-only log of critiques per chapter.
pub const CRITIQUES: &str = "critiques";
/// Append-only log of refinement summaries per chapter.
pub const REFINEMENT_HISTORY: &str = "refinement_history";
/// Append-only log of first drafts per chapter.
pub const INITIAL_DRAFTS: &str = "initial_drafts";
/// Append-only log of refined drafts per chapter.
pub const REFINED_DRAFTS: &str = "refined_drafts";

/// Errors from document storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON document store rooted at one project's meta directory.
#[derive(Debug)]
pub struct ProjectStore {
    meta_dir: PathBuf,
    // Serializes read-modify-write cycles across concurrent batch units.
    write_lock: Mutex<()>,
}

impl ProjectStore {
    /// Open (creating if needed) the store under `<project_dir>/meta`.
    pub fn open(project_dir: &Path) -> Result<Self, StoreError> {
        let meta_dir = project_dir.join("meta");
        std::fs::create_dir_all(&meta_dir).map_err(|source| StoreError::Io {
            path: meta_dir.clone(),
            source,
        })?;
        Ok(Self {
            meta_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.meta_dir.join(format!("{}.json", key))
    }

    /// Read a named document. Missing or corrupt files read as an empty
    /// object; corruption is logged, not surfaced.
    pub fn read(&self, key: &str) -> Value {
        let path = self.path_for(key);
        if !path.exists() {
            return json!({});
        }
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("corrupt document {}: {}", path.display(), e);
                    json!({})
                }
            },
            Err(e) => {
                tracing::warn!("failed to read {}: {}", path.display(), e);
                json!({})
            }
        }
    }

    /// Write a named document, replacing any existing content.
    pub async fn write(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_unlocked(key, value)
    }

    // Replace through a temp file and rename so a concurrent reader sees
    // either the old document or the new one, never a partial write.
    fn write_unlocked(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = self.meta_dir.join(format!("{}.json.tmp", key));
        let contents = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, contents).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })?;
        Ok(())
    }

    /// Append an entry to the per-chapter list inside an append-only log
    /// document. The whole read-modify-write cycle holds the store lock.
    pub async fn append_entry(
        &self,
        key: &str,
        chapter_key: &str,
        entry: Value,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read(key);
        if !doc.is_object() {
            doc = json!({});
        }
        if let Some(map) = doc.as_object_mut() {
            let list = map
                .entry(chapter_key.to_string())
                .or_insert_with(|| json!([]));
            if !list.is_array() {
                *list = json!([]);
            }
            if let Some(items) = list.as_array_mut() {
                items.push(entry);
            }
        }
        self.write_unlocked(key, &doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_document_reads_as_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        assert_eq!(store.read("chapter_summary"), json!({}));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();

        let doc = json!({"chapter_1": {"title": "Ashfall", "summary": "..."}});
        store.write(CHAPTER_SUMMARY, &doc).await.unwrap();
        assert_eq!(store.read(CHAPTER_SUMMARY), doc);
    }

    #[tokio::test]
    async fn corrupt_document_reads_as_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("meta/critiques.json"), "not json{").unwrap();
        assert_eq!(store.read(CRITIQUES), json!({}));
    }

    #[tokio::test]
    async fn append_builds_per_chapter_lists() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::open(dir.path()).unwrap();

        store
            .append_entry(INITIAL_DRAFTS, "chapter_1", json!({"content": "draft a"}))
            .await
            .unwrap();
        store
            .append_entry(INITIAL_DRAFTS, "chapter_1", json!({"content": "draft b"}))
            .await
            .unwrap();
        store
            .append_entry(INITIAL_DRAFTS, "chapter_2", json!({"content": "other"}))
            .await
            .unwrap();

        let doc = store.read(INITIAL_DRAFTS);
        assert_eq!(doc["chapter_1"].as_array().unwrap().len(), 2);
        assert_eq!(doc["chapter_2"].as_array().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_see_whole_documents_during_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProjectStore::open(dir.path()).unwrap());

        let body = "x".repeat(64 * 1024);
        store
            .write(NOVEL_TEXT, &json!({"marker": true, "body": body}))
            .await
            .unwrap();

        let writer = {
            let store = store.clone();
            let body = body.clone();
            tokio::spawn(async move {
                for rev in 0..50 {
                    store
                        .write(NOVEL_TEXT, &json!({"marker": true, "body": body, "rev": rev}))
                        .await
                        .unwrap();
                }
            })
        };

        for _ in 0..200 {
            let doc = store.read(NOVEL_TEXT);
            // A read concurrent with a rewrite must still be a whole document.
            assert_eq!(doc["marker"], json!(true));
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("meta"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_document_do_not_lose_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProjectStore::open(dir.path()).unwrap());

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_entry(CRITIQUES, &format!("chapter_{}", i % 4), json!({"n": i}))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let doc = store.read(CRITIQUES);
        let total: usize = doc
            .as_object()
            .unwrap()
            .values()
            .map(|v| v.as_array().unwrap().len())
            .sum();
        assert_eq!(total, 16);
    }
}
