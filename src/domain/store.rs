use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sled::{Batch, Db};
use tracing::debug;

use crate::domain::error::EngineResult;

/// One row of the row-store layout. The wrapper document is the one with
/// `rooted` set; every other document is a tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDocument {
    #[serde(rename = "_id")]
    pub id: u64,
    pub rooted: Option<bool>,
    pub name: Option<String>,
    pub branch_length: Option<f64>,
    pub clades: Vec<u64>,
}

/// Trait for row-store persistence backends.
/// Implementations must be thread-safe (Send + Sync).
pub trait DocumentStore: Send + Sync {
    /// Replace the documents of `collection`.
    fn insert_documents(&self, collection: &str, docs: &[TreeDocument]) -> EngineResult<()>;
    fn load_documents(&self, collection: &str) -> EngineResult<Vec<TreeDocument>>;
    /// Returns whether anything was removed.
    fn remove_collection(&self, collection: &str) -> EngineResult<bool>;
    fn collections(&self) -> EngineResult<Vec<String>>;
}

// ============================================================================
// MemoryDocumentStore - in-process storage using DashMap
// ============================================================================

#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: DashMap<String, Vec<TreeDocument>>,
}

impl DocumentStore for MemoryDocumentStore {
    fn insert_documents(&self, collection: &str, docs: &[TreeDocument]) -> EngineResult<()> {
        self.collections.insert(collection.to_string(), docs.to_vec());
        Ok(())
    }

    fn load_documents(&self, collection: &str) -> EngineResult<Vec<TreeDocument>> {
        Ok(self
            .collections
            .get(collection)
            .map(|r| r.clone())
            .unwrap_or_default())
    }

    fn remove_collection(&self, collection: &str) -> EngineResult<bool> {
        Ok(self.collections.remove(collection).is_some())
    }

    fn collections(&self) -> EngineResult<Vec<String>> {
        let mut names: Vec<String> = self.collections.iter().map(|r| r.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}

// ============================================================================
// DiskDocumentStore - on-disk storage using sled
// ============================================================================

pub struct DiskDocumentStore {
    db: Db,
    documents: sled::Tree,
}

impl DiskDocumentStore {
    pub fn new(path: &str) -> EngineResult<Self> {
        let db = sled::open(path)?;
        let documents = db.open_tree("treestore")?;
        Ok(Self { db, documents })
    }

    fn prefix(collection: &str) -> Vec<u8> {
        let mut key = collection.as_bytes().to_vec();
        key.push(0);
        key
    }

    fn document_key(collection: &str, id: u64) -> Vec<u8> {
        let mut key = Self::prefix(collection);
        key.extend_from_slice(&id.to_be_bytes());
        key
    }

    fn clear(&self, collection: &str, batch: &mut Batch) -> EngineResult<usize> {
        let mut removed = 0;
        for entry in self.documents.scan_prefix(Self::prefix(collection)) {
            let (key, _) = entry?;
            batch.remove(key);
            removed += 1;
        }
        Ok(removed)
    }
}

impl DocumentStore for DiskDocumentStore {
    fn insert_documents(&self, collection: &str, docs: &[TreeDocument]) -> EngineResult<()> {
        let mut batch = Batch::default();
        self.clear(collection, &mut batch)?;
        for doc in docs {
            batch.insert(Self::document_key(collection, doc.id), bincode::serialize(doc)?);
        }
        self.documents.apply_batch(batch)?;
        self.db.flush()?;
        debug!("Stored {} documents in collection '{}'", docs.len(), collection);
        Ok(())
    }

    fn load_documents(&self, collection: &str) -> EngineResult<Vec<TreeDocument>> {
        let mut docs = Vec::new();
        for entry in self.documents.scan_prefix(Self::prefix(collection)) {
            let (_, bytes) = entry?;
            docs.push(bincode::deserialize(&bytes)?);
        }
        Ok(docs)
    }

    fn remove_collection(&self, collection: &str) -> EngineResult<bool> {
        let mut batch = Batch::default();
        let removed = self.clear(collection, &mut batch)?;
        self.documents.apply_batch(batch)?;
        Ok(removed > 0)
    }

    fn collections(&self) -> EngineResult<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for entry in self.documents.iter() {
            let (key, _) = entry?;
            if let Some(end) = key.iter().position(|b| *b == 0) {
                let name = String::from_utf8_lossy(&key[..end]).to_string();
                if names.last() != Some(&name) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_docs() -> Vec<TreeDocument> {
        vec![
            TreeDocument {
                id: 0,
                rooted: Some(true),
                name: None,
                branch_length: None,
                clades: vec![1],
            },
            TreeDocument {
                id: 1,
                rooted: None,
                name: None,
                branch_length: None,
                clades: vec![2, 3],
            },
            TreeDocument {
                id: 2,
                rooted: None,
                name: Some("a".to_string()),
                branch_length: Some(1.0),
                clades: vec![],
            },
            TreeDocument {
                id: 3,
                rooted: None,
                name: Some("b".to_string()),
                branch_length: Some(2.5),
                clades: vec![],
            },
        ]
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryDocumentStore::default();
        store.insert_documents("anoles", &sample_docs()).unwrap();

        assert_eq!(store.load_documents("anoles").unwrap(), sample_docs());
        assert!(store.load_documents("missing").unwrap().is_empty());
        assert_eq!(store.collections().unwrap(), vec!["anoles"]);
        assert!(store.remove_collection("anoles").unwrap());
        assert!(!store.remove_collection("anoles").unwrap());
    }

    #[test]
    fn test_disk_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = DiskDocumentStore::new(dir.path().to_str().unwrap()).unwrap();

        store.insert_documents("anoles", &sample_docs()).unwrap();
        store.insert_documents("anoles2", &sample_docs()[..1]).unwrap();

        assert_eq!(store.load_documents("anoles").unwrap(), sample_docs());
        assert_eq!(store.load_documents("anoles2").unwrap().len(), 1);
        assert_eq!(store.collections().unwrap(), vec!["anoles", "anoles2"]);
    }

    #[test]
    fn test_disk_store_replaces_collection() {
        let dir = tempdir().unwrap();
        let store = DiskDocumentStore::new(dir.path().to_str().unwrap()).unwrap();

        store.insert_documents("t", &sample_docs()).unwrap();
        store.insert_documents("t", &sample_docs()[..2]).unwrap();
        assert_eq!(store.load_documents("t").unwrap().len(), 2);

        assert!(store.remove_collection("t").unwrap());
        assert!(store.load_documents("t").unwrap().is_empty());
    }
}
