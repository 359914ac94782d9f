use async_trait::async_trait;
use serde_json::Value as Json;
use thiserror::Error;
use uuid::Uuid;

use super::filter::{Cond, Update};

/// Static description of a stored collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collection {
    pub name: &'static str,
    /// Fields whose non-null values must be unique across the collection.
    pub unique: &'static [&'static str],
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate value for unique field `{field}` in `{collection}`")]
    DuplicateKey {
        collection: &'static str,
        field: String,
    },
    #[error("document in `{collection}` is malformed: {reason}")]
    Malformed {
        collection: &'static str,
        reason: String,
    },
    #[error("document {id} in `{collection}` is gone or frozen and could not be saved")]
    Vanished { collection: &'static str, id: Uuid },
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
}

/// Window over an ordered selection. Documents are ordered by creation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Window {
    pub skip: u64,
    pub limit: Option<u64>,
}

impl Window {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn first() -> Self {
        Self {
            skip: 0,
            limit: Some(1),
        }
    }
}

/// Which image of the document a conditional update hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Returning {
    Before,
    After,
}

/// Backend-agnostic document persistence.
///
/// Conditions are always a conjunction; the caller has already applied any
/// soft-delete scoping before reaching the store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, coll: &Collection, docs: Vec<Json>) -> Result<(), StoreError>;

    async fn select(
        &self,
        coll: &Collection,
        conds: &[Cond],
        window: Window,
    ) -> Result<Vec<Json>, StoreError>;

    async fn count(&self, coll: &Collection, conds: &[Cond]) -> Result<u64, StoreError>;

    /// Updates the first matching document in a single step.
    async fn update_first(
        &self,
        coll: &Collection,
        conds: &[Cond],
        update: &Update,
        returning: Returning,
    ) -> Result<Option<Json>, StoreError>;

    async fn delete_first(&self, coll: &Collection, conds: &[Cond]) -> Result<Option<Json>, StoreError>;

    async fn delete_all(&self, coll: &Collection, conds: &[Cond]) -> Result<u64, StoreError>;
}

pub(crate) fn doc_id(coll: &Collection, doc: &Json) -> Result<Uuid, StoreError> {
    doc.get("id")
        .and_then(Json::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| StoreError::Malformed {
            collection: coll.name,
            reason: "missing or invalid `id`".into(),
        })
}
