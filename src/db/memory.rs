use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value as Json;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    filter::{Cond, Update, Value},
    store::{doc_id, Collection, DocumentStore, Returning, StoreError, Window},
};

/// In-process document store.
///
/// Collections are vectors in insertion order behind one `RwLock`; every
/// mutation runs under the write lock, so a conditional update is atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<&'static str, Vec<Json>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, coll: &Collection) -> usize {
        self.collections
            .read()
            .await
            .get(coll.name)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn is_null(v: Option<&Json>) -> bool {
    matches!(v, None | Some(Json::Null))
}

fn compare(field: &Json, target: &Value) -> Option<Ordering> {
    match target {
        Value::Time(t) => {
            let parsed = OffsetDateTime::parse(field.as_str()?, &Rfc3339).ok()?;
            Some(parsed.cmp(t))
        }
        Value::Int(_) | Value::Float(_) => {
            let target = target.to_json().as_f64()?;
            field.as_f64()?.partial_cmp(&target)
        }
        Value::Text(s) => Some(field.as_str()?.cmp(s.as_str())),
        Value::Id(id) => Some(Uuid::parse_str(field.as_str()?).ok()?.cmp(id)),
        _ => None,
    }
}

fn equals(field: Option<&Json>, target: &Value) -> bool {
    match (field, target) {
        (f, Value::Null) => is_null(f),
        (Some(f), Value::Time(_) | Value::Id(_)) => compare(f, target) == Some(Ordering::Equal),
        (Some(f), _) => *f == target.to_json(),
        (None, _) => false,
    }
}

pub(crate) fn matches(doc: &Json, conds: &[Cond]) -> bool {
    conds.iter().all(|cond| match cond {
        Cond::Eq(f, v) => equals(doc.get(*f), v),
        Cond::Ne(f, v) => !equals(doc.get(*f), v),
        Cond::In(f, vs) => vs.iter().any(|v| equals(doc.get(*f), v)),
        Cond::Gt(f, v) => ordered(doc, f, v, |o| o == Ordering::Greater),
        Cond::Gte(f, v) => ordered(doc, f, v, |o| o != Ordering::Less),
        Cond::Lt(f, v) => ordered(doc, f, v, |o| o == Ordering::Less),
        Cond::Lte(f, v) => ordered(doc, f, v, |o| o != Ordering::Greater),
        Cond::Exists(f) => !is_null(doc.get(*f)),
        Cond::Missing(f) => is_null(doc.get(*f)),
        Cond::Has(f, v) => doc
            .get(*f)
            .and_then(Json::as_array)
            .is_some_and(|items| items.iter().any(|item| equals(Some(item), v))),
        Cond::Search(fields, term) => {
            let needle = term.to_lowercase();
            fields.iter().any(|f| {
                doc.get(*f)
                    .and_then(Json::as_str)
                    .is_some_and(|s| s.to_lowercase().contains(&needle))
            })
        }
    })
}

fn ordered(doc: &Json, field: &str, target: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    doc.get(field)
        .filter(|v| !v.is_null())
        .and_then(|v| compare(v, target))
        .is_some_and(pred)
}

fn check_unique(
    coll: &Collection,
    docs: &[Json],
    candidate: &Json,
    skip: Option<usize>,
) -> Result<(), StoreError> {
    for field in coll.unique {
        let Some(value) = candidate.get(*field).filter(|v| !v.is_null()) else {
            continue;
        };
        let clash = docs
            .iter()
            .enumerate()
            .any(|(i, d)| Some(i) != skip && d.get(*field) == Some(value));
        if clash {
            return Err(StoreError::DuplicateKey {
                collection: coll.name,
                field: (*field).to_string(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, coll: &Collection, docs: Vec<Json>) -> Result<(), StoreError> {
        let mut guard = self.collections.write().await;
        let stored = guard.entry(coll.name).or_default();
        let mut staged = stored.clone();
        for doc in docs {
            let id = doc_id(coll, &doc)?;
            if staged.iter().any(|d| doc_id(coll, d).ok() == Some(id)) {
                return Err(StoreError::DuplicateKey {
                    collection: coll.name,
                    field: "id".into(),
                });
            }
            check_unique(coll, &staged, &doc, None)?;
            staged.push(doc);
        }
        *stored = staged;
        Ok(())
    }

    async fn select(
        &self,
        coll: &Collection,
        conds: &[Cond],
        window: Window,
    ) -> Result<Vec<Json>, StoreError> {
        let guard = self.collections.read().await;
        let Some(docs) = guard.get(coll.name) else {
            return Ok(Vec::new());
        };
        let hits = docs
            .iter()
            .filter(|d| matches(d, conds))
            .skip(usize::try_from(window.skip).unwrap_or(usize::MAX));
        Ok(match window.limit {
            Some(limit) => hits
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .cloned()
                .collect(),
            None => hits.cloned().collect(),
        })
    }

    async fn count(&self, coll: &Collection, conds: &[Cond]) -> Result<u64, StoreError> {
        let guard = self.collections.read().await;
        Ok(guard
            .get(coll.name)
            .map(|docs| docs.iter().filter(|d| matches(d, conds)).count() as u64)
            .unwrap_or(0))
    }

    async fn update_first(
        &self,
        coll: &Collection,
        conds: &[Cond],
        update: &Update,
        returning: Returning,
    ) -> Result<Option<Json>, StoreError> {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(coll.name) else {
            return Ok(None);
        };
        let Some(pos) = docs.iter().position(|d| matches(d, conds)) else {
            return Ok(None);
        };
        let before = docs[pos].clone();
        let mut after = before.clone();
        update.apply(&mut after);
        check_unique(coll, docs, &after, Some(pos))?;
        docs[pos] = after.clone();
        Ok(Some(match returning {
            Returning::Before => before,
            Returning::After => after,
        }))
    }

    async fn delete_first(&self, coll: &Collection, conds: &[Cond]) -> Result<Option<Json>, StoreError> {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(coll.name) else {
            return Ok(None);
        };
        Ok(docs
            .iter()
            .position(|d| matches(d, conds))
            .map(|pos| docs.remove(pos)))
    }

    async fn delete_all(&self, coll: &Collection, conds: &[Cond]) -> Result<u64, StoreError> {
        let mut guard = self.collections.write().await;
        let Some(docs) = guard.get_mut(coll.name) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !matches(d, conds));
        Ok((before - docs.len()) as u64)
    }
}
