use std::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as Json;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{
    filter::{Filter, Update, Value},
    paranoid::{self, QueryOptions, FREEZED_AT},
    store::{Collection, DocumentStore, Returning, StoreError, Window},
};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PAGE_SIZE: u64 = 5;

/// A persisted document type.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;
    /// Whether reads and updates hide frozen records.
    const PARANOID: bool = true;

    fn id(&self) -> Uuid;

    /// Create-time derivations, run before the first insert.
    fn prepare(&mut self) {}

    /// Input normalization for every update issued through the repository.
    fn normalize_update(_update: &mut Update) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub include_frozen: bool,
    /// Hand back the document as it is after the update instead of before.
    pub return_new: bool,
}

impl UpdateOptions {
    pub fn returning_new() -> Self {
        Self {
            include_frozen: false,
            return_new: true,
        }
    }

    fn query(self) -> QueryOptions {
        QueryOptions {
            include_frozen: self.include_frozen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageRequest {
    pub page: Option<u64>,
    pub size: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub docs_count: u64,
    pub limit: u64,
    pub pages_count: u64,
    pub current_page: u64,
    pub result: Vec<T>,
}

/// Generic repository over one entity type.
pub struct Repository<E> {
    store: Arc<dyn DocumentStore>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    fn decode(doc: Json) -> Result<E, StoreError> {
        Ok(serde_json::from_value(doc)?)
    }

    fn prepared(mut update: Update) -> Update {
        E::normalize_update(&mut update);
        update.insert("updated_at", OffsetDateTime::now_utc());
        update
    }

    pub async fn create(&self, data: Vec<E>) -> Result<Vec<E>, StoreError> {
        let now = Value::from(OffsetDateTime::now_utc()).to_json();
        let mut docs = Vec::with_capacity(data.len());
        for mut entity in data {
            entity.prepare();
            let mut doc = serde_json::to_value(&entity)?;
            if let Some(obj) = doc.as_object_mut() {
                obj.insert("created_at".into(), now.clone());
                obj.insert("updated_at".into(), now.clone());
            }
            docs.push(doc);
        }
        self.store.insert(&E::COLLECTION, docs.clone()).await?;
        debug!(collection = E::COLLECTION.name, count = docs.len(), "documents created");
        docs.into_iter().map(Self::decode).collect()
    }

    pub async fn find(&self, filter: Filter, opts: QueryOptions) -> Result<Vec<E>, StoreError> {
        let conds = paranoid::scope(E::PARANOID, filter, opts);
        let docs = self.store.select(&E::COLLECTION, &conds, Window::all()).await?;
        docs.into_iter().map(Self::decode).collect()
    }

    /// Plain (lean) projection of the first match.
    pub async fn find_one(&self, filter: Filter, opts: QueryOptions) -> Result<Option<E>, StoreError> {
        let conds = paranoid::scope(E::PARANOID, filter, opts);
        let docs = self.store.select(&E::COLLECTION, &conds, Window::first()).await?;
        docs.into_iter().next().map(Self::decode).transpose()
    }

    /// Live handle on the first match, writable back through [`Hydrated::save`].
    pub async fn find_one_hydrated(
        &self,
        filter: Filter,
        opts: QueryOptions,
    ) -> Result<Option<Hydrated<E>>, StoreError> {
        let conds = paranoid::scope(E::PARANOID, filter, opts);
        let docs = self.store.select(&E::COLLECTION, &conds, Window::first()).await?;
        let Some(loaded) = docs.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(Hydrated {
            doc: Self::decode(loaded.clone())?,
            loaded,
            opts,
            store: self.store.clone(),
        }))
    }

    pub async fn count(&self, filter: Filter, opts: QueryOptions) -> Result<u64, StoreError> {
        let conds = paranoid::scope(E::PARANOID, filter, opts);
        self.store.count(&E::COLLECTION, &conds).await
    }

    /// Expands a one-to-many relation: the records of this type whose
    /// `foreign_field` points at `owner_id`.
    pub async fn populate_owned(
        &self,
        foreign_field: &'static str,
        owner_id: Uuid,
        matching: Filter,
    ) -> Result<Vec<E>, StoreError> {
        self.find(matching.eq(foreign_field, owner_id), QueryOptions::default())
            .await
    }

    /// Expands a list of references. Frozen targets are not returned.
    pub async fn populate_refs(&self, ids: &[Uuid]) -> Result<Vec<E>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.find(Filter::new().is_in("id", ids.iter().copied()), QueryOptions::default())
            .await
    }

    pub async fn update_one(
        &self,
        filter: Filter,
        update: Update,
        opts: QueryOptions,
    ) -> Result<UpdateResult, StoreError> {
        let conds = paranoid::scope(E::PARANOID, filter, opts);
        let update = Self::prepared(update);
        let hit = self
            .store
            .update_first(&E::COLLECTION, &conds, &update, Returning::After)
            .await?;
        Ok(UpdateResult {
            matched_count: u64::from(hit.is_some()),
        })
    }

    pub async fn find_one_and_update(
        &self,
        filter: Filter,
        update: Update,
        opts: UpdateOptions,
    ) -> Result<Option<E>, StoreError> {
        let conds = paranoid::scope(E::PARANOID, filter, opts.query());
        let update = Self::prepared(update);
        let returning = if opts.return_new {
            Returning::After
        } else {
            Returning::Before
        };
        self.store
            .update_first(&E::COLLECTION, &conds, &update, returning)
            .await?
            .map(Self::decode)
            .transpose()
    }

    pub async fn find_one_and_delete(&self, filter: Filter) -> Result<Option<E>, StoreError> {
        let conds = paranoid::hard_delete_scope(E::PARANOID, filter);
        self.store
            .delete_first(&E::COLLECTION, &conds)
            .await?
            .map(Self::decode)
            .transpose()
    }

    pub async fn delete_one(&self, filter: Filter) -> Result<DeleteResult, StoreError> {
        let conds = paranoid::hard_delete_scope(E::PARANOID, filter);
        let gone = self.store.delete_first(&E::COLLECTION, &conds).await?;
        Ok(DeleteResult {
            deleted_count: u64::from(gone.is_some()),
        })
    }

    pub async fn delete_many(&self, filter: Filter) -> Result<u64, StoreError> {
        let conds = paranoid::hard_delete_scope(E::PARANOID, filter);
        self.store.delete_all(&E::COLLECTION, &conds).await
    }

    /// Freezes the first active match and returns it as it was before.
    pub async fn freeze(&self, filter: Filter, actor: Option<Uuid>) -> Result<Option<E>, StoreError> {
        let update = paranoid::freeze_update(actor, OffsetDateTime::now_utc());
        self.find_one_and_update(filter, update, UpdateOptions::default())
            .await
    }

    /// Restores the first frozen match and returns it as it is now.
    pub async fn restore(&self, filter: Filter, actor: Option<Uuid>) -> Result<Option<E>, StoreError> {
        let update = paranoid::restore_update(actor, OffsetDateTime::now_utc());
        let opts = UpdateOptions {
            include_frozen: true,
            return_new: true,
        };
        self.find_one_and_update(filter.exists(FREEZED_AT), update, opts)
            .await
    }

    pub async fn paginate(
        &self,
        filter: Filter,
        req: PageRequest,
        opts: QueryOptions,
    ) -> Result<Page<E>, StoreError> {
        let page = req.page.filter(|p| *p > 0).unwrap_or(DEFAULT_PAGE);
        let limit = req.size.filter(|s| *s > 0).unwrap_or(DEFAULT_PAGE_SIZE);
        let conds = paranoid::scope(E::PARANOID, filter, opts);

        let docs_count = self.store.count(&E::COLLECTION, &conds).await?;
        let window = Window {
            skip: (page - 1).saturating_mul(limit),
            limit: Some(limit),
        };
        let docs = self.store.select(&E::COLLECTION, &conds, window).await?;
        let result = docs
            .into_iter()
            .map(Self::decode)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            docs_count,
            limit,
            pages_count: docs_count.div_ceil(limit),
            current_page: page,
            result,
        })
    }
}

/// A live document: mutate through `DerefMut`, persist with [`Hydrated::save`].
pub struct Hydrated<E: Entity> {
    doc: E,
    /// The document as last read or written.
    loaded: Json,
    opts: QueryOptions,
    store: Arc<dyn DocumentStore>,
}

const MANAGED: &[&str] = &["id", "created_at", "updated_at"];

impl<E: Entity> Hydrated<E> {
    /// Fields changed since the document was loaded.
    fn changes(&self) -> Result<Update, StoreError> {
        let current = serde_json::to_value(&self.doc)?;
        let mut update = Update::new();
        let (Some(now), Some(before)) = (current.as_object(), self.loaded.as_object()) else {
            return Ok(update);
        };
        for (field, value) in now {
            if !MANAGED.contains(&field.as_str()) && before.get(field) != Some(value) {
                update.insert_raw(field, value.clone());
            }
        }
        for field in before.keys() {
            if !MANAGED.contains(&field.as_str()) && !now.contains_key(field) {
                update.unset_field(field);
            }
        }
        Ok(update)
    }

    /// Writes the changed fields back under the same soft-delete scope the
    /// document was read with. Fails with [`StoreError::Vanished`] when the
    /// record was deleted or frozen in the meantime.
    pub async fn save(&mut self) -> Result<(), StoreError> {
        let update = self.changes()?;
        if update.is_empty() {
            return Ok(());
        }
        let id = self.doc.id();
        let conds = paranoid::scope(E::PARANOID, Filter::by_id(id), self.opts);
        let update = Repository::<E>::prepared(update);
        let after = self
            .store
            .update_first(&E::COLLECTION, &conds, &update, Returning::After)
            .await?
            .ok_or(StoreError::Vanished {
                collection: E::COLLECTION.name,
                id,
            })?;
        self.doc = serde_json::from_value(after.clone())?;
        self.loaded = after;
        Ok(())
    }
}

impl<E: Entity> Deref for Hydrated<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.doc
    }
}

impl<E: Entity> DerefMut for Hydrated<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.doc
    }
}
