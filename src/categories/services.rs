use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{CreateCategory, UpdateCategory},
    model::{asset_folder, reconcile_brands, unique_ids, Category},
};
use crate::{
    brands::{dto::ListQuery, model::Brand},
    db::{paranoid, Filter, Page, QueryOptions, Repository, Update, UpdateOptions},
    error::{AppError, AppResult},
    storage::{self, StorageClient, UploadItem},
};

const SEARCHABLE: &[&str] = &["name", "slug", "description"];

#[derive(Clone)]
pub struct CategoryService {
    categories: Repository<Category>,
    brands: Repository<Brand>,
    storage: Arc<dyn StorageClient>,
}

impl CategoryService {
    pub fn new(categories: Repository<Category>, brands: Repository<Brand>, storage: Arc<dyn StorageClient>) -> Self {
        Self {
            categories,
            brands,
            storage,
        }
    }

    /// Every id must name an active brand.
    async fn ensure_brands_exist(&self, ids: &[Uuid]) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let found = self.brands.populate_refs(ids).await?;
        if found.len() != ids.len() {
            warn!(wanted = ids.len(), found = found.len(), "unknown brands referenced");
            return Err(AppError::not_found("one or more brands not found"));
        }
        Ok(())
    }

    #[instrument(skip(self, input, image), fields(name = %input.name))]
    pub async fn create(&self, input: CreateCategory, image: UploadItem, actor: Uuid) -> AppResult<Category> {
        let name = input.name.trim().to_string();
        let existing = self
            .categories
            .find_one(Filter::new().eq("name", &name), QueryOptions::include_frozen())
            .await?;
        if let Some(existing) = existing {
            return Err(AppError::conflict(if existing.freezed_at.is_some() {
                "this category is freezed"
            } else {
                "duplicated category name"
            }));
        }

        let brands = unique_ids(&input.brands);
        self.ensure_brands_exist(&brands).await?;

        let asset_folder_id = Uuid::new_v4();
        let key = storage::upload(self.storage.as_ref(), image, &asset_folder(asset_folder_id)).await?;
        let category = Category {
            id: Uuid::new_v4(),
            name,
            slug: String::new(),
            description: input.description.map(|d| d.trim().to_string()),
            image: key.clone(),
            asset_folder_id,
            brands,
            created_by: actor,
            updated_by: None,
            freezed_at: None,
            restored_at: None,
            created_at: None,
            updated_at: None,
        };

        let created = match self.categories.create(vec![category]).await {
            Ok(mut v) => v.pop(),
            Err(e) => {
                storage::remove(self.storage.as_ref(), &key).await;
                return Err(e.into());
            }
        };
        let Some(category) = created else {
            storage::remove(self.storage.as_ref(), &key).await;
            return Err(AppError::bad_request("failed to create this category"));
        };
        info!(category_id = %category.id, brands = category.brands.len(), "category created");
        Ok(category)
    }

    pub async fn find_all(&self, query: &ListQuery, archive: bool) -> AppResult<Page<Category>> {
        let filter = Filter::new().search(SEARCHABLE, query.search.as_deref());
        let (filter, opts) = paranoid::archive_view(filter, archive);
        Ok(self
            .categories
            .paginate(filter, query.page_request(), opts)
            .await?)
    }

    pub async fn find_one(&self, category_id: Uuid, archive: bool) -> AppResult<Category> {
        let (filter, opts) = paranoid::archive_view(Filter::by_id(category_id), archive);
        self.categories
            .find_one(filter, opts)
            .await?
            .ok_or_else(|| AppError::not_found("failed to find this category"))
    }

    /// Applies field changes and reconciles the brand set against the
    /// version read, failing with `Conflict` if another write got there first.
    #[instrument(skip(self, input))]
    pub async fn update(&self, category_id: Uuid, input: UpdateCategory, actor: Uuid) -> AppResult<Category> {
        let current = self
            .categories
            .find_one(Filter::by_id(category_id), QueryOptions::default())
            .await?
            .ok_or_else(|| AppError::not_found("category not found"))?;

        let mut update = Update::new().set("updated_by", actor);
        if let Some(name) = input.name.as_deref().map(str::trim) {
            let taken = self
                .categories
                .find_one(
                    Filter::new().eq("name", name).ne("id", category_id),
                    QueryOptions::include_frozen(),
                )
                .await?;
            if taken.is_some() {
                return Err(AppError::conflict("duplicated category name"));
            }
            update = update.set("name", name);
        }
        if let Some(description) = input.description.as_deref().map(str::trim) {
            update = update.set("description", description);
        }

        let added = unique_ids(&input.brands);
        let removed = unique_ids(&input.remove_brands);
        if !added.is_empty() || !removed.is_empty() {
            if removed.iter().any(|id| !current.brands.contains(id)) {
                return Err(AppError::bad_request(
                    "cannot remove brands that are not in the category",
                ));
            }
            if added.iter().any(|id| current.brands.contains(id)) {
                return Err(AppError::bad_request(
                    "cannot add brands that are already in the category",
                ));
            }
            let referenced = unique_ids(&[added.as_slice(), removed.as_slice()].concat());
            self.ensure_brands_exist(&referenced).await?;
            update = update.set(
                "brands",
                reconcile_brands(&current.brands, &removed, &added),
            );
        }

        let mut guard = Filter::by_id(category_id);
        if let Some(seen) = current.updated_at {
            guard = guard.eq("updated_at", seen);
        }
        let updated = self
            .categories
            .find_one_and_update(guard, update, UpdateOptions::returning_new())
            .await?
            .ok_or_else(|| {
                warn!(category_id = %category_id, "category changed while updating");
                AppError::conflict("category was modified concurrently, please retry")
            })?;
        info!(category_id = %updated.id, brands = updated.brands.len(), "category updated");
        Ok(updated)
    }

    #[instrument(skip(self, image))]
    pub async fn update_attachment(&self, category_id: Uuid, image: UploadItem, actor: Uuid) -> AppResult<Category> {
        let current = self
            .categories
            .find_one(Filter::by_id(category_id), QueryOptions::default())
            .await?
            .ok_or_else(|| AppError::not_found("failed to update this category"))?;

        let key = storage::upload(self.storage.as_ref(), image, &current.asset_folder()).await?;
        let update = Update::new().set("image", key.as_str()).set("updated_by", actor);
        let updated = self
            .categories
            .find_one_and_update(Filter::by_id(category_id), update, UpdateOptions::returning_new())
            .await;
        let updated = match updated {
            Ok(Some(category)) => category,
            Ok(None) => {
                storage::remove(self.storage.as_ref(), &key).await;
                return Err(AppError::not_found("failed to update this category"));
            }
            Err(e) => {
                storage::remove(self.storage.as_ref(), &key).await;
                return Err(e.into());
            }
        };
        storage::remove(self.storage.as_ref(), &current.image).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn freeze(&self, category_id: Uuid, actor: Uuid) -> AppResult<()> {
        self.categories
            .freeze(Filter::by_id(category_id), Some(actor))
            .await?
            .ok_or_else(|| AppError::not_found("category not found or category is already freezed"))?;
        info!(category_id = %category_id, "category freezed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, category_id: Uuid, actor: Uuid) -> AppResult<Category> {
        let category = self
            .categories
            .restore(Filter::by_id(category_id), Some(actor))
            .await?
            .ok_or_else(|| AppError::not_found("category not found or category is not freezed"))?;
        info!(category_id = %category_id, "category restored");
        Ok(category)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, category_id: Uuid) -> AppResult<()> {
        let category = self
            .categories
            .find_one_and_delete(Filter::by_id(category_id))
            .await?
            .ok_or_else(|| AppError::not_found("category not found or category must be freezed first"))?;
        storage::remove(self.storage.as_ref(), &category.image).await;
        warn!(category_id = %category_id, "category deleted");
        Ok(())
    }
}
