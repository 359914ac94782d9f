use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{CreateBrand, ListQuery, UpdateBrand},
    model::Brand,
};
use crate::{
    db::{paranoid, Filter, Page, QueryOptions, Repository, Update, UpdateOptions},
    error::{AppError, AppResult},
    storage::{self, StorageClient, UploadItem},
};

const FOLDER: &str = "brands";
const SEARCHABLE: &[&str] = &["name", "slug", "slogan"];

#[derive(Clone)]
pub struct BrandService {
    brands: Repository<Brand>,
    storage: Arc<dyn StorageClient>,
}

impl BrandService {
    pub fn new(brands: Repository<Brand>, storage: Arc<dyn StorageClient>) -> Self {
        Self { brands, storage }
    }

    #[instrument(skip(self, input, image), fields(name = %input.name))]
    pub async fn create(&self, input: CreateBrand, image: UploadItem, actor: Uuid) -> AppResult<Brand> {
        let name = input.name.trim().to_string();
        let existing = self
            .brands
            .find_one(Filter::new().eq("name", &name), QueryOptions::include_frozen())
            .await?;
        if let Some(existing) = existing {
            return Err(AppError::conflict(if existing.freezed_at.is_some() {
                "this brand is freezed"
            } else {
                "duplicated brand name"
            }));
        }

        let key = storage::upload(self.storage.as_ref(), image, FOLDER).await?;
        let brand = Brand::new(name, input.slogan.trim().to_string(), key.clone(), actor);
        let created = match self.brands.create(vec![brand]).await {
            Ok(mut v) => v.pop(),
            Err(e) => {
                storage::remove(self.storage.as_ref(), &key).await;
                return Err(e.into());
            }
        };
        let Some(brand) = created else {
            storage::remove(self.storage.as_ref(), &key).await;
            return Err(AppError::bad_request("failed to create this brand"));
        };

        info!(brand_id = %brand.id, "brand created");
        Ok(brand)
    }

    /// Active brands, or frozen ones only when `archive` is set.
    pub async fn find_all(&self, query: &ListQuery, archive: bool) -> AppResult<Page<Brand>> {
        let filter = Filter::new().search(SEARCHABLE, query.search.as_deref());
        let (filter, opts) = paranoid::archive_view(filter, archive);
        Ok(self.brands.paginate(filter, query.page_request(), opts).await?)
    }

    pub async fn find_one(&self, brand_id: Uuid, archive: bool) -> AppResult<Brand> {
        let (filter, opts) = paranoid::archive_view(Filter::by_id(brand_id), archive);
        self.brands
            .find_one(filter, opts)
            .await?
            .ok_or_else(|| AppError::not_found("failed to find this brand"))
    }

    #[instrument(skip(self, input))]
    pub async fn update(&self, brand_id: Uuid, input: UpdateBrand, actor: Uuid) -> AppResult<Brand> {
        let mut update = Update::new().set("updated_by", actor);
        if let Some(name) = input.name.as_deref().map(str::trim) {
            let taken = self
                .brands
                .find_one(
                    Filter::new().eq("name", name).ne("id", brand_id),
                    QueryOptions::include_frozen(),
                )
                .await?;
            if taken.is_some() {
                return Err(AppError::conflict("duplicated brand name"));
            }
            update = update.set("name", name);
        }
        if let Some(slogan) = input.slogan.as_deref().map(str::trim) {
            update = update.set("slogan", slogan);
        }

        let brand = self
            .brands
            .find_one_and_update(Filter::by_id(brand_id), update, UpdateOptions::returning_new())
            .await?
            .ok_or_else(|| AppError::not_found("failed to update this brand"))?;
        info!(brand_id = %brand.id, "brand updated");
        Ok(brand)
    }

    /// Swaps the logo. The new object is stored first and the old one removed
    /// once the record points at the new key.
    #[instrument(skip(self, image))]
    pub async fn update_attachment(&self, brand_id: Uuid, image: UploadItem, actor: Uuid) -> AppResult<Brand> {
        let key = storage::upload(self.storage.as_ref(), image, FOLDER).await?;
        let update = Update::new().set("image", key.as_str()).set("updated_by", actor);
        let before = self
            .brands
            .find_one_and_update(Filter::by_id(brand_id), update, UpdateOptions::default())
            .await;

        let mut brand = match before {
            Ok(Some(brand)) => brand,
            Ok(None) => {
                storage::remove(self.storage.as_ref(), &key).await;
                return Err(AppError::not_found("failed to update this brand"));
            }
            Err(e) => {
                storage::remove(self.storage.as_ref(), &key).await;
                return Err(e.into());
            }
        };
        storage::remove(self.storage.as_ref(), &brand.image).await;
        brand.image = key;
        brand.updated_by = Some(actor);
        Ok(brand)
    }

    #[instrument(skip(self))]
    pub async fn freeze(&self, brand_id: Uuid, actor: Uuid) -> AppResult<()> {
        self.brands
            .freeze(Filter::by_id(brand_id), Some(actor))
            .await?
            .ok_or_else(|| AppError::not_found("brand not found or brand is already freezed"))?;
        info!(brand_id = %brand_id, "brand freezed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, brand_id: Uuid, actor: Uuid) -> AppResult<Brand> {
        let brand = self
            .brands
            .restore(Filter::by_id(brand_id), Some(actor))
            .await?
            .ok_or_else(|| AppError::not_found("brand not found or brand is not freezed"))?;
        info!(brand_id = %brand_id, "brand restored");
        Ok(brand)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, brand_id: Uuid) -> AppResult<()> {
        let brand = self
            .brands
            .find_one_and_delete(Filter::by_id(brand_id))
            .await?
            .ok_or_else(|| AppError::not_found("brand not found or brand must be freezed first"))?;
        storage::remove(self.storage.as_ref(), &brand.image).await;
        warn!(brand_id = %brand_id, "brand deleted");
        Ok(())
    }
}
