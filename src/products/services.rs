use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{CreateProduct, UpdateProduct},
    model::{asset_folder, reconcile_images, sale_price, Product},
};
use crate::{
    brands::{dto::ListQuery, model::Brand},
    categories::model::Category,
    db::{paranoid, Filter, Page, QueryOptions, Repository, Update, UpdateOptions},
    error::{AppError, AppResult},
    storage::{self, StorageClient, UploadItem},
    users::model::User,
};

const SEARCHABLE: &[&str] = &["name", "slug", "description"];

#[derive(Clone)]
pub struct ProductService {
    products: Repository<Product>,
    categories: Repository<Category>,
    brands: Repository<Brand>,
    users: Repository<User>,
    storage: Arc<dyn StorageClient>,
}

impl ProductService {
    pub fn new(
        products: Repository<Product>,
        categories: Repository<Category>,
        brands: Repository<Brand>,
        users: Repository<User>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            products,
            categories,
            brands,
            users,
            storage,
        }
    }

    async fn category(&self, id: Uuid) -> AppResult<Category> {
        self.categories
            .find_one(Filter::by_id(id), QueryOptions::default())
            .await?
            .ok_or_else(|| AppError::not_found("failed to find matching category"))
    }

    async fn ensure_brand(&self, id: Uuid) -> AppResult<()> {
        self.brands
            .find_one(Filter::by_id(id), QueryOptions::default())
            .await?
            .ok_or_else(|| AppError::not_found("failed to find matching brand"))?;
        Ok(())
    }

    #[instrument(skip(self, input, images), fields(name = %input.name, images = images.len()))]
    pub async fn create(&self, input: CreateProduct, images: Vec<UploadItem>, actor: Uuid) -> AppResult<Product> {
        if images.is_empty() {
            return Err(AppError::bad_request("at least one image is required"));
        }
        let category = self.category(input.category).await?;
        self.ensure_brand(input.brand).await?;

        let asset_folder_id = Uuid::new_v4();
        let folder = asset_folder(&category.asset_folder(), asset_folder_id);
        let keys = storage::upload_many(self.storage.as_ref(), images, &folder).await?;

        let discount = input.discount_percent.unwrap_or(0.0);
        let product = Product {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            slug: String::new(),
            description: input.description.trim().to_string(),
            images: keys.clone(),
            asset_folder_id,
            original_price: input.original_price,
            discount_percent: discount,
            sale_price: sale_price(input.original_price, discount),
            stock: input.stock,
            sold_items: 0,
            category: category.id,
            brand: input.brand,
            created_by: actor,
            updated_by: None,
            freezed_at: None,
            restored_at: None,
            created_at: None,
            updated_at: None,
        };

        let created = match self.products.create(vec![product]).await {
            Ok(mut v) => v.pop(),
            Err(e) => {
                storage::remove_many(self.storage.as_ref(), &keys).await;
                return Err(e.into());
            }
        };
        let Some(product) = created else {
            storage::remove_many(self.storage.as_ref(), &keys).await;
            return Err(AppError::bad_request("failed to create this product"));
        };
        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    pub async fn find_all(&self, query: &ListQuery, archive: bool) -> AppResult<Page<Product>> {
        let filter = Filter::new().search(SEARCHABLE, query.search.as_deref());
        let (filter, opts) = paranoid::archive_view(filter, archive);
        Ok(self.products.paginate(filter, query.page_request(), opts).await?)
    }

    pub async fn find_one(&self, product_id: Uuid, archive: bool) -> AppResult<Product> {
        let (filter, opts) = paranoid::archive_view(Filter::by_id(product_id), archive);
        self.products
            .find_one(filter, opts)
            .await?
            .ok_or_else(|| AppError::not_found("failed to find this product"))
    }

    #[instrument(skip(self, input))]
    pub async fn update(&self, product_id: Uuid, input: UpdateProduct, actor: Uuid) -> AppResult<Product> {
        let current = self.find_one(product_id, false).await?;

        let mut update = Update::new().set("updated_by", actor);
        if let Some(category) = input.category {
            update = update.set("category", self.category(category).await?.id);
        }
        if let Some(brand) = input.brand {
            self.ensure_brand(brand).await?;
            update = update.set("brand", brand);
        }
        if let Some(name) = input.name.as_deref().map(str::trim) {
            update = update.set("name", name);
        }
        if let Some(description) = input.description.as_deref().map(str::trim) {
            update = update.set("description", description);
        }
        if let Some(stock) = input.stock {
            update = update.set("stock", i64::try_from(stock).unwrap_or(i64::MAX));
        }
        if input.touches_price() {
            let original = input.original_price.unwrap_or(current.original_price);
            let discount = input.discount_percent.unwrap_or(current.discount_percent);
            update.insert_raw("original_price", original.into());
            update.insert_raw("discount_percent", discount.into());
            update.insert_raw("sale_price", sale_price(original, discount).into());
        }

        // price math used the values read above
        let mut guard = Filter::by_id(product_id);
        if let Some(seen) = current.updated_at {
            guard = guard.eq("updated_at", seen);
        }
        let updated = self
            .products
            .find_one_and_update(guard, update, UpdateOptions::returning_new())
            .await?
            .ok_or_else(|| AppError::conflict("product was modified concurrently, please retry"))?;
        info!(product_id = %updated.id, "product updated");
        Ok(updated)
    }

    /// Adds the uploaded images and drops `removed`. Removed objects are only
    /// deleted from storage once the record no longer points at them.
    #[instrument(skip(self, removed, images), fields(removed = removed.len(), added = images.len()))]
    pub async fn update_attachment(
        &self,
        product_id: Uuid,
        removed: Vec<String>,
        images: Vec<UploadItem>,
        actor: Uuid,
    ) -> AppResult<Product> {
        if removed.is_empty() && images.is_empty() {
            return Err(AppError::bad_request("nothing to change"));
        }
        let current = self.find_one(product_id, false).await?;
        let category = self
            .categories
            .find_one(Filter::by_id(current.category), QueryOptions::include_frozen())
            .await?
            .ok_or_else(|| AppError::not_found("failed to find matching category"))?;

        let folder = asset_folder(&category.asset_folder(), current.asset_folder_id);
        let added = storage::upload_many(self.storage.as_ref(), images, &folder).await?;
        let next = reconcile_images(&current.images, &removed, &added);

        let mut guard = Filter::by_id(product_id);
        if let Some(seen) = current.updated_at {
            guard = guard.eq("updated_at", seen);
        }
        let update = Update::new().set("images", next).set("updated_by", actor);
        let updated = match self
            .products
            .find_one_and_update(guard, update, UpdateOptions::returning_new())
            .await
        {
            Ok(Some(product)) => product,
            Ok(None) => {
                storage::remove_many(self.storage.as_ref(), &added).await;
                return Err(AppError::conflict("product was modified concurrently, please retry"));
            }
            Err(e) => {
                storage::remove_many(self.storage.as_ref(), &added).await;
                return Err(e.into());
            }
        };

        let dropped: Vec<String> = current
            .images
            .into_iter()
            .filter(|key| removed.contains(key))
            .collect();
        storage::remove_many(self.storage.as_ref(), &dropped).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn freeze(&self, product_id: Uuid, actor: Uuid) -> AppResult<()> {
        self.products
            .freeze(Filter::by_id(product_id), Some(actor))
            .await?
            .ok_or_else(|| AppError::not_found("product not found or product is already freezed"))?;
        info!(product_id = %product_id, "product freezed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, product_id: Uuid, actor: Uuid) -> AppResult<Product> {
        let product = self
            .products
            .restore(Filter::by_id(product_id), Some(actor))
            .await?
            .ok_or_else(|| AppError::not_found("product not found or product is not freezed"))?;
        info!(product_id = %product_id, "product restored");
        Ok(product)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, product_id: Uuid) -> AppResult<()> {
        let product = self
            .products
            .find_one_and_delete(Filter::by_id(product_id))
            .await?
            .ok_or_else(|| AppError::not_found("product not found or product must be freezed first"))?;
        storage::remove_many(self.storage.as_ref(), &product.images).await;
        warn!(product_id = %product_id, "product deleted");
        Ok(())
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn add_to_wishlist(&self, product_id: Uuid, user: &User) -> AppResult<Product> {
        let product = self.find_one(product_id, false).await?;
        let res = self
            .users
            .update_one(
                Filter::by_id(user.id),
                Update::new().add_to_set("wishlist", product.id),
                QueryOptions::default(),
            )
            .await?;
        if res.matched_count == 0 {
            return Err(AppError::not_found("user not found"));
        }
        Ok(product)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn remove_from_wishlist(&self, product_id: Uuid, user: &User) -> AppResult<()> {
        let res = self
            .users
            .update_one(
                Filter::by_id(user.id),
                Update::new().pull("wishlist", product_id),
                QueryOptions::default(),
            )
            .await?;
        if res.matched_count == 0 {
            return Err(AppError::not_found("user not found"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        brands::dto::CreateBrand,
        categories::dto::CreateCategory,
        state::testing::{png, TestApp},
        users::model::Role,
    };

    struct Catalog {
        category: Category,
        brand: Brand,
        actor: Uuid,
    }

    async fn catalog(app: &TestApp) -> Catalog {
        let actor = Uuid::new_v4();
        let brand = app
            .state
            .brands()
            .create(
                CreateBrand {
                    name: "Acme".into(),
                    slogan: "Anything".into(),
                },
                png(),
                actor,
            )
            .await
            .unwrap();
        let category = app
            .state
            .categories()
            .create(
                CreateCategory {
                    name: "Shoes".into(),
                    brands: vec![brand.id],
                    ..Default::default()
                },
                png(),
                actor,
            )
            .await
            .unwrap();
        Catalog {
            category,
            brand,
            actor,
        }
    }

    fn input(c: &Catalog) -> CreateProduct {
        CreateProduct {
            name: "Road Runner".into(),
            description: "Fast shoe".into(),
            original_price: 200.0,
            discount_percent: Some(25.0),
            stock: 10,
            category: c.category.id,
            brand: c.brand.id,
        }
    }

    #[tokio::test]
    async fn create_prices_and_stores_images_under_the_category() {
        let app = TestApp::new();
        let c = catalog(&app).await;
        let products = app.state.products();

        let p = products.create(input(&c), vec![png(), png()], c.actor).await.unwrap();
        assert_eq!(p.slug, "road-runner");
        assert_eq!(p.sale_price, 150.0);
        assert_eq!(p.images.len(), 2);
        let folder = asset_folder(&c.category.asset_folder(), p.asset_folder_id);
        assert!(p.images.iter().all(|k| k.starts_with(&folder) && app.storage.contains(k)));

        let err = products.create(input(&c), Vec::new(), c.actor).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn create_requires_live_category_and_brand() {
        let app = TestApp::new();
        let c = catalog(&app).await;
        let products = app.state.products();
        let before = app.storage.len();

        let err = products
            .create(CreateProduct { category: Uuid::new_v4(), ..input(&c) }, vec![png()], c.actor)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "failed to find matching category"));

        app.state.brands().freeze(c.brand.id, c.actor).await.unwrap();
        let err = products.create(input(&c), vec![png()], c.actor).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "failed to find matching brand"));
        assert_eq!(app.storage.len(), before);
    }

    #[tokio::test]
    async fn update_recomputes_the_sale_price() {
        let app = TestApp::new();
        let c = catalog(&app).await;
        let products = app.state.products();
        let p = products.create(input(&c), vec![png()], c.actor).await.unwrap();

        let updated = products
            .update(
                p.id,
                UpdateProduct {
                    discount_percent: Some(50.0),
                    ..Default::default()
                },
                c.actor,
            )
            .await
            .unwrap();
        assert_eq!(updated.original_price, 200.0);
        assert_eq!(updated.sale_price, 100.0);

        let updated = products
            .update(
                p.id,
                UpdateProduct {
                    name: Some("Trail Runner".into()),
                    original_price: Some(80.0),
                    ..Default::default()
                },
                c.actor,
            )
            .await
            .unwrap();
        assert_eq!(updated.slug, "trail-runner");
        assert_eq!(updated.sale_price, 40.0);
        assert_eq!(updated.updated_by, Some(c.actor));

        let err = products
            .update(
                p.id,
                UpdateProduct {
                    brand: Some(Uuid::new_v4()),
                    ..Default::default()
                },
                c.actor,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn attachments_reconcile_and_clean_up() {
        let app = TestApp::new();
        let c = catalog(&app).await;
        let products = app.state.products();
        let p = products.create(input(&c), vec![png(), png()], c.actor).await.unwrap();
        let (keep, drop) = (p.images[0].clone(), p.images[1].clone());

        let updated = products
            .update_attachment(p.id, vec![drop.clone(), "not/ours.png".into()], vec![png()], c.actor)
            .await
            .unwrap();
        assert_eq!(updated.images.len(), 2);
        assert_eq!(updated.images[0], keep);
        assert!(!updated.images.contains(&drop));
        assert!(!app.storage.contains(&drop));
        assert!(app.storage.contains(&updated.images[1]));
        // only objects the product owned were removed
        assert_eq!(app.storage.deleted(), vec![drop]);

        let err = products
            .update_attachment(p.id, Vec::new(), Vec::new(), c.actor)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn freeze_restore_delete_lifecycle() {
        let app = TestApp::new();
        let c = catalog(&app).await;
        let products = app.state.products();
        let p = products.create(input(&c), vec![png()], c.actor).await.unwrap();

        let err = products.delete(p.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m.contains("must be freezed first")));

        products.freeze(p.id, c.actor).await.unwrap();
        assert!(matches!(products.find_one(p.id, false).await, Err(AppError::NotFound(_))));
        assert_eq!(products.find_all(&ListQuery::default(), true).await.unwrap().docs_count, 1);

        let restored = products.restore(p.id, c.actor).await.unwrap();
        assert!(restored.restored_at.is_some());

        products.freeze(p.id, c.actor).await.unwrap();
        products.delete(p.id).await.unwrap();
        assert!(!app.storage.contains(&p.images[0]));
    }

    #[tokio::test]
    async fn wishlist_is_a_set_and_skips_frozen_products() {
        let app = TestApp::new();
        let c = catalog(&app).await;
        let products = app.state.products();
        let user = app.seed_user("a@x.com", Role::User).await;
        let p = products.create(input(&c), vec![png()], c.actor).await.unwrap();

        products.add_to_wishlist(p.id, &user).await.unwrap();
        products.add_to_wishlist(p.id, &user).await.unwrap();
        let profile = app.state.accounts().profile(user.id).await.unwrap();
        assert_eq!(profile.wishlist.len(), 1);
        assert_eq!(profile.wishlist[0].id, p.id);

        products.freeze(p.id, c.actor).await.unwrap();
        let err = products.add_to_wishlist(p.id, &user).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let profile = app.state.accounts().profile(user.id).await.unwrap();
        assert!(profile.wishlist.is_empty());

        products.remove_from_wishlist(p.id, &user).await.unwrap();
        let stored = app
            .state
            .users()
            .find_one(Filter::by_id(user.id), QueryOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert!(stored.wishlist.is_empty());
    }
}
