use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    brands::model::{reslug, slugify},
    db::{filter::Update, Collection, Entity},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub description: String,
    /// Storage keys, all under the product's asset folder.
    #[serde(default)]
    pub images: Vec<String>,
    pub asset_folder_id: Uuid,
    pub original_price: f64,
    #[serde(default)]
    pub discount_percent: f64,
    pub sale_price: f64,
    #[serde(default)]
    pub stock: u64,
    #[serde(default)]
    pub sold_items: u64,
    pub category: Uuid,
    pub brand: Uuid,
    pub created_by: Uuid,
    #[serde(default)]
    pub updated_by: Option<Uuid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub freezed_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub restored_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

/// Price after the percentage discount, rounded to cents.
pub fn sale_price(original_price: f64, discount_percent: f64) -> f64 {
    let price = original_price - discount_percent / 100.0 * original_price;
    (price * 100.0).round() / 100.0
}

/// Products keep their images inside the owning category's folder.
pub fn asset_folder(category_folder: &str, asset_folder_id: Uuid) -> String {
    format!("{category_folder}/products/{asset_folder_id}")
}

/// Next image set: `(current - removed) ∪ added`.
pub fn reconcile_images(current: &[String], removed: &[String], added: &[String]) -> Vec<String> {
    let mut next: Vec<String> = current
        .iter()
        .filter(|key| !removed.contains(key))
        .cloned()
        .collect();
    for key in added {
        if !next.contains(key) {
            next.push(key.clone());
        }
    }
    next
}

impl Entity for Product {
    const COLLECTION: Collection = Collection {
        name: "products",
        unique: &[],
    };

    fn id(&self) -> Uuid {
        self.id
    }

    fn prepare(&mut self) {
        self.slug = slugify(&self.name);
    }

    fn normalize_update(update: &mut Update) {
        reslug(update);
    }
}
