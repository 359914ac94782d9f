use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    brands::model::{reslug, slugify},
    db::{filter::Update, Collection, Entity},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Storage key of the cover image, kept under the asset folder.
    pub image: String,
    pub asset_folder_id: Uuid,
    #[serde(default)]
    pub brands: Vec<Uuid>,
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

impl Category {
    pub fn asset_folder(&self) -> String {
        asset_folder(self.asset_folder_id)
    }
}

pub fn asset_folder(id: Uuid) -> String {
    format!("categories/{id}")
}

impl Entity for Category {
    const COLLECTION: Collection = Collection {
        name: "categories",
        unique: &["name"],
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

/// Next brand set: `(current - removed) ∪ added`, keeping current order.
pub fn reconcile_brands(current: &[Uuid], removed: &[Uuid], added: &[Uuid]) -> Vec<Uuid> {
    let mut next: Vec<Uuid> = current
        .iter()
        .copied()
        .filter(|id| !removed.contains(id))
        .collect();
    for id in added {
        if !next.contains(id) {
            next.push(*id);
        }
    }
    next
}

/// Order-preserving dedup.
pub fn unique_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconciliation_is_difference_then_union() {
        let [a, b, c, d] = [(); 4].map(|_| Uuid::new_v4());
        assert_eq!(reconcile_brands(&[a, b, c], &[b], &[d]), vec![a, c, d]);
        assert_eq!(reconcile_brands(&[a], &[], &[a, b]), vec![a, b]);
        assert!(reconcile_brands(&[a, b], &[a, b], &[]).is_empty());
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let [a, b] = [(); 2].map(|_| Uuid::new_v4());
        assert_eq!(unique_ids(&[a, b, a, a]), vec![a, b]);
    }
}
