use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{filter::Update, Collection, Entity};

/// Url-safe form of a display name: lowercase words joined by `-`.
pub fn slugify(name: &str) -> String {
    lazy_static! {
        static ref NON_WORD: Regex = Regex::new(r"[^a-z0-9]+").expect("static regex");
    }
    NON_WORD
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Keeps `slug` in step with `name` on every update that sets it.
pub(crate) fn reslug(update: &mut Update) {
    if let Some(name) = update.get("name").and_then(Json::as_str) {
        let slug = slugify(name);
        update.insert("slug", slug);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brand {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    pub slogan: String,
    /// Storage key of the logo.
    pub image: String,
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

impl Brand {
    pub fn new(name: String, slogan: String, image: String, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            slug: String::new(),
            slogan,
            image,
            created_by,
            updated_by: None,
            freezed_at: None,
            restored_at: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Entity for Brand {
    const COLLECTION: Collection = Collection {
        name: "brands",
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
