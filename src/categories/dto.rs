use serde::Deserialize;
use uuid::Uuid;

use crate::{
    brands::dto::check_len,
    error::{AppError, AppResult},
};

#[derive(Debug, Clone, Default)]
pub struct CreateCategory {
    pub name: String,
    pub description: Option<String>,
    pub brands: Vec<Uuid>,
}

impl CreateCategory {
    pub fn validate(&self) -> AppResult<()> {
        check_len("name", &self.name, 2, 25)?;
        if let Some(description) = &self.description {
            check_len("description", description, 2, 5000)?;
        }
        Ok(())
    }
}

/// Comma separated or JSON-array list of ids, as sent in a multipart field.
pub fn parse_ids(raw: &str) -> AppResult<Vec<Uuid>> {
    let raw = raw.trim();
    let parts: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str(raw).map_err(|_| AppError::bad_request("invalid brand ids"))?
    } else {
        raw.split(',').map(|s| s.trim().to_string()).collect()
    };
    parts
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(s).map_err(|_| AppError::bad_request(format!("invalid brand id {s}"))))
        .collect()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCategory {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Brands to add.
    #[serde(default)]
    pub brands: Vec<Uuid>,
    #[serde(default)]
    pub remove_brands: Vec<Uuid>,
}

impl UpdateCategory {
    pub fn validate(&self) -> AppResult<()> {
        if self.name.is_none()
            && self.description.is_none()
            && self.brands.is_empty()
            && self.remove_brands.is_empty()
        {
            return Err(AppError::bad_request("all update fields are empty"));
        }
        if let Some(name) = &self.name {
            check_len("name", name, 2, 25)?;
        }
        if let Some(description) = &self.description {
            check_len("description", description, 2, 5000)?;
        }
        Ok(())
    }
}
