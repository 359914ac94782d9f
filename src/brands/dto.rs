use serde::Deserialize;

use crate::{
    db::PageRequest,
    error::{AppError, AppResult},
};

pub(crate) fn check_len(field: &str, value: &str, min: usize, max: usize) -> AppResult<()> {
    let len = value.trim().chars().count();
    if len < min || len > max {
        return Err(AppError::bad_request(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(())
}

/// Query string of list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u64>,
    pub size: Option<u64>,
    pub search: Option<String>,
}

impl ListQuery {
    pub fn page_request(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateBrand {
    pub name: String,
    pub slogan: String,
}

impl CreateBrand {
    pub fn validate(&self) -> AppResult<()> {
        check_len("name", &self.name, 2, 25)?;
        check_len("slogan", &self.slogan, 2, 25)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBrand {
    pub name: Option<String>,
    pub slogan: Option<String>,
}

impl UpdateBrand {
    pub fn validate(&self) -> AppResult<()> {
        if self.name.is_none() && self.slogan.is_none() {
            return Err(AppError::bad_request("all update fields are empty"));
        }
        if let Some(name) = &self.name {
            check_len("name", name, 2, 25)?;
        }
        if let Some(slogan) = &self.slogan {
            check_len("slogan", slogan, 2, 25)?;
        }
        Ok(())
    }
}
