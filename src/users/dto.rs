use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{Gender, Provider, Role, User};
use crate::{
    brands::dto::check_len,
    error::{AppError, AppResult},
    products::model::Product,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfile {
    /// Display name; stored split into first and last name.
    pub username: Option<String>,
    pub gender: Option<Gender>,
}

impl UpdateProfile {
    pub fn validate(&self) -> AppResult<()> {
        if self.username.is_none() && self.gender.is_none() {
            return Err(AppError::bad_request("all update fields are empty"));
        }
        if let Some(username) = &self.username {
            check_len("username", username.trim(), 2, 50)?;
        }
        Ok(())
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub gender: Gender,
    pub role: Role,
    pub provider: Provider,
    /// Presigned link for stored pictures, the provider's url for google ones.
    pub profile_picture: Option<String>,
    /// Live products only; frozen ones are left out.
    pub wishlist: Vec<Product>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub confirmed_at: Option<OffsetDateTime>,
}

impl ProfileView {
    pub fn new(user: User, picture_url: Option<String>, wishlist: Vec<Product>) -> Self {
        Self {
            id: user.id,
            username: user.display_name(),
            email: user.email,
            gender: user.gender,
            role: user.role,
            provider: user.provider,
            profile_picture: picture_url,
            wishlist,
            confirmed_at: user.confirmed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_never_carries_secrets() {
        let user = User::system("a@x.com", "argon-digest".into(), "Ann Lee");
        let json = serde_json::to_string(&ProfileView::new(user, None, Vec::new())).unwrap();
        assert!(json.contains("\"username\":\"Ann Lee\""));
        assert!(!json.contains("argon-digest"));
        assert!(!json.contains("reset_password_code"));
    }

    #[test]
    fn profile_update_needs_a_field() {
        assert!(UpdateProfile::default().validate().is_err());
        let update = UpdateProfile {
            username: Some(" x ".into()),
            ..Default::default()
        };
        assert!(update.validate().is_err());
        let update = UpdateProfile {
            gender: Some(Gender::Female),
            ..Default::default()
        };
        assert!(update.validate().is_ok());
    }
}
