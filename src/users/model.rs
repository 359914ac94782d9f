use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::{filter::Update, Collection, Entity};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

/// Where the account's identity comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    System,
    Google,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::System => "system",
            Provider::Google => "google",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Argon2 digest. Absent only for google-origin accounts.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub wishlist: Vec<Uuid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub confirmed_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub change_credentials_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub reset_password_code: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub freezed_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub restored_at: Option<OffsetDateTime>,
    /// Set when an administrator opened the account; self-registered ones have none.
    #[serde(default)]
    pub created_by: Option<Uuid>,
    #[serde(default)]
    pub updated_by: Option<Uuid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

/// Splits a display name into first and last name at the first space.
pub fn split_name(display_name: &str) -> (String, String) {
    let display_name = display_name.trim();
    match display_name.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (display_name.to_string(), String::new()),
    }
}

impl User {
    fn blank(email: String, first_name: String, last_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            first_name,
            last_name,
            email,
            password: None,
            profile_picture: None,
            role: Role::User,
            provider: Provider::System,
            gender: Gender::Male,
            wishlist: Vec::new(),
            confirmed_at: None,
            change_credentials_time: None,
            reset_password_code: None,
            freezed_at: None,
            restored_at: None,
            created_by: None,
            updated_by: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Unconfirmed, system-origin account. A password digest is mandatory.
    pub fn system(email: impl Into<String>, password_digest: String, display_name: &str) -> Self {
        let (first, last) = split_name(display_name);
        Self {
            password: Some(password_digest),
            ..Self::blank(email.into(), first, last)
        }
    }

    /// Pre-confirmed, google-origin account without a password.
    pub fn google(
        email: impl Into<String>,
        given_name: Option<String>,
        family_name: Option<String>,
        picture: Option<String>,
    ) -> Self {
        Self {
            provider: Provider::Google,
            confirmed_at: Some(OffsetDateTime::now_utc()),
            profile_picture: picture,
            ..Self::blank(
                email.into(),
                given_name.unwrap_or_default(),
                family_name.unwrap_or_default(),
            )
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }
}

impl Entity for User {
    const COLLECTION: Collection = Collection {
        name: "users",
        unique: &["email"],
    };

    fn id(&self) -> Uuid {
        self.id
    }

    /// `username` is not stored; it is written as `first_name`/`last_name`.
    fn normalize_update(update: &mut Update) {
        if let Some(Json::String(username)) = update.take("username") {
            let (first, last) = split_name(&username);
            update.insert("first_name", first);
            update.insert("last_name", last);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_round_trips_through_split() {
        let user = User::system("a@x.com", "digest".into(), "Ann Lee");
        assert_eq!((user.first_name.as_str(), user.last_name.as_str()), ("Ann", "Lee"));
        assert_eq!(user.display_name(), "Ann Lee");
        assert_eq!(user.provider, Provider::System);
        assert!(!user.is_confirmed());
    }

    #[test]
    fn split_keeps_multi_word_last_names() {
        assert_eq!(split_name("  Jean Luc Picard "), ("Jean".into(), "Luc Picard".into()));
        assert_eq!(split_name("Cher"), ("Cher".into(), String::new()));
    }

    #[test]
    fn username_update_is_decomposed() {
        let mut update = Update::new().set("username", "Grace Brewster Hopper").set("gender", "female");
        User::normalize_update(&mut update);
        assert!(update.get("username").is_none());
        assert_eq!(update.get("first_name"), Some(&Json::from("Grace")));
        assert_eq!(update.get("last_name"), Some(&Json::from("Brewster Hopper")));
        assert_eq!(update.get("gender"), Some(&Json::from("female")));
    }

    #[test]
    fn google_accounts_are_confirmed_without_password() {
        let user = User::google("g@x.com", Some("Ada".into()), None, None);
        assert!(user.is_confirmed());
        assert!(user.password.is_none());
        assert_eq!(user.display_name(), "Ada");
    }

    #[test]
    fn documents_without_a_creator_still_load() {
        let user = User::system("a@x.com", "digest".into(), "Ann Lee");
        let mut doc = serde_json::to_value(&user).unwrap();
        assert_eq!(doc["created_by"], Json::Null);
        doc.as_object_mut().unwrap().remove("created_by");
        let loaded: User = serde_json::from_value(doc).unwrap();
        assert!(loaded.created_by.is_none());
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_value(Role::SuperAdmin).unwrap(), "super_admin");
        assert_eq!(Role::SuperAdmin.as_str(), "super_admin");
        assert_eq!(serde_json::to_value(Gender::Female).unwrap(), Gender::Female.as_str());
    }
}
