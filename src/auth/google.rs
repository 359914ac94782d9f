//! External identity provider port and the Google ID-token adapter.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::error::AppError;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// What the provider attests about the token's holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub email: String,
    pub email_verified: bool,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity token rejected: {0}")]
    Rejected(String),
    #[error("identity provider unavailable")]
    Unavailable(#[source] anyhow::Error),
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Rejected(reason) => {
                warn!(reason = %reason, "identity token rejected");
                AppError::bad_request("failed to verify this google account")
            }
            IdentityError::Unavailable(e) => AppError::Internal(e),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_identity_token(&self, token: &str) -> Result<ExternalIdentity, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

impl TokenInfo {
    fn into_identity(self, client_ids: &[String]) -> Result<ExternalIdentity, IdentityError> {
        if !client_ids.iter().any(|id| *id == self.aud) {
            return Err(IdentityError::Rejected(format!("unexpected audience {}", self.aud)));
        }
        let email = self
            .email
            .ok_or_else(|| IdentityError::Rejected("token carries no email".into()))?;
        Ok(ExternalIdentity {
            email: email.trim().to_lowercase(),
            email_verified: self.email_verified.as_deref() == Some("true"),
            given_name: self.given_name,
            family_name: self.family_name,
            picture: self.picture,
        })
    }
}

/// Verifies Google ID tokens through the `tokeninfo` endpoint.
#[derive(Debug, Clone)]
pub struct GoogleIdentity {
    client: reqwest::Client,
    client_ids: Vec<String>,
}

impl GoogleIdentity {
    pub fn new(client_ids: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_ids,
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentity {
    async fn verify_identity_token(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
        let response = self
            .client
            .get(TOKENINFO_URL)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.into()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(IdentityError::Rejected(format!("tokeninfo returned {status}")));
        }
        if !status.is_success() {
            return Err(IdentityError::Unavailable(anyhow::anyhow!(
                "tokeninfo returned {status}"
            )));
        }
        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| IdentityError::Unavailable(e.into()))?;
        info.into_identity(&self.client_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(aud: &str, verified: &str) -> TokenInfo {
        serde_json::from_value(serde_json::json!({
            "aud": aud,
            "email": " Ann@X.com ",
            "email_verified": verified,
            "given_name": "Ann",
            "family_name": "Lee",
            "exp": "1760000000"
        }))
        .unwrap()
    }

    #[test]
    fn audience_must_be_one_of_ours() {
        let ids = vec!["web".to_string(), "android".to_string()];
        assert!(info("android", "true").into_identity(&ids).is_ok());
        assert!(matches!(
            info("someone-else", "true").into_identity(&ids),
            Err(IdentityError::Rejected(_))
        ));
    }

    #[test]
    fn identity_is_normalized() {
        let ids = vec!["web".to_string()];
        let identity = info("web", "false").into_identity(&ids).unwrap();
        assert_eq!(identity.email, "ann@x.com");
        assert!(!identity.email_verified);
        assert_eq!(identity.given_name.as_deref(), Some("Ann"));
    }

    #[test]
    fn rejection_is_a_bad_request() {
        let err: AppError = IdentityError::Rejected("nope".into()).into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
