use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::{Claims, SignatureLevel, TokenKind};
use crate::{
    config::JwtConfig,
    db::{Filter, QueryOptions, Repository},
    error::AppError,
    users::model::User,
};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid or expired token")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("expected {expected:?} token, got {actual:?}")]
    KindMismatch { expected: TokenKind, actual: TokenKind },
    #[error("token signing failed")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(e) => AppError::Internal(e.into()),
            _ => AppError::InvalidToken,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Issues and verifies access/refresh tokens.
///
/// Every (kind, level) pair has its own secret.
#[derive(Clone)]
pub struct TokenService {
    access_bearer: KeyPair,
    access_system: KeyPair,
    refresh_bearer: KeyPair,
    refresh_system: KeyPair,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

fn unix_millis(t: OffsetDateTime) -> i64 {
    i64::try_from(t.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            access_bearer: KeyPair::from_secret(&cfg.access_bearer_secret),
            access_system: KeyPair::from_secret(&cfg.access_system_secret),
            refresh_bearer: KeyPair::from_secret(&cfg.refresh_bearer_secret),
            refresh_system: KeyPair::from_secret(&cfg.refresh_system_secret),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs(cfg.ttl_minutes.max(1) as u64 * 60),
            refresh_ttl: Duration::from_secs(cfg.refresh_ttl_minutes.max(1) as u64 * 60),
        }
    }

    fn keys(&self, kind: TokenKind, level: SignatureLevel) -> &KeyPair {
        match (kind, level) {
            (TokenKind::Access, SignatureLevel::Bearer) => &self.access_bearer,
            (TokenKind::Access, SignatureLevel::System) => &self.access_system,
            (TokenKind::Refresh, SignatureLevel::Bearer) => &self.refresh_bearer,
            (TokenKind::Refresh, SignatureLevel::System) => &self.refresh_system,
        }
    }

    fn sign_with_kind(&self, user: &User, kind: TokenKind) -> Result<String, TokenError> {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user.id,
            role: user.role,
            kind,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            epoch: unix_millis(now),
        };
        let level = SignatureLevel::for_role(user.role);
        let token = encode(&Header::default(), &claims, &self.keys(kind, level).encoding)
            .map_err(TokenError::Signing)?;
        debug!(user_id = %user.id, kind = ?kind, level = ?level, "jwt signed");
        Ok(token)
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, TokenError> {
        self.sign_with_kind(user, TokenKind::Access)
    }

    pub fn issue_refresh_token(&self, user: &User) -> Result<String, TokenError> {
        self.sign_with_kind(user, TokenKind::Refresh)
    }

    pub fn create_login_credentials(&self, user: &User) -> Result<Credentials, TokenError> {
        Ok(Credentials {
            access_token: self.issue_access_token(user)?,
            refresh_token: self.issue_refresh_token(user)?,
        })
    }

    pub fn verify(
        &self,
        token: &str,
        expected: TokenKind,
        level: SignatureLevel,
    ) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        let data = decode::<Claims>(token, &self.keys(expected, level).decoding, &validation)
            .map_err(TokenError::Invalid)?;
        let claims = data.claims;
        if claims.kind != expected {
            return Err(TokenError::KindMismatch {
                expected,
                actual: claims.kind,
            });
        }
        debug!(user_id = %claims.sub, kind = ?claims.kind, "jwt verified");
        Ok(claims)
    }

    /// Verifies the token and resolves its active owner.
    ///
    /// A token issued before the owner's last credential change, or carrying
    /// a role the owner no longer has, is stale.
    pub async fn authenticate(
        &self,
        users: &Repository<User>,
        token: &str,
        expected: TokenKind,
        level: SignatureLevel,
    ) -> Result<(User, Claims), AppError> {
        let claims = self.verify(token, expected, level).map_err(|e| {
            warn!(error = %e, "token rejected");
            AppError::from(e)
        })?;

        let user = users
            .find_one(Filter::by_id(claims.sub), QueryOptions::default())
            .await?
            .ok_or_else(|| {
                warn!(user_id = %claims.sub, "token owner missing or freezed");
                AppError::InvalidToken
            })?;

        let changed_after_issue = user
            .change_credentials_time
            .is_some_and(|t| unix_millis(t) > claims.epoch);
        if changed_after_issue || user.role != claims.role {
            warn!(user_id = %user.id, "stale credentials");
            return Err(AppError::StaleCredentials);
        }
        Ok((user, claims))
    }
}
