use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::claims::{Claims, SignatureLevel, TokenKind};
use crate::{
    error::AppError,
    state::AppState,
    users::model::{Role, User},
};

async fn resolve(parts: &Parts, state: &AppState, kind: TokenKind) -> Result<(User, Claims), AppError> {
    // Read Authorization header
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidToken)?;

    // Expect "Bearer <token>" or "System <token>"
    let (level, token) = SignatureLevel::parse_header(header).ok_or_else(|| {
        warn!("invalid auth scheme");
        AppError::InvalidToken
    })?;

    state
        .tokens
        .authenticate(&state.users(), token, kind, level)
        .await
}

/// The active owner of a valid access token.
pub struct AuthUser {
    pub user: User,
    pub claims: Claims,
}

impl AuthUser {
    /// Gates on the stored role, not the one in the token.
    pub fn require(&self, roles: &[Role]) -> Result<(), AppError> {
        if roles.contains(&self.user.role) {
            Ok(())
        } else {
            warn!(user_id = %self.user.id, role = self.user.role.as_str(), "forbidden");
            Err(AppError::Forbidden("not authorized to access this resource".into()))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let (user, claims) = resolve(parts, state, TokenKind::Access).await?;
        Ok(AuthUser { user, claims })
    }
}

/// The active owner of a valid refresh token.
pub struct RefreshUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for RefreshUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let (user, _) = resolve(parts, state, TokenKind::Refresh).await?;
        Ok(RefreshUser(user))
    }
}

pub const ADMINS: &[Role] = &[Role::Admin, Role::SuperAdmin];

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;
    use crate::state::testing::TestApp;

    fn parts(auth: Option<String>) -> Parts {
        let mut req = Request::builder().uri("/");
        if let Some(value) = auth {
            req = req.header(AUTHORIZATION, value);
        }
        req.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn access_token_resolves_its_owner() {
        let app = TestApp::new();
        let user = app.seed_user("a@x.com", Role::User).await;
        let token = app.state.tokens.issue_access_token(&user).unwrap();

        let mut p = parts(Some(format!("Bearer {token}")));
        let auth = AuthUser::from_request_parts(&mut p, &app.state).await.unwrap();
        assert_eq!(auth.user.id, user.id);
        assert!(auth.require(&[Role::User]).is_ok());
        assert!(matches!(auth.require(ADMINS), Err(AppError::Forbidden(_))));

        // wrong scheme for the signing level
        let mut p = parts(Some(format!("System {token}")));
        assert!(AuthUser::from_request_parts(&mut p, &app.state).await.is_err());

        // refresh extractor refuses an access token
        let mut p = parts(Some(format!("Bearer {token}")));
        assert!(RefreshUser::from_request_parts(&mut p, &app.state).await.is_err());
    }

    #[tokio::test]
    async fn admins_use_the_system_scheme() {
        let app = TestApp::new();
        let admin = app.seed_user("root@x.com", Role::Admin).await;
        let token = app.state.tokens.issue_refresh_token(&admin).unwrap();

        let mut p = parts(Some(format!("System {token}")));
        let RefreshUser(user) = RefreshUser::from_request_parts(&mut p, &app.state).await.unwrap();
        assert_eq!(user.id, admin.id);
    }

    #[tokio::test]
    async fn missing_header_is_an_invalid_token() {
        let app = TestApp::new();
        let mut p = parts(None);
        let err = AuthUser::from_request_parts(&mut p, &app.state).await.err().unwrap();
        assert!(matches!(err, AppError::InvalidToken));
    }
}
