use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{ProfileView, UpdateProfile};
use crate::{
    auth::{
        extractors::{AuthUser, RefreshUser, ADMINS},
        jwt::Credentials,
    },
    error::AppResult,
    state::AppState,
    storage::ImageForm,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user", get(profile))
        .route("/user/profile", patch(update_profile))
        .route("/user/refresh-token", get(refresh_token))
        .route("/user/logout", post(logout_everywhere))
        .route(
            "/user/profile-image",
            patch(profile_image).layer(DefaultBodyLimit::max(2 * 1024 * 1024)),
        )
        .route("/user/:user_id/freeze", delete(freeze))
        .route("/user/:user_id/delete", delete(remove))
        .route("/user/:user_id/restore", patch(restore))
}

#[instrument(skip(state, auth), fields(user_id = %auth.user.id))]
pub async fn profile(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<ProfileView>> {
    Ok(Json(state.accounts().profile(auth.user.id).await?))
}

#[instrument(skip(state, auth, payload), fields(user_id = %auth.user.id))]
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<UpdateProfile>,
) -> AppResult<Json<ProfileView>> {
    payload.validate()?;
    Ok(Json(state.accounts().update_profile(&auth.user, payload).await?))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn refresh_token(
    State(state): State<AppState>,
    RefreshUser(user): RefreshUser,
) -> AppResult<Json<Credentials>> {
    Ok(Json(state.accounts().refresh(&user)?))
}

#[instrument(skip(state, auth), fields(user_id = %auth.user.id))]
pub async fn logout_everywhere(State(state): State<AppState>, auth: AuthUser) -> AppResult<StatusCode> {
    state.accounts().logout_everywhere(&auth.user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, auth, mp), fields(user_id = %auth.user.id))]
pub async fn profile_image(
    State(state): State<AppState>,
    auth: AuthUser,
    mp: Multipart,
) -> AppResult<Json<ProfileView>> {
    let mut form = ImageForm::read(mp, "profile_image").await?;
    let image = form.require_image()?;
    Ok(Json(
        state
            .accounts()
            .upload_profile_picture(&auth.user, image)
            .await?,
    ))
}

#[instrument(skip(state, auth))]
pub async fn freeze(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.require(ADMINS)?;
    state.accounts().freeze(user_id, auth.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, auth))]
pub async fn remove(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.require(ADMINS)?;
    state.accounts().delete(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, auth))]
pub async fn restore(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ProfileView>> {
    auth.require(ADMINS)?;
    Ok(Json(state.accounts().restore(user_id, auth.user.id).await?))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::{state::testing::TestApp, users::model::Role};

    fn request(method: &str, uri: &str, auth: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", auth)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn only_admins_freeze_accounts() {
        let app = TestApp::new();
        let router = user_routes().with_state(app.state.clone());
        let user = app.seed_user("a@x.com", Role::User).await;
        let admin = app.seed_user("root@x.com", Role::Admin).await;
        let user_token = app.state.tokens.issue_access_token(&user).unwrap();
        let admin_token = app.state.tokens.issue_access_token(&admin).unwrap();
        let uri = format!("/user/{}/freeze", user.id);

        let res = router
            .clone()
            .oneshot(request("DELETE", &uri, &format!("Bearer {user_token}")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = router
            .clone()
            .oneshot(request("DELETE", &uri, &format!("System {admin_token}")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        // the frozen user is locked out
        let res = router
            .oneshot(request("GET", "/user", &format!("Bearer {user_token}")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn profile_update_renames_the_caller() {
        let app = TestApp::new();
        let router = user_routes().with_state(app.state.clone());
        let user = app.seed_user("a@x.com", Role::User).await;
        let token = app.state.tokens.issue_access_token(&user).unwrap();

        let req = Request::patch("/user/profile")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"username":"Ada King Lovelace"}"#))
            .unwrap();
        let res = router.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let stored = app.state.accounts().profile(user.id).await.unwrap();
        assert_eq!(stored.username, "Ada King Lovelace");

        let req = Request::patch("/user/profile")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let res = router.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn refresh_requires_a_refresh_token() {
        let app = TestApp::new();
        let router = user_routes().with_state(app.state.clone());
        let user = app.seed_user("a@x.com", Role::User).await;
        let creds = app.state.tokens.create_login_credentials(&user).unwrap();

        let res = router
            .clone()
            .oneshot(request("GET", "/user/refresh-token", &format!("Bearer {}", creds.access_token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = router
            .oneshot(request("GET", "/user/refresh-token", &format!("Bearer {}", creds.refresh_token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
