use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::{info, instrument};

use super::{
    dto::{
        ConfirmEmailRequest, EmailRequest, GoogleRequest, LoginRequest, MessageResponse,
        ResetPasswordRequest, SignupRequest,
    },
    jwt::Credentials,
};
use crate::{error::AppResult, state::AppState};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/signup/gmail", post(signup_with_google))
        .route("/auth/login/gmail", post(login_with_google))
        .route("/auth/resend-confirm-email", post(resend_confirmation_email))
        .route("/auth/confirm-email", post(confirm_email))
        .route("/auth/login", post(login))
        .route("/auth/forget-password", post(forget_password))
        .route("/auth/reset-password", post(reset_password))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    payload.validate()?;
    let message = state
        .auth()
        .signup(&payload.email, &payload.password, &payload.username)
        .await?;
    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}

#[instrument(skip(state, payload))]
pub async fn signup_with_google(
    State(state): State<AppState>,
    Json(payload): Json<GoogleRequest>,
) -> AppResult<Json<Credentials>> {
    Ok(Json(state.auth().signup_with_google(&payload.id_token).await?))
}

#[instrument(skip(state, payload))]
pub async fn login_with_google(
    State(state): State<AppState>,
    Json(payload): Json<GoogleRequest>,
) -> AppResult<Json<Credentials>> {
    Ok(Json(state.auth().login_with_google(&payload.id_token).await?))
}

#[instrument(skip(state, payload))]
pub async fn resend_confirmation_email(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    payload.validate()?;
    let message = state.auth().resend_confirmation_email(&payload.email).await?;
    Ok(Json(MessageResponse { message }))
}

#[instrument(skip(state, payload))]
pub async fn confirm_email(
    State(state): State<AppState>,
    Json(payload): Json<ConfirmEmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    payload.validate()?;
    let message = state
        .auth()
        .confirm_email(&payload.email, &payload.otp)
        .await?;
    Ok(Json(MessageResponse { message }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<Credentials>> {
    payload.validate()?;
    let credentials = state.auth().login(&payload.email, &payload.password).await?;
    info!("login succeeded");
    Ok(Json(credentials))
}

#[instrument(skip(state, payload))]
pub async fn forget_password(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    payload.validate()?;
    let message = state.auth().send_reset_code(&payload.email).await?;
    Ok(Json(MessageResponse { message }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    payload.validate()?;
    let message = state
        .auth()
        .reset_password(&payload.email, &payload.otp, &payload.password)
        .await?;
    Ok(Json(MessageResponse { message }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::state::testing::TestApp;

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn signup_confirm_and_login_over_http() {
        let mut app = TestApp::new();
        let router = auth_routes().with_state(app.state.clone());

        let res = router
            .clone()
            .oneshot(post_json(
                "/auth/signup",
                json!({
                    "username": "Ann Lee",
                    "email": "Ann@X.com",
                    "password": "longenough",
                    "confirm_password": "longenough"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let mail = app.next_email().await;
        let res = router
            .clone()
            .oneshot(post_json(
                "/auth/confirm-email",
                json!({ "email": "ann@x.com", "otp": mail.code }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = router
            .clone()
            .oneshot(post_json(
                "/auth/login",
                json!({ "email": "ann@x.com", "password": "longenough" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert!(body["access_token"].is_string());
        assert!(body["refresh_token"].is_string());
    }

    #[tokio::test]
    async fn bad_input_and_failures_map_to_error_bodies() {
        let app = TestApp::new();
        let router = auth_routes().with_state(app.state.clone());

        let res = router
            .clone()
            .oneshot(post_json(
                "/auth/login",
                json!({ "email": "nope", "password": "x" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = router
            .oneshot(post_json(
                "/auth/login",
                json!({ "email": "ghost@x.com", "password": "whatever1" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body = body_json(res).await;
        assert!(body["error"]["message"].is_string());
    }
}
