use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{CreateBrand, ListQuery, UpdateBrand},
    model::Brand,
};
use crate::{
    auth::extractors::{AuthUser, ADMINS},
    db::Page,
    error::{AppError, AppResult},
    state::AppState,
    storage::ImageForm,
};

const ATTACHMENT: &str = "attachment";

pub fn brand_routes() -> Router<AppState> {
    Router::new()
        .route("/brand", get(find_all).post(create))
        .route("/brand/archive", get(find_all_archived))
        .route("/brand/:brand_id", get(find_one).patch(update))
        .route("/brand/:brand_id/archive", get(find_one_archived))
        .route("/brand/:brand_id/attachment", patch(update_attachment))
        .route("/brand/:brand_id/freeze", delete(freeze))
        .route("/brand/:brand_id/delete", delete(remove))
        .route("/brand/:brand_id/restore", patch(restore))
        .layer(DefaultBodyLimit::max(5 * 1024 * 1024))
}

#[instrument(skip(state, auth, mp))]
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    mp: Multipart,
) -> AppResult<(StatusCode, Json<Brand>)> {
    auth.require(ADMINS)?;
    let mut form = ImageForm::read(mp, ATTACHMENT).await?;
    let input = CreateBrand {
        name: form.take("name").ok_or_else(|| AppError::bad_request("name is required"))?,
        slogan: form
            .take("slogan")
            .ok_or_else(|| AppError::bad_request("slogan is required"))?,
    };
    input.validate()?;
    let image = form.require_image()?;
    let brand = state.brands().create(input, image, auth.user.id).await?;
    Ok((StatusCode::CREATED, Json(brand)))
}

#[instrument(skip(state))]
pub async fn find_all(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Brand>>> {
    Ok(Json(state.brands().find_all(&query, false).await?))
}

#[instrument(skip(state, auth))]
pub async fn find_all_archived(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Brand>>> {
    auth.require(ADMINS)?;
    Ok(Json(state.brands().find_all(&query, true).await?))
}

#[instrument(skip(state))]
pub async fn find_one(State(state): State<AppState>, Path(brand_id): Path<Uuid>) -> AppResult<Json<Brand>> {
    Ok(Json(state.brands().find_one(brand_id, false).await?))
}

#[instrument(skip(state, auth))]
pub async fn find_one_archived(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(brand_id): Path<Uuid>,
) -> AppResult<Json<Brand>> {
    auth.require(ADMINS)?;
    Ok(Json(state.brands().find_one(brand_id, true).await?))
}

#[instrument(skip(state, auth, payload))]
pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(brand_id): Path<Uuid>,
    Json(payload): Json<UpdateBrand>,
) -> AppResult<Json<Brand>> {
    auth.require(ADMINS)?;
    payload.validate()?;
    Ok(Json(state.brands().update(brand_id, payload, auth.user.id).await?))
}

#[instrument(skip(state, auth, mp))]
pub async fn update_attachment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(brand_id): Path<Uuid>,
    mp: Multipart,
) -> AppResult<Json<Brand>> {
    auth.require(ADMINS)?;
    let image = ImageForm::read(mp, ATTACHMENT).await?.require_image()?;
    Ok(Json(
        state
            .brands()
            .update_attachment(brand_id, image, auth.user.id)
            .await?,
    ))
}

#[instrument(skip(state, auth))]
pub async fn freeze(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(brand_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.require(ADMINS)?;
    state.brands().freeze(brand_id, auth.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, auth))]
pub async fn remove(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(brand_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.require(ADMINS)?;
    state.brands().delete(brand_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, auth))]
pub async fn restore(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(brand_id): Path<Uuid>,
) -> AppResult<Json<Brand>> {
    auth.require(ADMINS)?;
    Ok(Json(state.brands().restore(brand_id, auth.user.id).await?))
}
