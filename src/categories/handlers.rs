use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{parse_ids, CreateCategory, UpdateCategory},
    model::Category,
};
use crate::{
    auth::extractors::{AuthUser, ADMINS},
    brands::dto::ListQuery,
    db::Page,
    error::{AppError, AppResult},
    state::AppState,
    storage::ImageForm,
};

pub fn category_routes() -> Router<AppState> {
    Router::new()
        .route("/category", get(find_all).post(create))
        .route("/category/archive", get(find_all_archived))
        .route("/category/:category_id", get(find_one).patch(update))
        .route("/category/:category_id/archive", get(find_one_archived))
        .route("/category/:category_id/attachment", patch(update_attachment))
        .route("/category/:category_id/freeze", delete(freeze))
        .route("/category/:category_id/delete", delete(remove))
        .route("/category/:category_id/restore", patch(restore))
        .layer(DefaultBodyLimit::max(5 * 1024 * 1024))
}

#[instrument(skip(state, auth, mp))]
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    mp: Multipart,
) -> AppResult<(StatusCode, Json<Category>)> {
    auth.require(ADMINS)?;
    let mut form = ImageForm::read(mp, "attachment").await?;
    let input = CreateCategory {
        name: form.take("name").ok_or_else(|| AppError::bad_request("name is required"))?,
        description: form.take("description"),
        brands: form
            .take("brands")
            .map(|raw| parse_ids(&raw))
            .transpose()?
            .unwrap_or_default(),
    };
    input.validate()?;
    let image = form.require_image()?;
    let category = state.categories().create(input, image, auth.user.id).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

#[instrument(skip(state))]
pub async fn find_all(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Category>>> {
    Ok(Json(state.categories().find_all(&query, false).await?))
}

#[instrument(skip(state, auth))]
pub async fn find_all_archived(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Category>>> {
    auth.require(ADMINS)?;
    Ok(Json(state.categories().find_all(&query, true).await?))
}

#[instrument(skip(state))]
pub async fn find_one(
    State(state): State<AppState>,
    Path(category_id): Path<Uuid>,
) -> AppResult<Json<Category>> {
    Ok(Json(state.categories().find_one(category_id, false).await?))
}

#[instrument(skip(state, auth))]
pub async fn find_one_archived(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(category_id): Path<Uuid>,
) -> AppResult<Json<Category>> {
    auth.require(ADMINS)?;
    Ok(Json(state.categories().find_one(category_id, true).await?))
}

#[instrument(skip(state, auth, payload))]
pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(category_id): Path<Uuid>,
    Json(payload): Json<UpdateCategory>,
) -> AppResult<Json<Category>> {
    auth.require(ADMINS)?;
    payload.validate()?;
    Ok(Json(
        state
            .categories()
            .update(category_id, payload, auth.user.id)
            .await?,
    ))
}

#[instrument(skip(state, auth, mp))]
pub async fn update_attachment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(category_id): Path<Uuid>,
    mp: Multipart,
) -> AppResult<Json<Category>> {
    auth.require(ADMINS)?;
    let image = ImageForm::read(mp, "attachment").await?.require_image()?;
    Ok(Json(
        state
            .categories()
            .update_attachment(category_id, image, auth.user.id)
            .await?,
    ))
}

#[instrument(skip(state, auth))]
pub async fn freeze(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(category_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.require(ADMINS)?;
    state.categories().freeze(category_id, auth.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, auth))]
pub async fn remove(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(category_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.require(ADMINS)?;
    state.categories().delete(category_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, auth))]
pub async fn restore(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(category_id): Path<Uuid>,
) -> AppResult<Json<Category>> {
    auth.require(ADMINS)?;
    Ok(Json(state.categories().restore(category_id, auth.user.id).await?))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::{
        categories::dto::CreateCategory,
        state::testing::{png, TestApp},
        users::model::Role,
    };

    #[tokio::test]
    async fn json_update_reconciles_brands() {
        let app = TestApp::new();
        let router = category_routes().with_state(app.state.clone());
        let admin = app.seed_user("root@x.com", Role::Admin).await;
        let token = app.state.tokens.issue_access_token(&admin).unwrap();
        let cat = app
            .state
            .categories()
            .create(
                CreateCategory {
                    name: "Shoes".into(),
                    ..Default::default()
                },
                png(),
                admin.id,
            )
            .await
            .unwrap();

        let req = Request::patch(format!("/category/{}", cat.id))
            .header("authorization", format!("System {token}"))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "remove_brands": [uuid::Uuid::new_v4()] }).to_string(),
            ))
            .unwrap();
        let res = router.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let req = Request::patch(format!("/category/{}", cat.id))
            .header("authorization", format!("System {token}"))
            .header("content-type", "application/json")
            .body(Body::from(json!({}).to_string()))
            .unwrap();
        let res = router.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
