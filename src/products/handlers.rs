use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{parse_keys, parse_number, parse_uuid, CreateProduct, UpdateProduct},
    model::Product,
};
use crate::{
    auth::extractors::{AuthUser, ADMINS},
    brands::dto::ListQuery,
    db::Page,
    error::{AppError, AppResult},
    state::AppState,
    storage::ImageForm,
};

const ATTACHMENTS: &str = "attachments";
const MAX_IMAGES: usize = 5;

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/product", get(find_all).post(create))
        .route("/product/archive", get(find_all_archived))
        .route("/product/:product_id", get(find_one).patch(update))
        .route("/product/:product_id/archive", get(find_one_archived))
        .route("/product/:product_id/attachment", patch(update_attachment))
        .route("/product/:product_id/freeze", delete(freeze))
        .route("/product/:product_id/delete", delete(remove))
        .route("/product/:product_id/restore", patch(restore))
        .route(
            "/product/:product_id/wishlist",
            patch(add_to_wishlist).delete(remove_from_wishlist),
        )
        .layer(DefaultBodyLimit::max(MAX_IMAGES * 5 * 1024 * 1024))
}

fn required(form: &mut ImageForm, field: &str) -> AppResult<String> {
    form.take(field)
        .ok_or_else(|| AppError::bad_request(format!("{field} is required")))
}

#[instrument(skip(state, auth, mp))]
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    mp: Multipart,
) -> AppResult<(StatusCode, Json<Product>)> {
    auth.require(ADMINS)?;
    let mut form = ImageForm::read(mp, ATTACHMENTS).await?;
    let input = CreateProduct {
        name: required(&mut form, "name")?,
        description: required(&mut form, "description")?,
        original_price: parse_number("original_price", &required(&mut form, "original_price")?)?,
        discount_percent: form
            .take("discount_percent")
            .map(|raw| parse_number("discount_percent", &raw))
            .transpose()?,
        stock: parse_number("stock", &required(&mut form, "stock")?)?,
        category: parse_uuid("category", &required(&mut form, "category")?)?,
        brand: parse_uuid("brand", &required(&mut form, "brand")?)?,
    };
    input.validate()?;
    let images = form.take_images();
    if images.len() > MAX_IMAGES {
        return Err(AppError::bad_request(format!("at most {MAX_IMAGES} images are allowed")));
    }
    let product = state.products().create(input, images, auth.user.id).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

#[instrument(skip(state))]
pub async fn find_all(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Product>>> {
    Ok(Json(state.products().find_all(&query, false).await?))
}

#[instrument(skip(state, auth))]
pub async fn find_all_archived(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Page<Product>>> {
    auth.require(ADMINS)?;
    Ok(Json(state.products().find_all(&query, true).await?))
}

#[instrument(skip(state))]
pub async fn find_one(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    Ok(Json(state.products().find_one(product_id, false).await?))
}

#[instrument(skip(state, auth))]
pub async fn find_one_archived(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    auth.require(ADMINS)?;
    Ok(Json(state.products().find_one(product_id, true).await?))
}

#[instrument(skip(state, auth, payload))]
pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateProduct>,
) -> AppResult<Json<Product>> {
    auth.require(ADMINS)?;
    payload.validate()?;
    Ok(Json(
        state
            .products()
            .update(product_id, payload, auth.user.id)
            .await?,
    ))
}

#[instrument(skip(state, auth, mp))]
pub async fn update_attachment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
    mp: Multipart,
) -> AppResult<Json<Product>> {
    auth.require(ADMINS)?;
    let mut form = ImageForm::read(mp, ATTACHMENTS).await?;
    let removed = form
        .take("removed_attachments")
        .map(|raw| parse_keys(&raw))
        .transpose()?
        .unwrap_or_default();
    let images = form.take_images();
    if images.len() > MAX_IMAGES {
        return Err(AppError::bad_request(format!("at most {MAX_IMAGES} images are allowed")));
    }
    Ok(Json(
        state
            .products()
            .update_attachment(product_id, removed, images, auth.user.id)
            .await?,
    ))
}

#[instrument(skip(state, auth))]
pub async fn freeze(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.require(ADMINS)?;
    state.products().freeze(product_id, auth.user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, auth))]
pub async fn remove(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    auth.require(ADMINS)?;
    state.products().delete(product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, auth))]
pub async fn restore(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    auth.require(ADMINS)?;
    Ok(Json(state.products().restore(product_id, auth.user.id).await?))
}

#[instrument(skip(state, auth), fields(user_id = %auth.user.id))]
pub async fn add_to_wishlist(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    Ok(Json(state.products().add_to_wishlist(product_id, &auth.user).await?))
}

#[instrument(skip(state, auth), fields(user_id = %auth.user.id))]
pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(product_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state
        .products()
        .remove_from_wishlist(product_id, &auth.user)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        brands::dto::CreateBrand,
        categories::dto::CreateCategory,
        state::testing::{png, TestApp},
        users::model::Role,
    };

    const BOUNDARY: &str = "XBOUNDARYX";

    fn multipart_body(fields: &[(&str, String)], images: usize) -> Body {
        let mut body = Vec::new();
        for (field, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        for i in 0..images {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{ATTACHMENTS}\"; filename=\"{i}.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"\x89PNG\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    #[tokio::test]
    async fn admin_creates_and_user_wishlists() {
        let app = TestApp::new();
        let router = product_routes().with_state(app.state.clone());
        let admin = app.seed_user("root@x.com", Role::Admin).await;
        let user = app.seed_user("a@x.com", Role::User).await;
        let admin_token = app.state.tokens.issue_access_token(&admin).unwrap();
        let user_token = app.state.tokens.issue_access_token(&user).unwrap();

        let brand = app
            .state
            .brands()
            .create(
                CreateBrand {
                    name: "Acme".into(),
                    slogan: "Things".into(),
                },
                png(),
                admin.id,
            )
            .await
            .unwrap();
        let category = app
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

        let fields = [
            ("name", "Road Runner".to_string()),
            ("description", "Fast shoe".to_string()),
            ("original_price", "100".to_string()),
            ("discount_percent", "10".to_string()),
            ("stock", "4".to_string()),
            ("category", category.id.to_string()),
            ("brand", brand.id.to_string()),
        ];
        let create = |token: &str| {
            Request::post("/product")
                .header("authorization", token.to_string())
                .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
                .body(multipart_body(&fields, 2))
                .unwrap()
        };

        let res = router.clone().oneshot(create(&format!("Bearer {user_token}"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = router.clone().oneshot(create(&format!("System {admin_token}"))).await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let product: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(product["sale_price"], 90.0);
        assert_eq!(product["images"].as_array().unwrap().len(), 2);

        let uri = format!("/product/{}/wishlist", product["id"].as_str().unwrap());
        let req = Request::patch(&uri)
            .header("authorization", format!("Bearer {user_token}"))
            .body(Body::empty())
            .unwrap();
        let res = router.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let req = Request::delete(&uri)
            .header("authorization", format!("Bearer {user_token}"))
            .body(Body::empty())
            .unwrap();
        let res = router.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }
}
