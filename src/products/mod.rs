use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
pub mod model;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::product_routes())
}
