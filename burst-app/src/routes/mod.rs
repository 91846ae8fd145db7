pub mod batches;
pub mod config;
pub mod health;
pub mod webhook;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(webhook::router())
        .merge(batches::router())
        .merge(config::router())
}
