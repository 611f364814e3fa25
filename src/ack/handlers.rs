use super::protocol::*;
use super::view::SchemaView;

use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

pub async fn handle_schema_announce(
    Extension(view): Extension<Arc<SchemaView>>,
    Json(req): Json<AnnounceRequest>,
) -> (StatusCode, Json<ConfirmResponse>) {
    tracing::debug!(
        "Received schema announce for index {} key {}",
        req.event.index,
        req.event.key
    );

    let loaded = view.reload(&req.event);

    (
        StatusCode::OK,
        Json(ConfirmResponse {
            instance: view.instance().clone(),
            loaded,
        }),
    )
}

pub async fn handle_schema_confirm(
    Extension(view): Extension<Arc<SchemaView>>,
    Json(req): Json<ConfirmRequest>,
) -> (StatusCode, Json<ConfirmResponse>) {
    (
        StatusCode::OK,
        Json(ConfirmResponse {
            instance: view.instance().clone(),
            loaded: view.has_loaded(&req.event),
        }),
    )
}
