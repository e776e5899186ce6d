//! HTTP routes
//!
//! `POST /room/{id}` joins a room, `OPTIONS` answers CORS preflight and a
//! WebSocket upgrade on `GET` opens the room's real-time channel. Everything
//! else is a 404.

use super::channel;
use crate::room::schema::{JoinRequest, JoinResponse};
use crate::room::SharedRooms;
use crate::utils::error::{AppError, AppResult};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "POST, OPTIONS"),
    (
        "Access-Control-Allow-Headers",
        "Access-Control-Allow-Headers, Origin,Accept, X-Requested-With, Content-Type, Access-Control-Request-Method, Access-Control-Request-Headers",
    ),
];

/// Build the router serving every room
pub fn router(rooms: SharedRooms) -> Router {
    Router::new()
        .route(
            "/room/:room_id",
            post(join_room)
                .options(preflight)
                .get(open_channel)
                .fallback(not_found),
        )
        .fallback(not_found)
        .with_state(rooms)
}

/// Assign the caller a voice in the room
async fn join_room(
    State(rooms): State<SharedRooms>,
    Path(room_id): Path<String>,
    body: String,
) -> AppResult<Response> {
    let request: JoinRequest =
        serde_json::from_str(&body).map_err(|e| AppError::MalformedRequest(e.to_string()))?;
    if request.name.trim().is_empty() {
        return Err(AppError::MalformedRequest("name must not be blank".to_string()));
    }

    let sound = rooms.room(&room_id)?.join(request.name).await?;

    Ok((StatusCode::OK, CORS_HEADERS, Json(JoinResponse { sound })).into_response())
}

async fn preflight() -> impl IntoResponse {
    (StatusCode::OK, CORS_HEADERS)
}

/// Open the room's channel when the request is a WebSocket upgrade
async fn open_channel(
    State(rooms): State<SharedRooms>,
    Path(room_id): Path<String>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let Some(upgrade) = upgrade else {
        return not_found().await.into_response();
    };

    match rooms.room(&room_id) {
        Ok(room) => upgrade
            .on_upgrade(move |socket| channel::serve(socket, room))
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}
