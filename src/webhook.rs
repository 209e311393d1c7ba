use std::sync::Arc;

use axum::Router;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use serde::Deserialize;
use tracing::warn;

use crate::bot::Bot;
use crate::observability;

/// Inbound slash-command payload, as posted by the chat gateway.
#[derive(Debug, Deserialize)]
pub struct SlashRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub text: String,
}

pub fn router(bot: Arc<Bot>) -> Router {
    Router::new()
        .route("/slash", post(handle_slash))
        .with_state(bot)
}

/// The shared-secret check comes before everything else; a bad token never
/// reaches the dispatcher.
async fn handle_slash(State(bot): State<Arc<Bot>>, Form(request): Form<SlashRequest>) -> Response {
    if request.token != bot.slash_token() {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
        warn!(
            "rejected slash command with bad token from channel {}",
            request.channel_id
        );
        return (StatusCode::FORBIDDEN, "Not authenticated.").into_response();
    }

    let message = bot
        .dispatch(&request.channel_id, &request.user_name, &request.text)
        .await;
    Json(message).into_response()
}
