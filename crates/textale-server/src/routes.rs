use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, info, warn};

use textale_gateway::Error;
use textale_types::ChannelName;

use crate::AppState;
use crate::adapter;

/// Upper bound on `?limit=` for history reads.
pub const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub format: HistoryFormat,
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryFormat {
    #[default]
    Json,
    /// One rendered `HH:MM:SS author: body` line per message
    Text,
}

fn default_limit() -> usize {
    textale_gateway::store::DEFAULT_HISTORY_LIMIT
}

fn status_for(e: &Error) -> StatusCode {
    match e {
        Error::InvalidChannel(_) => StatusCode::BAD_REQUEST,
        Error::StoreUnavailable(_) | Error::BrokerUnavailable(_) | Error::MetadataUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn list_channels(State(state): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    let names = state.services.list_channels().await.map_err(|e| {
        error!("Channel listing failed: {}", e);
        status_for(&e)
    })?;
    Ok(Json(names))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, StatusCode> {
    let channel = ChannelName::parse(&name).map_err(|e| {
        warn!("Rejected history request for {:?}: {}", name, e);
        StatusCode::BAD_REQUEST
    })?;
    let limit = query.limit.min(MAX_HISTORY_LIMIT);

    let messages = state
        .services
        .store
        .recent_history(&channel, limit)
        .await
        .map_err(|e| {
            error!("History read for #{} failed: {}", channel, e);
            status_for(&e)
        })?;

    let response = match query.format {
        HistoryFormat::Json => Json(messages).into_response(),
        HistoryFormat::Text => messages
            .iter()
            .map(|m| m.render_line() + "\n")
            .collect::<String>()
            .into_response(),
    };
    Ok(response)
}

/// Ban-checked upgrade into a live chat session.
pub async fn session_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let client_addr = peer.ip().to_string();

    match state.services.is_banned(&client_addr).await {
        Ok(false) => {}
        Ok(true) => {
            info!("Refusing banned client {}", client_addr);
            return Err(StatusCode::FORBIDDEN);
        }
        Err(e) => {
            error!("Ban check for {} failed: {}", client_addr, e);
            return Err(status_for(&e));
        }
    }

    Ok(ws.on_upgrade(move |socket| adapter::run_session(socket, state, peer)))
}
