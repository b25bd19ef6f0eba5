use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{future, SinkExt, StreamExt};

use crate::api::{response::ApiResponse, AppState};
use crate::event::{IngestEvent, JsonSerializer, Serializer};
use crate::ingest::IngestError;
use crate::middleware::{ticket_set_cookie, CurrentUser, Ticket};

pub fn monitor_routes() -> Router<AppState> {
    Router::new().route("/", get(monitor).post(monitor_request))
}

#[tracing::instrument(skip(state, user))]
async fn monitor_request(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Response, IngestError> {
    let response = state.ingest.monitor_request(user.claims()).await?;

    let cookie = match response.ticket.as_deref() {
        Some(ticket) => Some(
            HeaderValue::from_str(&ticket_set_cookie(ticket))
                .map_err(|_| IngestError::not_available())?,
        ),
        None => None,
    };

    let mut res = ApiResponse::success(response).into_response();
    if let Some(cookie) = cookie {
        res.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    Ok(res)
}

async fn monitor(
    State(state): State<AppState>,
    Ticket(ticket): Ticket,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| stream_events(state, ticket, socket))
}

async fn stream_events(state: AppState, ticket: String, socket: WebSocket) {
    let (sink, mut receiver) = socket.split();
    let sink = sink.with(|event: IngestEvent| {
        future::ready(
            JsonSerializer
                .marshal(&event)
                .map_err(axum::Error::new)
                .and_then(|bytes| String::from_utf8(bytes).map_err(axum::Error::new))
                .map(Message::Text),
        )
    });

    let cancel = state.shutdown.child_token();

    // Incoming frames are ignored; the stream ends when the client goes away.
    let closed = cancel.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
        closed.cancel();
    });

    if let Err(e) = state.ingest.monitor(&ticket, cancel.clone(), sink).await {
        tracing::debug!(error = %e, "Monitor stream rejected");
    }

    cancel.cancel();
    reader.abort();
}
