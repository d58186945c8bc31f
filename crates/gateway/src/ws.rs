//! Per-connection WebSocket handling for front-end clients.

use std::sync::Arc;

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket, close_code},
    futures::{SinkExt, StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, trace},
};

use manifold_protocol::client::parse_action;

use crate::{clients::ClientLink, mux::Multiplexer};

/// Drive one front-end socket: register the link, pump queued events out,
/// dispatch inbound actions until the socket closes.
pub async fn handle_connection(socket: WebSocket, user_id: i64, mux: Arc<Multiplexer>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    mux.register_client(user_id, ClientLink::new(conn_id.clone(), tx))
        .await;
    debug!(user_id, conn_id = %conn_id, "client connected");

    // Write loop. Ends when the registry drops the sender — shutdown, or a
    // newer connection for this user took over — and then closes the socket
    // with an explicit reason rather than silently vanishing.
    let write_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "link closed by gateway".into(),
            })))
            .await;
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => match parse_action(&text) {
                Some(action) => mux.handle_client_action(user_id, action).await,
                None => trace!(user_id, "ignoring unknown client frame"),
            },
            Message::Close(_) => break,
            _ => {},
        }
    }

    // Only evicts the registry entry if it is still ours.
    mux.unregister_client(user_id, &conn_id).await;
    write_task.abort();
    debug!(user_id, conn_id = %conn_id, "client disconnected");
}
