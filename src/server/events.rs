//! Cross-request tiddler change notification.
//!
//! A process-scoped broadcast channel fans changes out to SSE connections.
//! Each connection owns its own receiver: subscribe on connect, dropped on
//! close, so listener lifecycles follow the connections that need them.

use std::collections::HashSet;

use axum::response::sse::Event;
use futures_util::Stream;
use futures_util::stream;
use serde::Serialize;
use tokio::sync::broadcast;

pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct TiddlerChange {
    pub bag_name: String,
    pub title: String,
    pub revision_id: i64,
    pub is_deleted: bool,
}

pub type ChangeSender = broadcast::Sender<TiddlerChange>;

#[must_use]
pub fn change_channel() -> ChangeSender {
    broadcast::channel(CHANGE_CHANNEL_CAPACITY).0
}

/// Publishes a change, ignoring the no-subscribers case.
pub fn publish(sender: &ChangeSender, change: TiddlerChange) {
    let _ = sender.send(change);
}

/// Builds the SSE event stream for one connection, filtered to a set of bag
/// names. Lagged receivers skip ahead rather than dropping the connection;
/// failures are logged locally and never escape to the response path.
pub fn change_stream(
    sender: &ChangeSender,
    bag_names: HashSet<String>,
) -> impl Stream<Item = Result<Event, axum::Error>> + use<> {
    let rx = sender.subscribe();

    stream::unfold((rx, bag_names), |(mut rx, bag_names)| async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    if !bag_names.contains(&change.bag_name) {
                        continue;
                    }
                    let data = match serde_json::to_string(&change) {
                        Ok(data) => data,
                        Err(e) => {
                            tracing::error!("failed to serialize change event: {e}");
                            continue;
                        }
                    };
                    let event = Event::default()
                        .event("change")
                        .id(change.revision_id.to_string())
                        .data(data);
                    return Some((Ok(event), (rx, bag_names)));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("change subscriber lagged, skipped {skipped} events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return None;
                }
            }
        }
    })
}
