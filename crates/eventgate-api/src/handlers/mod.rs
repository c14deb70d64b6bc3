//! API request handlers

pub mod consumers;
pub mod health;
pub mod topics;

use axum::response::sse::{KeepAlive, Sse};
use tokio_stream::wrappers::ReceiverStream;

use crate::streaming::SseItem;

pub type EventStream = Sse<ReceiverStream<SseItem>>;

pub(crate) fn event_stream(body: ReceiverStream<SseItem>) -> EventStream {
    Sse::new(body).keep_alive(KeepAlive::default())
}
