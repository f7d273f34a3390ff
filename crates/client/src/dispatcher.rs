//! Outbound dispatch: realtime first, HTTP fallback when the transport is
//! down.
//!
//! A realtime send never synthesizes a local echo; the persisted message
//! arrives later as an inbound realtime event, so echoing here would double
//! it. A fallback send has no echo, so its result is funneled into the
//! store's single inbound entry point before the call returns.

use async_trait::async_trait;
use tracing::{debug, warn};

use talkline_shared::{ChatError, Message};

/// Realtime side of the outbound seam.
pub trait Publisher {
    fn is_connected(&self) -> bool;
    fn publish_message(&self, room_id: &str, content: &str) -> Result<(), ChatError>;
    fn publish_typing(&self, room_id: &str, is_typing: bool) -> Result<(), ChatError>;
}

/// Request/response side of the outbound seam.
#[async_trait]
pub trait FallbackSender {
    async fn send_via_fallback(&self, room_id: &str, content: &str) -> Result<Message, ChatError>;
}

/// Where fallback-delivered messages are recorded; implemented over the
/// store's `record_inbound_message`.
pub trait InboundSink {
    fn record_inbound_message(&self, message: Message);
}

/// Which path carried a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRoute {
    Realtime,
    Fallback,
}

pub struct OutboundDispatcher<P, F> {
    publisher: P,
    fallback: F,
}

impl<P: Publisher, F: FallbackSender> OutboundDispatcher<P, F> {
    pub fn new(publisher: P, fallback: F) -> Self {
        Self { publisher, fallback }
    }

    /// Send a message, choosing the path by connection status.
    ///
    /// Connected: publish over the transport and return; the log entry is
    /// made when the realtime echo arrives. A synchronous transport error
    /// falls back once, no loop. Not connected: fallback directly; on
    /// success the message enters the log through `sink` exactly once.
    pub async fn send(
        &self,
        room_id: &str,
        content: &str,
        sink: &impl InboundSink,
    ) -> Result<SendRoute, ChatError> {
        if self.publisher.is_connected() {
            match self.publisher.publish_message(room_id, content) {
                Ok(()) => return Ok(SendRoute::Realtime),
                Err(ChatError::NotConnected) | Err(ChatError::Transport(_)) => {
                    warn!(room_id, "realtime publish failed, using fallback");
                }
                Err(e) => return Err(e),
            }
        }

        let message = self.fallback.send_via_fallback(room_id, content).await?;
        sink.record_inbound_message(message);
        Ok(SendRoute::Fallback)
    }

    /// Best-effort typing notification: publish-only, silently dropped when
    /// not connected, never queued or retried.
    pub fn send_typing_status(&self, room_id: &str, is_typing: bool) {
        if !self.publisher.is_connected() {
            return;
        }
        if let Err(e) = self.publisher.publish_typing(room_id, is_typing) {
            debug!(room_id, error = %e, "dropping typing notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use talkline_shared::ApiError;

    struct FakePublisher {
        connected: bool,
        fail_publish: bool,
        published: AtomicU32,
        typing: AtomicU32,
    }

    impl FakePublisher {
        fn up() -> Self {
            Self { connected: true, fail_publish: false, published: AtomicU32::new(0), typing: AtomicU32::new(0) }
        }

        fn down() -> Self {
            Self { connected: false, fail_publish: false, published: AtomicU32::new(0), typing: AtomicU32::new(0) }
        }

        fn broken() -> Self {
            Self { connected: true, fail_publish: true, published: AtomicU32::new(0), typing: AtomicU32::new(0) }
        }
    }

    impl Publisher for FakePublisher {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn publish_message(&self, _room_id: &str, _content: &str) -> Result<(), ChatError> {
            if self.fail_publish {
                return Err(ChatError::Transport("socket gone".to_string()));
            }
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn publish_typing(&self, _room_id: &str, _is_typing: bool) -> Result<(), ChatError> {
            self.typing.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeFallback {
        fail: bool,
        sent: AtomicU32,
    }

    impl FakeFallback {
        fn ok() -> Self {
            Self { fail: false, sent: AtomicU32::new(0) }
        }

        fn failing() -> Self {
            Self { fail: true, sent: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl FallbackSender for FakeFallback {
        async fn send_via_fallback(
            &self,
            room_id: &str,
            content: &str,
        ) -> Result<Message, ChatError> {
            if self.fail {
                return Err(ChatError::SendFailed(ApiError::Network("down".to_string())));
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            let ts = Utc.timestamp_opt(1000, 0).unwrap();
            Ok(Message {
                id: format!("http-{}", self.sent.load(Ordering::SeqCst)),
                room_id: room_id.to_string(),
                sender: "me".to_string(),
                content: content.to_string(),
                created_at: ts,
                updated_at: ts,
                is_read: false,
            })
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<Message>>);

    impl InboundSink for CollectingSink {
        fn record_inbound_message(&self, message: Message) {
            self.0.lock().unwrap().push(message);
        }
    }

    #[tokio::test]
    async fn connected_send_uses_realtime_without_local_echo() {
        let dispatcher = OutboundDispatcher::new(FakePublisher::up(), FakeFallback::ok());
        let sink = CollectingSink::default();

        let route = dispatcher.send("r1", "hi", &sink).await.unwrap();
        assert_eq!(route, SendRoute::Realtime);
        assert_eq!(dispatcher.publisher.published.load(Ordering::SeqCst), 1);
        // no log entry until the realtime echo arrives
        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(dispatcher.fallback.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disconnected_send_produces_exactly_one_entry() {
        let dispatcher = OutboundDispatcher::new(FakePublisher::down(), FakeFallback::ok());
        let sink = CollectingSink::default();

        let route = dispatcher.send("r1", "hi", &sink).await.unwrap();
        assert_eq!(route, SendRoute::Fallback);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert_eq!(sink.0.lock().unwrap()[0].content, "hi");
    }

    #[tokio::test]
    async fn failed_fallback_produces_zero_entries() {
        let dispatcher = OutboundDispatcher::new(FakePublisher::down(), FakeFallback::failing());
        let sink = CollectingSink::default();

        let err = dispatcher.send("r1", "hi", &sink).await.unwrap_err();
        assert!(matches!(err, ChatError::SendFailed(_)));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_error_falls_back_single_attempt() {
        let dispatcher = OutboundDispatcher::new(FakePublisher::broken(), FakeFallback::ok());
        let sink = CollectingSink::default();

        let route = dispatcher.send("r1", "hi", &sink).await.unwrap();
        assert_eq!(route, SendRoute::Fallback);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.fallback.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn typing_dropped_when_disconnected() {
        let dispatcher = OutboundDispatcher::new(FakePublisher::down(), FakeFallback::ok());
        dispatcher.send_typing_status("r1", true);
        assert_eq!(dispatcher.publisher.typing.load(Ordering::SeqCst), 0);

        let dispatcher = OutboundDispatcher::new(FakePublisher::up(), FakeFallback::ok());
        dispatcher.send_typing_status("r1", true);
        assert_eq!(dispatcher.publisher.typing.load(Ordering::SeqCst), 1);
    }
}
