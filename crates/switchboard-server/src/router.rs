//! Addressed envelope forwarding.

use std::sync::Arc;

use metrics::counter;
use switchboard_core::DeviceId;
use tracing::debug;

use crate::metrics::{ENVELOPES_DROPPED_TOTAL, ENVELOPES_FORWARDED_TOTAL, SEND_QUEUE_DROPS_TOTAL};
use crate::registry::DeviceRegistry;

/// Forward an addressed frame to its recipient, verbatim.
///
/// `raw_frame` is the original inbound text, not a re-serialization, so the
/// recipient sees it byte for byte. Only the recipient lookup is performed
/// here; the caller has already decoded the envelope and established that
/// its kind is one of the relayed ones. An offline recipient means the
/// frame is dropped with no signal to anybody. Returns whether the frame
/// was enqueued.
pub fn forward(registry: &DeviceRegistry, to: &DeviceId, kind: &'static str, raw_frame: &str) -> bool {
    let Some(recipient) = registry.lookup(to) else {
        counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "unknown_recipient").increment(1);
        debug!(to = %to, kind, "dropping envelope for unknown recipient");
        return false;
    };

    if recipient.send(Arc::new(raw_frame.to_owned())) {
        counter!(ENVELOPES_FORWARDED_TOTAL, "kind" => kind).increment(1);
        true
    } else {
        counter!(SEND_QUEUE_DROPS_TOTAL).increment(1);
        debug!(to = %to, kind, "envelope dropped, recipient queue full or closed");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DeviceConnection;
    use switchboard_core::ConnectionId;
    use tokio::sync::mpsc;

    fn dev(id: &str) -> DeviceId {
        DeviceId::from_raw(id)
    }

    #[tokio::test]
    async fn forwards_raw_frame_untouched() {
        let registry = DeviceRegistry::new();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(
            dev("b"),
            Arc::new(DeviceConnection::new(ConnectionId::from_raw("conn_b"), tx)),
            None,
        );

        // Deliberately odd formatting; the recipient must see it unchanged.
        let frame = r#"{"type":"webrtc_offer",  "toDeviceId":"b","sdp":"v=0\r\no=- 1 1"}"#;
        assert!(forward(&registry, &dev("b"), "webrtc_offer", frame));

        let received = rx.recv().await.unwrap();
        assert_eq!(&**received, frame);
    }

    #[tokio::test]
    async fn unknown_recipient_is_silent() {
        let registry = DeviceRegistry::new();
        assert!(!forward(
            &registry,
            &dev("ghost"),
            "pair_request",
            r#"{"type":"pair_request","toDeviceId":"ghost"}"#
        ));
    }

    #[tokio::test]
    async fn closed_recipient_queue_drops_frame() {
        let registry = DeviceRegistry::new();
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(DeviceConnection::new(ConnectionId::from_raw("conn_b"), tx));
        registry.register(dev("b"), Arc::clone(&conn), None);
        drop(rx);

        assert!(!forward(
            &registry,
            &dev("b"),
            "webrtc_ice",
            r#"{"type":"webrtc_ice","toDeviceId":"b","candidate":"x"}"#
        ));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn delivers_to_newest_registration() {
        let registry = DeviceRegistry::new();
        let (old_tx, mut old_rx) = mpsc::channel(8);
        let (new_tx, mut new_rx) = mpsc::channel(8);
        registry.register(
            dev("b"),
            Arc::new(DeviceConnection::new(ConnectionId::from_raw("conn_old"), old_tx)),
            None,
        );
        registry.register(
            dev("b"),
            Arc::new(DeviceConnection::new(ConnectionId::from_raw("conn_new"), new_tx)),
            None,
        );

        let frame = r#"{"type":"pair_accept","toDeviceId":"b"}"#;
        assert!(forward(&registry, &dev("b"), "pair_accept", frame));

        assert_eq!(&**new_rx.recv().await.unwrap(), frame);
        assert!(old_rx.try_recv().is_err(), "old connection must not receive");
    }
}
