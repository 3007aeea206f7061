//! Presence fan-out to registered devices.
//!
//! Two shapes: a point-to-point catch-up roster sent to a device as it
//! registers, and online/offline broadcasts to everyone else. Every send is
//! fire-and-forget; a recipient whose queue is full or closed is skipped
//! and nobody is told.

use std::sync::Arc;

use metrics::counter;
use switchboard_core::{DeviceId, Envelope};
use tracing::{debug, warn};

use crate::connection::DeviceConnection;
use crate::metrics::{PRESENCE_NOTICES_TOTAL, SEND_QUEUE_DROPS_TOTAL};
use crate::registry::DeviceRegistry;

fn encode_presence(device_id: &DeviceId, is_online: bool) -> Option<Arc<String>> {
    match serde_json::to_string(&Envelope::presence(device_id.clone(), is_online)) {
        Ok(frame) => Some(Arc::new(frame)),
        Err(e) => {
            warn!(device_id = %device_id, error = %e, "failed to serialize presence notice");
            None
        }
    }
}

/// Send the catch-up roster to a device that just registered.
///
/// One online notice per already-registered peer, written to the joiner's
/// own connection. The joiner is excluded; it never hears about itself from
/// the catch-up step.
pub fn send_roster(registry: &DeviceRegistry, connection: &DeviceConnection, joining: &DeviceId) {
    let peers = registry.devices_except(joining);
    debug!(device_id = %joining, peers = peers.len(), "sending presence roster");
    for peer in peers {
        let Some(frame) = encode_presence(&peer, true) else {
            continue;
        };
        counter!(PRESENCE_NOTICES_TOTAL).increment(1);
        if !connection.send(frame) {
            counter!(SEND_QUEUE_DROPS_TOTAL).increment(1);
            debug!(device_id = %joining, peer = %peer, "roster notice dropped, queue full or closed");
        }
    }
}

/// Announce `device_id` as online to every other registered device.
///
/// Callers run this after the registry insertion and after the roster
/// catch-up, so the joiner knows the prior roster before peers start
/// reacting to its arrival.
pub fn broadcast_online(registry: &DeviceRegistry, device_id: &DeviceId) {
    broadcast(registry, device_id, true);
}

/// Announce `device_id` as offline to every remaining registered device.
///
/// Callers run this after the registry removal, so the departing identity
/// is never a recipient of its own offline notice.
pub fn broadcast_offline(registry: &DeviceRegistry, device_id: &DeviceId) {
    broadcast(registry, device_id, false);
}

fn broadcast(registry: &DeviceRegistry, subject: &DeviceId, is_online: bool) {
    let Some(frame) = encode_presence(subject, is_online) else {
        return;
    };
    let recipients = registry.connections_except(subject);
    debug!(
        device_id = %subject,
        is_online,
        recipients = recipients.len(),
        "broadcasting presence"
    );
    for conn in recipients {
        counter!(PRESENCE_NOTICES_TOTAL).increment(1);
        if !conn.send(Arc::clone(&frame)) {
            counter!(SEND_QUEUE_DROPS_TOTAL).increment(1);
            debug!(conn_id = %conn.id, device_id = %subject, "presence notice dropped, queue full or closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use switchboard_core::ConnectionId;
    use tokio::sync::mpsc;

    fn dev(id: &str) -> DeviceId {
        DeviceId::from_raw(id)
    }

    fn add_device(
        registry: &DeviceRegistry,
        device: &str,
        conn: &str,
    ) -> (Arc<DeviceConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let connection = Arc::new(DeviceConnection::new(ConnectionId::from_raw(conn), tx));
        registry.register(dev(device), Arc::clone(&connection), None);
        (connection, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn roster_lists_every_peer_once() {
        let registry = DeviceRegistry::new();
        let (_c1, _r1) = add_device(&registry, "a", "conn_a");
        let (_c2, _r2) = add_device(&registry, "b", "conn_b");
        let (joiner, mut joiner_rx) = add_device(&registry, "c", "conn_c");

        send_roster(&registry, &joiner, &dev("c"));

        let notices = drain(&mut joiner_rx);
        assert_eq!(notices.len(), 2);
        let mut ids: Vec<&str> = notices
            .iter()
            .map(|n| n["deviceId"].as_str().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, ["a", "b"]);
        for notice in &notices {
            assert_eq!(notice["type"], "presence");
            assert_eq!(notice["isOnline"], true);
        }
    }

    #[tokio::test]
    async fn roster_excludes_the_joiner() {
        let registry = DeviceRegistry::new();
        let (joiner, mut joiner_rx) = add_device(&registry, "only", "conn_1");

        send_roster(&registry, &joiner, &dev("only"));

        assert!(drain(&mut joiner_rx).is_empty());
    }

    #[tokio::test]
    async fn online_broadcast_reaches_all_but_subject() {
        let registry = DeviceRegistry::new();
        let (_a, mut a_rx) = add_device(&registry, "a", "conn_a");
        let (_b, mut b_rx) = add_device(&registry, "b", "conn_b");
        let (_c, mut c_rx) = add_device(&registry, "c", "conn_c");

        broadcast_online(&registry, &dev("c"));

        for rx in [&mut a_rx, &mut b_rx] {
            let notices = drain(rx);
            assert_eq!(notices.len(), 1);
            assert_eq!(notices[0]["type"], "presence");
            assert_eq!(notices[0]["deviceId"], "c");
            assert_eq!(notices[0]["isOnline"], true);
        }
        assert!(drain(&mut c_rx).is_empty(), "subject must not hear its own announcement");
    }

    #[tokio::test]
    async fn offline_broadcast_after_removal() {
        let registry = DeviceRegistry::new();
        let (_a, mut a_rx) = add_device(&registry, "a", "conn_a");
        let (_b, mut b_rx) = add_device(&registry, "b", "conn_b");

        registry.remove(&dev("b"));
        broadcast_offline(&registry, &dev("b"));

        let notices = drain(&mut a_rx);
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0]["deviceId"], "b");
        assert_eq!(notices[0]["isOnline"], false);
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn full_queue_skips_only_that_recipient() {
        let registry = DeviceRegistry::new();

        // One recipient with a single-slot queue, pre-filled.
        let (stuck_tx, _stuck_rx) = mpsc::channel(1);
        let stuck = Arc::new(DeviceConnection::new(ConnectionId::from_raw("conn_stuck"), stuck_tx));
        assert!(stuck.send(Arc::new("filler".into())));
        registry.register(dev("stuck"), Arc::clone(&stuck), None);

        let (_healthy, mut healthy_rx) = add_device(&registry, "healthy", "conn_ok");

        broadcast_online(&registry, &dev("ghost"));

        let notices = drain(&mut healthy_rx);
        assert_eq!(notices.len(), 1, "healthy recipient still gets the notice");
        assert_eq!(stuck.drop_count(), 1);
    }

    #[tokio::test]
    async fn broadcast_to_empty_registry_is_a_no_op() {
        let registry = DeviceRegistry::new();
        broadcast_online(&registry, &dev("nobody"));
        broadcast_offline(&registry, &dev("nobody"));
    }
}
