//! Device registry — the authoritative identity → connection mapping.

use std::sync::Arc;

use dashmap::DashMap;
use switchboard_core::{ConnectionId, DeviceId};

use crate::connection::DeviceConnection;

/// Display name used when a registration carries no `deviceName`.
const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// One registered device.
#[derive(Clone)]
pub struct RegisteredDevice {
    /// Client-supplied display label.
    pub device_name: String,
    /// Which connection owns this registration.
    pub connection_id: ConnectionId,
    /// Send path to the owning connection.
    pub connection: Arc<DeviceConnection>,
}

/// Registry of all currently online device identities.
///
/// The single source of truth for "who is online". All operations are
/// atomic per entry; none of them can fail — absence is a valid, silent
/// outcome everywhere.
pub struct DeviceRegistry {
    devices: DashMap<DeviceId, RegisteredDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
        }
    }

    /// Insert or replace the entry for `device_id`. Last write wins.
    ///
    /// Returns the displaced entry, if any. The displaced connection is not
    /// notified; the return value exists for logging and for the caller to
    /// observe a takeover.
    pub fn register(
        &self,
        device_id: DeviceId,
        connection: Arc<DeviceConnection>,
        device_name: Option<String>,
    ) -> Option<RegisteredDevice> {
        let entry = RegisteredDevice {
            device_name: device_name.unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_owned()),
            connection_id: connection.id.clone(),
            connection,
        };
        self.devices.insert(device_id, entry)
    }

    /// Look up the connection currently holding `device_id`.
    pub fn lookup(&self, device_id: &DeviceId) -> Option<Arc<DeviceConnection>> {
        self.devices
            .get(device_id)
            .map(|entry| Arc::clone(&entry.connection))
    }

    /// Delete the entry for `device_id` if present. No-op otherwise.
    pub fn remove(&self, device_id: &DeviceId) -> Option<RegisteredDevice> {
        self.devices.remove(device_id).map(|(_, entry)| entry)
    }

    /// Delete the entry for `device_id` only if it still belongs to
    /// `connection_id`.
    ///
    /// A connection displaced by an identity takeover calls this at
    /// teardown; the guard keeps it from deleting the new owner's entry.
    /// Returns whether an entry was removed.
    pub fn remove_if_owner(&self, device_id: &DeviceId, connection_id: &ConnectionId) -> bool {
        self.devices
            .remove_if(device_id, |_, entry| entry.connection_id == *connection_id)
            .is_some()
    }

    /// All registered identities other than `device_id`, in no particular
    /// order.
    pub fn devices_except(&self, device_id: &DeviceId) -> Vec<DeviceId> {
        self.devices
            .iter()
            .filter(|entry| entry.key() != device_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Send paths of every registered device other than `device_id`.
    ///
    /// Collected up front so callers never hold map shards while writing.
    pub fn connections_except(&self, device_id: &DeviceId) -> Vec<Arc<DeviceConnection>> {
        self.devices
            .iter()
            .filter(|entry| entry.key() != device_id)
            .map(|entry| Arc::clone(&entry.connection))
            .collect()
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    // Registry tests never send, so the receiver half can be dropped.
    fn make_connection(id: &str) -> Arc<DeviceConnection> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(DeviceConnection::new(ConnectionId::from_raw(id), tx))
    }

    fn dev(id: &str) -> DeviceId {
        DeviceId::from_raw(id)
    }

    #[test]
    fn register_and_lookup() {
        let registry = DeviceRegistry::new();
        let conn = make_connection("conn_a");
        let displaced = registry.register(dev("phone"), Arc::clone(&conn), None);
        assert!(displaced.is_none());

        let found = registry.lookup(&dev("phone")).unwrap();
        assert_eq!(found.id, conn.id);
    }

    #[test]
    fn lookup_unknown_is_none() {
        let registry = DeviceRegistry::new();
        assert!(registry.lookup(&dev("nobody")).is_none());
    }

    #[test]
    fn missing_name_defaults_to_unknown() {
        let registry = DeviceRegistry::new();
        registry.register(dev("phone"), make_connection("c1"), None);
        let entry = registry.devices.get(&dev("phone")).unwrap();
        assert_eq!(entry.device_name, "Unknown");
    }

    #[test]
    fn explicit_name_is_kept() {
        let registry = DeviceRegistry::new();
        registry.register(dev("phone"), make_connection("c1"), Some("Pixel 9".into()));
        let entry = registry.devices.get(&dev("phone")).unwrap();
        assert_eq!(entry.device_name, "Pixel 9");
    }

    #[test]
    fn reregistration_replaces_and_returns_displaced() {
        let registry = DeviceRegistry::new();
        let first = make_connection("conn_1");
        let second = make_connection("conn_2");

        registry.register(dev("phone"), first, Some("old".into()));
        let displaced = registry
            .register(dev("phone"), Arc::clone(&second), Some("new".into()))
            .unwrap();

        assert_eq!(displaced.device_name, "old");
        assert_eq!(displaced.connection_id.as_str(), "conn_1");
        // Routing now resolves to the newest connection.
        assert_eq!(registry.lookup(&dev("phone")).unwrap().id, second.id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_deletes_entry() {
        let registry = DeviceRegistry::new();
        registry.register(dev("phone"), make_connection("c1"), None);
        assert!(registry.remove(&dev("phone")).is_some());
        assert!(registry.lookup(&dev("phone")).is_none());
        // Removing again is a no-op.
        assert!(registry.remove(&dev("phone")).is_none());
    }

    #[test]
    fn remove_if_owner_respects_ownership() {
        let registry = DeviceRegistry::new();
        let old_owner = make_connection("conn_old");
        let new_owner = make_connection("conn_new");

        registry.register(dev("phone"), old_owner, None);
        registry.register(dev("phone"), Arc::clone(&new_owner), None);

        // The displaced connection must not delete the new owner's entry.
        assert!(!registry.remove_if_owner(&dev("phone"), &ConnectionId::from_raw("conn_old")));
        assert_eq!(registry.lookup(&dev("phone")).unwrap().id, new_owner.id);

        assert!(registry.remove_if_owner(&dev("phone"), &ConnectionId::from_raw("conn_new")));
        assert!(registry.lookup(&dev("phone")).is_none());
    }

    #[test]
    fn registered_set_matches_registrations() {
        let registry = DeviceRegistry::new();
        for id in ["a", "b", "c", "d"] {
            registry.register(dev(id), make_connection(id), None);
        }
        registry.remove(&dev("b"));

        let mut ids: Vec<String> = registry
            .devices_except(&dev(""))
            .into_iter()
            .map(|d| d.as_str().to_owned())
            .collect();
        ids.sort();
        assert_eq!(ids, ["a", "c", "d"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn devices_except_excludes_subject() {
        let registry = DeviceRegistry::new();
        registry.register(dev("a"), make_connection("c1"), None);
        registry.register(dev("b"), make_connection("c2"), None);

        let others = registry.devices_except(&dev("a"));
        assert_eq!(others.len(), 1);
        assert_eq!(others[0], dev("b"));
    }

    #[test]
    fn connections_except_excludes_subject() {
        let registry = DeviceRegistry::new();
        let conn_a = make_connection("c1");
        let conn_b = make_connection("c2");
        registry.register(dev("a"), conn_a, None);
        registry.register(dev("b"), Arc::clone(&conn_b), None);

        let others = registry.connections_except(&dev("a"));
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, conn_b.id);
    }

    #[test]
    fn empty_registry() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.devices_except(&dev("x")).is_empty());
        assert!(registry.connections_except(&dev("x")).is_empty());
    }
}
