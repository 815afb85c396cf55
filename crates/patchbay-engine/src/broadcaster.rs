use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use patchbay_interface::{ClientInterface, Path, Properties, Value};

/// Fan-out of change notifications to every registered client.
///
/// Clients are kept in a table ordered by URI; each notification is a
/// plain method call on every entry, bracketed by bundle markers where
/// several notifications belong together.
pub struct Broadcaster {
    clients: RwLock<BTreeMap<String, Arc<dyn ClientInterface>>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn register(&self, client: Arc<dyn ClientInterface>) {
        self.clients
            .write()
            .insert(client.uri().to_string(), client);
    }

    pub fn unregister(&self, uri: &str) -> Option<Arc<dyn ClientInterface>> {
        self.clients.write().remove(uri)
    }

    pub fn client(&self, uri: &str) -> Option<Arc<dyn ClientInterface>> {
        self.clients.read().get(uri).cloned()
    }

    pub fn num_clients(&self) -> usize {
        self.clients.read().len()
    }

    fn each(&self, f: impl Fn(&Arc<dyn ClientInterface>)) {
        for client in self.clients.read().values() {
            f(client);
        }
    }

    pub fn send_put(&self, subject: &str, properties: &Properties) {
        self.each(|c| c.put(subject, properties));
    }

    pub fn send_delta(&self, subject: &str, remove: &Properties, add: &Properties) {
        self.each(|c| c.delta(subject, remove, add));
    }

    pub fn send_deleted(&self, path: &Path) {
        self.each(|c| c.del(path));
    }

    pub fn send_moved(&self, old_path: &Path, new_path: &Path) {
        self.each(|c| c.moved(old_path, new_path));
    }

    pub fn send_connected(&self, src: &Path, dst: &Path) {
        self.each(|c| c.connected(src, dst));
    }

    pub fn send_disconnected(&self, src: &Path, dst: &Path) {
        self.each(|c| c.disconnected(src, dst));
    }

    pub fn send_disconnected_all(&self, parent: &Path, object: &Path) {
        self.each(|c| c.disconnected_all(parent, object));
    }

    pub fn send_property_change(&self, subject: &str, key: &str, value: &Value) {
        self.each(|c| c.property_change(subject, key, value));
    }

    pub fn send_activity(&self, path: &Path) {
        self.each(|c| c.activity(path));
    }

    pub fn bundle_begin(&self) {
        self.each(|c| c.bundle_begin());
    }

    pub fn bundle_end(&self) {
        self.each(|c| c.bundle_end());
    }
}
