use crate::path::Path;
use crate::status::Status;
use crate::value::{Properties, Value};

/// Interface the engine uses to notify a connected client.
///
/// Protocol bindings implement this to forward engine state changes over
/// their transport. Every method must be callable from the engine's
/// post-process worker without blocking it for long.
pub trait ClientInterface: Send + Sync {
    /// Stable identity of this client in the broadcaster's table.
    fn uri(&self) -> &str;

    /// Reply to a previously submitted request.
    fn response(&self, id: i32, status: Status, subject: &str);

    /// Create-or-update notification carrying an object's description.
    fn put(&self, subject: &str, properties: &Properties);

    /// Incremental property change: `remove` keys first, then `add`.
    fn delta(&self, subject: &str, remove: &Properties, add: &Properties);

    fn del(&self, path: &Path);

    fn moved(&self, old_path: &Path, new_path: &Path);

    fn connected(&self, src_port: &Path, dst_port: &Path);

    fn disconnected(&self, src_port: &Path, dst_port: &Path);

    fn disconnected_all(&self, parent: &Path, object: &Path);

    fn property_change(&self, subject: &str, key: &str, value: &Value);

    /// Transient signal-activity hint for UIs; no durable state change.
    fn activity(&self, path: &Path);

    /// Marks the start of a group of notifications that should be applied
    /// atomically.
    fn bundle_begin(&self) {}

    fn bundle_end(&self) {}
}
