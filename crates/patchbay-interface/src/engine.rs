use std::sync::Arc;

use crate::client::ClientInterface;
use crate::path::Path;
use crate::value::{Properties, Value};

/// Request interface of the engine, consumed by protocol bindings.
///
/// Every mutation or query is asynchronous: the call enqueues an event and
/// returns immediately; the outcome arrives at the registered client as a
/// `response` carrying the request's id.
pub trait EngineInterface: Send + Sync {
    // Mutations.

    /// Create-or-update the object at `path` with `properties`.
    ///
    /// When no object exists at `path`, the `TYPE` class property selects
    /// what to create (patch, node, or port).
    fn put(&self, path: &Path, properties: Properties);

    /// Incremental property change: remove keys, then add.
    fn delta(&self, path: &Path, remove: Properties, add: Properties);

    fn delete(&self, path: &Path);

    fn move_object(&self, old_path: &Path, new_path: &Path);

    fn connect(&self, src_port: &Path, dst_port: &Path);

    fn disconnect(&self, src_port: &Path, dst_port: &Path);

    /// Remove every connection touching `path` within `parent_patch`.
    fn disconnect_all(&self, parent_patch: &Path, path: &Path);

    fn set_property(&self, path: &Path, key: &str, value: Value);

    /// Remove all children and connections of the patch at `path`.
    fn clear_patch(&self, path: &Path);

    /// Arm capture of the next inbound controller value into the port's
    /// control binding.
    fn learn(&self, path: &Path);

    // Queries.

    fn get(&self, path: &Path);

    fn request_property(&self, path: &Path, key: &str);

    fn request_plugins(&self);

    fn request_all_objects(&self);

    fn ping(&self);

    // Client session.

    fn register_client(&self, client: Arc<dyn ClientInterface>);

    fn unregister_client(&self, uri: &str);

    fn set_next_response_id(&self, id: i32);

    fn disable_responses(&self);

    // Engine control.

    fn load_plugins(&self);

    fn activate(&self);

    fn deactivate(&self);

    fn quit(&self);
}
