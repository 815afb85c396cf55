use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use patchbay_interface::{Path, Properties, Value};

use crate::node::Node;
use crate::patch::Patch;
use crate::port::Port;

/// Attributes shared by every graph object: its path and property map.
///
/// Patch, node, and port each embed one of these rather than inheriting
/// from a common base.
pub struct ObjectBase {
    path: RwLock<Path>,
    properties: RwLock<Properties>,
}

impl ObjectBase {
    pub fn new(path: Path, properties: Properties) -> Self {
        Self {
            path: RwLock::new(path),
            properties: RwLock::new(properties),
        }
    }

    pub fn path(&self) -> Path {
        self.path.read().clone()
    }

    pub fn set_path(&self, path: Path) {
        *self.path.write() = path;
    }

    pub fn parent_path(&self) -> Option<Path> {
        self.path.read().parent()
    }

    pub fn symbol(&self) -> String {
        self.path.read().symbol().to_string()
    }

    /// Snapshot of the property map.
    pub fn properties(&self) -> Properties {
        self.properties.read().clone()
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.read().get(key).cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        self.properties.write().insert(key, value);
    }

    pub fn remove_property(&self, key: &str) -> Option<Value> {
        self.properties.write().remove(key)
    }

    pub fn merge_properties(&self, properties: &Properties) {
        self.properties.write().extend(properties);
    }

    /// Drops every key of `properties` from the stored map; used before a
    /// replacing update so stale values do not survive.
    pub fn erase_keys_of(&self, properties: &Properties) {
        let mut own = self.properties.write();
        for (key, _) in properties.iter() {
            own.remove(key);
        }
    }
}

/// A store entry: one of the three graph object kinds.
#[derive(Clone)]
pub enum GraphObject {
    Patch(Arc<Patch>),
    Node(Arc<Node>),
    Port(Arc<Port>),
}

impl GraphObject {
    pub fn base(&self) -> &ObjectBase {
        match self {
            GraphObject::Patch(p) => p.base(),
            GraphObject::Node(n) => n.base(),
            GraphObject::Port(p) => p.base(),
        }
    }

    pub fn path(&self) -> Path {
        self.base().path()
    }

    pub fn as_patch(&self) -> Option<&Arc<Patch>> {
        match self {
            GraphObject::Patch(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Arc<Node>> {
        match self {
            GraphObject::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_port(&self) -> Option<&Arc<Port>> {
        match self {
            GraphObject::Port(p) => Some(p),
            _ => None,
        }
    }

    /// Description sent to clients.
    pub fn describe(&self) -> Properties {
        match self {
            GraphObject::Patch(p) => p.describe(),
            GraphObject::Node(n) => n.describe(),
            GraphObject::Port(p) => p.describe(),
        }
    }
}

/// Process-wide path-to-object table, ordered by path string so every
/// object's descendants follow it contiguously.
///
/// Mutated only during event pre-processing; the audio thread reads
/// published pointers, never the store.
pub struct Store {
    objects: RwLock<BTreeMap<String, GraphObject>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.objects.read().contains_key(path.as_str())
    }

    pub fn find(&self, path: &Path) -> Option<GraphObject> {
        self.objects.read().get(path.as_str()).cloned()
    }

    pub fn find_patch(&self, path: &Path) -> Option<Arc<Patch>> {
        self.find(path).and_then(|o| o.as_patch().cloned())
    }

    pub fn find_node(&self, path: &Path) -> Option<Arc<Node>> {
        self.find(path).and_then(|o| o.as_node().cloned())
    }

    pub fn find_port(&self, path: &Path) -> Option<Arc<Port>> {
        self.find(path).and_then(|o| o.as_port().cloned())
    }

    /// Inserts a new object; returns false (and leaves the store
    /// unchanged) if the path is taken.
    pub fn insert(&self, object: GraphObject) -> bool {
        let key = object.path().as_str().to_string();
        let mut objects = self.objects.write();
        if objects.contains_key(&key) {
            return false;
        }
        objects.insert(key, object);
        true
    }

    /// Removes the object at `path` together with its whole subtree,
    /// returning the detached table.
    pub fn yank(&self, path: &Path) -> BTreeMap<String, GraphObject> {
        let mut objects = self.objects.write();
        let keys: Vec<String> = subtree_keys(&objects, path);
        let mut detached = BTreeMap::new();
        for key in keys {
            if let Some(object) = objects.remove(&key) {
                detached.insert(key, object);
            }
        }
        detached
    }

    /// Reinserts a previously yanked subtree. Keys are recomputed from the
    /// objects' current paths, so the table may have been renamed in
    /// between.
    pub fn cram(&self, detached: BTreeMap<String, GraphObject>) {
        let mut objects = self.objects.write();
        for (_, object) in detached {
            objects.insert(object.path().as_str().to_string(), object);
        }
    }

    /// All objects strictly below `path`, in path order.
    pub fn descendants(&self, path: &Path) -> Vec<GraphObject> {
        let objects = self.objects.read();
        subtree_keys(&objects, path)
            .into_iter()
            .filter(|key| key != path.as_str())
            .filter_map(|key| objects.get(&key).cloned())
            .collect()
    }

    /// Ordered snapshot of the whole store.
    pub fn snapshot(&self) -> Vec<GraphObject> {
        self.objects.read().values().cloned().collect()
    }
}

fn subtree_keys(objects: &BTreeMap<String, GraphObject>, path: &Path) -> Vec<String> {
    if path.is_root() {
        return objects.keys().cloned().collect();
    }
    let prefix = format!("{}/", path.as_str());
    objects
        .range::<str, _>((
            std::ops::Bound::Included(path.as_str()),
            std::ops::Bound::Unbounded,
        ))
        .take_while(|(key, _)| key.as_str() == path.as_str() || key.starts_with(&prefix))
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(path: &str) -> GraphObject {
        GraphObject::Patch(Patch::new(Path::new(path).expect("path"), 1))
    }

    #[test]
    fn insert_rejects_duplicates() {
        let store = Store::new();
        assert!(store.insert(patch("/p")));
        assert!(!store.insert(patch("/p")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn yank_removes_whole_subtree_only() {
        let store = Store::new();
        for path in ["/p", "/p/a", "/p/a/out", "/pq"] {
            assert!(store.insert(patch(path)));
        }
        let detached = store.yank(&Path::new("/p/a").expect("path"));
        assert_eq!(detached.len(), 2);
        assert!(store.contains(&Path::new("/p").expect("path")));
        assert!(store.contains(&Path::new("/pq").expect("path")));
        assert!(!store.contains(&Path::new("/p/a").expect("path")));

        store.cram(detached);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn cram_rekeys_after_rename() {
        let store = Store::new();
        assert!(store.insert(patch("/p")));
        assert!(store.insert(patch("/p/a")));
        let detached = store.yank(&Path::new("/p/a").expect("path"));
        for object in detached.values() {
            object
                .base()
                .set_path(Path::new("/p/b").expect("path"));
        }
        store.cram(detached);
        assert!(store.contains(&Path::new("/p/b").expect("path")));
        assert!(!store.contains(&Path::new("/p/a").expect("path")));
    }

    #[test]
    fn descendants_are_strict() {
        let store = Store::new();
        for path in ["/p", "/p/a", "/p/b"] {
            assert!(store.insert(patch(path)));
        }
        let below = store.descendants(&Path::new("/p").expect("path"));
        assert_eq!(below.len(), 2);
    }

    proptest::proptest! {
        #[test]
        fn yank_then_cram_round_trips(
            symbols in proptest::collection::btree_set("[a-z_][a-z0-9_]{0,5}", 1..8)
        ) {
            let store = Store::new();
            store.insert(patch("/p"));
            for symbol in &symbols {
                store.insert(patch(&format!("/p/{symbol}")));
            }
            let before = store.len();

            let detached = store.yank(&Path::new("/p").expect("path"));
            proptest::prop_assert_eq!(store.len(), 0);

            store.cram(detached);
            proptest::prop_assert_eq!(store.len(), before);
            proptest::prop_assert!(store.contains(&Path::new("/p").expect("path")));
        }
    }
}
