use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;

use patchbay_interface::{uris, Path, Properties, Value};

use crate::compiler::CompiledPatch;
use crate::connection::Connection;
use crate::context::ProcessContext;
use crate::node::Node;
use crate::port::Port;
use crate::store::ObjectBase;

/// A patch child: a plugin node or a nested patch.
#[derive(Clone)]
pub enum GraphChild {
    Node(Arc<Node>),
    Patch(Arc<Patch>),
}

impl GraphChild {
    pub fn base(&self) -> &ObjectBase {
        match self {
            GraphChild::Node(n) => n.base(),
            GraphChild::Patch(p) => p.base(),
        }
    }

    pub fn path(&self) -> Path {
        self.base().path()
    }

    pub fn ports(&self) -> Vec<Arc<Port>> {
        match self {
            GraphChild::Node(n) => n.ports(),
            GraphChild::Patch(p) => p.ports(),
        }
    }

    pub fn process(&self, ctx: &ProcessContext) {
        match self {
            GraphChild::Node(n) => n.process(ctx),
            GraphChild::Patch(p) => p.process(ctx),
        }
    }
}

/// A container graph object: nodes, external ports, and the connections
/// among them, plus the compiled list the audio thread walks.
pub struct Patch {
    base: ObjectBase,
    internal_poly: AtomicUsize,
    enabled: AtomicBool,
    children: RwLock<Vec<GraphChild>>,
    ports: RwLock<Vec<Arc<Port>>>,
    connections: RwLock<Vec<Arc<Connection>>>,
    compiled: ArcSwapOption<CompiledPatch>,
}

impl Patch {
    pub fn new(path: Path, internal_poly: usize) -> Arc<Patch> {
        Arc::new(Patch {
            base: ObjectBase::new(path, Properties::new()),
            internal_poly: AtomicUsize::new(internal_poly.max(1)),
            enabled: AtomicBool::new(false),
            children: RwLock::new(Vec::new()),
            ports: RwLock::new(Vec::new()),
            connections: RwLock::new(Vec::new()),
            compiled: ArcSwapOption::const_empty(),
        })
    }

    pub fn base(&self) -> &ObjectBase {
        &self.base
    }

    pub fn path(&self) -> Path {
        self.base.path()
    }

    pub fn internal_poly(&self) -> usize {
        self.internal_poly.load(Ordering::Relaxed)
    }

    pub fn set_internal_poly(&self, poly: usize) {
        self.internal_poly.store(poly.max(1), Ordering::Relaxed);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn children(&self) -> Vec<GraphChild> {
        self.children.read().clone()
    }

    pub fn add_child(&self, child: GraphChild) {
        self.children.write().push(child);
    }

    pub fn remove_child(&self, path: &Path) -> Option<GraphChild> {
        let mut children = self.children.write();
        let at = children.iter().position(|c| &c.path() == path)?;
        Some(children.remove(at))
    }

    pub fn find_child(&self, path: &Path) -> Option<GraphChild> {
        self.children
            .read()
            .iter()
            .find(|c| &c.path() == path)
            .cloned()
    }

    /// Externally visible ports, in creation order.
    pub fn ports(&self) -> Vec<Arc<Port>> {
        self.ports.read().clone()
    }

    pub fn add_port(&self, port: Arc<Port>) {
        self.ports.write().push(port);
    }

    pub fn remove_port(&self, path: &Path) -> Option<Arc<Port>> {
        let mut ports = self.ports.write();
        let at = ports.iter().position(|p| &p.path() == path)?;
        Some(ports.remove(at))
    }

    pub fn num_ports(&self) -> usize {
        self.ports.read().len()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().clone()
    }

    pub fn num_connections(&self) -> usize {
        self.connections.read().len()
    }

    pub fn add_connection(&self, connection: Arc<Connection>) {
        self.connections.write().push(connection);
    }

    pub fn connection(&self, src: &Path, dst: &Path) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .find(|c| &c.src().path() == src && &c.dst().path() == dst)
            .cloned()
    }

    pub fn has_connection(&self, src: &Path, dst: &Path) -> bool {
        self.connection(src, dst).is_some()
    }

    pub fn remove_connection(&self, src: &Path, dst: &Path) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write();
        let at = connections
            .iter()
            .position(|c| &c.src().path() == src && &c.dst().path() == dst)?;
        Some(connections.remove(at))
    }

    /// Connections with either endpoint on the object at `path` (a node's
    /// ports, or the port itself).
    pub fn connections_touching(&self, path: &Path) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .filter(|c| {
                let src = c.src().path();
                let dst = c.dst().path();
                &src == path
                    || &dst == path
                    || path.is_parent_of(&src)
                    || path.is_parent_of(&dst)
            })
            .cloned()
            .collect()
    }

    pub fn compiled(&self) -> Option<Arc<CompiledPatch>> {
        self.compiled.load_full()
    }

    /// Publishes a new compiled list, returning the retired one.
    pub fn set_compiled(&self, compiled: Option<Arc<CompiledPatch>>) -> Option<Arc<CompiledPatch>> {
        self.compiled.swap(compiled)
    }

    /// Walks the compiled list for one block. Disabled patches are
    /// skipped entirely.
    pub fn process(&self, ctx: &ProcessContext) {
        if !self.enabled() {
            return;
        }
        if let Some(compiled) = self.compiled.load_full() {
            compiled.run(ctx);
        }
    }

    pub fn describe(&self) -> Properties {
        let mut properties = self.base.properties();
        properties.insert(uris::TYPE, Value::Uri(uris::CLASS_PATCH.to_string()));
        properties.insert(uris::POLYPHONY, Value::Int(self.internal_poly() as i32));
        properties.insert(uris::ENABLED, Value::Bool(self.enabled()));
        properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poly_is_at_least_one() {
        let patch = Patch::new(Path::root(), 0);
        assert_eq!(patch.internal_poly(), 1);
        patch.set_internal_poly(4);
        assert_eq!(patch.internal_poly(), 4);
    }

    #[test]
    fn children_are_insertion_ordered() {
        let patch = Patch::new(Path::new("/p").expect("path"), 1);
        for name in ["/p/b", "/p/a", "/p/c"] {
            patch.add_child(GraphChild::Patch(Patch::new(
                Path::new(name).expect("path"),
                1,
            )));
        }
        let order: Vec<String> = patch
            .children()
            .iter()
            .map(|c| c.path().as_str().to_string())
            .collect();
        assert_eq!(order, vec!["/p/b", "/p/a", "/p/c"]);

        let removed = patch.remove_child(&Path::new("/p/a").expect("path"));
        assert!(removed.is_some());
        assert_eq!(patch.children().len(), 2);
    }
}
