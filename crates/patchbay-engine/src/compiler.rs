use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use patchbay_interface::Path;

use crate::context::ProcessContext;
use crate::patch::{GraphChild, Patch};
use crate::port::Port;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("connection graph contains a cycle")]
    Cycle,
}

/// Pre-run step that fills an input port's published buffers from its
/// sources: clear, then mix each source in (converting per type).
pub struct MixTask {
    dst: Arc<Port>,
    srcs: Vec<Arc<Port>>,
}

impl MixTask {
    pub fn dst(&self) -> &Arc<Port> {
        &self.dst
    }

    pub fn apply(&self) {
        for voice in 0..self.dst.voices() {
            let dst = self.dst.voice_buffer(voice);
            let mut guard = dst.write();
            guard.clear();
            for src in &self.srcs {
                let src_buffer = src.voice_buffer(voice);
                let src_guard = src_buffer.read();
                guard.mix_in(&src_guard);
            }
        }
    }
}

/// One slot of the compiled list: the mix steps feeding a child's inputs,
/// then the child itself.
pub struct CompiledEntry {
    block: GraphChild,
    mixes: Vec<MixTask>,
}

impl CompiledEntry {
    pub fn block(&self) -> &GraphChild {
        &self.block
    }
}

/// The linear process order the audio thread walks each block.
///
/// Immutable once published; graph edits compile a replacement and swap it
/// in at a block boundary.
pub struct CompiledPatch {
    entries: Vec<CompiledEntry>,
    /// Fan-in feeding the patch's own (duplex) output ports; runs after
    /// every child has produced.
    port_tasks: Vec<MixTask>,
}

impl CompiledPatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CompiledEntry] {
        &self.entries
    }

    pub fn run(&self, ctx: &ProcessContext) {
        for entry in &self.entries {
            for mix in &entry.mixes {
                mix.apply();
            }
            entry.block.process(ctx);
        }
        for task in &self.port_tasks {
            task.apply();
        }
    }
}

/// Compiles a patch's current children and connections into a process
/// list. Fails without side effects when the connection graph cycles.
pub fn compile(patch: &Patch) -> Result<Arc<CompiledPatch>, CompileError> {
    let children = patch.children();
    let connections = patch.connections();
    let patch_path = patch.path();

    let index: HashMap<String, usize> = children
        .iter()
        .enumerate()
        .map(|(i, c)| (c.path().as_str().to_string(), i))
        .collect();

    let mut edges = Vec::new();
    for connection in &connections {
        let src = child_of(&index, &patch_path, &connection.src().path());
        let dst = child_of(&index, &patch_path, &connection.dst().path());
        if let (Some(s), Some(d)) = (src, dst) {
            if s == d {
                return Err(CompileError::Cycle);
            }
            edges.push((s, d));
        }
    }

    let order = topological_order(children.len(), &edges).ok_or(CompileError::Cycle)?;

    // Group incoming connections per destination port; ports with fan-in
    // of two or more, or a shape-converting single connection, need a mix
    // step before their consumer runs.
    let mut by_dst: BTreeMap<String, (Arc<Port>, Vec<Arc<Port>>, bool)> = BTreeMap::new();
    for connection in &connections {
        let entry = by_dst
            .entry(connection.dst().path().as_str().to_string())
            .or_insert_with(|| (Arc::clone(connection.dst()), Vec::new(), false));
        entry.1.push(Arc::clone(connection.src()));
        entry.2 |= connection.policy().needs_conversion();
    }

    let mut entry_mixes: Vec<Vec<MixTask>> = (0..children.len()).map(|_| Vec::new()).collect();
    let mut port_tasks = Vec::new();
    for (_, (dst, srcs, converting)) in by_dst {
        if srcs.len() < 2 && !converting {
            continue;
        }
        let task = MixTask {
            dst: Arc::clone(&dst),
            srcs,
        };
        match child_of(&index, &patch_path, &dst.path()) {
            Some(child) => entry_mixes[child].push(task),
            None => port_tasks.push(task),
        }
    }

    let mut mixes_by_child: Vec<Option<Vec<MixTask>>> =
        entry_mixes.into_iter().map(Some).collect();
    let entries = order
        .into_iter()
        .map(|child| CompiledEntry {
            block: children[child].clone(),
            mixes: mixes_by_child[child].take().unwrap_or_default(),
        })
        .collect();

    Ok(Arc::new(CompiledPatch {
        entries,
        port_tasks,
    }))
}

/// Probes whether adding an edge between two children would cycle,
/// without touching the patch. Edges to or from the patch's own ports
/// never constrain order.
pub fn would_cycle(patch: &Patch, src_port: &Path, dst_port: &Path) -> bool {
    let children = patch.children();
    let patch_path = patch.path();
    let index: HashMap<String, usize> = children
        .iter()
        .enumerate()
        .map(|(i, c)| (c.path().as_str().to_string(), i))
        .collect();

    let src = child_of(&index, &patch_path, src_port);
    let dst = child_of(&index, &patch_path, dst_port);
    let (src, dst) = match (src, dst) {
        (Some(s), Some(d)) => (s, d),
        _ => return false,
    };
    if src == dst {
        return true;
    }

    let mut edges = Vec::new();
    for connection in patch.connections() {
        let s = child_of(&index, &patch_path, &connection.src().path());
        let d = child_of(&index, &patch_path, &connection.dst().path());
        if let (Some(s), Some(d)) = (s, d) {
            edges.push((s, d));
        }
    }
    edges.push((src, dst));

    topological_order(children.len(), &edges).is_none()
}

/// Child index owning `port_path`, or `None` when the port belongs to the
/// enclosing patch itself.
fn child_of(
    index: &HashMap<String, usize>,
    patch_path: &Path,
    port_path: &Path,
) -> Option<usize> {
    let parent = port_path.parent()?;
    if &parent == patch_path {
        return None;
    }
    index.get(parent.as_str()).copied()
}

/// Kahn's algorithm over child indices; `None` when a cycle remains.
fn topological_order(count: usize, edges: &[(usize, usize)]) -> Option<Vec<usize>> {
    let mut indegree = vec![0usize; count];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(from, to) in edges {
        indegree[to] += 1;
        adjacency[from].push(to);
    }

    let mut queue: VecDeque<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(next) = queue.pop_front() {
        order.push(next);
        for &target in &adjacency[next] {
            indegree[target] -= 1;
            if indegree[target] == 0 {
                queue.push_back(target);
            }
        }
    }

    (order.len() == count).then_some(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topological_order_respects_edges() {
        let order = topological_order(3, &[(0, 1), (1, 2)]).expect("acyclic");
        assert_eq!(order, vec![0, 1, 2]);

        let order = topological_order(3, &[(2, 0), (0, 1)]).expect("acyclic");
        let pos = |i: usize| order.iter().position(|&x| x == i).expect("present");
        assert!(pos(2) < pos(0));
        assert!(pos(0) < pos(1));
    }

    #[test]
    fn cycles_are_detected() {
        assert!(topological_order(2, &[(0, 1), (1, 0)]).is_none());
        assert!(topological_order(3, &[(0, 1), (1, 2), (2, 0)]).is_none());
        assert!(topological_order(1, &[]).is_some());
    }
}
