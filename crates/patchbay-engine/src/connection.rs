use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::port::{Port, PortType};

/// How a destination port consumes a source of a given type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertPolicy {
    /// Same buffer shape; a single connection can alias the source.
    Copy,
    /// Broadcast a control value across an audio-shaped destination.
    Broadcast,
    /// Time-ordered merge of event sequences.
    Merge,
    /// Wrap an event sequence as an atom.
    Lift,
}

impl ConvertPolicy {
    /// Whether the destination needs its own buffer even for a single
    /// connection (the source buffer has a different shape).
    pub fn needs_conversion(&self) -> bool {
        matches!(self, ConvertPolicy::Broadcast | ConvertPolicy::Lift)
    }
}

/// Permitted (source, destination) type pairs and their policies.
pub fn can_connect(src: PortType, dst: PortType) -> Option<ConvertPolicy> {
    use PortType::*;
    match (src, dst) {
        (Audio, Audio) | (Audio, Cv) | (Cv, Audio) | (Cv, Cv) => Some(ConvertPolicy::Copy),
        (Control, Control) => Some(ConvertPolicy::Copy),
        (Control, Audio) | (Control, Cv) => Some(ConvertPolicy::Broadcast),
        (Event, Event) => Some(ConvertPolicy::Merge),
        (Event, Atom) => Some(ConvertPolicy::Lift),
        (Atom, Atom) => Some(ConvertPolicy::Copy),
        _ => None,
    }
}

/// A directed edge from an output port to an input port.
///
/// Connections own no buffers; buffers belong to ports. The input port
/// aggregates its incoming connections.
pub struct Connection {
    src: Arc<Port>,
    dst: Arc<Port>,
    policy: ConvertPolicy,
    /// Set while a teardown of this connection is already prepared, so
    /// overlapping disconnect-all sweeps do not enqueue duplicates.
    pending_disconnection: AtomicBool,
}

impl Connection {
    pub fn new(src: Arc<Port>, dst: Arc<Port>, policy: ConvertPolicy) -> Arc<Connection> {
        Arc::new(Connection {
            src,
            dst,
            policy,
            pending_disconnection: AtomicBool::new(false),
        })
    }

    pub fn src(&self) -> &Arc<Port> {
        &self.src
    }

    pub fn dst(&self) -> &Arc<Port> {
        &self.dst
    }

    pub fn policy(&self) -> ConvertPolicy {
        self.policy
    }

    pub fn pending_disconnection(&self) -> bool {
        self.pending_disconnection.load(Ordering::Relaxed)
    }

    pub fn set_pending_disconnection(&self, pending: bool) {
        self.pending_disconnection.store(pending, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PortType::*;

    #[test]
    fn permitted_pairs_match_the_type_table() {
        assert_eq!(can_connect(Audio, Audio), Some(ConvertPolicy::Copy));
        assert_eq!(can_connect(Control, Audio), Some(ConvertPolicy::Broadcast));
        assert_eq!(can_connect(Control, Cv), Some(ConvertPolicy::Broadcast));
        assert_eq!(can_connect(Cv, Audio), Some(ConvertPolicy::Copy));
        assert_eq!(can_connect(Event, Event), Some(ConvertPolicy::Merge));
        assert_eq!(can_connect(Event, Atom), Some(ConvertPolicy::Lift));
        assert_eq!(can_connect(Atom, Atom), Some(ConvertPolicy::Copy));

        assert_eq!(can_connect(Audio, Control), None);
        assert_eq!(can_connect(Audio, Event), None);
        assert_eq!(can_connect(Event, Audio), None);
        assert_eq!(can_connect(Atom, Event), None);
        assert_eq!(can_connect(Control, Event), None);
        assert_eq!(can_connect(Unknown, Audio), None);
    }

    #[test]
    fn conversion_flags() {
        assert!(!ConvertPolicy::Copy.needs_conversion());
        assert!(!ConvertPolicy::Merge.needs_conversion());
        assert!(ConvertPolicy::Broadcast.needs_conversion());
        assert!(ConvertPolicy::Lift.needs_conversion());
    }
}
