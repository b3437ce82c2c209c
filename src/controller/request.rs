use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use crate::annotations::NetworkSelectionElement;
use crate::types::NamespacedName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Add,
    Remove,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Add => f.write_str("add"),
            Direction::Remove => f.write_str("remove"),
        }
    }
}

/// Attachments to add to, or remove from, one pod.
///
/// Built from the diff at notification time and replayed unchanged on
/// every retry.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileRequest {
    pub pod: NamespacedName,
    pub direction: Direction,
    /// Processed in order; the first failure stops the request.
    pub networks: Vec<NetworkSelectionElement>,
    pub netns: String,
}

impl fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let networks: Vec<String> = self.networks.iter().map(|n| n.key().to_string()).collect();
        write!(
            f,
            "{} [{}] for pod {} (netns {:?})",
            self.direction,
            networks.join(", "),
            self.pod,
            self.netns
        )
    }
}

/// A queued request. Equality is identity: two requests with the same
/// content are still distinct queue items.
#[derive(Debug, Clone)]
pub struct RequestRef(Arc<ReconcileRequest>);

impl RequestRef {
    pub fn new(request: ReconcileRequest) -> Self {
        Self(Arc::new(request))
    }
}

impl Deref for RequestRef {
    type Target = ReconcileRequest;

    fn deref(&self) -> &ReconcileRequest {
        &self.0
    }
}

impl PartialEq for RequestRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for RequestRef {}

impl Hash for RequestRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Display for RequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
