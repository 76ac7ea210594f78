//! Node context injection for multi-node logging
//!
//! Several cache instances often share one process in tests and simulated
//! clusters. A [`NodeContextGuard`] tags everything logged in its scope with
//! the node it belongs to.

use std::cell::RefCell;

use tracing::Span;
use uuid::Uuid;

/// Node context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContextData {
    /// Name of the node (e.g. "node-a")
    pub node_id: String,
    /// Unique ID of this node session
    pub instance_id: Uuid,
}

thread_local! {
    static NODE_CONTEXT: RefCell<Option<NodeContextData>> = const { RefCell::new(None) };
}

/// RAII guard for node context
///
/// Sets the node context for the current thread and restores the previous
/// one on drop.
pub struct NodeContextGuard {
    previous: Option<NodeContextData>,
}

impl NodeContextGuard {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self::with_instance_id(node_id, Uuid::new_v4())
    }

    /// Create a guard with a specific instance ID
    pub fn with_instance_id(node_id: impl Into<String>, instance_id: Uuid) -> Self {
        let data = NodeContextData {
            node_id: node_id.into(),
            instance_id,
        };
        let previous = NODE_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    pub fn current() -> Option<NodeContextData> {
        NODE_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_node_id() -> Option<String> {
        Self::current().map(|ctx| ctx.node_id)
    }

    /// Span carrying the current node's fields
    ///
    /// Thread-local context does not follow a task across worker threads;
    /// instrument spawned futures with this span instead.
    pub fn span() -> Span {
        match Self::current() {
            Some(ctx) => tracing::info_span!(
                "node",
                node_id = %ctx.node_id,
                instance_id = %ctx.instance_id
            ),
            None => Span::none(),
        }
    }
}

impl Drop for NodeContextGuard {
    fn drop(&mut self) {
        NODE_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}
