//! Module implement an ordered map as a red-black tree over an arena
//! of slots, with stable integer handles for nodes.
//!
//! Handles stay valid across rebalancing and across deletion of other
//! nodes, which is what lets secondary indexes keep references into the
//! primary tree. Deleting a node with two children relinks its in-order
//! successor into the vacated position, so the successor's handle
//! survives while the deleted handle is recycled. Callers must not
//! retain a handle across deletion of the node it names.

mod node;
mod tree;

pub use node::{Node, NodeId};
pub use tree::{Iter, Range, Tree};
