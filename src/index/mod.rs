//! Module implement the per-table indexes.
//!
//! The primary key index owns the ordered map from key to payload
//! location and drives the free-space allocator. Secondary data
//! indexes are ordered multimaps from a derived key to the primary
//! nodes carrying that value, kept consistent through a per-node
//! side-bag.

mod primary;
mod secondary;

pub use primary::{KeySlot, PrimaryIndex};
pub use secondary::DataIndex;
