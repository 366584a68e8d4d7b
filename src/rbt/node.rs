use std::fmt;

/// Stable handle naming one node inside a [Tree][crate::rbt::Tree] arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> NodeId {
        NodeId(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "NodeId({})", self.0)
    }
}

// Node corresponds to a single entry in a Tree arena.
pub struct Node<K, P> {
    pub key: K,
    pub payload: P,
    pub(crate) black: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
}

impl<K, P> Node<K, P> {
    pub(crate) fn new(key: K, payload: P) -> Node<K, P> {
        Node {
            key,
            payload,
            black: false,
            parent: None,
            left: None,
            right: None,
        }
    }

    pub fn as_key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub fn is_black(&self) -> bool {
        self.black
    }

    #[inline]
    pub(crate) fn set_red(&mut self) {
        self.black = false
    }

    #[inline]
    pub(crate) fn set_black(&mut self) {
        self.black = true
    }
}
