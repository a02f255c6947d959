use nohash_hasher::{IntMap, IntSet};

use crate::{entry::Entry, packed::PackedMove, score::Score};

pub type NodeId = usize;

/// Who is to move.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NodeKind {
    /// The side being certified.
    Ours,
    Theirs,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NodeState {
    /// On the current branch.
    Open,
    Done,
}

/// Where the value of a node came from.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Origin {
    /// The game is over.
    Terminal,
    /// Excluded by the opening file.
    Skip,
    /// A proof from the book.
    Cached(Entry),
    /// A stored move, played again.
    Replayed(Entry),
    Override,
    Tablebase,
    Evaluator,
    /// Accepted evaluator score.
    Placeholder(PackedMove),
    /// All replies.
    Expanded,
}

#[derive(Debug, Clone)]
pub struct SessionNode {
    pub key: u64,
    pub kind: NodeKind,
    pub state: NodeState,
    pub score: Score,
    pub children: Vec<(PackedMove, NodeId)>,
    pub origin: Origin,
    /// Book record present when the node was first reached.
    pub stored: Option<Entry>,
}

impl SessionNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Positions reached in one session, keyed by position.
#[derive(Debug, Default, Clone)]
pub struct SessionTree {
    nodes: Vec<SessionNode>,
    by_key: IntMap<u64, NodeId>,
    transpositions: IntSet<u64>,
}

impl SessionTree {
    pub fn new() -> SessionTree {
        SessionTree::default()
    }

    pub(crate) fn insert(&mut self, key: u64, kind: NodeKind, stored: Option<Entry>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(SessionNode {
            key,
            kind,
            state: NodeState::Open,
            score: Score::UNKNOWN,
            children: Vec::new(),
            origin: Origin::Expanded,
            stored,
        });
        self.by_key.insert(key, id);
        id
    }

    pub fn get(&self, id: NodeId) -> &SessionNode {
        &self.nodes[id]
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> &mut SessionNode {
        &mut self.nodes[id]
    }

    pub fn find(&self, key: u64) -> Option<NodeId> {
        self.by_key.get(&key).copied()
    }

    pub fn contains(&self, key: u64) -> bool {
        self.by_key.contains_key(&key)
    }

    /// The first node is the root of the session.
    pub fn root(&self) -> Option<NodeId> {
        (!self.nodes.is_empty()).then_some(0)
    }

    pub(crate) fn mark_transposition(&mut self, key: u64) {
        self.transpositions.insert(key);
    }

    /// Reached by more than one path.
    pub fn is_transposition(&self, key: u64) -> bool {
        self.transpositions.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionNode> {
        self.nodes.iter()
    }
}
