//! Precomputed solution trees.
//!
//! A tree file stores a move tree for one opening in pre-order, all
//! integers little endian:
//!
//! ```text
//! opening_len: u16
//! opening:     [u16; opening_len]       packed moves from the start
//! node_count:  u32
//! nodes:       [(data: u32, move: u16); node_count]
//! footer_len:  u32
//! footer:      [(node: u32, weight: u32); footer_len]
//! ```
//!
//! Bit 31 of `data` marks a transposition and bit 30 a following
//! sibling. The low 30 bits are the transposition target, or otherwise
//! the index one past the end of the subtree of the node.
//!
//! Moves from a tree are hints. They are never trusted without a proof.

use std::{
    error::Error,
    fmt,
    fs::File,
    io::{self, Write},
    iter,
    ops::Deref,
    path::Path,
};

use byteorder::{ByteOrder as _, LittleEndian, WriteBytesExt as _};
use memmap2::Mmap;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::packed::PackedMove;

const TRANSPOSITION: u32 = 1 << 31;
const HAS_SIBLING: u32 = 1 << 30;
const INDEX_MASK: u32 = HAS_SIBLING - 1;

const NODE_SIZE: usize = 6;

/// Error when reading a solution tree.
#[derive(Debug)]
pub enum TreeError {
    Io(io::Error),
    /// File is shorter or longer than its header says.
    Truncated,
    /// A node points outside of the tree.
    Corrupt { node: u32 },
    /// Transpositions lead back into themselves.
    Cycle { node: u32 },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::Io(err) => write!(f, "i/o error reading tree: {err}"),
            TreeError::Truncated => f.write_str("tree file truncated"),
            TreeError::Corrupt { node } => write!(f, "corrupt tree node {node}"),
            TreeError::Cycle { node } => write!(f, "transposition cycle at tree node {node}"),
        }
    }
}

impl Error for TreeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TreeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TreeError {
    fn from(error: io::Error) -> TreeError {
        TreeError::Io(error)
    }
}

fn section<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8], TreeError> {
    let end = offset.checked_add(len).ok_or(TreeError::Truncated)?;
    let slice = bytes.get(*offset..end).ok_or(TreeError::Truncated)?;
    *offset = end;
    Ok(slice)
}

/// Index of a node.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeRef(pub u32);

#[derive(Debug)]
enum Data {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Data {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Data::Mapped(mmap) => mmap,
            Data::Owned(vec) => vec,
        }
    }
}

/// A read-only solution tree.
#[derive(Debug)]
pub struct SolutionTree {
    data: Data,
    opening: Vec<PackedMove>,
    nodes: usize,
    node_count: u32,
    footer: Vec<(u32, u32)>,
}

impl SolutionTree {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SolutionTree, TreeError> {
        let file = File::open(path)?;
        // Safety: Tree files are written once and never modified while in
        // use.
        let mmap = unsafe { Mmap::map(&file)? };
        SolutionTree::parse(Data::Mapped(mmap))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<SolutionTree, TreeError> {
        SolutionTree::parse(Data::Owned(bytes))
    }

    fn parse(data: Data) -> Result<SolutionTree, TreeError> {
        let bytes: &[u8] = &data;
        let mut offset = 0;

        let opening_len = usize::from(LittleEndian::read_u16(section(bytes, &mut offset, 2)?));
        let opening = section(bytes, &mut offset, 2 * opening_len)?
            .chunks_exact(2)
            .map(|c| PackedMove::from_u16(LittleEndian::read_u16(c)))
            .collect();
        let node_count = LittleEndian::read_u32(section(bytes, &mut offset, 4)?);
        if node_count > INDEX_MASK {
            return Err(TreeError::Truncated);
        }
        let nodes = offset;
        section(bytes, &mut offset, NODE_SIZE * node_count as usize)?;
        let footer_len = LittleEndian::read_u32(section(bytes, &mut offset, 4)?) as usize;
        let footer = section(bytes, &mut offset, 8 * footer_len)?
            .chunks_exact(8)
            .map(|c| (LittleEndian::read_u32(&c[0..4]), LittleEndian::read_u32(&c[4..8])))
            .collect();
        if offset != bytes.len() {
            return Err(TreeError::Truncated);
        }

        Ok(SolutionTree {
            data,
            opening,
            nodes,
            node_count,
            footer,
        })
    }

    /// Moves from the start position to the root of the tree.
    pub fn opening_moves(&self) -> &[PackedMove] {
        &self.opening
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Precomputed weights.
    pub fn footer(&self) -> &[(u32, u32)] {
        &self.footer
    }

    fn raw(&self, node: NodeRef) -> Option<(u32, PackedMove)> {
        if node.0 >= self.node_count {
            return None;
        }
        let start = self.nodes + NODE_SIZE * node.0 as usize;
        let bytes = &self.data[start..start + NODE_SIZE];
        Some((
            LittleEndian::read_u32(&bytes[0..4]),
            PackedMove::from_u16(LittleEndian::read_u16(&bytes[4..6])),
        ))
    }

    fn valid(&self, index: u32) -> Option<NodeRef> {
        (index < self.node_count).then_some(NodeRef(index))
    }

    /// The move leading to `node`.
    pub fn mv(&self, node: NodeRef) -> PackedMove {
        self.raw(node).map_or(PackedMove::NULL, |(_, m)| m)
    }

    pub fn transposition(&self, node: NodeRef) -> Option<NodeRef> {
        let (data, _) = self.raw(node)?;
        if data & TRANSPOSITION == 0 {
            return None;
        }
        self.valid(data & INDEX_MASK)
    }

    /// First child.
    pub fn next(&self, node: NodeRef) -> Option<NodeRef> {
        let (data, _) = self.raw(node)?;
        if data & TRANSPOSITION != 0 || data & INDEX_MASK <= node.0 + 1 {
            return None;
        }
        self.valid(node.0 + 1)
    }

    /// Next sibling.
    pub fn sibling(&self, node: NodeRef) -> Option<NodeRef> {
        let (data, _) = self.raw(node)?;
        if data & HAS_SIBLING == 0 {
            return None;
        }
        let index = if data & TRANSPOSITION != 0 {
            node.0 + 1
        } else {
            data & INDEX_MASK
        };
        if index <= node.0 {
            return None;
        }
        self.valid(index)
    }

    /// Follow transpositions to the node that holds the subtree.
    pub fn resolve(&self, mut node: NodeRef) -> Result<NodeRef, TreeError> {
        for _ in 0..=self.node_count {
            let (data, _) = self.raw(node).ok_or(TreeError::Corrupt { node: node.0 })?;
            if data & TRANSPOSITION == 0 {
                return Ok(node);
            }
            node = self
                .transposition(node)
                .ok_or(TreeError::Corrupt { node: node.0 })?;
        }
        Err(TreeError::Cycle { node: node.0 })
    }

    /// Top level nodes.
    pub fn roots(&self) -> impl Iterator<Item = NodeRef> + '_ {
        iter::successors(self.valid(0), move |&c| self.sibling(c))
    }

    pub fn children(&self, node: NodeRef) -> impl Iterator<Item = NodeRef> + '_ {
        iter::successors(self.next(node), move |&c| self.sibling(c))
    }

    /// Number of leaves below `node`, following transpositions.
    pub fn weight(&self, node: NodeRef, cache: &mut WeightCache) -> Result<u32, TreeError> {
        let root = self.resolve(node)?;
        if let Some(weight) = cache.get(root.0) {
            return Ok(weight);
        }

        let mut memo: FxHashMap<u32, u32> = FxHashMap::default();
        let mut stack = vec![(root, self.next(root), 0u32)];
        let mut finished = None;
        while let Some(frame) = stack.last_mut() {
            if let Some(weight) = finished.take() {
                frame.2 = frame.2.saturating_add(weight);
            }
            match frame.1 {
                None => {
                    let (node, _, sum) = *frame;
                    stack.pop();
                    let weight = sum.max(1);
                    memo.insert(node.0, weight);
                    cache.insert(node.0, weight);
                    finished = Some(weight);
                }
                Some(child) => {
                    frame.1 = self.sibling(child);
                    let target = self.resolve(child)?;
                    if let Some(weight) = memo.get(&target.0).copied().or_else(|| cache.get(target.0)) {
                        finished = Some(weight);
                    } else if stack.len() > self.node_count as usize {
                        return Err(TreeError::Cycle { node: target.0 });
                    } else {
                        stack.push((target, self.next(target), 0));
                    }
                }
            }
        }
        Ok(finished.unwrap_or(1))
    }

    /// The moves the tree has for the position after `moves` from its
    /// root, each with the weight of its subtree.
    ///
    /// Empty if the tree does not reach the position.
    pub fn query(
        &self,
        moves: &[PackedMove],
        cache: &mut WeightCache,
    ) -> Result<Vec<(PackedMove, u32)>, TreeError> {
        let mut first = self.valid(0);
        for &m in moves {
            let found = iter::successors(first, |&c| self.sibling(c)).find(|&c| self.mv(c) == m);
            let Some(child) = found else {
                return Ok(Vec::new());
            };
            first = self.next(self.resolve(child)?);
        }

        let mut hints = Vec::new();
        for child in iter::successors(first, |&c| self.sibling(c)) {
            hints.push((self.mv(child), self.weight(child, cache)?));
        }
        Ok(hints)
    }
}

/// Memoized subtree weights, scoped to one session.
///
/// Open addressing with linear probing. Once three quarters of the slots
/// are taken, new weights are no longer stored.
#[derive(Debug, Clone)]
pub struct WeightCache {
    slots: Vec<(u32, u32)>,
    bits: u32,
    len: usize,
}

impl WeightCache {
    const EMPTY: u32 = u32::MAX;

    /// A cache with `1 << bits` slots.
    pub fn new(bits: u32) -> WeightCache {
        let bits = bits.clamp(1, 30);
        WeightCache {
            slots: vec![(WeightCache::EMPTY, 0); 1 << bits],
            bits,
            len: 0,
        }
    }

    /// Fill with the precomputed weights of `tree`.
    pub fn seed(&mut self, tree: &SolutionTree) {
        for &(node, weight) in tree.footer() {
            if let Ok(node) = tree.resolve(NodeRef(node)) {
                self.insert(node.0, weight);
            }
        }
        debug!(seeded = self.len, "seeded tree weight cache");
    }

    fn slot(&self, key: u32) -> usize {
        (key.wrapping_mul(0x9e37_79b9) >> (32 - self.bits)) as usize
    }

    pub fn get(&self, key: u32) -> Option<u32> {
        let mask = self.slots.len() - 1;
        let mut i = self.slot(key);
        loop {
            let (k, v) = self.slots[i];
            if k == key {
                return Some(v);
            } else if k == WeightCache::EMPTY {
                return None;
            }
            i = (i + 1) & mask;
        }
    }

    pub fn insert(&mut self, key: u32, weight: u32) {
        if key == WeightCache::EMPTY {
            return;
        }
        let mask = self.slots.len() - 1;
        let mut i = self.slot(key);
        loop {
            let (k, _) = self.slots[i];
            if k == key {
                self.slots[i].1 = weight;
                return;
            } else if k == WeightCache::EMPTY {
                if self.is_full() {
                    return;
                }
                self.slots[i] = (key, weight);
                self.len += 1;
                return;
            }
            i = (i + 1) & mask;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= self.slots.len() * 3 / 4
    }
}

impl Default for WeightCache {
    fn default() -> WeightCache {
        WeightCache::new(16)
    }
}

#[derive(Debug, Default)]
struct TrieNode {
    mv: PackedMove,
    children: Vec<usize>,
    transposition: Option<Vec<PackedMove>>,
}

/// Builds tree files.
#[derive(Debug)]
pub struct TreeWriter {
    opening: Vec<PackedMove>,
    trie: Vec<TrieNode>,
    footer_threshold: u32,
}

impl TreeWriter {
    pub fn new(opening: Vec<PackedMove>) -> TreeWriter {
        TreeWriter {
            opening,
            trie: vec![TrieNode::default()],
            footer_threshold: 64,
        }
    }

    /// Store weights for subtrees with at least `nodes` nodes.
    #[must_use]
    pub fn footer_threshold(mut self, nodes: u32) -> TreeWriter {
        self.footer_threshold = nodes;
        self
    }

    fn walk(&mut self, line: &[PackedMove]) -> usize {
        let mut node = 0;
        for &m in line {
            let found = self.trie[node]
                .children
                .iter()
                .copied()
                .find(|&c| self.trie[c].mv == m);
            node = match found {
                Some(child) => child,
                None => {
                    let child = self.trie.len();
                    self.trie.push(TrieNode {
                        mv: m,
                        ..TrieNode::default()
                    });
                    self.trie[node].children.push(child);
                    child
                }
            };
        }
        node
    }

    /// Add a line from the root.
    pub fn insert(&mut self, line: &[PackedMove]) {
        self.walk(line);
    }

    /// Add `line`, ending in a position that is solved under `target`.
    pub fn transpose(&mut self, line: &[PackedMove], target: &[PackedMove]) {
        let node = self.walk(line);
        self.trie[node].transposition = Some(target.to_vec());
    }

    fn find(&self, line: &[PackedMove]) -> Option<usize> {
        let mut node = 0;
        for &m in line {
            node = self.trie[node]
                .children
                .iter()
                .copied()
                .find(|&c| self.trie[c].mv == m)?;
        }
        Some(node)
    }

    fn encode(&self, footer: &[(u32, u32)]) -> io::Result<Vec<u8>> {
        // Pre-order, with (trie node, has sibling, path).
        let mut order = Vec::new();
        let mut stack: Vec<(usize, bool)> = self.trie[0]
            .children
            .iter()
            .enumerate()
            .rev()
            .map(|(i, &c)| (c, i + 1 < self.trie[0].children.len()))
            .collect();
        while let Some((node, has_sibling)) = stack.pop() {
            order.push((node, has_sibling));
            if self.trie[node].transposition.is_some() {
                continue;
            }
            let children = &self.trie[node].children;
            stack.extend(
                children
                    .iter()
                    .enumerate()
                    .rev()
                    .map(|(i, &c)| (c, i + 1 < children.len())),
            );
        }

        let mut index = vec![u32::MAX; self.trie.len()];
        for (i, &(node, _)) in order.iter().enumerate() {
            index[node] = i as u32;
        }
        let mut end = vec![0u32; self.trie.len()];
        for &(node, _) in order.iter().rev() {
            let last = self.trie[node]
                .children
                .iter()
                .filter(|&&c| index[c] != u32::MAX)
                .map(|&c| end[c])
                .max();
            end[node] = last.unwrap_or(index[node] + 1);
        }

        let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidInput, msg.to_owned());
        if order.len() > INDEX_MASK as usize || self.opening.len() > usize::from(u16::MAX) {
            return Err(invalid("tree too large"));
        }

        let mut out = Vec::new();
        out.write_u16::<LittleEndian>(self.opening.len() as u16)?;
        for m in &self.opening {
            out.write_u16::<LittleEndian>(m.to_u16())?;
        }
        out.write_u32::<LittleEndian>(order.len() as u32)?;
        for &(node, has_sibling) in &order {
            let trie = &self.trie[node];
            let mut data = match trie.transposition {
                Some(ref target) => {
                    let target = self
                        .find(target)
                        .filter(|&t| t != 0 && index[t] != u32::MAX)
                        .ok_or_else(|| invalid("transposition target not in tree"))?;
                    TRANSPOSITION | index[target]
                }
                None => end[node],
            };
            if has_sibling {
                data |= HAS_SIBLING;
            }
            out.write_u32::<LittleEndian>(data)?;
            out.write_u16::<LittleEndian>(trie.mv.to_u16())?;
        }
        out.write_u32::<LittleEndian>(footer.len() as u32)?;
        for &(node, weight) in footer {
            out.write_u32::<LittleEndian>(node)?;
            out.write_u32::<LittleEndian>(weight)?;
        }
        Ok(out)
    }

    /// Serialize the tree, with precomputed weights for large subtrees.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let plain = self.encode(&[])?;
        let tree = SolutionTree::from_bytes(plain)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        let mut cache = WeightCache::default();
        let mut footer = Vec::new();
        for i in 0..tree.node_count() {
            let node = NodeRef(i);
            let Some((data, _)) = tree.raw(node) else {
                continue;
            };
            if data & TRANSPOSITION == 0 && (data & INDEX_MASK).saturating_sub(i) >= self.footer_threshold {
                let weight = tree
                    .weight(node, &mut cache)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
                footer.push((i, weight));
            }
        }
        self.encode(&footer)
    }

    pub fn write<W: Write>(&self, mut out: W) -> io::Result<()> {
        out.write_all(&self.to_bytes()?)
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        self.write(&mut file)?;
        file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(s: &str) -> Vec<PackedMove> {
        s.split_whitespace().map(|m| m.parse().unwrap()).collect()
    }

    fn sample() -> TreeWriter {
        let mut writer = TreeWriter::new(moves("e2e3"));
        writer.insert(&moves("b7b5 f1b5 c8a6"));
        writer.insert(&moves("b7b5 f1b5 e7e6"));
        writer.insert(&moves("b7b5 f1b5 a7a5"));
        writer.insert(&moves("g7g5 f1a6"));
        writer.transpose(&moves("c7c5 d1h5"), &moves("b7b5 f1b5"));
        writer
    }

    #[test]
    fn test_layout() {
        let tree = SolutionTree::from_bytes(sample().to_bytes().unwrap()).unwrap();
        assert_eq!(tree.opening_moves(), moves("e2e3").as_slice());
        assert_eq!(tree.node_count(), 9);

        let roots: Vec<_> = tree.roots().map(|n| tree.mv(n).to_string()).collect();
        assert_eq!(roots, ["b7b5", "g7g5", "c7c5"]);

        // Pre-order.
        assert_eq!(tree.next(NodeRef(0)), Some(NodeRef(1)));
        assert_eq!(tree.sibling(NodeRef(0)), Some(NodeRef(5)));
        assert_eq!(tree.next(NodeRef(2)), None);
        assert_eq!(tree.sibling(NodeRef(2)), Some(NodeRef(3)));
        assert_eq!(tree.sibling(NodeRef(4)), None);

        // c7c5 d1h5 is a transposition to b7b5 f1b5.
        assert_eq!(tree.mv(NodeRef(8)).to_string(), "d1h5");
        assert_eq!(tree.transposition(NodeRef(8)), Some(NodeRef(1)));
        assert_eq!(tree.resolve(NodeRef(8)).unwrap(), NodeRef(1));
        assert_eq!(tree.next(NodeRef(8)), None);
        assert_eq!(tree.transposition(NodeRef(1)), None);
    }

    #[test]
    fn test_query() {
        let tree = SolutionTree::from_bytes(sample().to_bytes().unwrap()).unwrap();
        let mut cache = WeightCache::new(4);

        let hints = tree.query(&[], &mut cache).unwrap();
        let hints: Vec<_> = hints.iter().map(|(m, w)| (m.to_string(), *w)).collect();
        assert_eq!(
            hints,
            [("b7b5".to_owned(), 3), ("g7g5".to_owned(), 1), ("c7c5".to_owned(), 3)]
        );

        let hints = tree.query(&moves("c7c5 d1h5"), &mut cache).unwrap();
        assert_eq!(hints.len(), 3);
        assert!(hints.iter().all(|&(_, w)| w == 1));

        assert!(tree.query(&moves("a7a6"), &mut cache).unwrap().is_empty());
        assert!(tree.query(&moves("g7g5 f1a6 b7a6"), &mut cache).unwrap().is_empty());
    }

    #[test]
    fn test_footer() {
        let bytes = sample().footer_threshold(2).to_bytes().unwrap();
        let tree = SolutionTree::from_bytes(bytes).unwrap();
        assert!(tree.footer().contains(&(0, 3)));
        assert!(tree.footer().contains(&(1, 3)));

        let mut cache = WeightCache::new(4);
        cache.seed(&tree);
        assert_eq!(cache.get(1), Some(3));
    }

    #[test]
    fn test_cycle() {
        // Two transpositions pointing at each other.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&(TRANSPOSITION | HAS_SIBLING | 1).to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&TRANSPOSITION.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let tree = SolutionTree::from_bytes(bytes).unwrap();
        assert!(matches!(tree.resolve(NodeRef(0)), Err(TreeError::Cycle { .. })));
        assert!(tree.query(&[], &mut WeightCache::new(2)).is_err());
    }

    #[test]
    fn test_truncated() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.pop();
        assert!(matches!(
            SolutionTree::from_bytes(bytes),
            Err(TreeError::Truncated)
        ));
    }

    #[test]
    fn test_cache_limit() {
        let mut cache = WeightCache::new(3);
        for key in 0..100 {
            cache.insert(key, key + 1);
        }
        assert_eq!(cache.len(), 6);
        assert!(cache.is_full());
        assert_eq!(cache.get(99), None);
        for key in 0..100 {
            if let Some(weight) = cache.get(key) {
                assert_eq!(weight, key + 1);
            }
        }
    }

    #[test]
    fn test_smallest_cache() {
        let mut cache = WeightCache::new(1);
        assert!(!cache.is_full());
        cache.insert(5, 8);
        cache.insert(6, 9);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(5), Some(8));
        assert_eq!(cache.get(6), None);
    }
}
