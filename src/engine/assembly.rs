use tracing::warn;

use crate::{
    engine::{NodeId, NodeKind, Origin, SessionTree},
    entry::{Entry, Meta},
    packed::PackedMove,
    score::Score,
};

/// Turn a completed session into book records.
///
/// Scores and subtree sizes are recomputed bottom up. Every position gets
/// one record, except excluded branches. Book proofs that were reached
/// again are written back unchanged. The records are in book order.
pub fn assemble(session: &SessionTree, tolerance: i16) -> Vec<Entry> {
    let Some(root) = session.root() else {
        return Vec::new();
    };

    let mut computed: Vec<Option<(Score, u64)>> = vec![None; session.len()];
    let mut records = Vec::with_capacity(session.len());
    let mut stack: Vec<(NodeId, bool)> = vec![(root, false)];

    while let Some((id, expanded)) = stack.pop() {
        if computed[id].is_some() {
            continue;
        }
        let node = session.get(id);
        if !expanded {
            stack.push((id, true));
            stack.extend(
                node.children
                    .iter()
                    .filter(|&&(_, child)| computed[child].is_none())
                    .map(|&(_, child)| (child, false)),
            );
            continue;
        }

        let children: Vec<(PackedMove, Score, u64)> = node
            .children
            .iter()
            .filter_map(|&(m, child)| computed[child].map(|(score, count)| (m, score, count)))
            .collect();
        let count = children
            .iter()
            .fold(1u64, |acc, &(_, _, count)| acc.saturating_add(count));

        let (mv, score) = match node.kind {
            _ if node.is_leaf() => (PackedMove::NULL, node.score),
            NodeKind::Ours => children
                .first()
                .map_or((PackedMove::NULL, node.score), |&(m, score, _)| (m, score.parent())),
            NodeKind::Theirs => children
                .iter()
                .min_by_key(|&&(_, score, _)| score)
                .map_or((PackedMove::NULL, node.score), |&(m, score, _)| (m, score)),
        };
        computed[id] = Some((score, count));

        if let Some(stored) = node
            .stored
            .filter(|stored| stored.score.is_proven() && stored.score != score)
        {
            if session.is_transposition(node.key) {
                warn!(key = node.key, stored = %stored.score, %score, "wrong transposition score");
            } else if (i32::from(stored.score.0) - i32::from(score.0)).abs() > i32::from(tolerance) {
                warn!(key = node.key, stored = %stored.score, %score, "not best");
            }
        }

        let record = match node.origin {
            Origin::Skip => None,
            Origin::Cached(entry) => Some(entry),
            Origin::Terminal => Some(Entry {
                key: node.key,
                mv: PackedMove::NULL,
                score: Score::MATE,
                meta: Meta::NodeCount(1),
            }),
            Origin::Placeholder(m) => Some(Entry {
                key: node.key,
                mv: m,
                score,
                meta: Meta::NodeCount(1),
            }),
            _ => Some(Entry {
                key: node.key,
                mv,
                score,
                meta: Meta::node_count(count),
            }),
        };
        records.extend(record);
    }

    records.sort_by(Entry::book_order);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{engine::NodeState, entry::is_book_sorted};

    fn done(session: &mut SessionTree, key: u64, kind: NodeKind, score: Score, origin: Origin) -> NodeId {
        let id = session.insert(key, kind, None);
        let node = session.get_mut(id);
        node.state = NodeState::Done;
        node.score = score;
        node.origin = origin;
        id
    }

    #[test]
    fn test_assemble() {
        let mut session = SessionTree::new();
        let a: PackedMove = "a2a3".parse().unwrap();
        let b: PackedMove = "b2b3".parse().unwrap();

        let root = done(&mut session, 50, NodeKind::Ours, Score::UNKNOWN, Origin::Evaluator);
        let reply = done(&mut session, 40, NodeKind::Theirs, Score::UNKNOWN, Origin::Expanded);
        let win = done(&mut session, 30, NodeKind::Ours, Score::MATE, Origin::Terminal);
        let skip = done(&mut session, 20, NodeKind::Ours, Score::mate_in(1), Origin::Skip);
        let cached = Entry {
            key: 10,
            mv: b,
            score: Score::mate_in(3),
            meta: Meta::NodeCount(77),
        };
        let book = done(&mut session, 10, NodeKind::Ours, cached.score, Origin::Cached(cached));

        session.get_mut(root).children.push((a, reply));
        session.get_mut(reply).children.extend([(a, win), (b, skip), (a, book), (b, win)]);

        let records = assemble(&session, 2);
        assert!(is_book_sorted(&records));
        assert_eq!(records.iter().map(|e| e.key).collect::<Vec<_>>(), [10, 30, 40, 50]);

        assert_eq!(records[0], cached);
        assert_eq!(records[1].score, Score::MATE);
        assert!(records[1].mv.is_null());

        // The reply node takes its worst child, the cached proof.
        assert_eq!(records[2].score, Score::mate_in(3));
        assert_eq!(records[2].mv, a);
        assert_eq!(records[2].meta, Meta::NodeCount(5));
        assert_eq!(records[3].score, Score::mate_in(4));
        assert_eq!(records[3].mv, a);
        assert_eq!(records[3].meta, Meta::NodeCount(6));
    }
}
