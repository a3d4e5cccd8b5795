//! Comment tree assembly.
//!
//! A discussion is rebuilt from scratch out of the full set of comments known
//! for a root item. Nothing is incremental: comments arrive out of order, so
//! the tree is a pure function of the set.
//!
//! - Comments whose parent is missing are promoted to the top level.
//! - Parent links that form a cycle are broken at the earliest member
//!   (by `created_at`, then id), which becomes a top-level node.
//! - Siblings are ordered by `(created_at, id)` ascending.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::tags::{ParsedEvent, Record};

/// A comment flattened out of its event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub parent: Option<String>,
    pub body: String,
}

impl Comment {
    /// Extract a comment belonging to `root_id` from a parsed event.
    #[must_use]
    pub fn from_parsed(parsed: &ParsedEvent, root_id: &str) -> Option<Self> {
        match &parsed.record {
            Record::Comment(c) if c.root == root_id => Some(Self {
                id: parsed.id().to_string(),
                author: parsed.author().to_string(),
                created_at: parsed.created_at(),
                parent: c.parent.clone(),
                body: c.body.clone(),
            }),
            _ => None,
        }
    }

    fn sort_key(&self) -> (u64, &str) {
        (self.created_at, self.id.as_str())
    }
}

/// Why a comment sits at the top level despite naming a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Promotion {
    /// The parent is not in the set.
    Orphan,
    /// The comment was the earliest member of a parent cycle.
    CycleBreak,
}

/// One node of the assembled tree. Children are indices into
/// [`Thread::nodes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadNode {
    pub comment: Comment,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promoted: Option<Promotion>,
    pub children: Vec<usize>,
}

/// The reply forest for one root item.
///
/// Nodes live in one flat list in depth-first presentation order, so reply
/// chains of any depth are walked, compared, serialized and dropped without
/// recursion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Thread {
    pub root_id: String,
    pub nodes: Vec<ThreadNode>,
    /// Indices of the top-level nodes.
    pub top_level: Vec<usize>,
}

impl Thread {
    /// Depth-first walk in presentation order.
    #[must_use]
    pub fn flatten(&self) -> Vec<(usize, &Comment)> {
        self.nodes.iter().map(|n| (n.depth, &n.comment)).collect()
    }

    /// Top-level nodes in sibling order.
    pub fn roots(&self) -> impl Iterator<Item = &ThreadNode> {
        self.top_level.iter().filter_map(|&i| self.nodes.get(i))
    }

    /// Direct replies to `node`.
    pub fn children<'a>(&'a self, node: &'a ThreadNode) -> impl Iterator<Item = &'a ThreadNode> {
        node.children.iter().filter_map(|&i| self.nodes.get(i))
    }

    /// Total comments in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Assemble the tree for `root_id`.
///
/// Duplicate ids collapse to one node (the first occurrence is kept).
#[must_use]
pub fn assemble(root_id: &str, comments: impl IntoIterator<Item = Comment>) -> Thread {
    let mut by_id: BTreeMap<String, Comment> = BTreeMap::new();
    for comment in comments {
        by_id.entry(comment.id.clone()).or_insert(comment);
    }

    // Parent of each node as it will be used in the tree.
    let mut effective: HashMap<String, Option<String>> = HashMap::new();
    let mut promoted: HashMap<String, Promotion> = HashMap::new();
    for comment in by_id.values() {
        let parent = comment
            .parent
            .as_ref()
            .filter(|p| *p != &comment.id && p.as_str() != root_id);
        match parent {
            Some(p) if by_id.contains_key(p) => {
                effective.insert(comment.id.clone(), Some(p.clone()));
            }
            Some(p) => {
                debug!(comment = %comment.id, parent = %p, "promoting orphan comment");
                effective.insert(comment.id.clone(), None);
                promoted.insert(comment.id.clone(), Promotion::Orphan);
            }
            None => {
                effective.insert(comment.id.clone(), None);
            }
        }
    }
    // Self-parented comments are a cycle of length one.
    for comment in by_id.values() {
        if comment.parent.as_deref() == Some(comment.id.as_str()) {
            promoted.insert(comment.id.clone(), Promotion::CycleBreak);
        }
    }

    break_cycles(&by_id, &mut effective, &mut promoted);

    let mut children: HashMap<Option<&str>, Vec<&Comment>> = HashMap::new();
    for comment in by_id.values() {
        let parent = effective.get(&comment.id).and_then(Option::as_deref);
        children.entry(parent).or_default().push(comment);
    }
    for list in children.values_mut() {
        list.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    build(root_id, &children, &promoted)
}

/// Lay the tree out depth-first with an explicit stack.
fn build(
    root_id: &str,
    children: &HashMap<Option<&str>, Vec<&Comment>>,
    promoted: &HashMap<String, Promotion>,
) -> Thread {
    let mut thread = Thread {
        root_id: root_id.to_string(),
        ..Thread::default()
    };
    // (comment, depth, index of the parent node)
    let mut stack: Vec<(&Comment, usize, Option<usize>)> = children
        .get(&None)
        .map(|list| list.iter().rev().map(|c| (*c, 0, None)).collect())
        .unwrap_or_default();

    while let Some((comment, depth, parent)) = stack.pop() {
        let index = thread.nodes.len();
        thread.nodes.push(ThreadNode {
            comment: comment.clone(),
            depth,
            promoted: promoted.get(&comment.id).copied(),
            children: Vec::new(),
        });
        match parent.and_then(|p| thread.nodes.get_mut(p)) {
            Some(node) => node.children.push(index),
            None => thread.top_level.push(index),
        }
        if let Some(replies) = children.get(&Some(comment.id.as_str())) {
            stack.extend(replies.iter().rev().map(|c| (*c, depth + 1, Some(index))));
        }
    }
    thread
}

/// Detach every node that cannot reach the top level by following parents.
///
/// Each remaining unreached node leads, by following parents, into a cycle.
/// The earliest member of that cycle becomes a top-level node; repeat until
/// every node is reachable.
fn break_cycles(
    by_id: &BTreeMap<String, Comment>,
    effective: &mut HashMap<String, Option<String>>,
    promoted: &mut HashMap<String, Promotion>,
) {
    loop {
        let reached = reachable(effective);
        let Some(start) = by_id
            .values()
            .filter(|c| !reached.contains(c.id.as_str()))
            .min_by(|a, b| a.sort_key().cmp(&b.sort_key()))
        else {
            return;
        };

        // Walk parents until a node repeats; the repeated suffix is the cycle.
        let mut path: Vec<&str> = Vec::new();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut cursor = start.id.as_str();
        while seen.insert(cursor) {
            path.push(cursor);
            match effective.get(cursor).and_then(Option::as_deref) {
                Some(parent) => cursor = parent,
                None => break,
            }
        }
        let cycle_start = path.iter().position(|id| *id == cursor).unwrap_or(0);
        let breaker = path[cycle_start..]
            .iter()
            .filter_map(|id| by_id.get(*id))
            .min_by(|a, b| a.sort_key().cmp(&b.sort_key()))
            .unwrap_or(start);

        debug!(comment = %breaker.id, "breaking reply cycle");
        effective.insert(breaker.id.clone(), None);
        promoted.insert(breaker.id.clone(), Promotion::CycleBreak);
    }
}

fn reachable(effective: &HashMap<String, Option<String>>) -> BTreeSet<&str> {
    let mut kids: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();
    for (id, parent) in effective {
        match parent {
            Some(p) => kids.entry(p.as_str()).or_default().push(id.as_str()),
            None => stack.push(id.as_str()),
        }
    }
    let mut reached = BTreeSet::new();
    while let Some(id) = stack.pop() {
        if reached.insert(id) {
            if let Some(next) = kids.get(id) {
                stack.extend(next.iter().copied());
            }
        }
    }
    reached
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn c(id: &str, parent: Option<&str>, created_at: u64) -> Comment {
        Comment {
            id: id.into(),
            author: "pk".into(),
            created_at,
            parent: parent.map(Into::into),
            body: format!("body of {id}"),
        }
    }

    fn top(thread: &Thread, i: usize) -> &ThreadNode {
        &thread.nodes[thread.top_level[i]]
    }

    fn shape(thread: &Thread) -> Vec<(usize, String)> {
        thread
            .flatten()
            .into_iter()
            .map(|(depth, c)| (depth, c.id.clone()))
            .collect()
    }

    #[test]
    fn builds_nested_tree_with_sorted_siblings() {
        let thread = assemble(
            "root",
            vec![
                c("b", None, 20),
                c("a", None, 10),
                c("a2", Some("a"), 15),
                c("a1", Some("a"), 12),
                c("a1x", Some("a1"), 13),
            ],
        );
        assert_eq!(
            shape(&thread),
            vec![
                (0, "a".into()),
                (1, "a1".into()),
                (2, "a1x".into()),
                (1, "a2".into()),
                (0, "b".into()),
            ]
        );
        assert_eq!(thread.len(), 5);
    }

    #[test]
    fn orphan_is_promoted_not_dropped() {
        let thread = assemble("root", vec![c("a", None, 10), c("o", Some("missing"), 5)]);
        assert_eq!(shape(&thread), vec![(0, "o".into()), (0, "a".into())]);
        assert_eq!(top(&thread, 0).promoted, Some(Promotion::Orphan));
        assert_eq!(top(&thread, 1).promoted, None);
    }

    #[test]
    fn parent_equal_to_root_is_top_level() {
        let thread = assemble("root", vec![c("a", Some("root"), 1)]);
        assert_eq!(thread.top_level.len(), 1);
        assert_eq!(top(&thread, 0).promoted, None);
    }

    #[test]
    fn two_cycle_breaks_at_earliest() {
        let thread = assemble("root", vec![c("x", Some("y"), 20), c("y", Some("x"), 10)]);
        assert_eq!(shape(&thread), vec![(0, "y".into()), (1, "x".into())]);
        assert_eq!(top(&thread, 0).promoted, Some(Promotion::CycleBreak));
    }

    #[test]
    fn self_parent_is_top_level() {
        let thread = assemble("root", vec![c("s", Some("s"), 1)]);
        assert_eq!(shape(&thread), vec![(0, "s".into())]);
        assert_eq!(top(&thread, 0).promoted, Some(Promotion::CycleBreak));
    }

    #[test]
    fn tail_hanging_off_a_cycle_stays_attached() {
        // t -> p -> q -> p; t is earliest overall but not on the cycle.
        let thread = assemble(
            "root",
            vec![c("t", Some("p"), 1), c("p", Some("q"), 5), c("q", Some("p"), 3)],
        );
        assert_eq!(
            shape(&thread),
            vec![(0, "q".into()), (1, "p".into()), (2, "t".into())]
        );
        assert_eq!(thread.len(), 3);
    }

    #[test]
    fn duplicates_collapse() {
        let thread = assemble("root", vec![c("a", None, 1), c("a", None, 1), c("b", Some("a"), 2)]);
        assert_eq!(thread.len(), 2);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let comments = vec![
            c("a", None, 10),
            c("b", Some("a"), 11),
            c("c", Some("b"), 12),
            c("d", Some("zz"), 9),
            c("e", Some("f"), 30),
            c("f", Some("e"), 31),
        ];
        let forward = assemble("root", comments.clone());
        let backward = assemble("root", comments.into_iter().rev());
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 6);
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let thread = assemble("root", vec![c("b", None, 1), c("a", None, 1)]);
        assert_eq!(shape(&thread), vec![(0, "a".into()), (0, "b".into())]);
    }

    #[test]
    fn children_are_indices_in_sibling_order() {
        let thread = assemble(
            "root",
            vec![c("a", None, 10), c("a2", Some("a"), 15), c("a1", Some("a"), 12)],
        );
        let a = thread.roots().next().expect("top-level node");
        let replies: Vec<&str> = thread.children(a).map(|n| n.comment.id.as_str()).collect();
        assert_eq!(replies, vec!["a1", "a2"]);
    }

    #[test]
    fn very_deep_reply_chain_does_not_recurse() {
        const DEPTH: usize = 200_000;
        let ids: Vec<String> = (0..DEPTH).map(|i| format!("{i:08}")).collect();
        let comments: Vec<Comment> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Comment {
                id: id.clone(),
                author: "pk".into(),
                created_at: u64::try_from(i).expect("fits"),
                parent: i.checked_sub(1).map(|p| ids[p].clone()),
                body: String::new(),
            })
            .collect();

        // Small stack so any per-level recursion would abort the test.
        let handle = std::thread::Builder::new()
            .stack_size(1024 * 1024)
            .spawn(move || {
                let thread = assemble("root", comments);
                let json = serde_json::to_string(&thread).expect("serialize");
                let flat = thread.flatten();
                (thread.len(), thread.top_level.len(), flat[DEPTH - 1].0, json.len())
            })
            .expect("spawn");
        let (len, top, deepest, json_len) = handle.join().expect("no stack overflow");
        assert_eq!(len, DEPTH);
        assert_eq!(top, 1);
        assert_eq!(deepest, DEPTH - 1);
        assert!(json_len > 0);
    }

    #[test]
    fn empty_thread() {
        let thread = assemble("root", Vec::new());
        assert!(thread.is_empty());
        assert!(thread.flatten().is_empty());
    }
}
