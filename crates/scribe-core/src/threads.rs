//! Comment thread layout: grouping, ordering, and anchor position caching.
//!
//! Replies reference their parent by id only (weak reference); the id index
//! is rebuilt on every layout pass, never held as pointers, so comments stay
//! serializable and reordering-safe. Rendering groups every reply under its
//! top-level ancestor regardless of nesting depth.

use std::collections::{HashMap, HashSet};

use crate::meta::Comment;
use crate::patch;

/// Content length drift (in bytes) tolerated before cached anchor positions
/// are recomputed. Keeps unrelated keystrokes from rescanning the document.
const RESCAN_THRESHOLD: usize = 64;

/// A root comment with its replies, in render order.
#[derive(Debug)]
pub struct CommentThread<'a> {
    pub root: &'a Comment,
    /// All transitive replies, ascending by creation time.
    pub replies: Vec<&'a Comment>,
}

/// Cached anchor positions for root comments.
#[derive(Debug, Default)]
pub struct AnchorCache {
    content_len: usize,
    positions: HashMap<String, Option<usize>>,
}

impl AnchorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all cached positions. Called whenever the comment set is
    /// replaced wholesale (poll refresh, accept, path switch).
    pub fn invalidate(&mut self) {
        self.positions.clear();
        self.content_len = 0;
    }

    fn refresh(&mut self, content: &str, roots: &[&Comment]) {
        let ids_changed = roots.len() != self.positions.len()
            || roots.iter().any(|c| !self.positions.contains_key(&c.id));
        let drifted = content.len().abs_diff(self.content_len) > RESCAN_THRESHOLD;
        if !ids_changed && !drifted {
            return;
        }

        self.content_len = content.len();
        self.positions = roots
            .iter()
            .map(|c| (c.id.clone(), patch::locate(content, &c.anchor).position()))
            .collect();
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied().flatten()
    }
}

/// Lay out comments as render-ready threads.
///
/// Roots order by ascending anchor position; anchors that no longer locate
/// (stale or ambiguous) sort after all found ones. Orphan replies — dangling
/// parent id or a cyclic parent chain — are never shown as roots and are
/// dropped from the layout.
pub fn thread_layout<'a>(
    content: &str,
    comments: &'a [Comment],
    cache: &mut AnchorCache,
) -> Vec<CommentThread<'a>> {
    let index: HashMap<&str, &Comment> =
        comments.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut roots: Vec<&Comment> = Vec::new();
    let mut replies_by_root: HashMap<&str, Vec<&Comment>> = HashMap::new();

    for comment in comments {
        if comment.parent_id.is_none() {
            roots.push(comment);
        } else if let Some(root) = root_of(comment, &index) {
            replies_by_root
                .entry(root.id.as_str())
                .or_default()
                .push(comment);
        }
    }

    cache.refresh(content, &roots);
    roots.sort_by_key(|c| {
        let position = cache.position(&c.id);
        (position.is_none(), position.unwrap_or(usize::MAX))
    });

    roots
        .into_iter()
        .map(|root| {
            let mut replies = replies_by_root.remove(root.id.as_str()).unwrap_or_default();
            replies.sort_by_key(|r| r.created);
            CommentThread { root, replies }
        })
        .collect()
}

/// Walk the parent chain up to the top-level ancestor.
///
/// Returns None for dangling parents and cyclic chains.
fn root_of<'a>(comment: &'a Comment, index: &HashMap<&str, &'a Comment>) -> Option<&'a Comment> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut current = comment;
    while let Some(parent_id) = current.parent_id.as_deref() {
        if !seen.insert(current.id.as_str()) {
            return None;
        }
        current = index.get(parent_id)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn comment(id: &str, anchor: &str, parent_id: Option<&str>, created_secs: i64) -> Comment {
        Comment {
            id: id.into(),
            parent_id: parent_id.map(str::to_string),
            author: "human".into(),
            anchor: anchor.into(),
            text: format!("text for {id}"),
            created: Utc.timestamp_opt(created_secs, 0).unwrap(),
            resolved: false,
        }
    }

    #[test]
    fn test_roots_order_by_anchor_position() {
        // 100-char document with anchors at byte positions 5, 40, and 2.
        let mut content = "ab~cdQR".to_string(); // "~" at 2, "QR" at 5
        content.push_str(&"x".repeat(33)); // pad to 40
        content.push_str("ZZ"); // "ZZ" at 40
        content.push_str(&"y".repeat(100 - content.len()));
        assert_eq!(content.len(), 100);
        assert_eq!(content.find("QR"), Some(5));
        assert_eq!(content.find("ZZ"), Some(40));

        let comments = vec![
            comment("at5", "QR", None, 1),
            comment("at40", "ZZ", None, 2),
            comment("at2", "~", None, 3),
        ];

        let mut cache = AnchorCache::new();
        let threads = thread_layout(&content, &comments, &mut cache);
        let order: Vec<&str> = threads.iter().map(|t| t.root.id.as_str()).collect();
        assert_eq!(order, vec!["at2", "at5", "at40"]);
    }

    #[test]
    fn test_missing_anchor_sorts_last() {
        let comments = vec![
            comment("gone", "not here", None, 1),
            comment("early", "alpha", None, 2),
            comment("late", "omega", None, 3),
        ];

        let mut cache = AnchorCache::new();
        let threads = thread_layout("alpha ... omega", &comments, &mut cache);
        let order: Vec<&str> = threads.iter().map(|t| t.root.id.as_str()).collect();
        assert_eq!(order, vec!["early", "late", "gone"]);
    }

    #[test]
    fn test_replies_group_under_top_level_ancestor() {
        let comments = vec![
            comment("root", "alpha", None, 1),
            comment("reply", "alpha", Some("root"), 3),
            comment("nested", "alpha", Some("reply"), 2),
        ];

        let mut cache = AnchorCache::new();
        let threads = thread_layout("alpha", &comments, &mut cache);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].root.id, "root");
        // Replies ascend by creation time, nesting flattened.
        let replies: Vec<&str> = threads[0].replies.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(replies, vec!["nested", "reply"]);
    }

    #[test]
    fn test_orphan_reply_is_never_a_root() {
        let comments = vec![
            comment("root", "alpha", None, 1),
            comment("orphan", "alpha", Some("deleted-parent"), 2),
        ];

        let mut cache = AnchorCache::new();
        let threads = thread_layout("alpha", &comments, &mut cache);
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].root.id, "root");
        assert!(threads[0].replies.is_empty());
    }

    #[test]
    fn test_cyclic_parents_terminate() {
        let comments = vec![
            comment("a", "alpha", Some("b"), 1),
            comment("b", "alpha", Some("a"), 2),
        ];

        let mut cache = AnchorCache::new();
        let threads = thread_layout("alpha", &comments, &mut cache);
        assert!(threads.is_empty());
    }

    #[test]
    fn test_cache_survives_small_content_drift() {
        let comments = vec![comment("c1", "needle", None, 1)];
        let mut cache = AnchorCache::new();

        let content = format!("{}needle", "x".repeat(10));
        let threads = thread_layout(&content, &comments, &mut cache);
        assert_eq!(threads.len(), 1);
        assert_eq!(cache.position("c1"), Some(10));

        // A keystroke's worth of drift: cached position is reused as-is.
        let grown = format!("{}needle!", "x".repeat(10));
        thread_layout(&grown, &comments, &mut cache);
        assert_eq!(cache.position("c1"), Some(10));

        // Past the threshold the cache rescans.
        let shifted = format!("{}needle", "x".repeat(200));
        thread_layout(&shifted, &comments, &mut cache);
        assert_eq!(cache.position("c1"), Some(200));
    }

    #[test]
    fn test_cache_rescans_when_comment_set_changes() {
        let mut cache = AnchorCache::new();
        let comments = vec![comment("c1", "needle", None, 1)];
        thread_layout("needle", &comments, &mut cache);
        assert_eq!(cache.position("c1"), Some(0));

        let comments = vec![
            comment("c1", "needle", None, 1),
            comment("c2", "thread", None, 2),
        ];
        thread_layout("needle thread", &comments, &mut cache);
        assert_eq!(cache.position("c2"), Some(7));
    }
}
