//! Sidecar metadata for a document: machine-proposed edits and comment
//! threads.
//!
//! The sidecar is a JSON blob living next to the document in the store,
//! appended to by an external proposer and rewritten here on accept/reject
//! and comment mutations. Transforms return a new `MetaDocument` rather than
//! mutating in place — the session keeps the old value until the matching
//! store write succeeds, so a failed write never leaves half-applied state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::patch::Edit;

/// Sidecar record: pending proposed edits plus comment threads.
///
/// Serialized shape is shared with the external proposer:
/// `{ "pending_edits": [...], "comments": [...] }`, pretty-printed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaDocument {
    #[serde(default)]
    pub pending_edits: Vec<Edit>,

    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// A comment anchored to a substring of the document.
///
/// `parent_id` is a weak reference to another comment's id; roots carry none.
/// A dangling parent makes this an orphan reply, never a root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,

    #[serde(rename = "parentId", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    pub author: String,

    /// Literal anchor text; may go stale exactly like an edit anchor, and
    /// staleness is resolved lazily at render time.
    pub anchor: String,

    pub text: String,

    pub created: DateTime<Utc>,

    #[serde(default)]
    pub resolved: bool,
}

impl MetaDocument {
    /// Decode the sidecar from its stored JSON bytes.
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Encode to the shared on-store JSON shape (pretty-printed so the
    /// proposer's appends produce reviewable diffs).
    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).expect("sidecar serialization is infallible")
    }

    /// Return a copy with the given edit absent. Unknown ids are a no-op.
    pub fn remove_edit(&self, edit_id: &str) -> MetaDocument {
        MetaDocument {
            pending_edits: self
                .pending_edits
                .iter()
                .filter(|edit| edit.id != edit_id)
                .cloned()
                .collect(),
            comments: self.comments.clone(),
        }
    }

    /// Return a copy with a fresh comment appended, plus the comment itself.
    ///
    /// Anchor findability is not validated here; a stale anchor simply sorts
    /// last at render time.
    pub fn add_comment(
        &self,
        author: &str,
        anchor: &str,
        text: &str,
        parent_id: Option<&str>,
    ) -> (MetaDocument, Comment) {
        let comment = Comment {
            id: format!("comment-{}", Uuid::new_v4()),
            parent_id: parent_id.map(str::to_string),
            author: author.to_string(),
            anchor: anchor.to_string(),
            text: text.to_string(),
            created: Utc::now(),
            resolved: false,
        };

        let mut meta = self.clone();
        meta.comments.push(comment.clone());
        (meta, comment)
    }

    /// Return a copy with the given comment marked resolved. Unknown ids are
    /// a no-op; replies are not cascaded.
    pub fn resolve_comment(&self, comment_id: &str) -> MetaDocument {
        MetaDocument {
            pending_edits: self.pending_edits.clone(),
            comments: self
                .comments
                .iter()
                .map(|comment| {
                    if comment.id == comment_id {
                        Comment {
                            resolved: true,
                            ..comment.clone()
                        }
                    } else {
                        comment.clone()
                    }
                })
                .collect(),
        }
    }

    /// Look up a comment by id.
    pub fn comment(&self, comment_id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }

    /// Look up a pending edit by id.
    pub fn pending_edit(&self, edit_id: &str) -> Option<&Edit> {
        self.pending_edits.iter().find(|e| e.id == edit_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::EditKind;

    fn edit(id: &str) -> Edit {
        Edit {
            id: id.into(),
            kind: EditKind::Replace,
            find: "old".into(),
            replace: Some("new".into()),
            insert: None,
            rationale: None,
        }
    }

    #[test]
    fn test_remove_edit() {
        let meta = MetaDocument {
            pending_edits: vec![edit("e1"), edit("e2")],
            comments: vec![],
        };

        let removed = meta.remove_edit("e1");
        assert_eq!(removed.pending_edits.len(), 1);
        assert_eq!(removed.pending_edits[0].id, "e2");
        // Original untouched.
        assert_eq!(meta.pending_edits.len(), 2);
    }

    #[test]
    fn test_remove_edit_is_idempotent() {
        let meta = MetaDocument {
            pending_edits: vec![edit("e1")],
            comments: vec![],
        };

        let once = meta.remove_edit("e1");
        let twice = once.remove_edit("e1");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_remove_edit_unknown_id_is_noop() {
        let meta = MetaDocument {
            pending_edits: vec![edit("e1")],
            comments: vec![],
        };
        assert_eq!(meta.remove_edit("missing"), meta);
    }

    #[test]
    fn test_add_comment() {
        let meta = MetaDocument::default();
        let (updated, comment) = meta.add_comment("human", "some anchor", "looks wrong", None);

        assert_eq!(updated.comments.len(), 1);
        assert_eq!(updated.comments[0], comment);
        assert_eq!(comment.author, "human");
        assert_eq!(comment.anchor, "some anchor");
        assert!(comment.parent_id.is_none());
        assert!(!comment.resolved);
        assert!(meta.comments.is_empty());
    }

    #[test]
    fn test_add_comment_ids_are_unique() {
        let meta = MetaDocument::default();
        let (meta, first) = meta.add_comment("human", "a", "one", None);
        let (_, second) = meta.add_comment("human", "a", "two", Some(&first.id));

        assert_ne!(first.id, second.id);
        assert_eq!(second.parent_id.as_deref(), Some(first.id.as_str()));
    }

    #[test]
    fn test_resolve_comment() {
        let meta = MetaDocument::default();
        let (meta, comment) = meta.add_comment("human", "a", "note", None);

        let resolved = meta.resolve_comment(&comment.id);
        assert!(resolved.comment(&comment.id).unwrap().resolved);
        // Original untouched.
        assert!(!meta.comment(&comment.id).unwrap().resolved);
    }

    #[test]
    fn test_resolve_comment_unknown_id_is_noop() {
        let meta = MetaDocument::default();
        let (meta, _) = meta.add_comment("human", "a", "note", None);
        assert_eq!(meta.resolve_comment("missing"), meta);
    }

    #[test]
    fn test_resolve_comment_does_not_cascade() {
        let meta = MetaDocument::default();
        let (meta, root) = meta.add_comment("human", "a", "root", None);
        let (meta, reply) = meta.add_comment("reviewer", "a", "reply", Some(&root.id));

        let resolved = meta.resolve_comment(&root.id);
        assert!(resolved.comment(&root.id).unwrap().resolved);
        assert!(!resolved.comment(&reply.id).unwrap().resolved);
    }

    #[test]
    fn test_sidecar_json_round_trip() {
        let json = br#"{
            "pending_edits": [
                { "id": "e1", "type": "replace", "find": "world", "replace": "there" }
            ],
            "comments": [
                {
                    "id": "comment-1",
                    "author": "reviewer",
                    "anchor": "world",
                    "text": "prefer a warmer greeting",
                    "created": "2025-06-01T12:00:00Z",
                    "resolved": false
                },
                {
                    "id": "comment-2",
                    "parentId": "comment-1",
                    "author": "human",
                    "anchor": "world",
                    "text": "agreed",
                    "created": "2025-06-01T12:05:00Z",
                    "resolved": false
                }
            ]
        }"#;

        let meta = MetaDocument::from_json(json).unwrap();
        assert_eq!(meta.pending_edits.len(), 1);
        assert_eq!(meta.comments.len(), 2);
        assert_eq!(
            meta.comments[1].parent_id.as_deref(),
            Some("comment-1")
        );

        let out: serde_json::Value =
            serde_json::from_slice(&meta.to_json_bytes()).unwrap();
        assert_eq!(out["pending_edits"][0]["type"], "replace");
        // parentId omitted for roots, present for replies.
        assert!(out["comments"][0].get("parentId").is_none());
        assert_eq!(out["comments"][1]["parentId"], "comment-1");
        // ISO-8601 timestamp survives the trip.
        assert!(out["comments"][0]["created"]
            .as_str()
            .unwrap()
            .starts_with("2025-06-01T12:00:00"));
    }

    #[test]
    fn test_sidecar_defaults_missing_sections() {
        let meta = MetaDocument::from_json(b"{}").unwrap();
        assert!(meta.pending_edits.is_empty());
        assert!(meta.comments.is_empty());
    }
}
