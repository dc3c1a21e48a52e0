//! Anchor-based patch engine for machine-proposed edits.
//!
//! Each proposed edit carries a literal `find` anchor. An edit is applicable
//! only while that anchor occurs in the document exactly once: zero
//! occurrences mean the anchor went stale, two or more make the target
//! position undecidable. Nothing is ever guessed — non-applicable edits are
//! surfaced to the user for manual dismissal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("edit anchor no longer occurs in the document")]
    Stale,

    #[error("edit anchor occurs more than once")]
    Ambiguous,

    #[error("unknown edit kind: {0}")]
    UnknownKind(String),

    #[error("edit {0} is missing its payload text")]
    MissingPayload(String),
}

pub type Result<T> = std::result::Result<T, PatchError>;

/// Kind of a proposed edit.
///
/// Unrecognized kind strings are captured rather than rejected at parse time,
/// so one malformed edit cannot poison the whole sidecar. They fail with
/// `UnknownKind` when (and only when) someone tries to apply them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditKind {
    Replace,
    InsertAfter,
    Delete,
    #[serde(untagged)]
    Unknown(String),
}

/// A machine-proposed edit, produced by an external actor and persisted in
/// the document's sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edit {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: EditKind,

    /// Literal anchor text locating where the edit applies.
    pub find: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Where an anchor resolves in the current document, if anywhere.
///
/// Offsets are byte offsets into the UTF-8 content; they always fall on char
/// boundaries because they delimit an occurrence of the anchor text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Found { from: usize, to: usize },
    Stale,
    Ambiguous,
}

impl Anchor {
    pub fn is_found(&self) -> bool {
        matches!(self, Anchor::Found { .. })
    }

    /// Start offset for found anchors.
    pub fn position(&self) -> Option<usize> {
        match self {
            Anchor::Found { from, .. } => Some(*from),
            _ => None,
        }
    }
}

/// Locate the unique occurrence of `find` in `content`.
///
/// Empty anchors violate the proposer contract and never locate.
pub fn locate(content: &str, find: &str) -> Anchor {
    if find.is_empty() {
        return Anchor::Stale;
    }

    let mut occurrences = content.match_indices(find);
    let Some((from, _)) = occurrences.next() else {
        return Anchor::Stale;
    };
    if occurrences.next().is_some() {
        return Anchor::Ambiguous;
    }

    Anchor::Found {
        from,
        to: from + find.len(),
    }
}

/// Apply an edit to `content`, returning the new content.
///
/// Pure and deterministic: no I/O, no mutable external state.
pub fn apply(content: &str, edit: &Edit) -> Result<String> {
    let (from, to) = match locate(content, &edit.find) {
        Anchor::Found { from, to } => (from, to),
        Anchor::Stale => return Err(PatchError::Stale),
        Anchor::Ambiguous => return Err(PatchError::Ambiguous),
    };

    match &edit.kind {
        EditKind::Replace => {
            let replacement = edit
                .replace
                .as_deref()
                .ok_or_else(|| PatchError::MissingPayload(edit.id.clone()))?;
            Ok(format!("{}{}{}", &content[..from], replacement, &content[to..]))
        }
        EditKind::InsertAfter => {
            let insertion = edit
                .insert
                .as_deref()
                .ok_or_else(|| PatchError::MissingPayload(edit.id.clone()))?;
            Ok(format!("{}{}{}", &content[..to], insertion, &content[to..]))
        }
        EditKind::Delete => Ok(format!("{}{}", &content[..from], &content[to..])),
        EditKind::Unknown(kind) => Err(PatchError::UnknownKind(kind.clone())),
    }
}

/// Filter `edits` down to those whose anchor no longer locates.
///
/// Stale edits are surfaced, not auto-discarded; dismissal is the user's call.
pub fn stale_edits<'a>(content: &str, edits: &'a [Edit]) -> Vec<&'a Edit> {
    edits
        .iter()
        .filter(|edit| !locate(content, &edit.find).is_found())
        .collect()
}

/// Resolve every pending edit's anchor, for rendering.
pub fn edit_positions<'a>(content: &str, edits: &'a [Edit]) -> Vec<(&'a Edit, Anchor)> {
    edits
        .iter()
        .map(|edit| (edit, locate(content, &edit.find)))
        .collect()
}
