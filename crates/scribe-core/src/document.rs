//! The open document record and its store path family.
//!
//! A document named `notes/plan.md` lives at `docs/notes/plan.md`; its
//! sidecar lives at `meta/notes/plan.json`. The two are separate store paths
//! with separate version tokens — never written atomically together.

use crate::meta::MetaDocument;
use crate::store::{self, Version, VersionedStore};

/// Directory holding document content.
pub const DOCS_DIR: &str = "docs";
/// Directory holding sidecar metadata.
pub const META_DIR: &str = "meta";

/// One document's in-memory state.
#[derive(Debug, Clone)]
pub struct Document {
    /// Logical path, relative to the docs directory.
    pub path: String,
    pub content: String,
    /// `None` only when the document does not yet exist remotely.
    pub version: Option<Version>,
}

impl Document {
    pub fn empty(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: String::new(),
            version: None,
        }
    }
}

/// Store path of a document's content blob.
pub fn doc_path(path: &str) -> String {
    format!("{DOCS_DIR}/{path}")
}

/// Store path of a document's sidecar blob.
pub fn meta_path(path: &str) -> String {
    match path.strip_suffix(".md") {
        Some(stem) => format!("{META_DIR}/{stem}.json"),
        None => format!("{META_DIR}/{path}"),
    }
}

/// Create a new document: empty content plus an empty sidecar, both with
/// create semantics (fails with a conflict if either already exists).
pub async fn create_document<S: VersionedStore>(store: &S, path: &str) -> store::Result<()> {
    store
        .put(
            &doc_path(path),
            b"",
            &format!("[editor] Create document: {path}"),
            None,
        )
        .await?;
    store
        .put(
            &meta_path(path),
            &MetaDocument::default().to_json_bytes(),
            &format!("[editor] Create meta: {path}"),
            None,
        )
        .await?;
    Ok(())
}

/// Ensure the docs/ and meta/ directories exist, via `.gitkeep` markers the
/// way file-host stores materialize empty directories.
pub async fn ensure_store_layout<S: VersionedStore>(store: &S) -> store::Result<()> {
    for dir in [DOCS_DIR, META_DIR] {
        let marker = format!("{dir}/.gitkeep");
        if store.get(&marker).await?.is_none() {
            store
                .put(
                    &marker,
                    b"",
                    &format!("[editor] Create directory: {dir}"),
                    None,
                )
                .await?;
        }
    }
    Ok(())
}

/// List all document paths (logical, without the docs/ prefix).
pub async fn list_documents<S: VersionedStore>(store: &S) -> store::Result<Vec<String>> {
    let prefix = format!("{DOCS_DIR}/");
    let paths = store.list_files(DOCS_DIR, ".md").await?;
    Ok(paths
        .into_iter()
        .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
        .collect())
}
