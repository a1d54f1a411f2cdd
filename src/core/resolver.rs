//! Artifact resolution for flat and composite item ids.
//!
//! Lookup order for an id `scope/leaf` under `root` with suffix `S`:
//! 1. `root/scope/leaf` + S
//! 2. `root/scope_leaf` + S
//! 3. `root/leaf` + S
//! 4. first file (sorted path order) under `root` ending in S whose name
//!    contains `leaf`
//!
//! Flat ids start at step 3. The first existing file wins.

use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::debug;

use crate::domain::ItemId;

/// Kind of artifact a stage produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Downloaded or local media file
    Media,
    /// Transcript document
    Transcript,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Media => f.write_str("media"),
            ArtifactKind::Transcript => f.write_str("transcript"),
        }
    }
}

/// Where artifacts of one kind live
#[derive(Debug, Clone)]
pub struct ArtifactLocation {
    pub root: PathBuf,
    /// Appended to the id to form the file name (e.g. `.mp4`, `_transcription.md`)
    pub suffix: String,
}

impl ArtifactLocation {
    pub fn new(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            suffix: suffix.into(),
        }
    }
}

/// Maps item ids to artifact files on disk
#[derive(Debug, Clone)]
pub struct ArtifactResolver {
    media: ArtifactLocation,
    transcript: ArtifactLocation,
}

impl ArtifactResolver {
    pub fn new(media: ArtifactLocation, transcript: ArtifactLocation) -> Self {
        Self { media, transcript }
    }

    pub fn location(&self, kind: ArtifactKind) -> &ArtifactLocation {
        match kind {
            ArtifactKind::Media => &self.media,
            ArtifactKind::Transcript => &self.transcript,
        }
    }

    /// Fixed-path candidates, in lookup order
    pub fn candidates(&self, kind: ArtifactKind, id: &ItemId) -> Vec<PathBuf> {
        let loc = self.location(kind);
        let leaf_name = format!("{}{}", id.leaf(), loc.suffix);

        let mut candidates = Vec::with_capacity(3);
        if let Some(scope) = id.scope() {
            candidates.push(loc.root.join(scope).join(&leaf_name));
            candidates.push(loc.root.join(format!("{}{}", id.flattened(), loc.suffix)));
        }
        candidates.push(loc.root.join(leaf_name));
        candidates
    }

    /// Where a new artifact for `id` should be written
    pub fn canonical_path(&self, kind: ArtifactKind, id: &ItemId) -> PathBuf {
        // The first candidate is always present
        self.candidates(kind, id).swap_remove(0)
    }

    /// Resolve an existing artifact for `id`
    pub fn resolve(&self, kind: ArtifactKind, id: &ItemId) -> Option<PathBuf> {
        if let Some(found) = self
            .candidates(kind, id)
            .into_iter()
            .find(|candidate| candidate.is_file())
        {
            debug!(%id, %kind, path = %found.display(), "Resolved artifact");
            return Some(found);
        }

        let loc = self.location(kind);
        let found = search(&loc.root, &loc.suffix, id.leaf());
        if let Some(ref path) = found {
            debug!(%id, %kind, path = %path.display(), "Resolved artifact by search");
        }
        found
    }
}

/// Recursive search for a file ending in `suffix` whose name contains `leaf`
fn search(root: &Path, suffix: &str, leaf: &str) -> Option<PathBuf> {
    if !root.is_dir() {
        return None;
    }

    let pattern = format!(
        "{}/**/*{}",
        Pattern::escape(&root.to_string_lossy()),
        Pattern::escape(suffix)
    );
    let entries = glob::glob(&pattern).ok()?;

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().contains(leaf))
                .unwrap_or(false)
        })
        .collect();

    matches.sort();
    matches.into_iter().next()
}
