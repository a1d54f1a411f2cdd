//! Graphiti knowledge-graph ingestion.
//!
//! Endpoint: POST {endpoint}/messages
//!
//! A transcript document becomes one analysis episode plus one episode per
//! transcript chunk, all under a group derived from the item id.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::IngestorConfig;
use crate::domain::TranscriptOutput;

use super::{GraphIngestor, IngestError};

/// Graphiti HTTP client
pub struct GraphitiIngestor {
    config: IngestorConfig,
    /// Artifacts are named relative to this root to recover the item id
    artifact_root: PathBuf,
    artifact_suffix: String,
    client: reqwest::Client,
}

/// Request body for `/messages`
#[derive(Debug, Serialize)]
struct AddMessagesRequest<'a> {
    group_id: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    content: &'a str,
    name: &'a str,
    role_type: &'static str,
    role: &'static str,
    timestamp: String,
    source_description: &'a str,
}

/// One unit of content sent to the graph
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    pub name: String,
    pub content: String,
}

impl GraphitiIngestor {
    pub fn new(
        config: IngestorConfig,
        artifact_root: impl Into<PathBuf>,
        artifact_suffix: impl Into<String>,
    ) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            artifact_root: artifact_root.into(),
            artifact_suffix: artifact_suffix.into(),
            client,
        })
    }

    /// Item id encoded in an artifact path (`scope/leaf` for channel folders)
    pub fn item_id_for(&self, artifact_path: &Path) -> String {
        let relative = artifact_path
            .strip_prefix(&self.artifact_root)
            .unwrap_or_else(|_| Path::new(artifact_path.file_name().unwrap_or_default()));
        let raw = relative.to_string_lossy().replace('\\', "/");
        raw.strip_suffix(&self.artifact_suffix)
            .unwrap_or(&raw)
            .to_string()
    }

    async fn send(&self, group_id: &str, episode: &Episode) -> Result<(), IngestError> {
        let request = AddMessagesRequest {
            group_id,
            messages: vec![Message {
                content: &episode.content,
                name: &episode.name,
                role_type: "system",
                role: "transcript",
                timestamp: Utc::now().to_rfc3339(),
                source_description: &self.config.source_description,
            }],
        };

        self.client
            .post(format!("{}/messages", self.config.endpoint.trim_end_matches('/')))
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl GraphIngestor for GraphitiIngestor {
    fn name(&self) -> &str {
        "graphiti"
    }

    async fn ingest(&self, artifact_path: &Path) -> Result<bool, IngestError> {
        let bytes = tokio::fs::read(artifact_path).await?;
        let content = String::from_utf8_lossy(&bytes);
        if content.trim().is_empty() {
            return Err(IngestError::EmptyDocument(artifact_path.to_path_buf()));
        }

        let item_id = self.item_id_for(artifact_path);
        let group_id = item_id.replace(['/', '\\'], "_");
        let document = TranscriptOutput::parse(&content);
        let (analysis, chunks) = episodes_for(&item_id, &document, self.config.chunk_size);

        info!(%item_id, chunks = chunks.len(), "Ingesting transcript into graph");

        let analysis_ok = match analysis {
            Some(ref episode) => match self.send(&group_id, episode).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(%item_id, error = %e, "Failed to add analysis episode");
                    false
                }
            },
            None => false,
        };

        let mut accepted = 0usize;
        for (idx, chunk) in chunks.iter().enumerate() {
            match self.send(&group_id, chunk).await {
                Ok(()) => accepted += 1,
                Err(e) => warn!(%item_id, chunk = idx, error = %e, "Failed to add transcript chunk"),
            }
        }

        let ingested = accepted > 0 || (chunks.is_empty() && analysis_ok);
        if ingested {
            info!(%item_id, accepted, total = chunks.len(), "Ingested transcript");
        } else {
            warn!(%item_id, "Graph accepted no content");
        }
        Ok(ingested)
    }
}

/// Split a document into an analysis episode and transcript chunk episodes
pub fn episodes_for(
    item_id: &str,
    document: &TranscriptOutput,
    chunk_size: usize,
) -> (Option<Episode>, Vec<Episode>) {
    let analysis = &document.analysis;
    let mut parts = Vec::new();
    if !analysis.summary.trim().is_empty() {
        parts.push(analysis.summary.trim().to_string());
    }
    for (label, items) in [
        ("Topics", &analysis.topics),
        ("Key terms", &analysis.key_terms),
        ("Chapters", &analysis.chapters),
    ] {
        if !items.is_empty() {
            parts.push(format!("{}: {}", label, items.join(", ")));
        }
    }

    let analysis_episode = (!parts.is_empty()).then(|| Episode {
        name: format!("{} analysis", item_id),
        content: parts.join("\n\n"),
    });

    let chunks = chunk_transcript(&document.full_text(), chunk_size)
        .into_iter()
        .enumerate()
        .map(|(idx, content)| Episode {
            name: format!("{} transcript part {}", item_id, idx + 1),
            content,
        })
        .collect();

    (analysis_episode, chunks)
}

/// Break a transcript into chunks of at most `chunk_size` characters,
/// splitting at line boundaries and, for overlong lines, at whitespace.
pub fn chunk_transcript(transcript: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    let push_piece = |piece: &str, current: &mut String, chunks: &mut Vec<String>| {
        let sep = usize::from(!current.is_empty());
        if current.chars().count() + sep + piece.chars().count() > chunk_size && !current.is_empty() {
            chunks.push(std::mem::take(current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(piece);
    };

    for line in transcript.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.chars().count() <= chunk_size {
            push_piece(line, &mut current, &mut chunks);
            continue;
        }

        // Overlong line: pack words
        let mut piece = String::new();
        for word in line.split_whitespace() {
            if !piece.is_empty() && piece.chars().count() + 1 + word.chars().count() > chunk_size {
                push_piece(&piece, &mut current, &mut chunks);
                piece.clear();
            }
            if !piece.is_empty() {
                piece.push(' ');
            }
            piece.push_str(word);
        }
        if !piece.is_empty() {
            push_piece(&piece, &mut current, &mut chunks);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
