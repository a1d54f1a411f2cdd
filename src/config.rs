//! Configuration for graphmem.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (GRAPHMEM_HOME, GRAPHMEM_DB, GRAPHMEM_DOWNLOADS,
//!    MAX_RETRIES, GRAPHITI_URL, TRANSCRIBE_BACKEND, DEEPGRAM_API_KEY)
//! 2. Config file (.graphmem/config.yaml)
//! 3. Defaults (~/.graphmem)
//!
//! Config file discovery:
//! - Searches current directory and parents for .graphmem/config.yaml
//! - `paths.home` is relative to the .graphmem/ directory, `paths.downloads`
//!   to the project root (the parent of .graphmem/)
//!
//! Every section rejects unknown keys so a typo fails loudly instead of
//! being ignored.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::resolver::{ArtifactLocation, ArtifactResolver};

pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub acquirer: AcquirerConfig,
    #[serde(default)]
    pub transcriber: TranscriberConfig,
    #[serde(default)]
    pub deepgram: DeepgramConfig,
    #[serde(default)]
    pub ingestor: IngestorConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Engine state directory (relative to .graphmem/)
    pub home: Option<String>,
    /// Database file (relative to home)
    pub database: Option<String>,
    /// Media and transcript directory (relative to the project root)
    pub downloads: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Failed attempts before an item is marked `failed`
    pub max_retries: Option<u32>,
    /// How long a store call waits on another worker's lock
    pub busy_timeout_ms: Option<u64>,
}

/// Settings for the `yt-dlp` acquirer
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AcquirerConfig {
    /// Executable to invoke
    pub binary: String,
    /// `yt-dlp -f` format selector
    pub format: String,
    /// Container extension of downloaded media, including the dot
    pub media_suffix: String,
    /// Channel entries shorter than this are skipped at prepare time
    pub min_duration_secs: u64,
    /// Per-download timeout; none waits indefinitely
    pub timeout_secs: Option<u64>,
}

impl Default for AcquirerConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            format: "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
            media_suffix: ".mp4".to_string(),
            min_duration_secs: 60,
            timeout_secs: None,
        }
    }
}

/// Which service produces fresh transcriptions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscribeBackend {
    /// offmute, falling back to Deepgram when an API key is configured
    #[default]
    Offmute,
    /// Deepgram only
    Deepgram,
}

impl TranscribeBackend {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "offmute" => Some(Self::Offmute),
            "deepgram" => Some(Self::Deepgram),
            _ => None,
        }
    }
}

impl fmt::Display for TranscribeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offmute => write!(f, "offmute"),
            Self::Deepgram => write!(f, "deepgram"),
        }
    }
}

/// Settings for the transcriber (offmute runner plus backend choice)
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TranscriberConfig {
    pub backend: TranscribeBackend,
    /// Package runner used to launch offmute
    pub runner: String,
    /// Package name passed to the runner
    pub package: String,
    /// offmute model tier (`-t`)
    pub tier: String,
    /// Suffix of the transcript document written next to the media
    pub artifact_suffix: String,
    /// Per-transcription timeout; none waits indefinitely
    pub timeout_secs: Option<u64>,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            backend: TranscribeBackend::default(),
            runner: "bunx".to_string(),
            package: "offmute-advanced".to_string(),
            tier: "budget".to_string(),
            artifact_suffix: "_transcription.md".to_string(),
            timeout_secs: None,
        }
    }
}

/// Settings for the Deepgram transcription API
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DeepgramConfig {
    /// Prerecorded-audio endpoint
    pub endpoint: String,
    /// Usually supplied through DEEPGRAM_API_KEY instead of the file
    pub api_key: Option<String>,
    /// Executable used to extract a mono 16 kHz WAV track
    pub ffmpeg: String,
    /// HTTP request timeout
    pub timeout_secs: u64,
}

impl Default for DeepgramConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepgram.com/v1/listen".to_string(),
            api_key: None,
            ffmpeg: "ffmpeg".to_string(),
            timeout_secs: 600,
        }
    }
}

/// Settings for the Graphiti HTTP ingestor
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IngestorConfig {
    /// Base URL of the Graphiti server
    pub endpoint: String,
    /// Maximum characters per transcript episode
    pub chunk_size: usize,
    /// HTTP request timeout
    pub timeout_secs: u64,
    /// `source_description` attached to every episode
    pub source_description: String,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            chunk_size: 1000,
            timeout_secs: 60,
            source_description: "video transcript".to_string(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory
    pub home: PathBuf,
    /// SQLite database file
    pub database: PathBuf,
    /// Media and transcript root
    pub downloads: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub max_retries: u32,
    pub busy_timeout: Duration,
    pub acquirer: AcquirerConfig,
    pub transcriber: TranscriberConfig,
    pub deepgram: DeepgramConfig,
    pub ingestor: IngestorConfig,
}

impl ResolvedConfig {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_file = match find_config_file() {
            Some(path) => {
                let parsed = load_config_file(&path)?;
                Some((path, parsed))
            }
            None => None,
        };
        let default_home = dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".graphmem");

        resolve(config_file, default_home, |key| std::env::var(key).ok())
    }

    /// Resolver over the downloads directory
    pub fn artifact_resolver(&self) -> ArtifactResolver {
        ArtifactResolver::new(
            ArtifactLocation::new(&self.downloads, &self.acquirer.media_suffix),
            ArtifactLocation::new(&self.downloads, &self.transcriber.artifact_suffix),
        )
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".graphmem").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn resolve(
    config_file: Option<(PathBuf, ConfigFile)>,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let (config_path, file) = match config_file {
        Some((path, file)) => (Some(path), Some(file)),
        None => (None, None),
    };

    // .graphmem/ and the project root above it
    let dot_dir = config_path.as_deref().and_then(Path::parent);
    let base_dir = dot_dir.and_then(Path::parent);

    let paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();
    let pipeline = file.as_ref().map(|f| f.pipeline.clone()).unwrap_or_default();

    let home = match (env("GRAPHMEM_HOME"), paths.home.as_deref(), dot_dir) {
        (Some(env_home), _, _) => PathBuf::from(env_home),
        (None, Some(home), Some(dot_dir)) => resolve_path(dot_dir, home),
        _ => default_home,
    };

    let database = match (env("GRAPHMEM_DB"), paths.database.as_deref()) {
        (Some(env_db), _) => PathBuf::from(env_db),
        (None, Some(db)) => resolve_path(&home, db),
        (None, None) => home.join("graph_memory.db"),
    };

    let downloads = match (env("GRAPHMEM_DOWNLOADS"), paths.downloads.as_deref(), base_dir) {
        (Some(env_dl), _, _) => PathBuf::from(env_dl),
        (None, Some(dl), Some(base)) => resolve_path(base, dl),
        _ => home.join("downloads"),
    };

    let max_retries = match env("MAX_RETRIES") {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .with_context(|| format!("MAX_RETRIES must be a non-negative integer, got '{}'", raw))?,
        None => pipeline.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
    };

    let busy_timeout =
        Duration::from_millis(pipeline.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS));

    let (acquirer, mut transcriber, mut deepgram, mut ingestor) = match file {
        Some(f) => (f.acquirer, f.transcriber, f.deepgram, f.ingestor),
        None => Default::default(),
    };
    if let Some(raw) = env("TRANSCRIBE_BACKEND") {
        transcriber.backend = TranscribeBackend::parse(&raw).with_context(|| {
            format!("TRANSCRIBE_BACKEND must be 'offmute' or 'deepgram', got '{}'", raw)
        })?;
    }
    if let Some(key) = env("DEEPGRAM_API_KEY").filter(|k| !k.trim().is_empty()) {
        deepgram.api_key = Some(key);
    }
    if let Some(url) = env("GRAPHITI_URL") {
        ingestor.endpoint = url;
    }

    Ok(ResolvedConfig {
        home,
        database,
        downloads,
        config_file: config_path,
        max_retries,
        busy_timeout,
        acquirer,
        transcriber,
        deepgram,
        ingestor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, PathBuf::from("/home/u/.graphmem"), no_env).unwrap();

        assert_eq!(config.home, PathBuf::from("/home/u/.graphmem"));
        assert_eq!(config.database, PathBuf::from("/home/u/.graphmem/graph_memory.db"));
        assert_eq!(config.downloads, PathBuf::from("/home/u/.graphmem/downloads"));
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.acquirer.binary, "yt-dlp");
        assert_eq!(config.transcriber.artifact_suffix, "_transcription.md");
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let yaml = r#"
version: "1"
paths:
  home: ./
  downloads: downloads
pipeline:
  max_retries: 3
acquirer:
  media_suffix: ".mkv"
ingestor:
  endpoint: http://graph:8000
  chunk_size: 500
"#;
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.pipeline.max_retries, Some(3));
        assert_eq!(file.acquirer.media_suffix, ".mkv");
        // Unset keys keep their defaults
        assert_eq!(file.acquirer.binary, "yt-dlp");
        assert_eq!(file.ingestor.chunk_size, 500);
        assert_eq!(file.transcriber.tier, "budget");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let yaml = r#"
version: "1"
transcriber:
  engine: whisper
"#;
        assert!(serde_yaml::from_str::<ConfigFile>(yaml).is_err());

        let yaml = r#"
version: "1"
retries: 4
"#;
        assert!(serde_yaml::from_str::<ConfigFile>(yaml).is_err());
    }

    #[test]
    fn test_transcriber_backend_from_file_and_env() {
        let yaml = r#"
version: "1"
transcriber:
  backend: deepgram
deepgram:
  ffmpeg: /usr/local/bin/ffmpeg
"#;
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.transcriber.backend, TranscribeBackend::Deepgram);
        assert_eq!(file.deepgram.ffmpeg, "/usr/local/bin/ffmpeg");
        assert_eq!(file.deepgram.endpoint, "https://api.deepgram.com/v1/listen");

        let config_path = PathBuf::from("/p/.graphmem/config.yaml");
        let config = resolve(Some((config_path, file)), PathBuf::from("/unused"), |key| match key {
            "TRANSCRIBE_BACKEND" => Some("Offmute".to_string()),
            "DEEPGRAM_API_KEY" => Some("dg-secret".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.transcriber.backend, TranscribeBackend::Offmute);
        assert_eq!(config.deepgram.api_key.as_deref(), Some("dg-secret"));

        let defaults = resolve(None, PathBuf::from("/unused"), no_env).unwrap();
        assert_eq!(defaults.transcriber.backend, TranscribeBackend::Offmute);
        assert!(defaults.deepgram.api_key.is_none());

        let invalid = resolve(None, PathBuf::from("/unused"), |key| {
            (key == "TRANSCRIBE_BACKEND").then(|| "whisper".to_string())
        });
        assert!(invalid.is_err());
    }

    #[test]
    fn test_paths_relative_to_config_file() {
        let temp = TempDir::new().unwrap();
        let dot_dir = temp.path().join(".graphmem");
        std::fs::create_dir_all(&dot_dir).unwrap();
        let config_path = dot_dir.join("config.yaml");

        let file: ConfigFile = serde_yaml::from_str(
            "version: \"1\"\npaths:\n  database: state.db\n  downloads: /abs/downloads\n",
        )
        .unwrap();
        let config = resolve(
            Some((config_path.clone(), file)),
            PathBuf::from("/fallback"),
            no_env,
        )
        .unwrap();

        // No paths.home: default home, database relative to it
        assert_eq!(config.home, PathBuf::from("/fallback"));
        assert_eq!(config.database, PathBuf::from("/fallback/state.db"));
        assert_eq!(config.downloads, PathBuf::from("/abs/downloads"));
        assert_eq!(config.config_file, Some(config_path));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GRAPHMEM_HOME", "/srv/graphmem"),
            ("MAX_RETRIES", "2"),
            ("GRAPHITI_URL", "http://graphiti:9000"),
        ]
        .into_iter()
        .collect();

        let config = resolve(None, PathBuf::from("/unused"), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/graphmem"));
        assert_eq!(config.database, PathBuf::from("/srv/graphmem/graph_memory.db"));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.ingestor.endpoint, "http://graphiti:9000");
    }

    #[test]
    fn test_invalid_max_retries_env() {
        let result = resolve(None, PathBuf::from("/unused"), |key| {
            (key == "MAX_RETRIES").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
