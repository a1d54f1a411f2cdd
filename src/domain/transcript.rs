//! Transcript segments, analysis, and the on-disk transcript document.
//!
//! The document is Markdown: an `# Audio Analysis` section followed by a
//! `# Full Transcription` section. Documents written by `offmute` carry the
//! transcript as free text; documents written by this crate add one
//! `[start - end] text` line per segment and bullet lists for the
//! structured analysis fields.

use serde::{Deserialize, Serialize};

const ANALYSIS_HEADER: &str = "Audio Analysis";
const TRANSCRIPT_HEADER: &str = "Full Transcription";
const TOPICS_HEADER: &str = "Topics";
const KEY_TERMS_HEADER: &str = "Key Terms";
const CHAPTERS_HEADER: &str = "Chapters";

/// A timed slice of transcript text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start_sec: f64, end_sec: f64, text: impl Into<String>) -> Self {
        Self {
            start_sec,
            end_sec,
            text: text.into(),
        }
    }
}

/// Analysis produced alongside a transcript
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub key_terms: Vec<String>,
    #[serde(default)]
    pub chapters: Vec<String>,
}

/// Everything a transcription produces for one item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptOutput {
    pub segments: Vec<Segment>,
    pub analysis: Analysis,
}

impl TranscriptOutput {
    /// Full transcript text, one segment per line
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render as a transcript document.
    ///
    /// Lines the parser would read as structure are escaped with a leading
    /// backslash, so `parse(render(x)) == x`.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(&format!("# {}\n\n", ANALYSIS_HEADER));
        let summary = self.analysis.summary.trim();
        if !summary.is_empty() {
            for line in summary.lines() {
                out.push_str(&escape_line(line));
                out.push('\n');
            }
            out.push('\n');
        }

        for (header, items) in [
            (TOPICS_HEADER, &self.analysis.topics),
            (KEY_TERMS_HEADER, &self.analysis.key_terms),
            (CHAPTERS_HEADER, &self.analysis.chapters),
        ] {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("## {}\n\n", header));
            for item in items {
                let mut lines = item.lines();
                out.push_str(&format!("- {}\n", escape_line(lines.next().unwrap_or_default())));
                // Further lines are indented under the bullet
                for line in lines {
                    out.push_str(&format!("  {}\n", escape_line(line)));
                }
            }
            out.push('\n');
        }

        out.push_str(&format!("# {}\n\n", TRANSCRIPT_HEADER));
        for segment in &self.segments {
            let mut lines = segment.text.lines();
            out.push_str(&format!(
                "[{} - {}] {}\n",
                segment.start_sec,
                segment.end_sec,
                lines.next().unwrap_or_default()
            ));
            for line in lines {
                if line.is_empty() {
                    out.push_str("\\\n");
                } else {
                    out.push_str(&escape_line(line));
                    out.push('\n');
                }
            }
        }

        out
    }

    /// Parse a transcript document.
    ///
    /// Accepts both Markdown headers and the plain `Audio Analysis:` /
    /// `TRANSCRIPT` forms. A document without any recognised section is
    /// treated as one untimed transcript.
    pub fn parse(content: &str) -> Self {
        let mut section = Section::None;
        let mut found_section = false;

        let mut summary: Vec<&str> = Vec::new();
        let mut analysis = Analysis::default();
        let mut segments: Vec<Segment> = Vec::new();
        let mut untimed: Vec<&str> = Vec::new();

        for line in content.lines() {
            if let Some(header) = top_level_header(line) {
                section = header;
                found_section = true;
                continue;
            }

            if section == Section::Transcript {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_timed_line(trimmed) {
                    Some(segment) => segments.push(segment),
                    // Continuation of the previous timed line
                    None if !segments.is_empty() => {
                        if let Some(last) = segments.last_mut() {
                            last.text.push('\n');
                            last.text.push_str(unescape_line(line).unwrap_or(trimmed));
                        }
                    }
                    None => untimed.push(unescape_line(line).unwrap_or(trimmed)),
                }
                continue;
            }

            if let Section::Analysis(sub) = section {
                if let Some(next) = analysis_subheader(line) {
                    section = Section::Analysis(next);
                    continue;
                }
                match sub {
                    AnalysisPart::Summary => summary.push(unescape_line(line).unwrap_or(line)),
                    AnalysisPart::Topics => push_bullet(&mut analysis.topics, line),
                    AnalysisPart::KeyTerms => push_bullet(&mut analysis.key_terms, line),
                    AnalysisPart::Chapters => push_bullet(&mut analysis.chapters, line),
                }
            }
        }

        analysis.summary = summary.join("\n").trim().to_string();

        if !found_section {
            let text = content.trim();
            if !text.is_empty() {
                segments.push(Segment::new(0.0, 0.0, text));
            }
        } else if segments.is_empty() && !untimed.is_empty() {
            segments.push(Segment::new(0.0, 0.0, untimed.join("\n")));
        }

        Self { segments, analysis }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Analysis(AnalysisPart),
    Transcript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnalysisPart {
    Summary,
    Topics,
    KeyTerms,
    Chapters,
}

fn normalize_header(line: &str) -> String {
    line.trim()
        .trim_start_matches('#')
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_lowercase()
}

fn top_level_header(line: &str) -> Option<Section> {
    let trimmed = line.trim();
    if trimmed.starts_with("##") {
        return None;
    }
    let is_markdown = trimmed.starts_with("# ");
    let is_plain = !trimmed.starts_with('#') && (trimmed.ends_with(':') || trimmed == "TRANSCRIPT");
    if !is_markdown && !is_plain {
        return None;
    }

    match normalize_header(trimmed).as_str() {
        "audio analysis" => Some(Section::Analysis(AnalysisPart::Summary)),
        "full transcription" | "transcript" => Some(Section::Transcript),
        // Unknown markdown sections end the current one
        _ if is_markdown => Some(Section::None),
        _ => None,
    }
}

fn analysis_subheader(line: &str) -> Option<AnalysisPart> {
    let trimmed = line.trim();
    if !trimmed.starts_with("## ") {
        return None;
    }
    match normalize_header(trimmed).as_str() {
        "topics" => Some(AnalysisPart::Topics),
        "key terms" => Some(AnalysisPart::KeyTerms),
        "chapters" => Some(AnalysisPart::Chapters),
        _ => None,
    }
}

fn push_bullet(list: &mut Vec<String>, line: &str) {
    // Indented lines continue the previous bullet
    if let (Some(rest), Some(last)) = (line.strip_prefix("  "), list.last_mut()) {
        last.push('\n');
        last.push_str(unescape_line(rest).unwrap_or(rest.trim()));
        return;
    }

    let trimmed = line.trim();
    if let Some(item) = trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
    {
        let item = item.trim();
        let item = unescape_line(item).unwrap_or(item);
        if !item.is_empty() {
            list.push(item.to_string());
        }
    }
}

/// Escape a line the parser would otherwise read as structure
fn escape_line(line: &str) -> String {
    let structural = line.starts_with(char::is_whitespace)
        || line.starts_with(['\\', '#', '[', '-', '*'])
        || top_level_header(line).is_some();
    if structural {
        format!("\\{}", line)
    } else {
        line.to_string()
    }
}

fn unescape_line(line: &str) -> Option<&str> {
    line.strip_prefix('\\')
}

/// Parse `[start - end] text`
fn parse_timed_line(line: &str) -> Option<Segment> {
    let rest = line.strip_prefix('[')?;
    let (range, text) = rest.split_once(']')?;
    let (start, end) = range.split_once(" - ")?;
    let start_sec: f64 = start.trim().parse().ok()?;
    let end_sec: f64 = end.trim().parse().ok()?;
    Some(Segment::new(start_sec, end_sec, text.trim()))
}
