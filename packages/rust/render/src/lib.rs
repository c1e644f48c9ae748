//! Digest rendering and output files.
//!
//! Markdown digests go to one file per day (`<base>/<YYYY-MM-DD>.md`); a
//! second run on the same day appends its section to that file. JSON digests
//! go to one file per run. Every write lands in a temp file first and is
//! renamed into place.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use feeddigest_shared::{Digest, DigestEntry, FeedDigestError, OutputFormat, Result};

/// Writes digests to the configured base directory.
#[derive(Debug, Clone)]
pub struct DigestWriter {
    base: PathBuf,
    format: OutputFormat,
}

impl DigestWriter {
    pub fn new(base: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            base: base.into(),
            format,
        }
    }

    /// Path the digest would be written to.
    pub fn target_path(&self, digest: &Digest) -> PathBuf {
        match self.format {
            OutputFormat::Markdown => self
                .base
                .join(format!("{}.md", digest.date().format("%Y-%m-%d"))),
            OutputFormat::Json => self.base.join(format!(
                "{}.json",
                digest.generated_at().format("%Y-%m-%dT%H%M%S")
            )),
        }
    }

    /// Write `digest`. An empty digest writes nothing and returns `None`.
    #[instrument(skip_all, fields(entries = digest.len(), format = ?self.format))]
    pub fn write(&self, digest: &Digest) -> Result<Option<PathBuf>> {
        if digest.is_empty() {
            info!("digest is empty, nothing written");
            return Ok(None);
        }

        std::fs::create_dir_all(&self.base).map_err(|e| FeedDigestError::io(&self.base, e))?;
        let target = self.target_path(digest);

        let content = match self.format {
            OutputFormat::Markdown => {
                let mut content = match std::fs::read_to_string(&target) {
                    Ok(existing) => existing,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        format!("# Daily digest {}\n", digest.date().format("%Y-%m-%d"))
                    }
                    Err(e) => return Err(FeedDigestError::io(&target, e)),
                };
                if !content.ends_with('\n') {
                    content.push('\n');
                }
                content.push('\n');
                content.push_str(&render_markdown(digest));
                content
            }
            OutputFormat::Json => render_json(digest)?,
        };

        write_atomic(&target, &content)?;
        info!(path = %target.display(), entries = digest.len(), "digest written");
        Ok(Some(target))
    }
}

/// Render one run's digest as a Markdown section.
pub fn render_markdown(digest: &Digest) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "## Run at {}\n",
        digest.generated_at().format("%H:%M UTC")
    );

    for section in digest.sections() {
        let _ = writeln!(out, "### {}\n", section.feed);
        for entry in &section.entries {
            render_entry(&mut out, entry);
        }
    }
    out
}

fn render_entry(out: &mut String, entry: &DigestEntry) {
    let article = &entry.article;
    let title = if article.title.trim().is_empty() {
        "Untitled"
    } else {
        article.title.trim()
    };
    let _ = writeln!(out, "#### {title}\n");
    let _ = writeln!(out, "- **Link**: [{0}]({0})", article.link);
    if let Some(published) = article.published {
        let _ = writeln!(out, "- **Published**: {}", published.format("%Y-%m-%d %H:%M UTC"));
    }
    if !entry.tags.is_empty() {
        let _ = writeln!(out, "- **Tags**: {}", entry.tags.join(", "));
    }
    let marker = if entry.summary.truncated { " …" } else { "" };
    let _ = writeln!(out, "- **Summary**: {}{marker}\n", entry.summary.text);
}

/// Render a digest as pretty-printed JSON.
pub fn render_json(digest: &Digest) -> Result<String> {
    serde_json::to_string_pretty(digest)
        .map_err(|e| FeedDigestError::validation(format!("JSON serialization failed: {e}")))
}

fn write_atomic(target: &Path, content: &str) -> Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "digest".into());
    let temp = target.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| FeedDigestError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| FeedDigestError::io(target, e))?;
    debug!(path = %target.display(), size = content.len(), "wrote output file");
    Ok(())
}
