use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::endpoint::title_to_key;
use crate::provider::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Html,
    Markdown,
    Text,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("html") {
            return Ok(Self::Html);
        }
        if value.eq_ignore_ascii_case("markdown") || value.eq_ignore_ascii_case("md") {
            return Ok(Self::Markdown);
        }
        if value.eq_ignore_ascii_case("text") || value.eq_ignore_ascii_case("txt") {
            return Ok(Self::Text);
        }
        bail!("unsupported export format: {value} (expected html|markdown|text)")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Markdown => "markdown",
            Self::Text => "text",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Markdown => "md",
            Self::Text => "txt",
        }
    }

    /// HTML exports need the rendered page; the others work from wikitext.
    pub fn needs_html(self) -> bool {
        matches!(self, Self::Html)
    }
}

#[derive(Debug, Clone)]
pub struct ExportReport {
    pub path: PathBuf,
    pub bytes_written: usize,
}

/// Render an export document. `html` must be present for [`ExportFormat::Html`].
pub fn render_export(
    page: &Page,
    html: Option<&str>,
    format: ExportFormat,
    article_base: &str,
) -> Result<String> {
    match format {
        ExportFormat::Html => html
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("html export of {} requires the page HTML", page.title)),
        ExportFormat::Markdown => Ok(format!(
            "{}{}\n",
            frontmatter(page, article_base),
            wikitext_to_markdown(&page.source, article_base)
        )),
        ExportFormat::Text => Ok(page.source.clone()),
    }
}

pub fn write_export(path: &Path, content: &str) -> Result<ExportReport> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    info!("Exported {} bytes to {}", content.len(), path.display());
    Ok(ExportReport {
        path: path.to_path_buf(),
        bytes_written: content.len(),
    })
}

pub fn default_export_path(exports_dir: &Path, title: &str, format: ExportFormat) -> PathBuf {
    exports_dir.join(format!(
        "{}.{}",
        sanitize_filename(title),
        format.file_extension()
    ))
}

/// Converts section headings and internal links; all other markup passes
/// through untouched. Line count is preserved.
pub fn wikitext_to_markdown(source: &str, article_base: &str) -> String {
    let renderer = MarkdownRenderer { article_base };
    source
        .lines()
        .map(|line| renderer.line(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Title words joined by `-`, with path and shell-hostile characters dropped.
pub fn sanitize_filename(title: &str) -> String {
    let name = title
        .split(|ch: char| ch.is_whitespace() || FILENAME_HOSTILE.contains(&ch))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if name.is_empty() {
        "untitled".to_string()
    } else {
        name
    }
}

/// `https://<site>/wiki/` prefix of the site the random URL points at.
pub fn article_base(random_url: &str) -> &str {
    random_url
        .find("/wiki/")
        .map(|index| &random_url[..index + "/wiki/".len()])
        .unwrap_or("https://en.wikipedia.org/wiki/")
}

const FILENAME_HOSTILE: &[char] = &['<', '>', ':', '"', '|', '?', '*', '/', '\\'];

fn frontmatter(page: &Page, article_base: &str) -> String {
    let mut lines = vec![
        "---".to_string(),
        format!("title: \"{}\"", page.title.replace('"', "\\\"")),
        format!("source: {article_base}{}", page.key),
    ];
    match &page.latest {
        Some(revision) => {
            lines.push(format!("revision: {}", revision.id));
            lines.push(format!("revised: {}", revision.timestamp));
        }
        None => lines.push("revised: unknown".to_string()),
    }
    if let Some(license) = &page.license {
        lines.push(format!("license: {}", license.title));
    }
    lines.push("---".to_string());
    lines.push(String::new());
    lines.join("\n")
}

struct MarkdownRenderer<'a> {
    article_base: &'a str,
}

impl MarkdownRenderer<'_> {
    fn line(&self, line: &str) -> String {
        match heading(line) {
            Some((level, text)) => format!("{} {}", "#".repeat(level), self.inline(text)),
            None => self.inline(line),
        }
    }

    fn inline(&self, text: &str) -> String {
        let mut output = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find("[[") {
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("]]") else {
                break;
            };
            output.push_str(&rest[..open]);
            let inner = &after_open[..close];
            match self.link(inner) {
                Some(link) => output.push_str(&link),
                None => {
                    output.push_str("[[");
                    output.push_str(inner);
                    output.push_str("]]");
                }
            }
            rest = &after_open[close + 2..];
        }
        output.push_str(rest);
        output
    }

    fn link(&self, inner: &str) -> Option<String> {
        let (target, label) = match inner.split_once('|') {
            Some((target, label)) => (target.trim(), label.trim()),
            None => (inner.trim(), inner.trim()),
        };
        if target.is_empty() || label.is_empty() {
            return None;
        }
        Some(format!(
            "[{label}]({}{})",
            self.article_base,
            title_to_key(target)
        ))
    }
}

/// `== Text ==` with matching runs of at least two `=` on both sides.
fn heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim();
    let level = trimmed.bytes().take_while(|byte| *byte == b'=').count();
    if level < 2 {
        return None;
    }
    let marker = "=".repeat(level);
    let text = trimmed[level..].strip_suffix(marker.as_str())?.trim();
    if text.is_empty() {
        return None;
    }
    Some((level.min(6), text))
}
