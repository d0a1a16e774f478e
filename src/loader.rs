//! Document loader: mixed-format files to [`SourceDocument`]s.
//!
//! Dispatches on file extension:
//!
//! | Extension | Format | Extraction |
//! |-----------|--------|------------|
//! | `.txt` | text | as-is |
//! | `.md`, `.markdown` | markdown | heading markers and fence lines removed |
//! | `.json` | structured data | pretty-printed JSON (raw text if it does not parse) |
//! | `.html`, `.htm` | markup | tags stripped, `script`/`style` dropped |
//!
//! Loading is best-effort. Unsupported extensions are skipped and per-file
//! failures are logged and collected in the [`LoadReport`]; neither aborts
//! the batch. Every document is stamped with the file's base name so
//! attribution does not depend on where the file lived.

use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::LoadError;
use crate::models::{DocumentFormat, SourceDocument};

/// Elements whose text content is never part of the document.
const SKIPPED_ELEMENTS: &[&[u8]] = &[b"script", b"style", b"noscript", b"template", b"head"];

/// Elements whose content HTML treats as raw text; removed before tokenizing.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Elements that start a new line in the extracted text.
const BLOCK_ELEMENTS: &[&[u8]] = &[
    b"p", b"div", b"br", b"li", b"ul", b"ol", b"tr", b"table", b"section", b"article",
    b"header", b"footer", b"nav", b"main", b"form", b"fieldset", b"h1", b"h2", b"h3", b"h4",
    b"h5", b"h6", b"label", b"button", b"option", b"select", b"textarea", b"title", b"body",
];

/// A file that could not be loaded.
#[derive(Debug)]
pub struct LoadFailure {
    pub source_name: String,
    pub path: Option<PathBuf>,
    pub error: LoadError,
}

/// Outcome of loading a batch of files.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<SourceDocument>,
    pub failures: Vec<LoadFailure>,
    /// Base names of files skipped for having an unsupported extension.
    pub skipped: Vec<String>,
}

impl LoadReport {
    /// File one load result under documents, skipped, or failures.
    fn record(
        &mut self,
        source_name: String,
        path: Option<PathBuf>,
        result: Result<SourceDocument, LoadError>,
    ) {
        match result {
            Ok(doc) => {
                if self.documents.iter().any(|d| d.source_name == doc.source_name) {
                    tracing::warn!(
                        source = %doc.source_name,
                        "duplicate source name; attribution will not distinguish these files"
                    );
                }
                self.documents.push(doc);
            }
            Err(LoadError::UnsupportedExtension(ext)) => {
                tracing::debug!(source = %source_name, ext = %ext, "skipping unsupported file");
                self.skipped.push(source_name);
            }
            Err(error) => {
                tracing::warn!(source = %source_name, error = %error, "failed to load document");
                self.failures.push(LoadFailure {
                    source_name,
                    path,
                    error,
                });
            }
        }
    }

    /// Append `other`, keeping its documents after this report's.
    pub fn merge(&mut self, other: LoadReport) {
        for doc in other.documents {
            self.record(doc.source_name.clone(), None, Ok(doc));
        }
        self.failures.extend(other.failures);
        self.skipped.extend(other.skipped);
    }
}

/// An in-memory file handed over by a caller instead of a path.
#[derive(Debug, Clone)]
pub struct Upload {
    /// File name; supplies both the extension and the source name.
    pub name: String,
    pub content: Vec<u8>,
}

/// Load every supported file under `paths`.
///
/// Directories are walked recursively; their files are visited in sorted
/// order so repeated builds see documents in the same sequence.
pub fn load_documents(paths: &[PathBuf]) -> LoadReport {
    let mut report = LoadReport::default();
    for path in expand_paths(paths, &mut report) {
        let result = load_file(&path);
        report.record(base_name(&path), Some(path), result);
    }
    report
}

/// Load uploaded buffers in the order given, with the same best-effort
/// policy as [`load_documents`].
pub fn load_buffers(uploads: &[Upload]) -> LoadReport {
    let mut report = LoadReport::default();
    for upload in uploads {
        let result = load_bytes(&upload.name, &upload.content);
        report.record(base_name(Path::new(&upload.name)), None, result);
    }
    report
}

fn expand_paths(paths: &[PathBuf], report: &mut LoadReport) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(path).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => found.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => {
                    let failed_path = e.path().map(Path::to_path_buf);
                    tracing::warn!(root = %path.display(), error = %e, "failed to walk directory");
                    report.failures.push(LoadFailure {
                        source_name: failed_path
                            .as_deref()
                            .map(base_name)
                            .unwrap_or_else(|| base_name(path)),
                        path: failed_path,
                        error: LoadError::Io(e.into()),
                    });
                }
            }
        }
        files.extend(found);
    }
    files
}

/// Load a single file from disk.
pub fn load_file(path: &Path) -> Result<SourceDocument, LoadError> {
    let name = base_name(path);
    // Check the extension before touching the file system.
    format_of(&name)?;
    let bytes = std::fs::read(path)?;
    load_bytes(&name, &bytes)
}

/// Load an in-memory upload. `name` supplies both the extension and the
/// source name (directory components are dropped).
pub fn load_bytes(name: &str, bytes: &[u8]) -> Result<SourceDocument, LoadError> {
    let source_name = base_name(Path::new(name));
    let format = format_of(&source_name)?;
    let text = std::str::from_utf8(bytes).map_err(|_| LoadError::NotUtf8)?;
    let text = text.trim_start_matches('\u{feff}').replace("\r\n", "\n");

    let normalized = match format {
        DocumentFormat::Text => text,
        DocumentFormat::Markdown => normalize_markdown(&text),
        DocumentFormat::StructuredData => normalize_json(&text),
        DocumentFormat::Markup => extract_markup_text(&text)?,
    };

    if normalized.trim().is_empty() {
        return Err(LoadError::Empty);
    }

    Ok(make_document(&source_name, normalized, format))
}

fn format_of(source_name: &str) -> Result<DocumentFormat, LoadError> {
    let ext = Path::new(source_name)
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    DocumentFormat::from_extension(&ext).ok_or(LoadError::UnsupportedExtension(ext))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn make_document(source_name: &str, raw_text: String, format: DocumentFormat) -> SourceDocument {
    let digest = Sha256::digest(raw_text.as_bytes());
    let mut seed = source_name.as_bytes().to_vec();
    seed.extend_from_slice(&digest);
    SourceDocument {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, &seed).to_string(),
        raw_text,
        source_name: source_name.to_string(),
        format,
    }
}

/// Drop markdown-only syntax that carries no meaning for retrieval.
fn normalize_markdown(text: &str) -> String {
    let mut lines = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            continue;
        }
        let heading = trimmed.trim_start_matches('#');
        if heading.len() < trimmed.len() && (heading.is_empty() || heading.starts_with(' ')) {
            lines.push(heading.trim().to_string());
        } else {
            lines.push(line.trim_end().to_string());
        }
    }
    lines.join("\n").trim().to_string()
}

fn normalize_json(text: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string()),
        Err(e) => {
            tracing::debug!(error = %e, "structured data did not parse; keeping raw text");
            text.to_string()
        }
    }
}

/// Strip tags from HTML, keeping visible text with block structure as lines.
fn extract_markup_text(html: &str) -> Result<String, LoadError> {
    let html = prepare_markup(html);
    let mut reader = Reader::from_str(&html);
    {
        let config = reader.config_mut();
        config.trim_text(true);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
    }

    let mut out = String::new();
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if SKIPPED_ELEMENTS.contains(&name.as_slice()) {
                    skip_depth += 1;
                } else if BLOCK_ELEMENTS.contains(&name.as_slice()) {
                    out.push('\n');
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if SKIPPED_ELEMENTS.contains(&name.as_slice()) {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if BLOCK_ELEMENTS.contains(&name.as_slice()) {
                    out.push('\n');
                }
            }
            Ok(Event::Empty(e)) => {
                if BLOCK_ELEMENTS.contains(&e.local_name().as_ref().to_ascii_lowercase().as_slice()) {
                    out.push('\n');
                }
            }
            Ok(Event::Text(e)) if skip_depth == 0 => {
                let text = e
                    .unescape_with(html_entity)
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                push_inline(&mut out, &text);
            }
            Ok(Event::CData(e)) if skip_depth == 0 => {
                push_inline(&mut out, &String::from_utf8_lossy(&e));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::Markup(e.to_string())),
            _ => {}
        }
    }

    Ok(collapse_whitespace(&out))
}

/// Rewrite HTML so the XML tokenizer sees what a browser would render.
///
/// `script` and `style` elements are cut out whole, up to their closing tag
/// (or the end of input when it is missing), so `<` inside them never opens
/// a tag. A `<` that cannot start a tag, comment, or declaration is escaped.
fn prepare_markup(html: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `html`.
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut copied = 0;
    let mut pos = 0;

    while let Some(found) = html[pos..].find('<') {
        let at = pos + found;
        if let Some(name) = raw_text_element_at(&lower[at + 1..]) {
            out.push_str(&html[copied..at]);
            let end = lower[at..]
                .find(&format!("</{}", name))
                .map(|close| at + close)
                .map(|close| lower[close..].find('>').map_or(html.len(), |gt| close + gt + 1))
                .unwrap_or(html.len());
            copied = end;
            pos = end;
            continue;
        }

        let opens_tag = html[at + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));
        if !opens_tag {
            out.push_str(&html[copied..at]);
            out.push_str("&lt;");
            copied = at + 1;
        }
        pos = at + 1;
    }
    out.push_str(&html[copied..]);
    out
}

fn raw_text_element_at(tag: &str) -> Option<&'static str> {
    RAW_TEXT_ELEMENTS.iter().copied().find(|name| {
        tag.starts_with(name)
            && !tag[name.len()..].starts_with(|c: char| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Named entities recognized in HTML text.
fn html_entity(name: &str) -> Option<&'static str> {
    let text = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" | "ensp" | "emsp" | "thinsp" => " ",
        "copy" => "\u{a9}",
        "reg" => "\u{ae}",
        "trade" => "\u{2122}",
        "hellip" => "\u{2026}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "laquo" => "\u{ab}",
        "raquo" => "\u{bb}",
        "bull" => "\u{2022}",
        "middot" => "\u{b7}",
        "times" => "\u{d7}",
        "divide" => "\u{f7}",
        "deg" => "\u{b0}",
        "cent" => "\u{a2}",
        "pound" => "\u{a3}",
        "euro" => "\u{20ac}",
        "yen" => "\u{a5}",
        "sect" => "\u{a7}",
        "para" => "\u{b6}",
        _ => return None,
    };
    Some(text)
}

fn push_inline(out: &mut String, text: &str) {
    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(text);
}

/// Collapse runs of whitespace within lines and drop empty lines.
fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
