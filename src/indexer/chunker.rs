//! Markdown chunking.
//!
//! A document is split at every H2/H3 header. Each section becomes one chunk
//! titled by its header (or by the document title for the preamble). Sections
//! shorter than [`MIN_CHUNK_CHARS`] are dropped; sections longer than
//! [`MAX_SECTION_CHARS`] are regrouped by paragraph so no group grows past
//! [`PARAGRAPH_BUDGET_CHARS`] once it already holds text.
//!
//! Lengths are counted in characters, not bytes.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

pub const MIN_CHUNK_CHARS: usize = 30;
pub const MAX_SECTION_CHARS: usize = 1000;
pub const PARAGRAPH_BUDGET_CHARS: usize = 800;

static H1: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\s+(.+)$").expect("h1 regex"));
static SECTION_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{2,3}\s").expect("section regex"));
static SECTION_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#{2,3}\s+(.+)$").expect("section header regex"));
static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\n+").expect("paragraph regex"));

/// A chunk before it has been assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub url: String,
    pub title: String,
    pub content: String,
}

/// Chunk one markdown document.
///
/// `fallback_title` is used when the document does not open with an H1.
pub fn chunk_markdown(text: &str, url: &str, fallback_title: &str) -> Vec<RawChunk> {
    let doc_title = text
        .lines()
        .next()
        .and_then(|line| H1.captures(line))
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_else(|| fallback_title.to_string());

    let mut chunks = Vec::new();
    for section in split_sections(text) {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }

        let (first_line, rest) = section.split_once('\n').unwrap_or((section, ""));
        let (title, body) = match SECTION_HEADER.captures(first_line) {
            Some(caps) => (caps[1].trim().to_string(), rest.trim()),
            None => (doc_title.clone(), section),
        };
        let body = strip_leading_h1(body);

        if char_len(body) < MIN_CHUNK_CHARS {
            continue;
        }

        if char_len(body) > MAX_SECTION_CHARS {
            for group in paragraph_groups(body) {
                chunks.push(RawChunk {
                    url: url.to_string(),
                    title: title.clone(),
                    content: group,
                });
            }
        } else {
            chunks.push(RawChunk {
                url: url.to_string(),
                title,
                content: body.to_string(),
            });
        }
    }
    chunks
}

/// Split before every H2/H3 header line. The preamble (possibly empty) is
/// the first section.
fn split_sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if offset > 0 && SECTION_START.is_match(line) {
            sections.push(&text[start..offset]);
            start = offset;
        }
        offset += line.len();
    }
    sections.push(&text[start..]);
    sections
}

fn strip_leading_h1(body: &str) -> &str {
    let (first_line, rest) = body.split_once('\n').unwrap_or((body, ""));
    if H1.is_match(first_line) {
        rest.trim()
    } else {
        body
    }
}

fn paragraph_groups(body: &str) -> Vec<String> {
    let mut groups = Vec::new();
    let mut buf = String::new();

    for para in PARAGRAPH_BREAK.split(body) {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if !buf.is_empty() && char_len(&buf) + char_len(para) > PARAGRAPH_BUDGET_CHARS {
            if char_len(&buf) >= MIN_CHUNK_CHARS {
                groups.push(std::mem::take(&mut buf));
            }
            buf = para.to_string();
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(para);
        }
    }
    if char_len(&buf) >= MIN_CHUNK_CHARS {
        groups.push(buf);
    }
    groups
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// URL for a document: its path under `base`, `/`-separated, minus `.md`.
pub fn document_url(path: &Path, base: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    let url = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    match url.strip_suffix(".md") {
        Some(stripped) => stripped.to_string(),
        None => url,
    }
}

/// Read and chunk one markdown file.
pub fn chunk_file(path: &Path, base: &Path) -> Result<Vec<RawChunk>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let fallback_title = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(chunk_markdown(&text, &document_url(path, base), &fallback_title))
}

/// Chunk every `.md` file under `dir`, visiting files in name order.
pub fn chunk_directory(dir: &Path) -> Result<Vec<RawChunk>> {
    let mut chunks = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "md") {
            chunks.extend(chunk_file(path, dir)?);
        }
    }
    Ok(chunks)
}
