//! Output formatting for `sift search`.
//!
//! Human output prints keyword and semantic sections separately, in the order
//! they arrive. JSON output is a single object for scripting.

use serde::Serialize;

use crate::search::lexical::{Chunk, ScoredChunk};
use crate::worker::RequestId;

/// Maximum characters of chunk content shown per hit.
const SNIPPET_MAX_CHARS: usize = 200;

#[derive(Serialize)]
pub struct JsonOutput<'a> {
    pub query: &'a str,
    pub request_id: RequestId,
    pub lexical: &'a [Chunk],
    /// `None` when semantic search was skipped.
    pub semantic: Option<&'a [ScoredChunk]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_error: Option<&'a str>,
}

pub fn format_json(output: &JsonOutput<'_>) -> String {
    serde_json::to_string_pretty(output).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_lexical_human(query: &str, chunks: &[Chunk]) -> String {
    if chunks.is_empty() {
        return format!("No keyword matches for \"{query}\"");
    }
    let mut out = format!(
        "Keyword matches for \"{query}\" ({}):\n\n",
        plural(chunks.len(), "result")
    );
    for (i, chunk) in chunks.iter().enumerate() {
        push_hit(&mut out, i, chunk, None);
    }
    out.trim_end().to_string()
}

pub fn format_semantic_human(query: &str, hits: &[ScoredChunk]) -> String {
    if hits.is_empty() {
        return format!("No semantic matches for \"{query}\"");
    }
    let mut out = format!(
        "Semantic matches for \"{query}\" ({}):\n\n",
        plural(hits.len(), "result")
    );
    for (i, hit) in hits.iter().enumerate() {
        push_hit(&mut out, i, &hit.chunk, Some(hit.score));
    }
    out.trim_end().to_string()
}

fn push_hit(out: &mut String, i: usize, chunk: &Chunk, score: Option<f32>) {
    match score {
        Some(score) => out.push_str(&format!("{}. {} (score: {score:.3})\n", i + 1, chunk.title)),
        None => out.push_str(&format!("{}. {}\n", i + 1, chunk.title)),
    }
    out.push_str(&format!("   {}\n", chunk.url));
    let snippet = truncate_text(&chunk.content, SNIPPET_MAX_CHARS).replace('\n', " ");
    out.push_str(&format!("   {snippet}\n\n"));
}

fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// Cut `text` to at most `max_chars` characters, preferring a word boundary.
fn truncate_text(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => {
            let truncated = &text[..cut];
            match truncated.rfind(' ') {
                Some(space) => format!("{}...", &truncated[..space]),
                None => format!("{truncated}..."),
            }
        }
    }
}
