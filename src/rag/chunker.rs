//! Page chunker.
//!
//! Splits one page of OCR markdown into the snippets that get embedded.
//! Pages without images are cut into a fixed number of overlapping windows;
//! pages with images are cut between image tags so that every tag stays whole
//! and travels with the text that precedes it.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::config::settings::RagSettings;
use crate::core::config::defaults::{DEFAULT_OVERLAP, DEFAULT_SPLIT_COUNT};
use crate::store::Page;

static IMAGE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]+\)").unwrap());

/// Link from a chunk to the rendered image of its page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageImageLink {
    Resolved { url: String },
    /// The page label carried no usable page number.
    Unresolved { label: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Page reference, e.g. `Page 4`.
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_image: Option<PageImageLink>,
}

impl Chunk {
    /// Text sent to the embedding provider.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.title, self.snippet)
    }
}

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target number of segments per page.
    pub split_count: usize,
    /// Characters shared between neighbouring segments of image-free pages.
    pub overlap: usize,
    /// Base URL of rendered page images (`<base>/page_<n>.jpg`).
    pub page_image_base: Option<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            split_count: DEFAULT_SPLIT_COUNT,
            overlap: DEFAULT_OVERLAP,
            page_image_base: None,
        }
    }
}

impl From<&RagSettings> for ChunkerConfig {
    fn from(settings: &RagSettings) -> Self {
        Self {
            split_count: settings.split_count,
            overlap: settings.overlap,
            page_image_base: settings.page_image_base.clone(),
        }
    }
}

/// One page of markdown plus the label it was published under.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub label: String,
    pub markdown: String,
}

impl PageText {
    pub fn page_number(&self) -> Option<u32> {
        parse_page_number(&self.label)
    }
}

impl From<&Page> for PageText {
    fn from(page: &Page) -> Self {
        PageText {
            label: format!("Page {}", page.page_number),
            markdown: page.markdown.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits raw page text. Empty segments are dropped and the result is
    /// never padded up to `split_count`.
    pub fn split(&self, content: &str) -> Vec<String> {
        let parts = self.config.split_count.max(1);
        if IMAGE_TAG.is_match(content) {
            split_around_images(content, parts)
        } else {
            split_with_overlap(content, parts, self.config.overlap)
        }
    }

    pub fn chunk_page(&self, page: &PageText) -> Vec<Chunk> {
        let page_number = page.page_number();
        if page_number.is_none() {
            tracing::warn!(
                "Page label '{}' has no numeric page number; page image left unresolved",
                page.label
            );
        }
        let page_image = self.page_image_link(&page.label, page_number);

        self.split(&page.markdown)
            .into_iter()
            .map(|snippet| Chunk {
                title: page.label.clone(),
                snippet,
                page_number,
                page_image: page_image.clone(),
            })
            .collect()
    }

    pub fn chunk_pages<'a, I>(&self, pages: I) -> Vec<Chunk>
    where
        I: IntoIterator<Item = &'a PageText>,
    {
        pages
            .into_iter()
            .flat_map(|page| self.chunk_page(page))
            .collect()
    }

    fn page_image_link(&self, label: &str, page_number: Option<u32>) -> Option<PageImageLink> {
        let base = self.config.page_image_base.as_deref()?;
        Some(match page_number {
            Some(number) => PageImageLink::Resolved {
                url: format!("{}/page_{}.jpg", base.trim_end_matches('/'), number),
            },
            None => PageImageLink::Unresolved {
                label: label.to_string(),
            },
        })
    }
}

/// Trailing token of a label such as `Page 12`.
pub fn parse_page_number(label: &str) -> Option<u32> {
    label.split_whitespace().last()?.parse().ok()
}

/// Splits a markdown export whose pages start with `# Page <n>` headers.
/// Text before the first header is ignored.
pub fn split_paged_markdown(text: &str) -> Vec<PageText> {
    let mut pages = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if line.starts_with("# Page") {
            if let Some((label, lines)) = current.take() {
                push_page(&mut pages, label, &lines);
            }
            let label = line.trim_start_matches('#').trim().to_string();
            current = Some((label, Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line.trim());
        }
    }
    if let Some((label, lines)) = current {
        push_page(&mut pages, label, &lines);
    }
    pages
}

fn push_page(pages: &mut Vec<PageText>, label: String, lines: &[&str]) {
    let markdown = lines.join("\n");
    if markdown.trim().is_empty() {
        return;
    }
    pages.push(PageText { label, markdown });
}

fn split_with_overlap(content: &str, parts: usize, overlap: usize) -> Vec<String> {
    let cleaned: Vec<char> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .chars()
        .collect();
    let len = cleaned.len();
    let part_len = len / parts;

    if part_len == 0 || part_len <= overlap {
        let whole: String = cleaned.iter().collect();
        let whole = whole.trim();
        return if whole.is_empty() {
            Vec::new()
        } else {
            vec![whole.to_string()]
        };
    }

    (0..parts)
        .filter_map(|i| {
            let mut start = (i * part_len).saturating_sub(overlap);
            // last window absorbs the division remainder
            let mut end = if i + 1 == parts {
                len
            } else {
                ((i + 1) * part_len + overlap).min(len)
            };
            // widen past whitespace runs so trimming keeps the shared region
            while start > 0 && cleaned[start].is_whitespace() {
                start -= 1;
            }
            while end < len && cleaned[end - 1].is_whitespace() {
                end += 1;
            }
            let piece: String = cleaned[start..end].iter().collect();
            let piece = piece.trim();
            (!piece.is_empty()).then(|| piece.to_string())
        })
        .collect()
}

enum Segment<'a> {
    Text(&'a str),
    Image(&'a str),
}

fn split_around_images(content: &str, parts: usize) -> Vec<String> {
    let mut segments = Vec::new();
    let mut last_end = 0;
    for tag in IMAGE_TAG.find_iter(content) {
        let text = content[last_end..tag.start()].trim();
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        segments.push(Segment::Image(tag.as_str()));
        last_end = tag.end();
    }
    let tail = content[last_end..].trim();
    if !tail.is_empty() {
        segments.push(Segment::Text(tail));
    }

    let total_text: usize = segments
        .iter()
        .map(|segment| match segment {
            Segment::Text(text) => text.chars().count(),
            Segment::Image(_) => 0,
        })
        .sum();
    let target = (total_text / parts).max(1);

    let mut chunks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for segment in segments {
        match segment {
            Segment::Image(tag) => current.push(tag),
            Segment::Text(text) => {
                let mut rest = text;
                while chunks.len() + 1 < parts && current_len + rest.chars().count() > target {
                    let budget = target.saturating_sub(current_len);
                    let split_at = match break_point(rest, budget) {
                        Some(idx) => idx,
                        // close the open chunk rather than cut a word,
                        // unless it holds only images
                        None if current_len > 0 => 0,
                        None => hard_cut(rest, budget),
                    };
                    let (head, tail) = rest.split_at(split_at);
                    let head = head.trim_end();
                    if !head.is_empty() {
                        current.push(head);
                    }
                    flush(&mut chunks, &mut current);
                    current_len = 0;
                    rest = tail.trim_start();
                    if rest.is_empty() {
                        break;
                    }
                }
                if !rest.is_empty() {
                    current_len += rest.chars().count();
                    current.push(rest);
                }
            }
        }
    }
    flush(&mut chunks, &mut current);
    chunks
}

/// Byte offset of the last newline, else the last space, within the first
/// `budget` characters of `text`.
fn break_point(text: &str, budget: usize) -> Option<usize> {
    let window = &text[..hard_cut(text, budget)];
    window
        .rfind('\n')
        .filter(|&idx| idx > 0)
        .or_else(|| window.rfind(' ').filter(|&idx| idx > 0))
}

fn hard_cut(text: &str, budget: usize) -> usize {
    text.char_indices()
        .nth(budget)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

fn flush(chunks: &mut Vec<String>, current: &mut Vec<&str>) {
    let joined = current.join("\n");
    current.clear();
    let joined = joined.trim();
    if !joined.is_empty() {
        chunks.push(joined.to_string());
    }
}
