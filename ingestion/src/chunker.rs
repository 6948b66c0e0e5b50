use std::collections::HashMap;

use async_trait::async_trait;
use llc_core::model::Modality;
use text_splitter::TextSplitter;

const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size, in tokens (§4.4: "~600 tokens").
    pub target_tokens: usize,
    /// Overlap ratio applied to the fixed-size fallback (§4.4: "10-15%").
    pub overlap_ratio: f32,
    /// DPI used when rendering PDF pages to PNG (§4.4, default 150).
    pub pdf_page_dpi: u32,
    /// Max edge, in pixels, for image thumbnails (§4.4, default 2048).
    pub image_thumbnail_max_edge: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 600,
            overlap_ratio: 0.12,
            pdf_page_dpi: 150,
            image_thumbnail_max_edge: 2048,
        }
    }
}

/// A chunk before it is assigned an id and persisted.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub text: Option<String>,
    pub modality: Modality,
    pub meta: HashMap<String, String>,
}

#[async_trait]
pub trait Chunker: Send + Sync {
    async fn chunk_text(&self, content: &str, base_meta: HashMap<String, String>) -> Vec<ChunkDraft>;
}

/// Heading-aware text chunker: splits on markdown ATX headings first, then
/// applies fixed-size chunking with overlap inside each section (falling
/// back to one section covering the whole document when no headings are
/// present).
pub struct SemanticChunker {
    config: ChunkingConfig,
    splitter: TextSplitter<text_splitter::Characters>,
}

impl SemanticChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            splitter: TextSplitter::default().with_trim_chunks(true),
        }
    }
}

impl Default for SemanticChunker {
    fn default() -> Self {
        Self::new(ChunkingConfig::default())
    }
}

#[async_trait]
impl Chunker for SemanticChunker {
    async fn chunk_text(&self, content: &str, base_meta: HashMap<String, String>) -> Vec<ChunkDraft> {
        let target_chars = self.config.target_tokens * CHARS_PER_TOKEN;
        let overlap_chars = ((target_chars as f32) * self.config.overlap_ratio) as usize;

        let mut drafts = Vec::new();
        for section in split_by_headings(content) {
            if section.text.trim().is_empty() {
                continue;
            }
            let pieces = chunk_with_overlap(&self.splitter, &section.text, target_chars, overlap_chars);
            for (i, piece) in pieces.into_iter().enumerate() {
                let mut meta = base_meta.clone();
                if let Some(heading) = &section.heading {
                    meta.insert("heading".to_string(), heading.clone());
                }
                meta.insert("chunk_index".to_string(), i.to_string());
                drafts.push(ChunkDraft {
                    text: Some(piece),
                    modality: Modality::Text,
                    meta,
                });
            }
        }
        drafts
    }
}

impl SemanticChunker {
    /// A page's text already establishes its own boundary; this chunks a
    /// single PDF page the same way as a text section (§4.4 "pdf: ... text
    /// is chunked as above").
    pub async fn chunk_pdf_page(&self, page_index: u32, page_text: &str, base_meta: HashMap<String, String>) -> Vec<ChunkDraft> {
        let mut meta = base_meta;
        meta.insert("page".to_string(), page_index.to_string());
        self.chunk_text(page_text, meta).await
    }

    /// A page image chunk, always emitted alongside the page's text chunks
    /// when image modality is allowed (§4.4 step "pdf").
    pub fn page_image_draft(&self, page_index: u32, base_meta: HashMap<String, String>) -> ChunkDraft {
        let mut meta = base_meta;
        meta.insert("page".to_string(), page_index.to_string());
        meta.insert("pdf_page_dpi".to_string(), self.config.pdf_page_dpi.to_string());
        ChunkDraft {
            text: None,
            modality: Modality::Image,
            meta,
        }
    }

    /// The single image chunk emitted for an image source, plus an optional
    /// caption fed as a sibling text chunk (§4.4 "image").
    pub fn image_draft(&self, base_meta: HashMap<String, String>) -> ChunkDraft {
        let mut meta = base_meta;
        meta.insert("thumbnail_max_edge".to_string(), self.config.image_thumbnail_max_edge.to_string());
        ChunkDraft {
            text: None,
            modality: Modality::Image,
            meta,
        }
    }

    pub async fn caption_draft(&self, caption: &str, base_meta: HashMap<String, String>) -> ChunkDraft {
        ChunkDraft {
            text: Some(caption.to_string()),
            modality: Modality::Text,
            meta: base_meta,
        }
    }
}

struct Section {
    heading: Option<String>,
    text: String,
}

fn split_by_headings(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current_heading: Option<String> = None;
    let mut current_text = String::new();
    let mut saw_heading = false;

    for line in content.lines() {
        if let Some(heading) = parse_atx_heading(line) {
            if !current_text.trim().is_empty() || current_heading.is_some() {
                sections.push(Section {
                    heading: current_heading.take(),
                    text: std::mem::take(&mut current_text),
                });
            }
            current_heading = Some(heading);
            saw_heading = true;
        } else {
            current_text.push_str(line);
            current_text.push('\n');
        }
    }
    sections.push(Section {
        heading: current_heading,
        text: current_text,
    });

    if !saw_heading {
        return vec![Section {
            heading: None,
            text: content.to_string(),
        }];
    }
    sections
}

fn parse_atx_heading(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some(rest.trim().to_string())
}

fn chunk_with_overlap(
    splitter: &TextSplitter<text_splitter::Characters>,
    text: &str,
    target_chars: usize,
    overlap_chars: usize,
) -> Vec<String> {
    let base_chunks: Vec<&str> = splitter.chunks(text, target_chars.max(1)).collect();
    let mut out = Vec::with_capacity(base_chunks.len());
    let mut previous_tail = String::new();

    for chunk in base_chunks {
        let mut piece = String::new();
        if !previous_tail.is_empty() {
            piece.push_str(&previous_tail);
        }
        piece.push_str(chunk);
        previous_tail = tail_chars(chunk, overlap_chars);
        out.push(piece);
    }
    out
}

fn tail_chars(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= n {
        return text.to_string();
    }
    chars[chars.len() - n..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunk_text_splits_by_heading_sections() {
        let chunker = SemanticChunker::default();
        let content = "# Intro\nHello there.\n# Body\nMore content follows here.";
        let drafts = chunker.chunk_text(content, HashMap::new()).await;
        let headings: Vec<_> = drafts.iter().filter_map(|d| d.meta.get("heading").cloned()).collect();
        assert!(headings.contains(&"Intro".to_string()));
        assert!(headings.contains(&"Body".to_string()));
    }

    #[tokio::test]
    async fn chunk_text_falls_back_to_fixed_overlap_without_headings() {
        let config = ChunkingConfig {
            target_tokens: 5,
            overlap_ratio: 0.2,
            ..ChunkingConfig::default()
        };
        let chunker = SemanticChunker::new(config);
        let content = "word ".repeat(50);
        let drafts = chunker.chunk_text(&content, HashMap::new()).await;
        assert!(drafts.len() > 1);
        assert!(drafts.iter().all(|d| d.meta.get("heading").is_none()));
    }

    #[test]
    fn parse_atx_heading_requires_space_after_hashes() {
        assert_eq!(parse_atx_heading("## Title"), Some("Title".to_string()));
        assert_eq!(parse_atx_heading("##NoSpace"), None);
        assert_eq!(parse_atx_heading("plain text"), None);
    }
}
