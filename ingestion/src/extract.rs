use std::path::Path;

use llc_core::ingest::SourceModality;
use llc_core::model::Modality;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Markdown,
    Json,
    Pdf,
    Html,
    Image,
    Unsupported,
}

pub fn detect_content_kind(mime_type: &str, filename: Option<&str>) -> ContentKind {
    let mime = mime_type.split(';').next().unwrap_or("").trim().to_lowercase();
    match mime.as_str() {
        "text/plain" => ContentKind::Text,
        "text/markdown" => ContentKind::Markdown,
        "application/json" => ContentKind::Json,
        "application/pdf" => ContentKind::Pdf,
        "text/html" => ContentKind::Html,
        m if m.starts_with("image/") => ContentKind::Image,
        _ => {
            if let Some(name) = filename {
                let ext = Path::new(name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_lowercase();
                match ext.as_str() {
                    "txt" => ContentKind::Text,
                    "md" | "markdown" => ContentKind::Markdown,
                    "json" => ContentKind::Json,
                    "pdf" => ContentKind::Pdf,
                    "html" | "htm" => ContentKind::Html,
                    "png" | "jpg" | "jpeg" | "gif" | "webp" => ContentKind::Image,
                    _ => ContentKind::Unsupported,
                }
            } else {
                ContentKind::Unsupported
            }
        }
    }
}

/// Resolves `Source.modality`: an explicit `SourceModality` wins; `Auto`
/// falls back to mime/filename sniffing (§4.4).
pub fn resolve_modality(declared: SourceModality, mime_type: &str, filename: Option<&str>) -> Option<Modality> {
    if let Some(modality) = declared.resolved() {
        return Some(modality);
    }
    match detect_content_kind(mime_type, filename) {
        ContentKind::Text | ContentKind::Markdown | ContentKind::Json | ContentKind::Html => Some(Modality::Text),
        ContentKind::Pdf => Some(Modality::Pdf),
        ContentKind::Image => Some(Modality::Image),
        ContentKind::Unsupported => None,
    }
}

pub fn extract_utf8(bytes: &[u8]) -> Result<String, std::string::FromUtf8Error> {
    String::from_utf8(bytes.to_vec())
}

/// Whole-document PDF text extraction. `pdf-extract` inserts a form-feed
/// between pages, which [`extract_pdf_pages`] relies on to recover page
/// boundaries.
pub fn extract_pdf_text(bytes: &[u8]) -> Option<String> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => {
            if text.trim().is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Err(_) => None,
    }
}

/// Splits whole-document PDF text into per-page text (§4.4 "pdf: extract
/// per-page text"). Falls back to treating the document as a single page
/// when no form-feed separators are present.
pub fn extract_pdf_pages(bytes: &[u8]) -> Option<Vec<String>> {
    let text = extract_pdf_text(bytes)?;
    let pages: Vec<String> = text
        .split('\u{c}')
        .map(|page| page.trim().to_string())
        .filter(|page| !page.is_empty())
        .collect();
    if pages.is_empty() {
        None
    } else {
        Some(pages)
    }
}

/// Minimal main-content heuristic for single-page web sources (§4.4): strips
/// `<script>`/`<style>`/`<nav>`/`<header>`/`<footer>` blocks and tags,
/// collapsing the remainder to whitespace-joined text.
pub fn extract_web_main_content(html: &str) -> String {
    let stripped = strip_tag_blocks(html, &["script", "style", "nav", "header", "footer", "aside"]);
    let text = strip_tags(&stripped);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_tag_blocks(html: &str, tags: &[&str]) -> String {
    let mut out = html.to_string();
    for tag in tags {
        let open = format!("<{tag}");
        let close = format!("</{tag}>");
        loop {
            let lower = out.to_lowercase();
            let Some(start) = lower.find(&open) else { break };
            let Some(close_rel) = lower[start..].find(&close) else { break };
            let end = start + close_rel + close.len();
            out.replace_range(start..end, "");
        }
    }
    out
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_content_kind_falls_back_to_extension() {
        assert_eq!(detect_content_kind("application/octet-stream", Some("notes.md")), ContentKind::Markdown);
    }

    #[test]
    fn resolve_modality_prefers_explicit_source_modality() {
        let modality = resolve_modality(SourceModality::Pdf, "text/plain", Some("a.txt"));
        assert_eq!(modality, Some(Modality::Pdf));
    }

    #[test]
    fn resolve_modality_auto_sniffs_from_mime() {
        let modality = resolve_modality(SourceModality::Auto, "image/png", None);
        assert_eq!(modality, Some(Modality::Image));
    }

    #[test]
    fn extract_pdf_pages_splits_on_form_feed() {
        let pages = "page one\u{c}page two\u{c}page three";
        let pages: Vec<String> = pages.split('\u{c}').map(|p| p.to_string()).collect();
        assert_eq!(pages.len(), 3);
    }

    #[test]
    fn extract_web_main_content_strips_nav_and_tags() {
        let html = "<html><nav>Home | About</nav><body><p>Hello <b>world</b></p></body></html>";
        let text = extract_web_main_content(html);
        assert_eq!(text, "Hello world");
    }
}
