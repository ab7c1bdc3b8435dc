//! Text extraction for fetched pages.
//!
//! The fetcher supplies raw bytes plus the response `Content-Type`; this
//! module returns plain UTF-8 text or an [`ExtractError`] that becomes the
//! link's error string.
//!
//! | Content type | Handling |
//! |--------------|----------|
//! | `text/html`, `application/xhtml+xml` | `html2text`, wrapped at [`HTML_WRAP_WIDTH`] |
//! | `application/pdf` | `pdf-extract` |
//! | other `text/*`, JSON | lossy UTF-8 passthrough |
//! | anything else | unsupported |

use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const HTML_WRAP_WIDTH: usize = 120;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("HTML conversion failed: {0}")]
    Html(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// The media type without parameters, lowercased.
pub fn base_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Extract plain text from a response body.
///
/// An empty content type is sniffed: PDF magic bytes, then HTML-looking
/// text, then plain text.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    let ct = base_content_type(content_type);
    let ct = if ct.is_empty() { sniff(bytes).to_string() } else { ct };
    match ct.as_str() {
        "text/html" | "application/xhtml+xml" => html2text::from_read(bytes, HTML_WRAP_WIDTH)
            .map_err(|e| ExtractError::Html(e.to_string())),
        MIME_PDF => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        t if t.starts_with("text/") || t == "application/json" => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

fn sniff(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"%PDF-") {
        return MIME_PDF;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    if head.contains("<html") || head.contains("<!doctype html") {
        "text/html"
    } else {
        "text/plain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text() {
        let html = b"<html><body><h1>Trails</h1><p>Hanging Lake is short.</p><script>x()</script></body></html>";
        let text = extract_text(html, "text/html; charset=utf-8").unwrap();
        assert!(text.contains("Trails"));
        assert!(text.contains("Hanging Lake is short."));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(extract_text(b"hello", "text/plain").unwrap(), "hello");
    }

    #[test]
    fn test_unsupported() {
        let err = extract_text(b"\x89PNG", "image/png").unwrap_err();
        assert!(err.to_string().contains("image/png"));
    }

    #[test]
    fn test_sniffing() {
        assert_eq!(sniff(b"%PDF-1.7 ..."), MIME_PDF);
        assert_eq!(sniff(b"<!DOCTYPE html><html>"), "text/html");
        assert_eq!(sniff(b"just words"), "text/plain");
        assert_eq!(base_content_type("Text/HTML; charset=UTF-8"), "text/html");
    }
}
