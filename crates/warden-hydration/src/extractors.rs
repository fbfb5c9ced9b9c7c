//! Extractor router: turns raw bytes into a (text, structured) pair based on
//! file extension and MIME type.
//!
//! Concrete binary-format parsers live behind this seam; the router itself
//! handles the text family and defers images/binaries to the OCR hook, which
//! only runs when `HYDRATION_OCR_ENABLED` is set and text extraction came
//! back empty.

use tracing::debug;

/// Optional OCR engine consulted for image-like content.
pub trait OcrEngine: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Option<String>;
}

/// Default OCR stub: recognizes nothing.
pub struct NoOcr;

impl OcrEngine for NoOcr {
    fn extract(&self, _bytes: &[u8]) -> Option<String> {
        None
    }
}

/// Route by extension/MIME; returns extracted text and structured metadata.
pub fn extract(
    name: &str,
    mime_type: Option<&str>,
    bytes: &[u8],
    ocr: &dyn OcrEngine,
    ocr_enabled: bool,
) -> (String, serde_json::Value) {
    let extension = name
        .rsplit('.')
        .next()
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let (mut text, structured) = match (extension.as_str(), mime_type) {
        ("txt" | "md" | "log", _) | (_, Some("text/plain" | "text/markdown")) => {
            let text = String::from_utf8_lossy(bytes).to_string();
            (text, serde_json::json!({"format": "text"}))
        }
        ("csv", _) | (_, Some("text/csv")) => {
            let text = String::from_utf8_lossy(bytes).to_string();
            let rows: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
            let columns = rows
                .first()
                .map(|header| header.split(',').count())
                .unwrap_or(0);
            (
                text.clone(),
                serde_json::json!({"format": "csv", "rows": rows.len(), "columns": columns}),
            )
        }
        ("json", _) | (_, Some("application/json")) => {
            let text = String::from_utf8_lossy(bytes).to_string();
            let parsed: serde_json::Value =
                serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
            (text, serde_json::json!({"format": "json", "parsed": parsed}))
        }
        _ => (
            String::new(),
            serde_json::json!({
                "format": "binary",
                "note": "no extractor for this format",
                "mime": mime_type,
            }),
        ),
    };

    if text.trim().is_empty() && ocr_enabled {
        if let Some(recognized) = ocr.extract(bytes) {
            debug!(target: "warden::hydration", name, "OCR fallback produced text");
            text = recognized;
        }
    }

    (text, structured)
}
