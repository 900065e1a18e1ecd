use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::metrics::OCR_REQUESTS_TOTAL;
use crate::models::ocr::OcrResponse;

const GOOGLE_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

const SUPPORTED_IMAGE_TYPES: [(&str, &[&str]); 4] = [
    ("image/png", &["png"]),
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/gif", &["gif"]),
    ("image/webp", &["webp"]),
];

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Nieobsługiwany format obrazu: {0}")]
    UnsupportedMediaType(String),
    #[error("Przesłany plik jest pusty")]
    EmptyUpload,
    #[error("Nie udało się rozpoznać tekstu z obrazu")]
    Recognition(String),
}

struct OcrPatterns {
    whitespace: Regex,
    x_squared: Regex,
    x_cubed: Regex,
    exponent: Regex,
    sqrt_call: Regex,
    sqrt_open: Regex,
    function_call: Regex,
    wrap: Vec<Regex>,
}

impl OcrPatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            whitespace: Regex::new(r"\s+")?,
            x_squared: Regex::new(r"\bx\s*2\b")?,
            x_cubed: Regex::new(r"\bx\s*3\b")?,
            exponent: Regex::new(r"\^(\d+)")?,
            sqrt_call: Regex::new(r"\\?\bsqrt\s*\(([^()]*)\)")?,
            sqrt_open: Regex::new(r"\\?\bsqrt\s*\(")?,
            function_call: Regex::new(r"\\?\b(sin|cos|tan|log|ln)\s*\(")?,
            wrap: vec![
                // equations like x = 2y + 3
                Regex::new(r"(?i)\b[a-z]\s*[=<>]\s*.+")?,
                // terms like 3x
                Regex::new(r"\b\d+[a-z]\b")?,
                // powers like x^{2}
                Regex::new(r"[a-z]\^\{?\d+\}?")?,
                // LaTeX commands like \sqrt{4}
                Regex::new(r"\\[a-z]+\{[^}]+\}")?,
            ],
        })
    }
}

lazy_static! {
    static ref PATTERNS: Option<OcrPatterns> = match OcrPatterns::compile() {
        Ok(patterns) => Some(patterns),
        Err(e) => {
            tracing::error!("OCR normalization patterns failed to compile: {}", e);
            None
        }
    };
}

/// Cleans raw recognizer output: whitespace runs collapse to one space,
/// then common math misreadings are rewritten. Returns the input untouched
/// if the patterns are unavailable.
pub fn normalize_ocr_text(text: &str) -> String {
    let Some(patterns) = PATTERNS.as_ref() else {
        return text.to_string();
    };
    let collapsed = patterns.whitespace.replace_all(text, " ");
    format_with(patterns, collapsed.trim())
}

/// Token substitutions followed by inline-math wrapping. Best effort only.
pub fn format_math_expressions(text: &str) -> String {
    match PATTERNS.as_ref() {
        Some(patterns) => format_with(patterns, text),
        None => text.to_string(),
    }
}

fn format_with(patterns: &OcrPatterns, text: &str) -> String {
    let mut formatted = patterns.x_squared.replace_all(text, "x²").into_owned();
    formatted = patterns.x_cubed.replace_all(&formatted, "x³").into_owned();
    formatted = patterns.exponent.replace_all(&formatted, "^{${1}}").into_owned();
    formatted = patterns
        .sqrt_call
        .replace_all(&formatted, r"\sqrt{${1}}")
        .into_owned();
    formatted = patterns.sqrt_open.replace_all(&formatted, r"\sqrt{").into_owned();
    formatted = patterns
        .function_call
        .replace_all(&formatted, r"\${1}(")
        .into_owned();

    for pattern in &patterns.wrap {
        formatted = wrap_outside_math(pattern, &formatted);
    }
    formatted
}

/// Wraps every match in `$…$` unless it touches text already inside math
/// delimiters.
fn wrap_outside_math(pattern: &Regex, text: &str) -> String {
    let spans = math_spans(text);
    let mut out = String::with_capacity(text.len() + 8);
    let mut last = 0;

    for m in pattern.find_iter(text) {
        let overlaps = spans
            .iter()
            .any(|&(start, end)| m.start() < end && m.end() > start);
        if overlaps {
            continue;
        }
        out.push_str(&text[last..m.start()]);
        out.push('$');
        out.push_str(m.as_str());
        out.push('$');
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Byte ranges of `$…$` and `$$…$$` segments, delimiters included. An
/// unclosed delimiter runs to the end of the text.
fn math_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let delimiter = if bytes.get(i + 1) == Some(&b'$') { "$$" } else { "$" };
        let body_start = i + delimiter.len();
        match text[body_start..].find(delimiter) {
            Some(offset) => {
                let end = body_start + offset + delimiter.len();
                spans.push((i, end));
                i = end;
            }
            None => {
                spans.push((i, bytes.len()));
                break;
            }
        }
    }
    spans
}

/// An accepted image upload.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: Option<String>,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl UploadedImage {
    /// Accepts png, jpeg, gif and webp, recognized by MIME type or, failing
    /// that, by file extension.
    pub fn from_parts(
        file_name: Option<String>,
        content_type: Option<&str>,
        bytes: Vec<u8>,
    ) -> Result<Self, OcrError> {
        if bytes.is_empty() {
            return Err(OcrError::EmptyUpload);
        }

        let by_mime = content_type.and_then(|ct| {
            let ct = ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase();
            let ct = if ct == "image/jpg" { "image/jpeg".to_string() } else { ct };
            SUPPORTED_IMAGE_TYPES
                .iter()
                .find(|(mime, _)| *mime == ct)
                .map(|(mime, _)| *mime)
        });

        let by_extension = || {
            let ext = file_name
                .as_deref()?
                .rsplit_once('.')?
                .1
                .to_ascii_lowercase();
            SUPPORTED_IMAGE_TYPES
                .iter()
                .find(|(_, exts)| exts.contains(&ext.as_str()))
                .map(|(mime, _)| *mime)
        };

        let mime_type = by_mime.or_else(by_extension).ok_or_else(|| {
            OcrError::UnsupportedMediaType(
                content_type
                    .map(str::to_string)
                    .or_else(|| file_name.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
            )
        })?;

        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }

    pub fn base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

/// Extracts raw text from an image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &UploadedImage) -> Result<String, OcrError>;
}

pub struct GoogleVisionOcr {
    http_client: reqwest::Client,
    api_key: String,
}

impl GoogleVisionOcr {
    pub fn new(api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResult {
    full_text_annotation: Option<FullTextAnnotation>,
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    text: Option<String>,
}

#[async_trait]
impl OcrEngine for GoogleVisionOcr {
    async fn recognize(&self, image: &UploadedImage) -> Result<String, OcrError> {
        let body = json!({
            "requests": [{
                "image": { "content": image.base64() },
                "features": [{ "type": "TEXT_DETECTION", "maxResults": 1 }]
            }]
        });

        let response = self
            .http_client
            .post(GOOGLE_VISION_ENDPOINT)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| OcrError::Recognition(format!("vision request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(OcrError::Recognition(format!(
                "vision API returned {}",
                response.status()
            )));
        }

        let parsed: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| OcrError::Recognition(format!("malformed vision response: {}", e)))?;

        parsed
            .responses
            .into_iter()
            .next()
            .and_then(|r| r.full_text_annotation)
            .and_then(|a| a.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| OcrError::Recognition("no text detected".to_string()))
    }
}

/// Upload pipeline: preview for the browser plus normalized text when an
/// engine is available. Recognition failures are reported, never fatal.
#[derive(Clone, Default)]
pub struct OcrService {
    engine: Option<Arc<dyn OcrEngine>>,
}

impl OcrService {
    pub fn new(engine: Option<Arc<dyn OcrEngine>>) -> Self {
        Self { engine }
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub async fn process(&self, image: UploadedImage) -> OcrResponse {
        let preview_data_url = image.data_url();
        let mut response = OcrResponse {
            file_name: image.file_name.clone(),
            mime_type: image.mime_type,
            size_bytes: image.bytes.len(),
            preview_data_url,
            ocr_text: None,
            raw_text: None,
            ocr_error: None,
        };

        let Some(engine) = &self.engine else {
            OCR_REQUESTS_TOTAL.with_label_values(&["no_engine"]).inc();
            return response;
        };

        match engine.recognize(&image).await {
            Ok(raw) => {
                OCR_REQUESTS_TOTAL.with_label_values(&["success"]).inc();
                response.ocr_text = Some(normalize_ocr_text(&raw));
                response.raw_text = Some(raw);
            }
            Err(e) => {
                tracing::warn!("OCR failed for {:?}: {:?}", image.file_name, e);
                OCR_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
                response.ocr_error = Some(e.to_string());
            }
        }
        response
    }
}
