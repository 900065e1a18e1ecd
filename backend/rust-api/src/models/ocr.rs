use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub file_name: Option<String>,
    pub mime_type: &'static str,
    pub size_bytes: usize,
    /// `data:<mime>;base64,...` for an immediate preview in the browser.
    pub preview_data_url: String,
    /// Recognized text after math normalization; `None` when no OCR engine
    /// is configured or recognition failed.
    pub ocr_text: Option<String>,
    pub raw_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_error: Option<String>,
}
