use crate::error::IngestError;
use crate::models::{DocumentBlob, PageText};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

/// Turns an uploaded file into page-bounded text.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract_pages(&self, blob: &DocumentBlob) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn extract_from_bytes(bytes: &[u8], filename: &str) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::Extraction(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::Extraction(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::Extraction(format!(
                "pdf had no readable page text: {filename}"
            )));
        }

        Ok(pages)
    }
}

#[async_trait]
impl DocumentExtractor for LopdfExtractor {
    async fn extract_pages(&self, blob: &DocumentBlob) -> Result<Vec<PageText>, IngestError> {
        let bytes = blob.bytes.clone();
        let filename = blob.filename.clone();

        tokio::task::spawn_blocking(move || Self::extract_from_bytes(&bytes, &filename))
            .await
            .map_err(|error| IngestError::Extraction(format!("extraction task failed: {error}")))?
    }
}

/// Falls back to a multimodal OCR endpoint when the primary extractor fails or
/// yields less than `min_text_chars` of text.
pub struct OcrFallbackExtractor<P> {
    primary: P,
    ocr: Option<OcrEndpointConfig>,
    client: Client,
    min_text_chars: usize,
}

impl<P: DocumentExtractor> OcrFallbackExtractor<P> {
    pub fn new(primary: P, ocr: Option<OcrEndpointConfig>, min_text_chars: usize) -> Self {
        Self {
            primary,
            ocr,
            client: Client::new(),
            min_text_chars,
        }
    }

    async fn extract_with_llm_ocr(
        &self,
        cfg: &OcrEndpointConfig,
        blob: &DocumentBlob,
    ) -> Result<Vec<PageText>, IngestError> {
        let payload = LlmOcrRequest {
            pdf_base64: STANDARD.encode(&blob.bytes),
            source_path: blob.filename.clone(),
        };

        let mut request = self
            .client
            .post(&cfg.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &cfg.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "multimodal OCR request to {} returned {}",
                cfg.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json().await?;
        payload_to_pages(&payload, &blob.filename)
    }
}

#[async_trait]
impl<P: DocumentExtractor> DocumentExtractor for OcrFallbackExtractor<P> {
    async fn extract_pages(&self, blob: &DocumentBlob) -> Result<Vec<PageText>, IngestError> {
        let primary = self.primary.extract_pages(blob).await;

        let reason = match &primary {
            Ok(pages) if total_chars(pages) >= self.min_text_chars => None,
            Ok(pages) => Some(format!("only {} characters extracted", total_chars(pages))),
            Err(IngestError::Extraction(details)) => Some(details.clone()),
            Err(_) => None,
        };
        let Some(reason) = reason else {
            return primary;
        };

        let Some(cfg) = &self.ocr else {
            debug!(filename = %blob.filename, %reason, "no OCR endpoint configured");
            return primary;
        };

        warn!(filename = %blob.filename, %reason, "falling back to multimodal OCR");
        match self.extract_with_llm_ocr(cfg, blob).await {
            Ok(pages) => Ok(pages),
            Err(ocr_error) => match primary {
                Ok(pages) => Ok(pages),
                Err(_) => Err(IngestError::Extraction(format!(
                    "{reason}; multimodal OCR fallback failed: {ocr_error}"
                ))),
            },
        }
    }
}

pub fn total_chars(pages: &[PageText]) -> usize {
    pages.iter().map(|page| page.text.trim().chars().count()).sum()
}

fn payload_to_pages(payload: &LlmOcrResponse, filename: &str) -> Result<Vec<PageText>, IngestError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_ref().map(|value| value.trim().to_string());
                text.and_then(|normalized| {
                    if normalized.is_empty() {
                        None
                    } else {
                        Some(PageText {
                            number: page.page.unwrap_or(1),
                            text: normalized,
                        })
                    }
                })
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim().to_string();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: normalized,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::OcrFailed(format!(
        "multimodal OCR response was empty for {filename}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedExtractor(Result<Vec<PageText>, String>);

    #[async_trait]
    impl DocumentExtractor for FixedExtractor {
        async fn extract_pages(&self, _blob: &DocumentBlob) -> Result<Vec<PageText>, IngestError> {
            self.0.clone().map_err(IngestError::Extraction)
        }
    }

    #[test]
    fn ocr_payload_with_pages_converts_only_nonempty_text() {
        let response = LlmOcrResponse {
            pages: Some(vec![
                LlmOcrPage {
                    page: Some(2),
                    text: Some("  ".to_string()),
                },
                LlmOcrPage {
                    page: Some(3),
                    text: Some("Page 3".to_string()),
                },
            ]),
            text: None,
        };

        let pages = payload_to_pages(&response, "x.pdf").expect("multimodal response should be parsed");

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 3);
        assert_eq!(pages[0].text, "Page 3");
    }

    #[test]
    fn ocr_payload_fallback_text_split_by_form_feed() {
        let response = LlmOcrResponse {
            pages: None,
            text: Some("First\u{000C}Second\n".to_string()),
        };

        let pages = payload_to_pages(&response, "x.pdf").expect("multimodal response should be parsed");

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[1].text, "Second");
    }

    #[tokio::test]
    async fn lopdf_rejects_corrupted_bytes() {
        let blob = DocumentBlob::new("broken.pdf", b"%PDF-1.4\n%broken".to_vec());
        let result = LopdfExtractor.extract_pages(&blob).await;
        assert!(matches!(result, Err(IngestError::Extraction(_))));
    }

    #[tokio::test]
    async fn fallback_without_endpoint_returns_primary_result() {
        let extractor = OcrFallbackExtractor::new(
            FixedExtractor(Err("unreadable".to_string())),
            None,
            50,
        );
        let blob = DocumentBlob::new("a.pdf", Vec::new());

        let result = extractor.extract_pages(&blob).await;
        assert!(matches!(result, Err(IngestError::Extraction(details)) if details == "unreadable"));
    }

    #[tokio::test]
    async fn short_primary_text_is_kept_when_ocr_unavailable() {
        let pages = vec![PageText {
            number: 1,
            text: "tiny".to_string(),
        }];
        let extractor = OcrFallbackExtractor::new(FixedExtractor(Ok(pages.clone())), None, 50);
        let blob = DocumentBlob::new("a.pdf", Vec::new());

        assert_eq!(extractor.extract_pages(&blob).await.unwrap(), pages);
    }
}
