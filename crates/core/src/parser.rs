use crate::error::IndexError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One semi-structured text block from a parsed PDF, in document order.
#[derive(Debug, Clone)]
pub struct TextBlock {
    pub index: usize,
    pub text: String,
}

pub trait DocumentParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<Vec<TextBlock>, IndexError>;
}

/// Local extraction via lopdf; one block per readable page.
#[derive(Default)]
pub struct LopdfParser;

impl DocumentParser for LopdfParser {
    fn parse(&self, path: &Path) -> Result<Vec<TextBlock>, IndexError> {
        let document =
            Document::load(path).map_err(|error| IndexError::PdfParse(error.to_string()))?;

        let mut blocks = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IndexError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                blocks.push(TextBlock {
                    index: blocks.len(),
                    text,
                });
            }
        }

        if blocks.is_empty() {
            return Err(IndexError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(blocks)
    }
}

/// Production parser: lopdf first, then an optional remote markdown-parsing
/// service for scanned or layout-heavy PDFs that lopdf cannot read.
#[derive(Default)]
pub struct PdfBlockParser {
    local: LopdfParser,
}

impl DocumentParser for PdfBlockParser {
    fn parse(&self, path: &Path) -> Result<Vec<TextBlock>, IndexError> {
        match self.local.parse(path) {
            Ok(blocks) => Ok(blocks),
            Err(IndexError::PdfParse(parse_error)) => match parse_with_remote_service(path) {
                Ok(Some(blocks)) => Ok(blocks),
                Ok(None) => Err(IndexError::PdfParse(parse_error)),
                Err(remote_error) => Err(IndexError::PdfParse(format!(
                    "{parse_error}; remote parse fallback failed: {remote_error}"
                ))),
            },
            Err(error) => Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct RemoteParseRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteParseResponse {
    blocks: Option<Vec<RemoteParseBlock>>,
    markdown: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteParseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone)]
struct RemoteParseConfig {
    endpoint: String,
    api_key: Option<String>,
}

fn remote_parse_config() -> Option<RemoteParseConfig> {
    let endpoint = std::env::var("PDF_PARSE_ENDPOINT").ok()?;
    let endpoint = endpoint.trim().to_string();
    if endpoint.is_empty() {
        return None;
    }

    let api_key = std::env::var("PDF_PARSE_API_KEY").ok().and_then(|value| {
        let key = value.trim().to_string();
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    });

    Some(RemoteParseConfig { endpoint, api_key })
}

fn parse_with_remote_service(path: &Path) -> Result<Option<Vec<TextBlock>>, IndexError> {
    tokio::task::block_in_place(|| parse_with_remote_service_blocking(path))
}

fn parse_with_remote_service_blocking(path: &Path) -> Result<Option<Vec<TextBlock>>, IndexError> {
    let cfg = match remote_parse_config() {
        Some(cfg) => cfg,
        None => return Ok(None),
    };

    let pdf = std::fs::read(path).map_err(IndexError::Io)?;
    let payload = RemoteParseRequest {
        pdf_base64: STANDARD.encode(pdf),
        source_path: path.to_string_lossy().to_string(),
    };

    let mut request = Client::new()
        .post(&cfg.endpoint)
        .header("content-type", "application/json")
        .json(&payload);

    if let Some(api_key) = cfg.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request
        .send()
        .map_err(|error| IndexError::PdfParse(error.to_string()))?;

    if !response.status().is_success() {
        return Err(IndexError::PdfParse(format!(
            "remote parse request to {} returned {}",
            cfg.endpoint,
            response.status()
        )));
    }

    let payload: RemoteParseResponse = response
        .json()
        .map_err(|error| IndexError::PdfParse(error.to_string()))?;
    let blocks = payload_to_blocks(&payload, path)?;

    Ok(Some(blocks))
}

fn payload_to_blocks(
    payload: &RemoteParseResponse,
    path: &Path,
) -> Result<Vec<TextBlock>, IndexError> {
    if let Some(listed) = &payload.blocks {
        let listed = listed
            .iter()
            .filter_map(|block| {
                block.text.as_ref().and_then(|text| {
                    let normalized = text.trim().to_string();
                    if normalized.is_empty() {
                        None
                    } else {
                        Some(normalized)
                    }
                })
            })
            .enumerate()
            .map(|(index, text)| TextBlock { index, text })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(markdown) = &payload.markdown {
        let blocks = markdown
            .split("\n\n")
            .filter_map(|section| {
                let normalized = section.trim().to_string();
                if normalized.is_empty() {
                    None
                } else {
                    Some(normalized)
                }
            })
            .enumerate()
            .map(|(index, text)| TextBlock { index, text })
            .collect::<Vec<_>>();

        if !blocks.is_empty() {
            return Ok(blocks);
        }
    }

    Err(IndexError::PdfParse(format!(
        "remote parse response was empty for {}",
        path.display()
    )))
}
