//! 텍스트 생성 모듈 - Gemini API를 통한 응답 생성
//!
//! 프롬프트를 받아 생성된 텍스트를 돌려주는 Completion 프로바이더입니다.
//! 임베딩과 마찬가지로 API 키는 호출 시점에 전달받습니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::GeminiError;

// ============================================================================
// CompletionProvider Trait
// ============================================================================

/// Completion 프로바이더 트레이트
///
/// 프롬프트 하나를 받아 생성된 텍스트를 반환하는 인터페이스입니다.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 프롬프트에 대한 텍스트 생성
    async fn complete(&self, prompt: &str, api_key: &str) -> Result<String>;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Completion
// ============================================================================

/// 생성 모델 이름
const COMPLETION_MODEL: &str = "gemini-2.0-flash-lite";

/// Gemini 생성 API 엔드포인트
/// source: https://ai.google.dev/gemini-api/docs/text-generation
const GEMINI_GENERATE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash-lite:generateContent";

/// HTTP 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Google Gemini 생성 모델 구현체
#[derive(Debug)]
pub struct GeminiCompletion {
    client: reqwest::Client,
}

impl GeminiCompletion {
    /// 새 Gemini Completion 인스턴스 생성
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

/// Gemini 생성 요청 본문
#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GenerateContent>,
}

#[derive(Debug, Serialize)]
struct GenerateContent {
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Serialize)]
struct GeneratePart {
    text: String,
}

/// Gemini 생성 응답
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// 첫 번째 후보의 텍스트 추출
fn first_candidate_text(response: &GenerateResponse) -> Option<String> {
    let candidate = response.candidates.first()?;

    let text: String = candidate
        .content
        .parts
        .iter()
        .map(|p| p.text.as_str())
        .collect();

    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[async_trait]
impl CompletionProvider for GeminiCompletion {
    async fn complete(&self, prompt: &str, api_key: &str) -> Result<String> {
        if api_key.trim().is_empty() {
            anyhow::bail!("Empty API key");
        }

        let request = GenerateRequest {
            contents: vec![GenerateContent {
                parts: vec![GeneratePart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .client
            .post(GEMINI_GENERATE_URL)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send generation request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                anyhow::bail!(
                    "Gemini API error ({}): {}",
                    error.error.status,
                    error.error.message
                );
            }
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        let generate_response: GenerateResponse =
            serde_json::from_str(&body).context("Failed to parse generation response")?;

        first_candidate_text(&generate_response)
            .ok_or_else(|| anyhow::anyhow!("Gemini returned no candidate text"))
    }

    fn name(&self) -> &str {
        COMPLETION_MODEL
    }
}

// ============================================================================
// Tests
// ============================================================================
