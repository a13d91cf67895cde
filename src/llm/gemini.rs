//! Gemini generateContent 生成后端（reqwest 直连 REST）
//!
//! - 默认端点：https://generativelanguage.googleapis.com/v1beta，可配置为自建代理
//! - 附图以 inlineData 内容块放在文本之前
//! - 支持 thinkingConfig.thinkingBudget（仅部分模型支持，由配置决定是否传入）

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::{ErrorKind, GenerationError};
use crate::llm::{Generation, GenerationRequest, Generator};

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Inline { inline_data: InlineData<'a> },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// 根据 HTTP 状态码与错误信息分类
pub(crate) fn classify_gemini_failure(status: u16, message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if status == 401
        || status == 403
        || lower.contains("api key not valid")
        || lower.contains("api_key_invalid")
        || lower.contains("permission_denied")
        || lower.contains("permission denied")
    {
        ErrorKind::ApiKeyInvalid
    } else if status == 429 || lower.contains("quota exceeded") || lower.contains("resource_exhausted") {
        ErrorKind::QuotaExceeded
    } else {
        ErrorKind::ApiCommunication
    }
}

pub struct GeminiGenerator {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiGenerator {
    pub fn new(endpoint: Option<&str>, api_key: Option<&str>, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .unwrap_or(DEFAULT_GEMINI_ENDPOINT)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from),
        }
    }

    fn body<'a>(request: &GenerationRequest<'a>) -> GenerateContentBody<'a> {
        let mut parts = Vec::with_capacity(2);
        if let Some(image) = request.image {
            parts.push(Part::Inline {
                inline_data: InlineData {
                    mime_type: &image.mime_type,
                    data: &image.data,
                },
            });
        }
        parts.push(Part::Text {
            text: request.prompt,
        });
        GenerateContentBody {
            contents: vec![Content { parts }],
            generation_config: request.thinking_budget.map(|budget| GenerationConfig {
                thinking_config: ThinkingConfig {
                    thinking_budget: budget,
                },
            }),
        }
    }

    async fn send(
        &self,
        api_key: &str,
        request: &GenerationRequest<'_>,
    ) -> Result<String, (ErrorKind, String)> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, request.model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&Self::body(request))
            .send()
            .await
            .map_err(|e| (ErrorKind::ApiCommunication, format!("与AI通信时出错: {}", e)))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| (ErrorKind::ApiCommunication, format!("读取响应失败: {}", e)))?;

        if !status.is_success() {
            let (message, api_status) = serde_json::from_str::<ErrorEnvelope>(&raw)
                .map(|env| (env.error.message, env.error.status))
                .unwrap_or_else(|_| (raw.clone(), String::new()));
            let kind = classify_gemini_failure(status.as_u16(), &format!("{} {}", message, api_status));
            return Err((kind, format!("与AI通信时出错 ({}): {}", status, message)));
        }

        serde_json::from_str::<GenerateContentResponse>(&raw)
            .map(|r| r.text())
            .map_err(|e| (ErrorKind::ApiCommunication, format!("无法解析响应: {}", e)))
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        let started = Instant::now();
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(GenerationError::new(
                ErrorKind::ApiKeyMissing,
                "Gemini API 密钥未配置。请在配置文件或 GEMINI_API_KEY 环境变量中提供。",
                started.elapsed(),
            ));
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(GenerationError::cancelled()),
            r = self.send(api_key, &request) => r,
        };

        match result {
            Ok(text) => Ok(Generation {
                text,
                elapsed: started.elapsed(),
            }),
            Err((kind, message)) => {
                tracing::warn!(model = request.model, ?kind, "Gemini request failed: {}", message);
                Err(GenerationError::new(kind, message, started.elapsed()))
            }
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ImagePart;

    #[test]
    fn test_classify_gemini_failure() {
        assert_eq!(
            classify_gemini_failure(400, "API key not valid. Please pass a valid API key."),
            ErrorKind::ApiKeyInvalid
        );
        assert_eq!(classify_gemini_failure(403, ""), ErrorKind::ApiKeyInvalid);
        assert_eq!(
            classify_gemini_failure(429, "Quota exceeded for metric"),
            ErrorKind::QuotaExceeded
        );
        assert_eq!(classify_gemini_failure(500, "internal"), ErrorKind::ApiCommunication);
    }

    #[test]
    fn test_body_puts_image_before_text_and_sets_thinking() {
        let image = ImagePart::new("image/png", "AAAA");
        let request = GenerationRequest {
            prompt: "describe",
            model: "gemini-2.5-flash",
            image: Some(&image),
            thinking_budget: Some(24576),
        };
        let json = serde_json::to_value(GeminiGenerator::body(&request)).unwrap();
        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(parts[1]["text"], "describe");
        assert_eq!(
            json["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            24576
        );
    }

    #[test]
    fn test_response_text_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Hello, "},{"text":"world"}]}}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.text(), "Hello, world");
    }

    #[tokio::test]
    async fn test_missing_key_short_circuits() {
        let gen = GeminiGenerator::new(None, None, Duration::from_secs(1));
        let request = GenerationRequest {
            prompt: "hi",
            model: "gemini-2.5-pro",
            image: None,
            thinking_budget: None,
        };
        let err = gen
            .generate(request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ApiKeyMissing);
    }
}
