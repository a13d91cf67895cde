//! OpenAI 兼容 API 生成后端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url），流式累积 delta 文本；
//! 附图时以 `data:` URL 作为 image_url 内容块发送。

use std::time::Instant;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::{ErrorKind, GenerationError};
use crate::llm::{Generation, GenerationRequest, Generator, ImagePart};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI 兼容后端：持有 Client；api_key 缺失时不发请求，直接返回 ApiKeyMissing
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    has_api_key: bool,
}

impl OpenAiGenerator {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from);
        let has_api_key = api_key.is_some();

        let config = OpenAIConfig::new()
            .with_api_base(base_url.unwrap_or(DEFAULT_OPENAI_BASE_URL).trim_end_matches('/'))
            .with_api_key(api_key.unwrap_or_default());

        Self {
            client: Client::with_config(config),
            has_api_key,
        }
    }

    fn to_user_message(
        prompt: &str,
        image: Option<&ImagePart>,
    ) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        let message = match image {
            Some(image) => {
                let text = ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(prompt)
                    .build()?;
                let image_url = ChatCompletionRequestMessageContentPartImageArgs::default()
                    .image_url(ImageUrlArgs::default().url(image.data_url()).build()?)
                    .build()?;
                ChatCompletionRequestUserMessageArgs::default()
                    .content(vec![
                        ChatCompletionRequestUserMessageContentPart::Text(text),
                        ChatCompletionRequestUserMessageContentPart::ImageUrl(image_url),
                    ])
                    .build()?
            }
            None => ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?,
        };
        Ok(ChatCompletionRequestMessage::User(message))
    }

    async fn stream_completion(&self, request: GenerationRequest<'_>) -> Result<String, OpenAIError> {
        let body = CreateChatCompletionRequestArgs::default()
            .model(request.model)
            .messages(vec![Self::to_user_message(request.prompt, request.image)?])
            .stream(true)
            .build()?;

        let mut stream = self.client.chat().create_stream(body).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(delta) = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref())
            {
                text.push_str(delta);
            }
        }
        Ok(text)
    }
}

/// 将 async_openai 错误映射为 ErrorKind（按状态码 / 错误码关键字）
pub(crate) fn classify_openai_error(err: &OpenAIError) -> ErrorKind {
    let text = err.to_string().to_lowercase();
    if text.contains("401")
        || text.contains("403")
        || text.contains("invalid_api_key")
        || text.contains("incorrect api key")
        || text.contains("permission")
    {
        ErrorKind::ApiKeyInvalid
    } else if text.contains("429") || text.contains("quota") || text.contains("rate limit") {
        ErrorKind::QuotaExceeded
    } else {
        ErrorKind::ApiCommunication
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        let started = Instant::now();
        if !self.has_api_key {
            return Err(GenerationError::new(
                ErrorKind::ApiKeyMissing,
                "OpenAI 兼容 API 密钥未配置。请在配置文件或 OPENAI_API_KEY 环境变量中提供。",
                started.elapsed(),
            ));
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(GenerationError::cancelled()),
            r = self.stream_completion(request) => r,
        };

        match result {
            Ok(text) => Ok(Generation {
                text,
                elapsed: started.elapsed(),
            }),
            Err(e) => {
                let kind = classify_openai_error(&e);
                tracing::warn!(model = request.model, ?kind, "OpenAI request failed: {}", e);
                Err(GenerationError::new(
                    kind,
                    format!("与AI通信时出错: {}", e),
                    started.elapsed(),
                ))
            }
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_short_circuits() {
        let gen = OpenAiGenerator::new(Some("http://127.0.0.1:9"), Some("   "));
        let request = GenerationRequest {
            prompt: "hi",
            model: "gpt-4o-mini",
            image: None,
            thinking_budget: None,
        };
        let err = gen
            .generate(request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ApiKeyMissing);
    }

    #[test]
    fn test_classify_invalid_argument_is_communication() {
        let err = OpenAIError::InvalidArgument("bad request shape".to_string());
        assert_eq!(classify_openai_error(&err), ErrorKind::ApiCommunication);
    }

    #[test]
    fn test_user_message_with_image() {
        let image = ImagePart::new("image/jpeg", "Zm9v");
        let message = OpenAiGenerator::to_user_message("look", Some(&image)).unwrap();
        assert!(matches!(message, ChatCompletionRequestMessage::User(_)));
    }
}
