//! 生成后端抽象
//!
//! 所有后端（Gemini / OpenAI 兼容 / Mock）实现 Generator：一次完整 prompt → 一段文本，
//! 失败时返回分类好的 GenerationError；两种结果都带耗时。取消令牌在调用前与调用中都需要尊重。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::GenerationError;

/// 随用户查询附带的图片（已 base64 编码）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImagePart {
    pub mime_type: String,
    pub data: String,
}

impl ImagePart {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// 由原始字节构造，负责 base64 编码
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(bytes),
        )
    }

    /// 按扩展名推断图片 MIME 类型；不认识的扩展名返回 None
    pub fn mime_type_for(path: &Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "webp" => Some("image/webp"),
            "gif" => Some("image/gif"),
            "heic" => Some("image/heic"),
            "heif" => Some("image/heif"),
            _ => None,
        }
    }

    /// `data:<mime>;base64,<data>` 形式（OpenAI image_url 使用）
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// 一次生成请求
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// 已拼好 persona 的完整 prompt
    pub prompt: &'a str,
    pub model: &'a str,
    pub image: Option<&'a ImagePart>,
    /// 思考预算（仅支持的后端使用）
    pub thinking_budget: Option<u32>,
}

/// 生成成功：文本（可能为空）与耗时
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub elapsed: Duration,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError>;

    /// 后端名（日志用）
    fn name(&self) -> &str {
        "generator"
    }
}
