//! 回复解析：从模型原始文本中提取发言、结束信号与更新后的记事本
//!
//! 文法只有两个记号：`<notepad>…</notepad>` 包裹的记事本段（贪婪匹配：第一个开标签到最后一个闭标签），
//! 以及末尾的结束标记 `<DISCUSSION_COMPLETE>`。解析永不失败，标签缺失或残缺时按普通文本处理。

use std::sync::OnceLock;

use regex::Regex;

/// 提议结束讨论的结束标记（必须逐字节保留）
pub const DISCUSSION_COMPLETE_TAG: &str = "<DISCUSSION_COMPLETE>";
pub const NOTEPAD_OPEN_TAG: &str = "<notepad>";
pub const NOTEPAD_CLOSE_TAG: &str = "</notepad>";

/// 去掉标签后发言为空、且提议结束时的占位文本
pub const EMPTY_END_PLACEHOLDER: &str = "(AI 建议结束讨论)";
/// 去掉标签后发言为空、且未提议结束时的占位文本
pub const EMPTY_REPLY_PLACEHOLDER: &str = "(AI 未提供额外文本回复)";

static NOTEPAD_RE: OnceLock<Regex> = OnceLock::new();

fn notepad_re() -> &'static Regex {
    NOTEPAD_RE.get_or_init(|| Regex::new(r"(?s)<notepad>(.*)</notepad>").unwrap())
}

/// 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub spoken_text: String,
    pub discussion_should_end: bool,
    /// None 表示本步未输出记事本（视为“无变化”）
    pub updated_notepad: Option<String>,
}

pub fn parse_response(raw: &str) -> ParsedResponse {
    let mut spoken = raw.trim().to_string();
    let mut updated_notepad = None;

    if let Some(caps) = notepad_re().captures(&spoken) {
        updated_notepad = caps.get(1).map(|m| m.as_str().trim().to_string());
        spoken = notepad_re().replace(&spoken, "").trim().to_string();
    }

    let mut discussion_should_end = false;
    if let Some(stripped) = spoken.strip_suffix(DISCUSSION_COMPLETE_TAG) {
        discussion_should_end = true;
        spoken = stripped.trim().to_string();
    }

    if spoken.trim().is_empty() {
        spoken = if discussion_should_end {
            EMPTY_END_PLACEHOLDER
        } else {
            EMPTY_REPLY_PLACEHOLDER
        }
        .to_string();
    }

    ParsedResponse {
        spoken_text: spoken,
        discussion_should_end,
        updated_notepad,
    }
}

/// 按回复格式包裹记事本（parse_response 的逆操作）
pub fn wrap_notepad(content: &str) -> String {
    format!("{}\n{}\n{}", NOTEPAD_OPEN_TAG, content, NOTEPAD_CLOSE_TAG)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        let parsed = parse_response("  Primes have exactly two divisors.  ");
        assert_eq!(parsed.spoken_text, "Primes have exactly two divisors.");
        assert!(!parsed.discussion_should_end);
        assert_eq!(parsed.updated_notepad, None);
    }

    #[test]
    fn test_notepad_extracted_and_removed() {
        let raw = "My answer.\n<notepad>\n- fact one\n- fact two\n</notepad>";
        let parsed = parse_response(raw);
        assert_eq!(parsed.spoken_text, "My answer.");
        assert_eq!(parsed.updated_notepad.as_deref(), Some("- fact one\n- fact two"));
    }

    #[test]
    fn test_completion_tag_after_notepad_removal() {
        let raw = "I agree. <DISCUSSION_COMPLETE>\n<notepad>done</notepad>";
        let parsed = parse_response(raw);
        assert!(parsed.discussion_should_end);
        assert_eq!(parsed.spoken_text, "I agree.");
        assert_eq!(parsed.updated_notepad.as_deref(), Some("done"));
    }

    #[test]
    fn test_completion_tag_not_at_end_is_ignored() {
        let parsed = parse_response("<DISCUSSION_COMPLETE> but wait, one more thing");
        assert!(!parsed.discussion_should_end);
        assert!(parsed.spoken_text.starts_with(DISCUSSION_COMPLETE_TAG));
    }

    #[test]
    fn test_empty_placeholders() {
        let ended = parse_response("<notepad>x</notepad><DISCUSSION_COMPLETE>");
        assert_eq!(ended.spoken_text, EMPTY_END_PLACEHOLDER);
        assert!(ended.discussion_should_end);

        let silent = parse_response("   ");
        assert_eq!(silent.spoken_text, EMPTY_REPLY_PLACEHOLDER);
        assert!(!silent.discussion_should_end);
    }

    #[test]
    fn test_notepad_match_is_greedy() {
        let raw = "a <notepad>one</notepad> b <notepad>two</notepad> c";
        let parsed = parse_response(raw);
        assert_eq!(
            parsed.updated_notepad.as_deref(),
            Some("one</notepad> b <notepad>two")
        );
        assert_eq!(parsed.spoken_text, "a  c");
    }

    #[test]
    fn test_unclosed_notepad_is_plain_text() {
        let parsed = parse_response("text <notepad> never closed");
        assert_eq!(parsed.updated_notepad, None);
        assert_eq!(parsed.spoken_text, "text <notepad> never closed");
    }

    #[test]
    fn test_wrap_then_parse_recovers_notepad() {
        for content in ["", "single line", "  padded\n\n multi\nline  ", "含中文的记事本 ✓"] {
            let parsed = parse_response(&format!("reply\n{}", wrap_notepad(content)));
            assert_eq!(parsed.updated_notepad.as_deref(), Some(content.trim()));
        }
    }
}
