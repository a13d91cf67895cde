//! 共享记事本：整段覆盖，后写者胜，不做合并
//!
//! 每步最多写一次；内容与原先相同时为无操作（不产生 notepad-updated 事件）。

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Notepad {
    content: String,
}

impl Notepad {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// 应用一步的记事本输出；返回 true 表示内容确有变化
    pub fn apply(&mut self, update: Option<&str>) -> bool {
        match update {
            Some(new) if new != self.content => {
                self.content = new.to_string();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overwrites() {
        let mut pad = Notepad::new("old");
        assert!(pad.apply(Some("new")));
        assert_eq!(pad.content(), "new");
    }

    #[test]
    fn test_apply_same_content_is_noop() {
        let mut pad = Notepad::new("same");
        assert!(!pad.apply(Some("same")));
        assert_eq!(pad.content(), "same");
    }

    #[test]
    fn test_apply_none_keeps_content() {
        let mut pad = Notepad::new("keep");
        assert!(!pad.apply(None));
        assert_eq!(pad.content(), "keep");
    }

    #[test]
    fn test_apply_can_clear() {
        let mut pad = Notepad::new("something");
        assert!(pad.apply(Some("")));
        assert_eq!(pad.content(), "");
    }
}
