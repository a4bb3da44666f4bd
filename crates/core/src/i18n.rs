//! 用户可见信息的语言选择
//!
//! 默认输出中文信息，设置 `KATO_LANG=en` 时输出英文原文。

/// 控制输出语言的环境变量
pub const LANG_ENV: &str = "KATO_LANG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLanguage {
    Chinese,
    English,
}

impl MessageLanguage {
    pub fn from_env() -> Self {
        match std::env::var(LANG_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("en") => MessageLanguage::English,
            _ => MessageLanguage::Chinese,
        }
    }
}

/// 根据当前语言在两种文案之间选择
pub fn localize(zh: &str, en: &str) -> String {
    select(MessageLanguage::from_env(), zh, en)
}

pub fn select(lang: MessageLanguage, zh: &str, en: &str) -> String {
    match lang {
        MessageLanguage::Chinese => zh.to_string(),
        MessageLanguage::English => en.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select() {
        assert_eq!(select(MessageLanguage::English, "构建", "build"), "build");
        assert_eq!(select(MessageLanguage::Chinese, "构建", "build"), "构建");
    }
}
