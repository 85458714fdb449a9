// src/transform/validate.rs
//! Quality gate for parsed articles: minimum lengths and emoji density.

use thiserror::Error;

use crate::config::CleanerSettings;

#[derive(Debug, Error, PartialEq)]
pub enum Rejection {
    #[error("title too short ({len} < {min} chars)")]
    TitleTooShort { len: usize, min: usize },
    #[error("content too short ({len} < {min} chars)")]
    ContentTooShort { len: usize, min: usize },
    #[error("emoji ratio {ratio:.2} above {max:.2}")]
    TooManyEmoji { ratio: f64, max: f64 },
}

#[derive(Debug, Clone)]
pub struct ValidationRules {
    pub min_title_chars: usize,
    pub min_content_chars: usize,
    pub max_emoji_ratio: f64,
}

impl From<&CleanerSettings> for ValidationRules {
    fn from(s: &CleanerSettings) -> Self {
        Self {
            min_title_chars: s.min_title_chars,
            min_content_chars: s.min_content_chars,
            max_emoji_ratio: s.max_emoji_ratio,
        }
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self::from(&CleanerSettings::default())
    }
}

impl ValidationRules {
    pub fn check(&self, title: &str, content: &str) -> Result<(), Rejection> {
        let t = title.trim().chars().count();
        if t < self.min_title_chars {
            return Err(Rejection::TitleTooShort {
                len: t,
                min: self.min_title_chars,
            });
        }
        let c = content.trim().chars().count();
        if c < self.min_content_chars {
            return Err(Rejection::ContentTooShort {
                len: c,
                min: self.min_content_chars,
            });
        }
        let emoji = count_emoji(title) + count_emoji(content);
        let ratio = emoji as f64 / (t + c) as f64;
        if ratio > self.max_emoji_ratio {
            return Err(Rejection::TooManyEmoji {
                ratio,
                max: self.max_emoji_ratio,
            });
        }
        Ok(())
    }
}

/// Pictographs, dingbats, regional indicators and enclosed symbols.
pub fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F600..=0x1F64F
            | 0x1F300..=0x1F5FF
            | 0x1F680..=0x1F6FF
            | 0x1F700..=0x1F7FF
            | 0x1F800..=0x1F8FF
            | 0x1F900..=0x1F9FF
            | 0x1FA00..=0x1FAFF
            | 0x1F1E0..=0x1F1FF
            | 0x1F100..=0x1F251
            | 0x2702..=0x27B0
            | 0x24C2
    )
}

pub fn count_emoji(s: &str) -> usize {
    s.chars().filter(|c| is_emoji(*c)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ValidationRules {
        ValidationRules::default()
    }

    #[test]
    fn accepts_plain_chinese_article() {
        let content = "OpenAI 今天发布了新一代模型，在推理、编码与多模态理解上均有显著提升，并同步开放了接口。".repeat(2);
        assert_eq!(rules().check("OpenAI 发布新模型", &content), Ok(()));
    }

    #[test]
    fn short_fields_rejected() {
        let long = "x".repeat(60);
        assert!(matches!(
            rules().check("a", &long),
            Err(Rejection::TitleTooShort { len: 1, min: 2 })
        ));
        assert!(matches!(
            rules().check("title", "too short"),
            Err(Rejection::ContentTooShort { .. })
        ));
    }

    #[test]
    fn emoji_heavy_text_rejected() {
        let content = format!("{}{}", "🚀🔥".repeat(10), "a".repeat(50));
        assert!(matches!(
            rules().check("🚀🚀", &content),
            Err(Rejection::TooManyEmoji { .. })
        ));
    }

    #[test]
    fn cjk_is_not_counted_as_emoji() {
        assert_eq!(count_emoji("人工智能新闻"), 0);
        assert_eq!(count_emoji("发布 🚀"), 1);
    }
}
