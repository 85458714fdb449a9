// src/transform/normalize.rs
//! Whitespace and punctuation normalization applied to cleaned titles and bodies.

use once_cell::sync::OnceCell;
use regex::{Captures, Regex};

/// Paragraphs longer than this (in chars) are split at sentence ends.
pub const MAX_PARAGRAPH_CHARS: usize = 300;

/// Longest digit run that a single-space split is rejoined into (`1 234` -> `1234`).
const MAX_REJOINED_DIGITS: usize = 10;

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

/// First `max` characters of `s` (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Insert a space wherever a CJK ideograph touches a Latin letter or digit.
pub fn space_cjk_latin(s: &str) -> String {
    static CJK_THEN_LATIN: OnceCell<Regex> = OnceCell::new();
    static LATIN_THEN_CJK: OnceCell<Regex> = OnceCell::new();
    let out = re(&CJK_THEN_LATIN, r"([\x{4e00}-\x{9fa5}])([A-Za-z0-9])").replace_all(s, "$1 $2");
    re(&LATIN_THEN_CJK, r"([A-Za-z0-9])([\x{4e00}-\x{9fa5}])")
        .replace_all(&out, "$1 $2")
        .into_owned()
}

/// Rejoin digit runs separated by one space (`12 345` -> `12345`) when the
/// result stays short enough to be a plain number. URLs are left untouched.
pub fn rejoin_split_digits(s: &str) -> String {
    static URL: OnceCell<Regex> = OnceCell::new();
    static SPLIT: OnceCell<Regex> = OnceCell::new();
    let url = re(&URL, r"https?://\S+");
    let split = re(&SPLIT, r"(\d+) (\d+)");

    let mut urls: Vec<String> = Vec::new();
    let mut out = url
        .replace_all(s, |c: &Captures| {
            urls.push(c[0].to_string());
            format!("\u{0}{}\u{0}", urls.len() - 1)
        })
        .into_owned();

    // `1 234 567` needs more than one pass: matches do not overlap.
    loop {
        let next = split
            .replace_all(&out, |c: &Captures| {
                if c[1].len() + c[2].len() <= MAX_REJOINED_DIGITS {
                    format!("{}{}", &c[1], &c[2])
                } else {
                    c[0].to_string()
                }
            })
            .into_owned();
        if next == out {
            break;
        }
        out = next;
    }

    for (i, u) in urls.iter().enumerate() {
        out = out.replace(&format!("\u{0}{i}\u{0}"), u);
    }
    out
}

/// Full-width punctuation is followed by a space unless whitespace already is.
pub fn space_after_cjk_punctuation(s: &str) -> String {
    static PUNCT: OnceCell<Regex> = OnceCell::new();
    re(&PUNCT, r"([，。！？；：])(\S)")
        .replace_all(s, "$1 $2")
        .into_owned()
}

/// Collapse three or more consecutive newlines into one blank line and strip
/// trailing spaces from every line.
pub fn collapse_blank_lines(s: &str) -> String {
    static BLANKS: OnceCell<Regex> = OnceCell::new();
    let trimmed: Vec<&str> = s.lines().map(str::trim_end).collect();
    re(&BLANKS, r"\n{3,}")
        .replace_all(&trimmed.join("\n"), "\n\n")
        .trim()
        .to_string()
}

/// Append `。` unless the text already ends a sentence.
pub fn ensure_terminal_punctuation(s: &str) -> String {
    let t = s.trim_end();
    match t.chars().last() {
        None => String::new(),
        Some('。' | '！' | '？' | '.' | '!' | '?') => t.to_string(),
        Some(_) => format!("{t}。"),
    }
}

pub fn normalize_title(s: &str) -> String {
    static WS: OnceCell<Regex> = OnceCell::new();
    let one_line = re(&WS, r"\s+").replace_all(s.trim(), " ");
    space_cjk_latin(&rejoin_split_digits(&one_line))
}

pub fn normalize_content(s: &str) -> String {
    let out = rejoin_split_digits(s);
    let out = space_cjk_latin(&out);
    let out = space_after_cjk_punctuation(&out);
    let out = collapse_blank_lines(&out);
    ensure_terminal_punctuation(&out)
}

/// Layout for long-form funding articles: bare URLs become `[链接](url)`,
/// single line breaks become paragraph breaks, and paragraphs over
/// [`MAX_PARAGRAPH_CHARS`] are split at sentence ends.
pub fn format_crunchbase_content(s: &str) -> String {
    static LINK: OnceCell<Regex> = OnceCell::new();
    static BREAKS: OnceCell<Regex> = OnceCell::new();
    if s.trim().is_empty() {
        return String::new();
    }
    let tagged = re(&LINK, r"(\[链接\]\()?(https?://[^\s<>()\[\]]+)").replace_all(s, |c: &Captures| {
        if c.get(1).is_some() {
            c[0].to_string()
        } else {
            format!("[链接]({})", &c[2])
        }
    });
    let spaced = re(&BREAKS, r"\n+").replace_all(&tagged, |c: &Captures| {
        if c[0].len() == 1 {
            "\n\n".to_string()
        } else {
            c[0].to_string()
        }
    });
    spaced
        .split("\n\n")
        .map(split_long_paragraph)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Sentences of `para`, each keeping its terminator. `.`, `!` and `?` only end
/// a sentence before whitespace, so `1.2` and URLs stay whole.
fn sentences(para: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = para.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let end = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |(_, n)| n.is_whitespace()),
            _ => false,
        };
        if end {
            let stop = i + c.len_utf8();
            out.push(&para[start..stop]);
            start = stop;
        }
    }
    if start < para.len() {
        out.push(&para[start..]);
    }
    out
}

fn split_long_paragraph(para: &str) -> String {
    if para.chars().count() <= MAX_PARAGRAPH_CHARS {
        return para.to_string();
    }
    let mut out = String::with_capacity(para.len() + 8);
    let mut chunk_chars = 0;
    for sentence in sentences(para) {
        let n = sentence.chars().count();
        if chunk_chars > 0 && chunk_chars + n > MAX_PARAGRAPH_CHARS {
            out.push_str("\n\n");
            out.push_str(sentence.trim_start());
            chunk_chars = n;
        } else {
            out.push_str(sentence);
            chunk_chars += n;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_between_cjk_and_latin() {
        assert_eq!(space_cjk_latin("发布GPT5模型"), "发布 GPT5 模型");
        assert_eq!(space_cjk_latin("共3家"), "共 3 家");
        assert_eq!(space_cjk_latin("already spaced 中文"), "already spaced 中文");
    }

    #[test]
    fn rejoins_short_digit_runs_only() {
        assert_eq!(rejoin_split_digits("raised 1 234 567 dollars"), "raised 1234567 dollars");
        assert_eq!(rejoin_split_digits("ids 123456 789012"), "ids 123456 789012");
    }

    #[test]
    fn urls_survive_digit_rejoin() {
        let s = "see https://x.com/a/1 2 and 3 4";
        assert_eq!(rejoin_split_digits(s), "see https://x.com/a/1 2 and 34");
    }

    #[test]
    fn blank_lines_collapse() {
        assert_eq!(collapse_blank_lines("a  \n\n\n\nb\n"), "a\n\nb");
    }

    #[test]
    fn terminal_punctuation_added_once() {
        assert_eq!(ensure_terminal_punctuation("你好"), "你好。");
        assert_eq!(ensure_terminal_punctuation("Done!"), "Done!");
        assert_eq!(ensure_terminal_punctuation("好的。 "), "好的。");
        assert_eq!(ensure_terminal_punctuation(""), "");
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate_chars("标题很长", 2), "标题");
    }

    #[test]
    fn full_width_punctuation_gets_a_following_space() {
        assert_eq!(space_after_cjk_punctuation("融资，AI 公司：Acme。"), "融资， AI 公司： Acme。");
        assert_eq!(space_after_cjk_punctuation("第一句。\n第二句"), "第一句。\n第二句");
        assert_eq!(normalize_content("完成融资，由Sequoia领投"), "完成融资， 由 Sequoia 领投。");
    }

    #[test]
    fn crunchbase_links_are_tagged_once() {
        let s = "详情见 https://crunchbase.com/a/b?x=1 以及 [链接](https://acme.ai)";
        assert_eq!(
            format_crunchbase_content(s),
            "详情见 [链接](https://crunchbase.com/a/b?x=1) 以及 [链接](https://acme.ai)"
        );
        assert_eq!(format_crunchbase_content("  "), "");
    }

    #[test]
    fn crunchbase_single_breaks_become_paragraphs() {
        assert_eq!(format_crunchbase_content("一\n二\n\n三"), "一\n\n二\n\n三");
    }

    #[test]
    fn long_crunchbase_paragraphs_split_at_sentence_ends() {
        let sentence = format!("{}。", "融".repeat(99));
        let para = sentence.repeat(4);
        let out = format_crunchbase_content(&para);
        let parts: Vec<&str> = out.split("\n\n").collect();
        assert_eq!(parts, vec![sentence.repeat(3), sentence.clone()]);
        assert!(parts.iter().all(|p| p.chars().count() <= MAX_PARAGRAPH_CHARS));

        let latin = format!("{} Version 1.2 ships.", "a".repeat(295));
        assert_eq!(sentences(&latin).len(), 1);
    }

    #[test]
    fn title_is_single_line() {
        assert_eq!(normalize_title("  OpenAI发布\n GPT-5 "), "OpenAI 发布 GPT-5");
    }
}
