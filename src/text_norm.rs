//! CJK-aware whitespace and quote normalization for transcript text.
//!
//! Ported from `detect_language_ratio` / `smart_clean_spaces` /
//! `clean_unbalanced_or_extra_quotes` in
//! `core/websocket_handler.py`. The original is regex-driven Python;
//! this keeps the same decision structure but walks chars directly
//! where a single pass is simpler than building several regexes.

use regex::Regex;
use std::sync::OnceLock;

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

fn is_ascii_letter(c: char) -> bool {
    c.is_ascii_alphabetic()
}

/// `(chinese_ratio, english_ratio)` over the total character count.
/// Empty input returns `(0.0, 0.0)`.
pub fn detect_language_ratio(text: &str) -> (f64, f64) {
    let total = text.chars().count();
    if total == 0 {
        return (0.0, 0.0);
    }
    let chinese = text.chars().filter(|c| is_cjk(*c)).count();
    let english = text.chars().filter(|c| is_ascii_letter(*c)).count();
    (chinese as f64 / total as f64, english as f64 / total as f64)
}

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn two_plus_spaces() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").unwrap())
}

const CJK_PUNCTUATION: &[char] = &['，', '。', '！', '？', '、', '；', '：'];

/// Collapse whitespace the way the original does, treating CJK and
/// Latin scripts differently so "word word" stays spaced while
/// "字 字" collapses to "字字".
pub fn smart_clean_spaces(text: &str) -> String {
    let (ch_ratio, en_ratio) = detect_language_ratio(text);

    if en_ratio >= 0.6 && ch_ratio < 0.2 {
        return text.to_string();
    }

    let collapsed = whitespace_run().replace_all(text, " ").to_string();
    let chars: Vec<char> = collapsed.chars().collect();
    let mut out = String::with_capacity(collapsed.len());

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ' ' {
            let prev = out.chars().last();
            let next = chars.get(i + 1).copied();

            let drop_between_cjk = matches!((prev, next), (Some(p), Some(n)) if is_cjk(p) && is_cjk(n));
            let drop_digit_cjk = matches!((prev, next), (Some(p), Some(n))
                if (p.is_ascii_digit() && is_cjk(n)) || (is_cjk(p) && n.is_ascii_digit()));
            let drop_cjk_ascii_letter = ch_ratio >= 0.6
                && matches!((prev, next), (Some(p), Some(n))
                    if (is_cjk(p) && is_ascii_letter(n)) || (is_ascii_letter(p) && is_cjk(n)));
            let drop_around_cjk_punct = matches!((prev, next), (Some(p), _) if CJK_PUNCTUATION.contains(&p))
                || matches!((_, next), (_, Some(n)) if CJK_PUNCTUATION.contains(&n));

            if drop_between_cjk || drop_digit_cjk || drop_cjk_ascii_letter || drop_around_cjk_punct {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    out.trim().to_string()
}

/// Strip stray/escaped double quotes while preserving CJK curly quotes,
/// then collapse the whitespace the removal leaves behind.
pub fn clean_unbalanced_or_extra_quotes(text: &str) -> String {
    let without_escaped = text.replace("\\\"", "");
    let without_straight: String = without_escaped.chars().filter(|c| *c != '"').collect();
    let collapsed = two_plus_spaces().replace_all(&without_straight, " ");
    collapsed.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_mostly_text_passes_through() {
        let input = "hello   world, this is fine";
        assert_eq!(smart_clean_spaces(input), input);
    }

    #[test]
    fn collapses_space_between_cjk_chars() {
        assert_eq!(smart_clean_spaces("你 好"), "你好");
    }

    #[test]
    fn collapses_space_between_digit_and_cjk() {
        assert_eq!(smart_clean_spaces("3 点钟"), "3点钟");
    }

    #[test]
    fn strips_cjk_ascii_space_when_mostly_chinese() {
        let input = "这是 test 文本";
        let out = smart_clean_spaces(input);
        assert!(!out.contains("是 test"));
    }

    #[test]
    fn is_idempotent() {
        let input = "你 好 world   foo";
        let once = smart_clean_spaces(input);
        let twice = smart_clean_spaces(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn quote_cleanup_preserves_cjk_curly_quotes() {
        let input = r#"he said \"hi\" and "bye" but kept “这是”"#;
        let out = clean_unbalanced_or_extra_quotes(input);
        assert!(!out.contains('"'));
        assert!(out.contains('“') && out.contains('”'));
    }

    #[test]
    fn quote_cleanup_collapses_resulting_double_spaces() {
        let out = clean_unbalanced_or_extra_quotes(r#"a "b" c"#);
        assert_eq!(out, "a b c");
    }
}
