//! Output shaping for tool results
//!
//! Bounds the size of the text handed back to the caller and masks anything
//! that looks like one of our API keys.

use regex::NoExpand;

use crate::auth::{api_key_regex, API_KEY_PREFIX};

const TRUNCATION_NOTICE: &str = "\n[output truncated]";
const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy)]
pub struct OutputShaper {
    max_bytes: usize,
}

impl OutputShaper {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(1),
        }
    }

    /// Scrub `body` and `footer`, then fit both into the byte bound.
    ///
    /// The footer is kept whole whenever it fits; the body is cut first.
    pub fn shape(&self, body: &str, footer: &str) -> String {
        let footer = scrub_api_keys(footer);
        if footer.len() >= self.max_bytes {
            return truncate(footer, self.max_bytes);
        }

        let mut out = truncate(scrub_api_keys(body), self.max_bytes - footer.len());
        out.push_str(&footer);
        out
    }
}

fn scrub_api_keys(text: &str) -> String {
    let replacement = format!("{}{}", API_KEY_PREFIX, REDACTED);
    api_key_regex()
        .replace_all(text, NoExpand(&replacement))
        .into_owned()
}

fn truncate(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let notice = if max_bytes > TRUNCATION_NOTICE.len() {
        TRUNCATION_NOTICE
    } else {
        ""
    };
    let mut cut = max_bytes - notice.len();
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(notice);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_unchanged() {
        let shaper = OutputShaper::new(1024);
        assert_eq!(shaper.shape("USD: 3.9432 PLN\n", "Tokens charged: 1."), "USD: 3.9432 PLN\nTokens charged: 1.");
    }

    #[test]
    fn test_truncation_respects_limit_and_char_boundaries() {
        let shaper = OutputShaper::new(40);
        let shaped = shaper.shape(&"złoty ".repeat(50), "");
        assert!(shaped.len() <= 40);
        assert!(shaped.ends_with(TRUNCATION_NOTICE));
    }

    #[test]
    fn test_footer_survives_truncation() {
        let footer = "Tokens charged: 1. Remaining balance: 4.";
        let shaper = OutputShaper::new(100);
        let shaped = shaper.shape(&"- 2024-01-02: 255.38 PLN\n".repeat(50), footer);
        assert!(shaped.len() <= 100);
        assert!(shaped.ends_with(footer));
        assert!(shaped.contains(TRUNCATION_NOTICE));
    }

    #[test]
    fn test_tiny_bound_still_holds() {
        let shaper = OutputShaper::new(10);
        let shaped = shaper.shape("some body text", "a longer footer line");
        assert_eq!(shaped.len(), 10);
    }

    #[test]
    fn test_api_keys_are_masked() {
        let shaper = OutputShaper::new(1024);
        let key = format!("{}{}", API_KEY_PREFIX, "0123456789abcdef0123456789abcdef");
        let shaped = shaper.shape(&format!("key={} end", key), "");
        assert_eq!(shaped, "key=nbp_[REDACTED] end");

        // too short to be a key
        assert_eq!(shaper.shape("nbp_rates", ""), "nbp_rates");
    }
}
