use crate::config::{DISCORD_EMBED_LIMIT, DISCORD_TITLE_LIMIT};
use crate::quota::QuotaStatus;

const ELLIPSIS: &str = "...";

/// Cuts `input` to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_chars(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    let mut out: String = input.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

pub fn embed_title(input: &str) -> String {
    let title = input.trim();
    if title.is_empty() {
        return "(no prompt)".to_string();
    }
    truncate_chars(title, DISCORD_TITLE_LIMIT)
}

pub fn embed_description(input: &str) -> String {
    let description = input.trim();
    if description.is_empty() {
        return "*The model returned an empty message.*".to_string();
    }
    truncate_chars(description, DISCORD_EMBED_LIMIT)
}

/// Label of the disabled button showing what is left of a user's quota.
pub fn remaining_label(status: &QuotaStatus) -> String {
    let noun = if status.limit == 1 { "request" } else { "requests" };
    format!("{}/{} {} remaining", status.remaining(), status.limit, noun)
}

pub fn model_footer(model: &str) -> String {
    format!(
        "Reply powered by {}. Not affiliated with OpenAI.",
        model.to_uppercase()
    )
}

/// Discord timestamp markup rendered in the reader's local time.
pub fn discord_time(timestamp: i64) -> String {
    format!("<t:{}:t>", timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_left_alone() {
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(embed_title("  hi  "), "hi");
    }

    #[test]
    fn long_text_is_cut_on_char_boundaries() {
        let input = "é".repeat(300);
        let title = embed_title(&input);
        assert_eq!(title.chars().count(), DISCORD_TITLE_LIMIT);
        assert!(title.ends_with("..."));

        let description = embed_description(&"a".repeat(5000));
        assert_eq!(description.chars().count(), DISCORD_EMBED_LIMIT);
    }

    #[test]
    fn empty_text_gets_placeholder() {
        assert_eq!(embed_title("   "), "(no prompt)");
        assert!(embed_description("").contains("empty"));
    }

    #[test]
    fn remaining_label_pluralizes() {
        let status = QuotaStatus {
            used: 1,
            limit: 20,
            retry_at: None,
        };
        assert_eq!(remaining_label(&status), "19/20 requests remaining");

        let status = QuotaStatus {
            used: 1,
            limit: 1,
            retry_at: None,
        };
        assert_eq!(remaining_label(&status), "0/1 request remaining");
    }

    #[test]
    fn footer_names_model() {
        assert_eq!(
            model_footer("gpt-4o"),
            "Reply powered by GPT-4O. Not affiliated with OpenAI."
        );
    }
}
