//! Inline visual-prompt directive carried inside advisory replies.
//!
//! ```text
//! directive := "[VISUAL_PROMPT:" body "]"
//! body      := ( "\]" | "\\" | any char except "]" )*
//! ```
//!
//! Every well-formed directive is removed from the displayed text. The first
//! one with a non-blank body supplies the follow-up prompt. An unterminated
//! marker is not a directive: it stays in the text verbatim and everything
//! after it is left alone.

pub const VISUAL_PROMPT_MARKER: &str = "[VISUAL_PROMPT:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub text: String,
    pub visual_prompt: Option<String>,
    pub directives: usize,
    pub malformed: bool,
}

pub fn parse_reply(raw: &str) -> ParsedReply {
    let mut text = String::with_capacity(raw.len());
    let mut visual_prompt: Option<String> = None;
    let mut directives = 0;
    let mut malformed = false;
    let mut rest = raw;

    while let Some(start) = rest.find(VISUAL_PROMPT_MARKER) {
        text.push_str(&rest[..start]);
        let after = &rest[start + VISUAL_PROMPT_MARKER.len()..];
        let Some((body, consumed)) = read_body(after) else {
            malformed = true;
            text.push_str(&rest[start..]);
            rest = "";
            break;
        };
        directives += 1;
        let body = body.trim();
        if visual_prompt.is_none() && !body.is_empty() {
            visual_prompt = Some(body.to_string());
        }
        rest = &after[consumed..];
    }
    text.push_str(rest);

    ParsedReply {
        text: text.trim().to_string(),
        visual_prompt,
        directives,
        malformed,
    }
}

/// Escapes a prompt so it can be embedded in a directive body.
pub fn escape_body(prompt: &str) -> String {
    prompt.replace('\\', "\\\\").replace(']', "\\]")
}

fn read_body(input: &str) -> Option<(String, usize)> {
    let mut body = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, next @ (']' | '\\'))) => body.push(next),
                Some((_, other)) => {
                    body.push('\\');
                    body.push(other);
                }
                None => body.push('\\'),
            },
            ']' => return Some((body, idx + 1)),
            _ => body.push(ch),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{escape_body, parse_reply};

    #[test]
    fn trailing_directive_is_stripped_and_extracted() {
        let parsed = parse_reply("A scarf for the evening. [VISUAL_PROMPT: a red scarf]");
        assert_eq!(parsed.text, "A scarf for the evening.");
        assert_eq!(parsed.visual_prompt.as_deref(), Some("a red scarf"));
        assert_eq!(parsed.directives, 1);
        assert!(!parsed.malformed);
    }

    #[test]
    fn reply_without_directive_is_unchanged() {
        let parsed = parse_reply("  Simply wear it with linen.  ");
        assert_eq!(parsed.text, "Simply wear it with linen.");
        assert_eq!(parsed.visual_prompt, None);
        assert_eq!(parsed.directives, 0);
    }

    #[test]
    fn duplicate_directives_first_wins_and_all_are_stripped() {
        let parsed = parse_reply(
            "[VISUAL_PROMPT: first look] Some advice. [VISUAL_PROMPT: second look]",
        );
        assert_eq!(parsed.text, "Some advice.");
        assert_eq!(parsed.visual_prompt.as_deref(), Some("first look"));
        assert_eq!(parsed.directives, 2);
    }

    #[test]
    fn empty_first_body_defers_to_next() {
        let parsed = parse_reply("Advice [VISUAL_PROMPT:   ] and [VISUAL_PROMPT: moon jar]");
        assert_eq!(parsed.visual_prompt.as_deref(), Some("moon jar"));
        assert_eq!(parsed.text, "Advice  and");
    }

    #[test]
    fn escaped_brackets_stay_in_body() {
        let parsed = parse_reply(r"Look [VISUAL_PROMPT: a frame \[gold\] on \\ linen]");
        assert_eq!(parsed.text, "Look");
        assert_eq!(
            parsed.visual_prompt.as_deref(),
            Some(r"a frame \[gold] on \ linen")
        );
    }

    #[test]
    fn unterminated_marker_is_left_verbatim() {
        let parsed = parse_reply("Advice. [VISUAL_PROMPT: never closed");
        assert_eq!(parsed.text, "Advice. [VISUAL_PROMPT: never closed");
        assert_eq!(parsed.visual_prompt, None);
        assert!(parsed.malformed);
        assert_eq!(parsed.directives, 0);
    }

    #[test]
    fn marker_is_case_sensitive() {
        let parsed = parse_reply("[visual_prompt: lowercase]");
        assert_eq!(parsed.visual_prompt, None);
        assert_eq!(parsed.text, "[visual_prompt: lowercase]");
    }

    #[test]
    fn escaped_prompt_survives_a_round_trip() {
        let prompt = r"silk ] with \ slash";
        let parsed = parse_reply(&format!("x [VISUAL_PROMPT: {}]", escape_body(prompt)));
        assert_eq!(parsed.visual_prompt.as_deref(), Some(prompt));
    }
}
