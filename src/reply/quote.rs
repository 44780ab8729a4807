//! Quote stripping.
//!
//! Inbound reply bodies usually carry the quoted original below the
//! actual answer. The stripper cuts everything from the first quoted
//! line on, then tidies the edges. The routine is idempotent.

/// Strips quoted reply fragments from a plain-text email body.
///
/// Accumulation stops at the first line starting with `>`. Leading and
/// trailing blank lines are removed. When quoted content was actually
/// cut and the last remaining line ends with `:`, that line is dropped
/// too: it is the "On <date>, <sender> wrote:" preamble most clients
/// put above the quote.
pub fn strip_quoted_reply(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut clean: Vec<&str> = Vec::with_capacity(lines.len());

    for line in &lines {
        if line.starts_with('>') {
            break;
        }
        clean.push(line);
    }
    let had_quote = clean.len() < lines.len();

    trim_blank_edges(&mut clean);

    if had_quote {
        if let Some(last) = clean.last() {
            if last.trim().ends_with(':') {
                clean.pop();
                trim_blank_edges(&mut clean);
            }
        }
    }

    clean.join("\n")
}

fn trim_blank_edges(lines: &mut Vec<&str>) {
    while lines.last().map_or(false, |line| line.trim().is_empty()) {
        lines.pop();
    }
    while lines.first().map_or(false, |line| line.trim().is_empty()) {
        lines.remove(0);
    }
}

#[cfg(test)]
mod tests {
    use super::strip_quoted_reply;

    #[test]
    fn cuts_at_first_quote_line() {
        let text = "Thanks, works for me.\n\nOn Tuesday, Alice wrote:\n> original message\n> more quoted";
        assert_eq!(strip_quoted_reply(text), "Thanks, works for me.");
    }

    #[test]
    fn keeps_unquoted_text_untouched() {
        let text = "Line one\n\nLine two:";
        // the trailing colon stays: nothing quoted was removed
        assert_eq!(strip_quoted_reply(text), "Line one\n\nLine two:");
    }

    #[test]
    fn quote_only_body_becomes_empty() {
        assert_eq!(strip_quoted_reply("> quoted stuff"), "");
        assert_eq!(strip_quoted_reply("\n\n> quoted stuff\n> more"), "");
    }

    #[test]
    fn trims_blank_edges() {
        let text = "\n\n  \nanswer text\n\n> quote\n";
        assert_eq!(strip_quoted_reply(text), "answer text");
    }

    #[test]
    fn is_idempotent() {
        let texts = [
            "Thanks!\n\nOn Tuesday, Alice wrote:\n> quoted",
            "plain answer",
            "> only quotes",
            "\n\nedge case:\n> q",
        ];
        for text in texts {
            let once = strip_quoted_reply(text);
            let twice = strip_quoted_reply(&once);
            assert_eq!(once, twice, "stripping {:?} twice diverged", text);
        }
    }
}
