//! Body reformatting.
//!
//! Translates the internal lightweight markup into the target chat
//! service's dialect. The substitutions run in a fixed order: the
//! later rules operate on already partially transformed text.

use regex::Regex;
use std::result;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot compile body format pattern")]
    CompilePatternError(#[source] regex::Error),
}

pub type Result<T> = result::Result<T, Error>;

pub struct BodyFormatter {
    list_underscore: Regex,
    list_asterisk: Regex,
    italic: Regex,
}

impl BodyFormatter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            list_underscore: Regex::new(r"(^|\n)_ ").map_err(Error::CompilePatternError)?,
            list_asterisk: Regex::new(r"(^|\n)\* ").map_err(Error::CompilePatternError)?,
            // a single asterisk not adjacent to another one
            italic: Regex::new(r"(^|\n|[^*])\*($|\n|[^*])").map_err(Error::CompilePatternError)?,
        })
    }

    /// Reformats a message body. Order matters: list markers first (so
    /// a leading `* ` is not mistaken for emphasis), then single
    /// asterisks to underscores, then `**` to `*` and `~~` to `~`.
    pub fn reformat(&self, text: &str) -> String {
        let text = self.list_underscore.replace_all(text, "${1}- ");
        let text = self.list_asterisk.replace_all(&text, "${1}- ");
        let text = self.italic.replace_all(&text, "${1}_${2}");
        let text = text.replace("**", "*");
        text.replace("~~", "~")
    }
}

/// Lowercases and hyphenates a string into a name usable as a channel
/// directory.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::{slugify, BodyFormatter};

    #[test]
    fn emphasis_becomes_underscore() {
        let formatter = BodyFormatter::new().unwrap();
        assert_eq!(formatter.reformat("*hi*"), "_hi_");
        assert_eq!(formatter.reformat("say *hi* now"), "say _hi_ now");
    }

    #[test]
    fn bold_becomes_single_asterisk() {
        let formatter = BodyFormatter::new().unwrap();
        assert_eq!(formatter.reformat("**hi**"), "*hi*");
    }

    #[test]
    fn strike_becomes_single_tilde() {
        let formatter = BodyFormatter::new().unwrap();
        assert_eq!(formatter.reformat("~~hi~~"), "~hi~");
    }

    #[test]
    fn list_markers_are_normalized() {
        let formatter = BodyFormatter::new().unwrap();
        assert_eq!(formatter.reformat("* item"), "- item");
        assert_eq!(formatter.reformat("intro\n* one\n* two"), "intro\n- one\n- two");
        assert_eq!(formatter.reformat("intro\n_ one"), "intro\n- one");
    }

    #[test]
    fn mixed_markup() {
        let formatter = BodyFormatter::new().unwrap();
        assert_eq!(
            formatter.reformat("**bold** and *emph* and ~~gone~~\n* item"),
            "*bold* and _emph_ and ~gone~\n- item"
        );
    }

    #[test]
    fn slugs_are_lowercase_hyphenated() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("1 x 2"), "1-x-2");
        assert_eq!(slugify("  Trim -- me!  "), "trim-me");
        assert_eq!(slugify(""), "");
    }
}
