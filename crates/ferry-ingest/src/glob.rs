//! Minimal glob matching for role-relative paths
//!
//! `*` matches within one segment, `**` spans any number of segments, `?` is a
//! single non-separator character. Everything else is literal. Patterns are
//! compiled to an anchored regex once and matched against `/`-joined relative
//! paths.

use ferry_common::{FerryError, Result};
use regex::Regex;

#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim_start_matches("./");
        let regex = Regex::new(&glob_to_regex(pattern))
            .map_err(|e| FerryError::validation(format!("Invalid glob '{pattern}': {e}")))?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, relative: &str) -> bool {
        self.regex.is_match(relative)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            },
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }

    out.push('$');
    out
}
