//! Branch and tag ref patterns.
//!
//! Deliberately not a regex engine. Patterns support literals, `*` (any run
//! of characters except `/`), `**` (anything), and the numeric class `[0-9]`
//! with an optional `+` repeat. That is enough to express version-tag rules
//! like `v[0-9]+.[0-9]+.[0-9]+` while keeping matching total and predictable
//! on author-controlled input.

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    /// `*`: any run of non-`/` characters, possibly empty.
    Star,
    /// `**`: any run of characters, possibly empty.
    DoubleStar,
    /// `[0-9]`: exactly one digit.
    Digit,
    /// `[0-9]+`: one or more digits.
    DigitRun,
}

/// A compiled ref pattern. Matching is anchored: the whole ref must match.
#[derive(Debug, Clone)]
pub struct RefPattern {
    source: String,
    tokens: Vec<Token>,
}

impl RefPattern {
    /// Compile a pattern, rejecting malformed syntax at configuration time.
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        tokens.push(Token::DoubleStar);
                    } else {
                        tokens.push(Token::Star);
                    }
                }
                '[' => {
                    let mut body = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(c) => body.push(c),
                            None => return Err(invalid("unclosed character class")),
                        }
                    }
                    if body != "0-9" {
                        return Err(invalid("only the [0-9] class is supported"));
                    }
                    if chars.peek() == Some(&'+') {
                        chars.next();
                        tokens.push(Token::DigitRun);
                    } else {
                        tokens.push(Token::Digit);
                    }
                }
                c => tokens.push(Token::Literal(c)),
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    /// The original pattern text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the whole of `text` matches the pattern.
    pub fn matches(&self, text: &str) -> bool {
        let chars: Vec<char> = text.chars().collect();
        match_at(&self.tokens, &chars)
    }
}

fn match_at(tokens: &[Token], text: &[char]) -> bool {
    let Some((first, rest)) = tokens.split_first() else {
        return text.is_empty();
    };

    match first {
        Token::Literal(c) => text.first() == Some(c) && match_at(rest, &text[1..]),
        Token::Digit => text.first().is_some_and(|c| c.is_ascii_digit()) && match_at(rest, &text[1..]),
        Token::DigitRun => {
            // Consume at least one digit, then backtrack over the run length.
            let run = text.iter().take_while(|c| c.is_ascii_digit()).count();
            (1..=run).any(|n| match_at(rest, &text[n..]))
        }
        Token::Star => {
            let run = text.iter().take_while(|&&c| c != '/').count();
            (0..=run).any(|n| match_at(rest, &text[n..]))
        }
        Token::DoubleStar => (0..=text.len()).any(|n| match_at(rest, &text[n..])),
    }
}
