//! Tokenizer for structured header values.
//!
//! The lexer works on a byte range of its input and reports absolute byte
//! offsets, so that errors can point into the original buffer.

use crate::authres::{ParseError, ParseErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    /// A run of keyword characters that is not all digits.
    Atom,
    /// A run of ASCII digits.
    Number,
    /// A quoted string, including the quotes.
    QuotedString,
    /// A comment, including the parentheses.
    Comment,
    /// A single special character such as `;`, `=`, or `/`.
    Special(u8),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    pub fn is_special(&self, c: u8) -> bool {
        self.kind == TokenKind::Special(c)
    }
}

#[derive(Clone)]
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a [u8], start: usize, end: usize) -> Self {
        Self { input, pos: start, end }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn text(&self, token: &Token) -> &'a [u8] {
        &self.input[token.start..token.end]
    }

    pub fn skip_whitespace(&mut self) {
        while self.pos < self.end && is_space(self.input[self.pos]) {
            self.pos += 1;
        }
    }

    /// Returns the next token in keyword mode, where `=`, `/`, and the other
    /// specials terminate atoms.
    pub fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
        self.skip_whitespace();

        let start = self.pos;
        let Some(&b) = self.input[..self.end].get(start) else {
            return Ok(None);
        };

        match b {
            b'(' => self.read_comment().map(Some),
            b'"' => self.read_quoted_string().map(Some),
            b if is_keyword_char(b) => {
                while self.pos < self.end && is_keyword_char(self.input[self.pos]) {
                    self.pos += 1;
                }
                let kind = if self.input[start..self.pos].iter().all(u8::is_ascii_digit) {
                    TokenKind::Number
                } else {
                    TokenKind::Atom
                };
                Ok(Some(Token { kind, start, end: self.pos }))
            }
            b => {
                self.pos += 1;
                Ok(Some(Token { kind: TokenKind::Special(b), start, end: self.pos }))
            }
        }
    }

    /// Returns the next token in value mode, where an atom extends to the next
    /// whitespace, `;`, or parenthesis.
    pub fn next_value_token(&mut self) -> Result<Option<Token>, ParseError> {
        self.skip_whitespace();

        let start = self.pos;
        let Some(&b) = self.input[..self.end].get(start) else {
            return Ok(None);
        };

        match b {
            b'(' | b'"' | b';' | b')' => self.next_token(),
            _ => {
                while self.pos < self.end && is_value_char(self.input[self.pos]) {
                    self.pos += 1;
                }
                Ok(Some(Token { kind: TokenKind::Atom, start, end: self.pos }))
            }
        }
    }

    /// Returns the next token that is not a comment.
    pub fn next_significant(&mut self) -> Result<Option<Token>, ParseError> {
        loop {
            match self.next_token()? {
                Some(t) if t.kind == TokenKind::Comment => continue,
                t => return Ok(t),
            }
        }
    }

    /// Looks ahead at the next token that is not a comment, without consuming
    /// anything.
    pub fn peek_significant(&self) -> Result<Option<Token>, ParseError> {
        self.clone().next_significant()
    }

    fn read_comment(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        let mut depth = 0usize;

        while self.pos < self.end {
            match self.input[self.pos] {
                b'\\' => self.pos += 1,
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += 1;
                        return Ok(Token { kind: TokenKind::Comment, start, end: self.pos });
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }

        self.pos = self.end;

        Err(ParseError::new(start, self.end, ParseErrorKind::UnterminatedComment))
    }

    fn read_quoted_string(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        self.pos += 1;

        while self.pos < self.end {
            match self.input[self.pos] {
                b'\\' => self.pos += 1,
                b'"' => {
                    self.pos += 1;
                    return Ok(Token { kind: TokenKind::QuotedString, start, end: self.pos });
                }
                _ => {}
            }
            self.pos += 1;
        }

        self.pos = self.end;

        Err(ParseError::new(start, self.end, ParseErrorKind::UnterminatedQuotedString))
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn is_keyword_char(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'?' | b'@'
            | b'^' | b'_' | b'`' | b'{' | b'|' | b'}' | b'~'
        )
        || !b.is_ascii()
}

fn is_value_char(b: u8) -> bool {
    !(is_space(b) || b.is_ascii_control() || matches!(b, b';' | b'(' | b')' | b'"'))
}

/// Returns the content of a quoted string or comment token, with the
/// delimiters and line breaks removed and quoted pairs resolved.
pub fn unquote(text: &[u8]) -> String {
    let inner = match text {
        [_, inner @ .., _] => inner,
        _ => &[],
    };

    let mut result = Vec::with_capacity(inner.len());
    let mut escaped = false;

    for &b in inner {
        if escaped {
            result.push(b);
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if !matches!(b, b'\r' | b'\n') {
            result.push(b);
        }
    }

    String::from_utf8_lossy(&result).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(s: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(s.as_bytes(), 0, s.len());
        let mut kinds = vec![];
        while let Some(t) = lexer.next_token().unwrap() {
            kinds.push(t.kind);
        }
        kinds
    }

    #[test]
    fn lexer_token_kinds() {
        assert_eq!(
            kinds("i=1; mx.example.org (x (y)) \"q\\\"s\"/"),
            [
                TokenKind::Atom,
                TokenKind::Special(b'='),
                TokenKind::Number,
                TokenKind::Special(b';'),
                TokenKind::Atom,
                TokenKind::Comment,
                TokenKind::QuotedString,
                TokenKind::Special(b'/'),
            ]
        );
    }

    #[test]
    fn lexer_value_mode() {
        let s = "header.b=ab+/c= ;";
        let mut lexer = Lexer::new(s.as_bytes(), 9, s.len());

        let t = lexer.next_value_token().unwrap().unwrap();
        assert_eq!(lexer.text(&t), b"ab+/c=");

        let t = lexer.next_value_token().unwrap().unwrap();
        assert!(t.is_special(b';'));
    }

    #[test]
    fn lexer_unterminated() {
        let s = "a (b (c) d";
        let mut lexer = Lexer::new(s.as_bytes(), 0, s.len());
        lexer.next_token().unwrap();
        let error = lexer.next_token().unwrap_err();
        assert_eq!((error.token_index, error.error_index), (2, 10));

        let s = "\"abc";
        let mut lexer = Lexer::new(s.as_bytes(), 0, s.len());
        let error = lexer.next_token().unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::UnterminatedQuotedString);
    }

    #[test]
    fn unquote_ok() {
        assert_eq!(unquote(b"\"a\\\"b\r\n c\""), "a\"b c");
        assert_eq!(unquote(b"(x (y))"), "x (y)");
    }
}
