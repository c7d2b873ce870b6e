//! Tag-list parsing, as used in signature headers and key records.
//!
//! The grammar is that of RFC 6376, section 3.2, with erratum 5070 applied to
//! tag values. Parsed tags remember where their value sits in the input, so
//! that the *b=* tag of a signature header can be blanked out before
//! verification.

use crate::util::{self, Base64Error};
use std::{collections::HashSet, ops::Range};

/// A `name=value` pair in a tag list.
#[derive(Debug, PartialEq, Eq)]
pub struct Tag<'a> {
    pub name: &'a str,
    pub value: &'a str,
    /// Byte range from just after the `=` up to the terminating `;` or the
    /// end of input. Surrounding whitespace is included.
    pub span: Range<usize>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TagListParseError {
    DuplicateTag,
    Syntax,
}

#[derive(Debug, PartialEq, Eq)]
pub struct TagList<'a>(Vec<Tag<'a>>);

impl<'a> TagList<'a> {
    pub fn parse(input: &'a str) -> Result<Self, TagListParseError> {
        let mut cursor = Cursor::new(input);

        let mut tags = vec![cursor.tag().ok_or(TagListParseError::Syntax)?];

        while cursor.eat(';') {
            let mark = cursor.pos;
            match cursor.tag() {
                Some(tag) => tags.push(tag),
                None => {
                    // trailing semicolon
                    cursor.pos = mark;
                    cursor.skip_fws();
                    break;
                }
            }
        }

        if !cursor.at_end() {
            return Err(TagListParseError::Syntax);
        }

        let mut names = HashSet::new();
        if !tags.iter().all(|tag| names.insert(tag.name)) {
            return Err(TagListParseError::DuplicateTag);
        }

        Ok(Self(tags))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag<'a>> {
        self.0.iter()
    }

    pub fn find(&self, name: &str) -> Option<&Tag<'a>> {
        self.0.iter().find(|t| t.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.find(name).map(|t| t.value)
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos == self.input.len()
    }

    fn eat(&mut self, c: char) -> bool {
        let found = self.rest().starts_with(c);
        if found {
            self.pos += c.len_utf8();
        }
        found
    }

    fn eat_while(&mut self, pred: fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let len = rest.find(|c| !pred(c)).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    // FWS = [*WSP CRLF] 1*WSP, repeated
    fn skip_fws(&mut self) -> bool {
        let start = self.pos;

        loop {
            let mark = self.pos;

            self.eat_while(is_wsp);

            let before_crlf = self.pos;
            if self.rest().starts_with("\r\n") {
                self.pos += 2;
                if self.eat_while(is_wsp).is_empty() {
                    self.pos = before_crlf;
                    break;
                }
            }

            if self.pos == mark {
                break;
            }
        }

        self.pos > start
    }

    // tag-spec = [FWS] tag-name [FWS] "=" [FWS] tag-value [FWS]
    fn tag(&mut self) -> Option<Tag<'a>> {
        self.skip_fws();
        let name = self.tag_name()?;
        self.skip_fws();

        if !self.eat('=') {
            return None;
        }

        let value_start = self.pos;
        self.skip_fws();
        let value = self.tag_value();
        self.skip_fws();

        Some(Tag {
            name,
            value,
            span: value_start..self.pos,
        })
    }

    // tag-name = ALPHA *ALNUMPUNC
    fn tag_name(&mut self) -> Option<&'a str> {
        let start = self.pos;
        if !self.rest().starts_with(|c: char| c.is_ascii_alphabetic()) {
            return None;
        }
        self.eat_while(|c| c.is_ascii_alphanumeric() || c == '_');
        Some(&self.input[start..self.pos])
    }

    // tag-value = [ tval *( 1*(WSP / FWS) tval ) ]
    fn tag_value(&mut self) -> &'a str {
        let start = self.pos;
        let mut end = start;

        if !self.eat_while(is_tval_char).is_empty() {
            end = self.pos;
            while self.skip_fws() && !self.eat_while(is_tval_char).is_empty() {
                end = self.pos;
            }
        }

        self.pos = end;
        &self.input[start..end]
    }
}

fn is_wsp(c: char) -> bool {
    matches!(c, ' ' | '\t')
}

fn is_fws_char(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

pub fn is_tag_name(s: &str) -> bool {
    let mut cursor = Cursor::new(s);
    cursor.tag_name().is_some() && cursor.at_end()
}

pub fn is_tag_value(s: &str) -> bool {
    let mut cursor = Cursor::new(s);
    cursor.tag_value();
    cursor.at_end()
}

pub fn is_tval_char(c: char) -> bool {
    // printable ASCII w/o ; or non-ASCII UTF-8
    matches!(c, '!'..=':' | '<'..='~') || !c.is_ascii()
}

pub fn parse_colon_separated_tag_value(value: &str) -> Vec<&str> {
    debug_assert!(is_tag_value(value));

    value.split(':').map(|s| s.trim_matches(is_fws_char)).collect()
}

/// Removes all folding whitespace from a tag value.
pub fn strip_fws_from_tag_value(value: &str) -> String {
    value.chars().filter(|&c| !is_fws_char(c)).collect()
}

pub fn parse_base64_tag_value(value: &str) -> Result<Vec<u8>, Base64Error> {
    debug_assert!(is_tag_value(value));

    util::decode_base64(&strip_fws_from_tag_value(value))
}
