use crate::authres::{AuthenticationResults, MethodResult};

/// Options for encoding header values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormatOptions {
    /// The preferred maximum line width.
    pub line_width: usize,
    /// The indentation of continuation lines.
    pub indentation: String,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            line_width: 78,
            indentation: "\t".into(),
        }
    }
}

/// Splits the value into the units that folding tries to keep on one line.
/// Joined with single spaces they give the unfolded form.
pub fn segments(ar: &AuthenticationResults) -> Vec<String> {
    let mut segments = vec![];

    if let Some(instance) = ar.instance {
        push_clause(&mut segments, vec![format!("i={instance}")]);
    }

    if let Some(id) = &ar.authserv_id {
        let mut s = quote_if_needed(id, is_keyword_char);
        if let Some(version) = ar.version {
            s.push(' ');
            s.push_str(&version.to_string());
        }
        push_clause(&mut segments, vec![s]);
    }

    if ar.results.is_empty() {
        push_clause(&mut segments, vec!["none".into()]);
    }

    for (i, result) in ar.results.iter().enumerate() {
        if let Some(id) = &result.office365_authserv_id {
            // at the very start, the id would read back as the authserv-id
            if i > 0 || ar.authserv_id.is_some() {
                push_clause(&mut segments, vec![id.clone()]);
            }
        }
        push_clause(&mut segments, method_result_segments(result));
    }

    segments
}

fn push_clause(segments: &mut Vec<String>, clause: Vec<String>) {
    if let Some(last) = segments.last_mut() {
        last.push(';');
    }
    segments.extend(clause);
}

fn method_result_segments(result: &MethodResult) -> Vec<String> {
    let mut segments = vec![];

    let mut s = result.method.clone();
    if let Some(version) = result.method_version {
        s.push('/');
        s.push_str(&version.to_string());
    }
    s.push('=');
    s.push_str(&result.result);
    segments.push(s);

    if let Some(comment) = &result.result_comment {
        segments.push(format_comment(comment));
    }
    if let Some(reason) = &result.reason {
        segments.push(format!("reason={}", quote_if_needed(reason, is_value_char)));
    }
    if let Some(action) = &result.action {
        segments.push(format!("action={}", quote_if_needed(action, is_value_char)));
    }

    for p in &result.properties {
        segments.push(format!(
            "{}.{}={}",
            p.ptype,
            p.property,
            quote_if_needed(&p.value, is_value_char)
        ));
    }

    segments
}

fn is_keyword_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.?@^_`{|}~".contains(c) || !c.is_ascii()
}

fn is_value_char(c: char) -> bool {
    !(c.is_ascii_whitespace() || c.is_ascii_control() || matches!(c, ';' | '(' | ')' | '"'))
}

fn quote_if_needed(s: &str, is_plain: fn(char) -> bool) -> String {
    if s.chars().all(is_plain) {
        return s.into();
    }

    let mut result = String::with_capacity(s.len() + 2);
    result.push('"');
    for c in s.chars() {
        if matches!(c, '"' | '\\') {
            result.push('\\');
        }
        result.push(c);
    }
    result.push('"');
    result
}

fn format_comment(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 2);
    result.push('(');
    for c in s.chars() {
        if matches!(c, '(' | ')' | '\\') {
            result.push('\\');
        }
        result.push(c);
    }
    result.push(')');
    result
}

pub fn encode(
    ar: &AuthenticationResults,
    options: &FormatOptions,
    out: &mut String,
    start_column: usize,
) {
    let width = options.line_width;
    let indent_len = options.indentation.chars().count();

    let mut column = start_column;

    for (i, segment) in segments(ar).iter().enumerate() {
        let len = segment.chars().count();

        if i == 0 || column + 1 + len <= width {
            out.push(' ');
            column += 1;
        } else {
            out.push_str("\r\n");
            out.push_str(&options.indentation);
            column = indent_len;
        }

        if column + len <= width {
            out.push_str(segment);
            column += len;
        } else {
            column = encode_long_segment(segment, width, out, column);
        }
    }
}

// Breaks a segment that does not fit on a line at its internal spaces. The
// space is kept after the line break, so that unfolding restores the segment.
fn encode_long_segment(segment: &str, width: usize, out: &mut String, mut column: usize) -> usize {
    for (i, word) in segment.split(' ').enumerate() {
        let len = word.chars().count();

        if i > 0 {
            if column + 1 + len <= width {
                out.push(' ');
                column += 1;
            } else {
                out.push_str("\r\n ");
                column = 1;
            }
        }

        out.push_str(word);
        column += len;
    }

    column
}
