use crate::authres::{
    lexer::{self, Lexer, Token, TokenKind},
    AuthenticationResults, MethodProperty, MethodResult, ParseError, ParseErrorKind,
};

pub fn parse_authentication_results(
    input: &[u8],
    offset: usize,
    length: usize,
) -> Result<(AuthenticationResults, usize), ParseError> {
    let end = offset.saturating_add(length).min(input.len());
    let offset = offset.min(end);

    let mut lexer = Lexer::new(input, offset, end);
    let mut ar = AuthenticationResults::default();

    let mut token = expect_token(&mut lexer, offset, ParseErrorKind::UnexpectedEnd)?;

    if token.kind == TokenKind::Atom
        && lexer.text(&token).eq_ignore_ascii_case(b"i")
        && matches!(lexer.peek_significant()?, Some(t) if t.is_special(b'='))
    {
        lexer.next_significant()?;
        ar.instance = Some(parse_instance(&mut lexer)?);
        let position = lexer.position();
        token = expect_token(&mut lexer, position, ParseErrorKind::UnexpectedEnd)?;
    }

    // Office 365 omits the authserv-id, the value starts with a method result
    let starts_with_result = token.kind == TokenKind::Atom
        && matches!(
            lexer.peek_significant()?,
            Some(t) if t.is_special(b'=') || t.is_special(b'/')
        );

    if starts_with_result {
        parse_results(&mut lexer, &mut ar, Some(token))?;
    } else {
        let authserv_id = match token.kind {
            TokenKind::Atom | TokenKind::Number => text(&lexer, &token),
            TokenKind::QuotedString => lexer::unquote(lexer.text(&token)),
            _ => {
                return Err(ParseError::new(
                    token.start,
                    token.start,
                    ParseErrorKind::InvalidAuthservId,
                ));
            }
        };
        ar.authserv_id = Some(authserv_id);

        let mut next = lexer.next_significant()?;

        if let Some(t) = next.filter(|t| t.kind == TokenKind::Number) {
            let version = parse_number(&lexer, &t)
                .ok_or_else(|| ParseError::new(t.start, t.start, ParseErrorKind::InvalidVersion))?;
            ar.version = Some(version);
            next = lexer.next_significant()?;
        }

        match next {
            None => {}
            Some(t) if t.is_special(b';') => parse_results(&mut lexer, &mut ar, None)?,
            Some(t) => {
                return Err(ParseError::new(t.start, t.start, ParseErrorKind::ExpectedSemicolon));
            }
        }
    }

    Ok((ar, lexer.position() - offset))
}

fn parse_instance(lexer: &mut Lexer<'_>) -> Result<u32, ParseError> {
    let error = |i| ParseError::new(i, i, ParseErrorKind::InvalidInstance);

    let instance = match lexer.next_significant()? {
        Some(t) if t.kind == TokenKind::Number => match parse_number(lexer, &t) {
            Some(n) if n >= 1 => n,
            _ => return Err(error(t.start)),
        },
        Some(t) => return Err(error(t.start)),
        None => return Err(error(lexer.position())),
    };

    match lexer.next_significant()? {
        Some(t) if t.is_special(b';') => Ok(instance),
        Some(t) => Err(error(t.start)),
        None => Err(error(lexer.position())),
    }
}

fn parse_results(
    lexer: &mut Lexer<'_>,
    ar: &mut AuthenticationResults,
    first: Option<Token>,
) -> Result<(), ParseError> {
    let mut pending = first;
    let mut office365_authserv_id = None;

    loop {
        let token = match pending.take() {
            Some(t) => t,
            None => match lexer.next_significant()? {
                Some(t) => t,
                None => break,
            },
        };

        if token.is_special(b';') {
            continue;
        }

        if token.kind != TokenKind::Atom {
            return Err(ParseError::new(token.start, token.start, ParseErrorKind::ExpectedMethod));
        }

        let next = lexer.peek_significant()?;
        let is_method = matches!(next, Some(t) if t.is_special(b'=') || t.is_special(b'/'));

        if !is_method {
            let name = lexer.text(&token);

            if name.eq_ignore_ascii_case(b"none") {
                if let Some(t) = next {
                    return Err(ParseError::new(t.start, t.start, ParseErrorKind::ContentAfterNone));
                }
                if !ar.results.is_empty() || office365_authserv_id.is_some() {
                    return Err(ParseError::new(
                        token.start,
                        token.start,
                        ParseErrorKind::ContentAfterNone,
                    ));
                }
                break;
            }

            // a bare token between two results belongs to the following one
            match next {
                Some(t) if t.is_special(b';') => {
                    office365_authserv_id = Some(text(lexer, &token));
                    lexer.next_significant()?;
                    continue;
                }
                Some(t) => {
                    return Err(ParseError::new(token.start, t.start, ParseErrorKind::ExpectedEquals));
                }
                None => {
                    return Err(ParseError::new(
                        token.start,
                        lexer.position(),
                        ParseErrorKind::ExpectedEquals,
                    ));
                }
            }
        }

        let mut result = parse_method_result(lexer, &token)?;
        result.office365_authserv_id = office365_authserv_id.take();
        ar.results.push(result);
    }

    Ok(())
}

fn parse_method_result(lexer: &mut Lexer<'_>, method: &Token) -> Result<MethodResult, ParseError> {
    let mut result = MethodResult::new(text(lexer, method), "");

    let mut t = expect_token(lexer, method.start, ParseErrorKind::ExpectedEquals)?;

    if t.is_special(b'/') {
        match lexer.next_significant()? {
            Some(v) if v.kind == TokenKind::Number => {
                let version = parse_number(lexer, &v).ok_or_else(|| {
                    ParseError::new(v.start, v.start, ParseErrorKind::InvalidVersion)
                })?;
                result.method_version = Some(version);
            }
            Some(v) => {
                return Err(ParseError::new(v.start, v.start, ParseErrorKind::InvalidVersion));
            }
            None => {
                let i = lexer.position();
                return Err(ParseError::new(i, i, ParseErrorKind::InvalidVersion));
            }
        }
        t = expect_token(lexer, method.start, ParseErrorKind::ExpectedEquals)?;
    }

    if !t.is_special(b'=') {
        return Err(ParseError::new(method.start, t.start, ParseErrorKind::ExpectedEquals));
    }

    match lexer.next_significant()? {
        Some(r) if matches!(r.kind, TokenKind::Atom | TokenKind::Number) => {
            result.result = text(lexer, &r);
        }
        Some(r) => return Err(ParseError::new(r.start, r.start, ParseErrorKind::ExpectedResult)),
        None => {
            let i = lexer.position();
            return Err(ParseError::new(i, i, ParseErrorKind::ExpectedResult));
        }
    }

    while let Some(t) = lexer.next_token()? {
        match t.kind {
            TokenKind::Comment => {
                let first = result.result_comment.is_none()
                    && result.reason.is_none()
                    && result.action.is_none()
                    && result.properties.is_empty();
                if first {
                    result.result_comment = Some(lexer::unquote(lexer.text(&t)));
                }
            }
            TokenKind::Special(b';') => break,
            TokenKind::Atom => {
                match lexer.next_significant()? {
                    Some(e) if e.is_special(b'=') => {}
                    Some(e) => {
                        return Err(ParseError::new(t.start, e.start, ParseErrorKind::ExpectedEquals));
                    }
                    None => {
                        return Err(ParseError::new(
                            t.start,
                            lexer.position(),
                            ParseErrorKind::ExpectedEquals,
                        ));
                    }
                }

                let value = parse_value(lexer)?;

                let key = text(lexer, &t);

                if key.eq_ignore_ascii_case("reason") {
                    result.reason = Some(value);
                } else if key.eq_ignore_ascii_case("action") {
                    result.action = Some(value);
                } else {
                    match key.split_once('.') {
                        Some((ptype, property)) if !ptype.is_empty() && !property.is_empty() => {
                            result.properties.push(MethodProperty::new(ptype, property, value));
                        }
                        _ => {
                            return Err(ParseError::new(
                                t.start,
                                t.start,
                                ParseErrorKind::InvalidPropertyKey,
                            ));
                        }
                    }
                }
            }
            _ => {
                return Err(ParseError::new(t.start, t.start, ParseErrorKind::ExpectedSemicolon));
            }
        }
    }

    Ok(result)
}

// Property values may be empty; nothing is consumed then.
fn parse_value(lexer: &mut Lexer<'_>) -> Result<String, ParseError> {
    loop {
        let mut lookahead = lexer.clone();
        match lookahead.next_value_token()? {
            Some(t) if t.kind == TokenKind::Comment => *lexer = lookahead,
            Some(t) if t.kind == TokenKind::QuotedString => {
                *lexer = lookahead;
                return Ok(lexer::unquote(lexer.text(&t)));
            }
            Some(t) if t.kind == TokenKind::Atom => {
                *lexer = lookahead;
                return Ok(text(lexer, &t));
            }
            _ => return Ok(String::new()),
        }
    }
}

fn expect_token(
    lexer: &mut Lexer<'_>,
    token_index: usize,
    kind: ParseErrorKind,
) -> Result<Token, ParseError> {
    lexer
        .next_significant()?
        .ok_or_else(|| ParseError::new(token_index, lexer.position(), kind))
}

fn parse_number(lexer: &Lexer<'_>, token: &Token) -> Option<u32> {
    std::str::from_utf8(lexer.text(token)).ok()?.parse().ok()
}

fn text(lexer: &Lexer<'_>, token: &Token) -> String {
    String::from_utf8_lossy(lexer.text(token)).into_owned()
}
