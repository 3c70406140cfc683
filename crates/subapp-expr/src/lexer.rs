//! Tokenizer for binding expressions.

use crate::parser::{ParseError, ParseErrorCode, ParseResult};

/// Multi-character operators first so the longest match wins.
const OPERATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "+", "-", "*", "/", "%", "!", "?",
    ":", ".", ",", "(", ")", "[", "]", "{", "}",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) offset: usize,
}

pub(crate) fn tokenize(source: &str) -> ParseResult<Vec<Token>> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos];
        if ch.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let starts_fraction = ch == b'.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit);
        if ch.is_ascii_digit() || starts_fraction {
            let (value, end) = read_number(source, pos)?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                offset: pos,
            });
            pos = end;
            continue;
        }

        if ch == b'\'' || ch == b'"' {
            let (value, end) = read_string(source, pos)?;
            tokens.push(Token {
                kind: TokenKind::Str(value),
                offset: pos,
            });
            pos = end;
            continue;
        }

        if is_ident_start(ch) {
            let end = bytes[pos..]
                .iter()
                .position(|&b| !is_ident_part(b))
                .map_or(bytes.len(), |n| pos + n);
            tokens.push(Token {
                kind: TokenKind::Ident(source[pos..end].to_string()),
                offset: pos,
            });
            pos = end;
            continue;
        }

        let rest = &source[pos..];
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                tokens.push(Token {
                    kind: TokenKind::Op(*op),
                    offset: pos,
                });
                pos += op.len();
            }
            None => {
                let found = rest.chars().next().unwrap_or('?');
                return Err(ParseError::new(
                    ParseErrorCode::UnexpectedCharacter,
                    format!("unexpected character '{found}'"),
                    source,
                    pos,
                ));
            }
        }
    }

    Ok(tokens)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_part(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn read_number(source: &str, start: usize) -> ParseResult<(f64, usize)> {
    let bytes = source.as_bytes();
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            end = exp;
        } else {
            return Err(ParseError::new(
                ParseErrorCode::InvalidNumber,
                "invalid exponent",
                source,
                start,
            ));
        }
    }
    let text = &source[start..end];
    text.parse::<f64>().map(|n| (n, end)).map_err(|_| {
        ParseError::new(
            ParseErrorCode::InvalidNumber,
            format!("invalid number '{text}'"),
            source,
            start,
        )
    })
}

fn read_string(source: &str, start: usize) -> ParseResult<(String, usize)> {
    let mut chars = source[start..].char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => {
            return Err(ParseError::new(
                ParseErrorCode::UnterminatedString,
                "unterminated string",
                source,
                start,
            ));
        }
    };
    let mut out = String::new();

    while let Some((i, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, start + i + c.len_utf8())),
            '\\' => {
                let Some((j, escaped)) = chars.next() else {
                    break;
                };
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'v' => out.push('\u{b}'),
                    'u' => {
                        let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                        let decoded = (hex.len() == 4)
                            .then(|| u32::from_str_radix(&hex, 16).ok())
                            .flatten()
                            .and_then(char::from_u32);
                        match decoded {
                            Some(c) => out.push(c),
                            None => {
                                return Err(ParseError::new(
                                    ParseErrorCode::InvalidEscape,
                                    format!("invalid unicode escape '\\u{hex}'"),
                                    source,
                                    start + j,
                                ));
                            }
                        }
                    }
                    other => out.push(other),
                }
            }
            other => out.push(other),
        }
    }

    Err(ParseError::new(
        ParseErrorCode::UnterminatedString,
        "unterminated string",
        source,
        start,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn operators_use_longest_match() {
        assert_eq!(
            kinds("a !== b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Op("!=="),
                TokenKind::Ident("b".into()),
            ]
        );
        assert_eq!(kinds("<="), vec![TokenKind::Op("<=")]);
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("42"), vec![TokenKind::Number(42.0)]);
        assert_eq!(kinds(".5"), vec![TokenKind::Number(0.5)]);
        assert_eq!(kinds("1e3"), vec![TokenKind::Number(1000.0)]);
        assert_eq!(kinds("2.5E-1"), vec![TokenKind::Number(0.25)]);
    }

    #[test]
    fn member_dot_is_not_a_number() {
        assert_eq!(
            kinds("a.b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Op("."),
                TokenKind::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nb" 'A'"#),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("a\nb".into()),
                TokenKind::Str("A".into()),
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_offset() {
        let err = tokenize("a + 'oops").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnterminatedString);
        assert_eq!(err.offset, 4);
    }

    #[test]
    fn bad_exponent() {
        let err = tokenize("1e+").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::InvalidNumber);
    }

    #[test]
    fn stray_character() {
        let err = tokenize("a # b").unwrap_err();
        assert_eq!(err.code, ParseErrorCode::UnexpectedCharacter);
        assert_eq!(err.offset, 2);
    }
}
