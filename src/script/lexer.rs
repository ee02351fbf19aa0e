//! Tokenizer for inline bindings

use crate::error::{NullsError, Result};

/// Multi-character punctuators first so the longest match wins
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "(", ")", "[", "]", "{", "}", ",",
    ".", ":", ";", "?", "!", "<", ">", "+", "-", "*", "/", "%", "=",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub pos: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < src.len() {
        let rest = &src[i..];
        let c = rest.chars().next().unwrap_or(' ');

        if c.is_whitespace() {
            i += c.len_utf8();
            continue;
        }
        if rest.starts_with("//") {
            i += rest.find('\n').unwrap_or(rest.len());
            continue;
        }
        if rest.starts_with("/*") {
            let end = rest.find("*/").ok_or_else(|| compile_error(i, "unterminated comment"))?;
            i += end + 2;
            continue;
        }

        if c.is_ascii_digit() {
            let len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '_'))
                .unwrap_or(rest.len());
            let text: String = rest[..len].chars().filter(|c| *c != '_').collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| compile_error(i, format!("invalid number '{}'", text)))?;
            tokens.push(Token { tok: Tok::Num(n), pos: i });
            i += len;
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let len = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
                .unwrap_or(rest.len());
            tokens.push(Token {
                tok: Tok::Ident(rest[..len].to_string()),
                pos: i,
            });
            i += len;
            continue;
        }

        if c == '"' || c == '\'' {
            let (s, len) = string_literal(rest, c).map_err(|d| compile_error(i, d))?;
            tokens.push(Token { tok: Tok::Str(s), pos: i });
            i += len;
            continue;
        }

        match PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                tokens.push(Token {
                    tok: Tok::Punct(*p),
                    pos: i,
                });
                i += p.len();
            }
            None => {
                return Err(compile_error(i, format!("unexpected character '{}'", c)))
            }
        }
    }

    tokens.push(Token {
        tok: Tok::Eof,
        pos: src.len(),
    });
    Ok(tokens)
}

/// Returns the decoded literal and its length in bytes including quotes
fn string_literal(rest: &str, quote: char) -> std::result::Result<(String, usize), String> {
    let mut out = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((idx, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((out, idx + 1)),
            '\\' => {
                let (_, esc) = chars.next().ok_or("unterminated escape")?;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    'u' => {
                        let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| format!("invalid unicode escape '\\u{}'", hex))?;
                        out.push(char::from_u32(code).ok_or("invalid unicode escape")?);
                    }
                    other => out.push(other),
                }
            }
            c => out.push(c),
        }
    }
    Err("unterminated string".to_string())
}

fn compile_error(position: usize, details: impl Into<String>) -> NullsError {
    NullsError::Compile {
        position,
        details: details.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn longest_punctuator_wins() {
        assert_eq!(
            toks("a === b"),
            vec![
                Tok::Ident("a".into()),
                Tok::Punct("==="),
                Tok::Ident("b".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(
            toks(r#"'it\'s' "a\nb" "A""#),
            vec![
                Tok::Str("it's".into()),
                Tok::Str("a\nb".into()),
                Tok::Str("A".into()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            toks("1 // one\n/* two */ 2"),
            vec![Tok::Num(1.0), Tok::Num(2.0), Tok::Eof]
        );
    }

    #[test]
    fn unterminated_string_reports_position() {
        let err = tokenize("x + 'abc").unwrap_err();
        assert!(matches!(err, NullsError::Compile { position: 4, .. }));
    }
}
