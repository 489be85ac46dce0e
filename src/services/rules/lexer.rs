//! Tokenizer for rule conditions

use super::RuleError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    None,
    And,
    Or,
    Not,
    In,
    Is,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A token plus its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn syntax(offset: usize, message: impl Into<String>) -> RuleError {
    RuleError::Syntax {
        offset,
        message: message.into(),
    }
}

fn keyword(word: &str) -> Option<Token> {
    let token = match word {
        "True" | "true" => Token::True,
        "False" | "false" => Token::False,
        "None" | "none" | "null" => Token::None,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "in" => Token::In,
        "is" => Token::Is,
        _ => return None,
    };
    Some(token)
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, RuleError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let start = pos;
        let c = bytes[pos];

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let token = match c {
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b',' => Token::Comma,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'%' => Token::Percent,
            b'/' if bytes.get(pos + 1) == Some(&b'/') => {
                pos += 1;
                Token::SlashSlash
            }
            b'/' => Token::Slash,
            b'=' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 1;
                Token::Eq
            }
            b'!' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 1;
                Token::Ne
            }
            b'<' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 1;
                Token::Le
            }
            b'<' => Token::Lt,
            b'>' if bytes.get(pos + 1) == Some(&b'=') => {
                pos += 1;
                Token::Ge
            }
            b'>' => Token::Gt,
            b'.' if !bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) => Token::Dot,
            b'\'' | b'"' => {
                let (text, end) = lex_string(source, pos)?;
                tokens.push(Spanned {
                    token: Token::Str(text),
                    offset: start,
                });
                pos = end;
                continue;
            }
            b'0'..=b'9' | b'.' => {
                let (token, end) = lex_number(source, pos)?;
                tokens.push(Spanned {
                    token,
                    offset: start,
                });
                pos = end;
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let mut end = pos;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                let word = &source[pos..end];
                let token = keyword(word).unwrap_or_else(|| Token::Ident(word.to_string()));
                tokens.push(Spanned {
                    token,
                    offset: start,
                });
                pos = end;
                continue;
            }
            _ => {
                let ch = source[pos..].chars().next().unwrap_or('?');
                return Err(syntax(pos, format!("unexpected character '{ch}'")));
            }
        };

        pos += 1;
        tokens.push(Spanned {
            token,
            offset: start,
        });
    }

    Ok(tokens)
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize), RuleError> {
    let mut chars = source[start..].char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err(syntax(start, "unterminated string"));
    };

    let mut text = String::new();
    while let Some((i, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((text, start + i + c.len_utf8())),
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    break;
                };
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            c => text.push(c),
        }
    }

    Err(syntax(start, "unterminated string"))
}

fn lex_number(source: &str, start: usize) -> Result<(Token, usize), RuleError> {
    let bytes = source.as_bytes();
    let mut end = start;
    let mut is_float = false;

    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' | b'_' => end += 1,
            b'.' if !is_float => {
                is_float = true;
                end += 1;
            }
            b'e' | b'E' => {
                is_float = true;
                end += 1;
                if matches!(bytes.get(end), Some(b'+' | b'-')) {
                    end += 1;
                }
            }
            _ => break,
        }
    }

    let text: String = source[start..end].chars().filter(|c| *c != '_').collect();
    let token = if is_float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| syntax(start, format!("invalid number '{text}'")))?
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| syntax(start, format!("integer out of range '{text}'")))?
    };

    Ok((token, end))
}
