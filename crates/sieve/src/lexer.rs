//! Hand-rolled Sieve tokenizer, in the spirit of the tokenizer idiom in
//! `examples/aRustyDev-sieve-language-server`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    Tag(String),
    QuotedString(String),
    Number(u64),
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
}

#[derive(Debug, Error)]
pub enum LexError {
    #[error("unterminated string literal at byte {0}")]
    UnterminatedString(usize),
    #[error("unexpected character {0:?} at byte {1}")]
    UnexpectedChar(char, usize),
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    let len = bytes.len();

    while i < len {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '#' => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '/' if i + 1 < len && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < len && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            '"' => {
                let start = i;
                i += 1;
                let mut value = String::new();
                loop {
                    if i >= len {
                        return Err(LexError::UnterminatedString(start));
                    }
                    match bytes[i] as char {
                        '"' => {
                            i += 1;
                            break;
                        }
                        '\\' if i + 1 < len => {
                            value.push(bytes[i + 1] as char);
                            i += 2;
                        }
                        ch => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::QuotedString(value));
            }
            ':' => {
                let start = i + 1;
                i += 1;
                while i < len && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                tokens.push(Token::Tag(source[start..i].to_ascii_lowercase()));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < len && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
                let mut value: u64 = source[start..i].parse().unwrap_or(0);
                if i < len {
                    match bytes[i] as char {
                        'K' | 'k' => {
                            value *= 1024;
                            i += 1;
                        }
                        'M' | 'm' => {
                            value *= 1024 * 1024;
                            i += 1;
                        }
                        'G' | 'g' => {
                            value *= 1024 * 1024 * 1024;
                            i += 1;
                        }
                        _ => {}
                    }
                }
                tokens.push(Token::Number(value));
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < len && is_ident_char(bytes[i] as char) {
                    i += 1;
                }
                tokens.push(Token::Ident(source[start..i].to_string()));
            }
            other => return Err(LexError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_if() {
        let toks = tokenize(r#"if header :contains "Subject" "spam" { fileinto "INBOX/Junk"; }"#)
            .unwrap();
        assert!(toks.contains(&Token::Ident("if".to_string())));
        assert!(toks.contains(&Token::Tag("contains".to_string())));
        assert!(toks.contains(&Token::QuotedString("Subject".to_string())));
    }

    #[test]
    fn size_suffix_scales_value() {
        let toks = tokenize("size :over 10K;").unwrap();
        assert!(toks.contains(&Token::Number(10 * 1024)));
    }

    #[test]
    fn keyword_immediately_followed_by_semicolon_splits_into_two_tokens() {
        let toks = tokenize("keep; stop; discard;").unwrap();
        assert_eq!(
            toks,
            vec![
                Token::Ident("keep".to_string()),
                Token::Semicolon,
                Token::Ident("stop".to_string()),
                Token::Semicolon,
                Token::Ident("discard".to_string()),
                Token::Semicolon,
            ]
        );
    }
}
