//! Recursive-descent parser from `Token` stream to `ast::{Command, Test}`.

use thiserror::Error;

use crate::ast::{AddressPart, Block, Branch, Comparator, Command, EnvelopePart, MatchType, Test};
use crate::lexer::{tokenize, LexError, Token};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("unexpected end of script")]
    Eof,
    #[error("unexpected token {0:?}, expected {1}")]
    Unexpected(Token, &'static str),
    #[error("unknown test or command: {0}")]
    Unknown(String),
}

type PResult<T> = Result<T, ParseError>;

pub fn parse_script(source: &str) -> PResult<Block> {
    let tokens = tokenize(source)?;
    let mut p = Parser { tokens, pos: 0 };
    let mut commands = Vec::new();
    while p.pos < p.tokens.len() {
        commands.push(p.command()?);
    }
    Ok(commands)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> PResult<Token> {
        let t = self.tokens.get(self.pos).cloned().ok_or(ParseError::Eof)?;
        self.pos += 1;
        Ok(t)
    }

    fn expect(&mut self, want: Token) -> PResult<()> {
        let got = self.bump()?;
        if got == want {
            Ok(())
        } else {
            Err(ParseError::Unexpected(got, "token"))
        }
    }

    fn peek_is_ident(&self, want: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(want))
    }

    fn string(&mut self) -> PResult<String> {
        match self.bump()? {
            Token::QuotedString(s) => Ok(s),
            other => Err(ParseError::Unexpected(other, "string")),
        }
    }

    fn string_list(&mut self) -> PResult<Vec<String>> {
        if matches!(self.peek(), Some(Token::LBracket)) {
            self.bump()?;
            let mut items = Vec::new();
            loop {
                items.push(self.string()?);
                match self.peek() {
                    Some(Token::Comma) => {
                        self.bump()?;
                    }
                    _ => break,
                }
            }
            self.expect(Token::RBracket)?;
            Ok(items)
        } else {
            Ok(vec![self.string()?])
        }
    }

    fn number(&mut self) -> PResult<u64> {
        match self.bump()? {
            Token::Number(n) => Ok(n),
            other => Err(ParseError::Unexpected(other, "number")),
        }
    }

    fn block(&mut self) -> PResult<Block> {
        self.expect(Token::LBrace)?;
        let mut commands = Vec::new();
        while !matches!(self.peek(), Some(Token::RBrace)) {
            commands.push(self.command()?);
        }
        self.expect(Token::RBrace)?;
        Ok(commands)
    }

    fn command(&mut self) -> PResult<Command> {
        let name = match self.bump()? {
            Token::Ident(s) => s.to_ascii_lowercase(),
            other => return Err(ParseError::Unexpected(other, "command")),
        };
        match name.as_str() {
            "require" => {
                let names = self.string_list()?;
                self.expect(Token::Semicolon)?;
                Ok(Command::Require(names))
            }
            "if" => self.if_chain(),
            "stop" => {
                self.expect(Token::Semicolon)?;
                Ok(Command::Stop)
            }
            "reject" => {
                let reason = self.string()?;
                self.expect(Token::Semicolon)?;
                Ok(Command::Reject { reason })
            }
            "fileinto" => {
                let mailbox = self.string()?;
                self.expect(Token::Semicolon)?;
                Ok(Command::FileInto { mailbox })
            }
            "redirect" => {
                let address = self.string()?;
                self.expect(Token::Semicolon)?;
                Ok(Command::Redirect { address })
            }
            "keep" => {
                self.expect(Token::Semicolon)?;
                Ok(Command::Keep)
            }
            "discard" => {
                self.expect(Token::Semicolon)?;
                Ok(Command::Discard)
            }
            "vacation" => {
                // Skip any leading tagged arguments (":days N", ":subject
                // "..."", etc.) — only the final free-standing reason string
                // is modeled, matching the action vocabulary in spec §3.
                let mut reason = String::new();
                loop {
                    match self.peek() {
                        Some(Token::Tag(_)) => {
                            self.bump()?;
                            if matches!(self.peek(), Some(Token::QuotedString(_))) {
                                self.bump()?;
                            } else if matches!(self.peek(), Some(Token::Number(_))) {
                                self.bump()?;
                            }
                        }
                        Some(Token::QuotedString(_)) => {
                            reason = self.string()?;
                        }
                        _ => break,
                    }
                    if matches!(self.peek(), Some(Token::Semicolon)) {
                        break;
                    }
                }
                self.expect(Token::Semicolon)?;
                Ok(Command::Vacation { reason })
            }
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }

    fn if_chain(&mut self) -> PResult<Command> {
        let mut branches = Vec::new();
        let test = self.test()?;
        let body = self.block()?;
        branches.push(Branch {
            test: Some(test),
            body,
        });
        loop {
            if self.peek_is_ident("elsif") {
                self.bump()?;
                let test = self.test()?;
                let body = self.block()?;
                branches.push(Branch {
                    test: Some(test),
                    body,
                });
            } else if self.peek_is_ident("else") {
                self.bump()?;
                let body = self.block()?;
                branches.push(Branch { test: None, body });
                break;
            } else {
                break;
            }
        }
        Ok(Command::If(branches))
    }

    fn comparator_and_match(&mut self) -> PResult<(Comparator, MatchType)> {
        let mut comparator = Comparator::AsciiCasemap;
        let mut match_type = MatchType::Is;
        loop {
            match self.peek() {
                Some(Token::Tag(t)) if t == "comparator" => {
                    self.bump()?;
                    let name = self.string()?;
                    comparator = match name.as_str() {
                        "i;octet" => Comparator::Octet,
                        _ => Comparator::AsciiCasemap,
                    };
                }
                Some(Token::Tag(t)) if t == "is" => {
                    self.bump()?;
                    match_type = MatchType::Is;
                }
                Some(Token::Tag(t)) if t == "contains" => {
                    self.bump()?;
                    match_type = MatchType::Contains;
                }
                Some(Token::Tag(t)) if t == "matches" => {
                    self.bump()?;
                    match_type = MatchType::Matches;
                }
                _ => break,
            }
        }
        Ok((comparator, match_type))
    }

    fn test(&mut self) -> PResult<Test> {
        let name = match self.bump()? {
            Token::Ident(s) => s.to_ascii_lowercase(),
            other => return Err(ParseError::Unexpected(other, "test")),
        };
        match name.as_str() {
            "true" => Ok(Test::True),
            "false" => Ok(Test::False),
            "not" => {
                self.expect(Token::LParen)?;
                let inner = self.test()?;
                self.expect(Token::RParen)?;
                Ok(Test::Not(Box::new(inner)))
            }
            "allof" => Ok(Test::AllOf(self.test_list_parens()?)),
            "anyof" => Ok(Test::AnyOf(self.test_list_parens()?)),
            "exists" => {
                let header_names = self.string_list()?;
                Ok(Test::Exists { header_names })
            }
            "size" => {
                let over = match self.bump()? {
                    Token::Tag(t) if t == "over" => true,
                    Token::Tag(t) if t == "under" => false,
                    other => return Err(ParseError::Unexpected(other, ":over or :under")),
                };
                let limit = self.number()?;
                Ok(Test::Size { over, limit })
            }
            "address" => {
                let mut address_part = AddressPart::All;
                loop {
                    match self.peek() {
                        Some(Token::Tag(t)) if t == "all" => {
                            self.bump()?;
                            address_part = AddressPart::All;
                        }
                        Some(Token::Tag(t)) if t == "localpart" => {
                            self.bump()?;
                            address_part = AddressPart::Localpart;
                        }
                        Some(Token::Tag(t)) if t == "domain" => {
                            self.bump()?;
                            address_part = AddressPart::Domain;
                        }
                        _ => break,
                    }
                }
                let (comparator, match_type) = self.comparator_and_match()?;
                let header_names = self.string_list()?;
                let keys = self.string_list()?;
                Ok(Test::Address {
                    header_names,
                    address_part,
                    comparator,
                    match_type,
                    keys,
                })
            }
            "envelope" => {
                let (comparator, match_type) = self.comparator_and_match()?;
                let part_strs = self.string_list()?;
                let parts = part_strs
                    .iter()
                    .map(|p| {
                        if p.eq_ignore_ascii_case("to") {
                            EnvelopePart::To
                        } else {
                            EnvelopePart::From
                        }
                    })
                    .collect();
                let keys = self.string_list()?;
                Ok(Test::Envelope {
                    parts,
                    comparator,
                    match_type,
                    keys,
                })
            }
            "header" => {
                let (comparator, match_type) = self.comparator_and_match()?;
                let header_names = self.string_list()?;
                let keys = self.string_list()?;
                Ok(Test::Header {
                    header_names,
                    comparator,
                    match_type,
                    keys,
                })
            }
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }

    fn test_list_parens(&mut self) -> PResult<Vec<Test>> {
        self.expect(Token::LParen)?;
        let mut tests = Vec::new();
        loop {
            tests.push(self.test()?);
            match self.peek() {
                Some(Token::Comma) => {
                    self.bump()?;
                }
                _ => break,
            }
        }
        self.expect(Token::RParen)?;
        Ok(tests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fileinto_on_subject_match() {
        let script = r#"
            require ["fileinto"];
            if header :contains "Subject" "spam" {
                fileinto "INBOX/Junk";
                stop;
            }
        "#;
        let commands = parse_script(script).unwrap();
        assert_eq!(commands.len(), 2);
        match &commands[1] {
            Command::If(branches) => {
                assert_eq!(branches.len(), 1);
                assert_eq!(branches[0].body.len(), 2);
            }
            _ => panic!("expected if"),
        }
    }

    #[test]
    fn parses_elsif_else_chain() {
        let script = r#"
            if size :over 100K { discard; }
            elsif header :is "X-Spam" "yes" { reject "spam"; }
            else { keep; }
        "#;
        let commands = parse_script(script).unwrap();
        match &commands[0] {
            Command::If(branches) => assert_eq!(branches.len(), 3),
            _ => panic!("expected if"),
        }
    }

    #[test]
    fn parses_allof_anyof_not() {
        let script = r#"
            if allof(anyof(true, false), not(false)) { keep; }
        "#;
        parse_script(script).unwrap();
    }
}
