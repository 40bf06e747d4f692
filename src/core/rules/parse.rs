//! Rule line parser
//!
//! Operands are lexed with a small [`logos`] lexer; everything after the
//! `options` keyword is handed verbatim to [`super::options::parse_options`],
//! since option values may contain spaces inside quotes.

use super::options::parse_options;
use super::{Action, Rule};
use crate::core::error::ParseError;
use logos::Logos;
use std::iter::Peekable;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    #[token("service", ignore(case))]
    Service,

    #[token("from", ignore(case))]
    From,

    #[token("to", ignore(case))]
    To,

    #[token("against", ignore(case))]
    Against,

    #[token("options", ignore(case))]
    Options,

    #[regex(r"[ \t\r\n]+")]
    Space,

    #[regex(r"[^ \t\r\n]+")]
    Word,
}

struct Lexed<'a> {
    words: Vec<(Token, &'a str)>,
    options: Option<&'a str>,
}

fn lex(input: &str) -> Result<Lexed<'_>, ParseError> {
    let mut lexer = Token::lexer(input);
    let mut words = Vec::new();
    while let Some(token) = lexer.next() {
        let token = token.map_err(|_| ParseError::Expected {
            expected: "word",
            found: lexer.slice().to_string(),
        })?;
        match token {
            Token::Space => {}
            Token::Options => {
                return Ok(Lexed {
                    words,
                    options: Some(lexer.remainder().trim()),
                });
            }
            other => words.push((other, lexer.slice())),
        }
    }
    Ok(Lexed {
        words,
        options: None,
    })
}

type Tokens<'a> = Peekable<std::vec::IntoIter<(Token, &'a str)>>;

fn keyword(tokens: &mut Tokens<'_>, expected: Token, name: &'static str) -> Result<(), ParseError> {
    match tokens.next() {
        Some((token, _)) if token == expected => Ok(()),
        Some((_, found)) => Err(ParseError::Expected {
            expected: name,
            found: found.to_string(),
        }),
        None => Err(ParseError::MissingOperand(name)),
    }
}

fn word(tokens: &mut Tokens<'_>, what: &'static str) -> Result<String, ParseError> {
    match tokens.next() {
        Some((Token::Word, w)) => Ok(w.to_string()),
        Some((_, found)) => Err(ParseError::Expected {
            expected: what,
            found: found.to_string(),
        }),
        None => Err(ParseError::MissingOperand(what)),
    }
}

/// Parses one persisted rule line.
///
/// # Errors
///
/// Returns a [`ParseError`] for blank/comment lines, unknown actions,
/// missing or misplaced operands, trailing words and malformed options.
///
/// # Examples
///
/// ```
/// use zonefw::core::rules::{parse_line, Action};
///
/// let rule = parse_line("accept service ssh from lan to firewall options log").unwrap();
/// assert_eq!(rule.action, Action::Accept);
/// assert_eq!(rule.to, "firewall");
/// assert!(rule.options.unwrap().rule_log);
/// ```
pub fn parse_line(line: &str) -> Result<Rule, ParseError> {
    let mut text = line.trim();
    if text.is_empty() || text.starts_with('#') {
        return Err(ParseError::Empty);
    }
    let active = match text.strip_prefix(';') {
        Some(rest) => {
            text = rest.trim_start();
            false
        }
        None => true,
    };

    let lexed = lex(text)?;
    let mut tokens: Tokens<'_> = lexed.words.into_iter().peekable();
    let (_, first) = tokens.next().ok_or(ParseError::Empty)?;
    let action: Action = first
        .parse()
        .map_err(|_| ParseError::UnknownAction(first.to_string()))?;

    let mut rule = Rule {
        action,
        active,
        ..Rule::default()
    };

    match action {
        Action::Separator => {}
        Action::Protect => {
            match tokens.next() {
                Some((Token::Against, _)) => {}
                Some((Token::Word, who)) => {
                    rule.who = who.to_string();
                    keyword(&mut tokens, Token::Against, "against")?;
                }
                Some((_, found)) => {
                    return Err(ParseError::Expected {
                        expected: "against",
                        found: found.to_string(),
                    });
                }
                None => return Err(ParseError::MissingOperand("against")),
            }
            rule.danger = word(&mut tokens, "danger")?;
            if matches!(tokens.peek(), Some((Token::From, _))) {
                tokens.next();
                rule.source = word(&mut tokens, "source")?;
            }
        }
        _ => {
            keyword(&mut tokens, Token::Service, "service")?;
            rule.service = word(&mut tokens, "service name")?;
            keyword(&mut tokens, Token::From, "from")?;
            rule.from = word(&mut tokens, "source zone")?;
            keyword(&mut tokens, Token::To, "to")?;
            rule.to = word(&mut tokens, "destination zone")?;
        }
    }

    if let Some((_, extra)) = tokens.next() {
        return Err(ParseError::Trailing(extra.to_string()));
    }

    if let Some(options) = lexed.options.filter(|o| !o.is_empty()) {
        if action == Action::Protect {
            return Err(ParseError::Trailing(format!("options {options}")));
        }
        let parsed = parse_options(options)?;
        rule.options = (!parsed.is_empty()).then_some(parsed);
    }

    Ok(rule)
}
