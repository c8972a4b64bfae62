//! Predicate parser.
//!
//! ```text
//! predicate  := comparison ( ("AND" | "&&") comparison )*
//! comparison := property op literal
//! op         := "==" | "=" | "!=" | "<" | "<=" | ">" | ">="
//!             | "CONTAINS" | "BEGINSWITH" | "ENDSWITH"   (optional "[c]")
//! literal    := integer | "string" | 'string' | true | false | null
//! ```
//!
//! Keywords are case-insensitive. Parsing does not look at the schema;
//! see [`crate::query::predicate`] for binding.

use crate::error::{CoreError, CoreResult};
use crate::value::Value;
use std::fmt;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `==` or `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `CONTAINS`
    Contains,
    /// `BEGINSWITH`
    BeginsWith,
    /// `ENDSWITH`
    EndsWith,
}

impl Operator {
    /// Returns true for `<`, `<=`, `>` and `>=`.
    #[must_use]
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Self::Less | Self::LessOrEqual | Self::Greater | Self::GreaterOrEqual
        )
    }

    /// Returns true for the substring operators.
    #[must_use]
    pub fn is_string_op(self) -> bool {
        matches!(self, Self::Contains | Self::BeginsWith | Self::EndsWith)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Contains => "CONTAINS",
            Self::BeginsWith => "BEGINSWITH",
            Self::EndsWith => "ENDSWITH",
        };
        f.write_str(text)
    }
}

/// One parsed `property op literal` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    /// Property name.
    pub property: String,
    /// Operator.
    pub op: Operator,
    /// Whether `[c]` was given.
    pub case_insensitive: bool,
    /// Literal operand.
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Op(Operator),
    CaseFlag,
    And,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "'{name}'"),
            Self::Str(s) => write!(f, "string \"{s}\""),
            Self::Int(n) => write!(f, "integer {n}"),
            Self::Op(op) => write!(f, "operator {op}"),
            Self::CaseFlag => f.write_str("[c]"),
            Self::And => f.write_str("AND"),
        }
    }
}

/// Parses a predicate into its conjoined comparisons.
///
/// # Errors
///
/// Returns `InvalidQuery` describing the first syntax error.
pub fn parse(input: &str) -> CoreResult<Vec<Comparison>> {
    let tokens = tokenize(input)?;
    let mut tokens = tokens.into_iter().peekable();
    let mut comparisons = Vec::new();

    loop {
        let property = match tokens.next() {
            Some(Token::Ident(name)) if !is_literal_keyword(&name) => name,
            Some(other) => return Err(syntax(format!("expected property name, found {other}"))),
            None => return Err(syntax("expected property name, found end of input")),
        };
        let op = match tokens.next() {
            Some(Token::Op(op)) => op,
            Some(other) => return Err(syntax(format!("expected operator, found {other}"))),
            None => return Err(syntax("expected operator, found end of input")),
        };
        let case_insensitive = tokens.next_if_eq(&Token::CaseFlag).is_some();
        let value = match tokens.next() {
            Some(Token::Int(n)) => Value::Int(n),
            Some(Token::Str(s)) => Value::String(s),
            Some(Token::Ident(word)) => literal_keyword(&word)
                .ok_or_else(|| syntax(format!("expected literal, found '{word}'")))?,
            Some(other) => return Err(syntax(format!("expected literal, found {other}"))),
            None => return Err(syntax("expected literal, found end of input")),
        };
        comparisons.push(Comparison {
            property,
            op,
            case_insensitive,
            value,
        });

        match tokens.next() {
            None => return Ok(comparisons),
            Some(Token::And) => {}
            Some(other) => return Err(syntax(format!("expected AND, found {other}"))),
        }
    }
}

fn syntax(message: impl Into<String>) -> CoreError {
    CoreError::invalid_query(message)
}

fn is_literal_keyword(word: &str) -> bool {
    literal_keyword(word).is_some()
}

fn literal_keyword(word: &str) -> Option<Value> {
    match word.to_ascii_lowercase().as_str() {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" | "nil" => Some(Value::Null),
        _ => None,
    }
}

fn word_token(word: String) -> Token {
    match word.to_ascii_uppercase().as_str() {
        "AND" => Token::And,
        "CONTAINS" => Token::Op(Operator::Contains),
        "BEGINSWITH" => Token::Op(Operator::BeginsWith),
        "ENDSWITH" => Token::Op(Operator::EndsWith),
        _ => Token::Ident(word),
    }
}

fn tokenize(input: &str) -> CoreResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '=' => {
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
                tokens.push(Token::Op(Operator::Equal));
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                i += 2;
                tokens.push(Token::Op(Operator::NotEqual));
            }
            '<' | '>' => {
                let or_equal = chars.get(i + 1) == Some(&'=');
                let op = match (c, or_equal) {
                    ('<', false) => Operator::Less,
                    ('<', true) => Operator::LessOrEqual,
                    (_, false) => Operator::Greater,
                    (_, true) => Operator::GreaterOrEqual,
                };
                i += if or_equal { 2 } else { 1 };
                tokens.push(Token::Op(op));
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                i += 2;
                tokens.push(Token::And);
            }
            '[' => {
                let flag: String = chars.iter().skip(i).take(3).collect();
                if !flag.eq_ignore_ascii_case("[c]") {
                    return Err(syntax(format!("unknown modifier at offset {i}")));
                }
                i += 3;
                tokens.push(Token::CaseFlag);
            }
            '"' | '\'' => {
                let (text, next) = read_string(&chars, i)?;
                tokens.push(Token::Str(text));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<i64>()
                    .map_err(|_| syntax(format!("integer out of range: {text}")))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_')
                {
                    i += 1;
                }
                tokens.push(word_token(chars[start..i].iter().collect()));
            }
            other => return Err(syntax(format!("unexpected character '{other}' at offset {i}"))),
        }
    }
    Ok(tokens)
}

/// Reads a quoted string starting at `start`, handling `\` escapes.
fn read_string(chars: &[char], start: usize) -> CoreResult<(String, usize)> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    while let Some(&c) = chars.get(i) {
        match c {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| syntax("unterminated escape in string literal"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((text, i + 1)),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err(syntax("unterminated string literal"))
}
