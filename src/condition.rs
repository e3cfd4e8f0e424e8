//! Property conditions
//!
//! Dialog skip predicates are written in the installer's condition syntax:
//!
//! ```text
//! ALREADY_ACCEPTED = "1"
//! NOT Installed AND (UILevel > 3 OR FORCE_UI)
//! ```
//!
//! A bare property is true when it is set to a non-empty value. Comparisons
//! are numeric when both sides parse as integers and textual otherwise; `~=`
//! compares case-insensitively. `!`, `&&`, `||`, `==` and `!=` are accepted as
//! aliases.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Anything that can answer property lookups
pub trait PropertySource {
    /// Value of `name`, or `None` when unset or empty
    fn lookup(&self, name: &str) -> Option<String>;
}

impl PropertySource for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

impl PropertySource for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).filter(|v| !v.is_empty()).cloned()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Condition is empty")]
    Empty,

    #[error("Unterminated string starting at column {0}")]
    UnterminatedString(usize),

    #[error("Unexpected character '{found}' at column {pos}")]
    UnexpectedChar { pos: usize, found: char },

    #[error("Unexpected '{found}' at column {pos}")]
    UnexpectedToken { pos: usize, found: String },

    #[error("Unexpected end of condition")]
    UnexpectedEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    EqIgnoreCase,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Property(String),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Value(Operand),
    Compare(Operand, CompareOp, Operand),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A parsed condition, kept together with its source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some((pos, tok)) = parser.tokens.get(parser.pos) {
            return Err(ConditionError::UnexpectedToken {
                pos: *pos,
                found: tok.to_string(),
            });
        }
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate<P: PropertySource + ?Sized>(&self, props: &P) -> bool {
        eval(&self.expr, props)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::str::FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::parse(s)
    }
}

impl TryFrom<String> for Condition {
    type Error = ConditionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Condition::parse(&value)
    }
}

impl From<Condition> for String {
    fn from(c: Condition) -> Self {
        c.source
    }
}

fn eval<P: PropertySource + ?Sized>(expr: &Expr, props: &P) -> bool {
    match expr {
        Expr::Value(operand) => truthy(operand, props),
        Expr::Compare(left, op, right) => compare(&resolve(left, props), *op, &resolve(right, props)),
        Expr::Not(inner) => !eval(inner, props),
        Expr::And(l, r) => eval(l, props) && eval(r, props),
        Expr::Or(l, r) => eval(l, props) || eval(r, props),
    }
}

fn resolve<P: PropertySource + ?Sized>(operand: &Operand, props: &P) -> String {
    match operand {
        Operand::Property(name) => props.lookup(name).unwrap_or_default(),
        Operand::Literal(text) => text.clone(),
    }
}

fn truthy<P: PropertySource + ?Sized>(operand: &Operand, props: &P) -> bool {
    match operand {
        Operand::Property(name) => props.lookup(name).is_some(),
        Operand::Literal(text) => match text.parse::<i64>() {
            Ok(n) => n != 0,
            Err(_) => !text.is_empty(),
        },
    }
}

fn compare(left: &str, op: CompareOp, right: &str) -> bool {
    if let (Ok(l), Ok(r)) = (left.trim().parse::<i64>(), right.trim().parse::<i64>()) {
        return match op {
            CompareOp::Eq | CompareOp::EqIgnoreCase => l == r,
            CompareOp::NotEq => l != r,
            CompareOp::Lt => l < r,
            CompareOp::Gt => l > r,
            CompareOp::LtEq => l <= r,
            CompareOp::GtEq => l >= r,
        };
    }
    match op {
        CompareOp::Eq => left == right,
        CompareOp::NotEq => left != right,
        CompareOp::EqIgnoreCase => left.to_lowercase() == right.to_lowercase(),
        CompareOp::Lt => left < right,
        CompareOp::Gt => left > right,
        CompareOp::LtEq => left <= right,
        CompareOp::GtEq => left >= right,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Num(String),
    Op(CompareOp),
    Not,
    And,
    Or,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) | Token::Num(s) => write!(f, "{}", s),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Op(op) => write!(
                f,
                "{}",
                match op {
                    CompareOp::Eq => "=",
                    CompareOp::NotEq => "<>",
                    CompareOp::EqIgnoreCase => "~=",
                    CompareOp::Lt => "<",
                    CompareOp::Gt => ">",
                    CompareOp::LtEq => "<=",
                    CompareOp::GtEq => ">=",
                }
            ),
            Token::Not => write!(f, "NOT"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ConditionError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i + 1;
        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let (token, width) = match two.as_str() {
            "<>" | "!=" => (Token::Op(CompareOp::NotEq), 2),
            "==" => (Token::Op(CompareOp::Eq), 2),
            "~=" => (Token::Op(CompareOp::EqIgnoreCase), 2),
            "<=" => (Token::Op(CompareOp::LtEq), 2),
            ">=" => (Token::Op(CompareOp::GtEq), 2),
            "&&" => (Token::And, 2),
            "||" => (Token::Or, 2),
            _ => match c {
                '=' => (Token::Op(CompareOp::Eq), 1),
                '<' => (Token::Op(CompareOp::Lt), 1),
                '>' => (Token::Op(CompareOp::Gt), 1),
                '!' => (Token::Not, 1),
                '(' => (Token::LParen, 1),
                ')' => (Token::RParen, 1),
                '"' | '\'' => {
                    let close = chars[i + 1..]
                        .iter()
                        .position(|&ch| ch == c)
                        .ok_or(ConditionError::UnterminatedString(start))?;
                    let text: String = chars[i + 1..i + 1 + close].iter().collect();
                    (Token::Str(text), close + 2)
                }
                c if c.is_ascii_digit() || c == '-' => {
                    let len = chars[i + 1..]
                        .iter()
                        .take_while(|ch| ch.is_ascii_digit())
                        .count()
                        + 1;
                    let text: String = chars[i..i + len].iter().collect();
                    (Token::Num(text), len)
                }
                c if c.is_alphabetic() || c == '_' || c == '[' => {
                    let len = chars[i..]
                        .iter()
                        .take_while(|ch| ch.is_alphanumeric() || matches!(**ch, '_' | '.' | '[' | ']'))
                        .count();
                    let word: String = chars[i..i + len].iter().collect();
                    let token = match word.to_ascii_uppercase().as_str() {
                        "NOT" => Token::Not,
                        "AND" => Token::And,
                        "OR" => Token::Or,
                        _ => Token::Ident(word.trim_matches(|ch| ch == '[' || ch == ']').to_string()),
                    };
                    (token, len)
                }
                other => {
                    return Err(ConditionError::UnexpectedChar {
                        pos: start,
                        found: other,
                    })
                }
            },
        };

        tokens.push((start, token));
        i += width;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Result<(usize, Token), ConditionError> {
        let item = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ConditionError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(item)
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            return match self.next()? {
                (_, Token::RParen) => Ok(inner),
                (pos, tok) => Err(ConditionError::UnexpectedToken {
                    pos,
                    found: tok.to_string(),
                }),
            };
        }

        let left = self.parse_operand()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Expr::Compare(left, op, right));
        }
        Ok(Expr::Value(left))
    }

    fn parse_operand(&mut self) -> Result<Operand, ConditionError> {
        match self.next()? {
            (_, Token::Ident(name)) => Ok(Operand::Property(name)),
            (_, Token::Str(text)) | (_, Token::Num(text)) => Ok(Operand::Literal(text)),
            (pos, tok) => Err(ConditionError::UnexpectedToken {
                pos,
                found: tok.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn eval_str(cond: &str, pairs: &[(&str, &str)]) -> bool {
        Condition::parse(cond).unwrap().evaluate(&props(pairs))
    }

    #[test]
    fn test_bare_property() {
        assert!(eval_str("Installed", &[("Installed", "00:00:00")]));
        assert!(!eval_str("Installed", &[]));
        assert!(!eval_str("Installed", &[("Installed", "")]));
    }

    #[test]
    fn test_equality_quoted_and_bare() {
        assert!(eval_str("ALREADY_ACCEPTED = \"1\"", &[("ALREADY_ACCEPTED", "1")]));
        assert!(eval_str("ALREADY_ACCEPTED=1", &[("ALREADY_ACCEPTED", "1")]));
        assert!(!eval_str("ALREADY_ACCEPTED=1", &[("ALREADY_ACCEPTED", "0")]));
        assert!(!eval_str("ALREADY_ACCEPTED=1", &[]));
    }

    #[test]
    fn test_not_equal() {
        assert!(eval_str("REMOVE <> \"ALL\"", &[]));
        assert!(!eval_str("REMOVE != 'ALL'", &[("REMOVE", "ALL")]));
    }

    #[test]
    fn test_case_insensitive_equality() {
        assert!(eval_str("REMOVE ~= \"all\"", &[("REMOVE", "ALL")]));
        assert!(!eval_str("REMOVE = \"all\"", &[("REMOVE", "ALL")]));
    }

    #[test]
    fn test_numeric_comparison() {
        assert!(eval_str("UILevel > 3", &[("UILevel", "5")]));
        assert!(!eval_str("UILevel >= 10", &[("UILevel", "5")]));
        assert!(eval_str("UILevel <= 5", &[("UILevel", "5")]));
        // "10" < "9" textually, but numeric comparison wins
        assert!(eval_str("VALUE < 10", &[("VALUE", "9")]));
    }

    #[test]
    fn test_logical_precedence() {
        // AND binds tighter than OR
        assert!(eval_str("A OR B AND C", &[("A", "1")]));
        assert!(!eval_str("(A OR B) AND C", &[("A", "1")]));
        assert!(eval_str("NOT A AND B", &[("B", "1")]));
    }

    #[test]
    fn test_operator_aliases() {
        assert!(eval_str("!A && (B || C)", &[("C", "1")]));
        assert!(eval_str("A == \"x\"", &[("A", "x")]));
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert!(eval_str("not A and B", &[("B", "1")]));
    }

    #[test]
    fn test_literal_truthiness() {
        assert!(eval_str("1", &[]));
        assert!(!eval_str("0", &[]));
        assert!(eval_str("\"x\"", &[]));
        assert!(!eval_str("\"\"", &[]));
    }

    #[test]
    fn test_bracketed_property() {
        assert!(eval_str("[INSTALLDIR] <> \"\"", &[("INSTALLDIR", "C:\\App")]));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Condition::parse("  "), Err(ConditionError::Empty));
        assert_eq!(
            Condition::parse("A = \"open"),
            Err(ConditionError::UnterminatedString(5))
        );
        assert_eq!(Condition::parse("A AND"), Err(ConditionError::UnexpectedEnd));
        assert!(matches!(
            Condition::parse("(A"),
            Err(ConditionError::UnexpectedEnd)
        ));
        assert!(matches!(
            Condition::parse("A B"),
            Err(ConditionError::UnexpectedToken { pos: 3, .. })
        ));
        assert!(matches!(
            Condition::parse("A # B"),
            Err(ConditionError::UnexpectedChar { found: '#', .. })
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let cond: Condition = serde_json::from_str("\"NOT Installed\"").unwrap();
        assert_eq!(cond.source(), "NOT Installed");
        assert_eq!(serde_json::to_string(&cond).unwrap(), "\"NOT Installed\"");
        assert!(serde_json::from_str::<Condition>("\"A AND\"").is_err());
    }

    #[test]
    fn test_btreemap_source() {
        let mut map = BTreeMap::new();
        map.insert("X".to_string(), "1".to_string());
        assert!(Condition::parse("X").unwrap().evaluate(&map));
    }
}
