//! Builders for command match expressions.
//!
//! Expressions are assembled from a small token vocabulary and compiled to a
//! single anchored regex. Literals match case-insensitively; captures are
//! named and surface through [`crate::grammar::MatchArgs`].

use regex::Regex;
use thiserror::Error;

/// Failure to turn a [`MatchExpr`] into a usable pattern.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("match expression has no tokens")]
    Empty,
    #[error("capture name {0:?} is not a valid identifier")]
    BadCaptureName(String),
    #[error("failed to compile match expression: {0}")]
    Compile(#[from] regex::Error),
}

#[derive(Debug, Clone)]
enum Token {
    Literal(String),
    Word(String),
    Integer(String),
    Mention(String),
    Emoji(String),
    Tail(String),
    Optional(Box<Token>),
    End,
}

/// A composable match expression for one command.
///
/// ```
/// use parley_command::MatchExpr;
///
/// let expr = MatchExpr::keyword("greet").word("name").end();
/// ```
#[derive(Debug, Clone)]
pub struct MatchExpr {
    tokens: Vec<Token>,
}

impl MatchExpr {
    /// Starts an expression with a case-insensitive literal keyword.
    pub fn keyword(word: &str) -> Self {
        Self {
            tokens: vec![Token::Literal(word.to_string())],
        }
    }

    /// Appends another case-insensitive literal.
    pub fn literal(mut self, word: &str) -> Self {
        self.tokens.push(Token::Literal(word.to_string()));
        self
    }

    /// Appends a required single-word capture.
    pub fn word(mut self, name: &str) -> Self {
        self.tokens.push(Token::Word(name.to_string()));
        self
    }

    /// Appends a required integer capture.
    pub fn integer(mut self, name: &str) -> Self {
        self.tokens.push(Token::Integer(name.to_string()));
        self
    }

    /// Appends a user-mention capture (`<@U...>`); the capture holds the id.
    pub fn mention(mut self, name: &str) -> Self {
        self.tokens.push(Token::Mention(name.to_string()));
        self
    }

    /// Appends an emoji capture (`:name:`); the capture keeps the colons.
    pub fn emoji(mut self, name: &str) -> Self {
        self.tokens.push(Token::Emoji(name.to_string()));
        self
    }

    /// Captures everything remaining on the line.
    pub fn tail(mut self, name: &str) -> Self {
        self.tokens.push(Token::Tail(name.to_string()));
        self
    }

    /// Appends an optional single-word capture. Best used at the end of an
    /// expression, before [`MatchExpr::end`].
    pub fn optional_word(mut self, name: &str) -> Self {
        self.tokens
            .push(Token::Optional(Box::new(Token::Word(name.to_string()))));
        self
    }

    /// Appends an optional integer capture.
    pub fn optional_integer(mut self, name: &str) -> Self {
        self.tokens
            .push(Token::Optional(Box::new(Token::Integer(name.to_string()))));
        self
    }

    /// Requires the input to end here (trailing whitespace allowed).
    pub fn end(mut self) -> Self {
        self.tokens.push(Token::End);
        self
    }

    pub(crate) fn compile(&self) -> Result<Regex, ExprError> {
        if self.tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        let mut pattern = String::from("^");
        let mut first = true;
        for token in &self.tokens {
            pattern.push_str(&fragment(token, first)?);
            if !matches!(token, Token::End) {
                first = false;
            }
        }
        Ok(Regex::new(&pattern)?)
    }
}

fn fragment(token: &Token, first: bool) -> Result<String, ExprError> {
    let sep = if first { "" } else { r"\s+" };
    Ok(match token {
        Token::Literal(word) => format!("{sep}(?i:{})", regex::escape(word)),
        Token::Word(name) => format!("{sep}(?P<{}>[A-Za-z0-9_-]+)", capture_name(name)?),
        Token::Integer(name) => format!("{sep}(?P<{}>[0-9]+)", capture_name(name)?),
        Token::Mention(name) => format!("{sep}<@(?P<{}>U[0-9A-Z]+)>", capture_name(name)?),
        Token::Emoji(name) => format!(r"{sep}(?P<{}>:\S+:)", capture_name(name)?),
        Token::Tail(name) => format!(r"{sep}(?P<{}>\S.*)", capture_name(name)?),
        Token::Optional(inner) => format!("(?:{})?", fragment(inner, first)?),
        Token::End => r"\s*$".to_string(),
    })
}

fn capture_name(name: &str) -> Result<&str, ExprError> {
    let mut chars = name.chars();
    let head_ok = chars.next().is_some_and(|ch| ch.is_ascii_alphabetic());
    if head_ok && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        Ok(name)
    } else {
        Err(ExprError::BadCaptureName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{ExprError, MatchExpr};

    #[test]
    fn unit_keyword_with_word_captures_argument() {
        let pattern = MatchExpr::keyword("greet").word("name").end().compile().expect("compile");
        let caps = pattern.captures("greet Ada").expect("match");
        assert_eq!(&caps["name"], "Ada");
        assert!(pattern.captures("greet").is_none());
        assert!(pattern.captures("greet Ada trailing").is_none());
    }

    #[test]
    fn unit_literals_match_case_insensitively() {
        let pattern = MatchExpr::keyword("Roll").integer("sides").compile().expect("compile");
        let caps = pattern.captures("roll 20").expect("match");
        assert_eq!(&caps["sides"], "20");
        assert!(pattern.captures("roll twenty").is_none());
    }

    #[test]
    fn unit_optional_word_matches_with_and_without_argument() {
        let pattern = MatchExpr::keyword("hello")
            .optional_word("name")
            .end()
            .compile()
            .expect("compile");
        assert!(pattern.captures("hello").expect("bare match").name("name").is_none());
        let caps = pattern.captures("hello Grace").expect("match");
        assert_eq!(&caps["name"], "Grace");
    }

    #[test]
    fn unit_tail_captures_rest_of_line() {
        let pattern = MatchExpr::keyword("echo").tail("body").compile().expect("compile");
        let caps = pattern.captures("echo one two  three").expect("match");
        assert_eq!(&caps["body"], "one two  three");
    }

    #[test]
    fn unit_mention_and_emoji_capture_shapes() {
        let pattern = MatchExpr::keyword("award")
            .mention("who")
            .emoji("with")
            .compile()
            .expect("compile");
        let caps = pattern.captures("award <@U0123ABCD> :tada:").expect("match");
        assert_eq!(&caps["who"], "U0123ABCD");
        assert_eq!(&caps["with"], ":tada:");
    }

    #[test]
    fn regression_empty_expression_and_bad_capture_names_are_rejected() {
        assert!(matches!(
            MatchExpr { tokens: Vec::new() }.compile(),
            Err(ExprError::Empty)
        ));
        assert!(matches!(
            MatchExpr::keyword("x").word("1bad").compile(),
            Err(ExprError::BadCaptureName(_))
        ));
    }
}
