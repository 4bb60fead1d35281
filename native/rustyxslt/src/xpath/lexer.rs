//! XPath Lexer
//!
//! Tokenizes XPath expressions. `*` and the operator names are told apart
//! from name tests by the preceding token (XPath 1.0 §3.7).

use super::XPathError;

/// XPath token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Operators
    Slash,       // /
    DoubleSlash, // //
    Dot,         // .
    DoubleDot,   // ..
    At,          // @
    Pipe,        // |
    Plus,        // +
    Minus,       // -
    Multiply,    // * as an operator
    Eq,          // =
    NotEq,       // !=
    Lt,          // <
    LtEq,        // <=
    Gt,          // >
    GtEq,        // >=
    And,
    Or,
    Mod,
    Div,

    // Brackets
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,

    // Literals
    Number(f64),
    Literal(String),

    /// `*`, `prefix:*`, `local` or `prefix:local` in a name test
    NameTest(String),
    /// QName directly followed by `(`
    FunctionName(String),
    /// node, text, comment, processing-instruction followed by `(`
    NodeType(String),
    /// Name directly followed by `::`
    Axis(String),
    /// `$qname`
    Variable(String),

    DoubleColon,
    Comma,

    Eof,
}

impl Token {
    /// True when a following `*` or NCName must be read as an operator
    fn precedes_operator(&self) -> bool {
        !matches!(
            self,
            Token::At
                | Token::DoubleColon
                | Token::LeftParen
                | Token::LeftBracket
                | Token::Comma
                | Token::Slash
                | Token::DoubleSlash
                | Token::Pipe
                | Token::Plus
                | Token::Minus
                | Token::Multiply
                | Token::Eq
                | Token::NotEq
                | Token::Lt
                | Token::LtEq
                | Token::Gt
                | Token::GtEq
                | Token::And
                | Token::Or
                | Token::Mod
                | Token::Div
                | Token::Eof
        )
    }
}

/// XPath lexer
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    /// Last token produced, `Eof` before the first
    prev: Token,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            pos: 0,
            prev: Token::Eof,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.remaining().chars().nth(offset)
    }

    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if matches!(c, ' ' | '\t' | '\n' | '\r') {
                self.advance(1);
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> XPathError {
        XPathError::Syntax {
            expr: self.input.to_string(),
            message: message.into(),
        }
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Result<Token, XPathError> {
        let token = self.scan()?;
        self.prev = token.clone();
        Ok(token)
    }

    fn single(&mut self, token: Token) -> Result<Token, XPathError> {
        self.advance(1);
        Ok(token)
    }

    fn scan(&mut self) -> Result<Token, XPathError> {
        self.skip_whitespace();

        let Some(c) = self.peek() else {
            return Ok(Token::Eof);
        };
        let operator_position = self.prev.precedes_operator();

        match c {
            '/' => {
                self.advance(1);
                if self.peek() == Some('/') {
                    self.advance(1);
                    Ok(Token::DoubleSlash)
                } else {
                    Ok(Token::Slash)
                }
            }
            '.' => {
                if self.peek_at(1) == Some('.') {
                    self.advance(2);
                    Ok(Token::DoubleDot)
                } else if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                    Ok(self.read_number())
                } else {
                    self.single(Token::Dot)
                }
            }
            '@' => self.single(Token::At),
            '|' => self.single(Token::Pipe),
            '+' => self.single(Token::Plus),
            '-' => self.single(Token::Minus),
            '=' => self.single(Token::Eq),
            '(' => self.single(Token::LeftParen),
            ')' => self.single(Token::RightParen),
            '[' => self.single(Token::LeftBracket),
            ']' => self.single(Token::RightBracket),
            ',' => self.single(Token::Comma),
            '*' => {
                if operator_position {
                    self.single(Token::Multiply)
                } else {
                    self.single(Token::NameTest("*".to_string()))
                }
            }
            '!' => {
                if self.peek_at(1) == Some('=') {
                    self.advance(2);
                    Ok(Token::NotEq)
                } else {
                    Err(self.error("unexpected '!'"))
                }
            }
            '<' => {
                self.advance(1);
                if self.peek() == Some('=') {
                    self.advance(1);
                    Ok(Token::LtEq)
                } else {
                    Ok(Token::Lt)
                }
            }
            '>' => {
                self.advance(1);
                if self.peek() == Some('=') {
                    self.advance(1);
                    Ok(Token::GtEq)
                } else {
                    Ok(Token::Gt)
                }
            }
            ':' => {
                if self.peek_at(1) == Some(':') {
                    self.advance(2);
                    Ok(Token::DoubleColon)
                } else {
                    Err(self.error("unexpected ':'"))
                }
            }
            '$' => {
                self.advance(1);
                let name = self.read_qname();
                if name.is_empty() {
                    Err(self.error("expected variable name after '$'"))
                } else {
                    Ok(Token::Variable(name))
                }
            }
            '"' | '\'' => self.read_literal(c),
            '0'..='9' => Ok(self.read_number()),
            _ if is_name_start_char(c) => self.read_name(operator_position),
            _ => Err(self.error(format!("unexpected character '{}'", c))),
        }
    }

    /// Number ::= Digits ('.' Digits?)? | '.' Digits
    fn read_number(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance(1);
        }
        if self.peek() == Some('.') {
            self.advance(1);
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance(1);
            }
        }
        let text = &self.input[start..self.pos];
        Token::Number(text.parse().unwrap_or(f64::NAN))
    }

    fn read_literal(&mut self, quote: char) -> Result<Token, XPathError> {
        self.advance(1);
        let start = self.pos;
        match self.remaining().find(quote) {
            Some(len) => {
                self.advance(len + 1);
                Ok(Token::Literal(self.input[start..start + len].to_string()))
            }
            None => Err(self.error("unterminated string literal")),
        }
    }

    fn read_ncname(&mut self) -> &'a str {
        let start = self.pos;
        if self.peek().is_some_and(is_name_start_char) {
            while let Some(c) = self.peek() {
                if is_name_char(c) {
                    self.advance(c.len_utf8());
                } else {
                    break;
                }
            }
        }
        &self.input[start..self.pos]
    }

    /// NCName, optionally followed by `:NCName`
    fn read_qname(&mut self) -> String {
        let start = self.pos;
        self.read_ncname();
        if self.peek() == Some(':') && self.peek_at(1).is_some_and(is_name_start_char) {
            self.advance(1);
            self.read_ncname();
        }
        self.input[start..self.pos].to_string()
    }

    fn read_name(&mut self, operator_position: bool) -> Result<Token, XPathError> {
        let start = self.pos;
        let first = self.read_ncname();

        if operator_position {
            return match first {
                "and" => Ok(Token::And),
                "or" => Ok(Token::Or),
                "mod" => Ok(Token::Mod),
                "div" => Ok(Token::Div),
                _ => Err(self.error(format!("expected an operator, found '{}'", first))),
            };
        }

        // prefix:* and prefix:local
        let mut name_end = self.pos;
        if self.peek() == Some(':') && self.peek_at(1) != Some(':') {
            if self.peek_at(1) == Some('*') {
                self.advance(2);
                return Ok(Token::NameTest(self.input[start..self.pos].to_string()));
            }
            if self.peek_at(1).is_some_and(is_name_start_char) {
                self.advance(1);
                self.read_ncname();
                name_end = self.pos;
            }
        }
        let name = &self.input[start..name_end];

        let after = self.pos;
        self.skip_whitespace();
        if self.remaining().starts_with("::") && !name.contains(':') {
            return Ok(Token::Axis(name.to_string()));
        }
        if self.peek() == Some('(') {
            return Ok(match name {
                "node" | "text" | "comment" | "processing-instruction" => Token::NodeType(name.to_string()),
                _ => Token::FunctionName(name.to_string()),
            });
        }
        self.pos = after;
        Ok(Token::NameTest(name.to_string()))
    }

    /// Tokenize the entire input
    #[cfg(test)]
    pub fn tokenize(&mut self) -> Result<Vec<Token>, XPathError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            if matches!(token, Token::Eof) {
                break;
            }
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn is_name_start_char(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '\u{B7}'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<Token> {
        Lexer::new(s).tokenize().unwrap()
    }

    #[test]
    fn test_simple_path() {
        assert_eq!(
            tokens("/root/child"),
            vec![
                Token::Slash,
                Token::NameTest("root".into()),
                Token::Slash,
                Token::NameTest("child".into())
            ]
        );
    }

    #[test]
    fn test_star_disambiguation() {
        assert_eq!(
            tokens("* * 2"),
            vec![Token::NameTest("*".into()), Token::Multiply, Token::Number(2.0)]
        );
    }

    #[test]
    fn test_operator_names() {
        assert_eq!(
            tokens("div div div"),
            vec![Token::NameTest("div".into()), Token::Div, Token::NameTest("div".into())]
        );
        assert_eq!(tokens("a or b")[1], Token::Or);
    }

    #[test]
    fn test_axis_and_function() {
        assert_eq!(tokens("child::x")[0], Token::Axis("child".into()));
        assert_eq!(tokens("count (x)")[0], Token::FunctionName("count".into()));
        assert_eq!(tokens("text()")[0], Token::NodeType("text".into()));
        assert_eq!(tokens("p:f()")[0], Token::FunctionName("p:f".into()));
    }

    #[test]
    fn test_qualified_names() {
        assert_eq!(tokens("p:*")[0], Token::NameTest("p:*".into()));
        assert_eq!(tokens("$p:v")[0], Token::Variable("p:v".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tokens(".5")[0], Token::Number(0.5));
        assert_eq!(tokens("12.")[0], Token::Number(12.0));
    }

    #[test]
    fn test_unterminated_literal() {
        assert!(Lexer::new("'abc").tokenize().is_err());
    }
}
