//! XPath Parser
//!
//! Recursive descent parser for XPath 1.0 expressions. Names are kept as
//! written; prefixes are resolved by the compiler.

use super::lexer::{Lexer, Token};
use super::XPathError;

/// Nested sub-expressions (parentheses, predicates, arguments) allowed
pub const MAX_EXPRESSION_NESTING: usize = 200;

/// Operators allowed in one expression; chains build left-deep trees
pub const MAX_EXPRESSION_OPERATORS: usize = 1000;

/// XPath expression AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Location path, absolute or relative
    Path(LocationPath),
    /// Primary expression with predicates, optionally continued by steps
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
    /// Union of two expressions (|)
    Union(Box<Expr>, Box<Expr>),
    /// Function call by QName
    Function(String, Vec<Expr>),
    /// Binary operation
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    /// Unary negation
    Negate(Box<Expr>),
    Number(f64),
    String(String),
    /// Variable reference by QName
    Variable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    pub absolute: bool,
    pub steps: Vec<Step>,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Location step in a path
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    fn new(axis: Axis, node_test: NodeTest) -> Self {
        Step {
            axis,
            node_test,
            predicates: Vec::new(),
        }
    }

    /// `descendant-or-self::node()`, the expansion of `//`
    fn descendant_or_self() -> Self {
        Step::new(Axis::DescendantOrSelf, NodeTest::Node)
    }
}

/// XPath axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Self_,
    Attribute,
    Namespace,
}

impl Axis {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "child" => Some(Axis::Child),
            "descendant" => Some(Axis::Descendant),
            "descendant-or-self" => Some(Axis::DescendantOrSelf),
            "parent" => Some(Axis::Parent),
            "ancestor" => Some(Axis::Ancestor),
            "ancestor-or-self" => Some(Axis::AncestorOrSelf),
            "following-sibling" => Some(Axis::FollowingSibling),
            "preceding-sibling" => Some(Axis::PrecedingSibling),
            "following" => Some(Axis::Following),
            "preceding" => Some(Axis::Preceding),
            "self" => Some(Axis::Self_),
            "attribute" => Some(Axis::Attribute),
            "namespace" => Some(Axis::Namespace),
            _ => None,
        }
    }
}

/// Node test in a location step
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    /// `*`: any node of the principal type
    Any,
    /// `prefix:*`
    NamespaceWildcard(String),
    /// `local` or `prefix:local`
    Name(String),
    /// node()
    Node,
    /// text()
    Text,
    /// comment()
    Comment,
    /// processing-instruction(literal?)
    ProcessingInstruction(Option<String>),
}

/// XPath parser
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    source: &'a str,
    current: Token,
    depth: usize,
    operators: usize,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Result<Self, XPathError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Parser {
            lexer,
            source: input,
            current,
            depth: 0,
            operators: 0,
        })
    }

    /// Parse a complete expression
    pub fn parse(&mut self) -> Result<Expr, XPathError> {
        let expr = self.parse_or_expr()?;
        if self.current != Token::Eof {
            return Err(self.error(format!("unexpected {:?} after expression", self.current)));
        }
        Ok(expr)
    }

    fn error(&self, message: impl Into<String>) -> XPathError {
        XPathError::Syntax {
            expr: self.source.to_string(),
            message: message.into(),
        }
    }

    fn advance(&mut self) -> Result<Token, XPathError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn expect(&mut self, token: Token) -> Result<(), XPathError> {
        if self.current == token {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", token, self.current)))
        }
    }

    fn add_operator(&mut self) -> Result<(), XPathError> {
        self.operators += 1;
        if self.operators > MAX_EXPRESSION_OPERATORS {
            return Err(self.error(format!(
                "expression has more than {} operators",
                MAX_EXPRESSION_OPERATORS
            )));
        }
        Ok(())
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, XPathError>,
        op_for: fn(&Token) -> Option<BinaryOp>,
    ) -> Result<Expr, XPathError> {
        let mut left = next(self)?;
        while let Some(op) = op_for(&self.current) {
            self.add_operator()?;
            self.advance()?;
            let right = next(self)?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    /// Every nested sub-expression (parentheses, predicates, arguments)
    /// comes through here
    fn parse_or_expr(&mut self) -> Result<Expr, XPathError> {
        self.depth += 1;
        if self.depth > MAX_EXPRESSION_NESTING {
            return Err(self.error(format!(
                "expression nests more than {} levels",
                MAX_EXPRESSION_NESTING
            )));
        }
        let expr = self.binary_level(Self::parse_and_expr, |t| (*t == Token::Or).then_some(BinaryOp::Or));
        self.depth -= 1;
        expr
    }

    fn parse_and_expr(&mut self) -> Result<Expr, XPathError> {
        self.binary_level(Self::parse_equality_expr, |t| (*t == Token::And).then_some(BinaryOp::And))
    }

    fn parse_equality_expr(&mut self) -> Result<Expr, XPathError> {
        self.binary_level(Self::parse_relational_expr, |t| match t {
            Token::Eq => Some(BinaryOp::Eq),
            Token::NotEq => Some(BinaryOp::NotEq),
            _ => None,
        })
    }

    fn parse_relational_expr(&mut self) -> Result<Expr, XPathError> {
        self.binary_level(Self::parse_additive_expr, |t| match t {
            Token::Lt => Some(BinaryOp::Lt),
            Token::LtEq => Some(BinaryOp::LtEq),
            Token::Gt => Some(BinaryOp::Gt),
            Token::GtEq => Some(BinaryOp::GtEq),
            _ => None,
        })
    }

    fn parse_additive_expr(&mut self) -> Result<Expr, XPathError> {
        self.binary_level(Self::parse_multiplicative_expr, |t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn parse_multiplicative_expr(&mut self) -> Result<Expr, XPathError> {
        self.binary_level(Self::parse_unary_expr, |t| match t {
            Token::Multiply => Some(BinaryOp::Mul),
            Token::Div => Some(BinaryOp::Div),
            Token::Mod => Some(BinaryOp::Mod),
            _ => None,
        })
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, XPathError> {
        if self.current == Token::Minus {
            self.add_operator()?;
            self.advance()?;
            let expr = self.parse_unary_expr()?;
            Ok(Expr::Negate(Box::new(expr)))
        } else {
            self.parse_union_expr()
        }
    }

    fn parse_union_expr(&mut self) -> Result<Expr, XPathError> {
        let mut left = self.parse_path_expr()?;
        while self.current == Token::Pipe {
            self.add_operator()?;
            self.advance()?;
            let right = self.parse_path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.current,
            Token::NameTest(_) | Token::NodeType(_) | Token::Axis(_) | Token::At | Token::Dot | Token::DoubleDot
        )
    }

    fn parse_path_expr(&mut self) -> Result<Expr, XPathError> {
        match &self.current {
            Token::Slash => {
                self.advance()?;
                let steps = if self.starts_step() {
                    self.parse_relative_steps()?
                } else {
                    Vec::new()
                };
                Ok(Expr::Path(LocationPath { absolute: true, steps }))
            }
            Token::DoubleSlash => {
                self.advance()?;
                let mut steps = vec![Step::descendant_or_self()];
                steps.extend(self.parse_relative_steps()?);
                Ok(Expr::Path(LocationPath { absolute: true, steps }))
            }
            _ if self.starts_step() => {
                let steps = self.parse_relative_steps()?;
                Ok(Expr::Path(LocationPath { absolute: false, steps }))
            }
            _ => self.parse_filter_expr(),
        }
    }

    /// Step (('/' | '//') Step)*
    fn parse_relative_steps(&mut self) -> Result<Vec<Step>, XPathError> {
        let mut steps = vec![self.parse_step()?];
        self.parse_step_continuation(&mut steps)?;
        Ok(steps)
    }

    fn parse_step_continuation(&mut self, steps: &mut Vec<Step>) -> Result<(), XPathError> {
        loop {
            match self.current {
                Token::Slash => {
                    self.advance()?;
                }
                Token::DoubleSlash => {
                    self.advance()?;
                    steps.push(Step::descendant_or_self());
                }
                _ => return Ok(()),
            }
            steps.push(self.parse_step()?);
        }
    }

    fn parse_filter_expr(&mut self) -> Result<Expr, XPathError> {
        let primary = self.parse_primary_expr()?;
        let predicates = self.parse_predicates()?;
        let mut steps = Vec::new();
        self.parse_step_continuation(&mut steps)?;

        if predicates.is_empty() && steps.is_empty() {
            Ok(primary)
        } else {
            Ok(Expr::Filter {
                primary: Box::new(primary),
                predicates,
                steps,
            })
        }
    }

    fn parse_primary_expr(&mut self) -> Result<Expr, XPathError> {
        match self.advance()? {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Literal(s) => Ok(Expr::String(s)),
            Token::Variable(name) => Ok(Expr::Variable(name)),
            Token::LeftParen => {
                let expr = self.parse_or_expr()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }
            Token::FunctionName(name) => {
                self.expect(Token::LeftParen)?;
                let args = self.parse_function_args()?;
                Ok(Expr::Function(name, args))
            }
            other => Err(self.error(format!("unexpected {:?}", other))),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, XPathError> {
        let mut predicates = Vec::new();
        while self.current == Token::LeftBracket {
            self.advance()?;
            predicates.push(self.parse_or_expr()?);
            self.expect(Token::RightBracket)?;
        }
        Ok(predicates)
    }

    fn parse_step(&mut self) -> Result<Step, XPathError> {
        match self.current {
            Token::Dot => {
                self.advance()?;
                return Ok(Step::new(Axis::Self_, NodeTest::Node));
            }
            Token::DoubleDot => {
                self.advance()?;
                return Ok(Step::new(Axis::Parent, NodeTest::Node));
            }
            _ => {}
        }

        let axis = match &self.current {
            Token::At => {
                self.advance()?;
                Axis::Attribute
            }
            Token::Axis(name) => {
                let axis = Axis::from_name(name).ok_or_else(|| self.error(format!("unknown axis '{}'", name)))?;
                self.advance()?;
                self.expect(Token::DoubleColon)?;
                axis
            }
            _ => Axis::Child,
        };

        let node_test = match self.advance()? {
            Token::NameTest(name) if name == "*" => NodeTest::Any,
            Token::NameTest(name) => match name.strip_suffix(":*") {
                Some(prefix) => NodeTest::NamespaceWildcard(prefix.to_string()),
                None => NodeTest::Name(name),
            },
            Token::NodeType(kind) => {
                self.expect(Token::LeftParen)?;
                let test = match kind.as_str() {
                    "node" => NodeTest::Node,
                    "text" => NodeTest::Text,
                    "comment" => NodeTest::Comment,
                    _ => {
                        let target = match &self.current {
                            Token::Literal(s) => Some(s.clone()),
                            _ => None,
                        };
                        if target.is_some() {
                            self.advance()?;
                        }
                        NodeTest::ProcessingInstruction(target)
                    }
                };
                self.expect(Token::RightParen)?;
                test
            }
            other => return Err(self.error(format!("expected node test, found {:?}", other))),
        };

        Ok(Step {
            axis,
            node_test,
            predicates: self.parse_predicates()?,
        })
    }

    fn parse_function_args(&mut self) -> Result<Vec<Expr>, XPathError> {
        let mut args = Vec::new();
        if self.current != Token::RightParen {
            args.push(self.parse_or_expr()?);
            while self.current == Token::Comma {
                self.advance()?;
                args.push(self.parse_or_expr()?);
            }
        }
        self.expect(Token::RightParen)?;
        Ok(args)
    }
}

/// Parse an XPath expression string
pub fn parse(input: &str) -> Result<Expr, XPathError> {
    Parser::new(input)?.parse()
}
