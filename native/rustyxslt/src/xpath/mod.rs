//! XPath 1.0 Engine
//!
//! - All axes (the namespace axis is empty)
//! - The 27 core functions, plus whatever the environment supplies
//! - Parsed expressions cached by source text

pub mod axes;
pub mod compiler;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

use thiserror::Error;

pub use compiler::{compile, CompiledExpr, Compiler};
pub use eval::{evaluate, EvalContext, Environment};
#[cfg(test)]
pub use eval::NoEnvironment;
pub use value::XPathValue;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XPathError {
    #[error("XPath syntax error in '{expr}': {message}")]
    Syntax { expr: String, message: String },

    #[error("undefined namespace prefix '{0}'")]
    UndefinedPrefix(String),

    #[error("undefined variable ${0}")]
    UndefinedVariable(String),

    #[error("unknown function {0}()")]
    UnknownFunction(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("{0}")]
    Dynamic(String),
}
