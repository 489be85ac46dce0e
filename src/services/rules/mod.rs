//! Rule engine: a sandboxed interpreter for rule conditions
//!
//! Conditions are parsed once per watch group into an AST and checked
//! against the closed set of bindings, functions and methods the interpreter
//! knows. Nothing outside that grammar can be expressed, so a condition can
//! read the cycle's sample and diff but never reach the filesystem or the
//! process.

pub mod engine;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use engine::{CompiledRule, RuleEngine, RuleInput, RuleOutcome, change_types, dominant_type};
pub use functions::FunctionRegistry;
pub use value::{Reducer, Value};

/// A condition that cannot be compiled. The rule never runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("unknown method '.{0}()'")]
    UnknownMethod(String),
    #[error("{name}() takes {expected} arguments ({got} given)")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("condition too complex: {0}")]
    TooComplex(String),
}

/// A failure while evaluating a compiled condition. The rule is treated as
/// not triggered for that evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("type error: {0}")]
    Type(String),
    #[error("{name}() takes {expected} arguments ({got} given)")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("bad argument: {0}")]
    Argument(String),
    #[error("division by zero")]
    DivisionByZero,
}

impl From<EvalError> for RuleError {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::Arity {
                name,
                expected,
                got,
            } => RuleError::Arity {
                name,
                expected,
                got,
            },
            other => RuleError::Syntax {
                offset: 0,
                message: other.to_string(),
            },
        }
    }
}
