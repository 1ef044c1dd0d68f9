// Evaluator and top-level error types

use thiserror::Error;

use crate::ast::Position;
use crate::parser::ParserError;
use crate::value::Type;

/// Errors produced while evaluating an AST.
///
/// Positions are attached by [`wrap_err`] as evaluation unwinds, producing
/// diagnostics of the form `[source]:line:col: message`. The execution-limit
/// and cancellation signals are never position-wrapped so they reach the
/// decoder entry unchanged.
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("{0}")]
    Cycle(String),

    #[error("operator {op} is not compatible with types {left} and {right}")]
    IncompatibleTypes {
        op: String,
        left: Type,
        right: Type,
    },

    #[error("exceeded execution limit")]
    ExecutionLimit,

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("{0}")]
    Argument(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("{pos}: {err}")]
    Positioned {
        pos: Position,
        #[source]
        err: Box<EvalError>,
    },
}

impl EvalError {
    pub fn evaluation(msg: impl Into<String>) -> Self {
        EvalError::Evaluation(msg.into())
    }

    pub fn argument(msg: impl Into<String>) -> Self {
        EvalError::Argument(msg.into())
    }

    pub fn cycle(msg: impl Into<String>) -> Self {
        EvalError::Cycle(msg.into())
    }

    /// The innermost error, with every position layer stripped.
    pub fn root(&self) -> &EvalError {
        match self {
            EvalError::Positioned { err, .. } => err.root(),
            other => other,
        }
    }

    pub fn is_key_not_found(&self) -> bool {
        matches!(self.root(), EvalError::KeyNotFound(_))
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self.root(), EvalError::Cycle(_))
    }

    fn is_signal(&self) -> bool {
        matches!(self, EvalError::ExecutionLimit | EvalError::Cancelled)
    }
}

/// Attach a source position to an error.
///
/// Wrapping is idempotent: an error already carrying `pos` is returned
/// unchanged, as are errors from synthetic (position-less) nodes and the
/// budget/cancel signals.
pub fn wrap_err(pos: &Position, err: EvalError) -> EvalError {
    if !pos.is_set() || err.is_signal() {
        return err;
    }
    if let EvalError::Positioned { pos: inner, .. } = &err {
        if inner == pos {
            return err;
        }
    }
    EvalError::Positioned {
        pos: pos.clone(),
        err: Box::new(err),
    }
}

/// Top-level error for the decoder and CLI.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParserError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: usize) -> Position {
        Position {
            source: "f.aml".into(),
            line,
            col: 2,
            offset: 10,
        }
    }

    #[test]
    fn test_wrap_is_idempotent() {
        let err = wrap_err(&pos(1), EvalError::KeyNotFound("x".into()));
        let err = wrap_err(&pos(1), err);
        assert_eq!(err.to_string(), "[f.aml]:1:2: key not found: x");
    }

    #[test]
    fn test_wrap_chains_distinct_positions() {
        let err = wrap_err(&pos(1), EvalError::KeyNotFound("x".into()));
        let err = wrap_err(&pos(3), err);
        assert_eq!(err.to_string(), "[f.aml]:3:2: [f.aml]:1:2: key not found: x");
        assert!(err.is_key_not_found());
    }

    #[test]
    fn test_signals_stay_bare() {
        let err = wrap_err(&pos(1), EvalError::ExecutionLimit);
        assert_eq!(err.to_string(), "exceeded execution limit");
    }
}
