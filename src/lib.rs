//! # aml
//!
//! AML is a configuration language that extends JSON with expressions,
//! object composition (`&`), comprehensions, string interpolation,
//! conditional fields, pattern-match keys, user-defined functions and a
//! standard library. Evaluation is lazy: each key is computed only when it
//! is looked up, reference cycles fail cleanly, and every decode runs under
//! an execution budget.
//!
//! ```
//! let v: serde_json::Value = aml::from_str("a: 1 + 1").unwrap();
//! assert_eq!(v, serde_json::json!({"a": 2}));
//! ```
//!
//! Module layout:
//!
//! - `parser` — source text to AST
//! - `ast` — the tree both sides share
//! - `value` / `object` / `field` / `array` — the lazy value model
//! - `scope` / `expression` / `op` / `merge` / `list` / `strings` — evaluation
//! - `builtins` — globals, `std.*` and the bundled `std.aml`
//! - `printer` — AST back to canonical AML text

use std::io::Read;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

pub mod ast;
pub mod parser;
pub mod printer;

mod array;
mod builtins;
mod context;
mod error;
mod expression;
mod field;
mod list;
mod merge;
mod object;
mod op;
mod scope;
mod strings;
mod value;

pub use context::{Context, DEFAULT_TICKS};
pub use error::{Error, EvalError};
pub use parser::ParserError;
pub use scope::Scope;
pub use value::{eval, to_value, Type, Value};

/// Streaming decoder: parse, evaluate under a fresh tick budget, and
/// deserialize the resolved tree into the caller's type.
///
/// ```
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Config {
///     replicas: i64,
/// }
///
/// let config: Config = aml::Decoder::new("replicas: 2 + 1".as_bytes())
///     .decode()
///     .unwrap();
/// assert_eq!(config.replicas, 3);
/// ```
pub struct Decoder<R> {
    input: R,
    filename: String,
    ticks: i64,
    cancel: Option<Arc<AtomicBool>>,
}

impl<R: Read> Decoder<R> {
    pub fn new(input: R) -> Self {
        Decoder {
            input,
            filename: "<input>".to_string(),
            ticks: DEFAULT_TICKS,
            cancel: None,
        }
    }

    /// Name used in diagnostics.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Override the execution budget for this decode.
    pub fn with_ticks(mut self, ticks: i64) -> Self {
        self.ticks = ticks;
        self
    }

    /// Cancel evaluation cooperatively when `flag` becomes true.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Evaluate the input and deserialize the result.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, Error> {
        let data = self.decode_value()?;
        Ok(serde_json::from_value(data)?)
    }

    /// Evaluate the input to a plain JSON tree.
    pub fn decode_value(mut self) -> Result<serde_json::Value, Error> {
        let mut source = String::new();
        self.input.read_to_string(&mut source)?;

        let node = parser::parse(&self.filename, &source)?;
        debug!(filename = %self.filename, ticks = self.ticks, "decoding");

        let mut ctx = Context::new(self.ticks);
        if let Some(cancel) = self.cancel {
            ctx = ctx.with_cancel(cancel);
        }
        let value = eval(&ctx, &Scope::default(), &node)?;
        Ok(value.interface(&ctx)?)
    }
}

/// Decode an AML document from a string.
pub fn from_str<T: DeserializeOwned>(input: &str) -> Result<T, Error> {
    Decoder::new(input.as_bytes()).decode()
}

/// Decode an AML document from a reader.
pub fn from_reader<T: DeserializeOwned, R: Read>(input: R) -> Result<T, Error> {
    Decoder::new(input).decode()
}
