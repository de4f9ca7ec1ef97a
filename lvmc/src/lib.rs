//! Translator for the [lvm](../lvm/index.html) accumulator machine.
//!
//! The main entry point is [`translate`](fn.translate.html), which accepts
//! the source text of a program in a small Lisp-like language and returns
//! the linked [`Program`](../lvmx/struct.Program.html) ready to be written
//! as a code file.
//!
//! Parsing is implemented with [pest]; the crate's [`Error`](type.Error.html)
//! type is an alias of `pest::error::Error`, so every failure — including
//! scope, capacity and link errors raised long after parsing — is anchored
//! to a line and column of the source and formats the offending snippet.
//!
//! # Surface Language
//!
//! Programs are sequences of parenthesized s-expressions. Every construct
//! is an expression and yields exactly one value. Comments run from `;` to
//! the end of the line.
//!
//! ## Atoms
//!
//!  Atom       | Example      | Value
//! ------------|--------------|--------------------------------------
//! number      | `42`         | the literal, one machine word
//! character   | `'A'`        | the character's integer code
//! string      | `"hi"`       | address of a length-prefixed word array
//! identifier  | `counter`    | the variable's current value
//!
//! ## Reserved Forms
//!
//!  Form                          | Meaning
//! -------------------------------|------------------------------------------
//! `(defun name (params…) body…)` | function definition; the last body expression is the return value
//! `(setq name value)`            | assignment; first assignment in a scope creates the variable
//! `(if cond then else)`          | conditional; exactly one branch runs
//! `(loop cond body…)`            | runs `body` while `cond` is non-zero; yields 0
//! `(alloc N)`                    | reserves an `N`-word buffer, yields its address (`N` a literal)
//!
//! ## Operators
//!
//!  Arity   | Operators            | Notes
//! ---------|----------------------|--------------------------------------
//! binary   | `+ - and or`         | two's-complement, modulo 2³²
//! binary   | `= < >`              | comparisons, yield 0 or 1
//! binary   | `store`              | writes the value through the address, yields the value
//! unary    | `not`                | logical complement, yields 0 or 1
//! unary    | `load`               | reads the word at the address
//! unary    | `put`                | writes one output byte, yields its operand
//! nullary  | `get`                | reads one input byte, 0 at end of input
//!
//! # Compilation Model
//!
//! The compiler keeps the evaluation stack balanced by construction: every
//! compiled expression nets exactly one pushed word (its value) and leaves
//! the same value in the accumulator; sequencing positions pop it. Root
//! variables live at absolute data addresses, function parameters and
//! locals at frame-pointer-relative offsets. Function calls are emitted
//! with symbolic operands and resolved by a final linking pass.
//!
//! [pest]: https://docs.rs/pest/

mod ast;
mod compiler;
mod parser;
mod segment;

#[cfg(test)]
mod test;

pub use ast::{BinaryOperator, Expression, NullaryOperator, UnaryOperator};
pub use parser::{parse, Rule};

use pest::Span;

use lvmx::Program;

pub type Error = pest::error::Error<Rule>;

pub type Result<T> = std::result::Result<T, Error>;

/// Default data image capacity, in words.
pub const DATA_CAPACITY: usize = 2048;

/// Default instruction image capacity.
pub const TEXT_CAPACITY: usize = 1024;

fn new_parser_error(span: Span, message: String) -> Error {
    Error::new_from_span(pest::error::ErrorVariant::CustomError { message }, span)
}

/// Translates source text into a linked program.
///
/// The capacities bound the data and instruction images; exceeding either
/// during compilation is an error anchored to the offending expression.
pub fn translate(input: &str, data_capacity: usize, text_capacity: usize) -> Result<Program> {
    let root = parser::parse(input)?;
    compiler::compile(input, root, data_capacity, text_capacity)
}
