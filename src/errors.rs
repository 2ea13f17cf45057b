//! Error types for the sfg-mason crate.
//!
//! This module defines the various error types that can occur during expression
//! parsing, AST conversion, evaluation against a variable table, and signal-flow
//! graph reduction. The main error types are:
//!
//! - `ConvertError`: Errors during conversion from the evalexpr AST to our representation
//! - `ParseError`: High-level errors when parsing expression text
//! - `EvalError`: Errors while evaluating an expression against a `VariableTable`
//! - `SolveError`: Errors while reducing a graph with Mason's gain formula
//!
//! Each error type implements the standard Error trait and provides detailed error messages.

use evalexpr::{DefaultNumericTypes, EvalexprError};
use thiserror::Error;

/// Errors that can occur during conversion from the evalexpr AST to our internal
/// expression representation.
///
/// The parser accepts a wider language than this crate supports (boolean logic,
/// tuples, assignments); anything outside the arithmetic subset is rejected here.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Error when encountering an operator that is not supported by our implementation
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// Error when encountering a function that is not supported by our implementation
    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),
    /// Error when a constant value is not a number
    #[error("Expected numeric constant: {0}")]
    ConstOperator(String),
    /// Error when the root node does not have exactly one child
    #[error("Expected single child for root node: {0}")]
    RootNode(String),
}

/// Errors that can occur when parsing expression text.
///
/// Parsing stops at the first error and never yields a partial tree.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Error when parsing the expression string with evalexpr
    #[error("Failed to parse expression")]
    BuildEvalexprError(#[from] EvalexprError<DefaultNumericTypes>),
    /// Error when converting the evalexpr AST to our internal representation
    #[error("Failed to build expression tree")]
    BuildAstError(#[from] ConvertError),
}

/// Errors that can occur while evaluating an expression against a `VariableTable`.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Error when a variable has no entry in the table
    #[error("Variable not found in table: {0}")]
    MissingEntry(String),
    /// Error when evaluating a variable revisits a name already on the active
    /// evaluation stack (a => b => a)
    #[error("Cyclic variable dependency through: {0}")]
    CyclicDependency(String),
    /// Error when evaluating an `Invalid` expression node. This indicates a
    /// programming error in whoever assembled the tree, not a recoverable
    /// condition.
    #[error("Attempted to evaluate an invalid expression node")]
    InvalidNode,
    /// Reserved for rational-function manipulation layered above this core;
    /// never raised by evaluation itself.
    #[error("Exponent is not a constant: {0}")]
    NonConstantExponent(String),
}

/// Errors that can occur while reducing a signal-flow graph.
#[derive(Error, Debug)]
pub enum SolveError {
    /// Error when `mason` is called before input and output nodes are designated
    #[error("Forward path not set: designate input and output nodes first")]
    ForwardPathUnset,
    /// Error when a connection participates in gain computation before its
    /// gain expression has been assigned
    #[error("Connection into node '{target}' has no gain expression")]
    ExpressionUnset { target: String },
    /// Error when a connection's target node no longer exists in the graph
    #[error("Connection target '{target}' no longer exists")]
    DanglingTarget { target: String },
}
