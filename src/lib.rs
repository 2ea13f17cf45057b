//! Symbolic signal-flow-graph analysis via Mason's gain formula.
//!
//! This crate builds directed graphs whose edges carry symbolic gain
//! expressions, reduces them to a single transfer-function expression with
//! the generalized Mason gain formula, and simplifies the result with a
//! fixed-point term rewriter. Expressions are parsed with the
//! [evalexpr](https://github.com/ISibboI/evalexpr) crate.
//!
//! # Features
//!
//! - Mutable symbolic expression trees with shared handles
//! - Lazy recursive variable evaluation with cycle detection
//! - Fixed-point simplification (identity elimination, constant folding,
//!   factoring)
//! - Forward path and loop enumeration, touching analysis, determinant and
//!   cofactor construction
//!
//! # Example
//!
//! ```rust
//! use sfg_mason::{Expr, Graph};
//!
//! // A single feedback loop: forward gain g, loop gain h.
//! let mut graph = Graph::new();
//! let input = graph.create_node("in");
//! let output = graph.create_node("out");
//! input.connect_to(&output).set_expression(Expr::parse("g").unwrap());
//! output.connect_to(&output).set_expression(Expr::parse("h").unwrap());
//! graph.set_forward_path(&input, &output);
//!
//! // Reduce to g / (1 - h) and evaluate.
//! let transfer = graph.mason().unwrap();
//! let mut table = transfer.generate_variable_table();
//! table.set_value("g", 2.0);
//! table.set_value("h", 0.5);
//! assert_eq!(transfer.evaluate(&table).unwrap(), 4.0);
//! ```

pub use expr::Expr;
pub use graph::{Connection, Graph, Node};
pub use table::VariableTable;

pub mod prelude {
    pub use crate::convert::build_ast;
    pub use crate::expr::{BinaryOp, Expr, ExprKind, UnaryOp};
    pub use crate::graph::{Connection, Graph, Node};
    pub use crate::opt::optimize;
    pub use crate::table::VariableTable;
}

/// Conversion from parsed expressions to internal AST
pub mod convert;
/// Error types for the various failure modes
pub mod errors;
/// Expression tree representation and evaluation
pub mod expr;
/// Graph nodes and gain-carrying connections
pub mod graph;
/// Mason gain formula reduction
pub(crate) mod mason;
/// Fixed-point expression simplification
pub mod opt;
/// Named variable bindings with lazy recursive evaluation
pub mod table;
