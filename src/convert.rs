//! Conversion module for transforming evalexpr AST nodes into our internal
//! expression representation.
//!
//! Parsing itself is delegated to the evalexpr crate; this module maps the
//! resulting AST onto our mutable [`Expr`] tree. Only the arithmetic subset of
//! the evalexpr language is accepted: `+ - * / ^`, unary negation, numeric
//! constants, variable identifiers, and the function calls `abs`, `exp`, `ln`
//! (alias `log`), `sqrt`, `sin`, `cos`. Anything else is rejected with a
//! [`ConvertError`].
//!
//! The main entry point is [`build_ast`], which recursively traverses the
//! evalexpr AST and builds up our expression tree; [`crate::Expr::parse`] wraps
//! it together with the parser.

use evalexpr::{Node, Operator, Value};

use crate::errors::ConvertError;
use crate::expr::{BinaryOp, Expr, UnaryOp};

/// Converts an evalexpr AST node into our internal expression representation.
///
/// evalexpr flattens runs of `+` and `*` into variadic nodes; these are folded
/// back into left-leaning chains of binary nodes. Exponentiation keeps a fully
/// symbolic exponent: `x^k` converts to a `Pow` node with the converted
/// exponent subtree, whatever its shape.
pub fn build_ast(node: &Node) -> Result<Expr, ConvertError> {
    match node.operator() {
        // Additions and multiplications carry any number of children
        Operator::Add => fold_children(node, BinaryOp::Add),
        Operator::Mul => fold_children(node, BinaryOp::Mul),
        Operator::Sub => {
            let children = node.children();
            Ok(Expr::binary(
                BinaryOp::Sub,
                build_ast(&children[0])?,
                build_ast(&children[1])?,
            ))
        }
        Operator::Div => {
            let children = node.children();
            Ok(Expr::binary(
                BinaryOp::Div,
                build_ast(&children[0])?,
                build_ast(&children[1])?,
            ))
        }
        Operator::Exp => {
            let children = node.children();
            Ok(Expr::binary(
                BinaryOp::Pow,
                build_ast(&children[0])?,
                build_ast(&children[1])?,
            ))
        }
        Operator::Neg => {
            let children = node.children();
            Ok(Expr::unary(UnaryOp::Neg, build_ast(&children[0])?))
        }
        Operator::Const { value } => match value {
            Value::Float(f) => Ok(Expr::constant(*f)),
            Value::Int(i) => Ok(Expr::constant(*i as f64)),
            _ => Err(ConvertError::ConstOperator(format!(
                "Expected numeric constant: {:?}",
                value
            ))),
        },
        Operator::VariableIdentifierRead { identifier } => Ok(Expr::variable(identifier.as_str())),
        Operator::FunctionIdentifier { identifier } => {
            let children = node.children();
            let op = match identifier.as_str() {
                "abs" => UnaryOp::Abs,
                "exp" => UnaryOp::Exp,
                "ln" | "log" => UnaryOp::Ln,
                "sqrt" => UnaryOp::Sqrt,
                "sin" => UnaryOp::Sin,
                "cos" => UnaryOp::Cos,
                _ => {
                    return Err(ConvertError::UnsupportedFunction(format!(
                        "Unsupported function: {:?}",
                        identifier
                    )))
                }
            };
            Ok(Expr::unary(op, build_ast(&children[0])?))
        }
        Operator::RootNode => {
            let children = node.children();
            if children.len() == 1 {
                build_ast(&children[0])
            } else {
                Err(ConvertError::RootNode(format!(
                    "Expected single child for root node: {:?}",
                    children
                )))
            }
        }
        _ => Err(ConvertError::UnsupportedOperator(format!(
            "Unsupported operator: {:?}",
            node.operator()
        ))),
    }
}

fn fold_children(node: &Node, op: BinaryOp) -> Result<Expr, ConvertError> {
    let children = node.children();
    children
        .iter()
        .skip(1)
        .try_fold(build_ast(&children[0])?, |acc, child| {
            Ok(Expr::binary(op, acc, build_ast(child)?))
        })
}
