//! Expression module for representing symbolic gain expressions.
//!
//! This module defines the mutable expression tree at the heart of the crate.
//! An [`Expr`] is a cheap-to-clone handle to a shared, reference-counted node,
//! so the same subtree can be held simultaneously by a `Connection` gain, a
//! `VariableTable` entry, and the assembled transfer function. Rewrites happen
//! *in place* through the handle: every holder observes the simplified state,
//! and no holder's handle is ever invalidated by a rewrite.
//!
//! A node is one of five kinds:
//! - `Invalid`: a drained node; evaluating it is a programming error
//! - `Const`: a floating point literal
//! - `Var`: a named symbol resolved through a [`VariableTable`]
//! - `Unary`: negation or a function applied to one child (stored in the right slot)
//! - `Binary`: `+ - * / ^` applied to two children
//!
//! Each non-root node carries a weak back-reference to its structural parent.
//! The optimizer uses it to walk runs of identical associative operators
//! (chain collapsing); it is never used to extend a node's lifetime.
//!
//! Trees are built three ways:
//! - the `constant` / `variable` / `unary` / `binary` constructors, which take
//!   ownership of their sub-expressions and re-parent them,
//! - [`Expr::parse`], which runs the text through the evalexpr parser,
//! - [`Expr::deep_clone`], which copies a tree with fresh node identities.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use evalexpr::build_operator_tree;

use crate::convert::build_ast;
use crate::errors::{EvalError, ParseError};
use crate::table::VariableTable;

/// Unary operators and functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Absolute value
    Abs,
    /// Exponential function
    Exp,
    /// Natural logarithm
    Ln,
    /// Square root
    Sqrt,
    /// Sine (argument in radians)
    Sin,
    /// Cosine (argument in radians)
    Cos,
}

impl UnaryOp {
    /// Applies the operator to a value.
    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Ln => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
    /// Exponentiation
    Pow,
}

impl BinaryOp {
    /// Applies the operator to two values.
    pub fn apply(self, l: f64, r: f64) -> f64 {
        match self {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            BinaryOp::Pow => l.powf(r),
        }
    }

    /// Whether operand order is irrelevant and runs of this operator form a
    /// collapsible chain.
    pub fn is_commutative(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Mul)
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
        }
    }
}

/// The content of an expression node, exclusive of its children.
///
/// Two kinds compare equal when they carry the same operator, value, or name;
/// this is the one-level structural equality used by [`Expr::is_same_as`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A drained or not-yet-initialized node
    Invalid,
    /// A constant floating point value
    Const(f64),
    /// A reference to a named variable
    Var(String),
    /// A unary operator; the single child lives in the right slot
    Unary(UnaryOp),
    /// A binary operator with two children
    Binary(BinaryOp),
}

#[derive(Debug)]
struct ExprNode {
    kind: ExprKind,
    left: Option<Expr>,
    right: Option<Expr>,
    parent: Weak<RefCell<ExprNode>>,
}

/// A shared handle to a mutable expression node.
///
/// Cloning the handle shares the node; use [`Expr::deep_clone`] for a
/// structural copy with fresh identities.
#[derive(Clone)]
pub struct Expr(Rc<RefCell<ExprNode>>);

/// A non-owning handle to an expression node.
///
/// The optimizer holds these across recursive rule applications so that a
/// sibling's rewrite dropping the node is observable as a failed upgrade.
#[derive(Clone)]
pub(crate) struct WeakExpr(Weak<RefCell<ExprNode>>);

impl WeakExpr {
    pub(crate) fn upgrade(&self) -> Option<Expr> {
        self.0.upgrade().map(Expr)
    }
}

impl Expr {
    fn with(kind: ExprKind, left: Option<Expr>, right: Option<Expr>) -> Self {
        let node = Expr(Rc::new(RefCell::new(ExprNode {
            kind,
            left: None,
            right: None,
            parent: Weak::new(),
        })));
        node.relink(left, right);
        node
    }

    /// Creates a constant node.
    pub fn constant(value: f64) -> Self {
        Self::with(ExprKind::Const(value), None, None)
    }

    /// Creates a named variable node.
    pub fn variable(name: impl Into<String>) -> Self {
        Self::with(ExprKind::Var(name.into()), None, None)
    }

    /// Creates a unary node, taking ownership of the child.
    pub fn unary(op: UnaryOp, child: Expr) -> Self {
        Self::with(ExprKind::Unary(op), None, Some(child))
    }

    /// Creates a binary node, taking ownership of both children.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::with(ExprKind::Binary(op), Some(left), Some(right))
    }

    /// Parses expression text into a tree.
    ///
    /// Grammar (precedence low to high): `+ -` (infix, also unary prefix),
    /// then `* /`, then `^`, then atoms: number literal, symbol name, function
    /// call, or parenthesized sub-expression. Malformed input yields a
    /// [`ParseError`], never a partial tree.
    ///
    /// # Example
    /// ```
    /// use sfg_mason::Expr;
    ///
    /// let e = Expr::parse("2*s + 1/(R*C)").unwrap();
    /// let table = e.generate_variable_table();
    /// assert!(e.evaluate(&table).is_ok());
    /// ```
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let node = build_operator_tree(text)?;
        Ok(build_ast(&node)?)
    }

    /// Returns this node's kind (content without children).
    pub fn kind(&self) -> ExprKind {
        self.0.borrow().kind.clone()
    }

    /// Returns the constant value if this node is a `Const`.
    pub fn constant_value(&self) -> Option<f64> {
        match self.0.borrow().kind {
            ExprKind::Const(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this node is a binary node with the given operator.
    pub fn is_operation(&self, op: BinaryOp) -> bool {
        matches!(self.0.borrow().kind, ExprKind::Binary(o) if o == op)
    }

    /// Returns the left child handle, if any.
    pub fn left(&self) -> Option<Expr> {
        self.0.borrow().left.clone()
    }

    /// Returns the right child handle, if any. A unary node's single child
    /// lives here.
    pub fn right(&self) -> Option<Expr> {
        self.0.borrow().right.clone()
    }

    /// Returns the structural parent, if the node is attached under one.
    pub fn parent(&self) -> Option<Expr> {
        self.0.borrow().parent.upgrade().map(Expr)
    }

    /// Whether two handles refer to the same node object.
    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn downgrade(&self) -> WeakExpr {
        WeakExpr(Rc::downgrade(&self.0))
    }

    /// One-level structural equality: same kind with the same operator, value
    /// or name. Children are not compared.
    pub fn is_same_as(&self, other: &Expr) -> bool {
        self.0.borrow().kind == other.0.borrow().kind
    }

    /// Recursive structural equality over the whole subtree.
    pub fn deep_equals(&self, other: &Expr) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        if !self.is_same_as(other) {
            return false;
        }
        let same_child = |a: Option<Expr>, b: Option<Expr>| match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => a.deep_equals(&b),
            _ => false,
        };
        same_child(self.left(), other.left()) && same_child(self.right(), other.right())
    }

    /// Overwrites this node's content in place and re-links the children's
    /// parent back-references. The node's own identity and parent link are
    /// preserved, so external holders keep observing it.
    pub fn set(&self, kind: ExprKind, left: Option<Expr>, right: Option<Expr>) {
        self.0.borrow_mut().kind = kind;
        self.relink(left, right);
    }

    fn relink(&self, left: Option<Expr>, right: Option<Expr>) {
        {
            let mut node = self.0.borrow_mut();
            node.left = left;
            node.right = right;
        }
        for child in [self.left(), self.right()].into_iter().flatten() {
            child.0.borrow_mut().parent = Rc::downgrade(&self.0);
        }
    }

    /// Drains `other`'s content and children into this node, leaving `other`
    /// as a childless `Invalid` node. Stale handles to `other` then fail fast
    /// on evaluation instead of silently reusing moved content.
    pub(crate) fn assign_from(&self, other: &Expr) {
        if Rc::ptr_eq(&self.0, &other.0) {
            return;
        }
        let (kind, left, right) = {
            let mut o = other.0.borrow_mut();
            (
                std::mem::replace(&mut o.kind, ExprKind::Invalid),
                o.left.take(),
                o.right.take(),
            )
        };
        self.set(kind, left, right);
    }

    /// Replaces the parent's content with this node's content, splicing this
    /// node out of the tree. Used after a rewrite determines that the parent
    /// operation is redundant. Returns false when the node has no parent.
    pub(crate) fn collapse_into_parent(&self) -> bool {
        match self.parent() {
            Some(parent) => {
                parent.assign_from(self);
                true
            }
            None => false,
        }
    }

    /// Walks parent links while the parent is a binary node with the same
    /// operator, returning the topmost node of the chain (possibly `self`).
    pub(crate) fn travel_up_chain(&self, op: BinaryOp) -> Expr {
        let mut top = self.clone();
        while let Some(parent) = top.parent() {
            if !parent.is_operation(op) {
                break;
            }
            top = parent;
        }
        top
    }

    /// Collects the operands of the same-operator chain rooted at `self`:
    /// every descendant reached through `op` nodes that is not itself an
    /// `op` node, left to right.
    pub(crate) fn chain_operands(&self, op: BinaryOp) -> Vec<Expr> {
        let mut operands = Vec::new();
        self.collect_chain_operands(op, &mut operands);
        operands
    }

    fn collect_chain_operands(&self, op: BinaryOp, out: &mut Vec<Expr>) {
        if self.is_operation(op) {
            for child in [self.left(), self.right()].into_iter().flatten() {
                child.collect_chain_operands(op, out);
            }
        } else {
            out.push(self.clone());
        }
    }

    /// Searches the commutative-operator chain containing `self` for another
    /// operand structurally equal to `target`. The match is a different node
    /// object than `target`.
    pub(crate) fn find_same(&self, op: BinaryOp, target: &Expr) -> Option<Expr> {
        let top = self.travel_up_chain(op);
        let anchor = if top.is_operation(op) { top } else { self.clone() };
        anchor
            .chain_operands(op)
            .into_iter()
            .find(|candidate| !candidate.ptr_eq(target) && candidate.deep_equals(target))
    }

    /// Evaluates the expression against a variable table.
    ///
    /// Constants evaluate to their value, variables resolve through the table
    /// (recursively, with cycle detection), operators apply to their evaluated
    /// children. Evaluating an `Invalid` node fails with
    /// [`EvalError::InvalidNode`].
    pub fn evaluate(&self, table: &VariableTable) -> Result<f64, EvalError> {
        let mut visited = HashSet::new();
        self.evaluate_with(table, &mut visited)
    }

    pub(crate) fn evaluate_with(
        &self,
        table: &VariableTable,
        visited: &mut HashSet<String>,
    ) -> Result<f64, EvalError> {
        let kind = self.kind();
        match kind {
            ExprKind::Invalid => Err(EvalError::InvalidNode),
            ExprKind::Const(v) => Ok(v),
            ExprKind::Var(name) => table.value_of_with(&name, visited),
            ExprKind::Unary(op) => {
                let child = self.right().ok_or(EvalError::InvalidNode)?;
                Ok(op.apply(child.evaluate_with(table, visited)?))
            }
            ExprKind::Binary(op) => {
                let left = self.left().ok_or(EvalError::InvalidNode)?;
                let right = self.right().ok_or(EvalError::InvalidNode)?;
                Ok(op.apply(
                    left.evaluate_with(table, visited)?,
                    right.evaluate_with(table, visited)?,
                ))
            }
        }
    }

    /// Structurally copies the tree with fresh node identities. The copy's
    /// root has no parent; mutations of either tree are invisible to the
    /// other.
    pub fn deep_clone(&self) -> Expr {
        let left = self.left().map(|c| c.deep_clone());
        let right = self.right().map(|c| c.deep_clone());
        Self::with(self.kind(), left, right)
    }

    /// Walks the tree collecting variable names into a fresh table, binding
    /// each to a default constant: 1 for a variable sitting in the right slot
    /// of `*` or `^`, 0 everywhere else. The first occurrence of a name wins.
    ///
    /// This is the single intentional convenience path that coins values for
    /// unbound names; evaluation proper reports them as [`EvalError::MissingEntry`].
    pub fn generate_variable_table(&self) -> VariableTable {
        let mut table = VariableTable::new();
        self.collect_defaults(0.0, &mut table);
        table
    }

    fn collect_defaults(&self, default: f64, table: &mut VariableTable) {
        match self.kind() {
            ExprKind::Var(name) => {
                if table.get(&name).is_none() {
                    table.set(&name, Expr::constant(default));
                }
            }
            ExprKind::Binary(op) => {
                let right_default = match op {
                    BinaryOp::Mul | BinaryOp::Pow => 1.0,
                    _ => 0.0,
                };
                if let Some(left) = self.left() {
                    left.collect_defaults(0.0, table);
                }
                if let Some(right) = self.right() {
                    right.collect_defaults(right_default, table);
                }
            }
            ExprKind::Unary(_) => {
                if let Some(child) = self.right() {
                    child.collect_defaults(0.0, table);
                }
            }
            ExprKind::Const(_) | ExprKind::Invalid => {}
        }
    }
}

/// Formats expressions in standard mathematical notation: binary operations
/// are parenthesized infix, functions use call notation, absolute value uses
/// `|x|`, negation uses a `-` prefix.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::Invalid => write!(f, "<invalid>"),
            ExprKind::Const(v) => write!(f, "{v}"),
            ExprKind::Var(name) => write!(f, "{name}"),
            ExprKind::Unary(op) => {
                let child = match self.right() {
                    Some(c) => c,
                    None => return write!(f, "<invalid>"),
                };
                match op {
                    UnaryOp::Neg => write!(f, "(-{child})"),
                    UnaryOp::Abs => write!(f, "|{child}|"),
                    UnaryOp::Exp => write!(f, "exp({child})"),
                    UnaryOp::Ln => write!(f, "ln({child})"),
                    UnaryOp::Sqrt => write!(f, "sqrt({child})"),
                    UnaryOp::Sin => write!(f, "sin({child})"),
                    UnaryOp::Cos => write!(f, "cos({child})"),
                }
            }
            ExprKind::Binary(op) => {
                let (left, right) = match (self.left(), self.right()) {
                    (Some(l), Some(r)) => (l, r),
                    _ => return write!(f, "<invalid>"),
                };
                if op == BinaryOp::Pow {
                    write!(f, "({left}^{right})")
                } else {
                    write!(f, "({left} {} {right})", op.symbol())
                }
            }
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::variable(name)
    }

    #[test]
    fn test_constructors_link_parents() {
        let x = var("x");
        let one = Expr::constant(1.0);
        let sum = Expr::binary(BinaryOp::Add, x.clone(), one.clone());
        assert!(x.parent().unwrap().ptr_eq(&sum));
        assert!(one.parent().unwrap().ptr_eq(&sum));
        assert!(sum.parent().is_none());

        let neg = Expr::unary(UnaryOp::Neg, sum.clone());
        assert!(sum.parent().unwrap().ptr_eq(&neg));
        // unary child lives in the right slot
        assert!(neg.left().is_none());
        assert!(neg.right().unwrap().ptr_eq(&sum));
    }

    #[test]
    fn test_parse_precedence() {
        let table = VariableTable::new();
        let e = Expr::parse("1 + 2 * 3").unwrap();
        assert_eq!(e.evaluate(&table).unwrap(), 7.0);

        let e = Expr::parse("(1 + 2) * 3").unwrap();
        assert_eq!(e.evaluate(&table).unwrap(), 9.0);

        let e = Expr::parse("2^3 * 2").unwrap();
        assert_eq!(e.evaluate(&table).unwrap(), 16.0);

        let e = Expr::parse("-3 + 5").unwrap();
        assert_eq!(e.evaluate(&table).unwrap(), 2.0);

        let e = Expr::parse("10 - 4 / 2").unwrap();
        assert_eq!(e.evaluate(&table).unwrap(), 8.0);
    }

    #[test]
    fn test_parse_functions() {
        let table = VariableTable::new();
        let e = Expr::parse("exp(0) + sqrt(9) + abs(-2)").unwrap();
        assert_eq!(e.evaluate(&table).unwrap(), 6.0);

        let e = Expr::parse("ln(1) + cos(0)").unwrap();
        assert_eq!(e.evaluate(&table).unwrap(), 1.0);
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert!(Expr::parse("(1 + 2").is_err());
        assert!(Expr::parse("a + b)").is_err());
        assert!(Expr::parse("heaviside(3)").is_err());
    }

    #[test]
    fn test_evaluate_with_table() {
        let mut table = VariableTable::new();
        table.set("R", Expr::constant(2.0));
        table.set("C", Expr::constant(4.0));
        let e = Expr::parse("1 / (R * C)").unwrap();
        assert_eq!(e.evaluate(&table).unwrap(), 0.125);
    }

    #[test]
    fn test_evaluate_missing_entry() {
        let table = VariableTable::new();
        let e = Expr::parse("R + 1").unwrap();
        assert!(matches!(
            e.evaluate(&table),
            Err(EvalError::MissingEntry(name)) if name == "R"
        ));
    }

    #[test]
    fn test_evaluate_invalid_node_fails_fast() {
        let e = Expr::constant(1.0);
        e.set(ExprKind::Invalid, None, None);
        assert!(matches!(
            e.evaluate(&VariableTable::new()),
            Err(EvalError::InvalidNode)
        ));
    }

    #[test]
    fn test_is_same_as_is_shallow() {
        let a = Expr::binary(BinaryOp::Add, var("x"), Expr::constant(1.0));
        let b = Expr::binary(BinaryOp::Add, var("y"), Expr::constant(2.0));
        assert!(a.is_same_as(&b));
        assert!(!a.deep_equals(&b));

        let c = Expr::binary(BinaryOp::Add, var("x"), Expr::constant(1.0));
        assert!(a.deep_equals(&c));
    }

    #[test]
    fn test_deep_clone_is_independent() {
        let original = Expr::parse("x * 3 + y").unwrap();
        let copy = original.deep_clone();
        assert!(copy.deep_equals(&original));
        assert!(!copy.ptr_eq(&original));

        copy.set(ExprKind::Const(99.0), None, None);
        let mut table = VariableTable::new();
        table.set("x", Expr::constant(1.0));
        table.set("y", Expr::constant(2.0));
        assert_eq!(original.evaluate(&table).unwrap(), 5.0);
    }

    #[test]
    fn test_assign_from_preserves_identity_and_drains_source() {
        let target = Expr::binary(BinaryOp::Mul, var("x"), Expr::constant(1.0));
        let holder = target.clone();
        let source = Expr::constant(7.0);
        target.assign_from(&source);

        // the holder's handle sees the rewritten content
        assert_eq!(holder.constant_value(), Some(7.0));
        // the source is drained
        assert!(matches!(source.kind(), ExprKind::Invalid));
    }

    #[test]
    fn test_collapse_into_parent() {
        let x = var("x");
        let sum = Expr::binary(BinaryOp::Add, x.clone(), Expr::constant(0.0));
        let root = Expr::binary(BinaryOp::Mul, sum.clone(), Expr::constant(2.0));

        assert!(x.collapse_into_parent());
        // the former Add node now holds x's content, still attached under root
        let left = root.left().unwrap();
        assert!(left.ptr_eq(&sum));
        assert!(matches!(left.kind(), ExprKind::Var(name) if name == "x"));
        // a root without a parent cannot collapse
        assert!(!root.collapse_into_parent());
    }

    #[test]
    fn test_travel_up_chain_and_operands() {
        // ((a + b) + c) + (d * e)
        let a = var("a");
        let inner = Expr::binary(BinaryOp::Add, a.clone(), var("b"));
        let middle = Expr::binary(BinaryOp::Add, inner, var("c"));
        let product = Expr::binary(BinaryOp::Mul, var("d"), var("e"));
        let top = Expr::binary(BinaryOp::Add, middle, product.clone());

        assert!(a.travel_up_chain(BinaryOp::Add).ptr_eq(&top));
        // the product is an operand of the chain, not part of it
        assert!(product.travel_up_chain(BinaryOp::Mul).ptr_eq(&product));

        let operands = top.chain_operands(BinaryOp::Add);
        assert_eq!(operands.len(), 4);
        assert!(operands[0].ptr_eq(&a));
        assert!(operands[3].ptr_eq(&product));
    }

    #[test]
    fn test_find_same_in_chain() {
        // x + (y + x): the two x operands are distinct node objects
        let x1 = var("x");
        let x2 = var("x");
        let inner = Expr::binary(BinaryOp::Add, var("y"), x2.clone());
        let _top = Expr::binary(BinaryOp::Add, x1.clone(), inner);

        let found = x1.find_same(BinaryOp::Add, &x1).unwrap();
        assert!(found.ptr_eq(&x2));
        assert!(x2.find_same(BinaryOp::Mul, &x2).is_none());
    }

    #[test]
    fn test_generate_variable_table_defaults() {
        // right-hand operands of * and ^ default to 1, everything else to 0
        let e = Expr::parse("a*b + c + s^k").unwrap();
        let table = e.generate_variable_table();
        assert_eq!(table.value_of("a").unwrap(), 0.0);
        assert_eq!(table.value_of("b").unwrap(), 1.0);
        assert_eq!(table.value_of("c").unwrap(), 0.0);
        assert_eq!(table.value_of("s").unwrap(), 0.0);
        assert_eq!(table.value_of("k").unwrap(), 1.0);
        // the tree evaluates under its own generated table
        assert_eq!(e.evaluate(&table).unwrap(), 0.0);
    }

    #[test]
    fn test_display() {
        let e = Expr::parse("(a + 2) * b").unwrap();
        assert_eq!(e.to_string(), "((a + 2) * b)");
        let e = Expr::unary(UnaryOp::Neg, var("x"));
        assert_eq!(e.to_string(), "(-x)");
        let e = Expr::binary(BinaryOp::Pow, var("s"), Expr::constant(2.0));
        assert_eq!(e.to_string(), "(s^2)");
    }
}
