//! Fixed-point term-rewriting optimizer for expression trees.
//!
//! Pass pipeline
//! -------------
//!  1. **useless** – neutral-element and identity removal (`x+0`, `x*1`,
//!     `x/1`, `x^1`, `-(-x)`, structural `x/x`, sign absorption).
//!  2. **fold**    – constant folding, including chain collapsing: constants
//!     separated by variables inside a run of `+` or `*` are combined by
//!     walking the parent chain and splicing the redundant node out.
//!  3. **factor**  – duplicate-operand factoring (`x+x → x*2`, `x*x → x^2`)
//!     and exponent combining (`x^k * x → x^(k+1)`, `x^a * x^b → x^(a+b)`)
//!     across commutative chains.
//!
//! Each family runs to exhaustion, then the family list repeats until nothing
//! fires. All rewriting happens *in place* on the shared nodes, so every
//! holder of a handle observes the simplified tree; the reduction never
//! changes what the expression evaluates to under any consistent binding.
//!
//! Because chain collapsing may drop a node whose recursive visit is still on
//! the call stack, a sweep holds only weak handles while descending and
//! re-upgrades before each use. A failed upgrade means a sibling's rewrite
//! recycled the node: the sweep unwinds and the driver starts over from the
//! root. No Cranelift here and no allocation beyond the rewrites themselves,
//! which keeps unit tests fast.

use crate::expr::{BinaryOp, Expr, ExprKind, UnaryOp, WeakExpr};

/// Runs all rule families until a fix-point is reached.
///
/// Returns whether any rewrite fired. The tree is modified through the shared
/// nodes, so the caller's handle (and every other holder's) sees the result.
pub fn optimize(expr: &Expr) -> bool {
    let mut mutated_any = false;
    loop {
        let mut progress = false;
        for family in [Family::Useless, Family::Fold, Family::Factor] {
            if run_family(expr, family) {
                progress = true;
                mutated_any = true;
            }
        }
        if !progress {
            break;
        }
    }
    mutated_any
}

#[derive(Clone, Copy)]
enum Family {
    Useless,
    Fold,
    Factor,
}

enum Visit {
    Clean,
    Mutated,
}

/// Drives one family to exhaustion: every sweep that mutates restarts from
/// the root, since the mutation may have restructured ancestors of nodes the
/// sweep had already passed.
fn run_family(root: &Expr, family: Family) -> bool {
    let mut mutated = false;
    loop {
        match sweep(root.downgrade(), family) {
            Visit::Mutated => mutated = true,
            Visit::Clean => break,
        }
    }
    mutated
}

/// Depth-first sweep applying one family, children before the node itself.
/// Holds no strong handle while descending so that a rewrite elsewhere can
/// expire the node under us; an expired upgrade counts as a mutation.
fn sweep(node: WeakExpr, family: Family) -> Visit {
    let (left, right) = match node.upgrade() {
        Some(strong) => (
            strong.left().map(|c| c.downgrade()),
            strong.right().map(|c| c.downgrade()),
        ),
        None => return Visit::Mutated,
    };
    for child in [left, right].into_iter().flatten() {
        if matches!(sweep(child, family), Visit::Mutated) {
            return Visit::Mutated;
        }
    }
    let strong = match node.upgrade() {
        Some(strong) => strong,
        None => return Visit::Mutated,
    };
    let fired = match family {
        Family::Useless => apply_useless(&strong),
        Family::Fold => apply_fold(&strong),
        Family::Factor => apply_factor(&strong),
    };
    if fired {
        Visit::Mutated
    } else {
        Visit::Clean
    }
}

fn const_is(expr: &Expr, value: f64) -> bool {
    expr.constant_value() == Some(value)
}

fn is_const(expr: &Expr) -> bool {
    expr.constant_value().is_some()
}

/// Moves `node`'s content into a fresh node, leaving `node` drained and ready
/// for new content. Used when a rewrite wants the old content as a child of
/// the new content, e.g. `x → x*2`.
fn lift(node: &Expr) -> Expr {
    let fresh = Expr::constant(0.0);
    fresh.assign_from(node);
    fresh
}

/// Removes `operand` from its parent by replacing the parent's content with
/// the sibling's. The parent keeps its identity; the sibling's node object and
/// `operand` drop out of the tree.
fn splice_out(operand: &Expr) -> bool {
    let parent = match operand.parent() {
        Some(parent) => parent,
        None => return false,
    };
    let sibling = match (parent.left(), parent.right()) {
        (Some(l), Some(r)) => {
            if l.ptr_eq(operand) {
                r
            } else {
                l
            }
        }
        _ => return false,
    };
    parent.assign_from(&sibling);
    true
}

/// Operands of the commutative chain containing `node`, minus `skip`.
fn chain_others(node: &Expr, op: BinaryOp, skip: &Expr) -> Vec<Expr> {
    node.travel_up_chain(op)
        .chain_operands(op)
        .into_iter()
        .filter(|candidate| !candidate.ptr_eq(skip))
        .collect()
}

// ───────────────────────────────────────────────────────────────────────────
//  Family 1 – useless-operation elimination
// ───────────────────────────────────────────────────────────────────────────
fn apply_useless(node: &Expr) -> bool {
    match node.kind() {
        ExprKind::Binary(op) => {
            let (left, right) = match (node.left(), node.right()) {
                (Some(l), Some(r)) => (l, r),
                _ => return false,
            };
            match op {
                BinaryOp::Add => {
                    if const_is(&right, 0.0) {
                        node.assign_from(&left);
                        return true;
                    }
                    if const_is(&left, 0.0) {
                        node.assign_from(&right);
                        return true;
                    }
                }
                BinaryOp::Sub => {
                    if const_is(&right, 0.0) {
                        node.assign_from(&left);
                        return true;
                    }
                    if const_is(&left, 0.0) {
                        node.set(ExprKind::Unary(UnaryOp::Neg), None, Some(right));
                        return true;
                    }
                }
                BinaryOp::Mul => {
                    if const_is(&right, 1.0) {
                        node.assign_from(&left);
                        return true;
                    }
                    if const_is(&left, 1.0) {
                        node.assign_from(&right);
                        return true;
                    }
                    if const_is(&right, -1.0) {
                        node.set(ExprKind::Unary(UnaryOp::Neg), None, Some(left));
                        return true;
                    }
                    if const_is(&left, -1.0) {
                        node.set(ExprKind::Unary(UnaryOp::Neg), None, Some(right));
                        return true;
                    }
                }
                BinaryOp::Div => {
                    if const_is(&right, 1.0) {
                        node.assign_from(&left);
                        return true;
                    }
                    if const_is(&right, -1.0) {
                        node.set(ExprKind::Unary(UnaryOp::Neg), None, Some(left));
                        return true;
                    }
                    // structural self-division
                    if left.deep_equals(&right) {
                        node.set(ExprKind::Const(1.0), None, None);
                        return true;
                    }
                }
                BinaryOp::Pow => {
                    if const_is(&right, 1.0) {
                        node.assign_from(&left);
                        return true;
                    }
                }
            }
            false
        }
        ExprKind::Unary(UnaryOp::Neg) => {
            let child = match node.right() {
                Some(c) => c,
                None => return false,
            };
            if let ExprKind::Unary(UnaryOp::Neg) = child.kind() {
                if let Some(grandchild) = child.right() {
                    node.assign_from(&grandchild);
                    return true;
                }
            }
            false
        }
        _ => false,
    }
}

// ───────────────────────────────────────────────────────────────────────────
//  Family 2 – constant folding and chain collapsing
// ───────────────────────────────────────────────────────────────────────────
fn apply_fold(node: &Expr) -> bool {
    match node.kind() {
        ExprKind::Unary(op) => {
            let child = match node.right() {
                Some(c) => c,
                None => return false,
            };
            if let Some(value) = child.constant_value() {
                node.set(ExprKind::Const(op.apply(value)), None, None);
                return true;
            }
            false
        }
        ExprKind::Binary(op) => {
            let (left, right) = match (node.left(), node.right()) {
                (Some(l), Some(r)) => (l, r),
                _ => return false,
            };
            if let (Some(lv), Some(rv)) = (left.constant_value(), right.constant_value()) {
                node.set(ExprKind::Const(op.apply(lv, rv)), None, None);
                return true;
            }
            if !op.is_commutative() {
                return false;
            }
            // Chain collapsing: one operand here is constant and another
            // constant sits somewhere else in the same +/* chain. Fold them
            // into this operand and splice the other out of the tree.
            let local_const = if is_const(&left) {
                left
            } else if is_const(&right) {
                right
            } else {
                return false;
            };
            let other = chain_others(node, op, &local_const)
                .into_iter()
                .find(is_const);
            if let Some(other) = other {
                let folded = op.apply(
                    local_const.constant_value().unwrap_or(0.0),
                    other.constant_value().unwrap_or(0.0),
                );
                local_const.set(ExprKind::Const(folded), None, None);
                splice_out(&other);
                return true;
            }
            false
        }
        _ => false,
    }
}

// ───────────────────────────────────────────────────────────────────────────
//  Family 3 – factoring and exponent combining
// ───────────────────────────────────────────────────────────────────────────
fn apply_factor(node: &Expr) -> bool {
    let op = match node.kind() {
        ExprKind::Binary(op) if op.is_commutative() => op,
        _ => return false,
    };
    let (left, right) = match (node.left(), node.right()) {
        (Some(l), Some(r)) => (l, r),
        _ => return false,
    };
    for operand in [left, right] {
        // interior chain nodes are not operands
        if operand.is_operation(op) || is_const(&operand) {
            continue;
        }
        let fired = match op {
            BinaryOp::Add => factor_sum_operand(&operand),
            BinaryOp::Mul => factor_product_operand(&operand),
            _ => false,
        };
        if fired {
            return true;
        }
    }
    false
}

/// `x + x → x*2` anywhere within a `+` chain.
fn factor_sum_operand(operand: &Expr) -> bool {
    if let Some(twin) = operand.find_same(BinaryOp::Add, operand) {
        let lifted = lift(operand);
        operand.set(
            ExprKind::Binary(BinaryOp::Mul),
            Some(lifted),
            Some(Expr::constant(2.0)),
        );
        splice_out(&twin);
        return true;
    }
    false
}

/// Product-chain rules: exponent combining for matching bases, exponent
/// increment for a bare matching factor, and `x*x → x^2`.
fn factor_product_operand(operand: &Expr) -> bool {
    if operand.is_operation(BinaryOp::Pow) {
        let (base, exponent) = match (operand.left(), operand.right()) {
            (Some(b), Some(e)) => (b, e),
            _ => return false,
        };
        let others = chain_others(operand, BinaryOp::Mul, operand);
        // x^a * x^b → x^(a+b)
        let matching_pow = others.iter().find(|candidate| {
            candidate.is_operation(BinaryOp::Pow)
                && candidate
                    .left()
                    .map_or(false, |other_base| other_base.deep_equals(&base))
        });
        if let Some(twin) = matching_pow {
            let other_exponent = match twin.right() {
                Some(e) => e,
                None => return false,
            };
            let lifted = lift(&exponent);
            exponent.set(
                ExprKind::Binary(BinaryOp::Add),
                Some(lifted),
                Some(other_exponent),
            );
            splice_out(twin);
            return true;
        }
        // x^k * x → x^(k+1); a symbolic k grows an explicit `+ 1` term
        let bare = others.iter().find(|candidate| candidate.deep_equals(&base));
        if let Some(twin) = bare {
            match exponent.constant_value() {
                Some(value) => exponent.set(ExprKind::Const(value + 1.0), None, None),
                None => {
                    let lifted = lift(&exponent);
                    exponent.set(
                        ExprKind::Binary(BinaryOp::Add),
                        Some(lifted),
                        Some(Expr::constant(1.0)),
                    );
                }
            }
            splice_out(twin);
            return true;
        }
        return false;
    }
    // x * x → x^2
    if let Some(twin) = operand.find_same(BinaryOp::Mul, operand) {
        let lifted = lift(operand);
        operand.set(
            ExprKind::Binary(BinaryOp::Pow),
            Some(lifted),
            Some(Expr::constant(2.0)),
        );
        splice_out(&twin);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::VariableTable;

    fn bind(pairs: &[(&str, f64)]) -> VariableTable {
        let mut table = VariableTable::new();
        for (name, value) in pairs {
            table.set_value(*name, *value);
        }
        table
    }

    fn optimized(text: &str) -> Expr {
        let e = Expr::parse(text).unwrap();
        optimize(&e);
        e
    }

    #[test]
    fn test_useless_operations_are_removed() {
        let table = bind(&[("x", 7.0)]);
        for (text, expected) in [
            ("x + 0", 7.0),
            ("0 + x", 7.0),
            ("x - 0", 7.0),
            ("0 - x", -7.0),
            ("x * 1", 7.0),
            ("1 * x", 7.0),
            ("x * -1", -7.0),
            ("-1 * x", -7.0),
            ("x / 1", 7.0),
            ("x / -1", -7.0),
            ("x^1", 7.0),
            ("-(-x)", 7.0),
        ] {
            let e = optimized(text);
            assert_eq!(e.evaluate(&table).unwrap(), expected, "case {text}");
        }
        // x + 0 reduces to the bare variable, through the original handle
        let e = optimized("x + 0");
        assert!(matches!(e.kind(), ExprKind::Var(name) if name == "x"));
    }

    #[test]
    fn test_structural_self_division() {
        let e = optimized("(a + b) / (a + b)");
        assert_eq!(e.constant_value(), Some(1.0));
        // different subtrees survive
        let e = optimized("(a + b) / (a + c)");
        assert!(e.is_operation(BinaryOp::Div));
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(optimized("2 + 3 * 4").constant_value(), Some(14.0));
        assert_eq!(optimized("2^3 - 1").constant_value(), Some(7.0));
        assert_eq!(optimized("sqrt(16) + abs(-1)").constant_value(), Some(5.0));
    }

    #[test]
    fn test_chain_collapsing_combines_separated_constants() {
        // 2 and 3 are separated by x in the + chain
        let e = optimized("2 + x + 3");
        assert!(e.is_operation(BinaryOp::Add));
        let operands = e.chain_operands(BinaryOp::Add);
        assert_eq!(operands.len(), 2);
        assert!(operands.iter().any(|o| o.constant_value() == Some(5.0)));
        assert_eq!(e.evaluate(&bind(&[("x", 1.0)])).unwrap(), 6.0);

        // same through a * chain
        let e = optimized("2 * x * 3 * y");
        assert_eq!(e.evaluate(&bind(&[("x", 1.0), ("y", 1.0)])).unwrap(), 6.0);
        assert_eq!(e.chain_operands(BinaryOp::Mul).len(), 3);
    }

    #[test]
    fn test_factor_duplicate_sum_operands() {
        let e = optimized("x + x");
        assert!(e.is_operation(BinaryOp::Mul));
        assert_eq!(e.evaluate(&bind(&[("x", 3.0)])).unwrap(), 6.0);

        // across a chain with another operand in between
        let e = optimized("x + y + x");
        assert_eq!(e.evaluate(&bind(&[("x", 3.0), ("y", 10.0)])).unwrap(), 16.0);
    }

    #[test]
    fn test_factor_duplicate_product_operands() {
        let e = optimized("x * x");
        assert!(e.is_operation(BinaryOp::Pow));
        assert_eq!(e.evaluate(&bind(&[("x", 3.0)])).unwrap(), 9.0);

        // repeated factoring folds the whole run into one power
        let e = optimized("x * x * x");
        assert!(e.is_operation(BinaryOp::Pow));
        assert_eq!(e.right().unwrap().constant_value(), Some(3.0));
        assert_eq!(e.evaluate(&bind(&[("x", 2.0)])).unwrap(), 8.0);
    }

    #[test]
    fn test_exponent_increment_and_combining() {
        let e = optimized("x^2 * x");
        assert!(e.is_operation(BinaryOp::Pow));
        assert_eq!(e.right().unwrap().constant_value(), Some(3.0));

        let e = optimized("x^a * x^b");
        assert!(e.is_operation(BinaryOp::Pow));
        let table = bind(&[("x", 2.0), ("a", 3.0), ("b", 4.0)]);
        assert_eq!(e.evaluate(&table).unwrap(), 128.0);

        // symbolic exponent grows an explicit + 1
        let e = optimized("x^k * x");
        assert!(e.is_operation(BinaryOp::Pow));
        let table = bind(&[("x", 2.0), ("k", 2.0)]);
        assert_eq!(e.evaluate(&table).unwrap(), 8.0);
    }

    #[test]
    fn test_optimize_reports_mutation() {
        let e = Expr::parse("x + 0").unwrap();
        assert!(optimize(&e));
        // already minimal
        let e = Expr::parse("x + y").unwrap();
        assert!(!optimize(&e));
        let e = Expr::parse("x / (y + 1)").unwrap();
        assert!(!optimize(&e));
    }

    #[test]
    fn test_rewrite_preserves_external_holders() {
        // a second holder of a subtree sees the simplified state
        let gain = Expr::parse("x * 1 + 2 + 3").unwrap();
        let holder = gain.clone();
        assert!(optimize(&gain));
        assert_eq!(holder.evaluate(&bind(&[("x", 4.0)])).unwrap(), 9.0);
    }

    // Deterministic pseudo-random trees for the evaluation-invariance
    // property. No dev-dependency needed for this.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0
        }

        fn pick(&mut self, n: usize) -> usize {
            (self.next() >> 33) as usize % n
        }
    }

    fn random_tree(rng: &mut Lcg, depth: usize) -> Expr {
        if depth == 0 {
            return match rng.pick(6) {
                0 => Expr::constant([2.0, 3.0, 5.0][rng.pick(3)]),
                1 => Expr::variable("x"),
                2 => Expr::variable("y"),
                3 => Expr::variable("z"),
                4 => Expr::constant(1.0),
                _ => Expr::constant(-1.0),
            };
        }
        match rng.pick(7) {
            0 => Expr::binary(
                BinaryOp::Add,
                random_tree(rng, depth - 1),
                random_tree(rng, depth - 1),
            ),
            1 => Expr::binary(
                BinaryOp::Sub,
                random_tree(rng, depth - 1),
                random_tree(rng, depth - 1),
            ),
            2 | 3 => Expr::binary(
                BinaryOp::Mul,
                random_tree(rng, depth - 1),
                random_tree(rng, depth - 1),
            ),
            4 => Expr::binary(
                BinaryOp::Div,
                random_tree(rng, depth - 1),
                random_tree(rng, depth - 1),
            ),
            5 => Expr::binary(
                BinaryOp::Pow,
                random_tree(rng, depth - 1),
                Expr::constant([0.0, 1.0, 2.0, 3.0][rng.pick(4)]),
            ),
            _ => Expr::unary(UnaryOp::Neg, random_tree(rng, depth - 1)),
        }
    }

    #[test]
    fn test_evaluation_invariance_fuzz() {
        let table = bind(&[("x", 1.7), ("y", -2.3), ("z", 0.9)]);
        let mut rng = Lcg(0x5eed);
        let mut checked = 0;
        for _ in 0..300 {
            let tree = random_tree(&mut rng, 4);
            let before = tree.evaluate(&table).unwrap();
            if !before.is_finite() || before.abs() > 1e9 {
                continue;
            }
            optimize(&tree);
            let after = tree.evaluate(&table).unwrap();
            let tolerance = 1e-6 * before.abs().max(1.0);
            assert!(
                (before - after).abs() <= tolerance,
                "optimization changed value: {before} vs {after} for seedling {checked}"
            );
            checked += 1;
        }
        assert!(checked > 100);
    }
}
