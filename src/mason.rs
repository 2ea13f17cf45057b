//! Graph reduction via the generalized Mason gain formula.
//!
//! The reduction runs in three stages:
//!
//! 1. **Enumeration**: a depth-first search from the input node carries the
//!    ordered list of nodes visited so far. Revisiting a node already on the
//!    prefix closes a loop (the prefix is trimmed to start at the first
//!    occurrence, with a wraparound segment back to it); reaching the output
//!    node records the prefix as a forward path. The search continues past
//!    the output node, since a node can be both an intermediate hub and the
//!    output.
//! 2. **Determinant**: Δ = 1 − ΣLᵢ + Σ LᵢLⱼ (non-touching pairs)
//!    − Σ LᵢLⱼLₖ (non-touching triples) + …, over loop gain products. The
//!    pairwise touching relation is precomputed once; k-combinations are
//!    enumerated in lexicographic order and a combination is accepted only
//!    when no pair within it touches. Once a whole round of k accepts
//!    nothing, larger k cannot accept either and the series stops.
//! 3. **Cofactors**: each forward path's gain is multiplied by the
//!    determinant recomputed over only the loops that do not touch the path;
//!    the final gain is the sum of these products divided by the full
//!    determinant.
//!
//! The same loop gain appears in the assembled result many times (in ΣLᵢ, in
//! every non-touching product it joins, and again in cofactors), so every
//! placement is a deep clone. The result is a true tree that can be rewritten
//! in place without corrupting other terms, and the `Connection` holders keep
//! their own expressions untouched.

use itertools::Itertools;

use crate::errors::SolveError;
use crate::expr::{BinaryOp, Expr};
use crate::graph::{Connection, Graph, Node};

/// One edge traversal within a path or loop.
#[derive(Clone)]
pub(crate) struct Segment {
    from: Node,
    to: Node,
    connection: Connection,
}

/// An ordered segment list: a forward path (no wraparound) or a loop (last
/// segment returns to the first node).
pub(crate) type Walk = Vec<Segment>;

/// Reduces the graph to `numerator / determinant`.
pub(crate) fn reduce(graph: &Graph) -> Result<Expr, SolveError> {
    let input = graph.input().ok_or(SolveError::ForwardPathUnset)?;
    let output = graph.output().ok_or(SolveError::ForwardPathUnset)?;
    let (paths, loops) = enumerate(&input, &output)?;

    let numerator = cofactor_sum(&paths, &loops)?;
    let denominator = determinant(&loops)?;
    Ok(Expr::binary(BinaryOp::Div, numerator, denominator))
}

/// Enumerates all forward paths from `input` to `output` and all loops
/// reachable from `input`.
pub(crate) fn enumerate(
    input: &Node,
    output: &Node,
) -> Result<(Vec<Walk>, Vec<Walk>), SolveError> {
    let mut paths = Vec::new();
    let mut loops = Vec::new();
    let mut prefix = Vec::new();
    let mut edges = Vec::new();
    visit(input, output, &mut prefix, &mut edges, &mut paths, &mut loops)?;
    Ok((paths, loops))
}

/// `edges[i]` is the connection actually traversed from `prefix[i]` to
/// `prefix[i + 1]`; on entry the last edge leads to `node` itself. Carrying
/// the traversed connection (rather than re-finding an edge by target later)
/// keeps parallel edges between the same node pair distinct, so each of them
/// contributes its own gain.
fn visit(
    node: &Node,
    output: &Node,
    prefix: &mut Vec<Node>,
    edges: &mut Vec<Connection>,
    paths: &mut Vec<Walk>,
    loops: &mut Vec<Walk>,
) -> Result<(), SolveError> {
    if let Some(position) = prefix.iter().position(|seen| seen == node) {
        // Everything before the first occurrence is not part of the loop;
        // the edge that led here is the wraparound segment.
        let walk = make_walk(&prefix[position..], &edges[position..]);
        // The same cycle can be reached through different simple prefixes;
        // record it once.
        if !loops.iter().any(|known| same_connections(known, &walk)) {
            loops.push(walk);
        }
        return Ok(());
    }
    prefix.push(node.clone());
    if node == output {
        paths.push(make_walk(prefix, edges));
    }
    for connection in node.outgoing() {
        let target = connection.target_or_err()?;
        edges.push(connection.clone());
        visit(&target, output, prefix, edges, paths, loops)?;
        edges.pop();
    }
    prefix.pop();
    Ok(())
}

/// Pairs each traversed edge with its endpoints. A path carries one edge
/// fewer than it has nodes; a loop carries equally many, the last one
/// wrapping back to the first node.
fn make_walk(nodes: &[Node], edges: &[Connection]) -> Walk {
    edges
        .iter()
        .enumerate()
        .map(|(i, connection)| Segment {
            from: nodes[i].clone(),
            to: nodes[(i + 1) % nodes.len()].clone(),
            connection: connection.clone(),
        })
        .collect()
}

fn same_connections(a: &Walk, b: &Walk) -> bool {
    a.len() == b.len()
        && a.iter().all(|sa| {
            b.iter()
                .any(|sb| sa.connection.ptr_eq(&sb.connection))
        })
}

/// Two walks touch iff any segment endpoint is shared between them.
pub(crate) fn touches(a: &Walk, b: &Walk) -> bool {
    a.iter().any(|sa| {
        b.iter().any(|sb| {
            sa.from == sb.from || sa.from == sb.to || sa.to == sb.from || sa.to == sb.to
        })
    })
}

/// The product of a walk's segment gains; the empty walk (the identity path
/// when input and output coincide) has gain 1.
///
/// Each factor is a deep clone. The same walk's gain enters the assembled
/// result at several positions, and in-place rewriting of an aliased subtree
/// would leak a rewrite in one term into another.
fn gain(walk: &Walk) -> Result<Expr, SolveError> {
    let mut product: Option<Expr> = None;
    for segment in walk {
        let factor = segment.connection.gain_or_err()?.deep_clone();
        product = Some(match product {
            None => factor,
            Some(acc) => Expr::binary(BinaryOp::Mul, acc, factor),
        });
    }
    Ok(product.unwrap_or_else(|| Expr::constant(1.0)))
}

/// The graph determinant over the given loops:
/// Δ = 1 − ΣLᵢ + Σ non-touching pairs − Σ non-touching triples + …
pub(crate) fn determinant(loops: &[Walk]) -> Result<Expr, SolveError> {
    let mut delta = Expr::constant(1.0);
    for one_loop in loops {
        delta = Expr::binary(BinaryOp::Sub, delta, gain(one_loop)?);
    }
    if loops.len() < 2 {
        return Ok(delta);
    }

    let touch: Vec<Vec<bool>> = loops
        .iter()
        .map(|a| loops.iter().map(|b| touches(a, b)).collect())
        .collect();

    for k in 2..=loops.len() {
        let mut accepted = 0usize;
        for combination in (0..loops.len()).combinations(k) {
            let any_touching = combination
                .iter()
                .copied()
                .tuple_combinations::<(usize, usize)>()
                .any(|(i, j)| touch[i][j]);
            if any_touching {
                continue;
            }
            let mut product = gain(&loops[combination[0]])?;
            for index in &combination[1..] {
                product = Expr::binary(BinaryOp::Mul, product, gain(&loops[*index])?);
            }
            let sign = if k % 2 == 0 {
                BinaryOp::Add
            } else {
                BinaryOp::Sub
            };
            delta = Expr::binary(sign, delta, product);
            accepted += 1;
        }
        // once every combination of this size touches, larger ones must too
        if accepted == 0 {
            break;
        }
    }
    Ok(delta)
}

/// Σ over forward paths of path-gain × cofactor, where the cofactor is the
/// determinant over only the loops not touching that path.
fn cofactor_sum(paths: &[Walk], loops: &[Walk]) -> Result<Expr, SolveError> {
    let mut sum: Option<Expr> = None;
    for path in paths {
        let untouched: Vec<Walk> = loops
            .iter()
            .filter(|one_loop| !touches(one_loop, path))
            .cloned()
            .collect();
        let term = Expr::binary(BinaryOp::Mul, gain(path)?, determinant(&untouched)?);
        sum = Some(match sum {
            None => term,
            Some(acc) => Expr::binary(BinaryOp::Add, acc, term),
        });
    }
    Ok(sum.unwrap_or_else(|| Expr::constant(0.0)))
}
