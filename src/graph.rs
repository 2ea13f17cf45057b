//! Signal-flow graph structure: nodes, directed gain connections, and the
//! graph that owns them.
//!
//! A [`Node`] is a named signal; a [`Connection`] is a directed edge carrying
//! a symbolic gain [`Expr`]. Nodes own their outgoing connections; connections
//! reference their target weakly, so cyclic topologies (feedback is the whole
//! point of a signal-flow graph) cannot keep nodes alive behind the graph's
//! back. The [`Graph`] owns the nodes strongly, keyed by unique name, and
//! designates one input and one output node; reduction to a closed-form gain
//! is performed by [`Graph::mason`].
//!
//! Self-loops are legal and represent feedback gain on a single node.
//! Parallel edges between the same pair of nodes are permitted.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use colored::Colorize;

use crate::errors::SolveError;
use crate::expr::Expr;

struct NodeInner {
    name: String,
    outgoing: Vec<Connection>,
}

/// A shared handle to a named graph vertex. Equality is handle identity.
#[derive(Clone)]
pub struct Node(Rc<RefCell<NodeInner>>);

impl Node {
    fn new(name: &str) -> Self {
        Node(Rc::new(RefCell::new(NodeInner {
            name: name.to_string(),
            outgoing: Vec::new(),
        })))
    }

    /// The node's name, unique within its graph.
    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    /// Creates a directed connection from this node to `other` and appends it
    /// to this node's outgoing list. Direction matters; `connect_to(self)`
    /// creates a self-loop.
    pub fn connect_to(&self, other: &Node) -> Connection {
        let connection = Connection(Rc::new(RefCell::new(ConnectionInner {
            target: Rc::downgrade(&other.0),
            target_name: other.name(),
            gain: None,
        })));
        self.0.borrow_mut().outgoing.push(connection.clone());
        connection
    }

    /// Creates a directed connection from `other` to this node.
    pub fn connect_from(&self, other: &Node) -> Connection {
        other.connect_to(self)
    }

    /// Removes every connection between this node and `other`, in both
    /// directions. With parallel edges this may remove more than one
    /// connection.
    pub fn disconnect_from(&self, other: &Node) {
        self.0
            .borrow_mut()
            .outgoing
            .retain(|connection| !connection.targets(other));
        if !self.ptr_eq(other) {
            other
                .0
                .borrow_mut()
                .outgoing
                .retain(|connection| !connection.targets(self));
        }
    }

    /// Snapshot of the outgoing connection handles.
    pub fn outgoing(&self) -> Vec<Connection> {
        self.0.borrow().outgoing.clone()
    }

    /// Whether two handles refer to the same node object.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Node {}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.name())
    }
}

struct ConnectionInner {
    target: Weak<RefCell<NodeInner>>,
    target_name: String,
    gain: Option<Expr>,
}

/// A shared handle to a directed edge with a symbolic gain.
///
/// The gain must be assigned with [`Connection::set_expression`] before the
/// connection participates in gain computation.
#[derive(Clone)]
pub struct Connection(Rc<RefCell<ConnectionInner>>);

impl Connection {
    /// Assigns the gain expression. The handle is shared, not copied: a later
    /// in-place rewrite of the expression is visible through the connection.
    pub fn set_expression(&self, expression: Expr) {
        self.0.borrow_mut().gain = Some(expression);
    }

    /// The gain expression, if one has been assigned.
    pub fn expression(&self) -> Option<Expr> {
        self.0.borrow().gain.clone()
    }

    /// The target node, if it still exists.
    pub fn target(&self) -> Option<Node> {
        self.0.borrow().target.upgrade().map(Node)
    }

    pub(crate) fn target_or_err(&self) -> Result<Node, SolveError> {
        self.target().ok_or_else(|| SolveError::DanglingTarget {
            target: self.0.borrow().target_name.clone(),
        })
    }

    pub(crate) fn gain_or_err(&self) -> Result<Expr, SolveError> {
        self.expression().ok_or_else(|| SolveError::ExpressionUnset {
            target: self.0.borrow().target_name.clone(),
        })
    }

    pub(crate) fn ptr_eq(&self, other: &Connection) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn targets(&self, node: &Node) -> bool {
        self.target().is_some_and(|target| target.ptr_eq(node))
    }
}

/// A signal-flow graph: a set of uniquely named nodes plus a designated input
/// and output node.
///
/// # Example
/// ```
/// use sfg_mason::{Expr, Graph};
///
/// let mut graph = Graph::new();
/// let n1 = graph.create_node("n1");
/// let n2 = graph.create_node("n2");
/// n1.connect_to(&n2).set_expression(Expr::parse("g").unwrap());
/// n2.connect_to(&n2).set_expression(Expr::parse("h").unwrap());
/// graph.set_forward_path(&n1, &n2);
///
/// let gain = graph.mason().unwrap(); // g / (1 - h)
/// let mut table = gain.generate_variable_table();
/// table.set_value("g", 2.0);
/// table.set_value("h", 0.5);
/// assert_eq!(gain.evaluate(&table).unwrap(), 4.0);
/// ```
#[derive(Default)]
pub struct Graph {
    nodes: Vec<Node>,
    input: Option<Node>,
    output: Option<Node>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node with the given name and returns its handle. Names are
    /// unique per graph; if the name is already taken, the existing handle is
    /// returned.
    pub fn create_node(&mut self, name: &str) -> Node {
        if let Some(existing) = self.find_node(name) {
            return existing;
        }
        let node = Node::new(name);
        self.nodes.push(node.clone());
        node
    }

    /// Looks up a node by name.
    pub fn find_node(&self, name: &str) -> Option<Node> {
        self.nodes.iter().find(|node| node.name() == name).cloned()
    }

    /// The graph's nodes in creation order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Designates the input and output nodes of the forward path.
    pub fn set_forward_path(&mut self, input: &Node, output: &Node) {
        self.input = Some(input.clone());
        self.output = Some(output.clone());
    }

    /// The designated input node.
    pub fn input(&self) -> Option<Node> {
        self.input.clone()
    }

    /// The designated output node.
    pub fn output(&self) -> Option<Node> {
        self.output.clone()
    }

    /// Reduces the graph to a single closed-form gain expression using the
    /// generalized Mason rule.
    pub fn mason(&self) -> Result<Expr, SolveError> {
        crate::mason::reduce(self)
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {} nodes", "Graph".cyan(), self.nodes.len())?;
        for node in &self.nodes {
            let targets: Vec<String> = node
                .outgoing()
                .iter()
                .map(|connection| match connection.expression() {
                    Some(gain) => format!("{} [{gain}]", connection.0.borrow().target_name),
                    None => format!("{} [unset]", connection.0.borrow().target_name),
                })
                .collect();
            writeln!(f, "    {}: {} -> {}", "Node".cyan(), node.name(), targets.join(", "))?;
        }
        let ends = match (&self.input, &self.output) {
            (Some(input), Some(output)) => format!("{} -> {}", input.name(), output.name()),
            _ => "unset".to_string(),
        };
        writeln!(f, "    {}: {}", "Forward path".cyan(), ends)?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}
