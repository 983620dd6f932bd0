use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;

///
/// Index of a [`Node`] in the arena of a [`ProcessTree`]
///
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct NodeId(pub usize);

///
/// Leaf in a process tree
///
#[derive(Debug, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, JsonSchema)]
pub enum LeafLabel {
    /// Non-silent activity leaf
    Activity(String),
    /// Silent activity leaf
    Tau,
}

///
/// Operator type enum for [`Operator`]
///
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, Eq, PartialEq, JsonSchema)]
pub enum OperatorType {
    /// Sequence operator
    Sequence,
    /// Exclusive choice operator
    ExclusiveChoice,
    /// Concurrency operator
    Concurrency,
    /// Loop operator: first child is the do-part, second child the redo-part
    Loop,
}

impl OperatorType {
    fn symbol(&self) -> &'static str {
        match self {
            OperatorType::Sequence => "->",
            OperatorType::ExclusiveChoice => "X",
            OperatorType::Concurrency => "+",
            OperatorType::Loop => "*",
        }
    }
}

///
/// Operator node with ordered children
///
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Operator {
    /// The operator type
    pub operator_type: OperatorType,
    /// Children (arena indices), in order
    pub children: Vec<NodeId>,
}

///
/// Leaf node
///
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Leaf {
    /// The label (activity or silent)
    pub activity_label: LeafLabel,
}

///
/// Node in a process tree
///
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub enum Node {
    /// Operator node of a process tree
    Operator(Operator),
    /// Leaf node of a process tree
    Leaf(Leaf),
}

impl Node {
    ///
    /// Returns `true` if a loop operator has exactly two children or if all other operators
    /// have at least one child.
    ///
    pub fn check_children_valid(&self) -> bool {
        match self {
            Node::Operator(op) => match op.operator_type {
                OperatorType::Loop => op.children.len() == 2,
                _ => !op.children.is_empty(),
            },
            Node::Leaf(_) => true,
        }
    }
}

///
/// Process tree stored as an index-addressed arena of [`Node`]s
///
/// Trees are composed bottom-up with [`ProcessTree::leaf`], [`ProcessTree::tau`] and
/// [`ProcessTree::operator`]; the latter moves the arenas of its children into a new one.
/// Every node except the root is referenced by exactly one parent.
///
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl ProcessTree {
    ///
    /// Creates a tree consisting of a single leaf (`None` for a silent leaf)
    ///
    pub fn leaf(activity: Option<String>) -> Self {
        let activity_label = match activity {
            Some(a) => LeafLabel::Activity(a),
            None => LeafLabel::Tau,
        };
        Self {
            nodes: vec![Node::Leaf(Leaf { activity_label })],
            root: NodeId(0),
        }
    }

    /// Creates a tree consisting of a single silent leaf
    pub fn tau() -> Self {
        Self::leaf(None)
    }

    ///
    /// Creates a tree with an operator root over the given subtrees (in order)
    ///
    /// The subtree arenas are appended to the new arena, the root is placed last.
    ///
    pub fn operator(operator_type: OperatorType, children: Vec<ProcessTree>) -> Self {
        let capacity = children.iter().map(|c| c.nodes.len()).sum::<usize>() + 1;
        let mut nodes = Vec::with_capacity(capacity);
        let mut child_ids = Vec::with_capacity(children.len());
        for child in children {
            let offset = nodes.len();
            child_ids.push(NodeId(child.root.0 + offset));
            nodes.extend(child.nodes.into_iter().map(|mut node| {
                if let Node::Operator(op) = &mut node {
                    op.children.iter_mut().for_each(|c| c.0 += offset);
                }
                node
            }));
        }
        let root = NodeId(nodes.len());
        nodes.push(Node::Operator(Operator {
            operator_type,
            children: child_ids,
        }));
        Self { nodes, root }
    }

    /// Root node
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Get a node by id
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Children of a node (empty for leaves and unknown ids)
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.nodes.get(id.0) {
            Some(Node::Operator(op)) => &op.children,
            _ => &[],
        }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always contains at least its root
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    ///
    /// Returns `true` if all operator nodes have a valid number of children and
    /// every node is reachable from the root exactly once
    ///
    pub fn is_valid(&self) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            match (visited.get_mut(id.0), self.nodes.get(id.0)) {
                (Some(seen), Some(node)) => {
                    if *seen || !node.check_children_valid() {
                        return false;
                    }
                    *seen = true;
                }
                _ => return false,
            }
            stack.extend(self.children(id).iter().copied());
        }
        visited.into_iter().all(|v| v)
    }

    ///
    /// Returns all leaves below (and including) the given node, in left-to-right order
    ///
    pub fn find_all_leaves(&self, id: NodeId) -> Vec<&Leaf> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            match self.nodes.get(id.0) {
                Some(Node::Leaf(leaf)) => result.push(leaf),
                Some(Node::Operator(op)) => stack.extend(op.children.iter().rev().copied()),
                None => {}
            }
        }
        result
    }

    /// All (non-silent) activities occurring in the tree
    pub fn activities(&self) -> BTreeSet<&str> {
        self.find_all_leaves(self.root)
            .into_iter()
            .filter_map(|leaf| match &leaf.activity_label {
                LeafLabel::Activity(a) => Some(a.as_str()),
                LeafLabel::Tau => None,
            })
            .collect()
    }

    ///
    /// Render the subtree rooted at `id` in the usual textual notation,
    /// e.g., `->( 'a', X( 'b', tau ) )`
    ///
    pub fn render(&self, id: NodeId) -> String {
        match self.nodes.get(id.0) {
            Some(Node::Leaf(Leaf {
                activity_label: LeafLabel::Activity(a),
            })) => format!("'{a}'"),
            Some(Node::Leaf(Leaf {
                activity_label: LeafLabel::Tau,
            })) => "tau".to_string(),
            Some(Node::Operator(op)) => {
                let children: Vec<String> = op.children.iter().map(|c| self.render(*c)).collect();
                format!("{}( {} )", op.operator_type.symbol(), children.join(", "))
            }
            None => String::new(),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn structurally_equal(&self, id: NodeId, other: &ProcessTree, other_id: NodeId) -> bool {
        match (self.nodes.get(id.0), other.nodes.get(other_id.0)) {
            (Some(Node::Leaf(a)), Some(Node::Leaf(b))) => a.activity_label == b.activity_label,
            (Some(Node::Operator(a)), Some(Node::Operator(b))) => {
                a.operator_type == b.operator_type
                    && a.children.len() == b.children.len()
                    && a
                        .children
                        .iter()
                        .zip(b.children.iter())
                        .all(|(x, y)| self.structurally_equal(*x, other, *y))
            }
            _ => false,
        }
    }
}

/// Trees are equal if they have the same shape and labels, regardless of arena layout
impl PartialEq for ProcessTree {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_equal(self.root, other, other.root)
    }
}

impl Eq for ProcessTree {}

impl Display for ProcessTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render(self.root))
    }
}
