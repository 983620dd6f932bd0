//! Lowering of [`ProcessTree`]s to [`PetriNet`]s
//!
//! Every node is translated between a given input and output place:
//!
//! - Leaves become one (labeled or silent) transition
//! - Sequences chain their children via fresh intermediate places
//! - Exclusive choices let all children share the input and output place
//! - Concurrency is wrapped by a silent split and join transition
//! - Loops are entered and left via silent transitions; the do-part leads from an inner
//!   place `p_do_in` to `p_do_out`, the redo-part leads back
//!
//! The root is translated between a source place (initial marking) and a sink place
//! (final marking).
use crate::core::process_models::case_centric::{
    petri_net::{ArcType, Marking, PetriNet, PlaceID, StructureViolation, TransitionID},
    process_tree::{LeafLabel, Node, NodeId, OperatorType, ProcessTree},
};

///
/// Lowering produced an unsound net (or the tree is malformed)
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralInconsistency {
    /// The offending subtree, rendered as in [`ProcessTree::render`]
    pub subtree: String,
    /// What is wrong with it
    pub reason: String,
}

impl std::fmt::Display for StructuralInconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Structural inconsistency in {}: {}", self.subtree, self.reason)
    }
}

impl std::error::Error for StructuralInconsistency {}

struct Lowering<'a> {
    tree: &'a ProcessTree,
    net: PetriNet,
    visited: Vec<bool>,
    place_origins: Vec<NodeId>,
    transition_origins: Vec<NodeId>,
}

impl Lowering<'_> {
    fn inconsistency(&self, id: NodeId, reason: String) -> StructuralInconsistency {
        StructuralInconsistency {
            subtree: self.tree.render(id),
            reason,
        }
    }

    fn place(&mut self, origin: NodeId) -> PlaceID {
        self.place_origins.push(origin);
        self.net.add_place()
    }

    fn transition(
        &mut self,
        origin: NodeId,
        label: Option<String>,
        input: PlaceID,
        output: PlaceID,
    ) -> TransitionID {
        self.transition_origins.push(origin);
        let t = self.net.add_transition(label);
        self.net.add_arc(ArcType::place_to_transition(input, t), None);
        self.net.add_arc(ArcType::transition_to_place(t, output), None);
        t
    }

    fn lower_node(
        &mut self,
        id: NodeId,
        input: PlaceID,
        output: PlaceID,
    ) -> Result<(), StructuralInconsistency> {
        match self.visited.get_mut(id.0) {
            Some(seen) if !*seen => *seen = true,
            // Cyclic or shared nodes cannot be rendered safely
            Some(_) => {
                return Err(StructuralInconsistency {
                    subtree: format!("#{}", id.0),
                    reason: "Node is referenced more than once".to_string(),
                })
            }
            None => {
                return Err(StructuralInconsistency {
                    subtree: format!("#{}", id.0),
                    reason: "Unknown node".to_string(),
                })
            }
        }
        let tree = self.tree;
        let Some(node) = tree.node(id) else {
            return Err(StructuralInconsistency {
                subtree: format!("#{}", id.0),
                reason: "Unknown node".to_string(),
            });
        };
        let op = match node {
            Node::Leaf(leaf) => {
                let label = match &leaf.activity_label {
                    LeafLabel::Activity(a) => Some(a.clone()),
                    LeafLabel::Tau => None,
                };
                self.transition(id, label, input, output);
                return Ok(());
            }
            Node::Operator(op) => op,
        };
        if !node.check_children_valid() {
            let expected = match op.operator_type {
                OperatorType::Loop => "exactly 2",
                _ => "at least 1",
            };
            return Err(self.inconsistency(
                id,
                format!(
                    "{:?} operator needs {expected} children, has {}",
                    op.operator_type,
                    op.children.len()
                ),
            ));
        }

        match op.operator_type {
            OperatorType::Sequence => {
                let mut from = input;
                for (i, child) in op.children.iter().enumerate() {
                    let to = if i + 1 == op.children.len() {
                        output
                    } else {
                        self.place(id)
                    };
                    self.lower_node(*child, from, to)?;
                    from = to;
                }
            }
            OperatorType::ExclusiveChoice => {
                for child in &op.children {
                    self.lower_node(*child, input, output)?;
                }
            }
            OperatorType::Concurrency => {
                let split = self.net.add_transition(None);
                let join = self.net.add_transition(None);
                self.transition_origins.extend([id, id]);
                self.net.add_arc(ArcType::place_to_transition(input, split), None);
                self.net.add_arc(ArcType::transition_to_place(join, output), None);
                for child in &op.children {
                    let child_in = self.place(id);
                    let child_out = self.place(id);
                    self.net
                        .add_arc(ArcType::transition_to_place(split, child_in), None);
                    self.net
                        .add_arc(ArcType::place_to_transition(child_out, join), None);
                    self.lower_node(*child, child_in, child_out)?;
                }
            }
            OperatorType::Loop => {
                let do_in = self.place(id);
                let do_out = self.place(id);
                self.transition(id, None, input, do_in);
                self.lower_node(op.children[0], do_in, do_out)?;
                self.lower_node(op.children[1], do_out, do_in)?;
                self.transition(id, None, do_out, output);
            }
        }
        Ok(())
    }
}

///
/// Lower a [`ProcessTree`] to a [`PetriNet`] with initial and final marking
///
/// The initial marking holds one token in the source place, the (single) final marking
/// one token in the sink place. The resulting net is checked with
/// [`PetriNet::check_structure`].
///
/// ```rust
/// use process_forecast::{discover, event_log, lower};
///
/// let tree = discover(&event_log!(["a", "b"]), 0.0);
/// let net = lower(&tree).unwrap();
/// assert_eq!(net.places.len(), 3);
/// assert_eq!(net.transitions.len(), 2);
/// ```
pub fn lower(tree: &ProcessTree) -> Result<PetriNet, StructuralInconsistency> {
    let mut lowering = Lowering {
        tree,
        net: PetriNet::new(),
        visited: vec![false; tree.len()],
        place_origins: Vec::new(),
        transition_origins: Vec::new(),
    };
    let source = lowering.place(tree.root());
    let sink = lowering.place(tree.root());
    lowering.lower_node(tree.root(), source, sink)?;

    let Lowering {
        mut net,
        place_origins,
        transition_origins,
        ..
    } = lowering;
    net.initial_marking = Some(Marking::from([(source, 1)]));
    net.final_markings = Some(vec![Marking::from([(sink, 1)])]);

    if let Err(violation) = net.check_structure() {
        let origin = match &violation {
            StructureViolation::DanglingTransition(t)
            | StructureViolation::UnreachableTransition(t) => transition_origins[t.0],
            StructureViolation::IsolatedPlace(p) | StructureViolation::UnreachablePlace(p) => {
                place_origins[p.0]
            }
            StructureViolation::MissingInitialMarking
            | StructureViolation::MissingFinalMarking => tree.root(),
        };
        return Err(StructuralInconsistency {
            subtree: tree.render(origin),
            reason: violation.to_string(),
        });
    }
    Ok(net)
}
