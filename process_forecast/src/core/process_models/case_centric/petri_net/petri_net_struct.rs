use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Hash, Eq, PartialOrd, Ord, JsonSchema)]
/// Place in a Petri net
pub struct Place {
    id: PlaceID,
}

impl Place {
    /// Id of this place
    pub fn id(&self) -> PlaceID {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Hash, Eq, PartialOrd, Ord, JsonSchema)]
/// Transition in a Petri net
pub struct Transition {
    /// Transition label (None if this transition is _invisible_)
    pub label: Option<String>,
    id: TransitionID,
}

impl Transition {
    /// Id of this transition
    pub fn id(&self) -> TransitionID {
        self.id
    }

    /// Whether the transition is silent
    pub fn is_silent(&self) -> bool {
        self.label.is_none()
    }
}

#[derive(
    Debug, Deserialize, Serialize, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, JsonSchema,
)]
#[serde(tag = "type", content = "nodes")]
/// Arc type in a Petri net
pub enum ArcType {
    /// From Place to Transition
    PlaceTransition(PlaceID, TransitionID),
    /// From Transition to Place
    TransitionPlace(TransitionID, PlaceID),
}

impl ArcType {
    /// Create new from place to transition
    pub fn place_to_transition(from: PlaceID, to: TransitionID) -> ArcType {
        ArcType::PlaceTransition(from, to)
    }
    /// Create new from transition to place
    pub fn transition_to_place(from: TransitionID, to: PlaceID) -> ArcType {
        ArcType::TransitionPlace(from, to)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
/// Arc in a Petri net
///
/// Connecting a transition and a place (or the other way around)
pub struct Arc {
    /// Source and target of Arc
    pub from_to: ArcType,
    /// Weight (i.e., how many tokens this arc moves)
    pub weight: u32,
}

#[derive(
    Debug, PartialEq, Clone, Copy, Serialize, Deserialize, Hash, Eq, PartialOrd, Ord, JsonSchema,
)]
/// Place ID (index into [`PetriNet::places`])
pub struct PlaceID(pub usize);

impl From<&Place> for PlaceID {
    fn from(value: &Place) -> Self {
        value.id
    }
}

#[derive(
    Debug, PartialEq, Clone, Copy, Serialize, Deserialize, Hash, Eq, PartialOrd, Ord, JsonSchema,
)]
/// Transition ID (index into [`PetriNet::transitions`])
pub struct TransitionID(pub usize);

impl From<&Transition> for TransitionID {
    fn from(value: &Transition) -> Self {
        value.id
    }
}

/// Marking of a Petri net: Assigning [`PlaceID`]s to a number of tokens
pub type Marking = BTreeMap<PlaceID, u64>;

///
/// Reasons why a Petri net is not a sound flow net
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureViolation {
    /// Initial marking is not set or empty
    MissingInitialMarking,
    /// No final marking is set
    MissingFinalMarking,
    /// Transition without input or output places
    DanglingTransition(TransitionID),
    /// Place without any connected transition
    IsolatedPlace(PlaceID),
    /// Place not on any path from an initially marked to a finally marked place
    UnreachablePlace(PlaceID),
    /// Transition not on any path from an initially marked to a finally marked place
    UnreachableTransition(TransitionID),
}

impl std::fmt::Display for StructureViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructureViolation::MissingInitialMarking => write!(f, "No initial marking"),
            StructureViolation::MissingFinalMarking => write!(f, "No final marking"),
            StructureViolation::DanglingTransition(t) => {
                write!(f, "Transition {} lacks input or output places", t.0)
            }
            StructureViolation::IsolatedPlace(p) => write!(f, "Place {} is isolated", p.0),
            StructureViolation::UnreachablePlace(p) => {
                write!(f, "Place {} is not on a path from source to sink", p.0)
            }
            StructureViolation::UnreachableTransition(t) => {
                write!(f, "Transition {} is not on a path from source to sink", t.0)
            }
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, JsonSchema)]
///
/// A Petri net of [`Place`]s and [`Transition`]s
///
/// Bipartite graph of [`Place`]s and [`Transition`]s with [`Arc`]s connecting them, as well as
/// initial and final [`Marking`]s.
/// Places and transitions are stored in arenas and addressed by their index.
pub struct PetriNet {
    /// Places
    pub places: Vec<Place>,
    /// Transitions
    pub transitions: Vec<Transition>,
    /// Arcs
    pub arcs: Vec<Arc>,
    /// Initial marking
    pub initial_marking: Option<Marking>,
    /// Final markings (any of them are accepted as a final marking)
    pub final_markings: Option<Vec<Marking>>,
}

impl PetriNet {
    /// Create new [`PetriNet`] with no places or transitions
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Add a place
    pub fn add_place(&mut self) -> PlaceID {
        let id = PlaceID(self.places.len());
        self.places.push(Place { id });
        id
    }

    /// Add a transition with an optional label (`None` for a silent transition)
    pub fn add_transition(&mut self, label: Option<String>) -> TransitionID {
        let id = TransitionID(self.transitions.len());
        self.transitions.push(Transition { label, id });
        id
    }

    /// Add an arc
    pub fn add_arc(&mut self, from_to: ArcType, weight: Option<u32>) {
        self.arcs.push(Arc {
            from_to,
            weight: weight.unwrap_or(1),
        });
    }

    /// Get a transition by id
    pub fn transition(&self, id: TransitionID) -> Option<&Transition> {
        self.transitions.get(id.0)
    }

    /// Get the preset of a [`PetriNet`] place
    pub fn preset_of_place(&self, p: PlaceID) -> Vec<TransitionID> {
        self.arcs
            .iter()
            .filter_map(|x: &Arc| match x.from_to {
                ArcType::TransitionPlace(from, to) if to == p => Some(from),
                _ => None,
            })
            .collect()
    }

    /// Get the preset of [`PetriNet`] transition referred to by passed id
    pub fn preset_of_transition(&self, t: TransitionID) -> Vec<PlaceID> {
        self.arcs
            .iter()
            .filter_map(|x: &Arc| match x.from_to {
                ArcType::PlaceTransition(from, to) if to == t => Some(from),
                _ => None,
            })
            .collect()
    }

    /// Get postset of [`PetriNet`] place referred to by passed id
    pub fn postset_of_place(&self, p: PlaceID) -> Vec<TransitionID> {
        self.arcs
            .iter()
            .filter_map(|x: &Arc| match x.from_to {
                ArcType::PlaceTransition(from, to) if from == p => Some(to),
                _ => None,
            })
            .collect()
    }

    /// Get postset of [`PetriNet`] transition referred to by passed id
    pub fn postset_of_transition(&self, t: TransitionID) -> Vec<PlaceID> {
        self.arcs
            .iter()
            .filter_map(|x: &Arc| match x.from_to {
                ArcType::TransitionPlace(from, to) if from == t => Some(to),
                _ => None,
            })
            .collect()
    }

    /// Check if place is in initial marking
    pub fn is_in_initial_marking(&self, p: &PlaceID) -> bool {
        self.initial_marking
            .as_ref()
            .is_some_and(|m| m.contains_key(p))
    }

    /// Check if place is in _any_ final marking
    pub fn is_in_a_final_marking(&self, p: &PlaceID) -> bool {
        self.final_markings
            .as_ref()
            .is_some_and(|fms| fms.iter().any(|m| m.contains_key(p)))
    }

    /// Transitions carrying the given label, in index order
    pub fn transitions_with_label(&self, label: &str) -> Vec<TransitionID> {
        self.transitions
            .iter()
            .filter(|t| t.label.as_deref() == Some(label))
            .map(|t| t.id)
            .collect()
    }

    /// Dense token vector of a marking, indexed by place
    pub fn marking_to_vector(&self, marking: &Marking) -> Vec<u64> {
        let mut v = vec![0; self.places.len()];
        for (p, tokens) in marking {
            if let Some(slot) = v.get_mut(p.0) {
                *slot = *tokens;
            }
        }
        v
    }

    /// Convert a dense token vector back to a [`Marking`] (omitting empty places)
    pub fn vector_to_marking(tokens: &[u64]) -> Marking {
        tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| **t > 0)
            .map(|(p, t)| (PlaceID(p), *t))
            .collect()
    }

    /// Create the pre/post incidence lists used to play the token game
    pub fn incidence_lists(&self) -> IncidenceLists {
        let mut pre = vec![Vec::new(); self.transitions.len()];
        let mut post = vec![Vec::new(); self.transitions.len()];
        for arc in &self.arcs {
            match arc.from_to {
                ArcType::PlaceTransition(p, t) => {
                    if let Some(list) = pre.get_mut(t.0) {
                        list.push((p.0, u64::from(arc.weight)));
                    }
                }
                ArcType::TransitionPlace(t, p) => {
                    if let Some(list) = post.get_mut(t.0) {
                        list.push((p.0, u64::from(arc.weight)));
                    }
                }
            }
        }
        IncidenceLists {
            pre,
            post,
            silent: self.transitions.iter().map(Transition::is_silent).collect(),
        }
    }

    ///
    /// Check that the net is a well-formed flow net
    ///
    /// A well-formed net has an initial and a final marking, every transition has input
    /// and output places, no place is isolated, and every node lies on a path from an
    /// initially marked place to a finally marked place.
    ///
    /// Returns the first violation found.
    ///
    pub fn check_structure(&self) -> Result<(), StructureViolation> {
        let initial = self
            .initial_marking
            .as_ref()
            .filter(|m| !m.is_empty())
            .ok_or(StructureViolation::MissingInitialMarking)?;
        let finals = self
            .final_markings
            .as_ref()
            .filter(|fms| !fms.is_empty())
            .ok_or(StructureViolation::MissingFinalMarking)?;

        let lists = self.incidence_lists();
        for t in &self.transitions {
            if lists.pre[t.id.0].is_empty() || lists.post[t.id.0].is_empty() {
                return Err(StructureViolation::DanglingTransition(t.id));
            }
        }
        let mut place_degree = vec![0usize; self.places.len()];
        for arc in &self.arcs {
            let p = match arc.from_to {
                ArcType::PlaceTransition(p, _) | ArcType::TransitionPlace(_, p) => p,
            };
            if let Some(d) = place_degree.get_mut(p.0) {
                *d += 1;
            }
        }
        for p in &self.places {
            if place_degree[p.id.0] == 0 && !self.is_in_initial_marking(&p.id) {
                return Err(StructureViolation::IsolatedPlace(p.id));
            }
        }

        let forward = self.reachable_nodes(initial.keys().copied(), false);
        let backward =
            self.reachable_nodes(finals.iter().flat_map(|m| m.keys().copied()), true);
        for p in &self.places {
            if !(forward.0[p.id.0] && backward.0[p.id.0]) {
                return Err(StructureViolation::UnreachablePlace(p.id));
            }
        }
        for t in &self.transitions {
            if !(forward.1[t.id.0] && backward.1[t.id.0]) {
                return Err(StructureViolation::UnreachableTransition(t.id));
            }
        }
        Ok(())
    }

    /// Graph reachability (ignoring tokens) from a set of places, forwards or backwards
    fn reachable_nodes(
        &self,
        sources: impl Iterator<Item = PlaceID>,
        backwards: bool,
    ) -> (Vec<bool>, Vec<bool>) {
        let mut places = vec![false; self.places.len()];
        let mut transitions = vec![false; self.transitions.len()];
        let mut queue: VecDeque<PlaceID> = VecDeque::new();
        for p in sources {
            if let Some(seen) = places.get_mut(p.0) {
                if !*seen {
                    *seen = true;
                    queue.push_back(p);
                }
            }
        }
        while let Some(p) = queue.pop_front() {
            let next_transitions = if backwards {
                self.preset_of_place(p)
            } else {
                self.postset_of_place(p)
            };
            for t in next_transitions {
                if transitions[t.0] {
                    continue;
                }
                transitions[t.0] = true;
                let next_places = if backwards {
                    self.preset_of_transition(t)
                } else {
                    self.postset_of_transition(t)
                };
                for next in next_places {
                    if !places[next.0] {
                        places[next.0] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        (places, transitions)
    }
}

///
/// Pre- and post-sets of all transitions as `(place index, weight)` lists
///
/// Markings are represented as dense token vectors (see [`PetriNet::marking_to_vector`]).
///
#[derive(Debug, Clone)]
pub struct IncidenceLists {
    /// Input places per transition
    pub pre: Vec<Vec<(usize, u64)>>,
    /// Output places per transition
    pub post: Vec<Vec<(usize, u64)>>,
    /// Whether a transition is silent
    pub silent: Vec<bool>,
}

impl IncidenceLists {
    /// Whether transition `t` is enabled in `tokens`
    pub fn is_enabled(&self, tokens: &[u64], t: usize) -> bool {
        self.pre[t].iter().all(|(p, w)| tokens[*p] >= *w)
    }

    /// All enabled transitions, in index order
    pub fn enabled_transitions(&self, tokens: &[u64]) -> Vec<usize> {
        (0..self.pre.len())
            .filter(|t| self.is_enabled(tokens, *t))
            .collect()
    }

    /// Fire an enabled transition `t`
    pub fn fire(&self, tokens: &mut [u64], t: usize) {
        for (p, w) in &self.pre[t] {
            tokens[*p] -= w;
        }
        for (p, w) in &self.post[t] {
            tokens[*p] += w;
        }
    }

    /// Number of tokens consumed when firing `t`
    pub fn consumed_by(&self, t: usize) -> u64 {
        self.pre[t].iter().map(|(_, w)| w).sum()
    }

    /// Number of tokens produced when firing `t`
    pub fn produced_by(&self, t: usize) -> u64 {
        self.post[t].iter().map(|(_, w)| w).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// p0 -> a -> p1 -> b -> p2
    fn chain() -> PetriNet {
        let mut net = PetriNet::new();
        let p0 = net.add_place();
        let p1 = net.add_place();
        let p2 = net.add_place();
        let a = net.add_transition(Some("a".into()));
        let b = net.add_transition(Some("b".into()));
        net.add_arc(ArcType::place_to_transition(p0, a), None);
        net.add_arc(ArcType::transition_to_place(a, p1), None);
        net.add_arc(ArcType::place_to_transition(p1, b), None);
        net.add_arc(ArcType::transition_to_place(b, p2), None);
        net.initial_marking = Some(Marking::from([(p0, 1)]));
        net.final_markings = Some(vec![Marking::from([(p2, 1)])]);
        net
    }

    #[test]
    fn petri_nets() {
        let mut net = PetriNet::new();
        let p1 = net.add_place();
        let t1 = net.add_transition(Some("Have fun".into()));
        let t2 = net.add_transition(Some("Sleep".into()));
        net.add_arc(ArcType::place_to_transition(p1, t1), None);
        net.add_arc(ArcType::transition_to_place(t2, p1), None);

        assert!(net.postset_of_transition(t1).is_empty());
        assert!(net.preset_of_transition(t1) == vec![p1]);
        assert!(net.postset_of_place(p1) == vec![t1]);
        assert!(net.preset_of_place(p1) == vec![t2]);
        assert!(net.preset_of_transition(t2).is_empty());
        assert_eq!(
            net.check_structure(),
            Err(StructureViolation::MissingInitialMarking)
        );
    }

    #[test]
    fn token_game() {
        let net = chain();
        let lists = net.incidence_lists();
        let mut tokens = net.marking_to_vector(net.initial_marking.as_ref().unwrap());
        assert_eq!(lists.enabled_transitions(&tokens), vec![0]);
        lists.fire(&mut tokens, 0);
        assert_eq!(tokens, vec![0, 1, 0]);
        assert_eq!(lists.enabled_transitions(&tokens), vec![1]);
        lists.fire(&mut tokens, 1);
        assert_eq!(
            PetriNet::vector_to_marking(&tokens),
            net.final_markings.as_ref().unwrap()[0]
        );
        assert!(lists.enabled_transitions(&tokens).is_empty());
        assert_eq!(net.transitions_with_label("b"), vec![TransitionID(1)]);
    }

    #[test]
    fn structure_check() {
        let mut net = chain();
        assert_eq!(net.check_structure(), Ok(()));
        assert!(net.is_in_initial_marking(&PlaceID(0)));
        assert!(net.is_in_a_final_marking(&PlaceID(2)));

        let dangling = net.add_transition(None);
        assert_eq!(
            net.check_structure(),
            Err(StructureViolation::DanglingTransition(dangling))
        );

        let mut net = chain();
        let p = net.add_place();
        assert_eq!(net.check_structure(), Err(StructureViolation::IsolatedPlace(p)));

        // Dead end: p1 -> c -> p3, p3 never reaches the final place
        let mut net = chain();
        let p3 = net.add_place();
        let c = net.add_transition(Some("c".into()));
        net.add_arc(ArcType::place_to_transition(PlaceID(1), c), None);
        net.add_arc(ArcType::transition_to_place(c, p3), None);
        assert_eq!(
            net.check_structure(),
            Err(StructureViolation::UnreachablePlace(p3))
        );
    }

    #[test]
    fn deserialize_petri_net() {
        let net = chain();
        let json = net.to_json().unwrap();
        let parsed: PetriNet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, net);
        assert_eq!(parsed.postset_of_transition(TransitionID(0)), vec![PlaceID(1)]);
    }
}
