use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
};

use petgraph::{graph::DiGraph, unionfind::UnionFind, visit::Dfs};

use crate::core::process_models::case_centric::dfg::{Activity, DirectlyFollowsGraph};

/// Set of activities forming one part of a [`Cut`]
pub type Group = BTreeSet<Activity>;

/// Group of a sequence cut
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGroup {
    /// Activities of the group
    pub activities: Group,
    /// Whether some edge (including START/END edges) bypasses the group
    pub skippable: bool,
}

///
/// Partition of the activities of a [`DirectlyFollowsGraph`]
///
/// Groups are ordered: by position for sequence cuts, by smallest activity name otherwise.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cut {
    /// No edges between different groups
    ExclusiveChoice(Vec<Group>),
    /// All edges between groups point forward
    Sequence(Vec<SequenceGroup>),
    /// Edges in both directions between all activities of different groups
    Concurrency(Vec<Group>),
    /// Do-part touching START/END and redo-parts only connected via its boundary
    Loop {
        /// Do-part
        body: Group,
        /// Redo-parts
        redo: Vec<Group>,
    },
}

/// Pure cut detection function
pub type CutDetector = fn(&DirectlyFollowsGraph) -> Option<Cut>;

/// Cut detectors in order of priority; the first detected cut is used
pub const CUT_DETECTORS: [(&str, CutDetector); 4] = [
    ("exclusive choice", exclusive_choice_cut),
    ("sequence", sequence_cut),
    ("concurrency", concurrency_cut),
    ("loop", loop_cut),
];

/// Index-based view on a [`DirectlyFollowsGraph`]; indices follow activity name order
struct IndexedDfg<'a> {
    names: Vec<&'a str>,
    edges: Vec<(usize, usize)>,
    starts: Vec<bool>,
    ends: Vec<bool>,
}

impl<'a> IndexedDfg<'a> {
    fn new(dfg: &'a DirectlyFollowsGraph) -> Self {
        let names: Vec<&str> = dfg.activities.keys().map(String::as_str).collect();
        let index: BTreeMap<&str, usize> = names.iter().enumerate().map(|(i, a)| (*a, i)).collect();
        let edges = dfg
            .directly_follows_relations
            .keys()
            .filter_map(|(a, b)| Some((*index.get(a.as_str())?, *index.get(b.as_str())?)))
            .collect();
        let starts = names.iter().map(|a| dfg.is_start_activity(a)).collect();
        let ends = names.iter().map(|a| dfg.is_end_activity(a)).collect();
        Self {
            names,
            edges,
            starts,
            ends,
        }
    }

    fn len(&self) -> usize {
        self.names.len()
    }

    fn group(&self, members: &[usize]) -> Group {
        members.iter().map(|i| self.names[*i].to_string()).collect()
    }

    fn adjacency(&self) -> Vec<Vec<bool>> {
        let mut adj = vec![vec![false; self.len()]; self.len()];
        for (a, b) in &self.edges {
            adj[*a][*b] = true;
        }
        adj
    }

    /// `reach[a][b]`: `b` can be reached from `a` (every activity reaches itself)
    fn reachability(&self) -> Vec<Vec<bool>> {
        let mut graph: DiGraph<(), ()> = DiGraph::with_capacity(self.len(), self.edges.len());
        let nodes: Vec<_> = (0..self.len()).map(|_| graph.add_node(())).collect();
        for (a, b) in &self.edges {
            graph.add_edge(nodes[*a], nodes[*b], ());
        }
        let mut reach = vec![vec![false; self.len()]; self.len()];
        for (a, row) in reach.iter_mut().enumerate() {
            let mut dfs = Dfs::new(&graph, nodes[a]);
            while let Some(node) = dfs.next(&graph) {
                row[node.index()] = true;
            }
        }
        reach
    }
}

/// Groups of a union-find partition, each sorted, ordered by smallest member
fn components(n: usize, uf: &UnionFind<usize>) -> Vec<Vec<usize>> {
    let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        by_root.entry(uf.find(i)).or_default().push(i);
    }
    let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
    groups.sort_by_key(|g| g[0]);
    groups
}

/// Connected components of the (undirected) graph
pub fn exclusive_choice_cut(dfg: &DirectlyFollowsGraph) -> Option<Cut> {
    let g = IndexedDfg::new(dfg);
    let mut uf = UnionFind::new(g.len());
    for (a, b) in &g.edges {
        uf.union(*a, *b);
    }
    let groups = components(g.len(), &uf);
    (groups.len() >= 2).then(|| Cut::ExclusiveChoice(groups.iter().map(|c| g.group(c)).collect()))
}

///
/// Activities that reach each other, or are unrelated, share a group.
/// The groups must then be totally ordered by reachability.
///
pub fn sequence_cut(dfg: &DirectlyFollowsGraph) -> Option<Cut> {
    let g = IndexedDfg::new(dfg);
    let n = g.len();
    let reach = g.reachability();
    let mut uf = UnionFind::new(n);
    for a in 0..n {
        for b in (a + 1)..n {
            if reach[a][b] == reach[b][a] {
                uf.union(a, b);
            }
        }
    }
    let mut groups = components(n, &uf);
    if groups.len() < 2 {
        return None;
    }
    let reached_from = |group: &Vec<usize>| {
        (0..n)
            .filter(|b| !group.contains(b) && group.iter().any(|a| reach[*a][*b]))
            .count()
    };
    groups.sort_by_cached_key(|group| (Reverse(reached_from(group)), group[0]));

    let mut position = vec![0; n];
    for (pos, group) in groups.iter().enumerate() {
        for a in group {
            position[*a] = pos;
        }
    }
    for a in 0..n {
        for b in 0..n {
            if position[a] < position[b] && (!reach[a][b] || reach[b][a]) {
                return None;
            }
        }
    }

    // START sits before the first group, END after the last one
    let k = groups.len() as isize;
    let mut skippable = vec![false; groups.len()];
    let mut bypass = |from: isize, to: isize| {
        for i in (from + 1)..to {
            skippable[i as usize] = true;
        }
    };
    for (a, b) in &g.edges {
        bypass(position[*a] as isize, position[*b] as isize);
    }
    for a in 0..n {
        if g.starts[a] {
            bypass(-1, position[a] as isize);
        }
        if g.ends[a] {
            bypass(position[a] as isize, k);
        }
    }

    Some(Cut::Sequence(
        groups
            .iter()
            .zip(skippable)
            .map(|(group, skippable)| SequenceGroup {
                activities: g.group(group),
                skippable,
            })
            .collect(),
    ))
}

///
/// Activities not connected in both directions share a group.
/// Every group needs a start and an end activity.
///
pub fn concurrency_cut(dfg: &DirectlyFollowsGraph) -> Option<Cut> {
    let g = IndexedDfg::new(dfg);
    let n = g.len();
    let adj = g.adjacency();
    let mut uf = UnionFind::new(n);
    for a in 0..n {
        for b in (a + 1)..n {
            if !(adj[a][b] && adj[b][a]) {
                uf.union(a, b);
            }
        }
    }
    let groups = components(n, &uf);
    if groups.len() < 2 {
        return None;
    }
    let complete = groups
        .iter()
        .all(|group| group.iter().any(|a| g.starts[*a]) && group.iter().any(|a| g.ends[*a]));
    complete.then(|| Cut::Concurrency(groups.iter().map(|c| g.group(c)).collect()))
}

///
/// The do-part consists of all start and end activities. The remaining connected components
/// are redo-parts if they are only entered from end activities and only left to start
/// activities; otherwise they are merged into the do-part.
///
pub fn loop_cut(dfg: &DirectlyFollowsGraph) -> Option<Cut> {
    let g = IndexedDfg::new(dfg);
    let n = g.len();
    let mut in_body: Vec<bool> = (0..n).map(|a| g.starts[a] || g.ends[a]).collect();
    if !in_body.iter().any(|b| *b) {
        return None;
    }
    let mut uf = UnionFind::new(n);
    for (a, b) in &g.edges {
        if !in_body[*a] && !in_body[*b] {
            uf.union(*a, *b);
        }
    }
    let candidates: Vec<Vec<usize>> = components(n, &uf)
        .into_iter()
        .filter(|c| !in_body[c[0]])
        .collect();

    // Candidates are not connected to each other, so merging one does not affect the others
    let mut redo = Vec::new();
    for component in candidates {
        let valid = g.edges.iter().all(|(a, b)| {
            if in_body[*a] && component.contains(b) {
                g.ends[*a]
            } else if component.contains(a) && in_body[*b] {
                g.starts[*b]
            } else {
                true
            }
        });
        if valid {
            redo.push(component);
        } else {
            component.iter().for_each(|a| in_body[*a] = true);
        }
    }
    if redo.is_empty() {
        return None;
    }
    let body: Vec<usize> = (0..n).filter(|a| in_body[*a]).collect();
    Some(Cut::Loop {
        body: g.group(&body),
        redo: redo.iter().map(|c| g.group(c)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::case_centric::dfg::discover_dfg;
    use crate::event_log;

    fn group(activities: &[&str]) -> Group {
        activities.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn exclusive_choice() {
        let dfg = discover_dfg(&event_log!(["a", "b"], ["c"], ["d", "c"]));
        assert_eq!(
            exclusive_choice_cut(&dfg),
            Some(Cut::ExclusiveChoice(vec![group(&["a", "b"]), group(&["c", "d"])]))
        );
        assert_eq!(sequence_cut(&dfg), None);
    }

    #[test]
    fn sequence_with_skip() {
        let dfg = discover_dfg(&event_log!(["a", "b", "c"], ["a", "c"], ["a", "d", "c"]));
        assert_eq!(exclusive_choice_cut(&dfg), None);
        assert_eq!(
            sequence_cut(&dfg),
            Some(Cut::Sequence(vec![
                SequenceGroup {
                    activities: group(&["a"]),
                    skippable: false
                },
                SequenceGroup {
                    activities: group(&["b", "d"]),
                    skippable: true
                },
                SequenceGroup {
                    activities: group(&["c"]),
                    skippable: false
                },
            ]))
        );
    }

    #[test]
    fn concurrency() {
        let dfg = discover_dfg(&event_log!(["a", "b"], ["b", "a"]));
        assert_eq!(sequence_cut(&dfg), None);
        assert_eq!(
            concurrency_cut(&dfg),
            Some(Cut::Concurrency(vec![group(&["a"]), group(&["b"])]))
        );
    }

    #[test]
    fn concurrency_requires_start_and_end() {
        let dfg = discover_dfg(&event_log!(["a", "b", "a"]));
        assert_eq!(concurrency_cut(&dfg), None);
        assert_eq!(
            loop_cut(&dfg),
            Some(Cut::Loop {
                body: group(&["a"]),
                redo: vec![group(&["b"])]
            })
        );
    }

    #[test]
    fn loop_merges_invalid_redo_parts() {
        // "x" is entered from "s", which is not an end activity
        let dfg = discover_dfg(&event_log!(["s", "e", "r", "s", "e"], ["s", "x", "e"]));
        assert_eq!(
            loop_cut(&dfg),
            Some(Cut::Loop {
                body: group(&["e", "s", "x"]),
                redo: vec![group(&["r"])]
            })
        );
        let no_redo = discover_dfg(&event_log!(["a", "b"], ["b", "c"], ["c", "a"]));
        assert_eq!(loop_cut(&no_redo), None);
    }
}
