//! Abstract reachability graph.
//!
//! States live in an arena and are addressed by [`StateId`]. Ids stay valid
//! for the lifetime of the graph: removing a subtree leaves empty slots behind
//! instead of moving the remaining states.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use log::debug;

use crate::cfa::{Callstack, CfaEdge, EdgeKind, Location};
use crate::error::{Error, Result};
use crate::state::PredicateAbstractState;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StateId(usize);

impl StateId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for StateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ArgState {
    id: StateId,
    location: Location,
    callstack: Callstack,
    state: PredicateAbstractState,
    parents: BTreeSet<StateId>,
    children: BTreeMap<StateId, Rc<CfaEdge>>,
    covered_by: Option<StateId>,
    covering: BTreeSet<StateId>,
}

impl ArgState {
    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn callstack(&self) -> &Callstack {
        &self.callstack
    }

    pub fn predicate_state(&self) -> &PredicateAbstractState {
        &self.state
    }

    pub fn set_predicate_state(&mut self, state: PredicateAbstractState) {
        self.state = state;
    }

    pub fn parents(&self) -> impl Iterator<Item = StateId> + '_ {
        self.parents.iter().copied()
    }

    pub fn children(&self) -> impl Iterator<Item = (StateId, &Rc<CfaEdge>)> + '_ {
        self.children.iter().map(|(&id, edge)| (id, edge))
    }

    pub fn edge_to(&self, child: StateId) -> Option<&Rc<CfaEdge>> {
        self.children.get(&child)
    }

    pub fn is_covered(&self) -> bool {
        self.covered_by.is_some()
    }

    pub fn covered_by(&self) -> Option<StateId> {
        self.covered_by
    }

    pub fn covering(&self) -> impl Iterator<Item = StateId> + '_ {
        self.covering.iter().copied()
    }
}

/// Sequence of states from the root to some state, with the connecting edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgPath {
    states: Vec<StateId>,
    edges: Vec<Rc<CfaEdge>>,
}

impl ArgPath {
    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    /// `edges()[i]` leads from `states()[i]` to `states()[i + 1]`.
    pub fn edges(&self) -> &[Rc<CfaEdge>] {
        &self.edges
    }

    pub fn first(&self) -> StateId {
        self.states[0]
    }

    pub fn last(&self) -> StateId {
        self.states[self.states.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Display for ArgPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.states[0])?;
        for (edge, state) in self.edges.iter().zip(&self.states[1..]) {
            write!(f, " -[{}]-> {}", edge, state)?;
        }
        Ok(())
    }
}

/// What a subtree removal touched.
#[derive(Debug, Default)]
pub struct Removal {
    pub removed: BTreeSet<StateId>,
    /// Surviving parents of removed states.
    pub parents: BTreeSet<StateId>,
    /// Surviving states that were covered by a removed state.
    pub uncovered: BTreeSet<StateId>,
}

#[derive(Debug)]
pub struct Arg {
    states: Vec<Option<ArgState>>,
    root: StateId,
    live: usize,
}

impl Arg {
    pub fn new(location: Location, callstack: Callstack, state: PredicateAbstractState) -> Self {
        let root = StateId(0);
        Self {
            states: vec![Some(ArgState {
                id: root,
                location,
                callstack,
                state,
                parents: BTreeSet::new(),
                children: BTreeMap::new(),
                covered_by: None,
                covering: BTreeSet::new(),
            })],
            root,
            live: 1,
        }
    }

    pub fn root(&self) -> StateId {
        self.root
    }

    /// Number of states currently in the graph.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn contains(&self, id: StateId) -> bool {
        matches!(self.states.get(id.0), Some(Some(_)))
    }

    pub fn state(&self, id: StateId) -> Result<&ArgState> {
        match self.states.get(id.0) {
            Some(Some(state)) => Ok(state),
            _ => Err(Error::inconsistent(format!("state {} is not in the ARG", id))),
        }
    }

    pub fn state_mut(&mut self, id: StateId) -> Result<&mut ArgState> {
        match self.states.get_mut(id.0) {
            Some(Some(state)) => Ok(state),
            _ => Err(Error::inconsistent(format!("state {} is not in the ARG", id))),
        }
    }

    pub fn states(&self) -> impl Iterator<Item = &ArgState> + '_ {
        self.states.iter().flatten()
    }

    pub fn add_child(
        &mut self,
        parent: StateId,
        edge: Rc<CfaEdge>,
        callstack: Callstack,
        state: PredicateAbstractState,
    ) -> Result<StateId> {
        let id = StateId(self.states.len());
        let location = edge.target;
        self.state_mut(parent)?.children.insert(id, edge);
        self.states.push(Some(ArgState {
            id,
            location,
            callstack,
            state,
            parents: BTreeSet::from([parent]),
            children: BTreeMap::new(),
            covered_by: None,
            covering: BTreeSet::new(),
        }));
        self.live += 1;
        Ok(id)
    }

    /// Additional edge into an existing state, as produced by merging.
    pub fn add_edge(&mut self, parent: StateId, child: StateId, edge: Rc<CfaEdge>) -> Result<()> {
        self.state(child)?;
        self.state_mut(parent)?.children.insert(child, edge);
        self.state_mut(child)?.parents.insert(parent);
        Ok(())
    }

    pub fn cover(&mut self, covered: StateId, covering: StateId) -> Result<()> {
        if covered == covering {
            return Err(Error::inconsistent(format!("state {} cannot cover itself", covered)));
        }
        self.uncover(covered)?;
        self.state_mut(covering)?.covering.insert(covered);
        self.state_mut(covered)?.covered_by = Some(covering);
        debug!("{} is covered by {}", covered, covering);
        Ok(())
    }

    pub fn uncover(&mut self, covered: StateId) -> Result<()> {
        if let Some(covering) = self.state_mut(covered)?.covered_by.take() {
            if let Ok(state) = self.state_mut(covering) {
                state.covering.remove(&covered);
            }
        }
        Ok(())
    }

    /// `root` and all states reachable from it.
    pub fn subtree(&self, root: StateId) -> Result<BTreeSet<StateId>> {
        let mut result = BTreeSet::from([root]);
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for (child, _) in self.state(id)?.children() {
                if result.insert(child) {
                    stack.push(child);
                }
            }
        }
        Ok(result)
    }

    /// `target` and all its ancestors.
    pub fn states_on_paths_to(&self, target: StateId) -> Result<BTreeSet<StateId>> {
        let mut result = BTreeSet::from([target]);
        let mut stack = vec![target];
        while let Some(id) = stack.pop() {
            for parent in self.state(id)?.parents() {
                if result.insert(parent) {
                    stack.push(parent);
                }
            }
        }
        Ok(result)
    }

    pub fn remove_subtree(&mut self, root: StateId) -> Result<Removal> {
        if root == self.root {
            return Err(Error::inconsistent("cannot remove the root of the ARG"));
        }
        let removed = self.subtree(root)?;
        let mut removal = Removal::default();
        for &id in &removed {
            let state = self.state(id)?;
            let parents: Vec<StateId> = state.parents().filter(|p| !removed.contains(p)).collect();
            let covered: Vec<StateId> = state.covering().filter(|c| !removed.contains(c)).collect();
            let covered_by = state.covered_by.filter(|c| !removed.contains(c));
            for parent in parents {
                self.state_mut(parent)?.children.remove(&id);
                removal.parents.insert(parent);
            }
            for c in covered {
                self.state_mut(c)?.covered_by = None;
                removal.uncovered.insert(c);
            }
            if let Some(c) = covered_by {
                self.state_mut(c)?.covering.remove(&id);
            }
        }
        for &id in &removed {
            self.states[id.0] = None;
        }
        self.live -= removed.len();
        debug!("Removed {} states below {}", removed.len(), root);
        removal.removed = removed;
        Ok(removal)
    }

    /// Some path from the root to `target`, following the first parent.
    pub fn path_to(&self, target: StateId) -> Result<ArgPath> {
        let mut states = vec![target];
        let mut edges = Vec::new();
        let mut current = target;
        while current != self.root {
            let parent = self
                .state(current)?
                .parents()
                .next()
                .ok_or_else(|| Error::inconsistent(format!("state {} has no parent", current)))?;
            let edge = self
                .state(parent)?
                .edge_to(current)
                .ok_or_else(|| Error::inconsistent(format!("no edge from {} to {}", parent, current)))?;
            edges.push(edge.clone());
            states.push(parent);
            current = parent;
        }
        states.reverse();
        edges.reverse();
        Ok(ArgPath { states, edges })
    }

    /// The path to `target` through `on_path` that takes, at every branching
    /// state, the direction recorded in `branches` (`true` for the then-branch).
    pub fn path_from_branching(
        &self,
        target: StateId,
        on_path: &BTreeSet<StateId>,
        branches: &BTreeMap<StateId, bool>,
    ) -> Result<ArgPath> {
        let mut states = vec![self.root];
        let mut edges = Vec::new();
        let mut current = self.root;
        while current != target {
            let state = self.state(current)?;
            let candidates: Vec<(StateId, &Rc<CfaEdge>)> =
                state.children().filter(|(child, _)| on_path.contains(child)).collect();
            let (next, edge) = match candidates.as_slice() {
                [single] => *single,
                [_, _] => {
                    let direction = branches.get(&current).copied().ok_or_else(|| {
                        Error::inconsistent(format!("no branching information for {}", current))
                    })?;
                    *candidates
                        .iter()
                        .find(|(_, edge)| matches!(edge.kind, EdgeKind::Assume { truth, .. } if truth == direction))
                        .ok_or_else(|| Error::inconsistent(format!("{} does not branch on a condition", current)))?
                }
                [] => return Err(Error::inconsistent(format!("path through {} does not reach {}", current, target))),
                _ => {
                    return Err(Error::inconsistent(format!(
                        "state {} has {} successors on the path",
                        current,
                        candidates.len()
                    )))
                }
            };
            edges.push(edge.clone());
            states.push(next);
            current = next;
        }
        Ok(ArgPath { states, edges })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::abstraction::AbstractionFormula;
    use crate::formula::{Formula, Term};
    use crate::pathformula::PathFormula;
    use crate::region::Region;
    use crate::ssa::SsaMap;
    use test_log::test;

    pub(crate) fn dummy_state() -> PredicateAbstractState {
        let pf = PathFormula::new(Formula::tt(), SsaMap::default(), 0);
        let abstraction = AbstractionFormula::new(0, Region::TRUE, Formula::tt(), Formula::tt(), pf.clone());
        PredicateAbstractState::abstraction_state(pf, abstraction, Default::default())
    }

    fn edge(source: u32, target: u32, kind: EdgeKind) -> Rc<CfaEdge> {
        Rc::new(CfaEdge {
            id: 0,
            source: Location::new(source),
            target: Location::new(target),
            kind,
        })
    }

    fn assume(source: u32, target: u32, truth: bool) -> Rc<CfaEdge> {
        edge(
            source,
            target,
            EdgeKind::Assume {
                condition: Term::var("x").gt(0),
                truth,
            },
        )
    }

    /// Diamond `s0 -> {s1, s2} -> s3 -> s4`.
    fn diamond() -> (Arg, [StateId; 5]) {
        let mut arg = Arg::new(Location::new(0), Callstack::default(), dummy_state());
        let s0 = arg.root();
        let s1 = arg.add_child(s0, assume(0, 1, true), Callstack::default(), dummy_state()).unwrap();
        let s2 = arg.add_child(s0, assume(0, 2, false), Callstack::default(), dummy_state()).unwrap();
        let s3 = arg.add_child(s1, edge(1, 3, EdgeKind::Blank), Callstack::default(), dummy_state()).unwrap();
        arg.add_edge(s2, s3, edge(2, 3, EdgeKind::Blank)).unwrap();
        let s4 = arg.add_child(s3, edge(3, 4, EdgeKind::Blank), Callstack::default(), dummy_state()).unwrap();
        (arg, [s0, s1, s2, s3, s4])
    }

    #[test]
    fn test_paths() {
        let (arg, [s0, s1, s2, s3, s4]) = diamond();
        assert_eq!(arg.len(), 5);
        assert_eq!(arg.states_on_paths_to(s4).unwrap(), BTreeSet::from([s0, s1, s2, s3, s4]));
        assert_eq!(arg.subtree(s1).unwrap(), BTreeSet::from([s1, s3, s4]));

        let path = arg.path_to(s4).unwrap();
        assert_eq!(path.states(), &[s0, s1, s3, s4]);
        assert_eq!(path.edges().len(), 3);
        assert_eq!(path.last(), s4);

        let on_path = arg.states_on_paths_to(s4).unwrap();
        let path = arg
            .path_from_branching(s4, &on_path, &BTreeMap::from([(s0, false)]))
            .unwrap();
        assert_eq!(path.states(), &[s0, s2, s3, s4]);
        assert!(arg.path_from_branching(s4, &on_path, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_remove_subtree() {
        let (mut arg, [s0, s1, s2, s3, s4]) = diamond();
        arg.cover(s2, s4).unwrap();
        assert!(arg.state(s2).unwrap().is_covered());

        let removal = arg.remove_subtree(s1).unwrap();
        assert_eq!(removal.removed, BTreeSet::from([s1, s3, s4]));
        assert_eq!(removal.parents, BTreeSet::from([s0, s2]));
        assert_eq!(removal.uncovered, BTreeSet::from([s2]));
        assert_eq!(arg.len(), 2);
        assert!(!arg.contains(s3));
        assert!(arg.state(s3).is_err());
        assert!(!arg.state(s2).unwrap().is_covered());
        assert_eq!(arg.state(s2).unwrap().children().count(), 0);
        assert!(arg.remove_subtree(s0).is_err());
    }
}
