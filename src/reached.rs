//! The reached set: ARG states with their precisions and the waitlist.

use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use log::debug;

use crate::arg::{Arg, StateId};
use crate::blocks::Block;
use crate::cfa::{Callstack, Location};
use crate::error::{Error, Result};
use crate::precision::Precision;
use crate::state::PredicateAbstractState;

/// A block entered during exploration and not yet left, with the state and
/// precision it was entered from.
#[derive(Debug)]
pub struct BlockContext {
    pub block: Rc<Block>,
    pub root: PredicateAbstractState,
    pub root_precision: Precision,
    pub outer: Option<Rc<BlockContext>>,
}

impl BlockContext {
    pub fn depth(&self) -> usize {
        1 + self.outer.as_ref().map_or(0, |o| o.depth())
    }
}

/// Whether two states are inside the same blocks, entered from equal states.
pub fn same_context(a: Option<&Rc<BlockContext>>, b: Option<&Rc<BlockContext>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            Rc::ptr_eq(a, b)
                || (a.block.id == b.block.id
                    && a.root.abstraction().id() == b.root.abstraction().id()
                    && same_context(a.outer.as_ref(), b.outer.as_ref()))
        }
        _ => false,
    }
}

#[derive(Debug)]
pub struct ReachedSet {
    arg: Arg,
    precisions: BTreeMap<StateId, Precision>,
    /// Innermost open block of each state inside a summarized block.
    contexts: BTreeMap<StateId, Rc<BlockContext>>,
    waitlist: VecDeque<StateId>,
}

impl ReachedSet {
    pub fn new(location: Location, state: PredicateAbstractState, precision: Precision) -> Self {
        let arg = Arg::new(location, Callstack::default(), state);
        let root = arg.root();
        Self {
            arg,
            precisions: BTreeMap::from([(root, precision)]),
            contexts: BTreeMap::new(),
            waitlist: VecDeque::from([root]),
        }
    }

    pub fn arg(&self) -> &Arg {
        &self.arg
    }

    pub fn arg_mut(&mut self) -> &mut Arg {
        &mut self.arg
    }

    pub fn len(&self) -> usize {
        self.precisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precisions.is_empty()
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.precisions.contains_key(&id)
    }

    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        self.precisions.keys().copied()
    }

    pub fn precision(&self, id: StateId) -> Result<&Precision> {
        self.precisions
            .get(&id)
            .ok_or_else(|| Error::inconsistent(format!("state {} is not reached", id)))
    }

    pub fn set_precision(&mut self, id: StateId, precision: Precision) {
        self.precisions.insert(id, precision);
    }

    pub fn context(&self, id: StateId) -> Option<&Rc<BlockContext>> {
        self.contexts.get(&id)
    }

    pub fn set_context(&mut self, id: StateId, context: Option<Rc<BlockContext>>) {
        match context {
            Some(context) => self.contexts.insert(id, context),
            None => self.contexts.remove(&id),
        };
    }

    /// Adds a state and schedules it for expansion.
    pub fn add(&mut self, id: StateId, precision: Precision) {
        self.precisions.insert(id, precision);
        self.waitlist.push_back(id);
    }

    /// Adds a state that needs no expansion, such as a covered one.
    pub fn add_without_waiting(&mut self, id: StateId, precision: Precision) {
        self.precisions.insert(id, precision);
    }

    pub fn pop(&mut self) -> Option<StateId> {
        self.waitlist.pop_front()
    }

    pub fn has_waiting_state(&self) -> bool {
        !self.waitlist.is_empty()
    }

    pub fn is_waiting(&self, id: StateId) -> bool {
        self.waitlist.contains(&id)
    }

    pub fn re_add_to_waitlist(&mut self, id: StateId) {
        if !self.waitlist.contains(&id) {
            self.waitlist.push_back(id);
        }
    }

    pub fn remove_from_waitlist(&mut self, id: StateId) {
        self.waitlist.retain(|&w| w != id);
    }

    /// Reached states at `location` with the given callstack.
    pub fn states_at<'a>(&'a self, location: Location, callstack: &'a Callstack) -> impl Iterator<Item = StateId> + 'a {
        self.precisions.keys().copied().filter(move |&id| {
            self.arg
                .state(id)
                .is_ok_and(|s| s.location() == location && s.callstack() == callstack)
        })
    }

    /// Removes `root` and everything below it. The surviving parents are
    /// re-explored with `precision`; states that lose their cover are
    /// re-explored with their own precision.
    pub fn remove_subtree(&mut self, root: StateId, precision: &Precision) -> Result<()> {
        let removal = self.arg.remove_subtree(root)?;
        for id in &removal.removed {
            self.precisions.remove(id);
            self.contexts.remove(id);
        }
        self.waitlist.retain(|id| !removal.removed.contains(id));
        for &parent in &removal.parents {
            self.precisions.insert(parent, precision.clone());
            self.re_add_to_waitlist(parent);
        }
        for &state in &removal.uncovered {
            self.re_add_to_waitlist(state);
        }
        debug!(
            "Removed {} states, re-added {} parents and {} uncovered states",
            removal.removed.len(),
            removal.parents.len(),
            removal.uncovered.len()
        );
        Ok(())
    }

    /// Cuts off `root` and everything below it without re-exploring the
    /// parents, for a subtree that is known to be unreachable.
    pub fn remove_infeasible_subtree(&mut self, root: StateId) -> Result<()> {
        let removal = self.arg.remove_subtree(root)?;
        for id in &removal.removed {
            self.precisions.remove(id);
            self.contexts.remove(id);
        }
        self.waitlist.retain(|id| !removal.removed.contains(id));
        for &state in &removal.uncovered {
            self.re_add_to_waitlist(state);
        }
        debug!("Cut off {} infeasible states below {}", removal.removed.len(), root);
        Ok(())
    }
}
