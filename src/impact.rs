//! Refinement by strengthening the states of a spurious path in place.
//!
//! Instead of cutting the ARG back and exploring again with more predicates,
//! every abstraction state on the path is conjoined with its interpolant.
//! States that were covered by a strengthened state may lose their cover, and
//! a strengthened state may itself become covered. The part of the path after
//! the first state whose interpolant is `false` is unreachable and removed.

use std::rc::Rc;

use log::{debug, info};

use crate::arg::StateId;
use crate::engine::AbstractionEngine;
use crate::error::Result;
use crate::formula::Formula;
use crate::reached::ReachedSet;

#[derive(Debug)]
pub struct ImpactStrategy {
    engine: Rc<AbstractionEngine>,
}

impl ImpactStrategy {
    pub fn new(engine: Rc<AbstractionEngine>) -> Self {
        Self { engine }
    }

    /// `interpolants[i]` belongs to `path[i]`; the last one is `false`.
    pub fn refine(&self, reached: &mut ReachedSet, path: &[StateId], interpolants: &[Formula]) -> Result<()> {
        for (&id, interpolant) in path.iter().zip(interpolants) {
            if interpolant.is_true() {
                continue;
            }
            if interpolant.is_false() {
                info!("Removing infeasible part of the ARG below {}", id);
                return reached.remove_infeasible_subtree(id);
            }
            if !self.strengthen(reached, id, interpolant)? {
                continue;
            }
            if self.cover(reached, id)? {
                // Everything below `id`, including the error state, is gone.
                return Ok(());
            }
        }
        Ok(())
    }

    /// Conjoins `interpolant` to the abstraction of `id`. Returns whether the
    /// abstraction became stronger.
    fn strengthen(&self, reached: &mut ReachedSet, id: StateId, interpolant: &Formula) -> Result<bool> {
        let state = reached.arg().state(id)?.predicate_state();
        let strengthened = self.engine.strengthen(state.abstraction(), interpolant);
        if self.engine.check_coverage(state.abstraction(), &strengthened) {
            return Ok(false);
        }
        debug!("Strengthening {} with {}", id, interpolant);
        self.engine.stats().refinement.strengthened_states.inc();

        let mut state = state.clone();
        state.set_abstraction(strengthened.clone());
        reached.arg_mut().state_mut(id)?.set_predicate_state(state);

        let covered: Vec<StateId> = reached.arg().state(id)?.covering().collect();
        for c in covered {
            let still_covered = {
                let other = reached.arg().state(c)?.predicate_state().abstraction();
                self.engine.check_coverage(other, &strengthened)
            };
            if !still_covered {
                debug!("{} is no longer covered by {}", c, id);
                reached.arg_mut().uncover(c)?;
                reached.re_add_to_waitlist(c);
            }
        }
        Ok(true)
    }

    /// Tries to cover `id` by another abstraction state at the same location
    /// and callstack that is not below it. A covered state loses its subtree.
    fn cover(&self, reached: &mut ReachedSet, id: StateId) -> Result<bool> {
        let arg = reached.arg();
        let state = arg.state(id)?;
        let below = arg.subtree(id)?;
        let candidates: Vec<StateId> = reached
            .states_at(state.location(), state.callstack())
            .filter(|other| !below.contains(other))
            .collect();
        let mut covering = None;
        for candidate in candidates {
            let other = arg.state(candidate)?;
            if other.is_covered() || !other.predicate_state().is_abstraction_state() {
                continue;
            }
            if self
                .engine
                .check_coverage(state.predicate_state().abstraction(), other.predicate_state().abstraction())
            {
                covering = Some(candidate);
                break;
            }
        }
        let Some(covering) = covering else {
            return Ok(false);
        };

        let children: Vec<StateId> = state.children().map(|(child, _)| child).collect();
        reached.arg_mut().cover(id, covering)?;
        reached.remove_from_waitlist(id);
        for child in children {
            if reached.contains(child) {
                reached.remove_infeasible_subtree(child)?;
            }
        }
        Ok(true)
    }
}
