//! Successor computation of the predicate analysis.

use std::rc::Rc;

use log::{debug, trace};

use crate::block_operator::BlockOperator;
use crate::blocks::BlockPartitioning;
use crate::cfa::{Callstack, Cfa, CfaEdge, EdgeKind, Location};
use crate::engine::AbstractionEngine;
use crate::error::Result;
use crate::pathformula::PathFormula;
use crate::state::PredicateAbstractState;

#[derive(Debug, Clone)]
pub struct Successor {
    pub edge: Rc<CfaEdge>,
    pub callstack: Callstack,
    pub state: PredicateAbstractState,
}

#[derive(Debug)]
pub struct TransferRelation {
    cfa: Rc<Cfa>,
    engine: Rc<AbstractionEngine>,
    block_operator: BlockOperator,
    target_sat_check: bool,
    /// Blocks whose call and return nodes always get an abstraction.
    partitioning: Option<Rc<BlockPartitioning>>,
}

impl TransferRelation {
    pub fn new(
        cfa: Rc<Cfa>,
        engine: Rc<AbstractionEngine>,
        block_operator: BlockOperator,
        target_sat_check: bool,
    ) -> Self {
        Self {
            cfa,
            engine,
            block_operator,
            target_sat_check,
            partitioning: None,
        }
    }

    pub fn with_block_partitioning(mut self, partitioning: Rc<BlockPartitioning>) -> Self {
        self.partitioning = Some(partitioning);
        self
    }

    fn is_block_boundary(&self, location: Location) -> bool {
        self.partitioning
            .as_ref()
            .is_some_and(|p| p.is_call_node(location) || p.is_return_node(location))
    }

    pub fn cfa(&self) -> &Rc<Cfa> {
        &self.cfa
    }

    /// Callstack after `edge`, or `None` if a return edge does not match the
    /// innermost call.
    fn next_callstack(edge: &CfaEdge, callstack: &Callstack) -> Option<Callstack> {
        match &edge.kind {
            EdgeKind::Call { return_site, .. } => Some(callstack.push(*return_site)),
            EdgeKind::Return { .. } => match callstack.pop() {
                Some((site, rest)) if site == edge.target => Some(rest),
                _ => None,
            },
            _ => Some(callstack.clone()),
        }
    }

    pub fn successors(
        &self,
        location: Location,
        callstack: &Callstack,
        state: &PredicateAbstractState,
    ) -> Result<Vec<Successor>> {
        let mut result = Vec::new();
        for edge in self.cfa.leaving_edges(location) {
            let Some(callstack) = Self::next_callstack(edge, callstack) else {
                trace!("Skipping unmatched return {}", edge);
                continue;
            };
            let pf = self.engine.path_formula_manager().make_and(state.path_formula(), edge)?;
            let is_target = self.cfa.is_error_location(edge.target);
            let state = if self.target_sat_check && is_target {
                match self.check_target(state, pf, edge.target)? {
                    Some(target) => target,
                    None => continue,
                }
            } else if is_target
                || self.is_block_boundary(edge.target)
                || self.block_operator.is_block_end(edge, &pf)
            {
                let abstraction = state.abstraction().clone();
                let locations = state.abstraction_locations().clone();
                PredicateAbstractState::compute_abstraction_state(pf, abstraction, locations, edge.target)
            } else {
                let abstraction = state.abstraction().clone();
                let locations = state.abstraction_locations().clone();
                PredicateAbstractState::non_abstraction_state(pf, abstraction, locations)
            };
            result.push(Successor {
                edge: edge.clone(),
                callstack,
                state,
            });
        }
        Ok(result)
    }

    /// Satisfiability check on reaching an error location. A feasible target
    /// becomes an abstraction state with abstraction `true`, so that the
    /// refiner finds a block formula ending in it.
    fn check_target(
        &self,
        state: &PredicateAbstractState,
        pf: PathFormula,
        location: Location,
    ) -> Result<Option<PredicateAbstractState>> {
        let stats = &self.engine.stats().transfer;
        stats.target_sat_checks.inc();
        let unsat = {
            let _timer = stats.sat_check_time.start();
            self.engine.unsat(state.abstraction(), &pf)?
        };
        if unsat {
            debug!("Path to target {} is infeasible", location);
            stats.infeasible_targets.inc();
            return Ok(None);
        }
        let mut locations = state.abstraction_locations().as_ref().clone();
        *locations.entry(location).or_insert(0) += 1;
        let abstraction = self.engine.make_true_abstraction(&pf);
        let path_formula = self.engine.path_formula_manager().make_empty_with(&pf);
        Ok(Some(PredicateAbstractState::abstraction_state(
            path_formula,
            abstraction,
            Rc::new(locations),
        )))
    }
}
