//! Computes the abstractions requested by the transfer relation.

use std::rc::Rc;

use log::debug;

use crate::engine::AbstractionEngine;
use crate::error::Result;
use crate::precision::Precision;
use crate::state::{PredicateAbstractState, StateKind};

#[derive(Debug, Clone)]
pub enum AdjustmentResult {
    Continue(PredicateAbstractState),
    /// The abstraction is `false`; the state is unreachable.
    Bottom,
}

#[derive(Debug)]
pub struct PrecisionAdjustment {
    engine: Rc<AbstractionEngine>,
}

impl PrecisionAdjustment {
    pub fn new(engine: Rc<AbstractionEngine>) -> Self {
        Self { engine }
    }

    pub fn compute_abstraction_if_needed(
        &self,
        state: &PredicateAbstractState,
        precision: &Precision,
    ) -> Result<AdjustmentResult> {
        let location = match state.kind() {
            StateKind::ComputeAbstraction { location } => location,
            _ => return Ok(AdjustmentResult::Continue(state.clone())),
        };
        let stats = &self.engine.stats().adjustment;
        stats.abstractions.inc();
        let _timer = stats.total_time.start();

        let pf = state.path_formula();
        let instance = state.abstraction_locations().get(&location).copied().unwrap_or(0) + 1;
        let predicates = precision.predicates(location, instance);
        stats.max_block_size.max(pf.length());
        debug!(
            "Computing abstraction #{} at {} with {} predicates",
            instance,
            location,
            predicates.len()
        );

        let abstraction = {
            let _timer = stats.abstraction_time.start();
            self.engine.build_abstraction(state.abstraction(), pf, &predicates)?
        };
        if abstraction.is_false() {
            stats.false_abstractions.inc();
            return Ok(AdjustmentResult::Bottom);
        }

        let models = self.engine.model_count(&abstraction);
        debug!("Abstraction {} has {} models", abstraction, models);
        stats.max_abstraction_models.max(models);

        let mut locations = state.abstraction_locations().as_ref().clone();
        locations.insert(location, instance);
        let path_formula = self.engine.path_formula_manager().make_empty_with(pf);
        Ok(AdjustmentResult::Continue(PredicateAbstractState::abstraction_state(
            path_formula,
            abstraction,
            Rc::new(locations),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use num_bigint::BigUint;

    use crate::cfa::Location;
    use crate::config::AbstractionOptions;
    use crate::engine::tests::fixture;
    use crate::formula::{Symbol, Term};
    use crate::pathformula::PathFormula;
    use crate::precision::PredicatePrecision;
    use crate::ssa::SsaMap;
    use test_log::test;

    fn at(name: &str, index: u32) -> Term {
        Term::Var(Symbol::indexed(name, index))
    }

    #[test]
    fn test_compute_abstraction() {
        let fx = fixture(AbstractionOptions::default());
        let engine = fx.engine.clone();
        let adjustment = PrecisionAdjustment::new(engine.clone());
        let loc = Location::new(3);
        let px = engine.abstraction_manager().make_predicate(&Term::var("x").gt(0));
        let mut precision = PredicatePrecision::empty();
        precision.add_local(loc, [&px]);
        let precision = Precision::from(precision);

        let initial = engine.make_true_abstraction(&engine.path_formula_manager().make_empty());
        let pf = PathFormula::new(at("x", 2).eq(5), SsaMap::default().with("x", 2), 4);
        let pending = PredicateAbstractState::compute_abstraction_state(
            pf.clone(),
            initial.clone(),
            Rc::new(BTreeMap::new()),
            loc,
        );

        let AdjustmentResult::Continue(state) = adjustment.compute_abstraction_if_needed(&pending, &precision).unwrap()
        else {
            panic!("expected a reachable state");
        };
        assert!(state.is_abstraction_state());
        assert_eq!(state.abstraction().formula(), &Term::var("x").gt(0));
        assert_eq!(state.abstraction().block_formula(), &pf);
        assert!(state.path_formula().is_trivial());
        assert_eq!(state.path_formula().ssa().get("x"), Some(2));
        assert_eq!(state.abstraction_locations().get(&loc), Some(&1));
        assert_eq!(fx.stats.adjustment.max_block_size.get(), 4);
        assert_eq!(fx.stats.adjustment.max_abstraction_models.get(), BigUint::from(1u8));

        // Non-pending states pass through.
        let AdjustmentResult::Continue(same) = adjustment.compute_abstraction_if_needed(&state, &precision).unwrap()
        else {
            panic!("expected a reachable state");
        };
        assert_eq!(same.abstraction(), state.abstraction());

        let infeasible = PredicateAbstractState::compute_abstraction_state(
            PathFormula::new(at("x", 2).eq(5) & at("x", 2).lt(0), SsaMap::default().with("x", 2), 2),
            initial,
            state.abstraction_locations().clone(),
            loc,
        );
        assert!(matches!(
            adjustment.compute_abstraction_if_needed(&infeasible, &precision).unwrap(),
            AdjustmentResult::Bottom
        ));
        assert_eq!(fx.stats.adjustment.false_abstractions.get(), 1);
        assert_eq!(fx.stats.adjustment.abstractions.get(), 2);
    }
}
