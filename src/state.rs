//! Abstract states of the predicate analysis.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::abstraction::AbstractionFormula;
use crate::cfa::Location;
use crate::pathformula::PathFormula;

/// Number of abstractions computed so far at each location on the path.
pub type AbstractionLocations = Rc<BTreeMap<Location, u32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// The path formula was just summarized into the abstraction.
    Abstraction,
    /// The path formula is still accumulating edges.
    NonAbstraction,
    /// A block ends here; the precision adjustment has to compute the
    /// abstraction at `location`.
    ComputeAbstraction { location: Location },
}

#[derive(Debug, Clone)]
pub struct PredicateAbstractState {
    kind: StateKind,
    path_formula: PathFormula,
    abstraction: AbstractionFormula,
    abstraction_locations: AbstractionLocations,
}

impl PredicateAbstractState {
    pub fn abstraction_state(
        path_formula: PathFormula,
        abstraction: AbstractionFormula,
        abstraction_locations: AbstractionLocations,
    ) -> Self {
        Self {
            kind: StateKind::Abstraction,
            path_formula,
            abstraction,
            abstraction_locations,
        }
    }

    pub fn non_abstraction_state(
        path_formula: PathFormula,
        abstraction: AbstractionFormula,
        abstraction_locations: AbstractionLocations,
    ) -> Self {
        Self {
            kind: StateKind::NonAbstraction,
            path_formula,
            abstraction,
            abstraction_locations,
        }
    }

    pub fn compute_abstraction_state(
        path_formula: PathFormula,
        abstraction: AbstractionFormula,
        abstraction_locations: AbstractionLocations,
        location: Location,
    ) -> Self {
        Self {
            kind: StateKind::ComputeAbstraction { location },
            path_formula,
            abstraction,
            abstraction_locations,
        }
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn is_abstraction_state(&self) -> bool {
        self.kind == StateKind::Abstraction
    }

    pub fn path_formula(&self) -> &PathFormula {
        &self.path_formula
    }

    pub fn abstraction(&self) -> &AbstractionFormula {
        &self.abstraction
    }

    pub fn abstraction_locations(&self) -> &AbstractionLocations {
        &self.abstraction_locations
    }

    /// Replaces the abstraction, used when strengthening states in place.
    pub fn set_abstraction(&mut self, abstraction: AbstractionFormula) {
        self.abstraction = abstraction;
    }
}

impl Display for PredicateAbstractState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            StateKind::Abstraction => write!(f, "Abstraction state: {}", self.abstraction),
            StateKind::NonAbstraction => write!(f, "Non-abstraction state: {}", self.path_formula),
            StateKind::ComputeAbstraction { location } => {
                write!(f, "Abstraction pending at {}: {}", location, self.path_formula)
            }
        }
    }
}
