use std::fmt::{Display, Formatter};

use crate::formula::Formula;
use crate::pathformula::PathFormula;
use crate::region::Region;

/// Result of an abstraction computation.
///
/// `formula` is the uninstantiated form of `region`, `instantiated` is the
/// same formula at the SSA indices of `block_formula`, the path formula the
/// abstraction was computed from.
#[derive(Debug, Clone)]
pub struct AbstractionFormula {
    id: usize,
    region: Region,
    formula: Formula,
    instantiated: Formula,
    block_formula: PathFormula,
}

impl AbstractionFormula {
    pub(crate) fn new(
        id: usize,
        region: Region,
        formula: Formula,
        instantiated: Formula,
        block_formula: PathFormula,
    ) -> Self {
        Self {
            id,
            region,
            formula,
            instantiated,
            block_formula,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn formula(&self) -> &Formula {
        &self.formula
    }

    pub fn instantiated(&self) -> &Formula {
        &self.instantiated
    }

    pub fn block_formula(&self) -> &PathFormula {
        &self.block_formula
    }

    pub fn is_true(&self) -> bool {
        self.region == Region::TRUE
    }

    pub fn is_false(&self) -> bool {
        self.region == Region::FALSE
    }
}

impl PartialEq for AbstractionFormula {
    /// Abstractions are equal when they denote the same region.
    fn eq(&self, other: &Self) -> bool {
        self.region == other.region
    }
}

impl Eq for AbstractionFormula {}

impl Display for AbstractionFormula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ABS{}: {}", self.id, self.formula)
    }
}
