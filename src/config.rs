//! Analysis options.
//!
//! All option groups implement `Default` and (de)serialize with missing
//! fields filled in from the defaults, so a configuration file only needs to
//! mention what it changes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AbstractionOptions {
    /// Determine each predicate independently instead of enumerating all
    /// satisfying predicate assignments.
    pub cartesian: bool,
    /// Copy predicates that are unaffected by the block and already decided
    /// by the previous abstraction without asking the solver.
    pub identify_trivial_predicates: bool,
    pub use_cache: bool,
    /// Check satisfiability when an error location is reached and drop the
    /// successor if the path to it is infeasible.
    pub target_state_sat_check: bool,
}

impl Default for AbstractionOptions {
    fn default() -> Self {
        Self {
            cartesian: false,
            identify_trivial_predicates: false,
            use_cache: true,
            target_state_sat_check: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BlockOperatorOptions {
    /// Maximum block length, `0` disables the threshold.
    pub threshold: usize,
    /// End blocks at function calls and returns once the threshold is reached.
    pub functions: bool,
    /// End blocks at loop heads once the threshold is reached.
    pub loops: bool,
    pub always_after_threshold: bool,
    pub always_at_loops: bool,
    pub always_at_functions: bool,
    /// Only the explicitly configured locations end blocks.
    pub always_and_only_at_explicit_nodes: bool,
    pub explicit_nodes: Vec<u32>,
}

impl Default for BlockOperatorOptions {
    fn default() -> Self {
        Self {
            threshold: 0,
            functions: false,
            loops: false,
            always_after_threshold: true,
            always_at_loops: true,
            always_at_functions: true,
            always_and_only_at_explicit_nodes: false,
            explicit_nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathStrategy {
    /// Use the block formulas stored in the abstraction states.
    Direct,
    /// Recompute block formulas over the ARG.
    Rederive,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PredicateSharing {
    Location,
    LocationInstance,
    Global,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepeatedCounterexampleCheck {
    /// Same list of block formulas as the previous attempt.
    BlockFormulas,
    /// Same sequence of abstraction locations as the previous attempt.
    ArgPath,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefinementStrategyKind {
    /// Remove the ARG subtree below the refinement root and re-explore.
    Lazy,
    /// Strengthen the states on the path in place.
    Impact,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelevanceKind {
    Occurrence,
    Auxiliary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RefinementOptions {
    pub strategy: RefinementStrategyKind,
    pub path_strategy: PathStrategy,
    pub split_equalities: bool,
    pub predicate_sharing: PredicateSharing,
    pub repeated_check: RepeatedCounterexampleCheck,
    pub verify_interpolants: bool,
    pub precise_error_path: bool,
    pub relevance: RelevanceKind,
    /// Allow the relevance computer to learn from repeated counterexamples.
    pub refineable_relevance: bool,
}

impl Default for RefinementOptions {
    fn default() -> Self {
        Self {
            strategy: RefinementStrategyKind::Lazy,
            path_strategy: PathStrategy::Direct,
            split_equalities: false,
            predicate_sharing: PredicateSharing::Location,
            repeated_check: RepeatedCounterexampleCheck::BlockFormulas,
            verify_interpolants: false,
            precise_error_path: true,
            relevance: RelevanceKind::Occurrence,
            refineable_relevance: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SolverOptions {
    /// Smallest value of an integer variable.
    pub min_value: i64,
    /// Largest value of an integer variable.
    pub max_value: i64,
    /// Search budget per query; exceeding it is a timeout.
    pub max_steps: u64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            min_value: -8,
            max_value: 8,
            max_steps: 5_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AlgorithmOptions {
    pub max_refinements: usize,
    /// Join non-abstraction states at the same location by disjunction.
    pub merge_non_abstraction_states: bool,
    /// Partition the program into one block per function and let the
    /// refiner widen the reducer's relevance policy on repeated
    /// counterexamples. Requires lazy refinement with rederived paths.
    pub block_summarization: bool,
}

impl Default for AlgorithmOptions {
    fn default() -> Self {
        Self {
            max_refinements: 50,
            merge_non_abstraction_states: false,
            block_summarization: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AnalysisConfig {
    pub abstraction: AbstractionOptions,
    pub blocks: BlockOperatorOptions,
    pub refinement: RefinementOptions,
    pub solver: SolverOptions,
    pub algorithm: AlgorithmOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{
            "abstraction": { "cartesian": true },
            "refinement": { "repeated-check": "arg-path", "path-strategy": "rederive" }
        }"#;
        let config: AnalysisConfig = serde_json::from_str(json).unwrap();
        assert!(config.abstraction.cartesian);
        assert!(config.abstraction.use_cache);
        assert_eq!(config.refinement.repeated_check, RepeatedCounterexampleCheck::ArgPath);
        assert_eq!(config.refinement.path_strategy, PathStrategy::Rederive);
        assert_eq!(config.blocks, BlockOperatorOptions::default());
    }

    #[test]
    fn test_round_trip() {
        let config = AnalysisConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: AnalysisConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
