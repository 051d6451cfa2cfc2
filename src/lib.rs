//! # predabs-rs: Predicate Abstraction with CEGAR in Rust
//!
//! **`predabs-rs`** is the core of a predicate-abstraction software model
//! checker. It computes abstractions of program blocks over a set of
//! predicates, reduces and expands them at block boundaries for
//! compositional analysis, and refines the predicate precision from
//! spurious counterexamples.
//!
//! ## What is predicate abstraction?
//!
//! The program is explored symbolically, one *block* (a loop-free stretch of
//! the control flow) at a time. At the end of each block, the reachable
//! states are over-approximated by a Boolean combination of *predicates*
//! (atoms such as `x < y`), stored as a BDD *region*. When an error location
//! is reached, the block formulas along the path are checked by an
//! interpolating prover: either the path is a real bug, or the interpolants
//! tell which new predicates rule it out.
//!
//! ## Key Features
//!
//! - **Boolean and Cartesian abstraction** with caching of abstractions and
//!   infeasible formulas.
//! - **Block summarization**: states and precisions are *reduced* to the
//!   predicates relevant inside a block and *expanded* afterwards.
//! - **Lazy CEGAR** with configurable predicate sharing, precise error path
//!   reconstruction and escalation on repeated counterexamples, plus an
//!   Impact-style refinement that strengthens the ARG in place.
//!
//! ## Basic Usage
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use predabs_rs::algorithm::{Analysis, Verdict};
//! use predabs_rs::cfa::{CfaBuilder, EdgeKind};
//! use predabs_rs::config::AnalysisConfig;
//! use predabs_rs::formula::Term;
//! use predabs_rs::precision::PredicatePrecision;
//!
//! // x = 1; if (x == 0) error;
//! let mut b = CfaBuilder::new("main");
//! let l0 = b.entry();
//! let l1 = b.location("main");
//! let err = b.location("main");
//! let exit = b.location("main");
//! b.error(err);
//! b.edge(l0, l1, EdgeKind::Assign { variable: "x".into(), value: Term::int(1) });
//! b.branch(l1, Term::var("x").eq(0), err, exit);
//! let cfa = Rc::new(b.build(exit));
//!
//! let mut analysis = Analysis::new(cfa, AnalysisConfig::default()).unwrap();
//! let mut reached = analysis.initial_reached_set(PredicatePrecision::empty());
//! let verdict = analysis.run(&mut reached).unwrap();
//! assert!(matches!(verdict, Verdict::Safe));
//! ```
//!
//! ## Core Components
//!
//! - **[`engine`]**: The [`AbstractionEngine`][crate::engine::AbstractionEngine], computing abstractions and the region-level reduce/expand primitives.
//! - **[`reducer`]**: Reduction and expansion of states and precisions at block boundaries.
//! - **[`refiner`]**: The CEGAR refiner; [`impact`] holds the in-place variant.
//! - **[`algorithm`]**: The reachability and CEGAR loops that tie everything together.
//!
//! The formula language, the BDD-based [`region`] algebra, the enumerative
//! [`solver`] and the control-flow automaton ([`cfa`]) are small reference
//! implementations of the interfaces the analysis consumes.

pub mod abstraction;
pub mod algorithm;
pub mod arg;
pub mod block_operator;
pub mod blocks;
pub mod cache;
pub mod cfa;
pub mod config;
pub mod engine;
pub mod error;
pub mod formula;
pub mod impact;
pub mod interpolation;
pub mod pathformula;
pub mod precision;
pub mod precision_adjustment;
pub mod predicates;
pub mod reached;
pub mod reducer;
pub mod refiner;
pub mod region;
pub mod relevant;
pub mod shutdown;
pub mod solver;
pub mod ssa;
pub mod state;
pub mod stats;
pub mod transfer;
