//! End-to-end tests for abstraction, block reduction and the CEGAR loop.

use std::collections::BTreeSet;
use std::rc::Rc;

use predabs_rs::algorithm::{Analysis, Verdict};
use predabs_rs::blocks::{Block, BlockId};
use predabs_rs::cfa::{Cfa, CfaBuilder, CfaEdge, EdgeKind, Location};
use predabs_rs::config::{AbstractionOptions, AnalysisConfig, PathStrategy, SolverOptions};
use predabs_rs::engine::AbstractionEngine;
use predabs_rs::error::{Error, SolverError};
use predabs_rs::formula::{Symbol, Term};
use predabs_rs::interpolation::{CounterexampleTraceInfo, InterpolationManager};
use predabs_rs::pathformula::{PathFormula, PathFormulaManager, SsaPathFormulaManager};
use predabs_rs::precision::{Precision, PredicatePrecision};
use predabs_rs::predicates::AbstractionManager;
use predabs_rs::reducer::PredicateReducer;
use predabs_rs::relevant::OccurrenceComputer;
use predabs_rs::shutdown::ShutdownNotifier;
use predabs_rs::solver::EnumerativeSolver;
use predabs_rs::ssa::SsaMap;
use predabs_rs::state::PredicateAbstractState;
use predabs_rs::stats::Statistics;
use test_log::test;

struct Setup {
    solver: Rc<EnumerativeSolver>,
    engine: Rc<AbstractionEngine>,
    stats: Rc<Statistics>,
}

fn setup() -> Setup {
    let stats = Rc::new(Statistics::default());
    let solver = Rc::new(EnumerativeSolver::new(
        SolverOptions::default(),
        ShutdownNotifier::new(),
        stats.clone(),
    ));
    let engine = Rc::new(AbstractionEngine::new(
        Rc::new(AbstractionManager::default()),
        solver.clone(),
        Rc::new(SsaPathFormulaManager::new()),
        AbstractionOptions::default(),
        stats.clone(),
    ));
    Setup { solver, engine, stats }
}

fn edge(id: usize, kind: EdgeKind) -> CfaEdge {
    CfaEdge {
        id,
        source: Location::new(id as u32),
        target: Location::new(id as u32 + 1),
        kind,
    }
}

/// `assume(x == 0); y = x + 1; assume(y == 2)`
fn infeasible_edges() -> Vec<CfaEdge> {
    vec![
        edge(
            0,
            EdgeKind::Assume {
                condition: Term::var("x").eq(0),
                truth: true,
            },
        ),
        edge(
            1,
            EdgeKind::Assign {
                variable: "y".into(),
                value: Term::var("x") + 1,
            },
        ),
        edge(
            2,
            EdgeKind::Assume {
                condition: Term::var("y").eq(2),
                truth: true,
            },
        ),
    ]
}

/// `x = 0; f(); y = x + 1; if (y == expected) error;` with an empty `f`.
fn call_program(expected: i64) -> Rc<Cfa> {
    let mut b = CfaBuilder::new("main");
    let m0 = b.entry();
    let m1 = b.location("main");
    let m2 = b.location("main");
    let m3 = b.location("main");
    let err = b.location("main");
    let exit = b.location("main");
    let f0 = b.function("f");
    let f1 = b.location("f");
    b.set_function_exit("f", f1);
    b.error(err);
    b.edge(
        m0,
        m1,
        EdgeKind::Assign {
            variable: "x".into(),
            value: Term::int(0),
        },
    );
    b.edge(
        m1,
        f0,
        EdgeKind::Call {
            function: "f".into(),
            arguments: vec![],
            return_site: m2,
        },
    );
    b.edge(f0, f1, EdgeKind::Blank);
    b.edge(
        f1,
        m2,
        EdgeKind::Return {
            function: "f".into(),
            result: None,
        },
    );
    b.edge(
        m2,
        m3,
        EdgeKind::Assign {
            variable: "y".into(),
            value: Term::var("x") + 1,
        },
    );
    b.branch(m3, Term::var("y").eq(expected), err, exit);
    Rc::new(b.build(exit))
}

/// `x = value; if (x == expected) error;`
fn constant_program(value: i64, expected: i64) -> Rc<Cfa> {
    let mut b = CfaBuilder::new("main");
    let l0 = b.entry();
    let l1 = b.location("main");
    let err = b.location("main");
    let exit = b.location("main");
    b.error(err);
    b.edge(
        l0,
        l1,
        EdgeKind::Assign {
            variable: "x".into(),
            value: Term::int(value),
        },
    );
    b.branch(l1, Term::var("x").eq(expected), err, exit);
    Rc::new(b.build(exit))
}

/// `if (x > 5) {} else { x = 1; } if (x == 3) error;`
fn one_sided_assignment_program() -> Rc<Cfa> {
    let mut b = CfaBuilder::new("main");
    let l0 = b.entry();
    let then_loc = b.location("main");
    let else_loc = b.location("main");
    let join = b.location("main");
    let err = b.location("main");
    let exit = b.location("main");
    b.error(err);
    b.branch(l0, Term::var("x").gt(5), then_loc, else_loc);
    b.edge(then_loc, join, EdgeKind::Blank);
    b.edge(
        else_loc,
        join,
        EdgeKind::Assign {
            variable: "x".into(),
            value: Term::int(1),
        },
    );
    b.branch(join, Term::var("x").eq(3), err, exit);
    Rc::new(b.build(exit))
}

fn run(cfa: Rc<Cfa>, config: AnalysisConfig) -> color_eyre::Result<(Verdict, Analysis)> {
    let mut analysis = Analysis::new(cfa, config)?;
    let mut reached = analysis.initial_reached_set(PredicatePrecision::empty());
    let verdict = analysis.run(&mut reached)?;
    Ok((verdict, analysis))
}

// ─── Abstraction ──────────────────────────────────────────────────────────────

#[test]
fn abstraction_of_infeasible_block_is_false() -> color_eyre::Result<()> {
    let s = setup();
    let pfmgr = s.engine.path_formula_manager();
    let x_is_zero = s.engine.abstraction_manager().make_predicate(&Term::var("x").eq(0));
    let predicates = BTreeSet::from([x_is_zero]);

    let mut pf = pfmgr.make_empty();
    let top = s.engine.make_true_abstraction(&pf);
    for (i, e) in infeasible_edges().iter().enumerate() {
        pf = pfmgr.make_and(&pf, e)?;
        let abstraction = s.engine.build_abstraction(&top, &pf, &predicates)?;
        if i < 2 {
            assert_eq!(abstraction.formula(), &Term::var("x").eq(0));
        } else {
            assert!(abstraction.is_false());
        }
    }
    Ok(())
}

#[test]
fn spurious_trace_yields_interpolants() -> color_eyre::Result<()> {
    let s = setup();
    let pfmgr = s.engine.path_formula_manager();
    let mut pf = pfmgr.make_empty();
    let mut formulas = Vec::new();
    for e in infeasible_edges() {
        let next = pfmgr.make_and(&pf, &e)?;
        formulas.push(pfmgr.make_and(&pfmgr.make_empty_with(&pf), &e)?.formula().clone());
        pf = next;
    }
    assert_eq!(formulas[0], Term::Var(Symbol::indexed("x", 1)).eq(0));

    let interpolation = InterpolationManager::new(s.solver.clone(), s.solver.clone(), true, s.stats.clone());
    let CounterexampleTraceInfo::Spurious { interpolants } = interpolation.build_counterexample_trace(&formulas)?
    else {
        panic!("path should be infeasible");
    };
    assert_eq!(interpolants.len(), 2);
    assert!(interpolants.iter().all(|itp| !itp.is_true() && !itp.is_false()));
    assert_eq!(interpolants[0], Term::Var(Symbol::indexed("x", 1)).eq(0));

    // The same path as two blocks has a single cut point.
    let two_blocks = [formulas[0].and(&formulas[1]), formulas[2].clone()];
    match interpolation.build_counterexample_trace(&two_blocks)? {
        CounterexampleTraceInfo::Spurious { interpolants } => {
            assert_eq!(interpolants.len(), 1);
            assert!(!interpolants[0].is_true());
        }
        CounterexampleTraceInfo::Feasible { .. } => panic!("path should be infeasible"),
    }
    Ok(())
}

// ─── Reduce / expand ──────────────────────────────────────────────────────────

fn block_using(variables: &[&str]) -> Rc<Block> {
    Rc::new(Block {
        id: BlockId::default(),
        call_nodes: BTreeSet::from([Location::new(1)]),
        return_nodes: BTreeSet::from([Location::new(3)]),
        nodes: BTreeSet::from([Location::new(1), Location::new(2), Location::new(3)]),
        referenced_variables: variables.iter().map(|v| Rc::from(*v)).collect(),
    })
}

#[test]
fn reduce_and_expand_state() -> color_eyre::Result<()> {
    let s = setup();
    let amgr = s.engine.abstraction_manager();
    let p1 = amgr.make_predicate(&Term::var("x").gt(0));
    let p2 = amgr.make_predicate(&Term::var("y").gt(0));
    let p3 = amgr.make_predicate(&Term::var("z").eq(0));
    let ssa = SsaMap::default().with("x", 1).with("y", 1).with("z", 1);
    let conjunction = Term::var("x").gt(0) & Term::var("y").gt(0) & Term::var("z").eq(0);
    let pf = PathFormula::new(conjunction.instantiate(&ssa), ssa.clone(), 1);

    let pfmgr = s.engine.path_formula_manager();
    let top = s.engine.make_true_abstraction(&pfmgr.make_empty());
    let abstraction = s.engine.build_abstraction(&top, &pf, &BTreeSet::from([p1, p2, p3]))?;
    let root = PredicateAbstractState::abstraction_state(pfmgr.make_empty_with(&pf), abstraction, Default::default());

    let reducer = PredicateReducer::new(s.engine.clone(), Rc::new(OccurrenceComputer::new()));
    let block = block_using(&["x"]);
    let reduced = reducer.reduce_state(&root, &block)?;
    assert_eq!(reduced.abstraction().formula(), &Term::var("x").gt(0));

    // Unchanged by the block: expansion gives back the caller's abstraction.
    let expanded = reducer.expand_state(&root, &block, &reduced)?;
    assert!(s.engine.check_coverage(expanded.abstraction(), root.abstraction()));
    assert!(s.engine.check_coverage(root.abstraction(), expanded.abstraction()));

    // Learned inside the block: the caller's context about `y` and `z` survives.
    let stronger = s
        .engine
        .strengthen(reduced.abstraction(), &Term::var("x").gt(5).instantiate(&ssa));
    let exit = PredicateAbstractState::abstraction_state(reduced.path_formula().clone(), stronger, Default::default());
    let expanded = reducer.expand_state(&root, &block, &exit)?;
    assert!(s.engine.check_coverage(expanded.abstraction(), root.abstraction()));
    assert!(!s.engine.check_coverage(root.abstraction(), expanded.abstraction()));
    let y_and_z = s.engine.strengthen(
        &top,
        &(Term::var("y").gt(0) & Term::var("z").eq(0)).instantiate(&ssa),
    );
    assert!(s.engine.check_coverage(expanded.abstraction(), &y_and_z));
    assert_eq!(s.stats.reducer.reduce_calls.get(), 1);
    assert_eq!(s.stats.reducer.expand_calls.get(), 2);
    Ok(())
}

#[test]
fn reduce_and_expand_precision() {
    let s = setup();
    let amgr = s.engine.abstraction_manager();
    let p1 = amgr.make_predicate(&Term::var("x").gt(0));
    let p2 = amgr.make_predicate(&Term::var("y").gt(0));
    let mut precision = PredicatePrecision::empty();
    precision.add_global([&p1, &p2]);
    let precision = Precision::from(precision);

    let reducer = PredicateReducer::new(s.engine.clone(), Rc::new(OccurrenceComputer::new()));
    let block = block_using(&["x"]);
    let reduced = reducer.reduce_precision(&precision, &block);
    assert_eq!(reduced.view().global_predicates(), &BTreeSet::from([p1]));
    assert!(Rc::ptr_eq(&reducer.reduce_precision(&precision, &block), &reduced));
    assert_eq!(s.stats.reducer.precision_cache_hits.get(), 1);

    let expanded = reducer.expand_precision(&precision, None, &reduced);
    assert!(expanded.is_same(&precision));
    assert_eq!(s.stats.reducer.precision_fast_path.get(), 1);
}

// ─── CEGAR ────────────────────────────────────────────────────────────────────

#[test]
fn spurious_error_is_refined_away() -> color_eyre::Result<()> {
    let (verdict, analysis) = run(call_program(2), AnalysisConfig::default())?;
    assert!(matches!(verdict, Verdict::Safe), "{}", verdict);
    let stats = &analysis.stats().refinement;
    assert_eq!(stats.refinements.get(), 1);
    assert_eq!(stats.spurious.get(), 1);
    assert!(stats.predicates_learned.get() > 0);
    Ok(())
}

#[test]
fn feasible_error_is_reported() -> color_eyre::Result<()> {
    let (verdict, analysis) = run(call_program(1), AnalysisConfig::default())?;
    let Verdict::Unsafe(cex) = verdict else {
        panic!("expected a counterexample, got {}", verdict);
    };
    assert!(cex.precise);
    assert_eq!(cex.model.get_int(&Symbol::indexed("x", 2)), Some(0));
    assert_eq!(cex.model.get_int(&Symbol::indexed("y", 2)), Some(1));
    assert_eq!(analysis.stats().refinement.feasible.get(), 1);
    Ok(())
}

#[test]
fn impact_refinement_proves_safety() -> color_eyre::Result<()> {
    let config: AnalysisConfig = serde_json::from_str(r#"{ "refinement": { "strategy": "impact" } }"#)?;
    let (verdict, analysis) = run(call_program(2), config)?;
    assert!(matches!(verdict, Verdict::Safe), "{}", verdict);
    assert!(analysis.stats().refinement.strengthened_states.get() > 0);
    Ok(())
}

#[test]
fn block_summarization_from_config_file() -> color_eyre::Result<()> {
    let json = r#"{
        "algorithm": { "block-summarization": true },
        "refinement": { "path-strategy": "rederive", "relevance": "auxiliary" }
    }"#;
    let config: AnalysisConfig = serde_json::from_str(json)?;
    let (verdict, analysis) = run(call_program(2), config)?;
    assert!(matches!(verdict, Verdict::Safe), "{}", verdict);
    let reducer = analysis.reducer().expect("block summarization enables the reducer");
    assert!(reducer.relevant_computer().as_refineable().is_some());
    Ok(())
}

#[test]
fn merged_branches_keep_unassigned_values() -> color_eyre::Result<()> {
    let mut config = AnalysisConfig::default();
    config.algorithm.merge_non_abstraction_states = true;
    let (verdict, analysis) = run(one_sided_assignment_program(), config)?;
    assert!(matches!(verdict, Verdict::Safe), "{}", verdict);
    assert_eq!(analysis.stats().refinement.feasible.get(), 0);
    Ok(())
}

#[test]
fn error_locations_without_target_check_get_abstractions() -> color_eyre::Result<()> {
    let mut config = AnalysisConfig::default();
    config.abstraction.target_state_sat_check = false;
    let (verdict, _) = run(constant_program(1, 2), config.clone())?;
    assert!(matches!(verdict, Verdict::Safe), "{}", verdict);

    let (verdict, analysis) = run(constant_program(2, 2), config)?;
    assert!(matches!(verdict, Verdict::Unsafe(_)), "{}", verdict);
    assert_eq!(analysis.stats().transfer.target_sat_checks.get(), 0);
    Ok(())
}

#[test]
fn values_outside_the_solver_window_are_not_proved_safe() -> color_eyre::Result<()> {
    let mut analysis = Analysis::new(constant_program(9, 9), AnalysisConfig::default())?;
    let mut reached = analysis.initial_reached_set(PredicatePrecision::empty());
    let err = analysis.run(&mut reached).unwrap_err();
    assert!(
        matches!(err, Error::Solver(SolverError::OutOfRange { min: -8, max: 8 })),
        "{}",
        err
    );

    // A wide enough window finds the error.
    let mut config = AnalysisConfig::default();
    config.solver.max_value = 16;
    let (verdict, _) = run(constant_program(9, 9), config)?;
    let Verdict::Unsafe(cex) = verdict else {
        panic!("expected a counterexample, got {}", verdict);
    };
    assert_eq!(cex.model.get_int(&Symbol::indexed("x", 2)), Some(9));
    Ok(())
}

#[test]
fn block_summarization_reduces_during_exploration() -> color_eyre::Result<()> {
    let mut config = AnalysisConfig::default();
    config.algorithm.block_summarization = true;
    config.refinement.path_strategy = PathStrategy::Rederive;
    let (verdict, analysis) = run(call_program(2), config)?;
    assert!(matches!(verdict, Verdict::Safe), "{}", verdict);
    let stats = &analysis.stats().reducer;
    assert!(stats.block_entries.get() > 0);
    assert_eq!(stats.reduce_calls.get(), stats.block_entries.get());
    assert!(stats.expand_calls.get() >= stats.block_entries.get());
    Ok(())
}

#[test]
fn refinement_limit_gives_unknown() -> color_eyre::Result<()> {
    let mut config = AnalysisConfig::default();
    config.algorithm.max_refinements = 0;
    let (verdict, _) = run(call_program(2), config)?;
    assert!(matches!(verdict, Verdict::Unknown(_)), "{}", verdict);
    Ok(())
}

#[test]
fn shutdown_interrupts_the_analysis() -> color_eyre::Result<()> {
    let mut analysis = Analysis::new(call_program(2), AnalysisConfig::default())?;
    let mut reached = analysis.initial_reached_set(PredicatePrecision::empty());
    analysis.shutdown_notifier().request_shutdown();
    let verdict = analysis.run(&mut reached)?;
    assert!(matches!(verdict, Verdict::Interrupted), "{}", verdict);
    Ok(())
}
