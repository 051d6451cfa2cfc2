//! Runs the CEGAR loop on one of a few built-in programs.
//!
//! Run with:
//! ```bash
//! cargo run --example cegar -- loop --bound 5
//! cargo run --example cegar -- call --config analysis.json
//! ```

use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, ValueEnum};

use predabs_rs::algorithm::{Analysis, Verdict};
use predabs_rs::cfa::{Cfa, CfaBuilder, EdgeKind};
use predabs_rs::config::AnalysisConfig;
use predabs_rs::formula::Term;
use predabs_rs::precision::PredicatePrecision;

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Program {
    /// `x = 0; while (x < bound) x++; if (x != bound) error;`
    Loop,
    /// `x = 0; inc(); if (x != 1) error;` where `inc` increments `x`.
    Call,
    /// `if (y > 0) x = 1; else x = 2; if (x == 2) error;`
    Diamond,
}

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Program to analyze.
    #[arg(value_enum, default_value = "loop")]
    program: Program,

    /// Loop bound.
    #[arg(long, value_name = "INT", default_value = "3")]
    bound: i64,

    /// JSON file with analysis options.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use Impact-style refinement.
    #[arg(long)]
    impact: bool,

    /// Print statistics.
    #[arg(long)]
    stats: bool,
}

fn loop_program(bound: i64) -> Cfa {
    let mut b = CfaBuilder::new("main");
    let l0 = b.entry();
    let head = b.location("main");
    let body = b.location("main");
    let after = b.location("main");
    let err = b.location("main");
    let exit = b.location("main");
    b.loop_head(head);
    b.error(err);
    b.edge(
        l0,
        head,
        EdgeKind::Assign {
            variable: "x".into(),
            value: Term::int(0),
        },
    );
    b.branch(head, Term::var("x").lt(bound), body, after);
    b.edge(
        body,
        head,
        EdgeKind::Assign {
            variable: "x".into(),
            value: Term::var("x") + 1,
        },
    );
    b.branch(after, Term::var("x").ne(bound), err, exit);
    b.build(exit)
}

fn call_program() -> Cfa {
    let mut b = CfaBuilder::new("main");
    let m0 = b.entry();
    let m1 = b.location("main");
    let m2 = b.location("main");
    let err = b.location("main");
    let exit = b.location("main");
    let f0 = b.function("inc");
    let f1 = b.location("inc");
    b.set_function_exit("inc", f1);
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
            function: "inc".into(),
            arguments: vec![],
            return_site: m2,
        },
    );
    b.edge(
        f0,
        f1,
        EdgeKind::Assign {
            variable: "x".into(),
            value: Term::var("x") + 1,
        },
    );
    b.edge(
        f1,
        m2,
        EdgeKind::Return {
            function: "inc".into(),
            result: None,
        },
    );
    b.branch(m2, Term::var("x").ne(1), err, exit);
    b.build(exit)
}

fn diamond_program() -> Cfa {
    let mut b = CfaBuilder::new("main");
    let l0 = b.entry();
    let then_loc = b.location("main");
    let else_loc = b.location("main");
    let join = b.location("main");
    let err = b.location("main");
    let exit = b.location("main");
    b.error(err);
    b.branch(l0, Term::var("y").gt(0), then_loc, else_loc);
    for (loc, value) in [(then_loc, 1), (else_loc, 2)] {
        b.edge(
            loc,
            join,
            EdgeKind::Assign {
                variable: "x".into(),
                value: Term::int(value),
            },
        );
    }
    b.branch(join, Term::var("x").eq(2), err, exit);
    b.build(exit)
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = std::time::Instant::now();

    let args = Cli::parse();
    println!("args = {:?}", args);

    let mut config = match &args.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => AnalysisConfig::default(),
    };
    if args.impact {
        config.refinement.strategy = predabs_rs::config::RefinementStrategyKind::Impact;
    }

    let cfa = match args.program {
        Program::Loop => loop_program(args.bound),
        Program::Call => call_program(),
        Program::Diamond => diamond_program(),
    };
    println!("cfa: {} edges, {} functions", cfa.edges().len(), cfa.functions().count());

    let mut analysis = Analysis::new(Rc::new(cfa), config)?;
    let mut reached = analysis.initial_reached_set(PredicatePrecision::empty());
    let verdict = analysis.run(&mut reached)?;

    println!("----------------------------------");
    println!("Verdict: {}", verdict);
    if let Verdict::Unsafe(cex) = &verdict {
        for edge in cex.path.edges() {
            println!("  {}", edge);
        }
        println!("Assignment{}:", if cex.precise { "" } else { " (imprecise)" });
        for (symbol, value) in cex.model.iter() {
            println!("  {} = {:?}", symbol, value);
        }
    }
    println!("Reached states: {}", reached.len());
    if args.stats {
        println!("{}", analysis.stats());
    }

    let time_total = time_total.elapsed();
    println!("\nAll done in {:.2}s", time_total.as_secs_f64());

    Ok(())
}
