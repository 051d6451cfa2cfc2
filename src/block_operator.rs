//! Decides where a block ends and an abstraction is computed.

use std::collections::BTreeSet;
use std::rc::Rc;

use log::trace;

use crate::cfa::{Cfa, CfaEdge, Location};
use crate::config::BlockOperatorOptions;
use crate::pathformula::PathFormula;
use crate::stats::Statistics;

#[derive(Debug)]
pub struct BlockOperator {
    cfa: Rc<Cfa>,
    options: BlockOperatorOptions,
    explicit_nodes: BTreeSet<Location>,
    stats: Rc<Statistics>,
}

impl BlockOperator {
    pub fn new(cfa: Rc<Cfa>, options: BlockOperatorOptions, stats: Rc<Statistics>) -> Self {
        let explicit_nodes = options.explicit_nodes.iter().map(|&id| Location::new(id)).collect();
        Self {
            cfa,
            options,
            explicit_nodes,
            stats,
        }
    }

    pub fn options(&self) -> &BlockOperatorOptions {
        &self.options
    }

    fn is_function_boundary(&self, loc: Location) -> bool {
        self.cfa.is_function_entry(loc) || self.cfa.is_return_site(loc)
    }

    /// Whether the block ends after `edge`, with `pf` the path formula
    /// including the edge.
    pub fn is_block_end(&self, edge: &CfaEdge, pf: &PathFormula) -> bool {
        let stats = &self.stats.blocks;
        let opts = &self.options;
        let succ = edge.target;

        if opts.always_and_only_at_explicit_nodes {
            let result = self.explicit_nodes.contains(&edge.source);
            if result {
                stats.blocks_at_explicit_nodes.inc();
            }
            return result;
        }
        if opts.always_at_functions && self.is_function_boundary(succ) {
            stats.blocks_at_functions.inc();
            return true;
        }
        if opts.always_at_loops && self.cfa.is_loop_head(succ) {
            stats.blocks_at_loops.inc();
            return true;
        }

        // Without a threshold, `functions` and `loops` apply unconditionally.
        let threshold_reached = opts.threshold == 0 || pf.length() >= opts.threshold;
        if !threshold_reached {
            return false;
        }
        if opts.threshold > 0 && opts.always_after_threshold {
            trace!("Threshold {} reached at {}", opts.threshold, succ);
            stats.blocks_at_threshold.inc();
            return true;
        }
        if opts.functions && self.is_function_boundary(succ) {
            stats.blocks_at_functions.inc();
            return true;
        }
        if opts.loops && self.cfa.is_loop_head(succ) {
            stats.blocks_at_loops.inc();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::{CfaBuilder, EdgeKind};
    use crate::formula::{Formula, Term};
    use crate::ssa::SsaMap;
    use test_log::test;

    struct Program {
        cfa: Rc<Cfa>,
        to_loop: Rc<CfaEdge>,
        to_call: Rc<CfaEdge>,
        to_error: Rc<CfaEdge>,
        plain: Rc<CfaEdge>,
    }

    fn program() -> Program {
        let mut b = CfaBuilder::new("main");
        let l0 = b.entry();
        let l1 = b.location("main");
        let l2 = b.location("main");
        let l3 = b.location("main");
        let err = b.location("main");
        let f0 = b.function("f");
        b.set_function_exit("f", f0);
        b.loop_head(l1);
        b.error(err);
        let to_loop = b.edge(l0, l1, EdgeKind::Blank);
        let to_call = b.edge(
            l1,
            f0,
            EdgeKind::Call {
                function: "f".into(),
                arguments: vec![],
                return_site: l2,
            },
        );
        b.edge(
            f0,
            l2,
            EdgeKind::Return {
                function: "f".into(),
                result: None,
            },
        );
        let plain = b.edge(
            l2,
            l3,
            EdgeKind::Assign {
                variable: "x".into(),
                value: Term::int(1),
            },
        );
        let to_error = b.edge(
            l3,
            err,
            EdgeKind::Assume {
                condition: Term::var("x").eq(1),
                truth: true,
            },
        );
        Program {
            cfa: Rc::new(b.build(l3)),
            to_loop,
            to_call,
            to_error,
            plain,
        }
    }

    fn pf(length: usize) -> PathFormula {
        PathFormula::new(Formula::tt(), SsaMap::default(), length)
    }

    #[test]
    fn test_default_options() {
        let p = program();
        let stats = Rc::new(Statistics::default());
        let op = BlockOperator::new(p.cfa, BlockOperatorOptions::default(), stats.clone());
        assert!(op.is_block_end(&p.to_loop, &pf(1)));
        assert!(op.is_block_end(&p.to_call, &pf(1)));
        assert!(!op.is_block_end(&p.to_error, &pf(1)));
        assert!(!op.is_block_end(&p.plain, &pf(1)));
        assert_eq!(stats.blocks.blocks_at_loops.get(), 1);
        assert_eq!(stats.blocks.blocks_at_functions.get(), 1);
    }

    #[test]
    fn test_threshold() {
        let p = program();
        let options = BlockOperatorOptions {
            threshold: 3,
            always_at_loops: false,
            always_at_functions: false,
            ..Default::default()
        };
        let stats = Rc::new(Statistics::default());
        let op = BlockOperator::new(p.cfa.clone(), options.clone(), stats.clone());
        assert!(!op.is_block_end(&p.plain, &pf(2)));
        assert!(op.is_block_end(&p.plain, &pf(3)));
        assert_eq!(stats.blocks.blocks_at_threshold.get(), 1);

        let op = BlockOperator::new(
            p.cfa,
            BlockOperatorOptions {
                always_after_threshold: false,
                loops: true,
                ..options
            },
            stats,
        );
        assert!(!op.is_block_end(&p.plain, &pf(5)));
        assert!(!op.is_block_end(&p.to_loop, &pf(2)));
        assert!(op.is_block_end(&p.to_loop, &pf(3)));
    }

    #[test]
    fn test_explicit_nodes_only() {
        let p = program();
        let options = BlockOperatorOptions {
            always_and_only_at_explicit_nodes: true,
            explicit_nodes: vec![p.plain.source.id()],
            ..Default::default()
        };
        let op = BlockOperator::new(p.cfa, options, Rc::new(Statistics::default()));
        assert!(op.is_block_end(&p.plain, &pf(1)));
        assert!(!op.is_block_end(&p.to_loop, &pf(1)));
        assert!(!op.is_block_end(&p.to_error, &pf(1)));
    }
}
