//! Static partitioning of the control-flow automaton into nested blocks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::cfa::{Cfa, CfaEdge, EdgeKind, Location};

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BlockId(usize);

impl BlockId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A single-entry region of the automaton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub call_nodes: BTreeSet<Location>,
    pub return_nodes: BTreeSet<Location>,
    pub nodes: BTreeSet<Location>,
    /// Names of the variables read or written by edges inside the block.
    pub referenced_variables: BTreeSet<Rc<str>>,
}

impl Block {
    pub fn contains(&self, loc: Location) -> bool {
        self.nodes.contains(&loc)
    }

    pub fn is_call_node(&self, loc: Location) -> bool {
        self.call_nodes.contains(&loc)
    }

    pub fn is_return_node(&self, loc: Location) -> bool {
        self.return_nodes.contains(&loc)
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (", self.id)?;
        for (i, loc) in self.call_nodes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", loc)?;
        }
        write!(f, ")")
    }
}

fn edge_variables(edge: &CfaEdge, out: &mut BTreeSet<Rc<str>>) {
    match &edge.kind {
        EdgeKind::Blank => {}
        EdgeKind::Assume { condition, .. } => out.extend(condition.variable_names()),
        EdgeKind::Assign { variable, value } => {
            out.insert(variable.clone());
            out.extend(value.variable_names());
        }
        EdgeKind::Havoc { variable } => {
            out.insert(variable.clone());
        }
        EdgeKind::Call { arguments, .. } => {
            for (param, value) in arguments {
                out.insert(param.clone());
                out.extend(value.variable_names());
            }
        }
        EdgeKind::Return { function, result } => {
            out.insert(crate::cfa::return_variable(function));
            if let Some(var) = result {
                out.insert(var.clone());
            }
        }
    }
}

#[derive(Debug)]
pub struct BlockPartitioning {
    blocks: Vec<Rc<Block>>,
    main: BlockId,
    call_node_blocks: BTreeMap<Location, BlockId>,
}

impl BlockPartitioning {
    pub fn new(blocks: Vec<Block>, main: BlockId) -> Self {
        let mut call_node_blocks = BTreeMap::new();
        for block in &blocks {
            for &loc in &block.call_nodes {
                // Inner blocks come later and win.
                call_node_blocks.insert(loc, block.id);
            }
        }
        Self {
            blocks: blocks.into_iter().map(Rc::new).collect(),
            main,
            call_node_blocks,
        }
    }

    /// One block per function; a function's block contains the functions it calls.
    pub fn by_functions(cfa: &Cfa) -> Self {
        let main_name = cfa.main_function().name.clone();
        let mut callees: BTreeMap<Rc<str>, BTreeSet<Rc<str>>> = BTreeMap::new();
        for edge in cfa.edges() {
            if let EdgeKind::Call { function, .. } = &edge.kind {
                if let Some(caller) = cfa.function_of(edge.source) {
                    callees.entry(caller.clone()).or_default().insert(function.clone());
                }
            }
        }

        let mut blocks = Vec::new();
        let mut main = BlockId(0);
        // Main first, so that nested function blocks override it for call nodes.
        let mut functions: Vec<_> = cfa.functions().collect();
        functions.sort_by_key(|f| f.name != main_name);
        for function in functions {
            let mut reachable = BTreeSet::from([function.name.clone()]);
            let mut stack = vec![function.name.clone()];
            while let Some(f) = stack.pop() {
                for callee in callees.get(&f).into_iter().flatten() {
                    if reachable.insert(callee.clone()) {
                        stack.push(callee.clone());
                    }
                }
            }
            let nodes: BTreeSet<Location> = reachable
                .iter()
                .filter_map(|name| cfa.function(name))
                .flat_map(|f| f.locations.iter().copied())
                .collect();
            let mut referenced_variables = BTreeSet::new();
            for edge in cfa.edges() {
                if nodes.contains(&edge.source) && nodes.contains(&edge.target) {
                    edge_variables(edge, &mut referenced_variables);
                }
            }
            let id = BlockId(blocks.len());
            if function.name == main_name {
                main = id;
            }
            blocks.push(Block {
                id,
                call_nodes: BTreeSet::from([function.entry]),
                return_nodes: BTreeSet::from([function.exit]),
                nodes,
                referenced_variables,
            });
        }
        Self::new(blocks, main)
    }

    pub fn main_block(&self) -> &Rc<Block> {
        &self.blocks[self.main.0]
    }

    pub fn block(&self, id: BlockId) -> Option<&Rc<Block>> {
        self.blocks.get(id.0)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Rc<Block>> + '_ {
        self.blocks.iter()
    }

    pub fn is_call_node(&self, loc: Location) -> bool {
        self.call_node_blocks.contains_key(&loc)
    }

    pub fn is_return_node(&self, loc: Location) -> bool {
        self.blocks.iter().any(|b| b.is_return_node(loc))
    }

    pub fn block_for_call_node(&self, loc: Location) -> Option<&Rc<Block>> {
        self.call_node_blocks.get(&loc).and_then(|&id| self.block(id))
    }
}
