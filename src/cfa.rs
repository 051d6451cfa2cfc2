//! Control-flow automaton: locations, edges and function structure.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use crate::formula::{Formula, Term};

/// A program location.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Location(u32);

impl Location {
    pub fn new(id: u32) -> Self {
        Location(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    Blank,
    /// Branch condition over uninstantiated variables.
    Assume { condition: Formula, truth: bool },
    Assign { variable: Rc<str>, value: Term },
    /// Nondeterministic assignment.
    Havoc { variable: Rc<str> },
    /// Call into `function`, binding `callee::param := argument` in order.
    Call {
        function: Rc<str>,
        arguments: Vec<(Rc<str>, Term)>,
        return_site: Location,
    },
    /// Return from `function`, optionally storing its return value.
    Return { function: Rc<str>, result: Option<Rc<str>> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfaEdge {
    pub id: usize,
    pub source: Location,
    pub target: Location,
    pub kind: EdgeKind,
}

impl CfaEdge {
    pub fn is_call(&self) -> bool {
        matches!(self.kind, EdgeKind::Call { .. })
    }

    pub fn is_return(&self) -> bool {
        matches!(self.kind, EdgeKind::Return { .. })
    }
}

impl Display for CfaEdge {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}: ", self.source, self.target)?;
        match &self.kind {
            EdgeKind::Blank => write!(f, "skip"),
            EdgeKind::Assume { condition, truth } => {
                if *truth {
                    write!(f, "[{}]", condition)
                } else {
                    write!(f, "[!({})]", condition)
                }
            }
            EdgeKind::Assign { variable, value } => write!(f, "{} := {}", variable, value),
            EdgeKind::Havoc { variable } => write!(f, "{} := *", variable),
            EdgeKind::Call { function, .. } => write!(f, "call {}", function),
            EdgeKind::Return { function, result } => match result {
                Some(var) => write!(f, "{} := return {}", var, function),
                None => write!(f, "return {}", function),
            },
        }
    }
}

/// Name of the variable holding the return value of `function`.
pub fn return_variable(function: &str) -> Rc<str> {
    Rc::from(format!("{}::__retval__", function))
}

/// Scoped name of a local variable of `function`.
pub fn local_variable(function: &str, name: &str) -> Rc<str> {
    Rc::from(format!("{}::{}", function, name))
}

/// True if `variable` is a local of `function` (including its return slot).
pub fn is_local_of(variable: &str, function: &str) -> bool {
    variable
        .strip_prefix(function)
        .is_some_and(|rest| rest.starts_with("::"))
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: Rc<str>,
    pub entry: Location,
    pub exit: Location,
    pub locations: BTreeSet<Location>,
}

/// Stack of return sites of the active calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Callstack(Rc<Vec<Location>>);

impl Callstack {
    pub fn push(&self, return_site: Location) -> Callstack {
        let mut frames = self.0.as_ref().clone();
        frames.push(return_site);
        Callstack(Rc::new(frames))
    }

    pub fn pop(&self) -> Option<(Location, Callstack)> {
        let mut frames = self.0.as_ref().clone();
        let top = frames.pop()?;
        Some((top, Callstack(Rc::new(frames))))
    }

    pub fn top(&self) -> Option<Location> {
        self.0.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug)]
pub struct Cfa {
    main: Rc<str>,
    edges: Vec<Rc<CfaEdge>>,
    outgoing: BTreeMap<Location, Vec<Rc<CfaEdge>>>,
    incoming: BTreeMap<Location, Vec<Rc<CfaEdge>>>,
    functions: BTreeMap<Rc<str>, FunctionInfo>,
    function_of: BTreeMap<Location, Rc<str>>,
    loop_heads: BTreeSet<Location>,
    error_locations: BTreeSet<Location>,
}

impl Cfa {
    pub fn main_function(&self) -> &FunctionInfo {
        &self.functions[&self.main]
    }

    pub fn entry(&self) -> Location {
        self.main_function().entry
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionInfo> + '_ {
        self.functions.values()
    }

    pub fn function_of(&self, loc: Location) -> Option<&Rc<str>> {
        self.function_of.get(&loc)
    }

    pub fn edges(&self) -> &[Rc<CfaEdge>] {
        &self.edges
    }

    pub fn leaving_edges(&self, loc: Location) -> &[Rc<CfaEdge>] {
        self.outgoing.get(&loc).map_or(&[], |v| v.as_slice())
    }

    pub fn entering_edges(&self, loc: Location) -> &[Rc<CfaEdge>] {
        self.incoming.get(&loc).map_or(&[], |v| v.as_slice())
    }

    pub fn is_loop_head(&self, loc: Location) -> bool {
        self.loop_heads.contains(&loc)
    }

    pub fn is_error_location(&self, loc: Location) -> bool {
        self.error_locations.contains(&loc)
    }

    pub fn is_function_entry(&self, loc: Location) -> bool {
        self.functions.values().any(|f| f.entry == loc)
    }

    /// True for locations reached by a function return edge.
    pub fn is_return_site(&self, loc: Location) -> bool {
        self.entering_edges(loc).iter().any(|e| e.is_return())
    }
}

/// Incremental construction of a [`Cfa`].
///
/// ```
/// use predabs_rs::cfa::{CfaBuilder, EdgeKind};
/// use predabs_rs::formula::Term;
///
/// let mut builder = CfaBuilder::new("main");
/// let entry = builder.entry();
/// let exit = builder.location("main");
/// builder.edge(entry, exit, EdgeKind::Assign { variable: "x".into(), value: Term::int(0) });
/// let cfa = builder.build(exit);
/// assert_eq!(cfa.leaving_edges(entry).len(), 1);
/// ```
pub struct CfaBuilder {
    main: Rc<str>,
    next_location: u32,
    edges: Vec<Rc<CfaEdge>>,
    functions: BTreeMap<Rc<str>, (Location, Option<Location>)>,
    function_of: BTreeMap<Location, Rc<str>>,
    loop_heads: BTreeSet<Location>,
    error_locations: BTreeSet<Location>,
}

impl CfaBuilder {
    pub fn new(main: &str) -> Self {
        let mut builder = Self {
            main: Rc::from(main),
            next_location: 0,
            edges: Vec::new(),
            functions: BTreeMap::new(),
            function_of: BTreeMap::new(),
            loop_heads: BTreeSet::new(),
            error_locations: BTreeSet::new(),
        };
        builder.function(main);
        builder
    }

    /// Entry location of the main function.
    pub fn entry(&self) -> Location {
        self.functions[&self.main].0
    }

    /// Declare a function and return its entry location.
    pub fn function(&mut self, name: &str) -> Location {
        if let Some(&(entry, _)) = self.functions.get(name) {
            return entry;
        }
        let name: Rc<str> = Rc::from(name);
        let entry = self.fresh(&name);
        self.functions.insert(name, (entry, None));
        entry
    }

    pub fn set_function_exit(&mut self, name: &str, exit: Location) {
        if let Some(entry) = self.functions.get_mut(name) {
            entry.1 = Some(exit);
        }
    }

    /// A fresh location inside `function`.
    pub fn location(&mut self, function: &str) -> Location {
        let name = self
            .functions
            .get_key_value(function)
            .map(|(k, _)| k.clone())
            .unwrap_or_else(|| Rc::from(function));
        self.fresh(&name)
    }

    fn fresh(&mut self, function: &Rc<str>) -> Location {
        let loc = Location(self.next_location);
        self.next_location += 1;
        self.function_of.insert(loc, function.clone());
        loc
    }

    pub fn edge(&mut self, source: Location, target: Location, kind: EdgeKind) -> Rc<CfaEdge> {
        let edge = Rc::new(CfaEdge {
            id: self.edges.len(),
            source,
            target,
            kind,
        });
        self.edges.push(edge.clone());
        edge
    }

    /// Both branches of `condition` leaving `source`.
    pub fn branch(&mut self, source: Location, condition: Formula, then_loc: Location, else_loc: Location) {
        self.edge(
            source,
            then_loc,
            EdgeKind::Assume {
                condition: condition.clone(),
                truth: true,
            },
        );
        self.edge(
            source,
            else_loc,
            EdgeKind::Assume {
                condition,
                truth: false,
            },
        );
    }

    pub fn loop_head(&mut self, loc: Location) {
        self.loop_heads.insert(loc);
    }

    pub fn error(&mut self, loc: Location) {
        self.error_locations.insert(loc);
    }

    /// Finish the automaton with `main_exit` as the exit of the main function.
    pub fn build(mut self, main_exit: Location) -> Cfa {
        let main = self.main.clone();
        self.set_function_exit(&main, main_exit);

        let mut outgoing: BTreeMap<Location, Vec<Rc<CfaEdge>>> = BTreeMap::new();
        let mut incoming: BTreeMap<Location, Vec<Rc<CfaEdge>>> = BTreeMap::new();
        for edge in &self.edges {
            outgoing.entry(edge.source).or_default().push(edge.clone());
            incoming.entry(edge.target).or_default().push(edge.clone());
        }

        let mut functions = BTreeMap::new();
        for (name, (entry, exit)) in &self.functions {
            let locations = self
                .function_of
                .iter()
                .filter(|(_, f)| *f == name)
                .map(|(&loc, _)| loc)
                .collect();
            functions.insert(
                name.clone(),
                FunctionInfo {
                    name: name.clone(),
                    entry: *entry,
                    exit: exit.unwrap_or(*entry),
                    locations,
                },
            );
        }

        Cfa {
            main,
            edges: self.edges,
            outgoing,
            incoming,
            functions,
            function_of: self.function_of,
            loop_heads: self.loop_heads,
            error_locations: self.error_locations,
        }
    }
}
