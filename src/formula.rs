//! Quantifier-free formulas over linear integer terms and propositions.
//!
//! Formulas are immutable and reference counted, so cloning is cheap and
//! structurally equal formulas compare (and hash) equal. Constructors perform
//! light simplification (constant folding, flattening, absorption of `true` and
//! `false`), which keeps SSA-instantiated path formulas small.
//!
//! Variables are [`Symbol`]s. A symbol without an index is *uninstantiated*
//! (the form predicates are stored in), a symbol with an index is an SSA
//! version of a program variable (the form solvers see).
//!
//! ```
//! use predabs_rs::formula::{Formula, Term};
//!
//! let x = Term::var("x");
//! let y = Term::var("y");
//! let f = x.clone().eq(0) & y.clone().eq(x + 1);
//! assert_eq!(f.to_string(), "(x == 0 && y == x + 1)");
//! ```

use std::collections::BTreeSet;
use std::fmt::{Debug, Display, Formatter};
use std::ops::{Add, BitAnd, BitOr, Mul, Not, Sub};
use std::rc::Rc;

use crate::ssa::SsaMap;

/// Variable name with an optional SSA index.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    name: Rc<str>,
    index: Option<u32>,
}

impl Symbol {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    pub fn indexed(name: impl Into<Rc<str>>, index: u32) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
        }
    }

    pub fn name(&self) -> &Rc<str> {
        &self.name
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn with_index(&self, index: u32) -> Self {
        Self::indexed(self.name.clone(), index)
    }

    pub fn unindexed(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}@{}", self.name, i),
            None => write!(f, "{}", self.name),
        }
    }
}

impl Debug for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Linear integer term.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Const(i64),
    Var(Symbol),
    Add(Rc<Term>, Rc<Term>),
    Sub(Rc<Term>, Rc<Term>),
    Scale(i64, Rc<Term>),
}

impl Term {
    pub fn var(name: &str) -> Self {
        Term::Var(Symbol::new(name))
    }

    pub fn int(value: i64) -> Self {
        Term::Const(value)
    }

    pub fn eq(self, rhs: impl Into<Term>) -> Formula {
        Formula::atom(Cmp::Eq, self, rhs.into())
    }
    pub fn ne(self, rhs: impl Into<Term>) -> Formula {
        Formula::atom(Cmp::Ne, self, rhs.into())
    }
    pub fn lt(self, rhs: impl Into<Term>) -> Formula {
        Formula::atom(Cmp::Lt, self, rhs.into())
    }
    pub fn le(self, rhs: impl Into<Term>) -> Formula {
        Formula::atom(Cmp::Le, self, rhs.into())
    }
    pub fn gt(self, rhs: impl Into<Term>) -> Formula {
        Formula::atom(Cmp::Gt, self, rhs.into())
    }
    pub fn ge(self, rhs: impl Into<Term>) -> Formula {
        Formula::atom(Cmp::Ge, self, rhs.into())
    }

    fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        match self {
            Term::Const(_) => {}
            Term::Var(s) => {
                out.insert(s.clone());
            }
            Term::Add(a, b) | Term::Sub(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
            Term::Scale(_, t) => t.collect_symbols(out),
        }
    }

    /// Names of the variables occurring in the term.
    pub fn variable_names(&self) -> BTreeSet<Rc<str>> {
        let mut symbols = BTreeSet::new();
        self.collect_symbols(&mut symbols);
        symbols.into_iter().map(|s| s.name().clone()).collect()
    }

    fn map_symbols(&self, f: &impl Fn(&Symbol) -> Symbol) -> Term {
        match self {
            Term::Const(c) => Term::Const(*c),
            Term::Var(s) => Term::Var(f(s)),
            Term::Add(a, b) => Term::Add(Rc::new(a.map_symbols(f)), Rc::new(b.map_symbols(f))),
            Term::Sub(a, b) => Term::Sub(Rc::new(a.map_symbols(f)), Rc::new(b.map_symbols(f))),
            Term::Scale(k, t) => Term::Scale(*k, Rc::new(t.map_symbols(f))),
        }
    }

    /// Attach SSA indices from `ssa` to all variables of the term.
    pub fn instantiate(&self, ssa: &SsaMap) -> Term {
        self.map_symbols(&|s: &Symbol| s.with_index(ssa.index_or_uninitialized(s.name())))
    }

    /// Evaluate the term, `None` if a variable has no value.
    pub fn evaluate(&self, value_of: &impl Fn(&Symbol) -> Option<i64>) -> Option<i64> {
        match self {
            Term::Const(c) => Some(*c),
            Term::Var(s) => value_of(s),
            Term::Add(a, b) => Some(a.evaluate(value_of)?.wrapping_add(b.evaluate(value_of)?)),
            Term::Sub(a, b) => Some(a.evaluate(value_of)?.wrapping_sub(b.evaluate(value_of)?)),
            Term::Scale(k, t) => Some(k.wrapping_mul(t.evaluate(value_of)?)),
        }
    }
}

impl From<i64> for Term {
    fn from(value: i64) -> Self {
        Term::Const(value)
    }
}

impl Add for Term {
    type Output = Term;

    fn add(self, rhs: Term) -> Term {
        match (self, rhs) {
            (Term::Const(a), Term::Const(b)) => Term::Const(a.wrapping_add(b)),
            (t, Term::Const(0)) | (Term::Const(0), t) => t,
            (a, b) => Term::Add(Rc::new(a), Rc::new(b)),
        }
    }
}

impl Add<i64> for Term {
    type Output = Term;

    fn add(self, rhs: i64) -> Term {
        self + Term::Const(rhs)
    }
}

impl Sub for Term {
    type Output = Term;

    fn sub(self, rhs: Term) -> Term {
        match (self, rhs) {
            (Term::Const(a), Term::Const(b)) => Term::Const(a.wrapping_sub(b)),
            (t, Term::Const(0)) => t,
            (a, b) => Term::Sub(Rc::new(a), Rc::new(b)),
        }
    }
}

impl Sub<i64> for Term {
    type Output = Term;

    fn sub(self, rhs: i64) -> Term {
        self - Term::Const(rhs)
    }
}

impl Mul<Term> for i64 {
    type Output = Term;

    fn mul(self, rhs: Term) -> Term {
        match rhs {
            Term::Const(c) => Term::Const(self.wrapping_mul(c)),
            t if self == 1 => t,
            t => Term::Scale(self, Rc::new(t)),
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Const(c) => write!(f, "{}", c),
            Term::Var(s) => write!(f, "{}", s),
            Term::Add(a, b) => write!(f, "{} + {}", a, b),
            Term::Sub(a, b) => match b.as_ref() {
                Term::Add(..) | Term::Sub(..) => write!(f, "{} - ({})", a, b),
                _ => write!(f, "{} - {}", a, b),
            },
            Term::Scale(k, t) => match t.as_ref() {
                Term::Add(..) | Term::Sub(..) => write!(f, "{}*({})", k, t),
                _ => write!(f, "{}*{}", k, t),
            },
        }
    }
}

impl Debug for Term {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    pub fn holds(self, a: i64, b: i64) -> bool {
        match self {
            Cmp::Eq => a == b,
            Cmp::Ne => a != b,
            Cmp::Lt => a < b,
            Cmp::Le => a <= b,
            Cmp::Gt => a > b,
            Cmp::Ge => a >= b,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Cmp::Eq => "==",
            Cmp::Ne => "!=",
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormulaKind {
    True,
    False,
    /// Boolean proposition.
    Prop(Symbol),
    Atom(Cmp, Term, Term),
    Not(Formula),
    And(Vec<Formula>),
    Or(Vec<Formula>),
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Formula(Rc<FormulaKind>);

impl Formula {
    fn from_kind(kind: FormulaKind) -> Self {
        Formula(Rc::new(kind))
    }

    pub fn kind(&self) -> &FormulaKind {
        &self.0
    }

    pub fn tt() -> Self {
        Self::from_kind(FormulaKind::True)
    }

    pub fn ff() -> Self {
        Self::from_kind(FormulaKind::False)
    }

    pub fn constant(value: bool) -> Self {
        if value {
            Self::tt()
        } else {
            Self::ff()
        }
    }

    pub fn prop(name: &str) -> Self {
        Self::from_kind(FormulaKind::Prop(Symbol::new(name)))
    }

    pub fn prop_symbol(symbol: Symbol) -> Self {
        Self::from_kind(FormulaKind::Prop(symbol))
    }

    pub fn atom(cmp: Cmp, lhs: Term, rhs: Term) -> Self {
        if let (Term::Const(a), Term::Const(b)) = (&lhs, &rhs) {
            return Self::constant(cmp.holds(*a, *b));
        }
        Self::from_kind(FormulaKind::Atom(cmp, lhs, rhs))
    }

    pub fn is_true(&self) -> bool {
        matches!(self.kind(), FormulaKind::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self.kind(), FormulaKind::False)
    }

    pub fn is_atom(&self) -> bool {
        matches!(self.kind(), FormulaKind::Atom(..) | FormulaKind::Prop(_))
    }

    pub fn not(f: &Formula) -> Self {
        match f.kind() {
            FormulaKind::True => Self::ff(),
            FormulaKind::False => Self::tt(),
            FormulaKind::Not(inner) => inner.clone(),
            _ => Self::from_kind(FormulaKind::Not(f.clone())),
        }
    }

    pub fn and_all(formulas: impl IntoIterator<Item = Formula>) -> Self {
        let mut parts: Vec<Formula> = Vec::new();
        for f in formulas {
            match f.kind() {
                FormulaKind::True => {}
                FormulaKind::False => return Self::ff(),
                FormulaKind::And(inner) => {
                    for g in inner {
                        if !parts.contains(g) {
                            parts.push(g.clone());
                        }
                    }
                }
                _ => {
                    if !parts.contains(&f) {
                        parts.push(f);
                    }
                }
            }
        }
        match parts.len() {
            0 => Self::tt(),
            1 => parts.pop().unwrap_or_else(Self::tt),
            _ => Self::from_kind(FormulaKind::And(parts)),
        }
    }

    pub fn or_all(formulas: impl IntoIterator<Item = Formula>) -> Self {
        let mut parts: Vec<Formula> = Vec::new();
        for f in formulas {
            match f.kind() {
                FormulaKind::False => {}
                FormulaKind::True => return Self::tt(),
                FormulaKind::Or(inner) => {
                    for g in inner {
                        if !parts.contains(g) {
                            parts.push(g.clone());
                        }
                    }
                }
                _ => {
                    if !parts.contains(&f) {
                        parts.push(f);
                    }
                }
            }
        }
        match parts.len() {
            0 => Self::ff(),
            1 => parts.pop().unwrap_or_else(Self::ff),
            _ => Self::from_kind(FormulaKind::Or(parts)),
        }
    }

    pub fn and(&self, other: &Formula) -> Self {
        Self::and_all([self.clone(), other.clone()])
    }

    pub fn or(&self, other: &Formula) -> Self {
        Self::or_all([self.clone(), other.clone()])
    }

    pub fn implies(&self, other: &Formula) -> Self {
        Self::not(self).or(other)
    }

    pub fn iff(&self, other: &Formula) -> Self {
        self.implies(other).and(&other.implies(self))
    }

    /// Rebuild the formula with every symbol rewritten by `f`.
    pub fn map_symbols(&self, f: &impl Fn(&Symbol) -> Symbol) -> Formula {
        match self.kind() {
            FormulaKind::True | FormulaKind::False => self.clone(),
            FormulaKind::Prop(s) => Self::prop_symbol(f(s)),
            FormulaKind::Atom(cmp, a, b) => Self::atom(*cmp, a.map_symbols(f), b.map_symbols(f)),
            FormulaKind::Not(g) => Self::not(&g.map_symbols(f)),
            FormulaKind::And(gs) => Self::and_all(gs.iter().map(|g| g.map_symbols(f))),
            FormulaKind::Or(gs) => Self::or_all(gs.iter().map(|g| g.map_symbols(f))),
        }
    }

    /// Attach SSA indices from `ssa` to all integer variables.
    ///
    /// Propositions are left untouched. Variables missing from the map get the
    /// index of an uninitialized read.
    pub fn instantiate(&self, ssa: &SsaMap) -> Formula {
        self.map_rewrite(&|s: &Symbol| s.with_index(ssa.index_or_uninitialized(s.name())))
    }

    fn map_rewrite(&self, f: &impl Fn(&Symbol) -> Symbol) -> Formula {
        match self.kind() {
            FormulaKind::Prop(_) => self.clone(),
            FormulaKind::Atom(cmp, a, b) => Self::atom(*cmp, a.map_symbols(f), b.map_symbols(f)),
            FormulaKind::True | FormulaKind::False => self.clone(),
            FormulaKind::Not(g) => Self::not(&g.map_rewrite(f)),
            FormulaKind::And(gs) => Self::and_all(gs.iter().map(|g| g.map_rewrite(f))),
            FormulaKind::Or(gs) => Self::or_all(gs.iter().map(|g| g.map_rewrite(f))),
        }
    }

    /// Strip SSA indices from all integer variables.
    pub fn uninstantiate(&self) -> Formula {
        self.map_rewrite(&|s: &Symbol| s.unindexed())
    }

    /// Integer variables occurring in the formula.
    pub fn variables(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.visit(&mut |f| {
            if let FormulaKind::Atom(_, a, b) = f.kind() {
                a.collect_symbols(&mut out);
                b.collect_symbols(&mut out);
            }
        });
        out
    }

    /// Propositional symbols occurring in the formula.
    pub fn propositions(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.visit(&mut |f| {
            if let FormulaKind::Prop(s) = f.kind() {
                out.insert(s.clone());
            }
        });
        out
    }

    /// Names of the integer variables, without SSA indices.
    pub fn variable_names(&self) -> BTreeSet<Rc<str>> {
        self.variables().into_iter().map(|s| s.name().clone()).collect()
    }

    fn visit(&self, callback: &mut impl FnMut(&Formula)) {
        callback(self);
        match self.kind() {
            FormulaKind::Not(g) => g.visit(callback),
            FormulaKind::And(gs) | FormulaKind::Or(gs) => {
                for g in gs {
                    g.visit(callback);
                }
            }
            _ => {}
        }
    }

    /// Distinct atoms (comparisons and propositions), in order of first occurrence.
    pub fn atoms(&self) -> Vec<Formula> {
        let mut out: Vec<Formula> = Vec::new();
        self.visit(&mut |f| {
            if f.is_atom() && !out.contains(f) {
                out.push(f.clone());
            }
        });
        out
    }

    /// Uninstantiated comparison atoms of the formula.
    ///
    /// With `split_equalities`, every `a == b` is returned as the pair
    /// `a <= b` and `a >= b`.
    pub fn extract_atoms(&self, split_equalities: bool) -> Vec<Formula> {
        let mut out: Vec<Formula> = Vec::new();
        let mut push = |f: Formula| {
            if !f.is_true() && !f.is_false() && !out.contains(&f) {
                out.push(f);
            }
        };
        for atom in self.uninstantiate().atoms() {
            match atom.kind() {
                FormulaKind::Atom(Cmp::Eq, a, b) if split_equalities => {
                    push(Formula::atom(Cmp::Le, a.clone(), b.clone()));
                    push(Formula::atom(Cmp::Ge, a.clone(), b.clone()));
                }
                FormulaKind::Atom(..) => push(atom),
                _ => {}
            }
        }
        out
    }

    /// True if the formula is a conjunction of (possibly negated) atoms.
    pub fn is_purely_conjunctive(&self) -> bool {
        match self.kind() {
            FormulaKind::True | FormulaKind::False | FormulaKind::Prop(_) | FormulaKind::Atom(..) => true,
            FormulaKind::Not(g) => g.is_atom(),
            FormulaKind::And(gs) => gs.iter().all(|g| g.is_purely_conjunctive()),
            FormulaKind::Or(_) => false,
        }
    }

    /// Number of nodes in the formula tree.
    pub fn size(&self) -> usize {
        let mut n = 0;
        self.visit(&mut |_| n += 1);
        n
    }
}

impl BitAnd for Formula {
    type Output = Formula;

    fn bitand(self, rhs: Formula) -> Formula {
        Formula::and_all([self, rhs])
    }
}

impl BitOr for Formula {
    type Output = Formula;

    fn bitor(self, rhs: Formula) -> Formula {
        Formula::or_all([self, rhs])
    }
}

impl Not for Formula {
    type Output = Formula;

    fn not(self) -> Formula {
        Formula::not(&self)
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let join = |f: &mut Formatter<'_>, gs: &[Formula], sep: &str| -> std::fmt::Result {
            write!(f, "(")?;
            for (i, g) in gs.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", g)?;
            }
            write!(f, ")")
        };
        match self.kind() {
            FormulaKind::True => write!(f, "true"),
            FormulaKind::False => write!(f, "false"),
            FormulaKind::Prop(s) => write!(f, "{}", s),
            FormulaKind::Atom(cmp, a, b) => write!(f, "{} {} {}", a, cmp.symbol(), b),
            FormulaKind::Not(g) => write!(f, "!{}", g),
            FormulaKind::And(gs) => join(f, gs, "&&"),
            FormulaKind::Or(gs) => join(f, gs, "||"),
        }
    }
}

impl Debug for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_constant_folding() {
        assert!(Term::int(1).eq(1).is_true());
        assert!(Term::int(1).lt(0).is_false());
        assert_eq!(Term::int(2) + Term::int(3), Term::int(5));
        assert_eq!(Term::var("x") + 0, Term::var("x"));
    }

    #[test]
    fn test_and_or_simplification() {
        let p = Term::var("x").eq(0);
        assert_eq!(p.clone() & Formula::tt(), p);
        assert!((p.clone() & Formula::ff()).is_false());
        assert!((p.clone() | Formula::tt()).is_true());
        assert_eq!(!!p.clone(), p);
        assert_eq!(p.clone() & p.clone(), p);
    }

    #[test]
    fn test_instantiate_and_uninstantiate() {
        let f = Term::var("y").eq(Term::var("x") + 1);
        let ssa = SsaMap::default().with("x", 3);
        let g = f.instantiate(&ssa);
        assert_eq!(g.to_string(), "y@1 == x@3 + 1");
        assert_eq!(g.uninstantiate(), f);
        assert_eq!(
            g.variables(),
            BTreeSet::from([Symbol::indexed("x", 3), Symbol::indexed("y", 1)])
        );
    }

    #[test]
    fn test_propositions_are_not_instantiated() {
        let f = Formula::prop("b") & Term::var("x").gt(0);
        let g = f.instantiate(&SsaMap::default().with("x", 2));
        assert_eq!(g.to_string(), "(b && x@2 > 0)");
        assert_eq!(g.propositions(), BTreeSet::from([Symbol::new("b")]));
    }

    #[test]
    fn test_extract_atoms() {
        let x = Term::var("x");
        let f = (x.clone().eq(1) & x.clone().lt(5)) | x.clone().eq(1);
        let f = f.instantiate(&SsaMap::default().with("x", 2));

        assert_eq!(f.extract_atoms(false), vec![x.clone().eq(1), x.clone().lt(5)]);
        assert_eq!(
            f.extract_atoms(true),
            vec![x.clone().le(1), x.clone().ge(1), x.clone().lt(5)]
        );
    }

    #[test]
    fn test_purely_conjunctive() {
        let x = Term::var("x");
        assert!((x.clone().eq(1) & !x.clone().lt(0)).is_purely_conjunctive());
        assert!(!(x.clone().eq(1) | x.clone().lt(0)).is_purely_conjunctive());
        assert!(!Formula::not(&(x.clone().eq(1) & x.clone().lt(0))).is_purely_conjunctive());
    }
}
