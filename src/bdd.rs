//! Reduced ordered binary decision diagrams with complement edges.
//!
//! All operations go through the [`Bdd`] manager, which hash-conses nodes so
//! that every boolean function over a fixed variable order has exactly one
//! representation. Variables are 1-indexed; smaller indices sit closer to the
//! root. A node's high edge is never complemented.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;

use log::{debug, trace};

use crate::reference::Ref;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
struct Node {
    variable: u32,
    low: Ref,
    high: Ref,
}

#[derive(Default)]
struct Storage {
    nodes: Vec<Node>,
    unique: HashMap<Node, u32>,
}

impl Storage {
    fn put(&mut self, node: Node) -> u32 {
        if let Some(&index) = self.unique.get(&node) {
            return index;
        }
        let index = self.nodes.len() as u32;
        self.nodes.push(node);
        self.unique.insert(node, index);
        index
    }
}

pub struct Bdd {
    storage: RefCell<Storage>,
    cache: RefCell<HashMap<(Ref, Ref, Ref), Ref>>,
    variables: RefCell<u32>,
    pub zero: Ref,
    pub one: Ref,
}

impl Bdd {
    pub fn new() -> Self {
        let mut storage = Storage::default();
        // Index 0 is never handed out, so every edge has a non-zero sign.
        storage.nodes.push(Node {
            variable: 0,
            low: Ref::positive(0),
            high: Ref::positive(0),
        });
        let one = storage.nodes.len() as u32;
        storage.nodes.push(Node {
            variable: 0,
            low: Ref::positive(one),
            high: Ref::positive(one),
        });
        let one = Ref::positive(one);

        Self {
            storage: RefCell::new(storage),
            cache: RefCell::new(HashMap::new()),
            variables: RefCell::new(0),
            zero: -one,
            one,
        }
    }
}

impl Default for Bdd {
    fn default() -> Self {
        Bdd::new()
    }
}

impl Debug for Bdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bdd")
            .field("nodes", &self.storage.borrow().nodes.len())
            .field("variables", &*self.variables.borrow())
            .field("cache", &self.cache.borrow().len())
            .finish()
    }
}

impl Bdd {
    fn node(&self, index: usize) -> Node {
        self.storage.borrow().nodes[index]
    }

    /// Decision variable of the node behind `f`; 0 for the terminal.
    pub fn variable(&self, f: Ref) -> u32 {
        self.node(f.index()).variable
    }

    pub fn low_node(&self, f: Ref) -> Ref {
        let low = self.node(f.index()).low;
        if f.is_negated() {
            -low
        } else {
            low
        }
    }

    pub fn high_node(&self, f: Ref) -> Ref {
        let high = self.node(f.index()).high;
        if f.is_negated() {
            -high
        } else {
            high
        }
    }

    pub fn is_zero(&self, f: Ref) -> bool {
        f == self.zero
    }

    pub fn is_one(&self, f: Ref) -> bool {
        f == self.one
    }

    pub fn is_terminal(&self, f: Ref) -> bool {
        self.is_zero(f) || self.is_one(f)
    }

    pub fn constant(&self, value: bool) -> Ref {
        if value {
            self.one
        } else {
            self.zero
        }
    }

    /// Number of live nodes, terminal included.
    pub fn size(&self) -> usize {
        self.storage.borrow().nodes.len() - 1
    }

    pub fn num_vars(&self) -> u32 {
        *self.variables.borrow()
    }

    pub fn mk_node(&self, v: u32, low: Ref, high: Ref) -> Ref {
        trace!("mk(v = {}, low = {}, high = {})", v, low, high);
        assert_ne!(v, 0, "Variable index should not be zero");

        if high.is_negated() {
            return -self.mk_node(v, -low, -high);
        }
        if low == high {
            return low;
        }

        let i = self.storage.borrow_mut().put(Node {
            variable: v,
            low,
            high,
        });
        Ref::positive(i)
    }

    pub fn mk_var(&self, v: u32) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");
        let mut count = self.variables.borrow_mut();
        *count = (*count).max(v);
        drop(count);
        self.mk_node(v, self.zero, self.one)
    }

    /// Allocate the next unused variable, placed below every existing one.
    pub fn fresh_var(&self) -> (u32, Ref) {
        let v = self.num_vars() + 1;
        (v, self.mk_var(v))
    }

    fn top_cofactors(&self, f: Ref, v: u32) -> (Ref, Ref) {
        if self.is_terminal(f) || v < self.variable(f) {
            return (f, f);
        }
        (self.low_node(f), self.high_node(f))
    }

    /// `ITE(f, g, h) = (f ∧ g) ∨ (¬f ∧ h)`.
    pub fn apply_ite(&self, f: Ref, g: Ref, h: Ref) -> Ref {
        trace!("apply_ite(f = {}, g = {}, h = {})", f, g, h);

        if self.is_one(f) {
            return g;
        }
        if self.is_zero(f) {
            return h;
        }
        if g == h {
            return g;
        }
        if self.is_one(g) && self.is_zero(h) {
            return f;
        }
        if self.is_zero(g) && self.is_one(h) {
            return -f;
        }

        // Standard triples: replace f-dependent branches by constants.
        let g = if g == f {
            self.one
        } else if g == -f {
            self.zero
        } else {
            g
        };
        let h = if h == f {
            self.zero
        } else if h == -f {
            self.one
        } else {
            h
        };
        if g == h {
            return g;
        }

        // Canonical form: f and g regular.
        let (f, g, h) = if f.is_negated() { (-f, h, g) } else { (f, g, h) };
        let (g, h, negate) = if g.is_negated() {
            (-g, -h, true)
        } else {
            (g, h, false)
        };

        let key = (f, g, h);
        if let Some(&res) = self.cache.borrow().get(&key) {
            return if negate { -res } else { res };
        }

        let mut m = self.variable(f);
        for x in [g, h] {
            if !self.is_terminal(x) {
                m = m.min(self.variable(x));
            }
        }

        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);
        let e = self.apply_ite(f0, g0, h0);
        let t = self.apply_ite(f1, g1, h1);
        let res = self.mk_node(m, e, t);
        self.cache.borrow_mut().insert(key, res);

        if negate {
            -res
        } else {
            res
        }
    }

    pub fn apply_not(&self, f: Ref) -> Ref {
        -f
    }

    pub fn apply_and(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, self.zero)
    }

    pub fn apply_or(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, self.one, v)
    }

    pub fn apply_xor(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, -v, v)
    }

    pub fn apply_eq(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, -v)
    }

    pub fn apply_imply(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, self.one)
    }

    pub fn apply_and_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        let mut res = self.one;
        for node in nodes {
            res = self.apply_and(res, node);
            if self.is_zero(res) {
                break;
            }
        }
        res
    }

    pub fn apply_or_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        let mut res = self.zero;
        for node in nodes {
            res = self.apply_or(res, node);
            if self.is_one(res) {
                break;
            }
        }
        res
    }

    /// Restrict variable `v` to the constant `b`.
    pub fn restrict(&self, f: Ref, v: u32, b: bool) -> Ref {
        let mut memo = HashMap::new();
        self.restrict_rec(f, v, b, &mut memo)
    }

    fn restrict_rec(&self, f: Ref, v: u32, b: bool, memo: &mut HashMap<Ref, Ref>) -> Ref {
        if self.is_terminal(f) || self.variable(f) > v {
            return f;
        }
        if let Some(&res) = memo.get(&f) {
            return res;
        }
        let res = if self.variable(f) == v {
            if b {
                self.high_node(f)
            } else {
                self.low_node(f)
            }
        } else {
            let low = self.restrict_rec(self.low_node(f), v, b, memo);
            let high = self.restrict_rec(self.high_node(f), v, b, memo);
            self.mk_node(self.variable(f), low, high)
        };
        memo.insert(f, res);
        res
    }

    /// One satisfying path, as the decisions taken along it. Variables not on
    /// the path are unconstrained.
    pub fn one_sat(&self, f: Ref) -> Option<Vec<(u32, bool)>> {
        if self.is_zero(f) {
            return None;
        }
        let mut path = Vec::new();
        let mut current = f;
        while !self.is_terminal(current) {
            let v = self.variable(current);
            let high = self.high_node(current);
            if self.is_zero(high) {
                path.push((v, false));
                current = self.low_node(current);
            } else {
                path.push((v, true));
                current = high;
            }
        }
        debug!("one_sat({}) -> path of length {}", f, path.len());
        Some(path)
    }

    /// Evaluate `f` under a total assignment of its variables.
    pub fn eval(&self, f: Ref, assignment: impl Fn(u32) -> bool) -> bool {
        let mut current = f;
        while !self.is_terminal(current) {
            current = if assignment(self.variable(current)) {
                self.high_node(current)
            } else {
                self.low_node(current)
            };
        }
        self.is_one(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_terminals() {
        let bdd = Bdd::default();
        assert!(bdd.is_one(bdd.one));
        assert!(bdd.is_zero(bdd.zero));
        assert_eq!(bdd.apply_not(bdd.one), bdd.zero);
        assert_eq!(bdd.constant(true), bdd.one);
    }

    #[test]
    fn test_canonical() {
        let bdd = Bdd::default();
        let x = bdd.mk_var(1);
        let y = bdd.mk_var(2);
        let f = bdd.apply_and(x, y);
        let g = -bdd.apply_or(-x, -y);
        assert_eq!(f, g);
        assert_eq!(bdd.apply_xor(x, x), bdd.zero);
        assert_eq!(bdd.apply_eq(x, x), bdd.one);
        assert_eq!(bdd.apply_or(x, -x), bdd.one);
    }

    #[test]
    fn test_ite() {
        let bdd = Bdd::default();
        let x = bdd.mk_var(1);
        let y = bdd.mk_var(2);
        let z = bdd.mk_var(3);
        let f = bdd.apply_ite(x, y, z);
        let g = bdd.apply_or(bdd.apply_and(x, y), bdd.apply_and(-x, z));
        assert_eq!(f, g);
    }

    #[test]
    fn test_one_sat() {
        let bdd = Bdd::default();
        let (a, x) = bdd.fresh_var();
        let (b, y) = bdd.fresh_var();
        let f = bdd.apply_and(x, -y);
        let path = bdd.one_sat(f).unwrap();
        let lookup = |v: u32| path.iter().find(|(w, _)| *w == v).map(|(_, b)| *b).unwrap_or(false);
        assert!(lookup(a));
        assert!(!lookup(b));
        assert!(bdd.eval(f, lookup));
        assert_eq!(bdd.one_sat(bdd.apply_and(f, y)), None);
    }

    #[test]
    fn test_restrict() {
        let bdd = Bdd::default();
        let x = bdd.mk_var(1);
        let y = bdd.mk_var(2);
        let f = bdd.apply_xor(x, y);
        assert_eq!(bdd.restrict(f, 1, true), -y);
        assert_eq!(bdd.restrict(f, 2, false), x);
    }
}
