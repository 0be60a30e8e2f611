//! Bit-blasted [`Solver`] over binary decision diagrams.
//!
//! Booleans are BDD edges; bitvectors and characters are little-endian
//! vectors of edges. Satisfiability is decided the moment a formula is built
//! (a formula is satisfiable iff it is not the zero terminal), so `solve`
//! only has to pick a path. Unbounded shapes (integers, reals, arrays) have
//! no finite encoding here.

use std::collections::HashMap;

use log::{debug, info, trace};
use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use num_traits::Zero;

use crate::bdd::Bdd;
use crate::error::{unsupported, Result};
use crate::fixed::FixedInt;
use crate::reference::Ref;
use crate::solver::{Objective, SolveOutcome, Solver, Unrepresentable};
use crate::symbolic::SymbolicValue;
use crate::types::Type;

pub const CHAR_WIDTH: u32 = 32;

/// A truth assignment. Variables off the chosen path are `false`.
#[derive(Debug, Default)]
pub struct DdModel {
    assignment: HashMap<u32, bool>,
}

impl DdModel {
    fn from_path(path: Vec<(u32, bool)>) -> Self {
        Self {
            assignment: path.into_iter().collect(),
        }
    }

    pub fn value(&self, v: u32) -> bool {
        self.assignment.get(&v).copied().unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct DdSolver {
    bdd: Bdd,
    names: HashMap<u32, String>,
}

impl DdSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bdd(&self) -> &Bdd {
        &self.bdd
    }

    /// The name a variable was created under, with a bit index for vectors.
    pub fn name_of(&self, v: u32) -> Option<&str> {
        self.names.get(&v).map(String::as_str)
    }

    fn fresh(&mut self, name: String) -> Ref {
        let (v, r) = self.bdd.fresh_var();
        self.names.insert(v, name);
        r
    }

    fn full_add(&self, a: Ref, b: Ref, carry: Ref) -> (Ref, Ref) {
        let bdd = &self.bdd;
        let half = bdd.apply_xor(a, b);
        let sum = bdd.apply_xor(half, carry);
        let carry = bdd.apply_or(bdd.apply_and(a, b), bdd.apply_and(carry, half));
        (sum, carry)
    }

    fn add_with_carry(&self, a: &[Ref], b: &[Ref], carry: Ref) -> Vec<Ref> {
        let mut carry = carry;
        a.iter()
            .zip(b)
            .map(|(&x, &y)| {
                let (s, c) = self.full_add(x, y, carry);
                carry = c;
                s
            })
            .collect()
    }

    /// Ripple comparison from the least significant bit up; `or_equal` seeds
    /// the result for equal operands.
    fn compare(&self, a: &[Ref], b: &[Ref], signed: bool, or_equal: bool) -> Ref {
        let bdd = &self.bdd;
        let msb = a.len() - 1;
        let mut less = bdd.constant(or_equal);
        for i in 0..a.len() {
            let (x, y) = (a[i], b[i]);
            // At the sign bit a set bit means smaller.
            let strictly = if signed && i == msb {
                bdd.apply_and(x, -y)
            } else {
                bdd.apply_and(-x, y)
            };
            let same = bdd.apply_eq(x, y);
            less = bdd.apply_or(strictly, bdd.apply_and(same, less));
        }
        less
    }

    fn bits_of(&self, value: &FixedInt) -> Vec<Ref> {
        (0..value.width()).map(|i| self.bdd.constant(value.bit(i))).collect()
    }

    /// Greedily fix bits from the most significant one down, preferring the
    /// value that moves the objective in the requested direction.
    fn optimize(&mut self, objective: &Objective<Self>, constraint: &Ref, maximize: bool) -> SolveOutcome<DdModel> {
        let (bits, signed) = match objective {
            Objective::BitVec { value, signed } => (value, *signed),
            Objective::Int(x) | Objective::Real(x) => match *x {},
        };
        let mut current = *constraint;
        if self.bdd.is_zero(current) {
            return SolveOutcome::Unsat;
        }
        let msb = bits.len() - 1;
        for i in (0..bits.len()).rev() {
            let mut prefer_set = maximize;
            if signed && i == msb {
                prefer_set = !prefer_set;
            }
            let bit = if prefer_set { bits[i] } else { -bits[i] };
            let attempt = self.bdd.apply_and(current, bit);
            current = if self.bdd.is_zero(attempt) {
                self.bdd.apply_and(current, -bit)
            } else {
                attempt
            };
        }
        debug!("optimized objective over {} bits", bits.len());
        self.solve(&current)
    }
}

impl Solver for DdSolver {
    type Model = DdModel;
    type Bool = Ref;
    type BitVec = Vec<Ref>;
    type Int = Unrepresentable;
    type Real = Unrepresentable;
    type Char = Vec<Ref>;
    type Array = Unrepresentable;

    fn name(&self) -> &'static str {
        "decision-diagram"
    }

    fn bool_var(&mut self, name: &str) -> Ref {
        self.fresh(name.to_string())
    }

    fn bitvec_var(&mut self, name: &str, width: u32) -> Vec<Ref> {
        (0..width).map(|i| self.fresh(format!("{}[{}]", name, i))).collect()
    }

    fn int_var(&mut self, _: &str) -> Result<Unrepresentable> {
        unsupported("integers on the decision-diagram backend")
    }

    fn real_var(&mut self, _: &str) -> Result<Unrepresentable> {
        unsupported("reals on the decision-diagram backend")
    }

    fn char_var(&mut self, name: &str) -> Vec<Ref> {
        self.bitvec_var(name, CHAR_WIDTH)
    }

    fn array_var(&mut self, _: &str, _: &Type, _: &Type) -> Result<Unrepresentable> {
        unsupported("maps on the decision-diagram backend")
    }

    fn bool_const(&self, value: bool) -> Ref {
        self.bdd.constant(value)
    }

    fn bitvec_const(&self, value: &FixedInt) -> Vec<Ref> {
        self.bits_of(value)
    }

    fn int_const(&self, _: &BigInt) -> Result<Unrepresentable> {
        unsupported("integers on the decision-diagram backend")
    }

    fn real_const(&self, _: &BigRational) -> Result<Unrepresentable> {
        unsupported("reals on the decision-diagram backend")
    }

    fn char_const(&self, value: u32) -> Vec<Ref> {
        (0..CHAR_WIDTH).map(|i| self.bdd.constant(value >> i & 1 == 1)).collect()
    }

    fn array_const(&self, _: &Type, _: &SymbolicValue<Self>) -> Result<Unrepresentable> {
        unsupported("maps on the decision-diagram backend")
    }

    fn not(&self, x: &Ref) -> Ref {
        self.bdd.apply_not(*x)
    }

    fn and(&self, xs: &[Ref]) -> Ref {
        self.bdd.apply_and_many(xs.iter().copied())
    }

    fn or(&self, xs: &[Ref]) -> Ref {
        self.bdd.apply_or_many(xs.iter().copied())
    }

    fn iff(&self, a: &Ref, b: &Ref) -> Ref {
        self.bdd.apply_eq(*a, *b)
    }

    fn bool_ite(&self, guard: &Ref, a: &Ref, b: &Ref) -> Ref {
        self.bdd.apply_ite(*guard, *a, *b)
    }

    fn bv_add(&self, a: &Vec<Ref>, b: &Vec<Ref>) -> Vec<Ref> {
        self.add_with_carry(a, b, self.bdd.zero)
    }

    fn bv_sub(&self, a: &Vec<Ref>, b: &Vec<Ref>) -> Vec<Ref> {
        let negated: Vec<Ref> = b.iter().map(|&x| -x).collect();
        self.add_with_carry(a, &negated, self.bdd.one)
    }

    fn bv_mul(&self, a: &Vec<Ref>, b: &Vec<Ref>) -> Vec<Ref> {
        let width = a.len();
        let mut acc = vec![self.bdd.zero; width];
        for (i, &bit) in b.iter().enumerate() {
            let partial: Vec<Ref> = (0..width)
                .map(|j| {
                    if j < i {
                        self.bdd.zero
                    } else {
                        self.bdd.apply_and(a[j - i], bit)
                    }
                })
                .collect();
            acc = self.add_with_carry(&acc, &partial, self.bdd.zero);
        }
        acc
    }

    fn bv_and(&self, a: &Vec<Ref>, b: &Vec<Ref>) -> Vec<Ref> {
        a.iter().zip(b).map(|(&x, &y)| self.bdd.apply_and(x, y)).collect()
    }

    fn bv_or(&self, a: &Vec<Ref>, b: &Vec<Ref>) -> Vec<Ref> {
        a.iter().zip(b).map(|(&x, &y)| self.bdd.apply_or(x, y)).collect()
    }

    fn bv_xor(&self, a: &Vec<Ref>, b: &Vec<Ref>) -> Vec<Ref> {
        a.iter().zip(b).map(|(&x, &y)| self.bdd.apply_xor(x, y)).collect()
    }

    fn bv_not(&self, a: &Vec<Ref>) -> Vec<Ref> {
        a.iter().map(|&x| -x).collect()
    }

    fn bv_eq(&self, a: &Vec<Ref>, b: &Vec<Ref>) -> Ref {
        self.bdd
            .apply_and_many(a.iter().zip(b).map(|(&x, &y)| self.bdd.apply_eq(x, y)))
    }

    fn bv_lt(&self, a: &Vec<Ref>, b: &Vec<Ref>, signed: bool) -> Ref {
        self.compare(a, b, signed, false)
    }

    fn bv_le(&self, a: &Vec<Ref>, b: &Vec<Ref>, signed: bool) -> Ref {
        self.compare(a, b, signed, true)
    }

    fn bv_ite(&self, guard: &Ref, a: &Vec<Ref>, b: &Vec<Ref>) -> Vec<Ref> {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| self.bdd.apply_ite(*guard, x, y))
            .collect()
    }

    fn bv_resize(&self, x: &Vec<Ref>, from: u32, signed: bool, width: u32) -> Vec<Ref> {
        let fill = if signed { x[from as usize - 1] } else { self.bdd.zero };
        (0..width as usize)
            .map(|i| x.get(i).copied().unwrap_or(fill))
            .collect()
    }

    fn bv_to_int(&self, _: &Vec<Ref>, _: bool) -> Result<Unrepresentable> {
        unsupported("integers on the decision-diagram backend")
    }

    fn int_to_bv(&self, x: &Unrepresentable, _: u32) -> Vec<Ref> {
        match *x {}
    }

    fn int_add(&self, a: &Unrepresentable, _: &Unrepresentable) -> Unrepresentable {
        match *a {}
    }

    fn int_sub(&self, a: &Unrepresentable, _: &Unrepresentable) -> Unrepresentable {
        match *a {}
    }

    fn int_mul(&self, a: &Unrepresentable, _: &Unrepresentable) -> Unrepresentable {
        match *a {}
    }

    fn int_eq(&self, a: &Unrepresentable, _: &Unrepresentable) -> Ref {
        match *a {}
    }

    fn int_lt(&self, a: &Unrepresentable, _: &Unrepresentable) -> Ref {
        match *a {}
    }

    fn int_le(&self, a: &Unrepresentable, _: &Unrepresentable) -> Ref {
        match *a {}
    }

    fn int_ite(&self, _: &Ref, a: &Unrepresentable, _: &Unrepresentable) -> Unrepresentable {
        match *a {}
    }

    fn real_add(&self, a: &Unrepresentable, _: &Unrepresentable) -> Unrepresentable {
        match *a {}
    }

    fn real_sub(&self, a: &Unrepresentable, _: &Unrepresentable) -> Unrepresentable {
        match *a {}
    }

    fn real_mul(&self, a: &Unrepresentable, _: &Unrepresentable) -> Unrepresentable {
        match *a {}
    }

    fn real_eq(&self, a: &Unrepresentable, _: &Unrepresentable) -> Ref {
        match *a {}
    }

    fn real_lt(&self, a: &Unrepresentable, _: &Unrepresentable) -> Ref {
        match *a {}
    }

    fn real_le(&self, a: &Unrepresentable, _: &Unrepresentable) -> Ref {
        match *a {}
    }

    fn real_ite(&self, _: &Ref, a: &Unrepresentable, _: &Unrepresentable) -> Unrepresentable {
        match *a {}
    }

    fn char_eq(&self, a: &Vec<Ref>, b: &Vec<Ref>) -> Ref {
        self.bv_eq(a, b)
    }

    fn char_lt(&self, a: &Vec<Ref>, b: &Vec<Ref>) -> Ref {
        self.compare(a, b, false, false)
    }

    fn char_le(&self, a: &Vec<Ref>, b: &Vec<Ref>) -> Ref {
        self.compare(a, b, false, true)
    }

    fn char_ite(&self, guard: &Ref, a: &Vec<Ref>, b: &Vec<Ref>) -> Vec<Ref> {
        self.bv_ite(guard, a, b)
    }

    fn array_select(&self, array: &Unrepresentable, _: &SymbolicValue<Self>, _: &Type) -> Result<SymbolicValue<Self>> {
        match *array {}
    }

    fn array_store(&self, array: &Unrepresentable, _: &SymbolicValue<Self>, _: &SymbolicValue<Self>) -> Result<Unrepresentable> {
        match *array {}
    }

    fn array_eq(&self, a: &Unrepresentable, _: &Unrepresentable) -> Ref {
        match *a {}
    }

    fn array_ite(&self, _: &Ref, a: &Unrepresentable, _: &Unrepresentable) -> Unrepresentable {
        match *a {}
    }

    fn map_default_axiom(
        &self,
        _: &Type,
        present: &Unrepresentable,
        _: &Unrepresentable,
        _: &SymbolicValue<Self>,
    ) -> Result<Ref> {
        match *present {}
    }

    fn solve(&mut self, assertion: &Ref) -> SolveOutcome<DdModel> {
        info!("solving over {} decision-diagram nodes", self.bdd.size());
        match self.bdd.one_sat(*assertion) {
            Some(path) => {
                for &(v, value) in &path {
                    trace!("{} = {}", self.name_of(v).unwrap_or("?"), value);
                }
                SolveOutcome::Sat(DdModel::from_path(path))
            }
            None => SolveOutcome::Unsat,
        }
    }

    fn maximize(&mut self, objective: &Objective<Self>, constraint: &Ref) -> SolveOutcome<DdModel> {
        self.optimize(objective, constraint, true)
    }

    fn minimize(&mut self, objective: &Objective<Self>, constraint: &Ref) -> SolveOutcome<DdModel> {
        self.optimize(objective, constraint, false)
    }

    fn eval_bool(&self, model: &DdModel, x: &Ref) -> bool {
        self.bdd.eval(*x, |v| model.value(v))
    }

    fn eval_bitvec(&self, model: &DdModel, x: &Vec<Ref>, width: u32, signed: bool) -> Result<FixedInt> {
        let mut bits = BigUint::zero();
        for (i, bit) in x.iter().enumerate() {
            if self.eval_bool(model, bit) {
                bits.set_bit(i as u64, true);
            }
        }
        Ok(FixedInt::from_bits(bits, width, signed))
    }

    fn eval_int(&self, _: &DdModel, x: &Unrepresentable) -> Result<BigInt> {
        match *x {}
    }

    fn eval_real(&self, _: &DdModel, x: &Unrepresentable) -> Result<BigRational> {
        match *x {}
    }

    fn eval_char(&self, model: &DdModel, x: &Vec<Ref>) -> Result<u32> {
        Ok(x.iter()
            .enumerate()
            .filter(|(_, bit)| self.eval_bool(model, bit))
            .fold(0, |acc, (i, _)| acc | 1 << i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn fixed(v: i128, width: u32, signed: bool) -> FixedInt {
        FixedInt::from_i128(v, width, signed).unwrap()
    }

    #[test]
    fn test_arithmetic_against_fixed() {
        let solver = DdSolver::new();
        for (a, b) in [(200, 100), (3, 250), (0, 0), (255, 1), (17, 15)] {
            let (x, y) = (fixed(a, 8, false), fixed(b, 8, false));
            let (bx, by) = (solver.bitvec_const(&x), solver.bitvec_const(&y));
            assert_eq!(solver.bv_add(&bx, &by), solver.bitvec_const(&x.add(&y)));
            assert_eq!(solver.bv_sub(&bx, &by), solver.bitvec_const(&x.sub(&y)));
            assert_eq!(solver.bv_mul(&bx, &by), solver.bitvec_const(&x.mul(&y)));
            assert_eq!(solver.bv_lt(&bx, &by, false), solver.bool_const(a < b));
            assert_eq!(solver.bv_le(&bx, &by, false), solver.bool_const(a <= b));
        }
    }

    #[test]
    fn test_signed_compare() {
        let solver = DdSolver::new();
        let minus = solver.bitvec_const(&fixed(-3, 8, true));
        let plus = solver.bitvec_const(&fixed(2, 8, true));
        assert!(solver.bdd().is_one(solver.bv_lt(&minus, &plus, true)));
        assert!(solver.bdd().is_zero(solver.bv_lt(&minus, &plus, false)));
        let wide = solver.bv_resize(&minus, 8, true, 16);
        assert_eq!(wide, solver.bitvec_const(&fixed(-3, 16, true)));
    }

    #[test]
    fn test_solve_overflow() {
        let mut solver = DdSolver::new();
        let x = solver.bitvec_var("x", 32);
        let one = solver.bitvec_const(&fixed(1, 32, false));
        let zero = solver.bitvec_const(&fixed(0, 32, false));
        let sum = solver.bv_add(&x, &one);
        let goal = solver.bv_eq(&sum, &zero);
        let model = solver.solve(&goal).model().unwrap();
        let value = solver.eval_bitvec(&model, &x, 32, false).unwrap();
        assert_eq!(value.to_u64(), Some(u32::MAX as u64));
    }

    #[test]
    fn test_variable_names() {
        let mut solver = DdSolver::new();
        let b = solver.bool_var("flag");
        let x = solver.bitvec_var("x", 4);
        let goal = solver.and(&[b, x[2]]);
        let model = solver.solve(&goal).model().unwrap();
        assert!(solver.eval_bool(&model, &b));
        assert!(solver.eval_bool(&model, &x[2]));
        let named: Vec<&str> = (0..8).filter_map(|v| solver.name_of(v)).collect();
        assert!(named.contains(&"flag"));
        assert!(named.contains(&"x[2]"));
        assert_eq!(named.len(), 5);
    }

    #[test]
    fn test_unsat() {
        let mut solver = DdSolver::new();
        let b = solver.bool_var("b");
        let contradiction = solver.and(&[b, solver.not(&b)]);
        assert!(solver.solve(&contradiction).model().is_none());
    }

    #[test]
    fn test_optimize() {
        let mut solver = DdSolver::new();
        let x = solver.bitvec_var("x", 8);
        let limit = solver.bitvec_const(&fixed(100, 8, true));
        let below = solver.bv_lt(&x, &limit, true);
        let objective = Objective::BitVec {
            value: x.clone(),
            signed: true,
        };
        let model = solver.maximize(&objective, &below).model().unwrap();
        assert_eq!(solver.eval_bitvec(&model, &x, 8, true).unwrap().to_i64(), Some(99));
        let model = solver.minimize(&objective, &below).model().unwrap();
        assert_eq!(solver.eval_bitvec(&model, &x, 8, true).unwrap().to_i64(), Some(-128));
    }

    #[test]
    fn test_unbounded_shapes_rejected() {
        let mut solver = DdSolver::new();
        assert!(solver.int_var("n").is_err());
        assert!(solver.real_const(&BigRational::zero()).is_err());
        assert!(solver.array_var("m", &Type::u8(), &Type::Bool).is_err());
    }
}
