//! The contract every decision procedure realizes for the symbolic encoder.
//!
//! A [`Solver`] fixes one representation type per value shape and exposes
//! constructors and combinators over them. Shapes a backend cannot express
//! are realized with [`Unrepresentable`], whose constructors return
//! [`Error::Unsupported`](crate::error::Error::Unsupported) and whose
//! combinators are statically unreachable.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use num_bigint::BigInt;
use num_rational::BigRational;

use crate::error::Result;
use crate::fixed::FixedInt;
use crate::symbolic::SymbolicValue;
use crate::types::Type;

/// A value shape the backend has no representation for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Unrepresentable {}

#[derive(Debug)]
pub enum SolveOutcome<M> {
    Sat(M),
    Unsat,
    /// The backend gave up, typically on a timeout.
    Unknown,
}

impl<M> SolveOutcome<M> {
    pub fn model(self) -> Option<M> {
        match self {
            SolveOutcome::Sat(m) => Some(m),
            SolveOutcome::Unsat | SolveOutcome::Unknown => None,
        }
    }
}

/// A numeric quantity to optimize, tagged by its representation.
pub enum Objective<S: Solver> {
    BitVec { value: S::BitVec, signed: bool },
    Int(S::Int),
    Real(S::Real),
}

pub type Trace = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct SmtOptions {
    /// Give up after this long and report no model.
    pub timeout: Option<Duration>,
    /// Receives the SMT-LIB text of each query and its outcome.
    pub trace: Option<Trace>,
}

impl Debug for SmtOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtOptions")
            .field("timeout", &self.timeout)
            .field("trace", &self.trace.is_some())
            .finish()
    }
}

impl SmtOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_trace(mut self, trace: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.trace = Some(Arc::new(trace));
        self
    }
}

#[derive(Debug, Clone)]
pub enum Backend {
    Smt(SmtOptions),
    DecisionDiagram,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Smt(SmtOptions::default())
    }
}

pub trait Solver: Sized {
    type Model;
    type Bool: Clone + Debug;
    type BitVec: Clone + Debug;
    type Int: Clone + Debug;
    type Real: Clone + Debug;
    type Char: Clone + Debug;
    type Array: Clone + Debug;

    fn name(&self) -> &'static str;

    fn bool_var(&mut self, name: &str) -> Self::Bool;
    fn bitvec_var(&mut self, name: &str, width: u32) -> Self::BitVec;
    fn int_var(&mut self, name: &str) -> Result<Self::Int>;
    fn real_var(&mut self, name: &str) -> Result<Self::Real>;
    /// A character variable; callers constrain it with [`Solver::char_le`].
    fn char_var(&mut self, name: &str) -> Self::Char;
    fn array_var(&mut self, name: &str, key: &Type, value: &Type) -> Result<Self::Array>;

    fn bool_const(&self, value: bool) -> Self::Bool;
    fn bitvec_const(&self, value: &FixedInt) -> Self::BitVec;
    fn int_const(&self, value: &BigInt) -> Result<Self::Int>;
    fn real_const(&self, value: &BigRational) -> Result<Self::Real>;
    fn char_const(&self, value: u32) -> Self::Char;
    /// The array mapping every key of type `key` to `value`.
    fn array_const(&self, key: &Type, value: &SymbolicValue<Self>) -> Result<Self::Array>;

    fn not(&self, x: &Self::Bool) -> Self::Bool;
    fn and(&self, xs: &[Self::Bool]) -> Self::Bool;
    fn or(&self, xs: &[Self::Bool]) -> Self::Bool;
    fn iff(&self, a: &Self::Bool, b: &Self::Bool) -> Self::Bool;
    fn bool_ite(&self, guard: &Self::Bool, a: &Self::Bool, b: &Self::Bool) -> Self::Bool;

    fn bv_add(&self, a: &Self::BitVec, b: &Self::BitVec) -> Self::BitVec;
    fn bv_sub(&self, a: &Self::BitVec, b: &Self::BitVec) -> Self::BitVec;
    fn bv_mul(&self, a: &Self::BitVec, b: &Self::BitVec) -> Self::BitVec;
    fn bv_and(&self, a: &Self::BitVec, b: &Self::BitVec) -> Self::BitVec;
    fn bv_or(&self, a: &Self::BitVec, b: &Self::BitVec) -> Self::BitVec;
    fn bv_xor(&self, a: &Self::BitVec, b: &Self::BitVec) -> Self::BitVec;
    fn bv_not(&self, a: &Self::BitVec) -> Self::BitVec;
    fn bv_eq(&self, a: &Self::BitVec, b: &Self::BitVec) -> Self::Bool;
    fn bv_lt(&self, a: &Self::BitVec, b: &Self::BitVec, signed: bool) -> Self::Bool;
    fn bv_le(&self, a: &Self::BitVec, b: &Self::BitVec, signed: bool) -> Self::Bool;
    fn bv_ite(&self, guard: &Self::Bool, a: &Self::BitVec, b: &Self::BitVec) -> Self::BitVec;
    /// Truncate or extend to `width`; extension replicates the sign bit when
    /// the source is signed.
    fn bv_resize(&self, x: &Self::BitVec, from: u32, signed: bool, width: u32) -> Self::BitVec;
    fn bv_to_int(&self, x: &Self::BitVec, signed: bool) -> Result<Self::Int>;
    fn int_to_bv(&self, x: &Self::Int, width: u32) -> Self::BitVec;

    fn int_add(&self, a: &Self::Int, b: &Self::Int) -> Self::Int;
    fn int_sub(&self, a: &Self::Int, b: &Self::Int) -> Self::Int;
    fn int_mul(&self, a: &Self::Int, b: &Self::Int) -> Self::Int;
    fn int_eq(&self, a: &Self::Int, b: &Self::Int) -> Self::Bool;
    fn int_lt(&self, a: &Self::Int, b: &Self::Int) -> Self::Bool;
    fn int_le(&self, a: &Self::Int, b: &Self::Int) -> Self::Bool;
    fn int_ite(&self, guard: &Self::Bool, a: &Self::Int, b: &Self::Int) -> Self::Int;

    fn real_add(&self, a: &Self::Real, b: &Self::Real) -> Self::Real;
    fn real_sub(&self, a: &Self::Real, b: &Self::Real) -> Self::Real;
    fn real_mul(&self, a: &Self::Real, b: &Self::Real) -> Self::Real;
    fn real_eq(&self, a: &Self::Real, b: &Self::Real) -> Self::Bool;
    fn real_lt(&self, a: &Self::Real, b: &Self::Real) -> Self::Bool;
    fn real_le(&self, a: &Self::Real, b: &Self::Real) -> Self::Bool;
    fn real_ite(&self, guard: &Self::Bool, a: &Self::Real, b: &Self::Real) -> Self::Real;

    fn char_eq(&self, a: &Self::Char, b: &Self::Char) -> Self::Bool;
    fn char_lt(&self, a: &Self::Char, b: &Self::Char) -> Self::Bool;
    fn char_le(&self, a: &Self::Char, b: &Self::Char) -> Self::Bool;
    fn char_ite(&self, guard: &Self::Bool, a: &Self::Char, b: &Self::Char) -> Self::Char;

    /// Read the scalar stored under `key`; `value` is the element type.
    fn array_select(&self, array: &Self::Array, key: &SymbolicValue<Self>, value: &Type) -> Result<SymbolicValue<Self>>;
    fn array_store(&self, array: &Self::Array, key: &SymbolicValue<Self>, value: &SymbolicValue<Self>) -> Result<Self::Array>;
    fn array_eq(&self, a: &Self::Array, b: &Self::Array) -> Self::Bool;
    fn array_ite(&self, guard: &Self::Bool, a: &Self::Array, b: &Self::Array) -> Self::Array;
    /// Every key absent from `present` maps to `default` in `values`.
    fn map_default_axiom(
        &self,
        key: &Type,
        present: &Self::Array,
        values: &Self::Array,
        default: &SymbolicValue<Self>,
    ) -> Result<Self::Bool>;

    fn solve(&mut self, assertion: &Self::Bool) -> SolveOutcome<Self::Model>;
    fn maximize(&mut self, objective: &Objective<Self>, constraint: &Self::Bool) -> SolveOutcome<Self::Model>;
    fn minimize(&mut self, objective: &Objective<Self>, constraint: &Self::Bool) -> SolveOutcome<Self::Model>;

    fn eval_bool(&self, model: &Self::Model, x: &Self::Bool) -> bool;
    fn eval_bitvec(&self, model: &Self::Model, x: &Self::BitVec, width: u32, signed: bool) -> Result<FixedInt>;
    fn eval_int(&self, model: &Self::Model, x: &Self::Int) -> Result<BigInt>;
    fn eval_real(&self, model: &Self::Model, x: &Self::Real) -> Result<BigRational>;
    fn eval_char(&self, model: &Self::Model, x: &Self::Char) -> Result<u32>;
}
