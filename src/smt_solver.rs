//! [`Solver`] backed by the z3 SMT solver.
//!
//! One [`SmtSolver`] borrows one `z3::Context` for the duration of a query.
//! Characters are 32-bit bitvectors; maps are pairs of arrays (presence and
//! values) over scalar key and value sorts.

use log::{debug, info, warn};
use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use z3::ast::{forall_const, Array, Ast, Bool, Dynamic, Int, Real, BV};
use z3::{Context, FuncDecl, Model, Optimize, Params, SatResult, Sort};

use crate::error::{invalid, unsupported, Error, Result};
use crate::fixed::FixedInt;
use crate::solver::{Objective, SmtOptions, SolveOutcome, Solver};
use crate::symbolic::SymbolicValue;
use crate::types::Type;

pub const CHAR_WIDTH: u32 = 32;

pub struct SmtSolver<'ctx> {
    ctx: &'ctx Context,
    options: SmtOptions,
    counter: usize,
}

impl<'ctx> SmtSolver<'ctx> {
    pub fn new(ctx: &'ctx Context, options: SmtOptions) -> Self {
        Self {
            ctx,
            options,
            counter: 0,
        }
    }

    fn unique(&mut self, name: &str) -> String {
        self.counter += 1;
        format!("{}!{}", name, self.counter)
    }

    fn trace(&self, text: &str) {
        if let Some(trace) = &self.options.trace {
            trace(text);
        }
    }

    fn params(&self) -> Option<Params<'ctx>> {
        let timeout = self.options.timeout?;
        let mut params = Params::new(self.ctx);
        params.set_u32("timeout", timeout.as_millis().min(u32::MAX as u128) as u32);
        Some(params)
    }

    fn sort(&self, ty: &Type) -> Result<Sort<'ctx>> {
        Ok(match ty {
            Type::Bool => Sort::bool(self.ctx),
            Type::Fixed { width, .. } => Sort::bitvector(self.ctx, *width),
            Type::Integer => Sort::int(self.ctx),
            Type::Real => Sort::real(self.ctx),
            Type::Char => Sort::bitvector(self.ctx, CHAR_WIDTH),
            other => return unsupported(format!("map keys and values of type {}", other)),
        })
    }

    fn dynamic(&self, value: &SymbolicValue<Self>) -> Result<Dynamic<'ctx>> {
        Ok(match value {
            SymbolicValue::Bool(b) => Dynamic::from_ast(b),
            SymbolicValue::BitVec { value, .. } => Dynamic::from_ast(value),
            SymbolicValue::Int(x) => Dynamic::from_ast(x),
            SymbolicValue::Real(x) => Dynamic::from_ast(x),
            SymbolicValue::Char(x) => Dynamic::from_ast(x),
            other => return unsupported(format!("{:?} as a map key or value", other)),
        })
    }

    fn from_dynamic(&self, value: Dynamic<'ctx>, ty: &Type) -> Result<SymbolicValue<Self>> {
        let mismatch = || Error::Conversion(format!("array element is not a {}", ty));
        Ok(match ty {
            Type::Bool => SymbolicValue::Bool(value.as_bool().ok_or_else(mismatch)?),
            Type::Fixed { width, signed } => SymbolicValue::BitVec {
                value: value.as_bv().ok_or_else(mismatch)?,
                width: *width,
                signed: *signed,
            },
            Type::Integer => SymbolicValue::Int(value.as_int().ok_or_else(mismatch)?),
            Type::Real => SymbolicValue::Real(value.as_real().ok_or_else(mismatch)?),
            Type::Char => SymbolicValue::Char(value.as_bv().ok_or_else(mismatch)?),
            other => return unsupported(format!("map values of type {}", other)),
        })
    }

    fn numeral(&self, bits: &BigUint, width: u32) -> BV<'ctx> {
        let digits = bits.to_u64_digits();
        let chunks = width.div_ceil(64) as usize;
        let mut result: Option<BV<'ctx>> = None;
        for i in (0..chunks).rev() {
            let chunk = BV::from_u64(self.ctx, digits.get(i).copied().unwrap_or(0), 64);
            result = Some(match result {
                None => chunk,
                Some(high) => high.concat(&chunk),
            });
        }
        let full = result.unwrap_or_else(|| BV::from_u64(self.ctx, 0, 64));
        full.extract(width - 1, 0)
    }

    fn sign_flip(&self, x: &BV<'ctx>) -> BV<'ctx> {
        let width = x.get_size();
        let mut mask = BigUint::default();
        mask.set_bit((width - 1) as u64, true);
        x.bvxor(&self.numeral(&mask, width))
    }

    fn finish(&self, result: SatResult, model: Option<Model<'ctx>>) -> SolveOutcome<Model<'ctx>> {
        self.trace(&format!("; {:?}", result));
        match (result, model) {
            (SatResult::Sat, Some(model)) => SolveOutcome::Sat(model),
            (SatResult::Unsat, _) => SolveOutcome::Unsat,
            (result, _) => {
                warn!("solver returned {:?}", result);
                SolveOutcome::Unknown
            }
        }
    }

    fn optimize(&mut self, objective: &Objective<Self>, constraint: &Bool<'ctx>, maximize: bool) -> SolveOutcome<Model<'ctx>> {
        let opt = Optimize::new(self.ctx);
        if let Some(params) = self.params() {
            opt.set_params(&params);
        }
        opt.assert(constraint);
        let direction = if maximize { "maximize" } else { "minimize" };
        let target: Dynamic<'ctx> = match objective {
            Objective::BitVec { value, signed: true } => Dynamic::from_ast(&self.sign_flip(value)),
            Objective::BitVec { value, signed: false } => Dynamic::from_ast(value),
            Objective::Int(x) => Dynamic::from_ast(x),
            Objective::Real(x) => Dynamic::from_ast(x),
        };
        self.trace(&format!("(assert {})\n({} {})\n(check-sat)", constraint, direction, target));
        if maximize {
            opt.maximize(&target);
        } else {
            opt.minimize(&target);
        }
        let result = opt.check(&[]);
        debug!("{} returned {:?}", direction, result);
        self.finish(result, opt.get_model())
    }

    fn parse_int(text: &str) -> Result<BigInt> {
        let text = text.trim();
        let (negative, digits) = match text.strip_prefix("(-").and_then(|t| t.strip_suffix(')')) {
            Some(inner) => (true, inner.trim()),
            None => (false, text),
        };
        let magnitude: BigInt = digits
            .parse()
            .map_err(|_| Error::Conversion(format!("not an integer numeral: {}", text)))?;
        Ok(if negative { -magnitude } else { magnitude })
    }
}

impl<'ctx> Solver for SmtSolver<'ctx> {
    type Model = Model<'ctx>;
    type Bool = Bool<'ctx>;
    type BitVec = BV<'ctx>;
    type Int = Int<'ctx>;
    type Real = Real<'ctx>;
    type Char = BV<'ctx>;
    type Array = Array<'ctx>;

    fn name(&self) -> &'static str {
        "smt"
    }

    fn bool_var(&mut self, name: &str) -> Bool<'ctx> {
        let name = self.unique(name);
        Bool::new_const(self.ctx, name)
    }

    fn bitvec_var(&mut self, name: &str, width: u32) -> BV<'ctx> {
        let name = self.unique(name);
        BV::new_const(self.ctx, name, width)
    }

    fn int_var(&mut self, name: &str) -> Result<Int<'ctx>> {
        let name = self.unique(name);
        Ok(Int::new_const(self.ctx, name))
    }

    fn real_var(&mut self, name: &str) -> Result<Real<'ctx>> {
        let name = self.unique(name);
        Ok(Real::new_const(self.ctx, name))
    }

    fn char_var(&mut self, name: &str) -> BV<'ctx> {
        self.bitvec_var(name, CHAR_WIDTH)
    }

    fn array_var(&mut self, name: &str, key: &Type, value: &Type) -> Result<Array<'ctx>> {
        let (domain, range) = (self.sort(key)?, self.sort(value)?);
        let name = self.unique(name);
        Ok(Array::new_const(self.ctx, name, &domain, &range))
    }

    fn bool_const(&self, value: bool) -> Bool<'ctx> {
        Bool::from_bool(self.ctx, value)
    }

    fn bitvec_const(&self, value: &FixedInt) -> BV<'ctx> {
        self.numeral(value.bits(), value.width())
    }

    fn int_const(&self, value: &BigInt) -> Result<Int<'ctx>> {
        Int::from_str(self.ctx, &value.to_string())
            .ok_or_else(|| Error::Conversion(format!("integer literal {}", value)))
    }

    fn real_const(&self, value: &BigRational) -> Result<Real<'ctx>> {
        Real::from_real_str(self.ctx, &value.numer().to_string(), &value.denom().to_string())
            .ok_or_else(|| Error::Conversion(format!("real literal {}", value)))
    }

    fn char_const(&self, value: u32) -> BV<'ctx> {
        BV::from_u64(self.ctx, value as u64, CHAR_WIDTH)
    }

    fn array_const(&self, key: &Type, value: &SymbolicValue<Self>) -> Result<Array<'ctx>> {
        let domain = self.sort(key)?;
        Ok(Array::const_array(self.ctx, &domain, &self.dynamic(value)?))
    }

    fn not(&self, x: &Bool<'ctx>) -> Bool<'ctx> {
        x.not()
    }

    fn and(&self, xs: &[Bool<'ctx>]) -> Bool<'ctx> {
        let refs: Vec<&Bool<'ctx>> = xs.iter().collect();
        Bool::and(self.ctx, &refs)
    }

    fn or(&self, xs: &[Bool<'ctx>]) -> Bool<'ctx> {
        let refs: Vec<&Bool<'ctx>> = xs.iter().collect();
        Bool::or(self.ctx, &refs)
    }

    fn iff(&self, a: &Bool<'ctx>, b: &Bool<'ctx>) -> Bool<'ctx> {
        a.iff(b)
    }

    fn bool_ite(&self, guard: &Bool<'ctx>, a: &Bool<'ctx>, b: &Bool<'ctx>) -> Bool<'ctx> {
        guard.ite(a, b)
    }

    fn bv_add(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
        a.bvadd(b)
    }

    fn bv_sub(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
        a.bvsub(b)
    }

    fn bv_mul(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
        a.bvmul(b)
    }

    fn bv_and(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
        a.bvand(b)
    }

    fn bv_or(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
        a.bvor(b)
    }

    fn bv_xor(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
        a.bvxor(b)
    }

    fn bv_not(&self, a: &BV<'ctx>) -> BV<'ctx> {
        a.bvnot()
    }

    fn bv_eq(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> Bool<'ctx> {
        a._eq(b)
    }

    fn bv_lt(&self, a: &BV<'ctx>, b: &BV<'ctx>, signed: bool) -> Bool<'ctx> {
        if signed {
            a.bvslt(b)
        } else {
            a.bvult(b)
        }
    }

    fn bv_le(&self, a: &BV<'ctx>, b: &BV<'ctx>, signed: bool) -> Bool<'ctx> {
        if signed {
            a.bvsle(b)
        } else {
            a.bvule(b)
        }
    }

    fn bv_ite(&self, guard: &Bool<'ctx>, a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
        guard.ite(a, b)
    }

    fn bv_resize(&self, x: &BV<'ctx>, from: u32, signed: bool, width: u32) -> BV<'ctx> {
        match width.cmp(&from) {
            std::cmp::Ordering::Less => x.extract(width - 1, 0),
            std::cmp::Ordering::Equal => x.clone(),
            std::cmp::Ordering::Greater if signed => x.sign_ext(width - from),
            std::cmp::Ordering::Greater => x.zero_ext(width - from),
        }
    }

    fn bv_to_int(&self, x: &BV<'ctx>, signed: bool) -> Result<Int<'ctx>> {
        Ok(x.to_int(signed))
    }

    fn int_to_bv(&self, x: &Int<'ctx>, width: u32) -> BV<'ctx> {
        BV::from_int(x, width)
    }

    fn int_add(&self, a: &Int<'ctx>, b: &Int<'ctx>) -> Int<'ctx> {
        Int::add(self.ctx, &[a, b])
    }

    fn int_sub(&self, a: &Int<'ctx>, b: &Int<'ctx>) -> Int<'ctx> {
        Int::sub(self.ctx, &[a, b])
    }

    fn int_mul(&self, a: &Int<'ctx>, b: &Int<'ctx>) -> Int<'ctx> {
        Int::mul(self.ctx, &[a, b])
    }

    fn int_eq(&self, a: &Int<'ctx>, b: &Int<'ctx>) -> Bool<'ctx> {
        a._eq(b)
    }

    fn int_lt(&self, a: &Int<'ctx>, b: &Int<'ctx>) -> Bool<'ctx> {
        a.lt(b)
    }

    fn int_le(&self, a: &Int<'ctx>, b: &Int<'ctx>) -> Bool<'ctx> {
        a.le(b)
    }

    fn int_ite(&self, guard: &Bool<'ctx>, a: &Int<'ctx>, b: &Int<'ctx>) -> Int<'ctx> {
        guard.ite(a, b)
    }

    fn real_add(&self, a: &Real<'ctx>, b: &Real<'ctx>) -> Real<'ctx> {
        Real::add(self.ctx, &[a, b])
    }

    fn real_sub(&self, a: &Real<'ctx>, b: &Real<'ctx>) -> Real<'ctx> {
        Real::sub(self.ctx, &[a, b])
    }

    fn real_mul(&self, a: &Real<'ctx>, b: &Real<'ctx>) -> Real<'ctx> {
        Real::mul(self.ctx, &[a, b])
    }

    fn real_eq(&self, a: &Real<'ctx>, b: &Real<'ctx>) -> Bool<'ctx> {
        a._eq(b)
    }

    fn real_lt(&self, a: &Real<'ctx>, b: &Real<'ctx>) -> Bool<'ctx> {
        a.lt(b)
    }

    fn real_le(&self, a: &Real<'ctx>, b: &Real<'ctx>) -> Bool<'ctx> {
        a.le(b)
    }

    fn real_ite(&self, guard: &Bool<'ctx>, a: &Real<'ctx>, b: &Real<'ctx>) -> Real<'ctx> {
        guard.ite(a, b)
    }

    fn char_eq(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> Bool<'ctx> {
        a._eq(b)
    }

    fn char_lt(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> Bool<'ctx> {
        a.bvult(b)
    }

    fn char_le(&self, a: &BV<'ctx>, b: &BV<'ctx>) -> Bool<'ctx> {
        a.bvule(b)
    }

    fn char_ite(&self, guard: &Bool<'ctx>, a: &BV<'ctx>, b: &BV<'ctx>) -> BV<'ctx> {
        guard.ite(a, b)
    }

    fn array_select(&self, array: &Array<'ctx>, key: &SymbolicValue<Self>, value: &Type) -> Result<SymbolicValue<Self>> {
        let selected = array.select(&self.dynamic(key)?);
        self.from_dynamic(selected, value)
    }

    fn array_store(&self, array: &Array<'ctx>, key: &SymbolicValue<Self>, value: &SymbolicValue<Self>) -> Result<Array<'ctx>> {
        Ok(array.store(&self.dynamic(key)?, &self.dynamic(value)?))
    }

    fn array_eq(&self, a: &Array<'ctx>, b: &Array<'ctx>) -> Bool<'ctx> {
        a._eq(b)
    }

    fn array_ite(&self, guard: &Bool<'ctx>, a: &Array<'ctx>, b: &Array<'ctx>) -> Array<'ctx> {
        guard.ite(a, b)
    }

    fn map_default_axiom(
        &self,
        key: &Type,
        present: &Array<'ctx>,
        values: &Array<'ctx>,
        default: &SymbolicValue<Self>,
    ) -> Result<Bool<'ctx>> {
        let sort = self.sort(key)?;
        let k = FuncDecl::new(self.ctx, format!("k!{}", self.counter), &[], &sort).apply(&[]);
        let absent = present
            .select(&k)
            .as_bool()
            .ok_or_else(|| Error::Conversion("presence array is not boolean".into()))?
            .not();
        let body = absent.implies(&values.select(&k)._eq(&self.dynamic(default)?));
        let bound: &dyn Ast<'ctx> = &k;
        Ok(forall_const(self.ctx, &[bound], &[], &body))
    }

    fn solve(&mut self, assertion: &Bool<'ctx>) -> SolveOutcome<Model<'ctx>> {
        let solver = z3::Solver::new(self.ctx);
        if let Some(params) = self.params() {
            solver.set_params(&params);
        }
        solver.assert(assertion);
        self.trace(&format!("(assert {})\n(check-sat)", assertion));
        let result = solver.check();
        info!("z3 check returned {:?}", result);
        self.finish(result, solver.get_model())
    }

    fn maximize(&mut self, objective: &Objective<Self>, constraint: &Bool<'ctx>) -> SolveOutcome<Model<'ctx>> {
        self.optimize(objective, constraint, true)
    }

    fn minimize(&mut self, objective: &Objective<Self>, constraint: &Bool<'ctx>) -> SolveOutcome<Model<'ctx>> {
        self.optimize(objective, constraint, false)
    }

    fn eval_bool(&self, model: &Model<'ctx>, x: &Bool<'ctx>) -> bool {
        model.eval(x, true).and_then(|b| b.as_bool()).unwrap_or(false)
    }

    fn eval_bitvec(&self, model: &Model<'ctx>, x: &BV<'ctx>, width: u32, signed: bool) -> Result<FixedInt> {
        let unsigned = self.eval_int(model, &x.to_int(false))?;
        Ok(FixedInt::wrapping_from(&unsigned, width, signed))
    }

    fn eval_int(&self, model: &Model<'ctx>, x: &Int<'ctx>) -> Result<BigInt> {
        let value = model
            .eval(x, true)
            .ok_or_else(|| Error::Conversion(format!("no value for {}", x)))?;
        Self::parse_int(&value.to_string())
    }

    fn eval_real(&self, model: &Model<'ctx>, x: &Real<'ctx>) -> Result<BigRational> {
        let value = model
            .eval(x, true)
            .ok_or_else(|| Error::Conversion(format!("no value for {}", x)))?;
        match value.as_real() {
            Some((num, den)) if den != 0 => Ok(BigRational::new(BigInt::from(num), BigInt::from(den))),
            _ => invalid(format!("real value {} does not fit a 64-bit fraction", value)),
        }
    }

    fn eval_char(&self, model: &Model<'ctx>, x: &BV<'ctx>) -> Result<u32> {
        let value = self.eval_bitvec(model, x, CHAR_WIDTH, false)?;
        value
            .to_u64()
            .map(|v| v as u32)
            .ok_or_else(|| Error::Conversion(format!("character {}", value)))
    }
}
