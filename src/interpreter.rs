//! Direct evaluation of expressions against concrete bindings.
//!
//! Conditionals evaluate only the branch taken. Case-splits deconstruct the
//! scrutinee and evaluate the matching arm in an extended environment; lambda
//! application binds the evaluated argument. Results may be memoized per
//! `(node, environment)`.
//!
//! In tracing mode the interpreter also records the path it took: one boolean
//! expression per decision (if-guards, sequence emptiness, option presence),
//! rewritten over the top-level inputs. Their conjunction is the path
//! constraint used for path-directed input generation.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, trace};

use crate::env::{Env, EnvId};
use crate::error::Result;
use crate::expr::{ArgId, BinaryOp, CaseArm, ExprArena, ExprId, ExprVisitor, UnaryOp};
use crate::fixed::FixedInt;
use crate::generate::default_value;
use crate::regex::Regex;
use crate::substitute::Substituter;
use crate::types::{ConstMapShape, RecordShape, Type};
use crate::value::{RecordValue, Value};

/// Evaluate `expr` with the given argument values.
pub fn interpret(arena: &ExprArena, expr: ExprId, env: &Env<Value>) -> Result<Value> {
    Interpreter::new(arena).run(expr, &Scope::from_values(env.clone()))
}

/// Concrete argument values plus, when tracing, the expression each value
/// stands for in terms of the top-level inputs.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    values: Env<Value>,
    exprs: Env<ExprId>,
}

impl Scope {
    pub fn from_values(values: Env<Value>) -> Self {
        Self {
            values,
            exprs: Env::new(),
        }
    }

    /// Bind top-level inputs. Each argument stands for itself in traces.
    pub fn inputs(params: &[(ArgId, ExprId)], args: &[Value]) -> Self {
        let mut values = Env::new();
        let mut exprs = Env::new();
        for ((arg, node), value) in params.iter().zip(args) {
            values = values.bind(*arg, value.clone());
            exprs = exprs.bind(*arg, *node);
        }
        Self { values, exprs }
    }

    pub fn values(&self) -> &Env<Value> {
        &self.values
    }

    fn id(&self) -> EnvId {
        self.values.id()
    }
}

pub struct Interpreter<'a> {
    arena: &'a ExprArena,
    memo: Option<HashMap<(ExprId, EnvId), Value>>,
    arbitraries: HashMap<ExprId, Value>,
    path: Option<Vec<ExprId>>,
    substituter: Substituter<'a>,
}

impl<'a> Interpreter<'a> {
    pub fn new(arena: &'a ExprArena) -> Self {
        Self {
            arena,
            memo: None,
            arbitraries: HashMap::new(),
            path: None,
            substituter: Substituter::new(arena),
        }
    }

    pub fn memoized(mut self, enabled: bool) -> Self {
        self.memo = enabled.then(HashMap::new);
        self
    }

    /// Record the path constraint while evaluating.
    pub fn tracing(mut self) -> Self {
        self.path = Some(Vec::new());
        self
    }

    /// Values for arbitrary nodes, typically taken from a solver model.
    /// Arbitrary nodes without a value evaluate to the default of their type.
    pub fn with_arbitraries(mut self, values: HashMap<ExprId, Value>) -> Self {
        self.arbitraries = values;
        self
    }

    /// Decisions recorded so far, in evaluation order.
    pub fn path(&self) -> &[ExprId] {
        self.path.as_deref().unwrap_or_default()
    }

    pub fn run(&mut self, expr: ExprId, scope: &Scope) -> Result<Value> {
        debug!("interpret {}", self.arena.describe(expr));
        self.eval(expr, scope)
    }

    fn eval(&mut self, id: ExprId, scope: &Scope) -> Result<Value> {
        if let Some(memo) = &self.memo {
            if let Some(v) = memo.get(&(id, scope.id())) {
                return Ok(v.clone());
            }
        }
        let arena = self.arena;
        let value = arena.accept(id, self, scope.clone())?;
        if let Some(memo) = &mut self.memo {
            memo.insert((id, scope.id()), value.clone());
        }
        Ok(value)
    }

    fn is_tracing(&self) -> bool {
        self.path.is_some()
    }

    /// `expr` rewritten over the top-level inputs.
    fn lift(&mut self, expr: ExprId, scope: &Scope) -> Result<ExprId> {
        self.substituter.substitute(expr, &scope.exprs)
    }

    fn record(&mut self, condition: ExprId, holds: bool) -> Result<()> {
        let condition = if holds {
            condition
        } else {
            self.arena.not(condition)?
        };
        trace!("path += {}", self.arena.describe(condition));
        if let Some(path) = &mut self.path {
            path.push(condition);
        }
        Ok(())
    }

    fn enter_arm(&mut self, arm: &CaseArm, scope: &Scope, values: Vec<Value>, exprs: Vec<ExprId>) -> Result<Value> {
        let body = self.arena.case_body(arm)?;
        let args = arm.args().iter().copied();
        let inner = Scope {
            values: scope.values.bind_all(args.clone().zip(values)),
            exprs: if self.is_tracing() {
                scope.exprs.bind_all(args.zip(exprs))
            } else {
                scope.exprs.clone()
            },
        };
        self.eval(body, &inner)
    }
}

fn fixed_op(op: BinaryOp, a: &FixedInt, b: &FixedInt) -> Value {
    match op {
        BinaryOp::BitAnd => Value::Fixed(a.and(b)),
        BinaryOp::BitOr => Value::Fixed(a.or(b)),
        BinaryOp::BitXor => Value::Fixed(a.xor(b)),
        BinaryOp::Add => Value::Fixed(a.add(b)),
        BinaryOp::Sub => Value::Fixed(a.sub(b)),
        BinaryOp::Mul => Value::Fixed(a.mul(b)),
        _ => ordered(op, a.compare(b)),
    }
}

/// Concrete semantics of a binary operator on evaluated operands.
pub(crate) fn eval_binary(op: BinaryOp, lhs: Value, rhs: Value) -> Value {
    match (op, lhs, rhs) {
        (BinaryOp::Eq, x, y) => Value::Bool(x == y),
        (BinaryOp::And, Value::Bool(x), Value::Bool(y)) => Value::Bool(x && y),
        (BinaryOp::Or, Value::Bool(x), Value::Bool(y)) => Value::Bool(x || y),
        (op, Value::Fixed(x), Value::Fixed(y)) => fixed_op(op, &x, &y),
        (op, Value::Integer(x), Value::Integer(y)) => match op {
            BinaryOp::Add => Value::Integer(x + y),
            BinaryOp::Sub => Value::Integer(x - y),
            BinaryOp::Mul => Value::Integer(x * y),
            _ => ordered(op, x.cmp(&y)),
        },
        (op, Value::Real(x), Value::Real(y)) => match op {
            BinaryOp::Add => Value::Real(x + y),
            BinaryOp::Sub => Value::Real(x - y),
            BinaryOp::Mul => Value::Real(x * y),
            _ => ordered(op, x.cmp(&y)),
        },
        (op, Value::Char(x), Value::Char(y)) => ordered(op, x.cmp(&y)),
        (op, x, y) => unreachable!("{:?} on {} and {}", op, x, y),
    }
}

pub(crate) fn eval_unary(op: UnaryOp, x: Value) -> Value {
    match (op, x) {
        (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
        (UnaryOp::BitNot, Value::Fixed(x)) => Value::Fixed(x.not()),
        (op, v) => unreachable!("{:?} on {}", op, v),
    }
}

pub(crate) fn eval_cast(x: Value, ty: &Type) -> Value {
    match (x, ty) {
        (Value::Fixed(x), Type::Fixed { width, signed }) => Value::Fixed(x.resize(*width, *signed)),
        (Value::Fixed(x), Type::Integer) => Value::Integer(x.to_bigint()),
        (Value::Integer(x), Type::Fixed { width, signed }) => {
            Value::Fixed(FixedInt::wrapping_from(&x, *width, *signed))
        }
        (v, ty) => unreachable!("cast of {} to {}", v, ty),
    }
}

fn ordered(op: BinaryOp, ord: Ordering) -> Value {
    match op {
        BinaryOp::Lt => Value::Bool(ord == Ordering::Less),
        BinaryOp::Le => Value::Bool(ord != Ordering::Greater),
        _ => unreachable!(),
    }
}

fn expect_bool(value: Value) -> bool {
    match value {
        Value::Bool(b) => b,
        other => unreachable!("expected a boolean, found {}", other),
    }
}

impl ExprVisitor for Interpreter<'_> {
    type Param = Scope;
    type Output = Result<Value>;

    fn visit_constant(&mut self, _: ExprId, value: &Arc<Value>, _: Scope) -> Result<Value> {
        Ok((**value).clone())
    }

    fn visit_arbitrary(&mut self, id: ExprId, ty: &Type, _: Scope) -> Result<Value> {
        Ok(self.arbitraries.get(&id).cloned().unwrap_or_else(|| default_value(ty)))
    }

    fn visit_argument(&mut self, _: ExprId, arg: ArgId, scope: Scope) -> Result<Value> {
        Ok(scope.values.get(arg).clone())
    }

    fn visit_unary(&mut self, _: ExprId, op: UnaryOp, x: ExprId, scope: Scope) -> Result<Value> {
        Ok(eval_unary(op, self.eval(x, &scope)?))
    }

    fn visit_binary(&mut self, _: ExprId, op: BinaryOp, a: ExprId, b: ExprId, scope: Scope) -> Result<Value> {
        match op {
            BinaryOp::And => {
                let lhs = expect_bool(self.eval(a, &scope)?);
                return Ok(Value::Bool(lhs && expect_bool(self.eval(b, &scope)?)));
            }
            BinaryOp::Or => {
                let lhs = expect_bool(self.eval(a, &scope)?);
                return Ok(Value::Bool(lhs || expect_bool(self.eval(b, &scope)?)));
            }
            _ => {}
        }
        let lhs = self.eval(a, &scope)?;
        let rhs = self.eval(b, &scope)?;
        Ok(eval_binary(op, lhs, rhs))
    }

    fn visit_if(&mut self, _: ExprId, guard: ExprId, then: ExprId, otherwise: ExprId, scope: Scope) -> Result<Value> {
        let taken = expect_bool(self.eval(guard, &scope)?);
        if self.is_tracing() {
            let condition = self.lift(guard, &scope)?;
            self.record(condition, taken)?;
        }
        self.eval(if taken { then } else { otherwise }, &scope)
    }

    fn visit_cast(&mut self, _: ExprId, x: ExprId, ty: &Type, scope: Scope) -> Result<Value> {
        Ok(eval_cast(self.eval(x, &scope)?, ty))
    }

    fn visit_option_some(&mut self, _: ExprId, x: ExprId, scope: Scope) -> Result<Value> {
        Ok(Value::some(self.eval(x, &scope)?))
    }

    fn visit_option_none(&mut self, _: ExprId, _: &Type, _: Scope) -> Result<Value> {
        Ok(Value::none())
    }

    fn visit_option_case(&mut self, _: ExprId, option: ExprId, none: ExprId, some: &Arc<CaseArm>, scope: Scope) -> Result<Value> {
        let Value::Option(inner) = self.eval(option, &scope)? else {
            unreachable!()
        };
        let mut exprs = Vec::new();
        if self.is_tracing() {
            let lifted = self.lift(option, &scope)?;
            let present = self.arena.is_some(lifted)?;
            self.record(present, inner.is_some())?;
            if inner.is_some() {
                let inner_ty = match self.arena.type_of(lifted) {
                    Type::Option(t) => *t,
                    _ => unreachable!(),
                };
                let default = self.arena.constant(&default_value(&inner_ty), &inner_ty)?;
                exprs.push(self.arena.option_value_or(lifted, default)?);
            }
        }
        match inner {
            None => self.eval(none, &scope),
            Some(value) => self.enter_arm(some, &scope, vec![*value], exprs),
        }
    }

    fn visit_tuple(&mut self, _: ExprId, items: &[ExprId], scope: Scope) -> Result<Value> {
        let values = items.iter().map(|x| self.eval(*x, &scope)).collect::<Result<_>>()?;
        Ok(Value::Tuple(values))
    }

    fn visit_tuple_get(&mut self, _: ExprId, tuple: ExprId, index: usize, scope: Scope) -> Result<Value> {
        let Value::Tuple(mut items) = self.eval(tuple, &scope)? else {
            unreachable!()
        };
        Ok(items.swap_remove(index))
    }

    fn visit_record(&mut self, _: ExprId, shape: &Arc<RecordShape>, fields: &[ExprId], scope: Scope) -> Result<Value> {
        let values = fields.iter().map(|x| self.eval(*x, &scope)).collect::<Result<_>>()?;
        Ok(Value::Record(RecordValue::new(shape.clone(), values)))
    }

    fn visit_get_field(&mut self, _: ExprId, record: ExprId, index: usize, scope: Scope) -> Result<Value> {
        let Value::Record(r) = self.eval(record, &scope)? else {
            unreachable!()
        };
        Ok(r.get(index).clone())
    }

    fn visit_with_field(&mut self, _: ExprId, record: ExprId, index: usize, value: ExprId, scope: Scope) -> Result<Value> {
        let Value::Record(r) = self.eval(record, &scope)? else {
            unreachable!()
        };
        let v = self.eval(value, &scope)?;
        Ok(Value::Record(r.with(index, v)))
    }

    fn visit_seq_empty(&mut self, _: ExprId, _: &Type, _: Scope) -> Result<Value> {
        Ok(Value::Seq(Vec::new()))
    }

    fn visit_seq_cons(&mut self, _: ExprId, head: ExprId, tail: ExprId, scope: Scope) -> Result<Value> {
        let head = self.eval(head, &scope)?;
        let Value::Seq(tail) = self.eval(tail, &scope)? else {
            unreachable!()
        };
        let mut items = Vec::with_capacity(tail.len() + 1);
        items.push(head);
        items.extend(tail);
        Ok(Value::Seq(items))
    }

    fn visit_seq_case(&mut self, _: ExprId, seq: ExprId, empty: ExprId, cons: &Arc<CaseArm>, scope: Scope) -> Result<Value> {
        let Value::Seq(mut items) = self.eval(seq, &scope)? else {
            unreachable!()
        };
        let mut exprs = Vec::new();
        if self.is_tracing() {
            let lifted = self.lift(seq, &scope)?;
            let ff = self.arena.ff();
            let nonempty = self.arena.seq_case(lifted, ff, |arena, _, _| Ok(arena.tt()))?;
            self.record(nonempty, !items.is_empty())?;
            if !items.is_empty() {
                let element = match self.arena.type_of(lifted) {
                    Type::Seq(t) => *t,
                    _ => unreachable!(),
                };
                let default = self.arena.constant(&default_value(&element), &element)?;
                let head = self.arena.seq_case(lifted, default, |_, h, _| Ok(h))?;
                let tail = self.arena.seq_case(lifted, lifted, |_, _, t| Ok(t))?;
                exprs = vec![head, tail];
            }
        }
        if items.is_empty() {
            return self.eval(empty, &scope);
        }
        let tail = items.split_off(1);
        let head = items.pop().unwrap_or_else(|| unreachable!());
        self.enter_arm(cons, &scope, vec![head, Value::Seq(tail)], exprs)
    }

    fn visit_seq_matches(&mut self, _: ExprId, seq: ExprId, regex: &Arc<Regex>, scope: Scope) -> Result<Value> {
        let Value::Seq(items) = self.eval(seq, &scope)? else {
            unreachable!()
        };
        Ok(Value::Bool(regex.matches(&items)))
    }

    fn visit_map_empty(&mut self, _: ExprId, _: &Type, _: Scope) -> Result<Value> {
        Ok(Value::Map(BTreeMap::new()))
    }

    fn visit_map_set(&mut self, _: ExprId, map: ExprId, key: ExprId, value: ExprId, scope: Scope) -> Result<Value> {
        let Value::Map(mut entries) = self.eval(map, &scope)? else {
            unreachable!()
        };
        let k = self.eval(key, &scope)?;
        let v = self.eval(value, &scope)?;
        entries.insert(k, v);
        Ok(Value::Map(entries))
    }

    fn visit_map_delete(&mut self, _: ExprId, map: ExprId, key: ExprId, scope: Scope) -> Result<Value> {
        let Value::Map(mut entries) = self.eval(map, &scope)? else {
            unreachable!()
        };
        entries.remove(&self.eval(key, &scope)?);
        Ok(Value::Map(entries))
    }

    fn visit_map_get(&mut self, _: ExprId, map: ExprId, key: ExprId, scope: Scope) -> Result<Value> {
        let Value::Map(mut entries) = self.eval(map, &scope)? else {
            unreachable!()
        };
        let k = self.eval(key, &scope)?;
        Ok(Value::Option(entries.remove(&k).map(Box::new)))
    }

    fn visit_const_map(&mut self, _: ExprId, shape: &Arc<ConstMapShape>, values: &[ExprId], scope: Scope) -> Result<Value> {
        let mut entries = BTreeMap::new();
        for (k, v) in shape.keys().iter().zip(values) {
            entries.insert(k.clone(), self.eval(*v, &scope)?);
        }
        Ok(Value::ConstMap(entries))
    }

    fn visit_const_map_set(&mut self, _: ExprId, map: ExprId, key: ExprId, value: ExprId, scope: Scope) -> Result<Value> {
        let Value::ConstMap(mut entries) = self.eval(map, &scope)? else {
            unreachable!()
        };
        let k = self.eval(key, &scope)?;
        let v = self.eval(value, &scope)?;
        if let Some(slot) = entries.get_mut(&k) {
            *slot = v;
        }
        Ok(Value::ConstMap(entries))
    }

    fn visit_const_map_get(&mut self, id: ExprId, map: ExprId, key: ExprId, scope: Scope) -> Result<Value> {
        let Value::ConstMap(mut entries) = self.eval(map, &scope)? else {
            unreachable!()
        };
        let k = self.eval(key, &scope)?;
        Ok(entries
            .remove(&k)
            .unwrap_or_else(|| default_value(&self.arena.type_of(id))))
    }

    fn visit_apply(&mut self, _: ExprId, param: ArgId, body: ExprId, arg: ExprId, scope: Scope) -> Result<Value> {
        let value = self.eval(arg, &scope)?;
        let inner = Scope {
            values: scope.values.bind(param, value),
            exprs: if self.is_tracing() {
                let lifted = self.lift(arg, &scope)?;
                scope.exprs.bind(param, lifted)
            } else {
                scope.exprs.clone()
            },
        };
        self.eval(body, &inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn u8v(v: i128) -> Value {
        Value::fixed(v, 8, false).unwrap()
    }

    #[test]
    fn test_conditional() {
        let arena = ExprArena::new();
        let (a, b) = (arena.u8(1), arena.u8(2));
        let c = arena.arbitrary(Type::Bool);
        let e = arena.if_then_else(c, a, b).unwrap();
        let mut values = HashMap::new();
        values.insert(c, Value::Bool(true));
        let mut interp = Interpreter::new(&arena).with_arbitraries(values);
        assert_eq!(interp.run(e, &Scope::default()).unwrap(), u8v(1));
        assert_eq!(interpret(&arena, e, &Env::new()).unwrap(), u8v(2));
    }

    #[test]
    fn test_wraparound() {
        let arena = ExprArena::new();
        let x = arena.u8(255);
        let one = arena.u8(1);
        let sum = arena.add(x, one).unwrap();
        let zero = arena.u8(0);
        let e = arena.eq(sum, zero).unwrap();
        assert_eq!(interpret(&arena, e, &Env::new()).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_recursive_sum() {
        fn sum(arena: &ExprArena, xs: ExprId) -> Result<ExprId> {
            let zero = arena.integer(0);
            arena.seq_case(xs, zero, |arena, h, t| {
                let rest = sum(arena, t)?;
                arena.add(h, rest)
            })
        }
        let arena = ExprArena::new();
        let (a, xs) = arena.argument(Type::seq(Type::Integer));
        let e = sum(&arena, xs).unwrap();
        let input = Value::Seq((1..=10).map(|i| Value::Integer(i.into())).collect());
        let env = Env::new().bind(a, input);
        assert_eq!(interpret(&arena, e, &env).unwrap(), Value::Integer(55.into()));
    }

    #[test]
    fn test_lambda() {
        let arena = ExprArena::new();
        let five = arena.integer(5);
        let e = arena
            .apply(five, |arena, x| arena.mul(x, x))
            .unwrap();
        assert_eq!(interpret(&arena, e, &Env::new()).unwrap(), Value::Integer(25.into()));
    }

    #[test]
    fn test_records_and_maps() {
        let arena = ExprArena::new();
        let ty = Type::record("R", vec![("a".into(), Type::u8()), ("b".into(), Type::Bool)]).unwrap();
        let one = arena.u8(1);
        let t = arena.tt();
        let r = arena.record(&ty, vec![("a", one), ("b", t)]).unwrap();
        let two = arena.u8(2);
        let r2 = arena.with_field(r, "a", two).unwrap();
        let a = arena.get_field(r2, "a").unwrap();
        assert_eq!(interpret(&arena, a, &Env::new()).unwrap(), u8v(2));

        let m = arena.map_empty(Type::u8(), Type::Bool);
        let m = arena.map_set(m, one, t).unwrap();
        let hit = arena.map_get(m, one).unwrap();
        let miss = arena.map_get(m, two).unwrap();
        assert_eq!(interpret(&arena, hit, &Env::new()).unwrap(), Value::some(Value::Bool(true)));
        assert_eq!(interpret(&arena, miss, &Env::new()).unwrap(), Value::none());
        let deleted = arena.map_delete(m, one).unwrap();
        let gone = arena.map_get(deleted, one).unwrap();
        assert_eq!(interpret(&arena, gone, &Env::new()).unwrap(), Value::none());
    }

    #[test]
    fn test_const_map() {
        let arena = ExprArena::new();
        let keys = vec![u8v(1), u8v(2)];
        let ty = Type::const_map(Type::u8(), keys, Type::Integer).unwrap();
        let (z, o) = (arena.integer(0), arena.integer(10));
        let m = arena.const_map(&ty, vec![z, z]).unwrap();
        let two = arena.u8(2);
        let m = arena.const_map_set(m, two, o).unwrap();
        let get = arena.const_map_get(m, two).unwrap();
        assert_eq!(interpret(&arena, get, &Env::new()).unwrap(), Value::Integer(10.into()));
        // An undeclared key reached through an argument reads the default.
        let (k, key) = arena.argument(Type::u8());
        let get = arena.const_map_get(m, key).unwrap();
        let env = Env::new().bind(k, u8v(7));
        assert_eq!(interpret(&arena, get, &env).unwrap(), Value::Integer(0.into()));
    }

    #[test]
    fn test_memoization_agrees() {
        let arena = ExprArena::new();
        let (a, x) = arena.argument(Type::u8());
        let mut e = x;
        for _ in 0..20 {
            e = arena.add(e, e).unwrap();
        }
        let scope = Scope::inputs(&[(a, x)], &[u8v(3)]);
        let plain = Interpreter::new(&arena).run(e, &scope).unwrap();
        let memo = Interpreter::new(&arena).memoized(true).run(e, &scope).unwrap();
        assert_eq!(plain, memo);
        assert_eq!(plain, u8v(0));
    }

    #[test]
    fn test_path_constraint_holds() {
        let arena = ExprArena::new();
        let (a, xs) = arena.argument(Type::seq(Type::u8()));
        let limit = arena.u8(10);
        let count = arena.seq_case(xs, limit, |arena, h, _| {
            let small = arena.lt(h, arena.u8(5))?;
            let (one, two) = (arena.u8(1), arena.u8(2));
            arena.if_then_else(small, one, two)
        });
        let count = count.unwrap();
        let scope = Scope::inputs(&[(a, xs)], &[Value::Seq(vec![u8v(3), u8v(9)])]);
        let mut interp = Interpreter::new(&arena).tracing();
        assert_eq!(interp.run(count, &scope).unwrap(), u8v(1));
        let path = interp.path().to_vec();
        assert_eq!(path.len(), 2);
        let constraint = arena.and_all(path).unwrap();
        // The same input satisfies its own path.
        let check = |input: Vec<Value>| {
            let env = Env::new().bind(a, Value::Seq(input));
            interpret(&arena, constraint, &env).unwrap()
        };
        assert_eq!(check(vec![u8v(4)]), Value::Bool(true));
        assert_eq!(check(vec![u8v(3), u8v(9)]), Value::Bool(true));
        assert_eq!(check(vec![u8v(7)]), Value::Bool(false));
        assert_eq!(check(vec![]), Value::Bool(false));
    }

    #[test]
    fn test_pattern() {
        let arena = ExprArena::new();
        let s = arena.string("abab").unwrap();
        let r = Regex::star(Regex::string("ab"));
        let e = arena.seq_matches(s, r).unwrap();
        assert_eq!(interpret(&arena, e, &Env::new()).unwrap(), Value::Bool(true));
    }
}
