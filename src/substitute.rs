//! Rewriting an expression under argument bindings.
//!
//! The interpreter uses this to express branch decisions taken deep inside
//! case arms and lambda bodies in terms of the top-level inputs.

use std::collections::HashMap;
use std::sync::Arc;

use crate::env::{Env, EnvId};
use crate::error::Result;
use crate::expr::{ArgId, BinaryOp, CaseArm, ExprArena, ExprId, ExprVisitor, UnaryOp};
use crate::regex::Regex;
use crate::types::{ConstMapShape, RecordShape, Type};
use crate::value::Value;

/// Replaces bound argument nodes with their expressions. Unbound arguments,
/// constants and arbitrary nodes are kept as they are.
pub struct Substituter<'a> {
    arena: &'a ExprArena,
    memo: HashMap<(ExprId, EnvId), ExprId>,
}

impl<'a> Substituter<'a> {
    pub fn new(arena: &'a ExprArena) -> Self {
        Self {
            arena,
            memo: HashMap::new(),
        }
    }

    pub fn substitute(&mut self, id: ExprId, env: &Env<ExprId>) -> Result<ExprId> {
        if env.is_empty() {
            return Ok(id);
        }
        let key = (id, env.id());
        if let Some(result) = self.memo.get(&key) {
            return Ok(*result);
        }
        let arena = self.arena;
        let result = arena.accept(id, self, env.clone())?;
        self.memo.insert(key, result);
        Ok(result)
    }

    fn all(&mut self, ids: &[ExprId], env: &Env<ExprId>) -> Result<Vec<ExprId>> {
        ids.iter().map(|x| self.substitute(*x, env)).collect()
    }

    /// A case arm whose body is the original body rewritten under `env`, with
    /// the original binders renamed to the new arm's binders.
    fn rebind_arm(arm: &Arc<CaseArm>, env: &Env<ExprId>) -> impl Fn(&ExprArena, &[ExprId]) -> Result<ExprId> + Send + Sync + 'static {
        let arm = arm.clone();
        let env = env.clone();
        move |arena: &ExprArena, params: &[ExprId]| {
            let body = arena.case_body(&arm)?;
            let inner = env.bind_all(arm.args().iter().copied().zip(params.iter().copied()));
            Substituter::new(arena).substitute(body, &inner)
        }
    }
}

impl ExprVisitor for Substituter<'_> {
    type Param = Env<ExprId>;
    type Output = Result<ExprId>;

    fn visit_constant(&mut self, id: ExprId, _: &Arc<Value>, _: Env<ExprId>) -> Result<ExprId> {
        Ok(id)
    }

    fn visit_arbitrary(&mut self, id: ExprId, _: &Type, _: Env<ExprId>) -> Result<ExprId> {
        Ok(id)
    }

    fn visit_argument(&mut self, id: ExprId, arg: ArgId, env: Env<ExprId>) -> Result<ExprId> {
        Ok(env.try_get(arg).copied().unwrap_or(id))
    }

    fn visit_unary(&mut self, id: ExprId, op: UnaryOp, operand: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let x = self.substitute(operand, &env)?;
        if x == operand {
            return Ok(id);
        }
        match op {
            UnaryOp::Not => self.arena.not(x),
            UnaryOp::BitNot => self.arena.bit_not(x),
        }
    }

    fn visit_binary(&mut self, id: ExprId, op: BinaryOp, left: ExprId, right: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let a = self.substitute(left, &env)?;
        let b = self.substitute(right, &env)?;
        if (a, b) == (left, right) {
            return Ok(id);
        }
        let arena = self.arena;
        match op {
            BinaryOp::And => arena.and(a, b),
            BinaryOp::Or => arena.or(a, b),
            BinaryOp::BitAnd => arena.bit_and(a, b),
            BinaryOp::BitOr => arena.bit_or(a, b),
            BinaryOp::BitXor => arena.bit_xor(a, b),
            BinaryOp::Add => arena.add(a, b),
            BinaryOp::Sub => arena.sub(a, b),
            BinaryOp::Mul => arena.mul(a, b),
            BinaryOp::Eq => arena.eq(a, b),
            BinaryOp::Lt => arena.lt(a, b),
            BinaryOp::Le => arena.le(a, b),
        }
    }

    fn visit_if(&mut self, id: ExprId, guard: ExprId, then: ExprId, otherwise: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let new = (
            self.substitute(guard, &env)?,
            self.substitute(then, &env)?,
            self.substitute(otherwise, &env)?,
        );
        if new == (guard, then, otherwise) {
            return Ok(id);
        }
        self.arena.if_then_else(new.0, new.1, new.2)
    }

    fn visit_cast(&mut self, id: ExprId, operand: ExprId, ty: &Type, env: Env<ExprId>) -> Result<ExprId> {
        let x = self.substitute(operand, &env)?;
        if x == operand {
            return Ok(id);
        }
        self.arena.cast(x, ty.clone())
    }

    fn visit_option_some(&mut self, id: ExprId, value: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let x = self.substitute(value, &env)?;
        if x == value {
            return Ok(id);
        }
        self.arena.some(x)
    }

    fn visit_option_none(&mut self, id: ExprId, _: &Type, _: Env<ExprId>) -> Result<ExprId> {
        Ok(id)
    }

    fn visit_option_case(&mut self, _: ExprId, option: ExprId, none: ExprId, some: &Arc<CaseArm>, env: Env<ExprId>) -> Result<ExprId> {
        let option = self.substitute(option, &env)?;
        let none = self.substitute(none, &env)?;
        let build = Self::rebind_arm(some, &env);
        self.arena.option_case(option, none, move |arena, value| build(arena, &[value]))
    }

    fn visit_tuple(&mut self, id: ExprId, items: &[ExprId], env: Env<ExprId>) -> Result<ExprId> {
        let new = self.all(items, &env)?;
        if new == items {
            return Ok(id);
        }
        self.arena.tuple(new)
    }

    fn visit_tuple_get(&mut self, id: ExprId, tuple: ExprId, index: usize, env: Env<ExprId>) -> Result<ExprId> {
        let new = self.substitute(tuple, &env)?;
        if new == tuple {
            return Ok(id);
        }
        self.arena.tuple_get(new, index)
    }

    fn visit_record(&mut self, id: ExprId, shape: &Arc<RecordShape>, fields: &[ExprId], env: Env<ExprId>) -> Result<ExprId> {
        let new = self.all(fields, &env)?;
        if new == fields {
            return Ok(id);
        }
        self.arena.record_from_values(shape, new)
    }

    fn visit_get_field(&mut self, id: ExprId, record: ExprId, index: usize, env: Env<ExprId>) -> Result<ExprId> {
        let new = self.substitute(record, &env)?;
        if new == record {
            return Ok(id);
        }
        self.arena.get_field_at(new, index)
    }

    fn visit_with_field(&mut self, id: ExprId, record: ExprId, index: usize, value: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let new = (self.substitute(record, &env)?, self.substitute(value, &env)?);
        if new == (record, value) {
            return Ok(id);
        }
        self.arena.with_field_at(new.0, index, new.1)
    }

    fn visit_seq_empty(&mut self, id: ExprId, _: &Type, _: Env<ExprId>) -> Result<ExprId> {
        Ok(id)
    }

    fn visit_seq_cons(&mut self, id: ExprId, head: ExprId, tail: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let new = (self.substitute(head, &env)?, self.substitute(tail, &env)?);
        if new == (head, tail) {
            return Ok(id);
        }
        self.arena.seq_cons(new.0, new.1)
    }

    fn visit_seq_case(&mut self, _: ExprId, seq: ExprId, empty: ExprId, cons: &Arc<CaseArm>, env: Env<ExprId>) -> Result<ExprId> {
        let seq = self.substitute(seq, &env)?;
        let empty = self.substitute(empty, &env)?;
        let build = Self::rebind_arm(cons, &env);
        self.arena.seq_case(seq, empty, move |arena, head, tail| build(arena, &[head, tail]))
    }

    fn visit_seq_matches(&mut self, id: ExprId, seq: ExprId, regex: &Arc<Regex>, env: Env<ExprId>) -> Result<ExprId> {
        let new = self.substitute(seq, &env)?;
        if new == seq {
            return Ok(id);
        }
        self.arena.seq_matches(new, regex.clone())
    }

    fn visit_map_empty(&mut self, id: ExprId, _: &Type, _: Env<ExprId>) -> Result<ExprId> {
        Ok(id)
    }

    fn visit_map_set(&mut self, id: ExprId, map: ExprId, key: ExprId, value: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let new = (
            self.substitute(map, &env)?,
            self.substitute(key, &env)?,
            self.substitute(value, &env)?,
        );
        if new == (map, key, value) {
            return Ok(id);
        }
        self.arena.map_set(new.0, new.1, new.2)
    }

    fn visit_map_delete(&mut self, id: ExprId, map: ExprId, key: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let new = (self.substitute(map, &env)?, self.substitute(key, &env)?);
        if new == (map, key) {
            return Ok(id);
        }
        self.arena.map_delete(new.0, new.1)
    }

    fn visit_map_get(&mut self, id: ExprId, map: ExprId, key: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let new = (self.substitute(map, &env)?, self.substitute(key, &env)?);
        if new == (map, key) {
            return Ok(id);
        }
        self.arena.map_get(new.0, new.1)
    }

    fn visit_const_map(&mut self, id: ExprId, shape: &Arc<ConstMapShape>, values: &[ExprId], env: Env<ExprId>) -> Result<ExprId> {
        let new = self.all(values, &env)?;
        if new == values {
            return Ok(id);
        }
        self.arena.const_map(&Type::ConstMap(shape.clone()), new)
    }

    fn visit_const_map_set(&mut self, id: ExprId, map: ExprId, key: ExprId, value: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let new = (
            self.substitute(map, &env)?,
            self.substitute(key, &env)?,
            self.substitute(value, &env)?,
        );
        if new == (map, key, value) {
            return Ok(id);
        }
        self.arena.const_map_set(new.0, new.1, new.2)
    }

    fn visit_const_map_get(&mut self, id: ExprId, map: ExprId, key: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let new = (self.substitute(map, &env)?, self.substitute(key, &env)?);
        if new == (map, key) {
            return Ok(id);
        }
        self.arena.const_map_get(new.0, new.1)
    }

    fn visit_apply(&mut self, _: ExprId, param: ArgId, body: ExprId, arg: ExprId, env: Env<ExprId>) -> Result<ExprId> {
        let arg = self.substitute(arg, &env)?;
        // Substitute the argument directly into the body.
        let inner = env.bind(param, arg);
        self.substitute(body, &inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::interpreter::interpret;

    #[test]
    fn test_argument_replaced() {
        let arena = ExprArena::new();
        let (a, x) = arena.argument(Type::u8());
        let one = arena.u8(1);
        let body = arena.add(x, one).unwrap();
        let y = arena.arbitrary(Type::u8());
        let out = Substituter::new(&arena)
            .substitute(body, &Env::new().bind(a, y))
            .unwrap();
        let assigned = Env::new();
        let mut values = std::collections::HashMap::new();
        values.insert(y, Value::fixed(41, 8, false).unwrap());
        let result = crate::interpreter::Interpreter::new(&arena)
            .with_arbitraries(values)
            .run(out, &crate::interpreter::Scope::from_values(assigned))
            .unwrap();
        assert_eq!(result, Value::fixed(42, 8, false).unwrap());
    }

    #[test]
    fn test_case_arm_rebound() {
        let arena = ExprArena::new();
        let (a, xs) = arena.argument(Type::seq(Type::u8()));
        let len = arena.seq_length(xs).unwrap();
        let one = arena.u8(1);
        let two = arena.u8(2);
        let list = arena.seq(Type::u8(), &[one, two, one]).unwrap();
        let closed = Substituter::new(&arena)
            .substitute(len, &Env::new().bind(a, list))
            .unwrap();
        assert_eq!(
            interpret(&arena, closed, &Env::new()).unwrap(),
            Value::fixed(3, 32, false).unwrap()
        );
    }

    #[test]
    fn test_unbound_kept() {
        let arena = ExprArena::new();
        let (_, x) = arena.argument(Type::Bool);
        let (b, _) = arena.argument(Type::Bool);
        let t = arena.tt();
        let nx = arena.not(x).unwrap();
        let out = Substituter::new(&arena)
            .substitute(nx, &Env::new().bind(b, t))
            .unwrap();
        assert_eq!(out, nx);
    }
}
