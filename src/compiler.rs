//! Ahead-of-time lowering of expressions into straight-line blocks.
//!
//! One bottom-up pass turns the DAG into single-assignment instructions, each
//! writing a fresh slot. Every `(node, environment)` pair is compiled once per
//! scope and later references reuse its slot. Conditionals and case-splits
//! become runtime branches over nested blocks, and each nested block starts
//! its own cache scope on top of the enclosing ones.
//!
//! The IR has no loops: recursion over sequences is a case-split whose arm
//! builds another case-split. The compiler unrolls these up to
//! `max_unroll_depth` nested levels; a case node deeper than that compiles
//! into a call to the interpreter with the live bindings captured.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, trace};

use crate::env::{Env, EnvId};
use crate::error::{invalid, Error, Result};
use crate::expr::{ArgId, BinaryOp, CaseArm, ExprArena, ExprId, ExprVisitor, UnaryOp};
use crate::generate::default_value;
use crate::interpreter::{eval_binary, eval_cast, eval_unary, interpret};
use crate::regex::Regex;
use crate::types::{ConstMapShape, RecordShape, Type};
use crate::value::{RecordValue, Value};

pub type Slot = usize;

#[derive(Debug)]
pub struct Block {
    instrs: Vec<Instr>,
    result: Slot,
}

#[derive(Debug)]
pub enum Instr {
    Const {
        dst: Slot,
        value: Value,
    },
    Unary {
        dst: Slot,
        op: UnaryOp,
        x: Slot,
    },
    Binary {
        dst: Slot,
        op: BinaryOp,
        a: Slot,
        b: Slot,
    },
    Cast {
        dst: Slot,
        x: Slot,
        ty: Type,
    },
    Some {
        dst: Slot,
        x: Slot,
    },
    Tuple {
        dst: Slot,
        items: Vec<Slot>,
    },
    TupleGet {
        dst: Slot,
        tuple: Slot,
        index: usize,
    },
    Record {
        dst: Slot,
        shape: Arc<RecordShape>,
        fields: Vec<Slot>,
    },
    GetField {
        dst: Slot,
        record: Slot,
        index: usize,
    },
    WithField {
        dst: Slot,
        record: Slot,
        index: usize,
        value: Slot,
    },
    SeqCons {
        dst: Slot,
        head: Slot,
        tail: Slot,
    },
    Matches {
        dst: Slot,
        seq: Slot,
        regex: Arc<Regex>,
    },
    MapSet {
        dst: Slot,
        map: Slot,
        key: Slot,
        value: Slot,
    },
    MapDelete {
        dst: Slot,
        map: Slot,
        key: Slot,
    },
    MapGet {
        dst: Slot,
        map: Slot,
        key: Slot,
    },
    ConstMap {
        dst: Slot,
        shape: Arc<ConstMapShape>,
        values: Vec<Slot>,
    },
    ConstMapSet {
        dst: Slot,
        map: Slot,
        key: Slot,
        value: Slot,
    },
    ConstMapGet {
        dst: Slot,
        map: Slot,
        key: Slot,
        default: Value,
    },
    Branch {
        dst: Slot,
        guard: Slot,
        then: Block,
        otherwise: Block,
    },
    SplitSeq {
        dst: Slot,
        seq: Slot,
        head: Slot,
        tail: Slot,
        empty: Block,
        cons: Block,
    },
    SplitOption {
        dst: Slot,
        option: Slot,
        value: Slot,
        none: Block,
        some: Block,
    },
    /// Evaluate `expr` with the interpreter, binding each argument to a slot.
    Interpret {
        dst: Slot,
        expr: ExprId,
        bindings: Vec<(ArgId, Slot)>,
    },
}

/// A compiled expression, callable with concrete arguments.
#[derive(Debug)]
pub struct CompiledFunction {
    arena: Arc<ExprArena>,
    params: Vec<Type>,
    body: Block,
    slots: usize,
}

struct Compiler<'a> {
    arena: &'a ExprArena,
    max_unroll_depth: usize,
    depth: usize,
    blocks: Vec<Vec<Instr>>,
    scopes: Vec<HashMap<(ExprId, EnvId), Slot>>,
    slots: usize,
    fallbacks: usize,
}

/// Compile `body` as a function of `params`.
pub fn compile(
    arena: &Arc<ExprArena>,
    params: &[(ArgId, ExprId)],
    body: ExprId,
    max_unroll_depth: usize,
) -> Result<CompiledFunction> {
    let mut compiler = Compiler {
        arena,
        max_unroll_depth,
        depth: 0,
        blocks: Vec::new(),
        scopes: Vec::new(),
        slots: params.len(),
        fallbacks: 0,
    };
    let mut env = Env::new();
    let mut types = Vec::with_capacity(params.len());
    for (slot, (arg, node)) in params.iter().enumerate() {
        env = env.bind(*arg, slot);
        types.push(arena.check(*node)?);
    }
    arena.check(body)?;
    let block = compiler.block(body, &env)?;
    debug!(
        "compiled {} into {} slots with {} interpreter fallbacks",
        arena.describe(body),
        compiler.slots,
        compiler.fallbacks
    );
    Ok(CompiledFunction {
        arena: arena.clone(),
        params: types,
        body: block,
        slots: compiler.slots,
    })
}

impl Compiler<'_> {
    fn fresh(&mut self) -> Slot {
        let slot = self.slots;
        self.slots += 1;
        slot
    }

    fn emit(&mut self, instr: Instr) {
        trace!("emit {:?}", instr);
        self.blocks
            .last_mut()
            .unwrap_or_else(|| unreachable!("no open block"))
            .push(instr);
    }

    fn lookup(&self, key: &(ExprId, EnvId)) -> Option<Slot> {
        self.scopes.iter().rev().find_map(|scope| scope.get(key).copied())
    }

    fn compile(&mut self, id: ExprId, env: &Env<Slot>) -> Result<Slot> {
        let key = (id, env.id());
        if let Some(slot) = self.lookup(&key) {
            return Ok(slot);
        }
        let arena = self.arena;
        let slot = arena.accept(id, self, env.clone())?;
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(key, slot);
        }
        Ok(slot)
    }

    /// Compile `id` into a nested block with its own cache scope.
    fn block(&mut self, id: ExprId, env: &Env<Slot>) -> Result<Block> {
        self.blocks.push(Vec::new());
        self.scopes.push(HashMap::new());
        let result = self.compile(id, env);
        self.scopes.pop();
        let instrs = self.blocks.pop().unwrap_or_default();
        Ok(Block {
            instrs,
            result: result?,
        })
    }

    fn arm_block(&mut self, arm: &CaseArm, env: &Env<Slot>, slots: &[Slot]) -> Result<Block> {
        let body = self.arena.case_body(arm)?;
        let inner = env.bind_all(arm.args().iter().copied().zip(slots.iter().copied()));
        self.depth += 1;
        let block = self.block(body, &inner);
        self.depth -= 1;
        block
    }

    fn fallback(&mut self, id: ExprId, env: &Env<Slot>) -> Slot {
        self.fallbacks += 1;
        let mut bindings: Vec<(ArgId, Slot)> = Vec::new();
        for (arg, slot) in env.iter() {
            if !bindings.iter().any(|(a, _)| *a == arg) {
                bindings.push((arg, *slot));
            }
        }
        let dst = self.fresh();
        self.emit(Instr::Interpret {
            dst,
            expr: id,
            bindings,
        });
        dst
    }

    fn all(&mut self, ids: &[ExprId], env: &Env<Slot>) -> Result<Vec<Slot>> {
        ids.iter().map(|x| self.compile(*x, env)).collect()
    }

    fn constant(&mut self, value: Value) -> Slot {
        let dst = self.fresh();
        self.emit(Instr::Const { dst, value });
        dst
    }
}

impl ExprVisitor for Compiler<'_> {
    type Param = Env<Slot>;
    type Output = Result<Slot>;

    fn visit_constant(&mut self, _: ExprId, value: &Arc<Value>, _: Env<Slot>) -> Result<Slot> {
        Ok(self.constant((**value).clone()))
    }

    fn visit_arbitrary(&mut self, _: ExprId, ty: &Type, _: Env<Slot>) -> Result<Slot> {
        Ok(self.constant(default_value(ty)))
    }

    fn visit_argument(&mut self, _: ExprId, arg: ArgId, env: Env<Slot>) -> Result<Slot> {
        Ok(*env.get(arg))
    }

    fn visit_unary(&mut self, _: ExprId, op: UnaryOp, x: ExprId, env: Env<Slot>) -> Result<Slot> {
        let x = self.compile(x, &env)?;
        let dst = self.fresh();
        self.emit(Instr::Unary { dst, op, x });
        Ok(dst)
    }

    fn visit_binary(&mut self, _: ExprId, op: BinaryOp, a: ExprId, b: ExprId, env: Env<Slot>) -> Result<Slot> {
        let a = self.compile(a, &env)?;
        let b = self.compile(b, &env)?;
        let dst = self.fresh();
        self.emit(Instr::Binary { dst, op, a, b });
        Ok(dst)
    }

    fn visit_if(&mut self, _: ExprId, guard: ExprId, then: ExprId, otherwise: ExprId, env: Env<Slot>) -> Result<Slot> {
        let guard = self.compile(guard, &env)?;
        let then = self.block(then, &env)?;
        let otherwise = self.block(otherwise, &env)?;
        let dst = self.fresh();
        self.emit(Instr::Branch {
            dst,
            guard,
            then,
            otherwise,
        });
        Ok(dst)
    }

    fn visit_cast(&mut self, _: ExprId, x: ExprId, ty: &Type, env: Env<Slot>) -> Result<Slot> {
        let x = self.compile(x, &env)?;
        let dst = self.fresh();
        self.emit(Instr::Cast { dst, x, ty: ty.clone() });
        Ok(dst)
    }

    fn visit_option_some(&mut self, _: ExprId, x: ExprId, env: Env<Slot>) -> Result<Slot> {
        let x = self.compile(x, &env)?;
        let dst = self.fresh();
        self.emit(Instr::Some { dst, x });
        Ok(dst)
    }

    fn visit_option_none(&mut self, _: ExprId, _: &Type, _: Env<Slot>) -> Result<Slot> {
        Ok(self.constant(Value::none()))
    }

    fn visit_option_case(&mut self, id: ExprId, option: ExprId, none: ExprId, some: &Arc<CaseArm>, env: Env<Slot>) -> Result<Slot> {
        if self.depth >= self.max_unroll_depth {
            return Ok(self.fallback(id, &env));
        }
        let option = self.compile(option, &env)?;
        let value = self.fresh();
        let none = self.block(none, &env)?;
        let some = self.arm_block(some, &env, &[value])?;
        let dst = self.fresh();
        self.emit(Instr::SplitOption {
            dst,
            option,
            value,
            none,
            some,
        });
        Ok(dst)
    }

    fn visit_tuple(&mut self, _: ExprId, items: &[ExprId], env: Env<Slot>) -> Result<Slot> {
        let items = self.all(items, &env)?;
        let dst = self.fresh();
        self.emit(Instr::Tuple { dst, items });
        Ok(dst)
    }

    fn visit_tuple_get(&mut self, _: ExprId, tuple: ExprId, index: usize, env: Env<Slot>) -> Result<Slot> {
        let tuple = self.compile(tuple, &env)?;
        let dst = self.fresh();
        self.emit(Instr::TupleGet { dst, tuple, index });
        Ok(dst)
    }

    fn visit_record(&mut self, _: ExprId, shape: &Arc<RecordShape>, fields: &[ExprId], env: Env<Slot>) -> Result<Slot> {
        let fields = self.all(fields, &env)?;
        let dst = self.fresh();
        self.emit(Instr::Record {
            dst,
            shape: shape.clone(),
            fields,
        });
        Ok(dst)
    }

    fn visit_get_field(&mut self, _: ExprId, record: ExprId, index: usize, env: Env<Slot>) -> Result<Slot> {
        let record = self.compile(record, &env)?;
        let dst = self.fresh();
        self.emit(Instr::GetField { dst, record, index });
        Ok(dst)
    }

    fn visit_with_field(&mut self, _: ExprId, record: ExprId, index: usize, value: ExprId, env: Env<Slot>) -> Result<Slot> {
        let record = self.compile(record, &env)?;
        let value = self.compile(value, &env)?;
        let dst = self.fresh();
        self.emit(Instr::WithField {
            dst,
            record,
            index,
            value,
        });
        Ok(dst)
    }

    fn visit_seq_empty(&mut self, _: ExprId, _: &Type, _: Env<Slot>) -> Result<Slot> {
        Ok(self.constant(Value::Seq(Vec::new())))
    }

    fn visit_seq_cons(&mut self, _: ExprId, head: ExprId, tail: ExprId, env: Env<Slot>) -> Result<Slot> {
        let head = self.compile(head, &env)?;
        let tail = self.compile(tail, &env)?;
        let dst = self.fresh();
        self.emit(Instr::SeqCons { dst, head, tail });
        Ok(dst)
    }

    fn visit_seq_case(&mut self, id: ExprId, seq: ExprId, empty: ExprId, cons: &Arc<CaseArm>, env: Env<Slot>) -> Result<Slot> {
        if self.depth >= self.max_unroll_depth {
            return Ok(self.fallback(id, &env));
        }
        let seq = self.compile(seq, &env)?;
        let head = self.fresh();
        let tail = self.fresh();
        let empty = self.block(empty, &env)?;
        let cons = self.arm_block(cons, &env, &[head, tail])?;
        let dst = self.fresh();
        self.emit(Instr::SplitSeq {
            dst,
            seq,
            head,
            tail,
            empty,
            cons,
        });
        Ok(dst)
    }

    fn visit_seq_matches(&mut self, _: ExprId, seq: ExprId, regex: &Arc<Regex>, env: Env<Slot>) -> Result<Slot> {
        let seq = self.compile(seq, &env)?;
        let dst = self.fresh();
        self.emit(Instr::Matches {
            dst,
            seq,
            regex: regex.clone(),
        });
        Ok(dst)
    }

    fn visit_map_empty(&mut self, _: ExprId, _: &Type, _: Env<Slot>) -> Result<Slot> {
        Ok(self.constant(Value::Map(BTreeMap::new())))
    }

    fn visit_map_set(&mut self, _: ExprId, map: ExprId, key: ExprId, value: ExprId, env: Env<Slot>) -> Result<Slot> {
        let map = self.compile(map, &env)?;
        let key = self.compile(key, &env)?;
        let value = self.compile(value, &env)?;
        let dst = self.fresh();
        self.emit(Instr::MapSet { dst, map, key, value });
        Ok(dst)
    }

    fn visit_map_delete(&mut self, _: ExprId, map: ExprId, key: ExprId, env: Env<Slot>) -> Result<Slot> {
        let map = self.compile(map, &env)?;
        let key = self.compile(key, &env)?;
        let dst = self.fresh();
        self.emit(Instr::MapDelete { dst, map, key });
        Ok(dst)
    }

    fn visit_map_get(&mut self, _: ExprId, map: ExprId, key: ExprId, env: Env<Slot>) -> Result<Slot> {
        let map = self.compile(map, &env)?;
        let key = self.compile(key, &env)?;
        let dst = self.fresh();
        self.emit(Instr::MapGet { dst, map, key });
        Ok(dst)
    }

    fn visit_const_map(&mut self, _: ExprId, shape: &Arc<ConstMapShape>, values: &[ExprId], env: Env<Slot>) -> Result<Slot> {
        let values = self.all(values, &env)?;
        let dst = self.fresh();
        self.emit(Instr::ConstMap {
            dst,
            shape: shape.clone(),
            values,
        });
        Ok(dst)
    }

    fn visit_const_map_set(&mut self, _: ExprId, map: ExprId, key: ExprId, value: ExprId, env: Env<Slot>) -> Result<Slot> {
        let map = self.compile(map, &env)?;
        let key = self.compile(key, &env)?;
        let value = self.compile(value, &env)?;
        let dst = self.fresh();
        self.emit(Instr::ConstMapSet { dst, map, key, value });
        Ok(dst)
    }

    fn visit_const_map_get(&mut self, id: ExprId, map: ExprId, key: ExprId, env: Env<Slot>) -> Result<Slot> {
        let map = self.compile(map, &env)?;
        let key = self.compile(key, &env)?;
        let dst = self.fresh();
        let default = default_value(&self.arena.type_of(id));
        self.emit(Instr::ConstMapGet { dst, map, key, default });
        Ok(dst)
    }

    fn visit_apply(&mut self, _: ExprId, param: ArgId, body: ExprId, arg: ExprId, env: Env<Slot>) -> Result<Slot> {
        let arg = self.compile(arg, &env)?;
        let inner = env.bind(param, arg);
        self.compile(body, &inner)
    }
}

struct Machine<'a> {
    arena: &'a ExprArena,
    slots: Vec<Option<Value>>,
}

impl Machine<'_> {
    fn read(&self, slot: Slot) -> Value {
        match &self.slots[slot] {
            Some(v) => v.clone(),
            None => unreachable!("slot {} read before written", slot),
        }
    }

    fn write(&mut self, slot: Slot, value: Value) {
        self.slots[slot] = Some(value);
    }

    fn run(&mut self, block: &Block) -> Result<Value> {
        for instr in &block.instrs {
            self.step(instr)?;
        }
        Ok(self.read(block.result))
    }

    fn step(&mut self, instr: &Instr) -> Result<()> {
        match instr {
            Instr::Const { dst, value } => self.write(*dst, value.clone()),
            Instr::Unary { dst, op, x } => {
                let v = eval_unary(*op, self.read(*x));
                self.write(*dst, v);
            }
            Instr::Binary { dst, op, a, b } => {
                let v = eval_binary(*op, self.read(*a), self.read(*b));
                self.write(*dst, v);
            }
            Instr::Cast { dst, x, ty } => {
                let v = eval_cast(self.read(*x), ty);
                self.write(*dst, v);
            }
            Instr::Some { dst, x } => {
                let v = Value::some(self.read(*x));
                self.write(*dst, v);
            }
            Instr::Tuple { dst, items } => {
                let v = Value::Tuple(items.iter().map(|s| self.read(*s)).collect());
                self.write(*dst, v);
            }
            Instr::TupleGet { dst, tuple, index } => {
                let Value::Tuple(mut items) = self.read(*tuple) else {
                    unreachable!()
                };
                self.write(*dst, items.swap_remove(*index));
            }
            Instr::Record { dst, shape, fields } => {
                let values = fields.iter().map(|s| self.read(*s)).collect();
                self.write(*dst, Value::Record(RecordValue::new(shape.clone(), values)));
            }
            Instr::GetField { dst, record, index } => {
                let Value::Record(r) = self.read(*record) else {
                    unreachable!()
                };
                self.write(*dst, r.get(*index).clone());
            }
            Instr::WithField {
                dst,
                record,
                index,
                value,
            } => {
                let Value::Record(r) = self.read(*record) else {
                    unreachable!()
                };
                let v = self.read(*value);
                self.write(*dst, Value::Record(r.with(*index, v)));
            }
            Instr::SeqCons { dst, head, tail } => {
                let Value::Seq(tail) = self.read(*tail) else {
                    unreachable!()
                };
                let mut items = Vec::with_capacity(tail.len() + 1);
                items.push(self.read(*head));
                items.extend(tail);
                self.write(*dst, Value::Seq(items));
            }
            Instr::Matches { dst, seq, regex } => {
                let Value::Seq(items) = self.read(*seq) else {
                    unreachable!()
                };
                self.write(*dst, Value::Bool(regex.matches(&items)));
            }
            Instr::MapSet { dst, map, key, value } => {
                let Value::Map(mut entries) = self.read(*map) else {
                    unreachable!()
                };
                entries.insert(self.read(*key), self.read(*value));
                self.write(*dst, Value::Map(entries));
            }
            Instr::MapDelete { dst, map, key } => {
                let Value::Map(mut entries) = self.read(*map) else {
                    unreachable!()
                };
                entries.remove(&self.read(*key));
                self.write(*dst, Value::Map(entries));
            }
            Instr::MapGet { dst, map, key } => {
                let Value::Map(mut entries) = self.read(*map) else {
                    unreachable!()
                };
                let v = entries.remove(&self.read(*key));
                self.write(*dst, Value::Option(v.map(Box::new)));
            }
            Instr::ConstMap { dst, shape, values } => {
                let entries = shape
                    .keys()
                    .iter()
                    .zip(values)
                    .map(|(k, s)| (k.clone(), self.read(*s)))
                    .collect();
                self.write(*dst, Value::ConstMap(entries));
            }
            Instr::ConstMapSet { dst, map, key, value } => {
                let Value::ConstMap(mut entries) = self.read(*map) else {
                    unreachable!()
                };
                if let Some(slot) = entries.get_mut(&self.read(*key)) {
                    *slot = self.read(*value);
                }
                self.write(*dst, Value::ConstMap(entries));
            }
            Instr::ConstMapGet { dst, map, key, default } => {
                let Value::ConstMap(mut entries) = self.read(*map) else {
                    unreachable!()
                };
                let v = entries.remove(&self.read(*key)).unwrap_or_else(|| default.clone());
                self.write(*dst, v);
            }
            Instr::Branch {
                dst,
                guard,
                then,
                otherwise,
            } => {
                let taken = matches!(self.read(*guard), Value::Bool(true));
                let v = self.run(if taken { then } else { otherwise })?;
                self.write(*dst, v);
            }
            Instr::SplitSeq {
                dst,
                seq,
                head,
                tail,
                empty,
                cons,
            } => {
                let Value::Seq(mut items) = self.read(*seq) else {
                    unreachable!()
                };
                let v = if items.is_empty() {
                    self.run(empty)?
                } else {
                    let rest = items.split_off(1);
                    let first = items.pop().unwrap_or_else(|| unreachable!());
                    self.write(*head, first);
                    self.write(*tail, Value::Seq(rest));
                    self.run(cons)?
                };
                self.write(*dst, v);
            }
            Instr::SplitOption {
                dst,
                option,
                value,
                none,
                some,
            } => {
                let Value::Option(inner) = self.read(*option) else {
                    unreachable!()
                };
                let v = match inner {
                    None => self.run(none)?,
                    Some(x) => {
                        self.write(*value, *x);
                        self.run(some)?
                    }
                };
                self.write(*dst, v);
            }
            Instr::Interpret { dst, expr, bindings } => {
                // Outermost first, so inner bindings shadow.
                let env = bindings
                    .iter()
                    .rev()
                    .fold(Env::new(), |env, (arg, slot)| env.bind(*arg, self.read(*slot)));
                let v = interpret(self.arena, *expr, &env)?;
                self.write(*dst, v);
            }
        }
        Ok(())
    }
}

impl CompiledFunction {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Total number of slots, a rough measure of code size.
    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        if args.len() != self.params.len() {
            return Err(Error::Arity {
                expected: self.params.len(),
                found: args.len(),
            });
        }
        for (arg, ty) in args.iter().zip(&self.params) {
            if !arg.conforms(ty) {
                return invalid(format!("argument {} is not a {}", arg, ty));
            }
        }
        let mut machine = Machine {
            arena: &self.arena,
            slots: vec![None; self.slots],
        };
        for (slot, arg) in args.iter().enumerate() {
            machine.write(slot, arg.clone());
        }
        machine.run(&self.body)
    }
}
