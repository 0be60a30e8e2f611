//! Symbolic evaluation of expressions into [`SymbolicValue`]s.
//!
//! Encoding mirrors the interpreter, except that conditionals and case-splits
//! encode every branch and merge the results under the guard. Sequences are
//! insertion lists of bounded length, so a case-split peels the guarded head
//! of the list at the representation level and terminates when the list runs
//! out.
//!
//! Results are memoized per node together with the bindings the node actually
//! read. Every binding carries a [`Token`] naming the value it holds, and the
//! element and tail bound by a sequence case-split are named by their position
//! in the list they came from. A recursive case-split therefore encodes the
//! arm for each suffix of its input once, however many outer arms reach it.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};

use crate::env::{Env, EnvId};
use crate::error::Result;
use crate::expr::{ArgId, BinaryOp, CaseArm, ExprArena, ExprId, ExprVisitor, Node, UnaryOp};
use crate::generate::default_value;
use crate::regex::{Alphabet, Regex};
use crate::solver::Solver;
use crate::symbolic::{item_name, SymbolicValue, HAS_VALUE, VALUE};
use crate::types::{traverse, ConstMapShape, RecordShape, Type, TypeVisitor, MAX_CHAR};
use crate::value::Value;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RegistryKey {
    /// The n-th top-level input.
    Input(usize),
    /// An arbitrary node of the expression graph.
    Node(ExprId),
}

/// The free variables of one encoding call, one entry per input or arbitrary
/// node, plus every map key the encoding touched.
pub struct ArbitraryRegistry<S: Solver> {
    entries: Vec<(RegistryKey, Type, SymbolicValue<S>)>,
    index: HashMap<RegistryKey, usize>,
    queried_keys: Vec<(Type, SymbolicValue<S>)>,
}

impl<S: Solver> Default for ArbitraryRegistry<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            queried_keys: Vec::new(),
        }
    }
}

impl<S: Solver> ArbitraryRegistry<S> {
    pub fn get(&self, key: RegistryKey) -> Option<&SymbolicValue<S>> {
        self.index.get(&key).map(|&i| &self.entries[i].2)
    }

    pub fn entries(&self) -> &[(RegistryKey, Type, SymbolicValue<S>)] {
        &self.entries
    }

    /// Map keys of type `key` used anywhere in the encoding.
    pub fn queried_keys<'r>(&'r self, key: &'r Type) -> impl Iterator<Item = &'r SymbolicValue<S>> + 'r {
        self.queried_keys.iter().filter(move |(t, _)| t == key).map(|(_, v)| v)
    }

    fn insert(&mut self, key: RegistryKey, ty: Type, value: SymbolicValue<S>) {
        self.index.insert(key, self.entries.len());
        self.entries.push((key, ty, value));
    }
}

/// Fresh variables for every leaf of a type.
struct ArbitraryGen<'s, S: Solver> {
    solver: &'s mut S,
    side: &'s mut Vec<S::Bool>,
    name: String,
    max_list_length: usize,
}

impl<S: Solver> ArbitraryGen<'_, S> {
    fn nested(&mut self, suffix: &str, ty: &Type) -> Result<SymbolicValue<S>> {
        let len = self.name.len();
        self.name.push('.');
        self.name.push_str(suffix);
        let value = traverse(self, ty);
        self.name.truncate(len);
        value
    }
}

impl<S: Solver> TypeVisitor for ArbitraryGen<'_, S> {
    type Output = Result<SymbolicValue<S>>;

    fn visit_bool(&mut self) -> Self::Output {
        Ok(SymbolicValue::Bool(self.solver.bool_var(&self.name)))
    }

    fn visit_fixed(&mut self, width: u32, signed: bool) -> Self::Output {
        Ok(SymbolicValue::BitVec {
            value: self.solver.bitvec_var(&self.name, width),
            width,
            signed,
        })
    }

    fn visit_integer(&mut self) -> Self::Output {
        Ok(SymbolicValue::Int(self.solver.int_var(&self.name)?))
    }

    fn visit_real(&mut self) -> Self::Output {
        Ok(SymbolicValue::Real(self.solver.real_var(&self.name)?))
    }

    fn visit_char(&mut self) -> Self::Output {
        let c = self.solver.char_var(&self.name);
        let max = self.solver.char_const(MAX_CHAR);
        self.side.push(self.solver.char_le(&c, &max));
        Ok(SymbolicValue::Char(c))
    }

    fn visit_option(&mut self, inner: &Type) -> Self::Output {
        let has_value = self.nested(HAS_VALUE, &Type::Bool)?.as_bool().clone();
        let value = self.nested(VALUE, inner)?;
        // An absent option carries the default payload.
        let default = SymbolicValue::lift(self.solver, &default_value(inner), inner)?;
        let canonical = SymbolicValue::equal(self.solver, &value, &default)?;
        self.side.push(self.solver.or(&[has_value.clone(), canonical]));
        Ok(SymbolicValue::option(has_value, value))
    }

    fn visit_tuple(&mut self, items: &[Type]) -> Self::Output {
        let values = items
            .iter()
            .enumerate()
            .map(|(i, t)| self.nested(&item_name(i), t))
            .collect::<Result<_>>()?;
        Ok(SymbolicValue::tuple(values))
    }

    fn visit_seq(&mut self, element: &Type) -> Self::Output {
        let mut items = Vec::with_capacity(self.max_list_length);
        for i in 0..self.max_list_length {
            let guard = self.nested(&format!("present{}", i), &Type::Bool)?;
            let value = self.nested(&format!("element{}", i), element)?;
            items.push((guard.as_bool().clone(), value));
        }
        Ok(SymbolicValue::Seq {
            element: element.clone(),
            items,
        })
    }

    fn visit_map(&mut self, key: &Type, value: &Type) -> Self::Output {
        let present = self.solver.array_var(&format!("{}.present", self.name), key, &Type::Bool)?;
        let values = self.solver.array_var(&format!("{}.values", self.name), key, value)?;
        let default = SymbolicValue::lift(self.solver, &default_value(value), value)?;
        self.side
            .push(self.solver.map_default_axiom(key, &present, &values, &default)?);
        Ok(SymbolicValue::Map {
            key: key.clone(),
            value: value.clone(),
            present,
            values,
        })
    }

    fn visit_const_map(&mut self, shape: &Arc<ConstMapShape>) -> Self::Output {
        let entries = shape
            .keys()
            .iter()
            .map(|k| Ok((k.clone(), self.nested(&k.to_string(), shape.value())?)))
            .collect::<Result<_>>()?;
        Ok(SymbolicValue::ConstMap(entries))
    }

    fn visit_record(&mut self, shape: &Arc<RecordShape>) -> Self::Output {
        let fields = shape
            .fields()
            .iter()
            .map(|(name, t)| Ok((name.clone(), self.nested(name, t)?)))
            .collect::<Result<_>>()?;
        Ok(SymbolicValue::Record(fields))
    }
}

/// Identity of a bound value within one encoding call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Token {
    /// A value bound as a whole.
    Whole(u32),
    /// Element `i` of root list `r`.
    Element(u32, usize),
    /// Root list `r` from position `i` on.
    Suffix(u32, usize),
}

pub struct Bound<S: Solver> {
    token: Token,
    value: SymbolicValue<S>,
}

impl<S: Solver> Clone for Bound<S> {
    fn clone(&self) -> Self {
        Self {
            token: self.token,
            value: self.value.clone(),
        }
    }
}

type Reads = Vec<(ArgId, Token)>;

struct Cached<S: Solver> {
    reads: Reads,
    value: SymbolicValue<S>,
}

pub struct Encoder<'a, S: Solver> {
    arena: &'a ExprArena,
    solver: &'a mut S,
    registry: ArbitraryRegistry<S>,
    memo: HashMap<ExprId, Vec<Cached<S>>>,
    bridged: HashMap<EnvId, Env<Bound<S>>>,
    reads: Vec<Reads>,
    next_root: u32,
    arm_bodies: usize,
    side: Vec<S::Bool>,
    max_list_length: usize,
}

impl<'a, S: Solver> Encoder<'a, S> {
    pub fn new(arena: &'a ExprArena, solver: &'a mut S, max_list_length: usize) -> Self {
        Self {
            arena,
            solver,
            registry: ArbitraryRegistry::default(),
            memo: HashMap::new(),
            bridged: HashMap::new(),
            reads: Vec::new(),
            next_root: 0,
            arm_bodies: 0,
            side: Vec::new(),
            max_list_length,
        }
    }

    /// Number of case arm bodies encoded so far, memo hits excluded.
    pub fn arm_bodies(&self) -> usize {
        self.arm_bodies
    }

    pub fn solver(&self) -> &S {
        self.solver
    }

    fn fresh(&mut self, key: RegistryKey, ty: &Type) -> Result<SymbolicValue<S>> {
        if let Some(value) = self.registry.get(key) {
            return Ok(value.clone());
        }
        let name = match key {
            RegistryKey::Input(i) => format!("in{}", i),
            RegistryKey::Node(id) => format!("arb{}", self.registry.entries.len() + id.index()),
        };
        let value = traverse(
            &mut ArbitraryGen {
                solver: &mut *self.solver,
                side: &mut self.side,
                name,
                max_list_length: self.max_list_length,
            },
            ty,
        )?;
        trace!("fresh {:?} : {}", key, ty);
        self.registry.insert(key, ty.clone(), value.clone());
        Ok(value)
    }

    /// A fresh symbolic value standing for the `index`-th input.
    pub fn input(&mut self, index: usize, ty: &Type) -> Result<SymbolicValue<S>> {
        self.fresh(RegistryKey::Input(index), ty)
    }

    pub fn encode(&mut self, id: ExprId, env: &Env<SymbolicValue<S>>) -> Result<SymbolicValue<S>> {
        let bridged = match self.bridged.get(&env.id()) {
            Some(bridged) => bridged.clone(),
            None => {
                let mut bindings: Vec<(ArgId, SymbolicValue<S>)> = env.iter().map(|(a, v)| (a, v.clone())).collect();
                bindings.reverse();
                let mut bridged = Env::new();
                for (arg, value) in bindings {
                    let token = self.root(&value);
                    bridged = bridged.bind(arg, Bound { token, value });
                }
                self.bridged.insert(env.id(), bridged.clone());
                bridged
            }
        };
        self.encode_under(id, &bridged)
    }

    fn encode_under(&mut self, id: ExprId, env: &Env<Bound<S>>) -> Result<SymbolicValue<S>> {
        if let Some((reads, value)) = self.cached(id, env) {
            self.record(&reads);
            return Ok(value);
        }
        self.reads.push(Vec::new());
        let arena = self.arena;
        let result = arena.accept(id, self, env.clone());
        let mut reads = self.reads.pop().unwrap_or_default();
        reads.sort();
        reads.dedup();
        let value = result?;
        self.record(&reads);
        self.memo.entry(id).or_default().push(Cached {
            reads,
            value: value.clone(),
        });
        Ok(value)
    }

    /// A memoized result for `id` whose reads all agree with `env`.
    fn cached(&self, id: ExprId, env: &Env<Bound<S>>) -> Option<(Reads, SymbolicValue<S>)> {
        self.memo
            .get(&id)?
            .iter()
            .find(|c| {
                c.reads
                    .iter()
                    .all(|(arg, token)| env.try_get(*arg).map(|b| b.token) == Some(*token))
            })
            .map(|c| (c.reads.clone(), c.value.clone()))
    }

    fn record(&mut self, reads: &[(ArgId, Token)]) {
        if let Some(top) = self.reads.last_mut() {
            top.extend_from_slice(reads);
        }
    }

    fn fresh_root(&mut self) -> u32 {
        let r = self.next_root;
        self.next_root += 1;
        r
    }

    fn root(&mut self, value: &SymbolicValue<S>) -> Token {
        let r = self.fresh_root();
        match value {
            SymbolicValue::Seq { .. } => Token::Suffix(r, 0),
            _ => Token::Whole(r),
        }
    }

    /// The token of the value `id` evaluated to: the binding's own token when
    /// `id` is an argument, a fresh root otherwise.
    fn token_of(&mut self, id: ExprId, env: &Env<Bound<S>>, value: &SymbolicValue<S>) -> Token {
        if let Node::Argument(arg) = self.arena.get(id).node {
            if let Some(bound) = env.try_get(arg) {
                return bound.token;
            }
        }
        self.root(value)
    }

    /// Encode `body` under `inner`, which binds `args` on top of the current
    /// environment. Reads of `args` stay inside.
    fn encode_scoped(&mut self, body: ExprId, inner: &Env<Bound<S>>, args: &[ArgId]) -> Result<SymbolicValue<S>> {
        self.reads.push(Vec::new());
        let result = self.encode_under(body, inner);
        let reads = self.reads.pop().unwrap_or_default();
        let outer: Reads = reads.into_iter().filter(|(a, _)| !args.contains(a)).collect();
        self.record(&outer);
        result
    }

    /// Consume the encoder, returning the registry and the conjunction of the
    /// side constraints on its variables.
    pub fn finish(self) -> (ArbitraryRegistry<S>, S::Bool) {
        debug!(
            "encoded {} nodes ({} arm bodies) with {} free variables and {} side constraints",
            self.memo.len(),
            self.arm_bodies,
            self.registry.entries.len(),
            self.side.len()
        );
        let side = self.solver.and(&self.side);
        (self.registry, side)
    }

    fn enter_arm(&mut self, arm: &CaseArm, env: &Env<Bound<S>>, values: Vec<Bound<S>>) -> Result<SymbolicValue<S>> {
        let body = self.arena.case_body(arm)?;
        let inner = env.bind_all(arm.args().iter().copied().zip(values));
        if self.cached(body, &inner).is_none() {
            self.arm_bodies += 1;
        }
        self.encode_scoped(body, &inner, arm.args())
    }

    fn lift(&self, value: &Value, ty: &Type) -> Result<SymbolicValue<S>> {
        SymbolicValue::lift(self.solver, value, ty)
    }

    fn note_key(&mut self, key: &Type, value: &SymbolicValue<S>) {
        self.registry.queried_keys.push((key.clone(), value.clone()));
    }

    fn range_contains(&self, lo: &Value, hi: &Value, element: &SymbolicValue<S>, ty: &Type) -> Result<S::Bool> {
        let lo = self.lift(lo, ty)?;
        let hi = self.lift(hi, ty)?;
        Ok(self.solver.and(&[
            SymbolicValue::less(self.solver, &lo, element, false),
            SymbolicValue::less(self.solver, element, &hi, false),
        ]))
    }

    /// For every item, one guard per class of `alphabet`: the item falls into
    /// exactly the ranges the class names.
    fn class_guards(&self, items: &[(S::Bool, SymbolicValue<S>)], element: &Type, alphabet: &Alphabet) -> Result<Vec<Vec<S::Bool>>> {
        items
            .iter()
            .map(|(_, value)| {
                let inside = alphabet
                    .ranges()
                    .iter()
                    .map(|(lo, hi)| self.range_contains(lo, hi, value, element))
                    .collect::<Result<Vec<_>>>()?;
                Ok(alphabet
                    .classes()
                    .iter()
                    .map(|class| {
                        let literals: Vec<S::Bool> = class
                            .iter()
                            .zip(&inside)
                            .map(|(&member, b)| if member { b.clone() } else { self.solver.not(b) })
                            .collect();
                        self.solver.and(&literals)
                    })
                    .collect())
            })
            .collect()
    }

    /// Whether the present elements of `items[i..]` match `regex`, deriving by
    /// element class and skipping absent entries.
    fn matches_from(
        &self,
        items: &[(S::Bool, SymbolicValue<S>)],
        guards: &[Vec<S::Bool>],
        alphabet: &Alphabet,
        i: usize,
        regex: &Arc<Regex>,
        memo: &mut HashMap<(usize, Arc<Regex>), S::Bool>,
    ) -> Result<S::Bool> {
        if i == items.len() {
            return Ok(self.solver.bool_const(regex.nullable()));
        }
        if let Some(result) = memo.get(&(i, regex.clone())) {
            return Ok(result.clone());
        }
        let mut steps = Vec::new();
        for (c, class) in alphabet.classes().iter().enumerate() {
            let next = regex.derivative_in(alphabet, class);
            if *next == Regex::Empty {
                continue;
            }
            let rest = self.matches_from(items, guards, alphabet, i + 1, &next, memo)?;
            steps.push(self.solver.and(&[guards[i][c].clone(), rest]));
        }
        let consumed = self.solver.or(&steps);
        let skipped = self.matches_from(items, guards, alphabet, i + 1, regex, memo)?;
        let result = self.solver.bool_ite(&items[i].0, &consumed, &skipped);
        memo.insert((i, regex.clone()), result.clone());
        Ok(result)
    }

    fn key_matches(&self, key: &SymbolicValue<S>, candidate: &Value, ty: &Type) -> Result<S::Bool> {
        let candidate = self.lift(candidate, ty)?;
        SymbolicValue::equal(self.solver, key, &candidate)
    }
}

impl<S: Solver> ExprVisitor for Encoder<'_, S> {
    type Param = Env<Bound<S>>;
    type Output = Result<SymbolicValue<S>>;

    fn visit_constant(&mut self, id: ExprId, value: &Arc<Value>, _: Self::Param) -> Self::Output {
        self.lift(value, &self.arena.type_of(id))
    }

    fn visit_arbitrary(&mut self, id: ExprId, ty: &Type, _: Self::Param) -> Self::Output {
        self.fresh(RegistryKey::Node(id), ty)
    }

    fn visit_argument(&mut self, _: ExprId, arg: ArgId, env: Self::Param) -> Self::Output {
        let bound = env.get(arg);
        self.record(&[(arg, bound.token)]);
        Ok(bound.value.clone())
    }

    fn visit_unary(&mut self, _: ExprId, op: UnaryOp, x: ExprId, env: Self::Param) -> Self::Output {
        let x = self.encode_under(x, &env)?;
        Ok(match (op, x) {
            (UnaryOp::Not, SymbolicValue::Bool(b)) => SymbolicValue::Bool(self.solver.not(&b)),
            (UnaryOp::BitNot, SymbolicValue::BitVec { value, width, signed }) => SymbolicValue::BitVec {
                value: self.solver.bv_not(&value),
                width,
                signed,
            },
            (op, x) => unreachable!("{:?} on {:?}", op, x),
        })
    }

    fn visit_binary(&mut self, _: ExprId, op: BinaryOp, a: ExprId, b: ExprId, env: Self::Param) -> Self::Output {
        let x = self.encode_under(a, &env)?;
        let y = self.encode_under(b, &env)?;
        let s = &*self.solver;
        Ok(match op {
            BinaryOp::And => SymbolicValue::Bool(s.and(&[x.as_bool().clone(), y.as_bool().clone()])),
            BinaryOp::Or => SymbolicValue::Bool(s.or(&[x.as_bool().clone(), y.as_bool().clone()])),
            BinaryOp::Eq => SymbolicValue::Bool(SymbolicValue::equal(s, &x, &y)?),
            BinaryOp::Lt => SymbolicValue::Bool(SymbolicValue::less(s, &x, &y, true)),
            BinaryOp::Le => SymbolicValue::Bool(SymbolicValue::less(s, &x, &y, false)),
            _ => match (x, y) {
                (SymbolicValue::BitVec { value: p, width, signed }, SymbolicValue::BitVec { value: q, .. }) => {
                    let value = match op {
                        BinaryOp::BitAnd => s.bv_and(&p, &q),
                        BinaryOp::BitOr => s.bv_or(&p, &q),
                        BinaryOp::BitXor => s.bv_xor(&p, &q),
                        BinaryOp::Add => s.bv_add(&p, &q),
                        BinaryOp::Sub => s.bv_sub(&p, &q),
                        BinaryOp::Mul => s.bv_mul(&p, &q),
                        _ => unreachable!(),
                    };
                    SymbolicValue::BitVec { value, width, signed }
                }
                (SymbolicValue::Int(p), SymbolicValue::Int(q)) => SymbolicValue::Int(match op {
                    BinaryOp::Add => s.int_add(&p, &q),
                    BinaryOp::Sub => s.int_sub(&p, &q),
                    BinaryOp::Mul => s.int_mul(&p, &q),
                    _ => unreachable!(),
                }),
                (SymbolicValue::Real(p), SymbolicValue::Real(q)) => SymbolicValue::Real(match op {
                    BinaryOp::Add => s.real_add(&p, &q),
                    BinaryOp::Sub => s.real_sub(&p, &q),
                    BinaryOp::Mul => s.real_mul(&p, &q),
                    _ => unreachable!(),
                }),
                (x, y) => unreachable!("{:?} on {:?} and {:?}", op, x, y),
            },
        })
    }

    fn visit_if(&mut self, _: ExprId, guard: ExprId, then: ExprId, otherwise: ExprId, env: Self::Param) -> Self::Output {
        let guard = self.encode_under(guard, &env)?;
        let a = self.encode_under(then, &env)?;
        let b = self.encode_under(otherwise, &env)?;
        SymbolicValue::merge(self.solver, guard.as_bool(), &a, &b)
    }

    fn visit_cast(&mut self, _: ExprId, x: ExprId, ty: &Type, env: Self::Param) -> Self::Output {
        let x = self.encode_under(x, &env)?;
        let s = &*self.solver;
        Ok(match (x, ty) {
            (SymbolicValue::BitVec { value, width, signed }, Type::Fixed { width: to, signed: to_signed }) => {
                SymbolicValue::BitVec {
                    value: s.bv_resize(&value, width, signed, *to),
                    width: *to,
                    signed: *to_signed,
                }
            }
            (SymbolicValue::BitVec { value, signed, .. }, Type::Integer) => SymbolicValue::Int(s.bv_to_int(&value, signed)?),
            (SymbolicValue::Int(value), Type::Fixed { width, signed }) => SymbolicValue::BitVec {
                value: s.int_to_bv(&value, *width),
                width: *width,
                signed: *signed,
            },
            (x, ty) => unreachable!("cast of {:?} to {}", x, ty),
        })
    }

    fn visit_option_some(&mut self, _: ExprId, x: ExprId, env: Self::Param) -> Self::Output {
        let value = self.encode_under(x, &env)?;
        Ok(SymbolicValue::option(self.solver.bool_const(true), value))
    }

    fn visit_option_none(&mut self, _: ExprId, ty: &Type, _: Self::Param) -> Self::Output {
        self.lift(&Value::none(), ty)
    }

    fn visit_option_case(&mut self, _: ExprId, option: ExprId, none: ExprId, some: &Arc<CaseArm>, env: Self::Param) -> Self::Output {
        let option = self.encode_under(option, &env)?;
        let has_value = option.field(0).as_bool().clone();
        let absent = self.encode_under(none, &env)?;
        let payload = option.field(1).clone();
        let token = self.root(&payload);
        let present = self.enter_arm(some, &env, vec![Bound { token, value: payload }])?;
        SymbolicValue::merge(self.solver, &has_value, &present, &absent)
    }

    fn visit_tuple(&mut self, _: ExprId, items: &[ExprId], env: Self::Param) -> Self::Output {
        let values = items
            .iter()
            .map(|x| self.encode_under(*x, &env))
            .collect::<Result<_>>()?;
        Ok(SymbolicValue::tuple(values))
    }

    fn visit_tuple_get(&mut self, _: ExprId, tuple: ExprId, index: usize, env: Self::Param) -> Self::Output {
        Ok(self.encode_under(tuple, &env)?.field(index).clone())
    }

    fn visit_record(&mut self, _: ExprId, shape: &Arc<RecordShape>, fields: &[ExprId], env: Self::Param) -> Self::Output {
        let values = shape
            .fields()
            .iter()
            .zip(fields)
            .map(|((name, _), x)| Ok((name.clone(), self.encode_under(*x, &env)?)))
            .collect::<Result<_>>()?;
        Ok(SymbolicValue::Record(values))
    }

    fn visit_get_field(&mut self, _: ExprId, record: ExprId, index: usize, env: Self::Param) -> Self::Output {
        Ok(self.encode_under(record, &env)?.field(index).clone())
    }

    fn visit_with_field(&mut self, _: ExprId, record: ExprId, index: usize, value: ExprId, env: Self::Param) -> Self::Output {
        let record = self.encode_under(record, &env)?;
        let value = self.encode_under(value, &env)?;
        Ok(record.with_field(index, value))
    }

    fn visit_seq_empty(&mut self, _: ExprId, ty: &Type, _: Self::Param) -> Self::Output {
        self.lift(&Value::Seq(Vec::new()), ty)
    }

    fn visit_seq_cons(&mut self, _: ExprId, head: ExprId, tail: ExprId, env: Self::Param) -> Self::Output {
        let head = self.encode_under(head, &env)?;
        let SymbolicValue::Seq { element, items } = self.encode_under(tail, &env)? else {
            unreachable!()
        };
        let mut cons = Vec::with_capacity(items.len() + 1);
        cons.push((self.solver.bool_const(true), head));
        cons.extend(items);
        Ok(SymbolicValue::Seq { element, items: cons })
    }

    fn visit_seq_case(&mut self, _: ExprId, seq: ExprId, empty: ExprId, cons: &Arc<CaseArm>, env: Self::Param) -> Self::Output {
        let scrutinee = self.encode_under(seq, &env)?;
        let (root, offset) = match self.token_of(seq, &env, &scrutinee) {
            Token::Suffix(root, offset) => (root, offset),
            _ => (self.fresh_root(), 0),
        };
        let SymbolicValue::Seq { element, items } = scrutinee else {
            unreachable!()
        };
        // case(l[i..]) = ite(g_i, cons(e_i, l[i+1..]), case(l[i+1..]))
        let mut result = self.encode_under(empty, &env)?;
        for i in (0..items.len()).rev() {
            let head = Bound {
                token: Token::Element(root, offset + i),
                value: items[i].1.clone(),
            };
            let tail = Bound {
                token: Token::Suffix(root, offset + i + 1),
                value: SymbolicValue::Seq {
                    element: element.clone(),
                    items: items[i + 1..].to_vec(),
                },
            };
            let taken = self.enter_arm(cons, &env, vec![head, tail])?;
            result = SymbolicValue::merge(self.solver, &items[i].0, &taken, &result)?;
        }
        Ok(result)
    }

    fn visit_seq_matches(&mut self, _: ExprId, seq: ExprId, regex: &Arc<Regex>, env: Self::Param) -> Self::Output {
        let SymbolicValue::Seq { element, items } = self.encode_under(seq, &env)? else {
            unreachable!()
        };
        let alphabet = regex.alphabet();
        let guards = self.class_guards(&items, &element, &alphabet)?;
        let mut memo = HashMap::new();
        let matched = self.matches_from(&items, &guards, &alphabet, 0, regex, &mut memo)?;
        trace!(
            "pattern {} over {} element classes expanded into {} states",
            regex,
            alphabet.classes().len(),
            memo.len()
        );
        Ok(SymbolicValue::Bool(matched))
    }

    fn visit_map_empty(&mut self, _: ExprId, ty: &Type, _: Self::Param) -> Self::Output {
        self.lift(&default_value(ty), ty)
    }

    fn visit_map_set(&mut self, _: ExprId, map: ExprId, key: ExprId, value: ExprId, env: Self::Param) -> Self::Output {
        let SymbolicValue::Map {
            key: key_ty,
            value: value_ty,
            present,
            values,
        } = self.encode_under(map, &env)?
        else {
            unreachable!()
        };
        let k = self.encode_under(key, &env)?;
        let v = self.encode_under(value, &env)?;
        self.note_key(&key_ty, &k);
        let s = &*self.solver;
        let present = s.array_store(&present, &k, &SymbolicValue::Bool(s.bool_const(true)))?;
        let values = s.array_store(&values, &k, &v)?;
        Ok(SymbolicValue::Map {
            key: key_ty,
            value: value_ty,
            present,
            values,
        })
    }

    fn visit_map_delete(&mut self, _: ExprId, map: ExprId, key: ExprId, env: Self::Param) -> Self::Output {
        let SymbolicValue::Map {
            key: key_ty,
            value: value_ty,
            present,
            values,
        } = self.encode_under(map, &env)?
        else {
            unreachable!()
        };
        let k = self.encode_under(key, &env)?;
        self.note_key(&key_ty, &k);
        let default = self.lift(&default_value(&value_ty), &value_ty)?;
        let s = &*self.solver;
        let present = s.array_store(&present, &k, &SymbolicValue::Bool(s.bool_const(false)))?;
        let values = s.array_store(&values, &k, &default)?;
        Ok(SymbolicValue::Map {
            key: key_ty,
            value: value_ty,
            present,
            values,
        })
    }

    fn visit_map_get(&mut self, _: ExprId, map: ExprId, key: ExprId, env: Self::Param) -> Self::Output {
        let SymbolicValue::Map {
            key: key_ty,
            value: value_ty,
            present,
            values,
        } = self.encode_under(map, &env)?
        else {
            unreachable!()
        };
        let k = self.encode_under(key, &env)?;
        self.note_key(&key_ty, &k);
        let s = &*self.solver;
        let has_value = s.array_select(&present, &k, &Type::Bool)?;
        let value = s.array_select(&values, &k, &value_ty)?;
        Ok(SymbolicValue::option(has_value.as_bool().clone(), value))
    }

    fn visit_const_map(&mut self, _: ExprId, shape: &Arc<ConstMapShape>, values: &[ExprId], env: Self::Param) -> Self::Output {
        let entries = shape
            .keys()
            .iter()
            .zip(values)
            .map(|(k, x)| Ok((k.clone(), self.encode_under(*x, &env)?)))
            .collect::<Result<_>>()?;
        Ok(SymbolicValue::ConstMap(entries))
    }

    fn visit_const_map_set(&mut self, id: ExprId, map: ExprId, key: ExprId, value: ExprId, env: Self::Param) -> Self::Output {
        let SymbolicValue::ConstMap(entries) = self.encode_under(map, &env)? else {
            unreachable!()
        };
        let k = self.encode_under(key, &env)?;
        let v = self.encode_under(value, &env)?;
        let Type::ConstMap(shape) = self.arena.type_of(id) else {
            unreachable!()
        };
        let entries = entries
            .into_iter()
            .map(|(candidate, old)| {
                let hit = self.key_matches(&k, &candidate, shape.key())?;
                let merged = SymbolicValue::merge(self.solver, &hit, &v, &old)?;
                Ok((candidate, merged))
            })
            .collect::<Result<_>>()?;
        Ok(SymbolicValue::ConstMap(entries))
    }

    fn visit_const_map_get(&mut self, id: ExprId, map: ExprId, key: ExprId, env: Self::Param) -> Self::Output {
        let Type::ConstMap(shape) = self.arena.type_of(map) else {
            unreachable!()
        };
        let SymbolicValue::ConstMap(entries) = self.encode_under(map, &env)? else {
            unreachable!()
        };
        let k = self.encode_under(key, &env)?;
        let ty = self.arena.type_of(id);
        let mut result = self.lift(&default_value(&ty), &ty)?;
        for (candidate, value) in entries.iter().rev() {
            let hit = self.key_matches(&k, candidate, shape.key())?;
            result = SymbolicValue::merge(self.solver, &hit, value, &result)?;
        }
        Ok(result)
    }

    fn visit_apply(&mut self, _: ExprId, param: ArgId, body: ExprId, arg: ExprId, env: Self::Param) -> Self::Output {
        let value = self.encode_under(arg, &env)?;
        let token = self.token_of(arg, &env, &value);
        let inner = env.bind(param, Bound { token, value });
        self.encode_scoped(body, &inner, &[param])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    use crate::dd_solver::DdSolver;
    use crate::types::Type;

    fn solve_for(arena: &ExprArena, ty: Type, build: impl FnOnce(&ExprArena, ExprId) -> ExprId) -> Option<Value> {
        let (arg, x) = arena.argument(ty.clone());
        let constraint = build(arena, x);
        let mut solver = DdSolver::new();
        let mut encoder = Encoder::new(arena, &mut solver, 3);
        let input = encoder.input(0, &ty).unwrap();
        let env = Env::new().bind(arg, input.clone());
        let goal = encoder.encode(constraint, &env).unwrap();
        let (_, side) = encoder.finish();
        let assertion = solver.and(&[side, goal.as_bool().clone()]);
        let model = solver.solve(&assertion).model()?;
        match input {
            SymbolicValue::BitVec { value, width, signed } => {
                Some(Value::Fixed(solver.eval_bitvec(&model, &value, width, signed).unwrap()))
            }
            other => Some(Value::Bool(solver.eval_bool(&model, other.as_bool()))),
        }
    }

    #[test]
    fn test_branches_merged() {
        let arena = ExprArena::new();
        let found = solve_for(&arena, Type::u8(), |arena, x| {
            let ten = arena.u8(10);
            let big = arena.lt(ten, x).unwrap();
            let doubled = arena.add(x, x).unwrap();
            let picked = arena.if_then_else(big, doubled, x).unwrap();
            let four = arena.u8(4);
            arena.eq(picked, four).unwrap()
        });
        // Either x == 4, or x > 10 with 2x wrapping to 4 (x == 130).
        let x = found.unwrap().as_fixed().unwrap().to_u64().unwrap();
        assert!(x == 4 || x == 130, "unexpected {}", x);
    }

    #[test]
    fn test_unsat_constraint() {
        let arena = ExprArena::new();
        let found = solve_for(&arena, Type::u8(), |arena, x| {
            let a = arena.lt(x, x).unwrap();
            arena.and(a, arena.tt()).unwrap()
        });
        assert_eq!(found, None);
    }

    #[test]
    fn test_const_map_symbolic_key() {
        let arena = ExprArena::new();
        let keys = vec![Value::fixed(1, 8, false).unwrap(), Value::fixed(2, 8, false).unwrap()];
        let ty = Type::const_map(Type::u8(), keys, Type::u8()).unwrap();
        let found = solve_for(&arena, Type::u8(), move |arena, k| {
            let map = arena
                .const_map(&ty, vec![arena.u8(7), arena.u8(9)])
                .unwrap();
            let got = arena.const_map_get(map, k).unwrap();
            let nine = arena.u8(9);
            arena.eq(got, nine).unwrap()
        });
        assert_eq!(found, Some(Value::fixed(2, 8, false).unwrap()));
    }

    #[test]
    fn test_sequence_case_over_insertion_list() {
        let arena = ExprArena::new();
        let mut solver = DdSolver::new();
        let (arg, xs) = arena.argument(Type::seq(Type::u8()));
        let zero = arena.u8(0);
        let head_or_zero = arena.seq_case(xs, zero, |_, h, _| Ok(h)).unwrap();
        let five = arena.u8(5);
        let goal = arena.eq(head_or_zero, five).unwrap();
        let mut encoder = Encoder::new(&arena, &mut solver, 3);
        let input = encoder.input(0, &Type::seq(Type::u8())).unwrap();
        let encoded = encoder.encode(goal, &Env::new().bind(arg, input.clone())).unwrap();
        let (_, side) = encoder.finish();
        let assertion = solver.and(&[side, encoded.as_bool().clone()]);
        let model = solver.solve(&assertion).model().unwrap();
        let SymbolicValue::Seq { items, .. } = input else {
            unreachable!()
        };
        let first = items
            .iter()
            .find(|(g, _)| solver.eval_bool(&model, g))
            .map(|(_, v)| v.clone())
            .unwrap();
        let SymbolicValue::BitVec { value, .. } = first else {
            unreachable!()
        };
        assert_eq!(solver.eval_bitvec(&model, &value, 8, false).unwrap().to_u64(), Some(5));
    }

    fn sum(arena: &ExprArena, xs: ExprId) -> Result<ExprId> {
        let zero = arena.u8(0);
        arena.seq_case(xs, zero, |arena, head, tail| {
            let rest = sum(arena, tail)?;
            arena.add(head, rest)
        })
    }

    #[test]
    fn test_recursive_case_encodes_each_suffix_once() {
        let arena = ExprArena::new();
        let ty = Type::seq(Type::u8());
        let (arg, xs) = arena.argument(ty.clone());
        let total = sum(&arena, xs).unwrap();
        let target = arena.u8(200);
        let goal = arena.eq(total, target).unwrap();
        let n = 16;
        let mut solver = DdSolver::new();
        let mut encoder = Encoder::new(&arena, &mut solver, n);
        let input = encoder.input(0, &ty).unwrap();
        encoder.encode(goal, &Env::new().bind(arg, input)).unwrap();
        // One body per depth d and list position k >= d.
        assert_eq!(encoder.arm_bodies(), n * (n + 1) / 2);
    }

    #[test]
    fn test_recursive_case_model() {
        let arena = ExprArena::new();
        let ty = Type::seq(Type::u8());
        let (arg, xs) = arena.argument(ty.clone());
        let total = sum(&arena, xs).unwrap();
        let target = arena.u8(200);
        let goal = arena.eq(total, target).unwrap();
        let mut solver = DdSolver::new();
        let mut encoder = Encoder::new(&arena, &mut solver, 4);
        let input = encoder.input(0, &ty).unwrap();
        let encoded = encoder.encode(goal, &Env::new().bind(arg, input.clone())).unwrap();
        let (_, side) = encoder.finish();
        let assertion = solver.and(&[side, encoded.as_bool().clone()]);
        let model = solver.solve(&assertion).model().unwrap();
        let SymbolicValue::Seq { items, .. } = input else {
            unreachable!()
        };
        let picked: u64 = items
            .iter()
            .filter(|(g, _)| solver.eval_bool(&model, g))
            .map(|(_, v)| match v {
                SymbolicValue::BitVec { value, .. } => solver.eval_bitvec(&model, value, 8, false).unwrap().to_u64().unwrap(),
                _ => unreachable!(),
            })
            .sum();
        assert_eq!(picked % 256, 200);
    }

    #[test]
    fn test_pattern_encoding() {
        let arena = ExprArena::new();
        let mut solver = DdSolver::new();
        let (arg, s) = arena.argument(Type::string());
        let pattern = Regex::concat(Regex::string("a"), Regex::plus(Regex::range(Value::Char('0' as u32), Value::Char('9' as u32))));
        let matched = arena.seq_matches(s, pattern.clone()).unwrap();
        let mut encoder = Encoder::new(&arena, &mut solver, 3);
        let input = encoder.input(0, &Type::string()).unwrap();
        let encoded = encoder.encode(matched, &Env::new().bind(arg, input.clone())).unwrap();
        let (_, side) = encoder.finish();
        let assertion = solver.and(&[side, encoded.as_bool().clone()]);
        let model = solver.solve(&assertion).model().unwrap();
        let SymbolicValue::Seq { items, .. } = input else {
            unreachable!()
        };
        let chars: Vec<Value> = items
            .iter()
            .filter(|(g, _)| solver.eval_bool(&model, g))
            .map(|(_, v)| match v {
                SymbolicValue::Char(c) => Value::Char(solver.eval_char(&model, c).unwrap()),
                _ => unreachable!(),
            })
            .collect();
        assert!(pattern.matches(&chars), "{:?} does not match", chars);
    }
}
