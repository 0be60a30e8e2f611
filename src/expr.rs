//! Expression IR: an append-only arena of typed nodes.
//!
//! Nodes are addressed by [`ExprId`] handles. Operands always refer to nodes
//! created earlier, so the graph is acyclic by construction; subexpressions
//! are shared simply by reusing a handle. Every builder validates its operands
//! eagerly and fails with [`Error::InvalidArgument`] on a mismatch.
//!
//! Structural recursion is expressed with case-splits ([`ExprArena::seq_case`],
//! [`ExprArena::option_case`]). The non-empty arm of a case-split is a host
//! closure that is expanded lazily, at most once per case node, the first time
//! an engine needs it. A recursive definition therefore builds exactly as many
//! levels as the engines ask for.
//!
//! Engines consume the IR through [`ExprVisitor`] and [`ExprArena::accept`].

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use log::trace;
use num_bigint::BigInt;
use parking_lot::RwLock;

use crate::error::{invalid, Error, Result};
use crate::fixed::FixedInt;
use crate::regex::Regex;
use crate::types::{traverse, ConstMapShape, RecordShape, Type, TypeVisitor, MAX_CHAR};
use crate::value::Value;

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(0);

/// Handle to a node of one particular [`ExprArena`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId {
    arena: u32,
    index: u32,
}

impl ExprId {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl Debug for ExprId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.index)
    }
}

/// Identifier of a bound argument (function parameter, case-split binder or
/// lambda parameter).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArgId(u32);

impl ArgId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    BitNot,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Add,
    Sub,
    Mul,
    Eq,
    Lt,
    Le,
}

type ArmBuilder = dyn Fn(&ExprArena, &[ExprId]) -> Result<ExprId> + Send + Sync;

/// The deconstructing arm of a case-split.
///
/// `params` are the argument nodes standing for the deconstructed parts
/// (head and tail of a sequence, or the value of an option). The body is
/// built from them on first use.
pub struct CaseArm {
    args: Vec<ArgId>,
    params: Vec<ExprId>,
    ty: Type,
    build: Box<ArmBuilder>,
    body: OnceLock<ExprId>,
}

impl CaseArm {
    pub fn args(&self) -> &[ArgId] {
        &self.args
    }

    pub fn params(&self) -> &[ExprId] {
        &self.params
    }

    pub fn is_expanded(&self) -> bool {
        self.body.get().is_some()
    }
}

impl Debug for CaseArm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseArm")
            .field("args", &self.args)
            .field("body", &self.body.get())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Constant(Arc<Value>),
    Arbitrary,
    Argument(ArgId),
    Unary(UnaryOp, ExprId),
    Binary(BinaryOp, ExprId, ExprId),
    If {
        guard: ExprId,
        then: ExprId,
        otherwise: ExprId,
    },
    Cast(ExprId),
    OptionSome(ExprId),
    OptionNone,
    OptionCase {
        option: ExprId,
        none: ExprId,
        some: Arc<CaseArm>,
    },
    Tuple(Vec<ExprId>),
    TupleGet(ExprId, usize),
    Record(Vec<ExprId>),
    GetField(ExprId, usize),
    WithField(ExprId, usize, ExprId),
    SeqEmpty,
    SeqCons(ExprId, ExprId),
    SeqCase {
        seq: ExprId,
        empty: ExprId,
        cons: Arc<CaseArm>,
    },
    SeqMatches(ExprId, Arc<Regex>),
    MapEmpty,
    MapSet(ExprId, ExprId, ExprId),
    MapDelete(ExprId, ExprId),
    MapGet(ExprId, ExprId),
    /// Values in the order of the declared keys.
    ConstMap(Vec<ExprId>),
    ConstMapSet(ExprId, ExprId, ExprId),
    ConstMapGet(ExprId, ExprId),
    Apply {
        param: ArgId,
        body: ExprId,
        arg: ExprId,
    },
}

#[derive(Debug)]
pub struct NodeData {
    pub node: Node,
    pub ty: Type,
}

#[derive(Default)]
struct Inner {
    nodes: Vec<Arc<NodeData>>,
    empty_seqs: HashMap<Type, ExprId>,
    next_arg: u32,
}

pub struct ExprArena {
    id: u32,
    inner: RwLock<Inner>,
    true_id: ExprId,
    false_id: ExprId,
}

impl Debug for ExprArena {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExprArena")
            .field("id", &self.id)
            .field("nodes", &self.len())
            .finish()
    }
}

impl Default for ExprArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Double dispatch target of [`ExprArena::accept`]: one method per node kind.
pub trait ExprVisitor {
    type Param;
    type Output;

    fn visit_constant(&mut self, id: ExprId, value: &Arc<Value>, param: Self::Param) -> Self::Output;
    fn visit_arbitrary(&mut self, id: ExprId, ty: &Type, param: Self::Param) -> Self::Output;
    fn visit_argument(&mut self, id: ExprId, arg: ArgId, param: Self::Param) -> Self::Output;
    fn visit_unary(&mut self, id: ExprId, op: UnaryOp, operand: ExprId, param: Self::Param) -> Self::Output;
    fn visit_binary(&mut self, id: ExprId, op: BinaryOp, left: ExprId, right: ExprId, param: Self::Param) -> Self::Output;
    fn visit_if(&mut self, id: ExprId, guard: ExprId, then: ExprId, otherwise: ExprId, param: Self::Param) -> Self::Output;
    fn visit_cast(&mut self, id: ExprId, operand: ExprId, ty: &Type, param: Self::Param) -> Self::Output;
    fn visit_option_some(&mut self, id: ExprId, value: ExprId, param: Self::Param) -> Self::Output;
    fn visit_option_none(&mut self, id: ExprId, ty: &Type, param: Self::Param) -> Self::Output;
    fn visit_option_case(&mut self, id: ExprId, option: ExprId, none: ExprId, some: &Arc<CaseArm>, param: Self::Param) -> Self::Output;
    fn visit_tuple(&mut self, id: ExprId, items: &[ExprId], param: Self::Param) -> Self::Output;
    fn visit_tuple_get(&mut self, id: ExprId, tuple: ExprId, index: usize, param: Self::Param) -> Self::Output;
    fn visit_record(&mut self, id: ExprId, shape: &Arc<RecordShape>, fields: &[ExprId], param: Self::Param) -> Self::Output;
    fn visit_get_field(&mut self, id: ExprId, record: ExprId, index: usize, param: Self::Param) -> Self::Output;
    fn visit_with_field(&mut self, id: ExprId, record: ExprId, index: usize, value: ExprId, param: Self::Param) -> Self::Output;
    fn visit_seq_empty(&mut self, id: ExprId, ty: &Type, param: Self::Param) -> Self::Output;
    fn visit_seq_cons(&mut self, id: ExprId, head: ExprId, tail: ExprId, param: Self::Param) -> Self::Output;
    fn visit_seq_case(&mut self, id: ExprId, seq: ExprId, empty: ExprId, cons: &Arc<CaseArm>, param: Self::Param) -> Self::Output;
    fn visit_seq_matches(&mut self, id: ExprId, seq: ExprId, regex: &Arc<Regex>, param: Self::Param) -> Self::Output;
    fn visit_map_empty(&mut self, id: ExprId, ty: &Type, param: Self::Param) -> Self::Output;
    fn visit_map_set(&mut self, id: ExprId, map: ExprId, key: ExprId, value: ExprId, param: Self::Param) -> Self::Output;
    fn visit_map_delete(&mut self, id: ExprId, map: ExprId, key: ExprId, param: Self::Param) -> Self::Output;
    fn visit_map_get(&mut self, id: ExprId, map: ExprId, key: ExprId, param: Self::Param) -> Self::Output;
    fn visit_const_map(&mut self, id: ExprId, shape: &Arc<ConstMapShape>, values: &[ExprId], param: Self::Param) -> Self::Output;
    fn visit_const_map_set(&mut self, id: ExprId, map: ExprId, key: ExprId, value: ExprId, param: Self::Param) -> Self::Output;
    fn visit_const_map_get(&mut self, id: ExprId, map: ExprId, key: ExprId, param: Self::Param) -> Self::Output;
    fn visit_apply(&mut self, id: ExprId, param_id: ArgId, body: ExprId, arg: ExprId, param: Self::Param) -> Self::Output;
}

fn expect_type(what: &str, actual: &Type, expected: &Type) -> Result<()> {
    if actual != expected {
        return invalid(format!("{} should be {}, found {}", what, expected, actual));
    }
    Ok(())
}

fn same_type(op: &str, a: &Type, b: &Type) -> Result<()> {
    if a != b {
        return invalid(format!("operands of {} disagree: {} vs {}", op, a, b));
    }
    Ok(())
}

impl ExprArena {
    pub fn new() -> Self {
        let id = NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed);
        let mut inner = Inner::default();
        let mut push = |value: bool| {
            let index = inner.nodes.len() as u32;
            inner.nodes.push(Arc::new(NodeData {
                node: Node::Constant(Arc::new(Value::Bool(value))),
                ty: Type::Bool,
            }));
            ExprId { arena: id, index }
        };
        let true_id = push(true);
        let false_id = push(false);
        Self {
            id,
            inner: RwLock::new(inner),
            true_id,
            false_id,
        }
    }

    /// Number of nodes created so far.
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, node: Node, ty: Type) -> ExprId {
        let mut inner = self.inner.write();
        let index = inner.nodes.len() as u32;
        trace!("@{} = {:?} : {}", index, node, ty);
        inner.nodes.push(Arc::new(NodeData { node, ty }));
        ExprId {
            arena: self.id,
            index,
        }
    }

    fn fresh_arg(&self) -> ArgId {
        let mut inner = self.inner.write();
        let arg = ArgId(inner.next_arg);
        inner.next_arg += 1;
        arg
    }

    fn lookup(&self, id: ExprId) -> Result<Arc<NodeData>> {
        if id.arena != self.id {
            return invalid(format!("{:?} belongs to another arena", id));
        }
        self.inner
            .read()
            .nodes
            .get(id.index())
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("{:?} is out of range", id)))
    }

    /// The node behind a handle.
    ///
    /// # Panics
    ///
    /// Panics on a handle from another arena. Builders reject such handles, so
    /// every handle reachable from a validated node is local.
    pub fn get(&self, id: ExprId) -> Arc<NodeData> {
        match self.lookup(id) {
            Ok(data) => data,
            Err(e) => panic!("{}", e),
        }
    }

    pub fn type_of(&self, id: ExprId) -> Type {
        self.get(id).ty.clone()
    }

    /// Validate a handle and its type, and return the type.
    pub fn check(&self, id: ExprId) -> Result<Type> {
        let ty = self.lookup(id)?.ty.clone();
        ty.validate()?;
        Ok(ty)
    }

    pub fn accept<V: ExprVisitor + ?Sized>(&self, id: ExprId, visitor: &mut V, param: V::Param) -> V::Output {
        let data = self.get(id);
        match &data.node {
            Node::Constant(value) => visitor.visit_constant(id, value, param),
            Node::Arbitrary => visitor.visit_arbitrary(id, &data.ty, param),
            Node::Argument(arg) => visitor.visit_argument(id, *arg, param),
            Node::Unary(op, x) => visitor.visit_unary(id, *op, *x, param),
            Node::Binary(op, a, b) => visitor.visit_binary(id, *op, *a, *b, param),
            Node::If {
                guard,
                then,
                otherwise,
            } => visitor.visit_if(id, *guard, *then, *otherwise, param),
            Node::Cast(x) => visitor.visit_cast(id, *x, &data.ty, param),
            Node::OptionSome(x) => visitor.visit_option_some(id, *x, param),
            Node::OptionNone => visitor.visit_option_none(id, &data.ty, param),
            Node::OptionCase { option, none, some } => {
                visitor.visit_option_case(id, *option, *none, some, param)
            }
            Node::Tuple(items) => visitor.visit_tuple(id, items, param),
            Node::TupleGet(t, i) => visitor.visit_tuple_get(id, *t, *i, param),
            Node::Record(fields) => match &data.ty {
                Type::Record(shape) => visitor.visit_record(id, shape, fields, param),
                _ => unreachable!(),
            },
            Node::GetField(r, i) => visitor.visit_get_field(id, *r, *i, param),
            Node::WithField(r, i, v) => visitor.visit_with_field(id, *r, *i, *v, param),
            Node::SeqEmpty => visitor.visit_seq_empty(id, &data.ty, param),
            Node::SeqCons(h, t) => visitor.visit_seq_cons(id, *h, *t, param),
            Node::SeqCase { seq, empty, cons } => visitor.visit_seq_case(id, *seq, *empty, cons, param),
            Node::SeqMatches(s, r) => visitor.visit_seq_matches(id, *s, r, param),
            Node::MapEmpty => visitor.visit_map_empty(id, &data.ty, param),
            Node::MapSet(m, k, v) => visitor.visit_map_set(id, *m, *k, *v, param),
            Node::MapDelete(m, k) => visitor.visit_map_delete(id, *m, *k, param),
            Node::MapGet(m, k) => visitor.visit_map_get(id, *m, *k, param),
            Node::ConstMap(values) => match &data.ty {
                Type::ConstMap(shape) => visitor.visit_const_map(id, shape, values, param),
                _ => unreachable!(),
            },
            Node::ConstMapSet(m, k, v) => visitor.visit_const_map_set(id, *m, *k, *v, param),
            Node::ConstMapGet(m, k) => visitor.visit_const_map_get(id, *m, *k, param),
            Node::Apply { param: p, body, arg } => visitor.visit_apply(id, *p, *body, *arg, param),
        }
    }

    /// The body of a case arm, building it on first use.
    pub fn case_body(&self, arm: &CaseArm) -> Result<ExprId> {
        if let Some(body) = arm.body.get() {
            return Ok(*body);
        }
        let body = (arm.build)(self, &arm.params)?;
        expect_type("case arm", &self.check(body)?, &arm.ty)?;
        // A concurrent expansion may have won; either body is equivalent.
        let _ = arm.body.set(body);
        Ok(*arm.body.get().unwrap_or(&body))
    }

    fn case_arm(&self, param_types: Vec<Type>, ty: Type, build: Box<ArmBuilder>) -> Arc<CaseArm> {
        let (args, params) = param_types
            .into_iter()
            .map(|t| self.argument(t))
            .unzip();
        Arc::new(CaseArm {
            args,
            params,
            ty,
            build,
            body: OnceLock::new(),
        })
    }

    // Leaves

    pub fn tt(&self) -> ExprId {
        self.true_id
    }

    pub fn ff(&self) -> ExprId {
        self.false_id
    }

    pub fn bool(&self, value: bool) -> ExprId {
        if value {
            self.true_id
        } else {
            self.false_id
        }
    }

    /// Lift a host value into nodes. Scalars become constants; composite
    /// values are rebuilt structurally.
    pub fn constant(&self, value: &Value, ty: &Type) -> Result<ExprId> {
        if !value.conforms(ty) {
            if let Value::Char(c) = value {
                if *c > MAX_CHAR {
                    return invalid(format!("character {:#x} is outside the representable range", c));
                }
            }
            return invalid(format!("{} is not a {}", value, ty));
        }
        traverse(&mut ConstantEmbedder { arena: self, value }, ty)
    }

    pub fn fixed(&self, value: i128, width: u32, signed: bool) -> Result<ExprId> {
        let x = FixedInt::from_i128(value, width, signed)?;
        Ok(self.scalar(Value::Fixed(x), Type::Fixed { width, signed }))
    }

    pub fn u8(&self, value: u8) -> ExprId {
        self.scalar(Value::Fixed(FixedInt::wrapping_from(&value.into(), 8, false)), Type::u8())
    }

    pub fn u32(&self, value: u32) -> ExprId {
        self.scalar(Value::Fixed(FixedInt::wrapping_from(&value.into(), 32, false)), Type::u32())
    }

    pub fn i32(&self, value: i32) -> ExprId {
        self.scalar(Value::Fixed(FixedInt::wrapping_from(&value.into(), 32, true)), Type::i32())
    }

    pub fn integer(&self, value: impl Into<BigInt>) -> ExprId {
        self.scalar(Value::Integer(value.into()), Type::Integer)
    }

    pub fn char(&self, c: char) -> Result<ExprId> {
        self.constant(&Value::Char(c as u32), &Type::Char)
    }

    /// A string literal, as a sequence of characters.
    pub fn string(&self, s: &str) -> Result<ExprId> {
        self.constant(&Value::string(s), &Type::string())
    }

    fn scalar(&self, value: Value, ty: Type) -> ExprId {
        match value {
            Value::Bool(b) => self.bool(b),
            _ => self.push(Node::Constant(Arc::new(value)), ty),
        }
    }

    /// A free input: the solver chooses its value.
    pub fn arbitrary(&self, ty: Type) -> ExprId {
        self.push(Node::Arbitrary, ty)
    }

    /// A fresh argument node, bound later by a function call or binder.
    pub fn argument(&self, ty: Type) -> (ArgId, ExprId) {
        let arg = self.fresh_arg();
        (arg, self.push(Node::Argument(arg), ty))
    }

    // Logic

    pub fn not(&self, x: ExprId) -> Result<ExprId> {
        expect_type("operand of not", &self.check(x)?, &Type::Bool)?;
        Ok(match &self.get(x).node {
            Node::Constant(v) => self.bool(v.as_bool() != Some(true)),
            Node::Unary(UnaryOp::Not, inner) => *inner,
            _ => self.push(Node::Unary(UnaryOp::Not, x), Type::Bool),
        })
    }

    pub fn and(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        expect_type("operand of and", &self.check(a)?, &Type::Bool)?;
        expect_type("operand of and", &self.check(b)?, &Type::Bool)?;
        Ok(if a == self.false_id || b == self.false_id {
            self.false_id
        } else if a == self.true_id {
            b
        } else if b == self.true_id || a == b {
            a
        } else {
            self.push(Node::Binary(BinaryOp::And, a, b), Type::Bool)
        })
    }

    pub fn or(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        expect_type("operand of or", &self.check(a)?, &Type::Bool)?;
        expect_type("operand of or", &self.check(b)?, &Type::Bool)?;
        Ok(if a == self.true_id || b == self.true_id {
            self.true_id
        } else if a == self.false_id {
            b
        } else if b == self.false_id || a == b {
            a
        } else {
            self.push(Node::Binary(BinaryOp::Or, a, b), Type::Bool)
        })
    }

    pub fn and_all(&self, items: impl IntoIterator<Item = ExprId>) -> Result<ExprId> {
        items.into_iter().try_fold(self.true_id, |acc, x| self.and(acc, x))
    }

    pub fn or_all(&self, items: impl IntoIterator<Item = ExprId>) -> Result<ExprId> {
        items.into_iter().try_fold(self.false_id, |acc, x| self.or(acc, x))
    }

    pub fn implies(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        let not_a = self.not(a)?;
        self.or(not_a, b)
    }

    pub fn if_then_else(&self, guard: ExprId, then: ExprId, otherwise: ExprId) -> Result<ExprId> {
        expect_type("guard", &self.check(guard)?, &Type::Bool)?;
        let ty = self.check(then)?;
        same_type("if", &ty, &self.check(otherwise)?)?;
        Ok(if guard == self.true_id || then == otherwise {
            then
        } else if guard == self.false_id {
            otherwise
        } else {
            self.push(
                Node::If {
                    guard,
                    then,
                    otherwise,
                },
                ty,
            )
        })
    }

    // Arithmetic and bitwise

    fn bitwise(&self, op: BinaryOp, a: ExprId, b: ExprId) -> Result<ExprId> {
        let ty = self.check(a)?;
        same_type(&format!("{:?}", op), &ty, &self.check(b)?)?;
        if !ty.is_fixed() {
            return invalid(format!("{:?} needs fixed-width integers, found {}", op, ty));
        }
        Ok(self.push(Node::Binary(op, a, b), ty))
    }

    pub fn bit_not(&self, x: ExprId) -> Result<ExprId> {
        let ty = self.check(x)?;
        if !ty.is_fixed() {
            return invalid(format!("bitwise not needs a fixed-width integer, found {}", ty));
        }
        Ok(self.push(Node::Unary(UnaryOp::BitNot, x), ty))
    }

    pub fn bit_and(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        self.bitwise(BinaryOp::BitAnd, a, b)
    }

    pub fn bit_or(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        self.bitwise(BinaryOp::BitOr, a, b)
    }

    pub fn bit_xor(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        self.bitwise(BinaryOp::BitXor, a, b)
    }

    fn arithmetic(&self, op: BinaryOp, a: ExprId, b: ExprId) -> Result<ExprId> {
        let ty = self.check(a)?;
        same_type(&format!("{:?}", op), &ty, &self.check(b)?)?;
        if !ty.is_numeric() {
            return invalid(format!("{:?} needs numbers, found {}", op, ty));
        }
        Ok(self.push(Node::Binary(op, a, b), ty))
    }

    pub fn add(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        self.arithmetic(BinaryOp::Add, a, b)
    }

    pub fn sub(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        self.arithmetic(BinaryOp::Sub, a, b)
    }

    pub fn mul(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        self.arithmetic(BinaryOp::Mul, a, b)
    }

    /// Convert between fixed-width integers of any width and signedness, and
    /// between fixed-width and unbounded integers. Narrowing wraps.
    pub fn cast(&self, x: ExprId, ty: Type) -> Result<ExprId> {
        let from = self.check(x)?;
        ty.validate()?;
        if from == ty {
            return Ok(x);
        }
        match (&from, &ty) {
            (Type::Fixed { .. }, Type::Fixed { .. })
            | (Type::Fixed { .. }, Type::Integer)
            | (Type::Integer, Type::Fixed { .. }) => Ok(self.push(Node::Cast(x), ty)),
            _ => invalid(format!("cannot cast {} to {}", from, ty)),
        }
    }

    // Comparison

    pub fn eq(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        same_type("eq", &self.check(a)?, &self.check(b)?)?;
        if a == b {
            return Ok(self.true_id);
        }
        Ok(self.push(Node::Binary(BinaryOp::Eq, a, b), Type::Bool))
    }

    pub fn ne(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        let eq = self.eq(a, b)?;
        self.not(eq)
    }

    fn ordered(&self, op: BinaryOp, a: ExprId, b: ExprId) -> Result<ExprId> {
        let ty = self.check(a)?;
        same_type(&format!("{:?}", op), &ty, &self.check(b)?)?;
        if !ty.is_ordered() {
            return invalid(format!("{:?} needs an ordered type, found {}", op, ty));
        }
        Ok(self.push(Node::Binary(op, a, b), Type::Bool))
    }

    pub fn lt(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        self.ordered(BinaryOp::Lt, a, b)
    }

    pub fn le(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        self.ordered(BinaryOp::Le, a, b)
    }

    pub fn gt(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        self.ordered(BinaryOp::Lt, b, a)
    }

    pub fn ge(&self, a: ExprId, b: ExprId) -> Result<ExprId> {
        self.ordered(BinaryOp::Le, b, a)
    }

    // Options

    pub fn some(&self, x: ExprId) -> Result<ExprId> {
        let ty = self.check(x)?;
        Ok(self.push(Node::OptionSome(x), Type::option(ty)))
    }

    pub fn none(&self, inner: Type) -> ExprId {
        self.push(Node::OptionNone, Type::option(inner))
    }

    /// `match option { None => none, Some(v) => some(v) }`.
    pub fn option_case<F>(&self, option: ExprId, none: ExprId, some: F) -> Result<ExprId>
    where
        F: Fn(&ExprArena, ExprId) -> Result<ExprId> + Send + Sync + 'static,
    {
        let inner = match self.check(option)? {
            Type::Option(inner) => *inner,
            other => return invalid(format!("option case over {}", other)),
        };
        let ty = self.check(none)?;
        let arm = self.case_arm(
            vec![inner],
            ty.clone(),
            Box::new(move |arena: &ExprArena, params: &[ExprId]| some(arena, params[0])),
        );
        Ok(self.push(Node::OptionCase { option, none, some: arm }, ty))
    }

    pub fn option_value_or(&self, option: ExprId, default: ExprId) -> Result<ExprId> {
        let ty = self.check(default)?;
        expect_type("option", &self.check(option)?, &Type::option(ty))?;
        self.option_case(option, default, |_, value| Ok(value))
    }

    pub fn is_some(&self, option: ExprId) -> Result<ExprId> {
        let ff = self.false_id;
        self.option_case(option, ff, |arena, _| Ok(arena.tt()))
    }

    // Tuples and records

    pub fn tuple(&self, items: Vec<ExprId>) -> Result<ExprId> {
        let types = items.iter().map(|x| self.check(*x)).collect::<Result<Vec<_>>>()?;
        Ok(self.push(Node::Tuple(items), Type::Tuple(types)))
    }

    pub fn tuple_get(&self, tuple: ExprId, index: usize) -> Result<ExprId> {
        match self.check(tuple)? {
            Type::Tuple(types) if index < types.len() => {
                Ok(self.push(Node::TupleGet(tuple, index), types[index].clone()))
            }
            other => invalid(format!("no component {} in {}", index, other)),
        }
    }

    /// Build a record from named fields given in any order.
    pub fn record(&self, ty: &Type, fields: Vec<(&str, ExprId)>) -> Result<ExprId> {
        let shape = match ty {
            Type::Record(shape) => shape.clone(),
            other => return invalid(format!("{} is not a record type", other)),
        };
        let mut slots = vec![None; shape.fields().len()];
        for (name, value) in fields {
            let index = shape
                .field_index(name)
                .ok_or_else(|| Error::InvalidArgument(format!("{} has no field {}", shape.name(), name)))?;
            expect_type(name, &self.check(value)?, shape.field_type(index))?;
            if slots[index].replace(value).is_some() {
                return invalid(format!("field {} given twice", name));
            }
        }
        let values = slots
            .into_iter()
            .zip(shape.fields())
            .map(|(slot, (name, _))| {
                slot.ok_or_else(|| Error::InvalidArgument(format!("missing field {} of {}", name, shape.name())))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.push(Node::Record(values), ty.clone()))
    }

    fn field_of(&self, record: ExprId, name: &str) -> Result<(Arc<RecordShape>, usize)> {
        match self.check(record)? {
            Type::Record(shape) => {
                let index = shape
                    .field_index(name)
                    .ok_or_else(|| Error::InvalidArgument(format!("{} has no field {}", shape.name(), name)))?;
                Ok((shape, index))
            }
            other => invalid(format!("field {} of non-record {}", name, other)),
        }
    }

    pub fn get_field(&self, record: ExprId, name: &str) -> Result<ExprId> {
        let (_, index) = self.field_of(record, name)?;
        self.get_field_at(record, index)
    }

    pub fn with_field(&self, record: ExprId, name: &str, value: ExprId) -> Result<ExprId> {
        let (_, index) = self.field_of(record, name)?;
        self.with_field_at(record, index, value)
    }

    fn field_at(&self, record: ExprId, index: usize) -> Result<Arc<RecordShape>> {
        match self.check(record)? {
            Type::Record(shape) if index < shape.fields().len() => Ok(shape),
            other => invalid(format!("no field #{} in {}", index, other)),
        }
    }

    /// Field access by position in the sorted field list.
    pub fn get_field_at(&self, record: ExprId, index: usize) -> Result<ExprId> {
        let shape = self.field_at(record, index)?;
        Ok(self.push(Node::GetField(record, index), shape.field_type(index).clone()))
    }

    pub fn with_field_at(&self, record: ExprId, index: usize, value: ExprId) -> Result<ExprId> {
        let shape = self.field_at(record, index)?;
        expect_type(&shape.fields()[index].0, &self.check(value)?, shape.field_type(index))?;
        Ok(self.push(Node::WithField(record, index, value), Type::Record(shape)))
    }

    /// Build a record from values ordered like the shape's sorted fields.
    pub fn record_from_values(&self, shape: &Arc<RecordShape>, values: Vec<ExprId>) -> Result<ExprId> {
        if values.len() != shape.fields().len() {
            return invalid(format!(
                "{} has {} fields, found {} values",
                shape.name(),
                shape.fields().len(),
                values.len()
            ));
        }
        for (v, (name, ty)) in values.iter().zip(shape.fields()) {
            expect_type(name, &self.check(*v)?, ty)?;
        }
        Ok(self.push(Node::Record(values), Type::Record(shape.clone())))
    }

    // Sequences

    /// The canonical empty sequence of `element`s.
    pub fn seq_empty(&self, element: Type) -> ExprId {
        let ty = Type::seq(element);
        if let Some(id) = self.inner.read().empty_seqs.get(&ty) {
            return *id;
        }
        let id = self.push(Node::SeqEmpty, ty.clone());
        *self.inner.write().empty_seqs.entry(ty).or_insert(id)
    }

    pub fn seq_cons(&self, head: ExprId, tail: ExprId) -> Result<ExprId> {
        let ty = self.check(tail)?;
        match &ty {
            Type::Seq(element) => expect_type("sequence head", &self.check(head)?, element)?,
            other => return invalid(format!("cons onto non-sequence {}", other)),
        }
        Ok(self.push(Node::SeqCons(head, tail), ty))
    }

    pub fn seq(&self, element: Type, items: &[ExprId]) -> Result<ExprId> {
        items
            .iter()
            .rev()
            .try_fold(self.seq_empty(element), |tail, head| self.seq_cons(*head, tail))
    }

    /// `match seq { [] => empty, [head, tail @ ..] => cons(head, tail) }`.
    pub fn seq_case<F>(&self, seq: ExprId, empty: ExprId, cons: F) -> Result<ExprId>
    where
        F: Fn(&ExprArena, ExprId, ExprId) -> Result<ExprId> + Send + Sync + 'static,
    {
        let seq_ty = self.check(seq)?;
        let element = match &seq_ty {
            Type::Seq(element) => (**element).clone(),
            other => return invalid(format!("sequence case over {}", other)),
        };
        let ty = self.check(empty)?;
        let arm = self.case_arm(
            vec![element, seq_ty],
            ty.clone(),
            Box::new(move |arena: &ExprArena, params: &[ExprId]| {
                cons(arena, params[0], params[1])
            }),
        );
        Ok(self.push(Node::SeqCase { seq, empty, cons: arm }, ty))
    }

    pub fn seq_matches(&self, seq: ExprId, regex: Arc<Regex>) -> Result<ExprId> {
        match self.check(seq)? {
            Type::Seq(element) => regex.check(&element)?,
            other => return invalid(format!("pattern match on {}", other)),
        }
        Ok(self.push(Node::SeqMatches(seq, regex), Type::Bool))
    }

    /// Number of elements, as an unsigned 32-bit integer.
    pub fn seq_length(&self, seq: ExprId) -> Result<ExprId> {
        let zero = self.u32(0);
        self.seq_case(seq, zero, |arena, _, tail| {
            let rest = arena.seq_length(tail)?;
            let one = arena.u32(1);
            arena.add(one, rest)
        })
    }

    pub fn seq_contains(&self, seq: ExprId, item: ExprId) -> Result<ExprId> {
        let element = self.check(item)?;
        expect_type("sequence", &self.check(seq)?, &Type::seq(element))?;
        let ff = self.false_id;
        self.seq_case(seq, ff, move |arena, head, tail| {
            let here = arena.eq(head, item)?;
            let rest = arena.seq_contains(tail, item)?;
            arena.or(here, rest)
        })
    }

    // Maps

    pub fn map_empty(&self, key: Type, value: Type) -> ExprId {
        self.push(Node::MapEmpty, Type::map(key, value))
    }

    fn map_types(&self, map: ExprId, key: ExprId) -> Result<(Type, Type, Type)> {
        let ty = self.check(map)?;
        match &ty {
            Type::Map(k, v) => {
                expect_type("map key", &self.check(key)?, k)?;
                let (k, v) = ((**k).clone(), (**v).clone());
                Ok((ty, k, v))
            }
            other => invalid(format!("map operation on {}", other)),
        }
    }

    pub fn map_set(&self, map: ExprId, key: ExprId, value: ExprId) -> Result<ExprId> {
        let (ty, _, v) = self.map_types(map, key)?;
        expect_type("map value", &self.check(value)?, &v)?;
        Ok(self.push(Node::MapSet(map, key, value), ty))
    }

    pub fn map_delete(&self, map: ExprId, key: ExprId) -> Result<ExprId> {
        let (ty, _, _) = self.map_types(map, key)?;
        Ok(self.push(Node::MapDelete(map, key), ty))
    }

    /// The value under `key`, if any.
    pub fn map_get(&self, map: ExprId, key: ExprId) -> Result<ExprId> {
        let (_, _, v) = self.map_types(map, key)?;
        Ok(self.push(Node::MapGet(map, key), Type::option(v)))
    }

    // Const-maps

    /// A const-map from one value per declared key, in key order.
    pub fn const_map(&self, ty: &Type, values: Vec<ExprId>) -> Result<ExprId> {
        let shape = match ty {
            Type::ConstMap(shape) => shape,
            other => return invalid(format!("{} is not a const-map type", other)),
        };
        if values.len() != shape.keys().len() {
            return invalid(format!(
                "const-map needs {} values, found {}",
                shape.keys().len(),
                values.len()
            ));
        }
        for v in &values {
            expect_type("const-map value", &self.check(*v)?, shape.value())?;
        }
        Ok(self.push(Node::ConstMap(values), ty.clone()))
    }

    fn const_map_shape(&self, map: ExprId, key: ExprId) -> Result<Arc<ConstMapShape>> {
        let shape = match self.check(map)? {
            Type::ConstMap(shape) => shape,
            other => return invalid(format!("const-map operation on {}", other)),
        };
        expect_type("const-map key", &self.check(key)?, shape.key())?;
        if let Node::Constant(k) = &self.get(key).node {
            if shape.key_index(k).is_none() {
                return invalid(format!("{} is not a declared key", k));
            }
        }
        Ok(shape)
    }

    /// Rebind a declared key. Setting an undeclared key leaves the map unchanged.
    pub fn const_map_set(&self, map: ExprId, key: ExprId, value: ExprId) -> Result<ExprId> {
        let shape = self.const_map_shape(map, key)?;
        expect_type("const-map value", &self.check(value)?, shape.value())?;
        Ok(self.push(Node::ConstMapSet(map, key, value), Type::ConstMap(shape)))
    }

    /// Look up a declared key. An undeclared key reads the default value.
    pub fn const_map_get(&self, map: ExprId, key: ExprId) -> Result<ExprId> {
        let shape = self.const_map_shape(map, key)?;
        Ok(self.push(Node::ConstMapGet(map, key), shape.value().clone()))
    }

    // Lambdas

    /// `(|param| body(param))(arg)`, with the body built immediately.
    pub fn apply<F>(&self, arg: ExprId, body: F) -> Result<ExprId>
    where
        F: FnOnce(&ExprArena, ExprId) -> Result<ExprId>,
    {
        let ty = self.check(arg)?;
        let (param, param_node) = self.argument(ty);
        let body = body(self, param_node)?;
        let result = self.check(body)?;
        Ok(self.push(Node::Apply { param, body, arg }, result))
    }

    /// A short label for a node, for logs.
    pub fn describe(&self, id: ExprId) -> String {
        let data = self.get(id);
        let label = match &data.node {
            Node::Constant(v) => format!("{}", v),
            Node::Arbitrary => "arbitrary".to_string(),
            Node::Argument(arg) => format!("arg{}", arg.0),
            Node::Unary(op, x) => format!("{:?}({:?})", op, x),
            Node::Binary(op, a, b) => format!("{:?}({:?}, {:?})", op, a, b),
            Node::If { guard, then, otherwise } => format!("if {:?} then {:?} else {:?}", guard, then, otherwise),
            Node::SeqCase { seq, .. } => format!("case {:?}", seq),
            Node::OptionCase { option, .. } => format!("case {:?}", option),
            other => {
                let s = format!("{:?}", other);
                s.split(['(', ' ', '{']).next().unwrap_or_default().to_string()
            }
        };
        format!("{:?} {} : {}", id, label, data.ty)
    }
}

/// Lifts a host value into IR nodes, following its type.
pub struct ConstantEmbedder<'a> {
    arena: &'a ExprArena,
    value: &'a Value,
}

impl ConstantEmbedder<'_> {
    fn nested(&self, value: &Value, ty: &Type) -> Result<ExprId> {
        traverse(
            &mut ConstantEmbedder {
                arena: self.arena,
                value,
            },
            ty,
        )
    }

    fn scalar(&self, ty: Type) -> Result<ExprId> {
        Ok(self.arena.scalar(self.value.clone(), ty))
    }
}

impl TypeVisitor for ConstantEmbedder<'_> {
    type Output = Result<ExprId>;

    fn visit_bool(&mut self) -> Result<ExprId> {
        self.scalar(Type::Bool)
    }

    fn visit_fixed(&mut self, width: u32, signed: bool) -> Result<ExprId> {
        self.scalar(Type::Fixed { width, signed })
    }

    fn visit_integer(&mut self) -> Result<ExprId> {
        self.scalar(Type::Integer)
    }

    fn visit_real(&mut self) -> Result<ExprId> {
        self.scalar(Type::Real)
    }

    fn visit_char(&mut self) -> Result<ExprId> {
        self.scalar(Type::Char)
    }

    fn visit_option(&mut self, inner: &Type) -> Result<ExprId> {
        match self.value {
            Value::Option(Some(v)) => {
                let x = self.nested(v, inner)?;
                self.arena.some(x)
            }
            _ => Ok(self.arena.none(inner.clone())),
        }
    }

    fn visit_tuple(&mut self, items: &[Type]) -> Result<ExprId> {
        let Value::Tuple(values) = self.value else {
            unreachable!()
        };
        let ids = values
            .iter()
            .zip(items)
            .map(|(v, t)| self.nested(v, t))
            .collect::<Result<Vec<_>>>()?;
        self.arena.tuple(ids)
    }

    fn visit_seq(&mut self, element: &Type) -> Result<ExprId> {
        let Value::Seq(values) = self.value else {
            unreachable!()
        };
        let ids = values
            .iter()
            .map(|v| self.nested(v, element))
            .collect::<Result<Vec<_>>>()?;
        self.arena.seq(element.clone(), &ids)
    }

    fn visit_map(&mut self, key: &Type, value: &Type) -> Result<ExprId> {
        let Value::Map(entries) = self.value else {
            unreachable!()
        };
        let mut map = self.arena.map_empty(key.clone(), value.clone());
        for (k, v) in entries {
            let k = self.nested(k, key)?;
            let v = self.nested(v, value)?;
            map = self.arena.map_set(map, k, v)?;
        }
        Ok(map)
    }

    fn visit_const_map(&mut self, shape: &Arc<ConstMapShape>) -> Result<ExprId> {
        let Value::ConstMap(entries) = self.value else {
            unreachable!()
        };
        let ids = entries
            .values()
            .map(|v| self.nested(v, shape.value()))
            .collect::<Result<Vec<_>>>()?;
        self.arena.const_map(&Type::ConstMap(shape.clone()), ids)
    }

    fn visit_record(&mut self, shape: &Arc<RecordShape>) -> Result<ExprId> {
        let Value::Record(record) = self.value else {
            unreachable!()
        };
        let ids = record
            .fields()
            .iter()
            .zip(shape.fields())
            .map(|(v, (_, t))| self.nested(v, t))
            .collect::<Result<Vec<_>>>()?;
        self.arena.record_from_values(shape, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_canonical_constants() {
        let arena = ExprArena::new();
        assert_eq!(arena.bool(true), arena.tt());
        assert_eq!(arena.constant(&Value::Bool(false), &Type::Bool).unwrap(), arena.ff());
        assert_eq!(arena.seq_empty(Type::u8()), arena.seq_empty(Type::u8()));
        assert_ne!(arena.seq_empty(Type::u8()), arena.seq_empty(Type::Bool));
    }

    #[test]
    fn test_operands_precede_parents() {
        let arena = ExprArena::new();
        let x = arena.arbitrary(Type::u8());
        let y = arena.u8(3);
        let sum = arena.add(x, y).unwrap();
        assert!(x < sum && y < sum);
    }

    #[test]
    fn test_type_errors() {
        let arena = ExprArena::new();
        let b = arena.arbitrary(Type::Bool);
        let n = arena.arbitrary(Type::u8());
        let i = arena.integer(3);
        assert!(matches!(arena.add(b, b), Err(Error::InvalidArgument(_))));
        assert!(arena.add(n, i).is_err());
        assert!(arena.bit_and(i, i).is_err());
        assert!(arena.and(b, n).is_err());
        assert!(arena.lt(b, b).is_err());
        assert!(arena.if_then_else(n, b, b).is_err());
        assert!(arena.cast(b, Type::u8()).is_err());
    }

    #[test]
    fn test_foreign_handle() {
        let a = ExprArena::new();
        let b = ExprArena::new();
        let x = a.arbitrary(Type::Bool);
        assert!(b.not(x).is_err());
        assert!(b.check(x).is_err());
    }

    #[test]
    fn test_character_range() {
        let arena = ExprArena::new();
        assert!(arena.char('é').is_ok());
        assert!(arena.constant(&Value::Char(MAX_CHAR + 1), &Type::Char).is_err());
        assert!(arena.string("\u{10FFFF}").is_err());
        assert!(arena.string("hello").is_ok());
    }

    #[test]
    fn test_records() {
        let arena = ExprArena::new();
        let ty = Type::record("P", vec![("x".into(), Type::u8()), ("y".into(), Type::Bool)]).unwrap();
        let x = arena.u8(1);
        let t = arena.tt();
        let p = arena.record(&ty, vec![("y", t), ("x", x)]).unwrap();
        assert_eq!(arena.type_of(arena.get_field(p, "x").unwrap()), Type::u8());
        assert!(arena.get_field(p, "z").is_err());
        assert!(arena.with_field(p, "x", t).is_err());
        assert!(arena.record(&ty, vec![("x", x)]).is_err());
    }

    #[test]
    fn test_zero_width_rejected() {
        let arena = ExprArena::new();
        let zero = Type::Fixed { width: 0, signed: false };
        let x = arena.arbitrary(zero.clone());
        assert!(arena.check(x).is_err());
        assert!(arena.add(x, x).is_err());
        let (_, p) = arena.argument(Type::seq(zero.clone()));
        assert!(arena.check(p).is_err());
        let y = arena.u8(1);
        assert!(arena.cast(y, zero).is_err());
    }

    #[test]
    fn test_map_operation_types() {
        let arena = ExprArena::new();
        let m = arena.map_empty(Type::u8(), Type::Bool);
        let k = arena.u8(7);
        let t = arena.tt();
        let set = arena.map_set(m, k, t).unwrap();
        assert_eq!(arena.type_of(set), Type::map(Type::u8(), Type::Bool));
        let got = arena.map_get(set, k).unwrap();
        assert_eq!(arena.type_of(got), Type::option(Type::Bool));
        let deleted = arena.map_delete(set, k).unwrap();
        assert_eq!(arena.type_of(deleted), Type::map(Type::u8(), Type::Bool));
        assert!(arena.map_set(m, t, t).is_err());
        assert!(arena.map_set(m, k, k).is_err());
        assert!(arena.map_get(k, k).is_err());
    }

    #[test]
    fn test_const_map_keys() {
        let arena = ExprArena::new();
        let keys = vec![Value::Char('a' as u32), Value::Char('b' as u32)];
        let ty = Type::const_map(Type::Char, keys, Type::u8()).unwrap();
        let zero = arena.u8(0);
        let m = arena.const_map(&ty, vec![zero, zero]).unwrap();
        let a = arena.char('a').unwrap();
        let z = arena.char('z').unwrap();
        assert!(arena.const_map_get(m, a).is_ok());
        assert!(arena.const_map_get(m, z).is_err());
        assert!(arena.const_map(&ty, vec![zero]).is_err());
    }

    #[test]
    fn test_lazy_case_expansion() {
        let arena = ExprArena::new();
        let (_, xs) = arena.argument(Type::seq(Type::u8()));
        let len = arena.seq_length(xs).unwrap();
        let Node::SeqCase { cons, .. } = &arena.get(len).node else {
            panic!("expected a case node");
        };
        assert!(!cons.is_expanded());
        let before = arena.len();
        let body = arena.case_body(cons).unwrap();
        assert!(cons.is_expanded());
        assert!(arena.len() > before);
        let after = arena.len();
        assert_eq!(arena.case_body(cons).unwrap(), body);
        assert_eq!(arena.len(), after);
    }

    #[test]
    fn test_case_arm_type_checked() {
        let arena = ExprArena::new();
        let (_, xs) = arena.argument(Type::seq(Type::u8()));
        let ff = arena.ff();
        let bad = arena.seq_case(xs, ff, |arena, head, _| Ok(head)).unwrap();
        let Node::SeqCase { cons, .. } = &arena.get(bad).node else {
            panic!("expected a case node");
        };
        assert!(arena.case_body(cons).is_err());
    }

    #[test]
    fn test_constant_embedding_structure() {
        let arena = ExprArena::new();
        let ty = Type::option(Type::seq(Type::u8()));
        let value = Value::some(Value::Seq(vec![Value::fixed(1, 8, false).unwrap()]));
        let id = arena.constant(&value, &ty).unwrap();
        assert!(matches!(arena.get(id).node, Node::OptionSome(_)));
        assert_eq!(arena.type_of(id), ty);
        assert!(arena.constant(&value, &Type::Bool).is_err());
    }

    #[test]
    fn test_smart_logic() {
        let arena = ExprArena::new();
        let b = arena.arbitrary(Type::Bool);
        let t = arena.tt();
        let f = arena.ff();
        assert_eq!(arena.and(b, t).unwrap(), b);
        assert_eq!(arena.and(f, b).unwrap(), f);
        assert_eq!(arena.or(b, t).unwrap(), t);
        let nb = arena.not(b).unwrap();
        assert_eq!(arena.not(nb).unwrap(), b);
        assert_eq!(arena.if_then_else(t, b, nb).unwrap(), b);
    }
}
