//! Backend-neutral symbolic values.
//!
//! Scalars wrap a backend handle. Composites are spelled out structurally:
//! options and tuples become records (`{has_value, value}` and
//! `{item0, item1, ...}`), sequences are finite insertion lists of
//! `(presence guard, element)` pairs, const-maps hold one value per declared
//! key, and maps are a pair of backend arrays (presence and values).

use std::fmt::{Debug, Formatter};

use crate::error::{invalid, Result};
use crate::generate::default_value;
use crate::solver::Solver;
use crate::types::Type;
use crate::value::Value;

pub const HAS_VALUE: &str = "has_value";
pub const VALUE: &str = "value";

pub fn item_name(index: usize) -> String {
    format!("item{}", index)
}

pub enum SymbolicValue<S: Solver> {
    Bool(S::Bool),
    BitVec {
        value: S::BitVec,
        width: u32,
        signed: bool,
    },
    Int(S::Int),
    Real(S::Real),
    Char(S::Char),
    Seq {
        element: Type,
        items: Vec<(S::Bool, SymbolicValue<S>)>,
    },
    Map {
        key: Type,
        value: Type,
        present: S::Array,
        values: S::Array,
    },
    ConstMap(Vec<(Value, SymbolicValue<S>)>),
    Record(Vec<(String, SymbolicValue<S>)>),
}

impl<S: Solver> Clone for SymbolicValue<S> {
    fn clone(&self) -> Self {
        match self {
            SymbolicValue::Bool(b) => SymbolicValue::Bool(b.clone()),
            SymbolicValue::BitVec { value, width, signed } => SymbolicValue::BitVec {
                value: value.clone(),
                width: *width,
                signed: *signed,
            },
            SymbolicValue::Int(x) => SymbolicValue::Int(x.clone()),
            SymbolicValue::Real(x) => SymbolicValue::Real(x.clone()),
            SymbolicValue::Char(x) => SymbolicValue::Char(x.clone()),
            SymbolicValue::Seq { element, items } => SymbolicValue::Seq {
                element: element.clone(),
                items: items.clone(),
            },
            SymbolicValue::Map {
                key,
                value,
                present,
                values,
            } => SymbolicValue::Map {
                key: key.clone(),
                value: value.clone(),
                present: present.clone(),
                values: values.clone(),
            },
            SymbolicValue::ConstMap(entries) => SymbolicValue::ConstMap(entries.clone()),
            SymbolicValue::Record(fields) => SymbolicValue::Record(fields.clone()),
        }
    }
}

impl<S: Solver> Debug for SymbolicValue<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolicValue::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            SymbolicValue::BitVec { value, width, signed } => f
                .debug_struct("BitVec")
                .field("value", value)
                .field("width", width)
                .field("signed", signed)
                .finish(),
            SymbolicValue::Int(x) => f.debug_tuple("Int").field(x).finish(),
            SymbolicValue::Real(x) => f.debug_tuple("Real").field(x).finish(),
            SymbolicValue::Char(x) => f.debug_tuple("Char").field(x).finish(),
            SymbolicValue::Seq { items, .. } => f.debug_list().entries(items.iter()).finish(),
            SymbolicValue::Map { present, values, .. } => f
                .debug_struct("Map")
                .field("present", present)
                .field("values", values)
                .finish(),
            SymbolicValue::ConstMap(entries) => f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish(),
            SymbolicValue::Record(fields) => f.debug_map().entries(fields.iter().map(|(k, v)| (k, v))).finish(),
        }
    }
}

impl<S: Solver> SymbolicValue<S> {
    pub fn option(has_value: S::Bool, value: SymbolicValue<S>) -> Self {
        SymbolicValue::Record(vec![
            (HAS_VALUE.to_string(), SymbolicValue::Bool(has_value)),
            (VALUE.to_string(), value),
        ])
    }

    pub fn tuple(items: Vec<SymbolicValue<S>>) -> Self {
        SymbolicValue::Record(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (item_name(i), v))
                .collect(),
        )
    }

    pub fn as_bool(&self) -> &S::Bool {
        match self {
            SymbolicValue::Bool(b) => b,
            other => unreachable!("expected a boolean, found {:?}", other),
        }
    }

    pub fn field(&self, index: usize) -> &SymbolicValue<S> {
        match self {
            SymbolicValue::Record(fields) => &fields[index].1,
            other => unreachable!("expected a record, found {:?}", other),
        }
    }

    pub fn with_field(&self, index: usize, value: SymbolicValue<S>) -> Self {
        match self {
            SymbolicValue::Record(fields) => {
                let mut fields = fields.clone();
                fields[index].1 = value;
                SymbolicValue::Record(fields)
            }
            other => unreachable!("expected a record, found {:?}", other),
        }
    }

    /// Embed a concrete value of type `ty`.
    pub fn lift(solver: &S, value: &Value, ty: &Type) -> Result<Self> {
        Ok(match (value, ty) {
            (Value::Bool(b), Type::Bool) => SymbolicValue::Bool(solver.bool_const(*b)),
            (Value::Fixed(x), Type::Fixed { width, signed }) => SymbolicValue::BitVec {
                value: solver.bitvec_const(x),
                width: *width,
                signed: *signed,
            },
            (Value::Integer(x), Type::Integer) => SymbolicValue::Int(solver.int_const(x)?),
            (Value::Real(x), Type::Real) => SymbolicValue::Real(solver.real_const(x)?),
            (Value::Char(c), Type::Char) => SymbolicValue::Char(solver.char_const(*c)),
            (Value::Option(inner), Type::Option(t)) => {
                let value = match inner {
                    Some(v) => Self::lift(solver, v, t)?,
                    None => Self::lift(solver, &default_value(t), t)?,
                };
                Self::option(solver.bool_const(inner.is_some()), value)
            }
            (Value::Tuple(items), Type::Tuple(types)) if items.len() == types.len() => Self::tuple(
                items
                    .iter()
                    .zip(types)
                    .map(|(v, t)| Self::lift(solver, v, t))
                    .collect::<Result<_>>()?,
            ),
            (Value::Seq(items), Type::Seq(element)) => SymbolicValue::Seq {
                element: (**element).clone(),
                items: items
                    .iter()
                    .map(|v| Ok((solver.bool_const(true), Self::lift(solver, v, element)?)))
                    .collect::<Result<_>>()?,
            },
            (Value::Map(entries), Type::Map(key, value)) => {
                let mut present = solver.array_const(key, &SymbolicValue::Bool(solver.bool_const(false)))?;
                let mut values = solver.array_const(key, &Self::lift(solver, &default_value(value), value)?)?;
                for (k, v) in entries {
                    let k = Self::lift(solver, k, key)?;
                    present = solver.array_store(&present, &k, &SymbolicValue::Bool(solver.bool_const(true)))?;
                    values = solver.array_store(&values, &k, &Self::lift(solver, v, value)?)?;
                }
                SymbolicValue::Map {
                    key: (**key).clone(),
                    value: (**value).clone(),
                    present,
                    values,
                }
            }
            (Value::ConstMap(entries), Type::ConstMap(shape)) => SymbolicValue::ConstMap(
                shape
                    .keys()
                    .iter()
                    .map(|k| {
                        let v = match entries.get(k) {
                            Some(v) => Self::lift(solver, v, shape.value())?,
                            None => Self::lift(solver, &default_value(shape.value()), shape.value())?,
                        };
                        Ok((k.clone(), v))
                    })
                    .collect::<Result<_>>()?,
            ),
            (Value::Record(r), Type::Record(shape)) if r.shape() == shape => SymbolicValue::Record(
                shape
                    .fields()
                    .iter()
                    .zip(r.fields())
                    .map(|((name, t), v)| Ok((name.clone(), Self::lift(solver, v, t)?)))
                    .collect::<Result<_>>()?,
            ),
            _ => return invalid(format!("value {} is not a {}", value, ty)),
        })
    }

    /// `if guard { a } else { b }`, recursively over the shape.
    pub fn merge(solver: &S, guard: &S::Bool, a: &Self, b: &Self) -> Result<Self> {
        Ok(match (a, b) {
            (SymbolicValue::Bool(x), SymbolicValue::Bool(y)) => SymbolicValue::Bool(solver.bool_ite(guard, x, y)),
            (SymbolicValue::BitVec { value: x, width, signed }, SymbolicValue::BitVec { value: y, .. }) => {
                SymbolicValue::BitVec {
                    value: solver.bv_ite(guard, x, y),
                    width: *width,
                    signed: *signed,
                }
            }
            (SymbolicValue::Int(x), SymbolicValue::Int(y)) => SymbolicValue::Int(solver.int_ite(guard, x, y)),
            (SymbolicValue::Real(x), SymbolicValue::Real(y)) => SymbolicValue::Real(solver.real_ite(guard, x, y)),
            (SymbolicValue::Char(x), SymbolicValue::Char(y)) => SymbolicValue::Char(solver.char_ite(guard, x, y)),
            (SymbolicValue::Seq { element, items: xs }, SymbolicValue::Seq { items: ys, .. }) => {
                let n = xs.len().max(ys.len());
                let mut items = Vec::with_capacity(n);
                let absent = (
                    solver.bool_const(false),
                    Self::lift(solver, &default_value(element), element)?,
                );
                for i in 0..n {
                    let (gx, ex) = xs.get(i).unwrap_or(&absent);
                    let (gy, ey) = ys.get(i).unwrap_or(&absent);
                    items.push((solver.bool_ite(guard, gx, gy), Self::merge(solver, guard, ex, ey)?));
                }
                SymbolicValue::Seq {
                    element: element.clone(),
                    items,
                }
            }
            (
                SymbolicValue::Map {
                    key,
                    value,
                    present: px,
                    values: vx,
                },
                SymbolicValue::Map {
                    present: py, values: vy, ..
                },
            ) => SymbolicValue::Map {
                key: key.clone(),
                value: value.clone(),
                present: solver.array_ite(guard, px, py),
                values: solver.array_ite(guard, vx, vy),
            },
            (SymbolicValue::ConstMap(xs), SymbolicValue::ConstMap(ys)) => SymbolicValue::ConstMap(
                xs.iter()
                    .zip(ys)
                    .map(|((k, x), (_, y))| Ok((k.clone(), Self::merge(solver, guard, x, y)?)))
                    .collect::<Result<_>>()?,
            ),
            (SymbolicValue::Record(xs), SymbolicValue::Record(ys)) => SymbolicValue::Record(
                xs.iter()
                    .zip(ys)
                    .map(|((name, x), (_, y))| Ok((name.clone(), Self::merge(solver, guard, x, y)?)))
                    .collect::<Result<_>>()?,
            ),
            (a, b) => unreachable!("merging {:?} with {:?}", a, b),
        })
    }

    /// Structural equality. Scalars use the backend's native equality.
    pub fn equal(solver: &S, a: &Self, b: &Self) -> Result<S::Bool> {
        Ok(match (a, b) {
            (SymbolicValue::Bool(x), SymbolicValue::Bool(y)) => solver.iff(x, y),
            (SymbolicValue::BitVec { value: x, .. }, SymbolicValue::BitVec { value: y, .. }) => solver.bv_eq(x, y),
            (SymbolicValue::Int(x), SymbolicValue::Int(y)) => solver.int_eq(x, y),
            (SymbolicValue::Real(x), SymbolicValue::Real(y)) => solver.real_eq(x, y),
            (SymbolicValue::Char(x), SymbolicValue::Char(y)) => solver.char_eq(x, y),
            (SymbolicValue::Seq { items: xs, .. }, SymbolicValue::Seq { items: ys, .. }) => seq_equal(solver, xs, ys)?,
            (
                SymbolicValue::Map {
                    present: px, values: vx, ..
                },
                SymbolicValue::Map {
                    present: py, values: vy, ..
                },
            ) => solver.and(&[solver.array_eq(px, py), solver.array_eq(vx, vy)]),
            (SymbolicValue::ConstMap(xs), SymbolicValue::ConstMap(ys)) => {
                let parts = xs
                    .iter()
                    .zip(ys)
                    .map(|((_, x), (_, y))| Self::equal(solver, x, y))
                    .collect::<Result<Vec<_>>>()?;
                solver.and(&parts)
            }
            (SymbolicValue::Record(xs), SymbolicValue::Record(ys)) => {
                let parts = xs
                    .iter()
                    .zip(ys)
                    .map(|((_, x), (_, y))| Self::equal(solver, x, y))
                    .collect::<Result<Vec<_>>>()?;
                solver.and(&parts)
            }
            (a, b) => unreachable!("comparing {:?} with {:?}", a, b),
        })
    }

    /// `a < b` (or `a <= b` when not `strict`) on ordered scalars.
    pub fn less(solver: &S, a: &Self, b: &Self, strict: bool) -> S::Bool {
        match (a, b) {
            (SymbolicValue::BitVec { value: x, signed, .. }, SymbolicValue::BitVec { value: y, .. }) => {
                if strict {
                    solver.bv_lt(x, y, *signed)
                } else {
                    solver.bv_le(x, y, *signed)
                }
            }
            (SymbolicValue::Int(x), SymbolicValue::Int(y)) => {
                if strict {
                    solver.int_lt(x, y)
                } else {
                    solver.int_le(x, y)
                }
            }
            (SymbolicValue::Real(x), SymbolicValue::Real(y)) => {
                if strict {
                    solver.real_lt(x, y)
                } else {
                    solver.real_le(x, y)
                }
            }
            (SymbolicValue::Char(x), SymbolicValue::Char(y)) => {
                if strict {
                    solver.char_lt(x, y)
                } else {
                    solver.char_le(x, y)
                }
            }
            (a, b) => unreachable!("ordering {:?} against {:?}", a, b),
        }
    }
}

/// Equality of two insertion lists. `eq[i][j]` says the present elements of
/// `xs[i..]` and `ys[j..]` agree; absent entries on either side are skipped.
fn seq_equal<S: Solver>(
    solver: &S,
    xs: &[(S::Bool, SymbolicValue<S>)],
    ys: &[(S::Bool, SymbolicValue<S>)],
) -> Result<S::Bool> {
    let (n, m) = (xs.len(), ys.len());
    let mut eq: Vec<Vec<Option<S::Bool>>> = vec![vec![None; m + 1]; n + 1];
    for i in (0..=n).rev() {
        for j in (0..=m).rev() {
            let cell = match (i == n, j == m) {
                (true, true) => solver.bool_const(true),
                (true, false) => {
                    let rest = eq[i][j + 1].clone().unwrap_or_else(|| unreachable!());
                    solver.and(&[solver.not(&ys[j].0), rest])
                }
                (false, true) => {
                    let rest = eq[i + 1][j].clone().unwrap_or_else(|| unreachable!());
                    solver.and(&[solver.not(&xs[i].0), rest])
                }
                (false, false) => {
                    let both = solver.and(&[
                        SymbolicValue::equal(solver, &xs[i].1, &ys[j].1)?,
                        eq[i + 1][j + 1].clone().unwrap_or_else(|| unreachable!()),
                    ]);
                    let skip_y = eq[i][j + 1].clone().unwrap_or_else(|| unreachable!());
                    let skip_x = eq[i + 1][j].clone().unwrap_or_else(|| unreachable!());
                    let present_x = solver.bool_ite(&ys[j].0, &both, &skip_y);
                    solver.bool_ite(&xs[i].0, &present_x, &skip_x)
                }
            };
            eq[i][j] = Some(cell);
        }
    }
    Ok(eq[0][0].clone().unwrap_or_else(|| unreachable!()))
}
