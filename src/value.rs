//! Concrete host values and the [`Shaped`] bridge from native Rust types.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use num_bigint::BigInt;
use num_rational::BigRational;

use crate::error::{Error, Result};
use crate::fixed::FixedInt;
use crate::types::{RecordShape, Type, MAX_CHAR};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Bool(bool),
    Fixed(FixedInt),
    Integer(BigInt),
    Real(BigRational),
    Char(u32),
    Option(Option<Box<Value>>),
    Tuple(Vec<Value>),
    Seq(Vec<Value>),
    Map(BTreeMap<Value, Value>),
    /// Always holds every declared key of its type.
    ConstMap(BTreeMap<Value, Value>),
    Record(RecordValue),
}

/// Field values stored in the order of the shape's sorted field list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordValue {
    shape: Arc<RecordShape>,
    fields: Vec<Value>,
}

impl RecordValue {
    /// Build from values already ordered like `shape.fields()`.
    pub fn new(shape: Arc<RecordShape>, fields: Vec<Value>) -> Self {
        assert_eq!(shape.fields().len(), fields.len(), "Record arity mismatch");
        Self { shape, fields }
    }

    /// Build from named values in any order.
    pub fn from_named(shape: Arc<RecordShape>, named: Vec<(String, Value)>) -> Result<Self> {
        let mut slots: Vec<Option<Value>> = vec![None; shape.fields().len()];
        for (name, value) in named {
            let index = shape.field_index(&name).ok_or_else(|| {
                Error::InvalidArgument(format!("record {} has no field {}", shape.name(), name))
            })?;
            slots[index] = Some(value);
        }
        let fields = slots
            .into_iter()
            .zip(shape.fields())
            .map(|(slot, (name, _))| {
                slot.ok_or_else(|| {
                    Error::InvalidArgument(format!("missing field {} of {}", name, shape.name()))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { shape, fields })
    }

    pub fn shape(&self) -> &Arc<RecordShape> {
        &self.shape
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Result<&Value> {
        self.shape
            .field_index(name)
            .map(|i| &self.fields[i])
            .ok_or_else(|| Error::Conversion(format!("no field {} in {}", name, self.shape.name())))
    }

    pub fn get(&self, index: usize) -> &Value {
        &self.fields[index]
    }

    pub fn with(&self, index: usize, value: Value) -> Self {
        let mut fields = self.fields.clone();
        fields[index] = value;
        Self {
            shape: self.shape.clone(),
            fields,
        }
    }
}

impl Value {
    pub fn fixed(value: i128, width: u32, signed: bool) -> Result<Value> {
        Ok(Value::Fixed(FixedInt::from_i128(value, width, signed)?))
    }

    pub fn string(s: &str) -> Value {
        Value::Seq(s.chars().map(|c| Value::Char(c as u32)).collect())
    }

    pub fn some(value: Value) -> Value {
        Value::Option(Some(Box::new(value)))
    }

    pub fn none() -> Value {
        Value::Option(None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_fixed(&self) -> Option<&FixedInt> {
        match self {
            Value::Fixed(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordValue> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Structural check that this value inhabits `ty`.
    pub fn conforms(&self, ty: &Type) -> bool {
        match (self, ty) {
            (Value::Bool(_), Type::Bool) => true,
            (Value::Fixed(x), Type::Fixed { width, signed }) => {
                x.width() == *width && x.is_signed() == *signed
            }
            (Value::Integer(_), Type::Integer) => true,
            (Value::Real(_), Type::Real) => true,
            (Value::Char(c), Type::Char) => *c <= MAX_CHAR,
            (Value::Option(None), Type::Option(_)) => true,
            (Value::Option(Some(v)), Type::Option(inner)) => v.conforms(inner),
            (Value::Tuple(items), Type::Tuple(types)) => {
                items.len() == types.len() && items.iter().zip(types).all(|(v, t)| v.conforms(t))
            }
            (Value::Seq(items), Type::Seq(element)) => items.iter().all(|v| v.conforms(element)),
            (Value::Map(entries), Type::Map(k, v)) => entries
                .iter()
                .all(|(key, value)| key.conforms(k) && value.conforms(v)),
            (Value::ConstMap(entries), Type::ConstMap(shape)) => {
                entries.len() == shape.keys().len()
                    && entries
                        .iter()
                        .zip(shape.keys())
                        .all(|((key, value), declared)| {
                            key == declared && value.conforms(shape.value())
                        })
            }
            (Value::Record(r), Type::Record(shape)) => {
                r.shape() == shape
                    && r
                        .fields()
                        .iter()
                        .zip(shape.fields())
                        .all(|(v, (_, t))| v.conforms(t))
            }
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Fixed(x) => write!(f, "{}", x),
            Value::Integer(x) => write!(f, "{}", x),
            Value::Real(x) => write!(f, "{}", x),
            Value::Char(c) => match char::from_u32(*c) {
                Some(ch) => write!(f, "{:?}", ch),
                None => write!(f, "'\\u{{{:x}}}'", c),
            },
            Value::Option(None) => write!(f, "None"),
            Value::Option(Some(v)) => write!(f, "Some({})", v),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) | Value::ConstMap(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Record(r) => {
                write!(f, "{} {{ ", r.shape().name())?;
                for (i, ((name, _), v)) in r.shape().fields().iter().zip(r.fields()).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, v)?;
                }
                write!(f, " }}")
            }
        }
    }
}

/// A native Rust type with a fixed shape.
pub trait Shaped: Sized {
    fn shape() -> Type;
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value, expected: &Type) -> Result<T> {
    Err(Error::Conversion(format!("{} is not a {}", value, expected)))
}

macro_rules! shaped_native_int {
    ($($t:ty => $width:expr, $signed:expr;)*) => {
        $(
            impl Shaped for $t {
                fn shape() -> Type {
                    Type::Fixed { width: $width, signed: $signed }
                }

                fn to_value(&self) -> Value {
                    Value::Fixed(FixedInt::wrapping_from(&BigInt::from(*self), $width, $signed))
                }

                fn from_value(value: &Value) -> Result<Self> {
                    match value {
                        Value::Fixed(x) if x.width() == $width && x.is_signed() == $signed => x
                            .to_i128()
                            .and_then(|v| <$t>::try_from(v).ok())
                            .ok_or_else(|| Error::Conversion(format!("{} out of range", x))),
                        _ => mismatch(value, &Self::shape()),
                    }
                }
            }
        )*
    };
}

shaped_native_int! {
    u8 => 8, false;
    u16 => 16, false;
    u32 => 32, false;
    u64 => 64, false;
    i8 => 8, true;
    i16 => 16, true;
    i32 => 32, true;
    i64 => 64, true;
}

impl Shaped for bool {
    fn shape() -> Type {
        Type::Bool
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value.as_bool().map_or_else(|| mismatch(value, &Type::Bool), Ok)
    }
}

impl Shaped for BigInt {
    fn shape() -> Type {
        Type::Integer
    }

    fn to_value(&self) -> Value {
        Value::Integer(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(x) => Ok(x.clone()),
            _ => mismatch(value, &Type::Integer),
        }
    }
}

impl Shaped for BigRational {
    fn shape() -> Type {
        Type::Real
    }

    fn to_value(&self) -> Value {
        Value::Real(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Real(x) => Ok(x.clone()),
            _ => mismatch(value, &Type::Real),
        }
    }
}

impl Shaped for char {
    fn shape() -> Type {
        Type::Char
    }

    fn to_value(&self) -> Value {
        Value::Char(*self as u32)
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Char(c) => char::from_u32(*c)
                .ok_or_else(|| Error::Conversion(format!("{:#x} is not a scalar value", c))),
            _ => mismatch(value, &Type::Char),
        }
    }
}

impl Shaped for String {
    fn shape() -> Type {
        Type::string()
    }

    fn to_value(&self) -> Value {
        Value::string(self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Seq(items) => items.iter().map(char::from_value).collect(),
            _ => mismatch(value, &Type::string()),
        }
    }
}

impl<T: Shaped> Shaped for Option<T> {
    fn shape() -> Type {
        Type::option(T::shape())
    }

    fn to_value(&self) -> Value {
        Value::Option(self.as_ref().map(|v| Box::new(v.to_value())))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Option(None) => Ok(None),
            Value::Option(Some(v)) => Ok(Some(T::from_value(v)?)),
            _ => mismatch(value, &Self::shape()),
        }
    }
}

impl<T: Shaped> Shaped for Vec<T> {
    fn shape() -> Type {
        Type::seq(T::shape())
    }

    fn to_value(&self) -> Value {
        Value::Seq(self.iter().map(Shaped::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Seq(items) => items.iter().map(T::from_value).collect(),
            _ => mismatch(value, &Self::shape()),
        }
    }
}

impl<K: Shaped + Ord, V: Shaped> Shaped for BTreeMap<K, V> {
    fn shape() -> Type {
        Type::map(K::shape(), V::shape())
    }

    fn to_value(&self) -> Value {
        Value::Map(self.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect())
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            _ => mismatch(value, &Self::shape()),
        }
    }
}

macro_rules! shaped_tuple {
    ($(($($name:ident : $index:tt),+))*) => {
        $(
            impl<$($name: Shaped),+> Shaped for ($($name,)+) {
                fn shape() -> Type {
                    Type::Tuple(vec![$($name::shape()),+])
                }

                fn to_value(&self) -> Value {
                    Value::Tuple(vec![$(self.$index.to_value()),+])
                }

                fn from_value(value: &Value) -> Result<Self> {
                    match value {
                        Value::Tuple(items) if items.len() == [$($index),+].len() => {
                            Ok(($($name::from_value(&items[$index])?,)+))
                        }
                        _ => mismatch(value, &Self::shape()),
                    }
                }
            }
        )*
    };
}

shaped_tuple! {
    (A: 0, B: 1)
    (A: 0, B: 1, C: 2)
    (A: 0, B: 1, C: 2, D: 3)
}

/// Implement [`Shaped`] for a plain struct whose fields are all [`Shaped`].
///
/// ```
/// use triform::shaped_record;
/// use triform::value::Shaped;
///
/// #[derive(Debug, PartialEq)]
/// struct Packet {
///     dst: u32,
///     ttl: u8,
/// }
///
/// shaped_record!(Packet { ttl: u8, dst: u32 });
///
/// let p = Packet { dst: 7, ttl: 64 };
/// assert_eq!(Packet::from_value(&p.to_value()).unwrap(), p);
/// ```
#[macro_export]
macro_rules! shaped_record {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        impl $crate::value::Shaped for $name {
            fn shape() -> $crate::types::Type {
                $crate::types::Type::Record(::std::sync::Arc::new($crate::types::RecordShape::of(
                    stringify!($name),
                    vec![$((
                        stringify!($field).to_string(),
                        <$ty as $crate::value::Shaped>::shape(),
                    )),*],
                )))
            }

            fn to_value(&self) -> $crate::value::Value {
                let shape = match <Self as $crate::value::Shaped>::shape() {
                    $crate::types::Type::Record(shape) => shape,
                    _ => unreachable!(),
                };
                let fields = shape
                    .fields()
                    .iter()
                    .map(|(name, _)| match name.as_str() {
                        $(stringify!($field) => $crate::value::Shaped::to_value(&self.$field),)*
                        _ => unreachable!(),
                    })
                    .collect();
                $crate::value::Value::Record($crate::value::RecordValue::new(shape, fields))
            }

            fn from_value(value: &$crate::value::Value) -> $crate::error::Result<Self> {
                let record = value.as_record().ok_or_else(|| {
                    $crate::error::Error::Conversion(format!(
                        "{} is not a {}",
                        value,
                        stringify!($name)
                    ))
                })?;
                Ok($name {
                    $($field: <$ty as $crate::value::Shaped>::from_value(
                        record.field(stringify!($field))?,
                    )?,)*
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[derive(Debug, PartialEq)]
    struct Header {
        ttl: u8,
        flags: Vec<bool>,
        label: Option<String>,
    }

    shaped_record!(Header {
        ttl: u8,
        flags: Vec<bool>,
        label: Option<String>,
    });

    #[test]
    fn test_native_ints() {
        assert_eq!(200u8.to_value(), Value::fixed(200, 8, false).unwrap());
        assert_eq!((-3i16).to_value(), Value::fixed(-3, 16, true).unwrap());
        assert_eq!(u32::from_value(&u32::MAX.to_value()).unwrap(), u32::MAX);
        assert!(u8::from_value(&Value::Bool(true)).is_err());
    }

    #[test]
    fn test_record_roundtrip_and_order() {
        let h = Header {
            ttl: 5,
            flags: vec![true, false],
            label: Some("eth0".to_string()),
        };
        let v = h.to_value();
        assert!(v.conforms(&Header::shape()));
        let record = v.as_record().unwrap();
        // Fields are stored sorted by name.
        assert_eq!(record.shape().fields()[0].0, "flags");
        assert_eq!(record.shape().fields()[2].0, "ttl");
        assert_eq!(Header::from_value(&v).unwrap(), h);
    }

    #[test]
    fn test_tuple_and_map() {
        let mut m = BTreeMap::new();
        m.insert(1u8, (true, 'x'));
        let v = m.to_value();
        assert!(v.conforms(&BTreeMap::<u8, (bool, char)>::shape()));
        assert_eq!(BTreeMap::<u8, (bool, char)>::from_value(&v).unwrap(), m);
    }

    #[test]
    fn test_from_named_missing_field() {
        let shape = match Header::shape() {
            Type::Record(shape) => shape,
            _ => unreachable!(),
        };
        let res = RecordValue::from_named(shape, vec![("ttl".to_string(), 1u8.to_value())]);
        assert!(res.is_err());
    }

    #[test]
    fn test_char_range() {
        assert!(Value::Char(MAX_CHAR).conforms(&Type::Char));
        assert!(!Value::Char(MAX_CHAR + 1).conforms(&Type::Char));
    }
}
