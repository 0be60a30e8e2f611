//! Closed shape enumeration for host values and the traversal that drives every
//! structural algorithm over it.
//!
//! Every supported host type maps to exactly one [`Type`]. Algorithms that must
//! work for arbitrary nested data (default values, random values, fresh
//! symbolic variables, constant embedding) are written once as a
//! [`TypeVisitor`] and dispatched through [`traverse`].

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::error::{invalid, Result};
use crate::value::Value;

/// Largest representable character code point.
pub const MAX_CHAR: u32 = 0x2FFFF;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    Bool,
    /// Fixed-width two's-complement integer.
    Fixed { width: u32, signed: bool },
    /// Arbitrary-precision integer.
    Integer,
    Real,
    Char,
    Option(Box<Type>),
    Tuple(Vec<Type>),
    Seq(Box<Type>),
    Map(Box<Type>, Box<Type>),
    ConstMap(Arc<ConstMapShape>),
    Record(Arc<RecordShape>),
}

/// A map whose key set is fixed when the type is built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstMapShape {
    key: Type,
    keys: Vec<Value>,
    value: Type,
}

impl ConstMapShape {
    pub fn key(&self) -> &Type {
        &self.key
    }

    /// Declared keys, sorted and deduplicated.
    pub fn keys(&self) -> &[Value] {
        &self.keys
    }

    pub fn value(&self) -> &Type {
        &self.value
    }

    pub fn key_index(&self, key: &Value) -> Option<usize> {
        self.keys.binary_search(key).ok()
    }
}

/// A named record with fields sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordShape {
    name: String,
    fields: Vec<(String, Type)>,
}

impl RecordShape {
    pub fn new(name: impl Into<String>, mut fields: Vec<(String, Type)>) -> Result<Self> {
        let name = name.into();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(w) = fields.windows(2).find(|w| w[0].0 == w[1].0) {
            return invalid(format!("record {} declares field {} twice", name, w[0].0));
        }
        Ok(Self { name, fields })
    }

    /// Like [`RecordShape::new`], for field lists known to be distinct.
    ///
    /// # Panics
    ///
    /// Panics on duplicate field names.
    pub fn of(name: &str, fields: Vec<(String, Type)>) -> Self {
        match Self::new(name, fields) {
            Ok(shape) => shape,
            Err(e) => panic!("{}", e),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[(String, Type)] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.binary_search_by(|(n, _)| n.as_str().cmp(name)).ok()
    }

    pub fn field_type(&self, index: usize) -> &Type {
        &self.fields[index].1
    }
}

impl Type {
    pub fn fixed(width: u32, signed: bool) -> Result<Type> {
        if width == 0 {
            return invalid("fixed-width integers need a positive width");
        }
        Ok(Type::Fixed { width, signed })
    }

    pub fn u8() -> Type {
        Type::Fixed { width: 8, signed: false }
    }
    pub fn u16() -> Type {
        Type::Fixed { width: 16, signed: false }
    }
    pub fn u32() -> Type {
        Type::Fixed { width: 32, signed: false }
    }
    pub fn u64() -> Type {
        Type::Fixed { width: 64, signed: false }
    }
    pub fn i8() -> Type {
        Type::Fixed { width: 8, signed: true }
    }
    pub fn i16() -> Type {
        Type::Fixed { width: 16, signed: true }
    }
    pub fn i32() -> Type {
        Type::Fixed { width: 32, signed: true }
    }
    pub fn i64() -> Type {
        Type::Fixed { width: 64, signed: true }
    }

    pub fn option(inner: Type) -> Type {
        Type::Option(Box::new(inner))
    }

    pub fn tuple(items: Vec<Type>) -> Type {
        Type::Tuple(items)
    }

    pub fn seq(element: Type) -> Type {
        Type::Seq(Box::new(element))
    }

    /// Strings are sequences of characters.
    pub fn string() -> Type {
        Type::seq(Type::Char)
    }

    pub fn map(key: Type, value: Type) -> Type {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn const_map(key: Type, keys: Vec<Value>, value: Type) -> Result<Type> {
        if let Some(bad) = keys.iter().find(|k| !k.conforms(&key)) {
            return invalid(format!("const-map key {} is not a {}", bad, key));
        }
        let mut keys = keys;
        keys.sort();
        keys.dedup();
        Ok(Type::ConstMap(Arc::new(ConstMapShape { key, keys, value })))
    }

    pub fn record(name: impl Into<String>, fields: Vec<(String, Type)>) -> Result<Type> {
        Ok(Type::Record(Arc::new(RecordShape::new(name, fields)?)))
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Type::Fixed { .. })
    }

    /// Shapes supporting `+` and `-`.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Fixed { .. } | Type::Integer | Type::Real)
    }

    /// Shapes supporting `<` and `<=`.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            Type::Fixed { .. } | Type::Integer | Type::Real | Type::Char
        )
    }

    /// Shapes represented by a single backend handle.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Type::Bool | Type::Fixed { .. } | Type::Integer | Type::Real | Type::Char
        )
    }

    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Seq(element) => Some(element),
            _ => None,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Fixed { width, signed } => {
                write!(f, "{}{}", if *signed { "i" } else { "u" }, width)
            }
            Type::Integer => write!(f, "int"),
            Type::Real => write!(f, "real"),
            Type::Char => write!(f, "char"),
            Type::Option(inner) => write!(f, "option<{}>", inner),
            Type::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Type::Seq(element) => write!(f, "seq<{}>", element),
            Type::Map(k, v) => write!(f, "map<{}, {}>", k, v),
            Type::ConstMap(shape) => {
                write!(f, "cmap<{}, {}>[{}]", shape.key, shape.value, shape.keys.len())
            }
            Type::Record(shape) => write!(f, "{}", shape.name),
        }
    }
}

/// One method per shape. Composite shapes hand their component types to the
/// visitor, which recurses with [`traverse`] as needed.
pub trait TypeVisitor {
    type Output;

    fn visit_bool(&mut self) -> Self::Output;
    fn visit_fixed(&mut self, width: u32, signed: bool) -> Self::Output;
    fn visit_integer(&mut self) -> Self::Output;
    fn visit_real(&mut self) -> Self::Output;
    fn visit_char(&mut self) -> Self::Output;
    fn visit_option(&mut self, inner: &Type) -> Self::Output;
    fn visit_tuple(&mut self, items: &[Type]) -> Self::Output;
    fn visit_seq(&mut self, element: &Type) -> Self::Output;
    fn visit_map(&mut self, key: &Type, value: &Type) -> Self::Output;
    fn visit_const_map(&mut self, shape: &Arc<ConstMapShape>) -> Self::Output;
    fn visit_record(&mut self, shape: &Arc<RecordShape>) -> Self::Output;
}

pub fn traverse<V>(visitor: &mut V, ty: &Type) -> V::Output
where
    V: TypeVisitor + ?Sized,
{
    match ty {
        Type::Bool => visitor.visit_bool(),
        Type::Fixed { width, signed } => visitor.visit_fixed(*width, *signed),
        Type::Integer => visitor.visit_integer(),
        Type::Real => visitor.visit_real(),
        Type::Char => visitor.visit_char(),
        Type::Option(inner) => visitor.visit_option(inner),
        Type::Tuple(items) => visitor.visit_tuple(items),
        Type::Seq(element) => visitor.visit_seq(element),
        Type::Map(key, value) => visitor.visit_map(key, value),
        Type::ConstMap(shape) => visitor.visit_const_map(shape),
        Type::Record(shape) => visitor.visit_record(shape),
    }
}

/// Rejects shapes the validating constructors would not have built, such as
/// a zero-width integer assembled from the public variant directly.
struct WellFormed;

impl TypeVisitor for WellFormed {
    type Output = Result<()>;

    fn visit_bool(&mut self) -> Result<()> {
        Ok(())
    }

    fn visit_fixed(&mut self, width: u32, signed: bool) -> Result<()> {
        Type::fixed(width, signed).map(|_| ())
    }

    fn visit_integer(&mut self) -> Result<()> {
        Ok(())
    }

    fn visit_real(&mut self) -> Result<()> {
        Ok(())
    }

    fn visit_char(&mut self) -> Result<()> {
        Ok(())
    }

    fn visit_option(&mut self, inner: &Type) -> Result<()> {
        traverse(self, inner)
    }

    fn visit_tuple(&mut self, items: &[Type]) -> Result<()> {
        items.iter().try_for_each(|t| traverse(self, t))
    }

    fn visit_seq(&mut self, element: &Type) -> Result<()> {
        traverse(self, element)
    }

    fn visit_map(&mut self, key: &Type, value: &Type) -> Result<()> {
        traverse(self, key)?;
        traverse(self, value)
    }

    fn visit_const_map(&mut self, shape: &Arc<ConstMapShape>) -> Result<()> {
        traverse(self, shape.key())?;
        traverse(self, shape.value())
    }

    fn visit_record(&mut self, shape: &Arc<RecordShape>) -> Result<()> {
        shape.fields().iter().try_for_each(|(_, t)| traverse(self, t))
    }
}

impl Type {
    /// Check every nested shape, failing on the first malformed one.
    pub fn validate(&self) -> Result<()> {
        traverse(&mut WellFormed, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    struct Depth;

    impl TypeVisitor for Depth {
        type Output = usize;

        fn visit_bool(&mut self) -> usize {
            1
        }
        fn visit_fixed(&mut self, _: u32, _: bool) -> usize {
            1
        }
        fn visit_integer(&mut self) -> usize {
            1
        }
        fn visit_real(&mut self) -> usize {
            1
        }
        fn visit_char(&mut self) -> usize {
            1
        }
        fn visit_option(&mut self, inner: &Type) -> usize {
            1 + traverse(self, inner)
        }
        fn visit_tuple(&mut self, items: &[Type]) -> usize {
            1 + items.iter().map(|t| traverse(self, t)).max().unwrap_or(0)
        }
        fn visit_seq(&mut self, element: &Type) -> usize {
            1 + traverse(self, element)
        }
        fn visit_map(&mut self, key: &Type, value: &Type) -> usize {
            1 + traverse(self, key).max(traverse(self, value))
        }
        fn visit_const_map(&mut self, shape: &Arc<ConstMapShape>) -> usize {
            1 + traverse(self, shape.value())
        }
        fn visit_record(&mut self, shape: &Arc<RecordShape>) -> usize {
            1 + shape
                .fields()
                .iter()
                .map(|(_, t)| traverse(self, t))
                .max()
                .unwrap_or(0)
        }
    }

    #[test]
    fn test_traverse_nested() {
        let ty = Type::seq(Type::option(Type::tuple(vec![Type::Bool, Type::u8()])));
        assert_eq!(traverse(&mut Depth, &ty), 4);
    }

    #[test]
    fn test_record_fields_sorted() {
        let a = Type::record(
            "Point",
            vec![("y".to_string(), Type::i32()), ("x".to_string(), Type::i32())],
        )
        .unwrap();
        let b = Type::record(
            "Point",
            vec![("x".to_string(), Type::i32()), ("y".to_string(), Type::i32())],
        )
        .unwrap();
        assert_eq!(a, b);
        match a {
            Type::Record(shape) => {
                assert_eq!(shape.fields()[0].0, "x");
                assert_eq!(shape.field_index("y"), Some(1));
                assert_eq!(shape.field_index("z"), None);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_record_duplicate_field() {
        let res = Type::record(
            "Bad",
            vec![("x".to_string(), Type::Bool), ("x".to_string(), Type::u8())],
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_const_map_keys() {
        let ty = Type::const_map(
            Type::Char,
            vec![Value::Char('b' as u32), Value::Char('a' as u32), Value::Char('a' as u32)],
            Type::Bool,
        )
        .unwrap();
        match ty {
            Type::ConstMap(shape) => {
                assert_eq!(shape.keys().len(), 2);
                assert_eq!(shape.key_index(&Value::Char('b' as u32)), Some(1));
            }
            _ => unreachable!(),
        }
        assert!(Type::const_map(Type::Char, vec![Value::Bool(true)], Type::Bool).is_err());
    }

    #[test]
    fn test_fixed_width_zero() {
        assert!(Type::fixed(0, false).is_err());
        assert_eq!(Type::fixed(8, false).unwrap(), Type::u8());
    }

    #[test]
    fn test_validate_nested() {
        let zero = Type::Fixed { width: 0, signed: true };
        assert!(Type::seq(Type::option(Type::u8())).validate().is_ok());
        assert!(zero.validate().is_err());
        assert!(Type::tuple(vec![Type::Bool, zero.clone()]).validate().is_err());
        assert!(Type::map(Type::u8(), Type::seq(zero.clone())).validate().is_err());
        let record = Type::record("R", vec![("x".to_string(), zero)]).unwrap();
        assert!(record.validate().is_err());
    }
}
