//! Default and random host values for any [`Type`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use num_bigint::BigInt;
use num_rational::BigRational;
use rand::Rng;

use crate::fixed::FixedInt;
use crate::types::{traverse, ConstMapShape, RecordShape, Type, TypeVisitor, MAX_CHAR};
use crate::value::{RecordValue, Value};

/// The default value of a type: `false`, zero, `'\0'`, `None`, empty
/// collections, and const-maps with every key bound to the default value.
pub fn default_value(ty: &Type) -> Value {
    traverse(&mut DefaultValue, ty)
}

pub struct DefaultValue;

impl TypeVisitor for DefaultValue {
    type Output = Value;

    fn visit_bool(&mut self) -> Value {
        Value::Bool(false)
    }

    fn visit_fixed(&mut self, width: u32, signed: bool) -> Value {
        Value::Fixed(FixedInt::zero(width, signed))
    }

    fn visit_integer(&mut self) -> Value {
        Value::Integer(BigInt::from(0))
    }

    fn visit_real(&mut self) -> Value {
        Value::Real(BigRational::from_integer(BigInt::from(0)))
    }

    fn visit_char(&mut self) -> Value {
        Value::Char(0)
    }

    fn visit_option(&mut self, _: &Type) -> Value {
        Value::Option(None)
    }

    fn visit_tuple(&mut self, items: &[Type]) -> Value {
        Value::Tuple(items.iter().map(|t| traverse(self, t)).collect())
    }

    fn visit_seq(&mut self, _: &Type) -> Value {
        Value::Seq(Vec::new())
    }

    fn visit_map(&mut self, _: &Type, _: &Type) -> Value {
        Value::Map(BTreeMap::new())
    }

    fn visit_const_map(&mut self, shape: &Arc<ConstMapShape>) -> Value {
        let default = traverse(self, shape.value());
        Value::ConstMap(
            shape
                .keys()
                .iter()
                .map(|k| (k.clone(), default.clone()))
                .collect(),
        )
    }

    fn visit_record(&mut self, shape: &Arc<RecordShape>) -> Value {
        let fields = shape.fields().iter().map(|(_, t)| traverse(self, t)).collect();
        Value::Record(RecordValue::new(shape.clone(), fields))
    }
}

/// Random values, optionally steered towards "interesting" constants.
///
/// With probability `probability`, a scalar is drawn from the interesting
/// table for its type (when one exists) instead of uniformly.
pub struct RandomValue<'a, R: Rng> {
    rng: &'a mut R,
    interesting: HashMap<Type, Vec<Value>>,
    probability: f64,
    max_length: usize,
}

impl<'a, R: Rng> RandomValue<'a, R> {
    pub fn new(rng: &'a mut R) -> Self {
        Self {
            rng,
            interesting: HashMap::new(),
            probability: 0.5,
            max_length: 4,
        }
    }

    pub fn with_interesting(mut self, interesting: HashMap<Type, Vec<Value>>) -> Self {
        self.interesting = interesting;
        self
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn generate(&mut self, ty: &Type) -> Value {
        traverse(self, ty)
    }

    fn pick_interesting(&mut self, ty: &Type) -> Option<Value> {
        let candidates = self.interesting.get(ty)?;
        if candidates.is_empty() || !self.rng.random_bool(self.probability) {
            return None;
        }
        let i = self.rng.random_range(0..candidates.len());
        Some(candidates[i].clone())
    }

    fn length(&mut self) -> usize {
        self.rng.random_range(0..=self.max_length)
    }
}

impl<R: Rng> TypeVisitor for RandomValue<'_, R> {
    type Output = Value;

    fn visit_bool(&mut self) -> Value {
        if let Some(v) = self.pick_interesting(&Type::Bool) {
            return v;
        }
        Value::Bool(self.rng.random())
    }

    fn visit_fixed(&mut self, width: u32, signed: bool) -> Value {
        if let Some(v) = self.pick_interesting(&Type::Fixed { width, signed }) {
            return v;
        }
        let bytes: Vec<u8> = (0..width.div_ceil(8)).map(|_| self.rng.random()).collect();
        Value::Fixed(FixedInt::from_bytes(&bytes, width, signed))
    }

    fn visit_integer(&mut self) -> Value {
        if let Some(v) = self.pick_interesting(&Type::Integer) {
            return v;
        }
        Value::Integer(BigInt::from(self.rng.random::<i64>()))
    }

    fn visit_real(&mut self) -> Value {
        if let Some(v) = self.pick_interesting(&Type::Real) {
            return v;
        }
        let numer = BigInt::from(self.rng.random::<i32>());
        let denom = BigInt::from(self.rng.random_range(1..=1000i32));
        Value::Real(BigRational::new(numer, denom))
    }

    fn visit_char(&mut self) -> Value {
        if let Some(v) = self.pick_interesting(&Type::Char) {
            return v;
        }
        // Mostly printable ASCII, occasionally anything representable.
        if self.rng.random_bool(0.8) {
            Value::Char(self.rng.random_range(0x20..0x7f))
        } else {
            Value::Char(self.rng.random_range(0..=MAX_CHAR))
        }
    }

    fn visit_option(&mut self, inner: &Type) -> Value {
        if self.rng.random_bool(0.5) {
            Value::some(traverse(self, inner))
        } else {
            Value::none()
        }
    }

    fn visit_tuple(&mut self, items: &[Type]) -> Value {
        Value::Tuple(items.iter().map(|t| traverse(self, t)).collect())
    }

    fn visit_seq(&mut self, element: &Type) -> Value {
        let n = self.length();
        Value::Seq((0..n).map(|_| traverse(self, element)).collect())
    }

    fn visit_map(&mut self, key: &Type, value: &Type) -> Value {
        let n = self.length();
        let mut entries = BTreeMap::new();
        for _ in 0..n {
            let k = traverse(self, key);
            let v = traverse(self, value);
            entries.insert(k, v);
        }
        Value::Map(entries)
    }

    fn visit_const_map(&mut self, shape: &Arc<ConstMapShape>) -> Value {
        let entries = shape
            .keys()
            .iter()
            .map(|k| (k.clone(), traverse(self, shape.value())))
            .collect();
        Value::ConstMap(entries)
    }

    fn visit_record(&mut self, shape: &Arc<RecordShape>) -> Value {
        let fields = shape.fields().iter().map(|(_, t)| traverse(self, t)).collect();
        Value::Record(RecordValue::new(shape.clone(), fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use test_log::test;

    fn sample_types() -> Vec<Type> {
        vec![
            Type::Bool,
            Type::u8(),
            Type::i64(),
            Type::Fixed {
                width: 13,
                signed: true,
            },
            Type::Integer,
            Type::Real,
            Type::string(),
            Type::option(Type::tuple(vec![Type::Bool, Type::u16()])),
            Type::map(Type::u8(), Type::seq(Type::Bool)),
            Type::const_map(
                Type::Char,
                vec![Value::Char('a' as u32), Value::Char('b' as u32)],
                Type::u8(),
            )
            .unwrap(),
            Type::record("Point", vec![("y".into(), Type::i32()), ("x".into(), Type::i32())])
                .unwrap(),
        ]
    }

    #[test]
    fn test_default_conforms() {
        for ty in sample_types() {
            let v = default_value(&ty);
            assert!(v.conforms(&ty), "{} does not conform to {}", v, ty);
        }
    }

    #[test]
    fn test_random_conforms() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut sampler = RandomValue::new(&mut rng);
        for ty in sample_types() {
            for _ in 0..20 {
                let v = sampler.generate(&ty);
                assert!(v.conforms(&ty), "{} does not conform to {}", v, ty);
            }
        }
    }

    #[test]
    fn test_interesting_values() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut table = HashMap::new();
        table.insert(Type::u32(), vec![Value::fixed(0xdead, 32, false).unwrap()]);
        let mut sampler = RandomValue::new(&mut rng)
            .with_interesting(table)
            .with_probability(1.0);
        for _ in 0..10 {
            assert_eq!(sampler.generate(&Type::u32()), Value::fixed(0xdead, 32, false).unwrap());
        }
    }

    #[test]
    fn test_max_length() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut sampler = RandomValue::new(&mut rng).with_max_length(2);
        for _ in 0..50 {
            let v = sampler.generate(&Type::seq(Type::u8()));
            assert!(v.as_seq().unwrap().len() <= 2);
        }
    }
}
