//! End-to-end properties shared by the three engines.

use std::collections::BTreeMap;

use num_bigint::BigInt;
use num_rational::BigRational;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use test_log::test;

use triform::error::Result;
use triform::expr::{ExprArena, ExprId};
use triform::fixed::FixedInt;
use triform::function::Function;
use triform::generate::RandomValue;
use triform::regex::Regex;
use triform::solver::Backend;
use triform::types::Type;
use triform::value::{RecordValue, Shaped, Value};

fn u8(v: i128) -> Value {
    Value::fixed(v, 8, false).unwrap()
}

fn backends() -> Vec<Backend> {
    vec![Backend::default(), Backend::DecisionDiagram]
}

/// The constraint itself as the body, so that `find(output)` solves it and
/// `evaluate` checks a model.
fn predicate<F>(types: Vec<Type>, build: F) -> Function
where
    F: FnOnce(&ExprArena, &[ExprId]) -> Result<ExprId>,
{
    Function::new(types, build).unwrap()
}

fn solve(f: &Function, backend: &Backend) -> Option<Vec<Value>> {
    f.find(|_, output, _| Ok(output), backend).unwrap()
}

fn sum(arena: &ExprArena, xs: ExprId) -> Result<ExprId> {
    let zero = arena.u8(0);
    arena.seq_case(xs, zero, |arena, head, tail| {
        let rest = sum(arena, tail)?;
        arena.add(head, rest)
    })
}

fn samples() -> Vec<(Value, Type)> {
    let point = Type::record(
        "Point",
        vec![("y".to_string(), Type::Bool), ("x".to_string(), Type::i32())],
    )
    .unwrap();
    let Type::Record(shape) = &point else {
        unreachable!()
    };
    let record = RecordValue::from_named(
        shape.clone(),
        vec![
            ("x".to_string(), Value::fixed(-3, 32, true).unwrap()),
            ("y".to_string(), Value::Bool(true)),
        ],
    )
    .unwrap();
    let keys = vec![Value::Char('a' as u32), Value::Char('b' as u32)];
    let const_map = Type::const_map(Type::Char, keys, Type::u8()).unwrap();
    let const_map_value = Value::ConstMap(BTreeMap::from([
        (Value::Char('a' as u32), u8(1)),
        (Value::Char('b' as u32), u8(2)),
    ]));
    vec![
        (Value::Bool(false), Type::Bool),
        (u8(200), Type::u8()),
        (Value::fixed(-7, 16, true).unwrap(), Type::i16()),
        (Value::Integer(BigInt::from(-12345678901234567i64)), Type::Integer),
        (
            Value::Real(BigRational::new(BigInt::from(-3), BigInt::from(4))),
            Type::Real,
        ),
        (Value::string("héllo"), Type::string()),
        (Value::some(u8(9)), Type::option(Type::u8())),
        (Value::none(), Type::option(Type::u8())),
        (
            Value::Tuple(vec![Value::Bool(true), Value::Seq(vec![u8(1), u8(2)])]),
            Type::tuple(vec![Type::Bool, Type::seq(Type::u8())]),
        ),
        (Value::Record(record), point),
        (const_map_value, const_map),
        (
            Value::Map(BTreeMap::from([(u8(1), u8(10)), (u8(2), u8(20))])),
            Type::map(Type::u8(), Type::u8()),
        ),
    ]
}

#[test]
fn test_constant_round_trip() {
    for (value, ty) in samples() {
        let f = Function::new(vec![], |arena, _| arena.constant(&value, &ty)).unwrap();
        assert_eq!(f.evaluate(&[]).unwrap(), value, "interpreted {}", ty);
        assert_eq!(f.compile(4).unwrap().call(&[]).unwrap(), value, "compiled {}", ty);

        let same = |arena: &ExprArena, output: ExprId, _: &[ExprId]| {
            let expected = arena.constant(&value, &ty)?;
            arena.eq(output, expected)
        };
        assert_eq!(f.find(same, &Backend::default()).unwrap(), Some(vec![]), "symbolic {}", ty);
        let differs = |arena: &ExprArena, output: ExprId, _: &[ExprId]| {
            let expected = arena.constant(&value, &ty)?;
            arena.ne(output, expected)
        };
        assert_eq!(f.find(differs, &Backend::default()).unwrap(), None, "symbolic {}", ty);
    }
}

#[test]
fn test_conditional_semantics() {
    let types = vec![Type::Bool, Type::u8(), Type::u8()];
    let f = Function::new(types, |arena, xs| arena.if_then_else(xs[0], xs[1], xs[2])).unwrap();
    let compiled = f.compile(1).unwrap();
    for guard in [true, false] {
        let args = [Value::Bool(guard), u8(1), u8(2)];
        let expected = if guard { u8(1) } else { u8(2) };
        assert_eq!(f.evaluate(&args).unwrap(), expected);
        assert_eq!(compiled.call(&args).unwrap(), expected);
    }

    for backend in backends() {
        // With the guard false the output is the second branch, so it cannot
        // equal a different first branch.
        let impossible = f
            .find(
                |arena, output, xs| {
                    let picked_first = arena.eq(output, xs[1])?;
                    let guard_off = arena.not(xs[0])?;
                    let distinct = arena.ne(xs[1], xs[2])?;
                    arena.and_all([picked_first, guard_off, distinct])
                },
                &backend,
            )
            .unwrap();
        assert_eq!(impossible, None);

        let found = f
            .find(
                |arena, output, xs| {
                    let seven = arena.u8(7);
                    let is_seven = arena.eq(output, seven)?;
                    arena.and(is_seven, xs[0])
                },
                &backend,
            )
            .unwrap()
            .unwrap();
        assert_eq!(found[0], Value::Bool(true));
        assert_eq!(found[1], u8(7));
    }
}

#[test]
fn test_compiled_agrees_with_interpreter_on_random_inputs() {
    let types = vec![Type::u8(), Type::seq(Type::u8()), Type::option(Type::u8())];
    let f = Function::new(types.clone(), |arena, xs| {
        let (x, list, maybe) = (xs[0], xs[1], xs[2]);
        let contains = arena.seq_contains(list, x)?;
        let length = arena.seq_length(list)?;
        let fallback = arena.option_value_or(maybe, x)?;
        let shifted = arena.add(fallback, x)?;
        let hundred = arena.u8(100);
        let small = arena.lt(x, hundred)?;
        let three = arena.u8(3);
        let tripled = arena.mul(x, three)?;
        let mask = arena.u8(0x55);
        let masked = arena.bit_xor(x, mask)?;
        let branch = arena.if_then_else(small, tripled, masked)?;
        let total = sum(arena, list)?;
        arena.tuple(vec![contains, length, shifted, branch, total])
    })
    .unwrap();
    let shallow = f.compile(2).unwrap();
    let deep = f.compile(8).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut sampler = RandomValue::new(&mut rng).with_max_length(6);
    for _ in 0..200 {
        let args: Vec<Value> = types.iter().map(|t| sampler.generate(t)).collect();
        let expected = f.evaluate(&args).unwrap();
        assert_eq!(shallow.call(&args).unwrap(), expected, "shallow on {:?}", args);
        assert_eq!(deep.call(&args).unwrap(), expected, "deep on {:?}", args);
    }
}

#[test]
fn test_unrolling_within_and_beyond_bound() {
    let f = Function::new(vec![Type::seq(Type::u8())], |arena, xs| sum(arena, xs[0])).unwrap();
    let bounded = f.compile(3).unwrap();
    let unrolled = f.compile(12).unwrap();
    assert!(bounded.slots() < unrolled.slots());
    for n in 0..10 {
        let list = Value::Seq((1..=n).map(|i| u8(i * 30)).collect());
        let expected = (1..=n).map(|i| i * 30).sum::<i128>() % 256;
        assert_eq!(f.evaluate(&[list.clone()]).unwrap(), u8(expected));
        assert_eq!(bounded.call(&[list.clone()]).unwrap(), u8(expected), "length {}", n);
        assert_eq!(unrolled.call(&[list]).unwrap(), u8(expected), "length {}", n);
    }
}

fn triple_is_seven(arena: &ExprArena, xs: &[ExprId]) -> Result<ExprId> {
    let three = arena.u8(3);
    let product = arena.mul(xs[0], three)?;
    let seven = arena.u8(7);
    arena.eq(product, seven)
}

fn below_and_above(arena: &ExprArena, xs: &[ExprId]) -> Result<ExprId> {
    let five = arena.u8(5);
    let below = arena.lt(xs[0], five)?;
    let above = arena.gt(xs[0], five)?;
    arena.and(below, above)
}

fn negative_but_large_unsigned(arena: &ExprArena, xs: &[ExprId]) -> Result<ExprId> {
    let zero = arena.fixed(0, 8, true)?;
    let negative = arena.lt(xs[1], zero)?;
    let unsigned = arena.cast(xs[1], Type::u8())?;
    let limit = arena.u8(200);
    let large = arena.gt(unsigned, limit)?;
    arena.and(negative, large)
}

fn contradiction(arena: &ExprArena, xs: &[ExprId]) -> Result<ExprId> {
    let not_b = arena.not(xs[2])?;
    arena.and(xs[2], not_b)
}

fn masked_bits(arena: &ExprArena, xs: &[ExprId]) -> Result<ExprId> {
    let high = arena.u8(0xF0);
    let masked = arena.bit_and(xs[0], high)?;
    let a0 = arena.u8(0xA0);
    let first = arena.eq(masked, a0)?;
    let ones = arena.u8(0xFF);
    let flipped = arena.bit_xor(xs[0], ones)?;
    let target = arena.u8(0x5A);
    let second = arena.eq(flipped, target)?;
    arena.and(first, second)
}

#[test]
fn test_backends_agree_on_satisfiability() {
    type Build = fn(&ExprArena, &[ExprId]) -> Result<ExprId>;
    let formulas = [
        ("3x == 7", triple_is_seven as Build, true),
        ("x < 5 && x > 5", below_and_above as Build, false),
        ("y < 0 && (y as u8) > 200", negative_but_large_unsigned as Build, true),
        ("b && !b", contradiction as Build, false),
        ("x & 0xF0 == 0xA0 && x ^ 0xFF == 0x5A", masked_bits as Build, true),
    ];
    for (name, build, satisfiable) in formulas {
        let f = predicate(vec![Type::u8(), Type::i8(), Type::Bool], build);
        for backend in backends() {
            let found = solve(&f, &backend);
            assert_eq!(found.is_some(), satisfiable, "{} on {:?}", name, backend);
            if let Some(args) = found {
                assert_eq!(f.evaluate(&args).unwrap(), Value::Bool(true), "{} on {:?}", name, backend);
            }
        }
    }
}

#[test]
fn test_models_are_sound() {
    // "a" "b"* "c" of length 3, i.e. "abc".
    let pattern = Regex::concat(
        Regex::string("a"),
        Regex::concat(Regex::star(Regex::string("b")), Regex::string("c")),
    );
    let strings = predicate(vec![Type::string()], move |arena, xs| {
        let matched = arena.seq_matches(xs[0], pattern)?;
        let length = arena.seq_length(xs[0])?;
        let three = arena.u32(3);
        let long = arena.eq(length, three)?;
        arena.and(matched, long)
    });
    for backend in backends() {
        let found = solve(&strings, &backend).unwrap();
        assert_eq!(found, vec![Value::string("abc")]);
        assert_eq!(strings.evaluate(&found).unwrap(), Value::Bool(true));
    }

    let maps = predicate(vec![Type::map(Type::u8(), Type::u8())], |arena, xs| {
        let three = arena.u8(3);
        let at_three = arena.map_get(xs[0], three)?;
        let nine = arena.u8(9);
        let some_nine = arena.some(nine)?;
        let has_nine = arena.eq(at_three, some_nine)?;
        let four = arena.u8(4);
        let at_four = arena.map_get(xs[0], four)?;
        let none = arena.none(Type::u8());
        let lacks_four = arena.eq(at_four, none)?;
        arena.and(has_nine, lacks_four)
    });
    let found = solve(&maps, &Backend::default()).unwrap();
    assert_eq!(maps.evaluate(&found).unwrap(), Value::Bool(true));

    let keys = vec![u8(1), u8(2), u8(3)];
    let table = Type::const_map(Type::u8(), keys, Type::i8()).unwrap();
    let const_maps = predicate(vec![table, Type::u8()], |arena, xs| {
        let got = arena.const_map_get(xs[0], xs[1])?;
        let target = arena.fixed(-5, 8, true)?;
        let hit = arena.eq(got, target)?;
        let two = arena.u8(2);
        let not_two = arena.ne(xs[1], two)?;
        arena.and(hit, not_two)
    });
    for backend in backends() {
        let found = solve(&const_maps, &backend).unwrap();
        assert_eq!(const_maps.evaluate(&found).unwrap(), Value::Bool(true));
    }

    let options = predicate(vec![Type::option(Type::u8())], |arena, xs| {
        let none = arena.none(Type::u8());
        arena.ne(xs[0], none)
    });
    for backend in backends() {
        let found = solve(&options, &backend).unwrap();
        assert!(matches!(found[0], Value::Option(Some(_))), "{:?}", found);
    }
}

#[test]
fn test_fixed_width_wraparound() {
    let max = FixedInt::from_i128(255, 8, false).unwrap();
    let one = FixedInt::from_i128(1, 8, false).unwrap();
    assert_eq!(max.add(&one), FixedInt::zero(8, false));

    let f = Function::new(vec![], |arena, _| {
        let max = arena.u8(255);
        let one = arena.u8(1);
        arena.add(max, one)
    })
    .unwrap();
    assert_eq!(f.evaluate(&[]).unwrap(), u8(0));
    assert_eq!(f.compile(0).unwrap().call(&[]).unwrap(), u8(0));
    for backend in backends() {
        let wraps = f
            .find(
                |arena, output, _| {
                    let zero = arena.u8(0);
                    arena.eq(output, zero)
                },
                &backend,
            )
            .unwrap();
        assert_eq!(wraps, Some(vec![]));
    }
}

#[test]
fn test_successor_overflow_witness() {
    let f = Function::new(vec![Type::u32()], |arena, xs| {
        let one = arena.u32(1);
        arena.add(xs[0], one)
    })
    .unwrap();
    for backend in backends() {
        let found = f
            .find(
                |arena, output, _| {
                    let zero = arena.u32(0);
                    arena.eq(output, zero)
                },
                &backend,
            )
            .unwrap();
        assert_eq!(found, Some(vec![Value::fixed(4294967295, 32, false).unwrap()]));
        let x = found.unwrap()[0].clone();
        assert_eq!(u32::from_value(&x).unwrap(), u32::MAX);
    }
}
