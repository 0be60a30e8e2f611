//! Regular patterns over sequence elements, matched by derivatives.
//!
//! Patterns are built with smart constructors that keep them in a lightly
//! normalized form (`∅·r = ∅`, `ε·r = r`, `r|r = r`, `(r*)* = r*`), which keeps
//! the set of derivatives small. Matching uses Brzozowski derivatives. The
//! symbolic encoder cannot name the element it consumes, so it derives by
//! element class instead: an [`Alphabet`] cuts the element order at every
//! range bound of the pattern, and all elements of one class yield the same
//! derivative.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::error::{invalid, Result};
use crate::types::Type;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Regex {
    /// Matches nothing.
    Empty,
    /// Matches only the empty sequence.
    Epsilon,
    /// Matches a single element within the inclusive range.
    Range(Value, Value),
    /// Matches any single element.
    Any,
    Concat(Arc<Regex>, Arc<Regex>),
    Union(Arc<Regex>, Arc<Regex>),
    Star(Arc<Regex>),
    Intersect(Arc<Regex>, Arc<Regex>),
    Negate(Arc<Regex>),
}

/// Element order used by ranges: numeric for fixed-width integers (honouring
/// signedness), natural otherwise.
pub fn compare_elements(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Fixed(x), Value::Fixed(y)) => x.compare(y),
        _ => a.cmp(b),
    }
}

pub fn in_range(lo: &Value, hi: &Value, element: &Value) -> bool {
    compare_elements(lo, element) != Ordering::Greater && compare_elements(element, hi) != Ordering::Greater
}

/// The distinct ranges of a pattern and the membership vectors a single
/// element can have against them.
#[derive(Debug, Clone)]
pub struct Alphabet {
    ranges: Vec<(Value, Value)>,
    classes: Vec<Vec<bool>>,
}

impl Alphabet {
    fn new(ranges: Vec<(Value, Value)>) -> Self {
        let mut bounds: Vec<&Value> = ranges.iter().flat_map(|(lo, hi)| [lo, hi]).collect();
        bounds.sort_by(|a, b| compare_elements(a, b));
        bounds.dedup_by(|a, b| compare_elements(a, b) == Ordering::Equal);

        // Below the first bound and above the last one nothing matches.
        let mut classes = vec![vec![false; ranges.len()]];
        for (i, point) in bounds.iter().enumerate() {
            classes.push(ranges.iter().map(|(lo, hi)| in_range(lo, hi, point)).collect());
            if let Some(next) = bounds.get(i + 1) {
                // Strictly between two bounds. May be empty in a discrete
                // order; the guard of such a class is then unsatisfiable.
                classes.push(
                    ranges
                        .iter()
                        .map(|(lo, hi)| {
                            compare_elements(lo, point) != Ordering::Greater
                                && compare_elements(next, hi) != Ordering::Greater
                        })
                        .collect(),
                );
            }
        }
        classes.sort();
        classes.dedup();
        Self { ranges, classes }
    }

    pub fn ranges(&self) -> &[(Value, Value)] {
        &self.ranges
    }

    /// Every element falls into at least one class. Position `j` of a class
    /// says whether its elements lie in `ranges()[j]`.
    pub fn classes(&self) -> &[Vec<bool>] {
        &self.classes
    }

    fn member(&self, class: &[bool], lo: &Value, hi: &Value) -> bool {
        self.ranges
            .iter()
            .position(|(l, h)| l == lo && h == hi)
            .map(|j| class[j])
            .unwrap_or(false)
    }
}

impl Regex {
    pub fn empty() -> Arc<Regex> {
        Arc::new(Regex::Empty)
    }

    pub fn epsilon() -> Arc<Regex> {
        Arc::new(Regex::Epsilon)
    }

    pub fn any() -> Arc<Regex> {
        Arc::new(Regex::Any)
    }

    pub fn element(value: Value) -> Arc<Regex> {
        Arc::new(Regex::Range(value.clone(), value))
    }

    /// An empty range (`lo > hi`) collapses to [`Regex::Empty`].
    pub fn range(lo: Value, hi: Value) -> Arc<Regex> {
        if compare_elements(&lo, &hi) == Ordering::Greater {
            return Regex::empty();
        }
        Arc::new(Regex::Range(lo, hi))
    }

    /// The literal sequence of `elements`.
    pub fn literal(elements: impl IntoIterator<Item = Value>) -> Arc<Regex> {
        let items: Vec<_> = elements.into_iter().collect();
        items
            .into_iter()
            .rev()
            .fold(Regex::epsilon(), |acc, e| Regex::concat(Regex::element(e), acc))
    }

    /// The literal string `s`, over character elements.
    pub fn string(s: &str) -> Arc<Regex> {
        Regex::literal(s.chars().map(|c| Value::Char(c as u32)))
    }

    pub fn concat(a: Arc<Regex>, b: Arc<Regex>) -> Arc<Regex> {
        match (&*a, &*b) {
            (Regex::Empty, _) | (_, Regex::Empty) => Regex::empty(),
            (Regex::Epsilon, _) => b,
            (_, Regex::Epsilon) => a,
            // Right-associate so derivatives share suffixes.
            (Regex::Concat(x, y), _) => Regex::concat(x.clone(), Regex::concat(y.clone(), b)),
            _ => Arc::new(Regex::Concat(a, b)),
        }
    }

    pub fn union(a: Arc<Regex>, b: Arc<Regex>) -> Arc<Regex> {
        match (&*a, &*b) {
            (Regex::Empty, _) => b,
            (_, Regex::Empty) => a,
            _ if a == b => a,
            _ => Arc::new(Regex::Union(a, b)),
        }
    }

    pub fn star(a: Arc<Regex>) -> Arc<Regex> {
        match &*a {
            Regex::Empty | Regex::Epsilon => Regex::epsilon(),
            Regex::Star(_) => a,
            _ => Arc::new(Regex::Star(a)),
        }
    }

    pub fn plus(a: Arc<Regex>) -> Arc<Regex> {
        Regex::concat(a.clone(), Regex::star(a))
    }

    pub fn optional(a: Arc<Regex>) -> Arc<Regex> {
        Regex::union(Regex::epsilon(), a)
    }

    pub fn intersect(a: Arc<Regex>, b: Arc<Regex>) -> Arc<Regex> {
        match (&*a, &*b) {
            (Regex::Empty, _) | (_, Regex::Empty) => Regex::empty(),
            _ if a == b => a,
            _ => Arc::new(Regex::Intersect(a, b)),
        }
    }

    pub fn negate(a: Arc<Regex>) -> Arc<Regex> {
        match &*a {
            Regex::Negate(inner) => inner.clone(),
            _ => Arc::new(Regex::Negate(a)),
        }
    }

    /// Whether the pattern accepts the empty sequence.
    pub fn nullable(&self) -> bool {
        match self {
            Regex::Empty | Regex::Range(..) | Regex::Any => false,
            Regex::Epsilon | Regex::Star(_) => true,
            Regex::Concat(a, b) | Regex::Intersect(a, b) => a.nullable() && b.nullable(),
            Regex::Union(a, b) => a.nullable() || b.nullable(),
            Regex::Negate(a) => !a.nullable(),
        }
    }

    /// Brzozowski derivative with respect to one element.
    pub fn derivative(self: &Arc<Self>, element: &Value) -> Arc<Regex> {
        self.derive(&|lo, hi| in_range(lo, hi, element))
    }

    /// The derivative shared by every element of `class`.
    pub fn derivative_in(self: &Arc<Self>, alphabet: &Alphabet, class: &[bool]) -> Arc<Regex> {
        self.derive(&|lo, hi| alphabet.member(class, lo, hi))
    }

    fn derive(self: &Arc<Self>, member: &dyn Fn(&Value, &Value) -> bool) -> Arc<Regex> {
        match &**self {
            Regex::Empty | Regex::Epsilon => Regex::empty(),
            Regex::Range(lo, hi) => {
                if member(lo, hi) {
                    Regex::epsilon()
                } else {
                    Regex::empty()
                }
            }
            Regex::Any => Regex::epsilon(),
            Regex::Concat(a, b) => {
                let first = Regex::concat(a.derive(member), b.clone());
                if a.nullable() {
                    Regex::union(first, b.derive(member))
                } else {
                    first
                }
            }
            Regex::Union(a, b) => Regex::union(a.derive(member), b.derive(member)),
            Regex::Star(a) => Regex::concat(a.derive(member), self.clone()),
            Regex::Intersect(a, b) => Regex::intersect(a.derive(member), b.derive(member)),
            Regex::Negate(a) => Regex::negate(a.derive(member)),
        }
    }

    /// The element classes of this pattern. Derivatives only contain ranges
    /// of the pattern they came from, so one alphabet serves them all.
    pub fn alphabet(&self) -> Alphabet {
        let mut ranges = Vec::new();
        self.collect_ranges(&mut ranges);
        Alphabet::new(ranges)
    }

    fn collect_ranges(&self, out: &mut Vec<(Value, Value)>) {
        match self {
            Regex::Empty | Regex::Epsilon | Regex::Any => {}
            Regex::Range(lo, hi) => {
                if !out.iter().any(|(l, h)| l == lo && h == hi) {
                    out.push((lo.clone(), hi.clone()));
                }
            }
            Regex::Concat(a, b) | Regex::Union(a, b) | Regex::Intersect(a, b) => {
                a.collect_ranges(out);
                b.collect_ranges(out);
            }
            Regex::Star(a) | Regex::Negate(a) => a.collect_ranges(out),
        }
    }

    pub fn matches(self: &Arc<Self>, elements: &[Value]) -> bool {
        let mut current = self.clone();
        for e in elements {
            current = current.derivative(e);
            if *current == Regex::Empty {
                return false;
            }
        }
        current.nullable()
    }

    /// Check that every range bound is an element of `element`.
    pub fn check(&self, element: &Type) -> Result<()> {
        match self {
            Regex::Empty | Regex::Epsilon | Regex::Any => Ok(()),
            Regex::Range(lo, hi) => {
                for bound in [lo, hi] {
                    if !bound.conforms(element) {
                        return invalid(format!("pattern bound {} is not a {}", bound, element));
                    }
                }
                if !element.is_ordered() {
                    return invalid(format!("ranges need an ordered element type, not {}", element));
                }
                Ok(())
            }
            Regex::Concat(a, b) | Regex::Union(a, b) | Regex::Intersect(a, b) => {
                a.check(element)?;
                b.check(element)
            }
            Regex::Star(a) | Regex::Negate(a) => a.check(element),
        }
    }
}

impl Display for Regex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Regex::Empty => write!(f, "∅"),
            Regex::Epsilon => write!(f, "ε"),
            Regex::Range(lo, hi) if lo == hi => write!(f, "{}", lo),
            Regex::Range(lo, hi) => write!(f, "[{}-{}]", lo, hi),
            Regex::Any => write!(f, "."),
            Regex::Concat(a, b) => write!(f, "{}{}", a, b),
            Regex::Union(a, b) => write!(f, "({}|{})", a, b),
            Regex::Star(a) => write!(f, "({})*", a),
            Regex::Intersect(a, b) => write!(f, "({}&{})", a, b),
            Regex::Negate(a) => write!(f, "!({})", a),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn chars(s: &str) -> Vec<Value> {
        s.chars().map(|c| Value::Char(c as u32)).collect()
    }

    fn digit() -> Arc<Regex> {
        Regex::range(Value::Char('0' as u32), Value::Char('9' as u32))
    }

    #[test]
    fn test_literal() {
        let r = Regex::string("abc");
        assert!(r.matches(&chars("abc")));
        assert!(!r.matches(&chars("ab")));
        assert!(!r.matches(&chars("abcd")));
    }

    #[test]
    fn test_star_and_union() {
        // (ab|c)*d
        let r = Regex::concat(
            Regex::star(Regex::union(Regex::string("ab"), Regex::string("c"))),
            Regex::string("d"),
        );
        assert!(r.matches(&chars("d")));
        assert!(r.matches(&chars("abccabd")));
        assert!(!r.matches(&chars("abca")));
    }

    #[test]
    fn test_ranges() {
        let number = Regex::plus(digit());
        assert!(number.matches(&chars("2024")));
        assert!(!number.matches(&chars("")));
        assert!(!number.matches(&chars("12a")));
    }

    #[test]
    fn test_signed_range() {
        let lo = Value::fixed(-5, 8, true).unwrap();
        let hi = Value::fixed(5, 8, true).unwrap();
        let r = Regex::star(Regex::range(lo, hi));
        assert!(r.matches(&[Value::fixed(-3, 8, true).unwrap(), Value::fixed(4, 8, true).unwrap()]));
        assert!(!r.matches(&[Value::fixed(-6, 8, true).unwrap()]));
    }

    #[test]
    fn test_intersect_negate() {
        let any_star = Regex::star(Regex::any());
        let not_empty = Regex::negate(Regex::epsilon());
        let r = Regex::intersect(any_star, not_empty);
        assert!(!r.matches(&chars("")));
        assert!(r.matches(&chars("x")));
    }

    #[test]
    fn test_smart_constructors() {
        assert_eq!(*Regex::concat(Regex::empty(), Regex::any()), Regex::Empty);
        assert_eq!(Regex::concat(Regex::epsilon(), Regex::any()), Regex::any());
        assert_eq!(Regex::star(Regex::star(Regex::any())), Regex::star(Regex::any()));
        assert_eq!(Regex::union(Regex::any(), Regex::any()), Regex::any());
    }

    #[test]
    fn test_alphabet_classes() {
        let a = Value::Char('a' as u32);
        let f = Value::Char('f' as u32);
        let c = Value::Char('c' as u32);
        let z = Value::Char('z' as u32);
        let r = Regex::union(Regex::range(a.clone(), f.clone()), Regex::range(c.clone(), z.clone()));
        let alphabet = r.alphabet();
        assert_eq!(alphabet.ranges().len(), 2);
        // Every element's membership vector is one of the classes.
        for e in ['0', 'a', 'b', 'c', 'e', 'f', 'g', 'z', '~'] {
            let e = Value::Char(e as u32);
            let membership: Vec<bool> = alphabet.ranges().iter().map(|(lo, hi)| in_range(lo, hi, &e)).collect();
            assert!(alphabet.classes().contains(&membership), "{} has no class", e);
        }
    }

    #[test]
    fn test_class_derivatives_agree_with_derivative() {
        // [0-9]+ & !(3)
        let r = Regex::intersect(Regex::plus(digit()), Regex::negate(Regex::string("3")));
        let alphabet = r.alphabet();
        for input in ["", "3", "33", "12", "1a", "7"] {
            let mut current = r.clone();
            for e in chars(input) {
                let class: Vec<bool> = alphabet.ranges().iter().map(|(lo, hi)| in_range(lo, hi, &e)).collect();
                current = current.derivative_in(&alphabet, &class);
            }
            assert_eq!(current.nullable(), r.matches(&chars(input)), "on {:?}", input);
        }
        assert!(r.matches(&chars("12")));
        assert!(!r.matches(&chars("3")));
    }

    #[test]
    fn test_check() {
        assert!(digit().check(&Type::Char).is_ok());
        assert!(digit().check(&Type::u8()).is_err());
    }
}
