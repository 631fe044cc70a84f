//! Domain values exchanged between records and the attribute codec.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{CoreError, CoreResult};

/// A decimal number kept in its exact textual form.
///
/// The store transmits numbers as decimal strings; keeping the string means
/// large integers and exact decimals survive a round trip untouched.
/// Integer coercion is exact ([`Number::as_i64`]), float coercion is
/// approximate ([`Number::as_f64`]).
///
/// Equality, ordering and hashing are numeric: `1`, `1.0` and `1e0` are the
/// same number, so a number set never holds two spellings of one value.
#[derive(Debug, Clone)]
pub struct Number(String);

impl Number {
    /// Parse a decimal string (`-12`, `3.25`, `1e3`).
    pub fn parse(text: &str) -> CoreResult<Self> {
        let trimmed = text.trim();
        if is_decimal(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(CoreError::validation(format!("invalid number: {text:?}")))
        }
    }

    /// Build from a float. Returns `None` for NaN and infinities.
    pub fn from_f64(value: f64) -> Option<Self> {
        value.is_finite().then(|| Self(value.to_string()))
    }

    /// The decimal string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact integer value, or `None` if the number has a fractional part
    /// or does not fit in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        if let Ok(n) = self.0.parse::<i64>() {
            return Some(n);
        }

        let (mantissa, exponent) = match self.0.find(['e', 'E']) {
            Some(pos) => (&self.0[..pos], self.0[pos + 1..].parse::<i32>().ok()?),
            None => (self.0.as_str(), 0),
        };
        let (negative, mantissa) = match mantissa.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
        };
        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        let mut digits = format!("{int_part}{frac_part}");
        let scale = exponent.checked_sub(i32::try_from(frac_part.len()).ok()?)?;

        if scale >= 0 {
            let zeros = usize::try_from(scale).ok()?;
            if zeros > 19 && digits.trim_start_matches('0').is_empty() {
                return Some(0);
            }
            digits.push_str(&"0".repeat(zeros.min(20)));
        } else {
            let drop = usize::try_from(-scale).ok()?;
            let keep = digits.len().saturating_sub(drop);
            if !digits[keep..].chars().all(|c| c == '0') {
                return None;
            }
            digits.truncate(keep);
        }

        let digits = digits.trim_start_matches('0');
        let magnitude: i128 = if digits.is_empty() { 0 } else { digits.parse().ok()? };
        i64::try_from(if negative { -magnitude } else { magnitude }).ok()
    }

    /// Approximate float value.
    pub fn as_f64(&self) -> Option<f64> {
        self.0.parse::<f64>().ok()
    }

    /// True if the number is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0
            .split(['e', 'E'])
            .next()
            .map(|m| m.chars().all(|c| matches!(c, '0' | '.' | '-' | '+')))
            .unwrap_or(false)
    }
}

/// `±0.d1d2d3… × 10^exponent` with no leading or trailing zero digits.
/// Zero has no digits.
#[derive(PartialEq, Eq, Hash)]
struct Canonical {
    negative: bool,
    digits: String,
    exponent: i128,
}

impl Number {
    fn canonical(&self) -> Canonical {
        let body = self.0.strip_prefix(['-', '+']).unwrap_or(&self.0);
        let negative = self.0.starts_with('-');
        let (mantissa, exponent) = match body.find(['e', 'E']) {
            Some(pos) => {
                let exp = &body[pos + 1..];
                let parsed = exp.parse::<i64>().unwrap_or(if exp.starts_with('-') {
                    i64::MIN
                } else {
                    i64::MAX
                });
                (&body[..pos], i128::from(parsed))
            }
            None => (body, 0),
        };
        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        let all = format!("{int_part}{frac_part}");
        let leading = all.len() - all.trim_start_matches('0').len();
        let digits = all.trim_matches('0').to_string();

        if digits.is_empty() {
            return Canonical {
                negative: false,
                digits,
                exponent: 0,
            };
        }
        // Position of the first significant digit relative to the point.
        let exponent = exponent + int_part.len() as i128 - leading as i128;
        Canonical {
            negative,
            digits,
            exponent,
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for Number {}

impl Hash for Number {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.canonical(), other.canonical());
        let sign = |c: &Canonical| match (c.digits.is_empty(), c.negative) {
            (true, _) => 0,
            (false, true) => -1,
            (false, false) => 1,
        };
        match sign(&a).cmp(&sign(&b)) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        let magnitude = a
            .exponent
            .cmp(&b.exponent)
            .then_with(|| a.digits.cmp(&b.digits));
        if a.negative {
            magnitude.reverse()
        } else {
            magnitude
        }
    }
}

fn is_decimal(text: &str) -> bool {
    let body = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits_ok = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    let mantissa_ok = (!int_part.is_empty() || !frac_part.is_empty())
        && digits_ok(int_part)
        && digits_ok(frac_part);
    let exponent_ok = match exponent {
        None => true,
        Some(exp) => {
            let exp = exp.strip_prefix(['-', '+']).unwrap_or(exp);
            !exp.is_empty() && digits_ok(exp)
        }
    };
    mantissa_ok && exponent_ok
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! number_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Number {
            fn from(n: $t) -> Self {
                Self(n.to_string())
            }
        })*
    };
}

number_from_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

/// A domain value as seen by records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Absent or null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Decimal number.
    Number(Number),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Set of strings.
    StringSet(BTreeSet<String>),
    /// Set of numbers.
    NumberSet(BTreeSet<Number>),
    /// Set of byte strings.
    BytesSet(BTreeSet<Vec<u8>>),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map, sorted by key.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// True for values an omit-if-empty attribute skips: null, false, zero,
    /// and empty strings, bytes or collections.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.is_zero(),
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::StringSet(s) => s.is_empty(),
            Value::NumberSet(s) => s.is_empty(),
            Value::BytesSet(s) => s.is_empty(),
            Value::List(l) => l.is_empty(),
            Value::Map(m) => m.is_empty(),
        }
    }

    /// Check if this is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::StringSet(_) => "string set",
            Value::NumberSet(_) => "number set",
            Value::BytesSet(_) => "bytes set",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Returns the string if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number if this is a number.
    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Exact integer, if this is an integral number.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(Number::as_i64)
    }

    /// Returns the boolean if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Build a string set.
    pub fn string_set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::StringSet(items.into_iter().map(Into::into).collect())
    }

    /// Build a number set.
    pub fn number_set<I, N>(items: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Number>,
    {
        Value::NumberSet(items.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        Value::Number(n)
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Number(Number::from(n))
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<BTreeSet<String>> for Value {
    fn from(s: BTreeSet<String>) -> Self {
        Value::StringSet(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(text: &str) -> Number {
        Number::parse(text).unwrap()
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(n("1"), n("1.0"));
        assert_eq!(n("1"), n("1e0"));
        assert_eq!(n("0.0012"), n("1.20E-3"));
        assert_eq!(n("-0"), n("0.000"));
        assert_ne!(n("1"), n("10"));

        let ordered = ["-12.5", "-2", "-0.5", "0", "0.001", "0.5", "1", "1.5", "2", "10", "1e3"];
        for pair in ordered.windows(2) {
            assert!(n(pair[0]) < n(pair[1]), "{} < {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn number_sets_hold_one_spelling_per_value() {
        let set = Value::number_set([n("1"), n("1.0"), n("2"), n("20e-1")]);
        match set {
            Value::NumberSet(s) => {
                let kept: Vec<_> = s.iter().map(Number::as_i64).collect();
                assert_eq!(kept, [Some(1), Some(2)]);
            }
            other => panic!("expected number set, got {other:?}"),
        }
    }

    #[test]
    fn exact_integer_coercion() {
        assert_eq!(Number::parse("42").unwrap().as_i64(), Some(42));
        assert_eq!(Number::parse("-7").unwrap().as_i64(), Some(-7));
        assert_eq!(Number::parse("5.0").unwrap().as_i64(), Some(5));
        assert_eq!(Number::parse("5e2").unwrap().as_i64(), Some(500));
        assert_eq!(Number::parse("1.25E2").unwrap().as_i64(), Some(125));
        assert_eq!(Number::parse("0.0").unwrap().as_i64(), Some(0));
        assert_eq!(Number::parse("5.5").unwrap().as_i64(), None);
        assert_eq!(Number::parse("1e-1").unwrap().as_i64(), None);
        assert_eq!(Number::parse("99999999999999999999").unwrap().as_i64(), None);
    }

    #[test]
    fn approximate_float_coercion() {
        assert_eq!(Number::parse("2.5").unwrap().as_f64(), Some(2.5));
        assert_eq!(Number::from_f64(1.5).unwrap().as_str(), "1.5");
        assert!(Number::from_f64(f64::NAN).is_none());
    }

    #[test]
    fn rejects_non_decimals() {
        for bad in ["", "abc", "1.2.3", "--1", "1e", ".", "0x10", "NaN"] {
            assert!(Number::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        for good in ["0", "-0.5", ".5", "5.", "+3", "1E+9"] {
            assert!(Number::parse(good).is_ok(), "{good:?} should parse");
        }
    }

    #[test]
    fn emptiness() {
        assert!(Value::Null.is_empty());
        assert!(Value::Bool(false).is_empty());
        assert!(Value::from(0).is_empty());
        assert!(Value::Number(Number::parse("0.00").unwrap()).is_empty());
        assert!(Value::from("").is_empty());
        assert!(Value::List(vec![]).is_empty());
        assert!(!Value::from(1).is_empty());
        assert!(!Value::from("x").is_empty());
        assert!(!Value::string_set(["a"]).is_empty());
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::from("x"));
    }
}
