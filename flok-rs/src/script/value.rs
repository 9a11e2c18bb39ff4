//! Runtime value type for the Flok scripting language.
//!
//! Flok is dynamically typed.  Scalars are copied on assignment, while lists
//! and maps are shared references: two variables holding the same list see
//! each other's `push`es, and equality on containers is identity.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;

/// Shared, mutable list storage.
pub type ListRef = Arc<Mutex<Vec<Value>>>;

/// Shared, mutable, insertion-ordered map storage.
pub type MapRef = Arc<Mutex<IndexMap<String, Value>>>;

/// Containers nested deeper than this print as `[...]` / `{...}`, which keeps
/// self-referential lists from recursing forever.
const MAX_DISPLAY_DEPTH: usize = 16;

/// Lock a container, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// A Flok script runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(ListRef),
    Map(MapRef),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(0))
    }
}

/// Print a number the way scripts expect: integral values carry no decimal
/// point, so `3.0` prints as `3`.
pub fn format_number(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_owned()
    } else if d.is_infinite() {
        let s = if d > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_owned()
    } else if d == d.trunc() && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        format!("{d}")
    }
}

/// Parse a numeric string.  Only the exact spellings `NaN` and `Infinity`
/// name the special values; `inf` and friends are not numbers.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    let body = t.strip_prefix(['+', '-']).unwrap_or(t);
    let wordy = body.bytes().any(|b| b.is_ascii_alphabetic() && b != b'e' && b != b'E');
    if wordy && body != "Infinity" && body != "NaN" {
        return None;
    }
    t.parse().ok()
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(Mutex::new(items)))
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Value::Map(Arc::new(Mutex::new(entries)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the type, as returned by `type-of()`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    // ── Coercions ─────────────────────────────────────────────────────────────

    /// Truthiness: null, `false`, zero and empty strings/containers are falsy.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(d) => *d != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !lock(l).is_empty(),
            Value::Map(m) => !lock(m).is_empty(),
        }
    }

    /// Coerce to `f64`.  Non-numeric strings and containers become 0.
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(d) => *d,
            Value::Str(s) => parse_number(s).unwrap_or(0.0),
            Value::List(_) | Value::Map(_) => 0.0,
        }
    }

    /// Coerce to an integer, truncating toward zero (NaN becomes 0).
    pub fn as_int(&self) -> i64 {
        self.as_number() as i64
    }

    /// String form (`""` for null).
    pub fn as_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.render(0),
        }
    }

    fn render(&self, depth: usize) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(d) => format_number(*d),
            Value::Str(s) => s.clone(),
            Value::List(l) => {
                if depth >= MAX_DISPLAY_DEPTH {
                    return "[...]".to_owned();
                }
                // Snapshot first so nested renders never hold two locks.
                let items = lock(l).clone();
                let parts: Vec<String> = items.iter().map(|v| v.render(depth + 1)).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(m) => {
                if depth >= MAX_DISPLAY_DEPTH {
                    return "{...}".to_owned();
                }
                let entries = lock(m).clone();
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.render(depth + 1)))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
        }
    }

    // ── Arithmetic ────────────────────────────────────────────────────────────

    /// `+`: concatenation if either side is a string, append if the left side
    /// is a list (producing a new list), numeric sum otherwise.
    pub fn add(&self, rhs: &Value) -> Value {
        match (self, rhs) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Value::Str(format!("{}{}", self.as_string(), rhs.as_string()))
            }
            (Value::List(l), _) => {
                let mut items = lock(l).clone();
                items.push(rhs.clone());
                Value::list(items)
            }
            _ => Value::Number(self.as_number() + rhs.as_number()),
        }
    }

    pub fn sub(&self, rhs: &Value) -> Value {
        Value::Number(self.as_number() - rhs.as_number())
    }

    pub fn mul(&self, rhs: &Value) -> Value {
        Value::Number(self.as_number() * rhs.as_number())
    }

    /// Division by zero yields NaN rather than an error.
    pub fn div(&self, rhs: &Value) -> Value {
        let d = rhs.as_number();
        if d == 0.0 {
            return Value::Number(f64::NAN);
        }
        Value::Number(self.as_number() / d)
    }

    /// Modulo by zero yields 0.
    pub fn modulo(&self, rhs: &Value) -> Value {
        let d = rhs.as_number();
        if d == 0.0 {
            return Value::Number(0.0);
        }
        Value::Number(self.as_number() % d)
    }

    pub fn pow(&self, rhs: &Value) -> Value {
        Value::Number(self.as_number().powf(rhs.as_number()))
    }

    /// Unary minus; booleans are inverted instead.
    pub fn negate(&self) -> Value {
        match self {
            Value::Bool(b) => Value::Bool(!b),
            other => Value::Number(-other.as_number()),
        }
    }

    // ── Comparison ────────────────────────────────────────────────────────────

    /// Ordering: numeric when both sides are numbers, otherwise lexicographic
    /// on the string forms.
    pub fn compare(&self, rhs: &Value) -> Ordering {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            _ => self.as_string().cmp(&rhs.as_string()),
        }
    }

    /// Script-level equality.
    ///
    /// Null equals only null.  A number and a string compare numerically when
    /// the string parses, and by string form otherwise.  Lists and maps are
    /// equal only when they are the same container.
    pub fn equals(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Number(n), Value::Str(s)) | (Value::Str(s), Value::Number(n)) => {
                match parse_number(s) {
                    Some(parsed) => parsed == *n,
                    None => format_number(*n) == *s,
                }
            }
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `contains`: list membership for lists, key lookup for maps, substring
    /// test for everything else.
    pub fn contains(&self, needle: &Value) -> bool {
        match self {
            Value::List(l) => lock(l).iter().any(|v| v.equals(needle)),
            Value::Map(m) => lock(m).contains_key(&needle.as_string()),
            other => other.as_string().contains(&needle.as_string()),
        }
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    /// Convert to a plain JSON tree for persistence.  Non-finite numbers have
    /// no JSON form and become null.
    pub fn to_serializable(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => {
                let items = lock(l).clone();
                serde_json::Value::Array(items.iter().map(Value::to_serializable).collect())
            }
            Value::Map(m) => {
                let entries = lock(m).clone();
                serde_json::Value::Object(
                    entries
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_serializable()))
                        .collect(),
                )
            }
        }
    }

    /// Rebuild a value from its JSON form.  Every JSON number becomes a
    /// [`Value::Number`].
    pub fn from_serializable(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::list(items.iter().map(Value::from_serializable).collect())
            }
            serde_json::Value::Object(entries) => Value::map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_serializable(v)))
                    .collect(),
            ),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Number(x)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn s(x: &str) -> Value {
        Value::from(x)
    }

    #[test]
    fn only_exact_special_spellings_parse() {
        assert_eq!(s("inf").as_number(), 0.0);
        assert_eq!(s("-infinity").as_number(), 0.0);
        assert_eq!(s("nan").as_number(), 0.0);
        assert_eq!(s("inf").sub(&Value::Number(1.0)).as_number(), -1.0);
        assert_eq!(s(" Infinity ").as_number(), f64::INFINITY);
        assert_eq!(s("-Infinity").as_number(), f64::NEG_INFINITY);
        assert!(s("NaN").as_number().is_nan());
        assert_eq!(s("1e3").as_number(), 1000.0);
        assert!(!Value::Number(0.0).equals(&s("inf")));
    }

    #[test]
    fn display_numbers() {
        assert_eq!(Value::Number(42.0).to_string(), "42");
        assert_eq!(Value::Number(-7.0).to_string(), "-7");
        assert_eq!(Value::Number(3.25).to_string(), "3.25");
        assert_eq!(Value::Number(-0.0).to_string(), "0");
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::Number(f64::INFINITY).to_string(), "Infinity");
    }

    #[test]
    fn display_containers() {
        let mut m = IndexMap::new();
        m.insert("b".to_owned(), Value::from(1));
        m.insert("a".to_owned(), Value::list(vec![s("x"), Value::Bool(true)]));
        assert_eq!(Value::map(m).to_string(), "{b: 1, a: [x, true]}");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn self_referential_list_display_terminates() {
        let l = Value::list(vec![]);
        if let Value::List(inner) = &l {
            lock(inner).push(l.clone());
        }
        assert!(l.to_string().contains("[...]"));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.as_bool());
        assert!(!Value::Number(0.0).as_bool());
        assert!(Value::Number(-1.0).as_bool());
        assert!(!s("").as_bool());
        assert!(s("0").as_bool());
        assert!(!Value::list(vec![]).as_bool());
        assert!(Value::list(vec![Value::Null]).as_bool());
        assert!(!Value::map(IndexMap::new()).as_bool());
    }

    #[test]
    fn number_coercion() {
        assert_eq!(s(" 12.5 ").as_number(), 12.5);
        assert_eq!(s("abc").as_number(), 0.0);
        assert_eq!(Value::Bool(true).as_number(), 1.0);
        assert_eq!(Value::Number(3.9).as_int(), 3);
        assert_eq!(Value::Number(-3.9).as_int(), -3);
    }

    #[test]
    fn add_concatenates_when_either_side_is_string() {
        assert_eq!(s("a").add(&Value::from(1)), s("a1"));
        assert_eq!(Value::from(1).add(&s("a")), s("1a"));
        assert_eq!(Value::Null.add(&s("x")), s("x"));
    }

    #[test]
    fn add_appends_to_new_list() {
        let original = Value::list(vec![Value::from(1)]);
        let appended = original.add(&Value::from(2));
        assert_eq!(appended.to_string(), "[1, 2]");
        assert_eq!(original.to_string(), "[1]");
    }

    #[test]
    fn add_numeric() {
        assert_eq!(Value::from(2).add(&Value::Bool(true)), Value::from(3));
        assert_eq!(Value::Null.add(&Value::Null), Value::from(0));
    }

    #[test]
    fn division_and_modulo_by_zero() {
        match Value::from(5).div(&Value::from(0)) {
            Value::Number(d) => assert!(d.is_nan()),
            other => panic!("expected number, got {other:?}"),
        }
        assert_eq!(Value::from(5).modulo(&Value::from(0)), Value::from(0));
        assert_eq!(Value::from(7).modulo(&Value::from(3)), Value::from(1));
        assert_eq!(Value::from(-7).modulo(&Value::from(3)), Value::from(-1));
    }

    #[test]
    fn power_and_negation() {
        assert_eq!(Value::from(2).pow(&Value::from(10)), Value::from(1024));
        assert_eq!(Value::from(4).negate(), Value::from(-4));
        assert_eq!(Value::Bool(true).negate(), Value::Bool(false));
    }

    #[test]
    fn equality_rules() {
        assert_eq!(Value::Null, Value::Null);
        assert_ne!(Value::Null, s(""));
        assert_ne!(Value::Null, Value::from(0));
        assert_eq!(Value::from(5), s("5.0"));
        assert_eq!(s(" 5"), Value::from(5));
        // Non-numeric strings fall back to string comparison.
        assert_ne!(s("abc"), Value::from(0));
        assert_ne!(Value::Bool(true), Value::from(1));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = Value::list(vec![Value::from(1)]);
        let b = Value::list(vec![Value::from(1)]);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn ordering() {
        assert_eq!(Value::from(2).compare(&Value::from(10)), Ordering::Less);
        // Mixed types compare by string form.
        assert_eq!(Value::from(2).compare(&s("10")), Ordering::Greater);
        assert_eq!(s("apple").compare(&s("banana")), Ordering::Less);
    }

    #[test]
    fn contains_dispatches_on_container_type() {
        let l = Value::list(vec![Value::from(1), s("two")]);
        assert!(l.contains(&s("1")));
        assert!(l.contains(&s("two")));
        assert!(!l.contains(&s("three")));
        assert!(s("hello world").contains(&s("lo w")));
    }

    #[test]
    fn serializable_round_trip() {
        let mut m = IndexMap::new();
        m.insert("name".to_owned(), s("steve"));
        m.insert("level".to_owned(), Value::from(3));
        m.insert("tags".to_owned(), Value::list(vec![s("a"), Value::Bool(false), Value::Null]));
        let v = Value::map(m);
        let back = Value::from_serializable(&v.to_serializable());
        assert_eq!(back.to_string(), v.to_string());
        assert_eq!(back.to_string(), "{name: steve, level: 3, tags: [a, false, ]}");
    }

    #[test]
    fn integral_numbers_read_back_as_numbers() {
        let json: serde_json::Value = serde_json::from_str("[1, 2.5]").unwrap();
        let v = Value::from_serializable(&json);
        assert_eq!(v.to_string(), "[1, 2.5]");
        if let Value::List(l) = v {
            assert!(matches!(lock(&l)[0], Value::Number(_)));
        }
    }

    #[test]
    fn from_impls() {
        assert!(matches!(Value::from(true), Value::Bool(true)));
        assert!(matches!(Value::from("hi"), Value::Str(_)));
        assert!(matches!(Value::from(3usize), Value::Number(_)));
    }
}
