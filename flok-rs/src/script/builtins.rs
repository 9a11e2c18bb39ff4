//! Built-in Flok functions.
//!
//! Each function receives its already-evaluated arguments and returns
//! `Result<Value, String>`.  Missing arguments read as null, so most calls
//! never fail; the interpreter turns an `Err` into a script error carrying
//! the call's line.

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

use super::value::{lock, Value};

/// Largest list `range()` will build and longest string `repeat-str()` will
/// produce.  Neither is charged against the operation budget per element.
const MAX_GENERATED: usize = 1_000_000;

/// Every name [`call_builtin`] answers to.
pub const NAMES: &[&str] = &[
    "abs", "ceil", "floor", "round", "sqrt", "pow", "min", "max", "clamp", "log", "log10",
    "sin", "cos", "tan", "random", "random-int", "upper", "lower", "length", "trim",
    "starts-with", "ends-with", "contains", "replace", "split", "substring", "index-of",
    "repeat-str", "repeat", "str", "num", "bool", "range", "push", "add", "pop", "remove",
    "join", "sum", "sort", "shuffle", "reverse", "size", "count", "is-null", "is-number",
    "is-string", "is-list", "is-map", "type-of", "format-time",
];

pub fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

/// Dispatch a built-in function call.
///
/// Returns `None` if `name` is not a built-in; the caller reports it as an
/// unknown function.
pub fn call_builtin(name: &str, args: Vec<Value>) -> Option<Result<Value, String>> {
    fn inner(name: &str, args: Vec<Value>) -> Result<Option<Value>, String> {
        Ok(Some(match name {
            // ── Math ─────────────────────────────────────────────────────────
            "abs" => Value::Number(num(&args, 0).abs()),
            "ceil" => Value::Number(num(&args, 0).ceil()),
            "floor" => Value::Number(num(&args, 0).floor()),
            // Halves round up, so round(-2.5) is -2.
            "round" => Value::Number((num(&args, 0) + 0.5).floor()),
            "sqrt" => Value::Number(num(&args, 0).sqrt()),
            "pow" => Value::Number(num(&args, 0).powf(num(&args, 1))),
            "min" => Value::Number(num(&args, 0).min(num(&args, 1))),
            "max" => Value::Number(num(&args, 0).max(num(&args, 1))),
            "clamp" => {
                let (x, lo, hi) = (num(&args, 0), num(&args, 1), num(&args, 2));
                Value::Number(lo.max(hi.min(x)))
            }
            "log" => Value::Number(num(&args, 0).ln()),
            "log10" => Value::Number(num(&args, 0).log10()),
            // Trig takes degrees.
            "sin" => Value::Number(num(&args, 0).to_radians().sin()),
            "cos" => Value::Number(num(&args, 0).to_radians().cos()),
            "tan" => Value::Number(num(&args, 0).to_radians().tan()),
            "random" => Value::Number(rand::thread_rng().gen::<f64>()),
            "random-int" => {
                // random-int(hi) picks from 1..=hi; random-int(lo, hi) from lo..=hi.
                let (lo, hi) = if args.len() > 1 {
                    (int(&args, 0), int(&args, 1))
                } else {
                    (1, int(&args, 0))
                };
                let n = if hi > lo { rand::thread_rng().gen_range(lo..=hi) } else { lo };
                Value::from(n)
            }

            // ── Strings ──────────────────────────────────────────────────────
            "upper" => Value::Str(text(&args, 0).to_uppercase()),
            "lower" => Value::Str(text(&args, 0).to_lowercase()),
            "trim" => Value::Str(text(&args, 0).trim().to_owned()),
            "length" => match arg(&args, 0) {
                Value::List(l) => Value::from(lock(&l).len()),
                other => Value::from(other.as_string().chars().count()),
            },
            "starts-with" => Value::Bool(text(&args, 0).starts_with(&text(&args, 1))),
            "ends-with" => Value::Bool(text(&args, 0).ends_with(&text(&args, 1))),
            "contains" => Value::Bool(arg(&args, 0).contains(&arg(&args, 1))),
            "replace" => Value::Str(text(&args, 0).replace(&text(&args, 1), &text(&args, 2))),
            "split" => split(&text(&args, 0), &text(&args, 1))?,
            "substring" => {
                let chars: Vec<char> = text(&args, 0).chars().collect();
                let lo = int(&args, 1).max(0) as usize;
                let hi = if args.len() > 2 {
                    (int(&args, 2).max(0) as usize).min(chars.len())
                } else {
                    chars.len()
                };
                Value::Str(if lo < hi { chars[lo..hi].iter().collect() } else { String::new() })
            }
            "index-of" => {
                let haystack = text(&args, 0);
                let found = haystack
                    .find(&text(&args, 1))
                    .map_or(-1, |byte| haystack[..byte].chars().count() as i64);
                Value::from(found)
            }
            "repeat-str" | "repeat" => {
                let s = text(&args, 0);
                let n = int(&args, 1).max(0) as usize;
                if s.chars().count().saturating_mul(n) > MAX_GENERATED {
                    return Err(format!("{name}: result longer than {MAX_GENERATED} characters"));
                }
                Value::Str(s.repeat(n))
            }
            "str" => Value::Str(text(&args, 0)),
            "num" => Value::Number(num(&args, 0)),
            "bool" => Value::Bool(arg(&args, 0).as_bool()),

            // ── Lists ────────────────────────────────────────────────────────
            "range" => {
                let (start, end) = (int(&args, 0), int(&args, 1));
                if start.abs_diff(end) > MAX_GENERATED as u64 {
                    return Err(format!("{name}: more than {MAX_GENERATED} elements"));
                }
                let items: Vec<Value> = if end >= start {
                    (start..end).map(Value::from).collect()
                } else {
                    (end + 1..=start).rev().map(Value::from).collect()
                };
                Value::list(items)
            }
            "push" | "add" => {
                let target = arg(&args, 0);
                if let Value::List(l) = &target {
                    lock(l).push(arg(&args, 1));
                }
                target
            }
            "pop" => match arg(&args, 0) {
                Value::List(l) => lock(&l).pop().unwrap_or_default(),
                _ => Value::Null,
            },
            "remove" => match arg(&args, 0) {
                Value::List(l) => {
                    let mut items = lock(&l);
                    let idx = int(&args, 1);
                    if idx >= 0 && (idx as usize) < items.len() {
                        items.remove(idx as usize)
                    } else {
                        Value::Null
                    }
                }
                _ => Value::Null,
            },
            "join" => {
                let sep = if args.len() > 1 { text(&args, 1) } else { ", ".to_owned() };
                match arg(&args, 0) {
                    Value::List(l) => {
                        let snapshot = lock(&l).clone();
                        let parts: Vec<String> = snapshot.iter().map(Value::as_string).collect();
                        Value::Str(parts.join(&sep))
                    }
                    other => Value::Str(other.as_string()),
                }
            }
            "sum" => Value::Number(items(&args).iter().map(Value::as_number).sum()),
            "sort" => {
                let mut copy = items(&args);
                copy.sort_by(Value::compare);
                Value::list(copy)
            }
            "shuffle" => {
                let mut copy = items(&args);
                copy.shuffle(&mut rand::thread_rng());
                Value::list(copy)
            }
            "reverse" => {
                let mut copy = items(&args);
                copy.reverse();
                Value::list(copy)
            }
            "size" | "count" => match arg(&args, 0) {
                Value::List(l) => Value::from(lock(&l).len()),
                Value::Map(m) => Value::from(lock(&m).len()),
                other => Value::from(other.as_string().chars().count()),
            },

            // ── Types ────────────────────────────────────────────────────────
            "is-null" => Value::Bool(arg(&args, 0).is_null()),
            "is-number" => Value::Bool(matches!(arg(&args, 0), Value::Number(_))),
            "is-string" => Value::Bool(matches!(arg(&args, 0), Value::Str(_))),
            "is-list" => Value::Bool(matches!(arg(&args, 0), Value::List(_))),
            "is-map" => Value::Bool(matches!(arg(&args, 0), Value::Map(_))),
            "type-of" => Value::from(arg(&args, 0).type_name()),

            // ── Time ─────────────────────────────────────────────────────────
            "format-time" => Value::Str(format_duration(int(&args, 0))),

            _ => return Ok(None),
        }))
    }

    inner(name, args).transpose()
}

/// `HH:MM:SS` for a number of seconds; hours are not wrapped at 24.
fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Regex split.  An empty pattern splits into characters; trailing empty
/// pieces are dropped.
fn split(s: &str, pattern: &str) -> Result<Value, String> {
    let mut parts: Vec<String> = if pattern.is_empty() {
        s.chars().map(String::from).collect()
    } else {
        let re = Regex::new(pattern).map_err(|e| format!("split: invalid pattern: {e}"))?;
        re.split(s).map(str::to_owned).collect()
    };
    while parts.last().is_some_and(String::is_empty) && parts.len() > 1 {
        parts.pop();
    }
    if parts.len() == 1 && parts[0].is_empty() && !s.is_empty() {
        parts.clear();
    }
    Ok(Value::list(parts.into_iter().map(Value::Str).collect()))
}

// ── Argument accessors ────────────────────────────────────────────────────────

fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or_default()
}

fn num(args: &[Value], idx: usize) -> f64 {
    args.get(idx).map_or(0.0, Value::as_number)
}

fn int(args: &[Value], idx: usize) -> i64 {
    args.get(idx).map_or(0, Value::as_int)
}

fn text(args: &[Value], idx: usize) -> String {
    args.get(idx).map(Value::as_string).unwrap_or_default()
}

/// Snapshot of the list in the first argument; anything else reads as empty.
fn items(args: &[Value]) -> Vec<Value> {
    match args.first() {
        Some(Value::List(l)) => lock(l).clone(),
        _ => Vec::new(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
