use std::path::Path;

use proptest::prelude::*;
use flok::event::normalize_event;
use flok::script::builtins::call_builtin;
use flok::script::parser::parse;
use flok::script::value::format_number;
use flok::script::{CompiledScript, Value};

/// Every sample script must compile.
#[test]
fn compile_all_sample_scripts() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scripts");
    let mut entries: Vec<_> = std::fs::read_dir(&dir)
        .unwrap_or_else(|e| panic!("cannot open {}: {e}", dir.display()))
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "fk"))
        .collect();
    entries.sort_by_key(|e| e.path());
    assert!(!entries.is_empty(), "no .fk files found in {}", dir.display());

    let failures: Vec<String> = entries
        .iter()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            let src = std::fs::read_to_string(&path).unwrap();
            CompiledScript::compile(&name, &src).err().map(|e| e.to_string())
        })
        .collect();
    assert!(failures.is_empty(), "failed to compile:\n  {}", failures.join("\n  "));
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-1.0e9..1.0e9f64).prop_map(Value::Number),
        "[a-z ]{0,12}".prop_map(Value::Str),
    ]
}

proptest! {
    /// The parser returns Ok or Err on arbitrary input; it must not panic.
    #[test]
    fn parser_does_not_panic(s in "\\PC*") {
        let _ = std::panic::catch_unwind(|| {
            let _ = parse(&s, "fuzz.fk");
        });
    }
}

proptest! {
    /// `+` concatenates iff either side is a string.
    #[test]
    fn add_concatenates_iff_a_string_is_involved(a in scalar(), b in scalar()) {
        let sum = a.add(&b);
        let stringy = matches!(a, Value::Str(_)) || matches!(b, Value::Str(_));
        match sum {
            Value::Str(s) => {
                prop_assert!(stringy);
                prop_assert_eq!(s, format!("{}{}", a.as_string(), b.as_string()));
            }
            Value::Number(n) => {
                prop_assert!(!stringy);
                prop_assert_eq!(n, a.as_number() + b.as_number());
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    /// `+` on a list appends without touching the original.
    #[test]
    fn add_appends_to_lists(items in prop::collection::vec(-100i64..100, 0..8), extra in -100i64..100) {
        let list = Value::list(items.iter().map(|&i| Value::from(i)).collect());
        let grown = list.add(&Value::from(extra));
        prop_assert_eq!(call_builtin("size", vec![grown.clone()]).unwrap().unwrap().as_int(), items.len() as i64 + 1);
        prop_assert_eq!(call_builtin("size", vec![list]).unwrap().unwrap().as_int(), items.len() as i64);
    }

    #[test]
    fn division_by_zero_is_nan_and_modulo_is_zero(x in -1.0e12..1.0e12f64) {
        let zero = Value::from(0.0);
        match Value::from(x).div(&zero) {
            Value::Number(n) => prop_assert!(n.is_nan()),
            other => prop_assert!(false, "unexpected {:?}", other),
        }
        prop_assert_eq!(Value::from(x).modulo(&zero).as_number(), 0.0);
    }

    /// Plain values survive the trip through the persisted JSON form.
    #[test]
    fn serializable_round_trip(v in scalar()) {
        let back = Value::from_serializable(&v.to_serializable());
        prop_assert_eq!(back.type_name(), v.type_name());
        prop_assert!(back.equals(&v));
    }

    /// Integral numbers print without a decimal point.
    #[test]
    fn integral_numbers_format_without_point(i in -1_000_000i64..1_000_000) {
        prop_assert_eq!(format_number(i as f64), i.to_string());
    }

    /// A number equals its own string form.
    #[test]
    fn numbers_equal_their_string_form(i in -1_000_000i64..1_000_000) {
        let n = Value::from(i);
        prop_assert!(n.equals(&Value::from(n.as_string())));
    }

    #[test]
    fn normalize_event_is_idempotent(s in "[A-Za-z ]{0,24}") {
        let once = normalize_event(&s);
        prop_assert_eq!(normalize_event(&once), once.clone());
        prop_assert!(!once.contains(' '));
        prop_assert_eq!(once.to_lowercase(), once);
    }

    /// Any consistent body indentation parses to the same single statement.
    #[test]
    fn any_body_indent_parses(width in 1usize..16) {
        let src = format!("on x:\n{}send 1\n", " ".repeat(width));
        let script = CompiledScript::compile("i.fk", &src).unwrap();
        prop_assert_eq!(script.event_handlers("x")[0].body.stmts.len(), 1);
    }

    /// A dedent that lands between two known levels is rejected.
    #[test]
    fn stray_dedent_is_rejected(outer in 2usize..8, gap in 1usize..8) {
        let inner = outer + gap + 1;
        let src = format!(
            "on x:\n{o}if true:\n{i}send 1\n{m}send 2\n",
            o = " ".repeat(outer),
            i = " ".repeat(inner),
            m = " ".repeat(outer + gap),
        );
        prop_assert!(CompiledScript::compile("d.fk", &src).is_err());
    }
}
