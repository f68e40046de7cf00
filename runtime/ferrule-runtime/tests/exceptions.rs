use ferrule_runtime::bridge::{self, ExceptionKind};
use ferrule_runtime::host::{builtins, ops};
use ferrule_runtime::{ExtError, ExtResult, ExtensionObject, ExtensionType, ObjRef, TypeBuilder};

#[test]
fn raise_matches_clear() {
    let err = bridge::raise(ExceptionKind::KEY_ERROR, "missing key");
    assert!(matches!(err, ExtError::Pending));
    assert_eq!(bridge::occurred(), Some(ExceptionKind::KEY_ERROR));
    assert!(bridge::matches(ExceptionKind::KEY_ERROR));
    assert!(bridge::matches(ExceptionKind::LOOKUP_ERROR));
    assert!(bridge::matches(ExceptionKind::EXCEPTION));
    assert!(!bridge::matches(ExceptionKind::INDEX_ERROR));
    bridge::clear();
    assert!(bridge::occurred().is_none());
    for kind in [ExceptionKind::KEY_ERROR, ExceptionKind::EXCEPTION] {
        assert!(!bridge::matches(kind));
    }
}

#[test]
fn hierarchy_is_fixed() {
    use ExceptionKind as K;
    let edges = [
        (K::EXCEPTION, K::BASE_EXCEPTION),
        (K::STOP_ITERATION, K::EXCEPTION),
        (K::RUNTIME_ERROR, K::EXCEPTION),
        (K::NOT_IMPLEMENTED_ERROR, K::RUNTIME_ERROR),
        (K::TYPE_ERROR, K::EXCEPTION),
        (K::ATTRIBUTE_ERROR, K::EXCEPTION),
        (K::LOOKUP_ERROR, K::EXCEPTION),
        (K::INDEX_ERROR, K::LOOKUP_ERROR),
        (K::KEY_ERROR, K::LOOKUP_ERROR),
        (K::VALUE_ERROR, K::EXCEPTION),
        (K::ARITHMETIC_ERROR, K::EXCEPTION),
        (K::ZERO_DIVISION_ERROR, K::ARITHMETIC_ERROR),
        (K::SYSTEM_ERROR, K::EXCEPTION),
    ];
    for (child, parent) in edges {
        assert!(child.is_subclass_of(parent), "{child} should derive from {parent}");
        assert!(!parent.is_subclass_of(child), "{parent} should not derive from {child}");
    }
    assert!(!K::TYPE_ERROR.is_subclass_of(K::VALUE_ERROR));
}

#[test]
fn each_kind_is_matched_independently() {
    let kinds = [
        ExceptionKind::STOP_ITERATION,
        ExceptionKind::TYPE_ERROR,
        ExceptionKind::ATTRIBUTE_ERROR,
        ExceptionKind::VALUE_ERROR,
        ExceptionKind::SYSTEM_ERROR,
    ];
    for raised in kinds {
        let _ = bridge::raise(raised, "x");
        for candidate in kinds {
            assert_eq!(bridge::matches(candidate), candidate == raised);
        }
        bridge::clear();
    }
}

#[test]
fn pure_errors_touch_nothing_until_restored() {
    let err = ExtError::raised(ExceptionKind::VALUE_ERROR, "late");
    assert!(bridge::occurred().is_none());
    assert!(err.is(ExceptionKind::VALUE_ERROR));
    err.restore();
    assert!(bridge::matches(ExceptionKind::VALUE_ERROR));
    let fetched = bridge::fetch().unwrap();
    assert_eq!(fetched.message().as_deref(), Some("late"));
    assert!(bridge::fetch().is_none());
}

#[test]
fn raise_object_carries_its_payload() {
    let payload = builtins::int(404);
    let _ = bridge::raise_object(ExceptionKind::LOOKUP_ERROR, payload.clone());
    match bridge::fetch() {
        Some(ExtError::Object { kind, value }) => {
            assert_eq!(kind, ExceptionKind::LOOKUP_ERROR);
            assert!(value.unwrap().is(&payload));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn user_exception_kinds_nest() {
    let base = bridge::new_exception_kind("geo", "GeoError", None).unwrap();
    let parse = bridge::new_exception_kind("geo", "ParseError", Some(base)).unwrap();
    assert_eq!(base.name(), "geo.GeoError");
    assert!(base.is_subclass_of(ExceptionKind::EXCEPTION));
    assert!(parse.is_subclass_of(base));

    let _ = bridge::raise(parse, "unexpected token");
    assert!(bridge::matches(base));
    assert!(bridge::matches(ExceptionKind::EXCEPTION));
    assert!(!bridge::matches(ExceptionKind::VALUE_ERROR));
    bridge::clear();
}

/// Raises through the bridge from inside a slot.
struct Strict;

impl ExtensionObject for Strict {
    const NAME: &'static str = "Strict";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.support_str().support_hash();
        Ok(())
    }

    fn str(&self) -> ExtResult<ObjRef> {
        Err(bridge::raise(ExceptionKind::VALUE_ERROR, "no text form"))
    }

    fn hash(&self) -> ExtResult<i64> {
        // Pending with nothing persisted.
        Err(ExtError::Pending)
    }
}

#[test]
fn pending_errors_pass_through_trampolines_unchanged() {
    let obj = ExtensionType::create(Strict).unwrap();
    assert!(ops::str(&obj).is_none());
    let err = bridge::fetch().unwrap();
    assert!(err.is(ExceptionKind::VALUE_ERROR));
    assert_eq!(err.message().as_deref(), Some("no text form"));
}

#[test]
fn pending_without_state_surfaces_as_system_error() {
    let obj = ExtensionType::create(Strict).unwrap();
    assert!(ops::hash(&obj).is_none());
    assert!(bridge::matches(ExceptionKind::SYSTEM_ERROR));
    bridge::clear();
}

#[test]
fn unsupported_presents_as_not_implemented() {
    let err = ExtError::Unsupported("number_hex");
    assert!(err.is(ExceptionKind::NOT_IMPLEMENTED_ERROR));
    assert!(err.is(ExceptionKind::RUNTIME_ERROR));
    assert_eq!(
        err.to_string(),
        "extension object missing implementation of number_hex"
    );
}
