use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use ferrule_runtime::host::{attrs, builtins, call};
use ferrule_runtime::{
    ExceptionKind, ExtError, ExtResult, ExtensionModule, ExtensionObject, ExtensionType, Method,
    MethodTable, Module, ObjRef, TypeBuilder, bridge, method_keyword_call_handler,
    method_varargs_call_handler,
};

struct Counter {
    count: Cell<i64>,
}

impl Counter {
    fn value(&self) -> ExtResult<ObjRef> {
        Ok(builtins::int(self.count.get()))
    }

    fn add(&self, args: &[ObjRef]) -> ExtResult<ObjRef> {
        for arg in args {
            let n = builtins::as_int(arg).ok_or_else(|| {
                ExtError::raised(ExceptionKind::TYPE_ERROR, "add() expects integers")
            })?;
            self.count.set(self.count.get() + n);
        }
        Ok(builtins::none())
    }

    fn shape(&self, args: &[ObjRef], kwargs: &ObjRef) -> ExtResult<ObjRef> {
        let kw = builtins::dict_len(kwargs).ok_or_else(|| {
            ExtError::raised(ExceptionKind::SYSTEM_ERROR, "keywords are not a dict")
        })?;
        Ok(builtins::tuple(vec![
            builtins::int(args.len() as i64),
            builtins::int(kw as i64),
        ]))
    }
}

impl ExtensionObject for Counter {
    const NAME: &'static str = "Counter";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.add_method("value", Method::NoArgs(Counter::value), Some("current count"))?;
        builder.add_method("add", Method::VarArgs(Counter::add), None)?;
        builder.add_method("shape", Method::Keywords(Counter::shape), None)?;
        Ok(())
    }
}

fn counter() -> ObjRef {
    ExtensionType::create(Counter {
        count: Cell::new(0),
    })
    .unwrap()
}

fn no_args() -> ObjRef {
    builtins::tuple(Vec::new())
}

fn as_ints(tuple: &ObjRef) -> Vec<i64> {
    builtins::tuple_items(tuple)
        .unwrap()
        .iter()
        .filter_map(builtins::as_int)
        .collect()
}

#[test]
fn noargs_and_varargs_round_trip() {
    let obj = counter();
    let add = attrs::getattr(&obj, "add").unwrap();
    let args = builtins::tuple(vec![builtins::int(2), builtins::int(5)]);
    let out = call::call_object(&add, &args, None).unwrap();
    assert!(builtins::is_none(&out));

    let value = attrs::getattr(&obj, "value").unwrap();
    let out = call::call_object(&value, &no_args(), None).unwrap();
    assert_eq!(builtins::as_int(&out), Some(7));
    assert!(bridge::occurred().is_none());
}

#[test]
fn keyword_method_sees_a_dict_even_without_keywords() {
    let obj = counter();
    let shape = attrs::getattr(&obj, "shape").unwrap();
    let args = builtins::tuple(vec![builtins::int(1)]);

    let out = call::call_object(&shape, &args, None).unwrap();
    assert_eq!(as_ints(&out), vec![1, 0]);

    let empty = builtins::dict();
    let out = call::call_object(&shape, &args, Some(&empty)).unwrap();
    assert_eq!(as_ints(&out), vec![1, 0]);

    let kwargs = builtins::dict();
    builtins::dict_set(&kwargs, builtins::str("scale"), builtins::int(3));
    builtins::dict_set(&kwargs, builtins::str("offset"), builtins::int(1));
    let out = call::call_object(&shape, &args, Some(&kwargs)).unwrap();
    assert_eq!(as_ints(&out), vec![1, 2]);
}

#[test]
fn convention_violations_are_type_errors() {
    let obj = counter();
    let value = attrs::getattr(&obj, "value").unwrap();
    let args = builtins::tuple(vec![builtins::int(1)]);
    assert!(call::call_object(&value, &args, None).is_none());
    assert!(bridge::matches(ExceptionKind::TYPE_ERROR));
    bridge::clear();

    let add = attrs::getattr(&obj, "add").unwrap();
    let kwargs = builtins::dict();
    builtins::dict_set(&kwargs, builtins::str("n"), builtins::int(1));
    assert!(call::call_object(&add, &no_args(), Some(&kwargs)).is_none());
    assert!(bridge::matches(ExceptionKind::TYPE_ERROR));
    bridge::clear();
}

#[test]
fn method_errors_cross_the_boundary() {
    let obj = counter();
    let add = attrs::getattr(&obj, "add").unwrap();
    let args = builtins::tuple(vec![builtins::str("one")]);
    assert!(call::call_object(&add, &args, None).is_none());
    let err = bridge::fetch().unwrap();
    assert!(err.is(ExceptionKind::TYPE_ERROR));
    assert_eq!(err.message().as_deref(), Some("add() expects integers"));
}

#[test]
fn bound_method_keeps_its_instance_alive() {
    let obj = counter();
    let add = attrs::getattr(&obj, "add").unwrap();
    let value = attrs::getattr(&obj, "value").unwrap();
    drop(obj);
    let args = builtins::tuple(vec![builtins::int(4)]);
    call::call_object(&add, &args, None).unwrap();
    let out = call::call_object(&value, &no_args(), None).unwrap();
    assert_eq!(builtins::as_int(&out), Some(4));
}

#[test]
fn method_names_and_missing_attributes() {
    let obj = counter();
    let names = attrs::getattr(&obj, "__methods__").unwrap();
    let names: Vec<&str> = builtins::tuple_items(&names)
        .unwrap()
        .iter()
        .filter_map(builtins::as_str)
        .collect();
    assert_eq!(names, vec!["value", "add", "shape"]);

    assert!(attrs::getattr(&obj, "reset").is_none());
    assert!(bridge::matches(ExceptionKind::ATTRIBUTE_ERROR));
    bridge::clear();
}

#[test]
fn registered_table_is_frozen() {
    let methods = ExtensionType::<Counter>::methods().unwrap();
    assert!(methods.is_frozen());
    assert_eq!(methods.len(), 3);
    assert!(methods.find("shape").is_some());
}

struct Tally {
    calls: AtomicUsize,
}

fn double(state: &Tally, args: &[ObjRef]) -> ExtResult<ObjRef> {
    state.calls.fetch_add(1, Ordering::SeqCst);
    match args {
        [n] => {
            let n = builtins::as_int(n).ok_or_else(|| {
                ExtError::raised(ExceptionKind::TYPE_ERROR, "double() expects an int")
            })?;
            Ok(builtins::int(n * 2))
        }
        _ => Err(ExtError::raised(
            ExceptionKind::TYPE_ERROR,
            "double() takes exactly one argument",
        )),
    }
}

fn calls(state: &Tally) -> ExtResult<ObjRef> {
    Ok(builtins::int(state.calls.load(Ordering::SeqCst) as i64))
}

impl ExtensionModule for Tally {
    const NAME: &'static str = "tally";
    const DOC: Option<&'static str> = Some("counts its calls");

    fn init_methods(methods: &mut MethodTable<Self>) -> ExtResult<()> {
        methods.add("double", Method::VarArgs(double), None)?;
        methods.add("calls", Method::NoArgs(calls), None)?;
        Ok(())
    }
}

#[test]
fn module_functions_share_module_state() {
    let module = Module::initialize(Tally {
        calls: AtomicUsize::new(0),
    })
    .unwrap();
    let double = module.callable("double").unwrap();
    let out = call::call_object(&double, &builtins::tuple(vec![builtins::int(21)]), None).unwrap();
    assert_eq!(builtins::as_int(&out), Some(42));

    let calls = module.callable("calls").unwrap();
    let out = call::call_object(&calls, &no_args(), None).unwrap();
    assert_eq!(builtins::as_int(&out), Some(1));
    assert_eq!(module.state().calls.load(Ordering::SeqCst), 1);

    let name = builtins::dict_get_str(module.dict(), "__name__").unwrap();
    assert_eq!(builtins::as_str(&name), Some("tally"));
    assert!(builtins::dict_get_str(module.dict(), "__doc__").is_some());
}

#[test]
fn initialized_module_rejects_new_methods() {
    let module = Module::initialize(Tally {
        calls: AtomicUsize::new(0),
    })
    .unwrap();
    assert!(module.methods().is_frozen());
    let err = module
        .add_method("triple", Method::VarArgs(double), None)
        .unwrap_err();
    assert!(matches!(err, ExtError::Registration(_)));
    assert!(module.callable("triple").is_none());
}

#[test]
fn module_exceptions_derive_from_their_parent() {
    let module = Module::initialize(Tally {
        calls: AtomicUsize::new(0),
    })
    .unwrap();
    let kind = module
        .add_exception("TallyError", Some(ExceptionKind::VALUE_ERROR))
        .unwrap();
    assert_eq!(kind.name(), "tally.TallyError");
    assert_eq!(module.exception("TallyError"), Some(kind));

    let _ = bridge::raise(kind, "bad tally");
    assert!(bridge::matches(kind));
    assert!(bridge::matches(ExceptionKind::VALUE_ERROR));
    assert!(!bridge::matches(ExceptionKind::TYPE_ERROR));
    bridge::clear();
}

#[test]
fn handlers_reject_malformed_argument_objects() {
    let obj = counter();
    let shape = attrs::getattr(&obj, "shape").unwrap();
    let pair = builtins::as_cfunction(&shape)
        .and_then(|f| f.self_obj.clone())
        .unwrap();

    let not_a_dict = builtins::int(3);
    let out = unsafe {
        method_keyword_call_handler(pair.as_ptr(), no_args().as_ptr(), not_a_dict.as_ptr())
    };
    assert!(out.is_null());
    assert!(bridge::matches(ExceptionKind::TYPE_ERROR));
    bridge::clear();

    let add = attrs::getattr(&obj, "add").unwrap();
    let pair = builtins::as_cfunction(&add)
        .and_then(|f| f.self_obj.clone())
        .unwrap();
    let not_a_tuple = builtins::str("1 2");
    let out = unsafe { method_varargs_call_handler(pair.as_ptr(), not_a_tuple.as_ptr()) };
    assert!(out.is_null());
    assert!(bridge::matches(ExceptionKind::TYPE_ERROR));
    bridge::clear();
}
