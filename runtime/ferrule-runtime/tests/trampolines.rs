use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::io::Write;

use ferrule_runtime::host::abi::compare_op;
use ferrule_runtime::host::ops::{self, BinaryOp, UnaryOp};
use ferrule_runtime::host::{attrs, builtins, call};
use ferrule_runtime::{
    BufferSegment, CompareOp, Ext, ExceptionKind, ExtError, ExtResult, ExtensionObject,
    ExtensionType, ObjRef, TypeBuilder, bridge, flags,
};

/// Supports only item access and length.
struct Pair {
    left: i64,
    right: i64,
}

impl ExtensionObject for Pair {
    const NAME: &'static str = "Pair";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.support_sequence(flags::sequence::ITEM | flags::sequence::LENGTH);
        Ok(())
    }

    fn sequence_length(&self) -> ExtResult<isize> {
        Ok(2)
    }

    fn sequence_item(&self, index: isize) -> ExtResult<ObjRef> {
        match index {
            0 => Ok(builtins::int(self.left)),
            1 => Ok(builtins::int(self.right)),
            _ => Err(ExtError::raised(
                ExceptionKind::INDEX_ERROR,
                "Pair index out of range",
            )),
        }
    }
}

#[test]
fn item_and_length_dispatch_to_the_implementation() {
    let pair = ExtensionType::create(Pair { left: 3, right: 4 }).unwrap();
    assert_eq!(ops::sequence_length(&pair), Some(2));
    let second = ops::sequence_item(&pair, 1).unwrap();
    assert_eq!(builtins::as_int(&second), Some(4));
    assert!(bridge::occurred().is_none());
}

#[test]
fn failing_item_sets_error_and_returns_sentinel() {
    let pair = ExtensionType::create(Pair { left: 3, right: 4 }).unwrap();
    assert!(ops::sequence_item(&pair, 7).is_none());
    assert!(bridge::matches(ExceptionKind::INDEX_ERROR));
    assert!(bridge::matches(ExceptionKind::LOOKUP_ERROR));
    bridge::clear();
}

#[test]
fn slot_never_enabled_is_absent() {
    let pair = ExtensionType::create(Pair { left: 1, right: 2 }).unwrap();
    assert!(ops::sequence_concat(&pair, &pair).is_none());
    assert!(bridge::matches(ExceptionKind::TYPE_ERROR));
    assert!(!bridge::matches(ExceptionKind::NOT_IMPLEMENTED_ERROR));
    bridge::clear();
    let ty = ExtensionType::<Pair>::ready().unwrap();
    let sq = ty.as_sequence().unwrap();
    assert!(sq.sq_concat.is_none());
    assert!(sq.sq_contains.is_none());
    assert!(ty.as_mapping().is_none());
}

#[test]
fn item_set_on_read_only_pair_fails() {
    let pair = ExtensionType::create(Pair { left: 1, right: 2 }).unwrap();
    assert!(ops::sequence_set_item(&pair, 0, Some(&builtins::int(1))).is_none());
    assert!(bridge::occurred().is_some());
    bridge::clear();
    assert_eq!(ops::sequence_length(&pair), Some(2));
    let first = ops::sequence_item(&pair, 0).unwrap();
    assert_eq!(builtins::as_int(&first), Some(1));
}

/// Enables every sequence slot but implements only `length`.
struct OverBroad;

impl ExtensionObject for OverBroad {
    const NAME: &'static str = "OverBroad";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.support_sequence(flags::sequence::ALL);
        Ok(())
    }

    fn sequence_length(&self) -> ExtResult<isize> {
        Ok(0)
    }
}

#[test]
fn enabled_but_unimplemented_slot_reports_not_implemented() {
    let obj = ExtensionType::create(OverBroad).unwrap();
    assert_eq!(ops::sequence_length(&obj), Some(0));
    assert!(ops::sequence_concat(&obj, &obj).is_none());
    assert!(bridge::matches(ExceptionKind::NOT_IMPLEMENTED_ERROR));
    let err = bridge::fetch().unwrap();
    assert_eq!(
        err.message().as_deref(),
        Some("extension object missing implementation of sequence_concat")
    );
    assert!(bridge::occurred().is_none());
}

struct Unlucky;

impl ExtensionObject for Unlucky {
    const NAME: &'static str = "Unlucky";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.support_hash().support_repr();
        Ok(())
    }

    fn hash(&self) -> ExtResult<i64> {
        Ok(-1)
    }

    fn repr(&self) -> ExtResult<ObjRef> {
        Ok(builtins::str("<Unlucky>"))
    }
}

#[test]
fn hash_of_minus_one_is_remapped() {
    let obj = ExtensionType::create(Unlucky).unwrap();
    assert_eq!(ops::hash(&obj), Some(-2));
    assert!(bridge::occurred().is_none());
    assert_eq!(ops::repr_string(&obj).as_deref(), Some("<Unlucky>"));
}

struct Countdown {
    remaining: Cell<i64>,
    poisoned: bool,
}

impl ExtensionObject for Countdown {
    const NAME: &'static str = "Countdown";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.support_iter(flags::iter::ALL);
        Ok(())
    }

    fn iter(&self, this: &ObjRef) -> ExtResult<ObjRef> {
        Ok(this.clone())
    }

    fn iternext(&self) -> ExtResult<Option<ObjRef>> {
        if self.poisoned {
            return Err(ExtError::raised(ExceptionKind::VALUE_ERROR, "poisoned"));
        }
        let n = self.remaining.get();
        if n == 0 {
            return Ok(None);
        }
        self.remaining.set(n - 1);
        Ok(Some(builtins::int(n)))
    }
}

#[test]
fn exhaustion_is_not_an_error() {
    let obj = ExtensionType::create(Countdown {
        remaining: Cell::new(2),
        poisoned: false,
    })
    .unwrap();
    let it = ops::get_iter(&obj).unwrap();
    assert!(it.is(&obj));
    let mut seen = Vec::new();
    while let Some(item) = ops::iter_next(&it).unwrap() {
        seen.push(builtins::as_int(&item).unwrap());
    }
    assert_eq!(seen, vec![2, 1]);
    assert!(bridge::occurred().is_none());
}

#[test]
fn failing_iteration_is_distinguishable_from_exhaustion() {
    let obj = ExtensionType::create(Countdown {
        remaining: Cell::new(5),
        poisoned: true,
    })
    .unwrap();
    assert!(ops::iter_next(&obj).is_none());
    assert!(bridge::matches(ExceptionKind::VALUE_ERROR));
    bridge::clear();
}

/// Probes a missing attribute, recovers, and reports exhaustion.
struct Forgiving;

impl ExtensionObject for Forgiving {
    const NAME: &'static str = "Forgiving";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.support_iter(flags::iter::NEXT);
        Ok(())
    }

    fn iternext(&self) -> ExtResult<Option<ObjRef>> {
        if attrs::getattr(&builtins::int(1), "missing").is_none() {
            return Ok(None);
        }
        Ok(Some(builtins::none()))
    }
}

#[test]
fn recovered_host_failure_does_not_leak_out() {
    let obj = ExtensionType::create(Forgiving).unwrap();
    assert!(matches!(ops::iter_next(&obj), Some(None)));
    assert!(bridge::occurred().is_none());
}

#[derive(Default)]
struct Recorder {
    last: RefCell<Option<(String, Option<i64>)>>,
}

impl ExtensionObject for Recorder {
    const NAME: &'static str = "Recorder";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.support_mapping(flags::mapping::ASS_SUBSCRIPT | flags::mapping::SUBSCRIPT);
        Ok(())
    }

    fn mapping_subscript(&self, key: &ObjRef) -> ExtResult<ObjRef> {
        Err(ExtError::Object {
            kind: ExceptionKind::KEY_ERROR,
            value: Some(key.clone()),
        })
    }

    fn mapping_ass_subscript(&self, key: &ObjRef, value: Option<&ObjRef>) -> ExtResult<()> {
        let key = builtins::as_str(key).unwrap_or("?").to_owned();
        let value = value.and_then(builtins::as_int);
        *self.last.borrow_mut() = Some((key, value));
        Ok(())
    }
}

#[test]
fn deletion_arrives_as_none() {
    let handle = Ext::new(Recorder::default()).unwrap();
    let obj = handle.as_object();
    let key = builtins::str("k");
    ops::mapping_set(obj, &key, Some(&builtins::int(9))).unwrap();
    assert_eq!(
        *handle.get().unwrap().last.borrow(),
        Some(("k".to_owned(), Some(9)))
    );
    ops::mapping_set(obj, &key, None).unwrap();
    assert_eq!(
        *handle.get().unwrap().last.borrow(),
        Some(("k".to_owned(), None))
    );
}

#[test]
fn object_payload_survives_translation() {
    let obj = ExtensionType::create(Recorder::default()).unwrap();
    assert!(ops::mapping_get(&obj, &builtins::str("missing")).is_none());
    let err = bridge::fetch().unwrap();
    assert!(err.is(ExceptionKind::KEY_ERROR));
    assert_eq!(err.message().as_deref(), Some("missing"));
}

struct Meters(f64);

impl ExtensionObject for Meters {
    const NAME: &'static str = "Meters";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        use flags::number::*;
        builder.support_number(ADD | NEGATIVE | NONZERO | POWER | DIVIDE);
        Ok(())
    }

    fn number_add(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        let rhs = builtins::as_float(other)
            .or_else(|| builtins::as_int(other).map(|i| i as f64))
            .ok_or_else(|| ExtError::raised(ExceptionKind::TYPE_ERROR, "not a number"))?;
        Ok(builtins::float(self.0 + rhs))
    }

    fn number_divide(&self, other: &ObjRef) -> ExtResult<ObjRef> {
        match builtins::as_int(other) {
            Some(0) => Err(ExtError::raised(
                ExceptionKind::ZERO_DIVISION_ERROR,
                "division by zero",
            )),
            Some(n) => Ok(builtins::float(self.0 / n as f64)),
            None => Err(ExtError::raised(ExceptionKind::TYPE_ERROR, "not an int")),
        }
    }

    fn number_power(&self, exp: &ObjRef, modulus: &ObjRef) -> ExtResult<ObjRef> {
        if !builtins::is_none(modulus) {
            return Err(ExtError::raised(
                ExceptionKind::TYPE_ERROR,
                "modulus not supported",
            ));
        }
        let exp = builtins::as_int(exp).unwrap_or(1) as i32;
        Ok(builtins::float(self.0.powi(exp)))
    }

    fn number_negative(&self) -> ExtResult<ObjRef> {
        Ok(builtins::float(-self.0))
    }

    fn number_nonzero(&self) -> ExtResult<bool> {
        Ok(self.0 != 0.0)
    }
}

#[test]
fn number_slots_round_trip() {
    let m = ExtensionType::create(Meters(1.5)).unwrap();
    let sum = ops::number_binary(&m, &builtins::int(2), BinaryOp::Add).unwrap();
    assert_eq!(builtins::as_float(&sum), Some(3.5));
    let neg = ops::number_unary(&m, UnaryOp::Negative).unwrap();
    assert_eq!(builtins::as_float(&neg), Some(-1.5));
    let sq = ops::number_power(&m, &builtins::int(2), None).unwrap();
    assert_eq!(builtins::as_float(&sq), Some(2.25));
    assert_eq!(ops::is_true(&m), Some(true));
    let zero = ExtensionType::create(Meters(0.0)).unwrap();
    assert_eq!(ops::is_true(&zero), Some(false));
    assert!(bridge::occurred().is_none());
}

#[test]
fn arithmetic_errors_keep_their_kind() {
    let m = ExtensionType::create(Meters(1.0)).unwrap();
    assert!(ops::number_binary(&m, &builtins::int(0), BinaryOp::Divide).is_none());
    assert!(bridge::matches(ExceptionKind::ZERO_DIVISION_ERROR));
    assert!(bridge::matches(ExceptionKind::ARITHMETIC_ERROR));
    bridge::clear();
    assert!(ops::number_binary(&m, &builtins::int(1), BinaryOp::Multiply).is_none());
    assert!(bridge::matches(ExceptionKind::TYPE_ERROR));
    bridge::clear();
}

struct Version(u32);

impl ExtensionObject for Version {
    const NAME: &'static str = "Version";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.support_rich_compare().support_compare();
        Ok(())
    }

    fn compare(&self, other: &ObjRef) -> ExtResult<i32> {
        let rhs = builtins::as_int(other).unwrap_or_default() as u32;
        Ok(self.0.cmp(&rhs) as i32 * 7)
    }

    fn rich_compare(&self, other: &ObjRef, op: CompareOp) -> ExtResult<ObjRef> {
        let rhs = builtins::as_int(other).unwrap_or_default() as u32;
        let result = match op {
            CompareOp::Lt => self.0 < rhs,
            CompareOp::Le => self.0 <= rhs,
            CompareOp::Eq => self.0 == rhs,
            CompareOp::Ne => self.0 != rhs,
            CompareOp::Gt => self.0 > rhs,
            CompareOp::Ge => self.0 >= rhs,
        };
        Ok(builtins::bool(result))
    }
}

#[test]
fn comparisons_dispatch() {
    let v = ExtensionType::create(Version(3)).unwrap();
    let lt = ops::rich_compare(&v, &builtins::int(4), compare_op::LT).unwrap();
    assert_eq!(builtins::as_bool(&lt), Some(true));
    let ge = ops::rich_compare(&v, &builtins::int(4), compare_op::GE).unwrap();
    assert_eq!(builtins::as_bool(&ge), Some(false));
    assert_eq!(ops::compare(&v, &builtins::int(1)), Some(1));
    assert_eq!(ops::compare(&v, &builtins::int(9)), Some(-1));
    assert_eq!(ops::compare(&v, &builtins::int(3)), Some(0));
}

#[test]
fn unknown_compare_opcode_is_a_system_error() {
    let v = ExtensionType::create(Version(3)).unwrap();
    assert!(ops::rich_compare(&v, &builtins::int(4), 42).is_none());
    assert!(bridge::matches(ExceptionKind::SYSTEM_ERROR));
    bridge::clear();
}

struct Adder;

impl ExtensionObject for Adder {
    const NAME: &'static str = "Adder";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.support_call().support_print();
        Ok(())
    }

    fn call(&self, args: &[ObjRef], kwargs: Option<&ObjRef>) -> ExtResult<ObjRef> {
        if kwargs.is_some() {
            return Err(ExtError::raised(
                ExceptionKind::TYPE_ERROR,
                "Adder takes no keyword arguments",
            ));
        }
        Ok(builtins::int(args.iter().filter_map(builtins::as_int).sum()))
    }

    fn print(&self, out: &mut dyn Write, _flags: i32) -> ExtResult<()> {
        out.write_all(b"<Adder>")?;
        Ok(())
    }
}

#[test]
fn call_slot_receives_positional_arguments() {
    let adder = ExtensionType::create(Adder).unwrap();
    let args = builtins::tuple(vec![builtins::int(1), builtins::int(2), builtins::int(3)]);
    let out = call::call_object(&adder, &args, None).unwrap();
    assert_eq!(builtins::as_int(&out), Some(6));

    // An empty keyword dict reaches the implementation as absent.
    let out = call::call_object(&adder, &args, Some(&builtins::dict())).unwrap();
    assert_eq!(builtins::as_int(&out), Some(6));

    let kwargs = builtins::dict();
    builtins::dict_set(&kwargs, builtins::str("x"), builtins::int(1));
    assert!(call::call_object(&adder, &args, Some(&kwargs)).is_none());
    assert!(bridge::matches(ExceptionKind::TYPE_ERROR));
    bridge::clear();
}

#[test]
fn call_slot_rejects_malformed_arguments() {
    let adder = ExtensionType::create(Adder).unwrap();
    let tp_call = ExtensionType::<Adder>::ready().unwrap().tp_call.unwrap();

    let not_a_tuple = builtins::int(42);
    let out = unsafe { tp_call(adder.as_ptr(), not_a_tuple.as_ptr(), std::ptr::null_mut()) };
    assert!(out.is_null());
    assert!(bridge::matches(ExceptionKind::TYPE_ERROR));
    bridge::clear();

    let args = builtins::tuple(vec![builtins::int(1)]);
    let not_a_dict = builtins::str("k");
    let out = unsafe { tp_call(adder.as_ptr(), args.as_ptr(), not_a_dict.as_ptr()) };
    assert!(out.is_null());
    assert!(bridge::matches(ExceptionKind::TYPE_ERROR));
    bridge::clear();
}

#[test]
fn print_writes_through_the_stream() {
    let adder = ExtensionType::create(Adder).unwrap();
    let mut out = Vec::new();
    ops::print_to(&adder, &mut out).unwrap();
    assert_eq!(out, b"<Adder>");
}

struct Bytes {
    data: Box<[u8]>,
}

impl ExtensionObject for Bytes {
    const NAME: &'static str = "Bytes";

    fn init_type(builder: &mut TypeBuilder<Self>) -> ExtResult<()> {
        builder.support_buffer(flags::buffer::READ | flags::buffer::SEGCOUNT);
        Ok(())
    }

    fn buffer_getreadbuffer(&self, segment: isize) -> ExtResult<BufferSegment> {
        if segment != 0 {
            return Err(ExtError::raised(
                ExceptionKind::SYSTEM_ERROR,
                "accessing non-existent segment",
            ));
        }
        Ok(BufferSegment {
            ptr: self.data.as_ptr() as *mut c_void,
            len: self.data.len() as isize,
        })
    }

    fn buffer_getsegcount(&self) -> ExtResult<(isize, isize)> {
        Ok((1, self.data.len() as isize))
    }
}

#[test]
fn buffer_exposes_the_backing_bytes() {
    let handle = Ext::new(Bytes {
        data: b"ferrule".to_vec().into_boxed_slice(),
    })
    .unwrap();
    let obj = handle.as_object();
    assert_eq!(ops::buffer_segment_count(obj), Some((1, 7)));
    let (ptr, len) = ops::buffer_read(obj, 0).unwrap();
    assert_eq!(ptr as *const u8, handle.get().unwrap().data.as_ptr());
    assert_eq!(len, 7);
    assert!(ops::buffer_read(obj, 3).is_none());
    assert!(bridge::matches(ExceptionKind::SYSTEM_ERROR));
    bridge::clear();
    // Write access was never enabled.
    assert!(ops::buffer_write(obj, 0).is_none());
    assert!(bridge::matches(ExceptionKind::TYPE_ERROR));
    bridge::clear();
}
