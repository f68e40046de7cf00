//! Assembles the host type object for an extension type.
//!
//! Each `support_*` call installs the trampolines for the requested
//! operations. Protocol sub-tables are allocated on first use and only ever
//! gain slots afterwards.

use std::ffi::CString;
use std::marker::PhantomData;
use std::mem::{offset_of, size_of};

use ferrule_obj_model::abi::{
    self, BufferProcs, MappingMethods, NumberMethods, SequenceMethods, TPFLAGS_BASETYPE,
    TypeObject,
};
use ferrule_obj_model::builtins::InstanceObject;
use tracing::debug;

use crate::dispatch::{buffer, mapping, number, object, sequence};
use crate::error::{ExtError, ExtResult};
use crate::extension::{ExtensionCell, ExtensionObject, Registered};
use crate::flags;
use crate::method::{Method, MethodId, MethodTable};

pub struct TypeBuilder<T> {
    table: Box<TypeObject>,
    sequence: Option<Box<SequenceMethods>>,
    mapping: Option<Box<MappingMethods>>,
    number: Option<Box<NumberMethods>>,
    buffer: Option<Box<BufferProcs>>,
    name: String,
    doc: Option<String>,
    methods: MethodTable<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ExtensionObject> TypeBuilder<T> {
    pub fn new() -> Self {
        Self {
            table: Box::new(TypeObject::new(c"", size_of::<ExtensionCell<T>>())),
            sequence: None,
            mapping: None,
            number: None,
            buffer: None,
            name: T::NAME.to_owned(),
            doc: T::DOC.map(str::to_owned),
            methods: MethodTable::new(),
            _marker: PhantomData,
        }
    }

    pub fn name(&mut self, name: &str) -> &mut Self {
        self.name = name.to_owned();
        self
    }

    pub fn doc(&mut self, doc: &str) -> &mut Self {
        self.doc = Some(doc.to_owned());
        self
    }

    /// Let the host derive subclasses from this type (`BASETYPE`).
    pub fn support_class(&mut self) -> &mut Self {
        self.table.tp_flags |= TPFLAGS_BASETYPE;
        self
    }

    pub fn support_repr(&mut self) -> &mut Self {
        self.table.tp_repr = Some(object::repr::<T>);
        self
    }

    pub fn support_str(&mut self) -> &mut Self {
        self.table.tp_str = Some(object::str::<T>);
        self
    }

    pub fn support_hash(&mut self) -> &mut Self {
        self.table.tp_hash = Some(object::hash::<T>);
        self
    }

    pub fn support_call(&mut self) -> &mut Self {
        self.table.tp_call = Some(object::call::<T>);
        self
    }

    pub fn support_print(&mut self) -> &mut Self {
        self.table.tp_print = Some(object::print::<T>);
        self
    }

    pub fn support_compare(&mut self) -> &mut Self {
        self.table.tp_compare = Some(object::compare::<T>);
        self
    }

    pub fn support_rich_compare(&mut self) -> &mut Self {
        self.table.tp_richcompare = Some(object::rich_compare::<T>);
        self
    }

    pub fn support_getattr(&mut self) -> &mut Self {
        self.table.tp_getattr = Some(object::getattr::<T>);
        self
    }

    pub fn support_setattr(&mut self) -> &mut Self {
        self.table.tp_setattr = Some(object::setattr::<T>);
        self
    }

    pub fn support_getattro(&mut self) -> &mut Self {
        self.table.tp_getattro = Some(object::getattro::<T>);
        self
    }

    pub fn support_setattro(&mut self) -> &mut Self {
        self.table.tp_setattro = Some(object::setattro::<T>);
        self
    }

    pub fn support_iter(&mut self, mask: u32) -> &mut Self {
        if mask & flags::iter::ITER != 0 {
            self.table.tp_iter = Some(object::iter::<T>);
        }
        if mask & flags::iter::NEXT != 0 {
            self.table.tp_iternext = Some(object::iternext::<T>);
        }
        self
    }

    pub fn support_sequence(&mut self, mask: u32) -> &mut Self {
        use flags::sequence::*;
        let sq = self.sequence.get_or_insert_with(Box::default);
        if mask & LENGTH != 0 {
            sq.sq_length = Some(sequence::length::<T>);
        }
        if mask & CONCAT != 0 {
            sq.sq_concat = Some(sequence::concat::<T>);
        }
        if mask & REPEAT != 0 {
            sq.sq_repeat = Some(sequence::repeat::<T>);
        }
        if mask & ITEM != 0 {
            sq.sq_item = Some(sequence::item::<T>);
        }
        if mask & SLICE != 0 {
            sq.sq_slice = Some(sequence::slice::<T>);
        }
        if mask & ASS_ITEM != 0 {
            sq.sq_ass_item = Some(sequence::ass_item::<T>);
        }
        if mask & ASS_SLICE != 0 {
            sq.sq_ass_slice = Some(sequence::ass_slice::<T>);
        }
        if mask & INPLACE_CONCAT != 0 {
            sq.sq_inplace_concat = Some(sequence::inplace_concat::<T>);
        }
        if mask & INPLACE_REPEAT != 0 {
            sq.sq_inplace_repeat = Some(sequence::inplace_repeat::<T>);
        }
        if mask & CONTAINS != 0 {
            sq.sq_contains = Some(sequence::contains::<T>);
        }
        self.table.tp_as_sequence = &**sq;
        self
    }

    pub fn support_mapping(&mut self, mask: u32) -> &mut Self {
        use flags::mapping::*;
        let mp = self.mapping.get_or_insert_with(Box::default);
        if mask & LENGTH != 0 {
            mp.mp_length = Some(mapping::length::<T>);
        }
        if mask & SUBSCRIPT != 0 {
            mp.mp_subscript = Some(mapping::subscript::<T>);
        }
        if mask & ASS_SUBSCRIPT != 0 {
            mp.mp_ass_subscript = Some(mapping::ass_subscript::<T>);
        }
        self.table.tp_as_mapping = &**mp;
        self
    }

    pub fn support_number(&mut self, mask: u32) -> &mut Self {
        use flags::number::*;
        let nb = self.number.get_or_insert_with(Box::default);
        if mask & ADD != 0 {
            nb.nb_add = Some(number::add::<T>);
        }
        if mask & SUBTRACT != 0 {
            nb.nb_subtract = Some(number::subtract::<T>);
        }
        if mask & MULTIPLY != 0 {
            nb.nb_multiply = Some(number::multiply::<T>);
        }
        if mask & DIVIDE != 0 {
            nb.nb_divide = Some(number::divide::<T>);
        }
        if mask & REMAINDER != 0 {
            nb.nb_remainder = Some(number::remainder::<T>);
        }
        if mask & DIVMOD != 0 {
            nb.nb_divmod = Some(number::divmod::<T>);
        }
        if mask & POWER != 0 {
            nb.nb_power = Some(number::power::<T>);
        }
        if mask & NEGATIVE != 0 {
            nb.nb_negative = Some(number::negative::<T>);
        }
        if mask & POSITIVE != 0 {
            nb.nb_positive = Some(number::positive::<T>);
        }
        if mask & ABSOLUTE != 0 {
            nb.nb_absolute = Some(number::absolute::<T>);
        }
        if mask & NONZERO != 0 {
            nb.nb_nonzero = Some(number::nonzero::<T>);
        }
        if mask & INVERT != 0 {
            nb.nb_invert = Some(number::invert::<T>);
        }
        if mask & LSHIFT != 0 {
            nb.nb_lshift = Some(number::lshift::<T>);
        }
        if mask & RSHIFT != 0 {
            nb.nb_rshift = Some(number::rshift::<T>);
        }
        if mask & AND != 0 {
            nb.nb_and = Some(number::and::<T>);
        }
        if mask & XOR != 0 {
            nb.nb_xor = Some(number::xor::<T>);
        }
        if mask & OR != 0 {
            nb.nb_or = Some(number::or::<T>);
        }
        if mask & INT != 0 {
            nb.nb_int = Some(number::int::<T>);
        }
        if mask & LONG != 0 {
            nb.nb_long = Some(number::long::<T>);
        }
        if mask & FLOAT != 0 {
            nb.nb_float = Some(number::float::<T>);
        }
        if mask & OCT != 0 {
            nb.nb_oct = Some(number::oct::<T>);
        }
        if mask & HEX != 0 {
            nb.nb_hex = Some(number::hex::<T>);
        }
        self.table.tp_as_number = &**nb;
        self
    }

    pub fn support_buffer(&mut self, mask: u32) -> &mut Self {
        use flags::buffer::*;
        let bf = self.buffer.get_or_insert_with(Box::default);
        if mask & READ != 0 {
            bf.bf_getreadbuffer = Some(buffer::read::<T>);
        }
        if mask & WRITE != 0 {
            bf.bf_getwritebuffer = Some(buffer::write::<T>);
        }
        if mask & SEGCOUNT != 0 {
            bf.bf_getsegcount = Some(buffer::segcount::<T>);
        }
        self.table.tp_as_buffer = &**bf;
        self
    }

    /// Register an instance method, reachable by attribute lookup.
    pub fn add_method(
        &mut self,
        name: &str,
        method: Method<T>,
        doc: Option<&str>,
    ) -> ExtResult<MethodId> {
        self.methods.add(name, method, doc)
    }

    pub fn type_object(&self) -> &TypeObject {
        &self.table
    }

    pub fn sequence_table(&self) -> Option<&SequenceMethods> {
        self.sequence.as_deref()
    }

    pub fn mapping_table(&self) -> Option<&MappingMethods> {
        self.mapping.as_deref()
    }

    pub fn number_table(&self) -> Option<&NumberMethods> {
        self.number.as_deref()
    }

    pub fn buffer_table(&self) -> Option<&BufferProcs> {
        self.buffer.as_deref()
    }

    pub fn methods(&self) -> &MethodTable<T> {
        &self.methods
    }

    /// Publish the type: leak the descriptor and its sub-tables, run the
    /// host's validation and freeze the method table.
    pub(crate) fn finalize(self) -> ExtResult<Registered<T>> {
        let TypeBuilder {
            mut table,
            sequence,
            mapping,
            number,
            buffer,
            name,
            doc,
            methods,
            ..
        } = self;

        let c_name = CString::new(name.as_str())
            .map_err(|_| ExtError::Registration(format!("type name {name:?} contains NUL")))?;
        table.tp_name = c_name.into_raw();
        if let Some(doc) = doc {
            let c_doc = CString::new(doc)
                .map_err(|_| ExtError::Registration(format!("{name}: doc contains NUL")))?;
            table.tp_doc = c_doc.into_raw();
        }

        let subclassable = table.has_flag(TPFLAGS_BASETYPE);
        let cell_type = if subclassable {
            table.tp_basicsize = size_of::<InstanceObject>() as isize;
            table.tp_dictoffset = offset_of!(InstanceObject, dict) as isize;
            table.tp_dealloc = Some(object::shell_dealloc::<T>);
            Some(cell_type::<T>(&name)?)
        } else {
            table.tp_dealloc = Some(object::dealloc::<T>);
            None
        };
        if (subclassable || !methods.is_empty())
            && table.tp_getattro.is_none()
            && table.tp_getattr.is_none()
        {
            table.tp_getattro = Some(object::getattro::<T>);
        }
        if subclassable && table.tp_setattro.is_none() && table.tp_setattr.is_none() {
            table.tp_setattro = Some(object::setattro::<T>);
        }

        if let Some(sq) = sequence {
            table.tp_as_sequence = Box::leak(sq);
        }
        if let Some(mp) = mapping {
            table.tp_as_mapping = Box::leak(mp);
        }
        if let Some(nb) = number {
            table.tp_as_number = Box::leak(nb);
        }
        if let Some(bf) = buffer {
            table.tp_as_buffer = Box::leak(bf);
        }

        let type_object: &'static mut TypeObject = Box::leak(table);
        if unsafe { abi::type_ready(&mut *type_object) } < 0 {
            let err = ExtError::fetch();
            return Err(ExtError::Registration(format!(
                "{name}: {}",
                err.message().unwrap_or_else(|| err.to_string())
            )));
        }
        methods.freeze();
        debug!(
            type_name = %name,
            subclassable,
            sequence = !type_object.tp_as_sequence.is_null(),
            mapping = !type_object.tp_as_mapping.is_null(),
            number = !type_object.tp_as_number.is_null(),
            buffer = !type_object.tp_as_buffer.is_null(),
            methods = methods.len(),
            "extension type ready"
        );
        Ok(Registered {
            type_object,
            cell_type,
            methods,
        })
    }
}

impl<T: ExtensionObject> Default for TypeBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Hidden host type of the out-of-line cells behind subclassable instances.
fn cell_type<T: ExtensionObject>(name: &str) -> ExtResult<&'static TypeObject> {
    let c_name = CString::new(format!("{name}.__cell__"))
        .map_err(|_| ExtError::Registration(format!("type name {name:?} contains NUL")))?;
    let mut ty = TypeObject::new(c"", size_of::<ExtensionCell<T>>());
    ty.tp_name = c_name.into_raw();
    ty.tp_dealloc = Some(object::dealloc::<T>);
    let ty: &'static mut TypeObject = Box::leak(Box::new(ty));
    if unsafe { abi::type_ready(&mut *ty) } < 0 {
        return Err(ExtError::Registration(format!(
            "{name}: cell type rejected: {}",
            ExtError::fetch()
        )));
    }
    Ok(ty)
}
