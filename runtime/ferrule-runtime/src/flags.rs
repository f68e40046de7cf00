//! Operation masks accepted by the `TypeBuilder::support_*` family setters.

pub mod sequence {
    pub const LENGTH: u32 = 1 << 0;
    pub const CONCAT: u32 = 1 << 1;
    pub const REPEAT: u32 = 1 << 2;
    pub const ITEM: u32 = 1 << 3;
    pub const SLICE: u32 = 1 << 4;
    pub const ASS_ITEM: u32 = 1 << 5;
    pub const ASS_SLICE: u32 = 1 << 6;
    pub const INPLACE_CONCAT: u32 = 1 << 7;
    pub const INPLACE_REPEAT: u32 = 1 << 8;
    pub const CONTAINS: u32 = 1 << 9;
    pub const ALL: u32 = (1 << 10) - 1;
}

pub mod mapping {
    pub const LENGTH: u32 = 1 << 0;
    pub const SUBSCRIPT: u32 = 1 << 1;
    pub const ASS_SUBSCRIPT: u32 = 1 << 2;
    pub const ALL: u32 = (1 << 3) - 1;
}

pub mod number {
    pub const ADD: u32 = 1 << 0;
    pub const SUBTRACT: u32 = 1 << 1;
    pub const MULTIPLY: u32 = 1 << 2;
    pub const DIVIDE: u32 = 1 << 3;
    pub const REMAINDER: u32 = 1 << 4;
    pub const DIVMOD: u32 = 1 << 5;
    pub const POWER: u32 = 1 << 6;
    pub const NEGATIVE: u32 = 1 << 7;
    pub const POSITIVE: u32 = 1 << 8;
    pub const ABSOLUTE: u32 = 1 << 9;
    pub const NONZERO: u32 = 1 << 10;
    pub const INVERT: u32 = 1 << 11;
    pub const LSHIFT: u32 = 1 << 12;
    pub const RSHIFT: u32 = 1 << 13;
    pub const AND: u32 = 1 << 14;
    pub const XOR: u32 = 1 << 15;
    pub const OR: u32 = 1 << 16;
    pub const INT: u32 = 1 << 17;
    pub const LONG: u32 = 1 << 18;
    pub const FLOAT: u32 = 1 << 19;
    pub const OCT: u32 = 1 << 20;
    pub const HEX: u32 = 1 << 21;
    pub const ALL: u32 = (1 << 22) - 1;
}

pub mod buffer {
    pub const READ: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    pub const SEGCOUNT: u32 = 1 << 2;
    pub const ALL: u32 = (1 << 3) - 1;
}

pub mod iter {
    pub const ITER: u32 = 1 << 0;
    pub const NEXT: u32 = 1 << 1;
    pub const ALL: u32 = (1 << 2) - 1;
}
