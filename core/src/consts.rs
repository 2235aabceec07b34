//! Target-machine constants shared by layout and code generation. The
//! backend targets 32-bit x86.

/// Size of any pointer, including the hidden vtable pointer slot.
pub const POINTER_SIZE: u32 = 4;
/// Size of `int`.
pub const INT_SIZE: u32 = 4;
/// Size of `char`.
pub const CHAR_SIZE: u32 = 1;
/// Symbol the generated program starts from.
pub const ENTRY_SYMBOL: &str = "main";
