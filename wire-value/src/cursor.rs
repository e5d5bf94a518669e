//! The wire-level boundary the codec talks to (spec §6).
//!
//! These traits describe, not implement, the "read cursor"/"append cursor" abstractions a
//! concrete transport exposes over a message body (`get_arg_type`, `get_signature`, `recurse`,
//! `next`, `get_basic`, `get_fixed_array`, `open_container`, `append_basic`,
//! `append_fixed_array`, `close_container`). The actual framing, byte order and socket I/O that
//! implement them are out of this crate's scope; a transport crate implements `ReadCursor` and
//! `AppendCursor` over its own message-body representation, and [`crate::codec`] drives them.
//!
//! [`crate::memory`] provides a reference implementation over an already-built [`crate::Value`]
//! tree, useful for transports that keep the whole body in memory and for tests.

use std::fmt;

/// The D-Bus type class at the cursor's current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Byte,
    Boolean,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    String,
    ObjectPath,
    Signature,
    Array,
    Struct,
    Variant,
    /// The end of the current container; `next()` having returned `false` is the normal way
    /// to discover this, but cursors may also report it directly.
    Invalid,
}

/// The kind of container a write side is about to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Array,
    Struct,
    Variant,
    DictEntry,
}

/// A decoded (or about-to-be-encoded) basic value, as returned by `get_basic`/accepted by
/// `append_basic`. String-likes borrow from the cursor's underlying storage.
#[derive(Debug, Clone, PartialEq)]
pub enum BasicValue<'a> {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(&'a str),
    ObjectPath(&'a str),
    Signature(&'a str),
}

impl<'a> BasicValue<'a> {
    pub fn arg_type(&self) -> ArgType {
        match self {
            BasicValue::Byte(_) => ArgType::Byte,
            BasicValue::Boolean(_) => ArgType::Boolean,
            BasicValue::Int16(_) => ArgType::Int16,
            BasicValue::Uint16(_) => ArgType::Uint16,
            BasicValue::Int32(_) => ArgType::Int32,
            BasicValue::Uint32(_) => ArgType::Uint32,
            BasicValue::Int64(_) => ArgType::Int64,
            BasicValue::Uint64(_) => ArgType::Uint64,
            BasicValue::Double(_) => ArgType::Double,
            BasicValue::String(_) => ArgType::String,
            BasicValue::ObjectPath(_) => ArgType::ObjectPath,
            BasicValue::Signature(_) => ArgType::Signature,
        }
    }
}

/// A block of fixed-width primitives, as used by the bulk-append/bulk-read fast path for
/// arrays of fixed-width elements (spec §4.1).
#[derive(Debug, Clone, PartialEq)]
pub enum FixedSlice<'a> {
    Byte(&'a [u8]),
    Boolean(&'a [bool]),
    Int16(&'a [i16]),
    Uint16(&'a [u16]),
    Int32(&'a [i32]),
    Uint32(&'a [u32]),
    Int64(&'a [i64]),
    Uint64(&'a [u64]),
    Double(&'a [f64]),
}

impl<'a> FixedSlice<'a> {
    pub fn len(&self) -> usize {
        match self {
            FixedSlice::Byte(s) => s.len(),
            FixedSlice::Boolean(s) => s.len(),
            FixedSlice::Int16(s) => s.len(),
            FixedSlice::Uint16(s) => s.len(),
            FixedSlice::Int32(s) => s.len(),
            FixedSlice::Uint32(s) => s.len(),
            FixedSlice::Int64(s) => s.len(),
            FixedSlice::Uint64(s) => s.len(),
            FixedSlice::Double(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An owned counterpart to [`FixedSlice`], used when a cursor can't hand back a borrowed slice
/// (e.g. it decoded into a packed byte buffer of a different element width).
#[derive(Debug, Clone, PartialEq)]
pub enum FixedVec {
    Byte(Vec<u8>),
    Boolean(Vec<bool>),
    Int16(Vec<i16>),
    Uint16(Vec<u16>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
    Int64(Vec<i64>),
    Uint64(Vec<u64>),
    Double(Vec<f64>),
}

impl FixedVec {
    pub fn as_slice(&self) -> FixedSlice<'_> {
        match self {
            FixedVec::Byte(v) => FixedSlice::Byte(v),
            FixedVec::Boolean(v) => FixedSlice::Boolean(v),
            FixedVec::Int16(v) => FixedSlice::Int16(v),
            FixedVec::Uint16(v) => FixedSlice::Uint16(v),
            FixedVec::Int32(v) => FixedSlice::Int32(v),
            FixedVec::Uint32(v) => FixedSlice::Uint32(v),
            FixedVec::Int64(v) => FixedSlice::Int64(v),
            FixedVec::Uint64(v) => FixedSlice::Uint64(v),
            FixedVec::Double(v) => FixedSlice::Double(v),
        }
    }
}

impl<'a> From<FixedSlice<'a>> for FixedVec {
    fn from(s: FixedSlice<'a>) -> Self {
        match s {
            FixedSlice::Byte(v) => FixedVec::Byte(v.to_vec()),
            FixedSlice::Boolean(v) => FixedVec::Boolean(v.to_vec()),
            FixedSlice::Int16(v) => FixedVec::Int16(v.to_vec()),
            FixedSlice::Uint16(v) => FixedVec::Uint16(v.to_vec()),
            FixedSlice::Int32(v) => FixedVec::Int32(v.to_vec()),
            FixedSlice::Uint32(v) => FixedVec::Uint32(v.to_vec()),
            FixedSlice::Int64(v) => FixedVec::Int64(v.to_vec()),
            FixedSlice::Uint64(v) => FixedVec::Uint64(v.to_vec()),
            FixedSlice::Double(v) => FixedVec::Double(v.to_vec()),
        }
    }
}

/// A read-only cursor positioned at one complete type within a message body.
///
/// Mirrors the wire transport's iterator: `arg_type`/`container_signature` describe the
/// current position, `recurse` descends into a container, `next` advances to the following
/// sibling at the same depth.
pub trait ReadCursor: Sized {
    /// The type at the current position, or [`ArgType::Invalid`] if the cursor is exhausted.
    fn arg_type(&self) -> ArgType;

    /// For [`ArgType::Array`]: the element signature. For [`ArgType::Variant`]: the signature
    /// of the single complete type the variant contains. For [`ArgType::Struct`]: the
    /// concatenated signature of its fields. Meaningless (and never called) for basic types.
    fn container_signature(&self) -> &str;

    /// Descend into the container at the current position. The returned cursor is positioned
    /// at the container's first element (or is immediately exhausted, for an empty array).
    fn recurse(&self) -> Self;

    /// Advance to the next sibling. Returns `false` if there was no next sibling (the caller
    /// has reached the end of the enclosing container).
    fn next(&mut self) -> bool;

    /// Read the basic value at the current position. Only valid when `arg_type()` names a
    /// basic type.
    fn get_basic(&self) -> BasicValue<'_>;

    /// Bulk-read a fixed-width array in one block. Only valid when `arg_type() == Array` and
    /// `container_signature()` names a fixed-width primitive.
    fn get_fixed_array(&self) -> FixedSlice<'_>;
}

/// A write-only cursor appending one complete type at a time.
pub trait AppendCursor: Sized {
    /// Open a container of the given kind and element/field signature, returning a cursor for
    /// its contents. The signature is the element type for `Array`/`DictEntry`, the inner type
    /// for `Variant`, or the full field-list signature for `Struct`.
    fn open_container(&mut self, kind: ContainerKind, signature: &str) -> crate::Result<Self>;

    /// Close a container previously returned by `open_container`, folding its writes back into
    /// `self`.
    fn close_container(&mut self, sub: Self) -> crate::Result<()>;

    /// Append one basic value.
    fn append_basic(&mut self, value: BasicValue<'_>) -> crate::Result<()>;

    /// Bulk-append a fixed-width array in one block, without allocating per element.
    fn append_fixed_array(&mut self, elements: FixedSlice<'_>) -> crate::Result<()>;
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            ArgType::Byte => 'y',
            ArgType::Boolean => 'b',
            ArgType::Int16 => 'n',
            ArgType::Uint16 => 'q',
            ArgType::Int32 => 'i',
            ArgType::Uint32 => 'u',
            ArgType::Int64 => 'x',
            ArgType::Uint64 => 't',
            ArgType::Double => 'd',
            ArgType::String => 's',
            ArgType::ObjectPath => 'o',
            ArgType::Signature => 'g',
            ArgType::Array => 'a',
            ArgType::Struct => '(',
            ArgType::Variant => 'v',
            ArgType::Invalid => '\0',
        };
        write!(f, "{c}")
    }
}
