//! Signature-driven, always-owned value model for D-Bus wire data, and a codec converting it
//! to and from an abstract cursor (spec §6's transport boundary).
//!
//! ```
//! use wire_value::{Value, memory::{MemoryAppend, MemoryRead}, codec};
//!
//! let v = Value::new_string("hi").unwrap();
//! let mut append = MemoryAppend::new();
//! codec::encode_one(&mut append, "s", &v).unwrap();
//! let built = append.finish();
//! let mut read = MemoryRead::new(&built);
//! assert_eq!(codec::decode_one(&mut read).unwrap(), v);
//! ```

pub mod codec;
pub mod cursor;
pub mod error;
pub mod memory;
pub mod signature;
pub mod value;

pub use cursor::{AppendCursor, ArgType, BasicValue, ContainerKind, FixedSlice, FixedVec, ReadCursor};
pub use error::{Error, Result};
pub use signature::SignatureBuf;
pub use value::{Array, ArrayBuilder, Dict, DictBuilder, Structure, StructureBuilder, Value};
