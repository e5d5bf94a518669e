//! A reference [`ReadCursor`]/[`AppendCursor`] pair over an already-built [`Value`] tree.
//!
//! No real transport keeps a whole message body as a live `Value` tree (that's what the codec
//! produces, not what it reads from) — this is scaffolding for this crate's own round-trip
//! tests, and a starting point for a transport that wants to decode into a `Value` tree first
//! and defer wire framing entirely to something else.

use std::cell::OnceCell;

use crate::cursor::{
    AppendCursor, ArgType, BasicValue, ContainerKind, FixedSlice, FixedVec, ReadCursor,
};
use crate::error::{Error, Result};
use crate::signature::{self, SignatureBuf};
use crate::value::{Array, ArrayBuilder, Dict, DictBuilder, Structure, StructureBuilder, Value};

#[derive(Clone, Copy)]
enum Node<'a> {
    V(&'a Value),
    /// A dict's `(key, value)` pair, addressed as if it were a two-field struct.
    Entry(&'a Value, &'a Value),
}

fn value_arg_type(v: &Value) -> ArgType {
    match v {
        Value::Byte(_) => ArgType::Byte,
        Value::Bool(_) => ArgType::Boolean,
        Value::I16(_) => ArgType::Int16,
        Value::U16(_) => ArgType::Uint16,
        Value::I32(_) => ArgType::Int32,
        Value::U32(_) => ArgType::Uint32,
        Value::I64(_) => ArgType::Int64,
        Value::U64(_) => ArgType::Uint64,
        Value::F64(_) => ArgType::Double,
        Value::Str(_) => ArgType::String,
        Value::ObjectPath(_) => ArgType::ObjectPath,
        Value::Signature(_) => ArgType::Signature,
        // A dict is wire-shaped as an array of entries; it reports Array just like Array does.
        Value::Array(_) | Value::Dict(_) => ArgType::Array,
        Value::Structure(_) => ArgType::Struct,
        Value::Variant(_) => ArgType::Variant,
    }
}

/// Read-only cursor over a borrowed `Value` tree.
pub struct MemoryRead<'a> {
    items: Vec<Node<'a>>,
    index: usize,
    container_sig: String,
    fixed_cache: OnceCell<FixedVec>,
}

impl<'a> MemoryRead<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self::from_items(vec![Node::V(value)])
    }

    fn from_items(items: Vec<Node<'a>>) -> Self {
        let container_sig = items.first().map(container_sig_for).unwrap_or_default();
        Self {
            items,
            index: 0,
            container_sig,
            fixed_cache: OnceCell::new(),
        }
    }

    fn current(&self) -> Option<&Node<'a>> {
        self.items.get(self.index)
    }
}

fn container_sig_for(node: &Node<'_>) -> String {
    match node {
        Node::V(Value::Array(a)) => a.element_signature().as_str().to_string(),
        Node::V(Value::Dict(d)) => format!("{{{}{}}}", d.key_signature(), d.value_signature()),
        Node::V(Value::Variant(inner)) => inner.signature().to_string(),
        Node::V(Value::Structure(s)) => {
            let sig = s.signature();
            let sig = sig.as_str();
            if sig.is_empty() {
                String::new()
            } else {
                sig[1..sig.len() - 1].to_string()
            }
        }
        _ => String::new(),
    }
}

impl<'a> ReadCursor for MemoryRead<'a> {
    fn arg_type(&self) -> ArgType {
        self.current().map(Node::arg_type).unwrap_or(ArgType::Invalid)
    }

    fn container_signature(&self) -> &str {
        &self.container_sig
    }

    fn recurse(&self) -> Self {
        let items = match self.current() {
            Some(Node::V(Value::Array(a))) => a.iter().map(Node::V).collect(),
            Some(Node::V(Value::Dict(d))) => {
                d.iter().map(|(k, v)| Node::Entry(k, v)).collect()
            }
            Some(Node::V(Value::Structure(s))) => s.fields().iter().map(Node::V).collect(),
            Some(Node::V(Value::Variant(inner))) => vec![Node::V(inner.as_ref())],
            Some(Node::Entry(k, v)) => vec![Node::V(k), Node::V(v)],
            _ => Vec::new(),
        };
        Self::from_items(items)
    }

    fn next(&mut self) -> bool {
        if self.index + 1 < self.items.len() {
            self.index += 1;
            self.container_sig = self.current().map(container_sig_for).unwrap_or_default();
            self.fixed_cache = OnceCell::new();
            true
        } else {
            self.index = self.items.len();
            false
        }
    }

    fn get_basic(&self) -> BasicValue<'_> {
        match self.current() {
            Some(Node::V(Value::Byte(b))) => BasicValue::Byte(*b),
            Some(Node::V(Value::Bool(b))) => BasicValue::Boolean(*b),
            Some(Node::V(Value::I16(v))) => BasicValue::Int16(*v),
            Some(Node::V(Value::U16(v))) => BasicValue::Uint16(*v),
            Some(Node::V(Value::I32(v))) => BasicValue::Int32(*v),
            Some(Node::V(Value::U32(v))) => BasicValue::Uint32(*v),
            Some(Node::V(Value::I64(v))) => BasicValue::Int64(*v),
            Some(Node::V(Value::U64(v))) => BasicValue::Uint64(*v),
            Some(Node::V(Value::F64(v))) => BasicValue::Double(*v),
            Some(Node::V(Value::Str(s))) => BasicValue::String(s),
            Some(Node::V(Value::ObjectPath(s))) => BasicValue::ObjectPath(s),
            Some(Node::V(Value::Signature(s))) => BasicValue::Signature(s),
            other => panic!("get_basic called at a non-basic position ({other:?})"),
        }
    }

    fn get_fixed_array(&self) -> FixedSlice<'_> {
        let array = match self.current() {
            Some(Node::V(Value::Array(a))) => a,
            other => panic!("get_fixed_array called at a non-array position ({other:?})"),
        };
        self.fixed_cache
            .get_or_init(|| build_fixed_vec(array))
            .as_slice()
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::V(v) => write!(f, "{v:?}"),
            Node::Entry(k, v) => write!(f, "Entry({k:?}, {v:?})"),
        }
    }
}

impl Node<'_> {
    fn arg_type(&self) -> ArgType {
        match self {
            Node::V(v) => value_arg_type(v),
            Node::Entry(..) => ArgType::Struct,
        }
    }
}

fn build_fixed_vec(array: &Array) -> FixedVec {
    macro_rules! collect {
        ($variant:ident, $pat:path) => {{
            let mut v = Vec::with_capacity(array.len());
            for e in array.iter() {
                match e {
                    $pat(x) => v.push(*x),
                    _ => panic!("array element does not match its own declared element type"),
                }
            }
            FixedVec::$variant(v)
        }};
    }
    match array.element_signature().as_str() {
        "y" => collect!(Byte, Value::Byte),
        "b" => collect!(Boolean, Value::Bool),
        "n" => collect!(Int16, Value::I16),
        "q" => collect!(Uint16, Value::U16),
        "i" => collect!(Int32, Value::I32),
        "u" => collect!(Uint32, Value::U32),
        "x" => collect!(Int64, Value::I64),
        "t" => collect!(Uint64, Value::U64),
        "d" => collect!(Double, Value::F64),
        other => panic!("`{other}` is not a fixed-width primitive"),
    }
}

enum Frame {
    /// The outermost cursor returned by [`MemoryAppend::new`]: accepts exactly one value.
    Root(Option<Value>),
    /// The sub-cursor opened for a variant: accepts exactly one value, wrapped on close.
    Variant(Option<Value>),
    Array {
        element_sig: SignatureBuf,
        items: Vec<Value>,
    },
    Struct {
        fields: Vec<Value>,
    },
    /// The sub-cursor opened over `a{kv}`: accepts closed `DictEntry` frames.
    DictContainer {
        key_sig: SignatureBuf,
        value_sig: SignatureBuf,
        entries: Vec<(Value, Value)>,
    },
    /// The sub-cursor opened for one dict entry: accepts exactly a key then a value.
    DictEntry {
        key: Option<Value>,
        value: Option<Value>,
    },
}

/// Write-only cursor building up a single [`Value`].
pub struct MemoryAppend {
    frame: Frame,
}

impl MemoryAppend {
    pub fn new() -> Self {
        Self {
            frame: Frame::Root(None),
        }
    }

    /// Consume the top-level cursor, returning the value it accumulated. An untouched cursor
    /// (nothing ever appended, as happens for an empty-signature body) yields the empty tuple.
    pub fn finish(self) -> Value {
        match self.frame {
            Frame::Root(Some(v)) => v,
            Frame::Root(None) => Value::Structure(Structure::unit()),
            other => frame_into_value(other).expect("non-root frame finished directly"),
        }
    }

    fn push(&mut self, v: Value) -> Result<()> {
        match &mut self.frame {
            Frame::Root(slot) | Frame::Variant(slot) => {
                *slot = Some(v);
                Ok(())
            }
            Frame::Array { items, .. } => {
                items.push(v);
                Ok(())
            }
            Frame::Struct { fields } => {
                fields.push(v);
                Ok(())
            }
            Frame::DictEntry { key, value } => {
                if key.is_none() {
                    *key = Some(v);
                } else if value.is_none() {
                    *value = Some(v);
                } else {
                    return Err(Error::conversion("", "dict entry already has a key and value"));
                }
                Ok(())
            }
            Frame::DictContainer { .. } => Err(Error::conversion(
                "",
                "append directly to a dict container; open a DictEntry container instead",
            )),
        }
    }
}

impl Default for MemoryAppend {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_into_value(frame: Frame) -> Result<Value> {
    match frame {
        Frame::Root(slot) => Ok(slot.unwrap_or_else(|| Value::Structure(Structure::unit()))),
        Frame::Variant(slot) => Ok(slot
            .expect("a variant container must be appended to before it is closed")
            .into_variant()),
        Frame::Array { element_sig, items } => {
            let mut b = ArrayBuilder::new(element_sig.as_str())?;
            for item in items {
                b.append(item)?;
            }
            Ok(b.build())
        }
        Frame::Struct { fields } => {
            let mut b = StructureBuilder::new();
            for f in fields {
                b.append(f);
            }
            Ok(b.build())
        }
        Frame::DictContainer {
            key_sig,
            value_sig,
            entries,
        } => {
            let mut b = DictBuilder::new(key_sig.as_str(), value_sig.as_str())?;
            for (k, v) in entries {
                b.insert(k, v)?;
            }
            Ok(b.build())
        }
        Frame::DictEntry { key, value } => {
            // Only reached if a caller finishes a DictEntry cursor directly rather than
            // through `close_container`; fall back to a plain 2-field struct.
            let mut b = StructureBuilder::new();
            if let Some(k) = key {
                b.append(k);
            }
            if let Some(v) = value {
                b.append(v);
            }
            Ok(b.build())
        }
    }
}

impl AppendCursor for MemoryAppend {
    fn open_container(&mut self, kind: ContainerKind, signature: &str) -> Result<Self> {
        let frame = match kind {
            ContainerKind::Array => {
                if signature::is_dict_entry(signature) {
                    let inner = &signature[1..signature.len() - 1];
                    let parts = signature::split_complete_types(inner)?;
                    if parts.len() != 2 {
                        return Err(Error::conversion(signature, "dict entry needs 2 fields"));
                    }
                    Frame::DictContainer {
                        key_sig: SignatureBuf::new(parts[0])?,
                        value_sig: SignatureBuf::new(parts[1])?,
                        entries: Vec::new(),
                    }
                } else {
                    Frame::Array {
                        element_sig: SignatureBuf::new(signature)?,
                        items: Vec::new(),
                    }
                }
            }
            ContainerKind::Struct => Frame::Struct { fields: Vec::new() },
            ContainerKind::Variant => Frame::Variant(None),
            ContainerKind::DictEntry => Frame::DictEntry {
                key: None,
                value: None,
            },
        };
        Ok(Self { frame })
    }

    fn close_container(&mut self, sub: Self) -> Result<()> {
        if let (Frame::DictContainer { entries, .. }, Frame::DictEntry { key, value }) =
            (&mut self.frame, &sub.frame)
        {
            entries.push((
                key.clone().expect("dict entry missing its key"),
                value.clone().expect("dict entry missing its value"),
            ));
            return Ok(());
        }
        let value = frame_into_value(sub.frame)?;
        self.push(value)
    }

    fn append_basic(&mut self, value: BasicValue<'_>) -> Result<()> {
        let v = match value {
            BasicValue::Byte(b) => Value::Byte(b),
            BasicValue::Boolean(b) => Value::Bool(b),
            BasicValue::Int16(v) => Value::I16(v),
            BasicValue::Uint16(v) => Value::U16(v),
            BasicValue::Int32(v) => Value::I32(v),
            BasicValue::Uint32(v) => Value::U32(v),
            BasicValue::Int64(v) => Value::I64(v),
            BasicValue::Uint64(v) => Value::U64(v),
            BasicValue::Double(v) => Value::F64(v),
            BasicValue::String(s) => Value::new_string(s)?,
            BasicValue::ObjectPath(s) => Value::new_object_path(s)?,
            BasicValue::Signature(s) => Value::new_signature(s)?,
        };
        self.push(v)
    }

    fn append_fixed_array(&mut self, elements: FixedSlice<'_>) -> Result<()> {
        let items = match &mut self.frame {
            Frame::Array { items, .. } => items,
            _ => {
                return Err(Error::conversion(
                    "",
                    "append_fixed_array called on a non-array cursor",
                ))
            }
        };
        macro_rules! extend {
            ($slice:expr, $ctor:expr) => {
                for &e in $slice {
                    items.push($ctor(e));
                }
            };
        }
        match elements {
            FixedSlice::Byte(s) => extend!(s, Value::Byte),
            FixedSlice::Boolean(s) => extend!(s, Value::Bool),
            FixedSlice::Int16(s) => extend!(s, Value::I16),
            FixedSlice::Uint16(s) => extend!(s, Value::U16),
            FixedSlice::Int32(s) => extend!(s, Value::I32),
            FixedSlice::Uint32(s) => extend!(s, Value::U32),
            FixedSlice::Int64(s) => extend!(s, Value::I64),
            FixedSlice::Uint64(s) => extend!(s, Value::U64),
            FixedSlice::Double(s) => extend!(s, Value::F64),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_primitive() {
        let v = Value::I32(42);
        let mut append = MemoryAppend::new();
        crate::codec::encode_one(&mut append, "i", &v).unwrap();
        let built = append.finish();
        let mut read = MemoryRead::new(&built);
        assert_eq!(crate::codec::decode_one(&mut read).unwrap(), v);
    }
}
