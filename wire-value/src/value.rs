//! The polymorphic tagged [`Value`] type (spec §3).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::signature::{self, SignatureBuf};

/// A D-Bus value of any supported type, self-describing via its [`Value::signature`].
///
/// Values are immutable once constructed (invariant 1: every payload matches its signature;
/// no `Value` is ever half-built). Primitives are held by value; compound payloads
/// (`Array`/`Structure`/`Dict`) are reference-counted internally, so cloning a `Value` is
/// always cheap and cycles are structurally impossible (values form a tree).
#[derive(Debug, Clone)]
pub enum Value {
    Byte(u8),
    Bool(bool),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F64(f64),
    /// UTF-8 text with no interior NUL. Distinct from `ObjectPath`/`Signature` even though all
    /// three carry text, because the wire encoding differs (spec §3).
    Str(Arc<str>),
    ObjectPath(Arc<str>),
    Signature(Arc<str>),
    Array(Array),
    Structure(Structure),
    Dict(Dict),
    Variant(Arc<Value>),
}

// Every compound payload is `Arc`-backed (see above), so `Value` should stay small regardless of
// how many variants this enum grows; a regression here usually means a new variant was added as
// an inline payload instead of behind a handle.
static_assertions::const_assert!(std::mem::size_of::<Value>() <= 64);
static_assertions::assert_impl_all!(Value: Send, Sync);

impl Value {
    /// A validated string value.
    pub fn new_string(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        validate_text(&s)?;
        Ok(Value::Str(Arc::from(s)))
    }

    /// A validated object path value (spec §3: "object paths ... satisfy their additional
    /// syntactic constraints (validated on construction when supplied by library users)").
    pub fn new_object_path(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        validate_object_path(&s)?;
        Ok(Value::ObjectPath(Arc::from(s)))
    }

    /// A validated signature-as-value (the `g` type; not to be confused with a `Value`'s own
    /// [`Value::signature`]).
    pub fn new_signature(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        validate_text(&s)?;
        signature::validate(&s)?;
        Ok(Value::Signature(Arc::from(s)))
    }

    /// Wrap `self` in a variant.
    pub fn into_variant(self) -> Value {
        Value::Variant(Arc::new(self))
    }

    /// The signature describing this value's shape. Authoritative: every codec decision is
    /// driven off a signature, and this is how a `Value` reports its own.
    pub fn signature(&self) -> SignatureBuf {
        match self {
            Value::Byte(_) => SignatureBuf::new_unchecked("y"),
            Value::Bool(_) => SignatureBuf::new_unchecked("b"),
            Value::I16(_) => SignatureBuf::new_unchecked("n"),
            Value::U16(_) => SignatureBuf::new_unchecked("q"),
            Value::I32(_) => SignatureBuf::new_unchecked("i"),
            Value::U32(_) => SignatureBuf::new_unchecked("u"),
            Value::I64(_) => SignatureBuf::new_unchecked("x"),
            Value::U64(_) => SignatureBuf::new_unchecked("t"),
            Value::F64(_) => SignatureBuf::new_unchecked("d"),
            Value::Str(_) => SignatureBuf::new_unchecked("s"),
            Value::ObjectPath(_) => SignatureBuf::new_unchecked("o"),
            Value::Signature(_) => SignatureBuf::new_unchecked("g"),
            Value::Array(a) => a.signature(),
            Value::Structure(s) => s.signature(),
            Value::Dict(d) => d.signature(),
            Value::Variant(_) => SignatureBuf::new_unchecked("v"),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) | Value::Signature(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&Structure> {
        match self {
            Value::Structure(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Unwrap one level of variant boxing, if this is a variant.
    pub fn as_variant(&self) -> Option<&Value> {
        match self {
            Value::Variant(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this is the zero-field tuple produced for an empty-signature body
    /// (spec §4.1: "the empty signature decodes to an empty tuple Value").
    pub fn is_empty_value(&self) -> bool {
        matches!(self, Value::Structure(s) if s.is_empty())
    }
}

/// Values compare structurally: two `Value`s are equal iff their signatures match and their
/// payloads are deeply equal (spec §3: "deep equality").
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::ObjectPath(a), Value::ObjectPath(b)) => a == b,
            (Value::Signature(a), Value::Signature(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Structure(a), Value::Structure(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Variant(a), Value::Variant(b)) => a == b,
            _ => false,
        }
    }
}

fn validate_text(s: &str) -> Result<()> {
    if s.contains('\0') {
        return Err(Error::InvalidText(format!(
            "`{s}` contains an interior NUL byte"
        )));
    }
    Ok(())
}

/// Validate D-Bus object path syntax: begins with `/`, contains no `//`, no trailing `/`
/// unless the path is exactly `/`, and each component is `[A-Za-z0-9_]+`.
pub(crate) fn validate_object_path(s: &str) -> Result<()> {
    validate_text(s)?;
    if !s.starts_with('/') {
        return Err(Error::InvalidObjectPath(s.to_string()));
    }
    if s == "/" {
        return Ok(());
    }
    if s.ends_with('/') {
        return Err(Error::InvalidObjectPath(s.to_string()));
    }
    for component in s[1..].split('/') {
        if component.is_empty()
            || !component
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(Error::InvalidObjectPath(s.to_string()));
        }
    }
    Ok(())
}

/// A homogeneous array of a declared element signature.
#[derive(Debug, Clone)]
pub struct Array {
    element_signature: SignatureBuf,
    elements: Arc<[Value]>,
}

impl Array {
    pub fn element_signature(&self) -> &SignatureBuf {
        &self.element_signature
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.elements.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.elements.iter()
    }

    pub fn signature(&self) -> SignatureBuf {
        SignatureBuf::new_unchecked(format!("a{}", self.element_signature))
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.element_signature == other.element_signature && self.elements == other.elements
    }
}

impl<'a> IntoIterator for &'a Array {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Accumulates elements of a declared signature, finalised into a single [`Value::Array`].
pub struct ArrayBuilder {
    element_signature: SignatureBuf,
    elements: Vec<Value>,
}

impl ArrayBuilder {
    pub fn new(element_signature: impl TryInto<SignatureBuf, Error = Error>) -> Result<Self> {
        let element_signature = element_signature.try_into()?;
        if element_signature.is_empty() {
            return Err(Error::InvalidSignature(
                "array element signature must not be empty".into(),
            ));
        }
        // Must be exactly one complete type.
        let parts = element_signature.complete_types()?;
        if parts.len() != 1 {
            return Err(Error::InvalidSignature(format!(
                "array element signature `{element_signature}` is not a single complete type"
            )));
        }
        Ok(Self {
            element_signature,
            elements: Vec::new(),
        })
    }

    pub fn append(&mut self, value: Value) -> Result<&mut Self> {
        if value.signature() != self.element_signature {
            return Err(Error::conversion(
                self.element_signature.to_string(),
                format!(
                    "array element has signature `{}`, expected `{}`",
                    value.signature(),
                    self.element_signature
                ),
            ));
        }
        self.elements.push(value);
        Ok(self)
    }

    pub fn build(self) -> Value {
        Value::Array(Array {
            element_signature: self.element_signature,
            elements: Arc::from(self.elements),
        })
    }
}

/// An ordered, heterogeneous tuple of Values.
#[derive(Debug, Clone)]
pub struct Structure {
    fields: Arc<[Value]>,
    signature: SignatureBuf,
}

impl Structure {
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    pub fn signature(&self) -> SignatureBuf {
        self.signature.clone()
    }

    /// The zero-field tuple used for an empty method-result list (spec §4.1: "the empty
    /// signature `\"\"` decodes to an empty tuple Value").
    pub fn unit() -> Structure {
        Structure {
            fields: Arc::from(Vec::new()),
            signature: SignatureBuf::new_unchecked(""),
        }
    }
}

impl PartialEq for Structure {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

/// Accumulates fields, finalised into a single [`Value::Structure`].
pub struct StructureBuilder {
    fields: Vec<Value>,
}

impl StructureBuilder {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn append(&mut self, value: Value) -> &mut Self {
        self.fields.push(value);
        self
    }

    pub fn build(self) -> Value {
        if self.fields.is_empty() {
            return Value::Structure(Structure::unit());
        }
        let mut sig = String::from("(");
        for f in &self.fields {
            sig.push_str(f.signature().as_str());
        }
        sig.push(')');
        Value::Structure(Structure {
            fields: Arc::from(self.fields),
            signature: SignatureBuf::new_unchecked(sig),
        })
    }
}

impl Default for StructureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered collection of `(key, value)` pairs. Deliberately a `Vec`, not a `HashMap`: the
/// wire order of a dictionary's entries is significant to round-tripping (invariant 1) and
/// D-Bus itself defines a dict entry as an array element, not a set.
#[derive(Debug, Clone)]
pub struct Dict {
    key_signature: SignatureBuf,
    value_signature: SignatureBuf,
    entries: Arc<[(Value, Value)]>,
}

impl Dict {
    pub fn key_signature(&self) -> &SignatureBuf {
        &self.key_signature
    }

    pub fn value_signature(&self) -> &SignatureBuf {
        &self.value_signature
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (Value, Value)> {
        self.entries.iter()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn signature(&self) -> SignatureBuf {
        SignatureBuf::new_unchecked(format!(
            "a{{{}{}}}",
            self.key_signature, self.value_signature
        ))
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.key_signature == other.key_signature
            && self.value_signature == other.value_signature
            && self.entries == other.entries
    }
}

/// Accumulates `(key, value)` pairs, finalised into a single [`Value::Dict`].
///
/// Enforces invariant 2 at construction: dictionary keys must be primitive or string-like.
pub struct DictBuilder {
    key_signature: SignatureBuf,
    value_signature: SignatureBuf,
    entries: Vec<(Value, Value)>,
}

impl DictBuilder {
    pub fn new(
        key_signature: impl TryInto<SignatureBuf, Error = Error>,
        value_signature: impl TryInto<SignatureBuf, Error = Error>,
    ) -> Result<Self> {
        let key_signature = key_signature.try_into()?;
        let value_signature = value_signature.try_into()?;
        if !signature::is_basic(key_signature.as_str()) {
            return Err(Error::NonBasicDictKey(key_signature.to_string()));
        }
        if value_signature.complete_types()?.len() != 1 {
            return Err(Error::InvalidSignature(format!(
                "dict value signature `{value_signature}` is not a single complete type"
            )));
        }
        Ok(Self {
            key_signature,
            value_signature,
            entries: Vec::new(),
        })
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<&mut Self> {
        if key.signature() != self.key_signature {
            return Err(Error::conversion(
                self.key_signature.to_string(),
                format!("dict key has signature `{}`", key.signature()),
            ));
        }
        if value.signature() != self.value_signature {
            return Err(Error::conversion(
                self.value_signature.to_string(),
                format!("dict value has signature `{}`", value.signature()),
            ));
        }
        self.entries.push((key, value));
        Ok(self)
    }

    pub fn build(self) -> Value {
        Value::Dict(Dict {
            key_signature: self.key_signature,
            value_signature: self.value_signature,
            entries: Arc::from(self.entries),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_match_expectations() {
        assert_eq!(Value::Byte(1).signature().as_str(), "y");
        assert_eq!(
            Value::new_string("hi").unwrap().signature().as_str(),
            "s"
        );
        assert_eq!(
            Value::new_object_path("/a/b").unwrap().signature().as_str(),
            "o"
        );
    }

    #[test]
    fn rejects_invalid_object_paths() {
        assert!(Value::new_object_path("no-leading-slash").is_err());
        assert!(Value::new_object_path("/trailing/").is_err());
        assert!(Value::new_object_path("/a//b").is_err());
        assert!(Value::new_object_path("/").is_ok());
    }

    #[test]
    fn array_builder_enforces_homogeneity() {
        let mut b = ArrayBuilder::new("i").unwrap();
        b.append(Value::I32(1)).unwrap();
        assert!(b.append(Value::Byte(2)).is_err());
        let v = b.build();
        assert_eq!(v.signature().as_str(), "ai");
    }

    #[test]
    fn dict_builder_rejects_compound_key() {
        assert!(DictBuilder::new("(i)", "s").is_err());
        assert!(DictBuilder::new("s", "v").is_ok());
    }

    #[test]
    fn structure_builder_unit() {
        let v = StructureBuilder::new().build();
        assert_eq!(v.signature().as_str(), "");
    }

    #[test]
    fn variant_nesting() {
        let inner = Value::Byte(7).into_variant();
        let outer = inner.clone().into_variant();
        assert_eq!(outer.signature().as_str(), "v");
        assert_eq!(outer.as_variant().unwrap(), &inner);
    }
}
