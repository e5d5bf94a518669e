//! Bidirectional conversion between cursors (spec §6) and [`Value`]s (spec §4.1).

use crate::cursor::{
    AppendCursor, ArgType, BasicValue, ContainerKind, FixedSlice, FixedVec, ReadCursor,
};
use crate::error::{Error, Result};
use crate::signature::{self, SignatureBuf};
use crate::value::{Array, ArrayBuilder, DictBuilder, Structure, StructureBuilder, Value};

/// Decode a whole message body: `signature` is the body's full signature (possibly empty),
/// and the result is always a [`Value::Structure`] whose fields are the body's top-level
/// arguments in order. An empty signature produces [`Structure::unit`] without touching the
/// cursor (spec §4.1: "method results with no out-arguments take this path").
pub fn decode_body<C: ReadCursor>(cursor: Option<&mut C>, body_signature: &str) -> Result<Value> {
    if body_signature.is_empty() {
        return Ok(Value::Structure(Structure::unit()));
    }
    let cursor = cursor.ok_or_else(|| {
        Error::conversion(body_signature, "no cursor supplied for non-empty body")
    })?;
    let mut builder = StructureBuilder::new();
    for complete_type in signature::split_complete_types(body_signature)? {
        if cursor.arg_type() == ArgType::Invalid {
            return Err(Error::conversion(
                body_signature,
                "cursor exhausted before all body arguments were read",
            ));
        }
        builder.append(decode_one(cursor)?);
        let _ = complete_type;
    }
    Ok(builder.build())
}

/// Encode a whole message body. `value` must be a [`Value::Structure`] whose fields match
/// `body_signature`'s top-level complete types, one-to-one (or the zero-field unit structure,
/// for an empty signature).
pub fn encode_body<C: AppendCursor>(
    cursor: &mut C,
    body_signature: &str,
    value: &Value,
) -> Result<()> {
    if body_signature.is_empty() {
        return Ok(());
    }
    let fields = value.as_structure().ok_or_else(|| {
        Error::conversion(body_signature, "body value must be a tuple of arguments")
    })?;
    let types = signature::split_complete_types(body_signature)?;
    if types.len() != fields.len() {
        return Err(Error::conversion(
            body_signature,
            format!(
                "body has {} arguments but signature names {}",
                fields.len(),
                types.len()
            ),
        ));
    }
    for (ty, field) in types.iter().zip(fields.fields()) {
        encode_one(cursor, ty, field)?;
    }
    Ok(())
}

/// Decode exactly one complete type at the cursor's current position, then advance the cursor
/// to the next sibling (spec §4.1 decode contract).
pub fn decode_one<C: ReadCursor>(cursor: &mut C) -> Result<Value> {
    let value = decode_at(cursor)?;
    cursor.next();
    Ok(value)
}

fn decode_at<C: ReadCursor>(cursor: &mut C) -> Result<Value> {
    match cursor.arg_type() {
        ArgType::Byte => Ok(Value::Byte(expect_byte(cursor.get_basic())?)),
        ArgType::Boolean => Ok(Value::Bool(expect_bool(cursor.get_basic())?)),
        ArgType::Int16 => Ok(Value::I16(expect_i16(cursor.get_basic())?)),
        ArgType::Uint16 => Ok(Value::U16(expect_u16(cursor.get_basic())?)),
        ArgType::Int32 => Ok(Value::I32(expect_i32(cursor.get_basic())?)),
        ArgType::Uint32 => Ok(Value::U32(expect_u32(cursor.get_basic())?)),
        ArgType::Int64 => Ok(Value::I64(expect_i64(cursor.get_basic())?)),
        ArgType::Uint64 => Ok(Value::U64(expect_u64(cursor.get_basic())?)),
        ArgType::Double => Ok(Value::F64(expect_f64(cursor.get_basic())?)),
        ArgType::String => Ok(Value::new_string(expect_str(cursor.get_basic())?)?),
        ArgType::ObjectPath => Ok(Value::new_object_path(expect_str(cursor.get_basic())?)?),
        ArgType::Signature => Ok(Value::new_signature(expect_str(cursor.get_basic())?)?),
        ArgType::Array => decode_array(cursor),
        ArgType::Struct => decode_struct(cursor),
        ArgType::Variant => decode_variant(cursor),
        ArgType::Invalid => Err(Error::conversion(
            "",
            "attempted to decode at an exhausted cursor position",
        )),
    }
}

fn decode_array<C: ReadCursor>(cursor: &mut C) -> Result<Value> {
    let element_sig = cursor.container_signature().to_string();
    if signature::is_dict_entry(&element_sig) {
        return decode_dict(cursor, &element_sig);
    }
    if signature::is_fixed_width_primitive(&element_sig) {
        let slice = cursor.get_fixed_array();
        return Ok(fixed_slice_to_array(slice));
    }

    let mut sub = cursor.recurse();
    let mut builder = ArrayBuilder::new(element_sig.as_str())?;
    while sub.arg_type() != ArgType::Invalid {
        builder.append(decode_one(&mut sub)?)?;
    }
    Ok(builder.build())
}

fn decode_dict<C: ReadCursor>(cursor: &mut C, array_element_sig: &str) -> Result<Value> {
    // array_element_sig is `{kv}`; strip the braces to get the two field signatures.
    let inner = &array_element_sig[1..array_element_sig.len() - 1];
    let parts = signature::split_complete_types(inner)?;
    if parts.len() != 2 {
        return Err(Error::conversion(
            array_element_sig,
            "dict entry must have exactly 2 fields",
        ));
    }
    let (key_sig, value_sig) = (parts[0], parts[1]);
    let mut builder = DictBuilder::new(key_sig, value_sig)?;

    let mut sub = cursor.recurse();
    while sub.arg_type() != ArgType::Invalid {
        // Each array element is itself a dict-entry container; libdbus models this as a
        // struct-shaped sub-iterator.
        let mut entry = sub.recurse();
        let key = decode_one(&mut entry)?;
        let value = decode_one(&mut entry)?;
        builder.insert(key, value)?;
        sub.next();
    }
    Ok(builder.build())
}

fn decode_struct<C: ReadCursor>(cursor: &mut C) -> Result<Value> {
    let mut sub = cursor.recurse();
    let mut builder = StructureBuilder::new();
    while sub.arg_type() != ArgType::Invalid {
        builder.append(decode_one(&mut sub)?);
    }
    Ok(builder.build())
}

fn decode_variant<C: ReadCursor>(cursor: &mut C) -> Result<Value> {
    let mut sub = cursor.recurse();
    let inner = decode_one(&mut sub)?;
    Ok(inner.into_variant())
}

fn fixed_slice_to_array(slice: FixedSlice<'_>) -> Value {
    fn build<T: Copy>(sig: &str, elems: &[T], to_value: impl Fn(T) -> Value) -> Value {
        let mut builder = ArrayBuilder::new(sig).expect("fixed-width signature is always valid");
        for &e in elems {
            builder
                .append(to_value(e))
                .expect("fixed-width element always matches its own signature");
        }
        builder.build()
    }
    match slice {
        FixedSlice::Byte(s) => build("y", s, Value::Byte),
        FixedSlice::Boolean(s) => build("b", s, Value::Bool),
        FixedSlice::Int16(s) => build("n", s, Value::I16),
        FixedSlice::Uint16(s) => build("q", s, Value::U16),
        FixedSlice::Int32(s) => build("i", s, Value::I32),
        FixedSlice::Uint32(s) => build("u", s, Value::U32),
        FixedSlice::Int64(s) => build("x", s, Value::I64),
        FixedSlice::Uint64(s) => build("t", s, Value::U64),
        FixedSlice::Double(s) => build("d", s, Value::F64),
    }
}

fn expect_byte(b: BasicValue<'_>) -> Result<u8> {
    match b {
        BasicValue::Byte(v) => Ok(v),
        other => Err(type_mismatch("y", &other)),
    }
}
fn expect_bool(b: BasicValue<'_>) -> Result<bool> {
    match b {
        BasicValue::Boolean(v) => Ok(v),
        other => Err(type_mismatch("b", &other)),
    }
}
fn expect_i16(b: BasicValue<'_>) -> Result<i16> {
    match b {
        BasicValue::Int16(v) => Ok(v),
        other => Err(type_mismatch("n", &other)),
    }
}
fn expect_u16(b: BasicValue<'_>) -> Result<u16> {
    match b {
        BasicValue::Uint16(v) => Ok(v),
        other => Err(type_mismatch("q", &other)),
    }
}
fn expect_i32(b: BasicValue<'_>) -> Result<i32> {
    match b {
        BasicValue::Int32(v) => Ok(v),
        other => Err(type_mismatch("i", &other)),
    }
}
fn expect_u32(b: BasicValue<'_>) -> Result<u32> {
    match b {
        BasicValue::Uint32(v) => Ok(v),
        other => Err(type_mismatch("u", &other)),
    }
}
fn expect_i64(b: BasicValue<'_>) -> Result<i64> {
    match b {
        BasicValue::Int64(v) => Ok(v),
        other => Err(type_mismatch("x", &other)),
    }
}
fn expect_u64(b: BasicValue<'_>) -> Result<u64> {
    match b {
        BasicValue::Uint64(v) => Ok(v),
        other => Err(type_mismatch("t", &other)),
    }
}
fn expect_f64(b: BasicValue<'_>) -> Result<f64> {
    match b {
        BasicValue::Double(v) => Ok(v),
        other => Err(type_mismatch("d", &other)),
    }
}
fn expect_str(b: BasicValue<'_>) -> Result<&str> {
    match b {
        BasicValue::String(v) | BasicValue::ObjectPath(v) | BasicValue::Signature(v) => Ok(v),
        other => Err(type_mismatch("s", &other)),
    }
}

fn type_mismatch(expected: &str, got: &BasicValue<'_>) -> Error {
    Error::conversion(
        expected,
        format!("cursor reported a value of a different basic type ({got:?})"),
    )
}

/// Encode exactly one complete type matching `signature`, coercing `value` if a loss-free
/// coercion exists (spec §4.1 encode contract).
pub fn encode_one<C: AppendCursor>(cursor: &mut C, signature: &str, value: &Value) -> Result<()> {
    if signature == "v" {
        // Nested variants are fully transparent: write the inner signature before recursing.
        let inner = if let Value::Variant(inner) = value {
            inner.as_ref()
        } else {
            value
        };
        let inner_sig = inner.signature();
        let mut sub = cursor.open_container(ContainerKind::Variant, inner_sig.as_str())?;
        encode_one(&mut sub, inner_sig.as_str(), inner)?;
        return cursor.close_container(sub);
    }

    match signature.as_bytes()[0] {
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' => {
            let basic = coerce_basic(signature, value)?;
            cursor.append_basic(basic)
        }
        b's' | b'o' | b'g' => {
            let s = value.as_str().ok_or_else(|| {
                Error::conversion(signature, format!("expected a string-like value, got `{}`", value.signature()))
            })?;
            let basic = match signature.as_bytes()[0] {
                b's' => BasicValue::String(s),
                b'o' => BasicValue::ObjectPath(s),
                _ => BasicValue::Signature(s),
            };
            cursor.append_basic(basic)
        }
        b'a' => encode_array(cursor, signature, value),
        b'(' => encode_struct(cursor, signature, value),
        other => Err(Error::conversion(
            signature,
            format!("unsupported type code `{}`", other as char),
        )),
    }
}

fn encode_array<C: AppendCursor>(cursor: &mut C, signature: &str, value: &Value) -> Result<()> {
    let element_sig = &signature[1..];
    if signature::is_dict_entry(element_sig) {
        return encode_dict(cursor, element_sig, value);
    }

    let array = value
        .as_array()
        .ok_or_else(|| Error::conversion(signature, format!("expected an array, got `{}`", value.signature())))?;
    if array.element_signature().as_str() != element_sig {
        return Err(Error::conversion(
            signature,
            format!(
                "array element signature `{}` does not match target `{element_sig}`",
                array.element_signature()
            ),
        ));
    }

    if signature::is_fixed_width_primitive(element_sig) {
        let fixed = array_to_fixed_vec(array, element_sig)?;
        let mut sub = cursor.open_container(ContainerKind::Array, element_sig)?;
        sub.append_fixed_array(fixed.as_slice())?;
        return cursor.close_container(sub);
    }

    let mut sub = cursor.open_container(ContainerKind::Array, element_sig)?;
    for elem in array.iter() {
        encode_one(&mut sub, element_sig, elem)?;
    }
    cursor.close_container(sub)
}

fn encode_dict<C: AppendCursor>(cursor: &mut C, entry_sig: &str, value: &Value) -> Result<()> {
    let dict = value
        .as_dict()
        .ok_or_else(|| Error::conversion(entry_sig, format!("expected a dict, got `{}`", value.signature())))?;
    let mut sub = cursor.open_container(ContainerKind::Array, entry_sig)?;
    let inner = &entry_sig[1..entry_sig.len() - 1];
    let parts = signature::split_complete_types(inner)?;
    let (key_sig, value_sig) = (parts[0], parts[1]);
    for (k, v) in dict.iter() {
        let mut entry = sub.open_container(ContainerKind::DictEntry, inner)?;
        encode_one(&mut entry, key_sig, k)?;
        encode_one(&mut entry, value_sig, v)?;
        sub.close_container(entry)?;
    }
    cursor.close_container(sub)
}

fn encode_struct<C: AppendCursor>(cursor: &mut C, signature: &str, value: &Value) -> Result<()> {
    let inner = &signature[1..signature.len() - 1];
    let types = signature::split_complete_types(inner)?;
    let fields = value
        .as_structure()
        .ok_or_else(|| Error::conversion(signature, format!("expected a structure, got `{}`", value.signature())))?
        .fields();
    if fields.len() != types.len() {
        return Err(Error::conversion(
            signature,
            format!(
                "structure has {} fields but signature names {}",
                fields.len(),
                types.len()
            ),
        ));
    }
    let mut sub = cursor.open_container(ContainerKind::Struct, inner)?;
    for (ty, field) in types.iter().zip(fields) {
        encode_one(&mut sub, ty, field)?;
    }
    cursor.close_container(sub)
}

fn array_to_fixed_vec(array: &Array, element_sig: &str) -> Result<FixedVec> {
    // `Array` stores individually-tagged `Value`s, not a packed buffer, so feeding the
    // bulk-append path means materialising one here first.
    macro_rules! collect {
        ($variant:ident, $extract:expr) => {{
            let mut v = Vec::with_capacity(array.len());
            for elem in array.iter() {
                v.push($extract(elem)?);
            }
            Ok(FixedVec::$variant(v))
        }};
    }
    match element_sig {
        "y" => collect!(Byte, |e: &Value| match e {
            Value::Byte(b) => Ok::<_, Error>(*b),
            _ => Err(Error::conversion("y", "non-byte in byte array")),
        }),
        "b" => collect!(Boolean, |e: &Value| match e {
            Value::Bool(b) => Ok::<_, Error>(*b),
            _ => Err(Error::conversion("b", "non-bool in bool array")),
        }),
        "n" => collect!(Int16, |e: &Value| match e {
            Value::I16(v) => Ok::<_, Error>(*v),
            _ => Err(Error::conversion("n", "non-i16 in i16 array")),
        }),
        "q" => collect!(Uint16, |e: &Value| match e {
            Value::U16(v) => Ok::<_, Error>(*v),
            _ => Err(Error::conversion("q", "non-u16 in u16 array")),
        }),
        "i" => collect!(Int32, |e: &Value| match e {
            Value::I32(v) => Ok::<_, Error>(*v),
            _ => Err(Error::conversion("i", "non-i32 in i32 array")),
        }),
        "u" => collect!(Uint32, |e: &Value| match e {
            Value::U32(v) => Ok::<_, Error>(*v),
            _ => Err(Error::conversion("u", "non-u32 in u32 array")),
        }),
        "x" => collect!(Int64, |e: &Value| match e {
            Value::I64(v) => Ok::<_, Error>(*v),
            _ => Err(Error::conversion("x", "non-i64 in i64 array")),
        }),
        "t" => collect!(Uint64, |e: &Value| match e {
            Value::U64(v) => Ok::<_, Error>(*v),
            _ => Err(Error::conversion("t", "non-u64 in u64 array")),
        }),
        "d" => collect!(Double, |e: &Value| match e {
            Value::F64(v) => Ok::<_, Error>(*v),
            _ => Err(Error::conversion("d", "non-f64 in f64 array")),
        }),
        other => Err(Error::conversion(other, "not a fixed-width primitive")),
    }
}

/// Coerce `value` to the basic type named by `signature`, per spec §4.1's loss-free-coercion
/// rule ("writing an integer variant into a wider integer slot"). Same-type is always allowed;
/// cross-type is allowed only along widening integer conversions that can't lose information.
fn coerce_basic<'a>(signature: &str, value: &'a Value) -> Result<BasicValue<'a>> {
    use Value::*;
    let mismatch = || {
        Error::conversion(
            signature,
            format!("no loss-free coercion from `{}` to `{signature}`", value.signature()),
        )
    };

    Ok(match (signature.as_bytes()[0], value) {
        (b'y', Byte(v)) => BasicValue::Byte(*v),
        (b'b', Bool(v)) => BasicValue::Boolean(*v),
        (b'n', I16(v)) => BasicValue::Int16(*v),
        (b'n', Byte(v)) => BasicValue::Int16(i16::from(*v)),
        (b'q', U16(v)) => BasicValue::Uint16(*v),
        (b'q', Byte(v)) => BasicValue::Uint16(u16::from(*v)),
        (b'i', I32(v)) => BasicValue::Int32(*v),
        (b'i', I16(v)) => BasicValue::Int32(i32::from(*v)),
        (b'i', Byte(v)) => BasicValue::Int32(i32::from(*v)),
        (b'u', U32(v)) => BasicValue::Uint32(*v),
        (b'u', U16(v)) => BasicValue::Uint32(u32::from(*v)),
        (b'u', Byte(v)) => BasicValue::Uint32(u32::from(*v)),
        (b'x', I64(v)) => BasicValue::Int64(*v),
        (b'x', I32(v)) => BasicValue::Int64(i64::from(*v)),
        (b'x', I16(v)) => BasicValue::Int64(i64::from(*v)),
        (b'x', Byte(v)) => BasicValue::Int64(i64::from(*v)),
        (b't', U64(v)) => BasicValue::Uint64(*v),
        (b't', U32(v)) => BasicValue::Uint64(u64::from(*v)),
        (b't', U16(v)) => BasicValue::Uint64(u64::from(*v)),
        (b't', Byte(v)) => BasicValue::Uint64(u64::from(*v)),
        (b'd', F64(v)) => BasicValue::Double(*v),
        _ => return Err(mismatch()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryAppend, MemoryRead};

    fn roundtrip(v: &Value) -> Value {
        let sig = v.signature();
        let mut append = MemoryAppend::new();
        encode_one(&mut append, sig.as_str(), v).unwrap();
        let built = append.finish();
        let mut read = MemoryRead::new(&built);
        decode_one(&mut read).unwrap()
    }

    #[test]
    fn primitive_roundtrip() {
        for v in [
            Value::Byte(9),
            Value::Bool(true),
            Value::I32(-42),
            Value::U64(u64::MAX),
            Value::F64(1.5),
        ] {
            assert_eq!(roundtrip(&v), v);
        }
    }

    #[test]
    fn string_like_roundtrip() {
        let v = Value::new_string("hello").unwrap();
        assert_eq!(roundtrip(&v), v);
        let v = Value::new_object_path("/a/b").unwrap();
        assert_eq!(roundtrip(&v), v);
        let v = Value::new_signature("a{sv}").unwrap();
        assert_eq!(roundtrip(&v), v);
    }

    #[test]
    fn empty_fixed_array_roundtrip() {
        let v = ArrayBuilder::new("y").unwrap().build();
        assert_eq!(roundtrip(&v), v);
    }

    #[test]
    fn large_fixed_array_roundtrip() {
        let mut b = ArrayBuilder::new("y").unwrap();
        for i in 0..(1usize << 16) + 5 {
            b.append(Value::Byte((i % 256) as u8)).unwrap();
        }
        let v = b.build();
        assert_eq!(roundtrip(&v), v);
    }

    #[test]
    fn nested_struct_roundtrip() {
        let mut inner = StructureBuilder::new();
        inner.append(Value::I32(1));
        inner.append(Value::new_string("x").unwrap());
        let mut mid = StructureBuilder::new();
        mid.append(inner.build());
        mid.append(Value::Bool(false));
        let mut outer = StructureBuilder::new();
        outer.append(mid.build());
        outer.append(Value::Byte(3));
        let v = outer.build();
        assert_eq!(roundtrip(&v), v);
    }

    #[test]
    fn dict_roundtrip_and_key_rejection() {
        let mut b = DictBuilder::new("s", "v").unwrap();
        b.insert(
            Value::new_string("k").unwrap(),
            Value::I32(5).into_variant(),
        )
        .unwrap();
        let v = b.build();
        assert_eq!(roundtrip(&v), v);

        assert!(DictBuilder::new("(i)", "s").is_err());
    }

    #[test]
    fn variant_of_variant_of_primitive_roundtrip() {
        let v = Value::Byte(1).into_variant().into_variant();
        assert_eq!(roundtrip(&v), v);
    }

    #[test]
    fn empty_signature_body() {
        let v = decode_body::<MemoryRead<'_>>(None, "").unwrap();
        assert_eq!(v, Value::Structure(Structure::unit()));
        let mut append = MemoryAppend::new();
        encode_body(&mut append, "", &v).unwrap();
        assert!(append.finish().is_empty_value());
    }

    #[test]
    fn integer_widening_coercion() {
        let mut append = MemoryAppend::new();
        encode_one(&mut append, "x", &Value::I32(7)).unwrap();
        let built = append.finish();
        let mut read = MemoryRead::new(&built);
        assert_eq!(decode_one(&mut read).unwrap(), Value::I64(7));
    }

    #[test]
    fn rejects_lossy_coercion() {
        let mut append = MemoryAppend::new();
        assert!(encode_one(&mut append, "y", &Value::I32(7)).is_err());
    }

    #[test]
    fn body_with_multiple_arguments() {
        let body_sig = "si";
        let mut outer = StructureBuilder::new();
        outer.append(Value::new_string("hi").unwrap());
        outer.append(Value::I32(9));
        let body = outer.build();

        let mut append = MemoryAppend::new();
        encode_body(&mut append, body_sig, &body).unwrap();
        let built = append.finish();
        let mut read = MemoryRead::new(&built);
        let decoded = decode_body(Some(&mut read), body_sig).unwrap();
        assert_eq!(decoded, body);
    }
}
