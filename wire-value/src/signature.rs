//! D-Bus type signatures: the authoritative type descriptor at every interface (spec §3).
//!
//! A signature is built from the alphabet `y b n q i u x t d s o g a ( ) { } v`. This module
//! validates signatures, splits a signature into its top-level "complete types", and answers
//! the small set of classification questions the codec needs (is this element fixed-width? is
//! this the shape of a dict entry?).

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

/// An owned, validated D-Bus signature string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureBuf(Arc<str>);

impl SignatureBuf {
    /// Validate and wrap `s` as a signature. An empty string is a valid signature (zero
    /// complete types), matching the "no out-arguments" case in spec §4.1.
    pub fn new(s: impl AsRef<str>) -> Result<Self> {
        let s = s.as_ref();
        validate(s)?;
        Ok(SignatureBuf(Arc::from(s)))
    }

    /// Build a signature without validating; for internal use where the caller has already
    /// proven validity (e.g. concatenating already-valid fragments).
    pub(crate) fn new_unchecked(s: impl Into<Arc<str>>) -> Self {
        SignatureBuf(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split this signature into its top-level complete types.
    pub fn complete_types(&self) -> Result<Vec<&str>> {
        split_complete_types(&self.0)
    }
}

impl fmt::Display for SignatureBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SignatureBuf {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for SignatureBuf {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        SignatureBuf::new(s)
    }
}

impl TryFrom<String> for SignatureBuf {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        SignatureBuf::new(s)
    }
}

/// Validate that `s` is a well-formed signature: every character is a known type code,
/// containers are balanced, and arrays/dict-entries/structs aren't left empty.
pub fn validate(s: &str) -> Result<()> {
    let mut rest = s;
    while !rest.is_empty() {
        let (_, tail) = next_complete_type(rest)?;
        rest = tail;
    }
    Ok(())
}

/// Split `s` into its top-level complete types (e.g. `"sii"` -> `["s", "i", "i"]`).
pub fn split_complete_types(s: &str) -> Result<Vec<&str>> {
    let mut out = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        let (head, tail) = next_complete_type(rest)?;
        out.push(head);
        rest = tail;
    }
    Ok(out)
}

/// Parse the first complete type off the front of `s`, returning `(that type, the remainder)`.
pub fn next_complete_type(s: &str) -> Result<(&str, &str)> {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return Err(Error::InvalidSignature(
            "expected a complete type, found end of signature".into(),
        ));
    }
    match bytes[0] {
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
        | b'v' => Ok((&s[..1], &s[1..])),
        b'a' => {
            let (_elem, after_elem) = next_complete_type(&s[1..]).map_err(|_| {
                Error::InvalidSignature(format!("array with no element type in `{s}`"))
            })?;
            let elem_len = s.len() - after_elem.len() - 1;
            Ok((&s[..1 + elem_len], after_elem))
        }
        b'(' => {
            let (inner, after) = matched_container(s, b'(', b')')?;
            if inner.is_empty() {
                return Err(Error::InvalidSignature(format!("empty struct in `{s}`")));
            }
            Ok((&s[..inner.len() + 2], after))
        }
        b'{' => {
            let (inner, after) = matched_container(s, b'{', b'}')?;
            let fields = split_complete_types(inner)?;
            if fields.len() != 2 {
                return Err(Error::InvalidSignature(format!(
                    "dict entry must have exactly 2 fields, found {} in `{s}`",
                    fields.len()
                )));
            }
            if !is_basic_code(fields[0].as_bytes()[0]) {
                return Err(Error::InvalidSignature(format!(
                    "dict entry key `{}` is not a basic type",
                    fields[0]
                )));
            }
            Ok((&s[..inner.len() + 2], after))
        }
        other => Err(Error::InvalidSignature(format!(
            "unknown type code `{}` in `{s}`",
            other as char
        ))),
    }
}

/// Consume a `open ... close` balanced run starting at `s[0] == open`, returning (the content
/// between the brackets, the remainder of `s` after the closing bracket).
fn matched_container(s: &str, open: u8, close: u8) -> Result<(&str, &str)> {
    let bytes = s.as_bytes();
    debug_assert_eq!(bytes[0], open);
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Ok((&s[1..i], &s[i + 1..]));
            }
        }
    }
    Err(Error::InvalidSignature(format!(
        "unbalanced `{}`...`{}` in `{s}`",
        open as char, close as char
    )))
}

fn is_basic_code(code: u8) -> bool {
    matches!(
        code,
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
    )
}

/// Whether `sig` is exactly one complete type and that type is a fixed-width primitive (every
/// basic type except the three string-like ones, which are variable width on the wire).
pub fn is_fixed_width_primitive(sig: &str) -> bool {
    matches!(
        sig.as_bytes(),
        [b'y'] | [b'b'] | [b'n'] | [b'q'] | [b'i'] | [b'u'] | [b'x'] | [b't'] | [b'd']
    )
}

/// Whether `sig` is a basic (primitive or string-like) type, i.e. legal as a dict key or as an
/// array element that the wire treats as fixed/variable scalar rather than a container.
pub fn is_basic(sig: &str) -> bool {
    sig.len() == 1 && is_basic_code(sig.as_bytes()[0])
}

/// Whether `sig` has the shape `{kv}` of a single dict entry.
pub fn is_dict_entry(sig: &str) -> bool {
    sig.as_bytes().first() == Some(&b'{')
}
