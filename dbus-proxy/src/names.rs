//! Bus, interface and member name newtypes.
//!
//! Folded in as a module rather than kept as a separate crate (see `DESIGN.md`): the spec's
//! value model is always-owned, so these names don't need the borrowed/owned split
//! `zbus_names` uses for its `'name`-parameterized types.

use std::fmt;

use crate::error::{Error, Result};

fn is_valid_interface_or_bus_segment(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    let mut chars = segment.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_valid_dotted_name(name: &str, allow_leading_digit_after_colon: bool) -> bool {
    if name.is_empty() || name.len() > 255 {
        return false;
    }
    let (name, leading_colon) = match name.strip_prefix(':') {
        Some(rest) => (rest, true),
        None => (name, false),
    };
    if name.is_empty() {
        return false;
    }
    let segments: Vec<&str> = name.split('.').collect();
    if segments.len() < 2 {
        return false;
    }
    segments.iter().all(|segment| {
        if leading_colon && allow_leading_digit_after_colon {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        } else {
            is_valid_interface_or_bus_segment(segment)
        }
    })
}

/// A bus name: either unique (bus-assigned, starts with `:`) or well-known (requestable).
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum BusName {
    Unique(String),
    WellKnown(String),
}

impl BusName {
    pub fn as_str(&self) -> &str {
        match self {
            BusName::Unique(s) | BusName::WellKnown(s) => s,
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, BusName::Unique(_))
    }
}

impl TryFrom<String> for BusName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        if value.starts_with(':') {
            if is_valid_dotted_name(&value, true) {
                Ok(BusName::Unique(value))
            } else {
                Err(Error::InvalidArgs(format!("invalid unique bus name: {value}")))
            }
        } else if is_valid_dotted_name(&value, false) {
            Ok(BusName::WellKnown(value))
        } else {
            Err(Error::InvalidArgs(format!("invalid well-known bus name: {value}")))
        }
    }
}

impl TryFrom<&str> for BusName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        BusName::try_from(value.to_string())
    }
}

impl fmt::Display for BusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<str> for BusName {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

/// An interface name, e.g. `org.freedesktop.DBus.Properties`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct InterfaceName(String);

impl InterfaceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        if is_valid_dotted_name(&value, false) {
            Ok(InterfaceName(value))
        } else {
            Err(Error::InvalidArgs(format!("invalid interface name: {value}")))
        }
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        InterfaceName::try_from(value.to_string())
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A method, signal or property member name (a single, dot-free identifier).
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MemberName(String);

impl MemberName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MemberName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        if value.len() <= 255 && is_valid_interface_or_bus_segment(&value) {
            Ok(MemberName(value))
        } else {
            Err(Error::InvalidArgs(format!("invalid member name: {value}")))
        }
    }
}

impl TryFrom<&str> for MemberName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        MemberName::try_from(value.to_string())
    }
}

impl fmt::Display for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An object path, e.g. `/org/freedesktop/DBus`. Validated by `wire_value::value` already when
/// boxed into a `Value::ObjectPath`; this newtype is for the places a proxy needs the path
/// outside of any `Value`, such as addressing a connection primitive.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ObjectPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        wire_value::Value::new_object_path(value.clone())
            .map(|_| ObjectPath(value))
            .map_err(|e| Error::InvalidArgs(format!("invalid object path: {e}")))
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        ObjectPath::try_from(value.to_string())
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
