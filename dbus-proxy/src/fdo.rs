//! Thin built-in proxies for the standard interfaces spec §6 names: `org.freedesktop.DBus`
//! itself, `org.freedesktop.DBus.Properties`, and `org.freedesktop.DBus.Introspectable`.
//!
//! These are free functions over a `Connection` rather than full `Proxy` instances, since
//! `NameWatcher`/`NameOwner` need to call `GetNameOwner`/`RequestName`/`ReleaseName` before a
//! `Proxy` (which itself composes a `NameWatcher`) can exist — building them as proxies would be
//! circular. `Proxy` itself is free to call these same helpers for its `org.freedesktop.DBus.*`
//! sibling-interface dispatch (spec §4.5 "dotted method names").

use std::sync::Arc;
use std::time::Duration;

use enumflags2::{bitflags, BitFlags};
use wire_value::{Structure, StructureBuilder, Value};

use crate::error::Error;
use crate::transport::{Connection, Message};

pub const BUS_DESTINATION: &str = "org.freedesktop.DBus";
pub const BUS_PATH: &str = "/org/freedesktop/DBus";
pub const BUS_INTERFACE: &str = "org.freedesktop.DBus";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestNameFlags {
    AllowReplacement = 0x1,
    ReplaceExisting = 0x2,
    DoNotQueue = 0x4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestNameReply {
    PrimaryOwner,
    InQueue,
    Exists,
    AlreadyOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseNameReply {
    Released,
    NonExistent,
    NotOwner,
}

fn unit_call(destination: &str, path: &str, interface: &str, member: &str, body: Value) -> Message {
    Message::method_call(destination, path, interface, member, body)
}

fn single_string_arg(s: &str) -> Value {
    let mut builder = StructureBuilder::new();
    builder.append(Value::new_string(s).expect("ascii method arg is valid UTF-8"));
    builder.build()
}

async fn call(
    conn: &Arc<dyn Connection>,
    destination: &str,
    path: &str,
    interface: &str,
    member: &str,
    body: Value,
    timeout: Option<Duration>,
) -> crate::error::Result<Message> {
    conn.send_with_reply(
        unit_call(destination, path, interface, member, body),
        timeout,
    )
    .await
}

fn reply_body_u32(reply: &Message) -> crate::error::Result<u32> {
    reply
        .body
        .as_structure()
        .and_then(|s| s.get(0))
        .and_then(|v| match v {
            Value::U32(n) => Some(*n),
            _ => None,
        })
        .ok_or_else(|| Error::Failed("expected a single uint32 reply argument".into()))
}

pub async fn request_name(
    conn: &Arc<dyn Connection>,
    name: &str,
    flags: BitFlags<RequestNameFlags>,
) -> crate::error::Result<RequestNameReply> {
    let mut builder = StructureBuilder::new();
    builder.append(Value::new_string(name)?);
    builder.append(Value::U32(flags.bits()));
    let body = builder.build();
    let reply = call(conn, BUS_DESTINATION, BUS_PATH, BUS_INTERFACE, "RequestName", body, None).await?;
    match reply_body_u32(&reply)? {
        1 => Ok(RequestNameReply::PrimaryOwner),
        2 => Ok(RequestNameReply::InQueue),
        3 => Ok(RequestNameReply::Exists),
        4 => Ok(RequestNameReply::AlreadyOwner),
        other => Err(Error::Failed(format!("unknown RequestName reply code {other}"))),
    }
}

/// Spec §4.4 step 4: this must be a synchronous call, not the async `release_name`, to avoid
/// racing a subsequent `RequestName` from the same process.
pub fn release_name_sync(conn: &Arc<dyn Connection>, name: &str) -> crate::error::Result<ReleaseNameReply> {
    let body = single_string_arg(name);
    let reply = conn.send_with_reply_sync(
        unit_call(BUS_DESTINATION, BUS_PATH, BUS_INTERFACE, "ReleaseName", body),
        None,
    )?;
    match reply_body_u32(&reply)? {
        1 => Ok(ReleaseNameReply::Released),
        2 => Ok(ReleaseNameReply::NonExistent),
        3 => Ok(ReleaseNameReply::NotOwner),
        other => Err(Error::Failed(format!("unknown ReleaseName reply code {other}"))),
    }
}

pub async fn release_name(conn: &Arc<dyn Connection>, name: &str) -> crate::error::Result<ReleaseNameReply> {
    let body = single_string_arg(name);
    let reply = call(conn, BUS_DESTINATION, BUS_PATH, BUS_INTERFACE, "ReleaseName", body, None).await?;
    match reply_body_u32(&reply)? {
        1 => Ok(ReleaseNameReply::Released),
        2 => Ok(ReleaseNameReply::NonExistent),
        3 => Ok(ReleaseNameReply::NotOwner),
        other => Err(Error::Failed(format!("unknown ReleaseName reply code {other}"))),
    }
}

/// Returns `Ok(None)` for `NameHasNoOwner` (spec §4.3 treats this as a normal "no owner" answer,
/// not an error), and propagates every other failure.
pub async fn get_name_owner(conn: &Arc<dyn Connection>, name: &str) -> crate::error::Result<Option<String>> {
    let body = single_string_arg(name);
    match call(conn, BUS_DESTINATION, BUS_PATH, BUS_INTERFACE, "GetNameOwner", body, None).await {
        Ok(reply) => {
            let owner = reply
                .body
                .as_structure()
                .and_then(|s| s.get(0))
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Failed("expected a single string reply argument".into()))?;
            Ok(Some(owner.to_string()))
        }
        Err(Error::NameHasNoOwner(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// `org.freedesktop.DBus.Properties.GetAll`, returning the property map as a `Dict` whose keys
/// are property names.
pub async fn get_all_properties(
    conn: &Arc<dyn Connection>,
    destination: &str,
    path: &str,
    interface: &str,
) -> crate::error::Result<Value> {
    let body = single_string_arg(interface);
    let reply = call(
        conn,
        destination,
        path,
        PROPERTIES_INTERFACE,
        "GetAll",
        body,
        None,
    )
    .await?;
    reply
        .body
        .as_structure()
        .and_then(|s| s.get(0))
        .cloned()
        .ok_or_else(|| Error::Failed("expected a single dict reply argument".into()))
}

pub async fn introspect(
    conn: &Arc<dyn Connection>,
    destination: &str,
    path: &str,
) -> crate::error::Result<String> {
    let reply = call(
        conn,
        destination,
        path,
        INTROSPECTABLE_INTERFACE,
        "Introspect",
        Value::Structure(Structure::unit()),
        None,
    )
    .await?;
    reply
        .body
        .as_structure()
        .and_then(|s| s.get(0))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::Failed("expected a single string reply argument".into()))
}
