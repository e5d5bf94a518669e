//! High-level client binding for D-Bus, layered above a pluggable wire transport (spec §6): a
//! property/signal-aware [`Proxy`], and the [`NameWatcher`]/[`NameOwner`] name-lifecycle
//! primitives, all built on [`wire_value::Value`] and this crate's own [`Error`] taxonomy.
//!
//! This crate never opens a socket. [`transport::Connection`] is the boundary a real transport
//! implements; [`test_support`] provides an in-process fake bus satisfying that same trait for
//! this crate's own tests, used the way `examples/dbus2-zbus-old` wires up its own internal
//! executor for `zbus::Connection`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dbus_proxy::{Proxy, ProxyBuilder};
//! use wire_value::{StructureBuilder, Value};
//!
//! # async fn example(conn: Arc<dyn dbus_proxy::transport::Connection>) -> dbus_proxy::Result<()> {
//! let proxy = ProxyBuilder::new(conn, "com.example.Frob", "/com/example/Frob", "com.example.Frob")
//!     .build()
//!     .await;
//! let mut args = StructureBuilder::new();
//! args.append(Value::new_string("Hey")?);
//! let reply = proxy.invoke("HelloWorld", "s", "s", None, args.build(), None).await?;
//! let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fdo;
pub mod name_owner;
pub mod names;
pub mod name_watcher;
pub mod object_export;
pub mod proxy;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{
    classify_wire_name, decode_remote_exception_message, decode_unmapped,
    encode_remote_exception_message, encode_unmapped, wire_name, Error, Result,
};
pub use name_owner::{NameOwner, NameOwnerBuilder, NameOwnerEvent};
pub use names::{BusName, InterfaceName, MemberName, ObjectPath};
pub use name_watcher::{NameWatcher, NameWatcherEvent};
pub use object_export::{
    MethodHandler, MethodResult, ObjectExport, RegistrationId, SubtreeHandlers, Vtable,
};
pub use proxy::{CancellationToken, Proxy, ProxyBuilder, ProxyFlags, PropertiesChangedEvent, SignalEvent};

pub use wire_value::{self, Value};
