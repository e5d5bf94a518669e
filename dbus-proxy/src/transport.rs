//! The transport boundary (spec §6): a message shape, cursor-driven body access reusing
//! `wire-value`'s cursor traits, and the connection primitives every other module in this crate
//! is built on top of. Nothing in this crate talks to a socket directly — see `DESIGN.md` for why
//! that's deliberate, not an omission.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_broadcast::Receiver as BroadcastReceiver;
use async_trait::async_trait;
use event_listener::EventListener;
use wire_value::Value;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    MethodCall,
    MethodReturn,
    Error,
    Signal,
}

/// The wire-visible envelope of a message, spec §6 item (i): `{type, sender, destination, path,
/// interface, member, serial, reply-serial, error-name, body}`. `body` is already decoded into a
/// `Value` (always a `Structure` of the call's arguments, possibly the unit structure) — decoding
/// off the wire cursor is the transport implementation's job, not this crate's.
#[derive(Debug, Clone)]
pub struct Message {
    pub message_type: MessageType,
    pub sender: Option<String>,
    pub destination: Option<String>,
    pub path: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub serial: u32,
    pub reply_serial: Option<u32>,
    pub error_name: Option<String>,
    pub body: Value,
}

impl Message {
    pub fn method_call(
        destination: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        body: Value,
    ) -> Self {
        Message {
            message_type: MessageType::MethodCall,
            sender: None,
            destination: Some(destination.into()),
            path: Some(path.into()),
            interface: Some(interface.into()),
            member: Some(member.into()),
            serial: 0,
            reply_serial: None,
            error_name: None,
            body,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}.{} @ {} (serial {})",
            self.message_type,
            self.interface.as_deref().unwrap_or("?"),
            self.member.as_deref().unwrap_or("?"),
            self.path.as_deref().unwrap_or("?"),
            self.serial
        )
    }
}

/// A match rule, spec §6 item (iv): subscriptions are keyed by `(sender, interface, member,
/// path, arg0)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MatchRule {
    pub sender: Option<String>,
    pub interface: Option<String>,
    pub member: Option<String>,
    pub path: Option<String>,
    pub arg0: Option<String>,
}

impl MatchRule {
    pub fn matches(&self, msg: &Message) -> bool {
        if msg.message_type != MessageType::Signal {
            return false;
        }
        if let Some(sender) = &self.sender {
            if msg.sender.as_deref() != Some(sender.as_str()) {
                return false;
            }
        }
        if let Some(interface) = &self.interface {
            if msg.interface.as_deref() != Some(interface.as_str()) {
                return false;
            }
        }
        if let Some(member) = &self.member {
            if msg.member.as_deref() != Some(member.as_str()) {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if msg.path.as_deref() != Some(path.as_str()) {
                return false;
            }
        }
        if let Some(arg0) = &self.arg0 {
            let first_arg = msg
                .body
                .as_structure()
                .and_then(|s| s.get(0))
                .and_then(|v| v.as_str());
            if first_arg != Some(arg0.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// The connection primitives a Proxy/NameWatcher/NameOwner is built against (spec §6 items
/// iii-v). A concrete transport (a socket, or the in-process fake bus used by this crate's own
/// tests) implements this trait; nothing above it cares which.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Fire-and-forget send; returns once the message has been handed to the transport.
    async fn send(&self, message: Message) -> Result<()>;

    /// Send and await the correlated reply asynchronously, honoring an optional timeout.
    async fn send_with_reply(&self, message: Message, timeout: Option<Duration>) -> Result<Message>;

    /// Send and block the calling thread for the reply (spec §5: via a private wait, not the
    /// event loop) honoring an optional timeout.
    fn send_with_reply_sync(&self, message: Message, timeout: Option<Duration>) -> Result<Message>;

    /// Block until the reply to an already-sent call with this serial arrives. Used by
    /// transports that need to separate "send" from "wait" for cancellation purposes.
    fn send_block(&self, serial: u32) -> Result<Message>;

    /// Best-effort cancellation of an in-flight call. A late reply arriving after cancellation is
    /// dropped by the connection, never delivered.
    fn send_cancel(&self, serial: u32);

    /// Subscribe to signals matching `rule`; matched messages are delivered via `signals()`.
    fn subscribe(&self, rule: MatchRule) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    /// A broadcast stream of every signal message accepted by this connection, regardless of
    /// which `subscribe` call (if any) caused the bus to route it here. Callers filter by their
    /// own match rule; this mirrors the fact that a single underlying socket multiplexes every
    /// subscription a process holds.
    fn signals(&self) -> BroadcastReceiver<Arc<Message>>;

    /// An event that fires exactly once, when the connection is lost.
    fn on_disconnect(&self) -> EventListener;

    /// This connection's own unique bus name, once authenticated, or `None` before then.
    fn unique_name(&self) -> Option<String>;

    /// Reserve the next outgoing serial number.
    fn next_serial(&self) -> u32;

    /// Detach a future onto the connection's own executor (spec §5: all callbacks run "on the
    /// thread servicing the event loop to which the underlying connection is bound"). Used for
    /// the background tasks `NameWatcher`/`NameOwner`/`Proxy` run to translate the raw signal
    /// broadcast into their own state machines.
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
