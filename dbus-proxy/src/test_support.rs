//! An in-process fake bus backing this crate's own tests (SPEC_FULL.md §10.4). Not a public
//! API: a `#[cfg(test)]`-only `Connection` implementation that stands in for the out-of-scope
//! real transport (spec §1), since driving an actual `dbus-daemon` is both a "test harnesses"
//! non-goal and unavailable in this sandboxed build.
//!
//! Grounded on the teacher's own executor wiring (`async_executor::Executor` ticked from a
//! dedicated thread via `async_io::block_on`, see `examples/dbus2-zbus-old/zbus/src/connection.rs`
//! around its `internal_executor` thread) — the one place this crate actually needs to *run* an
//! executor is exactly this test double, since a real `Connection` impl would own that job
//! itself.

#![cfg(test)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_broadcast::{InactiveReceiver, Receiver as BroadcastReceiver, Sender as BroadcastSender};
use async_executor::Executor;
use async_io::{block_on, Timer};
use async_trait::async_trait;
use event_listener::{Event, EventListener};
use futures_util::FutureExt;
use wire_value::{StructureBuilder, Value};

use crate::error::Error;
use crate::fdo::{self, RequestNameFlags};
use crate::transport::{BoxFuture, Connection, MatchRule, Message, MessageType, SubscriptionId};

pub type MethodResult = std::result::Result<Value, (String, String)>;
pub type MethodHandler = Box<dyn Fn(&Message) -> BoxFuture<'static, MethodResult> + Send + Sync>;

struct OwnerSlot {
    owner: String,
    allow_replacement: bool,
}

struct Inner {
    unique_name: String,
    serial: AtomicU32,
    next_sub: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, MatchRule>>,
    signals_tx: BroadcastSender<Arc<Message>>,
    signals_rx: InactiveReceiver<Arc<Message>>,
    disconnect: Event,
    methods: Mutex<HashMap<(String, String, String), MethodHandler>>,
    owners: Mutex<HashMap<String, VecDeque<OwnerSlot>>>,
    executor: Arc<Executor<'static>>,
}

/// A tiny in-process stand-in for a D-Bus connection, implementing just enough of
/// `org.freedesktop.DBus` bookkeeping (`RequestName`/`ReleaseName`/`GetNameOwner`, with
/// queueing) and arbitrary registered method handlers to drive `NameWatcher`, `NameOwner` and
/// `Proxy` end to end.
pub struct FakeBus {
    inner: Arc<Inner>,
}

impl FakeBus {
    pub fn new(unique_name: impl Into<String>) -> Arc<Self> {
        let (mut signals_tx, signals_rx) = async_broadcast::broadcast(64);
        signals_tx.set_overflow(true);
        let executor = Arc::new(Executor::new());
        let ticker = executor.clone();
        std::thread::Builder::new()
            .name("fake-bus executor".into())
            .spawn(move || block_on(ticker.run(std::future::pending::<()>())))
            .expect("spawn fake bus executor thread");

        Arc::new(Self {
            inner: Arc::new(Inner {
                unique_name: unique_name.into(),
                serial: AtomicU32::new(1),
                next_sub: AtomicU64::new(1),
                subscriptions: Mutex::new(HashMap::new()),
                signals_tx,
                signals_rx: signals_rx.deactivate(),
                disconnect: Event::new(),
                methods: Mutex::new(HashMap::new()),
                owners: Mutex::new(HashMap::new()),
                executor,
            }),
        })
    }

    /// Registers a method handler for `(path, interface, member)`, replacing any previous one.
    pub fn register_method(
        &self,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        handler: MethodHandler,
    ) {
        self.inner
            .methods
            .lock()
            .expect("fake bus mutex poisoned")
            .insert((path.into(), interface.into(), member.into()), handler);
    }

    /// Broadcasts a signal as if emitted by this bus's own unique name.
    pub fn emit_signal(
        &self,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        body: Value,
    ) {
        let msg = Arc::new(Message {
            message_type: MessageType::Signal,
            sender: Some(self.inner.unique_name.clone()),
            destination: None,
            path: Some(path.into()),
            interface: Some(interface.into()),
            member: Some(member.into()),
            serial: self.next_serial(),
            reply_serial: None,
            error_name: None,
            body,
        });
        let _ = self.inner.signals_tx.try_broadcast(msg);
    }

    /// Fires the one-shot disconnect event, as a real transport does on socket loss.
    pub fn disconnect(&self) {
        self.inner.disconnect.notify(usize::MAX);
    }

    /// Directly seeds ownership of `name` by an out-of-band `owner` token, without going through
    /// `RequestName` — used to simulate "another client already owns this name" for the
    /// queueing/`Exists`/`InQueue` edge cases spec §8 calls out.
    pub fn seed_owner(&self, name: impl Into<String>, owner: impl Into<String>, allow_replacement: bool) {
        self.inner
            .owners
            .lock()
            .expect("fake bus mutex poisoned")
            .entry(name.into())
            .or_default()
            .push_front(OwnerSlot {
                owner: owner.into(),
                allow_replacement,
            });
    }

    fn name_owner_changed_signal(name: &str, old_owner: &str, new_owner: &str) -> Message {
        let mut body = StructureBuilder::new();
        body.append(Value::new_string(name).expect("bus name is ascii"));
        body.append(Value::new_string(old_owner).expect("unique names are ascii"));
        body.append(Value::new_string(new_owner).expect("unique names are ascii"));
        Message {
            message_type: MessageType::Signal,
            sender: Some(fdo::BUS_DESTINATION.to_string()),
            destination: None,
            path: Some(fdo::BUS_PATH.to_string()),
            interface: Some(fdo::BUS_INTERFACE.to_string()),
            member: Some("NameOwnerChanged".to_string()),
            serial: 0,
            reply_serial: None,
            error_name: None,
            body: body.build(),
        }
    }

    fn broadcast_raw(&self, mut msg: Message) {
        msg.serial = self.next_serial();
        let _ = self.inner.signals_tx.try_broadcast(Arc::new(msg));
    }

    fn handle_request_name(&self, message: &Message) -> MethodResult {
        let fields = message.body.as_structure();
        let name = fields
            .and_then(|s| s.get(0))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ("org.freedesktop.DBus.Error.InvalidArgs".to_string(), "missing name".to_string()))?
            .to_string();
        let flags_bits = fields.and_then(|s| s.get(1)).and_then(|v| match v {
            Value::U32(n) => Some(*n),
            _ => None,
        }).unwrap_or(0);
        let flags = enumflags2::BitFlags::<RequestNameFlags>::from_bits_truncate(flags_bits);
        let allow_replacement = flags.contains(RequestNameFlags::AllowReplacement);
        let do_not_queue = flags.contains(RequestNameFlags::DoNotQueue);
        let replace_existing = flags.contains(RequestNameFlags::ReplaceExisting);

        let mut owners = self.inner.owners.lock().expect("fake bus mutex poisoned");
        let queue = owners.entry(name.clone()).or_default();
        let us = self.inner.unique_name.clone();

        let reply_code: u32;
        let mut changed: Option<(String, String)> = None; // (old_owner, new_owner)

        if queue.is_empty() {
            queue.push_front(OwnerSlot {
                owner: us.clone(),
                allow_replacement,
            });
            reply_code = 1; // PrimaryOwner
            changed = Some((String::new(), us.clone()));
        } else if queue.front().map(|o| o.owner == us).unwrap_or(false) {
            reply_code = 4; // AlreadyOwner
        } else if replace_existing && queue.front().map(|o| o.allow_replacement).unwrap_or(false) {
            let old = queue.pop_front().map(|o| o.owner).unwrap_or_default();
            queue.push_front(OwnerSlot {
                owner: us.clone(),
                allow_replacement,
            });
            reply_code = 1;
            changed = Some((old, us.clone()));
        } else if do_not_queue {
            reply_code = 3; // Exists
        } else {
            queue.push_back(OwnerSlot {
                owner: us.clone(),
                allow_replacement,
            });
            reply_code = 2; // InQueue
        }
        drop(owners);

        if let Some((old, new)) = changed {
            self.broadcast_raw(Self::name_owner_changed_signal(&name, &old, &new));
        }

        Ok(Value::U32(reply_code))
    }

    fn handle_release_name(&self, message: &Message) -> MethodResult {
        let name = message
            .body
            .as_structure()
            .and_then(|s| s.get(0))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ("org.freedesktop.DBus.Error.InvalidArgs".to_string(), "missing name".to_string()))?
            .to_string();

        let us = self.inner.unique_name.clone();
        let mut owners = self.inner.owners.lock().expect("fake bus mutex poisoned");
        let reply_code;
        let mut changed = None;
        match owners.get_mut(&name) {
            None => reply_code = 2, // NonExistent
            Some(queue) => {
                if queue.is_empty() {
                    reply_code = 2;
                } else if queue.front().map(|o| o.owner == us).unwrap_or(false) {
                    queue.pop_front();
                    let new_owner = queue.front().map(|o| o.owner.clone()).unwrap_or_default();
                    changed = Some((us.clone(), new_owner));
                    reply_code = 1; // Released
                } else if let Some(pos) = queue.iter().position(|o| o.owner == us) {
                    queue.remove(pos);
                    reply_code = 1;
                } else {
                    reply_code = 3; // NotOwner
                }
            }
        }
        drop(owners);

        if let Some((old, new)) = changed {
            self.broadcast_raw(Self::name_owner_changed_signal(&name, &old, &new));
        }

        Ok(Value::U32(reply_code))
    }

    fn handle_get_name_owner(&self, message: &Message) -> MethodResult {
        let name = message
            .body
            .as_structure()
            .and_then(|s| s.get(0))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ("org.freedesktop.DBus.Error.InvalidArgs".to_string(), "missing name".to_string()))?
            .to_string();

        let owners = self.inner.owners.lock().expect("fake bus mutex poisoned");
        match owners.get(&name).and_then(|q| q.front()) {
            Some(slot) => Ok(Value::new_string(slot.owner.clone()).expect("unique names are ascii")),
            None => Err((
                "org.freedesktop.DBus.Error.NameHasNoOwner".to_string(),
                format!("name `{name}` has no owner"),
            )),
        }
    }

    async fn dispatch(&self, message: Message) -> crate::error::Result<Message> {
        let is_bus_call = message.destination.as_deref() == Some(fdo::BUS_DESTINATION)
            && message.path.as_deref() == Some(fdo::BUS_PATH)
            && message.interface.as_deref() == Some(fdo::BUS_INTERFACE);

        let result: MethodResult = if is_bus_call {
            match message.member.as_deref() {
                Some("RequestName") => self.handle_request_name(&message),
                Some("ReleaseName") => self.handle_release_name(&message),
                Some("GetNameOwner") => self.handle_get_name_owner(&message),
                Some(other) => Err((
                    "org.freedesktop.DBus.Error.UnknownMethod".to_string(),
                    format!("no such bus method `{other}`"),
                )),
                None => Err((
                    "org.freedesktop.DBus.Error.UnknownMethod".to_string(),
                    "method call with no member".to_string(),
                )),
            }
        } else {
            let key = (
                message.path.clone().unwrap_or_default(),
                message.interface.clone().unwrap_or_default(),
                message.member.clone().unwrap_or_default(),
            );
            let handler = self
                .inner
                .methods
                .lock()
                .expect("fake bus mutex poisoned")
                .get(&key)
                .map(|_| ());
            if handler.is_none() {
                return Err(Error::UnknownMethod(format!(
                    "no handler registered for {}.{} at {}",
                    key.1, key.2, key.0
                )));
            }
            // Re-look-up to get the actual future (handlers aren't `Clone`); locking twice keeps
            // the mutex guard out of the `.await` below.
            let fut = {
                let methods = self.inner.methods.lock().expect("fake bus mutex poisoned");
                (methods.get(&key).expect("checked above"))(&message)
            };
            fut.await
        };

        match result {
            Ok(body) => {
                let mut reply_body = StructureBuilder::new();
                reply_body.append(body);
                Ok(Message {
                    message_type: MessageType::MethodReturn,
                    sender: Some(self.inner.unique_name.clone()),
                    destination: message.sender.clone(),
                    path: None,
                    interface: None,
                    member: None,
                    serial: self.next_serial(),
                    reply_serial: Some(message.serial),
                    error_name: None,
                    body: reply_body.build(),
                })
            }
            Err((wire_name, wire_message)) => Err(crate::error::classify_wire_name(&wire_name, wire_message)),
        }
    }
}

#[async_trait]
impl Connection for FakeBus {
    async fn send(&self, message: Message) -> crate::error::Result<()> {
        match message.message_type {
            MessageType::Signal => {
                self.broadcast_raw(message);
            }
            _ => {
                let _ = self.dispatch(message).await;
            }
        }
        Ok(())
    }

    async fn send_with_reply(&self, message: Message, timeout: Option<Duration>) -> crate::error::Result<Message> {
        let fut = self.dispatch(message);
        match timeout {
            Some(timeout) => futures_util::select! {
                result = fut.fuse() => result,
                _ = Timer::after(timeout).fuse() => Err(Error::NoReply("method call timed out".into())),
            },
            None => fut.await,
        }
    }

    fn send_with_reply_sync(&self, message: Message, timeout: Option<Duration>) -> crate::error::Result<Message> {
        block_on(self.send_with_reply(message, timeout))
    }

    fn send_block(&self, _serial: u32) -> crate::error::Result<Message> {
        Err(Error::Failed(
            "fake bus resolves replies synchronously within send_with_reply; there is nothing to block on".into(),
        ))
    }

    fn send_cancel(&self, _serial: u32) {}

    fn subscribe(&self, rule: MatchRule) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_sub.fetch_add(1, Ordering::SeqCst));
        self.inner.subscriptions.lock().expect("fake bus mutex poisoned").insert(id, rule);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscriptions.lock().expect("fake bus mutex poisoned").remove(&id);
    }

    fn signals(&self) -> BroadcastReceiver<Arc<Message>> {
        self.inner.signals_rx.activate_cloned()
    }

    fn on_disconnect(&self) -> EventListener {
        self.inner.disconnect.listen()
    }

    fn unique_name(&self) -> Option<String> {
        Some(self.inner.unique_name.clone())
    }

    fn next_serial(&self) -> u32 {
        self.inner.serial.fetch_add(1, Ordering::SeqCst)
    }

    fn spawn(&self, future: BoxFuture<'static, ()>) {
        self.inner.executor.spawn(future).detach();
    }
}

/// A connection that answers nothing — for unit tests that build a component's internal state
/// directly (bypassing its constructor) and never actually drive any bus I/O through it.
pub fn noop_connection() -> Arc<dyn Connection> {
    FakeBus::new(":1.0")
}
