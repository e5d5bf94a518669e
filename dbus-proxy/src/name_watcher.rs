//! `NameWatcher` (spec §4.3): tells the caller when a named peer exists, and when it stops.
//!
//! Grounded on the teacher's `PropertyStream`/`ProxyProperties` machinery in
//! `zbus/src/proxy.rs` for the "subscribe, then synchronously resolve initial state, then stream
//! further updates" shape, adapted from a single proxy's property cache to the simpler
//! appeared/vanished state this component tracks. Event delivery uses `async_broadcast`, the same
//! crate the teacher carries for its own signal fan-out, rather than the teacher's SlotMap-keyed
//! multi-handler registry — the spec never calls for more than one subscriber per watcher.

use std::sync::{Arc, Mutex};

use async_broadcast::{InactiveReceiver, Receiver, Sender};
use tracing::{debug, warn};

use crate::fdo;
use crate::transport::{Connection, MatchRule, MessageType};

/// The user-visible callbacks a `NameWatcher` fires, alternating strictly (spec §4.3, §8
/// invariant 6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameWatcherEvent {
    Appeared { owner: String },
    Vanished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreviousCall {
    None,
    Appeared,
    Vanished,
}

struct State {
    previous_call: PreviousCall,
    current_owner: Option<String>,
    initialized: bool,
}

struct Inner {
    conn: Arc<dyn Connection>,
    name: String,
    state: Mutex<State>,
    events_tx: Sender<NameWatcherEvent>,
    events_rx: InactiveReceiver<NameWatcherEvent>,
}

impl Inner {
    /// Applies a new raw owner reading, enforcing the alternation invariant, and broadcasts the
    /// resulting event(s) if (and only if) the visible state actually changed.
    ///
    /// A direct handover — the bus reports a new owner while the previous one never dropped to
    /// "no owner" in between — is the one case that emits two events instead of zero or one:
    /// spec §4.5 requires `Proxy` to re-parameterize its subscriptions for the new owner, which
    /// it only does in response to `Appeared`/`Vanished`, so a same-owner-never-vanished handover
    /// is synthesised as `Vanished` immediately followed by `Appeared { owner: new }`. The raw
    /// sequence still strictly alternates, preserving the invariant.
    fn apply_owner(&self, owner: Option<String>) {
        let events = {
            let mut state = self.state.lock().expect("name watcher state mutex poisoned");
            state.initialized = true;
            let previous_owner = state.current_owner.clone();
            state.current_owner = owner.clone();

            match (previous_owner.as_deref(), owner) {
                (Some(old), Some(new)) if old != new => {
                    state.previous_call = PreviousCall::Appeared;
                    vec![NameWatcherEvent::Vanished, NameWatcherEvent::Appeared { owner: new }]
                }
                (_, Some(new)) => {
                    let was_has_owner = matches!(state.previous_call, PreviousCall::Appeared);
                    if was_has_owner && state.previous_call != PreviousCall::None {
                        Vec::new()
                    } else {
                        state.previous_call = PreviousCall::Appeared;
                        vec![NameWatcherEvent::Appeared { owner: new }]
                    }
                }
                (_, None) => {
                    let was_has_owner = matches!(state.previous_call, PreviousCall::Appeared);
                    if !was_has_owner && state.previous_call != PreviousCall::None {
                        Vec::new()
                    } else {
                        state.previous_call = PreviousCall::Vanished;
                        vec![NameWatcherEvent::Vanished]
                    }
                }
            }
        };
        for event in events {
            let _ = self.events_tx.try_broadcast(event);
        }
    }
}

/// Watches a bus name for appearance/disappearance of an owner.
pub struct NameWatcher {
    inner: Arc<Inner>,
}

static_assertions::assert_impl_all!(NameWatcher: Send, Sync);

impl NameWatcher {
    /// Subscribes to `NameOwnerChanged` for `name`, then asynchronously resolves the initial
    /// owner via `GetNameOwner`. The first callback is always delivered from the background task,
    /// never synchronously from this constructor (spec §4.3, §8 invariant 6).
    pub async fn new(conn: Arc<dyn Connection>, name: impl Into<String>) -> Self {
        let name = name.into();
        let (mut events_tx, events_rx) = async_broadcast::broadcast(16);
        events_tx.set_overflow(true);
        let inner = Arc::new(Inner {
            conn: conn.clone(),
            name: name.clone(),
            state: Mutex::new(State {
                previous_call: PreviousCall::None,
                current_owner: None,
                initialized: false,
            }),
            events_tx,
            events_rx: events_rx.deactivate(),
        });

        let rule = MatchRule {
            sender: Some(fdo::BUS_DESTINATION.to_string()),
            interface: Some(fdo::BUS_INTERFACE.to_string()),
            member: Some("NameOwnerChanged".to_string()),
            path: Some(fdo::BUS_PATH.to_string()),
            arg0: Some(name.clone()),
        };
        let subscription = conn.subscribe(rule);
        let mut signals = conn.signals();
        let mut disconnect = conn.on_disconnect();

        let watch_inner = inner.clone();
        conn.spawn(Box::pin(async move {
            match fdo::get_name_owner(&watch_inner.conn, &watch_inner.name).await {
                Ok(owner) => watch_inner.apply_owner(owner),
                Err(e) => {
                    warn!(name = %watch_inner.name, error = %e, "initial GetNameOwner failed");
                    watch_inner.apply_owner(None);
                }
            }

            loop {
                futures_util::select_biased! {
                    _ = (&mut disconnect).fuse() => {
                        watch_inner.apply_owner(None);
                        break;
                    }
                    msg = signals.recv().fuse() => {
                        match msg {
                            Ok(msg) if msg.message_type == MessageType::Signal
                                && msg.interface.as_deref() == Some(fdo::BUS_INTERFACE)
                                && msg.member.as_deref() == Some("NameOwnerChanged") =>
                            {
                                let fields = msg.body.as_structure();
                                let changed_name = fields.and_then(|s| s.get(0)).and_then(|v| v.as_str());
                                if changed_name != Some(watch_inner.name.as_str()) {
                                    continue;
                                }
                                let new_owner = fields
                                    .and_then(|s| s.get(2))
                                    .and_then(|v| v.as_str())
                                    .filter(|s| !s.is_empty())
                                    .map(|s| s.to_string());
                                debug!(name = %watch_inner.name, ?new_owner, "NameOwnerChanged");
                                watch_inner.apply_owner(new_owner);
                            }
                            Ok(_) => continue,
                            Err(_) => break,
                        }
                    }
                }
            }
            watch_inner.conn.unsubscribe(subscription);
        }));

        NameWatcher { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The currently known owner, or `None` if unowned or not yet initialized.
    pub fn current_owner(&self) -> Option<String> {
        self.inner.state.lock().expect("name watcher state mutex poisoned").current_owner.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().expect("name watcher state mutex poisoned").initialized
    }

    /// A fresh receiver for this watcher's appeared/vanished events.
    pub fn events(&self) -> Receiver<NameWatcherEvent> {
        self.inner.events_rx.activate_cloned()
    }
}

impl Drop for NameWatcher {
    /// Spec §4.3 teardown: if the last callback delivered was `appeared`, synthesise a final
    /// `vanished` before releasing resources, preserving the alternation invariant across the
    /// watcher's whole lifetime.
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().expect("name watcher state mutex poisoned");
        if state.previous_call == PreviousCall::Appeared {
            state.previous_call = PreviousCall::Vanished;
            drop(state);
            let _ = self.inner.events_tx.try_broadcast(NameWatcherEvent::Vanished);
        }
    }
}

use futures_util::FutureExt;
