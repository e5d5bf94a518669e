//! `NameOwner` (spec §4.4): acquires and holds a well-known name, notifying the caller on
//! acquisition and loss.
//!
//! Grounded on the same "subscribe, then issue the request, then stream further transitions"
//! shape as `NameWatcher` (`name_watcher.rs`), which in turn is grounded on the teacher's
//! `PropertyStream`/subscribe-then-resolve pattern in `zbus/src/proxy.rs`. The synchronous
//! `ReleaseName` workaround in `unown` (spec §4.4 step 4) has no teacher analogue — it's
//! reproduced directly from the spec text since it documents a real bus-daemon race the spec
//! asks implementations to preserve (REDESIGN FLAGS / Open Question 2: verify against current
//! bus behaviour before relying on it; we keep the workaround as specified rather than guessing
//! it's been fixed).

use std::sync::{Arc, Mutex};

use async_broadcast::{InactiveReceiver, Receiver, Sender};
use enumflags2::BitFlags;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fdo::{self, RequestNameFlags, RequestNameReply};
use crate::transport::{Connection, MatchRule, MessageType};

/// The user-visible callbacks a `NameOwner` fires, alternating strictly (spec §4.4, §8
/// invariant 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOwnerEvent {
    Acquired,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreviousCall {
    None,
    Acquired,
    Lost,
}

struct State {
    previous_call: PreviousCall,
    /// True iff the bus has granted or queued the name — `unown` must send `ReleaseName` iff
    /// this is set (spec §4.4 step 4).
    needs_release: bool,
    released: bool,
}

struct Inner {
    conn: Arc<dyn Connection>,
    name: String,
    state: Mutex<State>,
    events_tx: Sender<NameOwnerEvent>,
    events_rx: InactiveReceiver<NameOwnerEvent>,
}

impl Inner {
    /// Fires the given event, enforcing the alternation invariant: repeats of the same call are
    /// swallowed rather than forwarded, exactly as `NameWatcher::apply_owner` does.
    fn fire(&self, event: NameOwnerEvent) {
        let should_fire = {
            let mut state = self.state.lock().expect("name owner state mutex poisoned");
            let previous = match event {
                NameOwnerEvent::Acquired => PreviousCall::Acquired,
                NameOwnerEvent::Lost => PreviousCall::Lost,
            };
            let changed = state.previous_call != previous;
            state.previous_call = previous;
            changed
        };
        if should_fire {
            let _ = self.events_tx.try_broadcast(event);
        }
    }
}

/// Builds a [`NameOwner`], following the same consumed-builder shape as `ProxyBuilder` (spec
/// §10.3's construction-time "configuration layer").
pub struct NameOwnerBuilder {
    conn: Arc<dyn Connection>,
    name: String,
    flags: BitFlags<RequestNameFlags>,
}

impl NameOwnerBuilder {
    pub fn new(conn: Arc<dyn Connection>, name: impl Into<String>) -> Self {
        Self {
            conn,
            name: name.into(),
            flags: BitFlags::empty(),
        }
    }

    pub fn flags(mut self, flags: BitFlags<RequestNameFlags>) -> Self {
        self.flags = flags;
        self
    }

    pub async fn build(self) -> NameOwner {
        NameOwner::new(self.conn, self.name, self.flags).await
    }
}

/// Acquires and holds a well-known bus name.
pub struct NameOwner {
    inner: Arc<Inner>,
}

static_assertions::assert_impl_all!(NameOwner: Send, Sync);

impl NameOwner {
    /// Spec §4.4 steps 1-2: subscribe to `NameLost`/`NameAcquired` filtered by name, send
    /// `RequestName`, and apply the four-way reply classification.
    pub async fn new(conn: Arc<dyn Connection>, name: impl Into<String>, flags: BitFlags<RequestNameFlags>) -> Self {
        let name = name.into();
        let (mut events_tx, events_rx) = async_broadcast::broadcast(16);
        events_tx.set_overflow(true);
        let inner = Arc::new(Inner {
            conn: conn.clone(),
            name: name.clone(),
            state: Mutex::new(State {
                previous_call: PreviousCall::None,
                needs_release: false,
                released: false,
            }),
            events_tx,
            events_rx: events_rx.deactivate(),
        });

        let lost_rule = MatchRule {
            sender: Some(fdo::BUS_DESTINATION.to_string()),
            interface: Some(fdo::BUS_INTERFACE.to_string()),
            member: Some("NameLost".to_string()),
            path: Some(fdo::BUS_PATH.to_string()),
            arg0: Some(name.clone()),
        };
        let acquired_rule = MatchRule {
            member: Some("NameAcquired".to_string()),
            ..lost_rule.clone()
        };
        let lost_sub = conn.subscribe(lost_rule);
        let acquired_sub = conn.subscribe(acquired_rule);
        let mut signals = conn.signals();
        let mut disconnect = conn.on_disconnect();

        let owner_inner = inner.clone();
        conn.spawn(Box::pin(async move {
            match fdo::request_name(&owner_inner.conn, &owner_inner.name, flags).await {
                Ok(RequestNameReply::PrimaryOwner) => {
                    owner_inner.state.lock().expect("name owner state mutex poisoned").needs_release = true;
                    owner_inner.fire(NameOwnerEvent::Acquired);
                }
                Ok(RequestNameReply::InQueue) => {
                    owner_inner.state.lock().expect("name owner state mutex poisoned").needs_release = true;
                    owner_inner.fire(NameOwnerEvent::Lost);
                }
                Ok(RequestNameReply::Exists) | Ok(RequestNameReply::AlreadyOwner) => {
                    owner_inner.fire(NameOwnerEvent::Lost);
                }
                Err(e) => {
                    warn!(name = %owner_inner.name, error = %e, "RequestName failed");
                    owner_inner.fire(NameOwnerEvent::Lost);
                }
            }

            loop {
                futures_util::select_biased! {
                    _ = (&mut disconnect).fuse() => {
                        owner_inner.fire(NameOwnerEvent::Lost);
                        break;
                    }
                    msg = signals.recv().fuse() => {
                        match msg {
                            Ok(msg) if msg.message_type == MessageType::Signal
                                && msg.interface.as_deref() == Some(fdo::BUS_INTERFACE)
                                && matches!(msg.member.as_deref(), Some("NameLost") | Some("NameAcquired")) =>
                            {
                                let changed_name = msg.body.as_structure().and_then(|s| s.get(0)).and_then(|v| v.as_str());
                                if changed_name != Some(owner_inner.name.as_str()) {
                                    continue;
                                }
                                debug!(name = %owner_inner.name, member = msg.member.as_deref(), "name ownership signal");
                                match msg.member.as_deref() {
                                    Some("NameAcquired") => owner_inner.fire(NameOwnerEvent::Acquired),
                                    Some("NameLost") => owner_inner.fire(NameOwnerEvent::Lost),
                                    _ => {}
                                }
                            }
                            Ok(_) => continue,
                            Err(_) => break,
                        }
                    }
                }
            }
            owner_inner.conn.unsubscribe(lost_sub);
            owner_inner.conn.unsubscribe(acquired_sub);
        }));

        NameOwner { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// A fresh receiver for this owner's acquired/lost events.
    pub fn events(&self) -> Receiver<NameOwnerEvent> {
        self.inner.events_rx.activate_cloned()
    }

    /// Spec §4.4 step 4: release the name, using the synchronous call path to avoid racing a
    /// subsequent `RequestName` from this same process, then synthesise a final `lost` callback.
    ///
    /// Idempotent: a second call observes `released` already set and does nothing beyond firing
    /// the final `lost` callback again is specifically avoided — `unown` is meant to be called
    /// once, but repeated calls must not re-release an already-released name.
    pub fn unown(&self) -> Result<()> {
        let (needs_release, already_released) = {
            let mut state = self.inner.state.lock().expect("name owner state mutex poisoned");
            let already = state.released;
            state.released = true;
            (state.needs_release, already)
        };
        if already_released {
            return Ok(());
        }
        if needs_release {
            match fdo::release_name_sync(&self.inner.conn, &self.inner.name) {
                Ok(_) => {}
                Err(e) => warn!(name = %self.inner.name, error = %e, "ReleaseName failed during unown"),
            }
        }
        self.inner.fire(NameOwnerEvent::Lost);
        Ok(())
    }
}

impl Drop for NameOwner {
    fn drop(&mut self) {
        let _ = self.unown();
    }
}

use futures_util::FutureExt;
