//! `ObjectExport` (spec §4.6): the minimal object-server surface needed to exercise a Proxy
//! against an in-process peer in this crate's own tests. Not a general object-server framework
//! (spec §1 places that out of scope) — just enough to register interface vtables at object
//! paths, answer `Introspectable.Introspect`'s child-enumeration question, and support subtree
//! handlers.
//!
//! No teacher source file implements this surface (zbus's own `ObjectServer` lives in a module
//! this retrieval pack didn't keep — see `DESIGN.md`); the registry shape below (a `SlotMap` of
//! registrations keyed by path, returning an integer id you unregister by) is grounded on the
//! same "SlotMap-keyed handler registry with an opaque id" idiom `zbus/src/proxy.rs` uses for
//! its own signal-handler bookkeeping, reused here for object registrations instead.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use slotmap::{new_key_type, SlotMap};
use wire_value::Value;

use crate::error::{Error, Result};
use crate::transport::Message;

pub type MethodResult = std::result::Result<Value, (String, String)>;
pub type MethodHandler = Box<dyn Fn(&Message) -> MethodResult + Send + Sync>;

/// A single interface's dispatch table: method name -> handler.
pub struct Vtable {
    pub interface: String,
    pub methods: HashMap<String, MethodHandler>,
}

impl Vtable {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            methods: HashMap::new(),
        }
    }

    pub fn method(mut self, name: impl Into<String>, handler: MethodHandler) -> Self {
        self.methods.insert(name.into(), handler);
        self
    }
}

/// The three per-invocation callbacks a subtree registration supplies (spec §4.6).
pub struct SubtreeHandlers {
    pub enumerate_children: Box<dyn Fn(&str) -> Vec<String> + Send + Sync>,
    pub introspect_node: Box<dyn Fn(&str) -> String + Send + Sync>,
    pub dispatch_node: Box<dyn Fn(&str) -> Option<Vtable> + Send + Sync>,
}

new_key_type! {
    struct RegKey;
}

/// A registration handle. Unregistering invokes the caller's unregistered callback exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationId(RegKey);

/// One interface's vtable at one path. Each (path, interface) pair gets its own key and its own
/// `unregistered` slot, so two interfaces sharing a path have independent ids and independent,
/// exactly-once teardown callbacks (spec §4.6).
struct ExplicitRegistration {
    path: String,
    interface: String,
    vtable: Vtable,
    unregistered: Option<Box<dyn FnOnce() + Send>>,
}

struct SubtreeRegistration {
    prefix: String,
    handlers: SubtreeHandlers,
    unregistered: Option<Box<dyn FnOnce() + Send>>,
}

#[derive(Default)]
struct Inner {
    explicit: SlotMap<RegKey, ExplicitRegistration>,
    subtrees: SlotMap<RegKey, SubtreeRegistration>,
}

/// Registers interface vtables at object paths and answers child-enumeration queries.
#[derive(Default)]
pub struct ObjectExport {
    inner: Mutex<Inner>,
}

fn normalize(path: &str) -> Result<String> {
    Value::new_object_path(path.to_string())
        .map(|_| path.to_string())
        .map_err(|e| Error::InvalidArgs(format!("invalid object path: {e}")))
}

/// `child` is a direct child of `parent` iff it starts with `parent` (plus a `/` separator
/// unless `parent == "/"`) and has exactly one further path segment.
fn direct_child_segment(parent: &str, child: &str) -> Option<String> {
    if parent == child {
        return None;
    }
    let rest = if parent == "/" {
        child.strip_prefix('/')?
    } else {
        child.strip_prefix(parent)?.strip_prefix('/')?
    };
    if rest.is_empty() {
        return None;
    }
    let first_segment = rest.split('/').next()?;
    Some(first_segment.to_string())
}

/// Whether `path` is `prefix` itself or lies strictly below it.
fn under_prefix(path: &str, prefix: &str) -> bool {
    if path == prefix {
        return true;
    }
    if prefix == "/" {
        return path.starts_with('/');
    }
    path.starts_with(prefix) && path[prefix.len()..].starts_with('/')
}

impl ObjectExport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `vtable` at `path`. Multiple interfaces may be registered at the same path, each
    /// getting its own id; registering the *same* interface twice at the same path is a collision
    /// (spec §4.6: "reject collisions with any existing registration ... with `ObjectPathInUse`").
    pub fn register(&self, path: &str, vtable: Vtable) -> Result<RegistrationId> {
        let path = normalize(path)?;
        let mut inner = self.inner.lock().expect("object export mutex poisoned");

        if inner
            .explicit
            .values()
            .any(|existing| existing.path == path && existing.interface == vtable.interface)
        {
            return Err(Error::ObjectPathInUse(format!(
                "interface `{}` already registered at `{path}`",
                vtable.interface
            )));
        }

        let interface = vtable.interface.clone();
        let key = inner.explicit.insert(ExplicitRegistration {
            path,
            interface,
            vtable,
            unregistered: None,
        });
        Ok(RegistrationId(key))
    }

    /// As [`Self::register`], but runs `unregistered` exactly once when this registration (or
    /// the whole object it was joined into) is later removed.
    pub fn register_with_callback(
        &self,
        path: &str,
        vtable: Vtable,
        unregistered: impl FnOnce() + Send + 'static,
    ) -> Result<RegistrationId> {
        let id = self.register(path, vtable)?;
        let mut inner = self.inner.lock().expect("object export mutex poisoned");
        if let Some(reg) = inner.explicit.get_mut(id.0) {
            reg.unregistered = Some(Box::new(unregistered));
        }
        Ok(id)
    }

    /// Registers a subtree handler owning the entire prefix `path`. Coexists with explicit
    /// registrations under the same prefix; explicit registrations take precedence for their
    /// exact paths (spec §4.6).
    pub fn register_subtree(&self, prefix: &str, handlers: SubtreeHandlers) -> Result<RegistrationId> {
        let prefix = normalize(prefix)?;
        let mut inner = self.inner.lock().expect("object export mutex poisoned");
        if inner.subtrees.values().any(|s| s.prefix == prefix) {
            return Err(Error::ObjectPathInUse(format!(
                "a subtree is already registered at `{prefix}`"
            )));
        }
        let key = inner.subtrees.insert(SubtreeRegistration {
            prefix,
            handlers,
            unregistered: None,
        });
        Ok(RegistrationId(key))
    }

    /// Unregisters by id, invoking the caller's unregistered callback exactly once. Returns
    /// whether a registration with this id was found.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut inner = self.inner.lock().expect("object export mutex poisoned");
        if let Some(mut reg) = inner.explicit.remove(id.0) {
            if let Some(cb) = reg.unregistered.take() {
                cb();
            }
            return true;
        }
        if let Some(mut reg) = inner.subtrees.remove(id.0) {
            if let Some(cb) = reg.unregistered.take() {
                cb();
            }
            return true;
        }
        false
    }

    /// The direct children of `path`, per spec §4.6/`Introspectable.Introspect`'s child set.
    /// Union of explicit registrations one level below `path` and, if `path` lies at or below a
    /// registered subtree prefix, that subtree's own `enumerate_children(path)`.
    pub fn children_of(&self, path: &str) -> BTreeSet<String> {
        let inner = self.inner.lock().expect("object export mutex poisoned");
        let mut out = BTreeSet::new();
        for reg in inner.explicit.values() {
            if let Some(seg) = direct_child_segment(path, &reg.path) {
                out.insert(seg);
            }
        }
        for reg in inner.subtrees.values() {
            if let Some(seg) = direct_child_segment(path, &reg.prefix) {
                out.insert(seg);
            } else if under_prefix(path, &reg.prefix) {
                for child in (reg.handlers.enumerate_children)(path) {
                    out.insert(child);
                }
            }
        }
        out
    }

    /// Dispatches one method call. An explicit registration at the exact `path`/`interface` is
    /// tried first; otherwise the longest-prefix-matching subtree's `dispatch_node` supplies the
    /// vtable, if any.
    pub fn dispatch(&self, path: &str, interface: &str, member: &str, message: &Message) -> Result<Value> {
        let inner = self.inner.lock().expect("object export mutex poisoned");

        if let Some(reg) = inner.explicit.values().find(|r| r.path == path && r.interface == interface) {
            if let Some(handler) = reg.vtable.methods.get(member) {
                return handler(message).map_err(|(name, msg)| crate::error::classify_wire_name(&name, msg));
            }
            return Err(Error::UnknownMethod(format!(
                "no method `{member}` on interface `{interface}` at `{path}`"
            )));
        }

        let subtree = inner
            .subtrees
            .values()
            .filter(|s| under_prefix(path, &s.prefix))
            .max_by_key(|s| s.prefix.len());
        if let Some(subtree) = subtree {
            if let Some(vtable) = (subtree.handlers.dispatch_node)(path) {
                if vtable.interface == interface {
                    if let Some(handler) = vtable.methods.get(member) {
                        return handler(message).map_err(|(name, msg)| crate::error::classify_wire_name(&name, msg));
                    }
                }
            }
        }

        Err(Error::UnknownObject(format!("no object registered at `{path}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn introspection_tree_matches_spec_s1() {
        let export = ObjectExport::new();
        export
            .register("/foo/boss", Vtable::new("org.example.Foo"))
            .unwrap();

        assert_eq!(
            export.children_of("/"),
            BTreeSet::from(["foo".to_string()])
        );
        assert_eq!(
            export.children_of("/foo"),
            BTreeSet::from(["boss".to_string()])
        );
    }

    #[test]
    fn second_interface_at_same_path_succeeds() {
        let export = ObjectExport::new();
        export
            .register("/foo/boss", Vtable::new("org.example.Foo"))
            .unwrap();
        assert!(export
            .register("/foo/boss", Vtable::new("org.example.Bar"))
            .is_ok());
    }

    #[test]
    fn colliding_interface_at_same_path_fails() {
        let export = ObjectExport::new();
        export
            .register("/foo/boss", Vtable::new("org.example.Foo"))
            .unwrap();
        let err = export
            .register("/foo/boss", Vtable::new("org.example.Foo"))
            .unwrap_err();
        assert!(matches!(err, Error::ObjectPathInUse(_)));
    }

    #[test]
    fn unregister_invokes_callback_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let export = ObjectExport::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let id = export
            .register_with_callback("/foo", Vtable::new("org.example.Foo"), move || {
                calls2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(export.unregister(id));
        assert!(!export.unregister(id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_interfaces_at_same_path_have_independent_ids_and_teardown() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let export = ObjectExport::new();
        let foo_calls = Arc::new(AtomicUsize::new(0));
        let bar_calls = Arc::new(AtomicUsize::new(0));

        let foo_calls2 = foo_calls.clone();
        let foo_id = export
            .register_with_callback("/foo/boss", Vtable::new("org.example.Foo"), move || {
                foo_calls2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let bar_calls2 = bar_calls.clone();
        let bar_id = export
            .register_with_callback("/foo/boss", Vtable::new("org.example.Bar"), move || {
                bar_calls2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert_ne!(foo_id, bar_id);

        // Unregistering one interface's id must not remove the other's registration, and must
        // only ever invoke that interface's own teardown callback.
        assert!(export.unregister(foo_id));
        assert_eq!(foo_calls.load(Ordering::SeqCst), 1);
        assert_eq!(bar_calls.load(Ordering::SeqCst), 0);

        // Still registered (UnknownMethod, not UnknownObject): only the handler lookup fails.
        let err = export
            .dispatch(
                "/foo/boss",
                "org.example.Bar",
                "AnyMethod",
                &Message::method_call("dest", "/foo/boss", "org.example.Bar", "AnyMethod", Value::Structure(wire_value::Structure::unit())),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownMethod(_)));

        assert!(export.unregister(bar_id));
        assert_eq!(bar_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subtree_enumerates_dynamic_children() {
        let export = ObjectExport::new();
        export
            .register_subtree(
                "/dynamic",
                SubtreeHandlers {
                    enumerate_children: Box::new(|_| vec!["a".to_string(), "b".to_string()]),
                    introspect_node: Box::new(|_| String::new()),
                    dispatch_node: Box::new(|_| None),
                },
            )
            .unwrap();

        assert_eq!(
            export.children_of("/dynamic"),
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        assert_eq!(export.children_of("/"), BTreeSet::from(["dynamic".to_string()]));
    }
}
