// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Data sources for bindings.
//!
//! Anything a binding path walks through that is not an element implements
//! [`BindingSource`]: members are read and written by name, indexers by
//! [`IndexKey`]. Change notification is opt-in through a [`Notifier`] whose
//! [`Subscription`]s are owned by the binding that walks the object, so
//! dropping the binding, or re-resolving it onto a different object, releases
//! them.
//!
//! # Re-entrancy
//!
//! Notifiers call their subscribers synchronously, and a binding reacting to a
//! notification reads the source again right away. Sources that keep their
//! state in a `RefCell` must release their borrows before calling
//! [`Notifier::notify`].

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use trellis_property::ErasedValue;

use crate::error::SourceError;

type CallbackRc<T> = Rc<dyn Fn(&T)>;
type CallbackWeak<T> = Weak<dyn Fn(&T)>;

/// Broadcasts change notifications to live subscribers in registration order.
///
/// Subscribers are held weakly; dropping a [`Subscription`] unsubscribes.
/// Dead entries are pruned lazily on the next notification.
pub struct Notifier<T: ?Sized + 'static> {
    subscribers: RefCell<Vec<CallbackWeak<T>>>,
}

impl<T: ?Sized + 'static> Default for Notifier<T> {
    fn default() -> Self {
        Self {
            subscribers: RefCell::new(Vec::new()),
        }
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<T: ?Sized + 'static> Notifier<T> {
    /// Creates a notifier with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` until the returned guard is dropped.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: CallbackRc<T> = Rc::new(callback);
        self.subscribers.borrow_mut().push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Calls every live subscriber with `arg`.
    ///
    /// No borrow is held while callbacks run, so a callback may subscribe,
    /// unsubscribe or notify again.
    pub fn notify(&self, arg: &T) {
        let callbacks: Vec<CallbackRc<T>> = {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.retain(|w| w.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in callbacks {
            callback(arg);
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

/// RAII guard for a [`Notifier`] callback.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    _guard: Box<dyn Any>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Argument of a bracketed path step.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// `Items[3]`.
    Int(i64),
    /// `Map[key]`.
    Str(Rc<str>),
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Member name reported by sources whose indexer contents changed.
pub const INDEXER_MEMBER: &str = "Item[]";

/// An object a binding path can walk through.
///
/// Every method but [`BindingSource::get`] has a default that describes a
/// read-only object without indexers or notifications.
///
/// A member that exists but holds no object is reported as
/// `Some(ErasedValue::unset())`; `None` means the member does not exist, which
/// leaves the path unresolved.
///
/// ```rust
/// use std::cell::RefCell;
/// use trellis_property::ErasedValue;
/// use trellis_ui::{BindingSource, Notifier, SourceError};
///
/// #[derive(Default)]
/// struct Person {
///     name: RefCell<String>,
///     changed: Notifier<str>,
/// }
///
/// impl BindingSource for Person {
///     fn get(&self, member: &str) -> Option<ErasedValue> {
///         (member == "Name").then(|| ErasedValue::new(self.name.borrow().clone()))
///     }
///
///     fn set(&self, member: &str, value: ErasedValue) -> Result<(), SourceError> {
///         let name = value
///             .get::<String>()
///             .ok_or_else(|| SourceError::wrong_type(member, "String"))?;
///         *self.name.borrow_mut() = name;
///         self.changed.notify(member);
///         Ok(())
///     }
///
///     fn property_changed(&self) -> Option<&Notifier<str>> {
///         Some(&self.changed)
///     }
/// }
/// ```
pub trait BindingSource {
    /// Name used in diagnostics and by `FindAncestor`-style type checks.
    fn type_name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Reads a member.
    fn get(&self, member: &str) -> Option<ErasedValue>;

    /// Writes a member.
    fn set(&self, member: &str, value: ErasedValue) -> Result<(), SourceError> {
        let _ = value;
        Err(SourceError::read_only(member))
    }

    /// Reads an indexer slot.
    fn get_index(&self, key: &IndexKey) -> Option<ErasedValue> {
        let _ = key;
        None
    }

    /// Writes an indexer slot.
    fn set_index(&self, key: &IndexKey, value: ErasedValue) -> Result<(), SourceError> {
        let _ = value;
        Err(SourceError::read_only(&format!("[{key}]")))
    }

    /// Member change notifications. The argument is the member name; an empty
    /// name means every member changed.
    fn property_changed(&self) -> Option<&Notifier<str>> {
        None
    }

    /// Synchronous error text for a member, consulted by bindings that
    /// validate on data errors.
    fn data_error(&self, member: &str) -> Option<String> {
        let _ = member;
        None
    }

    /// Current error contents for a member, consulted by bindings that
    /// validate on notify data errors.
    fn errors(&self, member: &str) -> Vec<ErasedValue> {
        let _ = member;
        Vec::new()
    }

    /// Raised with a member name whenever [`BindingSource::errors`] changes.
    fn errors_changed(&self) -> Option<&Notifier<str>> {
        None
    }
}

/// Shared handle to a [`BindingSource`], compared by identity.
///
/// `Obj` is what `DataContext` and `Source` hold, and what a member returns
/// when it refers to another object in the graph.
#[derive(Clone)]
pub struct Obj(Rc<dyn BindingSource>);

impl Obj {
    /// Wraps a fresh source.
    pub fn new(source: impl BindingSource + 'static) -> Self {
        Self(Rc::new(source))
    }

    /// Wraps an existing `Rc`, keeping the caller's handle usable.
    #[must_use]
    pub fn from_rc<S: BindingSource + 'static>(source: Rc<S>) -> Self {
        Self(source)
    }

    /// The source.
    #[must_use]
    #[inline]
    pub fn source(&self) -> &dyn BindingSource {
        &*self.0
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0).cast::<()>()
    }
}

impl std::ops::Deref for Obj {
    type Target = dyn BindingSource;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Obj {}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Obj({}@{:p})", self.0.type_name(), self.addr())
    }
}

/// Reads `value` as an object reference, accepting both `Obj` and
/// `Option<Obj>`.
pub(crate) fn as_object(value: &ErasedValue) -> Option<Obj> {
    if let Some(obj) = value.downcast_ref::<Obj>() {
        return Some(obj.clone());
    }
    value.downcast_ref::<Option<Obj>>().and_then(Clone::clone)
}

/// Whether `value` stands for "no object".
pub(crate) fn is_null(value: &ErasedValue) -> bool {
    value.is_unset() || matches!(value.downcast_ref::<Option<Obj>>(), Some(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Empty;

    impl BindingSource for Empty {
        fn get(&self, _member: &str) -> Option<ErasedValue> {
            None
        }
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let notifier = Notifier::<str>::new();
        let hits = Rc::new(Cell::new(0));
        let hits_in_callback = hits.clone();
        let sub = notifier.subscribe(move |_| hits_in_callback.set(hits_in_callback.get() + 1));

        notifier.notify("Name");
        assert_eq!(hits.get(), 1);
        assert_eq!(notifier.subscriber_count(), 1);

        drop(sub);
        notifier.notify("Name");
        assert_eq!(hits.get(), 1);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn callbacks_may_subscribe_during_notify() {
        let notifier = Rc::new(Notifier::<str>::new());
        let late = Rc::new(RefCell::new(Vec::new()));
        let (n, l) = (notifier.clone(), late.clone());
        let _sub = notifier.subscribe(move |_| l.borrow_mut().push(n.subscribe(|_| {})));
        notifier.notify("");
        assert_eq!(late.borrow().len(), 1);
    }

    #[test]
    fn obj_compares_by_identity() {
        let a = Obj::new(Empty);
        let b = Obj::new(Empty);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn default_source_is_read_only() {
        let err = Empty.set("Name", ErasedValue::new(1_i32)).unwrap_err();
        assert_eq!(err.message(), "member `Name` is read-only");
        assert!(Empty.get_index(&IndexKey::Int(0)).is_none());
    }

    #[test]
    fn null_detection() {
        assert!(is_null(&ErasedValue::unset()));
        assert!(is_null(&ErasedValue::new(None::<Obj>)));
        assert!(!is_null(&ErasedValue::new(Some(Obj::new(Empty)))));
        assert!(as_object(&ErasedValue::new(Some(Obj::new(Empty)))).is_some());
    }
}
