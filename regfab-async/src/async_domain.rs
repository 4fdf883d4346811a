//! C7 — AsyncDomain: the per-interrupt distribution state machine
//! (SPEC_FULL.md §4.7).

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use regfab_types::{RegisterAccessError, VersionNumber};

/// `{Inactive, Active, Faulted}` per spec.md §4.7. `Faulted` is transient: a
/// `sendException` always leaves the domain `Inactive` afterwards, so callers
/// observing `Faulted` only ever catch it mid-transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncDomainState {
    Inactive,
    Active,
    Faulted,
}

/// The distribution sink an [`AsyncDomain`] forwards values and exceptions
/// to. Implemented by the accessor crate's async push-queue accessor, and by
/// the backend crate's per-domain fan-out multiplexer.
///
/// `subscribe` memoizes the target as a trait object, so a caller that needs
/// its concrete type back (to register another subscriber on an
/// already-existing multiplexer, say) has no way to get it other than a
/// downcast; `as_any` exists for exactly that, the standard pattern for
/// recovering a concrete type from a `dyn Trait`.
pub trait Distributor<T>: Send + Sync + 'static {
    fn distribute(&self, value: T, version: VersionNumber);
    fn send_exception(&self, error: RegisterAccessError);
    fn as_any(&self) -> &dyn std::any::Any;
}

struct Inner<T> {
    state: AsyncDomainState,
    last: Option<(T, VersionNumber)>,
    target: Option<Arc<dyn Distributor<T>>>,
}

/// All operations are serialized by a single recursive mutex: distribution
/// may re-enter `send_exception` from within `target.distribute`, and a
/// plain mutex would deadlock on that re-entry.
pub struct AsyncDomain<T> {
    inner: ReentrantMutex<RefCell<Inner<T>>>,
}

impl<T: Clone> Default for AsyncDomain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> AsyncDomain<T> {
    pub fn new() -> Self {
        Self { inner: ReentrantMutex::new(RefCell::new(Inner { state: AsyncDomainState::Inactive, last: None, target: None })) }
    }

    pub fn state(&self) -> AsyncDomainState {
        self.inner.lock().borrow().state
    }

    /// Lazily constructs the target distributor on first call, memoizing it
    /// for subsequent subscribers; returns the (possibly already existing)
    /// target.
    pub fn subscribe(&self, creator: impl FnOnce() -> Arc<dyn Distributor<T>>) -> Arc<dyn Distributor<T>> {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        if inner.target.is_none() {
            inner.target = Some(creator());
        }
        inner.target.clone().expect("just constructed")
    }

    /// Inactive -> Active. `version` races against any `distribute` call the
    /// backend may already have issued between subscribing and activating:
    /// if a stashed value carries a strictly newer version, that one wins.
    pub fn activate(&self, value: T, version: VersionNumber) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        let (value, version) = match inner.last.take() {
            Some((stashed_value, stashed_version)) if stashed_version > version => (stashed_value, stashed_version),
            _ => (value, version),
        };
        inner.state = AsyncDomainState::Active;
        if let Some(target) = inner.target.clone() {
            target.distribute(value, version);
        }
    }

    /// Active -> Inactive. Does not clear the memoized target; a later
    /// `activate` resumes delivery to the same subscribers.
    pub fn deactivate(&self) {
        self.inner.lock().borrow_mut().state = AsyncDomainState::Inactive;
    }

    /// Any -> Faulted -> Inactive: forwards to the target then immediately
    /// settles back to `Inactive`, matching spec.md §4.7's transition table.
    pub fn send_exception(&self, error: RegisterAccessError) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.state = AsyncDomainState::Faulted;
        if let Some(target) = inner.target.clone() {
            target.send_exception(error);
        }
        inner.state = AsyncDomainState::Inactive;
    }

    /// If active, hands `value` straight to the target; otherwise stashes it
    /// so a subsequent `activate` can decide whether to replay it.
    pub fn distribute(&self, value: T, version: VersionNumber) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        match inner.state {
            AsyncDomainState::Active => {
                if let Some(target) = inner.target.clone() {
                    target.distribute(value, version);
                }
            }
            _ => inner.last = Some((value, version)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingTarget {
        distributed: StdMutex<Vec<(i64, VersionNumber)>>,
        exceptions: StdMutex<usize>,
    }

    impl RecordingTarget {
        fn new() -> Arc<Self> {
            Arc::new(Self { distributed: StdMutex::new(Vec::new()), exceptions: StdMutex::new(0) })
        }
    }

    impl Distributor<i64> for RecordingTarget {
        fn distribute(&self, value: i64, version: VersionNumber) {
            self.distributed.lock().unwrap().push((value, version));
        }
        fn send_exception(&self, _error: RegisterAccessError) {
            *self.exceptions.lock().unwrap() += 1;
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn distribute_before_active_is_stashed_then_replayed_on_activate() {
        let domain: AsyncDomain<i64> = AsyncDomain::new();
        let target = RecordingTarget::new();
        let target_clone = target.clone();
        domain.subscribe(move || target_clone as Arc<dyn Distributor<i64>>);

        let v1 = VersionNumber::new();
        domain.distribute(42, v1);
        assert!(target.distributed.lock().unwrap().is_empty());

        let v0 = VersionNumber::new();
        domain.activate(0, v0);
        let recorded = target.distributed.lock().unwrap().clone();
        assert_eq!(recorded, vec![(42, v1)]);
        assert_eq!(domain.state(), AsyncDomainState::Active);
    }

    #[test]
    fn distribute_while_active_forwards_immediately() {
        let domain: AsyncDomain<i64> = AsyncDomain::new();
        let target = RecordingTarget::new();
        let target_clone = target.clone();
        domain.subscribe(move || target_clone as Arc<dyn Distributor<i64>>);
        domain.activate(1, VersionNumber::new());
        domain.distribute(2, VersionNumber::new());
        assert_eq!(target.distributed.lock().unwrap().len(), 2);
    }

    #[test]
    fn send_exception_settles_back_to_inactive() {
        let domain: AsyncDomain<i64> = AsyncDomain::new();
        let target = RecordingTarget::new();
        let target_clone = target.clone();
        domain.subscribe(move || target_clone as Arc<dyn Distributor<i64>>);
        domain.activate(1, VersionNumber::new());
        domain.send_exception(RegisterAccessError::runtime("device gone"));
        assert_eq!(*target.exceptions.lock().unwrap(), 1);
        assert_eq!(domain.state(), AsyncDomainState::Inactive);
    }
}
