//! C8 — DomainsContainer: registry of [`AsyncDomain`]s plus the lazily
//! spawned exception-distribution thread (SPEC_FULL.md §4.8, §5).

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use regfab_types::{RegisterAccessError, RuntimeError};
use tracing::{info, info_span};

use crate::async_domain::{AsyncDomain, Distributor};
use crate::DomainId;

enum ExceptionMessage {
    Broadcast(String),
    Shutdown,
}

/// Registry of `domainId -> weak<AsyncDomain<T>>`, plus the background
/// thread that breaks the lock-order cycle described in spec.md §4.8: regular
/// distribution holds a domain's mutex, so raising an exception from that
/// same call stack could re-enter another domain's mutex recursively.
/// Deferring the broadcast to a dedicated thread avoids that.
///
/// Callers must hold this behind an `Arc` (e.g. `Arc::new(DomainsContainer::new())`)
/// since [`DomainsContainer::subscribe`] needs a `'static` handle to pass to
/// the lazily spawned exception thread.
pub struct DomainsContainer<T> {
    domains: Mutex<HashMap<DomainId, Weak<AsyncDomain<T>>>>,
    exception_tx: Mutex<Option<Sender<ExceptionMessage>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Default for DomainsContainer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DomainsContainer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { domains: Mutex::new(HashMap::new()), exception_tx: Mutex::new(None), thread: Mutex::new(None) }
    }

    /// Looks up or constructs the domain for `id`, spawning the exception
    /// thread lazily the first time any domain is created, then delegates to
    /// [`AsyncDomain::subscribe`]. Returns the domain, the (possibly shared)
    /// target distributor, and whether this call created the domain.
    pub fn subscribe(
        self_arc: &Arc<Self>,
        id: DomainId,
        creator: impl FnOnce() -> Arc<dyn Distributor<T>>,
    ) -> (Arc<AsyncDomain<T>>, Arc<dyn Distributor<T>>, bool) {
        let mut domains = self_arc.domains.lock().unwrap();
        let mut created = false;
        let domain = match domains.get(&id).and_then(Weak::upgrade) {
            Some(d) => d,
            None => {
                created = true;
                let d = Arc::new(AsyncDomain::new());
                domains.insert(id, Arc::downgrade(&d));
                d
            }
        };
        drop(domains);
        if created {
            Self::spawn_exception_thread(self_arc);
        }
        let target = domain.subscribe(creator);
        (domain, target, created)
    }

    /// Pushes `message` onto the exception queue; the background thread pops
    /// it and calls `send_exception` on every live domain.
    pub fn send_exceptions(&self, message: impl Into<String>) {
        if let Some(tx) = self.exception_tx.lock().unwrap().as_ref() {
            let _ = tx.send(ExceptionMessage::Broadcast(message.into()));
        }
    }

    pub fn for_each(&self, mut f: impl FnMut(DomainId, &Arc<AsyncDomain<T>>)) {
        let domains = self.domains.lock().unwrap();
        for (&id, weak) in domains.iter() {
            if let Some(domain) = weak.upgrade() {
                f(id, &domain);
            }
        }
    }

    /// Spawns the exception-distribution thread bound to `self_arc`. Called
    /// once, lazily, on the first `subscribe` that creates a new domain.
    fn spawn_exception_thread(self_arc: &Arc<Self>) {
        let mut thread_guard = self_arc.thread.lock().unwrap();
        if thread_guard.is_some() {
            return;
        }
        let (tx, rx) = mpsc::channel::<ExceptionMessage>();
        *self_arc.exception_tx.lock().unwrap() = Some(tx);
        let weak_container = Arc::downgrade(self_arc);
        let handle = std::thread::spawn(move || {
            let _span = info_span!("domains_container.exception_thread").entered();
            info!("exception distribution thread started");
            loop {
                match rx.recv() {
                    Ok(ExceptionMessage::Broadcast(message)) => {
                        if let Some(container) = weak_container.upgrade() {
                            let error = RegisterAccessError::Runtime(RuntimeError::Other(message));
                            container.for_each(|_id, domain| domain.send_exception(error.clone()));
                        }
                    }
                    Ok(ExceptionMessage::Shutdown) | Err(_) => break,
                }
            }
            info!("exception distribution thread stopped");
        });
        *thread_guard = Some(handle);
    }
}

/// Destructor pushes a sentinel shutdown message and joins the thread, per
/// spec.md §4.8's cancellation rule.
impl<T> Drop for DomainsContainer<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.exception_tx.lock().unwrap().take() {
            let _ = tx.send(ExceptionMessage::Shutdown);
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingTarget {
        exceptions: StdMutex<usize>,
    }

    impl Distributor<i64> for RecordingTarget {
        fn distribute(&self, _value: i64, _version: regfab_types::VersionNumber) {}
        fn send_exception(&self, _error: RegisterAccessError) {
            *self.exceptions.lock().unwrap() += 1;
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[test]
    fn subscribe_reuses_existing_domain() {
        let container: Arc<DomainsContainer<i64>> = Arc::new(DomainsContainer::new());
        let target = Arc::new(RecordingTarget { exceptions: StdMutex::new(0) });
        let t1 = target.clone();
        let (_domain_a, _target_a, created_a) =
            DomainsContainer::subscribe(&container, 7, move || t1 as Arc<dyn Distributor<i64>>);
        let t2 = target.clone();
        let (_domain_b, _target_b, created_b) =
            DomainsContainer::subscribe(&container, 7, move || t2 as Arc<dyn Distributor<i64>>);
        assert!(created_a);
        assert!(!created_b);
    }

    #[test]
    fn send_exceptions_reaches_live_domains() {
        let container: Arc<DomainsContainer<i64>> = Arc::new(DomainsContainer::new());
        let target = Arc::new(RecordingTarget { exceptions: StdMutex::new(0) });
        let t1 = target.clone();
        DomainsContainer::subscribe(&container, 1, move || t1 as Arc<dyn Distributor<i64>>);
        container.send_exceptions("device unplugged");
        // Give the background thread a moment to drain the channel.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(*target.exceptions.lock().unwrap(), 1);
    }
}
