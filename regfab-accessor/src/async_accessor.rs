//! Async push-queue variant of C6, fed by an [`regfab_async::AsyncDomain`]
//! via the [`regfab_async::Distributor`] trait (spec.md §4.6's "Async read
//! semantics").

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use regfab_async::Distributor;
use regfab_types::{AccessModeFlags, DataValidity, RegisterAccessError, RuntimeError, VersionNumber};
use tracing::warn;

use crate::{NDRegisterAccessor, Sample};

/// Default bound on the push queue (spec.md §4.6).
pub const DEFAULT_QUEUE_CAPACITY: usize = 3;

enum QueueItem<T> {
    Data(Sample<T>, VersionNumber),
    Exception(RegisterAccessError),
}

struct Queue<T> {
    items: Mutex<VecDeque<QueueItem<T>>>,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> Queue<T> {
    fn new(capacity: usize) -> Self {
        Self { items: Mutex::new(VecDeque::with_capacity(capacity)), not_empty: Condvar::new(), capacity }
    }

    /// Pushes an item, dropping the oldest one if the queue is already at
    /// capacity. A hardware interrupt handler must never block on a slow
    /// consumer, so overwrite-oldest (not backpressure) is the push
    /// discipline here.
    fn push(&self, item: QueueItem<T>) {
        let mut items = self.items.lock().unwrap();
        if items.len() == self.capacity {
            items.pop_front();
            warn!("async accessor push queue full, dropping oldest sample");
        }
        items.push_back(item);
        self.not_empty.notify_one();
    }

    fn pop_blocking(&self) -> QueueItem<T> {
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self.not_empty.wait(items).unwrap();
        }
    }

    fn try_pop(&self) -> Option<QueueItem<T>> {
        self.items.lock().unwrap().pop_front()
    }

    /// Drains everything currently queued, keeping the newest item.
    fn drain_latest(&self) -> Option<QueueItem<T>> {
        let mut items = self.items.lock().unwrap();
        items.pop_back().map(|last| {
            items.clear();
            last
        })
    }
}

pub struct AsyncAccessor<T> {
    n_channels: usize,
    n_elements: usize,
    buffer: Sample<T>,
    version: VersionNumber,
    validity: DataValidity,
    queue: std::sync::Arc<Queue<T>>,
}

impl<T: Clone + Default> AsyncAccessor<T> {
    pub fn new(n_channels: usize, n_elements: usize) -> Self {
        Self::with_capacity(n_channels, n_elements, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(n_channels: usize, n_elements: usize, capacity: usize) -> Self {
        Self {
            n_channels,
            n_elements,
            buffer: vec![vec![T::default(); n_elements]; n_channels],
            version: VersionNumber::none(),
            validity: DataValidity::Ok,
            queue: std::sync::Arc::new(Queue::new(capacity)),
        }
    }

    /// Handle implementing [`Distributor`], cloneable so the owning
    /// [`regfab_async::AsyncDomain`] (and `interrupt()`, below) can push into
    /// the same queue this accessor reads from.
    pub fn distributor_handle(&self) -> AsyncAccessorHandle<T> {
        AsyncAccessorHandle { queue: self.queue.clone() }
    }
}

/// Cheaply-cloneable producer side of an [`AsyncAccessor`]'s queue; this, not
/// the accessor itself, is what gets registered with an `AsyncDomain`.
#[derive(Clone)]
pub struct AsyncAccessorHandle<T> {
    queue: std::sync::Arc<Queue<T>>,
}

impl<T: Send + Sync + 'static> Distributor<Sample<T>> for AsyncAccessorHandle<T> {
    fn distribute(&self, value: Sample<T>, version: VersionNumber) {
        self.queue.push(QueueItem::Data(value, version));
    }

    fn send_exception(&self, error: RegisterAccessError) {
        self.queue.push(QueueItem::Exception(error));
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl<T> AsyncAccessorHandle<T> {
    /// Injects a distinguished exception to unblock a `read()` waiting on the
    /// queue, per spec.md §4.6's `interrupt()`.
    pub fn interrupt(&self) {
        self.queue.push(QueueItem::Exception(RegisterAccessError::Runtime(RuntimeError::Interrupted)));
    }
}

impl<T: Clone + Default + Send + Sync> NDRegisterAccessor<T> for AsyncAccessor<T> {
    fn n_channels(&self) -> usize {
        self.n_channels
    }

    fn n_elements(&self) -> usize {
        self.n_elements
    }

    fn buffer(&self) -> &[Vec<T>] {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut [Vec<T>] {
        &mut self.buffer
    }

    fn version_number(&self) -> VersionNumber {
        self.version
    }

    fn data_validity(&self) -> DataValidity {
        self.validity
    }

    fn access_mode_flags(&self) -> AccessModeFlags {
        AccessModeFlags::WAIT_FOR_NEW_DATA
    }

    /// Blocks until an element or an injected exception arrives.
    fn read(&mut self) -> Result<(), RegisterAccessError> {
        match self.queue.pop_blocking() {
            QueueItem::Data(sample, version) => {
                self.buffer = sample;
                self.version = version;
                self.validity = DataValidity::Ok;
                Ok(())
            }
            QueueItem::Exception(e) => {
                self.validity = DataValidity::Faulty;
                Err(e)
            }
        }
    }

    /// Pops without waiting; `Ok(false)` means no new data was available.
    fn read_non_blocking(&mut self) -> Result<bool, RegisterAccessError> {
        match self.queue.try_pop() {
            Some(QueueItem::Data(sample, version)) => {
                self.buffer = sample;
                self.version = version;
                self.validity = DataValidity::Ok;
                Ok(true)
            }
            Some(QueueItem::Exception(e)) => {
                self.validity = DataValidity::Faulty;
                Err(e)
            }
            None => Ok(false),
        }
    }

    /// Drains the queue to the newest element.
    fn read_latest(&mut self) -> Result<bool, RegisterAccessError> {
        match self.queue.drain_latest() {
            Some(QueueItem::Data(sample, version)) => {
                self.buffer = sample;
                self.version = version;
                self.validity = DataValidity::Ok;
                Ok(true)
            }
            Some(QueueItem::Exception(e)) => {
                self.validity = DataValidity::Faulty;
                Err(e)
            }
            None => Ok(false),
        }
    }

    fn write(&mut self) -> Result<bool, RegisterAccessError> {
        Err(regfab_types::LogicError::WriteOnly { path: "<async-push>".into() }.into())
    }

    fn write_destructively(&mut self) -> Result<bool, RegisterAccessError> {
        self.write()
    }

    fn interrupt(&self) {
        self.distributor_handle().interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn read_blocks_until_distributed() {
        let mut accessor: AsyncAccessor<i32> = AsyncAccessor::new(1, 1);
        let handle = accessor.distributor_handle();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.distribute(vec![vec![9]], VersionNumber::new());
        });
        accessor.read().unwrap();
        assert_eq!(accessor.buffer()[0][0], 9);
    }

    #[test]
    fn interrupt_unblocks_read() {
        let mut accessor: AsyncAccessor<i32> = AsyncAccessor::new(1, 1);
        let handle = accessor.distributor_handle();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.interrupt();
        });
        assert!(accessor.read().is_err());
    }

    #[test]
    fn full_queue_drops_oldest() {
        let mut accessor: AsyncAccessor<i32> = AsyncAccessor::with_capacity(1, 1, 2);
        let handle = accessor.distributor_handle();
        handle.distribute(vec![vec![1]], VersionNumber::new());
        handle.distribute(vec![vec![2]], VersionNumber::new());
        handle.distribute(vec![vec![3]], VersionNumber::new());
        accessor.read_non_blocking().unwrap();
        assert_eq!(accessor.buffer()[0][0], 2);
    }

    #[test]
    fn read_latest_skips_to_newest() {
        let mut accessor: AsyncAccessor<i32> = AsyncAccessor::new(1, 1);
        let handle = accessor.distributor_handle();
        handle.distribute(vec![vec![1]], VersionNumber::new());
        handle.distribute(vec![vec![2]], VersionNumber::new());
        handle.distribute(vec![vec![3]], VersionNumber::new());
        let got_new = accessor.read_latest().unwrap();
        assert!(got_new);
        assert_eq!(accessor.buffer()[0][0], 3);
    }
}
