//! Per-domain fan-out: the single "target distributor"
//! [`regfab_async::AsyncDomain`] lazily constructs (spec.md §4.7) is, in this
//! workspace, always a `DomainMultiplexer` — it receives raw 32-bit words and
//! re-converts/re-distributes them to every subscriber's own user type.

use std::sync::Mutex;

use regfab_async::Distributor;
use regfab_types::{RegisterAccessError, VersionNumber};

use crate::RawSample;

type ConvertFn = Box<dyn Fn(&RawSample, VersionNumber) + Send + Sync>;
type ExceptionFn = Box<dyn Fn(&RegisterAccessError) + Send + Sync>;

#[derive(Default)]
pub struct DomainMultiplexer {
    convert_subscribers: Mutex<Vec<ConvertFn>>,
    exception_subscribers: Mutex<Vec<ExceptionFn>>,
}

impl DomainMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber with its own raw-to-user conversion closure.
    pub fn add_subscriber(&self, convert: ConvertFn, on_exception: ExceptionFn) {
        self.convert_subscribers.lock().unwrap().push(convert);
        self.exception_subscribers.lock().unwrap().push(on_exception);
    }
}

impl Distributor<RawSample> for DomainMultiplexer {
    fn distribute(&self, value: RawSample, version: VersionNumber) {
        for subscriber in self.convert_subscribers.lock().unwrap().iter() {
            subscriber(&value, version);
        }
    }

    fn send_exception(&self, error: RegisterAccessError) {
        for subscriber in self.exception_subscribers.lock().unwrap().iter() {
            subscriber(&error);
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
