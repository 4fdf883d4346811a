//! C6 — NDRegisterAccessor from SPEC_FULL.md §4.6: the typed 2-D transfer
//! buffer, its three-phase read/write protocol, and the async push-queue
//! variant fed by a [`regfab_async::AsyncDomain`].

mod async_accessor;
mod exception;
mod sync_accessor;
mod transfer;

pub use async_accessor::AsyncAccessor;
pub use exception::ExceptionBackend;
pub use sync_accessor::SyncAccessor;
pub use transfer::RawTransfer;

use regfab_types::{AccessModeFlags, DataValidity, RegisterAccessError, VersionNumber};

/// One distributed sample: all channels, all elements, as delivered by a
/// single backend push (spec.md §3's `[nChannels][nElements]` buffer shape).
pub type Sample<T> = Vec<Vec<T>>;

/// Common read/write surface both accessor variants expose to user code.
/// The three-phase `doPre*`/`do*Transfer`/`doPost*` protocol described in
/// spec.md §4.6 is private to each variant's implementation; callers only
/// see the public `read`/`write` family.
pub trait NDRegisterAccessor<T>: Send {
    fn n_channels(&self) -> usize;
    fn n_elements(&self) -> usize;
    fn buffer(&self) -> &[Vec<T>];
    fn buffer_mut(&mut self) -> &mut [Vec<T>];
    fn version_number(&self) -> VersionNumber;
    fn data_validity(&self) -> DataValidity;
    fn access_mode_flags(&self) -> AccessModeFlags;

    fn read(&mut self) -> Result<(), RegisterAccessError>;
    fn read_non_blocking(&mut self) -> Result<bool, RegisterAccessError>;
    fn read_latest(&mut self) -> Result<bool, RegisterAccessError>;
    fn write(&mut self) -> Result<bool, RegisterAccessError>;
    fn write_destructively(&mut self) -> Result<bool, RegisterAccessError>;
    fn interrupt(&self);
}
