//! Backend-supplied synchronous I/O, the seam C9 (`NumericAddressedBackend`)
//! and C11 (`RebotClient`) plug into `doReadTransferSynchronously` /
//! `doWriteTransfer` (spec.md §4.6).

use regfab_types::RegisterAccessError;

/// Performs the actual raw transfer for a [`crate::SyncAccessor`]. One
/// implementation per backend kind (numeric-addressed BAR, rebot, ...).
pub trait RawTransfer<T>: Send {
    /// Fills `buffer` ([nChannels][nElements]) with freshly read data.
    fn read_transfer(&mut self, buffer: &mut [Vec<T>]) -> Result<(), RegisterAccessError>;

    /// Writes `buffer` to the device. Returns `dataLost`: whether an earlier,
    /// not-yet-flushed write was overwritten before reaching the device.
    fn write_transfer(&mut self, buffer: &[Vec<T>]) -> Result<bool, RegisterAccessError>;
}
