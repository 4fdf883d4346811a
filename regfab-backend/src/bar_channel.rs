//! The out-of-scope "raw BAR I/O channel" contract (spec.md §1): per-kernel-
//! driver ioctl glue for pcie/uio/xdma device nodes is not specified here,
//! only this seam a real driver backend would implement.

use regfab_types::RegisterAccessError;

/// Minimal byte-level read/write over one memory-mapped BAR. Real hardware
/// backends implement this against their device node; `regfab-shared-dummy`
/// and `regfab-rebot` implement it directly on their own I/O primitive
/// (`SharedMemoryManager`, `RebotChannel`) rather than against a separate
/// ioctl-glue type, since their "BAR" is shared memory or a network socket
/// respectively, not a device node needing that extra layer.
pub trait RawBarChannel: Send + Sync {
    fn bar_size(&self, bar: u32) -> Option<u64>;
    fn read(&self, bar: u32, address: u64, data: &mut [u8]) -> Result<(), RegisterAccessError>;
    fn write(&self, bar: u32, address: u64, data: &[u8]) -> Result<(), RegisterAccessError>;
}
