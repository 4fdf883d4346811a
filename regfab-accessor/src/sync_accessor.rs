//! Synchronous variant of C6: backed by a [`RawTransfer`] that performs I/O
//! on the calling thread, sequencing the `doPre*`/`do*Transfer`/`doPost*`
//! phases from spec.md §4.6.

use std::sync::Weak;

use regfab_types::{AccessModeFlags, DataValidity, LogicError, RegisterAccessError, TransferType, VersionNumber};

use crate::exception::ExceptionBackend;
use crate::transfer::RawTransfer;
use crate::NDRegisterAccessor;

pub struct SyncAccessor<T> {
    n_channels: usize,
    n_elements: usize,
    buffer: Vec<Vec<T>>,
    /// Captured by `doPreWrite`, restored by `doPostWrite` if the transfer
    /// throws, so a failed write never corrupts the user's view of the data.
    shadow: Vec<Vec<T>>,
    version: VersionNumber,
    validity: DataValidity,
    flags: AccessModeFlags,
    readable: bool,
    writable: bool,
    exception_backend: Option<Weak<dyn ExceptionBackend>>,
    transfer: Box<dyn RawTransfer<T>>,
}

impl<T: Clone + Default> SyncAccessor<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n_channels: usize,
        n_elements: usize,
        readable: bool,
        writable: bool,
        flags: AccessModeFlags,
        exception_backend: Option<Weak<dyn ExceptionBackend>>,
        transfer: Box<dyn RawTransfer<T>>,
    ) -> Self {
        let buffer = vec![vec![T::default(); n_elements]; n_channels];
        Self {
            n_channels,
            n_elements,
            shadow: buffer.clone(),
            buffer,
            version: VersionNumber::none(),
            validity: DataValidity::Ok,
            flags,
            readable,
            writable,
            exception_backend,
            transfer,
        }
    }

    fn do_pre_read(&self, kind: TransferType) -> Result<(), RegisterAccessError> {
        if !self.readable {
            return Err(LogicError::WriteOnly { path: String::new() }.into());
        }
        let _ = kind;
        Ok(())
    }

    fn do_pre_write(&mut self, kind: TransferType) -> Result<(), RegisterAccessError> {
        if !self.writable {
            return Err(LogicError::ReadOnly { path: String::new() }.into());
        }
        let _ = kind;
        self.shadow = self.buffer.clone();
        Ok(())
    }

    fn report_exception(&self, error: &RegisterAccessError) {
        if let Some(backend) = self.exception_backend.as_ref().and_then(Weak::upgrade) {
            backend.report_exception(error.clone());
        }
    }

    fn do_read(&mut self, kind: TransferType) -> Result<(), RegisterAccessError> {
        self.do_pre_read(kind)?;
        match self.transfer.read_transfer(&mut self.buffer) {
            Ok(()) => {
                self.version = VersionNumber::new();
                self.validity = DataValidity::Ok;
                Ok(())
            }
            Err(e) => {
                self.validity = DataValidity::Faulty;
                self.report_exception(&e);
                Err(e)
            }
        }
    }

    fn do_write(&mut self, kind: TransferType) -> Result<bool, RegisterAccessError> {
        self.do_pre_write(kind)?;
        let version = VersionNumber::new();
        match self.transfer.write_transfer(&self.buffer) {
            Ok(data_lost) => {
                self.version = version;
                Ok(data_lost)
            }
            Err(e) => {
                self.buffer = std::mem::take(&mut self.shadow);
                self.report_exception(&e);
                Err(e)
            }
        }
    }
}

impl<T: Clone + Default + Send> NDRegisterAccessor<T> for SyncAccessor<T> {
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
        self.flags
    }

    fn read(&mut self) -> Result<(), RegisterAccessError> {
        self.do_read(TransferType::Read)
    }

    fn read_non_blocking(&mut self) -> Result<bool, RegisterAccessError> {
        self.do_read(TransferType::ReadNonBlocking).map(|()| true)
    }

    fn read_latest(&mut self) -> Result<bool, RegisterAccessError> {
        self.do_read(TransferType::ReadLatest).map(|()| true)
    }

    fn write(&mut self) -> Result<bool, RegisterAccessError> {
        self.do_write(TransferType::Write)
    }

    fn write_destructively(&mut self) -> Result<bool, RegisterAccessError> {
        self.do_write(TransferType::WriteDestructively)
    }

    fn interrupt(&self) {
        // Synchronous accessors have no blocking wait to unblock.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTransfer {
        value: i32,
        fail_next_write: bool,
    }

    impl RawTransfer<i32> for FixedTransfer {
        fn read_transfer(&mut self, buffer: &mut [Vec<i32>]) -> Result<(), RegisterAccessError> {
            for channel in buffer.iter_mut() {
                for slot in channel.iter_mut() {
                    *slot = self.value;
                }
            }
            Ok(())
        }

        fn write_transfer(&mut self, _buffer: &[Vec<i32>]) -> Result<bool, RegisterAccessError> {
            if self.fail_next_write {
                Err(RegisterAccessError::runtime("write failed"))
            } else {
                Ok(false)
            }
        }
    }

    #[test]
    fn read_updates_buffer_and_version() {
        let transfer = FixedTransfer { value: 7, fail_next_write: false };
        let mut accessor: SyncAccessor<i32> = SyncAccessor::new(1, 3, true, true, AccessModeFlags::empty(), None, Box::new(transfer));
        let before = accessor.version_number();
        accessor.read().unwrap();
        assert_eq!(accessor.buffer()[0], vec![7, 7, 7]);
        assert!(accessor.version_number() > before);
    }

    #[test]
    fn write_only_register_rejects_read() {
        let transfer = FixedTransfer { value: 0, fail_next_write: false };
        let mut accessor: SyncAccessor<i32> = SyncAccessor::new(1, 1, false, true, AccessModeFlags::empty(), None, Box::new(transfer));
        assert!(accessor.read().is_err());
    }

    #[test]
    fn failed_write_restores_user_buffer() {
        let transfer = FixedTransfer { value: 0, fail_next_write: true };
        let mut accessor: SyncAccessor<i32> = SyncAccessor::new(1, 1, true, true, AccessModeFlags::empty(), None, Box::new(transfer));
        accessor.buffer_mut()[0][0] = 42;
        let result = accessor.write();
        assert!(result.is_err());
        assert_eq!(accessor.buffer()[0][0], 42);
    }
}
