//! C12 — DeviceFacade (SPEC_FULL.md §4.12): the one object application code
//! touches. Opens a backend by descriptor and hands out typed accessors,
//! asserting the scalar/1-D/2-D shape the caller asked for actually matches
//! the register's channel count.

use std::sync::Arc;

use regfab_accessor::NDRegisterAccessor;
use regfab_backend::{NumericAddressedBackend, NumericAddressedBackendExt, SupportedType};
use regfab_catalogue::NumericAddressedRegisterCatalogue;
use regfab_types::{AccessModeFlags, LogicError, RegisterAccessError, RegisterPath};

/// A single open device. Cheaply cloneable: every clone shares the same
/// backend, so accessor factory methods take `&self` rather than `&mut
/// self` the way a direct backend reference would otherwise demand.
#[derive(Clone)]
pub struct DeviceFacade {
    backend: Arc<dyn NumericAddressedBackend>,
}

impl DeviceFacade {
    /// Parses `descriptor`, resolves its backend type against the
    /// process-wide registry, constructs the backend and opens it.
    #[tracing::instrument(skip_all, fields(descriptor = descriptor))]
    pub fn open(descriptor: &str) -> Result<Self, RegisterAccessError> {
        let parsed = crate::descriptor::parse(descriptor)?;
        let backend = crate::registry::create(&parsed.backend_type, &parsed.address, &parsed.parameters)?;
        backend.open()?;
        Ok(Self { backend })
    }

    /// Deactivates every interrupt domain, then closes the underlying
    /// backend. Idempotent for backends whose `close_impl` is.
    pub fn close(&self) -> Result<(), RegisterAccessError> {
        self.backend.close()
    }

    /// A deep copy of the register catalogue this device was opened with.
    pub fn register_catalogue(&self) -> NumericAddressedRegisterCatalogue {
        self.backend.catalogue().clone()
    }

    fn require_n_channels(&self, path: &RegisterPath, expected: usize) -> Result<(), RegisterAccessError> {
        let info = self.backend.catalogue().get_backend_register(path)?;
        if info.n_channels != expected {
            return Err(LogicError::NotScalar { path: path.to_string(), channels: info.n_channels }.into());
        }
        Ok(())
    }

    /// A 1-element, 1-channel accessor. Rejects registers with more than one
    /// channel, since those need [`DeviceFacade::get_two_d_register_accessor`].
    pub fn get_scalar_register_accessor<T: SupportedType>(
        &self,
        path: &str,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn NDRegisterAccessor<T>>, RegisterAccessError> {
        let register_path = RegisterPath::from(path);
        self.require_n_channels(&register_path, 1)?;
        self.backend.get_register_accessor::<T>(&register_path, 1, 0, flags)
    }

    /// A single-channel accessor over `n_elements` starting at `offset` (0
    /// meaning "all elements"). Rejects multichannel (2-D) registers.
    pub fn get_one_d_register_accessor<T: SupportedType>(
        &self,
        path: &str,
        n_elements: usize,
        offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn NDRegisterAccessor<T>>, RegisterAccessError> {
        let register_path = RegisterPath::from(path);
        self.require_n_channels(&register_path, 1)?;
        self.backend.get_register_accessor::<T>(&register_path, n_elements, offset, flags)
    }

    /// A multichannel accessor over `n_elements` blocks starting at `offset`.
    /// Works for single-channel registers too, the same way a 1xN matrix is
    /// a vector.
    pub fn get_two_d_register_accessor<T: SupportedType>(
        &self,
        path: &str,
        n_elements: usize,
        offset: usize,
        flags: AccessModeFlags,
    ) -> Result<Box<dyn NDRegisterAccessor<T>>, RegisterAccessError> {
        let register_path = RegisterPath::from(path);
        self.backend.get_register_accessor::<T>(&register_path, n_elements, offset, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_map_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.map", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn scalar_accessor_round_trips_through_shared_dummy() {
        let map = write_map_file("facade-scalar", "STATUS 1 0 4 0 32 0 1 RW\n");
        let instance = format!("facade-test-{}", std::process::id());
        let descriptor = format!("(shared-dummy:{instance}?map={})", map.display());

        let device = DeviceFacade::open(&descriptor).unwrap();
        let mut accessor = device.get_scalar_register_accessor::<i32>("STATUS", AccessModeFlags::empty()).unwrap();
        accessor.buffer_mut()[0][0] = 7;
        accessor.write().unwrap();

        let mut reader = device.get_scalar_register_accessor::<i32>("STATUS", AccessModeFlags::empty()).unwrap();
        reader.read().unwrap();
        assert_eq!(reader.buffer()[0][0], 7);
        device.close().unwrap();
        let _ = std::fs::remove_file(&map);
    }

    #[test]
    fn scalar_accessor_rejects_multichannel_register() {
        let map = write_map_file(
            "facade-mux",
            "AREA_MULTIPLEXED_SEQUENCE_DATA 2 0 8 0 16 0 1 RW\nSEQUENCE_DATA_0 1 0 2 0 16 0 1 RW\nSEQUENCE_DATA_1 1 2 2 0 16 0 1 RW\n",
        );
        let instance = format!("facade-test-mux-{}", std::process::id());
        let descriptor = format!("(shared-dummy:{instance}?map={})", map.display());

        let device = DeviceFacade::open(&descriptor).unwrap();
        let err = device.get_scalar_register_accessor::<i32>("DATA", AccessModeFlags::empty()).unwrap_err();
        assert!(matches!(err, RegisterAccessError::Logic(LogicError::NotScalar { .. })));
        let _ = std::fs::remove_file(&map);
    }
}
