//! The `shared-dummy` backend: a [`regfab_backend::NumericAddressedBackend`]
//! whose BAR storage is a [`SharedMemoryManager`] instead of a real device
//! node, registered under the `BackendFactory` registry as `"shared-dummy"`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regfab_async::{DomainId, DomainsContainer};
use regfab_backend::{read_raw_sample, BackendFactory, NumericAddressedBackend, RawBarChannel, RawSample};
use regfab_catalogue::{MapFileParser, NumericAddressedRegisterCatalogue, RegisterAccess, RegisterInfo};
use regfab_types::{LogicError, RegisterAccessError, RegisterPath, RuntimeError, VersionNumber};

use crate::shared_memory::SharedMemoryManager;

impl RawBarChannel for SharedMemoryManager {
    fn bar_size(&self, bar: u32) -> Option<u64> {
        SharedMemoryManager::bar_size(self, bar)
    }

    fn read(&self, bar: u32, address: u64, data: &mut [u8]) -> Result<(), RegisterAccessError> {
        SharedMemoryManager::read(self, bar, address, data)
    }

    fn write(&self, bar: u32, address: u64, data: &[u8]) -> Result<(), RegisterAccessError> {
        SharedMemoryManager::write(self, bar, address, data)
    }
}

/// Simulated device backed entirely by shared memory: every BAR read/write
/// from every accessor this backend hands out ends up in a
/// [`SharedMemoryManager`] segment any other process attached to the same
/// instance/map-file/user combination also sees.
pub struct SharedDummyBackend {
    catalogue: NumericAddressedRegisterCatalogue,
    shared_memory: Arc<SharedMemoryManager>,
    domains: Arc<DomainsContainer<RawSample>>,
    active_exception: Mutex<Option<RuntimeError>>,
}

impl SharedDummyBackend {
    /// Parses the map file, adds a `.DUMMY_WRITEABLE` writable alias for
    /// every read-only register (spec.md §8 scenario 2), attaches the shared
    /// memory segment, and wires the InterruptDispatcherInterface callback so
    /// another process's `triggerInterrupt` reaches this process's domains
    /// too.
    pub fn open(instance_id: &str, map_file_name: &str, map_file_text: &str) -> Result<Self, RegisterAccessError> {
        let parsed = MapFileParser::new().parse(map_file_text)?;
        let mut catalogue = parsed.catalogue;
        for alias in ro_writeable_aliases(&catalogue) {
            catalogue.add_register(alias);
        }
        let bar_sizes = catalogue.bar_sizes_in_bytes();
        let shared_memory = SharedMemoryManager::attach(instance_id, map_file_name, &bar_sizes)?;
        let domains: Arc<DomainsContainer<RawSample>> = Arc::new(DomainsContainer::new());

        let dispatch_catalogue = catalogue.clone();
        let dispatch_domains = domains.clone();
        let dispatch_shared_memory = shared_memory.clone();
        shared_memory.set_interrupt_callback(move |domain_id| {
            let Some(info) = dispatch_catalogue.iter().find(|r| r.interrupt_id.contains(&domain_id)).cloned() else {
                return;
            };
            let Ok(sample) = read_raw_sample(dispatch_shared_memory.as_ref(), &info) else { return };
            let version = VersionNumber::new();
            dispatch_domains.for_each(|id, domain| {
                if id == domain_id {
                    domain.distribute(sample.clone(), version);
                }
            });
        });

        Ok(Self { catalogue, shared_memory, domains, active_exception: Mutex::new(None) })
    }

    /// Reads the register(s) declaring `domain_id` as an interrupt id and
    /// distributes their current contents into the matching domain, both
    /// locally and, via the InterruptDispatcherInterface sub-region, to every
    /// other process attached to this instance (spec.md §7's async
    /// idempotence property, §8 scenario 3).
    pub fn trigger_interrupt(&self, domain_id: DomainId) -> Result<(), RegisterAccessError> {
        self.distribute_local(domain_id)?;
        self.shared_memory.notify_interrupt(domain_id);
        Ok(())
    }

    fn distribute_local(&self, domain_id: DomainId) -> Result<(), RegisterAccessError> {
        let info = self
            .catalogue
            .iter()
            .find(|r| r.interrupt_id.contains(&domain_id))
            .cloned()
            .ok_or_else(|| LogicError::Other(format!("no register declares interrupt id {domain_id}")))?;
        let sample = read_raw_sample(&*self.bar_channel(), &info)?;
        let version = VersionNumber::new();
        self.domains.for_each(|id, domain| {
            if id == domain_id {
                domain.distribute(sample.clone(), version);
            }
        });
        Ok(())
    }
}

fn writeable_alias_path(path: &RegisterPath) -> RegisterPath {
    let name = path.components().last().cloned().unwrap_or_default();
    let parent = path.parent().unwrap_or_else(RegisterPath::root);
    parent.push(&format!("{name}.DUMMY_WRITEABLE"))
}

fn ro_writeable_aliases(catalogue: &NumericAddressedRegisterCatalogue) -> Vec<RegisterInfo> {
    catalogue
        .iter()
        .filter(|info| info.access == RegisterAccess::ReadOnly)
        .map(|info| {
            let mut alias = info.clone();
            alias.path = writeable_alias_path(&info.path);
            alias.access = RegisterAccess::ReadWrite;
            alias
        })
        .collect()
}

impl NumericAddressedBackend for SharedDummyBackend {
    fn catalogue(&self) -> &NumericAddressedRegisterCatalogue {
        &self.catalogue
    }

    fn bar_channel(&self) -> Arc<dyn RawBarChannel> {
        self.shared_memory.clone() as Arc<dyn RawBarChannel>
    }

    fn domains(&self) -> &Arc<DomainsContainer<RawSample>> {
        &self.domains
    }

    fn active_exception(&self) -> Option<RuntimeError> {
        self.active_exception.lock().unwrap().clone()
    }

    fn set_active_exception(&self, error: Option<RuntimeError>) {
        *self.active_exception.lock().unwrap() = error;
    }

    fn open_impl(&self) -> Result<(), RegisterAccessError> {
        Ok(())
    }

    fn close_impl(&self) -> Result<(), RegisterAccessError> {
        Ok(())
    }
}

/// Resolves `(shared-dummy:<instanceId>?mapFile=<path>)` descriptors.
pub struct SharedDummyBackendFactory;

impl BackendFactory for SharedDummyBackendFactory {
    fn backend_type(&self) -> &'static str {
        "shared-dummy"
    }

    fn create(&self, address: &str, parameters: &HashMap<String, String>) -> Result<Arc<dyn NumericAddressedBackend>, RegisterAccessError> {
        let map_file_path = parameters.get("map").ok_or_else(|| {
            RegisterAccessError::from(LogicError::DescriptorParse {
                descriptor: address.to_string(),
                message: "shared-dummy backend requires a 'map' parameter".into(),
            })
        })?;
        let text = std::fs::read_to_string(map_file_path)?;
        let backend = SharedDummyBackend::open(address, map_file_path, &text)?;
        Ok(Arc::new(backend) as Arc<dyn NumericAddressedBackend>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regfab_accessor::NDRegisterAccessor;
    use regfab_backend::NumericAddressedBackendExt;
    use regfab_types::AccessModeFlags;

    const MAP: &str = "STATUS 1 0 4 0 32 0 1 RW\n";

    #[test]
    fn two_backends_against_the_same_instance_share_state() {
        let instance = format!("backend-test-{}", std::process::id());
        let a = SharedDummyBackend::open(&instance, "unit.map", MAP).unwrap();
        let b = SharedDummyBackend::open(&instance, "unit.map", MAP).unwrap();

        a.write(0, 0, &42u32.to_le_bytes()).unwrap();
        let mut buf = [0u8; 4];
        b.read(0, 0, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 42);
    }

    #[test]
    fn trigger_interrupt_unblocks_a_waiting_async_read() {
        let instance = format!("trigger-test-{}", std::process::id());
        let map = "STATUS 1 0 4 0 32 0 1 RW\nIRQ_REG 1 4 4 0 32 0 1 INTERRUPT7\n";
        let backend = SharedDummyBackend::open(&instance, "unit.map", map).unwrap();
        backend.write(0, 4, &99u32.to_le_bytes()).unwrap();

        let mut accessor = backend
            .get_register_accessor::<u32>(&RegisterPath::from("/IRQ_REG"), 0, 0, AccessModeFlags::WAIT_FOR_NEW_DATA)
            .unwrap();

        // The subscribe handshake's step 4 already pushed the register's
        // current contents, so the first read never blocks on hardware.
        accessor.read().unwrap();
        assert_eq!(accessor.buffer()[0][0], 99);

        backend.write(0, 4, &7u32.to_le_bytes()).unwrap();
        backend.trigger_interrupt(7).unwrap();
        accessor.read().unwrap();
        assert_eq!(accessor.buffer()[0][0], 7);
    }

    #[test]
    fn dummy_writeable_alias_writes_through_to_the_read_only_register() {
        let instance = format!("writeable-test-{}", std::process::id());
        let map = "STATUS 1 0 4 0 32 0 1 RO\n";
        let backend = SharedDummyBackend::open(&instance, "unit.map", map).unwrap();

        let status_path = RegisterPath::from("/STATUS");
        let alias_path = RegisterPath::from("/STATUS.DUMMY_WRITEABLE");
        assert!(backend.catalogue().has_register(&alias_path));

        let mut writer = backend.get_register_accessor::<u32>(&alias_path, 0, 0, AccessModeFlags::empty()).unwrap();
        writer.buffer_mut()[0][0] = 123;
        writer.write().unwrap();

        let mut reader = backend.get_register_accessor::<u32>(&status_path, 0, 0, AccessModeFlags::empty()).unwrap();
        reader.read().unwrap();
        assert_eq!(reader.buffer()[0][0], 123);
    }
}
