//! C5 — BackendRegisterCatalogue, specialised for numeric-addressed
//! backends: a typed container of [`RegisterInfo`] plus numeric-address
//! pseudo-path synthesis (SPEC_FULL.md §4.5, §6).

use std::collections::HashMap;

use regfab_types::{LogicError, RegisterPath};

use crate::register_info::{NumericType, RegisterAccess, RegisterInfo};

/// Path prefix recognised for numeric-address bypass: `/BAR/<n>/<addr>[*<nBytes>]`.
const BAR_PREFIX: &str = "BAR";

#[derive(Clone, Debug, Default)]
pub struct NumericAddressedRegisterCatalogue {
    registers: HashMap<RegisterPath, RegisterInfo>,
    /// register path (as written in `DataConsistencyKeys`) -> realm name.
    data_consistency_realms: HashMap<RegisterPath, String>,
}

impl NumericAddressedRegisterCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_register(&mut self, info: RegisterInfo) {
        self.registers.insert(info.path.clone(), info);
    }

    pub fn remove_register(&mut self, path: &RegisterPath) -> Option<RegisterInfo> {
        self.registers.remove(path)
    }

    pub fn has_register(&self, path: &RegisterPath) -> bool {
        self.registers.contains_key(path) || Self::parse_numeric_address(path).is_ok()
    }

    pub fn get_register(&self, path: &RegisterPath) -> Option<&RegisterInfo> {
        self.registers.get(path)
    }

    pub fn number_of_registers(&self) -> usize {
        self.registers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterInfo> {
        self.registers.values()
    }

    /// Smallest size per BAR that covers every register's `address +
    /// sizeInBytes`, for `SharedMemoryManager` to size its per-BAR vectors
    /// from (SPEC_FULL.md §4.10).
    pub fn bar_sizes_in_bytes(&self) -> HashMap<u32, u64> {
        let mut sizes: HashMap<u32, u64> = HashMap::new();
        for info in self.registers.values() {
            let end = info.address + info.size_in_bytes;
            let entry = sizes.entry(info.bar).or_insert(0);
            *entry = (*entry).max(end);
        }
        sizes
    }

    pub fn add_data_consistency_realm(&mut self, register_path: &str, realm_name: &str) {
        self.data_consistency_realms.insert(RegisterPath::from(register_path), realm_name.to_string());
    }

    pub fn data_consistency_realm_for(&self, path: &RegisterPath) -> Option<&str> {
        self.data_consistency_realms.get(path).map(|s| s.as_str())
    }

    /// C5's `getBackendRegister`: looks up a stored register, falling back to
    /// numeric-address pseudo-path synthesis; the synthetic descriptor is
    /// never inserted into the catalogue.
    pub fn get_backend_register(&self, path: &RegisterPath) -> Result<RegisterInfo, LogicError> {
        if let Some(info) = self.registers.get(path) {
            return Ok(info.clone());
        }
        Self::parse_numeric_address(path)
    }

    /// Parses `/BAR/<n>/<addr>[*<nBytes>]` into a synthetic scalar or 1-D
    /// register of 32-bit unsigned words, per SPEC_FULL.md §6.
    fn parse_numeric_address(path: &RegisterPath) -> Result<RegisterInfo, LogicError> {
        let components = path.components();
        if components.len() != 3 || components[0] != BAR_PREFIX {
            return Err(LogicError::UnknownRegister { path: path.to_string() });
        }
        let bar: u32 = components[1]
            .parse()
            .map_err(|_| LogicError::DescriptorParse { descriptor: path.to_string(), message: "bad BAR index".into() })?;
        let addr_token = &components[2];
        let (addr_str, n_bytes) = match addr_token.split_once('*') {
            Some((a, n)) => (
                a,
                n.parse::<u64>()
                    .map_err(|_| LogicError::DescriptorParse { descriptor: path.to_string(), message: "bad byte count".into() })?,
            ),
            None => (addr_token.as_str(), 4u64),
        };
        let address: u64 = parse_int(addr_str)
            .ok_or_else(|| LogicError::DescriptorParse { descriptor: path.to_string(), message: "bad address".into() })?;
        if n_bytes == 0 || n_bytes % 4 != 0 {
            return Err(LogicError::DescriptorParse {
                descriptor: path.to_string(),
                message: "nBytes must be a positive multiple of 4".into(),
            });
        }
        let n_elements = (n_bytes / 4) as usize;
        RegisterInfo::new_one_d(
            path.clone(),
            n_elements,
            address,
            bar,
            32,
            NumericType::FixedPoint,
            0,
            false,
            RegisterAccess::ReadWrite,
            Vec::new(),
        )
    }
}

pub(crate) fn parse_int(token: &str) -> Option<u64> {
    let token = token.trim();
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        token.parse::<u64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_address_single_word() {
        let cat = NumericAddressedRegisterCatalogue::new();
        let info = cat.get_backend_register(&RegisterPath::from("/BAR/0/8")).unwrap();
        assert_eq!(info.n_elements, 1);
        assert_eq!(info.address, 8);
        assert_eq!(info.bar, 0);
    }

    #[test]
    fn numeric_address_multi_word() {
        let cat = NumericAddressedRegisterCatalogue::new();
        let info = cat.get_backend_register(&RegisterPath::from("/BAR/0/8*8")).unwrap();
        assert_eq!(info.n_elements, 2);
        assert_eq!(info.address, 8);
    }

    #[test]
    fn numeric_address_rejects_bad_n_bytes() {
        let cat = NumericAddressedRegisterCatalogue::new();
        assert!(cat.get_backend_register(&RegisterPath::from("/BAR/0/8*5")).is_err());
    }

    #[test]
    fn stored_register_is_not_shadowed_by_numeric_synthesis() {
        let mut cat = NumericAddressedRegisterCatalogue::new();
        let info = RegisterInfo::new_one_d(
            RegisterPath::from("/FEATURE/AREA1"),
            5,
            0,
            0,
            32,
            NumericType::FixedPoint,
            0,
            true,
            RegisterAccess::ReadWrite,
            Vec::new(),
        )
        .unwrap();
        cat.add_register(info.clone());
        assert_eq!(cat.get_backend_register(&info.path).unwrap(), info);
    }
}
