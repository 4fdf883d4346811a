/// A single access-mode flag requested by an accessor factory call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Bypass conversion; the element type must match the storage word width.
    Raw,
    /// Subscribe for asynchronous push delivery instead of synchronous I/O.
    WaitForNewData,
}

bitflags::bitflags! {
    /// A set of [`AccessMode`] flags, as passed to the accessor factories.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AccessModeFlags: u8 {
        const RAW = 1 << 0;
        const WAIT_FOR_NEW_DATA = 1 << 1;
    }
}

impl AccessModeFlags {
    pub fn has(&self, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Raw => self.contains(AccessModeFlags::RAW),
            AccessMode::WaitForNewData => self.contains(AccessModeFlags::WAIT_FOR_NEW_DATA),
        }
    }

    /// Returns an error listing any bit not present in `known` — used by
    /// accessor factories that only support a subset of flags (e.g. 2-D
    /// muxed registers reject `raw`, per SPEC_FULL.md §4.9).
    pub fn check_for_unknown_flags(&self, known: AccessModeFlags) -> Result<(), AccessModeFlags> {
        let unknown = *self & !known;
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(unknown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_reports_individual_flags() {
        let flags = AccessModeFlags::RAW;
        assert!(flags.has(AccessMode::Raw));
        assert!(!flags.has(AccessMode::WaitForNewData));
    }

    #[test]
    fn unknown_flags_are_reported() {
        let flags = AccessModeFlags::RAW | AccessModeFlags::WAIT_FOR_NEW_DATA;
        assert!(flags.check_for_unknown_flags(AccessModeFlags::WAIT_FOR_NEW_DATA).is_err());
        assert!(flags.check_for_unknown_flags(flags).is_ok());
    }
}
