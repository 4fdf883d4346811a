//! The `BackendFactory` registry trait (SPEC_FULL.md §10): one implementor
//! per backend type (`regfab-shared-dummy`, `regfab-rebot`, ...), looked up
//! by the `regfab-device` descriptor parser's `backendType` token and used to
//! instantiate the concrete [`crate::NumericAddressedBackend`] a descriptor
//! names.

use std::collections::HashMap;
use std::sync::Arc;

use regfab_types::RegisterAccessError;

use crate::NumericAddressedBackend;

/// Constructs a backend of one specific type from a parsed descriptor's
/// address and key/value parameters (spec.md §6's `(type:address?k=v&...)`
/// grammar). Registered against `backend_type()` in the process-wide
/// registry `regfab_device::registry` owns.
pub trait BackendFactory: Send + Sync {
    fn backend_type(&self) -> &'static str;

    fn create(&self, address: &str, parameters: &HashMap<String, String>) -> Result<Arc<dyn NumericAddressedBackend>, RegisterAccessError>;
}
