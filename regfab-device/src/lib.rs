//! C12 — DeviceFacade (SPEC_FULL.md §4.12): opens a backend by descriptor,
//! resolved against a process-wide [`BackendFactory`] registry, and exposes
//! the catalogue and scalar/1-D/2-D accessor factories application code
//! actually calls.

mod descriptor;
mod facade;
mod registry;

pub use descriptor::{parse as parse_descriptor, Descriptor};
pub use facade::DeviceFacade;
pub use registry::register_backend_factory;

pub use regfab_backend::{BackendFactory, NumericAddressedBackend, SupportedType};
pub use regfab_catalogue::NumericAddressedRegisterCatalogue;
pub use regfab_types::{AccessMode, AccessModeFlags, LogicError, RegisterAccessError, RegisterPath, RuntimeError};
