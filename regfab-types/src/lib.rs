//! Primitives shared by every crate in the register-access workspace:
//! arithmetic conversion (C1), the fixed-point codec (C2), hierarchical
//! register paths (C3), version numbers, data validity, access-mode flags
//! and the workspace-wide error type.

mod access_mode;
mod error;
mod fixed_point;
mod numeric;
mod path;
mod transfer_type;
mod validity;
mod version;

pub use access_mode::{AccessMode, AccessModeFlags};
pub use error::{LogicError, RegisterAccessError, RuntimeError};
pub use fixed_point::FixedPointConverter;
pub use numeric::{Canonical, NumericConverter, NumericValue, Void};
pub use path::RegisterPath;
pub use transfer_type::TransferType;
pub use validity::DataValidity;
pub use version::VersionNumber;

/// Convenience alias used throughout the workspace.
pub type Result<T> = core::result::Result<T, RegisterAccessError>;
