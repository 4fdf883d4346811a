//! Back-reference used to propagate a failed transfer to the owning backend
//! (spec.md §3's `exceptionBackend` attribute).

use regfab_types::RegisterAccessError;

pub trait ExceptionBackend: Send + Sync {
    fn report_exception(&self, error: RegisterAccessError);
}
