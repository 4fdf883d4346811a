//! C7 (AsyncDomain), C8 (DomainsContainer) and C13 (DataConsistencyRealm)
//! from SPEC_FULL.md §4.7/§4.8/§4.13.

mod async_domain;
mod consistency;
mod domains_container;

pub use async_domain::{AsyncDomain, AsyncDomainState, Distributor};
pub use consistency::{DataConsistencyRealm, DataConsistencyRealmStore};
pub use domains_container::DomainsContainer;

/// Identifies one [`AsyncDomain`] within a backend, e.g. an interrupt number.
pub type DomainId = u32;
