//! Process-wide [`BackendFactory`] registry (SPEC_FULL.md §4.12):
//! `DeviceFacade::open` resolves a descriptor's backend type against this
//! registry rather than matching on a hardcoded set of strings, so a custom
//! backend is usable without a workspace change beyond registering it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use regfab_backend::{BackendFactory, NumericAddressedBackend};
use regfab_types::{LogicError, RegisterAccessError};

static REGISTRY: Lazy<RwLock<HashMap<String, Box<dyn BackendFactory>>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers the two backends this workspace ships with. Runs once, on
/// first use of the registry, via [`Lazy`]; an application that never opens
/// a device never pays for it.
static DEFAULTS: Lazy<()> = Lazy::new(|| {
    register_backend_factory(Box::new(regfab_shared_dummy::SharedDummyBackendFactory));
    register_backend_factory(Box::new(regfab_rebot::RebotBackendFactory));
});

/// Registers `factory` under its own `backend_type()`, replacing any prior
/// registration for that type. Safe to call before or after the built-in
/// backends have registered themselves.
pub fn register_backend_factory(factory: Box<dyn BackendFactory>) {
    let mut registry = REGISTRY.write().unwrap();
    registry.insert(factory.backend_type().to_string(), factory);
}

pub(crate) fn create(
    backend_type: &str,
    address: &str,
    parameters: &HashMap<String, String>,
) -> Result<Arc<dyn NumericAddressedBackend>, RegisterAccessError> {
    Lazy::force(&DEFAULTS);
    let registry = REGISTRY.read().unwrap();
    let factory = registry.get(backend_type).ok_or_else(|| {
        RegisterAccessError::from(LogicError::DescriptorParse {
            descriptor: format!("({backend_type}:{address})"),
            message: format!("no backend factory registered for type '{backend_type}'"),
        })
    })?;
    factory.create(address, parameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_backends_are_registered_on_first_use() {
        Lazy::force(&DEFAULTS);
        let registry = REGISTRY.read().unwrap();
        assert!(registry.contains_key("shared-dummy"));
        assert!(registry.contains_key("rebot"));
    }

    #[test]
    fn unknown_backend_type_is_a_logic_error() {
        let err = create("no-such-backend", "x", &HashMap::new()).unwrap_err();
        assert!(err.is_logic());
    }
}
