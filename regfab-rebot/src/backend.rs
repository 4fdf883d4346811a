//! The `rebot` backend: a [`regfab_backend::NumericAddressedBackend`] whose
//! single BAR is a remote device reached over [`RebotClient`]'s TCP protocol.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regfab_async::DomainsContainer;
use regfab_backend::{BackendFactory, NumericAddressedBackend, RawBarChannel, RawSample};
use regfab_catalogue::{MapFileParser, NumericAddressedRegisterCatalogue};
use regfab_types::{LogicError, RegisterAccessError, RuntimeError};

use crate::protocol::{require_word_aligned, RebotClient, DEFAULT_CONNECTION_TIMEOUT};

/// Adapts [`RebotClient`]'s word-addressed protocol to
/// [`RawBarChannel`]'s byte-addressed one; a rebot server exposes a single
/// flat address space, so only BAR 0 is meaningful here.
struct RebotChannel {
    client: Arc<RebotClient>,
}

impl RawBarChannel for RebotChannel {
    fn bar_size(&self, bar: u32) -> Option<u64> {
        if bar == 0 {
            Some(u32::MAX as u64)
        } else {
            None
        }
    }

    fn read(&self, bar: u32, address: u64, data: &mut [u8]) -> Result<(), RegisterAccessError> {
        if bar != 0 {
            return Err(RuntimeError::Other(format!("rebot backend has no BAR {bar}")).into());
        }
        require_word_aligned(address, data.len())?;
        let words = self.client.read_words((address / 4) as u32, data.len() / 4)?;
        for (chunk, word) in data.chunks_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    fn write(&self, bar: u32, address: u64, data: &[u8]) -> Result<(), RegisterAccessError> {
        if bar != 0 {
            return Err(RuntimeError::Other(format!("rebot backend has no BAR {bar}")).into());
        }
        require_word_aligned(address, data.len())?;
        let words: Vec<u32> = data.chunks(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();
        self.client.write_words((address / 4) as u32, &words)
    }
}

pub struct RebotBackend {
    catalogue: NumericAddressedRegisterCatalogue,
    channel: Arc<RebotChannel>,
    domains: Arc<DomainsContainer<RawSample>>,
    active_exception: Mutex<Option<RuntimeError>>,
}

impl RebotBackend {
    pub fn connect(addr: &str, map_file_text: &str, connection_timeout: Duration) -> Result<Self, RegisterAccessError> {
        let parsed = MapFileParser::new().parse(map_file_text)?;
        let client = RebotClient::connect(addr, connection_timeout)?;
        let backend_domains = Arc::new(DomainsContainer::new());
        let exception_state: Arc<Mutex<Option<RuntimeError>>> = Arc::new(Mutex::new(None));
        let broadcast_domains = backend_domains.clone();
        let broadcast_state = exception_state.clone();
        client.on_heartbeat_failure(move |message| {
            broadcast_domains.send_exceptions(message.clone());
            *broadcast_state.lock().unwrap() = Some(RuntimeError::ActiveException(message));
        });
        Ok(Self {
            catalogue: parsed.catalogue,
            channel: Arc::new(RebotChannel { client }),
            domains: backend_domains,
            active_exception: Mutex::new(None),
        })
    }
}

impl NumericAddressedBackend for RebotBackend {
    fn catalogue(&self) -> &NumericAddressedRegisterCatalogue {
        &self.catalogue
    }

    fn bar_channel(&self) -> Arc<dyn RawBarChannel> {
        self.channel.clone() as Arc<dyn RawBarChannel>
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

    fn bar_index_valid(&self, bar: u32) -> bool {
        bar == 0
    }

    fn open_impl(&self) -> Result<(), RegisterAccessError> {
        self.channel.client.ping()
    }

    fn close_impl(&self) -> Result<(), RegisterAccessError> {
        Ok(())
    }
}

/// Resolves `(rebot:<host>:<port>?mapFile=<path>&connectionTimeout=<secs>)`
/// descriptors.
pub struct RebotBackendFactory;

impl BackendFactory for RebotBackendFactory {
    fn backend_type(&self) -> &'static str {
        "rebot"
    }

    fn create(&self, address: &str, parameters: &HashMap<String, String>) -> Result<Arc<dyn NumericAddressedBackend>, RegisterAccessError> {
        let map_file_path = parameters.get("map").ok_or_else(|| {
            RegisterAccessError::from(LogicError::DescriptorParse {
                descriptor: address.to_string(),
                message: "rebot backend requires a 'map' parameter".into(),
            })
        })?;
        let text = std::fs::read_to_string(map_file_path)?;
        let timeout = parameters
            .get("timeout")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT);

        // The descriptor's address token is `host:port` directly, or absent
        // in favor of the `ip`/`port` keys (spec.md §6's key list).
        let host_port = if address.contains(':') {
            address.to_string()
        } else {
            let ip = parameters.get("ip").map(String::as_str).unwrap_or(address);
            let port = parameters.get("port").ok_or_else(|| {
                RegisterAccessError::from(LogicError::DescriptorParse {
                    descriptor: address.to_string(),
                    message: "rebot backend requires a 'port' parameter when the address has none".into(),
                })
            })?;
            format!("{ip}:{port}")
        };

        let backend = RebotBackend::connect(&host_port, &text, timeout)?;
        Ok(Arc::new(backend) as Arc<dyn NumericAddressedBackend>)
    }
}
