//! C11 — RebotClient: the wire protocol itself (SPEC_FULL.md §4.11). All
//! words are 32-bit little-endian; the handshake on `connect` negotiates
//! between protocol 0 (single-word writes, chunked reads, no heartbeat) and
//! protocol 1+ (multi-word writes, periodic heartbeat).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use regfab_types::{LogicError, RegisterAccessError, RuntimeError};
use tracing::{info_span, warn};

pub const SINGLE_WORD_WRITE: i32 = 1;
pub const MULTI_WORD_WRITE: i32 = 2;
pub const MULTI_WORD_READ: i32 = 3;
pub const HELLO: i32 = 4;
pub const PING: i32 = 5;

pub const READ_ACK: i32 = 1000;
pub const WRITE_ACK: i32 = 1001;
pub const PONG: i32 = 1005;
pub const TOO_MUCH_DATA: i32 = -1010;
pub const UNKNOWN_INSTRUCTION: i32 = -1040;

pub const CLIENT_PROTOCOL_VERSION: i32 = 0x0000_0001;
pub const MAGIC: i32 = 0x7262_6f74;

/// Protocol 0's hard cap on words per read request.
const V0_MAX_READ_WORDS: usize = 361;
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProtocolVersion {
    V0,
    V1,
}

struct Connection {
    stream: TcpStream,
    last_send: Instant,
}

impl Connection {
    fn send_words(&mut self, words: &[i32]) -> Result<(), RegisterAccessError> {
        for &w in words {
            self.stream.write_i32::<LittleEndian>(w).map_err(RuntimeError::from)?;
        }
        self.stream.flush().map_err(RuntimeError::from)?;
        self.last_send = Instant::now();
        Ok(())
    }

    fn read_word(&mut self) -> Result<i32, RegisterAccessError> {
        self.stream.read_i32::<LittleEndian>().map_err(|e| RegisterAccessError::from(RuntimeError::from(e)))
    }
}

/// A connected, version-negotiated client to one rebot server. All network
/// operations are serialized by `conn`'s mutex, shared with the heartbeat
/// thread, per spec.md §4.11's "all network ops are serialized by a single
/// mutex".
pub struct RebotClient {
    conn: Mutex<Connection>,
    version: ProtocolVersion,
    connection_timeout: Duration,
    heartbeat_stop: Arc<AtomicBool>,
    heartbeat_thread: Mutex<Option<JoinHandle<()>>>,
    on_heartbeat_failure: Mutex<Option<Box<dyn Fn(String) + Send + Sync>>>,
}

impl RebotClient {
    /// Connects, runs the hello handshake, and (for protocol 1+) starts the
    /// heartbeat thread.
    pub fn connect(addr: &str, connection_timeout: Duration) -> Result<Arc<Self>, RegisterAccessError> {
        let stream = TcpStream::connect(addr).map_err(RuntimeError::from)?;
        let _ = stream.set_nodelay(true);
        let mut conn = Connection { stream, last_send: Instant::now() };

        conn.send_words(&[HELLO, MAGIC, CLIENT_PROTOCOL_VERSION])?;
        let first = conn.read_word()?;
        let version = if first == UNKNOWN_INSTRUCTION {
            ProtocolVersion::V0
        } else {
            let _magic_echo = conn.read_word()?;
            let server_version = conn.read_word()?;
            if server_version <= 0 {
                ProtocolVersion::V0
            } else {
                ProtocolVersion::V1
            }
        };

        let client = Arc::new(Self {
            conn: Mutex::new(conn),
            version,
            connection_timeout,
            heartbeat_stop: Arc::new(AtomicBool::new(false)),
            heartbeat_thread: Mutex::new(None),
            on_heartbeat_failure: Mutex::new(None),
        });
        if version == ProtocolVersion::V1 {
            Self::spawn_heartbeat(&client);
        }
        Ok(client)
    }

    /// Installs the callback invoked with a diagnostic message when the
    /// heartbeat thread fails to keep the connection alive; the `rebot`
    /// backend wires this to its own `setException`.
    pub fn on_heartbeat_failure(&self, callback: impl Fn(String) + Send + Sync + 'static) {
        *self.on_heartbeat_failure.lock().unwrap() = Some(Box::new(callback));
    }

    fn spawn_heartbeat(self_arc: &Arc<Self>) {
        let weak = Arc::downgrade(self_arc);
        let stop = self_arc.heartbeat_stop.clone();
        let handle = std::thread::spawn(move || {
            let _span = info_span!("rebot_client.heartbeat").entered();
            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(200));
                let Some(client) = weak.upgrade() else { break };
                let mut conn = client.conn.lock().unwrap();
                if conn.last_send.elapsed() < client.connection_timeout / 2 {
                    continue;
                }
                if let Err(e) = conn.send_words(&[HELLO, MAGIC, CLIENT_PROTOCOL_VERSION]) {
                    warn!(error = %e, "rebot heartbeat failed to keep connection alive");
                    drop(conn);
                    if let Some(cb) = client.on_heartbeat_failure.lock().unwrap().as_ref() {
                        cb(e.to_string());
                    }
                }
            }
        });
        *self_arc.heartbeat_thread.lock().unwrap() = Some(handle);
    }

    /// Reads `n_words` 32-bit words starting at `address_words`, chunked to
    /// protocol 0's per-request limit if necessary.
    pub fn read_words(&self, address_words: u32, n_words: usize) -> Result<Vec<u32>, RegisterAccessError> {
        let mut conn = self.conn.lock().unwrap();
        match self.version {
            ProtocolVersion::V1 => Self::read_chunk(&mut conn, address_words, n_words),
            ProtocolVersion::V0 => {
                let mut out = Vec::with_capacity(n_words);
                let mut remaining = n_words;
                let mut addr = address_words;
                while remaining > 0 {
                    let chunk = remaining.min(V0_MAX_READ_WORDS);
                    out.extend(Self::read_chunk(&mut conn, addr, chunk)?);
                    addr += chunk as u32;
                    remaining -= chunk;
                }
                Ok(out)
            }
        }
    }

    fn read_chunk(conn: &mut Connection, address_words: u32, n_words: usize) -> Result<Vec<u32>, RegisterAccessError> {
        conn.send_words(&[MULTI_WORD_READ, address_words as i32, n_words as i32])?;
        let ack = conn.read_word()?;
        if ack != READ_ACK {
            return Err(RuntimeError::Other(format!("rebot read rejected with ack {ack}")).into());
        }
        (0..n_words).map(|_| conn.read_word().map(|w| w as u32)).collect()
    }

    /// Writes `words` starting at `address_words`; protocol 0 sends one word
    /// per command, protocol 1+ sends the whole block in one frame.
    pub fn write_words(&self, address_words: u32, words: &[u32]) -> Result<(), RegisterAccessError> {
        let mut conn = self.conn.lock().unwrap();
        match self.version {
            ProtocolVersion::V0 => {
                for (i, &word) in words.iter().enumerate() {
                    conn.send_words(&[SINGLE_WORD_WRITE, (address_words + i as u32) as i32, word as i32])?;
                    let ack = conn.read_word()?;
                    if ack != WRITE_ACK {
                        return Err(RuntimeError::Other(format!("rebot write rejected with ack {ack}")).into());
                    }
                }
                Ok(())
            }
            ProtocolVersion::V1 => {
                let mut frame = Vec::with_capacity(3 + words.len());
                frame.extend([MULTI_WORD_WRITE, address_words as i32, words.len() as i32]);
                frame.extend(words.iter().map(|&w| w as i32));
                conn.send_words(&frame)?;
                let ack = conn.read_word()?;
                if ack != WRITE_ACK {
                    return Err(RuntimeError::Other(format!("rebot write rejected with ack {ack}")).into());
                }
                Ok(())
            }
        }
    }

    pub fn ping(&self) -> Result<(), RegisterAccessError> {
        let mut conn = self.conn.lock().unwrap();
        conn.send_words(&[PING])?;
        let reply = conn.read_word()?;
        if reply != PONG {
            return Err(RuntimeError::Other(format!("rebot ping got unexpected reply {reply}")).into());
        }
        Ok(())
    }
}

impl Drop for RebotClient {
    fn drop(&mut self) {
        self.heartbeat_stop.store(true, Ordering::Release);
        if let Some(handle) = self.heartbeat_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// 4-byte address/size alignment rule from spec.md §4.11's "per-transfer
/// rules" — checked by the backend before the words it would send to
/// [`RebotClient`] are even computed.
pub fn require_word_aligned(address: u64, n_bytes: usize) -> Result<(), RegisterAccessError> {
    if address % 4 != 0 {
        return Err(LogicError::MisalignedAddress { address, required: 4 }.into());
    }
    if n_bytes % 4 != 0 {
        return Err(LogicError::Other(format!("transfer size {n_bytes} is not a multiple of 4 bytes")).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn v1_server(listener: TcpListener) {
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut hello = [0u8; 12];
            stream.read_exact(&mut hello).unwrap();
            stream.write_i32::<LittleEndian>(HELLO).unwrap();
            stream.write_i32::<LittleEndian>(MAGIC).unwrap();
            stream.write_i32::<LittleEndian>(1).unwrap();
            stream.flush().unwrap();

            let mut header = [0u8; 12];
            if stream.read_exact(&mut header).is_err() {
                return;
            }
            stream.write_i32::<LittleEndian>(READ_ACK).unwrap();
            stream.write_i32::<LittleEndian>(0xAB).unwrap();
            stream.flush().unwrap();
        });
    }

    #[test]
    fn v1_handshake_and_single_word_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        v1_server(listener);

        let client = RebotClient::connect(&addr.to_string(), Duration::from_secs(5)).unwrap();
        let words = client.read_words(0, 1).unwrap();
        assert_eq!(words, vec![0xAB]);
    }

    #[test]
    fn misaligned_address_is_rejected() {
        assert!(require_word_aligned(1, 4).is_err());
        assert!(require_word_aligned(4, 3).is_err());
        assert!(require_word_aligned(4, 4).is_ok());
    }
}
