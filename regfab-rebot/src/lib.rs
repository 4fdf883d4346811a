//! C11 — RebotClient (SPEC_FULL.md §4.11): the version-negotiated TCP
//! protocol to a rebot server, and the `rebot` backend built on top of it.

mod backend;
mod protocol;

pub use backend::{RebotBackend, RebotBackendFactory};
pub use protocol::{
    RebotClient, CLIENT_PROTOCOL_VERSION, HELLO, MAGIC, MULTI_WORD_READ, MULTI_WORD_WRITE, PING, PONG, READ_ACK, SINGLE_WORD_WRITE,
    TOO_MUCH_DATA, UNKNOWN_INSTRUCTION, WRITE_ACK,
};
