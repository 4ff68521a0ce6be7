//! Tyger's data-plane transfer engine (C1–C3): a content-addressed
//! streaming protocol over remote object storage using signed access
//! URLs, with parallel block I/O, integrity verification, and strict
//! ordering guarantees.
//!
//! - [`access_url`] — the access-URL container (C1): three construction
//!   shapes, single-flight refresh with a safety margin.
//! - [`codec`] — the self-describing block wire format (C2): header,
//!   content-MD5, hash chain, terminator, failure marker.
//! - [`transport`] — the `BlockTransport` trait the writer/reader drive;
//!   a real HTTP implementation plus an in-memory fake for tests.
//! - [`writer`] / [`reader`] — the parallel block writer/reader (C3).

pub mod access_url;
pub mod codec;
pub mod reader;
pub mod transport;
pub mod writer;

pub use access_url::{AccessMode, AccessUrl, AccessUrlContainer, ControlPlaneSession};
pub use codec::{BlockHeader, CodecError};
pub use reader::BlockReader;
pub use transport::{BlockTransport, HttpBlockTransport, TransportError};
pub use writer::{BlockWriter, WriteSummary, DEFAULT_BLOCK_SIZE, DEFAULT_DOP};
