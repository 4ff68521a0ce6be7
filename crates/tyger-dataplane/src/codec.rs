//! The block codec (C2): a self-describing wire format for buffer blocks.
//!
//! Layout (§6.2), all multi-byte integers little-endian:
//!
//! ```text
//! [magic(4)][block_number(8)][payload_len(4)][running_hash(8)][content_md5(16)][payload(payload_len)]
//! ```
//!
//! A block with `payload_len == 0` is the terminator. A block stamped with
//! [`MAGIC_FAILURE`] instead of [`MAGIC_BLOCK`] is the failure marker a
//! writer leaves behind on abort.

use md5::{Digest as _, Md5};
use sha2::{Digest as _, Sha256};

/// Ordinary payload or terminator block.
pub const MAGIC_BLOCK: [u8; 4] = *b"TYB1";
/// Failure marker: a writer that aborted stamps this so readers fail fast
/// with `ErrBufferFailedState` instead of waiting for a terminator that
/// will never arrive.
pub const MAGIC_FAILURE: [u8; 4] = *b"TYBF";

/// Fixed header size in bytes: 4 + 8 + 4 + 8 + 16.
pub const HEADER_LEN: usize = 40;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    #[error("truncated block header: expected {HEADER_LEN} bytes, got {0}")]
    TruncatedHeader(usize),
    #[error("unrecognized block magic {0:02x?}")]
    UnknownMagic([u8; 4]),
    #[error("content-MD5 mismatch on block {block_number}")]
    Md5Mismatch { block_number: u64 },
    #[error("hash chain mismatch at block {block_number}")]
    HashChainMismatch { block_number: u64 },
}

/// A decoded block header plus whatever of the payload has been read so
/// far by the caller (the codec itself is a pure framing layer; readers
/// and writers own the actual I/O).
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub is_failure_marker: bool,
    pub block_number: u64,
    pub payload_len: u32,
    pub running_hash: u64,
    pub content_md5: [u8; 16],
}

impl BlockHeader {
    pub fn is_terminator(&self) -> bool {
        !self.is_failure_marker && self.payload_len == 0
    }

    /// Encode the fixed 40-byte header. The payload is appended by the
    /// caller (writer) or was already consumed ahead of this header
    /// (reader), since block bodies can be large and are streamed rather
    /// than buffered alongside the header.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let magic = if self.is_failure_marker {
            MAGIC_FAILURE
        } else {
            MAGIC_BLOCK
        };
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&magic);
        buf[4..12].copy_from_slice(&self.block_number.to_le_bytes());
        buf[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.running_hash.to_le_bytes());
        buf[24..40].copy_from_slice(&self.content_md5);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::TruncatedHeader(buf.len()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        let is_failure_marker = match magic {
            MAGIC_BLOCK => false,
            MAGIC_FAILURE => true,
            other => return Err(CodecError::UnknownMagic(other)),
        };
        let block_number = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        let payload_len = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let running_hash = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let mut content_md5 = [0u8; 16];
        content_md5.copy_from_slice(&buf[24..40]);
        Ok(Self {
            is_failure_marker,
            block_number,
            payload_len,
            running_hash,
            content_md5,
        })
    }
}

/// Compute the content-MD5 of a block's payload.
pub fn content_md5(payload: &[u8]) -> [u8; 16] {
    let digest = Md5::digest(payload);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// Advance the running hash chain: `chain' = truncate64(sha256(chain_be ++ sha256(payload)))`.
/// Truncating a cryptographic digest to 64 bits is enough to catch
/// accidental corruption (the property this chain exists to verify) while
/// keeping the header a fixed, small size; it is not meant as a
/// collision-resistant commitment on its own; deliberate tampering is
/// assumed to also need to fake the content-MD5 of the tampered block,
/// which the reader checks independently.
pub fn advance_hash_chain(previous: u64, payload: &[u8]) -> u64 {
    let payload_digest = Sha256::digest(payload);
    let mut hasher = Sha256::new();
    hasher.update(previous.to_be_bytes());
    hasher.update(payload_digest);
    let out = hasher.finalize();
    u64::from_be_bytes(out[0..8].try_into().unwrap())
}

/// Build the header for block `block_number` given the running state
/// (`previous_hash`) and this block's payload. Writers call this once per
/// block, in order, before dispatching the block to the worker pool —
/// the hash chain must be computed sequentially even though the actual
/// PUT can run concurrently.
pub fn header_for_payload(block_number: u64, previous_hash: u64, payload: &[u8]) -> BlockHeader {
    BlockHeader {
        is_failure_marker: false,
        block_number,
        payload_len: payload.len() as u32,
        running_hash: advance_hash_chain(previous_hash, payload),
        content_md5: content_md5(payload),
    }
}

/// The terminator block for `block_number` (one past the last payload
/// block), carrying the hash chain forward with an empty payload so a
/// reader can verify it like any other block.
pub fn terminator(block_number: u64, previous_hash: u64) -> (BlockHeader, Vec<u8>) {
    let payload: Vec<u8> = Vec::new();
    (header_for_payload(block_number, previous_hash, &payload), payload)
}

/// The failure marker block, written best-effort by an aborting writer.
pub fn failure_marker(block_number: u64) -> BlockHeader {
    BlockHeader {
        is_failure_marker: true,
        block_number,
        payload_len: 0,
        running_hash: 0,
        content_md5: [0u8; 16],
    }
}

/// Verify a received block's payload against its header: content-MD5
/// first (retryable corruption), then the hash chain (fatal, never
/// retried per §7/§8's hash-chain-tampering scenario).
pub fn verify_block(
    header: &BlockHeader,
    payload: &[u8],
    previous_hash: u64,
) -> Result<(), CodecError> {
    if content_md5(payload) != header.content_md5 {
        return Err(CodecError::Md5Mismatch {
            block_number: header.block_number,
        });
    }
    if advance_hash_chain(previous_hash, payload) != header.running_hash {
        return Err(CodecError::HashChainMismatch {
            block_number: header.block_number,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bytes() {
        let payload = b"hello world";
        let header = header_for_payload(3, 42, payload);
        let encoded = header.encode();
        let decoded = BlockHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.block_number, 3);
        assert_eq!(decoded.payload_len, payload.len() as u32);
        assert_eq!(decoded.running_hash, header.running_hash);
        assert_eq!(decoded.content_md5, header.content_md5);
        assert!(!decoded.is_terminator());
    }

    #[test]
    fn terminator_has_zero_payload_len_and_is_not_failure() {
        let (header, payload) = terminator(5, 42);
        assert!(payload.is_empty());
        assert!(header.is_terminator());
        assert!(!header.is_failure_marker);
    }

    #[test]
    fn failure_marker_is_distinguished_from_terminator() {
        let marker = failure_marker(2);
        assert!(marker.is_failure_marker);
        assert!(!marker.is_terminator());
    }

    #[test]
    fn verify_block_rejects_tampered_payload() {
        let payload = b"abc";
        let header = header_for_payload(0, 0, payload);
        assert!(verify_block(&header, b"abd", 0).is_err());
    }

    #[test]
    fn verify_block_rejects_tampered_hash_chain() {
        let payload = b"abc";
        let mut header = header_for_payload(0, 0, payload);
        // Corrupt only the chain value; MD5 still matches, so this proves
        // the hash-chain check runs (and fires) independently of MD5.
        header.running_hash ^= 0xDEAD_BEEF;
        let err = verify_block(&header, payload, 0).unwrap_err();
        assert!(matches!(err, CodecError::HashChainMismatch { block_number: 0 }));
    }

    #[test]
    fn chain_is_order_sensitive() {
        let h1 = advance_hash_chain(0, b"a");
        let h2a = advance_hash_chain(h1, b"b");
        let h2b = advance_hash_chain(advance_hash_chain(0, b"b"), b"a");
        assert_ne!(h2a, h2b);
    }
}
