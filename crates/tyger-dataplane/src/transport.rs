//! The HTTP transport the writer/reader drive against a buffer's storage
//! container. Kept as a trait so tests exercise the framing, ordering, and
//! retry logic in [`crate::writer`]/[`crate::reader`] against an in-memory
//! fake instead of real object storage.

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::codec::BlockHeader;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("container not found")]
    ContainerNotFound,
    #[error("block {0} not found")]
    BlockNotFound(u64),
    #[error("content-MD5 mismatch reported by storage server for block {0}")]
    Md5Mismatch(u64),
    #[error("block {0} already exists (If-None-Match precondition failed)")]
    AlreadyExists(u64),
    #[error("transient storage error: {0}")]
    Transient(String),
    #[error("storage error: {0}")]
    Other(String),
}

/// One block transfer, read or write, against a signed container URL.
/// `block_index` addresses the block's blob name within the container
/// (zero-padded decimal, matching the real blob-storage convention the
/// wire format interoperates with per spec.md's Non-goals).
#[async_trait]
pub trait BlockTransport: Send + Sync {
    async fn put_block(
        &self,
        container_url: &Url,
        block_index: u64,
        header: &BlockHeader,
        payload: Bytes,
        fail_if_exists: bool,
    ) -> Result<(), TransportError>;

    async fn get_block(
        &self,
        container_url: &Url,
        block_index: u64,
    ) -> Result<(BlockHeader, Bytes), TransportError>;

    async fn container_exists(&self, container_url: &Url) -> Result<bool, TransportError>;
}

pub fn block_blob_name(block_index: u64) -> String {
    format!("{block_index:08}")
}

/// Real transport: one blob per block, PUT/GET against `container_url`
/// with the block's blob name inserted before the SAS query string.
pub struct HttpBlockTransport {
    client: reqwest::Client,
}

impl Default for HttpBlockTransport {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl HttpBlockTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn blob_url(&self, container_url: &Url, block_index: u64) -> Url {
        let mut url = container_url.clone();
        let name = block_blob_name(block_index);
        let new_path = format!("{}/{}", url.path().trim_end_matches('/'), name);
        url.set_path(&new_path);
        url
    }
}

#[async_trait]
impl BlockTransport for HttpBlockTransport {
    async fn put_block(
        &self,
        container_url: &Url,
        block_index: u64,
        header: &BlockHeader,
        payload: Bytes,
        fail_if_exists: bool,
    ) -> Result<(), TransportError> {
        let url = self.blob_url(container_url, block_index);
        let mut body = Vec::with_capacity(crate::codec::HEADER_LEN + payload.len());
        body.extend_from_slice(&header.encode());
        body.extend_from_slice(&payload);

        let mut req = self
            .client
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-MD5", base64_encode(&header.content_md5))
            .body(body);
        if fail_if_exists {
            req = req.header("If-None-Match", "*");
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        match resp.status().as_u16() {
            200..=299 => Ok(()),
            412 => Err(TransportError::AlreadyExists(block_index)),
            400 if resp
                .headers()
                .get("x-ms-error-code")
                .map(|v| v == "Md5Mismatch")
                .unwrap_or(false) =>
            {
                Err(TransportError::Md5Mismatch(block_index))
            }
            500..=599 => Err(TransportError::Transient(format!(
                "storage server returned {}",
                resp.status()
            ))),
            other => Err(TransportError::Other(format!("unexpected status {other}"))),
        }
    }

    async fn get_block(
        &self,
        container_url: &Url,
        block_index: u64,
    ) -> Result<(BlockHeader, Bytes), TransportError> {
        let url = self.blob_url(container_url, block_index);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        match resp.status().as_u16() {
            200..=299 => {}
            404 => return Err(TransportError::BlockNotFound(block_index)),
            500..=599 => {
                return Err(TransportError::Transient(format!(
                    "storage server returned {}",
                    resp.status()
                )))
            }
            other => return Err(TransportError::Other(format!("unexpected status {other}"))),
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        if bytes.len() < crate::codec::HEADER_LEN {
            return Err(TransportError::Other("truncated block body".to_string()));
        }
        let header = BlockHeader::decode(&bytes[..crate::codec::HEADER_LEN])
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let payload = bytes.slice(crate::codec::HEADER_LEN..);
        Ok((header, payload))
    }

    async fn container_exists(&self, container_url: &Url) -> Result<bool, TransportError> {
        let resp = self
            .client
            .head(container_url.clone())
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            code if resp
                .headers()
                .get("x-ms-error-code")
                .map(|v| v == "ContainerNotFound")
                .unwrap_or(false) =>
            {
                let _ = code;
                Ok(false)
            }
            500..=599 => Err(TransportError::Transient(format!(
                "storage server returned {}",
                resp.status()
            ))),
            other => Err(TransportError::Other(format!("unexpected status {other}"))),
        }
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// An in-memory fake transport shared by the writer and reader test
/// suites so both exercise the real ordering/retry/integrity logic
/// without any network dependency.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeTransport {
        pub blocks: Mutex<HashMap<u64, (BlockHeader, Bytes)>>,
        pub container_missing: std::sync::atomic::AtomicBool,
        /// Number of times to report a transient MD5 mismatch for a given
        /// block before accepting it, keyed by block index.
        pub flaky_blocks: Mutex<HashMap<u64, usize>>,
        pub get_calls: AtomicUsize,
    }

    #[async_trait]
    impl BlockTransport for FakeTransport {
        async fn put_block(
            &self,
            _container_url: &Url,
            block_index: u64,
            header: &BlockHeader,
            payload: Bytes,
            fail_if_exists: bool,
        ) -> Result<(), TransportError> {
            let mut blocks = self.blocks.lock().unwrap();
            if fail_if_exists && blocks.contains_key(&block_index) {
                return Err(TransportError::AlreadyExists(block_index));
            }
            let mut flaky = self.flaky_blocks.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(&block_index) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::Md5Mismatch(block_index));
                }
            }
            blocks.insert(block_index, (*header, payload));
            Ok(())
        }

        async fn get_block(
            &self,
            _container_url: &Url,
            block_index: u64,
        ) -> Result<(BlockHeader, Bytes), TransportError> {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut flaky = self.flaky_blocks.lock().unwrap();
                if let Some(remaining) = flaky.get_mut(&block_index) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(TransportError::Md5Mismatch(block_index));
                    }
                }
            }
            let blocks = self.blocks.lock().unwrap();
            blocks
                .get(&block_index)
                .cloned()
                .ok_or(TransportError::BlockNotFound(block_index))
        }

        async fn container_exists(&self, _container_url: &Url) -> Result<bool, TransportError> {
            Ok(!self.container_missing.load(Ordering::SeqCst))
        }
    }
}
