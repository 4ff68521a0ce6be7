//! The data-plane writer (C3, write path): reads a byte source in order,
//! frames it into blocks, and emits them through a bounded pool of
//! concurrent PUTs while preserving submission order and the hash chain.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use tyger_core::TygerError;
use tyger_retry::{AsyncRetryExecutor, RetryPolicy};

use crate::access_url::AccessUrlContainer;
use crate::codec::{self, BlockHeader};
use crate::transport::{BlockTransport, TransportError};

/// Nominal payload size per block. Real object-storage block limits are
/// far higher; this value balances PUT overhead against how much of a
/// short read the final block is allowed to carry (§4.3: "short read is
/// permitted only for the block immediately preceding the terminator").
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Default bounded worker-pool width (§4.3, §5: "up to `Dop` (default 16)
/// concurrent HTTP PUTs").
pub const DEFAULT_DOP: usize = 16;

pub struct WriteSummary {
    pub block_count: u64,
    pub total_bytes: u64,
}

pub struct BlockWriter {
    transport: Arc<dyn BlockTransport>,
    dop: usize,
    block_size: usize,
}

impl BlockWriter {
    pub fn new(transport: Arc<dyn BlockTransport>) -> Self {
        Self {
            transport,
            dop: DEFAULT_DOP,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    pub fn with_dop(mut self, dop: usize) -> Self {
        self.dop = dop.max(1);
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Write every byte read from `source` to the buffer behind
    /// `container`, then write the terminator. On any non-retryable
    /// failure (including cancellation), best-effort writes the failure
    /// marker before returning the original error (§4.3 "Failure
    /// handling").
    pub async fn write_all(
        &self,
        container: &AccessUrlContainer,
        mut source: impl AsyncRead + Unpin,
    ) -> Result<WriteSummary, TygerError> {
        let semaphore = Arc::new(Semaphore::new(self.dop));
        let mut in_flight: JoinSet<Result<(), TygerError>> = JoinSet::new();

        let mut block_number: u64 = 0;
        let mut previous_hash: u64 = 0;
        let mut total_bytes: u64 = 0;
        let mut buf = vec![0u8; self.block_size];

        let result = async {
            loop {
                let n = read_full(&mut source, &mut buf).await.map_err(|e| {
                    TygerError::IntegrityError(format!("failed reading buffer source: {e}"))
                })?;
                if n == 0 {
                    break;
                }
                total_bytes += n as u64;
                let payload = Bytes::copy_from_slice(&buf[..n]);
                let header = codec::header_for_payload(block_number, previous_hash, &payload);
                previous_hash = header.running_hash;

                self.dispatch_block(container, header, payload, &semaphore, &mut in_flight)
                    .await?;
                block_number += 1;

                if n < self.block_size {
                    break;
                }
            }

            let (header, payload) = codec::terminator(block_number, previous_hash);
            self.dispatch_block(
                container,
                header,
                Bytes::from(payload),
                &semaphore,
                &mut in_flight,
            )
            .await?;

            while let Some(joined) = in_flight.join_next().await {
                joined
                    .map_err(|e| TygerError::IntegrityError(format!("writer task panicked: {e}")))??;
            }

            Ok(WriteSummary {
                block_count: block_number + 1,
                total_bytes,
            })
        }
        .await;

        if result.is_err() {
            in_flight.abort_all();
            self.write_failure_marker_best_effort(container, block_number)
                .await;
        }
        result
    }

    async fn dispatch_block(
        &self,
        container: &AccessUrlContainer,
        header: BlockHeader,
        payload: Bytes,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<Result<(), TygerError>>,
    ) -> Result<(), TygerError> {
        // Drain any already-finished work before acquiring a new permit so
        // a failure surfaces as soon as possible instead of after filling
        // the whole pool with blocks destined to be thrown away.
        while let Some(joined) = in_flight.try_join_next() {
            joined.map_err(|e| TygerError::IntegrityError(format!("writer task panicked: {e}")))??;
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed while the writer holds a clone of it");
        let transport = self.transport.clone();
        let container_url = container.get_valid_access_url().await?.url;
        let fail_if_exists = header.block_number == 0 && !header.is_failure_marker;

        in_flight.spawn(async move {
            let _permit = permit;
            let executor = AsyncRetryExecutor::from_policy(RetryPolicy::Aggressive);
            executor
                .run(|_attempt| {
                    let header = header;
                    let payload = payload.clone();
                    let transport = transport.clone();
                    let container_url = container_url.clone();
                    async move {
                        transport
                            .put_block(&container_url, header.block_number, &header, payload, fail_if_exists)
                            .await
                    }
                })
                .await
                .map_err(|e| map_put_error(e, header.block_number))
        });
        Ok(())
    }

    async fn write_failure_marker_best_effort(&self, container: &AccessUrlContainer, block_number: u64) {
        let Ok(url) = container.get_valid_access_url().await else {
            return;
        };
        let marker = codec::failure_marker(block_number);
        let _ = self
            .transport
            .put_block(&url.url, block_number, &marker, Bytes::new(), false)
            .await;
    }
}

async fn read_full(source: &mut (impl AsyncRead + Unpin), buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn map_put_error(err: TransportError, block_number: u64) -> TygerError {
    match err {
        TransportError::AlreadyExists(_) => TygerError::InvalidState(format!(
            "buffer already has a writer for block {block_number} (If-None-Match precondition failed)"
        )),
        TransportError::Md5Mismatch(_) => {
            TygerError::IntegrityError(format!("md5 mismatch retried out on block {block_number}"))
        }
        TransportError::ContainerNotFound => {
            TygerError::InvalidArgument("the buffer does not exist".to_string())
        }
        other => TygerError::Backend(other.to_string()),
    }
}
