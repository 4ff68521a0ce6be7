//! The data-plane reader (C3, read path): issues parallel GETs for blocks
//! but delivers their payloads to the sink strictly in block-number order,
//! verifying content-MD5 and the hash chain as each block arrives.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use tyger_core::TygerError;
use tyger_retry::{AsyncRetryExecutor, RetryPolicy};

use crate::access_url::AccessUrlContainer;
use crate::codec::{self, BlockHeader};
use crate::transport::{BlockTransport, TransportError};
use crate::writer::DEFAULT_DOP;

struct FetchedBlock {
    block_number: u64,
    header: BlockHeader,
    payload: Bytes,
}

pub struct BlockReader {
    transport: Arc<dyn BlockTransport>,
    dop: usize,
}

impl BlockReader {
    pub fn new(transport: Arc<dyn BlockTransport>) -> Self {
        Self {
            transport,
            dop: DEFAULT_DOP,
        }
    }

    pub fn with_dop(mut self, dop: usize) -> Self {
        self.dop = dop.max(1);
        self
    }

    /// Stream every block of the buffer behind `container` into `sink`, in
    /// order, verifying integrity along the way. Returns once the
    /// terminator has been observed and its bytes (none) delivered.
    pub async fn read_all(
        &self,
        container: &AccessUrlContainer,
        mut sink: impl AsyncWrite + Unpin,
    ) -> Result<u64, TygerError> {
        let first_url = container.get_valid_access_url().await?.url;
        if !self
            .transport
            .container_exists(&first_url)
            .await
            .map_err(|e| TygerError::Backend(e.to_string()))?
        {
            return Err(TygerError::InvalidArgument(
                "the buffer does not exist".to_string(),
            ));
        }

        let semaphore = Arc::new(Semaphore::new(self.dop));
        let mut in_flight: JoinSet<Result<FetchedBlock, TygerError>> = JoinSet::new();
        let mut pending: BTreeMap<u64, FetchedBlock> = BTreeMap::new();

        let mut next_to_fetch: u64 = 0;
        let mut next_to_deliver: u64 = 0;
        let mut previous_hash: u64 = 0;
        let mut total_bytes: u64 = 0;
        let mut terminated = false;

        // Prime the pipeline with up to `dop` outstanding fetches.
        for _ in 0..self.dop {
            self.spawn_fetch(container, next_to_fetch, &semaphore, &mut in_flight)
                .await?;
            next_to_fetch += 1;
        }

        while !terminated {
            let joined = in_flight
                .join_next()
                .await
                .expect("fetch pipeline only empties once the terminator has been delivered")
                .map_err(|e| TygerError::IntegrityError(format!("reader task panicked: {e}")))??;
            pending.insert(joined.block_number, joined);

            while let Some(block) = pending.remove(&next_to_deliver) {
                if block.header.is_failure_marker {
                    return Err(TygerError::BufferFailed);
                }
                codec::verify_block(&block.header, &block.payload, previous_hash).map_err(|e| {
                    use crate::codec::CodecError;
                    match e {
                        CodecError::HashChainMismatch { .. } => {
                            TygerError::IntegrityError("hash chain mismatch".to_string())
                        }
                        other => TygerError::IntegrityError(other.to_string()),
                    }
                })?;
                previous_hash = block.header.running_hash;

                if block.header.is_terminator() {
                    terminated = true;
                    break;
                }

                sink.write_all(&block.payload)
                    .await
                    .map_err(|e| TygerError::IntegrityError(format!("failed writing to sink: {e}")))?;
                total_bytes += block.payload.len() as u64;
                next_to_deliver += 1;

                if !terminated {
                    self.spawn_fetch(container, next_to_fetch, &semaphore, &mut in_flight)
                        .await?;
                    next_to_fetch += 1;
                }
            }
        }

        sink.flush()
            .await
            .map_err(|e| TygerError::IntegrityError(format!("failed flushing sink: {e}")))?;
        Ok(total_bytes)
    }

    async fn spawn_fetch(
        &self,
        container: &AccessUrlContainer,
        block_number: u64,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<Result<FetchedBlock, TygerError>>,
    ) -> Result<(), TygerError> {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed while the reader holds a clone of it");
        let transport = self.transport.clone();
        let container_url = container.get_valid_access_url().await?.url;

        in_flight.spawn(async move {
            let _permit = permit;
            let executor = AsyncRetryExecutor::from_policy(RetryPolicy::Aggressive);
            let (header, payload) = executor
                .run(|_attempt| {
                    let transport = transport.clone();
                    let container_url = container_url.clone();
                    async move { transport.get_block(&container_url, block_number).await }
                })
                .await
                .map_err(|e| map_get_error(e, block_number))?;
            Ok(FetchedBlock {
                block_number,
                header,
                payload,
            })
        });
        Ok(())
    }
}

fn map_get_error(err: TransportError, block_number: u64) -> TygerError {
    match err {
        TransportError::BlockNotFound(_) => TygerError::IntegrityError(format!(
            "stream is incomplete: block {block_number} is missing and no terminator was observed"
        )),
        TransportError::ContainerNotFound => {
            TygerError::InvalidArgument("the buffer does not exist".to_string())
        }
        TransportError::Md5Mismatch(_) => {
            TygerError::IntegrityError(format!("md5 mismatch retried out on block {block_number}"))
        }
        other => TygerError::Backend(other.to_string()),
    }
}
