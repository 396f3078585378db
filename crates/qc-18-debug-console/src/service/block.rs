//! Fetching a single block from a remote peer's blockchain.

use crate::domain::{
    BackendError, BlockAvailability, BlockRange, BlockReply, DecodedBlock, OutputSink, PeerInfo,
};
use crate::ports::NetworkBackend;
use crate::service::connect::until_cancelled;
use crate::service::render::block_records;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockFetchError {
    #[error("Error starting block transfer: {0}")]
    Request(BackendError),

    #[error("Error mismatch requested block {requested} with returned block {returned} (count {count})")]
    RangeMismatch {
        requested: u64,
        returned: u64,
        count: u64,
    },

    #[error("Error requested block {0} not available")]
    NotAvailable(u64),

    #[error("Error block {number} reported by remote as exceeding size {size} (limit {limit})")]
    SizeExceeded { number: u64, size: u64, limit: u64 },

    #[error("Error requested block {number} unknown availability indicator {indicator}")]
    UnknownAvailability { number: u64, indicator: u8 },

    #[error("Error decoding block: {0}")]
    Decode(BackendError),

    #[error("Block fetch cancelled.")]
    Cancelled,
}

/// Requests block `number` of `peer`'s own blockchain and decodes it.
pub async fn fetch_block(
    backend: &dyn NetworkBackend,
    peer: &PeerInfo,
    number: u64,
    max_block_size: u64,
    cancel: &CancellationToken,
) -> Result<(BlockReply, DecodedBlock), BlockFetchError> {
    let blockchain = peer.public_key();
    let range = BlockRange {
        offset: number,
        limit: 1,
    };
    let request = backend.request_block(peer, &blockchain, range, max_block_size);
    let reply = until_cancelled(cancel, request)
        .await
        .ok_or(BlockFetchError::Cancelled)?
        .map_err(BlockFetchError::Request)?;

    check_reply(&reply, number, max_block_size)?;

    let decoded = backend.decode_block(&reply.data).map_err(BlockFetchError::Decode)?;
    debug!(peer = %peer.node_id(), number, records = decoded.records.len(), "Fetched block");
    Ok((reply, decoded))
}

fn check_reply(reply: &BlockReply, number: u64, limit: u64) -> Result<(), BlockFetchError> {
    if reply.target.limit != 1 || reply.target.offset != number {
        return Err(BlockFetchError::RangeMismatch {
            requested: number,
            returned: reply.target.offset,
            count: reply.target.limit,
        });
    }
    match reply.availability {
        BlockAvailability::Available => Ok(()),
        BlockAvailability::NotAvailable => Err(BlockFetchError::NotAvailable(number)),
        BlockAvailability::SizeExceed => Err(BlockFetchError::SizeExceeded {
            number,
            size: reply.block_size,
            limit,
        }),
        BlockAvailability::Unknown(indicator) => {
            Err(BlockFetchError::UnknownAvailability { number, indicator })
        }
    }
}

/// The `get block` command body: fetch, then print the block or the error.
pub async fn print_block(
    backend: &dyn NetworkBackend,
    peer: &PeerInfo,
    number: u64,
    max_block_size: u64,
    output: &OutputSink,
    cancel: &CancellationToken,
) {
    match fetch_block(backend, peer, number, max_block_size, cancel).await {
        Ok((reply, block)) => {
            let mut text = format!(
                "Block {} from {}: version {}, number {}, block size {}, decoded {} records\n",
                number,
                peer.public_key(),
                block.blockchain_version,
                block.number,
                reply.data.len(),
                block.records.len()
            );
            text.push_str(&block_records(&block));
            output.write(text);
        }
        Err(e) => output.line(e.to_string()),
    }
}
