//! Blockchain blocks and records as seen by the console.
//!
//! The record format belongs to the backend. These types only carry what
//! the `get block` and `search file` commands print.

use crate::domain::keys::{Hash256, PublicKey};
use crate::domain::transfer::BlockRange;
use uuid::Uuid;

/// Default upper bound for a single fetched block.
pub const MAX_BLOCK_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAvailability {
    Available,
    NotAvailable,
    SizeExceed,
    Unknown(u8),
}

/// Raw answer of a remote peer to a block request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReply {
    pub data: Vec<u8>,
    pub target: BlockRange,
    /// Size of the block as indicated by the remote.
    pub block_size: u64,
    pub availability: BlockAvailability,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileTag {
    Name(String),
    Folder(String),
    Description(String),
    Other { kind: u16, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: Uuid,
    pub size: u64,
    pub file_type: u8,
    pub format: u16,
    pub hash: Hash256,
    pub merkle_root: Hash256,
    pub fragment_size: u64,
    pub tags: Vec<FileTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileFieldKind {
    Name,
    Email,
    Website,
    Twitter,
    YouTube,
    Address,
    Picture,
    Other(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileField {
    pub kind: ProfileFieldKind,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRecord {
    File(FileRecord),
    Profile(Vec<ProfileField>),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub blockchain_version: u64,
    pub number: u64,
    pub records: Vec<BlockRecord>,
}

/// Hit of the local file search index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub file_id: Uuid,
    pub public_key: PublicKey,
    pub block_number: u64,
    pub keywords: Vec<String>,
}
