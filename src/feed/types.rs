//! Typed feed messages produced by the decoder

use crate::store::{Location, NewNode};

/// Identifier assigned by the feed for the life of a node's session.
///
/// Volatile: only a lookup key while the process runs, never persisted.
pub type FeedNodeId = u64;

/// Action tags of the telemetry feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    FeedVersion = 0,
    BestBlock = 1,
    BestFinalized = 2,
    AddedNode = 3,
    RemovedNode = 4,
    LocatedNode = 5,
    ImportedBlock = 6,
    FinalizedBlock = 7,
    NodeStats = 8,
    NodeHardware = 9,
    TimeSync = 10,
    AddedChain = 11,
    RemovedChain = 12,
    SubscribedTo = 13,
    UnsubscribedFrom = 14,
    Pong = 15,
    AfgFinalized = 16,
    AfgReceivedPrevote = 17,
    AfgReceivedPrecommit = 18,
    AfgAuthoritySet = 19,
    StaleNode = 20,
    NodeIO = 21,
}

impl Action {
    pub fn from_code(code: u64) -> Option<Self> {
        let action = match code {
            0 => Action::FeedVersion,
            1 => Action::BestBlock,
            2 => Action::BestFinalized,
            3 => Action::AddedNode,
            4 => Action::RemovedNode,
            5 => Action::LocatedNode,
            6 => Action::ImportedBlock,
            7 => Action::FinalizedBlock,
            8 => Action::NodeStats,
            9 => Action::NodeHardware,
            10 => Action::TimeSync,
            11 => Action::AddedChain,
            12 => Action::RemovedChain,
            13 => Action::SubscribedTo,
            14 => Action::UnsubscribedFrom,
            15 => Action::Pong,
            16 => Action::AfgFinalized,
            17 => Action::AfgReceivedPrevote,
            18 => Action::AfgReceivedPrecommit,
            19 => Action::AfgAuthoritySet,
            20 => Action::StaleNode,
            21 => Action::NodeIO,
            _ => return None,
        };
        Some(action)
    }

    pub fn code(self) -> u64 {
        self as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDetails {
    pub name: String,
    pub implementation: String,
    pub version: String,
    pub address: Option<String>,
    pub network_id: Option<String>,
}

/// Latest-value gauges reported by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStats {
    pub peer_count: u32,
    pub transactions_in_queue: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDetails {
    pub block_number: u64,
    pub block_hash: String,
    /// Time since the previous block, in milliseconds
    pub block_time_ms: u64,
    pub block_timestamp: u64,
    pub propagation_time_ms: Option<u64>,
}

/// Announcement of a node joining the feed
#[derive(Debug, Clone, PartialEq)]
pub struct AddedNode {
    pub feed_id: FeedNodeId,
    pub details: NodeDetails,
    pub stats: NodeStats,
    pub block: BlockDetails,
    pub location: Option<Location>,
    /// Epoch millis
    pub startup_time: Option<i64>,
}

impl AddedNode {
    /// Durable record fields for this announcement
    pub fn new_node(&self) -> NewNode {
        NewNode {
            node_name: self.details.name.clone(),
            node_implementation: self.details.implementation.clone(),
            node_version: self.details.version.clone(),
            address: self.details.address.clone(),
            network_id: self.details.network_id.clone(),
            last_startup_time: self.startup_time,
        }
    }
}

/// One decoded feed message
///
/// Only the variants the tracker acts on carry typed payloads; every other
/// recognized action is kept as `Ignored` so it can still be logged.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    FeedVersion(serde_json::Value),
    AddedNode(Box<AddedNode>),
    RemovedNode(FeedNodeId),
    StaleNode(FeedNodeId),
    LocatedNode {
        feed_id: FeedNodeId,
        location: Location,
    },
    ImportedBlock {
        feed_id: FeedNodeId,
        block: BlockDetails,
    },
    NodeStats {
        feed_id: FeedNodeId,
        stats: NodeStats,
    },
    SubscribedTo(String),
    /// Raw ping id echoed by the feed
    Pong(String),
    Ignored(Action),
    Unknown(u64),
}
