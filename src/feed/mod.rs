//! Telemetry feed: decoding, keep-alive and the streaming client
//!
//! Every `FeedError` is fatal. The client never reconnects in-process: the
//! feed re-announces every node on subscribe, so a supervisor restart
//! rebuilds the full state.

pub mod client;
pub mod decoder;
pub mod keepalive;
pub mod types;

pub use client::{FeedClient, FeedConfig, FeedSession};
pub use decoder::{decode_frame, DecodeError};
pub use keepalive::PingTracker;
pub use types::{Action, FeedMessage, FeedNodeId};

use std::time::Duration;

#[derive(Debug)]
pub enum FeedError {
    Connect(String),
    Transport(String),
    RemoteClosed(Option<String>),
    Send(String),
    UnexpectedPong {
        expected: Option<u64>,
        received: String,
    },
    MissedPong(u64),
    NoNodesAnnounced(Duration),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Connect(e) => write!(f, "Connection failed: {}", e),
            FeedError::Transport(e) => write!(f, "Connection error: {}", e),
            FeedError::RemoteClosed(Some(reason)) => write!(f, "Feed closed the connection: {}", reason),
            FeedError::RemoteClosed(None) => write!(f, "Feed closed the connection"),
            FeedError::Send(e) => write!(f, "Failed to send command: {}", e),
            FeedError::UnexpectedPong { expected: Some(id), received } => {
                write!(f, "Unexpected pong '{}' (expected {})", received, id)
            }
            FeedError::UnexpectedPong { expected: None, received } => {
                write!(f, "Unexpected pong '{}' with no ping outstanding", received)
            }
            FeedError::MissedPong(id) => write!(f, "Expected pong {} not received", id),
            FeedError::NoNodesAnnounced(timeout) => {
                write!(f, "No node announced within {}ms", timeout.as_millis())
            }
        }
    }
}

impl std::error::Error for FeedError {}
