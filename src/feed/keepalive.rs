//! Keep-alive ping/pong sequencing
//!
//! Every ping carries the next sequence number and must be answered by a
//! pong echoing it before the following ping is due. A pong with any other
//! id, or a ping still unanswered when the next one is due, is fatal.

use super::FeedError;
use tokio::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct PingTracker {
    next_id: u64,
    outstanding: Option<(u64, Instant)>,
}

impl PingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the ping currently awaiting its pong
    pub fn outstanding(&self) -> Option<u64> {
        self.outstanding.map(|(id, _)| id)
    }

    /// Reserve the id for the next ping
    pub fn next_ping(&mut self, now: Instant) -> Result<u64, FeedError> {
        if let Some((id, _)) = self.outstanding {
            return Err(FeedError::MissedPong(id));
        }
        let id = self.next_id;
        self.outstanding = Some((id, now));
        Ok(id)
    }

    /// Match a pong against the outstanding ping; returns the round trip
    pub fn on_pong(&mut self, payload: &str, now: Instant) -> Result<Duration, FeedError> {
        let received = payload.trim().parse::<u64>().ok();

        match self.outstanding {
            Some((id, sent_at)) if received == Some(id) => {
                self.outstanding = None;
                self.next_id += 1;
                Ok(now.saturating_duration_since(sent_at))
            }
            outstanding => Err(FeedError::UnexpectedPong {
                expected: outstanding.map(|(id, _)| id),
                received: payload.to_string(),
            }),
        }
    }
}

/// Text command subscribing to a chain's updates
pub fn subscribe_command(chain: &str) -> String {
    format!("subscribe:{}", chain)
}

pub fn ping_command(id: u64) -> String {
    format!("ping:{}", id)
}
