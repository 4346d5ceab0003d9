//! Streaming feed client
//!
//! `FeedSession` holds everything that reacts to decoded messages and can be
//! driven without a socket. `FeedClient` owns the websocket and multiplexes
//! inbound frames, ping ticks and the first-node liveness deadline.

use super::decoder::decode_frame;
use super::keepalive::{ping_command, subscribe_command, PingTracker};
use super::types::FeedMessage;
use super::FeedError;
use crate::config::TrackerConfig;
use crate::tracker::{NodeTracker, PostponedLocation};
use futures::{SinkExt, StreamExt};
use std::convert::Infallible;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub uri: String,
    pub chain: String,
    pub ping_interval: Duration,
    /// Time allowed after connecting for the first node announcement
    pub no_new_node_timeout: Duration,
}

impl FeedConfig {
    pub fn from_tracker_config(config: &TrackerConfig) -> Self {
        Self {
            uri: config.feed_uri.clone(),
            chain: config.chain_name.clone(),
            ping_interval: config.ping_interval,
            no_new_node_timeout: config.no_new_node_timeout,
        }
    }
}

pub struct FeedSession {
    tracker: NodeTracker,
    pings: PingTracker,
    awaiting_first_node: bool,
}

impl FeedSession {
    pub fn new(tracker: NodeTracker) -> Self {
        Self {
            tracker,
            pings: PingTracker::new(),
            awaiting_first_node: true,
        }
    }

    pub fn tracker(&self) -> &NodeTracker {
        &self.tracker
    }

    /// True until the first node announcement of this session
    pub fn awaiting_first_node(&self) -> bool {
        self.awaiting_first_node
    }

    /// Text of the next ping command
    pub fn next_ping(&mut self) -> Result<String, FeedError> {
        let id = self.pings.next_ping(Instant::now())?;
        log::debug!("Sending ping {}", id);
        Ok(ping_command(id))
    }

    /// Decode and dispatch one text frame
    ///
    /// Undecodable frames and messages are logged and skipped; the rest of
    /// the frame is still dispatched in order. Only keep-alive violations
    /// surface as errors.
    pub fn handle_frame(&mut self, frame: &str) -> Result<(), FeedError> {
        let messages = match decode_frame(frame) {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!("⚠️  Skipping feed frame: {}", e);
                return Ok(());
            }
        };

        for message in messages {
            match message {
                Ok(message) => self.dispatch(message)?,
                Err(e) => log::warn!("⚠️  Skipping feed message: {}", e),
            }
        }
        Ok(())
    }

    pub fn dispatch(&mut self, message: FeedMessage) -> Result<(), FeedError> {
        match message {
            FeedMessage::FeedVersion(version) => log::info!("📡 Feed version: {}", version),
            FeedMessage::SubscribedTo(chain) => log::info!("✅ Subscribed to {}", chain),
            FeedMessage::AddedNode(added) => {
                if self.awaiting_first_node {
                    log::info!("🟢 First node announced: {}", added.details.name);
                    self.awaiting_first_node = false;
                }

                // Ticket is taken in feed order, the store write runs detached
                let ticket = self.tracker.begin_added_node(added.feed_id);
                let tracker = self.tracker.clone();
                tokio::spawn(async move {
                    if let Err(e) = tracker.complete_added_node(ticket, &added).await {
                        log::error!(
                            "❌ Failed to add node {} ({}): {}",
                            added.feed_id,
                            added.details.name,
                            e
                        );
                    }
                });
            }
            FeedMessage::RemovedNode(feed_id) => {
                if self.tracker.handle_removed_node(feed_id) {
                    log::debug!("Node {} left the feed", feed_id);
                }
            }
            FeedMessage::StaleNode(feed_id) => log::debug!("Node {} is stale", feed_id),
            FeedMessage::LocatedNode { feed_id, location } => {
                let task = PostponedLocation::new(feed_id, location, self.tracker.retry_policy());
                let tracker = self.tracker.clone();
                tokio::spawn(async move {
                    tracker.apply_location_with_retry(task).await;
                });
            }
            FeedMessage::ImportedBlock { feed_id, block } => {
                if !self.tracker.handle_imported_block(feed_id, &block) {
                    log::trace!("Dropping block {} for unknown node {}", block.block_number, feed_id);
                }
            }
            FeedMessage::NodeStats { feed_id, stats } => {
                if !self.tracker.handle_node_stats(feed_id, &stats) {
                    log::trace!("Dropping stats for unknown node {}", feed_id);
                }
            }
            FeedMessage::Pong(payload) => {
                let rtt = self.pings.on_pong(&payload, Instant::now())?;
                log::debug!("Pong {} received, took: {}ms", payload, rtt.as_millis());
            }
            FeedMessage::Ignored(action) => log::trace!("Ignoring {:?}", action),
            FeedMessage::Unknown(code) => log::trace!("Ignoring unknown action {}", code),
        }
        Ok(())
    }
}

pub struct FeedClient {
    config: FeedConfig,
    session: FeedSession,
}

impl FeedClient {
    pub fn new(config: FeedConfig, tracker: NodeTracker) -> Self {
        Self {
            config,
            session: FeedSession::new(tracker),
        }
    }

    /// Connect, subscribe and stream until the session fails
    ///
    /// Never returns on its own except with the error that ended the session.
    pub async fn run(mut self) -> FeedError {
        match self.stream().await {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }

    async fn stream(&mut self) -> Result<Infallible, FeedError> {
        log::info!("🔗 Connecting to {}", self.config.uri);
        let (socket, _) = connect_async(self.config.uri.as_str())
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        log::info!("✅ Connected to telemetry feed");

        let (mut sink, mut frames) = socket.split();

        sink.send(Message::Text(subscribe_command(&self.config.chain)))
            .await
            .map_err(|e| FeedError::Send(e.to_string()))?;
        log::info!("📨 Subscribing to chain '{}'", self.config.chain);

        let ping_interval = self.config.ping_interval;
        let mut pings = interval_at(Instant::now() + ping_interval, ping_interval);
        pings.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let liveness = tokio::time::sleep(self.config.no_new_node_timeout);
        tokio::pin!(liveness);

        loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.session.handle_frame(&text)?,
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.session.handle_frame(text)?,
                        Err(e) => log::warn!("⚠️  Skipping non UTF-8 binary frame: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        return Err(FeedError::RemoteClosed(frame.map(|f| f.reason.to_string())));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(FeedError::Transport(e.to_string())),
                    None => return Err(FeedError::RemoteClosed(None)),
                },
                _ = pings.tick() => {
                    let command = self.session.next_ping()?;
                    sink.send(Message::Text(command))
                        .await
                        .map_err(|e| FeedError::Send(e.to_string()))?;
                }
                _ = &mut liveness, if self.session.awaiting_first_node() => {
                    return Err(FeedError::NoNodesAnnounced(self.config.no_new_node_timeout));
                }
            }
        }
    }
}
