//! Remote command synchronization: replays the bot's inbound message feed
//! onto the persisted configuration.

mod parser;

use anyhow::Result;
use async_trait::async_trait;
use state::{InboundMessage, PersistedState};
use tracing::{debug, info, warn};

pub use parser::{Command, CommandParser, Effect, Mode, Token};

/// Polling source of inbound messages.
///
/// Implementations return every message with `offset >= from`, in ascending
/// offset order. Redelivery of older offsets is tolerated.
#[async_trait]
pub trait UpdateFeed: Send + Sync {
    async fn updates_from(&self, from: i64) -> Result<Vec<InboundMessage>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub state: PersistedState,
    /// Set when `/listproduct` arrived during this pass.
    pub list_requested: bool,
    pub processed: usize,
    pub applied: usize,
    pub feed_error: bool,
}

pub struct Synchronizer {
    authorized_sender: i64,
}

impl Synchronizer {
    pub fn new(authorized_sender: i64) -> Self {
        Self { authorized_sender }
    }

    pub fn authorized_sender(&self) -> i64 {
        self.authorized_sender
    }

    /// Applies all unseen messages to `state`. The mode register lives only
    /// for the duration of this call.
    ///
    /// A feed failure leaves the state untouched; the caller persists the
    /// returned state either way.
    pub async fn synchronize<F>(&self, state: PersistedState, feed: &F) -> SyncOutcome
    where
        F: UpdateFeed + ?Sized,
    {
        let marker = state.last_update_marker;
        info!(marker, "fetching inbound messages");

        let mut messages = match feed.updates_from(marker).await {
            Ok(messages) => messages,
            Err(err) => {
                warn!(error = ?err, marker, "message feed unavailable, keeping stored configuration");
                return SyncOutcome {
                    state,
                    list_requested: false,
                    processed: 0,
                    applied: 0,
                    feed_error: true,
                };
            }
        };
        messages.sort_by_key(|m| m.offset);

        let mut state = state;
        let mut parser = CommandParser::new();
        let mut processed = 0;
        let mut applied = 0;

        for message in &messages {
            if state.has_seen(message.offset) {
                debug!(offset = message.offset, "skipping already processed message");
                continue;
            }
            processed += 1;

            if message.sender_id == Some(self.authorized_sender) {
                if let Some(text) = message.text.as_deref() {
                    if parser.apply(Token::parse(text), &mut state).mutated() {
                        applied += 1;
                    }
                }
            } else {
                debug!(
                    offset = message.offset,
                    sender = ?message.sender_id,
                    "ignoring message from unauthorized sender"
                );
            }

            state.advance_marker(message.offset);
        }

        info!(
            processed,
            applied,
            marker = state.last_update_marker,
            banned = state.banned_ids.len(),
            threshold = state.price_threshold,
            list_requested = parser.list_requested(),
            "inbound messages synchronized"
        );
        if parser.mode() != Mode::None {
            debug!(mode = ?parser.mode(), "pending mode discarded at end of pass");
        }

        SyncOutcome {
            state,
            list_requested: parser.list_requested(),
            processed,
            applied,
            feed_error: false,
        }
    }
}
