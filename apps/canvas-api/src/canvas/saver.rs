//! Debounced canvas persistence: at most one document-store write per room
//! per quiet period, never losing the newest payload.
//!
//! Every edit re-arms the room's timer, so a room under continuous editing
//! defers its save until edits stop for the full window.
//! Each arm bumps a generation; the timer that fires only writes if its
//! generation is still current, so a stale timer can never clobber a newer
//! payload.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use super::registry::RoomRegistry;
use super::relay::BroadcastRelay;
use crate::store::documents::{CanvasDocument, DocumentStore};

/// One outstanding debounce timer for a canvas.
struct PendingSave {
    generation: u64,
    payload: CanvasDocument,
    timer: JoinHandle<()>,
}

/// Schedules debounced writes of canvas content to the document store.
/// Cloneable; clones share the same pending-save state.
#[derive(Clone)]
pub struct SaveScheduler {
    pending: Arc<DashMap<String, PendingSave>>,
    documents: Arc<dyn DocumentStore>,
    registry: Arc<RoomRegistry>,
    relay: Arc<BroadcastRelay>,
    quiet_window: Duration,
}

impl SaveScheduler {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        registry: Arc<RoomRegistry>,
        relay: Arc<BroadcastRelay>,
        quiet_window: Duration,
    ) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            documents,
            registry,
            relay,
            quiet_window,
        }
    }

    /// Record `payload` as the room's latest pending state and (re)arm the
    /// quiet-window timer. At most one timer is live per canvas: arming
    /// cancels any previous one.
    pub fn schedule(&self, canvas_id: &str, payload: CanvasDocument) {
        match self.pending.entry(canvas_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let pending = occupied.get_mut();
                pending.timer.abort();
                pending.generation += 1;
                pending.payload = payload;
                pending.timer = self.arm(canvas_id, pending.generation);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingSave {
                    generation: 0,
                    payload,
                    timer: self.arm(canvas_id, 0),
                });
            }
        }
    }

    fn arm(&self, canvas_id: &str, generation: u64) -> JoinHandle<()> {
        let scheduler = self.clone();
        let canvas_id = canvas_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(scheduler.quiet_window).await;
            scheduler.flush(&canvas_id, generation).await;
        })
    }

    async fn flush(&self, canvas_id: &str, generation: u64) {
        // A newer schedule call superseded this timer: its own timer owns the
        // pending payload now.
        let Some((_, pending)) = self
            .pending
            .remove_if(canvas_id, |_, p| p.generation == generation)
        else {
            return;
        };

        // The room emptied while the timer ran; nothing to persist for.
        let Some(writer) = self.registry.members(canvas_id).into_iter().next() else {
            tracing::debug!(%canvas_id, "room empty at save time, skipping write");
            return;
        };

        match self
            .documents
            .replace(canvas_id, &pending.payload, &writer.user_id)
            .await
        {
            Ok(()) => {
                let timestamp = Utc::now();
                tracing::debug!(%canvas_id, saved_by = %writer.user_id, "canvas saved");
                self.relay.broadcast_saved(canvas_id, timestamp);
            }
            Err(e) => {
                // No retry here; the next edit re-arms a fresh save cycle.
                tracing::warn!(%canvas_id, error = ?e, "canvas save failed");
            }
        }
    }
}
