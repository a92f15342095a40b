//! Gossip - put-log reconciliation between peers
//!
//! Each tick one gossiper is chosen and asked for every put with an index
//! beyond what we have already applied from it. Replayed puts are routed
//! through the same receive handlers as live requests, including full
//! re-validation: peers do not trust each other's validation results. The
//! last-known index for a gossiper only advances on successfully applied
//! puts, and fingerprints make replays no-ops.

use crate::dht::DhtError;
use crate::engine::Engine;
use crate::error::CoreError;
use std::sync::Arc;
use strand_model::msg::{Message, MsgBody, MsgKind, PeerId, Put};
use tracing::{debug, warn};

impl Engine {
    /// Make a peer eligible for gossip selection.
    pub fn add_gossiper(&self, peer: &PeerId) -> Result<(), CoreError> {
        let known = self.dht.list_gossipers()?.iter().any(|(p, _)| p == peer);
        if !known {
            self.dht.update_gossiper(peer, 0)?;
        }
        Ok(())
    }

    /// One reconciliation round with one gossiper.
    ///
    /// `NoGossipersAvailable` is not fatal; the ticker just tries again
    /// next period.
    pub async fn gossip_tick(&self) -> Result<(), CoreError> {
        let (peer, last_seen) = self.dht.find_gossiper()?;
        let my_idx = self.dht.get_idx()?;
        debug!(peer = %peer, last_seen, my_idx, "gossiping");

        let body = MsgBody::GossipReq { from: self.peer_id(), your_idx: last_seen, my_idx };
        let reply = self.send_msg(&peer, Message::new(MsgKind::GossipReq, self.peer_id(), body)).await?;
        let puts = match reply.body {
            MsgBody::Gossip { puts } => puts,
            other => {
                return Err(CoreError::ProtocolMismatch(format!(
                    "unexpected gossip response body: {other:?}"
                )))
            }
        };
        self.apply_gossip(&peer, puts).await
    }

    /// Apply a gossiper's puts in its log order, advancing the last-known
    /// index only past puts that applied cleanly.
    async fn apply_gossip(&self, peer: &PeerId, puts: Vec<Put>) -> Result<(), CoreError> {
        for put in puts {
            match self.apply_change_msg(&put.msg).await {
                Ok(status) => {
                    debug!(peer = %peer, idx = put.idx, status, "applied gossiped put");
                    if put.idx > self.dht.get_gossiper(peer)? {
                        self.dht.update_gossiper(peer, put.idx)?;
                    }
                }
                Err(e) => {
                    // stop here; the remainder is retried next tick so the
                    // source's order is preserved
                    warn!(peer = %peer, idx = put.idx, "gossiped put failed: {e}");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Serve a gossip request: everything in our log past what the
    /// requester has seen.
    pub(crate) fn handle_gossip_req(
        &self,
        from: &PeerId,
        your_idx: u64,
    ) -> Result<Message, CoreError> {
        // learning about a requester makes gossip bidirectional
        self.add_gossiper(from)?;
        let puts = self.dht.get_puts(your_idx)?;
        debug!(from = %from, your_idx, count = puts.len(), "serving gossip request");
        Ok(self.reply(MsgKind::Gossip, MsgBody::Gossip { puts }))
    }
}

/// Run the gossip ticker until aborted.
pub fn spawn_gossip_loop(engine: Arc<Engine>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(engine.config.gossip_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match engine.gossip_tick().await {
                Ok(()) => {}
                Err(CoreError::Dht(DhtError::NoGossipersAvailable)) => {
                    // nothing to reconcile with yet
                }
                Err(e) => warn!("gossip tick failed: {e}"),
            }
        }
    })
}
