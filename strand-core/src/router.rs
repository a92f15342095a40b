//! Protocol router - the remote side of the action pipeline
//!
//! Classifies every inbound message by kind, checks that the body matches
//! the kind's expected shape, and dispatches to the action receive handler
//! or the gossip handler. Change requests (put/del/link/del-link) are
//! deduplicated by message fingerprint before anything mutates; receiving
//! peers re-run both system and application validation, because peers do
//! not trust each other's validation results.

use crate::dht::DhtError;
use crate::engine::Engine;
use crate::error::CoreError;
use crate::schema;
use crate::transport::MsgReceiver;
use async_trait::async_trait;
use strand_model::entry::{is_system_type, EntryFormat, KEY_ENTRY_TYPE};
use strand_model::hash::Hash;
use strand_model::msg::{Link, Message, MsgBody, MsgKind, TaggedHash};
use tracing::{debug, warn};

#[async_trait]
impl MsgReceiver for Engine {
    async fn receive(&self, msg: Message) -> Message {
        self.receive_inner(msg).await
    }
}

impl Engine {
    pub(crate) fn reply(&self, kind: MsgKind, body: MsgBody) -> Message {
        Message::new(kind, self.peer_id(), body)
    }

    fn ok_reply(&self, status: &str) -> Message {
        self.reply(MsgKind::Response, MsgBody::Ok(status.to_string()))
    }

    fn err_reply(&self, reason: String) -> Message {
        self.reply(MsgKind::ErrorResponse, MsgBody::Err(reason))
    }

    /// Handle one inbound message, always producing a reply.
    pub async fn receive_inner(&self, msg: Message) -> Message {
        let kind = msg.kind;
        match self.route(msg).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(?kind, "request failed: {e}");
                self.err_reply(e.to_string())
            }
        }
    }

    async fn route(&self, msg: Message) -> Result<Message, CoreError> {
        match (msg.kind, &msg.body) {
            (MsgKind::Get, MsgBody::GetReq { h }) => self.handle_get(&h.clone()),
            (MsgKind::GetLink, MsgBody::LinkQuery { base, tag }) => {
                self.handle_link_query(&base.clone(), &tag.clone())
            }
            (MsgKind::ValidatePut, MsgBody::ValidateQuery { h }) => {
                self.handle_validate_put(&h.clone()).await
            }
            (MsgKind::ValidateLink, MsgBody::ValidateQuery { h }) => {
                self.handle_validate_link(&h.clone()).await
            }
            (MsgKind::GossipReq, MsgBody::GossipReq { from, your_idx, .. }) => {
                self.handle_gossip_req(&from.clone(), *your_idx)
            }
            (MsgKind::Put, MsgBody::PutReq { .. })
            | (MsgKind::Del, MsgBody::DelReq { .. })
            | (MsgKind::Link, MsgBody::LinkReq { .. })
            | (MsgKind::DelLink, MsgBody::DelLinkReq { .. }) => {
                let status = self.apply_change_msg(&msg).await?;
                Ok(self.ok_reply(status))
            }
            (kind, body) => Err(CoreError::ProtocolMismatch(format!(
                "unexpected body {} in {kind:?} request",
                body_name(body)
            ))),
        }
    }

    // -----------------------------------------------------------
    // reads

    fn handle_get(&self, hash: &Hash) -> Result<Message, CoreError> {
        use crate::dht::RecordStatus;
        match self.dht.get(hash) {
            Ok(record) => match record.status {
                RecordStatus::Live | RecordStatus::Modified => Ok(self.reply(
                    MsgKind::Response,
                    MsgBody::GetResponse { entry: record.entry, entry_type: record.entry_type },
                )),
                RecordStatus::Deleted => Err(CoreError::HashDeleted),
            },
            Err(DhtError::NotFound) => Err(CoreError::HashNotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn handle_link_query(&self, base: &Hash, tag: &str) -> Result<Message, CoreError> {
        let links = self
            .dht
            .get_links(base, tag)?
            .into_iter()
            .map(|l| TaggedHash { h: l.target, e: None, t: l.tag })
            .collect();
        Ok(self.reply(MsgKind::Response, MsgBody::LinkQueryResp { links }))
    }

    /// Serve the authoring header and entry for a validate-put fetch. The
    /// virtual key record is answered from the agent identity; its
    /// provenance header is the `%agent` one.
    async fn handle_validate_put(&self, hash: &Hash) -> Result<Message, CoreError> {
        if *hash == self.key_entry_hash()? {
            let chain = self.chain.read().await;
            let (_, agent_header) = chain
                .top_of_type(strand_model::entry::AGENT_ENTRY_TYPE)
                .ok_or(CoreError::NotStarted)?;
            return Ok(self.reply(
                MsgKind::Response,
                MsgBody::ValidateResponse {
                    entry_type: KEY_ENTRY_TYPE.to_string(),
                    entry: self.key_entry(),
                    header: agent_header.clone(),
                },
            ));
        }

        let chain = self.chain.read().await;
        let (_, header) = chain.get_entry_header(hash).ok_or(CoreError::HashNotFound)?;
        let entry = chain.get_entry(hash).ok_or(CoreError::HashNotFound)?;
        Ok(self.reply(
            MsgKind::Response,
            MsgBody::ValidateResponse {
                entry_type: entry.entry_type.clone(),
                entry: entry.clone(),
                header: header.clone(),
            },
        ))
    }

    /// Serve the parsed links of a linking entry for a validate-link fetch.
    async fn handle_validate_link(&self, hash: &Hash) -> Result<Message, CoreError> {
        let chain = self.chain.read().await;
        let entry = chain.get_entry(hash).ok_or(CoreError::HashNotFound)?;
        if entry.format != EntryFormat::Links {
            return Err(CoreError::ValidationFailed(format!(
                "entry {hash} is not a links entry"
            )));
        }
        let content = strand_model::entry::parse_links(&entry.content)?;
        let mut links = Vec::with_capacity(content.links.len());
        for spec in &content.links {
            links.push(Link {
                base: Hash::from_b58(&spec.base)?,
                target: Hash::from_b58(&spec.link)?,
                tag: spec.tag.clone(),
            });
        }
        Ok(self.reply(
            MsgKind::Response,
            MsgBody::ValidateLinkResponse { entry_type: entry.entry_type.clone(), links },
        ))
    }

    // -----------------------------------------------------------
    // change requests

    /// Apply one change request, idempotently by fingerprint. Used both by
    /// the router for live requests and by gossip for replayed puts.
    pub(crate) async fn apply_change_msg(&self, msg: &Message) -> Result<&'static str, CoreError> {
        self.check_poisoned()?;
        let fingerprint = msg.fingerprint(&self.spec)?;
        if self.dht.have_fingerprint(&fingerprint)? {
            return Ok("queued");
        }
        match (&msg.kind, &msg.body) {
            (MsgKind::Put, MsgBody::PutReq { h }) => self.handle_put(msg, &h.clone()).await,
            (MsgKind::Del, MsgBody::DelReq { h }) => self.handle_del(msg, &h.clone()).await,
            (MsgKind::Link, MsgBody::LinkReq { base, links }) => {
                self.handle_link(msg, &base.clone(), &links.clone()).await
            }
            (MsgKind::DelLink, MsgBody::DelLinkReq { base, link, tag }) => {
                self.handle_del_link(msg, &base.clone(), &link.clone(), &tag.clone()).await
            }
            (kind, body) => Err(CoreError::ProtocolMismatch(format!(
                "unexpected body {} in {kind:?} change request",
                body_name(body)
            ))),
        }
    }

    /// Remote put: fetch the authoring header from the source, re-run
    /// system and application validation, insert the record as Live.
    async fn handle_put(&self, msg: &Message, hash: &Hash) -> Result<&'static str, CoreError> {
        if self.dht.get(hash).is_ok() {
            // already hold a record for this address; just log the put
            self.dht.record_change(msg)?;
            return Ok("queued");
        }

        let query = self.reply(MsgKind::ValidatePut, MsgBody::ValidateQuery { h: hash.clone() });
        let reply = self.send_msg(&msg.from, query).await?;
        let (entry_type, entry, header) = match reply.body {
            MsgBody::ValidateResponse { entry_type, entry, header } => (entry_type, entry, header),
            other => {
                return Err(CoreError::ProtocolMismatch(format!(
                    "unexpected validate response body: {other:?}"
                )))
            }
        };

        if entry.sum(&self.spec)? != *hash {
            return Err(CoreError::ValidationFailed(
                "entry does not hash to the requested address".into(),
            ));
        }

        if is_system_type(&entry_type) {
            // system records carry their provenance in the chain; the key
            // record is virtual and vouched for by the agent header
            if entry_type != KEY_ENTRY_TYPE && header.entry_hash != *hash {
                return Err(CoreError::ValidationFailed("header does not link entry".into()));
            }
        } else {
            let (zome, def) = self.dna.entry_def(&entry_type)?;
            schema::sys_validate_entry(def, &entry)?;
            if header.entry_hash != *hash {
                return Err(CoreError::ValidationFailed("header does not link entry".into()));
            }
            let author_key = crate::agent::Agent::verifying_key_of(&msg.from)?;
            header
                .verify(&author_key)
                .map_err(|_| CoreError::ValidationFailed("bad signature on header".into()))?;

            let nucleus = self.registry.make(zome).map_err(CoreError::from)?;
            let sources = self.sources_of(&msg.from);
            let ok = self
                .run_nucleus(nucleus.validate_put(self, def, &entry, &header, &sources))
                .await?;
            if !ok {
                return Err(CoreError::ValidationFailed(format!(
                    "Invalid entry: {}",
                    entry.content
                )));
            }
        }

        let idx = self.dht.record_change(msg)?;
        self.dht.put(hash, entry, &entry_type, &msg.from, idx)?;
        debug!(hash = %hash, entry_type = %entry_type, idx, "recorded put");
        Ok("queued")
    }

    /// Remote del: validate with the nucleus, then Live → Deleted.
    async fn handle_del(&self, msg: &Message, hash: &Hash) -> Result<&'static str, CoreError> {
        let record = match self.dht.get(hash) {
            Ok(r) => r,
            Err(DhtError::NotFound) => return Err(CoreError::HashNotFound),
            Err(e) => return Err(e.into()),
        };

        if !is_system_type(&record.entry_type) {
            let (zome, _def) = self.dna.entry_def(&record.entry_type)?;
            let nucleus = self.registry.make(zome).map_err(CoreError::from)?;
            let sources = self.sources_of(&msg.from);
            let ok = self
                .run_nucleus(nucleus.validate_del(self, &record.entry_type, hash, &sources))
                .await?;
            if !ok {
                return Err(CoreError::ValidationFailed(format!("deletion of {hash} rejected")));
            }
        }

        self.dht.record_change(msg)?;
        self.dht.update_status(hash, crate::dht::RecordStatus::Deleted)?;
        debug!(hash = %hash, "record deleted");
        Ok("queued")
    }

    /// Remote link: the base must be Live here; fetch the linking entry
    /// from the source, validate every link on this base, insert them.
    async fn handle_link(
        &self,
        msg: &Message,
        base: &Hash,
        linking_entry: &Hash,
    ) -> Result<&'static str, CoreError> {
        if !self.dht.exists(base)? {
            debug!(base = %base, "link base unknown here, ignoring");
            return Ok("ignored");
        }

        let query =
            self.reply(MsgKind::ValidateLink, MsgBody::ValidateQuery { h: linking_entry.clone() });
        let reply = self.send_msg(&msg.from, query).await?;
        let (entry_type, links) = match reply.body {
            MsgBody::ValidateLinkResponse { entry_type, links } => (entry_type, links),
            other => {
                return Err(CoreError::ProtocolMismatch(format!(
                    "unexpected validate-link response body: {other:?}"
                )))
            }
        };

        let matching: Vec<&Link> = links.iter().filter(|l| l.base == *base).collect();
        if matching.is_empty() {
            return Err(CoreError::ValidationFailed(format!(
                "linking entry {linking_entry} has no links on base {base}"
            )));
        }

        let (zome, _def) = self.dna.entry_def(&entry_type)?;
        let nucleus = self.registry.make(zome).map_err(CoreError::from)?;
        let sources = self.sources_of(&msg.from);
        for link in &matching {
            let ok = self
                .run_nucleus(nucleus.validate_link(
                    self,
                    &entry_type,
                    &link.base,
                    &link.target,
                    &link.tag,
                    &sources,
                ))
                .await?;
            if !ok {
                return Err(CoreError::ValidationFailed(format!(
                    "link ({base} -[{}]-> {}) rejected",
                    link.tag, link.target
                )));
            }
        }

        self.dht.record_change(msg)?;
        for link in matching {
            self.dht.put_link(&link.base, &link.target, &link.tag, &msg.from)?;
        }
        debug!(base = %base, linking_entry = %linking_entry, "links recorded");
        Ok("queued")
    }

    /// Remote del-link: validate with every zome's nucleus, then Live →
    /// Deleted on the matching link.
    async fn handle_del_link(
        &self,
        msg: &Message,
        base: &Hash,
        target: &Hash,
        tag: &str,
    ) -> Result<&'static str, CoreError> {
        if !self.dht.exists(base)? {
            return Err(CoreError::HashNotFound);
        }

        let sources = self.sources_of(&msg.from);
        for zome in &self.dna.zomes {
            let nucleus = self.registry.make(zome).map_err(CoreError::from)?;
            let ok = self
                .run_nucleus(nucleus.validate_del_link(self, base, target, tag, &sources))
                .await?;
            if !ok {
                return Err(CoreError::ValidationFailed(format!(
                    "deletion of link ({base} -[{tag}]-> {target}) rejected"
                )));
            }
        }

        match self.dht.del_link(base, target, tag) {
            Ok(()) => {
                self.dht.record_change(msg)?;
                Ok("queued")
            }
            Err(DhtError::NotFound) => Err(CoreError::HashNotFound),
            Err(e) => Err(e.into()),
        }
    }
}

fn body_name(body: &MsgBody) -> &'static str {
    match body {
        MsgBody::GetReq { .. } => "GetReq",
        MsgBody::PutReq { .. } => "PutReq",
        MsgBody::DelReq { .. } => "DelReq",
        MsgBody::LinkReq { .. } => "LinkReq",
        MsgBody::DelLinkReq { .. } => "DelLinkReq",
        MsgBody::LinkQuery { .. } => "LinkQuery",
        MsgBody::LinkQueryResp { .. } => "LinkQueryResp",
        MsgBody::ValidateQuery { .. } => "ValidateQuery",
        MsgBody::ValidateResponse { .. } => "ValidateResponse",
        MsgBody::ValidateLinkResponse { .. } => "ValidateLinkResponse",
        MsgBody::GossipReq { .. } => "GossipReq",
        MsgBody::Gossip { .. } => "Gossip",
        MsgBody::GetResponse { .. } => "GetResponse",
        MsgBody::Ok(_) => "Ok",
        MsgBody::Err(_) => "Err",
    }
}
