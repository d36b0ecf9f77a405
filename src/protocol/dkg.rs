//! Drives `crypto::dkg` over the transport.
//!
//! The root collects ephemeral keys, announces them with `StartDeal`, and
//! later gathers one `Ready` per node. Everything in between is peer to
//! peer; messages that arrive ahead of the state they need are deferred.
use std::time::Instant;

use curve25519_dalek::ristretto::RistrettoPoint;
use log::{info, warn};

use crate::crypto::backend::ristretto_b::RistrettoGroup;
use crate::crypto::dkg::{Deal, DistKeyGenerator, Index, Justification, Response, SecretCommit};
use crate::crypto::zkp::Schnorr;
use crate::data::artifact::ElectionId;
use crate::error::{CryptoError, Error, ProtocolError, ThresholdError};
use crate::protocol::message::{DkgOutcome, Envelope, Message};
use crate::protocol::node::{Conode, Handled};
use crate::protocol::roster::{NodeId, Roster};
use crate::protocol::session::{lock, Session, Setup};

/// Binds a proof of possession to the election and the claimed position.
pub fn init_label(election: &ElectionId, index: Index) -> Vec<u8> {
    let mut label = election.as_bytes().to_vec();
    label.extend(&index.to_le_bytes());
    label
}

impl Conode {
    pub(crate) fn on_init(
        &self,
        election: &ElectionId,
        from: &NodeId,
        roster: &Roster,
        threshold: u32,
    ) -> Result<(), Error> {
        if !roster.is_root(from) {
            return Err(ProtocolError::UnknownNode(from.to_string()).into());
        }
        let index = roster
            .position(&self.id())
            .ok_or_else(|| ProtocolError::UnknownNode(self.id().to_string()))?;
        let session = self.registry.get_or_insert_with(election, || {
            Session::new(*election, roster.clone(), index as Index, threshold)
        })?;
        let mut s = lock(&session)?;
        if s.replied {
            return Err(ProtocolError::Phase(format!("repeated init for {}", election)).into());
        }
        let ephemeral = s
            .ephemeral
            .as_ref()
            .ok_or_else(|| ProtocolError::Phase("ephemeral key already consumed".to_string()))?;
        let group = RistrettoGroup;
        let public = ephemeral.public_value;
        let proof = group.schnorr_prove(&ephemeral.value, &public, &init_label(election, s.index));
        info!(">> Node {} joining DKG for {}", s.index, election);

        let reply = Message::InitReply {
            index: s.index,
            public,
            proof,
        };
        self.send_root(&s, reply)?;
        s.replied = true;

        Ok(())
    }

    pub(crate) fn on_init_reply(
        &self,
        s: &mut Session,
        from: &NodeId,
        index: Index,
        public: &RistrettoPoint,
        proof: &Schnorr,
    ) -> Result<Handled, Error> {
        s.check_sender(from, index)?;
        let group = RistrettoGroup;
        if !group.schnorr_verify(public, proof, &init_label(&s.election, index)) {
            return Err(CryptoError::Proof(format!("ephemeral key of node {}", index)).into());
        }
        let threshold = s.threshold;
        let coordinator = s.coordinator()?;
        let slot = &mut coordinator.publics[index as usize];
        if slot.is_some() {
            return Err(ProtocolError::DuplicateIndex(index).into());
        }
        *slot = Some(*public);

        let publics: Option<Vec<RistrettoPoint>> = coordinator.publics.iter().cloned().collect();
        if let Some(publics) = publics {
            info!(">> All {} ephemeral keys in, starting deals", publics.len());
            let start = Message::StartDeal { publics, threshold };
            let ids = s.roster.ids();
            self.transport
                .broadcast_to(&ids, Envelope::new(s.election, self.id(), start))?;
        }

        Ok(Handled::Done)
    }

    pub(crate) fn on_start_deal(
        &self,
        s: &mut Session,
        publics: &[RistrettoPoint],
        threshold: u32,
    ) -> Result<Handled, Error> {
        if s.generator.is_some() {
            return Err(ProtocolError::Phase("repeated deal start".to_string()).into());
        }
        if publics.len() != s.n() {
            return Err(ProtocolError::Participants(publics.len(), s.n()).into());
        }
        let ephemeral = s
            .ephemeral
            .take()
            .ok_or_else(|| ProtocolError::Phase("ephemeral key already consumed".to_string()))?;
        let mut generator = DistKeyGenerator::new(
            s.election.as_bytes(),
            s.index,
            threshold as usize,
            ephemeral,
            publics.to_vec(),
            std::sync::Arc::clone(&self.keypair),
            s.roster.verifiers(),
        )?;
        let deals = generator.deals()?;
        s.generator = Some(generator);
        info!(">> Node {} sending {} deals", s.index, deals.len());

        for deal in deals {
            let recipient = deal.recipient as usize;
            self.send(s, recipient, Message::Deal(deal))?;
        }

        Ok(Handled::Done)
    }

    pub(crate) fn on_deal(&self, s: &mut Session, deal: &Deal) -> Result<Handled, Error> {
        let generator = match s.generator.as_mut() {
            Some(g) => g,
            None => return Ok(Handled::Defer),
        };
        let response = generator.process_deal(deal)?;
        self.send_others(s, Message::Response(response))?;

        Ok(Handled::Done)
    }

    pub(crate) fn on_response(&self, s: &mut Session, response: &Response) -> Result<Handled, Error> {
        let generator = match s.generator.as_mut() {
            Some(g) if g.has_deal(response.dealer) => g,
            _ => return Ok(Handled::Defer),
        };
        if let Some(justification) = generator.process_response(response)? {
            // the dealer judges its own justification like every other node
            let ids = s.roster.ids();
            let envelope = Envelope::new(s.election, self.id(), Message::Justification(justification));
            self.transport.broadcast_to(&ids, envelope)?;
        }

        Ok(Handled::Done)
    }

    pub(crate) fn on_justification(
        &self,
        s: &mut Session,
        justification: &Justification,
    ) -> Result<Handled, Error> {
        let generator = match s.generator.as_mut() {
            Some(g) if g.has_complaint(justification.dealer, justification.verifier) => g,
            _ => return Ok(Handled::Defer),
        };
        generator.process_justification(justification)?;

        Ok(Handled::Done)
    }

    pub(crate) fn on_secret_commit(&self, s: &mut Session, commit: &SecretCommit) -> Result<Handled, Error> {
        let generator = match s.generator.as_mut() {
            Some(g) if g.certified() => g,
            _ => return Ok(Handled::Defer),
        };
        generator.process_secret_commits(commit)?;

        Ok(Handled::Done)
    }

    pub(crate) fn on_ready(
        &self,
        s: &mut Session,
        from: &NodeId,
        index: Index,
        outcome: &DkgOutcome,
    ) -> Result<Handled, Error> {
        s.check_sender(from, index)?;
        let n = s.n();
        let threshold = s.threshold as usize;
        let election = s.election;
        let coordinator = s.coordinator()?;
        if coordinator.readies.insert(index, outcome.clone()).is_some() {
            return Err(ProtocolError::DuplicateIndex(index).into());
        }
        if coordinator.readies.len() < n {
            return Ok(Handled::Done);
        }

        let mut keys = vec![];
        let mut qual = None;
        for outcome in coordinator.readies.values() {
            match outcome {
                DkgOutcome::Done { public, commits } => keys.push((*public, commits.clone())),
                DkgOutcome::BelowThreshold(size) => qual = Some(*size),
                DkgOutcome::Failed(reason) => warn!(">> A node failed the DKG: {}", reason),
            }
        }
        let setup = if let Some(size) = qual {
            Setup::BelowThreshold(size, threshold)
        } else if keys.len() < threshold + 1 {
            Setup::BelowThreshold(keys.len(), threshold)
        } else if keys.iter().any(|k| *k != keys[0]) {
            Setup::Mismatch
        } else {
            let (public, commits) = keys.swap_remove(0);
            Setup::Done { public, commits }
        };
        info!(">> DKG for {} concluded: {:?}", election, setup);
        coordinator.setup.fulfil(setup);

        Ok(Handled::Done)
    }

    pub(crate) fn on_abort(&self, s: &mut Session, from: &NodeId) -> Result<Handled, Error> {
        if !s.roster.is_root(from) {
            return Err(ProtocolError::UnknownNode(from.to_string()).into());
        }
        info!(">> Node {} dropping session {}", s.index, s.election);
        s.reported = true;
        s.pending.clear();
        self.registry.remove(&s.election)?;

        Ok(Handled::Done)
    }

    /// Advances this node's DKG past certification and completion. Returns
    /// whether anything changed. Failures end the run and are reported to
    /// the root.
    pub(crate) fn dkg_progress(&self, s: &mut Session) -> bool {
        if s.reported || s.generator.is_none() {
            return false;
        }
        match self.try_dkg_progress(s) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(">> DKG failed at node {}: {}", s.index, e);
                let outcome = match e {
                    Error::Threshold(ThresholdError::Qual(size, _)) => DkgOutcome::BelowThreshold(size),
                    other => DkgOutcome::Failed(other.to_string()),
                };
                self.report(s, outcome);
                true
            }
        }
    }

    fn report(&self, s: &mut Session, outcome: DkgOutcome) {
        s.reported = true;
        let ready = Message::Ready {
            index: s.index,
            outcome,
        };
        if let Err(e) = self.send_root(s, ready) {
            warn!(">> Node {} could not report to root: {}", s.index, e);
        }
    }

    fn try_dkg_progress(&self, s: &mut Session) -> Result<bool, Error> {
        let deadline = self.config.justification_deadline();
        let mut changed = false;
        let generator = match s.generator.as_mut() {
            Some(g) => g,
            None => return Ok(false),
        };

        if generator.unresolved().is_empty() {
            s.complaints_since = None;
        } else {
            match s.complaints_since {
                None => s.complaints_since = Some(Instant::now()),
                Some(since) if since.elapsed() > deadline => {
                    generator.expire_justifications();
                    s.complaints_since = None;
                    changed = true;
                }
                Some(_) => {}
            }
        }

        if generator.certified() && !s.committed {
            s.committed = true;
            changed = true;
            if generator.in_qual() {
                let commit = generator.secret_commits()?;
                generator.process_secret_commits(&commit)?;
                let me = self.id();
                let roster = &s.roster;
                let qual: Vec<NodeId> = generator
                    .qual()
                    .iter()
                    .filter_map(|i| roster.get(*i as usize))
                    .map(|node| node.id)
                    .filter(|id| *id != me)
                    .collect();
                let envelope = Envelope::new(s.election, me, Message::SecretCommit(commit));
                self.transport.broadcast_to(&qual, envelope)?;
            } else {
                return Err(ProtocolError::Phase(format!("node {} excluded from QUAL", s.index)).into());
            }
        }

        if s.committed && generator.commits_complete() {
            let shared = generator.finalize()?;
            info!(
                ">> Node {} finished DKG, QUAL {:?}",
                s.index,
                generator.qual()
            );
            let outcome = DkgOutcome::Done {
                public: shared.public,
                commits: shared.commits.clone(),
            };
            s.shared = Some(shared);
            self.report(s, outcome);
            changed = true;
        }

        Ok(changed)
    }
}
