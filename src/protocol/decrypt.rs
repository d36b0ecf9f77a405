//! Partial decryption of the last mix. Every node checks the whole chain
//! first; a node that cannot vouch for it contributes a flagged partial.
use log::{info, warn};

use crate::crypto::dkg::Index;
use crate::crypto::elgamal::PublicKey;
use crate::crypto::keymaker::Keymaker;
use crate::data::artifact::*;
use crate::error::{Error, ProtocolError};
use crate::protocol::message::{Message, Outcome, Round};
use crate::protocol::node::{Conode, Handled};
use crate::protocol::roster::NodeId;
use crate::protocol::session::Session;
use crate::protocol::shuffle::verify_chain;

pub fn decrypt_label(election: &ElectionId) -> Vec<u8> {
    let mut label = b"nevv/decrypt/".to_vec();
    label.extend(election.as_bytes());
    label
}

impl Conode {
    pub(crate) fn on_decrypt_prompt(&self, s: &mut Session) -> Result<Handled, Error> {
        let stored = self
            .board
            .partials(&s.election)?
            .into_iter()
            .find(|p| p.index == s.index);
        let flag = match stored {
            Some(partial) => {
                info!(">> Partial of node {} already stored", s.index);
                partial.flag
            }
            None => {
                let partial = self.partial(s)?;
                let flag = partial.flag;
                self.board.add(&s.election, &Record::Partial(partial))?;
                flag
            }
        };

        let terminate = Message::Terminate {
            round: Round::Decrypt,
            index: s.index,
            outcome: Outcome::Decrypted { flag },
        };
        self.send_root(s, terminate)?;

        Ok(Handled::Done)
    }

    fn partial(&self, s: &Session) -> Result<Partial, Error> {
        let election = self.board.election(&s.election)?;
        let ballots = self.board.get_box(&s.election)?;
        let mixes = self.board.mixes(&s.election)?;

        let shared = match s.shared.as_ref() {
            Some(shared) => shared,
            None => {
                warn!(">> Node {} holds no key share, flagging", s.index);
                return Ok(Partial::failed(s.index, self.id()));
            }
        };
        if mixes.len() != s.n() {
            warn!(
                ">> Node {} sees {} mixes of {}, flagging",
                s.index,
                mixes.len(),
                s.n()
            );
            return Ok(Partial::failed(s.index, self.id()));
        }
        let key = PublicKey::from(&election.key);
        if let Err(e) = verify_chain(&s.election, &key, &ballots, &mixes) {
            warn!(">> Node {} rejects the mix chain, flagging: {}", s.index, e);
            return Ok(Partial::failed(s.index, self.id()));
        }

        let last = mixes
            .last()
            .ok_or_else(|| ProtocolError::Phase("no mixes".to_string()))?;
        let keymaker = Keymaker::from_shared(shared);
        let (points, proofs) = keymaker.decryption_factor_many(&last.ciphertexts(), &decrypt_label(&s.election));
        info!(">> Node {} decrypted {} ballots", s.index, points.len());

        Ok(Partial {
            points,
            proofs,
            index: s.index,
            flag: false,
            node: self.id(),
        })
    }

    pub(crate) fn on_decrypt_terminate(
        &self,
        s: &mut Session,
        from: &NodeId,
        index: Index,
        outcome: &Outcome,
    ) -> Result<Handled, Error> {
        s.check_sender(from, index)?;
        info!(">> Decryption terminated at node {}: {:?}", index, outcome);
        let n = s.n();
        let coordinator = s.coordinator()?;
        coordinator.decrypted.insert(index);
        if coordinator.decrypted.len() == n {
            if let Some(promise) = coordinator.decrypt.as_ref() {
                promise.fulfil(n);
            }
        }

        Ok(Handled::Done)
    }
}
