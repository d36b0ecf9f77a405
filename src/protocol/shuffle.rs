//! The mix chain: node `i` shuffles what node `i - 1` stored and prompts
//! node `i + 1`; the last node reports to the root.
use log::{info, warn};
use rayon::prelude::*;

use crate::crypto::dkg::Index;
use crate::crypto::elgamal::{Ciphertext, PublicKey};
use crate::crypto::shuffler::{self, ShuffleProof};
use crate::data::artifact::*;
use crate::data::bytes::{Deser, Ser};
use crate::error::{CryptoError, Error, ProtocolError};
use crate::protocol::message::{Message, Outcome, Round};
use crate::protocol::node::{Conode, Handled};
use crate::protocol::roster::NodeId;
use crate::protocol::session::Session;

/// Commitment generators and challenges of mix `index` are bound to it.
pub fn mix_label(election: &ElectionId, index: usize) -> Vec<u8> {
    let mut label = b"nevv/mix/".to_vec();
    label.extend(election.as_bytes());
    label.extend(&(index as u64).to_le_bytes());
    label
}

/// Verifies every link from the cast box through the last mix.
pub fn verify_chain(
    election: &ElectionId,
    key: &PublicKey,
    ballots: &BallotBox,
    mixes: &[Mix],
) -> Result<(), CryptoError> {
    let mut inputs: Vec<Vec<Ciphertext>> = vec![ballots.ciphertexts()];
    inputs.extend(mixes.iter().map(|m| m.ciphertexts()));

    mixes
        .par_iter()
        .enumerate()
        .map(|(i, mix)| {
            let proof = ShuffleProof::deser(&mix.proof)
                .map_err(|e| CryptoError::Proof(format!("mix {} proof encoding: {}", i, e)))?;
            let ok = shuffler::verify_ciphertexts(
                &proof,
                key,
                &inputs[i],
                &inputs[i + 1],
                &mix_label(election, i),
            );
            if ok {
                Ok(())
            } else {
                Err(CryptoError::Proof(format!("mix {} of election {}", i, election)))
            }
        })
        .collect()
}

impl Conode {
    pub(crate) fn on_shuffle_prompt(&self, s: &mut Session) -> Result<Handled, Error> {
        let index = s.index as usize;
        let outcome = match self.mix(s) {
            Ok(count) => Outcome::Mixed(count),
            Err(e) => {
                warn!(">> Node {} could not shuffle: {}", index, e);
                let terminate = Message::Terminate {
                    round: Round::Shuffle,
                    index: s.index,
                    outcome: Outcome::Failed(e.to_string()),
                };
                self.send_root(s, terminate)?;
                return Ok(Handled::Done);
            }
        };

        match s.roster.next(index) {
            Some(next) => self.send(
                s,
                next,
                Message::Prompt {
                    round: Round::Shuffle,
                },
            )?,
            None => self.send_root(
                s,
                Message::Terminate {
                    round: Round::Shuffle,
                    index: s.index,
                    outcome,
                },
            )?,
        }

        Ok(Handled::Done)
    }

    /// Stores this node's mix unless a previous attempt already did.
    fn mix(&self, s: &Session) -> Result<usize, Error> {
        let index = s.index as usize;
        let election = self.board.election(&s.election)?;
        let mixes = self.board.mixes(&s.election)?;
        if mixes.len() > index {
            info!(">> Mix {} already stored, forwarding", index);
            return Ok(mixes.len());
        }
        if mixes.len() < index {
            return Err(ProtocolError::Phase(format!(
                "prompted for mix {} with only {} stored",
                index,
                mixes.len()
            ))
            .into());
        }
        let input = match mixes.last() {
            Some(previous) => previous.ciphertexts(),
            None => self.board.get_box(&s.election)?.ciphertexts(),
        };

        let key = PublicKey::from(&election.key);
        let (outputs, proof) = shuffler::shuffle_ciphertexts(&key, &input, &mix_label(&s.election, index))?;
        let mix = Mix {
            ballots: outputs.iter().map(Ballot::from_ciphertext).collect(),
            proof: proof.ser()?,
            node: self.id(),
        };
        self.board.add(&s.election, &Record::Mix(mix))?;
        info!(">> Node {} stored mix of {} ballots", index, outputs.len());

        Ok(index + 1)
    }

    pub(crate) fn on_shuffle_terminate(
        &self,
        s: &mut Session,
        from: &NodeId,
        index: Index,
        outcome: &Outcome,
    ) -> Result<Handled, Error> {
        s.check_sender(from, index)?;
        info!(">> Shuffle terminated at node {}: {:?}", index, outcome);
        if let Some(promise) = s.coordinator()?.shuffle.as_ref() {
            promise.fulfil(outcome.clone());
        }

        Ok(Handled::Done)
    }
}
