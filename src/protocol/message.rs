use curve25519_dalek::ristretto::RistrettoPoint;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::crypto::dkg::{Deal, Index, Justification, Response, SecretCommit};
use crate::crypto::zkp::Schnorr;
use crate::data::artifact::ElectionId;
use crate::protocol::roster::{NodeId, Roster};

#[derive(Serialize, Deserialize, Display, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Round {
    Shuffle,
    Decrypt,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum DkgOutcome {
    Done {
        public: RistrettoPoint,
        commits: Vec<RistrettoPoint>,
    },
    /// Size of QUAL when it ended up too small.
    BelowThreshold(usize),
    Failed(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Number of mixes on the ledger after this node's pass.
    Mixed(usize),
    Decrypted { flag: bool },
    Failed(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Display)]
pub enum Message {
    /// Root to all: set up a DKG session.
    Init { roster: Roster, threshold: u32 },
    /// Node to root: ephemeral DKG key with proof of possession.
    InitReply {
        index: Index,
        public: RistrettoPoint,
        proof: Schnorr,
    },
    /// Root to all: every ephemeral key, in roster order.
    StartDeal {
        publics: Vec<RistrettoPoint>,
        threshold: u32,
    },
    Deal(Deal),
    Response(Response),
    Justification(Justification),
    SecretCommit(SecretCommit),
    /// Node to root: DKG finished on that node.
    Ready { index: Index, outcome: DkgOutcome },
    /// Root to all: the election was not opened, drop its session.
    Abort,
    Prompt { round: Round },
    Terminate {
        round: Round,
        index: Index,
        outcome: Outcome,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Envelope {
    pub election: ElectionId,
    pub from: NodeId,
    pub message: Message,
}

impl Envelope {
    pub fn new(election: ElectionId, from: NodeId, message: Message) -> Envelope {
        Envelope {
            election,
            from,
            message,
        }
    }
}
