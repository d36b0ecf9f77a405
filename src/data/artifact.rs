use curve25519_dalek::ristretto::RistrettoPoint;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::elgamal::Ciphertext;
use crate::crypto::zkp::ChaumPedersen;
use crate::election::Stage;
use crate::protocol::roster::{NodeId, Roster};

pub type ElectionId = Uuid;
pub type User = u32;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Ballot {
    pub user: User,
    pub alpha: RistrettoPoint,
    pub beta: RistrettoPoint,
    pub text: Option<Vec<u8>>,
}

impl Ballot {
    pub fn ciphertext(&self) -> Ciphertext {
        Ciphertext {
            alpha: self.alpha,
            beta: self.beta,
        }
    }

    /// Shuffled ballots are anonymous.
    pub fn from_ciphertext(c: &Ciphertext) -> Ballot {
        Ballot {
            user: 0,
            alpha: c.alpha,
            beta: c.beta,
            text: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BallotBox {
    pub ballots: Vec<Ballot>,
}

impl BallotBox {
    pub fn ciphertexts(&self) -> Vec<Ciphertext> {
        self.ballots.iter().map(|b| b.ciphertext()).collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Mix {
    pub ballots: Vec<Ballot>,
    #[serde(with = "serde_bytes")]
    pub proof: Vec<u8>,
    pub node: NodeId,
}

impl Mix {
    pub fn ciphertexts(&self) -> Vec<Ciphertext> {
        self.ballots.iter().map(|b| b.ciphertext()).collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Partial {
    pub points: Vec<RistrettoPoint>,
    pub proofs: Vec<ChaumPedersen>,
    pub index: u32,
    pub flag: bool,
    pub node: NodeId,
}

impl Partial {
    pub fn failed(index: u32, node: NodeId) -> Partial {
        Partial {
            points: vec![],
            proofs: vec![],
            index,
            flag: true,
            node,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Election {
    pub id: ElectionId,
    pub name: String,
    pub creator: User,
    pub users: Vec<User>,
    pub roster: Roster,
    pub key: RistrettoPoint,
    /// Public polynomial of the shared key, verifies partial decryptions.
    pub commits: Vec<RistrettoPoint>,
    pub threshold: u32,
    pub description: String,
    pub end: String,
}

impl Election {
    pub fn is_user(&self, user: User) -> bool {
        self.users.contains(&user)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Master {
    pub id: Uuid,
    pub admins: Vec<User>,
    pub roster: Roster,
}

impl Master {
    pub fn is_admin(&self, user: User) -> bool {
        self.admins.contains(&user)
    }
}

/// Everything that is ever appended to the ledger.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Master(Master),
    Election(Election),
    Stage(Stage),
    Ballot(Ballot),
    /// Casting ends here. Ballots appended after it are not counted.
    Closed,
    Mix(Mix),
    Partial(Partial),
    Decrypted(BallotBox),
}
