use ed25519_dalek::PublicKey as SPublicKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type NodeId = Uuid;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ServerIdentity {
    pub id: NodeId,
    /// Verifies the node's signed protocol messages.
    pub public: SPublicKey,
    pub address: String,
}

/// Ordered participants of an election. Position 0 is the root, which
/// coordinates every protocol round; the shuffle chain follows list order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Roster {
    pub list: Vec<ServerIdentity>,
}

impl Roster {
    pub fn new(list: Vec<ServerIdentity>) -> Roster {
        Roster { list }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.list.iter().position(|s| s.id == *id)
    }

    pub fn get(&self, index: usize) -> Option<&ServerIdentity> {
        self.list.get(index)
    }

    pub fn root(&self) -> Option<&ServerIdentity> {
        self.list.first()
    }

    pub fn is_root(&self, id: &NodeId) -> bool {
        self.root().map(|r| r.id == *id).unwrap_or(false)
    }

    pub fn next(&self, index: usize) -> Option<usize> {
        if index + 1 < self.len() {
            Some(index + 1)
        } else {
            None
        }
    }

    pub fn prev(&self, index: usize) -> Option<usize> {
        if index > 0 && index < self.len() {
            Some(index - 1)
        } else {
            None
        }
    }

    /// Star topology: every node reports to the root.
    pub fn parent(&self, index: usize) -> Option<usize> {
        if index > 0 && index < self.len() {
            Some(0)
        } else {
            None
        }
    }

    pub fn children(&self, index: usize) -> Vec<usize> {
        if index == 0 {
            (1..self.len()).collect()
        } else {
            vec![]
        }
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.list.iter().map(|s| s.id).collect()
    }

    pub fn verifiers(&self) -> Vec<SPublicKey> {
        self.list.iter().map(|s| s.public).collect()
    }
}
