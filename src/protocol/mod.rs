pub mod decrypt;
pub mod dkg;
pub mod message;
pub mod node;
pub mod roster;
pub mod session;
pub mod shuffle;
pub mod transport;

pub use node::Conode;
pub use roster::{NodeId, Roster, ServerIdentity};
pub use transport::{LocalTransport, Transport};
