use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use log::debug;

use crate::error::Error;
use crate::protocol::message::Envelope;
use crate::protocol::roster::NodeId;

/// Best effort delivery between nodes. Nothing is retried here; callers
/// bound every wait with their own timeouts.
pub trait Transport: Send + Sync {
    fn send_to(&self, node: &NodeId, envelope: Envelope) -> Result<(), Error>;

    /// To every node the transport can reach, the sender included.
    fn broadcast(&self, envelope: Envelope) -> Result<(), Error>;

    fn broadcast_to(&self, nodes: &[NodeId], envelope: Envelope) -> Result<(), Error> {
        for node in nodes {
            self.send_to(node, envelope.clone())?;
        }
        Ok(())
    }
}

/// Channel transport between nodes of one process.
#[derive(Default)]
pub struct LocalTransport {
    inboxes: Mutex<HashMap<NodeId, Sender<Envelope>>>,
}

impl LocalTransport {
    pub fn new() -> LocalTransport {
        LocalTransport::default()
    }

    pub fn register(&self, node: NodeId) -> Result<Receiver<Envelope>, Error> {
        let (sender, receiver) = channel();
        self.inboxes
            .lock()
            .map_err(|_| Error::Transport("poisoned inbox lock".to_string()))?
            .insert(node, sender);
        Ok(receiver)
    }

    /// Messages to a disconnected node are dropped silently, like a peer
    /// that went offline.
    pub fn disconnect(&self, node: &NodeId) -> Result<(), Error> {
        self.inboxes
            .lock()
            .map_err(|_| Error::Transport("poisoned inbox lock".to_string()))?
            .remove(node);
        Ok(())
    }
}

impl Transport for LocalTransport {
    fn send_to(&self, node: &NodeId, envelope: Envelope) -> Result<(), Error> {
        let inboxes = self
            .inboxes
            .lock()
            .map_err(|_| Error::Transport("poisoned inbox lock".to_string()))?;
        match inboxes.get(node) {
            Some(sender) => sender
                .send(envelope)
                .map_err(|e| Error::Transport(format!("{} is gone: {}", node, e))),
            None => {
                debug!("Dropping {} for unreachable node {}", envelope.message, node);
                Ok(())
            }
        }
    }

    fn broadcast(&self, envelope: Envelope) -> Result<(), Error> {
        let inboxes = self
            .inboxes
            .lock()
            .map_err(|_| Error::Transport("poisoned inbox lock".to_string()))?;
        for (node, sender) in inboxes.iter() {
            sender
                .send(envelope.clone())
                .map_err(|e| Error::Transport(format!("{} is gone: {}", node, e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::protocol::message::*;
    use crate::protocol::transport::*;

    #[test]
    fn test_local_transport() {
        let transport = LocalTransport::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let inbox_a = transport.register(a).unwrap();
        let inbox_b = transport.register(b).unwrap();
        let election = Uuid::new_v4();
        let prompt = Envelope::new(election, a, Message::Prompt { round: Round::Shuffle });

        transport.broadcast_to(&[a, b], prompt.clone()).unwrap();
        assert_eq!(inbox_a.recv().unwrap(), prompt);
        assert_eq!(inbox_b.recv().unwrap(), prompt);

        transport.broadcast(prompt.clone()).unwrap();
        assert_eq!(inbox_a.recv().unwrap(), prompt);
        assert_eq!(inbox_b.recv().unwrap(), prompt);

        transport.disconnect(&b).unwrap();
        transport.send_to(&b, prompt).unwrap();
        assert!(inbox_b.try_recv().is_err());
    }
}
