//! An in-process deployment: every conode on its own dispatcher thread,
//! connected by a `LocalTransport`, appending to one shared ledger.
use std::sync::Arc;
use std::thread::JoinHandle;

use ed25519_dalek::Keypair;
use log::info;
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::bulletinboard::{ElectionBoard, Ledger, MemLedger};
use crate::config::Config;
use crate::error::{Error, ProtocolError};
use crate::protocol::roster::{Roster, ServerIdentity};
use crate::protocol::transport::{LocalTransport, Transport};
use crate::protocol::Conode;
use crate::service::Service;

pub struct LocalNetwork {
    pub transport: Arc<LocalTransport>,
    pub ledger: Arc<MemLedger>,
    pub nodes: Vec<Arc<Conode>>,
    handles: Vec<JoinHandle<()>>,
}

impl LocalNetwork {
    pub fn new(n: usize, config: Config) -> Result<LocalNetwork, Error> {
        LocalNetwork::with_views(n, config, |_, ledger| ledger)
    }

    /// `view` decides how node `i` sees the shared ledger.
    pub fn with_views<F>(n: usize, config: Config, view: F) -> Result<LocalNetwork, Error>
    where
        F: Fn(usize, Arc<dyn Ledger>) -> Arc<dyn Ledger>,
    {
        LocalNetwork::build(n, config, view, |_, transport| transport)
    }

    /// `wire` decides what node `i` sends through.
    pub fn with_wires<W>(n: usize, config: Config, wire: W) -> Result<LocalNetwork, Error>
    where
        W: Fn(usize, Arc<dyn Transport>) -> Arc<dyn Transport>,
    {
        LocalNetwork::build(n, config, |_, ledger| ledger, wire)
    }

    pub fn build<F, W>(n: usize, config: Config, view: F, wire: W) -> Result<LocalNetwork, Error>
    where
        F: Fn(usize, Arc<dyn Ledger>) -> Arc<dyn Ledger>,
        W: Fn(usize, Arc<dyn Transport>) -> Arc<dyn Transport>,
    {
        if n == 0 {
            return Err(ProtocolError::Participants(0, 1).into());
        }
        let mut csprng = OsRng;
        let transport = Arc::new(LocalTransport::new());
        let ledger = Arc::new(MemLedger::new());
        let mut nodes = Vec::with_capacity(n);
        let mut handles = Vec::with_capacity(n);

        for i in 0..n {
            let keypair = Keypair::generate(&mut csprng);
            let identity = ServerIdentity {
                id: Uuid::new_v4(),
                public: keypair.public,
                address: format!("local://{}", i),
            };
            let shared = Arc::clone(&ledger) as Arc<dyn Ledger>;
            let board = ElectionBoard::new(view(i, shared));
            let inbox = transport.register(identity.id)?;
            let node = Arc::new(Conode::new(
                identity,
                keypair,
                config.clone(),
                board,
                wire(i, Arc::clone(&transport) as Arc<dyn Transport>),
            ));
            handles.push(node.start(inbox));
            nodes.push(node);
        }
        info!(">> Local network of {} nodes up", n);

        Ok(LocalNetwork {
            transport,
            ledger,
            nodes,
            handles,
        })
    }

    pub fn roster(&self) -> Roster {
        Roster::new(self.nodes.iter().map(|n| n.identity.clone()).collect())
    }

    /// The service of the first node, the root of `roster()`.
    pub fn service(&self) -> Service {
        Service::new(Arc::clone(&self.nodes[0]))
    }

    /// Closes every inbox and waits for the dispatchers to exit.
    pub fn shutdown(self) {
        for node in self.nodes.iter() {
            self.transport.disconnect(&node.id()).ok();
        }
        for handle in self.handles {
            handle.join().ok();
        }
    }
}
