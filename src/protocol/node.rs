use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ed25519_dalek::Keypair;
use log::{debug, info, warn};

use crate::bulletinboard::ElectionBoard;
use crate::config::Config;
use crate::data::artifact::ElectionId;
use crate::error::{Error, ProtocolError};
use crate::protocol::message::{Envelope, Message, Round};
use crate::protocol::roster::{NodeId, ServerIdentity};
use crate::protocol::session::{lock, Registry, Session};
use crate::protocol::transport::Transport;
use crate::util::short;

/// Result of offering a message to a session.
pub(crate) enum Handled {
    Done,
    /// Not processable yet, kept and offered again after progress.
    Defer,
}

/// A conode: one participant of every election whose roster lists it.
pub struct Conode {
    pub identity: ServerIdentity,
    pub config: Config,
    pub(crate) keypair: Arc<Keypair>,
    pub(crate) registry: Registry,
    pub(crate) board: ElectionBoard,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Conode {
    pub fn new(
        identity: ServerIdentity,
        keypair: Keypair,
        config: Config,
        board: ElectionBoard,
        transport: Arc<dyn Transport>,
    ) -> Conode {
        Conode {
            identity,
            config,
            keypair: Arc::new(keypair),
            registry: Registry::new(),
            board,
            transport,
        }
    }

    pub fn id(&self) -> NodeId {
        self.identity.id
    }

    pub fn has_session(&self, election: &ElectionId) -> bool {
        self.registry.get(election).is_ok()
    }

    pub fn has_any_session(&self) -> bool {
        !self.registry.all().is_empty()
    }

    pub fn board(&self) -> &ElectionBoard {
        &self.board
    }

    /// Runs the dispatcher until the inbox is closed. Each message is
    /// handled on its own thread; idle periods drive deadlines.
    pub fn start(self: &Arc<Self>, inbox: Receiver<Envelope>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        thread::spawn(move || {
            info!(">> Conode {} listening", short(node.id().as_bytes()));
            loop {
                match inbox.recv_timeout(node.config.tick()) {
                    Ok(envelope) => {
                        let handler = Arc::clone(&node);
                        // never on the rayon pool: handlers run par_iter work
                        // while holding a session lock
                        thread::spawn(move || handler.dispatch(envelope));
                    }
                    Err(RecvTimeoutError::Timeout) => node.tick(),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!(">> Conode {} stopped", short(node.id().as_bytes()));
        })
    }

    pub(crate) fn dispatch(&self, envelope: Envelope) {
        let kind = envelope.message.to_string();
        let election = envelope.election;
        if let Err(e) = self.handle(envelope) {
            warn!(
                ">> Conode {} failed to handle {} for {}: {}",
                short(self.id().as_bytes()),
                kind,
                election,
                e
            );
        }
    }

    fn handle(&self, envelope: Envelope) -> Result<(), Error> {
        if let Message::Init { roster, threshold } = &envelope.message {
            return self.on_init(&envelope.election, &envelope.from, roster, *threshold);
        }
        let session = self.registry.get(&envelope.election)?;
        let mut s = lock(&session)?;
        if s.roster.position(&envelope.from).is_none() {
            return Err(ProtocolError::UnknownNode(envelope.from.to_string()).into());
        }

        match self.process(&mut s, &envelope)? {
            Handled::Defer => {
                debug!(">> Deferring {} at {}", envelope.message, s.index);
                s.pending.push(envelope);
            }
            Handled::Done => {}
        }
        self.settle(&mut s);

        Ok(())
    }

    fn process(&self, s: &mut Session, envelope: &Envelope) -> Result<Handled, Error> {
        let from = &envelope.from;
        match &envelope.message {
            Message::Init { .. } => Err(ProtocolError::Phase("repeated init".to_string()).into()),
            Message::InitReply {
                index,
                public,
                proof,
            } => self.on_init_reply(s, from, *index, public, proof),
            Message::StartDeal { publics, threshold } => self.on_start_deal(s, publics, *threshold),
            Message::Deal(deal) => self.on_deal(s, deal),
            Message::Response(response) => self.on_response(s, response),
            Message::Justification(justification) => self.on_justification(s, justification),
            Message::SecretCommit(commit) => self.on_secret_commit(s, commit),
            Message::Ready { index, outcome } => self.on_ready(s, from, *index, outcome),
            Message::Abort => self.on_abort(s, from),
            Message::Prompt {
                round: Round::Shuffle,
            } => self.on_shuffle_prompt(s),
            Message::Prompt {
                round: Round::Decrypt,
            } => self.on_decrypt_prompt(s),
            Message::Terminate {
                round: Round::Shuffle,
                index,
                outcome,
            } => self.on_shuffle_terminate(s, from, *index, outcome),
            Message::Terminate {
                round: Round::Decrypt,
                index,
                outcome,
            } => self.on_decrypt_terminate(s, from, *index, outcome),
        }
    }

    /// Alternates between replaying deferred messages and advancing the
    /// DKG until neither changes anything.
    fn settle(&self, s: &mut Session) {
        loop {
            let replayed = self.replay(s);
            let progressed = self.dkg_progress(s);
            if !replayed && !progressed {
                break;
            }
        }
    }

    fn replay(&self, s: &mut Session) -> bool {
        let pending = std::mem::take(&mut s.pending);
        let mut progressed = false;
        for envelope in pending {
            match self.process(s, &envelope) {
                Ok(Handled::Defer) => s.pending.push(envelope),
                Ok(Handled::Done) => progressed = true,
                Err(e) => {
                    warn!(">> Dropping deferred {} at {}: {}", envelope.message, s.index, e);
                    progressed = true;
                }
            }
        }

        progressed
    }

    fn tick(&self) {
        for session in self.registry.all() {
            // a busy session is ticked next time
            if let Ok(mut s) = session.try_lock() {
                self.settle(&mut s);
            }
        }
    }

    pub(crate) fn send(&self, s: &Session, index: usize, message: Message) -> Result<(), Error> {
        let node = s
            .roster
            .get(index)
            .ok_or_else(|| ProtocolError::UnknownNode(index.to_string()))?;
        self.transport
            .send_to(&node.id, Envelope::new(s.election, self.id(), message))
    }

    pub(crate) fn send_root(&self, s: &Session, message: Message) -> Result<(), Error> {
        self.send(s, 0, message)
    }

    /// Every roster member but this node.
    pub(crate) fn send_others(&self, s: &Session, message: Message) -> Result<(), Error> {
        let me = self.id();
        let others: Vec<NodeId> = s.roster.ids().into_iter().filter(|id| *id != me).collect();
        self.transport
            .broadcast_to(&others, Envelope::new(s.election, me, message))
    }
}
