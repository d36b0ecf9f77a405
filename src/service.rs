//! The entry points of a deployment. A `Service` runs on the node that
//! roots the rosters it opens elections for.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use curve25519_dalek::ristretto::RistrettoPoint;
use log::{info, warn};
use uuid::Uuid;

use crate::crypto::backend::ristretto_b::RistrettoGroup;
use crate::crypto::elgamal::PublicKey;
use crate::crypto::keymaker;
use crate::data::artifact::*;
use crate::election::Stage;
use crate::error::{CryptoError, Error, ProtocolError, StageError};
use crate::protocol::decrypt::decrypt_label;
use crate::protocol::message::{Envelope, Message, Outcome, Round};
use crate::protocol::roster::{NodeId, Roster};
use crate::protocol::session::{lock_within, Coordinator, Promise, Session, Setup};
use crate::protocol::shuffle::verify_chain;
use crate::protocol::Conode;

#[derive(Clone, Debug)]
pub struct OpenElection {
    pub name: String,
    pub creator: User,
    pub users: Vec<User>,
    pub roster: Roster,
    pub threshold: u32,
    pub description: String,
    pub end: String,
}

pub struct Service {
    node: Arc<Conode>,
    master: Mutex<Option<Uuid>>,
}

fn poisoned<T>(_: T) -> Error {
    ProtocolError::Msg("poisoned lock".to_string()).into()
}

impl Service {
    pub fn new(node: Arc<Conode>) -> Service {
        Service {
            node,
            master: Mutex::new(None),
        }
    }

    pub fn node(&self) -> &Arc<Conode> {
        &self.node
    }

    /// Registers the deployment's administrators. Once linked, only they
    /// may open elections.
    pub fn link(&self, roster: Roster, admins: Vec<User>) -> Result<Uuid, Error> {
        let id = Uuid::new_v4();
        let master = Master {
            id,
            admins,
            roster,
        };
        self.node.board().add(&id, &Record::Master(master))?;
        *self.master.lock().map_err(poisoned)? = Some(id);
        info!(">> Linked master {}", id);

        Ok(id)
    }

    /// Runs the DKG among `request.roster` and publishes the election with
    /// its joint key. The election is open for casting on return.
    pub fn open_election(&self, request: OpenElection) -> Result<(ElectionId, RistrettoPoint), Error> {
        let master = *self.master.lock().map_err(poisoned)?;
        if let Some(master) = master {
            if !self.node.board().master(&master)?.is_admin(request.creator) {
                return Err(ProtocolError::NotAdmin(request.creator).into());
            }
        }
        let n = request.roster.len();
        if n == 0 {
            return Err(ProtocolError::Participants(0, 1).into());
        }
        if request.threshold as usize >= n {
            return Err(ProtocolError::Participants(n, request.threshold as usize + 1).into());
        }
        if !request.roster.is_root(&self.node.id()) {
            return Err(ProtocolError::UnknownNode(self.node.id().to_string()).into());
        }

        let id = Uuid::new_v4();
        let mut session = Session::new(id, request.roster.clone(), 0, request.threshold);
        let coordinator = Coordinator::new(n);
        let setup = Arc::clone(&coordinator.setup);
        session.coordinator = Some(coordinator);
        self.node.registry.insert(session)?;
        info!(">> Opening election {} on {} nodes, threshold {}", id, n, request.threshold);

        let init = Message::Init {
            roster: request.roster.clone(),
            threshold: request.threshold,
        };
        let ids = request.roster.ids();
        let sent = self
            .node
            .transport
            .broadcast_to(&ids, Envelope::new(id, self.node.id(), init));
        let outcome = sent
            .and_then(|_| setup.wait(self.node.config.dkg_timeout(), "key generation"))
            .and_then(Setup::into_key);
        let (key, commits) = match outcome {
            Ok(key) => key,
            Err(e) => {
                self.node.registry.remove(&id)?;
                let me = self.node.id();
                let others: Vec<NodeId> = ids.into_iter().filter(|n| *n != me).collect();
                let abort = Envelope::new(id, me, Message::Abort);
                if let Err(te) = self.node.transport.broadcast_to(&others, abort) {
                    warn!(">> Could not abort election {} on peers: {}", id, te);
                }
                return Err(e);
            }
        };

        let election = Election {
            id,
            name: request.name,
            creator: request.creator,
            users: request.users,
            roster: request.roster,
            key,
            commits,
            threshold: request.threshold,
            description: request.description,
            end: request.end,
        };
        let board = self.node.board();
        board.add(&id, &Record::Election(election))?;
        board.add(&id, &Record::Stage(Stage::Created))?;
        board.add(&id, &Record::Stage(Stage::Created.advance(Stage::Running)?))?;
        info!(">> Election {} open", id);

        Ok((id, key))
    }

    /// Appends a ballot. Casting ends when the first shuffle starts; a
    /// ballot that lands after that point is reported as rejected.
    pub fn cast_ballot(&self, id: &ElectionId, ballot: Ballot) -> Result<usize, Error> {
        let board = self.node.board();
        board.stage(id)?.require(Stage::Running, "cast")?;
        if board.closed_at(id)?.is_some() {
            return Err(StageError::Closed(id.to_string()).into());
        }
        if !board.election(id)?.is_user(ballot.user) {
            return Err(ProtocolError::NotEligible(ballot.user).into());
        }
        let position = board.add(id, &Record::Ballot(ballot))?;

        // the box may have been closed between the checks and the append
        match board.closed_at(id)? {
            Some(closed) if closed < position => Err(StageError::Closed(id.to_string()).into()),
            _ => Ok(position),
        }
    }

    /// Closes casting and runs the mix chain once. If an earlier attempt
    /// timed out, the chain resumes after the last stored mix.
    pub fn run_shuffle(&self, id: &ElectionId) -> Result<Vec<Mix>, Error> {
        let board = self.node.board();
        let session = self.node.registry.get(id)?;
        let timeout = self.node.config.shuffle_timeout();
        let (stage, promise) = {
            let mut s = lock_within(&session, timeout, "shuffle")?;
            let coordinator = s.coordinator()?;
            if coordinator.shuffle.is_some() {
                return Err(StageError::Busy("shuffle").into());
            }
            // read under the lock: a finished run appends its stage first
            let stage = board.stage(id)?;
            stage.require(Stage::Running, "shuffle")?;
            let promise = Arc::new(Promise::new());
            coordinator.shuffle = Some(Arc::clone(&promise));
            (stage, promise)
        };

        let result = self.close_box(id).and_then(|ballots| {
            self.shuffle_chain(id, &session, &promise)?;
            self.finish_shuffle(id, stage, &ballots)
        });
        self.release(&session, timeout, |c| c.shuffle = None);

        result
    }

    /// The box every mix chain and partial is checked against.
    fn close_box(&self, id: &ElectionId) -> Result<BallotBox, Error> {
        let board = self.node.board();
        if board.closed_at(id)?.is_none() {
            let count = board.get_box(id)?.ballots.len();
            if count < 2 {
                return Err(CryptoError::Input(format!("cannot shuffle {} ballots, need at least 2", count)).into());
            }
            board.add(id, &Record::Closed)?;
            info!(">> Casting closed for {}", id);
        }

        board.get_box(id)
    }

    /// Clears a round flag without waiting on a busy session forever.
    fn release<F>(&self, session: &Mutex<Session>, timeout: Duration, clear: F)
    where
        F: FnOnce(&mut Coordinator),
    {
        let cleared = lock_within(session, timeout, "round cleanup")
            .and_then(|mut s| s.coordinator().map(clear));
        if let Err(e) = cleared {
            warn!(">> Round flag not cleared: {}", e);
        }
    }

    fn finish_shuffle(&self, id: &ElectionId, stage: Stage, ballots: &BallotBox) -> Result<Vec<Mix>, Error> {
        let board = self.node.board();
        let election = board.election(id)?;
        let mixes = board.mixes(id)?;
        if mixes.len() != election.roster.len() {
            return Err(ProtocolError::Phase(format!(
                "{} mixes stored for {} nodes",
                mixes.len(),
                election.roster.len()
            ))
            .into());
        }
        verify_chain(id, &PublicKey::from(&election.key), ballots, &mixes)?;
        board.add(id, &Record::Stage(stage.advance(Stage::Shuffled)?))?;
        info!(">> Election {} shuffled by {} nodes", id, mixes.len());

        Ok(mixes)
    }

    fn shuffle_chain(
        &self,
        id: &ElectionId,
        session: &Mutex<Session>,
        promise: &Promise<Outcome>,
    ) -> Result<(), Error> {
        let stored = self.node.board().mixes(id)?.len();
        {
            let s = lock_within(session, self.node.config.shuffle_timeout(), "shuffle")?;
            if stored < s.n() {
                info!(">> Prompting node {} to shuffle", stored);
                self.node.send(&s, stored, Message::Prompt { round: Round::Shuffle })?;
            } else {
                promise.fulfil(Outcome::Mixed(stored));
            }
        }

        match promise.wait(self.node.config.shuffle_timeout(), "shuffle")? {
            Outcome::Mixed(_) => Ok(()),
            Outcome::Failed(reason) => Err(ProtocolError::Msg(reason).into()),
            other => Err(ProtocolError::Phase(format!("unexpected shuffle outcome {:?}", other)).into()),
        }
    }

    /// Collects partial decryptions and reconstructs the plaintexts. A node
    /// that does not answer in time is tolerated as long as `threshold + 1`
    /// usable partials are stored.
    pub fn run_decryption(&self, id: &ElectionId) -> Result<BallotBox, Error> {
        let board = self.node.board();
        let session = self.node.registry.get(id)?;
        let timeout = self.node.config.decrypt_timeout();
        let (stage, promise, ids) = {
            let mut s = lock_within(&session, timeout, "decryption")?;
            let ids = s.roster.ids();
            let coordinator = s.coordinator()?;
            if coordinator.decrypt.is_some() {
                return Err(StageError::Busy("decryption").into());
            }
            let stage = board.stage(id)?;
            stage.require(Stage::Shuffled, "decrypt")?;
            let promise = Arc::new(Promise::new());
            coordinator.decrypt = Some(Arc::clone(&promise));
            coordinator.decrypted.clear();
            (stage, promise, ids)
        };

        let prompt = Envelope::new(*id, self.node.id(), Message::Prompt { round: Round::Decrypt });
        let result = self.node.transport.broadcast_to(&ids, prompt).and_then(|_| {
            info!(">> Prompted {} nodes to decrypt", ids.len());
            let waited = promise.wait(timeout, "decryption");
            self.combine(id, stage, waited)
        });
        self.release(&session, timeout, |c| c.decrypt = None);

        result
    }

    fn combine(&self, id: &ElectionId, stage: Stage, waited: Result<usize, Error>) -> Result<BallotBox, Error> {
        let board = self.node.board();
        let election = board.election(id)?;
        let partials = board.partials(id)?;
        if let Err(e) = waited {
            let usable = partials.iter().filter(|p| !p.flag).count();
            if usable < election.threshold as usize + 1 {
                return Err(e);
            }
            warn!(">> {}, continuing with {} usable partials", e, usable);
        }

        let mixes = board.mixes(id)?;
        let last = mixes
            .last()
            .ok_or_else(|| ProtocolError::Phase("no mixes to decrypt".to_string()))?;
        let cs = last.ciphertexts();
        let points = keymaker::reconstruct(
            &partials,
            &cs,
            election.threshold as usize,
            &election.commits,
            &decrypt_label(id),
        )?;

        let group = RistrettoGroup;
        let ballots = cs
            .iter()
            .zip(points.iter())
            .map(|(c, point)| {
                let text = match group.extract(point) {
                    Ok(text) => Some(text),
                    Err(e) => {
                        warn!(">> Plaintext not extractable: {}", e);
                        None
                    }
                };
                Ballot {
                    user: 0,
                    alpha: c.alpha,
                    beta: c.beta,
                    text,
                }
            })
            .collect();
        let decrypted = BallotBox { ballots };

        board.add(id, &Record::Decrypted(decrypted.clone()))?;
        board.add(id, &Record::Stage(stage.advance(Stage::Decrypted)?))?;
        info!(">> Election {} decrypted", id);

        Ok(decrypted)
    }

    pub fn reconstruct(&self, id: &ElectionId) -> Result<BallotBox, Error> {
        let board = self.node.board();
        board.stage(id)?.require(Stage::Decrypted, "reconstruct")?;
        board
            .decrypted(id)?
            .ok_or_else(|| ProtocolError::Phase("decrypted box missing".to_string()).into())
    }

    pub fn get_box(&self, id: &ElectionId) -> Result<BallotBox, Error> {
        let board = self.node.board();
        board.election(id)?;
        board.get_box(id)
    }

    pub fn get_mixes(&self, id: &ElectionId) -> Result<Vec<Mix>, Error> {
        self.node.board().mixes(id)
    }

    pub fn get_partials(&self, id: &ElectionId) -> Result<Vec<Partial>, Error> {
        self.node.board().partials(id)
    }

    pub fn stage(&self, id: &ElectionId) -> Result<Stage, Error> {
        self.node.board().stage(id)
    }
}
