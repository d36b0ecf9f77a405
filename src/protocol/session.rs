use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use curve25519_dalek::ristretto::RistrettoPoint;

use crate::crypto::backend::ristretto_b::RistrettoGroup;
use crate::crypto::dkg::{DistKeyGenerator, Index, SharedSecret};
use crate::crypto::elgamal::PrivateKey;
use crate::data::artifact::ElectionId;
use crate::error::{CryptoError, Error, ProtocolError, ThresholdError, TimeoutError};
use crate::protocol::message::{DkgOutcome, Envelope, Outcome};
use crate::protocol::roster::{NodeId, Roster};

fn poisoned<T>(_: T) -> Error {
    ProtocolError::Msg("poisoned lock".to_string()).into()
}

/// A value filled in once by a handler and awaited, with a bound, by the
/// service.
pub struct Promise<T> {
    value: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T: Clone> Promise<T> {
    pub fn new() -> Promise<T> {
        Promise {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Only the first value counts.
    pub fn fulfil(&self, value: T) {
        if let Ok(mut slot) = self.value.lock() {
            if slot.is_none() {
                *slot = Some(value);
                self.ready.notify_all();
            }
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        self.value.lock().map(|v| v.is_some()).unwrap_or(false)
    }

    pub fn wait(&self, timeout: Duration, what: &str) -> Result<T, Error> {
        let slot = self.value.lock().map_err(poisoned)?;
        let (slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |v| v.is_none())
            .map_err(poisoned)?;

        slot.clone().ok_or_else(|| {
            TimeoutError::Expired(what.to_string(), timeout.as_millis() as u64).into()
        })
    }
}

impl<T: Clone> Default for Promise<T> {
    fn default() -> Promise<T> {
        Promise::new()
    }
}

/// What the root concludes once every node has reported on the DKG.
#[derive(Clone, Debug, PartialEq)]
pub enum Setup {
    Done {
        public: RistrettoPoint,
        commits: Vec<RistrettoPoint>,
    },
    BelowThreshold(usize, usize),
    Mismatch,
    Failed(String),
}

impl Setup {
    pub fn into_key(self) -> Result<(RistrettoPoint, Vec<RistrettoPoint>), Error> {
        match self {
            Setup::Done { public, commits } => Ok((public, commits)),
            Setup::BelowThreshold(size, threshold) => Err(ThresholdError::Qual(size, threshold).into()),
            Setup::Mismatch => Err(CryptoError::Proof("nodes disagree on the joint key".to_string()).into()),
            Setup::Failed(reason) => Err(ProtocolError::Msg(reason).into()),
        }
    }
}

/// Round bookkeeping only the root keeps.
pub struct Coordinator {
    pub publics: Vec<Option<RistrettoPoint>>,
    pub readies: HashMap<Index, DkgOutcome>,
    pub setup: Arc<Promise<Setup>>,
    pub shuffle: Option<Arc<Promise<Outcome>>>,
    pub decrypted: HashSet<Index>,
    pub decrypt: Option<Arc<Promise<usize>>>,
}

impl Coordinator {
    pub fn new(n: usize) -> Coordinator {
        Coordinator {
            publics: vec![None; n],
            readies: HashMap::new(),
            setup: Arc::new(Promise::new()),
            shuffle: None,
            decrypted: HashSet::new(),
            decrypt: None,
        }
    }
}

/// Per election state of one node.
pub struct Session {
    pub election: ElectionId,
    pub roster: Roster,
    pub index: Index,
    pub threshold: u32,
    pub ephemeral: Option<PrivateKey>,
    pub replied: bool,
    pub generator: Option<DistKeyGenerator>,
    pub committed: bool,
    pub reported: bool,
    pub complaints_since: Option<Instant>,
    pub shared: Option<SharedSecret>,
    /// Messages that arrived before the state they depend on.
    pub pending: Vec<Envelope>,
    pub coordinator: Option<Coordinator>,
}

impl Session {
    pub fn new(election: ElectionId, roster: Roster, index: Index, threshold: u32) -> Session {
        let group = RistrettoGroup;
        Session {
            election,
            roster,
            index,
            threshold,
            ephemeral: Some(group.gen_key()),
            replied: false,
            generator: None,
            committed: false,
            reported: false,
            complaints_since: None,
            shared: None,
            pending: vec![],
            coordinator: None,
        }
    }

    pub fn n(&self) -> usize {
        self.roster.len()
    }

    /// A message claiming to come from position `index` must be sent by the
    /// node at that position.
    pub fn check_sender(&self, from: &NodeId, index: Index) -> Result<(), Error> {
        if self.roster.position(from) != Some(index as usize) {
            return Err(ProtocolError::UnknownNode(from.to_string()).into());
        }
        Ok(())
    }

    pub fn coordinator(&mut self) -> Result<&mut Coordinator, Error> {
        let index = self.index;
        self.coordinator
            .as_mut()
            .ok_or_else(|| ProtocolError::Phase(format!("node {} is not coordinating", index)).into())
    }
}

pub fn lock(session: &Mutex<Session>) -> Result<MutexGuard<Session>, Error> {
    session.lock().map_err(poisoned)
}

/// Like `lock`, but gives up after `timeout`. Callers outside the handlers
/// use this so that a stuck handler cannot block them indefinitely.
pub fn lock_within<'a>(
    session: &'a Mutex<Session>,
    timeout: Duration,
    what: &str,
) -> Result<MutexGuard<'a, Session>, Error> {
    let start = Instant::now();
    loop {
        match session.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::Poisoned(e)) => return Err(poisoned(e)),
            Err(TryLockError::WouldBlock) if start.elapsed() >= timeout => {
                return Err(TimeoutError::Expired(what.to_string(), timeout.as_millis() as u64).into());
            }
            Err(TryLockError::WouldBlock) => thread::sleep(Duration::from_millis(1)),
        }
    }
}

#[derive(Default)]
pub struct Registry {
    sessions: RwLock<HashMap<ElectionId, Arc<Mutex<Session>>>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn get(&self, election: &ElectionId) -> Result<Arc<Mutex<Session>>, Error> {
        self.sessions
            .read()
            .map_err(poisoned)?
            .get(election)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownElection(election.to_string()).into())
    }

    pub fn insert(&self, session: Session) -> Result<Arc<Mutex<Session>>, Error> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if sessions.contains_key(&session.election) {
            return Err(ProtocolError::Phase(format!("session {} exists", session.election)).into());
        }
        let election = session.election;
        let entry = Arc::new(Mutex::new(session));
        sessions.insert(election, Arc::clone(&entry));

        Ok(entry)
    }

    /// Returns the session for `election`, creating it with `f` if absent.
    pub fn get_or_insert_with<F>(&self, election: &ElectionId, f: F) -> Result<Arc<Mutex<Session>>, Error>
    where
        F: FnOnce() -> Session,
    {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let entry = sessions
            .entry(*election)
            .or_insert_with(|| Arc::new(Mutex::new(f())));

        Ok(Arc::clone(entry))
    }

    pub fn remove(&self, election: &ElectionId) -> Result<(), Error> {
        self.sessions.write().map_err(poisoned)?.remove(election);
        Ok(())
    }

    pub fn all(&self) -> Vec<Arc<Mutex<Session>>> {
        match self.sessions.read() {
            Ok(sessions) => sessions.values().cloned().collect(),
            Err(_) => vec![],
        }
    }
}
