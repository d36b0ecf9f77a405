use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use curve25519_dalek::ristretto::RistrettoPoint;
use serial_test::serial;
use simplelog::*;
use uuid::Uuid;

use nevv::bulletinboard::{BBError, Ledger};
use nevv::crypto::backend::ristretto_b::RistrettoGroup;
use nevv::crypto::elgamal::PublicKey;
use nevv::crypto::keymaker;
use nevv::data::artifact::*;
use nevv::data::bytes::{Deser, Ser};
use nevv::election::Stage;
use nevv::error::{CryptoError, Error, ProtocolError, StageError, ThresholdError, TimeoutError};
use nevv::local::LocalNetwork;
use nevv::protocol::decrypt::decrypt_label;
use nevv::protocol::message::{Envelope, Message};
use nevv::protocol::shuffle::verify_chain;
use nevv::protocol::{NodeId, Transport};
use nevv::{Config, OpenElection, Service};

static INIT: Once = Once::new();

fn setup_log() {
    INIT.call_once(|| {
        CombinedLogger::init(vec![TermLogger::new(
            LevelFilter::Info,
            simplelog::Config::default(),
            TerminalMode::Mixed,
        )])
        .unwrap();
    });
}

fn config() -> Config {
    Config {
        dkg_timeout_ms: 20_000,
        shuffle_timeout_ms: 20_000,
        decrypt_timeout_ms: 20_000,
        justification_deadline_ms: 1_000,
        tick_ms: 20,
    }
}

fn open(network: &LocalNetwork, service: &Service, threshold: u32) -> (ElectionId, RistrettoPoint) {
    let request = OpenElection {
        name: "council".to_string(),
        creator: 0,
        users: vec![1, 2, 3],
        roster: network.roster(),
        threshold,
        description: "yearly council vote".to_string(),
        end: "2030-01-01".to_string(),
    };
    service.open_election(request).unwrap()
}

fn ballot(key: &RistrettoPoint, user: User, text: &[u8]) -> Ballot {
    let group = RistrettoGroup;
    let c = PublicKey::from(key).encrypt(&group.embed(text).unwrap());
    Ballot {
        user,
        alpha: c.alpha,
        beta: c.beta,
        text: None,
    }
}

fn texts(decrypted: &BallotBox) -> HashSet<Vec<u8>> {
    decrypted
        .ballots
        .iter()
        .map(|b| b.text.clone().unwrap())
        .collect()
}

fn expected(messages: &[&[u8]]) -> HashSet<Vec<u8>> {
    messages.iter().map(|m| m.to_vec()).collect()
}

#[test]
#[serial]
fn election_end_to_end() {
    setup_log();
    let network = LocalNetwork::new(3, config()).unwrap();
    let service = network.service();
    let (id, key) = open(&network, &service, 1);
    assert_eq!(service.stage(&id).unwrap(), Stage::Running);

    service.cast_ballot(&id, ballot(&key, 1, b"yes")).unwrap();
    service.cast_ballot(&id, ballot(&key, 2, b"no")).unwrap();
    assert_eq!(service.get_box(&id).unwrap().ballots.len(), 2);

    let mixes = service.run_shuffle(&id).unwrap();
    assert_eq!(mixes.len(), 3);
    assert_eq!(service.stage(&id).unwrap(), Stage::Shuffled);
    let ballots = service.get_box(&id).unwrap();
    assert!(verify_chain(&id, &PublicKey::from(&key), &ballots, &mixes).is_ok());
    // every node shuffled exactly once, in roster order
    let shufflers: Vec<Uuid> = mixes.iter().map(|m| m.node).collect();
    assert_eq!(shufflers, network.roster().ids());

    let decrypted = service.run_decryption(&id).unwrap();
    assert_eq!(service.stage(&id).unwrap(), Stage::Decrypted);
    let partials = service.get_partials(&id).unwrap();
    assert_eq!(partials.len(), 3);
    assert!(partials.iter().all(|p| !p.flag));
    assert_eq!(texts(&decrypted), expected(&[b"yes", b"no"]));
    assert_eq!(service.reconstruct(&id).unwrap(), decrypted);

    network.shutdown();
}

/// Corrupts the proof of mix `victim` whenever the chain is read.
struct TamperedView {
    inner: Arc<dyn Ledger>,
    victim: usize,
}

impl Ledger for TamperedView {
    fn append(&self, chain: &Uuid, record: Vec<u8>) -> Result<usize, BBError> {
        self.inner.append(chain, record)
    }

    fn read_all(&self, chain: &Uuid) -> Result<Vec<Vec<u8>>, BBError> {
        let mut mixes = 0;
        let mut ret = vec![];
        for bytes in self.inner.read_all(chain)? {
            match Record::deser(&bytes)? {
                Record::Mix(mut mix) => {
                    if mixes == self.victim {
                        let last = mix.proof.len() - 1;
                        mix.proof[last] ^= 0x01;
                    }
                    mixes += 1;
                    ret.push(Record::Mix(mix).ser()?);
                }
                _ => ret.push(bytes),
            }
        }
        Ok(ret)
    }

    fn read_latest(&self, chain: &Uuid) -> Result<Option<Vec<u8>>, BBError> {
        Ok(self.read_all(chain)?.pop())
    }
}

#[test]
#[serial]
fn election_tampered_mix_flags_partial() {
    setup_log();
    let network = LocalNetwork::with_views(3, config(), |i, ledger| {
        if i == 2 {
            Arc::new(TamperedView {
                inner: ledger,
                victim: 1,
            })
        } else {
            ledger
        }
    })
    .unwrap();
    let service = network.service();
    let (id, key) = open(&network, &service, 1);
    service.cast_ballot(&id, ballot(&key, 1, b"red")).unwrap();
    service.cast_ballot(&id, ballot(&key, 3, b"blue")).unwrap();

    service.run_shuffle(&id).unwrap();
    assert_eq!(service.stage(&id).unwrap(), Stage::Shuffled);

    let decrypted = service.run_decryption(&id).unwrap();
    assert_eq!(texts(&decrypted), expected(&[b"red", b"blue"]));
    let partials = service.get_partials(&id).unwrap();
    let flagged: Vec<u32> = partials.iter().filter(|p| p.flag).map(|p| p.index).collect();
    assert_eq!(flagged, vec![2]);

    // one more unusable partial leaves fewer than threshold + 1
    let election = network.nodes[0].board().election(&id).unwrap();
    let mixes = service.get_mixes(&id).unwrap();
    let cs = mixes[2].ciphertexts();
    let mut short = partials.clone();
    for p in short.iter_mut().filter(|p| p.index == 0) {
        *p = Partial::failed(p.index, p.node);
    }
    match keymaker::reconstruct(&short, &cs, 1, &election.commits, &decrypt_label(&id)) {
        Err(Error::Threshold(ThresholdError::Partials(1, 2))) => {}
        other => panic!("unexpected {:?}", other),
    }

    network.shutdown();
}

#[test]
#[serial]
fn election_stage_guards() {
    setup_log();
    let network = LocalNetwork::new(3, config()).unwrap();
    let service = network.service();
    let (id, key) = open(&network, &service, 1);

    // nothing to reconstruct or decrypt yet
    match service.run_decryption(&id) {
        Err(Error::Stage(StageError::NotPermitted(_, Stage::Running))) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(service.reconstruct(&id).is_err());

    // a single ballot cannot be shuffled
    service.cast_ballot(&id, ballot(&key, 1, b"a")).unwrap();
    match service.run_shuffle(&id) {
        Err(Error::Crypto(CryptoError::Input(_))) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(service.stage(&id).unwrap(), Stage::Running);

    service.cast_ballot(&id, ballot(&key, 2, b"b")).unwrap();
    service.run_shuffle(&id).unwrap();
    match service.run_shuffle(&id) {
        Err(Error::Stage(StageError::NotPermitted(_, Stage::Shuffled))) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(service.stage(&id).unwrap(), Stage::Shuffled);
    assert_eq!(service.get_mixes(&id).unwrap().len(), 3);

    match service.cast_ballot(&id, ballot(&key, 3, b"late")) {
        Err(Error::Stage(StageError::NotPermitted(_, Stage::Shuffled))) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(service.get_box(&id).unwrap().ballots.len(), 2);

    service.run_decryption(&id).unwrap();
    assert!(service.run_decryption(&id).is_err());
    assert_eq!(service.stage(&id).unwrap(), Stage::Decrypted);

    network.shutdown();
}

#[test]
#[serial]
fn election_eligibility_and_recast() {
    setup_log();
    let network = LocalNetwork::new(2, config()).unwrap();
    let service = network.service();
    let (id, key) = open(&network, &service, 1);

    match service.cast_ballot(&id, ballot(&key, 9, b"intruder")) {
        Err(Error::Protocol(ProtocolError::NotEligible(9))) => {}
        other => panic!("unexpected {:?}", other),
    }

    service.cast_ballot(&id, ballot(&key, 1, b"first")).unwrap();
    service.cast_ballot(&id, ballot(&key, 2, b"other")).unwrap();
    service.cast_ballot(&id, ballot(&key, 1, b"second")).unwrap();
    let ballots = service.get_box(&id).unwrap().ballots;
    assert_eq!(ballots.len(), 2);
    assert_eq!(ballots[0].user, 1);

    service.run_shuffle(&id).unwrap();
    let decrypted = service.run_decryption(&id).unwrap();
    assert_eq!(texts(&decrypted), expected(&[b"second", b"other"]));

    network.shutdown();
}

#[test]
#[serial]
fn election_admins_only() {
    setup_log();
    let network = LocalNetwork::new(2, config()).unwrap();
    let service = network.service();
    let master = service.link(network.roster(), vec![0]).unwrap();
    assert!(network.nodes[0].board().master(&master).unwrap().is_admin(0));

    let request = OpenElection {
        name: "board".to_string(),
        creator: 5,
        users: vec![1],
        roster: network.roster(),
        threshold: 1,
        description: String::new(),
        end: String::new(),
    };
    match service.open_election(request) {
        Err(Error::Protocol(ProtocolError::NotAdmin(5))) => {}
        other => panic!("unexpected {:?}", other),
    }
    let (id, _) = open(&network, &service, 0);
    assert_eq!(service.stage(&id).unwrap(), Stage::Running);

    network.shutdown();
}

#[test]
#[serial]
fn election_single_node() {
    setup_log();
    let network = LocalNetwork::new(1, config()).unwrap();
    let service = network.service();
    let (id, key) = open(&network, &service, 0);
    service.cast_ballot(&id, ballot(&key, 1, b"solo")).unwrap();
    service.cast_ballot(&id, ballot(&key, 2, b"duo")).unwrap();

    assert_eq!(service.run_shuffle(&id).unwrap().len(), 1);
    let decrypted = service.run_decryption(&id).unwrap();
    assert_eq!(texts(&decrypted), expected(&[b"solo", b"duo"]));

    network.shutdown();
}

#[test]
#[serial]
fn election_unreachable_node() {
    setup_log();
    let mut cfg = config();
    cfg.shuffle_timeout_ms = 500;
    cfg.decrypt_timeout_ms = 500;
    let network = LocalNetwork::new(3, cfg).unwrap();
    let service = network.service();
    let (id, key) = open(&network, &service, 1);
    service.cast_ballot(&id, ballot(&key, 1, b"x")).unwrap();
    service.cast_ballot(&id, ballot(&key, 2, b"y")).unwrap();

    // the last node of the chain goes away
    let last = network.nodes[2].id();
    network.transport.disconnect(&last).unwrap();
    match service.run_shuffle(&id) {
        Err(Error::Timeout(TimeoutError::Expired(_, 500))) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(service.stage(&id).unwrap(), Stage::Running);
    assert_eq!(service.get_mixes(&id).unwrap().len(), 2);

    network.shutdown();
}

#[test]
#[serial]
fn election_decrypts_without_one_node() {
    setup_log();
    let mut cfg = config();
    cfg.decrypt_timeout_ms = 500;
    let network = LocalNetwork::new(3, cfg).unwrap();
    let service = network.service();
    let (id, key) = open(&network, &service, 1);
    service.cast_ballot(&id, ballot(&key, 1, b"up")).unwrap();
    service.cast_ballot(&id, ballot(&key, 2, b"down")).unwrap();
    service.run_shuffle(&id).unwrap();

    network.transport.disconnect(&network.nodes[1].id()).unwrap();
    let decrypted = service.run_decryption(&id).unwrap();
    assert_eq!(texts(&decrypted), expected(&[b"up", b"down"]));
    assert_eq!(service.get_partials(&id).unwrap().len(), 2);

    network.shutdown();
}

/// Holds every mix append back for `delay`.
struct SlowMixes {
    inner: Arc<dyn Ledger>,
    delay: Duration,
}

impl Ledger for SlowMixes {
    fn append(&self, chain: &Uuid, record: Vec<u8>) -> Result<usize, BBError> {
        if let Record::Mix(_) = Record::deser(&record)? {
            thread::sleep(self.delay);
        }
        self.inner.append(chain, record)
    }

    fn read_all(&self, chain: &Uuid) -> Result<Vec<Vec<u8>>, BBError> {
        self.inner.read_all(chain)
    }

    fn read_latest(&self, chain: &Uuid) -> Result<Option<Vec<u8>>, BBError> {
        self.inner.read_latest(chain)
    }
}

/// Refuses the first mix append, like a ledger node that crashed.
struct CrashOnce {
    inner: Arc<dyn Ledger>,
    crashed: AtomicBool,
}

impl Ledger for CrashOnce {
    fn append(&self, chain: &Uuid, record: Vec<u8>) -> Result<usize, BBError> {
        if let Record::Mix(_) = Record::deser(&record)? {
            if !self.crashed.swap(true, Ordering::SeqCst) {
                return Err(BBError::Msg("crash".to_string()));
            }
        }
        self.inner.append(chain, record)
    }

    fn read_all(&self, chain: &Uuid) -> Result<Vec<Vec<u8>>, BBError> {
        self.inner.read_all(chain)
    }

    fn read_latest(&self, chain: &Uuid) -> Result<Option<Vec<u8>>, BBError> {
        self.inner.read_latest(chain)
    }
}

/// A dealer that sends node 1 a broken deal and, if `silent`, never
/// delivers its justification.
struct BadDealer {
    inner: Arc<dyn Transport>,
    silent: bool,
}

impl BadDealer {
    fn tamper(&self, envelope: Envelope) -> Option<Envelope> {
        match envelope.message {
            Message::Deal(mut deal) if deal.recipient == 1 => {
                deal.encrypted_share.iv[0] ^= 0x01;
                Some(Envelope::new(envelope.election, envelope.from, Message::Deal(deal)))
            }
            Message::Justification(_) if self.silent => None,
            _ => Some(envelope),
        }
    }
}

impl Transport for BadDealer {
    fn send_to(&self, node: &NodeId, envelope: Envelope) -> Result<(), Error> {
        match self.tamper(envelope) {
            Some(envelope) => self.inner.send_to(node, envelope),
            None => Ok(()),
        }
    }

    fn broadcast(&self, envelope: Envelope) -> Result<(), Error> {
        match self.tamper(envelope) {
            Some(envelope) => self.inner.broadcast(envelope),
            None => Ok(()),
        }
    }
}

fn bad_dealer_network(silent: bool, cfg: Config) -> LocalNetwork {
    LocalNetwork::with_wires(3, cfg, |i, transport| {
        if i == 2 {
            Arc::new(BadDealer {
                inner: transport,
                silent,
            })
        } else {
            transport
        }
    })
    .unwrap()
}

fn dkg_config() -> Config {
    let mut cfg = config();
    cfg.justification_deadline_ms = 300;
    cfg
}

#[test]
#[serial]
fn election_box_closes_when_shuffle_starts() {
    setup_log();
    let network = LocalNetwork::with_views(3, config(), |i, ledger| {
        if i == 1 {
            Arc::new(SlowMixes {
                inner: ledger,
                delay: Duration::from_millis(800),
            })
        } else {
            ledger
        }
    })
    .unwrap();
    let service = Arc::new(network.service());
    let (id, key) = open(&network, &service, 1);
    service.cast_ballot(&id, ballot(&key, 1, b"early")).unwrap();
    service.cast_ballot(&id, ballot(&key, 2, b"bird")).unwrap();

    let shuffler = Arc::clone(&service);
    let handle = thread::spawn(move || shuffler.run_shuffle(&id));
    thread::sleep(Duration::from_millis(300));

    match service.cast_ballot(&id, ballot(&key, 3, b"late")) {
        Err(Error::Stage(StageError::Closed(_))) => {}
        other => panic!("unexpected {:?}", other),
    }
    match service.run_shuffle(&id) {
        Err(Error::Stage(StageError::Busy(_))) => {}
        other => panic!("unexpected {:?}", other),
    }

    let mixes = handle.join().unwrap().unwrap();
    assert_eq!(mixes.len(), 3);
    assert_eq!(service.get_box(&id).unwrap().ballots.len(), 2);
    match service.run_shuffle(&id) {
        Err(Error::Stage(StageError::NotPermitted(_, Stage::Shuffled))) => {}
        other => panic!("unexpected {:?}", other),
    }
    let shuffled = network.nodes[0]
        .board()
        .records(&id)
        .unwrap()
        .into_iter()
        .filter(|r| *r == Record::Stage(Stage::Shuffled))
        .count();
    assert_eq!(shuffled, 1);

    let decrypted = service.run_decryption(&id).unwrap();
    assert!(service.get_partials(&id).unwrap().iter().all(|p| !p.flag));
    assert_eq!(texts(&decrypted), expected(&[b"early", b"bird"]));

    network.shutdown();
}

#[test]
#[serial]
fn election_shuffle_resumes_after_failure() {
    setup_log();
    let network = LocalNetwork::with_views(3, config(), |i, ledger| {
        if i == 2 {
            Arc::new(CrashOnce {
                inner: ledger,
                crashed: AtomicBool::new(false),
            })
        } else {
            ledger
        }
    })
    .unwrap();
    let service = network.service();
    let (id, key) = open(&network, &service, 1);
    service.cast_ballot(&id, ballot(&key, 1, b"again")).unwrap();
    service.cast_ballot(&id, ballot(&key, 2, b"retry")).unwrap();

    match service.run_shuffle(&id) {
        Err(Error::Protocol(ProtocolError::Msg(_))) => {}
        other => panic!("unexpected {:?}", other),
    }
    let stored = service.get_mixes(&id).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(service.stage(&id).unwrap(), Stage::Running);

    let mixes = service.run_shuffle(&id).unwrap();
    assert_eq!(mixes.len(), 3);
    // the first two nodes did not shuffle again
    assert_eq!(&mixes[0..2], &stored[..]);
    assert_eq!(service.stage(&id).unwrap(), Stage::Shuffled);

    let decrypted = service.run_decryption(&id).unwrap();
    assert_eq!(texts(&decrypted), expected(&[b"again", b"retry"]));

    network.shutdown();
}

#[test]
#[serial]
fn election_dkg_justified_complaint() {
    setup_log();
    let network = bad_dealer_network(false, dkg_config());
    let service = network.service();
    let (id, key) = open(&network, &service, 1);
    service.cast_ballot(&id, ballot(&key, 1, b"fair")).unwrap();
    service.cast_ballot(&id, ballot(&key, 2, b"square")).unwrap();
    service.run_shuffle(&id).unwrap();

    // node 1 recovered its share from the justification
    let decrypted = service.run_decryption(&id).unwrap();
    assert!(service.get_partials(&id).unwrap().iter().all(|p| !p.flag));
    assert_eq!(texts(&decrypted), expected(&[b"fair", b"square"]));

    network.shutdown();
}

#[test]
#[serial]
fn election_dkg_excludes_silent_dealer() {
    setup_log();
    let network = bad_dealer_network(true, dkg_config());
    let service = network.service();
    let (id, key) = open(&network, &service, 1);
    service.cast_ballot(&id, ballot(&key, 1, b"in")).unwrap();
    service.cast_ballot(&id, ballot(&key, 2, b"out")).unwrap();
    service.run_shuffle(&id).unwrap();

    // the excluded dealer holds no share of the key
    let decrypted = service.run_decryption(&id).unwrap();
    let flagged: Vec<u32> = service
        .get_partials(&id)
        .unwrap()
        .iter()
        .filter(|p| p.flag)
        .map(|p| p.index)
        .collect();
    assert_eq!(flagged, vec![2]);
    assert_eq!(texts(&decrypted), expected(&[b"in", b"out"]));

    network.shutdown();
}

#[test]
#[serial]
fn election_dkg_below_threshold_aborts() {
    setup_log();
    let network = bad_dealer_network(true, dkg_config());
    let service = network.service();
    let request = OpenElection {
        name: "quorum".to_string(),
        creator: 0,
        users: vec![1, 2],
        roster: network.roster(),
        threshold: 2,
        description: String::new(),
        end: String::new(),
    };
    match service.open_election(request) {
        Err(Error::Threshold(ThresholdError::Qual(2, 2))) => {}
        other => panic!("unexpected {:?}", other),
    }

    // every node drops the session of the failed election
    let mut attempts = 0;
    while network.nodes.iter().any(|n| n.has_any_session()) && attempts < 100 {
        thread::sleep(Duration::from_millis(20));
        attempts += 1;
    }
    assert!(network.nodes.iter().all(|n| !n.has_any_session()));

    network.shutdown();
}

#[test]
#[serial]
fn election_parallel_sessions() {
    setup_log();
    let network = LocalNetwork::new(3, config()).unwrap();
    let handles: Vec<_> = (0..2)
        .map(|e| {
            let service = network.service();
            let roster = network.roster();
            thread::spawn(move || {
                let request = OpenElection {
                    name: format!("parallel {}", e),
                    creator: 0,
                    users: vec![1, 2],
                    roster,
                    threshold: 1,
                    description: String::new(),
                    end: String::new(),
                };
                let (id, key) = service.open_election(request).unwrap();
                service.cast_ballot(&id, ballot(&key, 1, b"one")).unwrap();
                service.cast_ballot(&id, ballot(&key, 2, b"two")).unwrap();
                service.run_shuffle(&id).unwrap();
                service.run_decryption(&id).unwrap()
            })
        })
        .collect();

    for handle in handles {
        let decrypted = handle.join().unwrap();
        assert_eq!(texts(&decrypted), expected(&[b"one", b"two"]));
    }

    network.shutdown();
}
