use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::bulletinboard::Ledger;
use crate::data::artifact::*;
use crate::data::bytes::{Deser, Ser};
use crate::election::Stage;
use crate::error::{Error, ProtocolError};

/// Typed view over a ledger. Every election lives on its own chain; the
/// first record of the chain is the `Election` itself.
#[derive(Clone)]
pub struct ElectionBoard {
    ledger: Arc<dyn Ledger>,
}

impl ElectionBoard {
    pub fn new(ledger: Arc<dyn Ledger>) -> ElectionBoard {
        ElectionBoard { ledger }
    }

    pub fn add(&self, id: &ElectionId, record: &Record) -> Result<usize, Error> {
        let bytes = record.ser()?;
        let position = self.ledger.append(id, bytes)?;
        debug!("Appended record at {} of {}", position, id);
        Ok(position)
    }

    pub fn records(&self, id: &ElectionId) -> Result<Vec<Record>, Error> {
        self.ledger
            .read_all(id)?
            .iter()
            .map(|bytes| Record::deser(bytes).map_err(Error::from))
            .collect()
    }

    pub fn latest(&self, id: &ElectionId) -> Result<Option<Record>, Error> {
        match self.ledger.read_latest(id)? {
            Some(bytes) => Ok(Some(Record::deser(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn master(&self, id: &ElectionId) -> Result<Master, Error> {
        self.records(id)?
            .into_iter()
            .find_map(|r| match r {
                Record::Master(m) => Some(m),
                _ => None,
            })
            .ok_or_else(|| ProtocolError::UnknownElection(id.to_string()).into())
    }

    pub fn election(&self, id: &ElectionId) -> Result<Election, Error> {
        self.records(id)?
            .into_iter()
            .find_map(|r| match r {
                Record::Election(e) => Some(e),
                _ => None,
            })
            .ok_or_else(|| ProtocolError::UnknownElection(id.to_string()).into())
    }

    pub fn stage(&self, id: &ElectionId) -> Result<Stage, Error> {
        let records = self.records(id)?;
        if !records.iter().any(|r| matches!(r, Record::Election(_))) {
            return Err(ProtocolError::UnknownElection(id.to_string()).into());
        }
        let stage = records
            .iter()
            .filter_map(|r| match r {
                Record::Stage(s) => Some(*s),
                _ => None,
            })
            .last()
            .unwrap_or(Stage::Created);

        Ok(stage)
    }

    /// The cast box: one ballot per voter, the last one they cast, in the
    /// order voters first cast. Once closed, the box no longer changes.
    pub fn get_box(&self, id: &ElectionId) -> Result<BallotBox, Error> {
        let mut positions: HashMap<User, usize> = HashMap::new();
        let mut ballots: Vec<Ballot> = vec![];
        for record in self.records(id)? {
            match record {
                Record::Ballot(ballot) => match positions.get(&ballot.user) {
                    Some(p) => ballots[*p] = ballot,
                    None => {
                        positions.insert(ballot.user, ballots.len());
                        ballots.push(ballot);
                    }
                },
                Record::Closed => break,
                _ => {}
            }
        }

        Ok(BallotBox { ballots })
    }

    /// Ledger position of the record that closed casting.
    pub fn closed_at(&self, id: &ElectionId) -> Result<Option<usize>, Error> {
        Ok(self
            .records(id)?
            .iter()
            .position(|r| matches!(r, Record::Closed)))
    }

    pub fn mixes(&self, id: &ElectionId) -> Result<Vec<Mix>, Error> {
        Ok(self
            .records(id)?
            .into_iter()
            .filter_map(|r| match r {
                Record::Mix(m) => Some(m),
                _ => None,
            })
            .collect())
    }

    pub fn partials(&self, id: &ElectionId) -> Result<Vec<Partial>, Error> {
        Ok(self
            .records(id)?
            .into_iter()
            .filter_map(|r| match r {
                Record::Partial(p) => Some(p),
                _ => None,
            })
            .collect())
    }

    pub fn decrypted(&self, id: &ElectionId) -> Result<Option<BallotBox>, Error> {
        Ok(self.records(id)?.into_iter().find_map(|r| match r {
            Record::Decrypted(b) => Some(b),
            _ => None,
        }))
    }
}
