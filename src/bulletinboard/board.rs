use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use crate::bulletinboard::BBError;

/// Append-only, ordered storage, one chain per id.
///
/// Implementations must be crash consistent: an append either happens
/// entirely or not at all. Records are never mutated or deleted.
pub trait Ledger: Send + Sync {
    fn append(&self, chain: &Uuid, record: Vec<u8>) -> Result<usize, BBError>;
    fn read_all(&self, chain: &Uuid) -> Result<Vec<Vec<u8>>, BBError>;
    fn read_latest(&self, chain: &Uuid) -> Result<Option<Vec<u8>>, BBError>;
}

#[derive(Default)]
pub struct MemLedger {
    data: RwLock<HashMap<Uuid, Vec<Vec<u8>>>>,
}

impl MemLedger {
    pub fn new() -> MemLedger {
        MemLedger::default()
    }
}

impl Ledger for MemLedger {
    fn append(&self, chain: &Uuid, record: Vec<u8>) -> Result<usize, BBError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| BBError::Msg("poisoned ledger lock".to_string()))?;
        let records = data.entry(*chain).or_insert_with(Vec::new);
        records.push(record);

        Ok(records.len() - 1)
    }

    fn read_all(&self, chain: &Uuid) -> Result<Vec<Vec<u8>>, BBError> {
        let data = self
            .data
            .read()
            .map_err(|_| BBError::Msg("poisoned ledger lock".to_string()))?;
        Ok(data.get(chain).cloned().unwrap_or_default())
    }

    fn read_latest(&self, chain: &Uuid) -> Result<Option<Vec<u8>>, BBError> {
        let data = self
            .data
            .read()
            .map_err(|_| BBError::Msg("poisoned ledger lock".to_string()))?;
        Ok(data.get(chain).and_then(|records| records.last().cloned()))
    }
}
