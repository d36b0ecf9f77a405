use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::StageError;

/// Election lifecycle. Stages only ever advance.
#[repr(u8)]
#[derive(
    Serialize,
    Deserialize,
    Display,
    TryFromPrimitive,
    IntoPrimitive,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
pub enum Stage {
    Created,
    Running,
    Shuffled,
    Decrypted,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Created => Some(Stage::Running),
            Stage::Running => Some(Stage::Shuffled),
            Stage::Shuffled => Some(Stage::Decrypted),
            Stage::Decrypted => None,
        }
    }

    /// Checks that `operation` may run in this stage.
    pub fn require(self, required: Stage, operation: &'static str) -> Result<(), StageError> {
        if self == required {
            Ok(())
        } else {
            Err(StageError::NotPermitted(operation, self))
        }
    }

    /// Checks that moving to `target` is the single permitted step forward.
    pub fn advance(self, target: Stage) -> Result<Stage, StageError> {
        if self.next() == Some(target) {
            Ok(target)
        } else {
            Err(StageError::NotPermitted("stage transition", self))
        }
    }
}
