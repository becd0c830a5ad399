use serde::{Deserialize, Serialize};

use crate::error::NetplayError;

/// A message between netplay peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Client to host: asks for a player slot.
    Join,
    /// Host to client: the assigned player slot and the state to resume from.
    Start {
        player_idx: u8,
        frame: u32,
        /// A [`State`](crate::State) in its byte form.
        state: Vec<u8>,
    },
    /// Inputs of `player_idx` for consecutive frames starting at `frame`.
    Input {
        player_idx: u8,
        frame: u32,
        inputs: Vec<u8>,
    },
}

impl Message {
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetplayError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NetplayError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
