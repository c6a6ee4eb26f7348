//! Protocol definition for the data socket.
//!
//! Every message travels as one length-delimited frame. A sender opens the
//! connection with `ConnectReq` naming its channel, then streams `FrameMsg`s
//! and may say goodbye with `Disconnect`.
use serde::{Deserialize, Serialize};

/// Definition of protocol messages.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ProtoMsg {
    ConnectReq(String),
    FrameMsg(FrameMsg),
    Disconnect,
}

/// A single JPEG-encoded camera frame.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FrameMsg {
    /// Sender-side frame counter, starting at zero for every connection.
    pub seq: u64,
    pub data: Vec<u8>,
}

impl FrameMsg {
    pub fn new(seq: u64, data: Vec<u8>) -> Self {
        Self { seq, data }
    }
}

impl ProtoMsg {
    pub fn serialize(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }
}
