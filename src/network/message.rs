//! Wire envelopes exchanged with peers
//!
//! Every frame is a JSON object keyed by `message`. Requests ask for a
//! summary or for a range of blocks; responses carry blocks or an error.
//! Envelopes are decoded once here into tagged variants so handlers never
//! look at raw JSON.

use crate::core::Block;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const SUMMARY: &str = "summary";
pub const CHAIN: &str = "chain";

/// Error text for a range whose first index is not in the chain
pub const ID1_NOT_FOUND: &str = "could not find id1 in chain";
/// Error text for a request kind this node does not serve
pub const UNKNOWN_MESSAGE: &str = "unknown message";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("malformed request")]
    Malformed,
    #[error("invalid 'id1' value")]
    InvalidId1,
    #[error("invalid 'id2' value")]
    InvalidId2,
    #[error("summary must carry exactly two blocks and a cumulative difficulty")]
    MalformedSummary,
}

/// Inclusive range of block indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub first: u64,
    pub last: u64,
}

impl BlockRange {
    pub fn new(first: u64, last: u64) -> Self {
        Self { first, last }
    }
}

/// A peer asking us for data
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Summary,
    /// `None` asks for the full chain
    Chain(Option<BlockRange>),
    Unknown(String),
}

/// A peer answering one of our requests, or announcing its chain
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Summary {
        genesis: Block,
        tail: Block,
        cumdiff: u64,
    },
    Chain(Vec<Block>),
    Error {
        message: Option<String>,
        error: String,
    },
    Unknown(String),
}

/// Raw JSON shape shared by every frame
#[derive(Debug, Default, Serialize, Deserialize)]
struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blocks: Option<Vec<Block>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cumdiff: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id1: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id2: Option<Value>,
}

impl Envelope {
    fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    fn is_response(&self) -> bool {
        self.blocks.is_some() || self.error.is_some()
    }
}

/// How a frame should be dispatched
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(Result<Request, EnvelopeError>),
    Response(Result<Response, EnvelopeError>),
    /// Not a JSON envelope at all
    Unparseable,
}

impl Frame {
    /// Frames that carry `blocks` or `error` are responses, anything else
    /// is a request
    pub fn classify(text: &str) -> Self {
        match Envelope::parse(text) {
            Some(envelope) if envelope.is_response() => {
                Frame::Response(Response::from_envelope(envelope))
            }
            Some(envelope) => Frame::Request(Request::from_envelope(envelope)),
            None => Frame::Unparseable,
        }
    }
}

impl Request {
    fn from_envelope(envelope: Envelope) -> Result<Self, EnvelopeError> {
        let message = envelope.message.ok_or(EnvelopeError::Malformed)?;
        match message.as_str() {
            SUMMARY => Ok(Request::Summary),
            CHAIN => {
                if envelope.id1.is_none() && envelope.id2.is_none() {
                    return Ok(Request::Chain(None));
                }
                let first = envelope
                    .id1
                    .as_ref()
                    .and_then(Value::as_u64)
                    .ok_or(EnvelopeError::InvalidId1)?;
                let last = envelope
                    .id2
                    .as_ref()
                    .and_then(Value::as_u64)
                    .ok_or(EnvelopeError::InvalidId2)?;
                Ok(Request::Chain(Some(BlockRange::new(first, last))))
            }
            _ => Ok(Request::Unknown(message)),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let envelope = match self {
            Request::Summary => Envelope {
                message: Some(SUMMARY.into()),
                ..Default::default()
            },
            Request::Chain(range) => Envelope {
                message: Some(CHAIN.into()),
                id1: range.map(|r| Value::from(r.first)),
                id2: range.map(|r| Value::from(r.last)),
                ..Default::default()
            },
            Request::Unknown(kind) => Envelope {
                message: Some(kind.clone()),
                ..Default::default()
            },
        };
        serde_json::to_string(&envelope)
    }
}

impl Response {
    fn from_envelope(envelope: Envelope) -> Result<Self, EnvelopeError> {
        if let Some(error) = envelope.error {
            return Ok(Response::Error {
                message: envelope.message,
                error,
            });
        }

        let message = envelope.message.ok_or(EnvelopeError::Malformed)?;
        match message.as_str() {
            SUMMARY => {
                let (Some(blocks), Some(cumdiff)) = (envelope.blocks, envelope.cumdiff) else {
                    return Err(EnvelopeError::MalformedSummary);
                };
                let [genesis, tail]: [Block; 2] = blocks
                    .try_into()
                    .map_err(|_| EnvelopeError::MalformedSummary)?;
                Ok(Response::Summary {
                    genesis,
                    tail,
                    cumdiff,
                })
            }
            CHAIN => Ok(Response::Chain(envelope.blocks.unwrap_or_default())),
            _ => Ok(Response::Unknown(message)),
        }
    }

    /// Error answer to a request of kind `message`
    pub fn error(message: Option<&str>, error: impl Into<String>) -> Self {
        Response::Error {
            message: message.map(str::to_string),
            error: error.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let envelope = match self {
            Response::Summary {
                genesis,
                tail,
                cumdiff,
            } => Envelope {
                message: Some(SUMMARY.into()),
                blocks: Some(vec![genesis.clone(), tail.clone()]),
                cumdiff: Some(*cumdiff),
                ..Default::default()
            },
            Response::Chain(blocks) => Envelope {
                message: Some(CHAIN.into()),
                blocks: Some(blocks.clone()),
                ..Default::default()
            },
            Response::Error { message, error } => Envelope {
                message: message.clone(),
                error: Some(error.clone()),
                ..Default::default()
            },
            Response::Unknown(kind) => Envelope {
                message: Some(kind.clone()),
                ..Default::default()
            },
        };
        serde_json::to_string(&envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;

    fn request(text: &str) -> Result<Request, EnvelopeError> {
        match Frame::classify(text) {
            Frame::Request(request) => request,
            Frame::Unparseable => Err(EnvelopeError::Malformed),
            other => panic!("not a request: {other:?}"),
        }
    }

    fn response(text: &str) -> Result<Response, EnvelopeError> {
        match Frame::classify(text) {
            Frame::Response(response) => response,
            other => panic!("not a response: {other:?}"),
        }
    }

    #[test]
    fn test_request_parsing() {
        assert_eq!(request(r#"{"message":"summary"}"#), Ok(Request::Summary));
        assert_eq!(request(r#"{"message":"chain"}"#), Ok(Request::Chain(None)));
        assert_eq!(
            request(r#"{"message":"chain","id1":3,"id2":7}"#),
            Ok(Request::Chain(Some(BlockRange::new(3, 7))))
        );
        assert_eq!(
            request(r#"{"message":"peers"}"#),
            Ok(Request::Unknown("peers".into()))
        );
    }

    #[test]
    fn test_request_errors() {
        assert_eq!(request("not json"), Err(EnvelopeError::Malformed));
        assert_eq!(request(r#"{"id1":1}"#), Err(EnvelopeError::Malformed));
        assert_eq!(
            request(r#"{"message":"chain","id1":"x","id2":2}"#),
            Err(EnvelopeError::InvalidId1)
        );
        assert_eq!(
            request(r#"{"message":"chain","id1":1}"#),
            Err(EnvelopeError::InvalidId2)
        );
        assert_eq!(EnvelopeError::Malformed.to_string(), "malformed request");
        assert_eq!(EnvelopeError::InvalidId1.to_string(), "invalid 'id1' value");
    }

    #[test]
    fn test_chain_request_wire_shape() {
        let json = Request::Chain(Some(BlockRange::new(2, 5))).to_json().unwrap();
        assert_eq!(json, r#"{"message":"chain","id1":2,"id2":5}"#);
        assert_eq!(Request::Chain(None).to_json().unwrap(), r#"{"message":"chain"}"#);
    }

    #[test]
    fn test_summary_response() {
        let genesis = Block::genesis();
        let tail = Block::with_timestamp(
            1,
            genesis.hash.clone(),
            5,
            vec![Transaction::coinbase(1, "miner")],
            0,
            "node",
        );
        let summary = Response::Summary {
            genesis: genesis.clone(),
            tail: tail.clone(),
            cumdiff: 2,
        };
        let json = summary.to_json().unwrap();
        assert_eq!(response(&json), Ok(summary));

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["blocks"].as_array().unwrap().len(), 2);
        assert_eq!(value["cumdiff"], 2);
    }

    #[test]
    fn test_summary_needs_two_blocks() {
        let genesis = serde_json::to_string(&Block::genesis()).unwrap();
        let text = format!(r#"{{"message":"summary","blocks":[{genesis}],"cumdiff":1}}"#);
        assert_eq!(response(&text), Err(EnvelopeError::MalformedSummary));
    }

    #[test]
    fn test_error_responses() {
        assert_eq!(
            response(r#"{"error":"malformed request"}"#),
            Ok(Response::error(None, "malformed request"))
        );
        let json = Response::error(Some(CHAIN), ID1_NOT_FOUND).to_json().unwrap();
        assert_eq!(json, r#"{"message":"chain","error":"could not find id1 in chain"}"#);
    }

    #[test]
    fn test_frame_classification() {
        assert!(matches!(
            Frame::classify(r#"{"message":"summary"}"#),
            Frame::Request(Ok(Request::Summary))
        ));
        assert!(matches!(
            Frame::classify(r#"{"message":"chain","blocks":[]}"#),
            Frame::Response(Ok(Response::Chain(blocks))) if blocks.is_empty()
        ));
        assert!(matches!(
            Frame::classify(r#"{"error":"malformed request"}"#),
            Frame::Response(Ok(Response::Error { .. }))
        ));
        assert!(matches!(
            Frame::classify(r#"{"blocks":[]}"#),
            Frame::Response(Err(EnvelopeError::Malformed))
        ));
        assert_eq!(Frame::classify("[1, 2"), Frame::Unparseable);
    }
}
