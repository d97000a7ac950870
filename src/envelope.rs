//! Transport envelopes and their binary-header wire shape.
//!
//! Brokers carry the envelope identity and chunk metadata in message headers and the payload
//! in the message body; the in-process channel moves [`Envelope`] values directly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HEADER_ID: &str = "ce_id";
pub const HEADER_SOURCE: &str = "ce_source";
pub const HEADER_TYPE: &str = "ce_type";
pub const HEADER_CHUNK_GROUP: &str = "ce_chunkgroup";
pub const HEADER_CHUNK_INDEX: &str = "ce_chunkindex";
pub const HEADER_CHUNK_TOTAL: &str = "ce_chunktotal";

/// Position of one chunk inside a split message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub group_key: String,
    pub index: usize,
    pub total: usize,
}

/// One transport message. Without chunk metadata it is a complete logical message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub chunk: Option<ChunkMeta>,
}

/// Errors decoding an envelope from broker headers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    #[error("header {header} is not valid: {reason}")]
    InvalidHeader { header: &'static str, reason: String },
}

impl Envelope {
    /// New complete envelope with a random id.
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            payload,
            chunk: None,
        }
    }

    /// Split `payload` into envelopes of at most `max_chunk` bytes sharing one group key.
    ///
    /// A payload that fits in one chunk is returned as a single unchunked envelope.
    pub fn split(
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: &[u8],
        max_chunk: usize,
    ) -> Vec<Envelope> {
        let source = source.into();
        let event_type = event_type.into();
        let max_chunk = max_chunk.max(1);
        if payload.len() <= max_chunk {
            return vec![Envelope::new(source, event_type, payload.to_vec())];
        }

        let group_key = uuid::Uuid::new_v4().to_string();
        let total = payload.len().div_ceil(max_chunk);
        payload
            .chunks(max_chunk)
            .enumerate()
            .map(|(index, part)| Envelope {
                id: format!("{group_key}-{index}"),
                source: source.clone(),
                event_type: event_type.clone(),
                payload: part.to_vec(),
                chunk: Some(ChunkMeta { group_key: group_key.clone(), index, total }),
            })
            .collect()
    }

    pub fn is_chunk(&self) -> bool {
        self.chunk.is_some()
    }

    /// Header list for a broker message carrying this envelope.
    pub fn headers(&self) -> Vec<(&'static str, Vec<u8>)> {
        let mut headers = vec![
            (HEADER_ID, self.id.clone().into_bytes()),
            (HEADER_SOURCE, self.source.clone().into_bytes()),
            (HEADER_TYPE, self.event_type.clone().into_bytes()),
        ];
        if let Some(chunk) = &self.chunk {
            headers.push((HEADER_CHUNK_GROUP, chunk.group_key.clone().into_bytes()));
            headers.push((HEADER_CHUNK_INDEX, chunk.index.to_string().into_bytes()));
            headers.push((HEADER_CHUNK_TOTAL, chunk.total.to_string().into_bytes()));
        }
        headers
    }

    /// Rebuild an envelope from broker headers and body.
    ///
    /// Chunk headers come as a set: none of them means a complete message, and a partial set
    /// is reported as the first missing header.
    pub fn from_headers<'a, I>(headers: I, payload: Vec<u8>) -> Result<Self, EnvelopeError>
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let mut id = None;
        let mut source = None;
        let mut event_type = None;
        let mut group = None;
        let mut index = None;
        let mut total = None;

        for (key, value) in headers {
            match key {
                HEADER_ID => id = Some(text(HEADER_ID, value)?),
                HEADER_SOURCE => source = Some(text(HEADER_SOURCE, value)?),
                HEADER_TYPE => event_type = Some(text(HEADER_TYPE, value)?),
                HEADER_CHUNK_GROUP => group = Some(text(HEADER_CHUNK_GROUP, value)?),
                HEADER_CHUNK_INDEX => index = Some(number(HEADER_CHUNK_INDEX, value)?),
                HEADER_CHUNK_TOTAL => total = Some(number(HEADER_CHUNK_TOTAL, value)?),
                _ => {}
            }
        }

        let chunk = match (group, index, total) {
            (None, None, None) => None,
            (Some(group_key), Some(index), Some(total)) => Some(ChunkMeta { group_key, index, total }),
            (None, _, _) => return Err(EnvelopeError::MissingHeader(HEADER_CHUNK_GROUP)),
            (_, None, _) => return Err(EnvelopeError::MissingHeader(HEADER_CHUNK_INDEX)),
            (_, _, None) => return Err(EnvelopeError::MissingHeader(HEADER_CHUNK_TOTAL)),
        };

        Ok(Self {
            id: id.ok_or(EnvelopeError::MissingHeader(HEADER_ID))?,
            source: source.ok_or(EnvelopeError::MissingHeader(HEADER_SOURCE))?,
            event_type: event_type.ok_or(EnvelopeError::MissingHeader(HEADER_TYPE))?,
            payload,
            chunk,
        })
    }
}

fn text(header: &'static str, value: &[u8]) -> Result<String, EnvelopeError> {
    String::from_utf8(value.to_vec())
        .map_err(|e| EnvelopeError::InvalidHeader { header, reason: e.to_string() })
}

fn number(header: &'static str, value: &[u8]) -> Result<usize, EnvelopeError> {
    text(header, value)?
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| EnvelopeError::InvalidHeader { header, reason: e.to_string() })
}
