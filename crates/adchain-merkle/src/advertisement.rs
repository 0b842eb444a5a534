//! Advertisement node definition and builder.
//!
//! Each advertisement contains:
//! - A content identifier computed from its contents
//! - An optional link to the previous advertisement in the chain
//! - The provider that published it
//! - An opaque payload (raw bytes or a structured node)

use crate::cid::{Cid, CidHasher};
use serde::{Deserialize, Serialize};

/// The payload carried by an advertisement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Raw bytes, returned verbatim when read back.
    Bytes(Vec<u8>),

    /// A structured payload node.
    Structured(serde_json::Value),
}

impl Payload {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Payload::Bytes(data.into())
    }

    pub fn structured(value: serde_json::Value) -> Self {
        Payload::Structured(value)
    }

    /// The raw byte view, if this payload is a bytes node.
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(data) => Some(data),
            Payload::Structured(_) => None,
        }
    }

    /// Decode the payload for readers: raw bytes first, then the structured
    /// encoding of the node.
    pub fn decode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Payload::Bytes(data) => Ok(data.clone()),
            Payload::Structured(value) => serde_json::to_vec(value),
        }
    }

    fn type_byte(&self) -> u8 {
        match self {
            Payload::Bytes(_) => 1,
            Payload::Structured(_) => 2,
        }
    }

    /// Canonical bytes used for hashing. `serde_json::Value` keeps object
    /// keys sorted, so the encoding is stable.
    fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Bytes(data) => data.clone(),
            Payload::Structured(value) => value.to_string().into_bytes(),
        }
    }
}

/// An immutable, content-addressed link in the advertisement chain.
///
/// The cid covers the previous-link, the provider and the payload, so two
/// advertisements with identical contents are hash-identical.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub cid: Cid,

    /// Chain predecessor. `None` for the first advertisement.
    pub previous: Option<Cid>,

    /// The provider that published this advertisement.
    pub provider: String,

    pub payload: Payload,
}

impl Advertisement {
    /// Check if this advertisement starts a chain.
    pub fn is_genesis(&self) -> bool {
        self.previous.is_none()
    }

    fn compute_cid(previous: Option<&Cid>, provider: &str, payload: &Payload) -> Cid {
        let mut hasher = CidHasher::new();

        match previous {
            Some(prev) => {
                hasher.update(&[1]);
                hasher.update(prev.as_bytes());
            }
            None => hasher.update(&[0]),
        }

        hasher.update_field(provider.as_bytes());

        hasher.update(&[payload.type_byte()]);
        hasher.update_field(&payload.canonical_bytes());

        hasher.finalize()
    }

    /// Verify that the cid matches the advertisement's contents.
    pub fn verify(&self) -> bool {
        Self::compute_cid(self.previous.as_ref(), &self.provider, &self.payload) == self.cid
    }
}

/// Builder for creating advertisements.
#[derive(Clone, Debug, Default)]
pub struct AdvertisementBuilder {
    previous: Option<Cid>,
    provider: String,
    payload: Option<Payload>,
}

impl AdvertisementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link to the previous advertisement.
    pub fn with_previous(mut self, previous: Option<Cid>) -> Self {
        self.previous = previous;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Build the advertisement, computing its cid. A missing payload is an
    /// empty byte payload.
    pub fn build(self) -> Advertisement {
        let payload = self.payload.unwrap_or(Payload::Bytes(Vec::new()));
        let cid = Advertisement::compute_cid(self.previous.as_ref(), &self.provider, &payload);

        Advertisement {
            cid,
            previous: self.previous,
            provider: self.provider,
            payload,
        }
    }
}
