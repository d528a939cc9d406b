//! Endpoint identities.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{wire, Error, Result};

const ABSENT: u8 = 0;
const PRESENT: u8 = 1;

/// Identifies a logical process endpoint reachable at `url`.
///
/// Equality and hashing use both the url and the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId {
    url: String,
    name: String,
}

impl EndpointId {
    /// Creates a new endpoint identity.
    #[must_use]
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
        }
    }

    /// Returns the url this endpoint is reachable at.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the process name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encodes an optional identity.
    ///
    /// Wire format: `[1 byte flag]` followed, when the flag is 1, by the url
    /// and the name as length-prefixed UTF-8 strings.
    pub fn encode(id: Option<&EndpointId>, buf: &mut impl BufMut) -> Result<()> {
        match id {
            Some(id) => {
                buf.put_u8(PRESENT);
                wire::put_str(buf, &id.url)?;
                wire::put_str(buf, &id.name)?;
            }
            None => buf.put_u8(ABSENT),
        }
        Ok(())
    }

    /// Decodes an optional identity written by [`EndpointId::encode`].
    pub fn decode(buf: &mut impl Buf) -> Result<Option<EndpointId>> {
        match wire::get_u8(buf, "endpoint flag")? {
            ABSENT => Ok(None),
            PRESENT => {
                let url = wire::get_str(buf)?;
                let name = wire::get_str(buf)?;
                Ok(Some(EndpointId { url, name }))
            }
            other => Err(Error::Decode(format!("invalid endpoint flag: {other}"))),
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.url)
    }
}
