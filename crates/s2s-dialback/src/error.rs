//! Error types for malformed protocol elements.
//!
//! These never leave the crate's public entry points: each is turned into a
//! stream error (or a SASL failure) on the offending stream.

use s2s_types::StreamErrorCondition;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// A required attribute is absent.
    #[error("missing '{0}' attribute")]
    MissingAttribute(&'static str),

    /// An addressing attribute is not a bare server domain.
    #[error("'{attr}' is not a server domain: {value}")]
    NotADomain {
        attr: &'static str,
        value: String,
    },

    /// The SASL payload is not valid base64 or UTF-8.
    #[error("malformed SASL payload")]
    Encoding,
}

impl WireError {
    /// Stream error condition used when closing a stream over this error.
    pub fn condition(&self) -> StreamErrorCondition {
        match self {
            Self::MissingAttribute(_) | Self::NotADomain { .. } => {
                StreamErrorCondition::ImproperAddressing
            }
            Self::Encoding => StreamErrorCondition::BadFormat,
        }
    }
}
