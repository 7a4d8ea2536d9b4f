//! Wire envelope: canonical header encoding and message framing.
//!
//! Binary layout (big-endian integers):
//!
//! ```text
//! version (1) || dh (32) || pn (4) || n (4) || nonce (12) || ciphertext+tag (>= 16)
//! ```
//!
//! The first 41 bytes are the canonical header encoding. Both peers feed
//! exactly these bytes, followed by any caller-supplied associated data, into
//! the AEAD, so no header field can be altered without breaking the tag.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{RatchetError, Result};
use crate::types::{HEADER_LEN, NONCE_LEN, PUBLIC_KEY_LEN, TAG_LEN, VERSION};

/// Message header, sent in the clear and authenticated as associated data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sender's current ratchet public key
    pub dh: [u8; PUBLIC_KEY_LEN],
    /// Length of the sender's previous sending chain
    pub pn: u32,
    /// Index of this message in the sender's current chain
    pub n: u32,
}

impl Header {
    /// Canonical encoding, identical on both peers
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0] = VERSION;
        out[1..33].copy_from_slice(&self.dh);
        out[33..37].copy_from_slice(&self.pn.to_be_bytes());
        out[37..41].copy_from_slice(&self.n.to_be_bytes());
        out
    }

    /// Parse a canonical header
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_LEN {
            return Err(RatchetError::DecryptionFailed(format!(
                "header must be {} bytes, got {}",
                HEADER_LEN,
                bytes.len()
            )));
        }
        if bytes[0] != VERSION {
            return Err(RatchetError::DecryptionFailed(format!(
                "unsupported version {}",
                bytes[0]
            )));
        }
        let mut dh = [0u8; PUBLIC_KEY_LEN];
        dh.copy_from_slice(&bytes[1..33]);
        let pn = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);
        let n = u32::from_be_bytes([bytes[37], bytes[38], bytes[39], bytes[40]]);
        Ok(Self { dh, pn, n })
    }

    /// AEAD associated data: canonical header followed by caller data
    pub(crate) fn associated_data(&self, caller_ad: &[u8]) -> Vec<u8> {
        let mut ad = Vec::with_capacity(HEADER_LEN + caller_ad.len());
        ad.extend_from_slice(&self.encode());
        ad.extend_from_slice(caller_ad);
        ad
    }
}

/// Encrypted message produced by `encrypt` and consumed by `decrypt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub header: Header,
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the 16-byte tag appended
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Binary wire encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the binary wire encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN + NONCE_LEN + TAG_LEN {
            return Err(RatchetError::DecryptionFailed(format!(
                "envelope truncated: {} bytes",
                bytes.len()
            )));
        }
        let header = Header::decode(&bytes[..HEADER_LEN])?;
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[HEADER_LEN..HEADER_LEN + NONCE_LEN]);
        Ok(Self {
            header,
            nonce,
            ciphertext: bytes[HEADER_LEN + NONCE_LEN..].to_vec(),
        })
    }

    /// Shape checks that do not need any key
    pub(crate) fn validate(&self) -> Result<()> {
        if self.ciphertext.len() < TAG_LEN {
            return Err(RatchetError::DecryptionFailed(format!(
                "ciphertext shorter than tag: {} bytes",
                self.ciphertext.len()
            )));
        }
        Ok(())
    }

    /// Text form for JSON transports
    pub fn to_wire(&self) -> WireMessage {
        let mut body = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        body.extend_from_slice(&self.nonce);
        body.extend_from_slice(&self.ciphertext);
        WireMessage {
            header: BASE64.encode(self.header.encode()),
            body: BASE64.encode(&body),
        }
    }

    /// Parse the text form
    pub fn from_wire(msg: &WireMessage) -> Result<Self> {
        let header = BASE64
            .decode(&msg.header)
            .map_err(|e| RatchetError::InvalidEnvelope(format!("header: {}", e)))?;
        if header.len() != HEADER_LEN {
            return Err(RatchetError::InvalidEnvelope(format!(
                "header must be {} bytes, got {}",
                HEADER_LEN,
                header.len()
            )));
        }
        let body = BASE64
            .decode(&msg.body)
            .map_err(|e| RatchetError::InvalidEnvelope(format!("body: {}", e)))?;

        let mut bytes = header;
        bytes.extend_from_slice(&body);
        Self::from_bytes(&bytes)
    }
}

/// Envelope as base64 strings, the shape JSON transports carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Base64-encoded canonical header
    pub header: String,
    /// Base64-encoded nonce || ciphertext
    pub body: String,
}

impl WireMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RatchetError::InvalidEnvelope(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| RatchetError::InvalidEnvelope(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            header: Header {
                dh: [7u8; 32],
                pn: 3,
                n: 0x0102_0304,
            },
            nonce: [9u8; 12],
            ciphertext: vec![0xEE; 20],
        }
    }

    #[test]
    fn test_header_layout() {
        let h = sample().header;
        let enc = h.encode();
        assert_eq!(enc.len(), 41);
        assert_eq!(enc[0], VERSION);
        assert_eq!(&enc[1..33], &[7u8; 32]);
        assert_eq!(&enc[33..37], &[0, 0, 0, 3]);
        assert_eq!(&enc[37..41], &[1, 2, 3, 4]);
        assert_eq!(Header::decode(&enc).unwrap(), h);
    }

    #[test]
    fn test_header_rejects_bad_version_and_length() {
        let mut enc = sample().header.encode();
        enc[0] = 2;
        assert!(matches!(
            Header::decode(&enc),
            Err(RatchetError::DecryptionFailed(_))
        ));
        assert!(Header::decode(&enc[..40]).is_err());
    }

    #[test]
    fn test_envelope_binary_form() {
        let env = sample();
        let bytes = env.to_bytes();
        assert_eq!(bytes.len(), 41 + 12 + 20);
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), env);
    }

    #[test]
    fn test_envelope_rejects_truncation() {
        let bytes = sample().to_bytes();
        assert!(Envelope::from_bytes(&bytes[..41 + 12 + 15]).is_err());
        assert!(Envelope::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_wire_json_form() {
        let env = sample();
        let json = env.to_wire().to_json().unwrap();
        assert!(json.contains("\"header\""));
        assert!(json.contains("\"body\""));

        let wire = WireMessage::from_json(&json).unwrap();
        assert_eq!(Envelope::from_wire(&wire).unwrap(), env);
    }

    #[test]
    fn test_wire_rejects_bad_base64() {
        let wire = WireMessage {
            header: "not base64!".into(),
            body: String::new(),
        };
        assert!(matches!(
            Envelope::from_wire(&wire),
            Err(RatchetError::InvalidEnvelope(_))
        ));
        assert!(WireMessage::from_json("{").is_err());
    }

    #[test]
    fn test_wire_rejects_misplaced_header_boundary() {
        let env = sample();
        let bytes = env.to_bytes();

        // Same total bytes, split one byte late
        let wire = WireMessage {
            header: BASE64.encode(&bytes[..42]),
            body: BASE64.encode(&bytes[42..]),
        };
        assert!(matches!(
            Envelope::from_wire(&wire),
            Err(RatchetError::InvalidEnvelope(_))
        ));

        let wire = WireMessage {
            header: BASE64.encode(&bytes[..40]),
            body: BASE64.encode(&bytes[40..]),
        };
        assert!(matches!(
            Envelope::from_wire(&wire),
            Err(RatchetError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_associated_data_prefix() {
        let h = sample().header;
        let ad = h.associated_data(b"ctx");
        assert_eq!(&ad[..41], &h.encode());
        assert_eq!(&ad[41..], b"ctx");
    }

    #[test]
    fn test_validate_short_ciphertext() {
        let mut env = sample();
        env.ciphertext.truncate(15);
        assert!(env.validate().is_err());
    }
}
