//! The inbound request envelope, common to both transports.

use serde::{Deserialize, Serialize};

/// Maximum accepted size of `Request::content`, in bytes.
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// Maximum accepted length of `Request::id` and `Request::peer_pubkey`.
pub const MAX_ID_LEN: usize = 128;

/// The kind of cryptographic operation a caller is asking the signer to
/// perform. Kept flat (no nested payload) so every component can match on
/// it without depending on the signer's wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    GetPublicKey,
    SignEvent,
    Nip04Encrypt,
    Nip04Decrypt,
    Nip44Encrypt,
    Nip44Decrypt,
    DecryptZapEvent,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetPublicKey => "get_public_key",
            Self::SignEvent => "sign_event",
            Self::Nip04Encrypt => "nip04_encrypt",
            Self::Nip04Decrypt => "nip04_decrypt",
            Self::Nip44Encrypt => "nip44_encrypt",
            Self::Nip44Decrypt => "nip44_decrypt",
            Self::DecryptZapEvent => "decrypt_zap_event",
        }
    }

    /// Parses the NIP-46 `method` field. `connect` and `ping` are handled
    /// one layer up (they never reach the signer), so they are not
    /// represented here.
    pub fn from_nip46_method(method: &str) -> Option<Self> {
        match method {
            "get_public_key" => Some(Self::GetPublicKey),
            "sign_event" => Some(Self::SignEvent),
            "nip04_encrypt" => Some(Self::Nip04Encrypt),
            "nip04_decrypt" => Some(Self::Nip04Decrypt),
            "nip44_encrypt" => Some(Self::Nip44Encrypt),
            "nip44_decrypt" => Some(Self::Nip44Decrypt),
            _ => None,
        }
    }
}

/// A single inbound request, already stripped of transport framing.
///
/// For `SignEvent`, `content` is the candidate event JSON; `event_kind` is
/// parsed out of it by the caller (IPC adapter or NIP-46 envelope handler)
/// before `Request` is constructed, since the authorization engine never
/// needs to parse event JSON itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub request_type: RequestType,
    /// Opaque payload bytes, already length-checked against
    /// `MAX_CONTENT_BYTES` by the caller.
    pub content: Vec<u8>,
    /// 64-hex-char peer pubkey, relevant to NIP-04/44 operations.
    pub peer_pubkey: Option<String>,
    /// Event kind, 0-65535, parsed from `content` for `SignEvent`; absent
    /// for any other request type or when parsing failed.
    pub event_kind: Option<u16>,
    /// Caller-supplied correlation id, echoed back on the IPC cursor.
    pub id: Option<String>,
}

impl Request {
    pub fn new(request_type: RequestType, content: Vec<u8>) -> Self {
        Self {
            request_type,
            content,
            peer_pubkey: None,
            event_kind: None,
            id: None,
        }
    }

    pub fn with_event_kind(mut self, kind: Option<u16>) -> Self {
        self.event_kind = kind;
        self
    }

    pub fn with_peer_pubkey(mut self, pubkey: impl Into<String>) -> Self {
        self.peer_pubkey = Some(pubkey.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Validates length caps per §4.10/§6. Does not validate hex-ness of
    /// `peer_pubkey`; that is the NIP-46 envelope's job (§4.1 step 2).
    pub fn validate_lengths(&self) -> Result<(), &'static str> {
        if self.content.len() > MAX_CONTENT_BYTES {
            return Err("content exceeds maximum size");
        }
        if let Some(id) = &self.id {
            if id.len() > MAX_ID_LEN {
                return Err("id exceeds maximum length");
            }
        }
        if let Some(pk) = &self.peer_pubkey {
            if pk.len() > MAX_ID_LEN {
                return Err("peer_pubkey exceeds maximum length");
            }
        }
        Ok(())
    }

    /// Sentinel `event_kind` used by the Permission Store for "any kind".
    pub const ANY_KIND: i32 = -1;

    /// The event kind as the signed sentinel value Permission Store keys
    /// operate on: the real kind if known, else [`Self::ANY_KIND`] is never
    /// returned here -- callers distinguish "kind absent" from "kind is the
    /// generic bucket" explicitly.
    pub fn event_kind_i32(&self) -> Option<i32> {
        self.event_kind.map(i32::from)
    }
}
