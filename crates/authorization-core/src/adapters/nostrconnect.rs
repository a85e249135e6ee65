//! `nostrconnect://` URL parsing (§6). The core never emits bunker URLs
//! itself -- that's the transport's job -- but it does parse the URI a
//! remote client hands the user to bootstrap a connection.

use url::Url;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::nip46::NostrConnectRequest;

const MAX_NAME_LEN: usize = 50;
const DEFAULT_NAME: &str = "Unknown App";

/// One `type[:kind]` entry from the `perms=` query parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedPermission {
    pub request_type: String,
    pub event_kind: Option<u16>,
}

/// The fully parsed, normalized form of a `nostrconnect://` URI (§6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NostrConnectUri {
    pub client_pubkey: String,
    pub relays: Vec<String>,
    pub secret: String,
    pub name: String,
    pub permissions: Vec<ParsedPermission>,
}

impl NostrConnectUri {
    /// Rebuilds the canonical query form of this record so round-tripping
    /// through `parse` again reproduces the same normalized value (§8).
    pub fn render(&self) -> String {
        let mut url = format!("nostrconnect://{}", self.client_pubkey);
        let mut params = Vec::new();
        for relay in &self.relays {
            params.push(format!("relay={}", url::form_urlencoded::byte_serialize(relay.as_bytes()).collect::<String>()));
        }
        params.push(format!("secret={}", self.secret));
        params.push(format!(
            "name={}",
            url::form_urlencoded::byte_serialize(self.name.as_bytes()).collect::<String>()
        ));
        if !self.permissions.is_empty() {
            let perms = self
                .permissions
                .iter()
                .map(|p| match p.event_kind {
                    Some(kind) => format!("{}:{kind}", p.request_type),
                    None => p.request_type.clone(),
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(format!("perms={perms}"));
        }
        url.push('?');
        url.push_str(&params.join("&"));
        url
    }

    pub fn into_connect_request(self) -> NostrConnectRequest {
        NostrConnectRequest {
            client_pubkey: self.client_pubkey,
            relays: self.relays,
            secret: self.secret,
        }
    }
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Hosts a `wss://` relay URL must not resolve to, per §6 "excluding
/// private/internal hosts". An explicit denylist rather than a DNS
/// round-trip at parse time.
fn is_private_or_internal_host(host: &str) -> bool {
    let host = host.to_lowercase();
    if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
        return true;
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return match ip {
            std::net::IpAddr::V4(v4) => {
                v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
            }
            std::net::IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
        };
    }
    false
}

fn validate_relay(relay: &str) -> CoreResult<String> {
    let parsed = Url::parse(relay).map_err(|_| CoreError::InvalidInput {
        reason: "malformed relay URL".to_string(),
    })?;
    if parsed.scheme() != "wss" {
        return Err(CoreError::InvalidInput {
            reason: "relay URLs must use wss://".to_string(),
        });
    }
    let host = parsed.host_str().ok_or_else(|| CoreError::InvalidInput {
        reason: "relay URL has no host".to_string(),
    })?;
    if is_private_or_internal_host(host) {
        return Err(CoreError::InvalidInput {
            reason: "relay host must not be private or internal".to_string(),
        });
    }
    Ok(relay.to_string())
}

/// Sanitizes a value for display per §4.11: strips C0 controls, DEL, bidi
/// controls, combining marks, and truncates to 500 chars. Used here for
/// the `name=` parameter; the interactive adapter applies it again to
/// whatever event content it renders.
pub fn sanitize_display(input: &str) -> String {
    const TRUNCATE_LEN: usize = 500;
    let filtered: String = input
        .chars()
        .filter(|&c| {
            if c.is_control() {
                return false;
            }
            matches!(c,
                '\u{200E}' | '\u{200F}' |
                '\u{202A}'..='\u{202E}' |
                '\u{2060}'..='\u{206F}' |
                '\u{FEFF}' |
                '\u{0300}'..='\u{036F}'
            ).then_some(()).is_none()
        })
        .collect();
    filtered.chars().take(TRUNCATE_LEN).collect()
}

/// Parses a `perms=` entry list: `type[:kind]` pairs, comma separated.
/// Unknown types drop the pair silently; `kind` out of `0..=65535` drops
/// the pair too.
fn parse_permissions(raw: &str) -> Vec<ParsedPermission> {
    const KNOWN_TYPES: [&str; 7] = [
        "get_public_key",
        "sign_event",
        "nip04_encrypt",
        "nip04_decrypt",
        "nip44_encrypt",
        "nip44_decrypt",
        "connect",
    ];
    raw.split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|entry| {
            let mut parts = entry.splitn(2, ':');
            let request_type = parts.next()?.to_string();
            if !KNOWN_TYPES.contains(&request_type.as_str()) {
                return None;
            }
            let event_kind = match parts.next() {
                Some(kind_str) => match kind_str.parse::<u32>() {
                    Ok(k) if k <= u16::MAX as u32 => Some(k as u16),
                    _ => return None,
                },
                None => None,
            };
            Some(ParsedPermission { request_type, event_kind })
        })
        .collect()
}

/// Parses and validates a `nostrconnect://` URI per §6's rules.
pub fn parse(uri: &str) -> CoreResult<NostrConnectUri> {
    let parsed = Url::parse(uri).map_err(|_| CoreError::InvalidInput {
        reason: "malformed nostrconnect URI".to_string(),
    })?;
    if parsed.scheme() != "nostrconnect" {
        return Err(CoreError::InvalidInput {
            reason: "scheme must be nostrconnect".to_string(),
        });
    }
    let client_pubkey = parsed
        .host_str()
        .ok_or_else(|| CoreError::InvalidInput {
            reason: "missing client pubkey authority".to_string(),
        })?
        .to_lowercase();
    if !is_hex64(&client_pubkey) {
        return Err(CoreError::InvalidInput {
            reason: "client pubkey must be 64 hex chars".to_string(),
        });
    }

    let mut relays = Vec::new();
    let mut secret = None;
    let mut name = None;
    let mut perms = Vec::new();

    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "relay" => relays.push(validate_relay(&value)?),
            "secret" => secret = Some(value.into_owned()),
            "name" => name = Some(value.into_owned()),
            "perms" => perms = parse_permissions(&value),
            _ => {}
        }
    }

    if relays.is_empty() {
        return Err(CoreError::InvalidInput {
            reason: "at least one relay is required".to_string(),
        });
    }

    let secret = secret.ok_or_else(|| CoreError::InvalidInput {
        reason: "secret parameter is required".to_string(),
    })?;
    if secret.is_empty()
        || secret.len() > 64
        || !secret.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(CoreError::InvalidInput {
            reason: "secret must match ^[0-9a-f]{1,64}$".to_string(),
        });
    }

    let name = name
        .map(|n| sanitize_display(&n))
        .filter(|n| !n.is_empty())
        .map(|n| n.chars().take(MAX_NAME_LEN).collect::<String>())
        .unwrap_or_else(|| DEFAULT_NAME.to_string());

    Ok(NostrConnectUri {
        client_pubkey,
        relays,
        secret,
        name,
        permissions: perms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pubkey() -> String {
        "a".repeat(64)
    }

    #[test]
    fn parses_minimal_valid_uri() {
        let uri = format!(
            "nostrconnect://{}?relay=wss://relay.example.com&secret=abc123",
            pubkey()
        );
        let parsed = parse(&uri).unwrap();
        assert_eq!(parsed.client_pubkey, pubkey());
        assert_eq!(parsed.relays, vec!["wss://relay.example.com".to_string()]);
        assert_eq!(parsed.secret, "abc123");
        assert_eq!(parsed.name, DEFAULT_NAME);
    }

    #[test]
    fn rejects_non_wss_relay() {
        let uri = format!(
            "nostrconnect://{}?relay=ws://relay.example.com&secret=abc",
            pubkey()
        );
        assert!(parse(&uri).is_err());
    }

    #[test]
    fn rejects_private_relay_host() {
        let uri = format!(
            "nostrconnect://{}?relay=wss://127.0.0.1&secret=abc",
            pubkey()
        );
        assert!(parse(&uri).is_err());
    }

    #[test]
    fn rejects_missing_relay() {
        let uri = format!("nostrconnect://{}?secret=abc", pubkey());
        assert!(parse(&uri).is_err());
    }

    #[test]
    fn rejects_non_hex_secret() {
        let uri = format!(
            "nostrconnect://{}?relay=wss://relay.example.com&secret=not-hex!",
            pubkey()
        );
        assert!(parse(&uri).is_err());
    }

    #[test]
    fn rejects_non_hex64_pubkey() {
        let uri = "nostrconnect://short?relay=wss://relay.example.com&secret=abc";
        assert!(parse(uri).is_err());
    }

    #[test]
    fn name_defaults_when_absent() {
        let uri = format!(
            "nostrconnect://{}?relay=wss://relay.example.com&secret=abc",
            pubkey()
        );
        assert_eq!(parse(&uri).unwrap().name, DEFAULT_NAME);
    }

    #[test]
    fn parses_perms_and_drops_unknown_types() {
        let uri = format!(
            "nostrconnect://{}?relay=wss://relay.example.com&secret=abc&perms=sign_event:1,bogus_type,get_public_key",
            pubkey()
        );
        let parsed = parse(&uri).unwrap();
        assert_eq!(parsed.permissions.len(), 2);
        assert_eq!(parsed.permissions[0].request_type, "sign_event");
        assert_eq!(parsed.permissions[0].event_kind, Some(1));
        assert_eq!(parsed.permissions[1].request_type, "get_public_key");
    }

    #[test]
    fn round_trips_through_parse_render_parse() {
        let uri = format!(
            "nostrconnect://{}?relay=wss://relay.example.com&secret=abc123&name=My+App",
            pubkey()
        );
        let first = parse(&uri).unwrap();
        let rendered = first.render();
        let second = parse(&rendered).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn sanitize_display_strips_bidi_and_truncates() {
        let input = format!("{}hello\u{202E}world", "x".repeat(600));
        let sanitized = sanitize_display(&input);
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains('\u{202E}'));
    }
}
