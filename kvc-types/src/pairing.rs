//! Pairing credentials.
//!
//! A pairing URI packages everything a client needs to reach the gateway
//! under a specific policy: the server's public key, the relay set, a fresh
//! client signing secret, the namespace, the allowed methods, and the limit
//! vector. The namespace and limits in the URI are advisory to the client;
//! the gateway's connection registry is authoritative.
//!
//! Textual form:
//!
//! ```text
//! nostr+kvconnect://<npub>?relay=<url>&relay=<url>&secret=<nsec>&ns=<ns>
//!     &cmds=<csv>&mps=<n>&bps=<n>&maxkey=<n>&maxval=<n>&mget_max=<n>&name=<label>
//! ```

use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Method, TypesError};

/// URI scheme for pairing credentials.
pub const URI_SCHEME: &str = "nostr+kvconnect";

/// Per-connection limit vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingLimits {
    /// Maximum accepted requests per rolling 60-second window.
    pub mps: u32,
    /// Maximum accepted request+response bytes per rolling 60-second window.
    pub bps: u64,
    /// Maximum key length in characters.
    pub max_key: usize,
    /// Maximum decoded value length in bytes.
    pub max_val: usize,
    /// Maximum number of keys in one `mget`.
    pub mget_max: usize,
}

impl Default for PairingLimits {
    fn default() -> Self {
        Self {
            mps: 60,
            bps: 1_048_576,
            max_key: 256,
            max_val: 65_536,
            mget_max: 16,
        }
    }
}

/// A 32-byte client signing secret.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ClientSecret([u8; 32]);

impl ClientSecret {
    /// Generate a fresh random secret.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// Intentionally opaque debug to avoid logging secrets
impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientSecret([REDACTED])")
    }
}

/// A parsed pairing credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingUri {
    /// Hex x-only public key of the gateway.
    pub server_pubkey: String,
    /// Relay URLs the gateway listens on. At least one.
    pub relays: Vec<String>,
    /// The client's signing secret.
    pub client_secret: ClientSecret,
    /// Namespace assigned to this client (advisory).
    pub namespace: String,
    /// Methods the client may call (advisory).
    pub methods: Vec<Method>,
    /// Limit vector (advisory).
    pub limits: PairingLimits,
    /// Optional human-readable label for the pairing.
    pub name: Option<String>,
}

impl PairingUri {
    /// Render the credential in its textual URI form.
    pub fn to_uri_string(&self) -> Result<String, TypesError> {
        let npub = encode_npub(&self.server_pubkey)?;
        let nsec = encode_nsec(self.client_secret.as_bytes());

        let mut uri = format!("{URI_SCHEME}://{npub}?");
        let mut params: Vec<(String, String)> = Vec::new();
        for relay in &self.relays {
            params.push(("relay".into(), relay.clone()));
        }
        params.push(("secret".into(), nsec));
        params.push(("ns".into(), self.namespace.clone()));
        let cmds: Vec<&str> = self.methods.iter().map(Method::as_str).collect();
        params.push(("cmds".into(), cmds.join(",")));
        params.push(("mps".into(), self.limits.mps.to_string()));
        params.push(("bps".into(), self.limits.bps.to_string()));
        params.push(("maxkey".into(), self.limits.max_key.to_string()));
        params.push(("maxval".into(), self.limits.max_val.to_string()));
        params.push(("mget_max".into(), self.limits.mget_max.to_string()));
        if let Some(name) = &self.name {
            params.push(("name".into(), name.clone()));
        }

        let encoded: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{k}={}", percent_encode(v)))
            .collect();
        uri.push_str(&encoded.join("&"));
        Ok(uri)
    }

    /// Parse a textual pairing URI.
    pub fn parse(input: &str) -> Result<Self, TypesError> {
        let prefix = format!("{URI_SCHEME}://");
        let rest = input
            .strip_prefix(&prefix)
            .ok_or_else(|| TypesError::InvalidUri(format!("missing {URI_SCHEME}:// scheme")))?;

        let (host, query) = rest
            .split_once('?')
            .ok_or_else(|| TypesError::InvalidUri("missing query string".to_string()))?;

        let server_pubkey = decode_npub(host)?;

        let mut relays = Vec::new();
        let mut secret = None;
        let mut namespace = None;
        let mut methods = Method::ALL.to_vec();
        let mut limits = PairingLimits::default();
        let mut name = None;

        for pair in query.split('&') {
            let (key, raw_value) = pair
                .split_once('=')
                .ok_or_else(|| TypesError::InvalidUri(format!("malformed parameter: {pair}")))?;
            let value = percent_decode(raw_value)?;

            match key {
                "relay" => relays.push(value),
                "secret" => secret = Some(decode_nsec(&value)?),
                "ns" => namespace = Some(value),
                "cmds" => {
                    methods = value
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(|s| {
                            s.parse::<Method>()
                                .map_err(|_| TypesError::InvalidUri(format!("unknown method: {s}")))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                }
                "mps" => limits.mps = parse_int(key, &value)? as u32,
                "bps" => limits.bps = parse_int(key, &value)?,
                "maxkey" => limits.max_key = parse_int(key, &value)? as usize,
                "maxval" => limits.max_val = parse_int(key, &value)? as usize,
                "mget_max" => limits.mget_max = parse_int(key, &value)? as usize,
                "name" => name = Some(value),
                // Unknown parameters are ignored for forward compatibility
                _ => {}
            }
        }

        if relays.is_empty() {
            return Err(TypesError::InvalidUri("no relay parameter".to_string()));
        }

        Ok(Self {
            server_pubkey,
            relays,
            client_secret: secret
                .ok_or_else(|| TypesError::InvalidUri("missing secret parameter".to_string()))?,
            namespace: namespace
                .ok_or_else(|| TypesError::InvalidUri("missing ns parameter".to_string()))?,
            methods,
            limits,
            name,
        })
    }
}

fn parse_int(key: &str, value: &str) -> Result<u64, TypesError> {
    value
        .parse::<u64>()
        .map_err(|_| TypesError::InvalidUri(format!("{key} is not a positive integer: {value}")))
}

/// Encode a 32-byte x-only public key (hex) as `npub…` bech32.
pub fn encode_npub(pubkey_hex: &str) -> Result<String, TypesError> {
    let bytes = hex::decode(pubkey_hex)
        .map_err(|e| TypesError::InvalidBech32(format!("bad pubkey hex: {e}")))?;
    if bytes.len() != 32 {
        return Err(TypesError::InvalidBech32(format!(
            "pubkey must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    let hrp = Hrp::parse("npub").expect("static hrp is valid");
    bech32::encode::<Bech32>(hrp, &bytes).map_err(|e| TypesError::InvalidBech32(e.to_string()))
}

/// Decode an `npub…` bech32 string to a hex public key.
pub fn decode_npub(input: &str) -> Result<String, TypesError> {
    let (_, data) = decode_checked(input, "npub")?;
    Ok(hex::encode(data))
}

/// Encode a 32-byte secret as `nsec…` bech32.
pub fn encode_nsec(secret: &[u8; 32]) -> String {
    let hrp = Hrp::parse("nsec").expect("static hrp is valid");
    bech32::encode::<Bech32>(hrp, secret).expect("32-byte payload is within bech32 limits")
}

/// Decode an `nsec…` bech32 string to a [`ClientSecret`].
pub fn decode_nsec(input: &str) -> Result<ClientSecret, TypesError> {
    let (_, data) = decode_checked(input, "nsec")?;
    let bytes: [u8; 32] = data
        .try_into()
        .map_err(|_| TypesError::InvalidBech32("secret must be 32 bytes".to_string()))?;
    Ok(ClientSecret::from_bytes(bytes))
}

fn decode_checked(input: &str, expected_hrp: &str) -> Result<(String, Vec<u8>), TypesError> {
    let (hrp, data) =
        bech32::decode(input).map_err(|e| TypesError::InvalidBech32(e.to_string()))?;
    if hrp.as_str() != expected_hrp {
        return Err(TypesError::InvalidBech32(format!(
            "expected {expected_hrp} prefix, got {}",
            hrp.as_str()
        )));
    }
    if data.len() != 32 {
        return Err(TypesError::InvalidBech32(format!(
            "expected 32-byte payload, got {}",
            data.len()
        )));
    }
    Ok((hrp.as_str().to_string(), data))
}

/// Percent-encode everything outside the unreserved set.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Decode a percent-encoded string.
fn percent_decode(input: &str) -> Result<String, TypesError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex_pair = input
                .get(i + 1..i + 3)
                .ok_or_else(|| TypesError::InvalidUri("truncated percent escape".to_string()))?;
            let value = u8::from_str_radix(hex_pair, 16)
                .map_err(|_| TypesError::InvalidUri(format!("bad percent escape: %{hex_pair}")))?;
            out.push(value);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| TypesError::InvalidUri("invalid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_uri() -> PairingUri {
        PairingUri {
            server_pubkey: "ab".repeat(32),
            relays: vec![
                "wss://relay.example.com".to_string(),
                "wss://backup.example.com/ws".to_string(),
            ],
            client_secret: ClientSecret::from_bytes([0x42; 32]),
            namespace: "appA:".to_string(),
            methods: Method::ALL.to_vec(),
            limits: PairingLimits::default(),
            name: Some("demo app".to_string()),
        }
    }

    #[test]
    fn uri_roundtrip() {
        let uri = test_uri();
        let text = uri.to_uri_string().unwrap();
        assert!(text.starts_with("nostr+kvconnect://npub1"));

        let parsed = PairingUri::parse(&text).unwrap();
        assert_eq!(parsed, uri);
    }

    #[test]
    fn relay_urls_survive_encoding() {
        let text = test_uri().to_uri_string().unwrap();
        let parsed = PairingUri::parse(&text).unwrap();
        assert_eq!(parsed.relays[0], "wss://relay.example.com");
        assert_eq!(parsed.relays[1], "wss://backup.example.com/ws");
    }

    #[test]
    fn cmds_csv_restricts_methods() {
        let mut uri = test_uri();
        uri.methods = vec![Method::Get, Method::Mget];
        let text = uri.to_uri_string().unwrap();
        let parsed = PairingUri::parse(&text).unwrap();
        assert_eq!(parsed.methods, vec![Method::Get, Method::Mget]);
    }

    #[test]
    fn missing_secret_rejected() {
        let text = test_uri().to_uri_string().unwrap();
        let stripped: Vec<&str> = text
            .split('&')
            .filter(|p| !p.starts_with("secret="))
            .collect();
        let result = PairingUri::parse(&stripped.join("&"));
        assert!(matches!(result, Err(TypesError::InvalidUri(_))));
    }

    #[test]
    fn missing_relay_rejected() {
        let uri = PairingUri {
            relays: vec![],
            ..test_uri()
        };
        let text = uri.to_uri_string().unwrap();
        assert!(matches!(
            PairingUri::parse(&text),
            Err(TypesError::InvalidUri(_))
        ));
    }

    #[test]
    fn wrong_scheme_rejected() {
        let result = PairingUri::parse("https://example.com?relay=x");
        assert!(matches!(result, Err(TypesError::InvalidUri(_))));
    }

    #[test]
    fn unknown_cmd_rejected() {
        let text = test_uri().to_uri_string().unwrap();
        let with_bad = text.replace("cmds=get_info", "cmds=flushall");
        assert!(matches!(
            PairingUri::parse(&with_bad),
            Err(TypesError::InvalidUri(_))
        ));
    }

    #[test]
    fn npub_nsec_roundtrip() {
        let pubkey = "cd".repeat(32);
        let npub = encode_npub(&pubkey).unwrap();
        assert!(npub.starts_with("npub1"));
        assert_eq!(decode_npub(&npub).unwrap(), pubkey);

        let secret = [0x17; 32];
        let nsec = encode_nsec(&secret);
        assert!(nsec.starts_with("nsec1"));
        assert_eq!(decode_nsec(&nsec).unwrap().as_bytes(), &secret);
    }

    #[test]
    fn wrong_hrp_rejected() {
        let nsec = encode_nsec(&[0x17; 32]);
        assert!(matches!(
            decode_npub(&nsec),
            Err(TypesError::InvalidBech32(_))
        ));
    }

    #[test]
    fn client_secret_debug_is_redacted() {
        let secret = ClientSecret::random();
        let debug = format!("{:?}", secret);
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn percent_encoding_roundtrip() {
        let original = "a b&c=d%e/f:g";
        let encoded = percent_encode(original);
        assert!(!encoded.contains(' '));
        assert!(!encoded.contains('&'));
        assert_eq!(percent_decode(&encoded).unwrap(), original);
    }

    #[test]
    fn default_limits_match_reference_policy() {
        let limits = PairingLimits::default();
        assert_eq!(limits.mps, 60);
        assert_eq!(limits.bps, 1_048_576);
        assert_eq!(limits.max_key, 256);
        assert_eq!(limits.max_val, 65_536);
        assert_eq!(limits.mget_max, 16);
    }
}
