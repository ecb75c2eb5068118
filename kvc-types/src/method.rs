//! The closed set of key-value operations.

use serde::{Deserialize, Serialize};

/// A gateway method.
///
/// The set is closed: a request naming anything else fails the method
/// allowlist check and is answered with `RESTRICTED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Capability and policy discovery.
    GetInfo,
    /// Read a single value.
    Get,
    /// Write a value, optionally with a TTL.
    Set,
    /// Delete a key.
    Del,
    /// Existence check.
    Exists,
    /// Batched read.
    Mget,
    /// Set a TTL on an existing key.
    Expire,
    /// Read the remaining TTL of a key.
    Ttl,
}

impl Method {
    /// All methods, in wire order.
    pub const ALL: [Method; 8] = [
        Method::GetInfo,
        Method::Get,
        Method::Set,
        Method::Del,
        Method::Exists,
        Method::Mget,
        Method::Expire,
        Method::Ttl,
    ];

    /// The wire name of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetInfo => "get_info",
            Method::Get => "get",
            Method::Set => "set",
            Method::Del => "del",
            Method::Exists => "exists",
            Method::Mget => "mget",
            Method::Expire => "expire",
            Method::Ttl => "ttl",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get_info" => Ok(Method::GetInfo),
            "get" => Ok(Method::Get),
            "set" => Ok(Method::Set),
            "del" => Ok(Method::Del),
            "exists" => Ok(Method::Exists),
            "mget" => Ok(Method::Mget),
            "expire" => Ok(Method::Expire),
            "ttl" => Ok(Method::Ttl),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_methods() {
        for method in Method::ALL {
            let parsed: Method = method.as_str().parse().unwrap();
            assert_eq!(parsed, method);
        }
    }

    #[test]
    fn unknown_method_rejected() {
        assert!("flushall".parse::<Method>().is_err());
        assert!("".parse::<Method>().is_err());
        assert!("GET".parse::<Method>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&Method::GetInfo).unwrap();
        assert_eq!(json, "\"get_info\"");
        let back: Method = serde_json::from_str("\"mget\"").unwrap();
        assert_eq!(back, Method::Mget);
    }
}
