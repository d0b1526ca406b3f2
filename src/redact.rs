//! Secret values that never show up in logs or error messages.

use serde::{Deserialize, Deserializer};
use std::fmt;

/// Owned secret string (private key, API secret, passphrase).
///
/// `Debug` and `Display` both print `<redacted>`; the value is only reachable
/// through [`Secret::expose`].
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Secret)
    }
}

/// Mask the userinfo part of a proxy string (`login:password@host:port`).
pub fn mask_proxy(proxy: &str) -> String {
    match proxy.rsplit_once('@') {
        Some((_, host)) => format!("***@{host}"),
        None => proxy.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_never_formatted() {
        let key = Secret::new("0xdeadbeef");
        assert_eq!(format!("{key:?}"), "<redacted>");
        assert_eq!(format!("{key}"), "<redacted>");
        assert_eq!(key.expose(), "0xdeadbeef");
    }

    #[test]
    fn test_secret_inside_struct_debug() {
        #[derive(Debug)]
        struct Creds {
            api_key: String,
            secret: Secret,
        }
        let creds = Creds {
            api_key: "visible".into(),
            secret: Secret::new("hunter2"),
        };
        let out = format!("{creds:?}");
        assert!(out.contains("visible"));
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn test_mask_proxy() {
        assert_eq!(mask_proxy("user:pass@10.0.0.1:8080"), "***@10.0.0.1:8080");
        assert_eq!(mask_proxy("10.0.0.1:8080"), "10.0.0.1:8080");
    }
}
