//! Authentication: login credential derivation for the private session.
//!
//! The venue has no login acknowledgment on the wire: the client signs a
//! timestamp, sends the login op, and optimistically treats the session as
//! authenticated. Real success only shows up as private channels working.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use crate::message::MessageOut;

type HmacSha256 = Hmac<Sha256>;

/// API credential triple. Presence of credentials on [`WsConfig`] triggers a
/// login frame on every (re)connect.
///
/// [`WsConfig`]: crate::client::WsConfig
#[derive(Debug, Clone)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
    pub subaccount: Option<String>,
}

impl Credentials {
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            subaccount: None,
        }
    }

    pub fn with_subaccount(mut self, subaccount: impl Into<String>) -> Self {
        self.subaccount = Some(subaccount.into());
        self
    }
}

/// `args` payload of the login op.
#[derive(Debug, Clone, Serialize)]
pub struct LoginArgs {
    pub key: String,
    pub sign: String,
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subaccount: Option<String>,
}

/// Login signature: `hex(HMAC-SHA256(secret, "{time_ms}websocket_login"))`.
pub fn sign_login(secret: &str, time_ms: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{time_ms}websocket_login").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Build the login frame for the given credentials and timestamp
/// (milliseconds since epoch).
pub fn login_message(creds: &Credentials, time_ms: i64) -> MessageOut {
    MessageOut::Login {
        args: LoginArgs {
            key: creds.key.clone(),
            sign: sign_login(&creds.secret, time_ms),
            time: time_ms,
            subaccount: creds.subaccount.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_login_known_vector() {
        let sign = sign_login("T4lPid48QtjNxjLUFOcUZghD7CUJ7sTVsfuvQZF2", 1557246346499);
        assert_eq!(
            sign,
            "6a14b5f1a75b60657c83a7abaa7444cefe1769c6895c9e3e4ad9692cb9801e4e"
        );
    }

    #[test]
    fn sign_login_short_secret() {
        let sign = sign_login("top-secret", 1000);
        assert_eq!(
            sign,
            "d3c009ae0e12797ba3069c9757a210ae9c38e2d9ac14b14322837ee60baacdb0"
        );
    }

    #[test]
    fn login_message_wire_shape() {
        let creds = Credentials::new("api-key", "top-secret");
        let msg = login_message(&creds, 1000);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["op"], "login");
        assert_eq!(json["args"]["key"], "api-key");
        assert_eq!(json["args"]["time"], 1000);
        assert_eq!(
            json["args"]["sign"],
            "d3c009ae0e12797ba3069c9757a210ae9c38e2d9ac14b14322837ee60baacdb0"
        );
        // No subaccount → field omitted entirely
        assert!(json["args"].get("subaccount").is_none());
    }

    #[test]
    fn login_message_includes_subaccount() {
        let creds = Credentials::new("api-key", "top-secret").with_subaccount("sub1");
        let json = serde_json::to_value(&login_message(&creds, 1000)).unwrap();
        assert_eq!(json["args"]["subaccount"], "sub1");
    }
}
