//! Caller-owned network context shared by every session.

use livedm_protocol::RoomId;
use livedm_transport::Connector;
use serde::{Deserialize, Serialize};

/// Who the client says it is in the auth frame.
///
/// Obtaining these values (logging in, fetching the room's token) happens
/// outside livedm. The defaults authenticate as an anonymous viewer, which
/// the server accepts with masked user names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Logged-in user id, 0 for anonymous.
    pub uid: u64,
    /// Browser fingerprint cookie.
    pub buvid: Option<String>,
    /// Per-room token from the danmaku info endpoint.
    pub key: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_uid(mut self, uid: u64) -> Self {
        self.uid = uid;
        self
    }

    pub fn with_buvid(mut self, buvid: impl Into<String>) -> Self {
        self.buvid = Some(buvid.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// A connector plus the identity to authenticate with.
///
/// Shared by `Arc` between every session that uses it. Sessions never
/// close or mutate it: its lifetime belongs to the caller.
pub struct NetworkContext<C: Connector> {
    connector: C,
    identity: Identity,
}

impl<C: Connector> NetworkContext<C> {
    pub fn new(connector: C, identity: Identity) -> Self {
        Self {
            connector,
            identity,
        }
    }

    /// A context that authenticates anonymously.
    pub fn anonymous(connector: C) -> Self {
        Self::new(connector, Identity::anonymous())
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

// ---------------------------------------------------------------------------
// Auth frame bodies
// ---------------------------------------------------------------------------

/// Body of the `Auth` frame.
#[derive(Debug, Serialize)]
pub(crate) struct AuthRequest<'a> {
    pub uid: u64,
    pub roomid: RoomId,
    pub protover: u16,
    pub platform: &'static str,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buvid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<&'a str>,
}

impl<'a> AuthRequest<'a> {
    pub fn new(identity: &'a Identity, room_id: RoomId, protover: u16) -> Self {
        Self {
            uid: identity.uid,
            roomid: room_id,
            protover,
            platform: "web",
            kind: 2,
            buvid: identity.buvid.as_deref(),
            key: identity.key.as_deref(),
        }
    }
}

/// Body of the `AuthReply` frame.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthReply {
    pub code: i64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_auth_request_anonymous_omits_optional_fields() {
        let identity = Identity::anonymous();
        let body = serde_json::to_value(AuthRequest::new(&identity, RoomId(42), 3)).unwrap();
        assert_eq!(
            body,
            json!({"uid": 0, "roomid": 42, "protover": 3, "platform": "web", "type": 2})
        );
    }

    #[test]
    fn test_auth_request_with_credentials() {
        let identity = Identity::anonymous()
            .with_uid(7)
            .with_buvid("XY-buvid")
            .with_key("tok");
        let body = serde_json::to_value(AuthRequest::new(&identity, RoomId(1), 2)).unwrap();
        assert_eq!(body["uid"], 7);
        assert_eq!(body["protover"], 2);
        assert_eq!(body["buvid"], "XY-buvid");
        assert_eq!(body["key"], "tok");
    }

    #[test]
    fn test_auth_reply_parses_code() {
        let reply: AuthReply = serde_json::from_str(r#"{"code":-101}"#).unwrap();
        assert_eq!(reply.code, -101);
    }
}
