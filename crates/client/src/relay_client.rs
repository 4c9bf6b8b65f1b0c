use crate::{Error, Result};
use dkls_protocol::{GroupId, GroupInfo, PartyId};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Generate a fresh [`PartyId`]: 33 random bytes with byte 0 forced to
/// a valid compressed-point prefix (`0x02` if byte 1 is even, `0x03`
/// otherwise).
pub fn generate_party_id() -> PartyId {
    let mut bytes = [0u8; 33];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes[0] = if bytes[1] % 2 == 0 { 0x02 } else { 0x03 };
    hex::encode(bytes)
        .parse()
        .expect("generated bytes always satisfy PartyId's validation rule")
}

#[derive(Serialize)]
struct RegisterRequest {
    party_id: PartyId,
}

#[derive(Deserialize)]
struct RegisterResponse {
    party_id: PartyId,
    token: String,
    #[allow(dead_code)]
    message: Option<String>,
}

#[derive(Serialize)]
struct CreateGroupRequest {
    group_id: GroupId,
    n: u16,
    t: u16,
    timeout: u32,
}

#[derive(Deserialize)]
struct CreateGroupResponse {
    group: GroupInfo,
    #[allow(dead_code)]
    message: Option<String>,
}

#[derive(Serialize)]
struct GroupIdRequest {
    group_id: GroupId,
}

#[derive(Deserialize)]
struct JoinGroupResponse {
    #[allow(dead_code)]
    message: Option<String>,
}

/// The outcome of a successful `register()` call.
pub struct Registration {
    /// The party id the server accepted (normally the one sent).
    pub party_id: PartyId,
    /// Bearer token to use for every subsequent request.
    pub token: String,
}

/// Stateless HTTP client for the relay's party/group endpoints.
///
/// Grounded in the threshold-wallet CLI's `ApiClient`: a thin
/// `reqwest::Client` wrapper with a shared response-handling helper
/// that maps non-2xx statuses into the error taxonomy.
#[derive(Clone)]
pub struct RelayClient {
    base_url: String,
    http: reqwest::Client,
}

impl RelayClient {
    /// Build a client against `base_url` (e.g. `https://relay.example`),
    /// with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: base_url.into(), http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable response body>".to_string());
            Err(match status.as_u16() {
                401 | 403 => Error::Protocol(dkls_protocol::Error::Unauthorized),
                404 => Error::Protocol(dkls_protocol::Error::NotFound(body)),
                409 => Error::Protocol(dkls_protocol::Error::Conflict(body)),
                _ => Error::Server { status, body },
            })
        }
    }

    /// Register a fresh [`PartyId`] with the relay, obtaining the
    /// bearer token used for every following request.
    pub async fn register(&self, party_id: PartyId) -> Result<Registration> {
        let response = self
            .http
            .post(self.url("/party/register"))
            .json(&RegisterRequest { party_id })
            .send()
            .await?;
        let body: RegisterResponse = self.handle_response(response).await?;
        Ok(Registration { party_id: body.party_id, token: body.token })
    }

    /// Create a fresh group with signing threshold `t` and party
    /// count `n`, enforced server-side to time out after
    /// `timeout_minutes`.
    pub async fn create_group(
        &self,
        token: &str,
        group_id: GroupId,
        n: u16,
        t: u16,
        timeout_minutes: u32,
    ) -> Result<GroupInfo> {
        let response = self
            .http
            .post(self.url("/group/create"))
            .bearer_auth(token)
            .json(&CreateGroupRequest { group_id, n, t, timeout: timeout_minutes })
            .send()
            .await?;
        let body: CreateGroupResponse = self.handle_response(response).await?;
        Ok(body.group)
    }

    /// Join an existing group, then fetch its current [`GroupInfo`].
    pub async fn join_group(&self, token: &str, group_id: GroupId) -> Result<GroupInfo> {
        let response = self
            .http
            .post(self.url("/group/join"))
            .bearer_auth(token)
            .json(&GroupIdRequest { group_id: group_id.clone() })
            .send()
            .await?;
        let _: JoinGroupResponse = self.handle_response(response).await?;
        self.get_group_info(token, group_id).await
    }

    /// Fetch a group's current [`GroupInfo`].
    pub async fn get_group_info(&self, token: &str, group_id: GroupId) -> Result<GroupInfo> {
        let response = self
            .http
            .post(self.url("/group/info"))
            .bearer_auth(token)
            .json(&GroupIdRequest { group_id })
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Fetch free-form information about this party's own account.
    pub async fn get_party_info(&self, token: &str) -> Result<Value> {
        let response = self
            .http
            .get(self.url("/party/info"))
            .bearer_auth(token)
            .send()
            .await?;
        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_party_ids_pass_validation() {
        for _ in 0..50 {
            let id = generate_party_id();
            assert_eq!(id.as_str().len(), PartyId::LEN);
        }
    }

    #[test]
    fn generated_party_ids_use_a_valid_compressed_prefix() {
        let id = generate_party_id();
        let prefix = &id.as_str()[0..2];
        assert!(prefix == "02" || prefix == "03");
    }
}
