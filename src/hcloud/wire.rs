//! JSON payloads exchanged with the Hetzner Cloud API.

use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{
    Action, ActionError, ActionStatus, ApiError, Architecture, Firewall, Image,
    ImageKind, Ipv6Block, Labels, PrimaryIp, PrimaryIpKind, PrivateNet, PublicNetRequest, Server,
    ServerCreate, ServerType, SnapshotCreate, SshKey, SshKeyCreate,
};

#[derive(Debug, Deserialize)]
pub(super) struct ServerTypeWire {
    id: i64,
    name: String,
    architecture: Architecture,
}

impl From<ServerTypeWire> for ServerType {
    fn from(wire: ServerTypeWire) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
            architecture: wire.architecture,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ImageWire {
    id: i64,
    #[serde(rename = "type")]
    kind: ImageKind,
    name: Option<String>,
    #[serde(default)]
    description: String,
    architecture: Architecture,
    created: DateTime<Utc>,
    deprecated: Option<DateTime<Utc>>,
}

impl From<ImageWire> for Image {
    fn from(wire: ImageWire) -> Self {
        Self {
            id: wire.id,
            kind: wire.kind,
            name: wire.name,
            description: wire.description,
            architecture: wire.architecture,
            created: wire.created,
            deprecated: wire.deprecated,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct NamedWire {
    id: i64,
    name: String,
}

impl From<NamedWire> for SshKey {
    fn from(wire: NamedWire) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
        }
    }
}

impl From<NamedWire> for Firewall {
    fn from(wire: NamedWire) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct PrimaryIpWire {
    id: i64,
    name: String,
    ip: String,
    #[serde(rename = "type")]
    kind: PrimaryIpKind,
}

impl From<PrimaryIpWire> for PrimaryIp {
    fn from(wire: PrimaryIpWire) -> Self {
        Self {
            id: wire.id,
            name: wire.name,
            ip: wire.ip,
            kind: wire.kind,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PublicNetWire {
    ipv4: Option<Ipv4Wire>,
    ipv6: Option<Ipv6Wire>,
}

#[derive(Debug, Deserialize)]
struct Ipv4Wire {
    ip: Ipv4Addr,
}

// The API reports the assigned block, e.g. `2a01:4f8:1c19:1403::/64`.
#[derive(Debug, Deserialize)]
struct Ipv6Wire {
    ip: String,
}

#[derive(Debug, Deserialize)]
struct PrivateNetWire {
    network: i64,
    ip: IpAddr,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerWire {
    id: i64,
    name: String,
    #[serde(default)]
    public_net: PublicNetWire,
    #[serde(default)]
    private_net: Vec<PrivateNetWire>,
    #[serde(default)]
    rescue_enabled: bool,
}

impl TryFrom<ServerWire> for Server {
    type Error = ApiError;

    fn try_from(wire: ServerWire) -> Result<Self, Self::Error> {
        let public_ipv6 = wire
            .public_net
            .ipv6
            .map(|block| block.ip.parse::<Ipv6Block>())
            .transpose()
            .map_err(ApiError::Decode)?;
        Ok(Self {
            id: wire.id,
            name: wire.name,
            public_ipv4: wire.public_net.ipv4.map(|address| address.ip),
            public_ipv6,
            private_net: wire
                .private_net
                .into_iter()
                .map(|net| PrivateNet {
                    network: net.network,
                    ip: net.ip,
                })
                .collect(),
            rescue_enabled: wire.rescue_enabled,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ActionErrorWire {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ActionWire {
    id: i64,
    command: String,
    status: ActionStatus,
    error: Option<ActionErrorWire>,
}

impl From<ActionWire> for Action {
    fn from(wire: ActionWire) -> Self {
        Self {
            id: wire.id,
            command: wire.command,
            status: wire.status,
            error: wire.error.map(|err| ActionError {
                code: err.code,
                message: err.message,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Builds the error for a non-success response, keeping the provider's code
/// and message when the body is an error document.
pub(super) fn api_error(status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => ApiError::Http {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) => ApiError::Http {
            status,
            code: String::from("unknown"),
            message: body.trim().to_owned(),
        },
    }
}

/// Moves `key` out of a response document and decodes it.
pub(super) fn take<T: DeserializeOwned>(body: &mut Value, key: &str) -> Result<T, ApiError> {
    let value = body
        .get_mut(key)
        .map(Value::take)
        .ok_or_else(|| ApiError::Decode(format!("response has no '{key}' field")))?;
    serde_json::from_value(value).map_err(|err| ApiError::Decode(format!("{key}: {err}")))
}

/// Like [`take`], but a missing or `null` field decodes to `None`.
pub(super) fn take_optional<T: DeserializeOwned>(
    body: &mut Value,
    key: &str,
) -> Result<Option<T>, ApiError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => take(body, key).map(Some),
    }
}

/// Page number of the next page, if the listing continues.
pub(super) fn next_page(body: &Value) -> Option<u32> {
    body.pointer("/meta/pagination/next_page")
        .and_then(Value::as_u64)
        .and_then(|page| u32::try_from(page).ok())
}

#[derive(Debug, Serialize)]
pub(super) struct SshKeyBody<'a> {
    name: &'a str,
    public_key: &'a str,
    labels: &'a Labels,
}

impl<'a> From<&'a SshKeyCreate> for SshKeyBody<'a> {
    fn from(request: &'a SshKeyCreate) -> Self {
        Self {
            name: &request.name,
            public_key: &request.public_key,
            labels: &request.labels,
        }
    }
}

#[derive(Debug, Serialize)]
struct FirewallRef {
    firewall: i64,
}

#[derive(Debug, Serialize)]
struct PublicNetBody {
    enable_ipv4: bool,
    enable_ipv6: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipv4: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipv6: Option<i64>,
}

impl From<&PublicNetRequest> for PublicNetBody {
    fn from(request: &PublicNetRequest) -> Self {
        Self {
            enable_ipv4: request.enable_ipv4,
            enable_ipv6: request.enable_ipv6,
            ipv4: request.ipv4,
            ipv6: request.ipv6,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ServerBody<'a> {
    name: &'a str,
    server_type: &'a str,
    image: i64,
    location: &'a str,
    ssh_keys: &'a [i64],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    firewalls: Vec<FirewallRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    networks: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<&'a str>,
    labels: &'a Labels,
    public_net: PublicNetBody,
    start_after_create: bool,
}

impl<'a> From<&'a ServerCreate> for ServerBody<'a> {
    fn from(request: &'a ServerCreate) -> Self {
        Self {
            name: &request.name,
            server_type: &request.server_type,
            image: request.image,
            location: &request.location,
            ssh_keys: &request.ssh_keys,
            firewalls: request
                .firewalls
                .iter()
                .map(|id| FirewallRef { firewall: *id })
                .collect(),
            networks: request.networks.clone(),
            user_data: request.user_data.as_deref(),
            labels: &request.labels,
            public_net: PublicNetBody::from(&request.public_net),
            start_after_create: request.start_after_create,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ChangeTypeBody<'a> {
    pub(super) server_type: &'a str,
    pub(super) upgrade_disk: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct RescueBody<'a> {
    #[serde(rename = "type")]
    pub(super) rescue_type: &'a str,
    pub(super) ssh_keys: &'a [i64],
}

#[derive(Debug, Serialize)]
pub(super) struct SnapshotBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    description: &'a str,
    labels: &'a Labels,
}

impl<'a> From<&'a SnapshotCreate> for SnapshotBody<'a> {
    fn from(request: &'a SnapshotCreate) -> Self {
        Self {
            kind: "snapshot",
            description: &request.description,
            labels: &request.labels,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;
    use serde_json::json;

    fn server(document: &Value) -> Server {
        let wire: ServerWire = serde_json::from_value(document.clone()).expect("server decodes");
        Server::try_from(wire).expect("server converts")
    }

    #[test]
    fn server_with_ipv4_and_ipv6_block_decodes() {
        let decoded = server(&json!({
            "id": 8,
            "name": "dummy-server",
            "public_net": {
                "ipv4": {"ip": "1.2.3.4"},
                "ipv6": {"ip": "2a01:4f8:1c19:1403::/64"}
            },
            "private_net": [],
            "rescue_enabled": false
        }));

        assert_eq!(decoded.public_ipv4, Some(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(
            decoded.public_ipv6.map(|block| block.first_host()),
            Some("2a01:4f8:1c19:1403::1".parse::<Ipv6Addr>().expect("valid address"))
        );
    }

    #[test]
    fn server_without_ipv4_falls_back_to_private_network() {
        let decoded = server(&json!({
            "id": 8,
            "name": "dummy-server",
            "public_net": {"ipv4": null, "ipv6": null},
            "private_net": [{"network": 4711, "ip": "10.0.0.2", "alias_ips": []}]
        }));

        assert_eq!(decoded.public_ipv4, None);
        assert_eq!(
            decoded.first_available_ip(),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
        );
    }

    #[test]
    fn malformed_ipv6_block_is_a_decode_error() {
        let wire: ServerWire = serde_json::from_value(json!({
            "id": 8,
            "name": "dummy-server",
            "public_net": {"ipv6": {"ip": "not-an-address"}}
        }))
        .expect("server decodes");

        assert!(matches!(Server::try_from(wire), Err(ApiError::Decode(_))));
    }

    #[test]
    fn snapshot_image_decodes_without_name() {
        let wire: ImageWire = serde_json::from_value(json!({
            "id": 16,
            "type": "snapshot",
            "name": null,
            "description": "dummy-snapshot",
            "architecture": "x86",
            "status": "available",
            "created": "2024-01-01T10:00:00+00:00",
            "deprecated": null,
            "labels": {}
        }))
        .expect("image decodes");
        let image = Image::from(wire);

        assert_eq!(image.kind, ImageKind::Snapshot);
        assert_eq!(image.name, None);
        assert_eq!(image.description, "dummy-snapshot");
    }

    #[test]
    fn failed_action_keeps_provider_error() {
        let wire: ActionWire = serde_json::from_value(json!({
            "id": 13,
            "command": "create_image",
            "status": "error",
            "progress": 100,
            "error": {"code": "action_failed", "message": "Action failed"},
            "resources": [{"id": 8, "type": "server"}]
        }))
        .expect("action decodes");
        let action = Action::from(wire);

        assert_eq!(action.status, ActionStatus::Error);
        assert_eq!(
            action.error.map(|err| err.code),
            Some(String::from("action_failed"))
        );
        assert_eq!(action.command, "create_image");
    }

    #[test]
    fn error_documents_map_to_http_errors() {
        let err = api_error(
            404,
            r#"{"error":{"code":"not_found","message":"server with ID '8' not found"}}"#,
        );
        assert!(err.is_not_found());
        assert_eq!(
            api_error(502, "bad gateway"),
            ApiError::Http {
                status: 502,
                code: String::from("unknown"),
                message: String::from("bad gateway"),
            }
        );
    }

    #[test]
    fn pagination_reads_next_page() {
        let mut body = json!({
            "images": [],
            "meta": {"pagination": {"page": 1, "next_page": 2}}
        });
        assert_eq!(next_page(&body), Some(2));
        let images: Vec<ImageWire> = take(&mut body, "images").expect("images present");
        assert!(images.is_empty());
        assert_eq!(
            next_page(&json!({"meta": {"pagination": {"next_page": null}}})),
            None
        );
    }

    #[test]
    fn optional_fields_tolerate_null_and_absence() {
        let mut body = json!({"action": {}, "next_actions": null});
        assert_eq!(
            take_optional::<Vec<ActionWire>>(&mut body, "next_actions")
                .expect("null decodes")
                .map(|actions| actions.len()),
            None
        );
        assert_eq!(
            take_optional::<Vec<ActionWire>>(&mut body, "next_actions")
                .expect("absent decodes")
                .map(|actions| actions.len()),
            None
        );
    }

    #[test]
    fn server_body_wraps_firewalls_and_skips_empty_fields() {
        let request = ServerCreate {
            name: String::from("dummy-server"),
            server_type: String::from("cpx11"),
            image: 42,
            location: String::from("nbg1"),
            ssh_keys: vec![100],
            firewalls: vec![7],
            start_after_create: true,
            ..ServerCreate::default()
        };

        let body = serde_json::to_value(ServerBody::from(&request)).expect("serialise");

        assert_eq!(body.get("firewalls"), Some(&json!([{"firewall": 7}])));
        assert_eq!(body.get("networks"), None);
        assert_eq!(body.get("user_data"), None);
        assert_eq!(
            body.get("public_net"),
            Some(&json!({"enable_ipv4": true, "enable_ipv6": true}))
        );
    }
}
