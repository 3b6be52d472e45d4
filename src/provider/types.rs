//! Domain types shared by the pipeline and the provider client.

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form key/value labels attached to provider resources.
pub type Labels = BTreeMap<String, String>;

/// CPU architecture of a server type or image.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Intel or AMD processors.
    X86,
    /// Ampere processors.
    Arm,
}

impl Architecture {
    /// Returns the wire representation used in query strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::Arm => "arm",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server type descriptor resolved during validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerType {
    /// Provider identifier.
    pub id: i64,
    /// Name such as `cpx11`.
    pub name: String,
    /// CPU architecture offered by the type.
    pub architecture: Architecture,
}

/// Kind of image stored by the provider.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    /// Public operating system image.
    System,
    /// User-created disk snapshot.
    Snapshot,
    /// Automatic server backup.
    Backup,
    /// Application image.
    App,
}

impl ImageKind {
    /// Returns the wire representation used in query strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Snapshot => "snapshot",
            Self::Backup => "backup",
            Self::App => "app",
        }
    }
}

/// An image or snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Image {
    /// Provider identifier.
    pub id: i64,
    /// Image kind.
    pub kind: ImageKind,
    /// Unique name; snapshots have none.
    pub name: Option<String>,
    /// Free-text description. Snapshots carry their name here.
    pub description: String,
    /// CPU architecture the image boots on.
    pub architecture: Architecture,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Deprecation timestamp, if the image is being phased out.
    pub deprecated: Option<DateTime<Utc>>,
}

/// Filter applied when listing images.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageQuery {
    /// Restrict to these kinds.
    pub kind: Option<ImageKind>,
    /// Restrict to one architecture.
    pub architecture: Option<Architecture>,
    /// Label selector, for example `name==base,env=prod`.
    pub label_selector: Option<String>,
    /// Only return images that are ready for use.
    pub available_only: bool,
}

/// Uploaded SSH public key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshKey {
    /// Provider identifier.
    pub id: i64,
    /// Name of the key.
    pub name: String,
}

/// Request payload for uploading an SSH key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshKeyCreate {
    /// Unique key name.
    pub name: String,
    /// Public key in OpenSSH format.
    pub public_key: String,
    /// Labels attached to the key.
    pub labels: Labels,
}

/// Firewall resolved by id or name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Firewall {
    /// Provider identifier.
    pub id: i64,
    /// Firewall name.
    pub name: String,
}

/// Address family of a primary IP.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryIpKind {
    /// A single IPv4 address.
    Ipv4,
    /// An IPv6 /64 block.
    Ipv6,
}

/// Reserved public address that can be assigned at server creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrimaryIp {
    /// Provider identifier.
    pub id: i64,
    /// Name of the reservation.
    pub name: String,
    /// Address (or network address for IPv6 blocks) as returned by the API.
    pub ip: String,
    /// Address family.
    pub kind: PrimaryIpKind,
}

/// IPv6 network assigned to a server, such as `2a01:4f8:1c19:1403::/64`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv6Block {
    /// Network address of the block.
    pub network: Ipv6Addr,
    /// Prefix length of the block.
    pub prefix_len: u8,
}

impl Ipv6Block {
    /// Returns the first host address of the block (network address + 1).
    #[must_use]
    pub fn first_host(&self) -> Ipv6Addr {
        Ipv6Addr::from(u128::from(self.network).wrapping_add(1))
    }
}

impl FromStr for Ipv6Block {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = value.split_once('/').unwrap_or((value, "64"));
        let network = addr
            .parse::<Ipv6Addr>()
            .map_err(|err| format!("invalid IPv6 network '{value}': {err}"))?;
        let prefix_len = prefix
            .parse::<u8>()
            .ok()
            .filter(|len| *len <= 128)
            .ok_or_else(|| format!("invalid IPv6 prefix length in '{value}'"))?;
        Ok(Self {
            network,
            prefix_len,
        })
    }
}

impl fmt::Display for Ipv6Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Attachment of a server to a private network.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrivateNet {
    /// Network identifier.
    pub network: i64,
    /// Address assigned inside the network.
    pub ip: IpAddr,
}

/// Server as seen by the pipeline.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Server {
    /// Provider identifier.
    pub id: i64,
    /// Server name.
    pub name: String,
    /// Public IPv4 address, when enabled.
    pub public_ipv4: Option<Ipv4Addr>,
    /// Public IPv6 block, when enabled.
    pub public_ipv6: Option<Ipv6Block>,
    /// Private network attachments.
    pub private_net: Vec<PrivateNet>,
    /// Whether the rescue system is currently enabled.
    pub rescue_enabled: bool,
}

impl Server {
    /// Picks the address used to reach the server.
    ///
    /// Public IPv4 wins, then the first host of the public IPv6 block (the
    /// provider reports the network address), then the first private address.
    #[must_use]
    pub fn first_available_ip(&self) -> Option<IpAddr> {
        if let Some(ipv4) = self.public_ipv4 {
            return Some(IpAddr::V4(ipv4));
        }
        if let Some(block) = self.public_ipv6 {
            return Some(IpAddr::V6(block.first_host()));
        }
        self.private_net.first().map(|net| net.ip)
    }
}

/// Public network options for server creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublicNetRequest {
    /// Whether a public IPv4 address is assigned.
    pub enable_ipv4: bool,
    /// Whether a public IPv6 block is assigned.
    pub enable_ipv6: bool,
    /// Reserved IPv4 primary IP to use.
    pub ipv4: Option<i64>,
    /// Reserved IPv6 primary IP to use.
    pub ipv6: Option<i64>,
}

impl Default for PublicNetRequest {
    fn default() -> Self {
        Self {
            enable_ipv4: true,
            enable_ipv6: true,
            ipv4: None,
            ipv6: None,
        }
    }
}

/// Server creation request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerCreate {
    /// Server name (also the hostname).
    pub name: String,
    /// Server type name.
    pub server_type: String,
    /// Image identifier to boot from.
    pub image: i64,
    /// Location name such as `nbg1`.
    pub location: String,
    /// SSH key identifiers injected into the server.
    pub ssh_keys: Vec<i64>,
    /// Firewall identifiers applied at creation.
    pub firewalls: Vec<i64>,
    /// Private network identifiers to attach.
    pub networks: Vec<i64>,
    /// Cloud-init user data.
    pub user_data: Option<String>,
    /// Server labels.
    pub labels: Labels,
    /// Public network settings.
    pub public_net: PublicNetRequest,
    /// Whether the server boots right after creation.
    pub start_after_create: bool,
}

/// Response of a server creation request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerCreated {
    /// Created server.
    pub server: Server,
    /// Primary creation action.
    pub action: Action,
    /// Follow-up actions that also have to finish.
    pub next_actions: Vec<Action>,
}

/// Snapshot creation request.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SnapshotCreate {
    /// Description, which is the snapshot name.
    pub description: String,
    /// Labels attached to the snapshot.
    pub labels: Labels,
}

/// Response of a snapshot creation request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotCreated {
    /// Snapshot being created.
    pub image: Image,
    /// Action tracking the snapshot.
    pub action: Action,
}

/// Status of a provider action.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    /// Still in progress.
    #[serde(alias = "pending", alias = "progress")]
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Error,
}

/// Error reported by a failed action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionError {
    /// Machine readable code.
    pub code: String,
    /// Human readable message.
    pub message: String,
}

/// Asynchronous provider operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Action {
    /// Provider identifier.
    pub id: i64,
    /// Command name such as `create_server`.
    pub command: String,
    /// Current status.
    pub status: ActionStatus,
    /// Failure detail when the status is `error`.
    pub error: Option<ActionError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn server() -> Server {
        Server {
            id: 8,
            name: String::from("dummy-server"),
            ..Server::default()
        }
    }

    #[test]
    fn first_available_ip_uses_first_ipv6_host() {
        let block: Ipv6Block = "2a01:4f8:1c19:1403::/64".parse().expect("valid block");
        let candidate = Server {
            public_ipv6: Some(block),
            ..server()
        };
        assert_eq!(
            candidate.first_available_ip().map(|ip| ip.to_string()),
            Some(String::from("2a01:4f8:1c19:1403::1"))
        );
    }

    #[test]
    fn first_available_ip_prefers_public_ipv4() {
        let candidate = Server {
            public_ipv4: Some(Ipv4Addr::new(1, 2, 3, 4)),
            private_net: vec![PrivateNet {
                network: 12,
                ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            }],
            ..server()
        };
        assert_eq!(
            candidate.first_available_ip(),
            Some(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)))
        );
    }

    #[test]
    fn first_available_ip_falls_back_to_private_network() {
        let candidate = Server {
            private_net: vec![PrivateNet {
                network: 12,
                ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            }],
            ..server()
        };
        assert_eq!(
            candidate.first_available_ip(),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
        );
    }

    #[test]
    fn first_available_ip_is_none_without_addresses() {
        assert_eq!(server().first_available_ip(), None);
    }

    #[rstest]
    #[case("2a01:4f8::/64")]
    #[case("2a01:4f8::")]
    fn ipv6_block_parses_with_or_without_prefix(#[case] raw: &str) {
        let block: Ipv6Block = raw.parse().expect("valid block");
        assert_eq!(block.prefix_len, 64);
    }

    #[rstest]
    #[case("not-an-address/64")]
    #[case("2a01:4f8::/129")]
    fn ipv6_block_rejects_garbage(#[case] raw: &str) {
        assert!(raw.parse::<Ipv6Block>().is_err());
    }

    #[rstest]
    #[case("\"running\"", ActionStatus::Running)]
    #[case("\"success\"", ActionStatus::Success)]
    #[case("\"error\"", ActionStatus::Error)]
    fn action_statuses_decode(#[case] raw: &str, #[case] expected: ActionStatus) {
        let status: ActionStatus = serde_json::from_str(raw).expect("status decodes");
        assert_eq!(status, expected);
    }
}
