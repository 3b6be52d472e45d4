//! Hetzner Cloud implementation of [`CloudApi`].
//!
//! A thin JSON client over `reqwest`: every request carries the bearer token,
//! list calls follow `meta.pagination.next_page`, and id-or-name lookups try
//! `GET /<collection>/<id>` first when the reference is numeric before
//! falling back to `?name=`.

mod wire;

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::provider::{
    Action, ApiError, ApiFuture, Architecture, CloudApi, Firewall, Image, ImageQuery, PrimaryIp,
    Server, ServerCreate, ServerCreated, ServerType, SnapshotCreate, SnapshotCreated, SshKey,
    SshKeyCreate,
};

use wire::{
    ActionWire, ChangeTypeBody, ImageWire, NamedWire, PrimaryIpWire, RescueBody, ServerBody,
    ServerTypeWire, ServerWire, SnapshotBody, SshKeyBody, api_error, next_page, take,
    take_optional,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const PER_PAGE: u32 = 50;

/// Provider client authenticated with an API token.
#[derive(Clone, Debug)]
pub struct HcloudClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HcloudClient {
    /// Creates a client for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] when the HTTP client cannot be built.
    pub fn new(endpoint: &str, token: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
        })
    }

    /// Creates a client from validated provider settings.
    ///
    /// # Errors
    ///
    /// See [`HcloudClient::new`].
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ApiError> {
        Self::new(&config.endpoint, &config.token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoint)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "provider response");
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let body = response
            .text()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn get_one<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        key: &str,
    ) -> Result<T, ApiError> {
        let mut body = self.send(self.http.get(self.url(path))).await?;
        take(&mut body, key)
    }

    async fn get_optional<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        key: &str,
    ) -> Result<Option<T>, ApiError> {
        match self.get_one(path, key).await {
            Ok(found) => Ok(Some(found)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Value, ApiError> {
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    async fn server_action(&self, server_id: i64, action: &str) -> Result<Action, ApiError> {
        let path = format!("servers/{server_id}/actions/{action}");
        let mut body = self.send(self.http.post(self.url(&path))).await?;
        take::<ActionWire>(&mut body, "action").map(Action::from)
    }

    async fn list_all<T: DeserializeOwned + Send>(
        &self,
        path: &str,
        key: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut page = 1_u32;
        loop {
            let mut params = query.to_vec();
            params.push(("page", page.to_string()));
            params.push(("per_page", PER_PAGE.to_string()));
            let mut body = self.send(self.http.get(self.url(path)).query(&params)).await?;
            items.extend(take::<Vec<T>>(&mut body, key)?);
            match next_page(&body) {
                Some(next) if next > page => page = next,
                _ => return Ok(items),
            }
        }
    }

    async fn by_id_or_name<T: DeserializeOwned + Send>(
        &self,
        collection: &str,
        key: &str,
        id_or_name: &str,
    ) -> Result<Option<T>, ApiError> {
        if let Ok(id) = id_or_name.parse::<i64>() {
            let path = format!("{collection}/{id}");
            if let Some(found) = self.get_optional(&path, key).await? {
                return Ok(Some(found));
            }
        }
        let query = [("name", id_or_name.to_owned())];
        let matches = self.list_all::<T>(collection, collection, &query).await?;
        Ok(matches.into_iter().next())
    }

    async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.send(self.http.delete(self.url(path))).await
    }
}

fn image_query(query: &ImageQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(kind) = query.kind {
        params.push(("type", kind.as_str().to_owned()));
    }
    if let Some(architecture) = query.architecture {
        params.push(("architecture", architecture.as_str().to_owned()));
    }
    if let Some(selector) = &query.label_selector {
        params.push(("label_selector", selector.clone()));
    }
    if query.available_only {
        params.push(("status", String::from("available")));
    }
    params
}

impl CloudApi for HcloudClient {
    fn get_server_type<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Option<ServerType>> {
        Box::pin(async move {
            let found: Option<ServerTypeWire> =
                self.by_id_or_name("server_types", "server_type", name).await?;
            Ok(found.map(ServerType::from))
        })
    }

    fn list_images<'a>(&'a self, query: &'a ImageQuery) -> ApiFuture<'a, Vec<Image>> {
        Box::pin(async move {
            let images: Vec<ImageWire> = self
                .list_all("images", "images", &image_query(query))
                .await?;
            Ok(images.into_iter().map(Image::from).collect())
        })
    }

    fn get_image_for_architecture<'a>(
        &'a self,
        id_or_name: &'a str,
        architecture: Architecture,
    ) -> ApiFuture<'a, Option<Image>> {
        Box::pin(async move {
            if let Ok(id) = id_or_name.parse::<i64>() {
                if let Some(found) = self.get_image(id).await? {
                    return Ok(Some(found));
                }
            }
            let query = [
                ("name", id_or_name.to_owned()),
                ("architecture", architecture.as_str().to_owned()),
            ];
            let images: Vec<ImageWire> = self.list_all("images", "images", &query).await?;
            Ok(images.into_iter().next().map(Image::from))
        })
    }

    fn get_image(&self, id: i64) -> ApiFuture<'_, Option<Image>> {
        Box::pin(async move {
            let found: Option<ImageWire> =
                self.get_optional(&format!("images/{id}"), "image").await?;
            Ok(found.map(Image::from))
        })
    }

    fn delete_image(&self, id: i64) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.delete(&format!("images/{id}")).await?;
            Ok(())
        })
    }

    fn create_ssh_key<'a>(&'a self, request: &'a SshKeyCreate) -> ApiFuture<'a, SshKey> {
        Box::pin(async move {
            let mut body = self.post("ssh_keys", &SshKeyBody::from(request)).await?;
            take::<NamedWire>(&mut body, "ssh_key").map(SshKey::from)
        })
    }

    fn get_ssh_key<'a>(&'a self, id_or_name: &'a str) -> ApiFuture<'a, Option<SshKey>> {
        Box::pin(async move {
            let found: Option<NamedWire> =
                self.by_id_or_name("ssh_keys", "ssh_key", id_or_name).await?;
            Ok(found.map(SshKey::from))
        })
    }

    fn delete_ssh_key(&self, id: i64) -> ApiFuture<'_, ()> {
        Box::pin(async move {
            self.delete(&format!("ssh_keys/{id}")).await?;
            Ok(())
        })
    }

    fn get_firewall<'a>(&'a self, id_or_name: &'a str) -> ApiFuture<'a, Option<Firewall>> {
        Box::pin(async move {
            let found: Option<NamedWire> =
                self.by_id_or_name("firewalls", "firewall", id_or_name).await?;
            Ok(found.map(Firewall::from))
        })
    }

    fn get_primary_ip<'a>(&'a self, id_or_name: &'a str) -> ApiFuture<'a, Option<PrimaryIp>> {
        Box::pin(async move {
            let found: Option<PrimaryIpWire> = self
                .by_id_or_name("primary_ips", "primary_ip", id_or_name)
                .await?;
            Ok(found.map(PrimaryIp::from))
        })
    }

    fn get_primary_ip_by_ip<'a>(&'a self, ip: &'a str) -> ApiFuture<'a, Option<PrimaryIp>> {
        Box::pin(async move {
            let query = [("ip", ip.to_owned())];
            let found: Vec<PrimaryIpWire> =
                self.list_all("primary_ips", "primary_ips", &query).await?;
            Ok(found.into_iter().next().map(PrimaryIp::from))
        })
    }

    fn create_server<'a>(&'a self, request: &'a ServerCreate) -> ApiFuture<'a, ServerCreated> {
        Box::pin(async move {
            let mut body = self.post("servers", &ServerBody::from(request)).await?;
            let server = Server::try_from(take::<ServerWire>(&mut body, "server")?)?;
            let action = Action::from(take::<ActionWire>(&mut body, "action")?);
            let next_actions = take_optional::<Vec<ActionWire>>(&mut body, "next_actions")?
                .unwrap_or_default()
                .into_iter()
                .map(Action::from)
                .collect();
            Ok(ServerCreated {
                server,
                action,
                next_actions,
            })
        })
    }

    fn delete_server(&self, id: i64) -> ApiFuture<'_, Action> {
        Box::pin(async move {
            let mut body = self.delete(&format!("servers/{id}")).await?;
            take::<ActionWire>(&mut body, "action").map(Action::from)
        })
    }

    fn list_running_server_actions(&self, server_id: i64) -> ApiFuture<'_, Vec<Action>> {
        Box::pin(async move {
            let path = format!("servers/{server_id}/actions");
            let query = [("status", String::from("running"))];
            let actions: Vec<ActionWire> = self.list_all(&path, "actions", &query).await?;
            Ok(actions.into_iter().map(Action::from).collect())
        })
    }

    fn change_server_type<'a>(
        &'a self,
        server_id: i64,
        server_type: &'a str,
    ) -> ApiFuture<'a, Action> {
        Box::pin(async move {
            let request = ChangeTypeBody {
                server_type,
                upgrade_disk: false,
            };
            let path = format!("servers/{server_id}/actions/change_type");
            let mut body = self.post(&path, &request).await?;
            take::<ActionWire>(&mut body, "action").map(Action::from)
        })
    }

    fn power_on(&self, server_id: i64) -> ApiFuture<'_, Action> {
        Box::pin(self.server_action(server_id, "poweron"))
    }

    fn shutdown(&self, server_id: i64) -> ApiFuture<'_, Action> {
        Box::pin(self.server_action(server_id, "shutdown"))
    }

    fn reset(&self, server_id: i64) -> ApiFuture<'_, Action> {
        Box::pin(self.server_action(server_id, "reset"))
    }

    fn enable_rescue<'a>(
        &'a self,
        server_id: i64,
        rescue_type: &'a str,
        ssh_keys: &'a [i64],
    ) -> ApiFuture<'a, Action> {
        Box::pin(async move {
            let request = RescueBody {
                rescue_type,
                ssh_keys,
            };
            let path = format!("servers/{server_id}/actions/enable_rescue");
            let mut body = self.post(&path, &request).await?;
            take::<ActionWire>(&mut body, "action").map(Action::from)
        })
    }

    fn disable_rescue(&self, server_id: i64) -> ApiFuture<'_, Action> {
        Box::pin(self.server_action(server_id, "disable_rescue"))
    }

    fn create_snapshot<'a>(
        &'a self,
        server_id: i64,
        request: &'a SnapshotCreate,
    ) -> ApiFuture<'a, SnapshotCreated> {
        Box::pin(async move {
            let path = format!("servers/{server_id}/actions/create_image");
            let mut body = self.post(&path, &SnapshotBody::from(request)).await?;
            let image = Image::from(take::<ImageWire>(&mut body, "image")?);
            let action = Action::from(take::<ActionWire>(&mut body, "action")?);
            Ok(SnapshotCreated { image, action })
        })
    }

    fn get_action(&self, id: i64) -> ApiFuture<'_, Action> {
        Box::pin(async move {
            let found: ActionWire = self.get_one(&format!("actions/{id}"), "action").await?;
            Ok(Action::from(found))
        })
    }
}
