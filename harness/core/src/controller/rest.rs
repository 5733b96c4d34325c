//! Thin async client for the controller's REST inventory and programming
//! endpoints. Paths are the abstract surface the harness relies on, not any
//! particular controller's URL scheme.

use std::net::Ipv4Addr;

use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use super::flows::{FlowRule, GroupRule};

pub const HOSTS_PATH: &str = "hosts";
pub const SWITCHES_PATH: &str = "switches";
pub const LINKS_PATH: &str = "links";
pub const FLOWS_PATH: &str = "flows";
pub const GROUPS_PATH: &str = "groups";

#[derive(Debug, Error)]
pub enum RestError {
    #[error("invalid controller URL {url}: {message}")]
    Url { url: String, message: String },
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// A host the controller has discovered, with its attachment point.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HostInfo {
    pub id: String,
    pub ip: Ipv4Addr,
    pub mac: String,
    pub switch: String,
    pub port: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SwitchInfo {
    pub id: String,
}

/// A directed switch-to-switch adjacency; the controller reports each
/// infrastructure link once per direction.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LinkInfo {
    pub src: String,
    pub src_port: u32,
    pub dst: String,
    pub dst_port: u32,
    #[serde(default = "default_link_weight")]
    pub weight: f64,
}

fn default_link_weight() -> f64 {
    1.0
}

/// Identifier of an installed group, enough to drive removal loops.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GroupInfo {
    pub dpid: String,
    pub group_id: u32,
}

#[derive(Clone)]
pub struct ControllerRestApi {
    client: Client,
    base: Url,
    auth: Option<(String, String)>,
}

impl ControllerRestApi {
    pub fn new(
        ip: &str,
        port: u16,
        auth: Option<(String, String)>,
    ) -> Result<Self, RestError> {
        let raw = format!("http://{ip}:{port}/");
        let base = Url::parse(&raw).map_err(|err| RestError::Url {
            url: raw,
            message: err.to_string(),
        })?;
        Ok(Self {
            client: Client::new(),
            base,
            auth,
        })
    }

    fn url(&self, path: &str) -> Result<Url, RestError> {
        self.base.join(path).map_err(|err| RestError::Url {
            url: format!("{}{path}", self.base),
            message: err.to_string(),
        })
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RestError> {
        let response = self
            .with_auth(self.client.get(self.url(path)?))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), RestError> {
        self.with_auth(self.client.post(self.url(path)?))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RestError> {
        self.with_auth(self.client.delete(self.url(path)?))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn get_hosts(&self) -> Result<Vec<HostInfo>, RestError> {
        self.get_json(HOSTS_PATH).await
    }

    pub async fn get_switches(&self) -> Result<Vec<SwitchInfo>, RestError> {
        self.get_json(SWITCHES_PATH).await
    }

    pub async fn get_links(&self) -> Result<Vec<LinkInfo>, RestError> {
        self.get_json(LINKS_PATH).await
    }

    pub async fn get_groups(&self) -> Result<Vec<GroupInfo>, RestError> {
        self.get_json(GROUPS_PATH).await
    }

    pub async fn install_flow(&self, rule: &FlowRule) -> Result<(), RestError> {
        self.post_json(FLOWS_PATH, rule).await
    }

    pub async fn install_group(&self, group: &GroupRule) -> Result<(), RestError> {
        self.post_json(GROUPS_PATH, group).await
    }

    pub async fn delete_all_flows(&self) -> Result<(), RestError> {
        self.delete(FLOWS_PATH).await
    }

    pub async fn delete_all_groups(&self) -> Result<(), RestError> {
        self.delete(GROUPS_PATH).await
    }
}
