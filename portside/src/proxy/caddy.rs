//! Caddy admin API client

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::errors::PortsideError;
use crate::proxy::RouteTable;

/// Thin client over the Caddy admin API.
///
/// Mutates the JSON config tree rooted at
/// `apps.http.servers.<server>.routes`, mapping hostnames to
/// `localhost:<port>` reverse-proxy upstreams.
pub struct CaddyAdmin {
    client: Client,
    base_url: String,
    server: String,
}

impl CaddyAdmin {
    pub fn new(base_url: &str, server: &str) -> Result<Self, PortsideError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            server: server.to_string(),
        })
    }

    fn server_path(&self) -> String {
        format!(
            "{}/config/apps/http/servers/{}",
            self.base_url, self.server
        )
    }

    fn routes_path(&self) -> String {
        format!("{}/routes", self.server_path())
    }

    /// GET a config path; 404 and JSON null both mean "absent".
    async fn get_config(&self, url: &str) -> Result<Option<Value>, PortsideError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(proxy_err)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let value: Value = response.json().await.map_err(proxy_err)?;
                Ok(if value.is_null() { None } else { Some(value) })
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(PortsideError::ProxyConfig(format!("GET {}: {}: {}", url, status, body)))
            }
        }
    }

    async fn put_config(&self, url: &str, body: &Value) -> Result<(), PortsideError> {
        debug!("PUT {}", url);
        let response = self
            .client
            .put(url)
            .json(body)
            .send()
            .await
            .map_err(proxy_err)?;
        check_status("PUT", url, response).await
    }

    async fn patch_config(&self, url: &str, body: &Value) -> Result<(), PortsideError> {
        debug!("PATCH {}", url);
        let response = self
            .client
            .patch(url)
            .json(body)
            .send()
            .await
            .map_err(proxy_err)?;
        check_status("PATCH", url, response).await
    }

    async fn post_config(&self, url: &str, body: &Value) -> Result<(), PortsideError> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(proxy_err)?;
        check_status("POST", url, response).await
    }

    /// Current routes array, or empty when the server entry is missing.
    async fn routes(&self) -> Result<Vec<Value>, PortsideError> {
        match self.get_config(&self.routes_path()).await? {
            Some(Value::Array(routes)) => Ok(routes),
            Some(other) => Err(PortsideError::ProxyConfig(format!(
                "routes is not an array: {}",
                other
            ))),
            None => Ok(Vec::new()),
        }
    }

    /// Index of the route matching a hostname, if present.
    fn route_index(routes: &[Value], domain: &str) -> Option<usize> {
        routes.iter().position(|route| {
            route
                .get("match")
                .and_then(|m| m.as_array())
                .map(|matchers| {
                    matchers.iter().any(|matcher| {
                        matcher
                            .get("host")
                            .and_then(|h| h.as_array())
                            .map(|hosts| hosts.iter().any(|h| h.as_str() == Some(domain)))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false)
        })
    }

    fn route_value(domain: &str, port: u16) -> Value {
        json!({
            "match": [{ "host": [domain] }],
            "handle": [{
                "handler": "reverse_proxy",
                "upstreams": [{ "dial": format!("localhost:{}", port) }]
            }]
        })
    }
}

fn proxy_err(err: reqwest::Error) -> PortsideError {
    PortsideError::ProxyConfig(err.to_string())
}

async fn check_status(
    method: &str,
    url: &str,
    response: reqwest::Response,
) -> Result<(), PortsideError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(PortsideError::ProxyConfig(format!(
        "{} {}: {}: {}",
        method, url, status, body
    )))
}

#[async_trait]
impl RouteTable for CaddyAdmin {
    async fn ensure_base_structure(&self) -> Result<(), PortsideError> {
        if self.get_config(&self.server_path()).await?.is_some() {
            debug!("Proxy server entry '{}' already present", self.server);
            return Ok(());
        }

        let skeleton = json!({ "listen": [":443"], "routes": [] });

        // PUT against the server path works when the parent tree exists;
        // on a blank config, seed the whole apps.http.servers branch.
        if self.put_config(&self.server_path(), &skeleton).await.is_ok() {
            info!("Created proxy server entry '{}'", self.server);
            return Ok(());
        }

        let mut servers = serde_json::Map::new();
        servers.insert(self.server.clone(), skeleton);
        let apps = json!({
            "http": { "servers": Value::Object(servers) }
        });
        self.put_config(&format!("{}/config/apps", self.base_url), &apps)
            .await?;
        info!("Seeded proxy config with server entry '{}'", self.server);
        Ok(())
    }

    async fn set_route(&self, domain: &str, port: u16) -> Result<(), PortsideError> {
        let routes = self.routes().await?;
        let route = Self::route_value(domain, port);

        match Self::route_index(&routes, domain) {
            Some(index) => {
                self.patch_config(&format!("{}/{}", self.routes_path(), index), &route)
                    .await?;
                info!("Replaced route {} -> localhost:{}", domain, port);
            }
            None => {
                self.post_config(&self.routes_path(), &route).await?;
                info!("Added route {} -> localhost:{}", domain, port);
            }
        }
        Ok(())
    }

    async fn delete_route(&self, domain: &str) -> Result<(), PortsideError> {
        let routes = self.routes().await?;
        match Self::route_index(&routes, domain) {
            Some(index) => {
                let url = format!("{}/{}", self.routes_path(), index);
                debug!("DELETE {}", url);
                let response = self.client.delete(&url).send().await.map_err(proxy_err)?;
                check_status("DELETE", &url, response).await?;
                info!("Deleted route {}", domain);
                Ok(())
            }
            None => Ok(()),
        }
    }
}
