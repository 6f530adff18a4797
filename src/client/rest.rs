use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, IF_MATCH};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use super::models::{
    AvailableResources, Host, IpAllocation, IpPool, Network, NewHost, NewNetwork, NewProject,
    NewSshKey, NewVolume, Project, Service, SshKey, UpdateVolume, UsageReport, Volume,
    VolumeAttachHost, VolumeAttachment,
};
use super::{ApiResult, MetalApi};
use crate::config::{ClientConfig, SharedTokenSource};
use crate::error::ProviderError;

/// [`MetalApi`] over HTTPS.
pub struct RestClient {
    http: Client,
    base_path: String,
    token: String,
    token_source: Option<SharedTokenSource>,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_path", &self.base_path)
            .field("token_source", &self.token_source.is_some())
            .finish_non_exhaustive()
    }
}

impl RestClient {
    /// Build a client for `config`.
    ///
    /// When `token_source` is set it is asked for a token before every
    /// request and the static token in `config` is ignored.
    pub fn new(
        config: &ClientConfig,
        token_source: Option<SharedTokenSource>,
    ) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        for (name, value) in config.default_headers() {
            let value = HeaderValue::from_str(&value).map_err(|_| {
                ProviderError::Configuration(format!("invalid value for header {}", name))
            })?;
            headers.insert(HeaderName::from_static(header_key(name)), value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            http,
            base_path: config.base_path(),
            token: config.token.clone(),
            token_source,
        })
    }

    async fn bearer(&self) -> Result<String, ProviderError> {
        match &self.token_source {
            Some(source) => source.token().await.map_err(|e| {
                error!(error = %e, "Failed to retrieve access token");
                ProviderError::Token(e.message())
            }),
            None => Ok(self.token.clone()),
        }
    }

    async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ProviderError> {
        let url = format!("{}{}", self.base_path, path);
        debug!(%method, %url, "Sending request");
        let token = self.bearer().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn execute(builder: RequestBuilder) -> Result<Response, ProviderError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::api(status.as_u16(), &body))
    }

    async fn call<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ProviderError> {
        Ok(Self::execute(builder).await?.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        Self::call(self.request(Method::GET, path).await?).await
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        etag: Option<&str>,
    ) -> ApiResult<T> {
        let mut builder = self.request(method, path).await?.json(body);
        if let Some(etag) = etag.filter(|e| !e.is_empty()) {
            builder = builder.header(IF_MATCH, etag);
        }
        Self::call(builder).await
    }

    async fn send_unit<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ApiResult<()> {
        let mut builder = self.request(method, path).await?;
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Self::execute(builder).await?;
        Ok(())
    }

    async fn delete(&self, path: &str, etag: Option<&str>) -> ApiResult<()> {
        let mut builder = self.request(Method::DELETE, path).await?;
        if let Some(etag) = etag.filter(|e| !e.is_empty()) {
            builder = builder.header(IF_MATCH, etag);
        }
        Self::execute(builder).await?;
        Ok(())
    }

    async fn upload(
        &self,
        method: Method,
        path: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> ApiResult<Service> {
        let part = Part::bytes(contents).file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        Self::call(self.request(method, path).await?.multipart(form)).await
    }
}

/// Lower-cased header names as [`HeaderName::from_static`] requires.
fn header_key(name: &'static str) -> &'static str {
    match name {
        "Membership" => "membership",
        "Project" => "project",
        "Space" => "space",
        "GLP-Role" => "glp-role",
        "GLP-Workspace" => "glp-workspace",
        other => other,
    }
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait::async_trait]
impl MetalApi for RestClient {
    async fn available_resources(&self) -> ApiResult<AvailableResources> {
        self.get("/available-resources").await
    }

    async fn add_host(&self, host: &NewHost) -> ApiResult<Host> {
        self.send_json(Method::POST, "/hosts", host, None).await
    }

    async fn get_host(&self, id: &str) -> ApiResult<Host> {
        self.get(&format!("/hosts/{}", id)).await
    }

    async fn update_host(&self, host: &Host) -> ApiResult<Host> {
        self.send_json(Method::PUT, &format!("/hosts/{}", host.id), host, Some(&host.etag))
            .await
    }

    async fn delete_host(&self, id: &str) -> ApiResult<()> {
        self.delete(&format!("/hosts/{}", id), None).await
    }

    async fn power_off_host(&self, id: &str) -> ApiResult<()> {
        self.send_unit::<()>(Method::POST, &format!("/hosts/{}/poweroff", id), None)
            .await
    }

    async fn add_volume(&self, volume: &NewVolume) -> ApiResult<Volume> {
        self.send_json(Method::POST, "/volumes", volume, None).await
    }

    async fn get_volume(&self, id: &str) -> ApiResult<Volume> {
        self.get(&format!("/volumes/{}", id)).await
    }

    async fn list_volumes(&self) -> ApiResult<Vec<Volume>> {
        self.get("/volumes").await
    }

    async fn update_volume(&self, volume: &UpdateVolume) -> ApiResult<Volume> {
        self.send_json(Method::PUT, &format!("/volumes/{}", volume.id), volume, Some(&volume.etag))
            .await
    }

    async fn delete_volume(&self, id: &str) -> ApiResult<()> {
        self.delete(&format!("/volumes/{}", id), None).await
    }

    async fn attach_volume(&self, volume_id: &str, host_id: &str) -> ApiResult<()> {
        let body = VolumeAttachHost {
            host_id: host_id.to_string(),
        };
        self.send_unit(Method::POST, &format!("/volumes/{}/attach", volume_id), Some(&body))
            .await
    }

    async fn detach_volume(&self, volume_id: &str, host_id: &str) -> ApiResult<()> {
        let body = VolumeAttachHost {
            host_id: host_id.to_string(),
        };
        self.send_unit(Method::POST, &format!("/volumes/{}/detach", volume_id), Some(&body))
            .await
    }

    async fn list_volume_attachments(&self) -> ApiResult<Vec<VolumeAttachment>> {
        self.get("/volume-attachments").await
    }

    async fn delete_volume_attachment(&self, id: &str) -> ApiResult<()> {
        self.delete(&format!("/volume-attachments/{}", id), None).await
    }

    async fn add_network(&self, network: &NewNetwork) -> ApiResult<Network> {
        self.send_json(Method::POST, "/networks", network, None).await
    }

    async fn get_network(&self, id: &str) -> ApiResult<Network> {
        self.get(&format!("/networks/{}", id)).await
    }

    async fn update_network(&self, network: &Network) -> ApiResult<Network> {
        let path = format!("/networks/{}", network.id);
        self.send_json(Method::PUT, &path, network, Some(&network.etag))
            .await
    }

    async fn delete_network(&self, id: &str) -> ApiResult<()> {
        self.delete(&format!("/networks/{}", id), None).await
    }

    async fn list_ip_pools(&self) -> ApiResult<Vec<IpPool>> {
        self.get("/ippools").await
    }

    async fn get_ip_pool(&self, id: &str) -> ApiResult<IpPool> {
        self.get(&format!("/ippools/{}", id)).await
    }

    async fn allocate_ips(&self, pool_id: &str, allocations: &[IpAllocation]) -> ApiResult<IpPool> {
        let path = format!("/ippools/{}/allocateips", pool_id);
        self.send_json(Method::PUT, &path, &allocations, None).await
    }

    async fn return_ips(&self, pool_id: &str, ips: &[String]) -> ApiResult<IpPool> {
        self.send_json(Method::PUT, &format!("/ippools/{}/returnips", pool_id), &ips, None)
            .await
    }

    async fn add_project(&self, project: &NewProject) -> ApiResult<Project> {
        self.send_json(Method::POST, "/projects", project, None).await
    }

    async fn get_project(&self, id: &str) -> ApiResult<Project> {
        self.get(&format!("/projects/{}", id)).await
    }

    async fn update_project(&self, project: &Project) -> ApiResult<Project> {
        let path = format!("/projects/{}", project.id);
        self.send_json(Method::PUT, &path, project, Some(&project.etag))
            .await
    }

    async fn delete_project(&self, id: &str, etag: &str) -> ApiResult<()> {
        self.delete(&format!("/projects/{}", id), Some(etag)).await
    }

    async fn add_ssh_key(&self, key: &NewSshKey) -> ApiResult<SshKey> {
        self.send_json(Method::POST, "/sshkeys", key, None).await
    }

    async fn get_ssh_key(&self, id: &str) -> ApiResult<SshKey> {
        self.get(&format!("/sshkeys/{}", id)).await
    }

    async fn update_ssh_key(&self, key: &SshKey) -> ApiResult<SshKey> {
        self.send_json(Method::PUT, &format!("/sshkeys/{}", key.id), key, Some(&key.etag))
            .await
    }

    async fn delete_ssh_key(&self, id: &str) -> ApiResult<()> {
        self.delete(&format!("/sshkeys/{}", id), None).await
    }

    async fn add_service(&self, file_name: &str, contents: Vec<u8>) -> ApiResult<Service> {
        self.upload(Method::POST, "/services", file_name, contents).await
    }

    async fn update_service(
        &self,
        id: &str,
        file_name: &str,
        contents: Vec<u8>,
    ) -> ApiResult<Service> {
        self.upload(Method::PUT, &format!("/services/{}", id), file_name, contents)
            .await
    }

    async fn delete_service(&self, id: &str) -> ApiResult<()> {
        self.delete(&format!("/services/{}", id), None).await
    }

    async fn usage_report(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> ApiResult<UsageReport> {
        let mut query = vec![("start", rfc3339(start))];
        if let Some(end) = end {
            query.push(("end", rfc3339(end)));
        }
        Self::call(self.request(Method::GET, "/usage-reports").await?.query(&query)).await
    }
}
