//! REST client
//!
//! Obtains transfer and operation links from the metadata API and hands them
//! to the engines in `disk-core`.

use std::path::Path;
use std::sync::Arc;

use disk_core::transport::execute_json;
use disk_core::{
    ClientConfig, ConfigManager, DownloadEngine, DownloadSink, Error, HttpMethod, OperationPoller,
    OperationStatus, ProgressSink, Result, TransferLink, TransferReport, Transport,
    TransportRequest, UploadEngine, WaitStrategy,
};
use http::Method;
use http::header::{ACCEPT, HeaderMap, HeaderValue};
use url::Url;

use crate::credentials::{Authenticated, Credentials};
use crate::transport::ReqwestTransport;

const UPLOAD_PATH: &str = "/v1/disk/resources/upload";
const DOWNLOAD_PATH: &str = "/v1/disk/resources/download";
const PUBLIC_DOWNLOAD_PATH: &str = "/v1/disk/public/resources/download";
const OPERATIONS_PATH: &str = "/v1/disk/operations";

/// Client for the disk REST API transfer endpoints
pub struct RestClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    uploads: UploadEngine,
    downloads: DownloadEngine,
    operations: OperationPoller,
}

impl RestClient {
    /// Create a client talking HTTP through reqwest
    pub fn new(credentials: &Credentials, config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config)?);
        Self::with_transport(credentials, transport, config)
    }

    /// Create a client from the configuration file `manager` points at.
    ///
    /// A missing file yields the default configuration.
    pub fn from_config_file(credentials: &Credentials, manager: &ConfigManager) -> Result<Self> {
        let config = manager.load()?;
        tracing::debug!(path = %manager.config_path().display(), "configuration loaded");
        Self::new(credentials, config)
    }

    /// Create a client from the configuration in the user's config directory
    pub fn from_default_config(credentials: &Credentials) -> Result<Self> {
        Self::from_config_file(credentials, &ConfigManager::new()?)
    }

    /// Create a client on top of any transport
    pub fn with_transport(
        credentials: &Credentials,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Result<Self> {
        Url::parse(&config.base_url)?;
        let transport: Arc<dyn Transport> = Arc::new(Authenticated::new(
            transport,
            credentials,
            &config.user_agent,
        )?);

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            uploads: UploadEngine::new(transport.clone()).with_config(config.transfer),
            downloads: DownloadEngine::new(transport.clone()).with_config(config.transfer),
            operations: OperationPoller::new(transport.clone()).with_config(config.transfer),
            transport,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build an API URL with percent-encoded query parameters
    fn api_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn fetch_link(&self, method: Method, url: Url) -> Result<TransferLink> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let request = TransportRequest::new(method, url).headers(headers);
        execute_json(
            self.transport.as_ref(),
            request,
            self.config.transfer.body_limit,
        )
        .await
    }

    /// Ask for a link to upload `server_path` to
    pub async fn upload_link(&self, server_path: &str, overwrite: bool) -> Result<TransferLink> {
        let overwrite = if overwrite { "true" } else { "false" };
        let url = self.api_url(
            UPLOAD_PATH,
            &[("path", server_path), ("overwrite", overwrite)],
        )?;

        let link = self.fetch_link(Method::GET, url).await?;
        link.expect_method(HttpMethod::Put)?;
        tracing::debug!(path = server_path, href = %link.href, "upload link issued");
        Ok(link)
    }

    pub async fn download_link(&self, server_path: &str) -> Result<TransferLink> {
        let url = self.api_url(DOWNLOAD_PATH, &[("path", server_path)])?;
        self.fetch_link(Method::GET, url).await
    }

    /// Download link for a published resource, optionally a file inside it
    pub async fn public_download_link(
        &self,
        public_key: &str,
        path: Option<&str>,
    ) -> Result<TransferLink> {
        let mut query = vec![("public_key", public_key)];
        if let Some(path) = path {
            query.push(("path", path));
        }
        let url = self.api_url(PUBLIC_DOWNLOAD_PATH, &query)?;
        self.fetch_link(Method::GET, url).await
    }

    /// Let the server fetch `source_url` into `server_path`.
    ///
    /// Returns the link of the operation doing the fetch.
    pub async fn save_from_url(&self, source_url: &str, server_path: &str) -> Result<TransferLink> {
        let url = self.api_url(UPLOAD_PATH, &[("url", source_url), ("path", server_path)])?;
        self.fetch_link(Method::POST, url).await
    }

    /// Status of an operation known only by its id
    pub async fn operation_by_id(&self, id: &str) -> Result<OperationStatus> {
        let mut url = self.api_url(OPERATIONS_PATH, &[])?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("base URL {} cannot carry a path", self.base_url)))?
            .push(id);

        let link = TransferLink {
            href: url.to_string(),
            method: HttpMethod::Get,
            templated: false,
        };
        let status = self.operations.get_operation(&link).await?;
        Ok(OperationStatus {
            id: id.to_string(),
            ..status
        })
    }

    pub async fn get_operation(&self, link: &TransferLink) -> Result<OperationStatus> {
        self.operations.get_operation(link).await
    }

    /// Poll `link` until the operation succeeds or fails
    pub async fn wait_progress(
        &self,
        link: &TransferLink,
        wait: impl WaitStrategy,
    ) -> Result<OperationStatus> {
        self.operations.wait_until_done(link, wait).await
    }

    /// Upload a local file to a link from [`RestClient::upload_link`]
    pub async fn upload_file(
        &self,
        link: &TransferLink,
        local: &Path,
        resume: bool,
        progress: impl ProgressSink + 'static,
    ) -> Result<TransferReport> {
        self.uploads.upload(link, local, resume, progress).await
    }

    /// Download `server_path` into a local file
    pub async fn download_file(
        &self,
        server_path: &str,
        save_to: &Path,
        progress: impl ProgressSink + 'static,
    ) -> Result<TransferReport> {
        let sink = DownloadSink::to_file(save_to).with_progress(progress);
        self.download_to(server_path, sink).await
    }

    /// Download `server_path` into any sink
    pub async fn download_to(&self, server_path: &str, sink: DownloadSink) -> Result<TransferReport> {
        let link = self.download_link(server_path).await?;
        self.downloads.download(&link, sink).await
    }

    pub async fn download_public_resource(
        &self,
        public_key: &str,
        path: Option<&str>,
        sink: DownloadSink,
    ) -> Result<TransferReport> {
        let link = self.public_download_link(public_key, path).await?;
        self.downloads.download(&link, sink).await
    }
}
