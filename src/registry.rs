use async_trait::async_trait;

use reqwest::{header, Response, Url};

use serde::{de::DeserializeOwned, Deserialize};

use tracing::debug;

use crate::{
    config::{ClientConfig, Scheme, LISTING_CONNECT_TIMEOUT, LISTING_READ_TIMEOUT},
    manifest::{Manifest, MANIFEST_ACCEPT},
    RepossessedError, Result,
};

/// Outcome of a catalog or tag listing.
///
/// Listings never fail loudly: callers that only want names use
/// [`Listing::into_vec`], which turns everything but `Found` into an empty list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing {
    Found(Vec<String>),
    /// The registry answered with JSON but without the expected field.
    NotFound,
    /// Neither plaintext nor TLS produced a usable answer.
    Unreachable,
}

impl Listing {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Listing::Found(items) => items,
            Listing::NotFound | Listing::Unreachable => Vec::new(),
        }
    }
}

/// GETs JSON documents from a registry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` and decode its body. Non-2xx responses are errors.
    async fn get_json(&self, url: &Url, accept: Option<&str>) -> Result<serde_json::Value>;
}

/// reqwest-backed transport: a plaintext client and a TLS client that
/// accepts any certificate. The URL scheme picks the client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    plain: reqwest::Client,
    insecure: reqwest::Client,
}

impl HttpTransport {
    /// Transport with the short timeouts used for catalog and tag listings.
    pub fn listing(user_agent: &str) -> Result<Self> {
        Self::build(user_agent, LISTING_CONNECT_TIMEOUT, LISTING_READ_TIMEOUT)
    }

    /// Transport for manifests and blobs.
    pub fn transfer(config: &ClientConfig) -> Result<Self> {
        Self::build(
            &config.user_agent,
            config.transfer_connect_timeout,
            config.transfer_read_timeout,
        )
    }

    fn build(
        user_agent: &str,
        connect_timeout: std::time::Duration,
        read_timeout: std::time::Duration,
    ) -> Result<Self> {
        let builder = || {
            reqwest::Client::builder()
                .user_agent(user_agent)
                .connect_timeout(connect_timeout)
                .read_timeout(read_timeout)
        };

        Ok(Self {
            plain: builder().build()?,
            insecure: builder().danger_accept_invalid_certs(true).build()?,
        })
    }

    fn client_for(&self, url: &Url) -> &reqwest::Client {
        match url.scheme() {
            "https" => &self.insecure,
            _ => &self.plain,
        }
    }

    /// Start a GET and hand back the response once the status line says 2xx.
    /// The body is left unread for the caller to stream.
    pub async fn get_stream(&self, url: &Url) -> Result<Response> {
        let res = self
            .client_for(url)
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;

        Ok(res)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, url: &Url, accept: Option<&str>) -> Result<serde_json::Value> {
        let mut req = self.client_for(url).get(url.clone());
        if let Some(accept) = accept {
            req = req.header(header::ACCEPT, accept);
        }

        let res = req.send().await?.error_for_status()?.json().await?;

        Ok(res)
    }
}

#[derive(Debug)]
pub struct RegistryClient<T = HttpTransport> {
    host: String,
    listing: T,
    transfer: HttpTransport,
    transfer_scheme: Scheme,
}

impl RegistryClient<HttpTransport> {
    pub fn new(host: &str, config: &ClientConfig) -> Result<Self> {
        let listing = HttpTransport::listing(&config.user_agent)?;
        Self::with_listing_transport(host, listing, config)
    }
}

impl<T: Transport> RegistryClient<T> {
    /// Client whose catalog and tag listings go through `listing`.
    pub fn with_listing_transport(host: &str, listing: T, config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            host: host.to_string(),
            listing,
            transfer: HttpTransport::transfer(config)?,
            transfer_scheme: config.transfer_scheme,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Repository names from `/v2/_catalog`.
    pub async fn list_repositories(&self) -> Listing {
        #[derive(Deserialize)]
        struct Catalog {
            repositories: Option<Vec<String>>,
        }

        self.list_with_fallback("_catalog", |catalog: Catalog| catalog.repositories)
            .await
    }

    /// Tag names from `/v2/{repo}/tags/list`.
    pub async fn list_tags(&self, repo: &str) -> Listing {
        #[derive(Deserialize)]
        struct TagList {
            tags: Option<Vec<String>>,
        }

        self.list_with_fallback(&format!("{repo}/tags/list"), |list: TagList| list.tags)
            .await
    }

    /// Fetch and decode `/v2/{repo}/manifests/{tag}`.
    ///
    /// Unlike the listings there is no TLS fallback here: failures go back to the caller.
    pub async fn get_manifest(&self, repo: &str, tag: &str) -> Result<Manifest> {
        let url = self.url(self.transfer_scheme, &format!("{repo}/manifests/{tag}"))?;
        debug!(%url, "Fetching manifest");

        let body = self.transfer.get_json(&url, Some(MANIFEST_ACCEPT)).await?;
        Ok(serde_json::from_value(body)?)
    }

    pub fn blob_url(&self, repo: &str, digest: &str) -> Result<Url> {
        self.url(self.transfer_scheme, &format!("{repo}/blobs/{digest}"))
    }

    /// Transport used for manifests and blobs.
    pub fn transfer(&self) -> &HttpTransport {
        &self.transfer
    }

    async fn list_with_fallback<D, F>(&self, path: &str, field: F) -> Listing
    where
        D: DeserializeOwned,
        F: Fn(D) -> Option<Vec<String>>,
    {
        let plain = self.list_once(Scheme::Http, path, &field).await;
        if let Listing::Found(_) = plain {
            return plain;
        }

        debug!(host = %self.host, path, "Plaintext listing failed, retrying over TLS");
        match self.list_once(Scheme::Https, path, &field).await {
            found @ Listing::Found(_) => found,
            _ if plain == Listing::NotFound => Listing::NotFound,
            other => other,
        }
    }

    async fn list_once<D, F>(&self, scheme: Scheme, path: &str, field: &F) -> Listing
    where
        D: DeserializeOwned,
        F: Fn(D) -> Option<Vec<String>>,
    {
        let body = match self.url(scheme, path) {
            Ok(url) => self.listing.get_json(&url, None).await,
            Err(err) => Err(err),
        };

        let decoded = body.and_then(|value| Ok(serde_json::from_value::<D>(value)?));

        match decoded {
            Ok(doc) => match field(doc) {
                Some(items) => Listing::Found(items),
                None => Listing::NotFound,
            },
            Err(err) => {
                debug!(host = %self.host, scheme = scheme.as_str(), path, %err, "Listing failed");
                Listing::Unreachable
            }
        }
    }

    fn url(&self, scheme: Scheme, path: &str) -> Result<Url> {
        let raw = format!("{}://{}/v2/{}", scheme.as_str(), self.host, path);
        Url::parse(&raw).map_err(|err| RepossessedError::Parse(format!("{raw}: {err}")))
    }
}
