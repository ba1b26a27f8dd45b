//! A single registry endpoint: catalog listing, tag listing, manifest
//! resolution and config-blob fetch, all speaking the Docker Registry v2
//! HTTP API directly over `reqwest`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexer_model::{Error, Image, Reference};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::auth::{ChallengeManager, Credentials};

const SCHEMA2_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
const CATALOG_PAGE_SIZE: u32 = 1000;

/// One configured upstream registry, reachable at `base_url`.
pub struct RegistryClient {
    base_url: url::Url,
    host: String,
    prefixes: Vec<String>,
    client: Client,
    challenges: ChallengeManager,
}

impl RegistryClient {
    /// Builds a client for `base_url`, performing the v2 ping preflight to
    /// discover whether (and how) the registry challenges requests.
    /// `concurrency` bounds both the idle connection pool and the number of
    /// in-flight fetches a caller should run against this registry.
    pub async fn connect(
        base_url: url::Url,
        host: String,
        prefixes: Vec<String>,
        credentials: Option<Credentials>,
        concurrency: usize,
    ) -> Result<Self, Error> {
        let client = Client::builder()
            .pool_max_idle_per_host(concurrency)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let challenges = ChallengeManager::ping(client.clone(), &base_url, credentials).await?;

        Ok(RegistryClient {
            base_url,
            host,
            prefixes,
            client,
            challenges,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Lists every repository on this registry matching the configured
    /// prefixes, paginating the `_catalog` endpoint.
    pub async fn catalog(&self) -> Result<Vec<Reference>, Error> {
        let mut names = Vec::new();
        let mut last = String::new();

        loop {
            let url = self
                .base_url
                .join("/v2/_catalog")
                .map_err(|e| Error::Config(e.to_string()))?;
            let mut request = self
                .client
                .get(url)
                .query(&[("n", CATALOG_PAGE_SIZE.to_string())]);
            if !last.is_empty() {
                request = request.query(&[("last", &last)]);
            }
            request = self.authorize(request, "registry:catalog:*").await?;

            let response = self.send(request).await?;
            let page: CatalogPage = self.decode(response).await?;
            if page.repositories.is_empty() {
                break;
            }

            let page_len = page.repositories.len();
            for name in page.repositories {
                if self.prefixes.is_empty() || self.prefixes.iter().any(|p| name.starts_with(p)) {
                    let reference = Reference::with_host_prefix(&self.host, &name)?;
                    names.push(reference);
                } else {
                    log::debug!("skipping {name} on {}: does not match configured prefixes", self.host);
                }
                last = name;
            }

            if (page_len as u32) < CATALOG_PAGE_SIZE {
                break;
            }
        }

        Ok(names)
    }

    /// Lists every tag for a repository reference (tag/digest ignored).
    pub async fn tags(&self, repository: &Reference) -> Result<Vec<String>, Error> {
        let url = self
            .base_url
            .join(&format!("/v2/{}/tags/list", repository.repository_path()))
            .map_err(|e| Error::Config(e.to_string()))?;
        let request = self
            .authorize(self.client.get(url), &pull_scope(repository))
            .await?;

        let response = self.send(request).await?;
        let body: TagsList = self.decode(response).await?;
        Ok(body.tags)
    }

    /// Resolves a tagged reference's manifest digest and config-blob digest.
    async fn resolve_manifest(&self, tagged: &Reference) -> Result<ManifestDescriptor, Error> {
        let tag = tagged.require_tag()?;
        let url = self
            .base_url
            .join(&format!(
                "/v2/{}/manifests/{tag}",
                tagged.repository_path()
            ))
            .map_err(|e| Error::Config(e.to_string()))?;
        let request = self
            .authorize(self.client.get(url), &pull_scope(tagged))
            .await?
            .header(reqwest::header::ACCEPT, SCHEMA2_MANIFEST_MEDIA_TYPE);

        let response = self.send(request).await?;
        let manifest: Schema2Manifest = self.decode(response).await?;
        if manifest.media_type.as_deref() != Some(SCHEMA2_MANIFEST_MEDIA_TYPE) {
            return Err(Error::Protocol(format!(
                "{tagged}: unsupported manifest media type {:?}",
                manifest.media_type
            )));
        }

        Ok(ManifestDescriptor {
            config_digest: manifest.config.digest,
        })
    }

    /// Fetches the image config blob for a tagged reference and extracts
    /// its creation timestamp and labels.
    pub async fn image(&self, tagged: &Reference) -> Result<Image, Error> {
        let descriptor = self.resolve_manifest(tagged).await?;
        let tag = tagged.require_tag()?;

        let url = self
            .base_url
            .join(&format!(
                "/v2/{}/blobs/{}",
                tagged.repository_path(),
                descriptor.config_digest
            ))
            .map_err(|e| Error::Config(e.to_string()))?;
        let request = self
            .authorize(self.client.get(url), &pull_scope(tagged))
            .await?;

        let response = self.send(request).await?;
        let config: ImageConfigBlob = self.decode(response).await?;

        let created = config
            .created
            .parse::<DateTime<Utc>>()
            .map_err(|e| Error::Protocol(format!("{tagged}: malformed created timestamp: {e}")))?;

        Ok(Image::new(
            tag.to_string(),
            created,
            config.config.labels.unwrap_or_default(),
        ))
    }

    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        scope: &str,
    ) -> Result<reqwest::RequestBuilder, Error> {
        self.challenges.authorize(request, scope).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, Error> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("request to {} failed: {e}", self.host)))?;

        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!(
                "{} returned 404 for {}",
                self.host,
                response.url()
            ))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Auth(format!(
                "{} denied access to {}",
                self.host,
                response.url()
            ))),
            other => Err(Error::Upstream(format!(
                "{} returned {other} for {}",
                self.host,
                response.url()
            ))),
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, Error> {
        response
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("malformed response from {}: {e}", self.host)))
    }
}

fn pull_scope(reference: &Reference) -> String {
    format!("repository:{}:pull", reference.repository_path())
}

struct ManifestDescriptor {
    config_digest: String,
}

#[derive(Deserialize)]
struct CatalogPage {
    repositories: Vec<String>,
}

#[derive(Deserialize)]
struct TagsList {
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct Schema2Manifest {
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    config: Schema2Descriptor,
}

#[derive(Deserialize)]
struct Schema2Descriptor {
    digest: String,
}

#[derive(Deserialize)]
struct ImageConfigBlob {
    created: String,
    config: ImageConfigDetails,
}

#[derive(Deserialize)]
struct ImageConfigDetails {
    #[serde(rename = "Labels")]
    labels: Option<std::collections::BTreeMap<String, String>>,
}
