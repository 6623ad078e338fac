use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, NoProxy, Proxy, Response, StatusCode};
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use url::Url;

use super::models::{Descriptor, Digest, MediaType};
use super::reference::ImageReference;
use super::{RawManifest, RegistryClient, ResolveError};
use crate::helpers::ProxyEnv;

const USER_AGENT: &str = "image-patcher-rust/1.0";
const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

fn challenge_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("invalid auth challenge regex"))
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let mut challenge = Self::default();
        for caps in challenge_regex().captures_iter(params) {
            let value = caps[2].to_string();
            match &caps[1] {
                "realm" => challenge.realm = value,
                "service" => challenge.service = Some(value),
                "scope" => challenge.scope = Some(value),
                _ => {}
            }
        }
        (!challenge.realm.is_empty()).then_some(challenge)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaTypeField {
    #[serde(default, rename = "mediaType")]
    media_type: Option<String>,
}

/// OCI distribution API client with anonymous token auth.
#[derive(Debug, Clone)]
pub struct DistributionClient {
    client: Client,
}

impl DistributionClient {
    /// Proxies come only from `proxy`; an empty one disables proxying.
    pub fn new(proxy: &ProxyEnv) -> Result<Self, ResolveError> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if proxy.is_empty() {
            builder = builder.no_proxy();
        }
        if !proxy.http_proxy.is_empty() {
            let http = Proxy::http(&proxy.http_proxy).map_err(ResolveError::Client)?;
            builder = builder.proxy(http.no_proxy(NoProxy::from_string(&proxy.no_proxy)));
        }
        if !proxy.https_proxy.is_empty() {
            let https = Proxy::https(&proxy.https_proxy).map_err(ResolveError::Client)?;
            builder = builder.proxy(https.no_proxy(NoProxy::from_string(&proxy.no_proxy)));
        }
        let client = builder.build().map_err(ResolveError::Client)?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str, accept: &str, token: Option<&str>, reference: &ImageReference) -> Result<Response, ResolveError> {
        let mut req = self.client.get(url).header(ACCEPT, accept);
        if let Some(token) = token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        req.send().await.map_err(|source| ResolveError::Http {
            reference: reference.to_string(),
            source,
        })
    }

    async fn fetch_token(&self, reference: &ImageReference, challenge: Option<&str>) -> Result<String, ResolveError> {
        let auth_error = |reason: String| ResolveError::Auth {
            reference: reference.to_string(),
            reason,
        };
        let challenge = challenge
            .and_then(BearerChallenge::parse)
            .ok_or_else(|| auth_error("registry requires credentials".to_string()))?;

        let mut url = Url::parse(&challenge.realm).map_err(|e| auth_error(format!("bad realm {}: {e}", challenge.realm)))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            let scope = challenge
                .scope
                .clone()
                .unwrap_or_else(|| format!("repository:{}:pull", reference.repository()));
            query.append_pair("scope", &scope);
        }

        let res = self
            .client
            .get(url)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| auth_error(e.to_string()))?;
        let body: TokenResponse = res.json().await.map_err(|e| auth_error(e.to_string()))?;
        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| auth_error("token endpoint returned no token".to_string()))
    }
}

fn scheme_for(host: &str) -> &'static str {
    if host.starts_with("localhost") || host.starts_with("127.") || host.starts_with("[::1]") {
        "http"
    } else {
        "https"
    }
}

fn header_str(res: &Response, name: impl reqwest::header::AsHeaderName) -> Option<String> {
    res.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Generic content types say nothing about the manifest kind.
fn manifest_media_type(content_type: Option<&str>, body: &[u8]) -> Option<String> {
    let from_header = content_type
        .map(|ct| ct.split(';').next().unwrap_or_default().trim())
        .filter(|ct| !ct.is_empty() && !matches!(*ct, "application/json" | "text/plain" | "application/octet-stream"));
    match from_header {
        Some(ct) => Some(ct.to_string()),
        None => serde_json::from_slice::<MediaTypeField>(body)
            .ok()
            .and_then(|p| p.media_type)
            .filter(|m| !m.is_empty()),
    }
}

pub fn sha256_digest(body: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(body)))
}

#[async_trait]
impl RegistryClient for DistributionClient {
    async fn get_manifest(&self, reference: &ImageReference, accept: &[&str]) -> Result<RawManifest, ResolveError> {
        let host = reference.registry_host();
        let url = format!(
            "{}://{host}/v2/{}/manifests/{}",
            scheme_for(host),
            reference.repository(),
            reference.identifier()
        );
        let accept = accept.join(", ");

        let mut res = self.send(&url, &accept, None, reference).await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            let challenge = header_str(&res, WWW_AUTHENTICATE);
            let token = self.fetch_token(reference, challenge.as_deref()).await?;
            res = self.send(&url, &accept, Some(&token), reference).await?;
        }
        if !res.status().is_success() {
            return Err(ResolveError::Status {
                reference: reference.to_string(),
                status: res.status(),
            });
        }

        let content_type = header_str(&res, CONTENT_TYPE);
        let digest = header_str(&res, DOCKER_CONTENT_DIGEST);
        let body = res.bytes().await.map_err(|source| ResolveError::Http {
            reference: reference.to_string(),
            source,
        })?;

        let media_type = manifest_media_type(content_type.as_deref(), &body).ok_or_else(|| ResolveError::Malformed {
            reference: reference.to_string(),
            reason: "manifest media type is unknown".to_string(),
        })?;

        let digest = digest.unwrap_or_else(|| sha256_digest(&body));
        let digest: Digest = digest.parse().map_err(|e| ResolveError::Malformed {
            reference: reference.to_string(),
            reason: format!("bad manifest digest {digest:?}: {e}"),
        })?;

        Ok(RawManifest {
            descriptor: Descriptor::new(MediaType::from(media_type.as_str()), body.len() as u64, digest),
            body: body.to_vec(),
        })
    }
}
