use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::models::{Arch, Descriptor, Os, Platform};
use super::{LocalImageClient, ResolveError, Runtime};

pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Local lookups through the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    client: Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct InspectResponse {
    #[serde(rename = "Descriptor", default)]
    descriptor: Option<Descriptor>,
    #[serde(rename = "Architecture", default)]
    architecture: Option<String>,
    #[serde(rename = "Os", default)]
    os: Option<String>,
    #[serde(rename = "Variant", default)]
    variant: Option<String>,
}

fn local_error(reference: &str, reason: impl ToString) -> ResolveError {
    ResolveError::Local {
        backend: Runtime::Docker,
        reference: reference.to_string(),
        reason: reason.to_string(),
    }
}

impl DockerEngine {
    /// Honour `DOCKER_HOST`, falling back to the default socket.
    pub fn from_env() -> Result<Self, ResolveError> {
        let host = std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_DOCKER_HOST.to_string());
        Self::connect(&host)
    }

    pub fn connect(host: &str) -> Result<Self, ResolveError> {
        let url = Url::parse(host).map_err(|_| ResolveError::UnsupportedDockerHost(host.to_string()))?;
        match url.scheme() {
            "unix" => Self::over_socket(host, url.path()),
            "tcp" | "http" | "https" => {
                let scheme = if url.scheme() == "https" { "https" } else { "http" };
                let authority = match (url.host_str(), url.port()) {
                    (Some(h), Some(p)) => format!("{h}:{p}"),
                    (Some(h), None) => h.to_string(),
                    (None, _) => return Err(ResolveError::UnsupportedDockerHost(host.to_string())),
                };
                let client = Client::builder().build().map_err(ResolveError::Client)?;
                Ok(Self {
                    client,
                    base: format!("{scheme}://{authority}"),
                })
            }
            _ => Err(ResolveError::UnsupportedDockerHost(host.to_string())),
        }
    }

    #[cfg(unix)]
    fn over_socket(_host: &str, socket: &str) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .unix_socket(std::path::PathBuf::from(socket))
            .build()
            .map_err(ResolveError::Client)?;
        Ok(Self {
            client,
            base: "http://docker".to_string(),
        })
    }

    #[cfg(not(unix))]
    fn over_socket(host: &str, _socket: &str) -> Result<Self, ResolveError> {
        Err(ResolveError::UnsupportedDockerHost(host.to_string()))
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }
}

#[async_trait]
impl LocalImageClient for DockerEngine {
    async fn inspect(&self, image_ref: &str) -> Result<Descriptor, ResolveError> {
        let url = format!("{}/images/{image_ref}/json", self.base);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| local_error(image_ref, format!("daemon unreachable: {e}")))?;

        match res.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(local_error(image_ref, "image not found locally")),
            status => return Err(local_error(image_ref, format!("daemon returned {status}"))),
        }

        let body: InspectResponse = res
            .json()
            .await
            .map_err(|e| local_error(image_ref, format!("malformed inspect response: {e}")))?;
        descriptor_from_inspect(image_ref, body)
    }
}

/// Older daemons without the containerd image store omit `Descriptor`.
fn descriptor_from_inspect(image_ref: &str, body: InspectResponse) -> Result<Descriptor, ResolveError> {
    let mut descriptor = body
        .descriptor
        .ok_or_else(|| local_error(image_ref, "inspect response carries no descriptor"))?;
    if descriptor.media_type().to_string().is_empty() {
        return Err(local_error(image_ref, "inspect descriptor has no media type"));
    }
    if descriptor.platform().is_none() {
        if let (Some(architecture), Some(os)) = (body.architecture, body.os) {
            let mut platform = Platform::default();
            platform
                .set_architecture(Arch::from(architecture.as_str()))
                .set_os(Os::from(os.as_str()))
                .set_variant(body.variant.filter(|v| !v.is_empty()));
            descriptor.set_platform(Some(platform));
        }
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_accepts_tcp_and_unix_hosts() {
        let engine = DockerEngine::connect("tcp://127.0.0.1:2375").unwrap();
        assert_eq!(engine.base_url(), "http://127.0.0.1:2375");

        #[cfg(unix)]
        assert_eq!(DockerEngine::connect(DEFAULT_DOCKER_HOST).unwrap().base_url(), "http://docker");

        assert!(matches!(
            DockerEngine::connect("npipe:////./pipe/docker_engine"),
            Err(ResolveError::UnsupportedDockerHost(_))
        ));
        assert!(matches!(
            DockerEngine::connect("not a url"),
            Err(ResolveError::UnsupportedDockerHost(_))
        ));
    }

    #[test]
    fn descriptor_is_taken_from_inspect_body() {
        let body: InspectResponse = serde_json::from_str(
            r#"{
                "Id": "sha256:abc",
                "Architecture": "arm64",
                "Os": "linux",
                "Variant": "v8",
                "Descriptor": {
                    "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                    "digest": "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
                    "size": 1234
                }
            }"#,
        )
        .unwrap();
        let desc = descriptor_from_inspect("alpine:latest", body).unwrap();
        assert_eq!(
            desc.media_type().to_string(),
            "application/vnd.docker.distribution.manifest.v2+json"
        );
        assert_eq!(desc.size(), 1234);
        let platform = desc.platform().as_ref().unwrap();
        assert_eq!(crate::image::platform_label(platform), "linux/arm64/v8");
    }

    #[test]
    fn missing_descriptor_is_a_local_failure() {
        let body: InspectResponse = serde_json::from_str(r#"{"Id":"sha256:abc","Os":"linux"}"#).unwrap();
        let err = descriptor_from_inspect("alpine:latest", body).unwrap_err();
        assert!(matches!(err, ResolveError::Local { backend: Runtime::Docker, .. }));
    }

    #[tokio::test]
    async fn unreachable_daemon_fails() {
        // nothing listens on the discard port
        let engine = DockerEngine::connect("tcp://127.0.0.1:9").unwrap();
        let err = engine.inspect("nonexistent-image:latest").await.unwrap_err();
        assert!(matches!(err, ResolveError::Local { .. }));
    }
}
