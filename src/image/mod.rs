pub mod docker;
mod models;
pub mod podman;
pub mod reference;
pub mod registry;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use models::{
    Annotations, Arch, Descriptor, Digest, INDEX_ACCEPT, ImageIndex, ImageManifest, MANIFEST_ACCEPT,
    MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST_LIST, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_MANIFEST,
    MediaType, Os, Platform, find_platform, is_index_media_type, platform, platform_label, platform_matches,
};
pub use reference::{ImageReference, ReferenceError};

use crate::helpers::ProxyEnv;
use docker::DockerEngine;
use podman::PodmanCli;
use registry::DistributionClient;

/// Local container runtime to consult before the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    #[default]
    Docker,
    Podman,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Docker => "docker",
            Runtime::Podman => "podman",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Runtime {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Runtime::Docker),
            "podman" => Ok(Runtime::Podman),
            other => Err(ResolveError::UnknownRuntime(other.to_string())),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error("platform must be specified")]
    MissingPlatform,
    #[error("unknown container runtime: {0}")]
    UnknownRuntime(String),
    #[error("unsupported docker host: {0}")]
    UnsupportedDockerHost(String),
    #[error("{0} not found in PATH")]
    ToolNotFound(&'static str),
    #[error("{backend} lookup of {reference} failed: {reason}")]
    Local {
        backend: Runtime,
        reference: String,
        reason: String,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("registry request for {reference} failed: {source}")]
    Http {
        reference: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("registry returned {status} for {reference}")]
    Status {
        reference: String,
        status: reqwest::StatusCode,
    },
    #[error("registry authentication for {reference} failed: {reason}")]
    Auth { reference: String, reason: String },
    #[error("unexpected manifest for {reference}: {reason}")]
    Malformed { reference: String, reason: String },
    #[error("{reference} is not a manifest index (media type {media_type})")]
    NotAnIndex { reference: String, media_type: String },
    #[error("manifest index for {reference} has no annotations")]
    NoAnnotations { reference: String },
    #[error("no manifest for platform {platform} in {reference}")]
    PlatformNotFound { reference: String, platform: String },
    #[error("no image source configured")]
    NoSources,
}

/// Image store of a local container runtime.
#[async_trait]
pub trait LocalImageClient: Send + Sync {
    async fn inspect(&self, image_ref: &str) -> Result<Descriptor, ResolveError>;
}

/// Raw manifest bytes plus the descriptor the registry reported for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawManifest {
    pub descriptor: Descriptor,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// `accept` lists media types in order of preference.
    async fn get_manifest(&self, reference: &ImageReference, accept: &[&str]) -> Result<RawManifest, ResolveError>;
}

/// Opens a local client for a runtime; called once per resolution so an
/// unreachable daemon only fails that attempt.
pub type LocalClientFactory = Arc<dyn Fn(Runtime) -> Result<Arc<dyn LocalImageClient>, ResolveError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Local(Runtime),
    Remote,
}

/// Finds image metadata locally first and falls back to the registry.
#[derive(Clone)]
pub struct ImageResolver {
    local: LocalClientFactory,
    registry: Arc<dyn RegistryClient>,
}

impl fmt::Debug for ImageResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageResolver").finish_non_exhaustive()
    }
}

impl ImageResolver {
    pub fn new(local: LocalClientFactory, registry: Arc<dyn RegistryClient>) -> Self {
        Self { local, registry }
    }

    /// Docker via `DOCKER_HOST`, podman via its CLI, registry through the
    /// proxies found in the environment.
    pub fn from_env() -> Result<Self, ResolveError> {
        let local: LocalClientFactory = Arc::new(|runtime| -> Result<Arc<dyn LocalImageClient>, ResolveError> {
            match runtime {
                Runtime::Docker => Ok(Arc::new(DockerEngine::from_env()?)),
                Runtime::Podman => Ok(Arc::new(PodmanCli::default())),
            }
        });
        let registry = DistributionClient::new(&ProxyEnv::from_env())?;
        Ok(Self::new(local, Arc::new(registry)))
    }

    async fn attempt(&self, step: Attempt, image_ref: &str, reference: &ImageReference) -> Result<Descriptor, ResolveError> {
        match step {
            Attempt::Local(runtime) => (self.local)(runtime)?.inspect(image_ref).await,
            Attempt::Remote => Ok(self.registry.get_manifest(reference, MANIFEST_ACCEPT).await?.descriptor),
        }
    }

    /// Descriptor of `image_ref` from the first source that has it. When
    /// every source fails, the registry's error is returned.
    pub async fn image_descriptor(&self, image_ref: &str, runtime: Runtime) -> Result<Descriptor, ResolveError> {
        let reference = ImageReference::parse(image_ref)?;

        let mut failure = None;
        for step in [Attempt::Local(runtime), Attempt::Remote] {
            match self.attempt(step, image_ref, &reference).await {
                Ok(descriptor) => {
                    debug!(image = %reference, source = ?step, digest = %descriptor.digest(), "resolved image descriptor");
                    return Ok(descriptor);
                }
                Err(err) => {
                    debug!(image = %reference, source = ?step, error = %err, "image lookup failed");
                    failure = Some(err);
                }
            }
        }
        Err(failure.unwrap_or(ResolveError::NoSources))
    }

    pub async fn media_type(&self, image_ref: &str, runtime: Runtime) -> Result<String, ResolveError> {
        Ok(self.image_descriptor(image_ref, runtime).await?.media_type().to_string())
    }

    async fn fetch_index(&self, reference: &ImageReference) -> Result<ImageIndex, ResolveError> {
        let raw = self.registry.get_manifest(reference, INDEX_ACCEPT).await?;
        let media_type = raw.descriptor.media_type().to_string();
        if !is_index_media_type(&media_type) {
            return Err(ResolveError::NotAnIndex {
                reference: reference.to_string(),
                media_type,
            });
        }
        serde_json::from_slice(&raw.body).map_err(|e| ResolveError::Malformed {
            reference: reference.to_string(),
            reason: e.to_string(),
        })
    }

    /// Annotations on the multi-platform index itself. Registry only.
    pub async fn index_manifest_annotations(&self, image_ref: &str) -> Result<Annotations, ResolveError> {
        let reference = ImageReference::parse(image_ref)?;
        let index = self.fetch_index(&reference).await?;
        index
            .annotations()
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ResolveError::NoAnnotations {
                reference: reference.to_string(),
            })
    }

    /// Annotations for the `platform` entry of the index. The entry's own
    /// annotations win; otherwise the platform manifest is fetched and its
    /// annotations returned, possibly empty.
    pub async fn platform_manifest_annotations(
        &self,
        image_ref: &str,
        platform: Option<&Platform>,
    ) -> Result<Annotations, ResolveError> {
        let reference = ImageReference::parse(image_ref)?;
        let platform = platform.ok_or(ResolveError::MissingPlatform)?;

        let index = self.fetch_index(&reference).await?;
        let entry = find_platform(&index, platform).ok_or_else(|| ResolveError::PlatformNotFound {
            reference: reference.to_string(),
            platform: platform_label(platform),
        })?;
        if let Some(annotations) = entry.annotations().as_ref().filter(|a| !a.is_empty()) {
            return Ok(annotations.clone());
        }

        let pinned = reference.with_digest(&entry.digest().to_string());
        let media_type = entry.media_type().to_string();
        let raw = self.registry.get_manifest(&pinned, &[media_type.as_str()]).await?;
        let manifest: ImageManifest = serde_json::from_slice(&raw.body).map_err(|e| ResolveError::Malformed {
            reference: pinned.to_string(),
            reason: e.to_string(),
        })?;
        Ok(manifest.annotations().clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INDEX_REF: &str = "ghcr.io/acme/base:1.0";
    const AMD64_DIGEST: &str = "sha256:1111111111111111111111111111111111111111111111111111111111111111";
    const ARM64_DIGEST: &str = "sha256:2222222222222222222222222222222222222222222222222222222222222222";
    const LOCAL_DIGEST: &str = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const REMOTE_DIGEST: &str = "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn descriptor(media_type: &str, digest: &str) -> Descriptor {
        Descriptor::new(MediaType::from(media_type), 42, digest.parse::<Digest>().unwrap())
    }

    /// Minimal single-platform manifest body with optional annotations.
    fn manifest_body(annotations: &str) -> String {
        format!(
            r#"{{"schemaVersion":2,"mediaType":"{MEDIA_TYPE_OCI_MANIFEST}",
                "config":{{"mediaType":"application/vnd.oci.image.config.v1+json","digest":"{AMD64_DIGEST}","size":2}},
                "layers":[]{annotations}}}"#
        )
    }

    struct StubLocal {
        result: Result<Descriptor, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LocalImageClient for StubLocal {
        async fn inspect(&self, image_ref: &str) -> Result<Descriptor, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(|reason| ResolveError::Local {
                backend: Runtime::Docker,
                reference: image_ref.to_string(),
                reason,
            })
        }
    }

    /// Canned responses keyed by manifest identifier (tag or digest).
    #[derive(Default)]
    struct StubRegistry {
        manifests: HashMap<String, RawManifest>,
        calls: AtomicUsize,
    }

    impl StubRegistry {
        fn with(mut self, identifier: &str, media_type: &str, body: &str) -> Self {
            self.manifests.insert(
                identifier.to_string(),
                RawManifest {
                    descriptor: descriptor(media_type, REMOTE_DIGEST),
                    body: body.as_bytes().to_vec(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl RegistryClient for StubRegistry {
        async fn get_manifest(&self, reference: &ImageReference, _accept: &[&str]) -> Result<RawManifest, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.manifests
                .get(reference.identifier())
                .cloned()
                .ok_or_else(|| ResolveError::Status {
                    reference: reference.to_string(),
                    status: reqwest::StatusCode::NOT_FOUND,
                })
        }
    }

    struct Harness {
        resolver: ImageResolver,
        local: Arc<StubLocal>,
        registry: Arc<StubRegistry>,
        opened: Arc<Mutex<Vec<Runtime>>>,
    }

    fn harness(local: Result<Descriptor, String>, daemon_up: bool, registry: StubRegistry) -> Harness {
        let local = Arc::new(StubLocal {
            result: local,
            calls: AtomicUsize::new(0),
        });
        let registry = Arc::new(registry);
        let opened = Arc::new(Mutex::new(Vec::new()));

        let factory: LocalClientFactory = {
            let local = local.clone();
            let opened = opened.clone();
            Arc::new(move |runtime| -> Result<Arc<dyn LocalImageClient>, ResolveError> {
                opened.lock().unwrap().push(runtime);
                if daemon_up {
                    Ok(local.clone())
                } else {
                    Err(ResolveError::UnsupportedDockerHost("unreachable".to_string()))
                }
            })
        };
        Harness {
            resolver: ImageResolver::new(factory, registry.clone()),
            local,
            registry,
            opened,
        }
    }

    fn index_body(amd64_annotations: bool) -> String {
        let amd64 = if amd64_annotations {
            r#","annotations":{"org.opencontainers.image.version":"1.0-amd64"}"#
        } else {
            ""
        };
        format!(
            r#"{{"schemaVersion":2,"mediaType":"{MEDIA_TYPE_OCI_INDEX}",
                "manifests":[
                    {{"mediaType":"{MEDIA_TYPE_OCI_MANIFEST}","digest":"{AMD64_DIGEST}","size":500,
                      "platform":{{"architecture":"amd64","os":"linux"}}{amd64}}},
                    {{"mediaType":"{MEDIA_TYPE_OCI_MANIFEST}","digest":"{ARM64_DIGEST}","size":500,
                      "platform":{{"architecture":"arm64","os":"linux","variant":"v8"}}}}
                ],
                "annotations":{{"org.opencontainers.image.base.name":"acme/base"}}}}"#
        )
    }

    #[test]
    fn runtime_parses_and_defaults() {
        assert_eq!(Runtime::default(), Runtime::Docker);
        assert_eq!("Podman".parse::<Runtime>().unwrap(), Runtime::Podman);
        assert_eq!(" docker ".parse::<Runtime>().unwrap(), Runtime::Docker);
        assert!(matches!("containerd".parse::<Runtime>(), Err(ResolveError::UnknownRuntime(_))));
        assert_eq!(serde_json::to_string(&Runtime::Podman).unwrap(), r#""podman""#);
    }

    #[tokio::test]
    async fn local_hit_skips_registry() {
        let h = harness(
            Ok(descriptor(MEDIA_TYPE_DOCKER_MANIFEST, LOCAL_DIGEST)),
            true,
            StubRegistry::default(),
        );
        let media_type = h.resolver.media_type("alpine:3.18", Runtime::Docker).await.unwrap();
        assert_eq!(media_type, MEDIA_TYPE_DOCKER_MANIFEST);
        assert_eq!(h.local.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.registry.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn local_miss_falls_back_to_registry() {
        let h = harness(
            Err("image not found locally".to_string()),
            true,
            StubRegistry::default().with("3.18", MEDIA_TYPE_OCI_INDEX, "{}"),
        );
        let desc = h.resolver.image_descriptor("alpine:3.18", Runtime::Docker).await.unwrap();
        assert_eq!(desc.digest().to_string(), REMOTE_DIGEST);
        assert_eq!(desc.media_type().to_string(), MEDIA_TYPE_OCI_INDEX);
        assert_eq!(h.local.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.registry.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_daemon_falls_back_to_registry() {
        let h = harness(
            Ok(descriptor(MEDIA_TYPE_DOCKER_MANIFEST, LOCAL_DIGEST)),
            false,
            StubRegistry::default().with("latest", MEDIA_TYPE_OCI_MANIFEST, "{}"),
        );
        let media_type = h.resolver.media_type("alpine", Runtime::Docker).await.unwrap();
        assert_eq!(media_type, MEDIA_TYPE_OCI_MANIFEST);
        assert_eq!(h.local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn total_failure_reports_registry_error() {
        let h = harness(Err("image not found locally".to_string()), true, StubRegistry::default());
        let err = h.resolver.image_descriptor("alpine:3.18", Runtime::Podman).await.unwrap_err();
        assert!(matches!(err, ResolveError::Status { .. }), "{err}");
        assert_eq!(*h.opened.lock().unwrap(), vec![Runtime::Podman]);
    }

    #[tokio::test]
    async fn malformed_reference_fails_before_io() {
        let h = harness(Ok(descriptor(MEDIA_TYPE_DOCKER_MANIFEST, LOCAL_DIGEST)), true, StubRegistry::default());
        for bad in ["", "invalid:::image::reference"] {
            let err = h.resolver.image_descriptor(bad, Runtime::Docker).await.unwrap_err();
            assert!(matches!(err, ResolveError::Reference(_)), "{bad}: {err}");
            assert!(h.resolver.index_manifest_annotations(bad).await.is_err());
        }
        assert!(h.opened.lock().unwrap().is_empty());
        assert_eq!(h.registry.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn index_annotations() {
        let h = harness(
            Err(String::new()),
            true,
            StubRegistry::default()
                .with("1.0", MEDIA_TYPE_OCI_INDEX, &index_body(false))
                .with("single", MEDIA_TYPE_OCI_MANIFEST, "{}")
                .with("bare", MEDIA_TYPE_OCI_INDEX, r#"{"schemaVersion":2,"manifests":[]}"#),
        );
        let annotations = h.resolver.index_manifest_annotations(INDEX_REF).await.unwrap();
        assert_eq!(annotations["org.opencontainers.image.base.name"], "acme/base");

        let err = h.resolver.index_manifest_annotations("ghcr.io/acme/base:single").await.unwrap_err();
        assert!(matches!(err, ResolveError::NotAnIndex { .. }));

        let err = h.resolver.index_manifest_annotations("ghcr.io/acme/base:bare").await.unwrap_err();
        assert!(matches!(err, ResolveError::NoAnnotations { .. }));
        assert_eq!(h.local.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn platform_annotations_require_platform() {
        let h = harness(Err(String::new()), true, StubRegistry::default());
        let err = h.resolver.platform_manifest_annotations(INDEX_REF, None).await.unwrap_err();
        assert!(matches!(err, ResolveError::MissingPlatform));
        assert_eq!(h.registry.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn platform_annotations_from_index_entry() {
        let h = harness(
            Err(String::new()),
            true,
            StubRegistry::default().with("1.0", MEDIA_TYPE_OCI_INDEX, &index_body(true)),
        );
        let platform = platform("linux", "amd64");
        let annotations = h
            .resolver
            .platform_manifest_annotations(INDEX_REF, Some(&platform))
            .await
            .unwrap();
        assert_eq!(annotations["org.opencontainers.image.version"], "1.0-amd64");
        assert_eq!(h.registry.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn platform_annotations_from_platform_manifest() {
        let h = harness(
            Err(String::new()),
            true,
            StubRegistry::default()
                .with("1.0", MEDIA_TYPE_OCI_INDEX, &index_body(false))
                .with(
                    ARM64_DIGEST,
                    MEDIA_TYPE_OCI_MANIFEST,
                    &manifest_body(r#","annotations":{"org.opencontainers.image.revision":"abc123"}"#),
                )
                .with(AMD64_DIGEST, MEDIA_TYPE_OCI_MANIFEST, &manifest_body("")),
        );

        let arm64 = platform("linux", "arm64");
        let annotations = h
            .resolver
            .platform_manifest_annotations(INDEX_REF, Some(&arm64))
            .await
            .unwrap();
        assert_eq!(annotations["org.opencontainers.image.revision"], "abc123");

        let amd64 = platform("linux", "amd64");
        let annotations = h
            .resolver
            .platform_manifest_annotations(INDEX_REF, Some(&amd64))
            .await
            .unwrap();
        assert!(annotations.is_empty());

        let s390x = platform("linux", "s390x");
        let err = h
            .resolver
            .platform_manifest_annotations(INDEX_REF, Some(&s390x))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::PlatformNotFound { .. }));
    }
}
