use std::fmt;
use std::str::FromStr;

use oci_spec::distribution::{ParseError, Reference};

pub const DEFAULT_TAG: &str = "latest";
const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_HOST: &str = "registry-1.docker.io";

#[derive(thiserror::Error, Debug)]
pub enum ReferenceError {
    #[error("image reference is empty")]
    Empty,
    #[error("invalid image reference {reference:?}: {source}")]
    Invalid {
        reference: String,
        #[source]
        source: ParseError,
    },
}

/// A normalised `registry/repository[:tag][@digest]` reference.
#[derive(Debug, Clone)]
pub struct ImageReference(Reference);

impl ImageReference {
    /// Parse and normalise. No I/O; Docker Hub shorthands expand to
    /// `docker.io/library/...`.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }
        Reference::from_str(input)
            .map(Self)
            .map_err(|source| ReferenceError::Invalid {
                reference: input.to_string(),
                source,
            })
    }

    pub fn registry(&self) -> &str {
        self.0.registry()
    }

    /// Host to actually talk to; Docker Hub's API lives on its own name.
    pub fn registry_host(&self) -> &str {
        match self.0.registry() {
            DOCKER_HUB | "index.docker.io" => DOCKER_HUB_HOST,
            other => other,
        }
    }

    pub fn repository(&self) -> &str {
        self.0.repository()
    }

    pub fn tag(&self) -> Option<&str> {
        self.0.tag()
    }

    pub fn digest(&self) -> Option<&str> {
        self.0.digest()
    }

    /// What goes after `/manifests/`: the digest when pinned, else the tag.
    pub fn identifier(&self) -> &str {
        self.digest().or(self.tag()).unwrap_or(DEFAULT_TAG)
    }

    /// Same repository, pinned to `digest`.
    pub fn with_digest(&self, digest: &str) -> Self {
        Self(Reference::with_digest(
            self.registry().to_string(),
            self.repository().to_string(),
            digest.to_string(),
        ))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.whole())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:4c0fdaa8b6341bfdeca5f18f7837462c80cff90527ee35ef185571e1c327beac";

    #[test]
    fn expands_docker_hub_shorthand() {
        let r = ImageReference::parse("alpine:3.18").unwrap();
        assert_eq!(r.registry(), "docker.io");
        assert_eq!(r.registry_host(), "registry-1.docker.io");
        assert_eq!(r.repository(), "library/alpine");
        assert_eq!(r.identifier(), "3.18");
        assert_eq!(r.to_string(), "docker.io/library/alpine:3.18");

        let r = ImageReference::parse(" bitnami/nginx ").unwrap();
        assert_eq!(r.repository(), "bitnami/nginx");
        assert_eq!(r.identifier(), "latest");
    }

    #[test]
    fn keeps_explicit_registry_and_digest() {
        let r = ImageReference::parse(&format!("localhost:5000/team/app:v1@{DIGEST}")).unwrap();
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.registry_host(), "localhost:5000");
        assert_eq!(r.repository(), "team/app");
        assert_eq!(r.tag(), Some("v1"));
        assert_eq!(r.digest(), Some(DIGEST));
        assert_eq!(r.identifier(), DIGEST);

        let r = ImageReference::parse("mcr.microsoft.com/cbl-mariner/base/core:2.0").unwrap();
        assert_eq!(r.registry_host(), "mcr.microsoft.com");
        assert_eq!(r.repository(), "cbl-mariner/base/core");
    }

    #[test]
    fn rejects_bad_references() {
        assert!(matches!(ImageReference::parse(""), Err(ReferenceError::Empty)));
        assert!(matches!(ImageReference::parse("   "), Err(ReferenceError::Empty)));
        for bad in [
            "invalid:::image::reference",
            "UPPER/case",
            "alpine:",
            "alpine@sha256:short",
            "registry.example.com/",
            "a//b",
        ] {
            assert!(
                matches!(ImageReference::parse(bad), Err(ReferenceError::Invalid { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn with_digest_pins_reference() {
        let r = ImageReference::parse("nginx:1.25").unwrap().with_digest(DIGEST);
        assert_eq!(r.identifier(), DIGEST);
        assert_eq!(r.repository(), "library/nginx");
        assert_eq!(r.to_string(), format!("docker.io/library/nginx@{DIGEST}"));
    }
}
