mod models;

use std::{fs, path::Path};

pub use models::{BuildConfig, PatchConfig};

/// Environment variable consulted by the binary when no path is given.
pub const CONFIG_ENV_VAR: &str = "IMAGE_PATCHER_CONFIG";

// ---- Loaders (serde hidden from callers) ----

impl PatchConfig {
    /// Load from a JSON file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&data)
    }

    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let parsed: PatchConfig = serde_json::from_str(json).map_err(ConfigError::Json)?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse from an env var containing JSON.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        let s = std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string()))?;
        Self::from_json_str(&s)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.build.image.trim().is_empty() {
            return Err(ConfigError::Missing("build.image"));
        }
        if self.os_type.trim().is_empty() {
            return Err(ConfigError::Missing("osType"));
        }
        if self.working_folder.as_os_str().is_empty() {
            return Err(ConfigError::Missing("workingFolder"));
        }
        Ok(())
    }
}

/// ---- Errors ----
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing env var: {0}")]
    MissingEnv(String),
    #[error("missing required field: {0}")]
    Missing(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Runtime;
    use crate::pkgmgr::UpdatePackage;

    const SAMPLE: &str = r#"{
        "build": {
            "image": "docker.io/library/nginx:1.21.6",
            "platform": { "architecture": "amd64", "os": "linux" },
            "buildkitAddr": "buildx://patcher",
            "runtime": "podman"
        },
        "osType": "debian",
        "osVersion": "11",
        "workingFolder": "/tmp/patch-job",
        "updates": [
            { "name": "openssl", "fixedVersion": "1.1.1n-0+deb11u4" },
            { "name": "libc6", "fixed_version": "2.31-13+deb11u6" }
        ]
    }"#;

    #[test]
    fn parses_full_document() {
        let cfg = PatchConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(cfg.build().image(), "docker.io/library/nginx:1.21.6");
        assert_eq!(cfg.build().runtime(), Runtime::Podman);
        assert_eq!(cfg.build().buildkit_addr(), Some("buildx://patcher"));
        assert_eq!(cfg.build().platform().map(|p| p.architecture().to_string()).as_deref(), Some("amd64"));
        assert_eq!(cfg.os_type(), "debian");
        assert!(!cfg.ignore_errors());
        assert_eq!(
            cfg.updates(),
            &[
                UpdatePackage::new("openssl", "1.1.1n-0+deb11u4"),
                UpdatePackage::new("libc6", "2.31-13+deb11u6"),
            ]
        );
    }

    #[test]
    fn runtime_defaults_to_docker() {
        let cfg = PatchConfig::from_json_str(
            r#"{"build":{"image":"alpine:3.18"},"osType":"alpine","workingFolder":"/tmp/x"}"#,
        )
        .unwrap();
        assert_eq!(cfg.build().runtime(), Runtime::Docker);
        assert!(cfg.updates().is_empty());
    }

    #[test]
    fn rejects_blank_image() {
        let err = PatchConfig::from_json_str(
            r#"{"build":{"image":" "},"osType":"alpine","workingFolder":"/tmp/x"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("build.image")));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.json");
        fs::write(&path, SAMPLE).unwrap();
        assert_eq!(PatchConfig::from_file(&path).unwrap().os_version(), "11");
        assert!(matches!(
            PatchConfig::from_file(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn missing_env_var_is_reported() {
        let err = PatchConfig::from_env("IMAGE_PATCHER_CONFIG_SURELY_UNSET").unwrap_err();
        assert!(err.to_string().contains("IMAGE_PATCHER_CONFIG_SURELY_UNSET"));
    }
}
