use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use authkit_http::HttpClientConfig;
use authkit_oauth2::AuthCodeConfig;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;

/// Environment variable prefix; `AUTHKIT__OAUTH2__CLIENT_ID` maps to
/// `oauth2.client_id`.
pub const ENV_PREFIX: &str = "AUTHKIT__";

const DEFAULT_TOKEN_FILE: &str = "authkit-tokens.json";

/// Effective CLI configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub oauth2: AuthCodeConfig,

    /// Where tokens are persisted between runs.
    pub token_file: PathBuf,

    /// Permit plain `http://` endpoints (local mock providers only).
    pub insecure_http: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            oauth2: AuthCodeConfig::default(),
            token_file: PathBuf::from(DEFAULT_TOKEN_FILE),
            insecure_http: false,
        }
    }
}

impl CliConfig {
    /// Layered load: defaults, then the YAML file (if any), then
    /// `AUTHKIT__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .context("failed to load authkit configuration")?;
        config.apply_transport();
        Ok(config)
    }

    fn apply_transport(&mut self) {
        if self.insecure_http {
            tracing::warn!("insecure_http enabled; token traffic may be sent unencrypted");
            let mut http = HttpClientConfig::token_endpoint();
            http.transport = authkit_http::TransportSecurity::AllowInsecureHttp;
            self.oauth2.http_config = Some(http);
        }
    }

    /// HTTP client settings for API calls made by `get`.
    pub fn api_http_config(&self) -> HttpClientConfig {
        let mut http = HttpClientConfig::default();
        if self.insecure_http {
            http.transport = authkit_http::TransportSecurity::AllowInsecureHttp;
        }
        http
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use authkit_oauth2::{AccessType, ApprovalPrompt};

    #[test]
    fn yaml_sections_map_onto_config() {
        let yaml = r"
oauth2:
  client_id: 1234.apps.googleusercontent.com
  client_secret: s3cr3t
  redirect_uri: http://localhost:8085/oauth2/callback
  scopes:
    - https://www.googleapis.com/auth/calendar
  access_type: online
  approval_prompt: force
token_file: /tmp/tokens.json
";
        let mut cfg: CliConfig = Figment::new().merge(Yaml::string(yaml)).extract().unwrap();
        cfg.apply_transport();

        assert_eq!(cfg.oauth2.client_id, "1234.apps.googleusercontent.com");
        assert_eq!(cfg.oauth2.client_secret.expose(), "s3cr3t");
        assert_eq!(cfg.oauth2.access_type, AccessType::Online);
        assert_eq!(cfg.oauth2.approval_prompt, ApprovalPrompt::Force);
        assert_eq!(cfg.token_file, PathBuf::from("/tmp/tokens.json"));
        assert!(cfg.oauth2.http_config.is_none());
        cfg.oauth2.validate().unwrap();
    }

    #[test]
    fn defaults_apply_without_sources() {
        let cfg: CliConfig = Figment::new().extract().unwrap();
        assert_eq!(cfg.token_file, PathBuf::from(DEFAULT_TOKEN_FILE));
        assert!(!cfg.insecure_http);
        assert!(cfg.oauth2.validate().is_err());
    }

    #[test]
    fn insecure_http_relaxes_both_clients() {
        let mut cfg: CliConfig = Figment::new()
            .merge(Yaml::string("insecure_http: true"))
            .extract()
            .unwrap();
        cfg.apply_transport();

        let token_http = cfg.oauth2.http_config.as_ref().unwrap();
        assert_eq!(
            token_http.transport,
            authkit_http::TransportSecurity::AllowInsecureHttp
        );
        assert_eq!(
            cfg.api_http_config().transport,
            authkit_http::TransportSecurity::AllowInsecureHttp
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CliConfig::load(Some(&dir.path().join("absent.yaml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
