//! Client configuration
//!
//! [`Config`] is an immutable value built via [`ConfigBuilder`]. Every
//! reconfiguration (e.g. the Gateway swapping in a credentialed view after
//! sign-in) produces a *new* `Config` rather than mutating one in place —
//! the header map returned by [`Config::headers`] is always the exact
//! snapshot taken at construction time.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use std::collections::HashMap;
use url::Url;

use crate::error::{Error, Result};

const DEFAULT_AUTH_PATH: &str = "/auth/v1";
const DEFAULT_REST_PATH: &str = "/rest/v1";
const DEFAULT_STORAGE_PATH: &str = "/storage/v1";
const DEFAULT_REALTIME_PATH: &str = "/realtime/v1";
const DEFAULT_SCHEMA: &str = "public";

/// Per-service path prefixes, relative to the project base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePaths {
    pub auth: String,
    pub rest: String,
    pub storage: String,
    pub realtime: String,
}

impl Default for ServicePaths {
    fn default() -> Self {
        Self {
            auth: DEFAULT_AUTH_PATH.to_string(),
            rest: DEFAULT_REST_PATH.to_string(),
            storage: DEFAULT_STORAGE_PATH.to_string(),
            realtime: DEFAULT_REALTIME_PATH.to_string(),
        }
    }
}

/// Immutable client configuration
///
/// Construct via [`Config::builder`]. Reconfiguration (see
/// `gateway::Gateway`) always produces a new `Config` — `headers()` never
/// changes after construction.
#[derive(Debug, Clone)]
pub struct Config {
    base_url: Url,
    api_key: String,
    schema: String,
    paths: ServicePaths,
    headers: HeaderMap,
}

impl Config {
    /// Start building a `Config` from a base project URL and API key
    pub fn builder(base_url: impl AsRef<str>, api_key: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(base_url, api_key)
    }

    /// Load `base_url`/`api_key`/`schema` from `SUPABASE_URL`, `SUPABASE_KEY`
    /// and `SUPABASE_SCHEMA` environment variables, layered with figment.
    ///
    /// This is a convenience constructor for process-wide defaults; it is
    /// not a substitute for the builder and still returns an immutable
    /// `Config`. Fails with `Error::Config` if `SUPABASE_URL`/`SUPABASE_KEY`
    /// are unset.
    pub fn from_env() -> Result<Self> {
        use figment::providers::Env;
        use figment::Figment;
        use serde::Deserialize;

        #[derive(Deserialize)]
        struct EnvConfig {
            url: String,
            key: String,
            schema: Option<String>,
        }

        let env: EnvConfig = Figment::new()
            .merge(Env::prefixed("SUPABASE_"))
            .extract()
            .map_err(|e| Error::Config(format!("missing SUPABASE_URL/SUPABASE_KEY: {e}")))?;

        let mut builder = Self::builder(env.url, env.key);
        if let Some(schema) = env.schema {
            builder = builder.schema(schema);
        }
        builder.build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn paths(&self) -> &ServicePaths {
        &self.paths
    }

    /// The header snapshot installed at construction time. Never mutated
    /// in place — callers that need a different `Authorization` header get
    /// a brand new `Config` (see `Gateway`'s `with_access_token`).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Resolve a slash-prefixed relative path against the base URL
    pub fn resolve_url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(Error::from)
    }

    /// Build a new `Config` identical to this one except the `Authorization`
    /// header is replaced with `Bearer <access_token>`. Used by the Gateway
    /// on SIGNED_IN/TOKEN_REFRESHED to derive the credentialed view.
    pub fn with_access_token(&self, access_token: &str) -> Result<Self> {
        let mut headers = self.headers.clone();
        let value = HeaderValue::from_str(&format!("Bearer {access_token}"))
            .map_err(|e| Error::Config(format!("invalid access token: {e}")))?;
        headers.insert(AUTHORIZATION, value);
        Ok(Self {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            schema: self.schema.clone(),
            paths: self.paths.clone(),
            headers,
        })
    }
}

/// Builder for [`Config`]
///
/// Requires a base URL and API key; everything else has a sensible
/// default. Always installs `apikey`, and installs
/// `Authorization: Bearer <api_key>` unless the caller has already set an
/// explicit `Authorization` header.
pub struct ConfigBuilder {
    base_url: String,
    api_key: String,
    schema: Option<String>,
    paths: ServicePaths,
    extra_headers: HashMap<String, String>,
}

impl ConfigBuilder {
    fn new(base_url: impl AsRef<str>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.as_ref().to_string(),
            api_key: api_key.into(),
            schema: None,
            paths: ServicePaths::default(),
            extra_headers: HashMap::new(),
        }
    }

    /// Override the default schema name (`public`)
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Override the auth service path prefix (default `/auth/v1`)
    pub fn auth_path(mut self, path: impl Into<String>) -> Self {
        self.paths.auth = path.into();
        self
    }

    /// Override the PostgREST service path prefix (default `/rest/v1`)
    pub fn rest_path(mut self, path: impl Into<String>) -> Self {
        self.paths.rest = path.into();
        self
    }

    /// Override the storage service path prefix (default `/storage/v1`)
    pub fn storage_path(mut self, path: impl Into<String>) -> Self {
        self.paths.storage = path.into();
        self
    }

    /// Override the realtime service path prefix (default `/realtime/v1`)
    pub fn realtime_path(mut self, path: impl Into<String>) -> Self {
        self.paths.realtime = path.into();
        self
    }

    /// Add (or override) a header. Setting `Authorization` here suppresses
    /// the default `Bearer <api_key>` header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    /// Build the immutable `Config`
    pub fn build(self) -> Result<Config> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("api key must not be empty".to_string()));
        }
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid base url '{}': {e}", self.base_url)))?;
        if !base_url.has_host() {
            return Err(Error::Config(format!(
                "base url '{}' must be absolute",
                self.base_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("apikey"),
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("invalid api key: {e}")))?,
        );

        let mut has_explicit_authorization = false;
        for (name, value) in &self.extra_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("invalid header name '{name}': {e}")))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid header value for '{name}': {e}")))?;
            if header_name == AUTHORIZATION {
                has_explicit_authorization = true;
            }
            headers.insert(header_name, header_value);
        }

        if !has_explicit_authorization {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                    .map_err(|e| Error::Config(format!("invalid api key: {e}")))?,
            );
        }

        Ok(Config {
            base_url,
            api_key: self.api_key,
            schema: self.schema.unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            paths: self.paths,
            headers,
        })
    }
}
