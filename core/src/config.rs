//! Site configuration.
//!
//! Loaded from a TOML file, then overridden by `SPLIST_*` environment
//! variables, then validated. Derived values (authority URL, resource
//! scope) are computed here so the rest of the crate never guesses.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::client::{SiteClient, DEFAULT_ITEM_TYPE_PREFIX, DEFAULT_PAGE_SIZE};
use crate::error::ApiError;
use crate::identity::LoginRequest;
use crate::pagination::DEFAULT_MAX_PAGES;

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    /// e.g. `https://contoso.sharepoint.com/sites/Project-Management`
    pub site_url: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub client_id: String,
    /// Full authority URL. Defaults to the public cloud authority for
    /// `tenant_id`.
    #[serde(default)]
    pub authority: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Defaults to `<site origin>/.default`.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_prefix")]
    pub item_type_prefix: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub credential_path: Option<PathBuf>,
}

fn default_prefix() -> String {
    DEFAULT_ITEM_TYPE_PREFIX.to_string()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

impl SiteConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ApiError> {
        toml::from_str(raw).map_err(|e| ApiError::Config(e.to_string()))
    }

    /// Read `path`, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ApiError::Config(format!("{}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `SPLIST_*` overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SPLIST_SITE_URL") {
            self.site_url = v;
        }
        if let Some(v) = lookup("SPLIST_TENANT_ID") {
            self.tenant_id = Some(v);
        }
        if let Some(v) = lookup("SPLIST_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = lookup("SPLIST_AUTHORITY") {
            self.authority = Some(v);
        }
        if let Some(v) = lookup("SPLIST_CREDENTIAL_PATH") {
            self.credential_path = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        let url = Url::parse(&self.site_url)
            .map_err(|e| ApiError::Config(format!("site_url {:?}: {e}", self.site_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::Config(format!(
                "site_url must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.client_id.trim().is_empty() {
            return Err(ApiError::Config("client_id is empty".to_string()));
        }
        if self.authority.is_none() && self.tenant_id.as_deref().map_or(true, str::is_empty) {
            return Err(ApiError::Config(
                "either authority or tenant_id must be set".to_string(),
            ));
        }
        if self.page_size == 0 || self.max_pages == 0 {
            return Err(ApiError::Config(
                "page_size and max_pages must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn authority(&self) -> String {
        match (&self.authority, &self.tenant_id) {
            (Some(authority), _) => authority.trim_end_matches('/').to_string(),
            (None, Some(tenant)) => format!("{DEFAULT_AUTHORITY_HOST}/{tenant}"),
            (None, None) => format!("{DEFAULT_AUTHORITY_HOST}/common"),
        }
    }

    /// Resource scope for the site, e.g. `https://contoso.sharepoint.com/.default`.
    pub fn scope(&self) -> Result<String, ApiError> {
        if let Some(scope) = &self.scope {
            return Ok(scope.clone());
        }
        let url = Url::parse(&self.site_url)
            .map_err(|e| ApiError::Config(format!("site_url {:?}: {e}", self.site_url)))?;
        Ok(format!("{}/.default", url.origin().ascii_serialization()))
    }

    pub fn login_request(&self) -> Result<LoginRequest, ApiError> {
        Ok(LoginRequest {
            client_id: self.client_id.clone(),
            authority: self.authority(),
            redirect_uri: self.redirect_uri.clone(),
            scopes: vec![self.scope()?],
        })
    }

    pub fn site_client(&self) -> SiteClient {
        SiteClient::new(&self.site_url)
            .with_item_type_prefix(&self.item_type_prefix)
            .with_page_size(self.page_size)
    }
}
