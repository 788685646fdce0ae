//! Stateless request builder and response parser for the SharePoint REST API.
//!
//! # Design
//! `SiteClient` holds only the site URL and list conventions (metadata
//! type prefix, page size). Header state comes in as a `SessionContext` on
//! every `build_*` call. Each operation is split into `build_*` (produces an
//! `HttpRequest`) and `parse_*` (consumes an `HttpResponse`), so the I/O
//! boundary stays with the caller.

use serde_json::{json, Value};
use url::Url;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::session::{RequestDigest, SessionContext};
use crate::types::{ContextInfo, ListItem, Page, SiteUser, UserList};

pub const DEFAULT_ITEM_TYPE_PREFIX: &str = "SP.Data";
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Where a list request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Appended to the list's `items` collection, e.g. `"(7)"` or
    /// `"?$filter=Status eq 'Open'"`. Empty means the collection itself.
    Suffix(String),
    /// An absolute URL used verbatim (continuation links). It must share the
    /// site's origin, since the credential travels with it.
    Url(String),
}

impl Target {
    pub fn collection() -> Self {
        Target::Suffix(String::new())
    }

    pub fn item(id: i64) -> Self {
        Target::Suffix(format!("({id})"))
    }
}

/// Decoded result of a list request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Body(Value),
    Empty,
}

#[derive(Debug, Clone)]
pub struct SiteClient {
    site_url: String,
    item_type_prefix: String,
    page_size: usize,
}

impl SiteClient {
    pub fn new(site_url: &str) -> Self {
        Self {
            site_url: site_url.trim_end_matches('/').to_string(),
            item_type_prefix: DEFAULT_ITEM_TYPE_PREFIX.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_item_type_prefix(mut self, prefix: &str) -> Self {
        self.item_type_prefix = prefix.trim_end_matches('.').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// `{site}/_api/web/lists/getbytitle('{list}')/items`.
    pub fn items_url(&self, list: &str) -> String {
        let title = urlencoding::encode(&list.replace('\'', "''")).into_owned();
        format!("{}/_api/web/lists/getbytitle('{title}')/items", self.site_url)
    }

    /// Entity type name SharePoint expects in `__metadata.type`.
    pub fn item_type(&self, list: &str) -> String {
        format!("{}.{list}ListItem", self.item_type_prefix)
    }

    /// Add the `__metadata` tag a verbose-mode POST/PATCH needs.
    pub fn stamp(&self, list: &str, item: &ListItem) -> Value {
        let mut map = item.as_map().clone();
        map.insert("__metadata".to_string(), json!({ "type": self.item_type(list) }));
        Value::Object(map)
    }

    // -----------------------------------------------------------------------
    // Session endpoints
    // -----------------------------------------------------------------------

    /// Ask for a request digest. Only the credential is needed.
    pub fn build_context_info(&self, session: &SessionContext) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Post,
            url: format!("{}/_api/contextinfo", self.site_url),
            headers: session.read_headers(),
            body: None,
        }
    }

    pub fn parse_context_info(&self, response: HttpResponse) -> Result<RequestDigest, ApiError> {
        // A refused digest comes back with an error_description, often on a
        // 4xx status, so look for it before judging the status.
        if let Ok(info) = serde_json::from_str::<ContextInfo>(&response.body) {
            if let Some(description) = info.error_description {
                return Err(ApiError::Digest(description));
            }
            if response.is_success() {
                if let Some(digest) = info.form_digest_value.filter(|d| !d.is_empty()) {
                    tracing::debug!(timeout_seconds = ?info.timeout_seconds, "request digest issued");
                    return Ok(RequestDigest::new(digest));
                }
            }
        }
        check_status(&response, 200)?;
        Err(ApiError::Digest(
            "context info response carried no FormDigestValue".to_string(),
        ))
    }

    pub fn build_current_user(&self, session: &SessionContext) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: format!("{}/_api/web/currentuser", self.site_url),
            headers: session.read_headers(),
            body: None,
        }
    }

    pub fn parse_current_user(&self, response: HttpResponse) -> Result<SiteUser, ApiError> {
        check_status(&response, 200)?;
        decode(&response.body)
    }

    pub fn build_site_users(&self, session: &SessionContext) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: format!("{}/_api/web/siteusers", self.site_url),
            headers: session.read_headers(),
            body: None,
        }
    }

    /// Site roster restricted to assignable people.
    pub fn parse_site_users(&self, response: HttpResponse) -> Result<Vec<SiteUser>, ApiError> {
        check_status(&response, 200)?;
        let list: UserList = decode(&response.body)?;
        Ok(list.value.into_iter().filter(SiteUser::is_assignable).collect())
    }

    // -----------------------------------------------------------------------
    // List endpoints
    // -----------------------------------------------------------------------

    /// Build one list call. `body` is required for POST/PATCH and rejected
    /// for GET/DELETE.
    pub fn build_request(
        &self,
        session: &SessionContext,
        method: HttpMethod,
        list: &str,
        target: &Target,
        body: Option<&Value>,
    ) -> Result<HttpRequest, ApiError> {
        let url = match target {
            Target::Suffix(suffix) => format!("{}{suffix}", self.items_url(list)),
            Target::Url(url) => {
                self.check_origin(url)?;
                url.clone()
            }
        };
        let body = match (method, body) {
            (HttpMethod::Post | HttpMethod::Patch, Some(body)) => Some(
                serde_json::to_string(body).map_err(|e| ApiError::SerializationError(e.to_string()))?,
            ),
            (HttpMethod::Post | HttpMethod::Patch, None) => {
                return Err(ApiError::InvalidRequest(format!("{method} requires a body")));
            }
            (HttpMethod::Get | HttpMethod::Delete, Some(_)) => {
                return Err(ApiError::InvalidRequest(format!("{method} does not take a body")));
            }
            (HttpMethod::Get | HttpMethod::Delete, None) => None,
        };
        let headers = if method.is_mutating() {
            session.write_headers()?
        } else {
            session.read_headers()
        };
        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }

    fn check_origin(&self, url: &str) -> Result<(), ApiError> {
        let parsed = Url::parse(url).map_err(|e| ApiError::InvalidRequest(format!("{url}: {e}")))?;
        let site = Url::parse(&self.site_url)
            .map_err(|e| ApiError::InvalidRequest(format!("{}: {e}", self.site_url)))?;
        if parsed.origin() != site.origin() {
            return Err(ApiError::InvalidRequest(format!(
                "{url} is outside {}",
                site.origin().ascii_serialization()
            )));
        }
        Ok(())
    }

    /// Decode a list response according to the method's contract:
    /// GET and POST return the body, PATCH and DELETE return nothing.
    pub fn parse_reply(&self, method: HttpMethod, response: HttpResponse) -> Result<Reply, ApiError> {
        match method {
            HttpMethod::Get => {
                check_status(&response, 200)?;
                decode(&response.body).map(Reply::Body)
            }
            HttpMethod::Post => {
                check_status(&response, 201)?;
                decode(&response.body).map(Reply::Body)
            }
            HttpMethod::Patch | HttpMethod::Delete => {
                check_success(&response)?;
                Ok(Reply::Empty)
            }
        }
    }

    pub fn build_add_item(
        &self,
        session: &SessionContext,
        list: &str,
        item: &ListItem,
    ) -> Result<HttpRequest, ApiError> {
        let body = self.stamp(list, item);
        self.build_request(session, HttpMethod::Post, list, &Target::collection(), Some(&body))
    }

    pub fn parse_add_item(&self, response: HttpResponse) -> Result<ListItem, ApiError> {
        check_status(&response, 201)?;
        decode(&response.body)
    }

    pub fn build_edit_item(
        &self,
        session: &SessionContext,
        list: &str,
        id: i64,
        changes: &ListItem,
    ) -> Result<HttpRequest, ApiError> {
        let body = self.stamp(list, changes);
        self.build_request(session, HttpMethod::Patch, list, &Target::item(id), Some(&body))
    }

    pub fn parse_edit_item(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_success(&response)
    }

    pub fn build_delete_item(
        &self,
        session: &SessionContext,
        list: &str,
        id: i64,
    ) -> Result<HttpRequest, ApiError> {
        self.build_request(session, HttpMethod::Delete, list, &Target::item(id), None)
    }

    pub fn parse_delete_item(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_success(&response)
    }

    /// First page of a full read: the collection limited to `page_size` rows.
    pub fn first_page_url(&self, list: &str) -> String {
        format!("{}?$top={}", self.items_url(list), self.page_size)
    }

    /// GET one page from an absolute URL (first page or continuation link).
    pub fn build_page(&self, session: &SessionContext, list: &str, url: &str) -> Result<HttpRequest, ApiError> {
        self.build_request(session, HttpMethod::Get, list, &Target::Url(url.to_string()), None)
    }

    pub fn parse_page(&self, response: HttpResponse) -> Result<Page, ApiError> {
        check_status(&response, 200)?;
        decode(&response.body)
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

/// Map non-success status codes to the appropriate `ApiError` variant.
fn check_status(response: &HttpResponse, expected: u16) -> Result<(), ApiError> {
    if response.status == expected {
        return Ok(());
    }
    Err(status_error(response))
}

/// Like `check_status`, but any 2xx counts. SharePoint answers PATCH with
/// 204 and DELETE with 200.
fn check_success(response: &HttpResponse) -> Result<(), ApiError> {
    if response.is_success() {
        return Ok(());
    }
    Err(status_error(response))
}

fn status_error(response: &HttpResponse) -> ApiError {
    match response.status {
        401 => ApiError::Unauthorized,
        404 => ApiError::NotFound,
        status => ApiError::HttpError {
            status,
            body: response.body.clone(),
        },
    }
}
