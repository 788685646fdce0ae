//! Payload types for the SharePoint REST and identity endpoints.
//!
//! # Design
//! List rows are schemaless: each list has its own columns and the caller
//! names the ones it wants. `ListItem` therefore wraps an insertion-ordered
//! JSON object instead of a struct. Users and token grants have a fixed
//! shape and get real structs.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One row of a SharePoint list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListItem(Map<String, Value>);

impl ListItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// The server-assigned `ID` column, when present.
    pub fn id(&self) -> Option<i64> {
        self.0.get("ID").or_else(|| self.0.get("Id")).and_then(Value::as_i64)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep exactly `fields`, in that order. Fields the row lacks come back
    /// as `null` so every projected row has the same shape.
    pub fn project<S: AsRef<str>>(&self, fields: &[S]) -> ListItem {
        let mut out = Map::with_capacity(fields.len());
        for field in fields {
            let field = field.as_ref();
            let value = self.0.get(field).cloned().unwrap_or(Value::Null);
            out.insert(field.to_string(), value);
        }
        ListItem(out)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ListItem {
    fn from(map: Map<String, Value>) -> Self {
        ListItem(map)
    }
}

/// One batch of a list read. `next_link` is an absolute URL when more rows
/// remain.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub value: Vec<ListItem>,
    #[serde(rename = "odata.nextLink", alias = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

/// SharePoint principal type for an individual user account.
pub const PRINCIPAL_TYPE_USER: i32 = 1;

/// A site user as returned by `/_api/web/currentuser` and
/// `/_api/web/siteusers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SiteUser {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub login_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub principal_type: i32,
}

// SharePoint sends `null` for unset principal properties.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl SiteUser {
    /// A real person with a mailbox, as opposed to groups, system accounts
    /// and security principals.
    pub fn is_assignable(&self) -> bool {
        self.principal_type == PRINCIPAL_TYPE_USER && !self.email.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserList {
    #[serde(default)]
    pub value: Vec<SiteUser>,
}

/// Body of `/_api/contextinfo`. SharePoint reports a refused digest with an
/// `error_description` instead of a digest value.
#[derive(Debug, Deserialize)]
pub(crate) struct ContextInfo {
    #[serde(rename = "FormDigestValue")]
    pub form_digest_value: Option<String>,
    #[serde(rename = "FormDigestTimeoutSeconds")]
    pub timeout_seconds: Option<u64>,
    pub error_description: Option<String>,
}

/// Access grant issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub token_type: String,
    pub access_token: String,
}
