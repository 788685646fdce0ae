//! In-memory imitation of the SharePoint REST endpoints and the Azure AD
//! device-code endpoints the list client talks to.
//!
//! Behaviour mirrors the real services where the client depends on it:
//! bearer tokens are checked on every `/_api` call, mutating calls need the
//! current request digest, `__metadata.type` must match the list, reads
//! are paged with an absolute `odata.nextLink`, and a refused digest comes
//! back as `error_description`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Token accepted from the start, so tests can skip the login.
pub const SEEDED_TOKEN: &str = "mock-token";
pub const CURRENT_USER_ID: i64 = 10;
const DEFAULT_TOP: usize = 100;

#[derive(Debug, Default)]
struct ListTable {
    title: String,
    next_id: i64,
    items: Vec<Map<String, Value>>,
}

#[derive(Debug)]
struct DeviceGrant {
    pending_polls: u32,
}

#[derive(Debug)]
pub struct Store {
    digest: String,
    tokens: HashSet<String>,
    lists: HashMap<String, ListTable>,
    users: Vec<Value>,
    devices: HashMap<String, DeviceGrant>,
}

impl Store {
    pub fn seeded() -> Self {
        let users = vec![
            json!({"Id": CURRENT_USER_ID, "Title": "Mock User", "Email": "mock.user@example.com",
                   "LoginName": "i:0#.f|membership|mock.user@example.com", "PrincipalType": 1}),
            json!({"Id": 11, "Title": "Ada Lovelace", "Email": "ada@example.com",
                   "LoginName": "i:0#.f|membership|ada@example.com", "PrincipalType": 1}),
            json!({"Id": 3, "Title": "Project Owners", "Email": "", "LoginName": "Project Owners", "PrincipalType": 8}),
            json!({"Id": 1073741823, "Title": "System Account", "Email": "", "LoginName": "SHAREPOINT\\system", "PrincipalType": 1}),
        ];
        Self {
            digest: format!("0x{}", Uuid::new_v4().simple()),
            tokens: HashSet::from([SEEDED_TOKEN.to_string()]),
            lists: HashMap::new(),
            users,
            devices: HashMap::new(),
        }
    }
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    app_with(Arc::new(RwLock::new(Store::seeded())))
}

pub fn app_with(db: Db) -> Router {
    Router::new()
        .route("/_api/contextinfo", post(context_info))
        .route("/_api/web/currentuser", get(current_user))
        .route("/_api/web/siteusers", get(site_users))
        .route(
            "/_api/web/lists/{selector}/{resource}",
            get(read_items).post(create_item).patch(update_item).delete(delete_item),
        )
        .route("/login/{tenant}/oauth2/v2.0/devicecode", post(device_code))
        .route("/login/{tenant}/oauth2/v2.0/token", post(token))
        .route("/_mock/revoke", post(revoke_tokens))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": {"code": status.as_u16(), "message": message}}))).into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error_description": "Invalid JWT token. The token is expired or revoked."})),
    )
        .into_response()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn authorized(store: &Store, headers: &HeaderMap) -> bool {
    bearer(headers).is_some_and(|token| store.tokens.contains(token))
}

fn digest_ok(store: &Store, headers: &HeaderMap) -> bool {
    headers
        .get("x-requestdigest")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|d| d == store.digest)
}

/// `getbytitle('Project ''Notes''')` → `Project 'Notes'`.
fn list_title(selector: &str) -> Option<String> {
    selector
        .strip_prefix("getbytitle('")?
        .strip_suffix("')")
        .map(|title| title.replace("''", "'"))
}

/// `items` → `None`, `items(7)` → `Some(7)`.
fn item_id(resource: &str) -> Result<Option<i64>, ()> {
    if resource == "items" {
        return Ok(None);
    }
    resource
        .strip_prefix("items(")
        .and_then(|rest| rest.strip_suffix(')'))
        .and_then(|id| id.parse().ok())
        .map(Some)
        .ok_or(())
}

/// `$skiptoken=Paged=TRUE&p_ID=100` → 100.
fn skip_after(token: &str) -> Option<i64> {
    token
        .split('&')
        .find_map(|part| part.strip_prefix("p_ID="))
        .and_then(|id| id.parse().ok())
}

/// Minimal `$filter`: `Field eq 'text'` or `Field eq 42`.
fn filter_matches(filter: &str, item: &Map<String, Value>) -> bool {
    let Some((field, literal)) = filter.split_once(" eq ") else {
        return true;
    };
    let expected = match literal.trim().strip_prefix('\'').and_then(|l| l.strip_suffix('\'')) {
        Some(text) => Value::String(text.replace("''", "'")),
        None => match literal.trim().parse::<i64>() {
            Ok(n) => json!(n),
            Err(_) => return false,
        },
    };
    item.get(field.trim()) == Some(&expected)
}

// ---------------------------------------------------------------------------
// Session endpoints
// ---------------------------------------------------------------------------

async fn context_info(State(db): State<Db>, headers: HeaderMap) -> Response {
    let store = db.read().await;
    if !authorized(&store, &headers) {
        return unauthorized();
    }
    Json(json!({
        "FormDigestValue": store.digest,
        "FormDigestTimeoutSeconds": 1800,
        "LibraryVersion": "16.0.0.0",
    }))
    .into_response()
}

async fn current_user(State(db): State<Db>, headers: HeaderMap) -> Response {
    let store = db.read().await;
    if !authorized(&store, &headers) {
        return unauthorized();
    }
    match store.users.iter().find(|u| u["Id"] == CURRENT_USER_ID) {
        Some(user) => Json(user.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, "user not found"),
    }
}

async fn site_users(State(db): State<Db>, headers: HeaderMap) -> Response {
    let store = db.read().await;
    if !authorized(&store, &headers) {
        return unauthorized();
    }
    Json(json!({ "value": store.users })).into_response()
}

async fn revoke_tokens(State(db): State<Db>) -> StatusCode {
    db.write().await.tokens.clear();
    StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// List endpoints
// ---------------------------------------------------------------------------

async fn read_items(
    State(db): State<Db>,
    Path((selector, resource)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let store = db.read().await;
    if !authorized(&store, &headers) {
        return unauthorized();
    }
    let (Some(title), Ok(id)) = (list_title(&selector), item_id(&resource)) else {
        return error(StatusCode::BAD_REQUEST, "malformed list address");
    };
    let Some(table) = store.lists.get(&title.to_lowercase()) else {
        return error(StatusCode::NOT_FOUND, &format!("List '{title}' does not exist."));
    };

    if let Some(id) = id {
        return match table.items.iter().find(|item| item["ID"] == id) {
            Some(item) => Json(Value::Object(item.clone())).into_response(),
            None => error(StatusCode::NOT_FOUND, "Item does not exist."),
        };
    }

    let top = query
        .get("$top")
        .and_then(|t| t.parse().ok())
        .filter(|t: &usize| *t > 0)
        .unwrap_or(DEFAULT_TOP);
    let after = query.get("$skiptoken").and_then(|t| skip_after(t)).unwrap_or(0);
    let filter = query.get("$filter").map(String::as_str).unwrap_or("");

    let mut matching = table
        .items
        .iter()
        .filter(|item| item["ID"].as_i64().unwrap_or(0) > after)
        .filter(|item| filter_matches(filter, item));
    let page: Vec<Value> = matching.by_ref().take(top).cloned().map(Value::Object).collect();
    let more = matching.next().is_some();
    let last = page.last().and_then(|item| item["ID"].as_i64()).unwrap_or(after);

    let mut body = json!({ "value": page });
    if more {
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost");
        body["odata.nextLink"] = json!(format!(
            "http://{host}{}?%24skiptoken=Paged%3DTRUE%26p_ID%3D{last}&%24top={top}",
            uri.path()
        ));
    }
    Json(body).into_response()
}

/// Validate and strip `__metadata` from a write payload.
fn writable_fields(title: &str, raw: &str) -> Result<Map<String, Value>, Response> {
    let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(raw) else {
        return Err(error(StatusCode::BAD_REQUEST, "Invalid JSON. A JSON object was expected."));
    };
    let expected = format!("SP.Data.{title}ListItem");
    match fields.remove("__metadata") {
        Some(meta) if meta["type"] == expected.as_str() => {}
        Some(meta) => {
            return Err(error(
                StatusCode::BAD_REQUEST,
                &format!("A type named '{}' could not be resolved by the model.", meta["type"]),
            ))
        }
        None => return Err(error(StatusCode::BAD_REQUEST, "__metadata.type is required")),
    }
    fields.remove("ID");
    Ok(fields)
}

async fn create_item(
    State(db): State<Db>,
    Path((selector, resource)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let mut store = db.write().await;
    if !authorized(&store, &headers) {
        return unauthorized();
    }
    if !digest_ok(&store, &headers) {
        return error(StatusCode::FORBIDDEN, "The security validation for this page is invalid.");
    }
    let (Some(title), Ok(None)) = (list_title(&selector), item_id(&resource)) else {
        return error(StatusCode::BAD_REQUEST, "malformed list address");
    };
    let fields = match writable_fields(&title, &body) {
        Ok(fields) => fields,
        Err(resp) => return resp,
    };

    let table = store
        .lists
        .entry(title.to_lowercase())
        .or_insert_with(|| ListTable {
            title: title.clone(),
            next_id: 1,
            items: Vec::new(),
        });
    let mut item = Map::new();
    item.insert("ID".to_string(), json!(table.next_id));
    item.extend(fields);
    table.next_id += 1;
    table.items.push(item.clone());
    tracing::debug!(list = %table.title, id = %item["ID"], "item created");
    (StatusCode::CREATED, Json(Value::Object(item))).into_response()
}

async fn update_item(
    State(db): State<Db>,
    Path((selector, resource)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let mut store = db.write().await;
    if !authorized(&store, &headers) {
        return unauthorized();
    }
    if !digest_ok(&store, &headers) {
        return error(StatusCode::FORBIDDEN, "The security validation for this page is invalid.");
    }
    let (Some(title), Ok(Some(id))) = (list_title(&selector), item_id(&resource)) else {
        return error(StatusCode::BAD_REQUEST, "malformed item address");
    };
    let fields = match writable_fields(&title, &body) {
        Ok(fields) => fields,
        Err(resp) => return resp,
    };
    let Some(item) = store
        .lists
        .get_mut(&title.to_lowercase())
        .and_then(|table| table.items.iter_mut().find(|item| item["ID"] == id))
    else {
        return error(StatusCode::NOT_FOUND, "Item does not exist.");
    };
    item.extend(fields);
    StatusCode::NO_CONTENT.into_response()
}

async fn delete_item(
    State(db): State<Db>,
    Path((selector, resource)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let mut store = db.write().await;
    if !authorized(&store, &headers) {
        return unauthorized();
    }
    if !digest_ok(&store, &headers) {
        return error(StatusCode::FORBIDDEN, "The security validation for this page is invalid.");
    }
    let (Some(title), Ok(Some(id))) = (list_title(&selector), item_id(&resource)) else {
        return error(StatusCode::BAD_REQUEST, "malformed item address");
    };
    let Some(table) = store.lists.get_mut(&title.to_lowercase()) else {
        return error(StatusCode::NOT_FOUND, &format!("List '{title}' does not exist."));
    };
    let before = table.items.len();
    table.items.retain(|item| item["ID"] != id);
    if table.items.len() == before {
        return error(StatusCode::NOT_FOUND, "Item does not exist.");
    }
    StatusCode::OK.into_response()
}

// ---------------------------------------------------------------------------
// Identity endpoints
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct DeviceCodeForm {
    pub client_id: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Deserialize)]
pub struct TokenForm {
    pub grant_type: String,
    pub client_id: String,
    pub device_code: String,
}

async fn device_code(
    State(db): State<Db>,
    Path(tenant): Path<String>,
    Form(form): Form<DeviceCodeForm>,
) -> Response {
    if form.client_id.is_empty() || form.scope.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_request", "error_description": "client_id and scope are required"})),
        )
            .into_response();
    }
    let device_code = Uuid::new_v4().to_string();
    let user_code = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    db.write()
        .await
        .devices
        .insert(device_code.clone(), DeviceGrant { pending_polls: 1 });
    tracing::debug!(%tenant, client_id = %form.client_id, "device code issued");
    Json(json!({
        "device_code": device_code,
        "user_code": user_code,
        "verification_uri": "https://microsoft.com/devicelogin",
        "expires_in": 900,
        "interval": 1,
        "message": format!("To sign in, use a web browser to open the page https://microsoft.com/devicelogin and enter the code {user_code} to authenticate."),
    }))
    .into_response()
}

async fn token(State(db): State<Db>, Form(form): Form<TokenForm>) -> Response {
    let token_error = |code: &str| {
        (StatusCode::BAD_REQUEST, Json(json!({"error": code, "error_description": code}))).into_response()
    };
    if form.grant_type != "urn:ietf:params:oauth:grant-type:device_code" || form.client_id.is_empty() {
        return token_error("unsupported_grant_type");
    }
    let mut store = db.write().await;
    let Some(grant) = store.devices.get_mut(&form.device_code) else {
        return token_error("expired_token");
    };
    if grant.pending_polls > 0 {
        grant.pending_polls -= 1;
        return token_error("authorization_pending");
    }
    store.devices.remove(&form.device_code);
    let access_token = Uuid::new_v4().to_string();
    store.tokens.insert(access_token.clone());
    Json(json!({
        "token_type": "Bearer",
        "access_token": access_token,
        "expires_in": 3599,
        "scope": "https://localhost/.default",
    }))
    .into_response()
}
