use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, SEEDED_TOKEN};
use serde_json::{json, Value};
use tower::{Service, ServiceExt};

const TASKS: &str = "/_api/web/lists/getbytitle('Tasks')/items";

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn authed(method: &str, uri: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::HOST, "sp.test")
        .header(http::header::AUTHORIZATION, format!("Bearer {SEEDED_TOKEN}"))
}

fn read(uri: &str) -> Request<String> {
    authed("GET", uri).body(String::new()).unwrap()
}

fn write(method: &str, uri: &str, digest: &str, body: &str) -> Request<String> {
    authed(method, uri)
        .header(http::header::CONTENT_TYPE, "application/json;odata=verbose")
        .header("X-RequestDigest", digest)
        .header(http::header::IF_MATCH, "*")
        .body(body.to_string())
        .unwrap()
}

fn form(uri: &str, body: &str) -> Request<String> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body.to_string())
        .unwrap()
}

fn task(title: &str) -> String {
    json!({"__metadata": {"type": "SP.Data.TasksListItem"}, "Title": title}).to_string()
}

async fn digest(app: &mut axum::Router) -> String {
    let resp = ServiceExt::<Request<String>>::ready(app)
        .await
        .unwrap()
        .call(authed("POST", "/_api/contextinfo").body(String::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    body_json(resp).await["FormDigestValue"].as_str().unwrap().to_string()
}

// --- session ---

#[tokio::test]
async fn context_info_without_token_reports_error_description() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/_api/contextinfo")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert!(body["error_description"].as_str().unwrap().contains("Invalid JWT"));
}

#[tokio::test]
async fn context_info_issues_digest() {
    let mut app = app();
    let digest = digest(&mut app).await;
    assert!(digest.starts_with("0x"));
}

#[tokio::test]
async fn current_user_and_site_users() {
    let resp = app().oneshot(read("/_api/web/currentuser")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let user = body_json(resp).await;
    assert_eq!(user["Id"], mock_server::CURRENT_USER_ID);

    let resp = app().oneshot(read("/_api/web/siteusers")).await.unwrap();
    let users = body_json(resp).await;
    assert_eq!(users["value"].as_array().unwrap().len(), 4);
}

// --- lists ---

#[tokio::test]
async fn unknown_list_is_404() {
    let resp = app().oneshot(read(TASKS)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_requires_digest() {
    let resp = app()
        .oneshot(write("POST", TASKS, "0xwrong", &task("x")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_rejects_wrong_metadata_type() {
    let mut app = app();
    let digest = digest(&mut app).await;
    let body = json!({"__metadata": {"type": "SP.Data.NotesListItem"}, "Title": "x"}).to_string();
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(write("POST", TASKS, &digest, &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reads_are_paged_with_absolute_next_link() {
    let mut app = app();
    let digest = digest(&mut app).await;
    for i in 0..5 {
        let resp = ServiceExt::<Request<String>>::ready(&mut app)
            .await
            .unwrap()
            .call(write("POST", TASKS, &digest, &task(&format!("t{i}"))))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(read(&format!("{TASKS}?$top=2")))
        .await
        .unwrap();
    let page = body_json(resp).await;
    assert_eq!(page["value"].as_array().unwrap().len(), 2);
    let next = page["odata.nextLink"].as_str().unwrap();
    assert!(next.starts_with("http://sp.test/_api/web/lists/"));

    let path = next.trim_start_matches("http://sp.test");
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(read(path))
        .await
        .unwrap();
    let page = body_json(resp).await;
    assert_eq!(page["value"][0]["ID"], 3);
    assert_eq!(page["value"][1]["ID"], 4);
    assert!(page["odata.nextLink"].is_string());
}

#[tokio::test]
async fn item_lifecycle() {
    let mut app = app();
    let digest = digest(&mut app).await;

    // create
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(write("POST", TASKS, &digest, &task("Walk dog")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    assert_eq!(created["ID"], 1);
    assert_eq!(created["Title"], "Walk dog");
    assert!(created.get("__metadata").is_none());

    // update
    let body = json!({"__metadata": {"type": "SP.Data.TasksListItem"}, "Status": "Done"}).to_string();
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(write("PATCH", &format!("{TASKS}(1)"), &digest, &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(body_bytes(resp).await.is_empty());

    // get single
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(read(&format!("{TASKS}(1)")))
        .await
        .unwrap();
    let item = body_json(resp).await;
    assert_eq!(item["Title"], "Walk dog");
    assert_eq!(item["Status"], "Done");

    // filter
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(read(&format!("{TASKS}?$filter=Status%20eq%20'Done'")))
        .await
        .unwrap();
    let page = body_json(resp).await;
    assert_eq!(page["value"].as_array().unwrap().len(), 1);

    // delete
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(write("DELETE", &format!("{TASKS}(1)"), &digest, ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // get after delete
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(read(&format!("{TASKS}(1)")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn revoked_tokens_get_401() {
    let mut app = app();
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(Request::builder().method("POST").uri("/_mock/revoke").body(String::new()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(read("/_api/web/currentuser"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// --- identity ---

#[tokio::test]
async fn device_code_grant_pends_once_then_issues_token() {
    let mut app = app();
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(form(
            "/login/t1/oauth2/v2.0/devicecode",
            "client_id=app&scope=http%3A%2F%2Fsp.test%2F.default",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let auth = body_json(resp).await;
    let device_code = auth["device_code"].as_str().unwrap().to_string();
    let poll = format!(
        "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code&client_id=app&device_code={device_code}"
    );

    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(form("/login/t1/oauth2/v2.0/token", &poll))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"], "authorization_pending");

    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(form("/login/t1/oauth2/v2.0/token", &poll))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let grant = body_json(resp).await;
    assert_eq!(grant["token_type"], "Bearer");
    let token = grant["access_token"].as_str().unwrap().to_string();

    // the new token works against the site
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(
            Request::builder()
                .uri("/_api/web/currentuser")
                .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // the device code is single-use
    let resp = ServiceExt::<Request<String>>::ready(&mut app)
        .await
        .unwrap()
        .call(form("/login/t1/oauth2/v2.0/token", &poll))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["error"], "expired_token");
}
