//! List accessor: executes list calls with the live session's headers.
//!
//! # Design
//! `ListAccessor` is the I/O-performing counterpart of `SiteClient`. It
//! reads the current `SessionContext` from the shared `Session` on every
//! call, executes through the host's `Transport`, and converts every
//! failure into a typed `ApiError`. A 401 invalidates the session and
//! returns `Unauthorized` without any item data; later calls on an
//! invalid session fail the same way without touching the network.

use std::sync::Arc;

use serde_json::Value;

use crate::client::{Reply, SiteClient, Target};
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::pagination::{project, Pager, DEFAULT_MAX_PAGES};
use crate::session::Session;
use crate::types::ListItem;

pub struct ListAccessor {
    client: SiteClient,
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    max_pages: usize,
}

impl ListAccessor {
    pub fn new(client: SiteClient, transport: Arc<dyn Transport>, session: Arc<Session>) -> Self {
        Self {
            client,
            transport,
            session,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn client(&self) -> &SiteClient {
        &self.client
    }

    /// Issue one call against `list`.
    ///
    /// GET and POST yield `Reply::Body`, PATCH and DELETE yield
    /// `Reply::Empty`.
    pub fn request(
        &self,
        method: HttpMethod,
        list: &str,
        target: &Target,
        body: Option<&Value>,
    ) -> Result<Reply, ApiError> {
        self.ensure_valid()?;
        let context = self.session.context();
        let request = self.client.build_request(&context, method, list, target, body)?;
        let response = self.send(&request)?;
        self.client.parse_reply(method, response)
    }

    /// Create a row; returns the row as stored by the server.
    pub fn add_item(&self, list: &str, fields: &ListItem) -> Result<ListItem, ApiError> {
        self.ensure_valid()?;
        let request = self.client.build_add_item(&self.session.context(), list, fields)?;
        self.client.parse_add_item(self.send(&request)?)
    }

    /// Overwrite the given columns of row `id`. Nothing is returned on success.
    pub fn edit_item(&self, list: &str, id: i64, changes: &ListItem) -> Result<(), ApiError> {
        self.ensure_valid()?;
        let request = self.client.build_edit_item(&self.session.context(), list, id, changes)?;
        self.client.parse_edit_item(self.send(&request)?)
    }

    pub fn delete_item(&self, list: &str, id: i64) -> Result<(), ApiError> {
        self.ensure_valid()?;
        let request = self.client.build_delete_item(&self.session.context(), list, id)?;
        self.client.parse_delete_item(self.send(&request)?)
    }

    /// One GET with a caller-supplied suffix (for example `?$filter=...`),
    /// projected to `fields`. Does not follow continuation links.
    pub fn get_item<S: AsRef<str>>(
        &self,
        list: &str,
        fields: &[S],
        suffix: &str,
    ) -> Result<Vec<ListItem>, ApiError> {
        self.ensure_valid()?;
        let request = self.client.build_request(
            &self.session.context(),
            HttpMethod::Get,
            list,
            &Target::Suffix(suffix.to_string()),
            None,
        )?;
        let page = self.client.parse_page(self.send(&request)?)?;
        Ok(project(&page.value, fields))
    }

    /// Every row of `list`, following continuation links, projected to
    /// `fields`.
    pub fn get_all_items<S: AsRef<str>>(&self, list: &str, fields: &[S]) -> Result<Vec<ListItem>, ApiError> {
        let mut pager = Pager::new(self.client.first_page_url(list), self.max_pages);
        while let Some(url) = pager.next_url().map(str::to_string) {
            self.ensure_valid()?;
            let request = self.client.build_page(&self.session.context(), list, &url)?;
            let page = self.client.parse_page(self.send(&request)?)?;
            pager.push(page)?;
        }
        tracing::debug!(list, pages = pager.pages(), "list read complete");
        Ok(project(&pager.into_items(), fields))
    }

    fn ensure_valid(&self) -> Result<(), ApiError> {
        if self.session.is_valid() {
            Ok(())
        } else {
            Err(ApiError::Unauthorized)
        }
    }

    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        tracing::debug!(method = %request.method, url = %request.url, "list request");
        let response = self.transport.execute(request).map_err(|err| {
            tracing::warn!(method = %request.method, url = %request.url, error = %err, "list request failed");
            err
        })?;
        if response.status == 401 {
            self.session.invalidate();
            return Err(ApiError::Unauthorized);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::http::testing::ScriptedTransport;
    use crate::session::{Credential, RequestDigest, SessionContext, SessionEvent};
    use crate::warm::UserCache;

    const SITE: &str = "https://contoso.sharepoint.com/sites/pm";

    fn session() -> Arc<Session> {
        let context = SessionContext::new(Credential::new("Bearer", "tok").unwrap())
            .with_digest(RequestDigest::new("0xD"));
        Arc::new(Session::new(context, UserCache::empty()))
    }

    fn accessor(transport: Arc<ScriptedTransport>) -> ListAccessor {
        ListAccessor::new(SiteClient::new(SITE), transport, session())
    }

    fn rows(ids: std::ops::Range<i64>) -> Vec<Value> {
        ids.map(|id| json!({"ID": id, "Title": format!("task {id}"), "Status": "Open"}))
            .collect()
    }

    fn page_body(ids: std::ops::Range<i64>, next: Option<&str>) -> String {
        let mut body = json!({ "value": rows(ids) });
        if let Some(next) = next {
            body["odata.nextLink"] = json!(next);
        }
        body.to_string()
    }

    fn fields(title: &str) -> ListItem {
        let mut item = ListItem::new();
        item.insert("Title", title);
        item
    }

    #[test]
    fn get_all_items_follows_continuation_links() {
        let next = format!("{SITE}/_api/web/lists/getbytitle('Tasks')/items?%24skiptoken=Paged%3dTRUE%26p_ID%3d100&%24top=100");
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(200, &page_body(1..101, Some(&next)))
                .reply(200, &page_body(101..141, None)),
        );
        let accessor = accessor(transport.clone());

        let items = accessor.get_all_items("Tasks", &["ID", "Title"]).unwrap();
        assert_eq!(items.len(), 140);
        assert_eq!(items[0].get("ID"), Some(&json!(1)));
        assert_eq!(items[139].get("ID"), Some(&json!(140)));
        assert!(items.iter().all(|item| item.get("Status").is_none()));

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.ends_with("/items?$top=100"));
        assert_eq!(requests[1].url, next);
    }

    #[test]
    fn get_all_items_stops_at_page_budget() {
        let second = format!("{SITE}/_api/web/lists/getbytitle('Tasks')/items?%24skiptoken=2");
        let third = format!("{SITE}/_api/web/lists/getbytitle('Tasks')/items?%24skiptoken=3");
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(200, &page_body(1..3, Some(&second)))
                .reply(200, &page_body(3..5, Some(&third))),
        );
        let accessor = accessor(transport.clone()).with_max_pages(2);
        let err = accessor.get_all_items("Tasks", &["ID"]).unwrap_err();
        assert!(matches!(err, ApiError::PageLimit { limit: 2 }));
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn get_all_items_refuses_foreign_continuation_link() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .reply(200, &page_body(1..3, Some("https://collector.example/items?$skiptoken=2")))
                .reply(200, &page_body(3..5, None)),
        );
        let accessor = accessor(transport.clone());
        let err = accessor.get_all_items("Tasks", &["ID"]).unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));

        // The credential never left for the other host.
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.starts_with(SITE));
        assert!(accessor.session().is_valid());
    }

    #[test]
    fn add_item_posts_stamped_body_and_returns_record() {
        let transport = Arc::new(
            ScriptedTransport::new().reply(201, r#"{"ID":12,"Title":"x"}"#),
        );
        let accessor = accessor(transport.clone());
        let created = accessor.add_item("Tasks", &fields("x")).unwrap();
        assert_eq!(created.id(), Some(12));

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, HttpMethod::Post);
        let body: Value = serde_json::from_str(sent.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["__metadata"]["type"], "SP.Data.TasksListItem");
    }

    #[test]
    fn edit_item_patches_and_returns_nothing() {
        let transport = Arc::new(ScriptedTransport::new().reply(204, ""));
        let accessor = accessor(transport.clone());
        accessor.edit_item("Tasks", 7, &fields("y")).unwrap();
        let sent = &transport.requests()[0];
        assert_eq!(sent.method, HttpMethod::Patch);
        assert!(sent.url.ends_with("/items(7)"));
    }

    #[test]
    fn delete_item_targets_row() {
        let transport = Arc::new(ScriptedTransport::new().reply(200, ""));
        let accessor = accessor(transport.clone());
        accessor.delete_item("Tasks", 3).unwrap();
        let sent = &transport.requests()[0];
        assert_eq!(sent.method, HttpMethod::Delete);
        assert!(sent.url.ends_with("/items(3)"));
        assert!(sent.body.is_none());
    }

    #[test]
    fn get_item_projects_single_page() {
        let transport = Arc::new(ScriptedTransport::new().reply(200, &page_body(1..3, Some("http://ignored"))));
        let accessor = accessor(transport.clone());
        let items = accessor
            .get_item("Tasks", &["Title", "Owner"], "?$filter=Status eq 'Open'")
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("Owner"), Some(&Value::Null));
        assert_eq!(transport.requests().len(), 1);
        assert!(transport.requests()[0].url.ends_with("/items?$filter=Status eq 'Open'"));
    }

    #[test]
    fn unauthorized_invalidates_once_and_returns_no_data() {
        let transport = Arc::new(ScriptedTransport::new().reply(401, r#"{"value":[{"ID":1}]}"#));
        let accessor = accessor(transport.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        accessor.session().subscribe(move |event| {
            if event == SessionEvent::Invalidated {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let err = accessor.get_all_items("Tasks", &["ID"]).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Short-circuits without another request.
        let err = accessor.delete_item("Tasks", 1).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn transport_failure_is_surfaced() {
        let transport = Arc::new(ScriptedTransport::new().fail());
        let accessor = accessor(transport);
        let err = accessor.request(HttpMethod::Get, "Tasks", &Target::collection(), None).unwrap_err();
        assert!(matches!(err, ApiError::Transport(_)));
        assert!(accessor.session().is_valid());
    }

    #[test]
    fn request_get_returns_full_body_with_link() {
        let transport = Arc::new(ScriptedTransport::new().reply(200, &page_body(1..2, Some("http://x/next"))));
        let accessor = accessor(transport);
        let reply = accessor
            .request(HttpMethod::Get, "Tasks", &Target::collection(), None)
            .unwrap();
        match reply {
            Reply::Body(body) => assert_eq!(body["odata.nextLink"], "http://x/next"),
            Reply::Empty => panic!("GET must return a body"),
        }
    }
}
