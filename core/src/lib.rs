//! Client core for SharePoint-backed project dashboards.
//!
//! # Overview
//! Two pieces cooperate:
//! - the session bootstrap (`Bootstrapper`): obtain a bearer credential,
//!   fetch a request digest, warm the current-user and site-user caches;
//! - the list accessor (`ListAccessor`): one parametrized call against a
//!   named list, with add/edit/get/delete helpers and paginated reads.
//!
//! # Design
//! - `SiteClient` and `DeviceCodeFlow` build `HttpRequest` values and
//!   parse `HttpResponse` values without touching the network
//!   (host-does-IO). The host supplies a `Transport`.
//! - Header state is an immutable `SessionContext` held by a shared
//!   `Session`; a refresh swaps it atomically.
//! - Every failure is a typed `ApiError`. A 401 invalidates the `Session`
//!   so the host can redrive the bootstrap instead of restarting.
//! - The core is synchronous; the cache warmers run on their own threads.

pub mod accessor;
pub mod bootstrap;
pub mod client;
pub mod config;
pub mod error;
pub mod format;
pub mod http;
pub mod identity;
pub mod pagination;
pub mod session;
pub mod store;
pub mod types;
pub mod warm;

pub use accessor::ListAccessor;
pub use bootstrap::Bootstrapper;
pub use client::{Reply, SiteClient, Target};
pub use config::SiteConfig;
pub use error::ApiError;
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use identity::{DeviceAuthorization, DeviceCodeFlow, DeviceCodeProvider, IdentityProvider, LoginRequest};
pub use pagination::Pager;
pub use session::{Credential, RequestDigest, Session, SessionContext, SessionEvent};
pub use store::{CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use types::{ListItem, Page, SiteUser, TokenGrant};
pub use warm::{UserCache, Warm};
