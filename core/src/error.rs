//! Error types for the SharePoint list client.
//!
//! # Design
//! `NotFound` and `Unauthorized` get dedicated variants because callers
//! branch on them: a missing item is a normal outcome, and a 401 means the
//! session must be redriven. Every other non-2xx response lands in
//! `HttpError` with the raw status and body for debugging.
//!
//! Failures of the background cache warmers never reach callers; they are
//! logged where the warmer runs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The server returned 404.
    #[error("resource not found")]
    NotFound,

    /// The server returned 401, or the session was already invalidated.
    #[error("unauthorized: the session must be re-established")]
    Unauthorized,

    /// The server returned a non-2xx status other than 401/404.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The request never produced a response.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The response body could not be decoded into the expected shape.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be encoded.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// The context-info endpoint refused to issue a request digest.
    #[error("request digest refused: {0}")]
    Digest(String),

    /// The interactive login failed or was cancelled.
    #[error("identity provider: {0}")]
    AuthFlow(String),

    /// A mutating call was attempted before a request digest was obtained.
    #[error("no request digest in session; mutating calls are not allowed")]
    MissingDigest,

    /// A credential was empty or could not be parsed from storage.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The caller combined arguments the list endpoint does not accept.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Pagination did not terminate within the configured page budget.
    #[error("pagination did not finish within {limit} pages")]
    PageLimit { limit: usize },

    /// Reading or writing the credential store failed.
    #[error("credential storage: {0}")]
    Storage(String),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration: {0}")]
    Config(String),
}
