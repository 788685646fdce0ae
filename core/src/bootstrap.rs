//! Session bootstrap: credential, then request digest, then cache warmers.
//!
//! # Design
//! The two steps are separate methods so their order is visible at the
//! call site, and `acquire_digest` takes a `Credential` by reference, so it
//! cannot run before a credential exists. `run` performs both and hands
//! back a shared `Session`; any error from it is fatal for the host.
//! `redrive` repeats the sequence into an existing `Session` after a 401.

use std::sync::Arc;

use crate::client::SiteClient;
use crate::config::SiteConfig;
use crate::error::ApiError;
use crate::http::Transport;
use crate::identity::{IdentityProvider, LoginRequest};
use crate::session::{Credential, Session, SessionContext};
use crate::store::CredentialStore;
use crate::warm::{UserCache, Warm};

pub struct Bootstrapper {
    client: SiteClient,
    login: LoginRequest,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn IdentityProvider>,
}

impl Bootstrapper {
    pub fn new(
        client: SiteClient,
        login: LoginRequest,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            client,
            login,
            transport,
            store,
            provider,
        }
    }

    pub fn from_config(
        config: &SiteConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ApiError> {
        Ok(Self::new(
            config.site_client(),
            config.login_request()?,
            transport,
            store,
            provider,
        ))
    }

    pub fn client(&self) -> &SiteClient {
        &self.client
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Use the stored credential if there is one, otherwise log in and store
    /// the result.
    pub fn acquire_credential(&self) -> Result<Credential, ApiError> {
        match self.stored_credential()? {
            Some(credential) => Ok(credential),
            None => self.interactive_login(),
        }
    }

    fn stored_credential(&self) -> Result<Option<Credential>, ApiError> {
        let Some(stored) = self.store.load()? else {
            return Ok(None);
        };
        match Credential::parse(&stored) {
            Ok(credential) => {
                tracing::info!("using stored credential");
                Ok(Some(credential))
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable stored credential");
                Ok(None)
            }
        }
    }

    fn interactive_login(&self) -> Result<Credential, ApiError> {
        tracing::info!(authority = %self.login.authority, "starting interactive login");
        let grant = self.provider.login(&self.login)?;
        let credential = Credential::new(grant.token_type, grant.access_token)?;
        self.store.save(&credential.header_value())?;
        Ok(credential)
    }

    /// Fetch the request digest and start warming the user caches.
    ///
    /// Warmer failures are logged and never affect the result.
    pub fn acquire_digest(&self, credential: &Credential) -> Result<(SessionContext, UserCache), ApiError> {
        let base = SessionContext::new(credential.clone());
        let request = self.client.build_context_info(&base);
        let digest = self.client.parse_context_info(self.transport.execute(&request)?)?;
        tracing::info!("request digest acquired");

        let context = base.with_digest(digest);
        let users = self.warm(&context);
        Ok((context, users))
    }

    fn warm(&self, context: &SessionContext) -> UserCache {
        let current_user = {
            let (client, transport) = (self.client.clone(), Arc::clone(&self.transport));
            let request = client.build_current_user(context);
            Warm::spawn("current-user", move || {
                client.parse_current_user(transport.execute(&request)?)
            })
        };
        let site_users = {
            let (client, transport) = (self.client.clone(), Arc::clone(&self.transport));
            let request = client.build_site_users(context);
            Warm::spawn("site-users", move || {
                client.parse_site_users(transport.execute(&request)?)
            })
        };
        UserCache {
            current_user,
            site_users,
        }
    }

    /// Credential, then digest. The host must not start if this fails.
    ///
    /// A stored credential the site rejects is discarded and replaced by
    /// one interactive login; a freshly issued one that is rejected fails.
    pub fn run(&self) -> Result<Arc<Session>, ApiError> {
        if let Some(stored) = self.stored_credential()? {
            match self.acquire_digest(&stored) {
                Ok((context, users)) => return Ok(Arc::new(Session::new(context, users))),
                Err(err @ (ApiError::Digest(_) | ApiError::Unauthorized)) => {
                    tracing::warn!(error = %err, "stored credential rejected, signing in again");
                    self.store.clear()?;
                }
                Err(err) => return Err(err),
            }
        }
        let credential = self.interactive_login()?;
        let (context, users) = self.acquire_digest(&credential)?;
        Ok(Arc::new(Session::new(context, users)))
    }

    /// Re-establish an invalidated session in place. The stored credential
    /// is discarded first since it is what the server just rejected.
    pub fn redrive(&self, session: &Session) -> Result<(), ApiError> {
        self.store.clear()?;
        let credential = self.acquire_credential()?;
        let (context, users) = self.acquire_digest(&credential)?;
        session.refresh(context, users);
        tracing::info!("session re-established");
        Ok(())
    }
}
