use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use splist_core::format::format_with_commas;
use splist_core::{
    ApiError, Bootstrapper, CredentialStore, DeviceAuthorization, DeviceCodeProvider, FileCredentialStore,
    KeyringCredentialStore, ListAccessor, ListItem, SiteConfig, Transport,
};

use crate::transport::UreqTransport;

/// Everything a command needs: validated config, credential store, and a
/// bootstrapper wired to the real network.
pub struct Context {
    config: SiteConfig,
    store: Arc<dyn CredentialStore>,
    bootstrap: Bootstrapper,
}

fn prompt(authorization: &DeviceAuthorization) {
    match &authorization.message {
        Some(message) => eprintln!("{message}"),
        None => eprintln!(
            "To sign in, open {} and enter the code {}",
            authorization.verification_uri, authorization.user_code
        ),
    }
}

impl Context {
    pub fn open(config_path: &Path) -> Result<Self> {
        let config = SiteConfig::load(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        let store: Arc<dyn CredentialStore> = match &config.credential_path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "credential kept in file");
                Arc::new(FileCredentialStore::new(path))
            }
            None => Arc::new(
                KeyringCredentialStore::new(&config.site_url).context("Failed to open the system keychain")?,
            ),
        };
        let transport: Arc<dyn Transport> = Arc::new(UreqTransport::new());
        let provider = Arc::new(DeviceCodeProvider::new(Arc::clone(&transport), prompt));
        let bootstrap = Bootstrapper::from_config(&config, transport, Arc::clone(&store), provider)?;
        tracing::debug!(site = %config.site_url, "context ready");
        Ok(Self {
            config,
            store,
            bootstrap,
        })
    }

    fn accessor(&self) -> Result<ListAccessor> {
        let session = self.bootstrap.run().context("Failed to start a SharePoint session")?;
        Ok(ListAccessor::new(
            self.bootstrap.client().clone(),
            self.bootstrap.transport(),
            session,
        )
        .with_max_pages(self.config.max_pages))
    }

    /// Run `op`; if the credential was rejected, redrive the session once and
    /// retry.
    fn with_retry<T>(&self, op: impl Fn(&ListAccessor) -> Result<T, ApiError>) -> Result<T> {
        let accessor = self.accessor()?;
        match op(&accessor) {
            Err(ApiError::Unauthorized) => {
                tracing::warn!("credential rejected, signing in again");
                self.bootstrap.redrive(accessor.session())?;
                Ok(op(&accessor)?)
            }
            other => Ok(other?),
        }
    }
}

pub fn login(ctx: &Context) -> Result<()> {
    ctx.store.clear()?;
    let session = ctx.bootstrap.run().context("Sign-in failed")?;
    match session.users().current_user.wait() {
        Some(user) => println!("Signed in as {} <{}>", user.title, user.email),
        None => println!("Signed in"),
    }
    Ok(())
}

pub fn logout(ctx: &Context) -> Result<()> {
    ctx.store.clear()?;
    println!("Signed out");
    Ok(())
}

fn print_items(items: &[ListItem]) -> Result<()> {
    for item in items {
        println!("{}", serde_json::to_string(item)?);
    }
    eprintln!("{} item(s)", format_with_commas(items.len() as f64, 0));
    Ok(())
}

pub fn items(ctx: &Context, list: &str, fields: &[String]) -> Result<()> {
    let items = ctx.with_retry(|accessor| accessor.get_all_items(list, fields))?;
    print_items(&items)
}

pub fn get(ctx: &Context, list: &str, suffix: &str, fields: &[String]) -> Result<()> {
    let items = ctx.with_retry(|accessor| accessor.get_item(list, fields, suffix))?;
    print_items(&items)
}

/// `--json` payloads must be a single JSON object of column values.
pub fn parse_item(raw: &str) -> Result<ListItem> {
    serde_json::from_str(raw).context("--json must be a JSON object of column values")
}

pub fn add(ctx: &Context, list: &str, json: &str) -> Result<()> {
    let item = parse_item(json)?;
    let created = ctx.with_retry(|accessor| accessor.add_item(list, &item))?;
    println!("{}", serde_json::to_string(&created)?);
    Ok(())
}

pub fn edit(ctx: &Context, list: &str, id: i64, json: &str) -> Result<()> {
    let changes = parse_item(json)?;
    ctx.with_retry(|accessor| accessor.edit_item(list, id, &changes))?;
    println!("Updated {list} item {id}");
    Ok(())
}

pub fn delete(ctx: &Context, list: &str, id: i64) -> Result<()> {
    ctx.with_retry(|accessor| accessor.delete_item(list, id))?;
    println!("Deleted {list} item {id}");
    Ok(())
}

pub fn users(ctx: &Context) -> Result<()> {
    let accessor = ctx.accessor()?;
    let Some(users) = accessor.session().users().site_users.wait().cloned() else {
        anyhow::bail!("Could not load the site user list; rerun with -vv for details");
    };
    for user in &users {
        println!("{}\t{}\t{}", user.id, user.title, user.email);
    }
    eprintln!("{} user(s)", format_with_commas(users.len() as f64, 0));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_item_accepts_objects_only() {
        let item = parse_item(r#"{"Title":"Kickoff","Priority":2}"#).unwrap();
        assert_eq!(item.len(), 2);
        assert_eq!(item.fields().collect::<Vec<_>>(), vec!["Title", "Priority"]);

        assert!(parse_item("[1,2]").is_err());
        assert!(parse_item("not json").is_err());
    }
}
