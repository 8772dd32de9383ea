//! Signed-in account management
//!
//! Successful sign-in or sign-up stores the user in local state, which is
//! what the stats aggregator checks before doing any work.

use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::access::{AccessError, AccessGate};
use super::admin;
use super::{AuthSession, IdentityClient, IdentityError};
use crate::config::{Args, BackendConfig, ResolvedBackend};
use crate::logging::MISSING_CONFIG;
use crate::state::{SignedInUser, StateStore};
use crate::store::{DocumentStore, FirestoreConnector, Fields, FsValue, StoreConnector};
use crate::types::{RelayError, Result};

impl From<IdentityError> for RelayError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::MissingCredentials
            | IdentityError::InvalidEmail
            | IdentityError::WeakPassword => Self::BadRequest(err.to_string()),
            IdentityError::MissingApiKey => Self::Config(err.to_string()),
            IdentityError::Network(_) | IdentityError::InvalidResponse(_) => {
                Self::Http(err.to_string())
            }
            IdentityError::RateLimited | IdentityError::Rejected { .. } => Self::Auth(err.to_string()),
        }
    }
}

impl From<AccessError> for RelayError {
    fn from(err: AccessError) -> Self {
        Self::Forbidden(err.to_string())
    }
}

pub struct Accounts {
    state: Arc<StateStore>,
    identity: IdentityClient,
    defaults: BackendConfig,
    connector: Arc<dyn StoreConnector>,
}

impl Accounts {
    pub fn new(
        state: Arc<StateStore>,
        identity: IdentityClient,
        defaults: BackendConfig,
        connector: Arc<dyn StoreConnector>,
    ) -> Self {
        Self {
            state,
            identity,
            defaults,
            connector,
        }
    }

    /// Accounts against the configured issuer and document store
    pub fn from_args(args: &Args, state: Arc<StateStore>) -> Self {
        let defaults = args.backend_defaults();
        let api_key = BackendConfig::resolve(&defaults, state.read(|s| s.firebase_config.clone()).as_ref())
            .map(|b| b.api_key)
            .or_else(|| args.backend.firebase_api_key.clone());
        let identity = IdentityClient::new(
            &args.backend.identity_base,
            api_key,
            args.request_timeout(),
            &args.user_agent,
        );
        let connector = Arc::new(FirestoreConnector::new(
            &args.backend.firestore_base,
            args.request_timeout(),
            &args.user_agent,
        ));
        Self::new(state, identity, defaults, connector)
    }

    /// User currently signed in, if any
    pub fn current_user(&self) -> Option<SignedInUser> {
        self.state.read(|s| s.signed_in_user().cloned())
    }

    /// Backend configuration with persisted overrides applied
    pub fn backend(&self) -> Result<ResolvedBackend> {
        let overrides = self.state.read(|s| s.firebase_config.clone());
        BackendConfig::resolve(&self.defaults, overrides.as_ref())
            .ok_or_else(|| RelayError::Config(MISSING_CONFIG.to_string()))
    }

    /// Document store acting as the signed-in user
    pub fn user_store(&self) -> Result<Arc<dyn DocumentStore>> {
        let backend = self.backend()?;
        let id_token = self
            .current_user()
            .and_then(|u| u.id_token)
            .ok_or_else(|| RelayError::Unauthorized("not signed in".to_string()))?;
        Ok(self.connector.connect(&backend, Some(&id_token)))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SignedInUser> {
        let session = self.identity.sign_in(email, password).await?;
        let store = self.connector.connect(&self.backend()?, Some(&session.token));
        upsert_user(store.as_ref(), &session).await;
        self.remember(session, None).await
    }

    /// Create an account and bind `access_code` to it
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        access_code: Option<&str>,
    ) -> Result<SignedInUser> {
        let code = access_code
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(AccessError::Missing)?;
        let backend = self.backend()?;

        let session = self.identity.sign_up(email, password).await?;
        let store = self.connector.connect(&backend, Some(&session.token));

        if let Err(e) = AccessGate::new(store.as_ref()).bind(code, &session.email).await {
            warn!(uid = %session.uid, "Account created but access code rejected: {}", e);
            self.state.update(|s| s.access_granted = false);
            self.state.persist().await?;
            return Err(e.into());
        }

        upsert_user(store.as_ref(), &session).await;
        self.remember(session, Some(true)).await
    }

    /// Forget the signed-in user
    pub async fn sign_out(&self) -> Result<()> {
        self.state.update(|s| {
            s.firebase_user = None;
            s.access_granted = false;
        });
        self.state.persist().await?;
        info!("Signed out");
        Ok(())
    }

    /// Whether the signed-in user is an admin
    pub async fn is_admin(&self) -> Result<bool> {
        let user = self
            .current_user()
            .ok_or_else(|| RelayError::Unauthorized("not signed in".to_string()))?;
        let store = self.user_store()?;
        Ok(admin::is_admin(store.as_ref(), &user.uid).await)
    }

    async fn remember(&self, session: AuthSession, access_granted: Option<bool>) -> Result<SignedInUser> {
        let user = SignedInUser {
            uid: session.uid,
            email: Some(session.email),
            id_token: Some(session.token),
            refresh_token: session.refresh_token,
        };
        self.state.update(|s| {
            s.firebase_user = Some(user.clone());
            if let Some(granted) = access_granted {
                s.access_granted = granted;
            }
        });
        self.state.persist().await?;
        info!(uid = %user.uid, "Signed in");
        Ok(user)
    }
}

/// Keep `Users/{uid}` current; failures are logged only
async fn upsert_user(store: &dyn DocumentStore, session: &AuthSession) {
    let mut fields = Fields::new();
    fields.insert("uid".into(), session.uid.as_str().into());
    fields.insert("email".into(), session.email.as_str().into());
    fields.insert(
        "updatedAt".into(),
        FsValue::Timestamp(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    if !store.set(&format!("Users/{}", session.uid), fields).await {
        warn!(uid = %session.uid, "Failed to update user profile");
    }
}
