use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::{Duration, OffsetDateTime};
use tracing::{info, info_span, warn, Instrument};

use crate::browser::{Browser, LoadState, Wait};
use crate::cache_db::{self, CacheStore};
use crate::config::{Selectors, Timing};
use crate::error::{AuthError, CacheError};

/// Lifetime of a portal session, in the cache and on the `Session` itself.
pub const SESSION_TTL: Duration = Duration::minutes(5);

const DIAGNOSTIC_CHARS: usize = 200;

/// Login identity for one portal account. Never printed with its secret.
#[derive(Clone)]
pub struct Credentials {
    root_url: String,
    username: String,
    secret: String,
}

impl Credentials {
    pub fn new(root_url: &str, username: &str, secret: String) -> Self {
        Self {
            root_url: root_url.to_string(),
            username: username.to_string(),
            secret,
        }
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn cache_key(&self) -> String {
        CacheStore::credential_key(&self.root_url, &self.username, &self.secret)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("root_url", &self.root_url)
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}

/// A cookie as the portal handed it to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Unix seconds; `None` for a browser-session cookie.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub cookies: Vec<SessionCookie>,
    pub expires_at: OffsetDateTime,
    pub root_url: String,
    pub username: String,
}

impl Session {
    pub fn new(cookies: Vec<SessionCookie>, credentials: &Credentials, now: OffsetDateTime) -> Self {
        Self {
            cookies,
            expires_at: now + SESSION_TTL,
            root_url: credentials.root_url.clone(),
            username: credentials.username.clone(),
        }
    }

    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }

    /// Same account, new cookies, fresh TTL.
    pub fn refreshed(&self, cookies: Vec<SessionCookie>, now: OffsetDateTime) -> Self {
        Self {
            cookies,
            expires_at: now + SESSION_TTL,
            root_url: self.root_url.clone(),
            username: self.username.clone(),
        }
    }
}

/// Store a refreshed session under the account's key, restarting its TTL.
pub fn store_session(
    cache: &mut CacheStore,
    credentials: &Credentials,
    session: &Session,
) -> Result<(), CacheError> {
    cache.set_as(&credentials.cache_key(), session, Some(SESSION_TTL))?;
    Ok(())
}

/// Return a live session for `credentials`, logging in through `browser` only
/// when the cache has none.
pub async fn authenticate<B: Browser + ?Sized>(
    browser: &mut B,
    cache: &mut CacheStore,
    credentials: &Credentials,
    selectors: &Selectors,
    timing: &Timing,
) -> Result<Session, AuthError> {
    let key = credentials.cache_key();
    let span = info_span!("authenticate", username = %credentials.username(), key = %cache_db::short(&key));

    async move {
        let now = cache.clock().now();
        if let Some(session) = cache.get_as::<Session>(&key) {
            if session.is_live(now) {
                info!(expires_at = %session.expires_at, "Reusing cached session");
                return Ok(session);
            }
        }

        info!(url = %credentials.root_url(), "Logging in");
        browser.goto(credentials.root_url(), LoadState::Load).await?;

        if browser.is_present(&selectors.consent_banner).await? {
            info!("Dismissing consent banner");
            browser.click(&selectors.consent_button).await?;
        }

        browser
            .wait_for(&selectors.username_input, Wait::visible(timing.wait_timeout()))
            .await?;
        browser
            .type_text(&selectors.username_input, credentials.username())
            .await?;
        browser
            .type_text(&selectors.password_input, credentials.secret())
            .await?;
        browser.submit(&selectors.submit_button).await?;

        let page_text = browser.text("body").await?;
        if let Some(text) = &page_text {
            if let Some(diagnostic) = excerpt(text, &selectors.bad_credentials_marker) {
                warn!("Portal rejected the credentials");
                return Err(AuthError::BadCredentials { diagnostic });
            }
            if let Some(diagnostic) = excerpt(text, &selectors.change_password_marker) {
                warn!("Portal demands a password change");
                return Err(AuthError::MustChangePassword { diagnostic });
            }
        }

        let cookies = browser.cookies().await?;
        if cookies.is_empty() {
            warn!("No cookies after login submit");
            return Err(AuthError::NoSession {
                diagnostic: page_text.map(|t| t.chars().take(DIAGNOSTIC_CHARS).collect()),
            });
        }

        let session = Session::new(cookies, credentials, cache.clock().now());
        store_session(cache, credentials, &session)?;
        info!(
            cookies = session.cookies.len(),
            expires_at = %session.expires_at,
            "Authenticated"
        );
        Ok(session)
    }
    .instrument(span)
    .await
}

/// Page text starting at `marker` (case-insensitive), if the marker is there.
fn excerpt(text: &str, marker: &str) -> Option<String> {
    if marker.is_empty() {
        return None;
    }
    let pattern = Regex::new(&format!("(?i){}", regex::escape(marker))).ok()?;
    let found = pattern.find(text)?;
    Some(text[found.start()..].chars().take(DIAGNOSTIC_CHARS).collect())
}
