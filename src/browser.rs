// src/browser.rs

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Network::CookieParam;
use headless_chrome::{LaunchOptions, Tab};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::BrowserError;
use crate::session::SessionCookie;

/// Navigation readiness condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Load,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy)]
pub struct Wait {
    pub visible: bool,
    pub timeout: Duration,
}

impl Wait {
    pub fn visible(timeout: Duration) -> Self {
        Self {
            visible: true,
            timeout,
        }
    }
}

/// The slice of a headless browser the login and listing flows drive.
#[async_trait]
pub trait Browser: Send {
    async fn goto(&mut self, url: &str, until: LoadState) -> Result<(), BrowserError>;

    async fn is_present(&mut self, selector: &str) -> Result<bool, BrowserError>;

    async fn wait_for(&mut self, selector: &str, wait: Wait) -> Result<(), BrowserError>;

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError>;

    /// Select any existing content of an input so the next typing replaces it.
    async fn select_all(&mut self, selector: &str) -> Result<(), BrowserError>;

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), BrowserError>;

    /// Click and wait for the resulting navigation to settle.
    async fn submit(&mut self, selector: &str) -> Result<(), BrowserError>;

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, BrowserError>;

    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), BrowserError>;

    /// `href` of every element matching `selector`, resolved to absolute URLs.
    async fn hrefs(&mut self, selector: &str) -> Result<Vec<String>, BrowserError>;

    /// Trimmed text content of the first element matching `selector`.
    async fn text(&mut self, selector: &str) -> Result<Option<String>, BrowserError>;
}

// ---------------------------------------------------------------------------
// headless_chrome adapter
// ---------------------------------------------------------------------------

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct ChromeBrowser {
    // keeps the Chrome process alive for as long as the tab is used
    _browser: headless_chrome::Browser,
    tab: Arc<Tab>,
}

fn driver(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Driver(e.to_string())
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl ChromeBrowser {
    pub fn launch(headless: bool, default_timeout: Duration) -> Result<Self, BrowserError> {
        let options = LaunchOptions {
            headless,
            window_size: Some((1280, 900)),
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };
        let browser = headless_chrome::Browser::new(options).map_err(driver)?;
        let tab = browser.new_tab().map_err(driver)?;
        tab.set_default_timeout(default_timeout);
        info!(headless, "Chrome launched");
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    fn eval(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        let tab = self.tab.clone();
        let remote = tokio::task::block_in_place(|| tab.evaluate(script, false)).map_err(driver)?;
        Ok(remote.value.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl Browser for ChromeBrowser {
    async fn goto(&mut self, url: &str, until: LoadState) -> Result<(), BrowserError> {
        debug!(url = %url, ?until, "Navigating");
        let tab = self.tab.clone();
        tokio::task::block_in_place(|| -> Result<(), BrowserError> {
            tab.navigate_to(url).map_err(driver)?;
            tab.wait_until_navigated().map_err(driver)?;
            Ok(())
        })?;
        if until == LoadState::NetworkIdle {
            // wait_until_navigated covers the load event; give late XHRs a moment
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }

    async fn is_present(&mut self, selector: &str) -> Result<bool, BrowserError> {
        let script = format!("document.querySelector({}) !== null", js_string(selector));
        Ok(self.eval(&script)?.as_bool().unwrap_or(false))
    }

    async fn wait_for(&mut self, selector: &str, wait: Wait) -> Result<(), BrowserError> {
        let condition = if wait.visible {
            "!!el && !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length)"
        } else {
            "!!el"
        };
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return {condition}; }})()",
            js_string(selector)
        );

        let started = Instant::now();
        loop {
            if self.eval(&script)?.as_bool().unwrap_or(false) {
                return Ok(());
            }
            if started.elapsed() >= wait.timeout {
                return Err(BrowserError::Timeout {
                    selector: selector.to_string(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&mut self, selector: &str) -> Result<(), BrowserError> {
        let tab = self.tab.clone();
        tokio::task::block_in_place(|| -> Result<(), BrowserError> {
            let element = tab.find_element(selector).map_err(|_| BrowserError::NotFound {
                selector: selector.to_string(),
            })?;
            element.click().map_err(driver)?;
            Ok(())
        })
    }

    async fn select_all(&mut self, selector: &str) -> Result<(), BrowserError> {
        self.click(selector).await?;
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.select(); return true; }})()",
            js_string(selector)
        );
        if self.eval(&script)?.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(BrowserError::NotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let tab = self.tab.clone();
        tokio::task::block_in_place(|| -> Result<(), BrowserError> {
            let element = tab.find_element(selector).map_err(|_| BrowserError::NotFound {
                selector: selector.to_string(),
            })?;
            element.type_into(text).map_err(driver)?;
            Ok(())
        })
    }

    async fn submit(&mut self, selector: &str) -> Result<(), BrowserError> {
        self.click(selector).await?;
        let tab = self.tab.clone();
        tokio::task::block_in_place(|| tab.wait_until_navigated().map(|_| ())).map_err(driver)
    }

    async fn cookies(&mut self) -> Result<Vec<SessionCookie>, BrowserError> {
        let tab = self.tab.clone();
        let cookies = tokio::task::block_in_place(|| tab.get_cookies()).map_err(driver)?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
                // CDP reports session cookies with a negative expiry
                expires: (c.expires > 0.0).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }

    async fn set_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), BrowserError> {
        let params = cookies
            .iter()
            .map(|c| {
                // CookieParam grows optional fields between protocol revisions;
                // going through serde keeps this independent of them
                let mut value = serde_json::json!({
                    "name": c.name,
                    "value": c.value,
                    "httpOnly": c.http_only,
                    "secure": c.secure,
                });
                if let Some(domain) = &c.domain {
                    value["domain"] = domain.clone().into();
                }
                if let Some(path) = &c.path {
                    value["path"] = path.clone().into();
                }
                if let Some(expires) = c.expires {
                    value["expires"] = expires.into();
                }
                serde_json::from_value::<CookieParam>(value).map_err(driver)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tab = self.tab.clone();
        tokio::task::block_in_place(|| tab.set_cookies(params)).map_err(driver)
    }

    async fn hrefs(&mut self, selector: &str) -> Result<Vec<String>, BrowserError> {
        let script = format!(
            "JSON.stringify(Array.from(document.querySelectorAll({})).map(a => a.href).filter(Boolean))",
            js_string(selector)
        );
        let raw = self.eval(&script)?;
        let raw = raw.as_str().unwrap_or("[]");
        serde_json::from_str(raw).map_err(driver)
    }

    async fn text(&mut self, selector: &str) -> Result<Option<String>, BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el && el.textContent ? el.textContent.trim() : null; }})()",
            js_string(selector)
        );
        Ok(self.eval(&script)?.as_str().map(str::to_string))
    }
}
