use async_trait::async_trait;
use cookie::Cookie;
use reqwest::{Client, RequestBuilder};
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::session::SessionCookie;

/// Status, body and `Set-Cookie` values of one detail-page GET.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailResponse {
    pub status: u16,
    pub body: String,
    pub set_cookies: Vec<String>,
}

/// Direct HTTP access to detail pages, outside the browser.
#[async_trait]
pub trait DetailFetcher: Send + Sync {
    /// Only transport failures are errors; any HTTP status is a response.
    async fn get(&self, url: &str, cookie_header: &str) -> Result<DetailResponse, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
    referer: String,
}

impl HttpFetcher {
    pub fn new(referer: &str) -> Result<Self, FetchError> {
        let client = Client::builder().default_headers(fingerprint()).build()?;
        Ok(Self {
            client,
            referer: referer.to_string(),
        })
    }

    fn request(&self, url: &str, cookie_header: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header(header::REFERER, &self.referer)
            .header(header::COOKIE, cookie_header)
    }
}

/// Every `Set-Cookie` value of a response; a header may repeat.
fn set_cookie_values(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// Headers of a desktop Chrome navigation; bare clients get filtered.
fn fingerprint() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7",
        ),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(
        "sec-ch-ua",
        HeaderValue::from_static(
            r#""Google Chrome";v="125", "Chromium";v="125", "Not.A/Brand";v="24""#,
        ),
    );
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static(r#""macOS""#));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers
}

#[async_trait]
impl DetailFetcher for HttpFetcher {
    async fn get(&self, url: &str, cookie_header: &str) -> Result<DetailResponse, FetchError> {
        let response = self
            .request(url, cookie_header)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    FetchError::Unreachable(url.to_string())
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status().as_u16();
        let set_cookies = set_cookie_values(response.headers());
        let body = response.text().await?;
        debug!(url = %url, status, bytes = body.len(), "Fetched detail page");

        Ok(DetailResponse {
            status,
            body,
            set_cookies,
        })
    }
}

/// Name/value cookies sent with direct fetches. Merges produce a new jar;
/// `version` counts the merges that changed something.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
    version: u64,
}

impl CookieJar {
    pub fn from_session(cookies: &[SessionCookie]) -> Self {
        Self::default().with_browser_cookies(cookies)
    }

    /// Browser values win; names the browser does not know are kept.
    pub fn with_browser_cookies(&self, cookies: &[SessionCookie]) -> Self {
        let mut next = self.cookies.clone();
        for c in cookies {
            next.insert(c.name.clone(), c.value.clone());
        }
        self.advance(next)
    }

    /// Fold `Set-Cookie` header values into the jar. Attributes such as
    /// `Path` or `HttpOnly` never become cookies of their own.
    pub fn merge_set_cookies(&self, headers: &[String]) -> Self {
        let mut next = self.cookies.clone();
        for raw in headers {
            match Cookie::parse(raw.as_str()) {
                Ok(c) => {
                    next.insert(c.name().to_string(), c.value().to_string());
                }
                Err(e) => warn!(error = %e, "Ignoring unparseable Set-Cookie header"),
            }
        }
        self.advance(next)
    }

    fn advance(&self, cookies: BTreeMap<String, String>) -> Self {
        let version = if cookies == self.cookies {
            self.version
        } else {
            self.version + 1
        };
        Self { cookies, version }
    }

    pub fn header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fake::cookie;

    #[test]
    fn header_joins_name_value_pairs() {
        let jar = CookieJar::from_session(&[cookie("JSESSIONID", "abc"), cookie("AWSALB", "x1")]);
        assert_eq!(jar.header(), "AWSALB=x1; JSESSIONID=abc");
        assert_eq!(jar.len(), 2);
    }

    #[test]
    fn set_cookie_attributes_are_not_cookies() {
        let jar = CookieJar::from_session(&[cookie("JSESSIONID", "abc")]);
        let merged = jar.merge_set_cookies(&[
            "JSESSIONID=def; Path=/; HttpOnly; Secure".to_string(),
            "AWSALB=lb2; Expires=Wed, 06 Mar 2024 10:00:00 GMT; Path=/".to_string(),
        ]);

        assert_eq!(merged.get("JSESSIONID"), Some("def"));
        assert_eq!(merged.get("AWSALB"), Some("lb2"));
        assert_eq!(merged.get("Path"), None);
        assert_eq!(merged.len(), 2);
        // merging returns a new jar
        assert_eq!(jar.get("JSESSIONID"), Some("abc"));
    }

    #[test]
    fn version_counts_changing_merges() {
        let jar = CookieJar::from_session(&[cookie("a", "1")]);
        assert_eq!(jar.version(), 1);

        let same = jar.merge_set_cookies(&["a=1; Path=/".to_string()]);
        assert_eq!(same.version(), 1);

        let changed = same.merge_set_cookies(&["a=2".to_string()]);
        assert_eq!(changed.version(), 2);

        let empty = changed.merge_set_cookies(&[]);
        assert_eq!(empty.version(), 2);
    }

    #[test]
    fn browser_cookies_override_but_keep_merged_names() {
        let jar = CookieJar::from_session(&[cookie("JSESSIONID", "abc")])
            .merge_set_cookies(&["AWSALB=lb2".to_string()]);
        let reseeded = jar.with_browser_cookies(&[cookie("JSESSIONID", "zzz")]);

        assert_eq!(reseeded.get("JSESSIONID"), Some("zzz"));
        assert_eq!(reseeded.get("AWSALB"), Some("lb2"));
    }

    #[test]
    fn garbage_set_cookie_is_ignored() {
        let jar = CookieJar::from_session(&[cookie("a", "1")]);
        let merged = jar.merge_set_cookies(&["".to_string()]);
        assert_eq!(merged, jar);
    }

    #[test]
    fn every_set_cookie_header_is_collected() {
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("JSESSIONID=def; Path=/"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("AWSALB=lb2; Path=/"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));

        assert_eq!(
            set_cookie_values(&headers),
            vec!["JSESSIONID=def; Path=/", "AWSALB=lb2; Path=/"]
        );
        assert!(set_cookie_values(&HeaderMap::new()).is_empty());
    }

    #[test]
    fn detail_request_sends_cookie_and_referer() {
        let fetcher = HttpFetcher::new("https://www.fieldglass.net/past_invoice_list.do").unwrap();
        let request = fetcher
            .request(
                "https://www.fieldglass.net/invoice_detail.do?id=1",
                "AWSALB=lb2; JSESSIONID=abc",
            )
            .build()
            .unwrap();

        assert_eq!(request.headers()[header::COOKIE], "AWSALB=lb2; JSESSIONID=abc");
        assert_eq!(
            request.headers()[header::REFERER],
            "https://www.fieldglass.net/past_invoice_list.do"
        );
        assert_eq!(request.url().query(), Some("id=1"));
    }

    #[test]
    fn client_failures_are_not_outages() {
        assert!(matches!(fake::client_error(), FetchError::Http(_)));
    }

    #[test]
    fn fingerprint_carries_browser_headers() {
        let headers = fingerprint();
        assert_eq!(headers["sec-fetch-mode"], "navigate");
        assert_eq!(headers[header::ACCEPT_LANGUAGE], "en-US,en;q=0.9");
        assert!(headers.contains_key(header::UPGRADE_INSECURE_REQUESTS));
    }
}
