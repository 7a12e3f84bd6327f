use std::fmt;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::browser::{Browser, LoadState, Wait};
use crate::cache_db::CacheStore;
use crate::config::{Config, Selectors, Timing};
use crate::dates::DateRange;
use crate::error::{ConfigError, ExtractError, FetchError, ParseError};
use crate::fetch::{CookieJar, DetailFetcher};
use crate::invoice::{is_draft, parse_detail, CanonicalInvoiceRecord, DetailRules, StatusMap};
use crate::pagination::PageState;
use crate::session::{store_session, Credentials, Session};

/// Everything the listing walk needs besides its collaborators.
pub struct Extractor {
    invoices_url: String,
    selectors: Selectors,
    timing: Timing,
    rules: DetailRules,
    statuses: StatusMap,
}

/// Mutable state carried from one listing page to the next.
struct RunState {
    session: Session,
    jar: CookieJar,
    records: Vec<CanonicalInvoiceRecord>,
    /// Last row number the page label reported before clicking "next".
    last_end: Option<u64>,
}

/// Why a detail link produced no record.
#[derive(Debug, PartialEq)]
enum Skip {
    Status(u16),
    Transport(String),
    Unparseable(ParseError),
    Draft(String),
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skip::Status(status) => write!(f, "http status {status}"),
            Skip::Transport(error) => write!(f, "transport: {error}"),
            Skip::Unparseable(error) => write!(f, "unparseable: {error}"),
            Skip::Draft(id) => write!(f, "draft {id}"),
        }
    }
}

impl Extractor {
    pub fn new(
        invoices_url: &str,
        selectors: Selectors,
        timing: Timing,
        rules: DetailRules,
        statuses: StatusMap,
    ) -> Self {
        Self {
            invoices_url: invoices_url.to_string(),
            selectors,
            timing,
            rules,
            statuses,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let statuses = match &cfg.statuses {
            Some(table) => StatusMap::from_table(table.clone()),
            None => StatusMap::builtin(),
        };
        Ok(Self::new(
            &cfg.portal.invoices_url,
            cfg.selectors.clone(),
            cfg.timing.clone(),
            DetailRules::compile(&cfg.fields)?,
            statuses,
        ))
    }

    /// Walk the date-filtered invoice listing page by page and return every
    /// non-draft invoice it links to. `from` and `to` are `YYYY-MM-DD`.
    pub async fn extract_invoices<B, F>(
        &self,
        browser: &mut B,
        fetcher: &F,
        cache: &mut CacheStore,
        credentials: &Credentials,
        session: &Session,
        from: &str,
        to: &str,
    ) -> Result<Vec<CanonicalInvoiceRecord>, ExtractError>
    where
        B: Browser + ?Sized,
        F: DetailFetcher + ?Sized,
    {
        // reject a bad window before touching the browser
        let range = DateRange::parse(from, to)?;
        info!(from = %from, to = %to, url = %self.invoices_url, "Extracting invoices");

        browser
            .set_cookies(&session.cookies)
            .await
            .map_err(ExtractError::navigation("restore session cookies"))?;
        browser
            .goto(&self.invoices_url, LoadState::NetworkIdle)
            .await
            .map_err(ExtractError::navigation("open invoice list"))?;

        self.apply_date_filter(browser, &range).await?;
        self.show_all_rows(browser).await?;

        let mut state = RunState {
            session: session.clone(),
            jar: CookieJar::from_session(&session.cookies),
            records: Vec::new(),
            last_end: None,
        };

        let mut page = 1u32;
        loop {
            let span = info_span!("extract_page", page);
            self.extract_page(browser, fetcher, cache, credentials, &mut state)
                .instrument(span.clone())
                .await?;
            let more = self
                .advance_page(browser, &mut state)
                .instrument(span)
                .await?;
            if !more {
                break;
            }
            page += 1;
        }

        info!(
            pages = page,
            invoices = state.records.len(),
            cookies = state.jar.len(),
            cookie_version = state.jar.version(),
            "Extraction finished"
        );
        Ok(state.records)
    }

    async fn apply_date_filter<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        range: &DateRange,
    ) -> Result<(), ExtractError> {
        let s = &self.selectors;
        let (from, to) = range.portal_bounds();
        let fields = [(&s.filter_start_date, from), (&s.filter_end_date, to)];
        for (selector, value) in fields {
            browser
                .wait_for(selector, Wait::visible(self.timing.wait_timeout()))
                .await
                .map_err(ExtractError::navigation("date filter"))?;
            browser
                .select_all(selector)
                .await
                .map_err(ExtractError::navigation("date filter"))?;
            browser
                .type_text(selector, &value)
                .await
                .map_err(ExtractError::navigation("date filter"))?;
        }
        browser
            .click(&s.filter_button)
            .await
            .map_err(ExtractError::navigation("apply filter"))?;
        pause(self.timing.settle()).await;
        Ok(())
    }

    async fn show_all_rows<B: Browser + ?Sized>(&self, browser: &mut B) -> Result<(), ExtractError> {
        let s = &self.selectors;
        let wait = Wait::visible(self.timing.wait_timeout());
        browser
            .wait_for(&s.page_size_dropdown, wait)
            .await
            .map_err(ExtractError::navigation("page size"))?;
        browser
            .click(&s.page_size_dropdown)
            .await
            .map_err(ExtractError::navigation("page size"))?;
        pause(self.timing.dropdown_pause()).await;
        browser
            .wait_for(&s.page_size_all, wait)
            .await
            .map_err(ExtractError::navigation("page size"))?;
        browser
            .click(&s.page_size_all)
            .await
            .map_err(ExtractError::navigation("page size"))?;
        browser
            .wait_for(&s.grid, wait)
            .await
            .map_err(ExtractError::navigation("results grid"))?;
        Ok(())
    }

    async fn extract_page<B, F>(
        &self,
        browser: &mut B,
        fetcher: &F,
        cache: &mut CacheStore,
        credentials: &Credentials,
        state: &mut RunState,
    ) -> Result<(), ExtractError>
    where
        B: Browser + ?Sized,
        F: DetailFetcher + ?Sized,
    {
        let cookies = browser
            .cookies()
            .await
            .map_err(ExtractError::navigation("read cookies"))?;
        let cookies = if cookies.is_empty() {
            warn!("Browser reported no cookies, keeping the previous set");
            state.session.cookies.clone()
        } else {
            cookies
        };
        // keeps the cached session alive for as long as the walk runs
        state.session = state.session.refreshed(cookies, cache.clock().now());
        store_session(cache, credentials, &state.session)?;
        state.jar = state.jar.with_browser_cookies(&state.session.cookies);

        let links = browser
            .hrefs(&self.selectors.detail_links)
            .await
            .map_err(ExtractError::navigation("detail links"))?;
        info!(links = links.len(), "Listing page loaded");

        let before = state.records.len();
        let mut skipped = 0usize;
        for link in &links {
            match self.fetch_detail(fetcher, link, state).await? {
                None => {}
                Some(skip @ Skip::Draft(_)) => {
                    skipped += 1;
                    info!(link = %link, reason = %skip, "Skipping draft invoice");
                }
                Some(skip) => {
                    skipped += 1;
                    warn!(link = %link, reason = %skip, "Skipping detail page");
                }
            }
            pause(self.timing.row_delay()).await;
        }
        info!(
            invoices = state.records.len() - before,
            skipped,
            "Page done"
        );
        Ok(())
    }

    async fn fetch_detail<F: DetailFetcher + ?Sized>(
        &self,
        fetcher: &F,
        link: &str,
        state: &mut RunState,
    ) -> Result<Option<Skip>, ExtractError> {
        let response = match fetcher.get(link, &state.jar.header()).await {
            Ok(response) => response,
            Err(e @ FetchError::Unreachable(_)) => return Err(e.into()),
            Err(e) => return Ok(Some(Skip::Transport(e.to_string()))),
        };
        if !response.set_cookies.is_empty() {
            state.jar = state.jar.merge_set_cookies(&response.set_cookies);
            debug!(version = state.jar.version(), "Merged response cookies");
        }

        if response.status != 200 {
            return Ok(Some(Skip::Status(response.status)));
        }

        let raw = match parse_detail(link, &response.body, &self.rules) {
            Ok(raw) => raw,
            Err(e) => return Ok(Some(Skip::Unparseable(e))),
        };

        if is_draft(&raw.status) {
            return Ok(Some(Skip::Draft(raw.id)));
        }

        let record = CanonicalInvoiceRecord::from_raw(raw, &self.statuses)?;
        debug!(
            id = %record.id_on_portal,
            invoice_number = %record.invoice_number,
            status = ?record.status,
            "Extracted invoice"
        );
        state.records.push(record);
        Ok(None)
    }

    /// Move the grid to the next page. `false` once there is nothing more
    /// to read, including when the page label or the next control are missing
    /// or the label stopped advancing.
    async fn advance_page<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        state: &mut RunState,
    ) -> Result<bool, ExtractError> {
        let s = &self.selectors;
        let text = browser
            .text(&s.page_info)
            .await
            .map_err(ExtractError::navigation("page info"))?
            .unwrap_or_default();

        let page = PageState::parse(&text);
        match page {
            PageState::Last { total } => info!(total, "Last page reached"),
            PageState::Unparsed => {
                warn!(text = %text, "Page info not recognized, treating as last page")
            }
            PageState::More { end, total } => {
                if let Some(previous) = state.last_end.filter(|previous| end <= *previous) {
                    warn!(end, previous, total, "Page info did not advance, stopping");
                    return Ok(false);
                }
                state.last_end = Some(end);
                debug!(end, total, "More pages remain");
            }
        }
        if !page.has_next() {
            return Ok(false);
        }

        let next = Wait::visible(self.timing.next_page_timeout());
        if let Err(e) = browser.wait_for(&s.next_page, next).await {
            warn!(error = %e, "Next control not available, stopping");
            return Ok(false);
        }
        if let Err(e) = browser.click(&s.next_page).await {
            warn!(error = %e, "Next control not clickable, stopping");
            return Ok(false);
        }

        browser
            .wait_for(&s.grid, Wait::visible(self.timing.wait_timeout()))
            .await
            .map_err(ExtractError::navigation("next page grid"))?;
        pause(self.timing.next_page_pause()).await;
        Ok(true)
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
