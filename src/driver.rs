//! Browser side of the harvest.
//!
//! `BrowserDriver` is everything the pipeline needs from a browser: a cookie, a
//! stream of finished network responses, lazy access to their bodies, navigation
//! and scrolling. `ChromiumDriver` implements it over the DevTools protocol.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, EnableParams, EventLoadingFailed, EventLoadingFinished, EventResponseReceived,
    GetResponseBodyParams, RequestId,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::{
    info_time, Error, Result, AUTH_COOKIE_DOMAIN, AUTH_COOKIE_NAME, RESPONSE_CHANNEL_CAPACITY,
    SEARCH_PAGE_URL,
};

/// A network response that finished loading. The body is fetched separately
/// with [`BrowserDriver::response_body`] so unrelated traffic never gets read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedResponse {
    pub request_id: String,
    pub url: String,
    pub status: u16,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Sets the session cookie that authenticates the search.
    async fn set_auth_cookie(&self, token: &str) -> Result<()>;
    /// Starts forwarding every finished response into the returned channel.
    async fn enable_interception(&self) -> Result<mpsc::Receiver<InterceptedResponse>>;
    /// Body text of an intercepted response.
    async fn response_body(&self, request_id: &str) -> Result<String>;
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn scroll_to_bottom(&self) -> Result<()>;
}

/// User search page for `query`.
pub fn search_url(query: &str) -> String {
    match Url::parse_with_params(SEARCH_PAGE_URL, &[("q", query), ("f", "user")]) {
        Ok(url) => url.into(),
        Err(_) => format!("{SEARCH_PAGE_URL}?q={query}&f=user"),
    }
}

/// Requests the pairing keeps track of at once. Long-polls and event streams
/// never finish, the oldest of them are forgotten past this.
const MAX_TRACKED_REQUESTS: usize = 512;

/// Pairs `Network.responseReceived` with `Network.loadingFinished` per request id.
/// A response comes out once both halves were seen, in whatever order they arrived.
#[derive(Debug, Default)]
pub struct ResponsePairing {
    received: HashMap<String, (String, u16)>,
    received_order: VecDeque<String>,
    finished_early: VecDeque<String>,
}

impl ResponsePairing {
    pub fn on_received(
        &mut self,
        request_id: String,
        url: String,
        status: u16,
    ) -> Option<InterceptedResponse> {
        if let Some(pos) = self.finished_early.iter().position(|id| *id == request_id) {
            self.finished_early.remove(pos);
            return Some(InterceptedResponse {
                request_id,
                url,
                status,
            });
        }
        if self.received.insert(request_id.clone(), (url, status)).is_none() {
            self.received_order.push_back(request_id);
        }
        while self.received.len() > MAX_TRACKED_REQUESTS {
            let Some(oldest) = self.received_order.pop_front() else {
                break;
            };
            self.received.remove(&oldest);
        }
        None
    }

    pub fn on_finished(&mut self, request_id: String) -> Option<InterceptedResponse> {
        match self.received.remove(&request_id) {
            Some((url, status)) => {
                self.received_order.retain(|id| *id != request_id);
                Some(InterceptedResponse {
                    request_id,
                    url,
                    status,
                })
            }
            None => {
                self.finished_early.push_back(request_id);
                if self.finished_early.len() > MAX_TRACKED_REQUESTS {
                    self.finished_early.pop_front();
                }
                None
            }
        }
    }

    pub fn on_failed(&mut self, request_id: &str) {
        if self.received.remove(request_id).is_some() {
            self.received_order.retain(|id| id != request_id);
        }
    }

    /// Requests still waiting for their other half.
    pub fn in_flight(&self) -> usize {
        self.received.len() + self.finished_early.len()
    }
}

/// Chromium controlled over CDP, with a single page.
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launches Chromium and opens a blank page.
    pub async fn launch(headless: bool) -> Result<Self> {
        let builder = BrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        let builder = if headless {
            builder
        } else {
            builder.with_head()
        };
        let config = builder.build().map_err(Error::BrowserSetup)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        // The browser only makes progress while its handler is polled.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler: {e}");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        info_time!("Launched Chromium (headless: {})", headless);

        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        let _ = self.browser.wait().await;
        self.handler.abort();
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn set_auth_cookie(&self, token: &str) -> Result<()> {
        let cookie = CookieParam::builder()
            .name(AUTH_COOKIE_NAME)
            .value(token)
            .domain(AUTH_COOKIE_DOMAIN)
            .path("/")
            .secure(true)
            .build()
            .map_err(Error::BrowserSetup)?;
        self.page.set_cookie(cookie).await?;
        Ok(())
    }

    async fn enable_interception(&self) -> Result<mpsc::Receiver<InterceptedResponse>> {
        self.page.execute(EnableParams::default()).await?;
        let mut received = self.page.event_listener::<EventResponseReceived>().await?;
        let mut finished = self.page.event_listener::<EventLoadingFinished>().await?;
        let mut failed = self.page.event_listener::<EventLoadingFailed>().await?;

        let (resp_tx, resp_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            // Bodies can only be read once loading finished, so headers wait here until then.
            let mut pairing = ResponsePairing::default();
            loop {
                let paired = tokio::select! {
                    // Chrome sends responseReceived first, keep that order when both are queued.
                    biased;
                    Some(event) = received.next() => {
                        let status = u16::try_from(event.response.status).unwrap_or_default();
                        pairing.on_received(
                            event.request_id.inner().clone(),
                            event.response.url.clone(),
                            status,
                        )
                    }
                    Some(event) = finished.next() => {
                        pairing.on_finished(event.request_id.inner().clone())
                    }
                    Some(event) = failed.next() => {
                        pairing.on_failed(event.request_id.inner());
                        None
                    }
                    else => break,
                };
                if let Some(response) = paired {
                    if resp_tx.send(response).await.is_err() {
                        break;
                    }
                }
            }
            debug!("response interception ended");
        });

        Ok(resp_rx)
    }

    async fn response_body(&self, request_id: &str) -> Result<String> {
        let params = GetResponseBodyParams::new(RequestId::new(request_id));
        let returns = self.page.execute(params).await?.result;
        if !returns.base64_encoded {
            return Ok(returns.body);
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(returns.body.as_bytes())
            .map_err(|_| Error::BodyEncoding(request_id.to_string()))?;
        String::from_utf8(bytes).map_err(|_| Error::BodyEncoding(request_id.to_string()))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        info_time!("Navigating to {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await?;
        Ok(())
    }
}
