use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::warn;

use crate::driver::{search_url, BrowserDriver, InterceptedResponse};
use crate::filter::ResponseFilter;
use crate::pagination::{drive_scrolls, PaginationController};
use crate::session::{HarvestReport, HarvestSession, SearchSession};
use crate::store::EntrySink;
use crate::{info_time, Result};

/// Knobs for one harvest run.
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub search_query: String,
    /// Accepted responses to take before scrolling stops.
    pub max_scrolls: i64,
    pub scroll_interval: Duration,
    /// Once stopped, how long the response stream may stay quiet before the run ends.
    pub settle: Duration,
    pub dump_responses: Option<PathBuf>,
}

/// Runs one search: the interception stream and the scroll timer are two
/// independent producers, the session consumes responses one at a time.
///
/// A budget of zero or less returns right away, nothing is loaded or scrolled.
/// Otherwise the run only ends after the STOP signal (plus settling) or when the
/// driver closes its response stream, so a budget that's never reached keeps it going.
pub async fn harvest<D, S>(driver: Arc<D>, sink: S, options: HarvestOptions) -> Result<HarvestReport>
where
    D: BrowserDriver + ?Sized + 'static,
    S: EntrySink,
{
    let start_time = Local::now();
    let (controller, stop_rx) = PaginationController::new(options.max_scrolls);
    let mut harvest = HarvestSession::new(
        SearchSession::new(&options.search_query),
        ResponseFilter::default(),
        controller,
        driver.clone(),
        sink,
    );

    if harvest.is_stopped() {
        info_time!(
            "Scroll budget is {}, nothing to harvest for '{}'",
            options.max_scrolls,
            options.search_query
        );
        let (_, report) = harvest.finish();
        return Ok(report);
    }

    // Interception goes first so the first page of results isn't missed.
    let resp_rx = driver.enable_interception().await?;
    driver.navigate(&search_url(&options.search_query)).await?;

    let scroll_handle = tokio::spawn({
        let driver = driver.clone();
        let every = options.scroll_interval;
        async move { drive_scrolls(driver, every, stop_rx).await }
    });

    consume_responses(&mut harvest, resp_rx, options.settle).await;

    let (session, mut report) = harvest.finish();
    report.scrolls = scroll_handle.await?;

    if let Some(path) = &options.dump_responses {
        match serde_json::to_vec_pretty(&session.response_log) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    warn!("couldn't write response log to {}: {e}", path.display());
                }
            }
            Err(e) => warn!("couldn't serialize response log: {e}"),
        }
    }

    info_time!(
        start_time,
        "Harvested {} entries from {} responses for '{}'",
        report.entries_accumulated,
        report.accepted_responses,
        report.query
    );
    Ok(report)
}

/// Feeds responses to the session until the stream closes, or until it has
/// been quiet for `settle` after the STOP signal.
async fn consume_responses<D, S>(
    harvest: &mut HarvestSession<D, S>,
    mut resp_rx: mpsc::Receiver<InterceptedResponse>,
    settle: Duration,
) where
    D: BrowserDriver + ?Sized,
    S: EntrySink,
{
    loop {
        let next = if harvest.is_stopped() {
            match timeout(settle, resp_rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    info_time!("No more responses after STOP, finishing");
                    break;
                }
            }
        } else {
            resp_rx.recv().await
        };

        let Some(response) = next else {
            info_time!("Response stream closed");
            break;
        };
        harvest.handle(response).await;
    }
}
