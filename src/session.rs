use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::driver::{BrowserDriver, InterceptedResponse};
use crate::extract::{extract_entries, Extraction, TimelineEntry};
use crate::filter::{ResponseFilter, ResponseRecord};
use crate::pagination::{Advance, PaginationController};
use crate::store::EntrySink;

/// Everything gathered for one search query.
#[derive(Debug, Default)]
pub struct SearchSession {
    pub query: String,
    /// Extraction order, duplicates across responses are kept.
    pub accumulated_entries: Vec<TimelineEntry>,
    /// Every accepted response, decodable or not.
    pub response_log: Vec<ResponseRecord>,
}

impl SearchSession {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Counters for one finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    pub query: String,
    pub accepted_responses: u64,
    pub decode_failures: u64,
    pub malformed_payloads: u64,
    pub skipped_entries: u64,
    pub entries_accumulated: u64,
    pub entries_persisted: u64,
    pub persist_failures: u64,
    pub scrolls: u64,
    pub stopped: bool,
}

/// Consumer side of the pipeline. Owns the session state and handles one
/// intercepted response at a time, so nothing in here needs a lock.
pub struct HarvestSession<D: ?Sized, S> {
    session: SearchSession,
    filter: ResponseFilter,
    controller: PaginationController,
    driver: Arc<D>,
    sink: S,
    report: HarvestReport,
}

impl<D, S> HarvestSession<D, S>
where
    D: BrowserDriver + ?Sized,
    S: EntrySink,
{
    pub fn new(
        session: SearchSession,
        filter: ResponseFilter,
        controller: PaginationController,
        driver: Arc<D>,
        sink: S,
    ) -> Self {
        let report = HarvestReport {
            query: session.query.clone(),
            stopped: controller.is_stopped(),
            ..Default::default()
        };
        Self {
            session,
            filter,
            controller,
            driver,
            sink,
            report,
        }
    }

    /// Runs one response through filter, extraction and persistence, then counts it.
    /// Returns `None` when the response isn't search timeline traffic.
    /// Nothing in here fails the session, every problem is logged and counted.
    pub async fn handle(&mut self, response: InterceptedResponse) -> Option<Advance> {
        if !self.filter.matches(&response.url) {
            return None;
        }

        let body = match self.driver.response_body(&response.request_id).await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %response.url, "couldn't read response body: {e}");
                String::new()
            }
        };
        let record = self.filter.accept(&response.url, response.status, body)?;

        let batch = self.extract(&record);
        self.session.accumulated_entries.extend_from_slice(&batch);
        self.report.entries_accumulated += batch.len() as u64;
        self.session.response_log.push(record);

        if !batch.is_empty() {
            match self.sink.persist(&self.session.query, &batch).await {
                Ok(saved) => self.report.entries_persisted += saved as u64,
                Err(e) => {
                    self.report.persist_failures += 1;
                    warn!(
                        query = %self.session.query,
                        entries = batch.len(),
                        "couldn't save entries: {e}"
                    );
                }
            }
        }

        let advance = self.controller.record_accepted();
        self.report.accepted_responses = self.controller.accepted();
        if advance == Advance::Stop {
            self.report.stopped = true;
        }
        Some(advance)
    }

    fn extract(&mut self, record: &ResponseRecord) -> Vec<TimelineEntry> {
        let Some(payload) = &record.parsed_payload else {
            self.report.decode_failures += 1;
            warn!(
                url = %record.url,
                status = record.status,
                "search timeline response is not JSON: {}",
                record.decode_error.as_deref().unwrap_or("unknown error")
            );
            return Vec::new();
        };

        match extract_entries(payload) {
            Extraction::Entries { entries, skipped } => {
                if skipped > 0 {
                    self.report.skipped_entries += skipped as u64;
                    debug!(skipped, "entries or instructions without usable ids were left out");
                }
                debug!(entries = entries.len(), "extracted entries");
                entries
            }
            Extraction::Malformed { missing } => {
                self.report.malformed_payloads += 1;
                warn!(
                    url = %record.url,
                    status = record.status,
                    "search timeline payload has no `{missing}`, no entries taken"
                );
                Vec::new()
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.controller.is_stopped()
    }

    pub fn session(&self) -> &SearchSession {
        &self.session
    }

    /// Ends the session. Dropping the controller releases a scroll task still
    /// waiting on the STOP signal.
    pub fn finish(self) -> (SearchSession, HarvestReport) {
        (self.session, self.report)
    }
}
