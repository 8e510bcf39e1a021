//! Shared test utilities for integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use usersearch_harvest::driver::{BrowserDriver, InterceptedResponse};
use usersearch_harvest::extract::TimelineEntry;
use usersearch_harvest::store::EntrySink;
use usersearch_harvest::{Error, Result, SEARCH_TIMELINE_PREFIX};

/// URL of a search timeline API call.
pub fn timeline_url(n: usize) -> String {
    format!("{SEARCH_TIMELINE_PREFIX}variables=%7B%22cursor%22%3A%22{n}%22%7D")
}

/// A search timeline payload with one `TimelineAddEntries` instruction holding
/// `user_ids` followed by a bottom cursor.
pub fn timeline_body(user_ids: &[&str]) -> String {
    let mut entries: Vec<Value> = user_ids
        .iter()
        .map(|id| json!({ "entryId": id, "sortIndex": "100", "content": { "entryType": "TimelineTimelineItem" } }))
        .collect();
    entries.push(json!({ "entryId": "cursor-bottom-0", "content": { "value": "DAADDAAB" } }));
    json!({ "data": { "search_by_raw_query": { "search_timeline": { "timeline": {
        "instructions": [
            { "type": "TimelineClearCache" },
            { "type": "TimelineAddEntries", "entries": entries }
        ]
    }}}}})
    .to_string()
}

/// One response the scripted browser emits.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub url: String,
    pub body: String,
}

impl Exchange {
    pub fn timeline(n: usize, body: String) -> Self {
        Self {
            url: timeline_url(n),
            body,
        }
    }

    pub fn other(url: &str) -> Self {
        Self {
            url: url.to_string(),
            body: "binary".to_string(),
        }
    }
}

/// A browser that plays back canned traffic: `pages[0]` arrives on navigation,
/// `pages[i]` on the i-th scroll. The response stream closes after the last page
/// unless `keep_open` is set.
pub struct ScriptedDriver {
    pages: Vec<Vec<Exchange>>,
    keep_open: bool,
    bodies: Mutex<HashMap<String, String>>,
    tx: Mutex<Option<mpsc::Sender<InterceptedResponse>>>,
    next_id: AtomicU64,
    scrolls: AtomicU64,
    pub navigations: Mutex<Vec<String>>,
    pub body_reads: Mutex<Vec<String>>,
}

impl ScriptedDriver {
    pub fn new(pages: Vec<Vec<Exchange>>) -> Self {
        Self {
            pages,
            keep_open: false,
            bodies: Mutex::new(HashMap::new()),
            tx: Mutex::new(None),
            next_id: AtomicU64::new(0),
            scrolls: AtomicU64::new(0),
            navigations: Mutex::new(Vec::new()),
            body_reads: Mutex::new(Vec::new()),
        }
    }

    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }

    pub fn scrolls(&self) -> u64 {
        self.scrolls.load(Ordering::SeqCst)
    }

    fn emit_page(&self, index: usize) {
        let mut tx_guard = self.tx.lock().unwrap();
        if let (Some(tx), Some(page)) = (tx_guard.as_ref(), self.pages.get(index)) {
            for exchange in page {
                let request_id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
                self.bodies
                    .lock()
                    .unwrap()
                    .insert(request_id.clone(), exchange.body.clone());
                tx.try_send(InterceptedResponse {
                    request_id,
                    url: exchange.url.clone(),
                    status: 200,
                })
                .unwrap();
            }
        }
        if index + 1 >= self.pages.len() && !self.keep_open {
            tx_guard.take();
        }
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn set_auth_cookie(&self, _token: &str) -> Result<()> {
        Ok(())
    }

    async fn enable_interception(&self) -> Result<mpsc::Receiver<InterceptedResponse>> {
        let (tx, rx) = mpsc::channel(1024);
        *self.tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn response_body(&self, request_id: &str) -> Result<String> {
        self.body_reads.lock().unwrap().push(request_id.to_string());
        self.bodies
            .lock()
            .unwrap()
            .get(request_id)
            .cloned()
            .ok_or_else(|| Error::BodyEncoding(request_id.to_string()))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.navigations.lock().unwrap().push(url.to_string());
        self.emit_page(0);
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        let n = self.scrolls.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit_page(n as usize);
        Ok(())
    }
}

/// Keeps every batch it receives. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingSink {
    batches: Arc<Mutex<Vec<(String, Vec<TimelineEntry>)>>>,
}

impl RecordingSink {
    pub fn batches(&self) -> Vec<(String, Vec<TimelineEntry>)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntrySink for RecordingSink {
    async fn persist(&mut self, query: &str, batch: &[TimelineEntry]) -> Result<usize> {
        self.batches
            .lock()
            .unwrap()
            .push((query.to_string(), batch.to_vec()));
        Ok(batch.len())
    }
}
