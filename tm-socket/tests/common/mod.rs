//! Shared test utilities for integration tests.
//!
//! `MockTransport` records every adapter the owner creates and lets tests
//! script that adapter's events by index (0 = first adapter opened).

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tm_socket::{
    ConnectionConfig, ConnectionHooks, Transport, TransportEventSink, TransportHandle,
};

pub const ADDRESS: &str = "ws://localhost:8080/chat";
pub const TOKEN: &str = "test-jwt-token";

#[derive(Default)]
struct AdapterRecord {
    url: String,
    sink: Option<TransportEventSink>,
    ready: bool,
    sent: Vec<String>,
    close_call: Option<(u16, String)>,
}

#[derive(Default)]
struct MockState {
    adapters: Vec<AdapterRecord>,
    refuse_sends: bool,
}

/// In-memory transport. Clones share state, so tests keep one clone and hand
/// the other to the owner.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of adapters created so far.
    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().adapters.len()
    }

    pub fn url(&self, index: usize) -> String {
        self.state.lock().unwrap().adapters[index].url.clone()
    }

    pub fn sent(&self, index: usize) -> Vec<String> {
        self.state.lock().unwrap().adapters[index].sent.clone()
    }

    /// Code and reason the owner closed this adapter with, if it did.
    pub fn close_call(&self, index: usize) -> Option<(u16, String)> {
        self.state.lock().unwrap().adapters[index].close_call.clone()
    }

    /// Make every handle refuse writes even when open.
    pub fn refuse_sends(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_sends = refuse;
    }

    fn sink(&self, index: usize) -> TransportEventSink {
        self.state.lock().unwrap().adapters[index]
            .sink
            .clone()
            .expect("adapter sink")
    }

    pub fn simulate_open(&self, index: usize) {
        self.state.lock().unwrap().adapters[index].ready = true;
        self.sink(index).opened();
    }

    pub fn simulate_message(&self, index: usize, text: &str) {
        self.sink(index).message(text);
    }

    pub fn simulate_error(&self, index: usize, detail: &str) {
        self.sink(index).errored(detail);
    }

    pub fn simulate_close(&self, index: usize, code: Option<u16>, reason: &str) {
        self.state.lock().unwrap().adapters[index].ready = false;
        self.sink(index).closed(code, reason);
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &str, events: TransportEventSink) -> Box<dyn TransportHandle> {
        let mut state = self.state.lock().unwrap();
        state.adapters.push(AdapterRecord {
            url: url.to_string(),
            sink: Some(events),
            ..AdapterRecord::default()
        });
        Box::new(MockHandle {
            state: self.state.clone(),
            index: state.adapters.len() - 1,
        })
    }
}

struct MockHandle {
    state: Arc<Mutex<MockState>>,
    index: usize,
}

impl TransportHandle for MockHandle {
    fn send(&self, payload: String) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.refuse_sends {
            return false;
        }
        let record = &mut state.adapters[self.index];
        if !record.ready || record.close_call.is_some() {
            return false;
        }
        record.sent.push(payload);
        true
    }

    fn close(&self, code: u16, reason: &str) {
        let mut state = self.state.lock().unwrap();
        let record = &mut state.adapters[self.index];
        record.ready = false;
        record.close_call = Some((code, reason.to_string()));
    }
}

/// Records hook invocations as short strings, in call order.
#[derive(Clone, Default)]
pub struct HookLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl HookLog {
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn hooks(&self) -> ConnectionHooks {
        let open = self.entries.clone();
        let message = self.entries.clone();
        let error = self.entries.clone();
        let close = self.entries.clone();
        ConnectionHooks::new()
            .on_open(move || open.lock().unwrap().push("open".into()))
            .on_message(move |v| message.lock().unwrap().push(format!("message:{v}")))
            .on_error(move |e| error.lock().unwrap().push(format!("error:{e}")))
            .on_close(move |c| {
                let code = c.code.map(|c| c.to_string()).unwrap_or_else(|| "none".into());
                close.lock().unwrap().push(format!("close:{code}:{}", c.reason));
            })
    }
}

/// Config with zero jitter so delays are exact under paused time.
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new(ADDRESS, TOKEN)
        .with_initial_reconnect_delay(Duration::from_millis(100))
        .with_reconnect_jitter(Duration::ZERO)
}

/// Let the driver task drain its queue without moving the clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock, then let the driver catch up.
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}
