//! Shared helpers for integration tests.

#![allow(dead_code)]

use ledger_stream::{
    Contract, EventSink, LedgerClient, LedgerContext, LedgerError, Party, Result,
    StreamDescriptor, StreamHandle, TemplateId,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A stream handed out by [`ScriptedClient`].
pub struct OpenedStream {
    pub descriptor: StreamDescriptor,
    pub sink: EventSink,
    pub closed: Arc<AtomicBool>,
    pub started: Arc<AtomicBool>,
    /// Handles of the same template still open when this one was opened.
    pub open_siblings: usize,
}

#[derive(Default)]
struct Script {
    opened: Vec<OpenedStream>,
    attempts: usize,
    failing_opens: usize,
    failing_starts: usize,
    failing_templates: HashSet<TemplateId>,
}

/// Collaborator that records every stream and lets the test push events
/// into any of them, including ones the owner has already replaced.
#[derive(Clone, Default)]
pub struct ScriptedClient {
    script: Arc<Mutex<Script>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_opens(&self, n: usize) {
        self.script.lock().failing_opens = n;
    }

    pub fn fail_next_starts(&self, n: usize) {
        self.script.lock().failing_starts = n;
    }

    /// Fail every open for a template until `heal_template` is called.
    pub fn fail_template(&self, template: &str) {
        self.script.lock().failing_templates.insert(TemplateId::new(template));
    }

    pub fn heal_template(&self, template: &str) {
        self.script.lock().failing_templates.remove(&TemplateId::new(template));
    }

    /// Calls to `open_stream`, failed ones included.
    pub fn attempts(&self) -> usize {
        self.script.lock().attempts
    }

    /// Successfully opened streams.
    pub fn opened(&self) -> usize {
        self.script.lock().opened.len()
    }

    pub fn sink(&self, index: usize) -> EventSink {
        self.script.lock().opened[index].sink.clone()
    }

    /// Sink of the most recent stream for a template.
    pub fn latest_sink(&self, template: &str) -> EventSink {
        let script = self.script.lock();
        script
            .opened
            .iter()
            .rev()
            .find(|s| s.descriptor.template_id.as_str() == template)
            .map(|s| s.sink.clone())
            .expect("no stream opened for template")
    }

    pub fn descriptor(&self, index: usize) -> StreamDescriptor {
        self.script.lock().opened[index].descriptor.clone()
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.script.lock().opened[index].closed.load(Ordering::SeqCst)
    }

    pub fn is_started(&self, index: usize) -> bool {
        self.script.lock().opened[index].started.load(Ordering::SeqCst)
    }

    /// Streams not yet closed by their owner.
    pub fn open_handles(&self) -> usize {
        self.script
            .lock()
            .opened
            .iter()
            .filter(|s| !s.closed.load(Ordering::SeqCst))
            .count()
    }

    /// True if no stream was ever opened while another for its template was open.
    pub fn never_overlapped(&self) -> bool {
        self.script.lock().opened.iter().all(|s| s.open_siblings == 0)
    }
}

struct ScriptedHandle {
    closed: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    fail_start: bool,
}

impl StreamHandle for ScriptedHandle {
    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(LedgerError::StreamOpen("start refused".to_string()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl LedgerClient for ScriptedClient {
    fn open_stream(
        &self,
        descriptor: &StreamDescriptor,
        sink: EventSink,
    ) -> Result<Box<dyn StreamHandle>> {
        let mut script = self.script.lock();
        script.attempts += 1;

        if script.failing_templates.contains(&descriptor.template_id) {
            return Err(LedgerError::StreamOpen(format!(
                "{} unavailable",
                descriptor.template_id
            )));
        }
        if script.failing_opens > 0 {
            script.failing_opens -= 1;
            return Err(LedgerError::StreamOpen("connection refused".to_string()));
        }

        let fail_start = script.failing_starts > 0;
        if fail_start {
            script.failing_starts -= 1;
        }

        let open_siblings = script
            .opened
            .iter()
            .filter(|s| s.descriptor.template_id == descriptor.template_id)
            .filter(|s| !s.closed.load(Ordering::SeqCst))
            .count();

        let closed = Arc::new(AtomicBool::new(false));
        let started = Arc::new(AtomicBool::new(false));
        script.opened.push(OpenedStream {
            descriptor: descriptor.clone(),
            sink,
            closed: Arc::clone(&closed),
            started: Arc::clone(&started),
            open_siblings,
        });

        Ok(Box::new(ScriptedHandle {
            closed,
            started,
            fail_start,
        }))
    }

    fn query(&self, _descriptor: &StreamDescriptor) -> Result<Vec<Contract>> {
        Ok(Vec::new())
    }
}

pub fn alice() -> Party {
    Party::new("alice")
}

pub fn context(client: &ScriptedClient) -> LedgerContext {
    LedgerContext::new(Arc::new(client.clone()), vec![alice()])
}

pub fn order(id: &str, qty: i64) -> Contract {
    Contract::new(id, "Order", json!({ "qty": qty })).with_signatories(vec![alice()])
}

pub fn invoice(id: &str, total: i64) -> Contract {
    Contract::new(id, "Invoice", json!({ "total": total })).with_signatories(vec![alice()])
}
