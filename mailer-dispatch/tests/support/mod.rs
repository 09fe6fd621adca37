//! Shared helpers for dispatch integration tests.
#![allow(dead_code)] // Not every test file uses every helper

pub mod mock_server;

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use mailer_dispatch::{
    DeliveryObserver, DeliveryReport, FailureKind, Message, Transport, TransportError,
};
use tokio::{
    sync::{Semaphore, mpsc},
    time::Instant,
};

/// What a [`ScriptedTransport`] does on each call.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    AlwaysSucceed,
    AlwaysFail(FailureKind),
    /// Fail this many times, then succeed.
    FailTimes(u32),
    Panic,
    /// Panic this many times, then succeed.
    PanicTimes(u32),
}

/// In-memory transport that records every call.
pub struct ScriptedTransport {
    script: Script,
    calls: AtomicU32,
    sent: Mutex<Vec<(Message, Instant)>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    /// Every send waits for a permit from `gate` first.
    pub fn gated(script: Script, gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(Message, Instant)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|(message, _)| message.subject().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((message.clone(), Instant::now()));

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        match self.script {
            Script::AlwaysSucceed => Ok(()),
            Script::AlwaysFail(kind) => Err(TransportError::other(kind, "scripted failure")),
            Script::FailTimes(times) if call < times => Err(TransportError::other(
                FailureKind::Transient,
                format!("scripted failure {}", call + 1),
            )),
            Script::FailTimes(_) => Ok(()),
            Script::Panic => panic!("scripted panic"),
            Script::PanicTimes(times) if call < times => panic!("scripted panic {}", call + 1),
            Script::PanicTimes(_) => Ok(()),
        }
    }
}

/// Observer that forwards every report to a channel.
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<DeliveryReport>,
}

impl ChannelObserver {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DeliveryReport>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

impl DeliveryObserver for ChannelObserver {
    fn on_complete(&self, report: &DeliveryReport) {
        // Reports are not Clone; forward the parts tests look at
        let _ = self.sender.send(DeliveryReport {
            job_id: report.job_id,
            to: report.to.clone(),
            attempts: report.attempts,
            outcome: match &report.outcome {
                mailer_dispatch::DeliveryOutcome::Delivered => {
                    mailer_dispatch::DeliveryOutcome::Delivered
                }
                mailer_dispatch::DeliveryOutcome::Failed(error) => {
                    mailer_dispatch::DeliveryOutcome::Failed(TransportError::other(
                        error.kind(),
                        error.to_string(),
                    ))
                }
                mailer_dispatch::DeliveryOutcome::Cancelled => {
                    mailer_dispatch::DeliveryOutcome::Cancelled
                }
            },
        });
    }
}

/// Observer that panics on every report, taking its worker down with it.
pub struct PanickingObserver;

impl DeliveryObserver for PanickingObserver {
    fn on_complete(&self, _report: &DeliveryReport) {
        panic!("observer panicked");
    }
}

pub fn message(subject: impl Into<String>) -> Message {
    Message::new("owner@example.com", subject, "<p>Your visit is confirmed</p>")
}
