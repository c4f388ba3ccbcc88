//! Integration tests for the polling cycle and the background poller.
//!
//! The orchestrator runs against stub mailbox and transport collaborators
//! that record every call, so each test can check exactly what would have
//! been flagged and sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::timeout;

use hotel_autoresponder::channels::{IncomingMessage, MailTransport, Mailbox, OutgoingEmail};
use hotel_autoresponder::config::HotelProfile;
use hotel_autoresponder::error::ChannelError;
use hotel_autoresponder::pipeline::classifier::ReservationClassifier;
use hotel_autoresponder::pipeline::composer::ResponseComposer;
use hotel_autoresponder::pipeline::types::CycleReport;
use hotel_autoresponder::pipeline::{CycleOrchestrator, spawn_poller};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Stub mailbox ────────────────────────────────────────────────────

#[derive(Default)]
struct MailboxState {
    connected: bool,
    /// Number of upcoming connect attempts that fail.
    connect_failures: usize,
    connect_calls: usize,
    /// One entry per fetch; an empty queue yields an empty batch.
    batches: VecDeque<Result<Vec<IncomingMessage>, String>>,
    fetch_calls: usize,
    marked_read: Vec<u32>,
    disconnects: usize,
}

struct StubMailbox {
    state: Arc<Mutex<MailboxState>>,
}

#[async_trait]
impl Mailbox for StubMailbox {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        let mut state = self.state.lock().unwrap();
        state.connect_calls += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(ChannelError::Connection {
                target: "imaps://stub:993".into(),
                reason: "authentication failed".into(),
            });
        }
        state.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn fetch_unseen_since(
        &mut self,
        _since: DateTime<Utc>,
    ) -> Result<Vec<IncomingMessage>, ChannelError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(ChannelError::NotConnected {
                target: "imaps://stub:993".into(),
            });
        }
        state.fetch_calls += 1;
        match state.batches.pop_front() {
            Some(Ok(batch)) => Ok(batch),
            Some(Err(reason)) => Err(ChannelError::Fetch(reason)),
            None => Ok(Vec::new()),
        }
    }

    async fn mark_read(&mut self, message: &IncomingMessage) -> Result<(), ChannelError> {
        self.state.lock().unwrap().marked_read.push(message.uid);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.connected = false;
        Ok(())
    }
}

// ── Stub transport ──────────────────────────────────────────────────

#[derive(Default)]
struct StubTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
    /// Recipients the relay rejects.
    reject: Vec<String>,
    /// Recipients whose send panics.
    explode: Vec<String>,
}

impl StubTransport {
    fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    fn recipients(&self) -> Vec<String> {
        self.sent().into_iter().map(|e| e.to).collect()
    }
}

#[async_trait]
impl MailTransport for StubTransport {
    async fn verify_connectivity(&self) -> bool {
        true
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String, ChannelError> {
        if self.explode.contains(&email.to) {
            panic!("transport exploded for {}", email.to);
        }
        if self.reject.contains(&email.to) {
            return Err(ChannelError::SendFailed {
                to: email.to.clone(),
                reason: "550 mailbox unavailable".into(),
            });
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(format!("250 OK queued as {}", sent.len()))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn message(id: &str, uid: u32, from: &str, subject: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        id: id.into(),
        uid,
        from: from.into(),
        to: "reservations@grandhotel.com".into(),
        subject: subject.into(),
        text: text.into(),
        html: None,
        received_at: Utc::now(),
    }
}

/// A reservation request for `code`, optionally naming a contact address.
fn booking(id: &str, uid: u32, from: &str, code: &str, contact: Option<&str>) -> IncomingMessage {
    let mut body = format!(
        "I would like to make a reservation. Confirmation Number: {code} \
         check-in: 2024-05-01 check-out: 2024-05-04"
    );
    if let Some(contact) = contact {
        body.push_str(&format!(" Contact me at {contact}"));
    }
    message(id, uid, from, "Booking", &body)
}

fn harness(
    batches: Vec<Result<Vec<IncomingMessage>, String>>,
    transport: StubTransport,
) -> (CycleOrchestrator, Arc<Mutex<MailboxState>>, Arc<StubTransport>) {
    let state = Arc::new(Mutex::new(MailboxState {
        batches: batches.into(),
        ..Default::default()
    }));
    let transport = Arc::new(transport);
    let orchestrator = CycleOrchestrator::new(
        Box::new(StubMailbox {
            state: Arc::clone(&state),
        }),
        Arc::clone(&transport) as Arc<dyn MailTransport>,
        ResponseComposer::new(HotelProfile::default()),
    )
    .with_own_addresses(["reservations@grandhotel.com"]);
    (orchestrator, state, transport)
}

async fn cycle(orchestrator: &mut CycleOrchestrator) -> CycleReport {
    timeout(TEST_TIMEOUT, orchestrator.run_cycle())
        .await
        .expect("cycle timed out")
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn reservation_gets_a_confirmation_reply() {
    let m = booking("<m1@example.com>", 1, "jane@example.com", "RES0001", None);
    let (mut orchestrator, state, transport) = harness(vec![Ok(vec![m])], StubTransport::default());

    let report = cycle(&mut orchestrator).await;
    assert_eq!(report.fetched, 1);
    assert_eq!(report.replied, 1);
    assert!(!report.aborted);

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "jane@example.com");
    assert_eq!(sent[0].subject, "Re: Booking - Reservation Confirmation");
    assert!(sent[0].text_body.contains("Confirmation Number: RES0001"));
    assert!(sent[0].text_body.contains("Check-in Date: 2024-05-01"));
    assert!(sent[0].html_body.contains("RES0001"));
    assert_eq!(state.lock().unwrap().marked_read, vec![1]);
}

#[tokio::test]
async fn refetched_message_is_not_answered_twice() {
    let m = booking("<m1@example.com>", 1, "jane@example.com", "RES0001", None);
    let (mut orchestrator, state, transport) = harness(
        vec![Ok(vec![m.clone()]), Ok(vec![m])],
        StubTransport::default(),
    );

    let first = cycle(&mut orchestrator).await;
    let second = cycle(&mut orchestrator).await;

    assert_eq!(first.replied, 1);
    assert_eq!(second.replied, 0);
    assert_eq!(second.duplicates, 1);
    assert_eq!(transport.sent().len(), 1);
    assert!(orchestrator.seen().has_seen("<m1@example.com>"));
    // Duplicates are still flagged read.
    assert_eq!(state.lock().unwrap().marked_read, vec![1, 1]);
}

#[tokio::test]
async fn send_failure_does_not_stop_the_batch() {
    let batch = vec![
        booking("<a@x>", 1, "alice@example.com", "RES0001", None),
        booking("<b@x>", 2, "bob@example.com", "RES0002", None),
        booking("<c@x>", 3, "carol@example.com", "RES0003", None),
    ];
    let transport = StubTransport {
        reject: vec!["bob@example.com".into()],
        ..Default::default()
    };
    let (mut orchestrator, _state, transport) = harness(vec![Ok(batch.clone()), Ok(batch)], transport);

    let report = cycle(&mut orchestrator).await;
    assert_eq!(report.replied, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(
        transport.recipients(),
        vec!["alice@example.com", "carol@example.com"]
    );

    // The failed message stays seen and is not retried.
    assert!(orchestrator.seen().has_seen("<b@x>"));
    let retry = cycle(&mut orchestrator).await;
    assert_eq!(retry.duplicates, 3);
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn panic_in_one_message_is_contained() {
    let batch = vec![
        booking("<a@x>", 1, "alice@example.com", "RES0001", None),
        booking("<b@x>", 2, "bob@example.com", "RES0002", None),
    ];
    let transport = StubTransport {
        explode: vec!["alice@example.com".into()],
        ..Default::default()
    };
    let (mut orchestrator, _state, transport) = harness(vec![Ok(batch)], transport);

    let report = cycle(&mut orchestrator).await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.replied, 1);
    assert_eq!(transport.recipients(), vec!["bob@example.com"]);
}

#[tokio::test]
async fn ordinary_mail_is_ignored() {
    let batch = vec![message(
        "<lunch@x>",
        1,
        "friend@example.com",
        "Lunch on Friday?",
        "Are you free for lunch? The new place downtown has a great room upstairs.",
    )];
    let (mut orchestrator, _state, transport) = harness(vec![Ok(batch)], StubTransport::default());

    let report = cycle(&mut orchestrator).await;
    assert_eq!(report.not_reservation, 1);
    assert!(transport.sent().is_empty());
    assert!(orchestrator.seen().has_seen("<lunch@x>"));
}

#[tokio::test]
async fn extracted_contact_wins_over_sender() {
    let batch = vec![booking(
        "<agent@x>",
        1,
        "agent@travel.example.com",
        "RES0001",
        Some("guest@example.com"),
    )];
    let (mut orchestrator, _state, transport) = harness(vec![Ok(batch)], StubTransport::default());

    cycle(&mut orchestrator).await;
    assert_eq!(transport.recipients(), vec!["guest@example.com"]);
}

#[tokio::test]
async fn own_address_in_body_falls_back_to_sender() {
    let batch = vec![booking(
        "<m@x>",
        1,
        "jane@example.com",
        "RES0001",
        Some("reservations@grandhotel.com"),
    )];
    let (mut orchestrator, _state, transport) = harness(vec![Ok(batch)], StubTransport::default());

    cycle(&mut orchestrator).await;
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "jane@example.com");
    assert!(sent[0].text_body.contains("Contact Email: jane@example.com"));
}

#[tokio::test]
async fn message_without_any_address_is_abandoned() {
    let batch = vec![booking("<m@x>", 1, "Jane Doe", "RES0001", None)];
    let (mut orchestrator, _state, transport) = harness(vec![Ok(batch)], StubTransport::default());

    let report = cycle(&mut orchestrator).await;
    assert_eq!(report.no_recipient, 1);
    assert_eq!(report.replied, 0);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn mail_from_own_address_is_skipped() {
    let batch = vec![booking(
        "<loop@x>",
        1,
        "Reservations@GrandHotel.com",
        "RES0001",
        Some("jane@example.com"),
    )];
    let (mut orchestrator, _state, transport) = harness(vec![Ok(batch)], StubTransport::default());

    let report = cycle(&mut orchestrator).await;
    assert_eq!(report.self_sent, 1);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn fetch_error_aborts_without_marking_seen() {
    let m = booking("<m1@x>", 1, "jane@example.com", "RES0001", None);
    let (mut orchestrator, state, transport) = harness(
        vec![Err("UID SEARCH failed".into()), Ok(vec![m])],
        StubTransport::default(),
    );

    let report = cycle(&mut orchestrator).await;
    assert!(report.aborted);
    assert!(orchestrator.seen().is_empty());
    assert!(state.lock().unwrap().marked_read.is_empty());

    let report = cycle(&mut orchestrator).await;
    assert_eq!(report.replied, 1);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn connection_failure_is_retried_next_cycle() {
    let m = booking("<m1@x>", 1, "jane@example.com", "RES0001", None);
    let (mut orchestrator, state, transport) = harness(vec![Ok(vec![m])], StubTransport::default());
    state.lock().unwrap().connect_failures = 1;

    let report = cycle(&mut orchestrator).await;
    assert!(report.aborted);
    assert_eq!(state.lock().unwrap().fetch_calls, 0);

    let report = cycle(&mut orchestrator).await;
    assert!(!report.aborted);
    assert_eq!(report.replied, 1);
    assert_eq!(state.lock().unwrap().connect_calls, 2);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn unrepresentable_lookback_aborts_the_cycle() {
    let m = booking("<m1@x>", 1, "jane@example.com", "RES0001", None);
    let (orchestrator, state, transport) = harness(vec![Ok(vec![m])], StubTransport::default());
    let mut orchestrator =
        orchestrator.with_lookback(Duration::from_secs(100_000_000_000 * 3600));

    let report = tokio::spawn(async move { orchestrator.run_cycle().await })
        .await
        .expect("cycle must not panic");
    assert!(report.aborted);
    assert_eq!(state.lock().unwrap().fetch_calls, 0);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn empty_mailbox_is_a_quiet_cycle() {
    let (mut orchestrator, state, transport) = harness(Vec::new(), StubTransport::default());

    let report = cycle(&mut orchestrator).await;
    assert_eq!(report, CycleReport::default());
    assert_eq!(state.lock().unwrap().fetch_calls, 1);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn custom_keywords_change_classification() {
    let batch = vec![message(
        "<spa@x>",
        1,
        "jane@example.com",
        "Spa visit",
        "Please book a massage and a sauna session for Saturday.",
    )];
    let (orchestrator, _state, transport) = harness(vec![Ok(batch)], StubTransport::default());
    let mut orchestrator =
        orchestrator.with_classifier(ReservationClassifier::with_keywords(["massage", "sauna"], 2));

    let report = cycle(&mut orchestrator).await;
    assert_eq!(report.replied, 1);
    assert_eq!(transport.recipients(), vec!["jane@example.com"]);
}

#[tokio::test]
async fn poller_runs_immediately_and_disconnects_on_shutdown() {
    let m = booking("<m1@x>", 1, "jane@example.com", "RES0001", None);
    let (orchestrator, state, transport) = harness(vec![Ok(vec![m])], StubTransport::default());

    // Long interval: only the immediate first tick fires during the test.
    let poller = spawn_poller(orchestrator, Duration::from_secs(3600));

    timeout(TEST_TIMEOUT, async {
        while transport.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first cycle never ran");

    let orchestrator = timeout(TEST_TIMEOUT, poller.shutdown())
        .await
        .expect("poller did not stop")
        .expect("poller task failed");

    let state = state.lock().unwrap();
    assert_eq!(state.fetch_calls, 1);
    assert_eq!(state.disconnects, 1);
    assert!(!state.connected);
    assert!(orchestrator.seen().has_seen("<m1@x>"));
}
