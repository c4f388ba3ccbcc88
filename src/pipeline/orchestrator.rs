//! Cycle orchestrator and background poller.
//!
//! Each cycle:
//! 1. Connect the mailbox if needed, then fetch unseen mail from the
//!    lookback window
//! 2. Mark every fetched message read and drop ids already in the seen set
//! 3. Run new messages one at a time through classify → extract →
//!    resolve recipient → compose → send
//!
//! A message id enters the seen set before it is classified, so a reply
//! that fails to send is never retried (at-most-once delivery).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channels::{IncomingMessage, MailTransport, Mailbox, OutgoingEmail};
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::pipeline::classifier::{DEFAULT_THRESHOLD, ReservationClassifier};
use crate::pipeline::composer::ResponseComposer;
use crate::pipeline::dedup::SeenMessages;
use crate::pipeline::extractor::{FieldExtractor, extract_email_address};
use crate::pipeline::types::{CycleReport, MessageOutcome, ReservationFields};

/// Default lookback window: 24 hours.
const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// The stateless per-message stages.
struct ReplyPipeline {
    transport: Arc<dyn MailTransport>,
    classifier: ReservationClassifier,
    extractor: FieldExtractor,
    composer: ResponseComposer,
    /// Lower-cased addresses that belong to this service.
    own_addresses: Vec<String>,
}

impl ReplyPipeline {
    fn is_own(&self, address: &str) -> bool {
        self.own_addresses
            .iter()
            .any(|own| own.eq_ignore_ascii_case(address))
    }

    async fn process(&self, message: &IncomingMessage) -> Result<MessageOutcome, PipelineError> {
        if extract_email_address(&message.from).is_some_and(|sender| self.is_own(&sender)) {
            debug!(sender = %message.from, "Skipping self-sent email");
            return Ok(MessageOutcome::SelfSent);
        }

        if !self
            .classifier
            .is_reservation_email(&message.subject, &message.text)
        {
            info!(subject = %message.subject, "Not a reservation email, skipping");
            return Ok(MessageOutcome::NotReservation);
        }
        info!(subject = %message.subject, "Processing reservation email");

        let mut fields = self.extractor.extract(&message.text);

        let Some(recipient) = resolve_recipient(&fields, &message.from, &self.own_addresses) else {
            warn!(
                message_id = %message.id,
                from = %message.from,
                "No email address found for reservation, cannot send response"
            );
            return Ok(MessageOutcome::NoRecipient);
        };
        fields.contact_email = Some(recipient.clone());

        let reply = self.composer.compose(&fields, &message.subject);
        let email = OutgoingEmail {
            to: recipient.clone(),
            subject: reply.subject,
            text_body: reply.text_body,
            html_body: reply.html_body,
        };

        let delivery_id = self
            .transport
            .send(&email)
            .await
            .map_err(|source| PipelineError::Send {
                to: recipient.clone(),
                confirmation_number: fields.confirmation_number.clone(),
                source,
            })?;

        info!(
            to = %recipient,
            confirmation = fields.confirmation_number.as_deref().unwrap_or("none"),
            delivery_id = %delivery_id,
            "Reservation confirmation sent"
        );
        Ok(MessageOutcome::Replied {
            recipient,
            confirmation_number: fields.confirmation_number,
            delivery_id,
        })
    }
}

/// Reply address: the extracted contact email, else the sender header.
///
/// Addresses belonging to the service itself are never chosen.
pub fn resolve_recipient(
    fields: &ReservationFields,
    from: &str,
    own_addresses: &[String],
) -> Option<String> {
    let usable = |addr: &String| !own_addresses.iter().any(|own| own.eq_ignore_ascii_case(addr));

    fields
        .contact_email
        .clone()
        .filter(usable)
        .or_else(|| extract_email_address(from).filter(usable))
}

/// Runs polling cycles against one mailbox. Owns the mailbox session and
/// the seen set.
pub struct CycleOrchestrator {
    mailbox: Box<dyn Mailbox>,
    pipeline: ReplyPipeline,
    seen: SeenMessages,
    lookback: chrono::Duration,
}

impl CycleOrchestrator {
    pub fn new(
        mailbox: Box<dyn Mailbox>,
        transport: Arc<dyn MailTransport>,
        composer: ResponseComposer,
    ) -> Self {
        Self {
            mailbox,
            pipeline: ReplyPipeline {
                transport,
                classifier: ReservationClassifier::default(),
                extractor: FieldExtractor::default(),
                composer,
                own_addresses: Vec::new(),
            },
            seen: SeenMessages::new(),
            lookback: chrono::Duration::hours(DEFAULT_LOOKBACK_HOURS),
        }
    }

    /// Orchestrator wired from loaded configuration.
    pub fn from_config(
        config: &AppConfig,
        mailbox: Box<dyn Mailbox>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let mut orchestrator = Self::new(
            mailbox,
            transport,
            ResponseComposer::new(config.hotel.clone()),
        )
        .with_lookback(config.lookback)
        .with_own_addresses(config.own_addresses());

        if let Some(keywords) = &config.reservation_keywords {
            orchestrator = orchestrator
                .with_classifier(ReservationClassifier::with_keywords(keywords, DEFAULT_THRESHOLD));
        }
        orchestrator
    }

    pub fn with_classifier(mut self, classifier: ReservationClassifier) -> Self {
        self.pipeline.classifier = classifier;
        self
    }

    pub fn with_extractor(mut self, extractor: FieldExtractor) -> Self {
        self.pipeline.extractor = extractor;
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        match chrono::Duration::from_std(lookback) {
            Ok(d) => self.lookback = d,
            Err(e) => warn!(error = %e, "Lookback window out of range, keeping default"),
        }
        self
    }

    pub fn with_own_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.pipeline.own_addresses = addresses
            .into_iter()
            .map(|a| a.as_ref().trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        self
    }

    /// Ids already handled during this process run.
    pub fn seen(&self) -> &SeenMessages {
        &self.seen
    }

    /// Run one polling cycle. Never fails; problems are logged and counted.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        if !self.mailbox.is_connected() {
            if let Err(e) = self.mailbox.connect().await {
                error!(error = %e, "Mailbox connection failed, skipping cycle");
                report.aborted = true;
                return report;
            }
        }

        let Some(since) = Utc::now().checked_sub_signed(self.lookback) else {
            error!(lookback = %self.lookback, "Lookback window reaches past the earliest date, skipping cycle");
            report.aborted = true;
            return report;
        };
        let messages = match self.mailbox.fetch_unseen_since(since).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Error checking emails");
                report.aborted = true;
                return report;
            }
        };

        report.fetched = messages.len();
        if messages.is_empty() {
            info!("No new emails found");
            return report;
        }

        for message in &messages {
            if let Err(e) = self.mailbox.mark_read(message).await {
                warn!(message_id = %message.id, error = %e, "Error marking email as read");
            }

            if !self.seen.first_sighting(&message.id) {
                debug!(message_id = %message.id, "Email already processed, skipping");
                report.duplicates += 1;
                continue;
            }

            let result = AssertUnwindSafe(self.pipeline.process(message))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(PipelineError::Panicked(panic_message(&*payload))));

            match result {
                Ok(outcome) => {
                    debug!(message_id = %message.id, outcome = outcome.label(), "Email handled");
                    report.record(&outcome);
                }
                Err(e) => {
                    error!(message_id = %message.id, error = %e, "Error processing email");
                    report.failed += 1;
                }
            }
        }

        info!(
            fetched = report.fetched,
            replied = report.replied,
            skipped = report.duplicates + report.not_reservation + report.self_sent,
            no_recipient = report.no_recipient,
            failed = report.failed,
            "Email check cycle complete"
        );
        report
    }

    /// Release the mailbox session.
    pub async fn close(&mut self) {
        if let Err(e) = self.mailbox.disconnect().await {
            warn!(error = %e, "Error closing mailbox connection");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ── Poller ──────────────────────────────────────────────────────────

/// Handle to the background polling task.
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<CycleOrchestrator>,
}

impl PollerHandle {
    /// Stop polling and wait for the task. A cycle already running is
    /// allowed to finish; the mailbox is disconnected before this returns.
    pub async fn shutdown(self) -> Result<CycleOrchestrator, JoinError> {
        // The task may already be gone, which is fine.
        let _ = self.shutdown.send(true);
        self.handle.await
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawn the polling loop. The first cycle runs immediately, then once per
/// `interval`. Ticks that arrive while a cycle is running are skipped.
pub fn spawn_poller(mut orchestrator: CycleOrchestrator, interval: Duration) -> PollerHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(
            "Email poller started, checking every {}s",
            interval.as_secs()
        );

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                // Also fires if the handle was dropped.
                _ = shutdown_rx.changed() => break,
                _ = tick.tick() => {
                    orchestrator.run_cycle().await;
                }
            }
        }

        info!("Email poller shutting down");
        orchestrator.close().await;
        orchestrator
    });

    PollerHandle { shutdown, handle }
}
