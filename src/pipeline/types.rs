//! Shared types for the reservation pipeline.

use serde::{Deserialize, Serialize};

// ── Extracted fields ────────────────────────────────────────────────

/// Booking attributes pulled out of a message body.
///
/// Every field is optional. `None` means the pattern did not match; an
/// empty string is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    /// Raw date text, not normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in_date: Option<String>,
    /// Raw date text, not normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_guests: Option<u32>,
    /// Always `$`-prefixed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_requests: Option<String>,
}

impl ReservationFields {
    /// Labeled display lines for every populated field, in reply order.
    pub fn labeled_lines(&self) -> Vec<(&'static str, String)> {
        let mut lines = Vec::new();
        let mut push = |label: &'static str, value: Option<String>| {
            if let Some(value) = value {
                lines.push((label, value));
            }
        };
        push("Confirmation Number", self.confirmation_number.clone());
        push("Guest Name", self.guest_name.clone());
        push("Contact Email", self.contact_email.clone());
        push("Check-in Date", self.check_in_date.clone());
        push("Check-out Date", self.check_out_date.clone());
        push("Room Type", self.room_type.clone());
        push(
            "Number of Guests",
            self.number_of_guests.map(|n| n.to_string()),
        );
        push("Total Amount", self.total_amount.clone());
        push("Special Requests", self.special_requests.clone());
        lines
    }

    /// True when no pattern matched at all.
    pub fn is_empty(&self) -> bool {
        self.labeled_lines().is_empty()
    }
}

// ── Composed reply ──────────────────────────────────────────────────

/// A rendered confirmation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedReply {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

// ── Outcomes ────────────────────────────────────────────────────────

/// How a single message left the pipeline without a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Confirmation sent.
    Replied {
        recipient: String,
        confirmation_number: Option<String>,
        delivery_id: String,
    },
    /// Keyword density below threshold.
    NotReservation,
    /// Sent by one of our own addresses.
    SelfSent,
    /// No address to reply to. Abandoned.
    NoRecipient,
}

impl MessageOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Replied { .. } => "replied",
            Self::NotReservation => "not_reservation",
            Self::SelfSent => "self_sent",
            Self::NoRecipient => "no_recipient",
        }
    }
}

/// Tally of one polling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub duplicates: usize,
    pub not_reservation: usize,
    pub self_sent: usize,
    pub no_recipient: usize,
    pub replied: usize,
    pub failed: usize,
    /// Cycle ended early on a connection or fetch error.
    pub aborted: bool,
}

impl CycleReport {
    pub(crate) fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Replied { .. } => self.replied += 1,
            MessageOutcome::NotReservation => self.not_reservation += 1,
            MessageOutcome::SelfSent => self.self_sent += 1,
            MessageOutcome::NoRecipient => self.no_recipient += 1,
        }
    }
}
