//! Pattern-based extraction of booking fields from free text.
//!
//! Each field has one labeled regex. Rules run independently over the
//! whole body and the leftmost match wins. Nothing here can fail the
//! caller: a rule that finds nothing, or finds something unusable,
//! leaves its field as `None`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::pipeline::types::ReservationFields;

/// First `local@domain.tld` address anywhere in the text.
static EMAIL_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("email pattern is valid")
});

/// Start of another field: a known label followed by `:` or `#`, or a
/// check-in/check-out token. Free-text captures are cut here so a name on
/// a single-line form does not swallow the next field, while ordinary
/// words such as "Price" in "Mark Price" are left alone.
static NEXT_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:check[-\s]?(?:in|out)\b|(?:confirmation(?:\s*(?:number|code))?|(?:guest|full|customer)\s+name|name|guests?|adults?|people|room(?:\s*type)?|total|amount|price|cost|special\s*requests?|notes?|comments?|e-?mail|arrival|departure)\s*[:#])",
    )
    .expect("label pattern is valid")
});

/// Which reservation field a rule fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    ConfirmationNumber,
    GuestName,
    CheckInDate,
    CheckOutDate,
    RoomType,
    NumberOfGuests,
    TotalAmount,
    SpecialRequests,
}

/// A labeled pattern. Capture group 1 holds the value.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub kind: FieldKind,
    pub regex: Regex,
}

/// Ordered set of field rules.
pub struct FieldExtractor {
    rules: Vec<FieldRule>,
}

const DATE: &str = r"(\d{1,2}[-/]\d{1,2}[-/]\d{2,4}|\d{4}[-/]\d{1,2}[-/]\d{1,2})";

impl FieldExtractor {
    /// Extractor with the standard reservation rules.
    pub fn default_rules() -> Self {
        let rule = |kind, pattern: &str| FieldRule {
            kind,
            regex: Regex::new(pattern).expect("field pattern is valid"),
        };

        let rules = vec![
            // Label is case-insensitive, the code itself is upper-case or digits.
            rule(
                FieldKind::ConfirmationNumber,
                r"(?i:confirmation\s*(?:number|#|code)?\s*:?\s*)([A-Z0-9]{6,})",
            ),
            rule(
                FieldKind::GuestName,
                r"(?i)\b(?:guest\s+name|full\s+name|customer\s+name|guest|name|customer)\b\s*:?\s*([a-z \t]{2,30})",
            ),
            rule(
                FieldKind::CheckInDate,
                &format!(r"(?i)check[-\s]?in\s*:?\s*{DATE}"),
            ),
            rule(
                FieldKind::CheckOutDate,
                &format!(r"(?i)check[-\s]?out\s*:?\s*{DATE}"),
            ),
            rule(
                FieldKind::RoomType,
                r"(?i)\broom\s*(?:type)?\s*:?\s*([a-z \t]{3,20})",
            ),
            rule(
                FieldKind::NumberOfGuests,
                r"(?i)\b(?:guests?|adults?|people)\s*:?\s*(\d+)",
            ),
            rule(
                FieldKind::TotalAmount,
                r"(?i)\b(?:total|amount|price|cost)\s*:?\s*[$€£¥]?\s*(\d[\d,]*(?:\.\d+)?)",
            ),
            rule(
                FieldKind::SpecialRequests,
                r"(?i)\b(?:special\s*requests?|notes?|comments?)\s*:?\s*([^.\n]{10,100})",
            ),
        ];

        Self { rules }
    }

    /// Pull every recognizable field out of `body`.
    pub fn extract(&self, body: &str) -> ReservationFields {
        let mut fields = ReservationFields {
            contact_email: extract_email_address(body),
            ..Default::default()
        };

        for rule in &self.rules {
            let Some(value) = rule.regex.captures(body).and_then(|caps| caps.get(1)) else {
                continue;
            };
            let raw = match rule.kind {
                FieldKind::GuestName | FieldKind::RoomType => until_next_label(body, value),
                _ => value.as_str(),
            };
            apply(&mut fields, rule.kind, raw);
        }

        match serde_json::to_string(&fields) {
            Ok(details) => info!(details = %details, "Parsed reservation details"),
            Err(e) => debug!(error = %e, "Could not serialize reservation details"),
        }
        fields
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::default_rules()
    }
}

fn apply(fields: &mut ReservationFields, kind: FieldKind, raw: &str) {
    match kind {
        FieldKind::ConfirmationNumber => fields.confirmation_number = Some(raw.to_string()),
        FieldKind::GuestName => fields.guest_name = free_text(raw),
        FieldKind::CheckInDate => fields.check_in_date = Some(raw.to_string()),
        FieldKind::CheckOutDate => fields.check_out_date = Some(raw.to_string()),
        FieldKind::RoomType => fields.room_type = free_text(raw),
        FieldKind::NumberOfGuests => match raw.parse::<u32>() {
            Ok(n) => fields.number_of_guests = Some(n),
            Err(e) => warn!(value = %raw, error = %e, "Ignoring unusable guest count"),
        },
        FieldKind::TotalAmount => fields.total_amount = Some(format!("${raw}")),
        FieldKind::SpecialRequests => {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                fields.special_requests = Some(trimmed.to_string());
            }
        }
    }
}

/// The capture, shortened to end where the next field label begins.
///
/// The search runs over the body from the capture start, so a label that
/// the capture only partly covers (`check` of `check-in:`) still counts.
fn until_next_label<'a>(body: &'a str, value: regex::Match<'a>) -> &'a str {
    let captured = value.as_str();
    let end = NEXT_LABEL
        .find(&body[value.start()..])
        .map_or(captured.len(), |label| label.start().min(captured.len()));
    &captured[..end]
}

/// Trimmed free text, `None` when nothing is left.
fn free_text(raw: &str) -> Option<String> {
    let value = raw.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// First email address found anywhere in `text`.
pub fn extract_email_address(text: &str) -> Option<String> {
    EMAIL_ADDRESS.find(text).map(|m| m.as_str().to_string())
}
