//! Email-specific types: the decoded inbound message and its parsing helpers.

use chrono::{DateTime, TimeZone, Utc};
use mail_parser::{MessageParser, PartType};

use crate::error::ChannelError;

/// An inbound message as handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Message-ID header, or a synthesized `<uid>-<unix millis>`.
    pub id: String,
    /// Mailbox-local handle used for flag updates.
    pub uid: u32,
    /// Sender address (falls back to display name, then empty).
    pub from: String,
    /// First recipient address.
    pub to: String,
    pub subject: String,
    /// Plain-text body. Tag-stripped HTML when no text part exists.
    pub text: String,
    pub html: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Decode a raw RFC 5322 message fetched under `uid`.
pub fn parse_raw_message(uid: u32, raw: &[u8]) -> Result<IncomingMessage, ChannelError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| ChannelError::Parse {
            reference: format!("uid {uid}"),
            reason: "not a valid RFC 5322 message".into(),
        })?;

    let now = Utc::now();
    let id = parsed
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| synthesize_id(uid, now));

    // Only genuine parts; the parser's body_text/body_html convert between formats.
    let html = parsed.parts.iter().find_map(|part| match &part.body {
        PartType::Html(h) => Some(h.to_string()),
        _ => None,
    });
    let text = parsed
        .parts
        .iter()
        .find_map(|part| match &part.body {
            PartType::Text(t) => Some(t.to_string()),
            _ => None,
        })
        .or_else(|| html.as_deref().map(strip_html))
        .unwrap_or_default();

    Ok(IncomingMessage {
        id,
        uid,
        from: first_address(parsed.from()),
        to: first_address(parsed.to()),
        subject: parsed.subject().unwrap_or_default().to_string(),
        text,
        html,
        received_at: parsed.date().and_then(to_utc).unwrap_or(now),
    })
}

/// Identifier for messages without a Message-ID. Not stable across runs.
pub fn synthesize_id(uid: u32, at: DateTime<Utc>) -> String {
    format!("{uid}-{}", at.timestamp_millis())
}

/// First address of a header: the address, else the display name, else empty.
fn first_address(addr: Option<&mail_parser::Address>) -> String {
    addr.and_then(|a| a.first())
        .and_then(|a| a.address().or_else(|| a.name()))
        .map(str::to_string)
        .unwrap_or_default()
}

fn to_utc(d: &mail_parser::DateTime) -> Option<DateTime<Utc>> {
    let local = chrono::NaiveDate::from_ymd_opt(
        i32::from(d.year),
        u32::from(d.month),
        u32::from(d.day),
    )?
    .and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))?;
    let offset = i64::from(d.tz_hour) * 3600 + i64::from(d.tz_minute) * 60;
    // "-0500" means local time is behind UTC.
    let utc = if d.tz_before_gmt {
        local + chrono::Duration::seconds(offset)
    } else {
        local - chrono::Duration::seconds(offset)
    };
    Some(Utc.from_utc_datetime(&utc))
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
