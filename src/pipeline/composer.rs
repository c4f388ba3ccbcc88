//! Renders extracted reservation fields into a confirmation reply.
//!
//! Pure rendering, no I/O. Guest-supplied text is HTML-escaped before it
//! is placed into the rich body.

use std::fmt::Write as _;

use crate::config::HotelProfile;
use crate::pipeline::types::{ComposedReply, ReservationFields};

const FALLBACK_GREETING: &str = "Valued Guest";

const STYLE: &str = "\
        body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px; }
        .header { background-color: #2c3e50; color: white; padding: 20px; text-align: center; border-radius: 8px 8px 0 0; }
        .content { background-color: #f9f9f9; padding: 30px; border-radius: 0 0 8px 8px; }
        .details { background-color: white; padding: 20px; border-radius: 8px; margin: 20px 0; border-left: 4px solid #2c3e50; }
        .detail-item { margin: 10px 0; }
        .detail-label { font-weight: bold; color: #2c3e50; }
        .footer { margin-top: 30px; padding-top: 20px; border-top: 2px solid #ddd; }
        .hotel-info { background-color: #ecf0f1; padding: 15px; border-radius: 8px; margin: 20px 0; }
        .automated-notice { font-size: 0.9em; color: #7f8c8d; font-style: italic; margin-top: 20px; }";

/// Builds reply subject and bodies for one hotel.
#[derive(Debug, Clone)]
pub struct ResponseComposer {
    hotel: HotelProfile,
}

impl ResponseComposer {
    pub fn new(hotel: HotelProfile) -> Self {
        Self { hotel }
    }

    pub fn hotel(&self) -> &HotelProfile {
        &self.hotel
    }

    /// Render the full reply for `fields`.
    pub fn compose(&self, fields: &ReservationFields, original_subject: &str) -> ComposedReply {
        ComposedReply {
            subject: reply_subject(original_subject),
            text_body: self.text_body(fields),
            html_body: self.html_body(fields),
        }
    }

    fn text_body(&self, fields: &ReservationFields) -> String {
        let h = &self.hotel;
        let greeting = fields.guest_name.as_deref().unwrap_or(FALLBACK_GREETING);

        let mut out = String::new();
        let _ = writeln!(out, "Dear {greeting},\n");
        out.push_str(
            "Thank you for your reservation inquiry. We have received your booking request \
             and are pleased to confirm the following details:\n\n",
        );
        let lines = fields.labeled_lines();
        if !lines.is_empty() {
            for (label, value) in &lines {
                let _ = writeln!(out, "{label}: {value}");
            }
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "We look forward to welcoming you to {}. If you have any questions or need to make \
             changes to your reservation, please don't hesitate to contact us.\n",
            h.name
        );
        let _ = writeln!(
            out,
            "Hotel Information:\n{}\n{}\nPhone: {}\nEmail: {}\n",
            h.name, h.address, h.phone, h.email
        );
        let _ = writeln!(
            out,
            "Thank you for choosing {}. We appreciate your business and look forward to \
             providing you with an exceptional stay.\n",
            h.name
        );
        let _ = writeln!(out, "Best regards,\n{} Reservations Team\n", h.name);
        let _ = write!(
            out,
            "---\nThis is an automated response. If you need immediate assistance, please call us at {}.",
            h.phone
        );
        out
    }

    fn html_body(&self, fields: &ReservationFields) -> String {
        let name = escape_html(&self.hotel.name);
        let address = escape_html(&self.hotel.address);
        let phone = escape_html(&self.hotel.phone);
        let email = escape_html(&self.hotel.email);
        let greeting = escape_html(fields.guest_name.as_deref().unwrap_or(FALLBACK_GREETING));

        let mut details = String::new();
        for (label, value) in fields.labeled_lines() {
            let _ = write!(
                details,
                "\n            <div class=\"detail-item\"><span class=\"detail-label\">{label}:</span> {}</div>",
                escape_html(&value)
            );
        }

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Reservation Confirmation</title>
    <style>
{STYLE}
    </style>
</head>
<body>
    <div class="header">
        <h1>{name}</h1>
        <h2>Reservation Confirmation</h2>
    </div>
    <div class="content">
        <p>Dear <strong>{greeting}</strong>,</p>
        <p>Thank you for your reservation inquiry. We have received your booking request and are pleased to confirm the following details:</p>
        <div class="details">
            <h3>Reservation Details</h3>{details}
        </div>
        <p>We look forward to welcoming you to {name}. If you have any questions or need to make changes to your reservation, please don't hesitate to contact us.</p>
        <div class="hotel-info">
            <h3>Hotel Information</h3>
            <p><strong>{name}</strong><br>
            {address}<br>
            Phone: <a href="tel:{phone}">{phone}</a><br>
            Email: <a href="mailto:{email}">{email}</a></p>
        </div>
        <div class="footer">
            <p>Thank you for choosing {name}. We appreciate your business and look forward to providing you with an exceptional stay.</p>
            <p><strong>Best regards,</strong><br>
            {name} Reservations Team</p>
        </div>
        <div class="automated-notice">
            <p>This is an automated response. If you need immediate assistance, please call us at {phone}.</p>
        </div>
    </div>
</body>
</html>"#
        )
    }
}

/// `Re: <original> - Reservation Confirmation`.
pub fn reply_subject(original_subject: &str) -> String {
    format!("Re: {original_subject} - Reservation Confirmation")
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
