//! Keyword-density classifier for reservation inquiries.
//!
//! A message counts as a reservation email when at least `threshold`
//! distinct keywords occur somewhere in its subject or body. Single
//! matches ("room", "stay") are too common in unrelated mail.

use tracing::debug;

/// Keywords used when no custom list is configured.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "reservation",
    "booking",
    "confirmation",
    "check-in",
    "check-out",
    "hotel",
    "room",
    "guest",
    "stay",
    "arrival",
    "departure",
];

/// Minimum number of distinct keywords for a positive match.
pub const DEFAULT_THRESHOLD: usize = 2;

/// Decides whether a message concerns a hotel booking.
#[derive(Debug, Clone)]
pub struct ReservationClassifier {
    /// Case-folded keywords.
    keywords: Vec<String>,
    threshold: usize,
}

impl ReservationClassifier {
    /// Classifier with the built-in keyword list and threshold.
    pub fn default_keywords() -> Self {
        Self::with_keywords(DEFAULT_KEYWORDS.iter().map(|k| k.to_string()), DEFAULT_THRESHOLD)
    }

    /// Classifier with a custom keyword list. Duplicates collapse.
    pub fn with_keywords<I, S>(keywords: I, threshold: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list: Vec<String> = Vec::new();
        for keyword in keywords {
            let keyword = fold_case(keyword.as_ref().trim());
            if !keyword.is_empty() && !list.contains(&keyword) {
                list.push(keyword);
            }
        }
        Self {
            keywords: list,
            threshold,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Keywords present in subject or body, each reported once.
    pub fn matched_keywords(&self, subject: &str, body: &str) -> Vec<&str> {
        let text = fold_case(&format!("{subject} {body}"));
        self.keywords
            .iter()
            .filter(|k| text.contains(k.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// True when enough distinct keywords are present.
    pub fn is_reservation_email(&self, subject: &str, body: &str) -> bool {
        let matched = self.matched_keywords(subject, body);
        debug!(matched = ?matched, threshold = self.threshold, "Keyword scan");
        matched.len() >= self.threshold
    }
}

/// Case fold that gives the same result for a string and its upper-case
/// form, including characters such as dotless `ı` that upper-case to ASCII.
fn fold_case(text: &str) -> String {
    text.to_uppercase().to_lowercase()
}

impl Default for ReservationClassifier {
    fn default() -> Self {
        Self::default_keywords()
    }
}
