use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static TICKET_REF_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#?(\d{1,18})$").expect("valid regex"));

pub const MAX_TITLE_CHARS: usize = 120;
pub const MAX_BODY_CHARS: usize = 4000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextError {
  #[error("text must not be empty")]
  Empty,
  #[error("text is longer than {0} characters")]
  TooLong(usize),
}

/// Trims the input and checks it is non-empty and within `max_chars`.
pub fn validate_text(input: &str, max_chars: usize) -> Result<String, TextError> {
  let trimmed = input.trim();
  if trimmed.is_empty() {
    return Err(TextError::Empty);
  }
  if trimmed.chars().count() > max_chars {
    return Err(TextError::TooLong(max_chars));
  }
  Ok(trimmed.to_string())
}

/// Accepts `123` or `#123`.
pub fn parse_ticket_ref(input: &str) -> Option<i64> {
  TICKET_REF_PATTERN
    .captures(input.trim())
    .and_then(|captures| captures.get(1))
    .and_then(|id| id.as_str().parse().ok())
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
  if text.chars().count() <= max_chars {
    return text.to_string();
  }
  let mut truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
  truncated.push('…');
  truncated
}

/// Like [`truncate_chars`], but counts UTF-16 code units, which is how
/// Telegram measures message length.
pub fn truncate_utf16(text: &str, max_units: usize) -> String {
  if text.encode_utf16().count() <= max_units {
    return text.to_string();
  }
  if max_units == 0 {
    return String::new();
  }
  let budget = max_units - 1;
  let mut used = 0;
  let mut truncated = String::new();
  for ch in text.chars() {
    used += ch.len_utf16();
    if used > budget {
      break;
    }
    truncated.push(ch);
  }
  truncated.push('…');
  truncated
}

pub fn is_cancel(text: &str) -> bool {
  let trimmed = text.trim();
  trimmed.eq_ignore_ascii_case("cancel") || trimmed.eq_ignore_ascii_case("/cancel")
}
