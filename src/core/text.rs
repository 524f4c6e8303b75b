//! Message length limits and UTF-8 safe splitting for outbound channels
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Added per-channel limits for SMS and Telegram
//! - 1.0.0: Line-aware chunking and truncation helpers

/// Telegram `sendMessage` text limit
pub const TELEGRAM_LIMIT: usize = 4096;
/// Maximum body length accepted by the SMS gateway (10 concatenated segments)
pub const SMS_LIMIT: usize = 1600;
/// Practical limit for an email subject header
pub const SUBJECT_LIMIT: usize = 255;

/// Chunk text into pieces no longer than `max_size` bytes (UTF-8 safe, line-aware)
///
/// Splits at newlines when possible and falls back to character boundaries
/// for lines that are longer than the limit on their own.
pub fn chunk_text(text: &str, max_size: usize) -> Vec<String> {
    if text.len() <= max_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let line_with_newline = format!("{line}\n");
        if current.len() + line_with_newline.len() > max_size {
            if !current.is_empty() {
                chunks.push(current.trim_end().to_string());
                current = String::new();
            }
            if line_with_newline.len() > max_size {
                chunks.extend(chunk_long_line(line, max_size));
            } else {
                current = line_with_newline;
            }
        } else {
            current.push_str(&line_with_newline);
        }
    }
    if !current.is_empty() {
        chunks.push(current.trim_end().to_string());
    }
    chunks
}

fn chunk_long_line(line: &str, max_size: usize) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();

    for ch in line.chars() {
        if current.len() + ch.len_utf8() > max_size && !current.is_empty() {
            result.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }

    if !current.is_empty() {
        result.push(current);
    }

    result
}

/// Truncate text to `limit` bytes, ending with an ellipsis when shortened
pub fn truncate_to(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit.saturating_sub(3);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Join an optional subject and a body the way single-field channels render it
pub fn with_subject(subject: &str, message: &str) -> String {
    if subject.trim().is_empty() {
        message.to_string()
    } else {
        format!("{}\n{}", subject.trim(), message)
    }
}
