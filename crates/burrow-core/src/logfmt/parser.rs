//! logfmt line parser.
//!
//! Implements tolerant reader pattern: unknown keys are kept as opaque
//! fields, unknown levels are preserved, non-logfmt lines degrade to a
//! bare message instead of failing. The watchdog must never lose a line.

use super::types::{LogEvent, LogLevel};

/// Parse a single line of the agent's `--log=stdout` output.
pub fn parse_line(line: &str) -> LogEvent {
    let pairs = split_pairs(line);

    let mut event = LogEvent {
        line: line.to_string(),
        ..LogEvent::default()
    };

    if pairs.is_empty() {
        event.message = line.trim().to_string();
        return event;
    }

    for (key, value) in pairs {
        match key.as_str() {
            "t" => event.timestamp = Some(value),
            "lvl" => event.level = LogLevel::from(value.as_str()),
            "msg" => event.message = value,
            _ => {
                event.fields.insert(key, value);
            }
        }
    }

    event
}

/// Split a logfmt line into `key=value` pairs.
///
/// Values may be double-quoted with backslash escapes. A token without
/// `=` is ignored; a malformed trailing quote keeps what was read so far.
fn split_pairs(line: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut chars = line.trim().chars().peekable();

    while chars.peek().is_some() {
        // skip separating whitespace
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            key.push(c);
            chars.next();
        }

        if chars.peek() != Some(&'=') {
            // bare token, not logfmt
            continue;
        }
        chars.next(); // consume '='

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next(); // consume opening quote
            while let Some(c) = chars.next() {
                match c {
                    '"' => break,
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    _ => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        if !key.is_empty() {
            pairs.push((key, value));
        }
    }

    pairs
}
