// src/status/line.rs

//! Decoder for dpkg status-fd records
//!
//! Records have the form `channel:package:percent:text`. The text is free
//! form and may contain further colons (conffile prompts carry whole paths),
//! so only the first three colons are significant.

use std::fmt;
use thiserror::Error;

/// Which stream of the status protocol a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChannel {
    /// Regular progress report
    Status,
    /// Package-level failure reported by dpkg
    Error,
    /// Configuration file conflict awaiting a decision
    Conffile,
}

impl StatusChannel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pmstatus" => Some(Self::Status),
            "pmerror" => Some(Self::Error),
            "pmconffile" => Some(Self::Conffile),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "pmstatus",
            Self::Error => "pmerror",
            Self::Conffile => "pmconffile",
        }
    }
}

impl fmt::Display for StatusChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a status record is discarded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusParseError {
    #[error("missing package field in {0:?}")]
    MissingPackage(String),

    #[error("unknown channel {channel:?} in {line:?}")]
    UnknownChannel { channel: String, line: String },
}

/// One decoded status record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub channel: StatusChannel,
    pub package: String,
    /// Overall transaction percentage, 0-100
    pub percent: u8,
    pub text: String,
}

impl StatusLine {
    /// Decode a line with its trailing newline already stripped
    pub fn parse(line: &str) -> Result<Self, StatusParseError> {
        let mut fields = line.splitn(4, ':').map(str::trim);

        let channel = fields.next().unwrap_or_default();
        let package = match fields.next() {
            Some(p) => p,
            None => return Err(StatusParseError::MissingPackage(line.to_string())),
        };
        let percent = parse_percent(fields.next().unwrap_or_default());
        let text = fields.next().unwrap_or_default();

        let channel = StatusChannel::parse(channel).ok_or_else(|| {
            StatusParseError::UnknownChannel {
                channel: channel.to_string(),
                line: line.to_string(),
            }
        })?;

        Ok(Self {
            channel,
            package: package.to_string(),
            percent,
            text: text.to_string(),
        })
    }
}

/// apt reports fractional percentages; anything unreadable counts as 0
fn parse_percent(s: &str) -> u8 {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => v.clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}
