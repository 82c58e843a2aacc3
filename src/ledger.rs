//! Reader for the OpenSSL-style `index.txt` revocation ledger.
//!
//! Each line is a set of whitespace separated fields whose first field is the
//! status code. Valid lines keep the serial at index 2 and the subject at
//! index 4; revoked lines carry an extra revocation field first, which moves
//! the serial to index 3 and the subject to index 5.
//!
//! A line that cannot be understood never aborts the scan. Lines with an
//! unknown status code are ignored silently; lines that claim a known status
//! but are missing fields or have a bad serial are skipped, logged and
//! counted in [`LedgerSnapshot::malformed`].
//!
//! The file is reread on every lookup. A rewrite happening during the scan
//! may be observed half way through.
use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, trace, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

const STATUS_VALID: char = 'V';
const STATUS_REVOKED: char = 'R';
const SUBJECT_LABEL: &str = "subject=";

/// Certificate serial number as big-endian bytes without leading zeroes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Serial(Vec<u8>);

impl Serial {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Serial(bytes[start..].to_vec())
    }

    /// Parses hexadecimal text, with or without a `0x` prefix. Odd lengths are accepted.
    pub fn from_hex(text: &str) -> Result<Self, hex::FromHexError> {
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if digits.is_empty() {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let bytes = if digits.len() % 2 == 1 {
            hex::decode(format!("0{digits}"))?
        } else {
            hex::decode(digits)?
        };
        Ok(Serial::from_bytes(&bytes))
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "0x00")
        } else {
            write!(f, "0x{}", hex::encode_upper(&self.0))
        }
    }
}

/// CRL reason names as OpenSSL writes them after the revocation date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationReason {
    #[default]
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    fn from_ledger(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "keycompromise" | "key_compromise" => RevocationReason::KeyCompromise,
            "cacompromise" | "ca_compromise" => RevocationReason::CaCompromise,
            "affiliationchanged" | "affiliation_changed" => RevocationReason::AffiliationChanged,
            "superseded" => RevocationReason::Superseded,
            "cessationofoperation" | "cessation_of_operation" => {
                RevocationReason::CessationOfOperation
            }
            "certificatehold" | "certificate_hold" => RevocationReason::CertificateHold,
            "privilegewithdrawn" | "privilege_withdrawn" => RevocationReason::PrivilegeWithdrawn,
            "aacompromise" | "aa_compromise" => RevocationReason::AaCompromise,
            _ => RevocationReason::Unspecified,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CertificateStatus {
    Valid,
    Revoked {
        revoked_at: Option<DateTime<Utc>>,
        reason: RevocationReason,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertificateStatusEntry {
    pub status: CertificateStatus,
    pub serial: Serial,
    pub subject: String,
}

#[derive(Debug, PartialEq)]
enum ParsedLine {
    Entry(CertificateStatusEntry),
    Ignored,
    Malformed(String),
}

fn parse_line(line: &str) -> ParsedLine {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let Some(code) = fields.first().and_then(|f| f.chars().next()) else {
        return ParsedLine::Ignored;
    };
    let (serial_at, subject_at) = match code {
        STATUS_VALID => (2, 4),
        STATUS_REVOKED => (3, 5),
        _ => return ParsedLine::Ignored,
    };
    if fields.len() <= subject_at {
        return ParsedLine::Malformed(format!(
            "expected {} fields for status {code}, found {}",
            subject_at + 1,
            fields.len()
        ));
    }
    let serial = match Serial::from_hex(fields[serial_at]) {
        Ok(serial) => serial,
        Err(e) => {
            return ParsedLine::Malformed(format!("bad serial {:?}: {e}", fields[serial_at]));
        }
    };
    let subject = fields[subject_at];
    let subject = subject.strip_prefix(SUBJECT_LABEL).unwrap_or(subject).to_string();
    let status = if code == STATUS_REVOKED {
        let (revoked_at, reason) = parse_revocation(fields[2]);
        CertificateStatus::Revoked { revoked_at, reason }
    } else {
        CertificateStatus::Valid
    };
    ParsedLine::Entry(CertificateStatusEntry {
        status,
        serial,
        subject,
    })
}

/// Splits `YYMMDDHHMMSSZ[,reason]`. A date that cannot be read is left out
/// rather than rejecting the line, the revoked status still stands.
fn parse_revocation(field: &str) -> (Option<DateTime<Utc>>, RevocationReason) {
    let (date, reason) = match field.split_once(',') {
        Some((date, reason)) => (date, RevocationReason::from_ledger(reason)),
        None => (field, RevocationReason::Unspecified),
    };
    let full = match date.len() {
        13 => match date.get(..2).and_then(|year| year.parse::<u8>().ok()) {
            Some(year) if year >= 50 => format!("19{date}"),
            Some(_) => format!("20{date}"),
            None => String::new(),
        },
        _ => date.to_string(),
    };
    let revoked_at = match NaiveDateTime::parse_from_str(&full, "%Y%m%d%H%M%SZ") {
        Ok(time) => Some(time.and_utc()),
        Err(e) => {
            debug!("Ignoring unreadable revocation date {date:?}: {e}");
            None
        }
    };
    (revoked_at, reason)
}

/// Every understood entry of one pass over the ledger.
#[derive(Debug, Default)]
pub struct LedgerSnapshot {
    pub entries: Vec<CertificateStatusEntry>,
    pub malformed: usize,
}

impl LedgerSnapshot {
    #[cfg(test)]
    pub fn parse(content: &str) -> Self {
        let mut snapshot = LedgerSnapshot::default();
        for (number, line) in content.lines().enumerate() {
            snapshot.push_line(number + 1, line);
        }
        snapshot
    }

    fn push_line(&mut self, number: usize, line: &str) {
        match parse_line(line) {
            ParsedLine::Entry(entry) => self.entries.push(entry),
            ParsedLine::Ignored => trace!("Ignoring ledger line {number}"),
            ParsedLine::Malformed(reason) => {
                warn!("Skipping malformed ledger line {number}: {reason}");
                self.malformed += 1;
            }
        }
    }

    /// First entry carrying `serial`.
    pub fn resolve(&self, serial: &Serial) -> Result<&CertificateStatusEntry, LedgerError> {
        self.entries
            .iter()
            .find(|entry| &entry.serial == serial)
            .ok_or_else(|| LedgerError::NotFound(serial.clone()))
    }
}

#[async_trait]
pub trait StatusLedger: Send + Sync {
    /// One full pass over the ledger. Lookups for a request are answered from it.
    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError>;
}

/// Ledger backed by an index file on disk.
pub struct IndexLedger {
    path: PathBuf,
}

impl IndexLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        IndexLedger { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn unreadable(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Unreadable {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl StatusLedger for IndexLedger {
    async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| self.unreadable(e))?;
        let mut lines = BufReader::new(file).split(b'\n');
        let mut snapshot = LedgerSnapshot::default();
        let mut number = 0;
        while let Some(raw) = lines.next_segment().await.map_err(|e| self.unreadable(e))? {
            number += 1;
            match std::str::from_utf8(&raw) {
                Ok(line) => snapshot.push_line(number, line),
                Err(e) => {
                    warn!("Skipping malformed ledger line {number}: {e}");
                    snapshot.malformed += 1;
                }
            }
        }
        if snapshot.malformed > 0 {
            warn!(
                "Ledger {} has {} malformed line(s)",
                self.path.display(),
                snapshot.malformed
            );
        }
        debug!(
            "Scanned {} entries from {}",
            snapshot.entries.len(),
            self.path.display()
        );
        Ok(snapshot)
    }
}
