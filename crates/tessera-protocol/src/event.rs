//! Classified inbound events.

use std::fmt;

use serde_json::Value;

/// Tag of a [`ClassifiedEvent`]; also the dispatch type on the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Coordinator info before anyone enrolled.
    ManagerInfo,
    /// Enrollment progress.
    EnrollmentStatus,
    /// A device finished enrolling.
    EnrollmentResult,
    /// A signature was added or the signing round ended.
    SignResult,
    /// A PIN check succeeded and returned the device serial.
    PinSerial,
    /// A PIN check failed.
    WrongPin,
    /// Nothing matched.
    Unknown,
}

impl EventKind {
    /// All kinds, in classifier priority order.
    pub const ALL: [Self; 7] = [
        Self::ManagerInfo,
        Self::EnrollmentStatus,
        Self::EnrollmentResult,
        Self::SignResult,
        Self::PinSerial,
        Self::WrongPin,
        Self::Unknown,
    ];

    /// Dispatch type string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManagerInfo => "ManagerInfo",
            Self::EnrollmentStatus => "EnrollmentStatus",
            Self::EnrollmentResult => "EnrollmentResult",
            Self::SignResult => "SignResult",
            Self::PinSerial => "PinSerial",
            Self::WrongPin => "WrongPin",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `ParticipantsEnrolled == 0`.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagerInfo {
    /// Decoded frame.
    pub raw: Value,
}

/// `ParticipantsEnrolled > 0`.
#[derive(Clone, Debug, PartialEq)]
pub struct EnrollmentStatus {
    /// Participants enrolled so far.
    pub participants_enrolled: u64,
    /// Decoded frame.
    pub raw: Value,
}

/// `SUCCESS.ENROLL`.
#[derive(Clone, Debug, PartialEq)]
pub struct EnrollmentResult {
    /// The marker text as received (trimmed).
    pub message: String,
    /// Decoded frame.
    pub raw: Value,
}

/// Signature marker, transaction hash text, or a frame carrying a hash field.
#[derive(Clone, Debug, PartialEq)]
pub struct SignResult {
    /// Message text, when the frame had one.
    pub message: Option<String>,
    /// Transaction hash: a hash field, or the message itself when it is one.
    pub tx_hash: Option<String>,
    /// Decoded frame.
    pub raw: Value,
}

/// A serial number read after a successful PIN check.
#[derive(Clone, Debug, PartialEq)]
pub struct PinSerial {
    /// `SerialNumber`, or the message text when the frame had no serial field.
    pub serial_number: String,
    /// Decoded frame.
    pub raw: Value,
}

/// `ERROR.WRONG_PIN`.
#[derive(Clone, Debug, PartialEq)]
pub struct WrongPin {
    /// Decoded frame.
    pub raw: Value,
}

/// No rule matched.
#[derive(Clone, Debug, PartialEq)]
pub struct Unknown {
    /// Decoded frame.
    pub raw: Value,
}

/// One inbound frame, classified.
#[derive(Clone, Debug, PartialEq)]
pub enum ClassifiedEvent {
    /// See [`ManagerInfo`].
    ManagerInfo(ManagerInfo),
    /// See [`EnrollmentStatus`].
    EnrollmentStatus(EnrollmentStatus),
    /// See [`EnrollmentResult`].
    EnrollmentResult(EnrollmentResult),
    /// See [`SignResult`].
    SignResult(SignResult),
    /// See [`PinSerial`].
    PinSerial(PinSerial),
    /// See [`WrongPin`].
    WrongPin(WrongPin),
    /// See [`Unknown`].
    Unknown(Unknown),
}

impl ClassifiedEvent {
    /// Variant tag.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ManagerInfo(_) => EventKind::ManagerInfo,
            Self::EnrollmentStatus(_) => EventKind::EnrollmentStatus,
            Self::EnrollmentResult(_) => EventKind::EnrollmentResult,
            Self::SignResult(_) => EventKind::SignResult,
            Self::PinSerial(_) => EventKind::PinSerial,
            Self::WrongPin(_) => EventKind::WrongPin,
            Self::Unknown(_) => EventKind::Unknown,
        }
    }

    /// Decoded frame the event was classified from.
    pub fn raw(&self) -> &Value {
        match self {
            Self::ManagerInfo(e) => &e.raw,
            Self::EnrollmentStatus(e) => &e.raw,
            Self::EnrollmentResult(e) => &e.raw,
            Self::SignResult(e) => &e.raw,
            Self::PinSerial(e) => &e.raw,
            Self::WrongPin(e) => &e.raw,
            Self::Unknown(e) => &e.raw,
        }
    }

    /// Consume the event, keeping only the decoded frame.
    pub fn into_raw(self) -> Value {
        match self {
            Self::ManagerInfo(e) => e.raw,
            Self::EnrollmentStatus(e) => e.raw,
            Self::EnrollmentResult(e) => e.raw,
            Self::SignResult(e) => e.raw,
            Self::PinSerial(e) => e.raw,
            Self::WrongPin(e) => e.raw,
            Self::Unknown(e) => e.raw,
        }
    }

    /// `ParticipantsEnrolled` for coordinator frames.
    pub fn participants_enrolled(&self) -> Option<u64> {
        match self {
            Self::ManagerInfo(_) => Some(0),
            Self::EnrollmentStatus(e) => Some(e.participants_enrolled),
            _ => None,
        }
    }

    /// Message text, for variants classified from one.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::EnrollmentResult(e) => Some(&e.message),
            Self::SignResult(e) => e.message.as_deref(),
            _ => crate::frame::message_text(self.raw()),
        }
    }

    /// Transaction hash of a [`SignResult`].
    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            Self::SignResult(e) => e.tx_hash.as_deref(),
            _ => None,
        }
    }

    /// Serial number of a [`PinSerial`].
    pub fn serial_number(&self) -> Option<&str> {
        match self {
            Self::PinSerial(e) => Some(&e.serial_number),
            _ => None,
        }
    }
}
