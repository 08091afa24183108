//! Ordered classifier for inbound frames.
//!
//! [`RULES`] is applied top to bottom and the first matching rule decides the
//! event kind. Each rule is a plain function over the normalised frame so it
//! can be tested on its own. The classifier keeps no state between frames.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::event::{
    ClassifiedEvent, EnrollmentResult, EnrollmentStatus, EventKind, ManagerInfo, PinSerial,
    SignResult, Unknown, WrongPin,
};
use crate::frame::{
    has_tx_hash_field, message_text, normalize, participants_enrolled, serial_number, tx_hash,
};

/// Status markers the service sends as message text.
pub mod markers {
    /// A device finished enrolling.
    pub const SUCCESS_ENROLL: &str = "SUCCESS.ENROLL";
    /// A signature was added to the transaction.
    pub const SIGNATURE_ADDED: &str = "SUCCESS.SIGNATURE_ADDED";
    /// The signing round completed.
    pub const SIGNATURE_ENDED: &str = "SUCCESS.SIGNATURE_ENDED";
    /// The PIN entered on the device was rejected.
    pub const WRONG_PIN: &str = "ERROR.WRONG_PIN";
}

static TX_HASH_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0x)?[0-9a-fA-F]{64}$").expect("static pattern"));

/// A classifier rule.
pub type Rule = fn(&Value) -> bool;

/// Rules in priority order.
pub const RULES: [(EventKind, Rule); 8] = [
    (EventKind::ManagerInfo, is_manager_info),
    (EventKind::EnrollmentStatus, is_enrollment_status),
    (EventKind::EnrollmentResult, is_enroll_success),
    (EventKind::SignResult, is_signature_marker),
    (EventKind::SignResult, is_tx_hash),
    (EventKind::PinSerial, has_serial_number),
    (EventKind::PinSerial, is_serial_text),
    (EventKind::WrongPin, is_wrong_pin),
];

fn text_is(value: &Value, marker: &str) -> bool {
    message_text(value).is_some_and(|t| t.eq_ignore_ascii_case(marker))
}

fn is_hex_hash(text: &str) -> bool {
    TX_HASH_TEXT.is_match(text)
}

/// `ParticipantsEnrolled == 0`.
pub fn is_manager_info(value: &Value) -> bool {
    participants_enrolled(value) == Some(0)
}

/// `ParticipantsEnrolled > 0`.
pub fn is_enrollment_status(value: &Value) -> bool {
    participants_enrolled(value).is_some_and(|n| n > 0)
}

/// Message text is `SUCCESS.ENROLL`.
pub fn is_enroll_success(value: &Value) -> bool {
    text_is(value, markers::SUCCESS_ENROLL)
}

/// Message text is one of the signature-success markers.
pub fn is_signature_marker(value: &Value) -> bool {
    text_is(value, markers::SIGNATURE_ADDED) || text_is(value, markers::SIGNATURE_ENDED)
}

/// Message text is a 64-hex-digit hash, or a hash field is present.
pub fn is_tx_hash(value: &Value) -> bool {
    message_text(value).is_some_and(is_hex_hash) || has_tx_hash_field(value)
}

/// Non-empty `SerialNumber` field.
pub fn has_serial_number(value: &Value) -> bool {
    serial_number(value).is_some()
}

/// Any other non-empty message text is taken to be a serial number.
pub fn is_serial_text(value: &Value) -> bool {
    let Some(text) = message_text(value).filter(|t| !t.is_empty()) else {
        return false;
    };
    let reserved = [
        markers::WRONG_PIN,
        markers::SIGNATURE_ADDED,
        markers::SIGNATURE_ENDED,
        markers::SUCCESS_ENROLL,
    ];
    !reserved.iter().any(|m| text.eq_ignore_ascii_case(m)) && !is_hex_hash(text)
}

/// Message text is `ERROR.WRONG_PIN`.
pub fn is_wrong_pin(value: &Value) -> bool {
    text_is(value, markers::WRONG_PIN)
}

/// Kind of the first matching rule, or [`EventKind::Unknown`].
pub fn classify_kind(value: &Value) -> EventKind {
    RULES
        .iter()
        .find(|(_, rule)| rule(value))
        .map_or(EventKind::Unknown, |(kind, _)| *kind)
}

/// Classify a normalised frame.
pub fn classify(raw: Value) -> ClassifiedEvent {
    let text = message_text(&raw).map(str::to_owned);
    match classify_kind(&raw) {
        EventKind::ManagerInfo => ClassifiedEvent::ManagerInfo(ManagerInfo { raw }),
        EventKind::EnrollmentStatus => ClassifiedEvent::EnrollmentStatus(EnrollmentStatus {
            participants_enrolled: participants_enrolled(&raw).unwrap_or_default(),
            raw,
        }),
        EventKind::EnrollmentResult => ClassifiedEvent::EnrollmentResult(EnrollmentResult {
            message: text.unwrap_or_default(),
            raw,
        }),
        EventKind::SignResult => {
            let hash = tx_hash(&raw)
                .map(str::to_owned)
                .or_else(|| text.clone().filter(|t| is_hex_hash(t)));
            ClassifiedEvent::SignResult(SignResult {
                message: text,
                tx_hash: hash,
                raw,
            })
        }
        EventKind::PinSerial => ClassifiedEvent::PinSerial(PinSerial {
            serial_number: serial_number(&raw)
                .map(str::to_owned)
                .or(text)
                .unwrap_or_default(),
            raw,
        }),
        EventKind::WrongPin => ClassifiedEvent::WrongPin(WrongPin { raw }),
        EventKind::Unknown => ClassifiedEvent::Unknown(Unknown { raw }),
    }
}

/// Normalise and classify one raw text frame.
pub fn classify_text(text: &str) -> ClassifiedEvent {
    classify(normalize(text))
}
