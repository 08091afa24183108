//! [`Codec`] implementation for the enrollment/signing service.

use serde_json::Value;
use tessera_transport::{Codec, CodecError, Envelope, ErrorBody, Inbound};
use tracing::trace;

use crate::classify::{classify, classify_text};
use crate::encode::encode_envelope;
use crate::event::ClassifiedEvent;
use crate::frame::{normalize, str_field};

/// Legacy encoder outbound, tolerant classifier inbound.
///
/// The dispatch type of an inbound frame is its classified kind. Frames the
/// classifier cannot place but that name their own `type` are dispatched
/// under that type instead. `id`, `replyTo` and `error` on object frames are
/// carried through so envelope-speaking peers still get correlation; a reply
/// that carries a `payload` is classified on that payload alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnrollmentCodec;

impl Codec for EnrollmentCodec {
    type Event = ClassifiedEvent;

    fn encode(&self, envelope: &Envelope) -> Result<String, CodecError> {
        encode_envelope(envelope)
    }

    fn decode(&self, text: &str) -> Result<Inbound<ClassifiedEvent>, CodecError> {
        let raw = normalize(text);
        let id = str_field(&raw, "id").map(str::to_owned);
        let reply_to = str_field(&raw, "replyTo").map(str::to_owned);
        let declared = str_field(&raw, "type").map(str::to_owned);
        let error = raw
            .get("error")
            .filter(|e| !e.is_null())
            .map(error_body);

        let event = match reply_payload(&raw, reply_to.is_some()).cloned() {
            Some(Value::String(text)) => classify_text(&text),
            Some(payload) => classify(payload),
            None => classify(raw),
        };
        let kind = match (&event, declared) {
            (ClassifiedEvent::Unknown(_), Some(declared)) => declared,
            _ => event.kind().as_str().to_owned(),
        };
        trace!(kind = %kind, "classified frame");

        Ok(Inbound {
            kind,
            id,
            reply_to,
            error,
            body: event,
        })
    }
}

fn reply_payload(raw: &Value, is_reply: bool) -> Option<&Value> {
    raw.get("payload").filter(|p| is_reply && !p.is_null())
}

fn error_body(value: &Value) -> ErrorBody {
    match value {
        Value::String(message) => ErrorBody::new(message.clone()),
        other => serde_json::from_value::<ErrorBody>(other.clone())
            .unwrap_or_else(|_| ErrorBody::new(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::event::EventKind;

    #[test]
    fn bare_marker_dispatches_under_classified_kind() {
        let inbound = EnrollmentCodec.decode("SUCCESS.ENROLL").unwrap();
        assert_eq!(inbound.kind, "EnrollmentResult");
        assert_eq!(inbound.body.kind(), EventKind::EnrollmentResult);
        assert!(inbound.id.is_none());
    }

    #[test]
    fn decode_never_fails() {
        for text in ["", "{{{", "[1,2", "\u{0}", "null"] {
            assert!(EnrollmentCodec.decode(text).is_ok(), "{text:?}");
        }
    }

    #[test]
    fn unknown_frame_with_type_uses_declared_type() {
        let inbound = EnrollmentCodec
            .decode(r#"{"type":"Heartbeat","id":"9"}"#)
            .unwrap();
        assert_eq!(inbound.kind, "Heartbeat");
        assert_eq!(inbound.id.as_deref(), Some("9"));
        assert_matches!(inbound.body, ClassifiedEvent::Unknown(_));
    }

    #[test]
    fn classified_kind_beats_declared_type() {
        let inbound = EnrollmentCodec
            .decode(r#"{"type":"Info:REPLY","ParticipantsEnrolled":2}"#)
            .unwrap();
        assert_eq!(inbound.kind, "EnrollmentStatus");
    }

    #[test]
    fn reply_fields_are_carried_through() {
        let inbound = EnrollmentCodec
            .decode(r#"{"type":"Sign:REPLY","replyTo":"5-1","error":{"code":"E","message":"bad"}}"#)
            .unwrap();
        assert_eq!(inbound.reply_to.as_deref(), Some("5-1"));
        let err = inbound.error.unwrap();
        assert_eq!(err.code.as_deref(), Some("E"));
        assert_eq!(err.message, "bad");
    }

    #[test]
    fn reply_is_classified_on_its_payload() {
        let inbound = EnrollmentCodec
            .decode(r#"{"type":"Info:REPLY","replyTo":"5-2","payload":{"ParticipantsEnrolled":3}}"#)
            .unwrap();
        assert_eq!(inbound.kind, "EnrollmentStatus");
        assert_eq!(inbound.body.participants_enrolled(), Some(3));
        assert_eq!(inbound.body.raw(), &json!({"ParticipantsEnrolled": 3}));

        let marker = EnrollmentCodec
            .decode(r#"{"type":"Enrollment:REPLY","replyTo":"5-3","payload":"SUCCESS.ENROLL"}"#)
            .unwrap();
        assert_eq!(marker.body.kind(), EventKind::EnrollmentResult);
    }

    #[test]
    fn payload_outside_a_reply_is_part_of_the_frame() {
        let inbound = EnrollmentCodec
            .decode(r#"{"type":"Status","payload":{"ParticipantsEnrolled":3}}"#)
            .unwrap();
        assert_eq!(inbound.kind, "Status");
        assert_matches!(inbound.body, ClassifiedEvent::Unknown(_));
    }

    #[test]
    fn loose_error_shapes_are_accepted() {
        assert_eq!(error_body(&json!("boom")), ErrorBody::new("boom"));
        assert_eq!(error_body(&json!({"reason": 1})).message, r#"{"reason":1}"#);
    }

    #[test]
    fn encode_uses_legacy_dialect() {
        let text = EnrollmentCodec
            .encode(&Envelope::event("Enrollment", Some(json!({"Device": "A"}))))
            .unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v, json!({"Method": "Enrollment", "Device": "A"}));
    }
}
