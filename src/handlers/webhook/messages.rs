//! Provider webhook payloads.
//!
//! Only the first entry, change, call and contact are read; everything else
//! in the envelope is ignored.

use serde::Deserialize;
use serde_json::Value;

use crate::core::ingress::{CallEvent, IncomingCall};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WebhookPayload {
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WebhookEntry {
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WebhookChange {
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChangeValue {
    pub calls: Vec<CallPayload>,
    pub contacts: Vec<ContactPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallPayload {
    pub id: Option<String>,
    pub event: Option<String>,
    pub session: Option<CallSessionPayload>,
    /// Seconds; sent as a number or a numeric string.
    pub duration: Option<Value>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallSessionPayload {
    pub sdp_type: Option<String>,
    pub sdp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactPayload {
    pub wa_id: Option<String>,
    pub profile: Option<ContactProfile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ContactProfile {
    pub name: Option<String>,
}

/// Why a payload was acknowledged without being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidEvent {
    NoCall,
    MissingCallId,
    MissingEvent,
    MissingOfferSdp,
}

impl std::fmt::Display for InvalidEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            InvalidEvent::NoCall => "no call in payload",
            InvalidEvent::MissingCallId => "call has no id",
            InvalidEvent::MissingEvent => "call has no event type",
            InvalidEvent::MissingOfferSdp => "connect event has no session SDP",
        };
        f.write_str(reason)
    }
}

impl WebhookPayload {
    /// Extract the call event this payload carries.
    pub fn into_call_event(self) -> Result<CallEvent, InvalidEvent> {
        let value = self
            .entry
            .into_iter()
            .next()
            .and_then(|entry| entry.changes.into_iter().next())
            .map(|change| change.value)
            .ok_or(InvalidEvent::NoCall)?;

        let contact = value.contacts.into_iter().next();
        let call = value.calls.into_iter().next().ok_or(InvalidEvent::NoCall)?;

        let call_id = non_empty(call.id).ok_or(InvalidEvent::MissingCallId)?;
        let event = non_empty(call.event).ok_or(InvalidEvent::MissingEvent)?;

        match event.as_str() {
            "connect" => {
                let sdp = call
                    .session
                    .and_then(|session| non_empty(session.sdp))
                    .ok_or(InvalidEvent::MissingOfferSdp)?;
                let (caller_name, caller_number) = match contact {
                    Some(contact) => (
                        non_empty(contact.profile.and_then(|p| p.name)),
                        non_empty(contact.wa_id),
                    ),
                    None => (None, None),
                };
                Ok(CallEvent::Connect(IncomingCall {
                    call_id,
                    sdp,
                    caller_name,
                    caller_number,
                }))
            }
            "terminate" => Ok(CallEvent::Terminate {
                call_id,
                duration: call.duration.as_ref().and_then(seconds),
                status: non_empty(call.status),
            }),
            _ => Ok(CallEvent::Other { call_id, event }),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn seconds(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(call: Value, contacts: Value) -> WebhookPayload {
        serde_json::from_value(json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA",
                "changes": [{
                    "field": "calls",
                    "value": {
                        "messaging_product": "whatsapp",
                        "contacts": contacts,
                        "calls": [call]
                    }
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_connect_event() {
        let payload = envelope(
            json!({
                "id": "wacid.W1",
                "event": "connect",
                "session": {"sdp_type": "offer", "sdp": "v=0\r\n"}
            }),
            json!([{"wa_id": "15550001111", "profile": {"name": "Ada"}}]),
        );

        assert_eq!(
            payload.into_call_event().unwrap(),
            CallEvent::Connect(IncomingCall {
                call_id: "wacid.W1".into(),
                sdp: "v=0\r\n".into(),
                caller_name: Some("Ada".into()),
                caller_number: Some("15550001111".into()),
            })
        );
    }

    #[test]
    fn test_connect_without_contact() {
        let payload = envelope(
            json!({"id": "W1", "event": "connect", "session": {"sdp": "v=0"}}),
            json!([]),
        );
        match payload.into_call_event().unwrap() {
            CallEvent::Connect(call) => {
                assert!(call.caller_name.is_none());
                assert!(call.caller_number.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_connect_without_sdp() {
        let payload = envelope(json!({"id": "W1", "event": "connect"}), json!([]));
        assert_eq!(
            payload.into_call_event(),
            Err(InvalidEvent::MissingOfferSdp)
        );
    }

    #[test]
    fn test_terminate_event() {
        let payload = envelope(
            json!({"id": "W1", "event": "terminate", "duration": 42, "status": "COMPLETED"}),
            json!([]),
        );
        assert_eq!(
            payload.into_call_event().unwrap(),
            CallEvent::Terminate {
                call_id: "W1".into(),
                duration: Some(42),
                status: Some("COMPLETED".into()),
            }
        );

        let payload = envelope(
            json!({"id": "W1", "event": "terminate", "duration": "17"}),
            json!([]),
        );
        match payload.into_call_event().unwrap() {
            CallEvent::Terminate { duration, status, .. } => {
                assert_eq!(duration, Some(17));
                assert!(status.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_other_event() {
        let payload = envelope(json!({"id": "W1", "event": "ringing"}), json!([]));
        assert_eq!(
            payload.into_call_event().unwrap(),
            CallEvent::Other {
                call_id: "W1".into(),
                event: "ringing".into()
            }
        );
    }

    #[test]
    fn test_invalid_payloads() {
        let empty: WebhookPayload = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.into_call_event(), Err(InvalidEvent::NoCall));

        let payload = envelope(json!({"event": "connect"}), json!([]));
        assert_eq!(payload.into_call_event(), Err(InvalidEvent::MissingCallId));

        let payload = envelope(json!({"id": "W1"}), json!([]));
        assert_eq!(payload.into_call_event(), Err(InvalidEvent::MissingEvent));

        let payload = envelope(json!({"id": "", "event": "connect"}), json!([]));
        assert_eq!(payload.into_call_event(), Err(InvalidEvent::MissingCallId));
    }
}
