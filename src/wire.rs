//! Wire protocol for the realtime backend.
//!
//! Every frame is a JSON envelope `{ "event": <name>, "data": <payload> }`.
//! Event names follow the server's conventions: chat events are snake_case,
//! the video-call-service events are kebab-case.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message sent from this client to the realtime backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "join_conversation", rename_all = "camelCase")]
    JoinConversation { conversation_id: String },

    #[serde(rename = "leave_conversation", rename_all = "camelCase")]
    LeaveConversation { conversation_id: String },

    #[serde(rename = "send_message", rename_all = "camelCase")]
    SendMessage {
        conversation_id: String,
        content: String,
        #[serde(rename = "type")]
        message_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        media: Option<Value>,
    },

    #[serde(rename = "typing_start", rename_all = "camelCase")]
    TypingStart { conversation_id: String },

    #[serde(rename = "typing_stop", rename_all = "camelCase")]
    TypingStop { conversation_id: String },

    #[serde(rename = "mark_message_read", rename_all = "camelCase")]
    MarkMessageRead {
        conversation_id: String,
        message_id: String,
    },

    #[serde(rename = "join-video-call-service", rename_all = "camelCase")]
    JoinCallService { user_id: String, user_name: String },

    #[serde(rename = "initiate-video-call", rename_all = "camelCase")]
    InitiateCall {
        caller_id: String,
        caller_name: String,
        receiver_id: String,
        receiver_name: String,
        call_id: String,
    },

    #[serde(rename = "accept-video-call", rename_all = "camelCase")]
    AcceptCall {
        call_id: String,
        receiver_id: String,
        receiver_name: String,
        caller_id: String,
    },

    #[serde(rename = "decline-video-call", rename_all = "camelCase")]
    DeclineCall {
        call_id: String,
        receiver_id: String,
        caller_id: String,
    },

    #[serde(rename = "end-video-call", rename_all = "camelCase")]
    EndCall { call_id: String, user_id: String },
}

/// Notification of a new call, delivered to every member of the signaling
/// room. `receiver_id` decides which member should actually ring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallNotification {
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub receiver_id: String,
    pub receiver_name: String,
}

/// A call was accepted by its receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallAnswer {
    pub call_id: String,
    pub receiver_id: String,
    pub receiver_name: String,
    pub caller_id: String,
}

/// A call was declined by its receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallRejection {
    pub call_id: String,
    pub receiver_id: String,
    pub caller_id: String,
}

/// A call was terminated by either participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallTermination {
    pub call_id: String,
    pub user_id: String,
}

/// Typing indicator payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub conversation_id: String,
    pub user_id: String,
}

/// Read receipt payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub conversation_id: String,
    pub message_id: String,
    pub user_id: String,
}

/// Presence change payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub user_id: String,
    pub status: String,
}

/// A WebRTC session description relayed through the signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SdpPayload {
    pub call_id: String,
    pub sdp: String,
}

/// A WebRTC ICE candidate relayed through the signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub call_id: String,
    pub candidate: Value,
}

/// A message received from the realtime backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "new_message")]
    NewMessage(Value),

    #[serde(rename = "message_notification")]
    MessageNotification(Value),

    #[serde(rename = "user_typing")]
    UserTyping(TypingEvent),

    #[serde(rename = "user_stopped_typing")]
    UserStoppedTyping(TypingEvent),

    #[serde(rename = "message_read")]
    MessageRead(ReadReceipt),

    #[serde(rename = "user_status_change")]
    UserStatusChange(PresenceChange),

    #[serde(rename = "message_error")]
    MessageError(Value),

    #[serde(rename = "incoming_call")]
    IncomingCall(CallNotification),

    #[serde(rename = "call_accepted")]
    CallAccepted(CallAnswer),

    #[serde(rename = "call_rejected")]
    CallRejected(CallRejection),

    #[serde(rename = "call_ended")]
    CallEnded(CallTermination),

    #[serde(rename = "call_cancelled")]
    CallCancelled(CallTermination),

    #[serde(rename = "webrtc_offer")]
    WebRtcOffer(SdpPayload),

    #[serde(rename = "webrtc_answer")]
    WebRtcAnswer(SdpPayload),

    #[serde(rename = "webrtc_ice_candidate")]
    WebRtcIceCandidate(IceCandidatePayload),

    #[serde(rename = "call_quality_update")]
    CallQualityUpdate(Value),

    #[serde(rename = "incoming-video-call")]
    VideoCallIncoming(CallNotification),

    #[serde(rename = "video-call-accepted")]
    VideoCallAccepted(CallAnswer),

    #[serde(rename = "video-call-declined")]
    VideoCallDeclined(CallRejection),

    #[serde(rename = "video-call-ended")]
    VideoCallEnded(CallTermination),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_message_envelope_shape() {
        let msg = ClientMessage::InitiateCall {
            caller_id: "U1".into(),
            caller_name: "Alice".into(),
            receiver_id: "U2".into(),
            receiver_name: "Bob".into(),
            call_id: "call_1_abc".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "initiate-video-call",
                "data": {
                    "callerId": "U1",
                    "callerName": "Alice",
                    "receiverId": "U2",
                    "receiverName": "Bob",
                    "callId": "call_1_abc",
                }
            })
        );
    }

    #[test]
    fn send_message_omits_absent_optionals() {
        let msg = ClientMessage::SendMessage {
            conversation_id: "c1".into(),
            content: "hi".into(),
            message_type: "text".into(),
            reply_to: None,
            media: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "send_message",
                "data": { "conversationId": "c1", "content": "hi", "type": "text" }
            })
        );
    }

    #[test]
    fn server_message_parses_kebab_call_events() {
        let frame = r#"{
            "event": "incoming-video-call",
            "data": {
                "callId": "call_17_x9",
                "callerId": "U1",
                "callerName": "Alice",
                "receiverId": "U2",
                "receiverName": "Bob"
            }
        }"#;
        let parsed: ServerMessage = serde_json::from_str(frame).unwrap();
        match parsed {
            ServerMessage::VideoCallIncoming(n) => {
                assert_eq!(n.call_id, "call_17_x9");
                assert_eq!(n.receiver_id, "U2");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn server_message_parses_snake_chat_events() {
        let frame = r#"{
            "event": "message_read",
            "data": { "conversationId": "c1", "messageId": "m1", "userId": "U2" }
        }"#;
        let parsed: ServerMessage = serde_json::from_str(frame).unwrap();
        assert_eq!(
            parsed,
            ServerMessage::MessageRead(ReadReceipt {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
                user_id: "U2".into(),
            })
        );
    }

    #[test]
    fn unknown_event_is_an_error() {
        let frame = r#"{ "event": "totally_new_thing", "data": {} }"#;
        assert!(serde_json::from_str::<ServerMessage>(frame).is_err());
    }
}
