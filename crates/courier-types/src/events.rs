use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageKind, MessagePayload, MessageStatus};

/// Commands sent FROM client TO server over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Send a direct message to a friend
    SendMessage {
        friend_id: Uuid,
        #[serde(default)]
        kind: MessageKind,
        content: Option<String>,
        media_url: Option<String>,
    },

    /// Acknowledge a received message as delivered or seen
    UpdateMessageStatus {
        message_id: Uuid,
        status: MessageStatus,
    },

    /// Indicate typing in the conversation with a friend
    Typing { friend_id: Uuid },

    /// Indicate typing stopped
    StopTyping { friend_id: Uuid },
}

/// Events sent FROM server TO client over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message addressed to this user was created
    NewMessage(MessagePayload),

    /// Echo of a message this user sent, so multi-tab senders stay in sync
    MessageSent(MessagePayload),

    /// The receiver acknowledged a message this user sent
    MessageStatusUpdate {
        message_id: Uuid,
        status: MessageStatus,
    },

    /// A friend started or stopped typing
    TypingIndicator { friend_id: Uuid, is_typing: bool },

    /// A user came online or went offline
    UserStatus { user_id: Uuid, online: bool },

    /// A command failed; the connection stays open
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_command_wire_names_match_protocol() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"sendMessage","data":{"friend_id":"7f0c0f8e-4dfa-4c6a-9d2e-0b1a2c3d4e5f","content":"hi","media_url":null}}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::SendMessage { kind, content, .. } => {
                assert_eq!(kind, MessageKind::Text); // defaults when omitted
                assert_eq!(content.as_deref(), Some("hi"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn server_event_tag_is_camel_case() {
        let event = ServerEvent::UserStatus {
            user_id: Uuid::nil(),
            online: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "userStatus");
        assert_eq!(json["data"]["online"], true);
    }

    #[test]
    fn status_values_serialize_lowercase() {
        let event = ServerEvent::MessageStatusUpdate {
            message_id: Uuid::nil(),
            status: MessageStatus::Seen,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "messageStatusUpdate");
        assert_eq!(json["data"]["status"], "seen");
    }
}
