//! `/sync` response handling: wire shapes and message extraction.

use std::collections::HashMap;

use serde::Deserialize;

use omnigate_common::IncomingMessage;

use crate::plugin::CHANNEL;

#[derive(Debug, Deserialize)]
pub(crate) struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Option<Rooms>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Rooms {
    #[serde(default)]
    pub join: HashMap<String, JoinedRoom>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Timeline {
    #[serde(default)]
    pub events: Vec<RoomEvent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoomEvent {
    pub r#type: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub origin_server_ts: Option<i64>,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Pull canonical messages out of one sync response.
///
/// Keeps `m.room.message` events with `msgtype == m.text` and a non-empty
/// body, dropping our own echoes.
pub(crate) fn extract_messages(sync: &SyncResponse, own_user_id: &str) -> Vec<IncomingMessage> {
    let Some(rooms) = &sync.rooms else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (room_id, room) in &rooms.join {
        for event in &room.timeline.events {
            if event.r#type != "m.room.message" {
                continue;
            }
            let Some(sender) = &event.sender else { continue };
            if sender == own_user_id {
                continue;
            }
            if event.content.get("msgtype").and_then(|v| v.as_str()) != Some("m.text") {
                continue;
            }
            let Some(body) = event
                .content
                .get("body")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|b| !b.is_empty())
            else {
                continue;
            };

            let mut msg = IncomingMessage::new(CHANNEL, sender.clone(), body)
                .with_meta("room_id", room_id.clone());
            msg.message_id = event.event_id.clone();
            msg.group_id = Some(room_id.clone());
            msg.timestamp = event.origin_server_ts;
            out.push(msg);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYNC_FIXTURE: &str = r#"{
        "next_batch": "s72595_4483_1934",
        "rooms": {
            "join": {
                "!room1:example.org": {
                    "timeline": {
                        "events": [
                            {"type": "m.room.message", "sender": "@alice:example.org",
                             "event_id": "$e1", "origin_server_ts": 1700000001000,
                             "content": {"msgtype": "m.text", "body": "hi there"}},
                            {"type": "m.room.message", "sender": "@bot:example.org",
                             "event_id": "$e2",
                             "content": {"msgtype": "m.text", "body": "own echo"}},
                            {"type": "m.room.message", "sender": "@alice:example.org",
                             "event_id": "$e3",
                             "content": {"msgtype": "m.image", "body": "cat.png"}},
                            {"type": "m.room.member", "sender": "@carol:example.org",
                             "content": {"membership": "join"}},
                            {"type": "m.room.message", "sender": "@alice:example.org",
                             "event_id": "$e4",
                             "content": {"msgtype": "m.text", "body": "   "}}
                        ]
                    }
                }
            }
        }
    }"#;

    #[test]
    fn extracts_only_foreign_text_events() {
        let sync: SyncResponse = serde_json::from_str(SYNC_FIXTURE).unwrap();
        assert_eq!(sync.next_batch, "s72595_4483_1934");

        let messages = extract_messages(&sync, "@bot:example.org");
        assert_eq!(messages.len(), 1);

        let msg = &messages[0];
        assert_eq!(msg.sender_id, "@alice:example.org");
        assert_eq!(msg.text, "hi there");
        assert_eq!(msg.group_id.as_deref(), Some("!room1:example.org"));
        assert_eq!(msg.message_id.as_deref(), Some("$e1"));
        assert_eq!(msg.timestamp, Some(1_700_000_001_000));
        assert_eq!(
            msg.meta.get("room_id").map(String::as_str),
            Some("!room1:example.org")
        );
    }

    #[test]
    fn empty_sync_yields_nothing() {
        let sync: SyncResponse =
            serde_json::from_str(r#"{"next_batch": "s1"}"#).unwrap();
        assert!(extract_messages(&sync, "@bot:example.org").is_empty());
    }
}
