//! Inbound event model.
//!
//! A [`MessageEvent`] is the immutable description of one inbound chat
//! occurrence, parsed from a mirai-api-http push frame. It is constructed
//! once per frame and read-only afterwards; the dispatcher invocation that
//! processes it (and any handler it calls) is its only owner.

use serde_json::Value;

/// Which kind of conversation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKind {
    /// One-on-one chat with a friend.
    Direct,
    /// Group chat.
    Group,
}

impl ConversationKind {
    /// Protocol name for the media upload `type` field.
    pub fn upload_type(&self) -> &'static str {
        match self {
            Self::Direct => "friend",
            Self::Group => "group",
        }
    }
}

/// The conversational party a message (or wait slot) is scoped to.
///
/// Two messages belong to the same party when they come from the same sender
/// in the same conversation. A direct chat and a group chat with the same
/// sender are distinct parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartyKey {
    /// Sender account id.
    pub sender: i64,
    /// Group id for group conversations, `None` for direct chats.
    pub group: Option<i64>,
}

/// One inbound chat message.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Conversation kind.
    pub kind: ConversationKind,
    /// Sender account id.
    pub sender_id: i64,
    /// Sender display name.
    pub sender_name: String,
    /// Group id, present for group messages.
    pub group_id: Option<i64>,
    /// Concatenated plain text, with a leading mention of the bot stripped.
    pub text: String,
    /// Message identifier from the Source element.
    pub message_id: i64,
    /// Arrival timestamp (seconds) from the Source element.
    pub timestamp: i64,
    /// Whether the message mentioned the bot account.
    pub at_bot: bool,
}

impl MessageEvent {
    /// Parses a mirai push payload into a message event.
    ///
    /// Returns `None` for pushes that are not friend or group messages
    /// (notices, requests, meta events); those are not dispatched.
    pub fn from_push(data: &Value, bot_account: i64) -> Option<Self> {
        let kind = match data.get("type")?.as_str()? {
            "FriendMessage" => ConversationKind::Direct,
            "GroupMessage" => ConversationKind::Group,
            _ => return None,
        };

        let sender = data.get("sender")?;
        let sender_id = sender.get("id")?.as_i64()?;
        let sender_name = sender
            .get("memberName")
            .or_else(|| sender.get("nickname"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let group_id = match kind {
            ConversationKind::Group => Some(sender.get("group")?.get("id")?.as_i64()?),
            ConversationKind::Direct => None,
        };

        let chain = data.get("messageChain")?.as_array()?;

        let mut message_id = 0;
        let mut timestamp = 0;
        let mut text = String::new();
        let mut at_bot = false;

        for element in chain {
            match element.get("type").and_then(Value::as_str) {
                Some("Source") => {
                    message_id = element.get("id").and_then(Value::as_i64).unwrap_or(0);
                    timestamp = element.get("time").and_then(Value::as_i64).unwrap_or(0);
                }
                Some("Plain") => {
                    if let Some(t) = element.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some("At") => {
                    if element.get("target").and_then(Value::as_i64) == Some(bot_account) {
                        at_bot = true;
                    }
                }
                _ => {}
            }
        }

        Some(Self {
            kind,
            sender_id,
            sender_name,
            group_id,
            text: text.trim().to_string(),
            message_id,
            timestamp,
            at_bot,
        })
    }

    /// The party key this event belongs to.
    pub fn party(&self) -> PartyKey {
        PartyKey {
            sender: self.sender_id,
            group: self.group_id,
        }
    }

    /// Text with full-width and CJK numerals normalized to ASCII digits.
    ///
    /// Users answer disambiguation prompts with things like `２` or `二`;
    /// reply parsing works on this view.
    pub fn text_digits(&self) -> String {
        self.text
            .chars()
            .map(|c| match c {
                '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
                '〇' | '零' => '0',
                '一' => '1',
                '二' => '2',
                '三' => '3',
                '四' => '4',
                '五' => '5',
                '六' => '6',
                '七' => '7',
                '八' => '8',
                '九' => '9',
                other => other,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BOT: i64 = 900100;

    fn group_push(text: &str) -> Value {
        json!({
            "type": "GroupMessage",
            "sender": {
                "id": 10001,
                "memberName": "doctor",
                "group": { "id": 77001, "name": "lounge" }
            },
            "messageChain": [
                { "type": "Source", "id": 5120, "time": 1700000000 },
                { "type": "At", "target": BOT },
                { "type": "Plain", "text": text }
            ]
        })
    }

    #[test]
    fn parses_group_message() {
        let event = MessageEvent::from_push(&group_push(" 敌人 源石虫 "), BOT).unwrap();
        assert_eq!(event.kind, ConversationKind::Group);
        assert_eq!(event.sender_id, 10001);
        assert_eq!(event.group_id, Some(77001));
        assert_eq!(event.message_id, 5120);
        assert_eq!(event.text, "敌人 源石虫");
        assert!(event.at_bot);
    }

    #[test]
    fn parses_friend_message() {
        let push = json!({
            "type": "FriendMessage",
            "sender": { "id": 10002, "nickname": "doc" },
            "messageChain": [
                { "type": "Source", "id": 1, "time": 2 },
                { "type": "Plain", "text": "hello" }
            ]
        });
        let event = MessageEvent::from_push(&push, BOT).unwrap();
        assert_eq!(event.kind, ConversationKind::Direct);
        assert_eq!(event.group_id, None);
        assert_eq!(event.party(), PartyKey { sender: 10002, group: None });
    }

    #[test]
    fn ignores_non_message_push() {
        let push = json!({ "type": "BotOnlineEvent", "qq": BOT });
        assert!(MessageEvent::from_push(&push, BOT).is_none());
    }

    #[test]
    fn digit_normalization() {
        let mut event = MessageEvent::from_push(&group_push("x"), BOT).unwrap();
        event.text = "第２个或者三".to_string();
        assert_eq!(event.text_digits(), "第2个或者3");
    }
}
