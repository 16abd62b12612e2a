use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Document;

pub const CHAT_SESSIONS: &str = "ChatSessions";
pub const USERS: &str = "Users";

/// Path of the message subcollection owned by a session.
pub fn messages_collection(session_id: &str) -> String {
    format!("{CHAT_SESSIONS}/{session_id}/messages")
}

/// Orders a participant pair so the lexicographically smaller id comes
/// first. Session lookup and session creation both address a two-party
/// conversation through this key, which is what makes `(a, b)` and `(b, a)`
/// land on the same record.
pub fn conversation_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Deterministic document id for a two-party session. Deriving the id from
/// the canonical pair makes concurrent find-or-create converge on a single
/// record instead of racing to insert duplicates.
pub fn conversation_id(a: &str, b: &str) -> String {
    let (user1, user2) = conversation_key(a, b);
    format!("{user1}_{user2}")
}

/// One message inside a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from_user_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Documents without a resolved server timestamp are dropped; the other
    /// fields fall back to empty strings.
    pub fn from_document(doc: &Document) -> Option<Self> {
        let timestamp = doc.timestamp("timestamp")?;
        Some(Self {
            id: doc.id.clone(),
            from_user_id: doc.text("fromUserId").unwrap_or_default().to_string(),
            content: doc.text("content").unwrap_or_default().to_string(),
            timestamp,
        })
    }
}

/// Display metadata for a user, cached from the `Users` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub surname: String,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            name: doc.text("name").unwrap_or("Unknown").to_string(),
            surname: doc.text("surname").unwrap_or_default().to_string(),
            avatar_url: doc.text("profileImageURL").map(str::to_string),
        }
    }

    /// Stand-in for a participant whose profile document does not exist.
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            surname: "User".to_string(),
            avatar_url: None,
        }
    }
}

/// View-facing projection of one session joined with the other
/// participant's profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub other_participant_id: String,
    pub other_name: String,
    pub other_surname: String,
    pub other_avatar_url: Option<String>,
    pub last_message_content: Option<String>,
    pub last_message_timestamp: Option<DateTime<Utc>>,
}

impl SessionSummary {
    /// Builds the projection of a raw session document as seen by
    /// `current_user_id`, with placeholder profile fields. Returns `None`
    /// when the participants field is malformed (not exactly two distinct
    /// ids, or no usable counterpart).
    pub fn from_document(doc: &Document, current_user_id: &str) -> Option<Self> {
        let participants = doc.text_array("participants")?;
        if participants.len() != 2 || participants[0] == participants[1] {
            return None;
        }
        let other = participants.iter().find(|p| p.as_str() != current_user_id)?;
        if other.is_empty() {
            return None;
        }
        Some(Self {
            session_id: doc.id.clone(),
            other_participant_id: other.clone(),
            other_name: "Loading...".to_string(),
            other_surname: String::new(),
            other_avatar_url: None,
            last_message_content: doc.text("lastMessageContent").map(str::to_string),
            last_message_timestamp: doc.timestamp("lastMessageTimestamp"),
        })
    }

    /// Copies the profile fields in, reporting whether anything visible
    /// changed.
    pub fn apply_profile(&mut self, profile: &UserProfile) -> bool {
        if self.other_name == profile.name
            && self.other_surname == profile.surname
            && self.other_avatar_url == profile.avatar_url
        {
            return false;
        }
        self.other_name = profile.name.clone();
        self.other_surname = profile.surname.clone();
        self.other_avatar_url = profile.avatar_url.clone();
        true
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.other_name, self.other_surname)
            .trim()
            .to_string()
    }

    /// List-diffing identity: an entry counts as unchanged while its session
    /// id and last-message timestamp both match, even if other fields differ
    /// transiently.
    pub fn same_entry(&self, other: &Self) -> bool {
        self.session_id == other.session_id
            && self.last_message_timestamp == other.last_message_timestamp
    }
}

impl PartialEq for SessionSummary {
    fn eq(&self, other: &Self) -> bool {
        self.same_entry(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValue;

    fn session_doc(id: &str, participants: Vec<&str>) -> Document {
        let mut doc = Document::new(id);
        doc.fields.insert(
            "participants".to_string(),
            FieldValue::TextArray(participants.into_iter().map(str::to_string).collect()),
        );
        doc
    }

    #[test]
    fn test_conversation_key_is_order_independent() {
        assert_eq!(conversation_key("bob", "alice"), conversation_key("alice", "bob"));
        assert_eq!(conversation_id("bob", "alice"), "alice_bob");
    }

    #[test]
    fn test_summary_skips_malformed_participants() {
        assert!(SessionSummary::from_document(&session_doc("s1", vec!["alice"]), "alice").is_none());
        assert!(
            SessionSummary::from_document(&session_doc("s2", vec!["alice", "alice"]), "alice")
                .is_none()
        );
        assert!(
            SessionSummary::from_document(&session_doc("s3", vec!["alice", ""]), "alice").is_none()
        );

        let summary =
            SessionSummary::from_document(&session_doc("s4", vec!["alice", "bob"]), "alice")
                .unwrap();
        assert_eq!(summary.other_participant_id, "bob");
        assert_eq!(summary.other_name, "Loading...");
    }

    #[test]
    fn test_summary_identity_ignores_profile_fields() {
        let mut a =
            SessionSummary::from_document(&session_doc("s1", vec!["alice", "bob"]), "alice")
                .unwrap();
        let b = a.clone();
        a.apply_profile(&UserProfile {
            name: "Bob".to_string(),
            surname: "Baker".to_string(),
            avatar_url: None,
        });
        assert_eq!(a, b);
        assert_eq!(a.display_name(), "Bob Baker");
    }

    #[test]
    fn test_user_profile_serialization() {
        let profile = UserProfile::unknown();
        let json = serde_json::to_string(&profile).unwrap();
        let restored: UserProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(profile, restored);
    }
}
