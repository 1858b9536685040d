/// Row mapping between SQLite and the agora-types models.
///
/// Ids are stored as hyphenated UUID text, timestamps as fixed-width
/// RFC 3339 with microseconds so that lexical order is chronological order.
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use agora_types::models::{Chat, ChatMember, Message, Notification, Profile, TypingSignal};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Current time at the precision the database keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| s.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

pub(crate) const CHAT_COLUMNS: &str =
    "id, is_group, group_name, group_description, group_avatar_url, created_by, created_at";

pub(crate) fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: uuid_at(row, 0)?,
        is_group: row.get(1)?,
        group_name: row.get(2)?,
        group_description: row.get(3)?,
        group_avatar_url: row.get(4)?,
        created_by: uuid_at(row, 5)?,
        created_at: ts_at(row, 6)?,
    })
}

pub(crate) const MEMBER_COLUMNS: &str = "chat_id, user_id, joined_at";

pub(crate) fn member_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMember> {
    Ok(ChatMember {
        chat_id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        joined_at: ts_at(row, 2)?,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, chat_id, user_id, content, file_url, created_at, updated_at";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        chat_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        content: row.get(3)?,
        file_url: row.get(4)?,
        created_at: ts_at(row, 5)?,
        updated_at: ts_at(row, 6)?,
    })
}

pub(crate) const TYPING_COLUMNS: &str = "id, chat_id, user_id, created_at";

pub(crate) fn typing_from_row(row: &Row<'_>) -> rusqlite::Result<TypingSignal> {
    Ok(TypingSignal {
        id: uuid_at(row, 0)?,
        chat_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        created_at: ts_at(row, 3)?,
    })
}

pub(crate) const NOTIFICATION_COLUMNS: &str =
    "id, user_id, sender_id, kind, message, chat_id, post_id, comment_id, is_read, created_at";

pub(crate) fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(3)?;
    Ok(Notification {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        kind: kind.parse().map_err(|e| conversion_error(3, e))?,
        message: row.get(4)?,
        chat_id: opt_uuid_at(row, 5)?,
        post_id: opt_uuid_at(row, 6)?,
        comment_id: opt_uuid_at(row, 7)?,
        is_read: row.get(8)?,
        created_at: ts_at(row, 9)?,
    })
}

pub(crate) const PROFILE_COLUMNS: &str = "id, username, full_name, avatar_url";

pub(crate) fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: uuid_at(row, 0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        avatar_url: row.get(3)?,
    })
}

/// Rows referencing one chat, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatRowCounts {
    pub chats: usize,
    pub members: usize,
    pub messages: usize,
    pub typing: usize,
    pub notifications: usize,
}

impl ChatRowCounts {
    /// True when nothing in the database references the chat anymore.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
