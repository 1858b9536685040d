use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use agora_types::events::RowChange;
use agora_types::models::{Chat, ChatMember, Message, Notification, Profile, TypingSignal};

use crate::Database;
use crate::models::{
    CHAT_COLUMNS, ChatRowCounts, MEMBER_COLUMNS, MESSAGE_COLUMNS, NOTIFICATION_COLUMNS,
    PROFILE_COLUMNS, TYPING_COLUMNS, chat_from_row, format_ts, member_from_row, message_from_row,
    notification_from_row, profile_from_row, typing_from_row, uuid_at,
};

impl Database {
    // -- Profiles --

    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, username, full_name, avatar_url) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    username = excluded.username,
                    full_name = excluded.full_name,
                    avatar_url = excluded.avatar_url",
                params![
                    profile.id.to_string(),
                    profile.username,
                    profile.full_name,
                    profile.avatar_url
                ],
            )?;
            Ok(())
        })
    }

    /// Batch-fetch profiles. Unknown ids are silently absent from the result.
    pub fn get_profiles(&self, ids: &[Uuid]) -> Result<Vec<Profile>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM profiles WHERE id IN ({})",
                PROFILE_COLUMNS,
                placeholders(ids.len())
            );
            query_by_ids(conn, &sql, ids, profile_from_row)
        })
    }

    // -- Chats --

    pub fn get_chat(&self, chat_id: Uuid) -> Result<Option<Chat>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM chats WHERE id = ?1", CHAT_COLUMNS),
                [chat_id.to_string()],
                chat_from_row,
            )
            .optional()
        })
    }

    /// The non-group chat both users belong to, if any.
    pub fn find_direct_chat(&self, user_a: Uuid, user_b: Uuid) -> Result<Option<Chat>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM chats c
                     WHERE c.is_group = 0
                       AND EXISTS (SELECT 1 FROM chat_members m WHERE m.chat_id = c.id AND m.user_id = ?1)
                       AND EXISTS (SELECT 1 FROM chat_members m WHERE m.chat_id = c.id AND m.user_id = ?2)
                       AND c.id NOT IN (SELECT chat_id FROM chat_deletions)
                     ORDER BY c.created_at ASC
                     LIMIT 1",
                    CHAT_COLUMNS
                ),
                params![user_a.to_string(), user_b.to_string()],
                chat_from_row,
            )
            .optional()
        })
    }

    /// Insert a chat and its members in one transaction: either every row
    /// lands or none does. Duplicate member ids are collapsed.
    pub fn create_chat(&self, chat: &Chat, member_ids: &[Uuid]) -> Result<Vec<ChatMember>> {
        let members = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chats (id, is_group, group_name, group_description, group_avatar_url, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    chat.id.to_string(),
                    chat.is_group,
                    chat.group_name,
                    chat.group_description,
                    chat.group_avatar_url,
                    chat.created_by.to_string(),
                    format_ts(&chat.created_at),
                ],
            )?;

            let joined_at = chat.created_at;
            let mut seen = HashSet::new();
            let mut members = Vec::with_capacity(member_ids.len());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO chat_members (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                )?;
                for &user_id in member_ids.iter().filter(|id| seen.insert(**id)) {
                    stmt.execute(params![
                        chat.id.to_string(),
                        user_id.to_string(),
                        format_ts(&joined_at)
                    ])?;
                    members.push(ChatMember {
                        chat_id: chat.id,
                        user_id,
                        joined_at,
                    });
                }
            }

            tx.commit()?;
            Ok(members)
        })?;

        for member in &members {
            self.hub().publish_membership(RowChange::Insert(member.clone()));
        }
        Ok(members)
    }

    /// Chats the user belongs to, newest first. Chats with a deletion in
    /// progress are hidden.
    pub fn chats_for_user(&self, user_id: Uuid) -> Result<Vec<Chat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM chats
                 WHERE id IN (SELECT chat_id FROM chat_members WHERE user_id = ?1)
                   AND id NOT IN (SELECT chat_id FROM chat_deletions)
                 ORDER BY created_at DESC",
                CHAT_COLUMNS
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_members(&self, chat_id: Uuid) -> Result<Vec<ChatMember>> {
        self.members_of_chats(&[chat_id])
    }

    /// Batch-fetch the members of several chats, ordered by join time.
    pub fn members_of_chats(&self, chat_ids: &[Uuid]) -> Result<Vec<ChatMember>> {
        if chat_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM chat_members WHERE chat_id IN ({}) ORDER BY joined_at ASC, rowid ASC",
                MEMBER_COLUMNS,
                placeholders(chat_ids.len())
            );
            query_by_ids(conn, &sql, chat_ids, member_from_row)
        })
    }

    pub fn is_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id.to_string(), user_id.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Add members, ignoring users who already belong to the chat.
    /// Returns only the rows that were actually inserted.
    pub fn add_members(&self, chat_id: Uuid, user_ids: &[Uuid]) -> Result<Vec<ChatMember>> {
        let joined_at = crate::now();
        let added = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut added = Vec::new();
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO chat_members (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                )?;
                for &user_id in user_ids {
                    let inserted = stmt.execute(params![
                        chat_id.to_string(),
                        user_id.to_string(),
                        format_ts(&joined_at)
                    ])?;
                    if inserted == 1 {
                        added.push(ChatMember {
                            chat_id,
                            user_id,
                            joined_at,
                        });
                    }
                }
            }
            tx.commit()?;
            Ok(added)
        })?;

        for member in &added {
            self.hub().publish_membership(RowChange::Insert(member.clone()));
        }
        Ok(added)
    }

    pub fn remove_member(&self, chat_id: Uuid, user_id: Uuid) -> Result<Option<ChatMember>> {
        let removed = self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2 RETURNING {}",
                    MEMBER_COLUMNS
                ),
                params![chat_id.to_string(), user_id.to_string()],
                member_from_row,
            )
            .optional()
        })?;

        if let Some(member) = &removed {
            self.hub().publish_membership(RowChange::Delete(member.clone()));
        }
        Ok(removed)
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, chat_id, user_id, content, file_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.id.to_string(),
                    message.chat_id.to_string(),
                    message.user_id.to_string(),
                    message.content,
                    message.file_url,
                    format_ts(&message.created_at),
                    format_ts(&message.updated_at),
                ],
            )?;
            Ok(())
        })?;

        self.hub().publish_message(RowChange::Insert(message.clone()));
        Ok(())
    }

    /// The newest `limit` messages of a chat, returned oldest first.
    /// Equal timestamps keep insertion order.
    pub fn get_messages(&self, chat_id: Uuid, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {cols} FROM (
                    SELECT rowid AS seq, {cols} FROM messages
                    WHERE chat_id = ?1
                    ORDER BY created_at DESC, rowid DESC
                    LIMIT ?2
                 )
                 ORDER BY created_at ASC, seq ASC",
                cols = MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![chat_id.to_string(), limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_message(&self, message_id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                [message_id.to_string()],
                message_from_row,
            )
            .optional()
        })
    }

    /// Edit a message's content. Scoped to the chat and the author: returns
    /// `None` when the message is not in `chat_id` or belongs to someone else.
    pub fn update_message_content(
        &self,
        chat_id: Uuid,
        message_id: Uuid,
        author_id: Uuid,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        let updated = self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "UPDATE messages SET content = ?1, updated_at = ?2
                     WHERE id = ?3 AND user_id = ?4 AND chat_id = ?5
                     RETURNING {}",
                    MESSAGE_COLUMNS
                ),
                params![
                    content,
                    format_ts(&updated_at),
                    message_id.to_string(),
                    author_id.to_string(),
                    chat_id.to_string()
                ],
                message_from_row,
            )
            .optional()
        })?;

        if let Some(message) = &updated {
            self.hub().publish_message(RowChange::Update(message.clone()));
        }
        Ok(updated)
    }

    /// Delete a message. Scoped to the author like `update_message_content`.
    pub fn delete_message(&self, message_id: Uuid, author_id: Uuid) -> Result<Option<Message>> {
        let deleted = self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "DELETE FROM messages WHERE id = ?1 AND user_id = ?2 RETURNING {}",
                    MESSAGE_COLUMNS
                ),
                params![message_id.to_string(), author_id.to_string()],
                message_from_row,
            )
            .optional()
        })?;

        if let Some(message) = &deleted {
            self.hub().publish_message(RowChange::Delete(message.clone()));
        }
        Ok(deleted)
    }

    pub fn message_file_urls(&self, chat_id: Uuid) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT file_url FROM messages WHERE chat_id = ?1 AND file_url IS NOT NULL",
            )?;
            let urls = stmt
                .query_map([chat_id.to_string()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(urls)
        })
    }

    // -- Typing --

    pub fn insert_typing(&self, signal: &TypingSignal) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO typing_status (id, chat_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    signal.id.to_string(),
                    signal.chat_id.to_string(),
                    signal.user_id.to_string(),
                    format_ts(&signal.created_at),
                ],
            )?;
            Ok(())
        })?;

        self.hub().publish_typing(RowChange::Insert(signal.clone()));
        Ok(())
    }

    pub fn get_typing(&self, chat_id: Uuid) -> Result<Vec<TypingSignal>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM typing_status WHERE chat_id = ?1 ORDER BY created_at ASC",
                TYPING_COLUMNS
            ))?;
            let rows = stmt
                .query_map([chat_id.to_string()], typing_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Remove every typing row created before `cutoff`.
    pub fn purge_typing_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let purged = self.with_conn(|conn| {
            delete_returning(
                conn,
                &format!(
                    "DELETE FROM typing_status WHERE created_at < ?1 RETURNING {}",
                    TYPING_COLUMNS
                ),
                &format_ts(&cutoff),
                typing_from_row,
            )
        })?;

        let count = purged.len();
        for signal in purged {
            self.hub().publish_typing(RowChange::Delete(signal));
        }
        Ok(count)
    }

    // -- Notifications --

    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, sender_id, kind, message, chat_id, post_id, comment_id, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    notification.id.to_string(),
                    notification.user_id.to_string(),
                    notification.sender_id.to_string(),
                    notification.kind.as_str(),
                    notification.message,
                    notification.chat_id.map(|id| id.to_string()),
                    notification.post_id.map(|id| id.to_string()),
                    notification.comment_id.map(|id| id.to_string()),
                    notification.is_read,
                    format_ts(&notification.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// A user's notifications, newest first.
    pub fn notifications_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC",
                NOTIFICATION_COLUMNS
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Chat deletion --
    //
    // Each step is an independent, idempotent call. Callers run them in
    // dependency order: typing, notifications, messages, members, chat.

    pub fn record_deletion(&self, chat_id: Uuid, requested_by: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO chat_deletions (chat_id, requested_by, started_at) VALUES (?1, ?2, ?3)",
                params![
                    chat_id.to_string(),
                    requested_by.to_string(),
                    format_ts(&crate::now())
                ],
            )?;
            Ok(())
        })
    }

    pub fn clear_deletion(&self, chat_id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM chat_deletions WHERE chat_id = ?1",
                [chat_id.to_string()],
            )?;
            Ok(())
        })
    }

    /// Chat ids whose deletion was started by `requested_by` but never finished.
    pub fn pending_deletions(&self, requested_by: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id FROM chat_deletions WHERE requested_by = ?1 ORDER BY started_at ASC",
            )?;
            let ids = stmt
                .query_map([requested_by.to_string()], |row| uuid_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    pub fn delete_typing_for_chat(&self, chat_id: Uuid) -> Result<usize> {
        let deleted = self.with_conn(|conn| {
            delete_returning(
                conn,
                &format!(
                    "DELETE FROM typing_status WHERE chat_id = ?1 RETURNING {}",
                    TYPING_COLUMNS
                ),
                &chat_id.to_string(),
                typing_from_row,
            )
        })?;

        let count = deleted.len();
        for signal in deleted {
            self.hub().publish_typing(RowChange::Delete(signal));
        }
        Ok(count)
    }

    pub fn delete_notifications_for_chat(&self, chat_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM notifications WHERE chat_id = ?1",
                [chat_id.to_string()],
            )?;
            Ok(n)
        })
    }

    pub fn delete_messages_for_chat(&self, chat_id: Uuid) -> Result<usize> {
        let deleted = self.with_conn(|conn| {
            delete_returning(
                conn,
                &format!(
                    "DELETE FROM messages WHERE chat_id = ?1 RETURNING {}",
                    MESSAGE_COLUMNS
                ),
                &chat_id.to_string(),
                message_from_row,
            )
        })?;

        let count = deleted.len();
        for message in deleted {
            self.hub().publish_message(RowChange::Delete(message));
        }
        Ok(count)
    }

    pub fn delete_members_for_chat(&self, chat_id: Uuid) -> Result<usize> {
        let deleted = self.with_conn(|conn| {
            delete_returning(
                conn,
                &format!(
                    "DELETE FROM chat_members WHERE chat_id = ?1 RETURNING {}",
                    MEMBER_COLUMNS
                ),
                &chat_id.to_string(),
                member_from_row,
            )
        })?;

        let count = deleted.len();
        for member in deleted {
            self.hub().publish_membership(RowChange::Delete(member));
        }
        Ok(count)
    }

    /// Returns false when the chat row was already gone.
    pub fn delete_chat_row(&self, chat_id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM chats WHERE id = ?1", [chat_id.to_string()])?;
            Ok(n > 0)
        })
    }

    pub fn count_chat_rows(&self, chat_id: Uuid) -> Result<ChatRowCounts> {
        self.with_conn(|conn| {
            let counts = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM chats WHERE id = ?1),
                    (SELECT COUNT(*) FROM chat_members WHERE chat_id = ?1),
                    (SELECT COUNT(*) FROM messages WHERE chat_id = ?1),
                    (SELECT COUNT(*) FROM typing_status WHERE chat_id = ?1),
                    (SELECT COUNT(*) FROM notifications WHERE chat_id = ?1)",
                [chat_id.to_string()],
                |row| {
                    Ok(ChatRowCounts {
                        chats: row.get::<_, i64>(0)? as usize,
                        members: row.get::<_, i64>(1)? as usize,
                        messages: row.get::<_, i64>(2)? as usize,
                        typing: row.get::<_, i64>(3)? as usize,
                        notifications: row.get::<_, i64>(4)? as usize,
                    })
                },
            )?;
            Ok(counts)
        })
    }
}

/// `?1, ?2, ...` for `count` positional parameters.
fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn query_by_ids<T>(
    conn: &Connection,
    sql: &str,
    ids: &[Uuid],
    map: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let values: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn delete_returning<T>(
    conn: &Connection,
    sql: &str,
    key: &str,
    map: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([key], map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
