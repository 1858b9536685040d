//! Object key layout.
//!
//! Message attachments: `messages/{sender_id}/{unix_millis}-{nonce}-{file_name}`
//! Group avatars:       `group-avatars/{unix_millis}-{nonce}-{file_name}`
//!
//! The nonce is a random v4 UUID, so two uploads never share a key even
//! with the same name in the same millisecond.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const MESSAGES_PREFIX: &str = "messages";
pub const GROUP_AVATARS_PREFIX: &str = "group-avatars";

pub fn message_attachment(sender_id: Uuid, at: DateTime<Utc>, file_name: &str) -> String {
    format!("{}/{}/{}", MESSAGES_PREFIX, sender_id, object_name(at, file_name))
}

pub fn group_avatar(at: DateTime<Utc>, file_name: &str) -> String {
    format!("{}/{}", GROUP_AVATARS_PREFIX, object_name(at, file_name))
}

fn object_name(at: DateTime<Utc>, file_name: &str) -> String {
    format!(
        "{}-{}-{}",
        at.timestamp_millis(),
        Uuid::new_v4().simple(),
        sanitize_file_name(file_name)
    )
}

/// Keep only the last path component and replace anything outside
/// `[A-Za-z0-9._-]` so the name is safe as a single key segment.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn attachment_keys_are_namespaced_by_sender() {
        let sender = Uuid::nil();
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let key = message_attachment(sender, at, "holiday photo.jpg");
        assert!(key.starts_with(&format!("messages/{}/1700000000123-", sender)));
        assert!(key.ends_with("-holiday_photo.jpg"));
    }

    #[test]
    fn avatar_keys_use_the_fixed_prefix() {
        let at = Utc.timestamp_millis_opt(42).unwrap();
        let key = group_avatar(at, "logo.png");
        assert!(key.starts_with("group-avatars/42-"));
        assert!(key.ends_with("-logo.png"));
    }

    #[test]
    fn same_name_in_the_same_millisecond_gets_distinct_keys() {
        let at = Utc.timestamp_millis_opt(42).unwrap();
        assert_ne!(group_avatar(at, "avatar.png"), group_avatar(at, "avatar.png"));

        let sender = Uuid::new_v4();
        assert_ne!(
            message_attachment(sender, at, "a.png"),
            message_attachment(sender, at, "a.png")
        );
    }

    #[test]
    fn sanitize_strips_directories_and_dots() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\tmp\\a b.txt"), "a_b.txt");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name(""), "file");
    }
}
