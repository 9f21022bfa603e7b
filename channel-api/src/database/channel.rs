use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A named collection of users owned by a single user.
///
/// The Postgres row is the system of record; the cache holds a derived JSON
/// copy that may be absent or stale.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct Channel {
    /// The unique identifier for the channel. Immutable, never reused.
    pub channel_id: Uuid,
    /// The display name of the channel. Unique by convention only.
    pub name: Option<String>,
    /// Whether the channel is publicly visible.
    pub is_public: bool,
    /// The user that owns the channel.
    pub owner_id: Uuid,
    /// The access grants of the channel. Stored in their own table, loaded
    /// alongside the row.
    #[sqlx(skip)]
    pub users_access: Vec<UserAccess>,
    /// The time the channel was created. Immutable.
    pub created_at: DateTime<Utc>,
    /// The time the channel was last mutated.
    pub updated_at: DateTime<Utc>,
}

/// A per-user access grant, identified by `(channel_id, user_id)` and owned
/// by the channel's lifecycle.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct UserAccess {
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub can_write: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Channel {
        let channel_id = Uuid::new_v4();
        Channel {
            channel_id,
            name: Some("general".to_string()),
            is_public: true,
            owner_id: Uuid::new_v4(),
            users_access: vec![UserAccess {
                channel_id,
                user_id: Uuid::new_v4(),
                is_admin: true,
                can_write: true,
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_wire_format_field_names() {
        let channel = sample();

        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&channel).expect("failed to encode"))
                .expect("failed to decode");

        let object = value.as_object().expect("expected an object");
        for field in [
            "channel_id",
            "name",
            "is_public",
            "owner_id",
            "users_access",
            "created_at",
            "updated_at",
        ] {
            assert!(object.contains_key(field), "missing field {field}");
        }

        let grant = value["users_access"][0]
            .as_object()
            .expect("expected an object");
        for field in ["channel_id", "user_id", "is_admin", "can_write"] {
            assert!(grant.contains_key(field), "missing field {field}");
        }
    }

    #[test]
    fn test_round_trip() {
        let channel = sample();

        let data = serde_json::to_string(&channel).expect("failed to encode");
        let decoded: Channel = serde_json::from_str(&data).expect("failed to decode");

        assert_eq!(channel, decoded);
    }
}
