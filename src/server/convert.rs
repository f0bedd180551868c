//! Storage records to wire messages.
//!
//! Every timestamp leaving the service is truncated to the whole minute.

use chrono::{DateTime, Utc};
use prost_types::Timestamp;

use super::state::{GroupRecord, UserRecord};
use crate::proto;

/// Converts a stored time to a wire timestamp, seconds and nanos zeroed.
pub fn minute_timestamp(at: DateTime<Utc>) -> Timestamp {
    let seconds = at.timestamp();
    Timestamp {
        seconds: seconds - seconds.rem_euclid(60),
        nanos: 0,
    }
}

impl From<UserRecord> for proto::User {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email,
            user_type: user.user_type,
            activated_at: user.activated_at.map(minute_timestamp),
            email_verified: user.email_verified,
            first_name: user.first_name,
            last_name: user.last_name,
            auth_method: user.auth_method,
            created_at: Some(minute_timestamp(user.created_at)),
            deleted_at: user.deleted_at.map(minute_timestamp),
        }
    }
}

impl From<GroupRecord> for proto::Group {
    fn from(group: GroupRecord) -> Self {
        Self {
            id: group.id.to_string(),
            owner_id: group.owner_id.to_string(),
            name: group.name,
            description: group.description,
            created_at: Some(minute_timestamp(group.created_at)),
            deleted_at: group.deleted_at.map(minute_timestamp),
        }
    }
}
