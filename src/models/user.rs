use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row of the `users` table (soft-deleted rows are never loaded)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing filters and pagination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserQuery {
    /// 1-based
    pub page: i64,
    pub size: i64,
    /// Substring match; empty means no filter
    pub name: String,
    pub email: String,
}

impl UserQuery {
    pub const DEFAULT_PAGE: i64 = 1;
    pub const DEFAULT_SIZE: i64 = 10;

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.size)
    }
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            page: Self::DEFAULT_PAGE,
            size: Self::DEFAULT_SIZE,
            name: String::new(),
            email: String::new(),
        }
    }
}

/// One page of users plus the unpaginated total
#[derive(Debug, Clone, Serialize)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: i64,
    pub page: i64,
    pub size: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset() {
        let query = UserQuery {
            page: 2,
            size: 5,
            ..UserQuery::default()
        };
        assert_eq!(query.offset(), 5);
        assert_eq!(UserQuery::default().offset(), 0);
    }

    #[test]
    fn test_user_serializes_rfc3339_timestamps() {
        let at = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let user = User {
            id: 1,
            name: "alice".to_string(),
            email: "alice@example.com".to_string(),
            created_at: at,
            updated_at: at,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["created_at"], "2024-01-01T00:00:00Z");
        assert_eq!(json["name"], "alice");
    }
}
