use std::fmt;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};
use uuid::Uuid;

use super::config::DatabaseSettings;
use crate::primitives::{hash_password, random_hex, verify_password};
use crate::{Error, Result};

/// Bytes of randomness in an email verification token.
const EMAIL_VERIFY_TOKEN_BYTES: usize = 20;

const USER_COLUMNS: &str = "id, email, first_name, last_name, user_type, auth_method, \
                            email_verified, activated_at, created_at, deleted_at";

/// A stored user, without credentials.
#[derive(Clone, Debug, PartialEq, Eq, FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_type: String,
    pub auth_method: Option<String>,
    pub email_verified: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct CredentialRow {
    #[sqlx(flatten)]
    user: UserRecord,
    password: String,
}

/// A stored group.
#[derive(Clone, Debug, PartialEq, Eq, FromRow)]
pub struct GroupRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Access level of a group member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Admin,
    Member,
}

impl Permission {
    /// Value stored in `group_members.permission`.
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Admin => "admin",
            Permission::Member => "member",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of a new account. The password is the plain text to hash.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub user_type: String,
    pub auth_method: Option<String>,
}

/// Fields of a new group.
#[derive(Clone, Debug)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
}

/// Storage access for the service.
///
/// Every operation runs in its own transaction. A transaction that is dropped
/// before `commit` rolls back, so every early return and every cancelled
/// request leaves storage untouched.
#[derive(Clone, Debug)]
pub struct ServerState {
    pool: PgPool,
}

impl ServerState {
    /// Wraps an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens the pool and checks that the database answers.
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await
            .map_err(Error::database("failed to connect to database"))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(Error::database("database ping failed"))?;

        info!(max_connections = settings.max_connections, "database pool ready");
        Ok(Self { pool })
    }

    /// Applies pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("migrations applied");
        Ok(())
    }

    /// Creates a user unless a non-deleted one already holds the email.
    pub async fn create_account(&self, account: NewAccount) -> Result<UserRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Error::database("failed to begin transaction"))?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND deleted_at IS NULL)",
        )
        .bind(&account.email)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::database("failed to look up user"))?;

        if exists {
            return Err(user_exists());
        }

        let verify_token = random_hex(EMAIL_VERIFY_TOKEN_BYTES);
        let password = account.password;
        let hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| Error::PasswordHash(e.to_string()))??;

        let user = sqlx::query_as::<_, UserRecord>(&format!(
            "INSERT INTO users \
                 (id, email, password, first_name, last_name, user_type, auth_method, email_verify_token) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&account.email)
        .bind(&hash)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(&account.user_type)
        .bind(&account.auth_method)
        .bind(&verify_token)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                user_exists()
            } else {
                Error::database("failed to create account")(e)
            }
        })?;

        commit(tx).await?;
        debug!(user_id = %user.id, "account created");
        Ok(user)
    }

    /// Checks credentials and returns the matching user.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Error::database("failed to begin transaction"))?;

        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {USER_COLUMNS}, password FROM users WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::database("failed to login"))?
        .ok_or_else(|| Error::InvalidArgument("user not found".to_string()))?;

        let CredentialRow { user, password: hash } = row;
        let candidate = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_password(&hash, &candidate))
            .await
            .map_err(|e| Error::PasswordHash(e.to_string()))??;

        if !matches {
            return Err(Error::NotFound("email and password don't match".to_string()));
        }

        commit(tx).await?;
        Ok(user)
    }

    /// Loads a non-deleted user.
    pub async fn get_user(&self, user_id: Uuid) -> Result<UserRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Error::database("failed to begin transaction"))?;

        let user = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::database("failed to get user"))?
        .ok_or_else(user_not_found)?;

        commit(tx).await?;
        Ok(user)
    }

    /// Creates a group owned by `owner` together with the owner's admin membership.
    pub async fn create_group(&self, owner: Uuid, group: NewGroup) -> Result<GroupRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Error::database("failed to begin transaction"))?;

        let owner_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND deleted_at IS NULL)",
        )
        .bind(owner)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::database("failed to look up user"))?;

        if !owner_exists {
            return Err(user_not_found());
        }

        let created = sqlx::query_as::<_, GroupRecord>(
            "INSERT INTO groups (id, owner_id, name, description) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, owner_id, name, description, created_at, deleted_at",
        )
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(&group.name)
        .bind(&group.description)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                user_not_found()
            } else {
                Error::database("failed to create group")(e)
            }
        })?;

        sqlx::query("INSERT INTO group_members (group_id, user_id, permission) VALUES ($1, $2, $3)")
            .bind(created.id)
            .bind(owner)
            .bind(Permission::Admin.as_str())
            .execute(&mut *tx)
            .await
            .map_err(Error::database("failed to add group owner"))?;

        commit(tx).await?;
        debug!(group_id = %created.id, owner_id = %owner, "group created");
        Ok(created)
    }

    /// Loads a group through the member's membership.
    ///
    /// A group the user is not a member of is reported exactly like a group
    /// that does not exist.
    pub async fn get_group(&self, member: Uuid, group_id: Uuid) -> Result<GroupRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Error::database("failed to begin transaction"))?;

        let group = sqlx::query_as::<_, GroupRecord>(
            "SELECT g.id, g.owner_id, g.name, g.description, g.created_at, g.deleted_at \
             FROM groups g \
             JOIN group_members m ON m.group_id = g.id \
             WHERE g.id = $1 AND m.user_id = $2 AND g.deleted_at IS NULL",
        )
        .bind(group_id)
        .bind(member)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::database("failed to get group"))?
        .ok_or_else(|| Error::NotFound("group not found".to_string()))?;

        commit(tx).await?;
        Ok(group)
    }

    /// Lists every non-deleted group the user is a member of.
    pub async fn list_groups(&self, member: Uuid) -> Result<Vec<GroupRecord>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(Error::database("failed to begin transaction"))?;

        let groups = sqlx::query_as::<_, GroupRecord>(
            "SELECT g.id, g.owner_id, g.name, g.description, g.created_at, g.deleted_at \
             FROM groups g \
             JOIN group_members m ON m.group_id = g.id \
             WHERE m.user_id = $1 AND g.deleted_at IS NULL",
        )
        .bind(member)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::database("failed to list groups"))?;

        commit(tx).await?;
        Ok(groups)
    }
}

async fn commit(tx: sqlx::Transaction<'_, sqlx::Postgres>) -> Result<()> {
    tx.commit()
        .await
        .map_err(Error::database("failed to commit transaction"))
}

fn user_exists() -> Error {
    Error::AlreadyExists("user already exists".to_string())
}

fn user_not_found() -> Error {
    Error::NotFound("user not found".to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_match_stored_values() {
        assert_eq!(Permission::Admin.as_str(), "admin");
        assert_eq!(Permission::Member.to_string(), "member");
    }

    #[test]
    fn driver_errors_are_not_constraint_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_foreign_key_violation(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn user_columns_exclude_credentials() {
        assert!(!USER_COLUMNS.contains("password"));
        assert!(!USER_COLUMNS.contains("email_verify_token"));
    }
}
