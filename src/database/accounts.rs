use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};

use super::database::{Database, DatabaseError};
use crate::account::{SubscriptionTier, UserAccount};

const USER_COLUMNS: &str = "id, email, password_hash, subscription, subscription_end_date, \
                            analysis_count, last_reset, created_at";

/// Raw column values; converted to a `UserAccount` outside the connection
/// thread so parse failures surface as `DatabaseError::Corrupt`.
type UserRow = (String, String, String, String, Option<String>, i64, String, String);

fn read_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

fn into_account(row: UserRow) -> Result<UserAccount, DatabaseError> {
    let (id, email, password_hash, tier, expiry, count, last_reset, created_at) = row;
    Ok(UserAccount {
        id,
        email,
        password_hash,
        subscription_tier: tier.parse::<SubscriptionTier>().map_err(DatabaseError::Corrupt)?,
        subscription_expiry: expiry.as_deref().map(parse_time).transpose()?,
        daily_analysis_count: u32::try_from(count).unwrap_or(0),
        last_reset_at: parse_time(&last_reset)?,
        created_at: parse_time(&created_at)?,
    })
}

impl Database {
    /// Inserts a new account. Returns `false` when the email is already taken.
    pub async fn create_user(&self, account: &UserAccount) -> Result<bool, DatabaseError> {
        let account = account.clone();
        let created = self.conn
            .call(move |conn| {
                let exists = conn
                    .query_row("SELECT 1 FROM users WHERE email = ?1", [&account.email], |_| Ok(()))
                    .optional()?
                    .is_some();
                if exists {
                    return Ok(false);
                }

                conn.execute(
                    "INSERT INTO users (id, email, password_hash, subscription, subscription_end_date,
                                        analysis_count, last_reset, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        account.id,
                        account.email,
                        account.password_hash,
                        account.subscription_tier.to_string(),
                        account.subscription_expiry.map(|t| t.to_rfc3339()),
                        account.daily_analysis_count as i64,
                        account.last_reset_at.to_rfc3339(),
                        account.created_at.to_rfc3339(),
                    ],
                )?;
                Ok(true)
            })
            .await?;

        Ok(created)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<UserAccount>, DatabaseError> {
        let email = crate::account::normalize_email(email);
        let row = self.conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                        [&email],
                        read_user_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(into_account).transpose()
    }

    pub async fn find_user_by_id(&self, id: &str) -> Result<Option<UserAccount>, DatabaseError> {
        let id = id.to_string();
        let row = self.conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                        [&id],
                        read_user_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.map(into_account).transpose()
    }

    /// Loads the account, applies `apply` and writes the mutable fields back
    /// inside one connection call. Calls run one at a time on the connection
    /// thread, so two updates to the same account never interleave.
    pub async fn update_user<F, R>(
        &self,
        id: &str,
        apply: F,
    ) -> Result<Option<(UserAccount, R)>, DatabaseError>
    where
        F: FnOnce(&mut UserAccount) -> R + Send + 'static,
        R: Send + 'static,
    {
        let id = id.to_string();
        let updated = self.conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                        [&id],
                        read_user_row,
                    )
                    .optional()?;
                let mut account = match row.map(into_account).transpose() {
                    Ok(Some(account)) => account,
                    Ok(None) => return Ok(Ok(None)),
                    Err(e) => return Ok(Err(e)),
                };

                let outcome = apply(&mut account);
                conn.execute(
                    "UPDATE users
                     SET subscription = ?2, subscription_end_date = ?3, analysis_count = ?4, last_reset = ?5
                     WHERE id = ?1",
                    rusqlite::params![
                        account.id,
                        account.subscription_tier.to_string(),
                        account.subscription_expiry.map(|t| t.to_rfc3339()),
                        account.daily_analysis_count as i64,
                        account.last_reset_at.to_rfc3339(),
                    ],
                )?;
                Ok(Ok(Some((account, outcome))))
            })
            .await?;

        updated
    }

    pub async fn create_session(
        &self,
        token: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let token = token.to_string();
        let user_id = user_id.to_string();
        let created_at = now.to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (token, user_id, created_at) VALUES (?1, ?2, ?3)",
                    [&token, &user_id, &created_at],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    pub async fn session_user_id(&self, token: &str) -> Result<Option<String>, DatabaseError> {
        let token = token.to_string();
        let user_id = self.conn
            .call(move |conn| {
                let user_id = conn
                    .query_row("SELECT user_id FROM sessions WHERE token = ?1", [&token], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?;
                Ok(user_id)
            })
            .await?;

        Ok(user_id)
    }
}
