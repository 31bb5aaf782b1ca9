use chrono::{NaiveDate, Utc};

use crate::{
    database::{queries::UserQueries, Database},
    errors::{AppError, Result},
    models::QuotaStatus,
};

/// Per-user daily allowance of AI requests. Days are UTC calendar days.
#[derive(Clone)]
pub struct QuotaManager {
    database: Database,
    daily_limit: i64,
}

impl QuotaManager {
    pub fn new(database: Database, daily_limit: i64) -> Self {
        Self {
            database,
            daily_limit,
        }
    }

    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Spends one request from `today`'s allowance, starting a fresh count
    /// when the last recorded request was on another day.
    pub async fn consume(&self, user_id: i64, today: NaiveDate) -> Result<QuotaStatus> {
        let consumed = UserQueries::try_consume_ai_request(
            self.database.pool(),
            user_id,
            today,
            self.daily_limit,
        )
        .await?;

        if !consumed {
            tracing::info!(user_id, limit = self.daily_limit, "AI quota exhausted");
            return Err(AppError::QuotaExceeded(format!(
                "Daily limit of {} AI requests reached",
                self.daily_limit
            )));
        }

        self.status(user_id, today).await
    }

    pub async fn status(&self, user_id: i64, today: NaiveDate) -> Result<QuotaStatus> {
        let user = UserQueries::find_by_id(self.database.pool(), user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let used = if user.ai_last_request_date == Some(today) {
            user.ai_requests_today
        } else {
            0
        };

        Ok(QuotaStatus {
            used,
            limit: self.daily_limit,
            remaining: (self.daily_limit - used).max(0),
        })
    }
}
