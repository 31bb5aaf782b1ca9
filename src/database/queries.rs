use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, QueryBuilder, Sqlite, SqliteConnection};

use crate::errors::Result;
use crate::models::*;

macro_rules! car_columns {
    () => {
        "id, make, model, year, price, description, phone, image_url, source, created_at, \
         user_id, mileage, transmission, fuel_type, body_type, engine_size, views, valuation, \
         is_promoted"
    };
}

macro_rules! user_columns {
    () => {
        "id, username, email, password_hash, location, ai_requests_today, ai_last_request_date"
    };
}

const NEWEST_FIRST: &str = " ORDER BY julianday(created_at) DESC, id DESC";

pub struct UserQueries;

impl UserQueries {
    pub async fn create<'e, E>(
        executor: E,
        username: &str,
        email: &str,
        password_hash: &str,
        location: &str,
    ) -> Result<User>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let user = sqlx::query_as::<_, User>(concat!(
            "INSERT INTO users (username, email, password_hash, location) VALUES (?, ?, ?, ?) RETURNING ",
            user_columns!()
        ))
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(location)
        .fetch_one(executor)
        .await?;

        Ok(user)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<User>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let user = sqlx::query_as::<_, User>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(user)
    }

    /// Matches either the username or the email, case-insensitively for email.
    pub async fn find_by_login<'e, E>(executor: E, login: &str) -> Result<Option<User>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let user = sqlx::query_as::<_, User>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE username = ?1 OR lower(email) = lower(?1) LIMIT 1"
        ))
        .bind(login)
        .fetch_optional(executor)
        .await?;

        Ok(user)
    }

    pub async fn all<'e, E>(executor: E) -> Result<Vec<User>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let users = sqlx::query_as::<_, User>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users ORDER BY id"
        ))
        .fetch_all(executor)
        .await?;

        Ok(users)
    }

    /// Counts one AI request against `today`'s allowance. Returns false when
    /// the allowance is already spent; the row is left untouched in that case.
    pub async fn try_consume_ai_request<'e, E>(
        executor: E,
        user_id: i64,
        today: NaiveDate,
        daily_limit: i64,
    ) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            UPDATE users
               SET ai_requests_today = CASE
                       WHEN ai_last_request_date = ?1 THEN ai_requests_today + 1
                       ELSE 1
                   END,
                   ai_last_request_date = ?1
             WHERE id = ?2
               AND ?3 > 0
               AND (ai_last_request_date IS NULL
                    OR ai_last_request_date != ?1
                    OR ai_requests_today < ?3)
            "#,
        )
        .bind(today)
        .bind(user_id)
        .bind(daily_limit)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

pub struct CarQueries;

impl CarQueries {
    pub async fn insert<'e, E>(
        executor: E,
        owner_id: i64,
        listing: &NewListing,
        image_url: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<Car>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let car = sqlx::query_as::<_, Car>(concat!(
            r#"
            INSERT INTO cars (
                make, model, year, price, description, phone, image_url, source, created_at,
                user_id, mileage, transmission, fuel_type, body_type, engine_size, views, is_promoted
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0)
            RETURNING "#,
            car_columns!()
        ))
        .bind(&listing.make)
        .bind(&listing.model)
        .bind(listing.year)
        .bind(listing.price)
        .bind(&listing.description)
        .bind(&listing.phone)
        .bind(image_url)
        .bind(DEFAULT_SOURCE)
        .bind(created_at)
        .bind(owner_id)
        .bind(listing.mileage)
        .bind(&listing.transmission)
        .bind(&listing.fuel_type)
        .bind(&listing.body_type)
        .bind(listing.engine_size)
        .fetch_one(executor)
        .await?;

        Ok(car)
    }

    pub async fn find_by_id<'e, E>(executor: E, id: i64) -> Result<Option<Car>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let car = sqlx::query_as::<_, Car>(concat!(
            "SELECT ",
            car_columns!(),
            " FROM cars WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(car)
    }

    pub async fn list<'e, E>(executor: E, filter: &ListingFilter) -> Result<Vec<Car>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(concat!("SELECT ", car_columns!(), " FROM cars WHERE 1 = 1"));

        let text_filters = [
            ("make", &filter.make),
            ("fuel_type", &filter.fuel_type),
            ("body_type", &filter.body_type),
            ("transmission", &filter.transmission),
        ];
        for (column, value) in text_filters {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                builder
                    .push(format!(" AND lower({}) = lower(", column))
                    .push_bind(value.to_string())
                    .push(")");
            }
        }
        if let Some(max_price) = filter.max_price {
            builder.push(" AND price <= ").push_bind(max_price);
        }
        if let Some(min_year) = filter.min_year {
            builder.push(" AND year >= ").push_bind(min_year);
        }

        let (limit, offset) = filter.page();
        builder
            .push(NEWEST_FIRST)
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let cars = builder.build_query_as::<Car>().fetch_all(executor).await?;
        Ok(cars)
    }

    pub async fn list_by_owner<'e, E>(executor: E, owner_id: i64) -> Result<Vec<Car>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let cars = sqlx::query_as::<_, Car>(&format!(
            "SELECT {} FROM cars WHERE user_id = ?{}",
            car_columns!(),
            NEWEST_FIRST
        ))
        .bind(owner_id)
        .fetch_all(executor)
        .await?;

        Ok(cars)
    }

    /// Listings created strictly before `cutoff`, oldest first.
    pub async fn list_created_before<'e, E>(executor: E, cutoff: DateTime<Utc>) -> Result<Vec<Car>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let cars = sqlx::query_as::<_, Car>(concat!(
            "SELECT ",
            car_columns!(),
            " FROM cars WHERE julianday(created_at) < julianday(?) ORDER BY julianday(created_at), id"
        ))
        .bind(cutoff)
        .fetch_all(executor)
        .await?;

        Ok(cars)
    }

    pub async fn update<'e, E>(executor: E, id: i64, listing: &NewListing) -> Result<Option<Car>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let car = sqlx::query_as::<_, Car>(concat!(
            r#"
            UPDATE cars
               SET make = ?, model = ?, year = ?, price = ?, description = ?, phone = ?,
                   mileage = ?, transmission = ?, fuel_type = ?, body_type = ?, engine_size = ?
             WHERE id = ?
            RETURNING "#,
            car_columns!()
        ))
        .bind(&listing.make)
        .bind(&listing.model)
        .bind(listing.year)
        .bind(listing.price)
        .bind(&listing.description)
        .bind(&listing.phone)
        .bind(listing.mileage)
        .bind(&listing.transmission)
        .bind(&listing.fuel_type)
        .bind(&listing.body_type)
        .bind(listing.engine_size)
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(car)
    }

    pub async fn increment_views<'e, E>(executor: E, id: i64) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("UPDATE cars SET views = views + 1 WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_valuation<'e, E>(executor: E, id: i64, valuation: &str) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("UPDATE cars SET valuation = ? WHERE id = ?")
            .bind(valuation)
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Removes a listing with its favorites and image rows. Must run inside a
    /// transaction; returns false if the listing was already gone.
    pub async fn delete_cascade(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
        sqlx::query("DELETE FROM favorites WHERE car_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM images WHERE car_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        let result = sqlx::query("DELETE FROM cars WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn all<'e, E>(executor: E) -> Result<Vec<Car>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let cars = sqlx::query_as::<_, Car>(concat!(
            "SELECT ",
            car_columns!(),
            " FROM cars ORDER BY id"
        ))
        .fetch_all(executor)
        .await?;

        Ok(cars)
    }
}

pub struct ImageQueries;

impl ImageQueries {
    pub async fn insert<'e, E>(executor: E, car_id: i64, path: &str) -> Result<Image>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let image = sqlx::query_as::<_, Image>(
            "INSERT INTO images (car_id, path) VALUES (?, ?) RETURNING id, car_id, path",
        )
        .bind(car_id)
        .bind(path)
        .fetch_one(executor)
        .await?;

        Ok(image)
    }

    pub async fn paths_for_car<'e, E>(executor: E, car_id: i64) -> Result<Vec<String>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let paths = sqlx::query_scalar::<_, String>(
            "SELECT path FROM images WHERE car_id = ? ORDER BY id",
        )
        .bind(car_id)
        .fetch_all(executor)
        .await?;

        Ok(paths)
    }

    pub async fn all<'e, E>(executor: E) -> Result<Vec<Image>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let images = sqlx::query_as::<_, Image>("SELECT id, car_id, path FROM images ORDER BY id")
            .fetch_all(executor)
            .await?;

        Ok(images)
    }
}

pub struct FavoriteQueries;

impl FavoriteQueries {
    pub async fn exists<'e, E>(executor: E, user_id: i64, car_id: i64) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM favorites WHERE user_id = ? AND car_id = ?",
        )
        .bind(user_id)
        .bind(car_id)
        .fetch_optional(executor)
        .await?;

        Ok(found.is_some())
    }

    pub async fn insert<'e, E>(executor: E, user_id: i64, car_id: i64) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("INSERT OR IGNORE INTO favorites (user_id, car_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(car_id)
            .execute(executor)
            .await?;

        Ok(())
    }

    pub async fn delete<'e, E>(executor: E, user_id: i64, car_id: i64) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("DELETE FROM favorites WHERE user_id = ? AND car_id = ?")
            .bind(user_id)
            .bind(car_id)
            .execute(executor)
            .await?;

        Ok(())
    }

    pub async fn count_for_car<'e, E>(executor: E, car_id: i64) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM favorites WHERE car_id = ?")
            .bind(car_id)
            .fetch_one(executor)
            .await?;

        Ok(count)
    }

    /// Most recently favorited first.
    pub async fn list_cars_for_user<'e, E>(executor: E, user_id: i64) -> Result<Vec<Car>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let cars = sqlx::query_as::<_, Car>(
            r#"
            SELECT c.id, c.make, c.model, c.year, c.price, c.description, c.phone, c.image_url,
                   c.source, c.created_at, c.user_id, c.mileage, c.transmission, c.fuel_type,
                   c.body_type, c.engine_size, c.views, c.valuation, c.is_promoted
              FROM favorites f
              JOIN cars c ON c.id = f.car_id
             WHERE f.user_id = ?
             ORDER BY f.rowid DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(executor)
        .await?;

        Ok(cars)
    }

    pub async fn all<'e, E>(executor: E) -> Result<Vec<Favorite>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let favorites = sqlx::query_as::<_, Favorite>(
            "SELECT user_id, car_id FROM favorites ORDER BY user_id, car_id",
        )
        .fetch_all(executor)
        .await?;

        Ok(favorites)
    }
}
