//! Ordered, idempotent schema migrations.
//!
//! Each migration is recorded in `schema_migrations` once applied. Column
//! additions check `pragma_table_info` first, so databases that were patched
//! by hand before this ledger existed converge on the same schema.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashSet;

use crate::errors::Result;

#[derive(Debug, Clone, Copy)]
pub enum Step {
    Sql(&'static str),
    AddColumn {
        table: &'static str,
        column: &'static str,
        definition: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub tag: &'static str,
    pub steps: &'static [Step],
}

const CREATE_LEDGER: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        tag TEXT PRIMARY KEY NOT NULL,
        applied_at TEXT NOT NULL
    )
"#;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        tag: "0001_create_users",
        steps: &[
            Step::Sql(
                r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                location TEXT NOT NULL DEFAULT ''
            )
            "#,
            ),
            Step::AddColumn {
                table: "users",
                column: "location",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
        ],
    },
    Migration {
        tag: "0002_create_cars",
        steps: &[
            Step::Sql(
                r#"
                CREATE TABLE IF NOT EXISTS cars (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    make TEXT NOT NULL,
                    model TEXT NOT NULL,
                    year INTEGER NOT NULL,
                    price INTEGER NOT NULL DEFAULT 0,
                    description TEXT NOT NULL DEFAULT '',
                    phone TEXT NOT NULL DEFAULT '',
                    image_url TEXT,
                    source TEXT NOT NULL DEFAULT 'local',
                    created_at TEXT NOT NULL,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE
                )
                "#,
            ),
            Step::AddColumn {
                table: "cars",
                column: "image_url",
                definition: "TEXT",
            },
            Step::AddColumn {
                table: "cars",
                column: "source",
                definition: "TEXT NOT NULL DEFAULT 'local'",
            },
            Step::AddColumn {
                table: "cars",
                column: "created_at",
                definition: "TEXT",
            },
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_cars_user_id ON cars(user_id)"),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_cars_created_at ON cars(created_at)"),
        ],
    },
    Migration {
        tag: "0003_car_details",
        steps: &[
            Step::AddColumn {
                table: "cars",
                column: "mileage",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::AddColumn {
                table: "cars",
                column: "transmission",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
            Step::AddColumn {
                table: "cars",
                column: "fuel_type",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
            Step::AddColumn {
                table: "cars",
                column: "body_type",
                definition: "TEXT NOT NULL DEFAULT ''",
            },
            Step::AddColumn {
                table: "cars",
                column: "engine_size",
                definition: "REAL NOT NULL DEFAULT 0",
            },
        ],
    },
    Migration {
        tag: "0004_car_engagement",
        steps: &[
            Step::AddColumn {
                table: "cars",
                column: "views",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::AddColumn {
                table: "cars",
                column: "valuation",
                definition: "TEXT",
            },
            Step::AddColumn {
                table: "cars",
                column: "is_promoted",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
        ],
    },
    Migration {
        tag: "0005_user_ai_quota",
        steps: &[
            Step::AddColumn {
                table: "users",
                column: "ai_requests_today",
                definition: "INTEGER NOT NULL DEFAULT 0",
            },
            Step::AddColumn {
                table: "users",
                column: "ai_last_request_date",
                definition: "TEXT",
            },
        ],
    },
    Migration {
        tag: "0006_create_images",
        steps: &[
            Step::Sql(
                r#"
                CREATE TABLE IF NOT EXISTS images (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    car_id INTEGER NOT NULL REFERENCES cars(id) ON DELETE CASCADE,
                    path TEXT NOT NULL
                )
                "#,
            ),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_images_car_id ON images(car_id)"),
        ],
    },
    Migration {
        tag: "0007_create_favorites",
        steps: &[
            Step::Sql(
                r#"
                CREATE TABLE IF NOT EXISTS favorites (
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    car_id INTEGER NOT NULL REFERENCES cars(id) ON DELETE CASCADE,
                    PRIMARY KEY (user_id, car_id)
                )
                "#,
            ),
            Step::Sql("CREATE INDEX IF NOT EXISTS idx_favorites_car_id ON favorites(car_id)"),
        ],
    },
    Migration {
        tag: "0008_backfill_inline_images",
        steps: &[Step::Sql(
            r#"
            INSERT INTO images (car_id, path)
            SELECT c.id, TRIM(c.image_url)
              FROM cars c
             WHERE c.image_url IS NOT NULL
               AND TRIM(c.image_url) != ''
               AND NOT EXISTS (
                   SELECT 1 FROM images i
                    WHERE i.car_id = c.id AND i.path = TRIM(c.image_url)
               )
            "#,
        )],
    },
    Migration {
        tag: "0009_repair_legacy_nulls",
        steps: &[
            Step::Sql(
                r#"
                UPDATE cars
                   SET price = COALESCE(price, 0),
                       mileage = COALESCE(mileage, 0),
                       views = COALESCE(views, 0),
                       engine_size = COALESCE(engine_size, 0),
                       is_promoted = COALESCE(is_promoted, 0),
                       description = COALESCE(description, ''),
                       phone = COALESCE(phone, ''),
                       transmission = COALESCE(transmission, ''),
                       fuel_type = COALESCE(fuel_type, ''),
                       body_type = COALESCE(body_type, ''),
                       source = COALESCE(NULLIF(source, ''), 'local')
                "#,
            ),
            Step::Sql(
                r#"
                UPDATE cars
                   SET created_at = strftime('%Y-%m-%dT%H:%M:%S+00:00', 'now')
                 WHERE created_at IS NULL OR TRIM(created_at) = ''
                "#,
            ),
            Step::Sql(
                r#"
                UPDATE users
                   SET ai_requests_today = COALESCE(ai_requests_today, 0),
                       location = COALESCE(location, '')
                "#,
            ),
        ],
    },
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<Vec<&'static str>> {
    sqlx::query(CREATE_LEDGER).execute(pool).await?;

    let applied: HashSet<String> = sqlx::query_scalar::<_, String>("SELECT tag FROM schema_migrations")
        .fetch_all(pool)
        .await?
        .into_iter()
        .collect();

    let mut newly_applied = Vec::new();
    for migration in MIGRATIONS {
        if applied.contains(migration.tag) {
            continue;
        }

        let mut tx = pool.begin().await?;
        for step in migration.steps {
            apply_step(&mut tx, step).await?;
        }
        sqlx::query("INSERT INTO schema_migrations (tag, applied_at) VALUES (?, ?)")
            .bind(migration.tag)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(tag = migration.tag, "applied migration");
        newly_applied.push(migration.tag);
    }

    Ok(newly_applied)
}

async fn apply_step(conn: &mut SqliteConnection, step: &Step) -> Result<()> {
    match *step {
        Step::Sql(sql) => {
            sqlx::query(sql).execute(&mut *conn).await?;
        }
        Step::AddColumn {
            table,
            column,
            definition,
        } => {
            if column_exists(conn, table, column).await? {
                tracing::debug!(table, column, "column already present");
            } else {
                let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition);
                sqlx::query(&sql).execute(&mut *conn).await?;
            }
        }
    }
    Ok(())
}

pub async fn column_exists(conn: &mut SqliteConnection, table: &str, column: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ? COLLATE NOCASE",
    )
    .bind(table)
    .bind(column)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count > 0)
}
