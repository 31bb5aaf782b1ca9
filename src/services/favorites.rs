use crate::{
    database::{
        queries::{CarQueries, FavoriteQueries},
        Database,
    },
    errors::{AppError, Result},
    models::ListingSummary,
};

#[derive(Clone)]
pub struct FavoriteService {
    database: Database,
}

impl FavoriteService {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Flips membership of the pair; returns whether the listing is now a
    /// favorite.
    pub async fn toggle(&self, user_id: i64, car_id: i64) -> Result<bool> {
        let mut tx = self.database.begin_immediate().await?;

        if CarQueries::find_by_id(&mut *tx, car_id).await?.is_none() {
            return Err(AppError::NotFound);
        }

        let favorited = if FavoriteQueries::exists(&mut *tx, user_id, car_id).await? {
            FavoriteQueries::delete(&mut *tx, user_id, car_id).await?;
            false
        } else {
            FavoriteQueries::insert(&mut *tx, user_id, car_id).await?;
            true
        };

        tx.commit().await?;
        tracing::debug!(user_id, car_id, favorited, "favorite toggled");
        Ok(favorited)
    }

    pub async fn list(&self, user_id: i64) -> Result<Vec<ListingSummary>> {
        let cars = FavoriteQueries::list_cars_for_user(self.database.pool(), user_id).await?;
        Ok(cars.into_iter().map(ListingSummary::from).collect())
    }
}
