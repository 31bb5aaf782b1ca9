use chrono::Utc;
use sqlx::SqliteConnection;

use crate::{
    database::{
        queries::{CarQueries, FavoriteQueries, ImageQueries, UserQueries},
        Database,
    },
    errors::{AppError, Result},
    models::{
        Car, DeleteOutcome, ListingDetails, ListingFilter, ListingOwner, ListingSummary,
        NewListing, UpdateListing, UploadedFile,
    },
    services::uploads::UploadService,
    utils::file,
};

#[derive(Clone)]
pub struct ListingService {
    database: Database,
    uploads: UploadService,
    admin_user_id: i64,
}

impl ListingService {
    pub fn new(database: Database, uploads: UploadService, admin_user_id: i64) -> Self {
        Self {
            database,
            uploads,
            admin_user_id,
        }
    }

    fn may_modify(&self, car: &Car, user_id: i64) -> bool {
        car.user_id == user_id || user_id == self.admin_user_id
    }

    /// Writes the photos, then the listing and its image rows in one
    /// transaction. Photos are removed again if the database step fails.
    #[tracing::instrument(skip(self, listing, images), fields(images = images.len()))]
    pub async fn create(
        &self,
        owner_id: i64,
        listing: NewListing,
        images: &[UploadedFile],
    ) -> Result<ListingDetails> {
        listing.validate()?;
        let stored = self.uploads.store_all(images).await?;

        let inserted = async {
            let mut tx = self.database.pool().begin().await?;
            let primary = stored.first().map(|image| image.url.as_str());
            let car = CarQueries::insert(&mut *tx, owner_id, &listing, primary, Utc::now()).await?;
            for image in &stored {
                ImageQueries::insert(&mut *tx, car.id, &image.url).await?;
            }
            tx.commit().await?;
            Ok::<Car, AppError>(car)
        }
        .await;

        let car = match inserted {
            Ok(car) => car,
            Err(e) => {
                self.uploads.remove_quietly(&stored).await;
                return Err(e);
            }
        };

        tracing::info!(car_id = car.id, owner_id, "listing created");
        self.details(car).await
    }

    pub async fn get(&self, id: i64) -> Result<Car> {
        CarQueries::find_by_id(self.database.pool(), id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Detail-page read: counts the view, then returns the full listing.
    pub async fn view(&self, id: i64) -> Result<ListingDetails> {
        if !CarQueries::increment_views(self.database.pool(), id).await? {
            return Err(AppError::NotFound);
        }
        let car = self.get(id).await?;
        self.details(car).await
    }

    pub async fn details(&self, car: Car) -> Result<ListingDetails> {
        let pool = self.database.pool();

        let mut images = ImageQueries::paths_for_car(pool, car.id).await?;
        if images.is_empty() {
            if let Some(legacy) = car.image_url.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                images.push(legacy.to_string());
            }
        }

        let owner = UserQueries::find_by_id(pool, car.user_id)
            .await?
            .map(|user| ListingOwner {
                id: user.id,
                username: user.username,
                location: user.location,
            });
        let favorite_count = FavoriteQueries::count_for_car(pool, car.id).await?;

        Ok(ListingDetails {
            car,
            images,
            owner,
            favorite_count,
        })
    }

    pub async fn list_all(&self, filter: &ListingFilter) -> Result<Vec<ListingSummary>> {
        let cars = CarQueries::list(self.database.pool(), filter).await?;
        Ok(cars.into_iter().map(ListingSummary::from).collect())
    }

    pub async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<ListingSummary>> {
        let cars = CarQueries::list_by_owner(self.database.pool(), owner_id).await?;
        Ok(cars.into_iter().map(ListingSummary::from).collect())
    }

    pub async fn update(&self, id: i64, user_id: i64, changes: UpdateListing) -> Result<Car> {
        let current = self.get(id).await?;
        if !self.may_modify(&current, user_id) {
            return Err(AppError::Forbidden);
        }

        let updated = changes.apply(&current)?;
        CarQueries::update(self.database.pool(), id, &updated)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn set_valuation(&self, id: i64, valuation: &str) -> Result<()> {
        if !CarQueries::set_valuation(self.database.pool(), id, valuation).await? {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    /// Owner or super-admin only; anyone else gets `Refused` and nothing
    /// changes. Files go after the rows are committed.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: i64, user_id: i64) -> Result<DeleteOutcome> {
        let mut tx = self.database.begin_immediate().await?;

        let car = CarQueries::find_by_id(&mut *tx, id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !self.may_modify(&car, user_id) {
            tracing::info!(car_id = id, user_id, "delete refused for non-owner");
            return Ok(DeleteOutcome::Refused);
        }

        let keys = image_keys(&mut tx, &car).await?;
        CarQueries::delete_cascade(&mut tx, id).await?;
        tx.commit().await?;

        let mut files_removed = 0;
        for key in &keys {
            match self.uploads.storage().delete(key).await {
                Ok(true) => files_removed += 1,
                Ok(false) => tracing::debug!(%key, "image file already absent"),
                Err(e) => tracing::warn!(%key, "failed to remove image file: {}", e),
            }
        }

        tracing::info!(car_id = id, user_id, files_removed, "listing deleted");
        Ok(DeleteOutcome::Deleted { files_removed })
    }
}

/// Storage keys of every file a listing owns: its image rows plus the legacy
/// inline path, without duplicates.
pub async fn image_keys(conn: &mut SqliteConnection, car: &Car) -> Result<Vec<String>> {
    let mut paths = ImageQueries::paths_for_car(&mut *conn, car.id).await?;
    if let Some(legacy) = &car.image_url {
        paths.push(legacy.clone());
    }

    let mut keys: Vec<String> = Vec::with_capacity(paths.len());
    for key in paths.iter().filter_map(|path| file::storage_key(path)) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    Ok(keys)
}
