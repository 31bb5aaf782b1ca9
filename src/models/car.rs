use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::FromRow;
use std::collections::HashMap;

use crate::errors::{AppError, Result};

pub const DEFAULT_SOURCE: &str = "local";

const MIN_YEAR: i32 = 1900;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Car {
    pub id: i64,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: i64,
    pub description: String,
    pub phone: String,
    /// Primary image. Older rows carry their only image here.
    pub image_url: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub user_id: i64,
    pub mileage: i64,
    pub transmission: String,
    pub fuel_type: String,
    pub body_type: String,
    pub engine_size: f64,
    pub views: i64,
    /// Stored as JSON text; served as an object.
    #[serde(serialize_with = "valuation_as_object")]
    pub valuation: Option<String>,
    pub is_promoted: bool,
}

/// Unparseable stored text is served as `null`.
fn valuation_as_object<S: Serializer>(
    valuation: &Option<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    valuation
        .as_deref()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .serialize(serializer)
}

/// Validated fields of a listing about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: i64,
    pub description: String,
    pub phone: String,
    pub mileage: i64,
    pub transmission: String,
    pub fuel_type: String,
    pub body_type: String,
    pub engine_size: f64,
}

impl NewListing {
    /// Build from the text fields of a create-listing form.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let text = |name: &str| {
            fields
                .get(name)
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        let required = |name: &str| {
            let value = text(name);
            if value.is_empty() {
                Err(AppError::Validation(format!("{} is required", name)))
            } else {
                Ok(value)
            }
        };

        let listing = Self {
            make: required("make")?,
            model: required("model")?,
            year: parse_number(&required("year")?, "year")?,
            price: parse_number(&required("price")?, "price")?,
            description: text("description"),
            phone: required("phone")?,
            mileage: optional_number(&text("mileage"), "mileage")?.unwrap_or(0),
            transmission: text("transmission"),
            fuel_type: text("fuel_type"),
            body_type: text("body_type"),
            engine_size: optional_number(&text("engine_size"), "engine_size")?.unwrap_or(0.0),
        };
        listing.validate()?;
        Ok(listing)
    }

    pub fn validate(&self) -> Result<()> {
        validate_year(self.year)?;
        validate_non_negative(self.price, "price")?;
        validate_non_negative(self.mileage, "mileage")?;
        if !(self.engine_size >= 0.0 && self.engine_size.is_finite()) {
            return Err(AppError::Validation("engine_size must not be negative".into()));
        }
        Ok(())
    }
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateListing {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub price: Option<i64>,
    pub description: Option<String>,
    pub phone: Option<String>,
    pub mileage: Option<i64>,
    pub transmission: Option<String>,
    pub fuel_type: Option<String>,
    pub body_type: Option<String>,
    pub engine_size: Option<f64>,
}

impl UpdateListing {
    /// Apply onto `current`, returning the validated result.
    pub fn apply(self, current: &Car) -> Result<NewListing> {
        let keep_required = |value: Option<String>, stored: &str, name: &str| match value {
            Some(v) if v.trim().is_empty() => {
                Err(AppError::Validation(format!("{} is required", name)))
            }
            Some(v) => Ok(v.trim().to_string()),
            None => Ok(stored.to_string()),
        };

        let listing = NewListing {
            make: keep_required(self.make, &current.make, "make")?,
            model: keep_required(self.model, &current.model, "model")?,
            year: self.year.unwrap_or(current.year),
            price: self.price.unwrap_or(current.price),
            description: self
                .description
                .map(|d| d.trim().to_string())
                .unwrap_or_else(|| current.description.clone()),
            phone: keep_required(self.phone, &current.phone, "phone")?,
            mileage: self.mileage.unwrap_or(current.mileage),
            transmission: self.transmission.unwrap_or_else(|| current.transmission.clone()),
            fuel_type: self.fuel_type.unwrap_or_else(|| current.fuel_type.clone()),
            body_type: self.body_type.unwrap_or_else(|| current.body_type.clone()),
            engine_size: self.engine_size.unwrap_or(current.engine_size),
        };
        listing.validate()?;
        Ok(listing)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingFilter {
    pub make: Option<String>,
    pub fuel_type: Option<String>,
    pub body_type: Option<String>,
    pub transmission: Option<String>,
    pub max_price: Option<i64>,
    pub min_year: Option<i32>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            make: None,
            fuel_type: None,
            body_type: None,
            transmission: None,
            max_price: None,
            min_year: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl ListingFilter {
    pub fn page(&self) -> (i64, i64) {
        (self.limit.clamp(1, 200), self.offset.max(0))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingSummary {
    pub id: i64,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: i64,
    pub mileage: i64,
    pub fuel_type: String,
    pub image_url: Option<String>,
    pub views: i64,
    pub is_promoted: bool,
    pub created_at: DateTime<Utc>,
    pub user_id: i64,
}

impl From<Car> for ListingSummary {
    fn from(car: Car) -> Self {
        Self {
            id: car.id,
            make: car.make,
            model: car.model,
            year: car.year,
            price: car.price,
            mileage: car.mileage,
            fuel_type: car.fuel_type,
            image_url: car.image_url,
            views: car.views,
            is_promoted: car.is_promoted,
            created_at: car.created_at,
            user_id: car.user_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingOwner {
    pub id: i64,
    pub username: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingDetails {
    #[serde(flatten)]
    pub car: Car,
    pub images: Vec<String>,
    pub owner: Option<ListingOwner>,
    pub favorite_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted { files_removed: u64 },
    /// Requester is neither owner nor super-admin; nothing changed.
    Refused,
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| AppError::Validation(format!("{} must be a number", name)))
}

fn optional_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<Option<T>> {
    if value.is_empty() {
        return Ok(None);
    }
    parse_number(value, name).map(Some)
}

fn validate_year(year: i32) -> Result<()> {
    let max_year = Utc::now().year() + 1;
    if year < MIN_YEAR || year > max_year {
        return Err(AppError::Validation(format!(
            "year must be between {} and {}",
            MIN_YEAR, max_year
        )));
    }
    Ok(())
}

fn validate_non_negative(value: i64, name: &str) -> Result<()> {
    if value < 0 {
        return Err(AppError::Validation(format!("{} must not be negative", name)));
    }
    Ok(())
}
