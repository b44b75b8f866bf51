use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use relink_core::{Location, OfferDetails, OfferFilter};
use serde::{de::DeserializeOwned, Deserialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::errors::{ServerError, ServerResult};

/// Largest decoded image accepted
const MAX_IMAGE_BYTES: usize = 1_500_000;

const IMAGE_TYPES: [&str; 4] = [
    "data:image/png",
    "data:image/jpeg",
    "data:image/webp",
    "data:image/gif",
];

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct NewOfferSchema {
    #[validate(length(min = 1, max = 120), custom(function = "not_blank"))]
    pub title: String,
    #[validate(length(min = 1, max = 2000), custom(function = "not_blank"))]
    pub description: String,
    /// Slots including the creator's own
    #[validate(range(min = 1))]
    pub capacity: u32,
    #[validate(nested)]
    pub location: LocationSchema,
    /// A base64 `data:image/...` URL
    #[validate(length(max = 2_000_100), custom(function = "image_data_url"))]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LocationSchema {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OfferQuery {
    /// Only offers near this point, as `lat,lng`
    pub near: Option<String>,
    /// Search radius in kilometres, 25 if not given
    pub km: Option<f64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Only messages with a greater id
    pub after: Option<u64>,
}

impl NewOfferSchema {
    pub fn into_details(self) -> OfferDetails {
        OfferDetails {
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            location: Location {
                lat: self.location.lat,
                lng: self.location.lng,
            },
            image: self.image.filter(|i| !i.is_empty()),
        }
    }
}

impl OfferQuery {
    pub fn filter(&self) -> ServerResult<OfferFilter> {
        if self.km.is_some_and(|km| !km.is_finite() || km <= 0.0) {
            return Err(ServerError::InvalidArgument(
                "Radius must be positive".to_string(),
            ));
        }

        let Some(near) = &self.near else {
            return Ok(OfferFilter::default());
        };

        let invalid = || ServerError::InvalidArgument("Invalid near format".to_string());

        let (lat, lng) = near.split_once(',').ok_or_else(invalid)?;
        let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
        let lng: f64 = lng.trim().parse().map_err(|_| invalid())?;

        Ok(OfferFilter::near(Location { lat, lng }, self.km))
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }

    Ok(())
}

fn image_data_url(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }

    let (header, data) = value
        .split_once(',')
        .ok_or_else(|| ValidationError::new("image_not_data_url"))?;

    let mime = header.split(';').next().unwrap_or_default();

    if !IMAGE_TYPES.contains(&mime) {
        return Err(ValidationError::new("image_type"));
    }

    let padding = base64_padding(data).ok_or_else(|| ValidationError::new("image_encoding"))?;

    if data.len() / 4 * 3 - padding > MAX_IMAGE_BYTES {
        return Err(ValidationError::new("image_too_large"));
    }

    Ok(())
}

/// How many `=` a well-formed, non-empty base64 string ends with
fn base64_padding(data: &str) -> Option<usize> {
    let bytes = data.as_bytes();

    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }

    let body = bytes.iter().rposition(|b| *b != b'=').map_or(0, |i| i + 1);
    let padding = bytes.len() - body;

    let is_alphabet = bytes[..body]
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/'));

    (is_alphabet && padding <= 2).then_some(padding)
}

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|e| ServerError::InvalidArgument(e.body_text()))?;

        extracted_json
            .0
            .validate()
            .map_err(|e| ServerError::InvalidArgument(format!("Request body is invalid: {e}")))?;

        Ok(Self(extracted_json.0))
    }
}
