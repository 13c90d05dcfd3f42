//! City lookup for picking the area to screenshot.
//!
//! Uses the public Nominatim search API (no key required) and builds a
//! satellite map link at the zoom level the rooftop model was trained on.

use reqwest::Client;
use serde::Deserialize;

/// Zoom used for every map link, matching the expected image scale.
const MAP_ZOOM: &str = "115m";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Nominatim returns coordinates as strings.
#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

pub struct NominatimClient {
    http: Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new(base_url: &str) -> Result<Self, GeocodeError> {
        let http = Client::builder()
            .user_agent("GeoPV-Solar-Analyzer")
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve a city name to coordinates of the best match.
    pub async fn locate(&self, city: &str) -> Result<Coordinates, GeocodeError> {
        let city = city.trim();
        if city.is_empty() {
            return Err(GeocodeError::EmptyQuery);
        }

        let places: Vec<NominatimPlace> = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[("q", city), ("format", "json"), ("limit", "1")])
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::NotFound(city.to_string()))?;

        let coordinates = parse_place(&place)?;
        tracing::debug!(city, lat = coordinates.lat, lon = coordinates.lon, "City located");
        Ok(coordinates)
    }
}

fn parse_place(place: &NominatimPlace) -> Result<Coordinates, GeocodeError> {
    let lat = place
        .lat
        .parse()
        .map_err(|_| GeocodeError::Malformed(format!("latitude {:?}", place.lat)))?;
    let lon = place
        .lon
        .parse()
        .map_err(|_| GeocodeError::Malformed(format!("longitude {:?}", place.lon)))?;
    Ok(Coordinates { lat, lon })
}

/// Satellite-view map link centred on `coordinates`.
pub fn maps_url(coordinates: Coordinates) -> String {
    format!(
        "https://www.google.com/maps/@{},{},{}/data=!3m1!1e3",
        coordinates.lat, coordinates.lon, MAP_ZOOM
    )
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("Please enter a city name")]
    EmptyQuery,

    #[error("Location \"{0}\" not found. Please try another search term.")]
    NotFound(String),

    #[error("Geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed geocoding response: {0}")]
    Malformed(String),
}
