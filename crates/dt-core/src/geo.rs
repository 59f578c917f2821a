//! Geographic coordinate types and spatial utilities.
//!
//! `GeoPoint` uses `f32` (single-precision) latitude/longitude.  At the
//! equator this gives ~1 m precision, more than sufficient for city-scale
//! simulation while halving memory consumption vs. `f64`.

/// A WGS-84 geographic coordinate stored as single-precision floats.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoPoint {
    pub lat: f32,
    pub lon: f32,
}

impl GeoPoint {
    #[inline]
    pub fn new(lat: f32, lon: f32) -> Self {
        Self { lat, lon }
    }

    /// Haversine great-circle distance in metres.
    ///
    /// Accuracy: ±0.5 % (f32 rounding); suitable for cell sizing and lane
    /// geometry at city scale.
    pub fn distance_m(self, other: GeoPoint) -> f32 {
        const R: f32 = 6_371_000.0; // mean Earth radius, metres

        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();

        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();

        let a = (d_lat * 0.5).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lon * 0.5).sin().powi(2);

        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        R * c
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

// ── BoundingBox ───────────────────────────────────────────────────────────────

/// An axis-aligned lat/lon rectangle.  Bounds are inclusive.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox {
    pub min_lat: f32,
    pub min_lon: f32,
    pub max_lat: f32,
    pub max_lon: f32,
}

impl BoundingBox {
    pub fn new(min_lat: f32, min_lon: f32, max_lat: f32, max_lon: f32) -> Self {
        Self { min_lat, min_lon, max_lat, max_lon }
    }

    /// Smallest box containing every point, or `None` for an empty iterator.
    pub fn from_points<I: IntoIterator<Item = GeoPoint>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = Self::new(first.lat, first.lon, first.lat, first.lon);
        for p in iter {
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.min_lon = bbox.min_lon.min(p.lon);
            bbox.max_lat = bbox.max_lat.max(p.lat);
            bbox.max_lon = bbox.max_lon.max(p.lon);
        }
        Some(bbox)
    }

    #[inline]
    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat
            && p.lon >= self.min_lon && p.lon <= self.max_lon
    }

    /// `true` if the two boxes share any point (touching edges count).
    #[inline]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat && other.min_lat <= self.max_lat
            && self.min_lon <= other.max_lon && other.min_lon <= self.max_lon
    }

    pub fn lat_span(&self) -> f32 {
        self.max_lat - self.min_lat
    }

    pub fn lon_span(&self) -> f32 {
        self.max_lon - self.min_lon
    }

    /// East-west extent in metres, measured along the southern edge.
    pub fn width_m(&self) -> f32 {
        GeoPoint::new(self.min_lat, self.min_lon)
            .distance_m(GeoPoint::new(self.min_lat, self.max_lon))
    }

    /// North-south extent in metres.
    pub fn height_m(&self) -> f32 {
        GeoPoint::new(self.min_lat, self.min_lon)
            .distance_m(GeoPoint::new(self.max_lat, self.min_lon))
    }
}
