//! Core data types for the ETL pipeline
//! Pure data structures with no behavior beyond accessors

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Column set every raw input file must carry, in order.
pub const RAW_COLUMNS: [&str; 30] = [
    "property_id",
    "scrape_timestamp",
    "property_url",
    "category",
    "general_review",
    "general_review_count",
    "comfort_score",
    "value_score",
    "location_score",
    "wifi_score",
    "avg_review_score_all",
    "avg_review_score_all_count",
    "avg_review_score_families",
    "avg_review_score_families_count",
    "avg_review_score_couples",
    "avg_review_score_couples_count",
    "avg_review_score_solo_travelers",
    "avg_review_score_solo_travelers_count",
    "avg_review_score_business_travellers",
    "avg_review_score_business_travellers_count",
    "avg_review_score_groups_friends",
    "avg_review_score_groups_friends_count",
    "min_price",
    "max_price",
    "latitude",
    "longitude",
    "address",
    "zone",
    "city",
    "wifi_speed",
];

/// Number of columns in the cleaned batch (raw set plus `weighted_avg`).
pub const CLEAN_COLUMN_COUNT: usize = RAW_COLUMNS.len() + 1;

/// One scraped listing observation, straight out of a raw CSV.
///
/// `scrape_timestamp` is kept as text because upstream batches mix epoch
/// milliseconds with preformatted ISO strings. Every numeric field is
/// optional until the quality filters have run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawListing {
    pub property_id: Option<String>,
    pub scrape_timestamp: String,
    pub property_url: Option<String>,
    pub category: Option<String>,
    pub general_review: Option<f64>,
    pub general_review_count: Option<f64>,
    pub comfort_score: Option<f64>,
    pub value_score: Option<f64>,
    pub location_score: Option<f64>,
    pub wifi_score: Option<f64>,
    pub avg_review_score_all: Option<f64>,
    pub avg_review_score_all_count: Option<f64>,
    pub avg_review_score_families: Option<f64>,
    pub avg_review_score_families_count: Option<f64>,
    pub avg_review_score_couples: Option<f64>,
    pub avg_review_score_couples_count: Option<f64>,
    pub avg_review_score_solo_travelers: Option<f64>,
    pub avg_review_score_solo_travelers_count: Option<f64>,
    pub avg_review_score_business_travellers: Option<f64>,
    pub avg_review_score_business_travellers_count: Option<f64>,
    pub avg_review_score_groups_friends: Option<f64>,
    pub avg_review_score_groups_friends_count: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub zone: Option<String>,
    pub city: Option<String>,
    pub wifi_speed: Option<String>,
}

impl RawListing {
    /// The five traveler-segment (score, count) pairs that feed the
    /// weighted average.
    pub fn segment_pairs(&self) -> [(Option<f64>, Option<f64>); 5] {
        [
            (
                self.avg_review_score_families,
                self.avg_review_score_families_count,
            ),
            (
                self.avg_review_score_couples,
                self.avg_review_score_couples_count,
            ),
            (
                self.avg_review_score_solo_travelers,
                self.avg_review_score_solo_travelers_count,
            ),
            (
                self.avg_review_score_business_travellers,
                self.avg_review_score_business_travellers_count,
            ),
            (
                self.avg_review_score_groups_friends,
                self.avg_review_score_groups_friends_count,
            ),
        ]
    }

    /// Key for exact-duplicate elimination. Floats compare by bit
    /// pattern so two NaNs in the same column still collapse, matching
    /// how pandas treated the source data.
    pub fn identity_key(&self) -> String {
        fn text(out: &mut String, v: &Option<String>) {
            if let Some(s) = v {
                out.push_str(s);
            }
            out.push('\u{1f}');
        }
        fn real(out: &mut String, v: &Option<f64>) {
            if let Some(x) = v {
                out.push_str(&format!("{:016x}", x.to_bits()));
            }
            out.push('\u{1f}');
        }

        let mut key = String::new();
        text(&mut key, &self.property_id);
        key.push_str(&self.scrape_timestamp);
        key.push('\u{1f}');
        text(&mut key, &self.property_url);
        text(&mut key, &self.category);
        real(&mut key, &self.general_review);
        real(&mut key, &self.general_review_count);
        real(&mut key, &self.comfort_score);
        real(&mut key, &self.value_score);
        real(&mut key, &self.location_score);
        real(&mut key, &self.wifi_score);
        real(&mut key, &self.avg_review_score_all);
        real(&mut key, &self.avg_review_score_all_count);
        for (score, count) in self.segment_pairs() {
            real(&mut key, &score);
            real(&mut key, &count);
        }
        real(&mut key, &self.min_price);
        real(&mut key, &self.max_price);
        real(&mut key, &self.latitude);
        real(&mut key, &self.longitude);
        text(&mut key, &self.address);
        text(&mut key, &self.zone);
        text(&mut key, &self.city);
        text(&mut key, &self.wifi_speed);
        key
    }
}

/// One validated listing observation. Field order is the staged column
/// order: `weighted_avg` sits immediately after `general_review_count`.
///
/// Fields the quality filters guarantee are non-optional here; a row
/// only becomes a `CleanListing` once it has passed every filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanListing {
    pub property_id: Option<String>,
    pub scrape_timestamp: String,
    pub property_url: Option<String>,
    pub category: Option<String>,
    pub general_review: Option<f64>,
    pub general_review_count: Option<f64>,
    pub weighted_avg: f64,
    pub comfort_score: Option<f64>,
    pub value_score: Option<f64>,
    pub location_score: Option<f64>,
    pub wifi_score: Option<f64>,
    pub avg_review_score_all: f64,
    pub avg_review_score_all_count: f64,
    pub avg_review_score_families: f64,
    pub avg_review_score_families_count: f64,
    pub avg_review_score_couples: f64,
    pub avg_review_score_couples_count: f64,
    pub avg_review_score_solo_travelers: f64,
    pub avg_review_score_solo_travelers_count: f64,
    pub avg_review_score_business_travellers: f64,
    pub avg_review_score_business_travellers_count: f64,
    pub avg_review_score_groups_friends: f64,
    pub avg_review_score_groups_friends_count: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub address: Option<String>,
    pub zone: Option<String>,
    pub city: Option<String>,
    pub wifi_speed: Option<String>,
}

/// Fatal input conditions for the transform stage. Everything else is a
/// row-level problem handled by silent exclusion.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("no CSV files found under {dir}")]
    NoInputFiles { dir: PathBuf },

    #[error("schema mismatch in {file}: {detail}")]
    SchemaMismatch { file: PathBuf, detail: String },
}

/// Staged artifacts produced by one transform run.
#[derive(Debug, Clone)]
pub struct StagedBatch {
    pub csv_path: PathBuf,
    pub parquet_path: PathBuf,
    pub rows: usize,
    pub columns: usize,
    /// Column count read back from the Parquet footer, as a sanity
    /// cross-check against `columns`.
    pub parquet_columns: usize,
}

/// Per-filter drop accounting for the quality gate.
#[derive(Debug, Default, Clone)]
pub struct DropCounts {
    pub score_range: usize,
    pub count_positive: usize,
    pub coordinates: usize,
    pub price: usize,
}

impl DropCounts {
    pub fn total(&self) -> usize {
        self.score_range + self.count_positive + self.coordinates + self.price
    }
}

impl std::fmt::Display for DropCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "score range: {}, review counts: {}, coordinates: {}, price: {}",
            self.score_range, self.count_positive, self.coordinates, self.price
        )
    }
}

/// Row counts written by the load stage, per table.
#[derive(Debug, Default, Clone)]
pub struct LoadStats {
    pub staged: u64,
    pub dim_property: u64,
    pub dim_category: u64,
    pub dim_date: u64,
    pub dim_location: u64,
    pub fact_reviews: u64,
}

impl std::fmt::Display for LoadStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "staged: {}, dim_property: {}, dim_category: {}, dim_date: {}, dim_location: {}, fact_reviews: {}",
            self.staged,
            self.dim_property,
            self.dim_category,
            self.dim_date,
            self.dim_location,
            self.fact_reviews
        )
    }
}
