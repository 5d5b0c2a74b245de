//! Cleaning, derivation and validation of raw listing batches
//!
//! Stage order matters: dedup and normalization run on the raw rows,
//! the quality filters turn survivors into `CleanListing`s, and zone
//! backfill runs last, on validated rows only.

use crate::etl::types::{CleanListing, DropCounts, RawListing, StagedBatch};
use crate::etl::{parse, stage, utils};
use anyhow::Result;
use chrono::{SecondsFormat, TimeZone, Utc};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Run the full Normalizer/Cleaner over every raw CSV under `raw_dir`
/// and persist the validated batch under `staging_dir`.
pub fn transform(raw_dir: &Path, staging_dir: &Path) -> Result<StagedBatch> {
    let rows = parse::read_raw_dir(raw_dir)?;

    let before = rows.len();
    let mut rows = dedup_exact(rows);
    if rows.len() < before {
        info!("Dropped {} exact-duplicate rows", before - rows.len());
    }

    for row in &mut rows {
        row.scrape_timestamp = normalize_timestamp(&row.scrape_timestamp);
        correct_city(row);
    }

    // Advisory diagnostic only: the segment totals are known to drift
    // from avg_review_score_all_count upstream, and no row is dropped
    // for it.
    let mismatches = count_consistency_mismatches(&rows);
    debug!(
        "Review-count consistency: {} of {} rows disagree with their segment totals",
        mismatches,
        rows.len()
    );

    let mut drops = DropCounts::default();
    let mut cleaned: Vec<CleanListing> = rows
        .iter()
        .filter_map(|row| validate(row, &mut drops))
        .collect();
    info!(
        "Quality filters dropped {} rows ({})",
        drops.total(),
        drops
    );

    let mut backfilled = 0;
    for row in &mut cleaned {
        if fill_missing_zone(row) {
            backfilled += 1;
        }
    }
    debug!("Backfilled zone from address text for {} rows", backfilled);

    let batch = stage::persist(&cleaned, staging_dir)?;
    info!(
        "Transformation complete: {} rows, {} columns (parquet reports {})",
        batch.rows, batch.columns, batch.parquet_columns
    );

    Ok(batch)
}

/// Collapse rows identical across all columns to their first occurrence.
pub fn dedup_exact(rows: Vec<RawListing>) -> Vec<RawListing> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row.identity_key()))
        .collect()
}

/// Normalize a scrape timestamp to ISO-8601 text.
///
/// Numeric input is Unix epoch milliseconds (UTC); anything else is
/// assumed to be preformatted and passes through unchanged. Mixed
/// representations inside one batch are expected.
pub fn normalize_timestamp(ts: &str) -> String {
    let trimmed = ts.trim();

    if let Ok(ms) = trimmed.parse::<i64>() {
        if let Some(dt) = Utc.timestamp_millis_opt(ms).single() {
            return dt.to_rfc3339_opts(SecondsFormat::AutoSi, false);
        }
    }

    // Some feeds render the epoch as a float.
    if let Ok(ms) = trimmed.parse::<f64>() {
        if ms.is_finite() {
            if let Some(dt) = Utc.timestamp_millis_opt(ms as i64).single() {
                return dt.to_rfc3339_opts(SecondsFormat::AutoSi, false);
            }
        }
    }

    ts.to_string()
}

/// Overwrite the city column when the address text names one of the
/// covered cities (OSM sometimes assigns a nearby village instead).
pub fn correct_city(row: &mut RawListing) {
    if let Some(address) = row.address.as_deref() {
        if let Some(city) = utils::corrected_city(address) {
            row.city = Some(city.to_string());
        }
    }
}

/// Count-weighted average of the five traveler-segment review scores.
///
/// `None` when any segment value is missing; an all-zero count sum
/// divides to NaN, which the quality filters retire later.
pub fn weighted_average(row: &RawListing) -> Option<f64> {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (score, count) in row.segment_pairs() {
        numerator += score? * count?;
        denominator += count?;
    }
    Some(numerator / denominator)
}

/// Rows whose segment-count sum disagrees with the reported total.
/// Purely observational: nothing is dropped or flagged downstream.
pub fn count_consistency_mismatches(rows: &[RawListing]) -> usize {
    rows.iter()
        .filter(|row| {
            let mut sum = 0.0;
            for (_, count) in row.segment_pairs() {
                match count {
                    Some(c) => sum += c,
                    None => return false,
                }
            }
            match row.avg_review_score_all_count {
                Some(total) => sum != total,
                None => false,
            }
        })
        .count()
}

/// Quality gate: a row passing every filter becomes a `CleanListing`;
/// anything else is silently excluded, with the failing filter tallied.
/// A missing value fails the filter that needs it.
pub fn validate(row: &RawListing, drops: &mut DropCounts) -> Option<CleanListing> {
    let scores = [
        row.avg_review_score_all,
        row.avg_review_score_families,
        row.avg_review_score_couples,
        row.avg_review_score_solo_travelers,
        row.avg_review_score_business_travellers,
        row.avg_review_score_groups_friends,
    ];
    if !scores
        .iter()
        .all(|s| matches!(s, Some(v) if *v > 0.0 && *v < 10.0))
    {
        drops.score_range += 1;
        return None;
    }

    let counts = [
        row.avg_review_score_all_count,
        row.avg_review_score_families_count,
        row.avg_review_score_couples_count,
        row.avg_review_score_solo_travelers_count,
        row.avg_review_score_business_travellers_count,
        row.avg_review_score_groups_friends_count,
    ];
    if !counts.iter().all(|c| matches!(c, Some(v) if *v > 0.0)) {
        drops.count_positive += 1;
        return None;
    }

    match (row.latitude, row.longitude) {
        (Some(lat), Some(lon))
            if lat > -90.0 && lat < 90.0 && lon > -180.0 && lon < 180.0 => {}
        _ => {
            drops.coordinates += 1;
            return None;
        }
    }

    match (row.min_price, row.max_price) {
        (Some(min), Some(max)) if min >= 0.0 && max >= min => {}
        _ => {
            drops.price += 1;
            return None;
        }
    }

    // Every field below is guaranteed present by the filters above.
    Some(CleanListing {
        property_id: row.property_id.clone(),
        scrape_timestamp: row.scrape_timestamp.clone(),
        property_url: row.property_url.clone(),
        category: row.category.clone(),
        general_review: row.general_review,
        general_review_count: row.general_review_count,
        weighted_avg: weighted_average(row)?,
        comfort_score: row.comfort_score,
        value_score: row.value_score,
        location_score: row.location_score,
        wifi_score: row.wifi_score,
        avg_review_score_all: row.avg_review_score_all?,
        avg_review_score_all_count: row.avg_review_score_all_count?,
        avg_review_score_families: row.avg_review_score_families?,
        avg_review_score_families_count: row.avg_review_score_families_count?,
        avg_review_score_couples: row.avg_review_score_couples?,
        avg_review_score_couples_count: row.avg_review_score_couples_count?,
        avg_review_score_solo_travelers: row.avg_review_score_solo_travelers?,
        avg_review_score_solo_travelers_count: row.avg_review_score_solo_travelers_count?,
        avg_review_score_business_travellers: row.avg_review_score_business_travellers?,
        avg_review_score_business_travellers_count: row
            .avg_review_score_business_travellers_count?,
        avg_review_score_groups_friends: row.avg_review_score_groups_friends?,
        avg_review_score_groups_friends_count: row.avg_review_score_groups_friends_count?,
        min_price: row.min_price?,
        max_price: row.max_price?,
        latitude: row.latitude?,
        longitude: row.longitude?,
        address: row.address.clone(),
        zone: row.zone.clone(),
        city: row.city.clone(),
        wifi_speed: row.wifi_speed.clone(),
    })
}

/// Fill a missing zone from the address text. Returns true when a zone
/// was derived.
pub fn fill_missing_zone(row: &mut CleanListing) -> bool {
    if row.zone.is_some() {
        return false;
    }
    let Some(address) = row.address.as_deref() else {
        return false;
    };
    match utils::zone_from_address(address) {
        Some(zone) => {
            row.zone = Some(zone);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_row() -> RawListing {
        RawListing {
            property_id: Some("1".to_string()),
            scrape_timestamp: "1700000000000".to_string(),
            property_url: Some("https://example.com/p1".to_string()),
            category: Some("apartment".to_string()),
            general_review: Some(8.5),
            general_review_count: Some(120.0),
            comfort_score: Some(8.0),
            value_score: Some(8.0),
            location_score: Some(9.0),
            wifi_score: Some(7.0),
            avg_review_score_all: Some(8.4),
            avg_review_score_all_count: Some(24.0),
            avg_review_score_families: Some(8.0),
            avg_review_score_families_count: Some(10.0),
            avg_review_score_couples: Some(7.0),
            avg_review_score_couples_count: Some(5.0),
            avg_review_score_solo_travelers: Some(9.0),
            avg_review_score_solo_travelers_count: Some(3.0),
            avg_review_score_business_travellers: Some(6.0),
            avg_review_score_business_travellers_count: Some(2.0),
            avg_review_score_groups_friends: Some(8.0),
            avg_review_score_groups_friends_count: Some(4.0),
            min_price: Some(50.0),
            max_price: Some(120.0),
            latitude: Some(31.6),
            longitude: Some(-8.0),
            address: Some("Rue X  Douar Y  Morocco".to_string()),
            zone: Some("Annakhil".to_string()),
            city: Some("Marrakech".to_string()),
            wifi_speed: Some("fast".to_string()),
        }
    }

    #[test]
    fn test_normalize_epoch_millis() {
        assert_eq!(
            normalize_timestamp("1700000000000"),
            "2023-11-14T22:13:20+00:00"
        );
    }

    #[test]
    fn test_normalize_passthrough() {
        assert_eq!(
            normalize_timestamp("2023-11-14T22:13:20+00:00"),
            "2023-11-14T22:13:20+00:00"
        );
        assert_eq!(normalize_timestamp(""), "");
    }

    #[test]
    fn test_mixed_representations_converge() {
        let from_millis = normalize_timestamp("1700000000000");
        let from_text = normalize_timestamp("2023-11-14T22:13:20+00:00");
        assert_eq!(from_millis, from_text);
    }

    #[test]
    fn test_weighted_average() {
        // (8*10 + 7*5 + 9*3 + 6*2 + 8*4) / 24 = 206 / 24
        let avg = weighted_average(&valid_row()).unwrap();
        assert!((avg - 206.0 / 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_average_zero_counts_is_nan() {
        let mut row = valid_row();
        row.avg_review_score_families_count = Some(0.0);
        row.avg_review_score_couples_count = Some(0.0);
        row.avg_review_score_solo_travelers_count = Some(0.0);
        row.avg_review_score_business_travellers_count = Some(0.0);
        row.avg_review_score_groups_friends_count = Some(0.0);
        assert!(weighted_average(&row).unwrap().is_nan());
    }

    #[test]
    fn test_weighted_average_missing_segment() {
        let mut row = valid_row();
        row.avg_review_score_couples = None;
        assert!(weighted_average(&row).is_none());
    }

    #[test]
    fn test_city_correction_from_address() {
        let mut row = valid_row();
        row.address = Some("12 Rue X, Douar Y, Marrakech, Morocco".to_string());
        row.city = Some("Douar Y".to_string());
        correct_city(&mut row);
        assert_eq!(row.city.as_deref(), Some("Marrakech"));
    }

    #[test]
    fn test_city_untouched_without_marker() {
        let mut row = valid_row();
        row.address = Some("12 Rue X, Casablanca, Morocco".to_string());
        row.city = Some("Casablanca".to_string());
        correct_city(&mut row);
        assert_eq!(row.city.as_deref(), Some("Casablanca"));
    }

    #[test]
    fn test_validate_accepts_valid_row() {
        let mut drops = DropCounts::default();
        let clean = validate(&valid_row(), &mut drops).unwrap();
        assert_eq!(drops.total(), 0);
        assert!((clean.weighted_avg - 206.0 / 24.0).abs() < 1e-9);
        assert_eq!(clean.avg_review_score_all, 8.4);
    }

    #[test]
    fn test_score_boundary_ten_is_dropped() {
        let mut row = valid_row();
        row.avg_review_score_all = Some(10.0);
        let mut drops = DropCounts::default();
        assert!(validate(&row, &mut drops).is_none());
        assert_eq!(drops.score_range, 1);
    }

    #[test]
    fn test_score_just_under_ten_is_kept() {
        let mut row = valid_row();
        row.avg_review_score_all = Some(9.999);
        let mut drops = DropCounts::default();
        assert!(validate(&row, &mut drops).is_some());
    }

    #[test]
    fn test_zero_count_is_dropped() {
        let mut row = valid_row();
        row.avg_review_score_all_count = Some(0.0);
        let mut drops = DropCounts::default();
        assert!(validate(&row, &mut drops).is_none());
        assert_eq!(drops.count_positive, 1);
    }

    #[test]
    fn test_bad_coordinates_are_dropped() {
        let mut row = valid_row();
        row.latitude = Some(91.0);
        let mut drops = DropCounts::default();
        assert!(validate(&row, &mut drops).is_none());
        assert_eq!(drops.coordinates, 1);
    }

    #[test]
    fn test_inverted_prices_are_dropped() {
        let mut row = valid_row();
        row.min_price = Some(200.0);
        row.max_price = Some(100.0);
        let mut drops = DropCounts::default();
        assert!(validate(&row, &mut drops).is_none());
        assert_eq!(drops.price, 1);
    }

    #[test]
    fn test_missing_value_fails_its_filter() {
        let mut row = valid_row();
        row.longitude = None;
        let mut drops = DropCounts::default();
        assert!(validate(&row, &mut drops).is_none());
        assert_eq!(drops.coordinates, 1);
    }

    #[test]
    fn test_dedup_collapses_identical_rows() {
        let rows = vec![valid_row(), valid_row()];
        assert_eq!(dedup_exact(rows).len(), 1);
    }

    #[test]
    fn test_dedup_keeps_rows_differing_in_one_field() {
        let mut other = valid_row();
        other.max_price = Some(121.0);
        let rows = vec![valid_row(), other];
        assert_eq!(dedup_exact(rows).len(), 2);
    }

    #[test]
    fn test_dedup_treats_shared_nan_as_duplicate() {
        let mut a = valid_row();
        let mut b = valid_row();
        a.general_review = Some(f64::NAN);
        b.general_review = Some(f64::NAN);
        assert_eq!(dedup_exact(vec![a, b]).len(), 1);
    }

    #[test]
    fn test_count_consistency_is_observational() {
        let mut row = valid_row();
        // Segment counts sum to 24 but the reported total says 30.
        row.avg_review_score_all_count = Some(30.0);
        assert_eq!(count_consistency_mismatches(&[row.clone()]), 1);

        // The row still passes validation untouched.
        let mut drops = DropCounts::default();
        assert!(validate(&row, &mut drops).is_some());
    }

    #[test]
    fn test_zone_backfill_only_when_missing() {
        let mut drops = DropCounts::default();
        let mut row = valid_row();
        row.zone = None;
        row.address = Some(
            "Hotel ABC  Cercle de Sidi Bennour  Province de Sidi Bennour  Morocco"
                .to_string(),
        );
        let mut clean = validate(&row, &mut drops).unwrap();
        assert!(fill_missing_zone(&mut clean));
        assert_eq!(clean.zone.as_deref(), Some("Cercle de Sidi Bennour"));

        // An existing zone is never overwritten.
        let mut clean = validate(&valid_row(), &mut drops).unwrap();
        assert!(!fill_missing_zone(&mut clean));
        assert_eq!(clean.zone.as_deref(), Some("Annakhil"));
    }
}
