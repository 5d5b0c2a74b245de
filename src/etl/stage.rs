//! Staged batch artifacts - timestamped flat-text CSV plus a Parquet
//! twin under the same base name

use crate::etl::types::{CleanListing, StagedBatch, CLEAN_COLUMN_COUNT};
use anyhow::{anyhow, Result};
use chrono::{Duration, Local};
use parquet::basic::{Compression, LogicalType, Repetition, Type as PhysicalType, ZstdLevel};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::{Type, TypePtr};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Write the cleaned batch under `staging_dir` as
/// `staged_booking<YYYYMMDD_HHMMSS>.csv` and `.parquet`.
///
/// The run timestamp is captured once, as local time minus one hour so
/// the artifact names line up with the scraper's reference clock, which
/// runs an hour behind.
pub fn persist(rows: &[CleanListing], staging_dir: &Path) -> Result<StagedBatch> {
    std::fs::create_dir_all(staging_dir)?;

    let run_ts = (Local::now() - Duration::hours(1)).format("%Y%m%d_%H%M%S");
    let base = format!("staged_booking{run_ts}");
    let csv_path = staging_dir.join(format!("{base}.csv"));
    let parquet_path = staging_dir.join(format!("{base}.parquet"));

    write_csv(rows, &csv_path)?;
    write_parquet(rows, &parquet_path)?;

    let parquet_columns = parquet_column_count(&parquet_path)?;
    info!(
        "Staged {} rows to {:?} and {:?}",
        rows.len(),
        csv_path,
        parquet_path
    );

    Ok(StagedBatch {
        csv_path,
        parquet_path,
        rows: rows.len(),
        columns: CLEAN_COLUMN_COUNT,
        parquet_columns,
    })
}

/// Read a staged CSV artifact back into memory. Used by the load stage,
/// which takes the flat-text artifact as its handoff from transform.
pub fn read_staged_csv(path: &Path) -> Result<Vec<CleanListing>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for result in reader.deserialize::<CleanListing>() {
        rows.push(result?);
    }
    Ok(rows)
}

fn write_csv(rows: &[CleanListing], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Per-column buffers for the Parquet writer. Optional columns carry
/// definition levels; required ones write values only.
enum ColumnData {
    Text {
        values: Vec<ByteArray>,
        defs: Option<Vec<i16>>,
    },
    Real {
        values: Vec<f64>,
        defs: Option<Vec<i16>>,
    },
}

impl ColumnData {
    fn is_optional(&self) -> bool {
        match self {
            ColumnData::Text { defs, .. } => defs.is_some(),
            ColumnData::Real { defs, .. } => defs.is_some(),
        }
    }
}

fn text_req(rows: &[CleanListing], get: impl Fn(&CleanListing) -> ByteArray) -> ColumnData {
    ColumnData::Text {
        values: rows.iter().map(get).collect(),
        defs: None,
    }
}

fn text_opt(
    rows: &[CleanListing],
    get: impl Fn(&CleanListing) -> Option<ByteArray>,
) -> ColumnData {
    let mut values = Vec::new();
    let mut defs = Vec::with_capacity(rows.len());
    for row in rows {
        match get(row) {
            Some(v) => {
                values.push(v);
                defs.push(1);
            }
            None => defs.push(0),
        }
    }
    ColumnData::Text {
        values,
        defs: Some(defs),
    }
}

fn real_req(rows: &[CleanListing], get: impl Fn(&CleanListing) -> f64) -> ColumnData {
    ColumnData::Real {
        values: rows.iter().map(get).collect(),
        defs: None,
    }
}

fn real_opt(
    rows: &[CleanListing],
    get: impl Fn(&CleanListing) -> Option<f64>,
) -> ColumnData {
    let mut values = Vec::new();
    let mut defs = Vec::with_capacity(rows.len());
    for row in rows {
        match get(row) {
            Some(v) => {
                values.push(v);
                defs.push(1);
            }
            None => defs.push(0),
        }
    }
    ColumnData::Real {
        values,
        defs: Some(defs),
    }
}

/// Column order must match `CleanListing`'s serialized field order.
fn columns(rows: &[CleanListing]) -> Vec<(&'static str, ColumnData)> {
    fn ba(s: &str) -> ByteArray {
        ByteArray::from(s)
    }

    vec![
        (
            "property_id",
            text_opt(rows, |r| r.property_id.as_deref().map(ba)),
        ),
        (
            "scrape_timestamp",
            text_req(rows, |r| ba(&r.scrape_timestamp)),
        ),
        (
            "property_url",
            text_opt(rows, |r| r.property_url.as_deref().map(ba)),
        ),
        (
            "category",
            text_opt(rows, |r| r.category.as_deref().map(ba)),
        ),
        ("general_review", real_opt(rows, |r| r.general_review)),
        (
            "general_review_count",
            real_opt(rows, |r| r.general_review_count),
        ),
        ("weighted_avg", real_req(rows, |r| r.weighted_avg)),
        ("comfort_score", real_opt(rows, |r| r.comfort_score)),
        ("value_score", real_opt(rows, |r| r.value_score)),
        ("location_score", real_opt(rows, |r| r.location_score)),
        ("wifi_score", real_opt(rows, |r| r.wifi_score)),
        (
            "avg_review_score_all",
            real_req(rows, |r| r.avg_review_score_all),
        ),
        (
            "avg_review_score_all_count",
            real_req(rows, |r| r.avg_review_score_all_count),
        ),
        (
            "avg_review_score_families",
            real_req(rows, |r| r.avg_review_score_families),
        ),
        (
            "avg_review_score_families_count",
            real_req(rows, |r| r.avg_review_score_families_count),
        ),
        (
            "avg_review_score_couples",
            real_req(rows, |r| r.avg_review_score_couples),
        ),
        (
            "avg_review_score_couples_count",
            real_req(rows, |r| r.avg_review_score_couples_count),
        ),
        (
            "avg_review_score_solo_travelers",
            real_req(rows, |r| r.avg_review_score_solo_travelers),
        ),
        (
            "avg_review_score_solo_travelers_count",
            real_req(rows, |r| r.avg_review_score_solo_travelers_count),
        ),
        (
            "avg_review_score_business_travellers",
            real_req(rows, |r| r.avg_review_score_business_travellers),
        ),
        (
            "avg_review_score_business_travellers_count",
            real_req(rows, |r| r.avg_review_score_business_travellers_count),
        ),
        (
            "avg_review_score_groups_friends",
            real_req(rows, |r| r.avg_review_score_groups_friends),
        ),
        (
            "avg_review_score_groups_friends_count",
            real_req(rows, |r| r.avg_review_score_groups_friends_count),
        ),
        ("min_price", real_req(rows, |r| r.min_price)),
        ("max_price", real_req(rows, |r| r.max_price)),
        ("latitude", real_req(rows, |r| r.latitude)),
        ("longitude", real_req(rows, |r| r.longitude)),
        (
            "address",
            text_opt(rows, |r| r.address.as_deref().map(ba)),
        ),
        ("zone", text_opt(rows, |r| r.zone.as_deref().map(ba))),
        ("city", text_opt(rows, |r| r.city.as_deref().map(ba))),
        (
            "wifi_speed",
            text_opt(rows, |r| r.wifi_speed.as_deref().map(ba)),
        ),
    ]
}

fn build_schema(cols: &[(&'static str, ColumnData)]) -> Result<TypePtr> {
    let mut fields = Vec::with_capacity(cols.len());
    for (name, data) in cols {
        let (physical, logical) = match data {
            ColumnData::Text { .. } => (PhysicalType::BYTE_ARRAY, Some(LogicalType::String)),
            ColumnData::Real { .. } => (PhysicalType::DOUBLE, None),
        };
        let repetition = if data.is_optional() {
            Repetition::OPTIONAL
        } else {
            Repetition::REQUIRED
        };
        fields.push(Arc::new(
            Type::primitive_type_builder(name, physical)
                .with_logical_type(logical)
                .with_repetition(repetition)
                .build()?,
        ));
    }
    Ok(Arc::new(
        Type::group_type_builder("staged_booking")
            .with_fields(fields)
            .build()?,
    ))
}

fn write_parquet(rows: &[CleanListing], path: &Path) -> Result<()> {
    let cols = columns(rows);
    let schema = build_schema(&cols)?;
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .build(),
    );

    let file = File::create(path)?;
    let mut writer = SerializedFileWriter::new(file, schema, props)?;
    let mut row_group = writer.next_row_group()?;

    let mut cols = cols.into_iter();
    while let Some(mut col_writer) = row_group.next_column()? {
        let (name, data) = cols
            .next()
            .ok_or_else(|| anyhow!("parquet schema has more columns than buffered"))?;
        match (col_writer.untyped(), data) {
            (ColumnWriter::ByteArrayColumnWriter(typed), ColumnData::Text { values, defs }) => {
                typed.write_batch(&values, defs.as_deref(), None)?;
            }
            (ColumnWriter::DoubleColumnWriter(typed), ColumnData::Real { values, defs }) => {
                typed.write_batch(&values, defs.as_deref(), None)?;
            }
            _ => return Err(anyhow!("column writer type mismatch for {name}")),
        }
        col_writer.close()?;
    }
    row_group.close()?;
    writer.close()?;

    Ok(())
}

fn parquet_column_count(path: &Path) -> Result<usize> {
    let reader = SerializedFileReader::new(File::open(path)?)?;
    Ok(reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .num_columns())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_row(zone: Option<&str>) -> CleanListing {
        CleanListing {
            property_id: Some("1".to_string()),
            scrape_timestamp: "2023-11-14T22:13:20+00:00".to_string(),
            property_url: Some("https://example.com/p1".to_string()),
            category: Some("apartment".to_string()),
            general_review: Some(8.5),
            general_review_count: Some(120.0),
            weighted_avg: 206.0 / 24.0,
            comfort_score: Some(8.0),
            value_score: None,
            location_score: Some(9.0),
            wifi_score: Some(7.0),
            avg_review_score_all: 8.4,
            avg_review_score_all_count: 24.0,
            avg_review_score_families: 8.0,
            avg_review_score_families_count: 10.0,
            avg_review_score_couples: 7.0,
            avg_review_score_couples_count: 5.0,
            avg_review_score_solo_travelers: 9.0,
            avg_review_score_solo_travelers_count: 3.0,
            avg_review_score_business_travellers: 6.0,
            avg_review_score_business_travellers_count: 2.0,
            avg_review_score_groups_friends: 8.0,
            avg_review_score_groups_friends_count: 4.0,
            min_price: 50.0,
            max_price: 120.0,
            latitude: 31.6,
            longitude: -8.0,
            address: Some("Rue X  Marrakech  Morocco".to_string()),
            zone: zone.map(str::to_string),
            city: Some("Marrakech".to_string()),
            wifi_speed: Some("fast".to_string()),
        }
    }

    #[test]
    fn test_persist_writes_both_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![clean_row(Some("Annakhil")), clean_row(None)];

        let batch = persist(&rows, dir.path()).unwrap();

        assert!(batch.csv_path.exists());
        assert!(batch.parquet_path.exists());
        assert_eq!(batch.rows, 2);
        assert_eq!(batch.columns, CLEAN_COLUMN_COUNT);
        assert_eq!(batch.parquet_columns, batch.columns);

        let name = batch.csv_path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("staged_booking"));
        assert!(name.ends_with(".csv"));
    }

    #[test]
    fn test_staged_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![clean_row(Some("Annakhil")), clean_row(None)];

        let batch = persist(&rows, dir.path()).unwrap();
        let back = read_staged_csv(&batch.csv_path).unwrap();

        assert_eq!(back.len(), 2);
        assert_eq!(back[0].zone.as_deref(), Some("Annakhil"));
        assert_eq!(back[1].zone, None);
        assert!((back[0].weighted_avg - 206.0 / 24.0).abs() < 1e-9);
        assert_eq!(back[0].value_score, None);
    }

    #[test]
    fn test_persist_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let batch = persist(&[], dir.path()).unwrap();
        assert_eq!(batch.rows, 0);
        assert_eq!(batch.parquet_columns, CLEAN_COLUMN_COUNT);
        assert_eq!(read_staged_csv(&batch.csv_path).unwrap().len(), 0);
    }
}
