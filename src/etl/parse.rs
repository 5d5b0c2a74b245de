//! Parse functions - read raw listing batches into RawListing structs

use crate::etl::types::{RawListing, TransformError, RAW_COLUMNS};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load every raw CSV under `dir` and concatenate the rows.
///
/// All files must carry the exact RawListing column set; a header
/// mismatch is fatal because the batches cannot be unioned. Individual
/// rows that fail to deserialize are skipped with a capped warning, the
/// same way the scraper's own bad rows have always been treated.
pub fn read_raw_dir(dir: &Path) -> Result<Vec<RawListing>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |ext| ext == "csv"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(TransformError::NoInputFiles {
            dir: dir.to_path_buf(),
        }
        .into());
    }

    let mut rows = Vec::new();
    for file in &files {
        let batch = read_raw_file(file)?;
        info!("Loaded {} rows from {:?}", batch.len(), file);
        rows.extend(batch);
    }

    info!(
        "Concatenated {} rows from {} raw files",
        rows.len(),
        files.len()
    );

    Ok(rows)
}

fn read_raw_file(path: &Path) -> Result<Vec<RawListing>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    check_schema(path, reader.headers()?)?;

    let mut rows = Vec::new();
    let mut parse_errors = 0;

    for (idx, result) in reader.deserialize::<RawListing>().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                parse_errors += 1;
                if parse_errors <= 10 {
                    // Only log first 10 errors
                    warn!("Failed to deserialize row {} of {:?}: {}", idx, path, e);
                }
            }
        }
    }

    if parse_errors > 0 {
        warn!("Skipped {} unreadable rows in {:?}", parse_errors, path);
    }

    Ok(rows)
}

fn check_schema(path: &Path, headers: &csv::StringRecord) -> Result<()> {
    if headers.len() != RAW_COLUMNS.len() {
        return Err(TransformError::SchemaMismatch {
            file: path.to_path_buf(),
            detail: format!(
                "expected {} columns, found {}",
                RAW_COLUMNS.len(),
                headers.len()
            ),
        }
        .into());
    }

    for (expected, found) in RAW_COLUMNS.iter().zip(headers.iter()) {
        if *expected != found {
            return Err(TransformError::SchemaMismatch {
                file: path.to_path_buf(),
                detail: format!("expected column {expected:?}, found {found:?}"),
            }
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn raw_header() -> String {
        RAW_COLUMNS.join(",")
    }

    fn sample_row() -> &'static str {
        // 30 fields matching RAW_COLUMNS order
        concat!(
            "1,1700000000000,https://example.com/p1,apartment,8.5,120,8,8,9,7,",
            "8.4,24,8,10,7,5,9,3,6,2,8,4,50,120,31.6,-8.0,",
            "Rue X  Marrakech  Morocco,,Annakhil,fast"
        )
    }

    #[test]
    fn test_read_raw_dir_concatenates_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.csv", "b.csv"] {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            writeln!(f, "{}", raw_header()).unwrap();
            writeln!(f, "{}", sample_row()).unwrap();
        }

        let rows = read_raw_dir(dir.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].scrape_timestamp, "1700000000000");
        assert_eq!(rows[0].avg_review_score_families, Some(8.0));
    }

    #[test]
    fn test_empty_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_raw_dir(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransformError>(),
            Some(TransformError::NoInputFiles { .. })
        ));
    }

    #[test]
    fn test_schema_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("bad.csv")).unwrap();
        writeln!(f, "property_id,scrape_timestamp").unwrap();
        writeln!(f, "1,1700000000000").unwrap();

        let err = read_raw_dir(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TransformError>(),
            Some(TransformError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_non_csv_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a batch").unwrap();
        let mut f = std::fs::File::create(dir.path().join("a.csv")).unwrap();
        writeln!(f, "{}", raw_header()).unwrap();
        writeln!(f, "{}", sample_row()).unwrap();

        let rows = read_raw_dir(dir.path()).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
