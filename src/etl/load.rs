//! Load functions - staging load plus idempotent star-schema merges
//!
//! Every function takes the warehouse pool explicitly; the caller owns
//! acquisition and release. Merges are insert-if-absent on the natural
//! key, so rerunning a load against the same staging content changes
//! nothing. Non-key attributes are never updated once a key exists.

use crate::etl::stage;
use crate::etl::types::{CleanListing, LoadStats, StagedBatch};
use anyhow::Result;
use sqlx::PgPool;
use tracing::{debug, info};

/// Run the Dimensional Loader end to end: stage the batch, then merge
/// the star schema.
pub async fn run(pool: &PgPool, batch: &StagedBatch) -> Result<LoadStats> {
    let staged = load_staging(pool, batch).await?;
    let mut stats = olap_modeling(pool).await?;
    stats.staged = staged;
    Ok(stats)
}

/// Load the staged batch into the warehouse staging table.
///
/// Replace semantics: the staging area only ever reflects the latest
/// run, so previous rows are cleared before inserting.
pub async fn load_staging(pool: &PgPool, batch: &StagedBatch) -> Result<u64> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS booking_properties (
            property_id TEXT,
            scrape_timestamp TEXT,
            property_url TEXT,
            category TEXT,
            general_review DOUBLE PRECISION,
            general_review_count DOUBLE PRECISION,
            weighted_avg DOUBLE PRECISION,
            comfort_score DOUBLE PRECISION,
            value_score DOUBLE PRECISION,
            location_score DOUBLE PRECISION,
            wifi_score DOUBLE PRECISION,
            avg_review_score_all DOUBLE PRECISION,
            avg_review_score_all_count DOUBLE PRECISION,
            avg_review_score_families DOUBLE PRECISION,
            avg_review_score_families_count DOUBLE PRECISION,
            avg_review_score_couples DOUBLE PRECISION,
            avg_review_score_couples_count DOUBLE PRECISION,
            avg_review_score_solo_travelers DOUBLE PRECISION,
            avg_review_score_solo_travelers_count DOUBLE PRECISION,
            avg_review_score_business_travellers DOUBLE PRECISION,
            avg_review_score_business_travellers_count DOUBLE PRECISION,
            avg_review_score_groups_friends DOUBLE PRECISION,
            avg_review_score_groups_friends_count DOUBLE PRECISION,
            min_price DOUBLE PRECISION,
            max_price DOUBLE PRECISION,
            latitude DOUBLE PRECISION,
            longitude DOUBLE PRECISION,
            address TEXT,
            zone TEXT,
            city TEXT,
            wifi_speed TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("DELETE FROM booking_properties")
        .execute(pool)
        .await?;

    let rows = stage::read_staged_csv(&batch.csv_path)?;
    for row in &rows {
        insert_staging_row(pool, row).await?;
    }

    info!(
        "Loaded {} rows into staging table booking_properties",
        rows.len()
    );

    Ok(rows.len() as u64)
}

async fn insert_staging_row(pool: &PgPool, row: &CleanListing) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO booking_properties (
            property_id, scrape_timestamp, property_url, category,
            general_review, general_review_count, weighted_avg,
            comfort_score, value_score, location_score, wifi_score,
            avg_review_score_all, avg_review_score_all_count,
            avg_review_score_families, avg_review_score_families_count,
            avg_review_score_couples, avg_review_score_couples_count,
            avg_review_score_solo_travelers, avg_review_score_solo_travelers_count,
            avg_review_score_business_travellers, avg_review_score_business_travellers_count,
            avg_review_score_groups_friends, avg_review_score_groups_friends_count,
            min_price, max_price, latitude, longitude,
            address, zone, city, wifi_speed
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
            $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28,
            $29, $30, $31
        )
        "#,
    )
    .bind(&row.property_id)
    .bind(&row.scrape_timestamp)
    .bind(&row.property_url)
    .bind(&row.category)
    .bind(row.general_review)
    .bind(row.general_review_count)
    .bind(row.weighted_avg)
    .bind(row.comfort_score)
    .bind(row.value_score)
    .bind(row.location_score)
    .bind(row.wifi_score)
    .bind(row.avg_review_score_all)
    .bind(row.avg_review_score_all_count)
    .bind(row.avg_review_score_families)
    .bind(row.avg_review_score_families_count)
    .bind(row.avg_review_score_couples)
    .bind(row.avg_review_score_couples_count)
    .bind(row.avg_review_score_solo_travelers)
    .bind(row.avg_review_score_solo_travelers_count)
    .bind(row.avg_review_score_business_travellers)
    .bind(row.avg_review_score_business_travellers_count)
    .bind(row.avg_review_score_groups_friends)
    .bind(row.avg_review_score_groups_friends_count)
    .bind(row.min_price)
    .bind(row.max_price)
    .bind(row.latitude)
    .bind(row.longitude)
    .bind(&row.address)
    .bind(&row.zone)
    .bind(&row.city)
    .bind(&row.wifi_speed)
    .execute(pool)
    .await?;

    Ok(())
}

/// Merge the staging table into the star schema. Each table is created
/// if absent; a merge that finds zero distinct source rows is a no-op.
pub async fn olap_modeling(pool: &PgPool) -> Result<LoadStats> {
    let stats = LoadStats {
        staged: 0,
        dim_property: merge_dim_property(pool).await?,
        dim_category: merge_dim_category(pool).await?,
        dim_date: merge_dim_date(pool).await?,
        dim_location: merge_dim_location(pool).await?,
        fact_reviews: merge_fact_reviews(pool).await?,
    };
    info!("Star-schema merge complete: {}", stats);
    Ok(stats)
}

async fn merge_dim_property(pool: &PgPool) -> Result<u64> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_property (
            property_id INT GENERATED ALWAYS AS IDENTITY,
            property_url TEXT,
            address TEXT,
            wifi_speed TEXT,
            latitude DOUBLE PRECISION,
            longitude DOUBLE PRECISION
        )
        "#,
    )
    .execute(pool)
    .await?;

    let result = sqlx::query(
        r#"
        INSERT INTO dim_property (property_url, address, wifi_speed, latitude, longitude)
        SELECT DISTINCT ON (s.property_url)
            s.property_url, s.address, s.wifi_speed, s.latitude, s.longitude
        FROM booking_properties s
        WHERE NOT EXISTS (
            SELECT 1 FROM dim_property d
            WHERE d.property_url IS NOT DISTINCT FROM s.property_url
        )
        "#,
    )
    .execute(pool)
    .await?;

    debug!("dim_property: {} new rows", result.rows_affected());
    Ok(result.rows_affected())
}

async fn merge_dim_category(pool: &PgPool) -> Result<u64> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_category (
            category_id INT GENERATED ALWAYS AS IDENTITY,
            category TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    let result = sqlx::query(
        r#"
        INSERT INTO dim_category (category)
        SELECT DISTINCT s.category
        FROM booking_properties s
        WHERE NOT EXISTS (
            SELECT 1 FROM dim_category d
            WHERE d.category IS NOT DISTINCT FROM s.category
        )
        "#,
    )
    .execute(pool)
    .await?;

    debug!("dim_category: {} new rows", result.rows_affected());
    Ok(result.rows_affected())
}

async fn merge_dim_date(pool: &PgPool) -> Result<u64> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_date (
            date_id INT GENERATED ALWAYS AS IDENTITY,
            scrape_timestamp TEXT,
            day INT,
            month INT,
            year INT,
            weekday INT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per distinct timestamp value, not per calendar day. The
    // decomposition is done in UTC so it matches the normalized text.
    let result = sqlx::query(
        r#"
        INSERT INTO dim_date (scrape_timestamp, day, month, year, weekday)
        SELECT DISTINCT ON (s.scrape_timestamp)
            s.scrape_timestamp,
            EXTRACT(DAY FROM (s.scrape_timestamp::timestamptz AT TIME ZONE 'UTC'))::INT,
            EXTRACT(MONTH FROM (s.scrape_timestamp::timestamptz AT TIME ZONE 'UTC'))::INT,
            EXTRACT(YEAR FROM (s.scrape_timestamp::timestamptz AT TIME ZONE 'UTC'))::INT,
            EXTRACT(DOW FROM (s.scrape_timestamp::timestamptz AT TIME ZONE 'UTC'))::INT
        FROM booking_properties s
        WHERE NOT EXISTS (
            SELECT 1 FROM dim_date d
            WHERE d.scrape_timestamp = s.scrape_timestamp
        )
        "#,
    )
    .execute(pool)
    .await?;

    debug!("dim_date: {} new rows", result.rows_affected());
    Ok(result.rows_affected())
}

async fn merge_dim_location(pool: &PgPool) -> Result<u64> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dim_location (
            location_id INT GENERATED ALWAYS AS IDENTITY,
            city TEXT,
            zone TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    let result = sqlx::query(
        r#"
        INSERT INTO dim_location (city, zone)
        SELECT DISTINCT s.city, s.zone
        FROM booking_properties s
        WHERE NOT EXISTS (
            SELECT 1 FROM dim_location d
            WHERE d.city IS NOT DISTINCT FROM s.city
              AND d.zone IS NOT DISTINCT FROM s.zone
        )
        "#,
    )
    .execute(pool)
    .await?;

    debug!("dim_location: {} new rows", result.rows_affected());
    Ok(result.rows_affected())
}

async fn merge_fact_reviews(pool: &PgPool) -> Result<u64> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fact_property_reviews (
            review_id INT GENERATED ALWAYS AS IDENTITY,
            scrape_timestamp TEXT,
            category_id INT,
            general_review_count DOUBLE PRECISION,
            weighted_avg DOUBLE PRECISION,
            comfort_score DOUBLE PRECISION,
            value_score DOUBLE PRECISION,
            location_score DOUBLE PRECISION,
            wifi_score DOUBLE PRECISION,
            avg_review_score_all DOUBLE PRECISION,
            avg_review_score_all_count DOUBLE PRECISION,
            avg_review_score_families DOUBLE PRECISION,
            avg_review_score_families_count DOUBLE PRECISION,
            avg_review_score_couples DOUBLE PRECISION,
            avg_review_score_couples_count DOUBLE PRECISION,
            avg_review_score_solo_travelers DOUBLE PRECISION,
            avg_review_score_solo_travelers_count DOUBLE PRECISION,
            avg_review_score_business_travellers DOUBLE PRECISION,
            avg_review_score_business_travellers_count DOUBLE PRECISION,
            avg_review_score_groups_friends DOUBLE PRECISION,
            avg_review_score_groups_friends_count DOUBLE PRECISION,
            min_price DOUBLE PRECISION,
            max_price DOUBLE PRECISION
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Known limitation, kept as inherited: the merge key is the
    // timestamp alone, so two staged rows sharing a timestamp with
    // different categories collide and only one lands in the fact.
    let result = sqlx::query(
        r#"
        INSERT INTO fact_property_reviews (
            scrape_timestamp, category_id,
            general_review_count, weighted_avg,
            comfort_score, value_score, location_score, wifi_score,
            avg_review_score_all, avg_review_score_all_count,
            avg_review_score_families, avg_review_score_families_count,
            avg_review_score_couples, avg_review_score_couples_count,
            avg_review_score_solo_travelers, avg_review_score_solo_travelers_count,
            avg_review_score_business_travellers, avg_review_score_business_travellers_count,
            avg_review_score_groups_friends, avg_review_score_groups_friends_count,
            min_price, max_price
        )
        SELECT DISTINCT ON (s.scrape_timestamp)
            s.scrape_timestamp, dc.category_id,
            s.general_review_count, s.weighted_avg,
            s.comfort_score, s.value_score, s.location_score, s.wifi_score,
            s.avg_review_score_all, s.avg_review_score_all_count,
            s.avg_review_score_families, s.avg_review_score_families_count,
            s.avg_review_score_couples, s.avg_review_score_couples_count,
            s.avg_review_score_solo_travelers, s.avg_review_score_solo_travelers_count,
            s.avg_review_score_business_travellers, s.avg_review_score_business_travellers_count,
            s.avg_review_score_groups_friends, s.avg_review_score_groups_friends_count,
            s.min_price, s.max_price
        FROM booking_properties s
        JOIN dim_category dc ON dc.category = s.category
        WHERE NOT EXISTS (
            SELECT 1 FROM fact_property_reviews f
            WHERE f.scrape_timestamp = s.scrape_timestamp
        )
        "#,
    )
    .execute(pool)
    .await?;

    debug!("fact_property_reviews: {} new rows", result.rows_affected());
    Ok(result.rows_affected())
}
