// Library module for the ETL pipeline

pub mod etl;
