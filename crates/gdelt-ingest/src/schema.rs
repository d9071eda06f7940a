//! Destination table schemas and schema-validated rows
//!
//! Column lists follow the GDELT 2.0 codebooks. Every staged record is turned
//! into a [`Row`] against one of these schemas before it is handed to a
//! [`RecordStore`](crate::store::RecordStore), so shape mismatches are caught
//! here rather than at the database.

use csv::ByteRecord;
use std::fmt;
use thiserror::Error;

/// Primitive column types and their PostgreSQL spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Date,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            // GLOBALEVENTID already sits close to i32::MAX
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Date => "DATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn col(name: &'static str, ty: ColumnType) -> Column {
    Column { name, ty }
}

/// Static description of one destination table
#[derive(Debug, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub primary_key: &'static [&'static str],
    /// Column holding the 14-digit `YYYYMMDDHHMMSS` timestamp used for the watermark
    pub timestamp_column: &'static str,
}

/// Double-quote an identifier so mixed-case GDELT names survive
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl TableSchema {
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Positions of the primary-key columns within a row
    pub fn key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|key| self.columns.iter().position(|c| c.name == *key))
            .collect()
    }

    /// Idempotent DDL for this table, including its primary key
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(c.name), c.ty.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let key = self
            .primary_key
            .iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}))",
            quote_ident(self.name),
            columns,
            key
        )
    }
}

impl fmt::Display for TableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A record whose field count does not match its destination table
#[derive(Debug, Error, PartialEq, Eq)]
#[error("expected {expected} fields, found {actual}")]
pub struct ShapeMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// One row in schema column order; empty fields become NULL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(schema: &TableSchema, values: Vec<Option<String>>) -> Result<Self, ShapeMismatch> {
        if values.len() != schema.width() {
            return Err(ShapeMismatch {
                expected: schema.width(),
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }

    /// Build a row from a raw tab-separated record without altering field text
    pub fn from_record(schema: &TableSchema, record: &ByteRecord) -> Result<Self, ShapeMismatch> {
        let values = record
            .iter()
            .map(|field| {
                if field.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(field).into_owned())
                }
            })
            .collect();
        Self::new(schema, values)
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    pub fn into_values(self) -> Vec<Option<String>> {
        self.values
    }
}

use ColumnType::{Float, Integer, Text};

pub static EVENTS_SCHEMA: TableSchema = TableSchema {
    name: "events",
    columns: &[
        col("GLOBALEVENTID", Integer),
        col("SQLDATE", Integer),
        col("MonthYear", Integer),
        col("Year", Integer),
        col("FractionDate", Float),
        col("Actor1Code", Text),
        col("Actor1Name", Text),
        col("Actor1CountryCode", Text),
        col("Actor1KnownGroupCode", Text),
        col("Actor1EthnicCode", Text),
        col("Actor1Religion1Code", Text),
        col("Actor1Religion2Code", Text),
        col("Actor1Type1Code", Text),
        col("Actor1Type2Code", Text),
        col("Actor1Type3Code", Text),
        col("Actor2Code", Text),
        col("Actor2Name", Text),
        col("Actor2CountryCode", Text),
        col("Actor2KnownGroupCode", Text),
        col("Actor2EthnicCode", Text),
        col("Actor2Religion1Code", Text),
        col("Actor2Religion2Code", Text),
        col("Actor2Type1Code", Text),
        col("Actor2Type2Code", Text),
        col("Actor2Type3Code", Text),
        col("IsRootEvent", Integer),
        col("EventCode", Text),
        col("EventBaseCode", Text),
        col("EventRootCode", Text),
        col("QuadClass", Integer),
        col("GoldsteinScale", Float),
        col("NumMentions", Integer),
        col("NumSources", Integer),
        col("NumArticles", Integer),
        col("AvgTone", Float),
        col("Actor1Geo_Type", Integer),
        col("Actor1Geo_FullName", Text),
        col("Actor1Geo_CountryCode", Text),
        col("Actor1Geo_ADM1Code", Text),
        col("Actor1Geo_ADM2Code", Text),
        col("Actor1Geo_Lat", Float),
        col("Actor1Geo_Long", Float),
        col("Actor1Geo_FeatureID", Text),
        col("Actor2Geo_Type", Integer),
        col("Actor2Geo_FullName", Text),
        col("Actor2Geo_CountryCode", Text),
        col("Actor2Geo_ADM1Code", Text),
        col("Actor2Geo_ADM2Code", Text),
        col("Actor2Geo_Lat", Float),
        col("Actor2Geo_Long", Float),
        col("Actor2Geo_FeatureID", Text),
        col("ActionGeo_Type", Integer),
        col("ActionGeo_FullName", Text),
        col("ActionGeo_CountryCode", Text),
        col("ActionGeo_ADM1Code", Text),
        col("ActionGeo_ADM2Code", Text),
        col("ActionGeo_Lat", Float),
        col("ActionGeo_Long", Float),
        col("ActionGeo_FeatureID", Text),
        col("DATEADDED", Integer),
        col("SOURCEURL", Text),
    ],
    primary_key: &["GLOBALEVENTID"],
    timestamp_column: "DATEADDED",
};

// An event is mentioned by many articles, so the article identifier is part of the key.
pub static MENTIONS_SCHEMA: TableSchema = TableSchema {
    name: "mentions",
    columns: &[
        col("GLOBALEVENTID", Integer),
        col("EventTimeDate", Integer),
        col("MentionTimeDate", Integer),
        col("MentionType", Integer),
        col("MentionSourceName", Text),
        col("MentionIdentifier", Text),
        col("SentenceID", Integer),
        col("Actor1CharOffset", Integer),
        col("Actor2CharOffset", Integer),
        col("ActionCharOffset", Integer),
        col("InRawText", Integer),
        col("Confidence", Integer),
        col("MentionDocLen", Integer),
        col("MentionDocTone", Float),
        col("MentionDocTranslationInfo", Text),
        col("Extras", Text),
    ],
    primary_key: &["GLOBALEVENTID", "MentionIdentifier"],
    timestamp_column: "MentionTimeDate",
};

pub static GKG_SCHEMA: TableSchema = TableSchema {
    name: "gkg",
    columns: &[
        col("GKGRECORDID", Text),
        col("DATE", Integer),
        col("SourceCollectionIdentifier", Integer),
        col("SourceCommonName", Text),
        col("DocumentIdentifier", Text),
        col("Counts", Text),
        col("V2Counts", Text),
        col("Themes", Text),
        col("V2Themes", Text),
        col("Locations", Text),
        col("V2Locations", Text),
        col("Persons", Text),
        col("V2Persons", Text),
        col("Organizations", Text),
        col("V2Organizations", Text),
        col("V2Tone", Text),
        col("Dates", Text),
        col("GCAM", Text),
        col("SharingImage", Text),
        col("RelatedImages", Text),
        col("SocialImageEmbeds", Text),
        col("SocialVideoEmbeds", Text),
        col("Quotations", Text),
        col("AllNames", Text),
        col("Amounts", Text),
        col("TranslationInfo", Text),
        col("Extras", Text),
    ],
    primary_key: &["GKGRECORDID"],
    timestamp_column: "DATE",
};
