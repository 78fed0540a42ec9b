//! History and downloads from `places.sqlite`.
//!
//! History rows come from `moz_historyvisits LEFT JOIN moz_places`. URL
//! filters compile to SQL where they can (`=`, `IN`, `REGEXP` through a
//! user-defined scalar); predicate functions are applied as a post-filter.
//! Downloads are history visits of type `download` joined to the
//! `moz_annos` destination and metadata attributes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::error::{FoxtrailError, Result};
use crate::keysearch::KeySearch;
use crate::timestamps;

const HISTORY_QUERY: &str = r#"
    SELECT
        "moz_historyvisits"."id",
        "moz_places"."url",
        "moz_places"."title",
        "moz_places"."guid",
        "moz_places"."id" AS "place_id",
        "moz_historyvisits"."visit_date",
        "moz_historyvisits"."visit_type",
        "moz_historyvisits"."from_visit"
    FROM "moz_historyvisits"
    LEFT JOIN "moz_places" ON "moz_historyvisits"."place_id" = "moz_places"."id""#;

const DOWNLOAD_ATTRIBUTES_QUERY: &str = r#"
    SELECT
        "moz_anno_attributes"."name",
        "moz_annos"."content"
    FROM "moz_annos"
    INNER JOIN "moz_anno_attributes"
    ON "moz_annos"."anno_attribute_id" = "moz_anno_attributes"."id"
    WHERE "moz_annos"."place_id" = ?1"#;

const DESTINATION_FILE_URI_KEY: &str = "downloads/destinationFileURI";
const DOWNLOAD_METADATA_KEY: &str = "downloads/metaData";

// ── Enums ──────────────────────────────────────────────────────────

/// Visit transition types (nsINavHistoryService).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VisitType {
    Link = 1,
    Typed = 2,
    Bookmark = 3,
    Embed = 4,
    RedirectPermanent = 5,
    RedirectTemporary = 6,
    Download = 7,
    FramedLink = 8,
    Reload = 9,
}

impl VisitType {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Link),
            2 => Some(Self::Typed),
            3 => Some(Self::Bookmark),
            4 => Some(Self::Embed),
            5 => Some(Self::RedirectPermanent),
            6 => Some(Self::RedirectTemporary),
            7 => Some(Self::Download),
            8 => Some(Self::FramedLink),
            9 => Some(Self::Reload),
            _ => None,
        }
    }
}

/// Download states carried in the `downloads/metaData` JSON
/// (DownloadHistory.sys.mjs; the values are not contiguous).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DownloadState {
    Unknown = 0,
    Finished = 1,
    Failed = 2,
    Cancelled = 3,
    Paused = 4,
    BlockedParental = 6,
    Dirty = 8,
}

impl DownloadState {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Finished),
            2 => Some(Self::Failed),
            3 => Some(Self::Cancelled),
            4 => Some(Self::Paused),
            6 => Some(Self::BlockedParental),
            8 => Some(Self::Dirty),
            _ => None,
        }
    }
}

// ── Records ────────────────────────────────────────────────────────

/// One history visit.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    /// `moz_historyvisits` rowid.
    pub rec_id: i64,
    pub url: Option<String>,
    pub title: Option<String>,
    pub guid: Option<String>,
    pub place_id: Option<i64>,
    pub visit_time: DateTime<Utc>,
    pub visit_type: VisitType,
    pub from_visit_id: i64,
}

impl HistoryRecord {
    pub fn has_parent(&self) -> bool {
        self.from_visit_id != 0
    }

    pub fn record_location(&self) -> String {
        format!("SQLite Rowid: {}", self.rec_id)
    }
}

/// One download: the underlying visit plus the annotation attributes.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadRecord {
    pub visit: HistoryRecord,
    /// `file://` URI of the destination.
    pub downloaded_location: Option<String>,
    pub deleted: Option<bool>,
    pub end_time: Option<DateTime<Utc>>,
    pub file_size: Option<i64>,
    pub download_state: DownloadState,
}

impl DownloadRecord {
    pub fn start_time(&self) -> DateTime<Utc> {
        self.visit.visit_time
    }

    pub fn target_path(&self) -> Option<&str> {
        self.downloaded_location.as_deref()
    }
}

// ── Database ───────────────────────────────────────────────────────

/// Read-only view over `places.sqlite`.
#[derive(Debug)]
pub struct PlacesDatabase {
    conn: Connection,
}

impl PlacesDatabase {
    pub fn open(places_db_path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            places_db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        register_regexp(&conn)?;
        Ok(Self { conn })
    }

    /// Iterate history visits, filtered by URL and/or a visit-time window.
    pub fn iter_history_records(
        &self,
        url: Option<&KeySearch>,
        earliest: Option<&DateTime<Utc>>,
        latest: Option<&DateTime<Utc>>,
    ) -> Result<Vec<HistoryRecord>> {
        let mut predicates: Vec<String> = Vec::new();
        let mut parameters: Vec<rusqlite::types::Value> = Vec::new();

        match url {
            None | Some(KeySearch::Predicate(_)) => {
                // predicate functions cannot be pushed into SQL
            }
            Some(KeySearch::Exact(value)) => {
                predicates.push(r#""moz_places"."url" = ?"#.to_string());
                parameters.push(value.clone().into());
            }
            Some(KeySearch::Pattern(pattern)) => {
                predicates.push(r#""moz_places"."url" REGEXP ?"#.to_string());
                parameters.push(pattern.as_str().to_string().into());
            }
            Some(KeySearch::AnyOf(values)) => {
                let marks = vec!["?"; values.len()].join(",");
                predicates.push(format!(r#""moz_places"."url" IN ({marks})"#));
                parameters.extend(values.iter().cloned().map(Into::into));
            }
        }

        if let Some(earliest) = earliest {
            predicates.push(r#""moz_historyvisits"."visit_date" >= ?"#.to_string());
            parameters.push(timestamps::to_unix_micros(earliest).into());
        }
        if let Some(latest) = latest {
            predicates.push(r#""moz_historyvisits"."visit_date" <= ?"#.to_string());
            parameters.push(timestamps::to_unix_micros(latest).into());
        }

        let mut query = HISTORY_QUERY.to_string();
        if !predicates.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&predicates.join(" AND "));
        }

        let mut records = self.run_history_query(&query, parameters)?;
        if let Some(KeySearch::Predicate(_)) = url {
            let search = url.expect("matched Some above");
            records.retain(|r| search.hits(r.url.as_deref().unwrap_or_default()));
        }
        Ok(records)
    }

    /// A single visit by `moz_historyvisits` rowid.
    pub fn get_record_with_id(&self, visit_id: i64) -> Result<Option<HistoryRecord>> {
        let query = format!("{HISTORY_QUERY} WHERE \"moz_historyvisits\".\"id\" = ?");
        let records = self.run_history_query(&query, vec![visit_id.into()])?;
        Ok(records.into_iter().next())
    }

    /// The visit this record was reached from, if any.
    pub fn get_parent_of(&self, record: &HistoryRecord) -> Result<Option<HistoryRecord>> {
        if !record.has_parent() {
            return Ok(None);
        }
        self.get_record_with_id(record.from_visit_id)
    }

    /// Visits whose `from_visit` points at this record.
    pub fn get_children_of(&self, record: &HistoryRecord) -> Result<Vec<HistoryRecord>> {
        let query = format!("{HISTORY_QUERY} WHERE \"moz_historyvisits\".\"from_visit\" = ?");
        self.run_history_query(&query, vec![record.rec_id.into()])
    }

    /// Iterate download records (visit type `download` plus annotations).
    pub fn iter_downloads(&self) -> Result<Vec<DownloadRecord>> {
        let query = format!(
            "{HISTORY_QUERY} WHERE \"moz_historyvisits\".\"visit_type\" = {}",
            VisitType::Download as i64
        );
        let visits = self.run_history_query(&query, Vec::new())?;

        let mut downloads = Vec::new();
        for visit in visits {
            let attributes = match visit.place_id {
                Some(place_id) => self.download_attributes(place_id)?,
                None => HashMap::new(),
            };

            let metadata: serde_json::Value = attributes
                .get(DOWNLOAD_METADATA_KEY)
                .map(|raw| serde_json::from_str(raw))
                .transpose()?
                .unwrap_or_else(|| serde_json::json!({}));

            let end_time = metadata
                .get("endTime")
                .and_then(serde_json::Value::as_i64)
                .map(timestamps::from_unix_millis)
                .transpose()?;
            let download_state = metadata
                .get("state")
                .and_then(serde_json::Value::as_i64)
                .and_then(DownloadState::from_i64)
                .unwrap_or(DownloadState::Unknown);

            downloads.push(DownloadRecord {
                downloaded_location: attributes.get(DESTINATION_FILE_URI_KEY).cloned(),
                deleted: metadata.get("deleted").and_then(serde_json::Value::as_bool),
                end_time,
                file_size: metadata.get("fileSize").and_then(serde_json::Value::as_i64),
                download_state,
                visit,
            });
        }
        Ok(downloads)
    }

    // ── Internal ───────────────────────────────────────────────────

    fn run_history_query(
        &self,
        query: &str,
        parameters: Vec<rusqlite::types::Value>,
    ) -> Result<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(query)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(parameters), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (rec_id, url, title, guid, place_id, visit_date, visit_type_raw, from_visit) =
                row?;
            let visit_type = VisitType::from_i64(visit_type_raw).ok_or_else(|| {
                FoxtrailError::InvalidFormat(format!("unknown visit type: {visit_type_raw}"))
            })?;
            records.push(HistoryRecord {
                rec_id,
                url,
                title,
                guid,
                place_id,
                visit_time: timestamps::from_unix_micros(visit_date)?,
                visit_type,
                from_visit_id: from_visit,
            });
        }
        Ok(records)
    }

    fn download_attributes(&self, place_id: i64) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare(DOWNLOAD_ATTRIBUTES_QUERY)?;
        let rows = stmt.query_map([place_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut attributes = HashMap::new();
        for row in rows {
            let (name, content) = row?;
            attributes.insert(name, content.unwrap_or_default());
        }
        Ok(attributes)
    }
}

/// `REGEXP` as an unanchored search, cached per prepared pattern.
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |vr| {
                Regex::new(vr.as_str()?)
                    .map_err(|e| Box::<dyn std::error::Error + Send + Sync>::from(e))
            })?;
            let text: Option<String> = ctx.get(1)?;
            Ok(match text {
                Some(text) => pattern.is_match(&text),
                None => false,
            })
        },
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Create a `places.sqlite` with the schema subset this reader uses.
    pub fn create_places_database(path: &Path) -> Connection {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE moz_places (id INTEGER PRIMARY KEY, url TEXT, title TEXT, guid TEXT);\
             CREATE TABLE moz_historyvisits (id INTEGER PRIMARY KEY, from_visit INTEGER, \
                 place_id INTEGER, visit_date INTEGER, visit_type INTEGER);\
             CREATE TABLE moz_annos (id INTEGER PRIMARY KEY, place_id INTEGER, \
                 anno_attribute_id INTEGER, content TEXT, dateAdded INTEGER, \
                 lastModified INTEGER);\
             CREATE TABLE moz_anno_attributes (id INTEGER PRIMARY KEY, name TEXT);",
        )
        .unwrap();
        conn
    }

    pub fn insert_place(conn: &Connection, id: i64, url: &str, title: &str) {
        conn.execute(
            "INSERT INTO moz_places VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, url, title, format!("guid-{id}")],
        )
        .unwrap();
    }

    pub fn insert_visit(
        conn: &Connection,
        id: i64,
        place_id: i64,
        visit_date_micros: i64,
        visit_type: i64,
        from_visit: i64,
    ) {
        conn.execute(
            "INSERT INTO moz_historyvisits VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, from_visit, place_id, visit_date_micros, visit_type],
        )
        .unwrap();
    }

    pub fn insert_download_annotations(
        conn: &Connection,
        place_id: i64,
        destination: &str,
        metadata_json: &str,
    ) {
        conn.execute(
            "INSERT OR IGNORE INTO moz_anno_attributes VALUES (1, 'downloads/destinationFileURI')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO moz_anno_attributes VALUES (2, 'downloads/metaData')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO moz_annos (place_id, anno_attribute_id, content, dateAdded, lastModified) \
             VALUES (?1, 1, ?2, 0, 0)",
            rusqlite::params![place_id, destination],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO moz_annos (place_id, anno_attribute_id, content, dateAdded, lastModified) \
             VALUES (?1, 2, ?2, 0, 0)",
            rusqlite::params![place_id, metadata_json],
        )
        .unwrap();
    }
}
