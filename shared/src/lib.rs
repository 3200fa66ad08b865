//! Lightbox shared (e.g. protocol) code
//!
//! This crate contains the [serde](https://crates.io/crates/serde)-enabled structs and enums which define the
//! records persisted by the Lightbox catalog, the lines of a review's event log, and the bodies exchanged with the
//! Lightbox server.

use {
    chrono::{NaiveDateTime, TimeZone, Utc},
    serde_derive::{Deserialize, Serialize},
    std::fmt::{self, Display},
};

/// Canonical representation of the moment a photograph was taken
///
/// Every timestamp the server derives from embedded metadata ends up in this form, regardless of which tag it
/// was read from.
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct CaptureTimestamp {
    /// Calendar form, e.g. "2021-05-01 10:00:00" (24-hour clock)
    pub calendar: String,

    /// Seconds since the Unix epoch, treating the (zoneless) capture time as UTC
    pub epoch: i64,
}

impl CaptureTimestamp {
    /// Build a `CaptureTimestamp` from a zoneless date and time.
    pub fn from_naive(datetime: NaiveDateTime) -> Self {
        Self {
            calendar: datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            epoch: Utc.from_utc_datetime(&datetime).timestamp(),
        }
    }
}

/// Descriptive fields of a photograph, as derived from its embedded metadata
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct PictureFields {
    pub timestamp: CaptureTimestamp,
    pub camera: String,
    pub lens: String,
    pub exposure_mode: String,
    pub aperture: String,
    pub iso: String,
    pub exposure_time: String,
    pub focal_length: String,
    pub flash: String,
    pub width: u32,
    pub height: u32,

    /// True if the picture is wider than it is tall
    pub landscape: bool,

    /// Free text note attached by the photographer, with quotes doubled
    pub note: String,
}

/// A photograph accepted into the main catalog
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct PictureRecord {
    pub id: i64,

    /// Storage-relative path, derived from the SHA-256 hash of the file contents
    ///
    /// Since identical files map to identical paths, this doubles as the deduplication key.
    pub path: String,

    #[serde(flatten)]
    pub fields: PictureFields,

    pub starred: bool,
    pub blurred: bool,

    /// Species this picture has been tagged with, if any
    pub species_id: Option<i64>,
}

/// A photograph belonging to a named review
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct ReviewPictureRecord {
    /// Path of the file relative to the review storage directory
    pub path: String,

    /// Original file name, unique within a review
    pub name: String,

    /// SHA-256 hash of the file contents as of the last reconciliation
    pub hash: String,

    pub review_id: i64,
    pub review_name: String,
    pub landscape: bool,

    /// Reviewer decision code (e.g. undecided, accepted, rejected); never touched by reconciliation
    pub status: i64,

    /// Reviewer comment; never touched by reconciliation
    pub comment: String,
}

/// A named collection of pictures shared with a client under a password
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct Review {
    pub id: i64,
    pub name: String,
    pub password: String,

    /// Pictures of this review, ordered by name
    pub pictures: Vec<ReviewPictureRecord>,
}

/// Identifies which part of a long-running operation an [EventLogEntry] reports on
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Copy, Clone, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Catalog insert or update for a file
    Catalog,

    /// Derivative generation for a file
    Derivative,

    /// Construction of one archive chunk
    Archive,

    /// Terminator, written once everything else is done
    #[serde(rename = "ALL")]
    All,
}

impl Display for Step {
    /// Convert a `Step` to the string used on the wire (e.g. "catalog" or "ALL").
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Catalog => write!(f, "catalog"),
            Step::Derivative => write!(f, "derivative"),
            Step::Archive => write!(f, "archive"),
            Step::All => write!(f, "ALL"),
        }
    }
}

/// One line of an event log
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct EventLogEntry {
    /// What the entry is about: a file name, an archive name, or "ALL"
    pub subject: String,

    pub step: Step,
    pub succeeded: bool,
}

impl EventLogEntry {
    /// Subject used by the terminating entry of a run
    pub const ALL: &'static str = "ALL";

    /// Create the entry which marks the end of a run.
    pub fn terminator() -> Self {
        Self {
            subject: Self::ALL.into(),
            step: Step::All,
            succeeded: true,
        }
    }

    /// Return true if this entry marks the end of a run.
    pub fn is_terminator(&self) -> bool {
        self.step == Step::All
    }
}

/// Represents the query string of a POST /pictures request to the Lightbox server
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct UploadQuery {
    /// Original file name of the uploaded picture, used only for reporting
    pub name: String,
}

/// Star or unstar a picture
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Copy, Clone)]
#[serde(rename_all = "lowercase")]
pub enum PictureAction {
    Star,
    Unstar,
}

/// Represents the query string of a PUT /pictures/{id} request to the Lightbox server
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
pub struct PictureQuery {
    pub action: PictureAction,
}

/// Represents the body of a PUT /reviews/{name}/pictures/{picture} request to the Lightbox server, e.g.
/// `{"action": "setStatus", "value": 2}` or `{"action": "setComment", "value": "trop sombre"}`
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(tag = "action", content = "value", rename_all = "camelCase")]
pub enum ReviewPictureUpdate {
    SetStatus(i64),
    SetComment(String),
}

/// Represents a response to a POST /pictures request from the Lightbox server
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Default, Clone)]
pub struct IngestReport {
    /// Names of uploads which were added to the catalog
    pub accepted: Vec<String>,

    /// Names of uploads which were not added to the catalog (unreadable, no timestamp, duplicate, etc.)
    pub rejected: Vec<String>,

    /// Names of accepted uploads for which at least one derivative could not be generated
    ///
    /// Such a picture has a catalog row but is missing a thumbnail or half-resolution file; re-uploading it is
    /// harmless since the full resolution file is stored under its content hash.
    pub incomplete: Vec<String>,
}

/// Represents a response to a GET /reviews/{name}/events request from the Lightbox server
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Default, Clone)]
pub struct EventsResponse {
    /// Every well-formed entry logged so far by the current (or most recent) run, in order
    pub events: Vec<EventLogEntry>,

    /// True once the run has written its terminating entry
    pub done: bool,
}

/// Represents a response to a PUT /reviews/{name}/refresh request from the Lightbox server
#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Default, Clone)]
pub struct RefreshResponse {
    /// Names of the picture files the started run will process, in processing order
    pub pictures: Vec<String>,
}
