//! This module turns the tags embedded in an image file into a [PictureFields] record.
//!
//! A [MetadataExtractor] produces an open-ended [TagMap], which is immediately folded into the fixed [ExifTags]
//! record by looking up the tag names listed in [tag].  Only `ExifTags` is consumed by [normalize], so the rest of
//! the server never sees the dynamic map.

use {
    crate::Compat,
    anyhow::Result,
    chrono::{NaiveDate, NaiveDateTime},
    lazy_static::lazy_static,
    lightbox_shared::{CaptureTimestamp, PictureFields},
    regex::{Captures, Regex},
    rexiv2::Metadata as ExifMetadata,
    serde_derive::Deserialize,
    std::collections::HashMap,
    tracing::warn,
};

/// Names of the tags the normalizer knows about
pub mod tag {
    pub const MODEL: &str = "Exif.Image.Model";
    pub const LENS_MODEL: &str = "Exif.Photo.LensModel";
    pub const EXPOSURE_PROGRAM: &str = "Exif.Photo.ExposureProgram";
    pub const F_NUMBER: &str = "Exif.Photo.FNumber";
    pub const ISO_SPEED_RATINGS: &str = "Exif.Photo.ISOSpeedRatings";
    pub const EXPOSURE_TIME: &str = "Exif.Photo.ExposureTime";
    pub const FOCAL_LENGTH: &str = "Exif.Photo.FocalLength";
    pub const FLASH: &str = "Exif.Photo.Flash";

    /// Combined date and time, e.g. "2021:05:01 10:00:00"
    pub const DATE_TIME: &str = "Exif.Image.DateTime";

    pub const CREATE_DATE: &str = "Xmp.xmp.CreateDate";
    pub const DATE_TIME_ORIGINAL: &str = "Exif.Photo.DateTimeOriginal";

    pub const USER_COMMENT: &str = "Exif.Photo.UserComment";

    /// Pixel dimensions, which are not tags proper but are reported alongside them by the extractor
    pub const PIXEL_WIDTH: &str = "Image.PixelWidth";
    pub const PIXEL_HEIGHT: &str = "Image.PixelHeight";

    /// Tags read as human-readable strings
    pub const TEXT: &[&str] = &[
        MODEL,
        LENS_MODEL,
        EXPOSURE_PROGRAM,
        F_NUMBER,
        ISO_SPEED_RATINGS,
        EXPOSURE_TIME,
        FOCAL_LENGTH,
        FLASH,
        DATE_TIME,
        CREATE_DATE,
        DATE_TIME_ORIGINAL,
    ];
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum TagValue {
    Number(u32),
    Text(String),
    Bytes(Vec<u8>),
}

impl TagValue {
    fn text(&self) -> Option<String> {
        match self {
            TagValue::Text(text) => Some(text.clone()),
            TagValue::Number(number) => Some(number.to_string()),
            TagValue::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    fn number(&self) -> Option<u32> {
        match self {
            TagValue::Number(number) => Some(*number),
            TagValue::Text(text) => text.trim().parse().ok(),
            TagValue::Bytes(_) => None,
        }
    }

    fn bytes(&self) -> Option<Vec<u8>> {
        match self {
            TagValue::Bytes(bytes) => Some(bytes.clone()),
            TagValue::Text(text) => Some(text.as_bytes().to_vec()),
            TagValue::Number(_) => None,
        }
    }
}

pub type TagMap = HashMap<String, TagValue>;

/// Reads the tags embedded in raw image bytes.
///
/// An error means the file cannot be ingested, but says nothing about other files.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, data: &[u8]) -> Result<TagMap>;
}

/// [MetadataExtractor] backed by gexiv2
pub struct Exiv2Extractor;

impl Exiv2Extractor {
    pub fn new() -> Result<Self> {
        rexiv2::initialize()?;

        Ok(Self)
    }
}

impl MetadataExtractor for Exiv2Extractor {
    fn extract(&self, data: &[u8]) -> Result<TagMap> {
        let metadata = ExifMetadata::new_from_buffer(data)?;

        let mut tags = TagMap::new();

        for &name in tag::TEXT {
            if metadata.has_tag(name) {
                match metadata.get_tag_interpreted_string(name) {
                    Ok(value) => {
                        tags.insert(name.to_owned(), TagValue::Text(value));
                    }
                    Err(e) => warn!("unable to read tag {}: {:?}", name, e),
                }
            }
        }

        if metadata.has_tag(tag::USER_COMMENT) {
            if let Ok(raw) = metadata.get_tag_raw(tag::USER_COMMENT) {
                tags.insert(tag::USER_COMMENT.to_owned(), TagValue::Bytes(raw));
            }
        }

        for (name, value) in [
            (tag::PIXEL_WIDTH, metadata.get_pixel_width()),
            (tag::PIXEL_HEIGHT, metadata.get_pixel_height()),
        ] {
            if let Ok(value) = u32::try_from(value) {
                if value > 0 {
                    tags.insert(name.to_owned(), TagValue::Number(value));
                }
            }
        }

        Ok(tags)
    }
}

/// The subset of an image's tags which the server cares about
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExifTags {
    pub camera: Option<String>,
    pub lens: Option<String>,
    pub exposure_mode: Option<String>,
    pub aperture: Option<String>,
    pub iso: Option<String>,
    pub exposure_time: Option<String>,
    pub focal_length: Option<String>,
    pub flash: Option<String>,
    pub date_time: Option<String>,
    pub create_date: Option<String>,
    pub user_comment: Option<Vec<u8>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ExifTags {
    pub fn from_tags(tags: &TagMap) -> Self {
        let text = |names: &[&str]| names.iter().find_map(|name| tags.get(*name)?.text());
        let number = |name: &str| tags.get(name)?.number();

        Self {
            camera: text(&[tag::MODEL]),
            lens: text(&[tag::LENS_MODEL]),
            exposure_mode: text(&[tag::EXPOSURE_PROGRAM]),
            aperture: text(&[tag::F_NUMBER]),
            iso: text(&[tag::ISO_SPEED_RATINGS]),
            exposure_time: text(&[tag::EXPOSURE_TIME]),
            focal_length: text(&[tag::FOCAL_LENGTH]),
            flash: text(&[tag::FLASH]),
            date_time: text(&[tag::DATE_TIME]),
            create_date: text(&[tag::CREATE_DATE, tag::DATE_TIME_ORIGINAL]),
            user_comment: tags.get(tag::USER_COMMENT).and_then(TagValue::bytes),
            width: number(tag::PIXEL_WIDTH),
            height: number(tag::PIXEL_HEIGHT),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("no usable capture timestamp")]
    MissingTimestamp,

    #[error("missing pixel dimensions")]
    MissingDimensions,
}

lazy_static! {
    static ref STRICT_DATE_TIME_PATTERN: Regex =
        Regex::new(r"^(\d{4}):(\d{2}):(\d{2}) (\d{2}):(\d{2}):(\d{2})$").unwrap();
    static ref LENIENT_DATE_TIME_PATTERN: Regex =
        Regex::new(r"(\d{4})\D+(\d{1,2})\D+(\d{1,2})\D+(\d{1,2})\D+(\d{1,2})\D+(\d{1,2})").unwrap();
}

fn from_captures(c: &Captures) -> Option<NaiveDateTime> {
    let field = |index: usize| c[index].parse::<u32>().ok();

    NaiveDate::from_ymd_opt(c[1].parse().ok()?, field(2)?, field(3)?)?.and_hms_opt(
        field(4)?,
        field(5)?,
        field(6)?,
    )
}

fn parse_strict(s: &str) -> Option<NaiveDateTime> {
    STRICT_DATE_TIME_PATTERN
        .captures(s)
        .as_ref()
        .and_then(from_captures)
}

fn parse_lenient(s: &str) -> Option<NaiveDateTime> {
    LENIENT_DATE_TIME_PATTERN
        .captures(s)
        .as_ref()
        .and_then(from_captures)
}

fn combined_date_time(raw: &str, compat: &Compat) -> Option<NaiveDateTime> {
    if compat.legacy_datetime_join {
        let mut split = raw.trim().split(' ');
        let date = split.next()?.replace(':', "/");
        let time = split.next()?;

        // The legacy assembly leaves a stray '}' after the date, which the lenient pattern skips over.
        parse_lenient(&format!("{}}} {}", date, time))
    } else {
        parse_strict(raw.trim())
    }
}

/// Derive the capture timestamp, preferring the combined date/time tag over the creation date.
pub fn capture_timestamp(tags: &ExifTags, compat: &Compat) -> Option<CaptureTimestamp> {
    tags.date_time
        .as_deref()
        .and_then(|raw| {
            let datetime = combined_date_time(raw, compat);

            if datetime.is_none() {
                warn!("unable to parse date/time {:?}; trying creation date", raw);
            }

            datetime
        })
        .or_else(|| tags.create_date.as_deref().and_then(parse_lenient))
        .map(CaptureTimestamp::from_naive)
}

/// Decode a user comment given as a sequence of character codes.
///
/// NUL padding is dropped, the first "UNICODE" (or else "ASCII") encoding marker is removed, and single quotes
/// are doubled.
pub fn clean_note(codes: &[u8]) -> String {
    let mut note = codes
        .iter()
        .filter(|&&code| code != 0)
        .map(|&code| char::from(code))
        .collect::<String>();

    for marker in ["UNICODE", "ASCII"] {
        if let Some(index) = note.find(marker) {
            note.replace_range(index..index + marker.len(), "");
            break;
        }
    }

    note.replace('\'', "''")
}

pub fn dimensions(tags: &ExifTags) -> Result<(u32, u32), NormalizeError> {
    match (tags.width, tags.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => Ok((width, height)),
        _ => Err(NormalizeError::MissingDimensions),
    }
}

pub fn normalize(tags: &ExifTags, compat: &Compat) -> Result<PictureFields, NormalizeError> {
    let (width, height) = dimensions(tags)?;

    let timestamp = capture_timestamp(tags, compat).ok_or(NormalizeError::MissingTimestamp)?;

    let or_empty = |value: &Option<String>| value.clone().unwrap_or_default();

    Ok(PictureFields {
        timestamp,
        camera: or_empty(&tags.camera),
        lens: or_empty(&tags.lens),
        exposure_mode: or_empty(&tags.exposure_mode),
        aperture: or_empty(&tags.aperture),
        iso: or_empty(&tags.iso),
        exposure_time: or_empty(&tags.exposure_time),
        focal_length: or_empty(&tags.focal_length),
        flash: or_empty(&tags.flash),
        width,
        height,
        landscape: width > height,
        note: tags
            .user_comment
            .as_deref()
            .map(clean_note)
            .unwrap_or_default(),
    })
}
