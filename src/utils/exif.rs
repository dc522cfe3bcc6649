use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};

/// Extract the EXIF capture date from an image, if it carries one.
pub fn extract_date_taken(path: &Path) -> Option<DateTime<Utc>> {
    let file = File::open(path).ok()?;
    let mut bufreader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader).ok()?;

    // DateTimeOriginal is when the shutter fired; DateTime is the last edit
    [exif::Tag::DateTimeOriginal, exif::Tag::DateTime]
        .into_iter()
        .filter_map(|tag| exif.get_field(tag, exif::In::PRIMARY))
        .find_map(|field| match &field.value {
            exif::Value::Ascii(values) => values.first().and_then(|raw| parse_exif_datetime(raw)),
            _ => None,
        })
}

/// EXIF format: "YYYY:MM:DD HH:MM:SS", local time with no zone; treated as UTC.
fn parse_exif_datetime(raw: &[u8]) -> Option<DateTime<Utc>> {
    let dt = exif::DateTime::from_ascii(raw).ok()?;
    let naive = NaiveDate::from_ymd_opt(dt.year.into(), dt.month.into(), dt.day.into())?
        .and_hms_opt(dt.hour.into(), dt.minute.into(), dt.second.into())?;

    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}
