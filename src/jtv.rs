//! JTV schedule archive decoder
//!
//! A JTV archive is a zip container holding two co-named blobs per channel:
//! a titles blob (`<name>.pdt`) and a schedule blob (`<name>.ndx`). The
//! titles blob is a magic header followed by length-prefixed strings; the
//! schedule blob is a count followed by fixed 12-byte records carrying a
//! little-endian FILETIME in their middle 8 bytes. Title `i` airs from
//! schedule mark `i` to mark `i + 1`.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;
use zip::ZipArchive;

use crate::store::ProgramRecord;
use crate::timestamp::GuideTime;

/// Entry suffix of the titles blob
pub const TITLES_EXT: &str = ".pdt";

/// Entry suffix of the schedule blob
pub const SCHEDULE_EXT: &str = ".ndx";

/// Fixed header every titles blob must start with
const TITLES_MAGIC: &[u8; 26] = b"JTV 3.x TV Program Data\n\n\n";

/// Errors raised while decoding an archive or one of its channels
#[derive(Debug, Error)]
pub enum JtvError {
    /// The archive file could not be read
    #[error("failed to read archive: {0}")]
    Io(#[from] std::io::Error),

    /// The container itself is not a readable zip archive
    #[error("invalid archive container: {0}")]
    Container(#[from] zip::result::ZipError),

    /// A titles blob did not start with the JTV magic header
    #[error("titles blob missing JTV magic header")]
    BadMagic,

    /// A schedule blob ended before its advertised record count
    #[error("schedule blob truncated")]
    TruncatedSchedule,

    /// A schedule timestamp fell outside the representable range
    #[error("schedule timestamp out of range")]
    TimestampRange,
}

/// Decodes a whole archive into program records
///
/// Channel-scoped problems (bad magic, truncated blob, missing schedule
/// twin) are logged at warn and skip that channel only; a malformed
/// container aborts the decode. Output order is not significant — the store
/// reindexes by `(channel, stop)`.
pub fn decode_archive(path: &Path, offset_hours: f64) -> Result<Vec<ProgramRecord>, JtvError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;
    let names: Vec<String> = archive.file_names().map(String::from).collect();

    let mut records = Vec::new();
    for name in names {
        let Some(channel) = name.strip_suffix(TITLES_EXT) else {
            continue;
        };
        // Purely numeric names are housekeeping entries, not channels.
        if !channel.is_empty() && channel.chars().all(|c| c.is_ascii_digit()) {
            debug!("skipping housekeeping entry '{}'", name);
            continue;
        }
        match decode_channel(&mut archive, channel, offset_hours) {
            Ok(mut channel_records) => records.append(&mut channel_records),
            Err(err) => warn!("skipping channel '{}': {}", channel, err),
        }
    }
    Ok(records)
}

/// Decodes one channel's titles/schedule pair
fn decode_channel(
    archive: &mut ZipArchive<File>,
    channel: &str,
    offset_hours: f64,
) -> Result<Vec<ProgramRecord>, JtvError> {
    let titles_blob = read_entry(archive, &format!("{}{}", channel, TITLES_EXT))?;
    let titles = parse_titles(&titles_blob)?;
    let schedule_blob = read_entry(archive, &format!("{}{}", channel, SCHEDULE_EXT))?;
    let marks = parse_schedule(&schedule_blob, offset_hours)?;
    Ok(pair_programs(channel, titles, &marks))
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<Vec<u8>, JtvError> {
    let mut entry = archive.by_name(name)?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Parses a titles blob: magic header, then `[u16 LE len][len bytes UTF-8]`
///
/// A missing magic header rejects the blob. A title that is not valid UTF-8
/// (or a length running past the end of the blob) stops consumption and
/// returns the titles decoded so far — a partial result, not a failure.
fn parse_titles(data: &[u8]) -> Result<Vec<String>, JtvError> {
    let Some(magic) = data.get(..TITLES_MAGIC.len()) else {
        return Err(JtvError::BadMagic);
    };
    if magic != TITLES_MAGIC {
        return Err(JtvError::BadMagic);
    }

    let mut rest = &data[TITLES_MAGIC.len()..];
    let mut titles = Vec::new();
    while rest.len() >= 2 {
        let len = u16::from_le_bytes([rest[0], rest[1]]) as usize;
        rest = &rest[2..];
        if rest.len() < len {
            break;
        }
        match std::str::from_utf8(&rest[..len]) {
            Ok(title) => titles.push(title.to_string()),
            Err(_) => break,
        }
        rest = &rest[len..];
    }
    Ok(titles)
}

/// Parses a schedule blob: `[u16 LE count]` then `count` 12-byte records
///
/// Only bytes 2..10 of each record are meaningful: a little-endian u64
/// FILETIME tick count. The surrounding 2-byte pads are discarded.
fn parse_schedule(data: &[u8], offset_hours: f64) -> Result<Vec<GuideTime>, JtvError> {
    let mut cursor = Cursor::new(data);
    let count = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| JtvError::TruncatedSchedule)? as usize;

    let mut marks = Vec::with_capacity(count);
    for _ in 0..count {
        cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| JtvError::TruncatedSchedule)?;
        let ticks = cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| JtvError::TruncatedSchedule)?;
        cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| JtvError::TruncatedSchedule)?;
        marks.push(GuideTime::from_filetime(ticks, offset_hours).ok_or(JtvError::TimestampRange)?);
    }
    Ok(marks)
}

/// Pairs titles with schedule marks
///
/// The final mark is only the stop bound of the previous program; titles
/// beyond `marks.len() - 1` have no boundary data and are dropped.
fn pair_programs(channel: &str, titles: Vec<String>, marks: &[GuideTime]) -> Vec<ProgramRecord> {
    let mut records = Vec::new();
    for (i, title) in titles.into_iter().enumerate() {
        if i + 1 >= marks.len() {
            break;
        }
        records.push(ProgramRecord {
            channel: channel.to_string(),
            start: marks[i],
            stop: marks[i + 1],
            description: title,
        });
    }
    records
}
