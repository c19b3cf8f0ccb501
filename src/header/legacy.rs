//! Text header of legacy containers.
//!
//! The decrypted header is two line-oriented sections, the regional one
//! (`Fn_<i>:` lines) followed by a UTF-8 BOM and the UTF-8 one (`U_<i>:`
//! lines).  Lines end in `\n\r\n` after the preamble and `\r\n` after entries:
//!
//! ```text
//! Passcode:AttacheCase\n\r\n
//! LastDateTime:2013/08/02 12:00:00\n\r\n
//! Fn_0:dir\\\t*\t16\t<change_dt>\t<change_tm>\t<create_dt>\t<create_tm>\r\n
//! Fn_1:dir\\a.txt\t43\t0\t...\r\n
//! EF BB BF Passcode:AttacheCase ... U_0:... U_1:...
//! ```
//!
//! Timestamps are Delphi `TTimeStamp` pairs: days since 0001-01-01 plus one,
//! and milliseconds since midnight UTC.

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::entry::FileEntry;
use crate::error::{AtcError, Result};

pub const PASSCODE_LINE: &str = "Passcode:AttacheCase";
/// Marker whose presence in the first decrypted unit proves the key.
pub const PASSCODE_MARK: &[u8] = b"Passcode";
const DATE_PREFIX: &str = "LastDateTime:";
const DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S";
const UTF8_SEPARATOR: &[u8] = &[0xef, 0xbb, 0xbf];

/// Days from 0001-01-01 to 1970-01-01.
const DAYS_TO_UNIX_EPOCH: i64 = 719_162;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyHeader {
    pub entries:        Vec<FileEntry>,
    /// `LastDateTime` as written, local time of the locking machine.
    pub last_date_time: String,
}

impl LegacyHeader {
    /// `LastDateTime` as Unix seconds, interpreted in the local time zone.
    pub fn created(&self) -> Option<i64> {
        let naive = NaiveDateTime::parse_from_str(self.last_date_time.trim(), DATE_FORMAT).ok()?;
        Local.from_local_datetime(&naive).earliest().map(|t| t.timestamp())
    }
}

// ── TTimeStamp ───────────────────────────────────────────────────────────────

/// Day numbers beyond the `i32` field saturate; milliseconds always fit.
pub fn unix_to_ttime(unix: i64) -> (i32, i32) {
    let days = unix.div_euclid(SECONDS_PER_DAY);
    let millis = unix.rem_euclid(SECONDS_PER_DAY) * 1000;
    let dt = (DAYS_TO_UNIX_EPOCH + days + 1).clamp(i32::MIN.into(), i32::MAX.into());
    (dt as i32, millis as i32)
}

pub fn ttime_to_unix(dt: i32, tm: i32) -> i64 {
    (dt as i64 - DAYS_TO_UNIX_EPOCH - 1) * SECONDS_PER_DAY + tm as i64 / 1000
}

/// `LastDateTime` text for a Unix timestamp, in local time.
pub fn format_date(unix: i64) -> String {
    match Local.timestamp_opt(unix, 0).earliest() {
        Some(t) => t.format(DATE_FORMAT).to_string(),
        None    => String::from("1970/01/01 00:00:00"),
    }
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// Names must survive the tab/line separated layout.
pub fn check_name(entry: &FileEntry) -> Result<()> {
    let bad = |b: &u8| matches!(*b, b'\t' | b'\r' | b'\n' | 0);
    if entry.name_sjis.iter().any(bad) || entry.name_utf8.as_bytes().iter().any(bad) {
        return Err(AtcError::InvalidEntry(format!(
            "`{}` contains a tab, line break or NUL", entry.display_name()
        )));
    }
    Ok(())
}

pub fn encode(entries: &[FileEntry], last_date_time: &str) -> Vec<u8> {
    let preamble = format!("{PASSCODE_LINE}\n\r\n{DATE_PREFIX}{last_date_time}\n\r\n");
    let mut sjis = preamble.clone().into_bytes();
    let mut utf8 = preamble.into_bytes();

    for (i, entry) in entries.iter().enumerate() {
        let size = if entry.is_directory() { "*".to_string() } else { entry.size.to_string() };
        let (change_dt, change_tm) = unix_to_ttime(entry.change_time);
        let (create_dt, create_tm) = unix_to_ttime(entry.create_time);
        let common = format!(
            "\t{size}\t{}\t{change_dt}\t{change_tm}\t{create_dt}\t{create_tm}\r\n",
            entry.attribute
        );

        sjis.extend_from_slice(format!("Fn_{i}:").as_bytes());
        sjis.extend_from_slice(&entry.name_sjis);
        sjis.extend_from_slice(common.as_bytes());

        utf8.extend_from_slice(format!("U_{i}:").as_bytes());
        utf8.extend_from_slice(entry.name_utf8.as_bytes());
        utf8.extend_from_slice(common.as_bytes());
    }

    sjis.extend_from_slice(UTF8_SEPARATOR);
    sjis.extend_from_slice(&utf8);
    sjis
}

// ── Parsing ──────────────────────────────────────────────────────────────────

pub fn parse(bytes: &[u8]) -> Result<LegacyHeader> {
    let lines: Vec<&[u8]> = bytes
        .split(|&b| b == b'\n')
        .map(|line| match line.iter().position(|&b| b == 0) {
            Some(nul) => &line[..nul],
            None      => line,
        })
        .filter(|line| *line != b"\r")
        .collect();

    let date_line = lines.get(1)
        .ok_or_else(|| AtcError::BrokenHeader("header has no date line".into()))?;
    let last_date_time = String::from_utf8_lossy(date_line)
        .trim_start_matches(DATE_PREFIX)
        .trim_end_matches('\r')
        .to_string();

    let sjis_lines: Vec<&[u8]> = lines.iter().copied().filter(|l| l.starts_with(b"Fn_")).collect();
    let utf8_lines: Vec<&[u8]> = lines.iter().copied().filter(|l| l.starts_with(b"U_")).collect();
    let utf8_available = utf8_lines.len() == sjis_lines.len();

    let mut entries = Vec::with_capacity(sjis_lines.len());
    for (i, sjis) in sjis_lines.iter().enumerate() {
        let utf8 = if utf8_available { Some(utf8_lines[i]) } else { None };
        entries.push(parse_entry(sjis, utf8)?);
    }

    Ok(LegacyHeader { entries, last_date_time })
}

fn parse_entry(sjis: &[u8], utf8: Option<&[u8]>) -> Result<FileEntry> {
    let (name_sjis, rest) = split_name(sjis);
    let name_utf8 = match utf8 {
        Some(line) => String::from_utf8_lossy(split_name(line).0).into_owned(),
        None       => String::new(),
    };

    let fields: Vec<&[u8]> = match rest {
        Some(rest) => rest.split(|&b| b == b'\t').collect(),
        None       => Vec::new(),
    };

    let (change_dt, change_tm, create_dt, create_tm) = match fields.len() {
        6 => (
            leading_i32(fields[2]),
            leading_i32(fields[3]),
            leading_i32(fields[4]),
            leading_i32(fields[5]),
        ),
        3 => {
            let v = leading_i32(fields[2]);
            (v, v, v, v)
        }
        n => {
            return Err(AtcError::BrokenHeader(format!(
                "entry `{}` has {n} fields", String::from_utf8_lossy(name_sjis)
            )));
        }
    };

    Ok(FileEntry {
        attribute:   leading_i32(fields[1]),
        size:        leading_int(fields[0], -1),
        name_sjis:   name_sjis.to_vec(),
        name_utf8,
        create_time: ttime_to_unix(create_dt, create_tm),
        change_time: ttime_to_unix(change_dt, change_tm),
    })
}

/// Name between the first `:` and the next tab, plus the bytes after the tab.
fn split_name(line: &[u8]) -> (&[u8], Option<&[u8]>) {
    let start = line.iter().position(|&b| b == b':').map_or(0, |p| p + 1);
    let tail = &line[start..];
    match tail.iter().position(|&b| b == b'\t') {
        Some(tab) => (&tail[..tab], Some(&tail[tab + 1..])),
        None      => (tail, None),
    }
}

/// Like [`leading_int`] for `int32_t` fields: out-of-range values fail the
/// extraction and become -1.
fn leading_i32(field: &[u8]) -> i32 {
    i32::try_from(leading_int(field, -1)).unwrap_or(-1)
}

/// Stream-extraction style integer parse: skip leading whitespace, read an
/// optional sign and digits, ignore the rest.  No digits yields `default`.
fn leading_int(field: &[u8], default: i64) -> i64 {
    let s = std::str::from_utf8(field).unwrap_or("").trim_start();
    let digits_end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    s[..digits_end].parse().unwrap_or(default)
}
