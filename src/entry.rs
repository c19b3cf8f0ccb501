//! One logical file or directory stored in a container.

use std::borrow::Cow;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AtcError, Result};

/// `size` value marking a directory entry.
pub const DIRECTORY_SIZE: i64 = -1;
/// `FILE_ATTRIBUTE_DIRECTORY`.
pub const ATTRIBUTE_DIRECTORY: i32 = 0x10;
/// `FILE_ATTRIBUTE_NORMAL`, written for every file by AttacheCase.
pub const ATTRIBUTE_NORMAL: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// OS attribute bit flags, stored verbatim.
    pub attribute:   i32,
    /// Plaintext byte count, or [`DIRECTORY_SIZE`].
    pub size:        i64,
    /// Relative path in the regional (Shift-JIS) encoding, raw bytes.
    #[serde(serialize_with = "serialize_lossy")]
    pub name_sjis:   Vec<u8>,
    /// Relative path in UTF-8.
    pub name_utf8:   String,
    /// Unix seconds.
    pub create_time: i64,
    /// Unix seconds.
    pub change_time: i64,
}

impl FileEntry {
    /// A file entry whose name is stored identically in both encodings.
    ///
    /// Suitable for ASCII paths; callers with non-ASCII names should fill
    /// `name_sjis` with a real Shift-JIS rendering.  Sizes beyond `i64::MAX`
    /// are rejected with `InvalidEntry`.
    pub fn file(name: &str, size: u64) -> Result<Self> {
        let size = i64::try_from(size).map_err(|_| {
            AtcError::InvalidEntry(format!("`{name}` is too large ({size} bytes)"))
        })?;
        Ok(Self {
            attribute:   ATTRIBUTE_NORMAL,
            size,
            name_sjis:   name.as_bytes().to_vec(),
            name_utf8:   name.to_owned(),
            create_time: 0,
            change_time: 0,
        })
    }

    pub fn directory(name: &str) -> Self {
        Self {
            attribute:   ATTRIBUTE_DIRECTORY,
            size:        DIRECTORY_SIZE,
            name_sjis:   name.as_bytes().to_vec(),
            name_utf8:   name.to_owned(),
            create_time: 0,
            change_time: 0,
        }
    }

    pub fn with_times(mut self, create_time: i64, change_time: i64) -> Self {
        self.create_time = create_time;
        self.change_time = change_time;
        self
    }

    pub fn with_attribute(mut self, attribute: i32) -> Self {
        self.attribute = attribute;
        self
    }

    pub fn is_directory(&self) -> bool {
        self.size < 0
    }

    /// Bytes of file data this entry contributes to the container.
    pub fn data_len(&self) -> u64 {
        self.size.max(0) as u64
    }

    /// UTF-8 name when present, otherwise a lossy view of the regional name.
    pub fn display_name(&self) -> Cow<'_, str> {
        if self.name_utf8.is_empty() {
            String::from_utf8_lossy(&self.name_sjis)
        } else {
            Cow::Borrowed(&self.name_utf8)
        }
    }

    /// Reject entries the locker cannot represent.
    pub fn validate(&self) -> Result<()> {
        if self.size < DIRECTORY_SIZE {
            return Err(AtcError::InvalidEntry(format!(
                "size {} is below the directory sentinel", self.size
            )));
        }
        if self.name_sjis.is_empty() && self.name_utf8.is_empty() {
            return Err(AtcError::InvalidEntry("entry has no name".into()));
        }
        if self.name_sjis.len() > u16::MAX as usize || self.name_utf8.len() > u16::MAX as usize {
            return Err(AtcError::InvalidEntry(format!(
                "name of `{}` exceeds {} bytes", self.display_name(), u16::MAX
            )));
        }
        Ok(())
    }
}

/// Unix seconds for a filesystem timestamp, truncated to whole seconds.
pub fn unix_seconds(t: SystemTime) -> i64 {
    DateTime::<Utc>::from(t).timestamp()
}

fn serialize_lossy<S: serde::Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(bytes))
}
