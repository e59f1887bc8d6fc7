use crate::camera::CameraRecord;
use chrono::{DateTime, TimeZone};
use std::fmt;

/// Location of one archived log inside a blob store.
///
/// Format: `{YYYY-MM-DD}/{host}_{port}/systemlog_{HH-MM-SS}.{ext}`
///
/// - First level: date, so a day's collection sits together
/// - Second level: camera partition
/// - Filename: wall-clock time of the fetch, to the second
///
/// Two fetches of the same camera within one second map to the same key;
/// the later write wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationKey(String);

impl DestinationKey {
    /// Derive the key for `camera` at wall-clock time `at`.
    pub fn for_camera<Tz>(camera: &CameraRecord, at: &DateTime<Tz>, extension: &str) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        format!(
            "{date}/{camera}/systemlog_{time}.{ext}",
            date = at.format("%Y-%m-%d"),
            camera = camera.partition(),
            time = at.format("%H-%M-%S"),
            ext = extension,
        )
        .into()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the filename (`date/camera`).
    pub fn parent(&self) -> &str {
        self.0.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    }

    /// The camera segment of this key.
    pub fn camera_partition(&self) -> Option<&str> {
        camera_partition_of(&self.0)
    }
}

impl From<String> for DestinationKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Camera segment of any archive key laid out as `date/camera/file`.
pub fn camera_partition_of(key: &str) -> Option<&str> {
    let mut segments = key.split('/');
    let _date = segments.next()?;
    let camera = segments.next()?;
    // Must be followed by a filename
    segments.next()?;
    Some(camera)
}
