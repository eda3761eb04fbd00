//! Module containing some utility functions that didn't fit anywhere else.

use std::{
    fs,
    io::{self, BufRead, BufReader},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use time::OffsetDateTime;

/// Produces a timestamp `String` of the current time in YYYY-MM-DD_HH-mm-SS format.
pub fn get_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format!(
        "{:04}-{:02}-{:02}_{:02}-{:02}-{:02}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Wall-clock time in seconds since the unix epoch.
///
/// Only meaningful for ordering events observed on the same host.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Count the lines of a text file. A trailing line without newline counts as well.
pub fn count_lines(path: impl AsRef<Path>) -> io::Result<usize> {
    let file = fs::File::open(path.as_ref())?;
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        line?;
        count += 1;
    }
    Ok(count)
}

/// Write `values` to `path`, one value per line, replacing any previous content.
pub fn write_lines<T: std::fmt::Display>(
    path: impl AsRef<Path>,
    values: impl IntoIterator<Item = T>,
) -> io::Result<()> {
    let mut content = String::new();
    for value in values {
        content.push_str(&value.to_string());
        content.push('\n');
    }
    fs::write(path, content)
}
