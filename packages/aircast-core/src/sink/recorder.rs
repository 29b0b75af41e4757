//! Recording file layout: `{base}/{YYYY-MM-DD}/{HH}-00[_N].{ext}`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, Timelike};

use crate::constants::ROTATE_SUFFIX_MAX;

/// The wall-clock hour a recording child was started in. Auto-mode
/// recorders rotate when the current stamp no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RotationStamp {
    pub date: NaiveDate,
    pub hour: u32,
}

impl RotationStamp {
    #[must_use]
    pub fn now() -> Self {
        Self::from(&Local::now())
    }

    #[must_use]
    pub fn from(at: &DateTime<Local>) -> Self {
        Self {
            date: at.date_naive(),
            hour: at.hour(),
        }
    }
}

/// Plans the file path for a recording child started now, creating the
/// dated parent directory.
pub(crate) async fn plan_recording_path(
    base: &Path,
    ext: &str,
) -> std::io::Result<(PathBuf, RotationStamp)> {
    let now = Local::now();
    let path = plan_recording_path_at(base, ext, &now).await?;
    Ok((path, RotationStamp::from(&now)))
}

/// Path planning with an explicit clock, shared with tests.
///
/// A colliding path gets `_1` through `_99` appended; beyond that the unix
/// timestamp guarantees practical uniqueness.
pub(crate) async fn plan_recording_path_at(
    base: &Path,
    ext: &str,
    at: &DateTime<Local>,
) -> std::io::Result<PathBuf> {
    let dir = base.join(at.format("%Y-%m-%d").to_string());
    tokio::fs::create_dir_all(&dir).await?;

    let stem = format!("{:02}-00", at.hour());
    let first = dir.join(format!("{stem}.{ext}"));
    if !exists(&first).await {
        return Ok(first);
    }
    for n in 1..=ROTATE_SUFFIX_MAX {
        let candidate = dir.join(format!("{stem}_{n}.{ext}"));
        if !exists(&candidate).await {
            return Ok(candidate);
        }
    }
    Ok(dir.join(format!("{stem}_{}.{ext}", at.timestamp())))
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 9, 14, 30, 5).unwrap()
    }

    #[tokio::test]
    async fn first_file_of_the_hour_has_no_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = plan_recording_path_at(dir.path(), "mp3", &at())
            .await
            .unwrap();
        assert_eq!(
            path,
            dir.path().join("2025-03-09").join("14-00.mp3"),
        );
        assert!(path.parent().unwrap().is_dir(), "dated dir is created");
    }

    #[tokio::test]
    async fn collisions_get_numeric_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let dated = dir.path().join("2025-03-09");
        tokio::fs::create_dir_all(&dated).await.unwrap();
        tokio::fs::write(dated.join("14-00.mp3"), b"").await.unwrap();
        tokio::fs::write(dated.join("14-00_1.mp3"), b"").await.unwrap();

        let path = plan_recording_path_at(dir.path(), "mp3", &at())
            .await
            .unwrap();
        assert_eq!(path, dated.join("14-00_2.mp3"));
    }

    #[tokio::test]
    async fn suffix_exhaustion_falls_back_to_unix_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let dated = dir.path().join("2025-03-09");
        tokio::fs::create_dir_all(&dated).await.unwrap();
        tokio::fs::write(dated.join("14-00.mkv"), b"").await.unwrap();
        for n in 1..=ROTATE_SUFFIX_MAX {
            tokio::fs::write(dated.join(format!("14-00_{n}.mkv")), b"")
                .await
                .unwrap();
        }

        let path = plan_recording_path_at(dir.path(), "mkv", &at())
            .await
            .unwrap();
        let expected = format!("14-00_{}.mkv", at().timestamp());
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), expected);
    }

    #[test]
    fn stamp_changes_at_the_hour_boundary() {
        let before = Local.with_ymd_and_hms(2025, 3, 9, 14, 59, 59).unwrap();
        let after = Local.with_ymd_and_hms(2025, 3, 9, 15, 0, 0).unwrap();
        assert_ne!(RotationStamp::from(&before), RotationStamp::from(&after));

        let same_hour = Local.with_ymd_and_hms(2025, 3, 9, 14, 0, 1).unwrap();
        assert_eq!(
            RotationStamp::from(&before),
            RotationStamp::from(&same_hour)
        );
    }

    #[test]
    fn stamp_changes_at_the_day_boundary() {
        let night = Local.with_ymd_and_hms(2025, 3, 9, 23, 59, 0).unwrap();
        let morning = Local.with_ymd_and_hms(2025, 3, 10, 23, 59, 0).unwrap();
        assert_ne!(RotationStamp::from(&night), RotationStamp::from(&morning));
    }
}
