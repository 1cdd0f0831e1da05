use anyhow::{Context, Result, bail};
use std::path::Path;

use medtrack_core::models::PhotoUpload;
use medtrack_core::service::MedTracker;

use super::helpers::print_json;

/// Largest proof photo accepted.
const MAX_PHOTO_BYTES: u64 = 10 * 1024 * 1024;

pub(crate) async fn cmd_take(
    tracker: &MedTracker,
    medication: &str,
    photo: Option<&Path>,
    json: bool,
) -> Result<()> {
    let med = tracker.find_medication(medication).await?;
    let photo = photo.map(read_photo).transpose()?;

    let log = tracker
        .mark_taken(&med.id, photo)
        .await
        .with_context(|| format!("Failed to mark {} as taken", med.name))?;

    if json {
        print_json(&log)?;
    } else {
        println!("Marked {} as taken for {}", med.name, log.date.format("%Y-%m-%d"));
        if let Some(ref url) = log.photo_url {
            println!("  Photo: {url}");
        }
    }
    Ok(())
}

fn read_photo(path: &Path) -> Result<PhotoUpload> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Failed to read photo {}", path.display()))?;
    if !meta.is_file() {
        bail!("{} is not a file", path.display());
    }
    if meta.len() > MAX_PHOTO_BYTES {
        bail!(
            "Photo {} is too large ({} bytes, max {MAX_PHOTO_BYTES})",
            path.display(),
            meta.len()
        );
    }
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read photo {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("photo")
        .to_string();
    Ok(PhotoUpload { file_name, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_photo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morning pill.jpg");
        std::fs::write(&path, b"jpeg").unwrap();

        let photo = read_photo(&path).unwrap();
        assert_eq!(photo.file_name, "morning pill.jpg");
        assert_eq!(photo.bytes, b"jpeg");
    }

    #[test]
    fn test_read_photo_missing_or_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_photo(&dir.path().join("nope.jpg")).is_err());
        assert!(read_photo(dir.path()).is_err());
    }
}
