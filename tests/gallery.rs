mod common;

use std::fs;

use anyhow::Result;
use rollcall::KioskError;
use rollcall::gallery::GalleryStore;
use rstest::*;
use tempfile::TempDir;

use common::*;

#[fixture]
fn dir() -> TempDir {
    TempDir::new().unwrap()
}

fn files(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[rstest]
fn append_without_face_leaves_nothing(dir: TempDir) -> Result<()> {
    let gallery = GalleryStore::new(dir.path());
    let result = gallery.append("42", "png", &png_bytes(NO_FACE), &mut FakeEngine);

    assert!(matches!(result, Err(KioskError::NoFaceDetected)));
    assert!(files(&dir).is_empty());
    assert!(gallery.encodings_for("42").is_empty());
    Ok(())
}

#[rstest]
fn append_rejects_bad_input(dir: TempDir) -> Result<()> {
    let gallery = GalleryStore::new(dir.path());
    let bytes = png_bytes(ENROLLED_FACE);

    assert!(matches!(gallery.append("", "png", &bytes, &mut FakeEngine), Err(KioskError::Validation(_))));
    assert!(matches!(
        gallery.append("../42", "png", &bytes, &mut FakeEngine),
        Err(KioskError::Validation(_))
    ));
    assert!(matches!(gallery.append("42", "gif", &bytes, &mut FakeEngine), Err(KioskError::Validation(_))));
    assert!(matches!(
        gallery.append("42", "png", b"not an image", &mut FakeEngine),
        Err(KioskError::Validation(_))
    ));
    assert!(files(&dir).is_empty());
    Ok(())
}

#[rstest]
fn append_replaces_image_and_keeps_encodings(dir: TempDir) -> Result<()> {
    let gallery = GalleryStore::new(dir.path());
    gallery.append("42", "png", &png_bytes(ENROLLED_FACE), &mut FakeEngine)?;
    gallery.append("42", "jpg", &png_bytes(ENROLLED_FACE), &mut FakeEngine)?;

    assert_eq!(files(&dir), vec!["42.jpg"]);
    assert_eq!(gallery.encodings_for("42").len(), 2);
    assert_eq!(gallery.identities(), vec![("42".to_string(), 2)]);
    Ok(())
}

#[rstest]
fn load_skips_unusable_images(dir: TempDir) -> Result<()> {
    fs::write(dir.path().join("1.png"), png_bytes(ENROLLED_FACE))?;
    fs::write(dir.path().join("2.png"), png_bytes(NO_FACE))?;
    fs::write(dir.path().join("3.jpg"), b"garbage")?;
    fs::write(dir.path().join("notes.txt"), b"hello")?;

    let gallery = GalleryStore::open(dir.path(), &mut FakeEngine)?;
    assert_eq!(gallery.identities(), vec![("1".to_string(), 1)]);
    assert_eq!(gallery.stored_identities().into_iter().collect::<Vec<_>>(), vec!["1", "2", "3"]);
    Ok(())
}

#[rstest]
fn best_match_prefers_closest_then_smaller_key(dir: TempDir) -> Result<()> {
    let gallery = GalleryStore::new(dir.path());
    gallery.append("b", "png", &png_bytes(150), &mut FakeEngine)?;
    gallery.append("a", "png", &png_bytes(150), &mut FakeEngine)?;
    gallery.append("c", "png", &png_bytes(190), &mut FakeEngine)?;

    let m = gallery.best_match(&[1.5, 0.], TOLERANCE).unwrap();
    assert_eq!(m.identity, "a");
    assert!(m.distance < 1e-6);

    let m = gallery.best_match(&[1.85, 0.], TOLERANCE).unwrap();
    assert_eq!(m.identity, "c");

    assert!(gallery.best_match(&[0.5, 0.], TOLERANCE).is_none());
    Ok(())
}
