use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{DatasetError, Result};

/// File endings of TIFF images, as written by microscopes and by the segmentation service.
pub const TIFF_SUFFIXES: &[&str] = &[".tif", ".tiff"];

#[derive(Clone, Debug)]
pub struct Filesystem {
    root: PathBuf,
}

impl Filesystem {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All files below the root whose (lowercase) name ends in one of `suffixes`, sorted by path.
    pub fn files_ending_in(&self, suffixes: &[&str]) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                let filename = path.file_name()?.to_str()?.to_lowercase();
                (entry.file_type().is_file()
                    && suffixes.iter().any(|s| filename.ends_with(&s.to_lowercase())))
                .then(|| path.to_path_buf())
            })
            .collect();
        files.sort();
        files
    }
}

/// Pair the files of two folders by their sorted position.
///
/// Unequal counts are an error: truncating would silently shift every later pair.
pub fn pair_sorted(
    left: &Filesystem,
    right: &Filesystem,
    suffixes: &[&str],
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let left_files = left.files_ending_in(suffixes);
    let right_files = right.files_ending_in(suffixes);
    if left_files.len() != right_files.len() {
        return Err(DatasetError::CountMismatch {
            left_dir: left.root().to_path_buf(),
            left: left_files.len(),
            right_dir: right.root().to_path_buf(),
            right: right_files.len(),
        });
    }
    Ok(left_files.into_iter().zip(right_files).collect())
}

/// File stem used as the stable identifier of an example.
pub fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn lists_sorted_with_suffix_filter() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        touch(dir.path(), "b.tiff");
        touch(dir.path(), "a.TIF");
        touch(dir.path(), "notes.txt");
        touch(&dir.path().join("nested"), "c.tif");

        let fs = Filesystem::new(dir.path().to_path_buf());
        let names: Vec<_> = fs
            .files_ending_in(TIFF_SUFFIXES)
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.TIF"),
                PathBuf::from("b.tiff"),
                PathBuf::from("nested/c.tif")
            ]
        );
    }

    #[test]
    fn pairing_rejects_count_mismatch() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        touch(left.path(), "0.tiff");
        touch(left.path(), "1.tiff");
        touch(right.path(), "0.tiff");

        let err = pair_sorted(
            &Filesystem::new(left.path().to_path_buf()),
            &Filesystem::new(right.path().to_path_buf()),
            TIFF_SUFFIXES,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DatasetError::CountMismatch {
                left: 2,
                right: 1,
                ..
            }
        ));
    }

    #[test]
    fn pairs_by_sorted_position() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        touch(left.path(), "img_1.tiff");
        touch(left.path(), "img_0.tiff");
        touch(right.path(), "img_0_masks.tiff");
        touch(right.path(), "img_1_masks.tiff");

        let pairs = pair_sorted(
            &Filesystem::new(left.path().to_path_buf()),
            &Filesystem::new(right.path().to_path_buf()),
            TIFF_SUFFIXES,
        )
        .unwrap();
        assert_eq!(stem_of(&pairs[0].0), "img_0");
        assert_eq!(stem_of(&pairs[0].1), "img_0_masks");
        assert_eq!(stem_of(&pairs[1].0), "img_1");
    }
}
