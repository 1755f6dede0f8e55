//! Input validation utilities.
//!
//! Common checks for command-line parameters and input files, returning structured
//! [`VardictError`] values with consistent messages.

use crate::errors::{Result, VardictError};
use std::fmt::Display;
use std::path::Path;

/// Validate that a file exists
///
/// # Example
/// ```
/// use vardict_lib::validation::validate_file_exists;
///
/// let result = validate_file_exists("/nonexistent/file.bam", "Input BAM");
/// assert!(result.is_err());
/// ```
pub fn validate_file_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Err(VardictError::InvalidFileFormat {
            file_type: description.to_string(),
            path: path_ref.display().to_string(),
            reason: "File does not exist".to_string(),
        });
    }
    Ok(())
}

/// Validate that multiple files exist, reporting the first missing one.
pub fn validate_files_exist<P: AsRef<Path>>(files: &[(P, &str)]) -> Result<()> {
    for (path, desc) in files {
        validate_file_exists(path, desc)?;
    }
    Ok(())
}

/// Validate that a BAM file has a `.bai` or `.csi` index next to it.
pub fn validate_bam_indexed<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let candidates =
        [format!("{display}.bai"), format!("{display}.csi"), path.with_extension("bai").display().to_string()];
    if candidates.iter().any(|c| Path::new(c).exists()) {
        Ok(())
    } else {
        Err(VardictError::InvalidFileFormat {
            file_type: "BAM".to_string(),
            path: display,
            reason: "No .bai or .csi index found".to_string(),
        })
    }
}

/// Validate that a fraction lies in `[0, 1]`.
pub fn validate_fraction(value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(VardictError::InvalidFrequency { value, min: 0.0, max: 1.0 });
    }
    Ok(())
}

/// Validate that a value is at least `min`.
pub fn validate_min_value<T: PartialOrd + Display>(value: T, min: T, name: &str) -> Result<()> {
    if value < min {
        return Err(VardictError::InvalidParameter {
            parameter: name.to_string(),
            reason: format!("must be >= {min}, got {value}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_validate_file_exists() {
        let temp_file = NamedTempFile::new().unwrap();
        validate_file_exists(temp_file.path(), "Test file").unwrap();

        let err = validate_file_exists("/nonexistent/file.bam", "Input BAM").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Input BAM"));
        assert!(msg.contains("does not exist"));
    }

    #[test]
    fn test_validate_files_exist_one_invalid() {
        let temp1 = NamedTempFile::new().unwrap();
        let files = vec![
            (temp1.path().to_path_buf(), "File 1"),
            (PathBuf::from("/nonexistent.bam"), "File 2"),
        ];
        let err = validate_files_exist(&files).unwrap_err();
        assert!(err.to_string().contains("File 2"));
    }

    #[test]
    fn test_validate_bam_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let bam = dir.path().join("sample.bam");
        std::fs::write(&bam, b"").unwrap();
        assert!(validate_bam_indexed(&bam).is_err());
        std::fs::write(dir.path().join("sample.bam.bai"), b"").unwrap();
        validate_bam_indexed(&bam).unwrap();
    }

    #[rstest]
    #[case(0.0, true)]
    #[case(0.05, true)]
    #[case(1.0, true)]
    #[case(-0.1, false)]
    #[case(1.5, false)]
    #[case(f64::NAN, false)]
    fn test_validate_fraction(#[case] value: f64, #[case] ok: bool) {
        assert_eq!(validate_fraction(value).is_ok(), ok);
    }

    #[rstest]
    #[case(2, 1, true)]
    #[case(1, 1, true)]
    #[case(0, 1, false)]
    fn test_validate_min_value(#[case] value: i32, #[case] min: i32, #[case] ok: bool) {
        let result = validate_min_value(value, min, "min-reads");
        assert_eq!(result.is_ok(), ok);
        if let Err(e) = result {
            assert!(e.to_string().contains("must be >= 1"));
        }
    }
}
