//! Assertions over the batch directory

use std::path::Path;

/// Batch files in `dir`, sorted by name; hidden files excluded
pub fn batch_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to list batch directory")
        .map(|entry| {
            entry
                .expect("Failed to read directory entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

/// Assert that `dir` holds exactly the `expected` batch files
pub fn assert_batch_files(dir: &Path, expected: &[&str]) {
    assert_eq!(batch_files(dir), expected, "unexpected batch files in {}", dir.display());
}

/// Assert that no temporary file is left in `dir`
pub fn assert_no_partial_files(dir: &Path) {
    let leftovers: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to list batch directory")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".partial"))
        .collect();
    assert!(leftovers.is_empty(), "partial files left behind: {:?}", leftovers);
}

/// Record indices (the `indeks` attributes) stored in a batch file
pub fn stored_indices(path: &Path) -> Vec<u64> {
    let content = std::fs::read_to_string(path).expect("Failed to read batch file");
    content
        .split(r#"indeks=""#)
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .filter_map(|value| value.parse().ok())
        .collect()
}
