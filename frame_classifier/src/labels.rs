use crate::{
    config::{LabelsConfig, Validatable},
    error::ModelLoadError,
};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Class names in model output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    pub fn new(names: Vec<String>) -> Result<Self, ModelLoadError> {
        if names.is_empty() {
            return Err(ModelLoadError::EmptyLabels);
        }
        Ok(Self { names })
    }

    pub fn from_config(labels_cfg: &LabelsConfig) -> Result<Self, ModelLoadError> {
        labels_cfg
            .validate()
            .map_err(ModelLoadError::InvalidConfig)?;

        let path = labels_cfg.get_path();
        let names = load_labels(&path).map_err(|source| ModelLoadError::LabelsRead {
            path: path.clone(),
            source,
        })?;
        Self::new(names)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.names
    }
}

/// One label per line; surrounding whitespace and blank lines are ignored.
fn load_labels(filepath: &Path) -> io::Result<Vec<String>> {
    let file = File::open(filepath)?;
    let reader = io::BufReader::new(file);
    let mut labels = Vec::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let label = line.trim();
        if label.is_empty() {
            continue;
        }
        labels.push(label.to_string());
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn labels_config(dir: &TempDir, name: &str, contents: &str) -> LabelsConfig {
        std::fs::write(dir.path().join(name), contents).unwrap();
        LabelsConfig {
            labels_dir: dir.path().to_path_buf(),
            labels_file: name.to_string(),
        }
    }

    #[test]
    fn test_load_labels_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let config = labels_config(&dir, "labels.txt", "confident\n\n  not_confident  \n");

        let labels = load_labels(&config.get_path()).unwrap();
        assert_eq!(labels, vec!["confident", "not_confident"]);
    }

    #[test]
    fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let config = labels_config(&dir, "labels.txt", "a\nb\nc\n");

        let labels = ClassLabels::from_config(&config).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(1), Some("b"));
        assert_eq!(labels.get(3), None);
    }

    #[test]
    fn test_empty_labels_rejected() {
        let dir = TempDir::new().unwrap();
        let config = labels_config(&dir, "empty.txt", "\n   \n");

        assert!(matches!(
            ClassLabels::from_config(&config),
            Err(ModelLoadError::EmptyLabels)
        ));
    }

    #[test]
    fn test_missing_labels_file_fails_validation() {
        let config = LabelsConfig {
            labels_dir: PathBuf::from("./missing"),
            labels_file: "labels.txt".to_string(),
        };

        match ClassLabels::from_config(&config) {
            Err(ModelLoadError::InvalidConfig(message)) => {
                assert!(message.starts_with("Labels file not found"))
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_labels_path() {
        let dir = TempDir::new().unwrap();
        let config = LabelsConfig {
            labels_dir: dir.path().to_path_buf(),
            labels_file: String::new(),
        };

        assert!(matches!(
            ClassLabels::from_config(&config),
            Err(ModelLoadError::LabelsRead { .. })
        ));
    }
}
