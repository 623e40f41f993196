use crate::utils::error::DetectError;
use crate::Result;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// 训练时的类别顺序，必须与模型输出一一对应
const EYE_CONDITIONS: [&str; 15] = [
    "Blepharitis",
    "Bulging_Eyes",
    "Cataract",
    "Chalazion",
    "Conjunctivitis",
    "Crossed_Eyes",
    "Diabetic_Retinopathy",
    "Eyelid_Drooping",
    "Glaucoma",
    "Jaundice",
    "Keratitis",
    "Normal",
    "Pterygium",
    "Stye",
    "Uveitis",
];

/// 有序类别表（索引即模型输出位置）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassList {
    labels: Arc<[String]>,
}

impl ClassList {
    pub fn new<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();

        if labels.is_empty() {
            return Err(DetectError::Config("Class list cannot be empty".to_string()));
        }
        if let Some(blank) = labels.iter().position(|l| l.trim().is_empty()) {
            return Err(DetectError::Config(format!("Class label at index {} is blank", blank)));
        }

        Ok(Self { labels: labels.into() })
    }

    /// 内置的15类眼部疾病列表
    pub fn eye_conditions() -> Self {
        Self {
            labels: EYE_CONDITIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// 从标签文件加载（每行一个类别，忽略空行）
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DetectError::Config(format!(
                "Labels file not found: {}",
                path.display()
            )));
        }

        tracing::info!("Loading class labels from: {}", path.display());

        let content = fs::read_to_string(path)
            .map_err(|e| DetectError::Config(format!("Failed to read labels file: {}", e)))?;

        Self::new(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        )
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eye_conditions_order() {
        let classes = ClassList::eye_conditions();
        assert_eq!(classes.len(), 15);
        assert_eq!(classes.get(0), Some("Blepharitis"));
        assert_eq!(classes.get(11), Some("Normal"));
        assert_eq!(classes.get(14), Some("Uveitis"));
        assert_eq!(classes.get(15), None);
        assert!(classes.contains("Glaucoma"));
        assert!(!classes.contains("glaucoma"));
    }

    #[test]
    fn test_empty_and_blank_labels_rejected() {
        assert!(ClassList::new(Vec::<String>::new()).is_err());
        assert!(ClassList::new(["a", " ", "c"]).is_err());
    }

    #[test]
    fn test_from_file_skips_blank_lines() {
        let path = std::env::temp_dir().join(format!("eddc-labels-{}.txt", uuid::Uuid::new_v4()));
        fs::write(&path, "cat\n\n  dog  \nbird\n").unwrap();

        let classes = ClassList::from_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(classes.iter().collect::<Vec<_>>(), vec!["cat", "dog", "bird"]);
    }

    #[test]
    fn test_missing_labels_file() {
        let err = ClassList::from_file(Path::new("/nonexistent/labels.txt")).unwrap_err();
        assert!(matches!(err, DetectError::Config(_)));
    }
}
