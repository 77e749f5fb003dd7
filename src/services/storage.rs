use bytes::Bytes;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Table;
use crate::services::export::{self, ExportFormat, ExportReport};
use crate::services::file_loader::{self, SUPPORTED_EXTENSIONS};

const CLEANED_PREFIX: &str = "cleaned_";

#[derive(Debug, Clone)]
pub struct DatasetStore {
    upload_dir: PathBuf,
    stats_dir: PathBuf,
}

impl DatasetStore {
    pub fn new(upload_dir: impl Into<PathBuf>, stats_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            stats_dir: stats_dir.into(),
        }
    }

    pub async fn init(&self) -> Result<(), AppError> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.stats_dir).await?;
        Ok(())
    }

    fn upload_path(&self, dataset_id: &str, extension: &str) -> PathBuf {
        self.upload_dir.join(format!("{}.{}", dataset_id, extension))
    }

    fn cleaned_path(&self, dataset_id: &str, extension: &str) -> PathBuf {
        self.upload_dir.join(format!("{}{}.{}", CLEANED_PREFIX, dataset_id, extension))
    }

    pub fn stats_path(&self, dataset_id: &str, format: ExportFormat) -> PathBuf {
        self.stats_dir.join(format!("stats_{}.{}", dataset_id, format.extension()))
    }

    pub async fn save_upload(&self, filename: &str, data: Bytes) -> Result<String, AppError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(file_loader::normalize_extension)
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::InvalidInput(
                "Unsupported file type. Only .csv, .xlsx, .json allowed.".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let dataset_id = Uuid::new_v4().to_string();
        let path = self.upload_path(&dataset_id, &extension);
        tokio::fs::write(&path, &data).await?;
        tracing::info!("Saved upload {} ({}KB) as {}", filename, data.len() / 1024, path.display());
        Ok(dataset_id)
    }

    async fn find_existing(&self, candidates: impl Iterator<Item = PathBuf>) -> Option<PathBuf> {
        for path in candidates {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }

    pub async fn load(&self, dataset_id: &str) -> Result<Table, AppError> {
        validate_id(dataset_id)?;
        for extension in SUPPORTED_EXTENSIONS {
            let path = self.upload_path(dataset_id, extension);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                let raw = tokio::fs::read(&path).await?;
                return file_loader::load(&raw, extension);
            }
        }
        Err(AppError::NotFound(format!("Dataset {} not found.", dataset_id)))
    }

    pub async fn save_cleaned(&self, dataset_id: &str, table: &Table) -> Result<ExportReport, AppError> {
        validate_id(dataset_id)?;
        let mut report = ExportReport::default();
        for format in ExportFormat::WRITABLE {
            let path = self.cleaned_path(dataset_id, format.extension());
            report.write(format, &path, export::encode_table(table, format)).await;
        }
        Ok(report)
    }

    pub async fn save_stats(&self, dataset_id: &str, stats: &serde_json::Value) -> Result<ExportReport, AppError> {
        validate_id(dataset_id)?;
        tokio::fs::create_dir_all(&self.stats_dir).await?;
        let mut report = ExportReport::default();
        for format in ExportFormat::WRITABLE {
            let path = self.stats_path(dataset_id, format);
            report.write(format, &path, export::encode_stats(stats, format)).await;
        }
        Ok(report)
    }

    pub async fn stats_file(&self, dataset_id: &str, format: ExportFormat) -> Result<Option<PathBuf>, AppError> {
        validate_id(dataset_id)?;
        Ok(self.find_existing(std::iter::once(self.stats_path(dataset_id, format))).await)
    }

    pub async fn download_file(&self, dataset_id: &str, format: ExportFormat) -> Result<PathBuf, AppError> {
        validate_id(dataset_id)?;
        let ext = format.extension();
        let candidates = [self.cleaned_path(dataset_id, ext), self.upload_path(dataset_id, ext)];
        self.find_existing(candidates.into_iter())
            .await
            .ok_or_else(|| AppError::NotFound("File not found.".to_string()))
    }

    pub async fn delete(&self, dataset_id: &str) -> Result<bool, AppError> {
        validate_id(dataset_id)?;
        let mut removed = false;
        for extension in SUPPORTED_EXTENSIONS {
            for path in [self.upload_path(dataset_id, extension), self.cleaned_path(dataset_id, extension)] {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed = true,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(removed)
    }
}

// Ids are generated UUIDs, anything else could escape the upload dir
fn validate_id(dataset_id: &str) -> Result<(), AppError> {
    Uuid::parse_str(dataset_id)
        .map(|_| ())
        .map_err(|_| AppError::NotFound(format!("Dataset {} not found.", dataset_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_ids_are_not_found() {
        assert!(matches!(validate_id("../etc/passwd"), Err(AppError::NotFound(_))));
        assert!(validate_id(&Uuid::new_v4().to_string()).is_ok());
    }

    #[test]
    fn paths_follow_naming_scheme() {
        let store = DatasetStore::new("up", "st");
        assert_eq!(store.cleaned_path("id", "csv"), PathBuf::from("up/cleaned_id.csv"));
        assert_eq!(store.stats_path("id", ExportFormat::Json), PathBuf::from("st/stats_id.json"));
    }
}
