use super::Extractor;
use crate::error::{DatamuleError, Result};
use crate::table::Table;
use async_trait::async_trait;
use polars::prelude::*;
use std::path::{Path, PathBuf};

/// Reads `.csv`, `.json` and `.parquet` files.
#[derive(Debug, Clone)]
pub struct FileExtractor {
    /// Rows scanned to infer CSV column types (`None` scans everything)
    pub infer_schema_length: Option<usize>,
}

impl Default for FileExtractor {
    fn default() -> Self {
        Self {
            infer_schema_length: Some(10_000),
        }
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    async fn extract(&self, source: &Path) -> Result<Table> {
        let path: PathBuf = source.to_path_buf();
        let infer_schema_length = self.infer_schema_length;

        let table = tokio::task::spawn_blocking(move || read_table(&path, infer_schema_length))
            .await
            .map_err(|e| DatamuleError::Extraction(format!("reader task failed: {e}")))??;

        tracing::info!(
            source = %source.display(),
            rows = table.height(),
            columns = table.width(),
            "Extracted table"
        );
        Ok(table)
    }
}

/// Read a file eagerly, choosing the reader by extension.
pub fn read_table(path: &Path, infer_schema_length: Option<usize>) -> Result<Table> {
    if !path.exists() {
        return Err(DatamuleError::Extraction(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();

    let read = match ext.as_str() {
        "csv" => LazyCsvReader::new(path)
            .with_infer_schema_length(infer_schema_length)
            .with_has_header(true)
            .finish()
            .and_then(LazyFrame::collect),
        "parquet" => LazyFrame::scan_parquet(path, Default::default()).and_then(LazyFrame::collect),
        "json" => std::fs::File::open(path)
            .map_err(PolarsError::from)
            .and_then(|file| JsonReader::new(file).finish()),
        _ => {
            return Err(DatamuleError::Extraction(format!(
                "Unsupported file type: .{ext}"
            )));
        }
    };

    read.map_err(|e| DatamuleError::Extraction(format!("Failed to read {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_read_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "fare_amount,payment_type").unwrap();
        writeln!(file, "12.5,card").unwrap();
        writeln!(file, "-3,cash").unwrap();

        let df = read_table(file.path(), Some(100)).unwrap();
        assert_eq!(df.shape(), (2, 2));
    }

    #[test]
    fn test_read_json_records() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"[{{"a": 1, "b": "x"}}, {{"a": 2, "b": null}}]"#).unwrap();

        let df = read_table(file.path(), None).unwrap();
        assert_eq!(df.height(), 2);
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let err = read_table(Path::new("/definitely/not/here.csv"), None).unwrap_err();
        assert!(matches!(err, DatamuleError::Extraction(ref msg) if msg.starts_with("File not found")));

        let file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        let err = read_table(file.path(), None).unwrap_err();
        assert!(err.to_string().contains("Unsupported file type"));
    }

    #[tokio::test]
    async fn test_extractor_runs_off_the_runtime() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "a\n1\n2\n3").unwrap();

        let df = FileExtractor::default().extract(file.path()).await.unwrap();
        assert_eq!(df.height(), 3);
    }
}
