use super::{ArtifactWriter, CollaboratorError, FindingRow};
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::SessionId;
use std::path::PathBuf;

pub const FINDINGS_FILE_NAME: &str = "findings.csv";

/// Writes findings tables to `<reports_dir>/<session>/findings.csv`.
#[derive(Debug, Clone)]
pub struct CsvArtifactWriter {
    reports_dir: PathBuf,
}

impl CsvArtifactWriter {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    pub fn table_path(&self, session_id: &SessionId) -> PathBuf {
        self.reports_dir
            .join(session_id.as_str())
            .join(FINDINGS_FILE_NAME)
    }
}

pub fn encode_findings_table(rows: &[FindingRow]) -> Result<Vec<u8>, CollaboratorError> {
    let mut output = Vec::new();
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(&mut output);
        for row in rows {
            writer.serialize(row).map_err(|err| {
                CollaboratorError::failed("findings table", format!("failed to write csv row: {err}"))
            })?;
        }
        writer.flush().map_err(|source| CollaboratorError::Io {
            path: "findings table".to_string(),
            source,
        })?;
    }
    Ok(output)
}

impl ArtifactWriter for CsvArtifactWriter {
    fn write_findings_table(
        &self,
        session_id: &SessionId,
        rows: &[FindingRow],
    ) -> Result<String, CollaboratorError> {
        let path = self.table_path(session_id);
        let encoded = encode_findings_table(rows)?;
        atomic_write_file(&path, &encoded).map_err(|source| CollaboratorError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(session_id = %session_id, path = %path.display(), rows = rows.len(), "wrote findings table");
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_row_uses_report_column_names() {
        let encoded = encode_findings_table(&[FindingRow {
            target_name: "kafka-1".to_string(),
            finding_id: "oval:1".to_string(),
            title: "OpenSSL, heap overflow".to_string(),
            classification: "vulnerability".to_string(),
            references: "CVE-2024-1".to_string(),
        }])
        .expect("encode");
        let text = String::from_utf8(encoded).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("VM Name,Vulnerability ID,Title,Classification,References")
        );
        assert_eq!(
            lines.next(),
            Some("kafka-1,oval:1,\"OpenSSL, heap overflow\",vulnerability,CVE-2024-1")
        );
    }
}
