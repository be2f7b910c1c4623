//! Delimited load files for the bulk load modes
//!
//! Each row is written as its column values joined by the column separator
//! and terminated by the row separator. SQL NULL is written as `\N`. The
//! separators default to `&##&\t` and `$##$\n`, which ordinary values do
//! not contain; values that do are rejected before anything is written.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::LoadError;
use crate::database::config::LoaderSection;
use crate::database::{Dialect, SqlValue};
use crate::models::{ColumnDefinition, TableDefinition};

/// Text written for SQL NULL
pub const NULL_MARKER: &str = "\\N";

/// One row of a load file; `None` is SQL NULL
pub type TextRow = Vec<Option<String>>;

/// How batch rows reach their table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Multi-row INSERT statements
    #[default]
    BatchInsert,
    /// Write each batch to the run's load file, replacing its content, then
    /// bulk load it
    BatchFile,
    /// Append each batch to the run's load file, then bulk load the rows
    /// just appended
    BatchFileAppend,
}

impl LoadMode {
    pub fn uses_file(&self) -> bool {
        !matches!(self, LoadMode::BatchInsert)
    }
}

/// Byte range of a load file written for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSegment {
    pub offset: u64,
    pub len: u64,
}

/// Load file of one table within one run
#[derive(Debug, Clone)]
pub struct LoadFile {
    path: PathBuf,
    column_separator: String,
    row_separator: String,
}

impl LoadFile {
    /// `<work_dir>/<table>-loadable-<part>.tdd`
    pub fn for_table(config: &LoaderSection, table: &str, part: &str) -> Self {
        Self {
            path: Path::new(&config.work_dir).join(format!("{}-loadable-{}.tdd", table, part)),
            column_separator: config.column_separator.clone(),
            row_separator: config.row_separator.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, message: impl std::fmt::Display) -> LoadError {
        LoadError::LoadFile {
            path: self.path.clone(),
            message: message.to_string(),
        }
    }

    /// Whether a value's text survives a write and read back unchanged
    pub fn accepts(&self, text: &str) -> bool {
        text != NULL_MARKER
            && !text.contains(&self.column_separator)
            && !text.contains(&self.row_separator)
    }

    /// First column of a coerced row whose value cannot be written
    pub fn unrepresentable<'a>(
        &self,
        table: &'a TableDefinition,
        values: &[SqlValue],
        dialect: Dialect,
    ) -> Option<&'a ColumnDefinition> {
        table
            .columns
            .iter()
            .zip(values)
            .find(|(_, value)| {
                value
                    .to_param_text(dialect)
                    .is_some_and(|text| !self.accepts(&text))
            })
            .map(|(column, _)| column)
    }

    /// Write rows, replacing the file or appending to it
    pub fn write(&self, rows: &[TextRow], append: bool) -> Result<FileSegment, LoadError> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(|e| self.error(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&self.path)
            .map_err(|e| self.error(e))?;
        let offset = if append {
            file.metadata().map_err(|e| self.error(e))?.len()
        } else {
            0
        };

        let mut writer = BufWriter::new(file);
        let mut len = 0u64;
        for row in rows {
            let line = row
                .iter()
                .map(|value| value.as_deref().unwrap_or(NULL_MARKER))
                .collect::<Vec<_>>()
                .join(&self.column_separator);
            writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.write_all(self.row_separator.as_bytes()))
                .map_err(|e| self.error(e))?;
            len += (line.len() + self.row_separator.len()) as u64;
        }
        writer.flush().map_err(|e| self.error(e))?;

        tracing::debug!(
            "Wrote {} rows ({} bytes) to {}",
            rows.len(),
            len,
            self.path.display()
        );
        Ok(FileSegment { offset, len })
    }

    /// Read back the rows of a segment, expecting `columns` values per row
    pub fn read(&self, segment: FileSegment, columns: usize) -> Result<Vec<TextRow>, LoadError> {
        let mut file = File::open(&self.path).map_err(|e| self.error(e))?;
        file.seek(SeekFrom::Start(segment.offset))
            .map_err(|e| self.error(e))?;
        let mut content = String::new();
        file.take(segment.len)
            .read_to_string(&mut content)
            .map_err(|e| self.error(e))?;

        let mut rows = Vec::new();
        for (index, line) in content.split(&self.row_separator).enumerate() {
            if line.is_empty() {
                continue;
            }
            let row: TextRow = line
                .split(&self.column_separator)
                .map(|value| (value != NULL_MARKER).then(|| value.to_string()))
                .collect();
            if row.len() != columns {
                return Err(self.error(format!(
                    "row {} has {} values, expected {}",
                    index,
                    row.len(),
                    columns
                )));
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Delete the file; a missing file is not an error
    pub fn remove(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LogicalType;
    use tempfile::tempdir;

    fn load_file(dir: &Path) -> LoadFile {
        let config = LoaderSection {
            work_dir: dir.to_string_lossy().into_owned(),
            ..LoaderSection::default()
        };
        LoadFile::for_table(&config, "entry", "run-1")
    }

    fn row(values: &[Option<&str>]) -> TextRow {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_file_uses_default_separators() {
        let dir = tempdir().unwrap();
        let file = load_file(dir.path());
        file.write(&[row(&[Some("1"), None]), row(&[Some("2"), Some("x y")])], false)
            .unwrap();

        assert!(file.path().ends_with("entry-loadable-run-1.tdd"));
        let content = fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "1&##&\t\\N$##$\n2&##&\tx y$##$\n");
    }

    #[test]
    fn test_append_reads_only_new_segment() {
        let dir = tempdir().unwrap();
        let file = load_file(dir.path());
        let first = file.write(&[row(&[Some("1"), Some("a")])], true).unwrap();
        let second = file
            .write(&[row(&[Some("2"), None]), row(&[Some("3"), Some("line\nbreak")])], true)
            .unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, first.len);
        assert_eq!(
            file.read(second, 2).unwrap(),
            vec![row(&[Some("2"), None]), row(&[Some("3"), Some("line\nbreak")])]
        );

        let replaced = file.write(&[row(&[Some("4"), Some("d")])], false).unwrap();
        assert_eq!(replaced.offset, 0);
        assert_eq!(file.read(replaced, 2).unwrap().len(), 1);
    }

    #[test]
    fn test_column_count_mismatch_is_an_error() {
        let dir = tempdir().unwrap();
        let file = load_file(dir.path());
        let segment = file.write(&[row(&[Some("1")])], false).unwrap();
        assert!(matches!(file.read(segment, 2), Err(LoadError::LoadFile { .. })));
    }

    #[test]
    fn test_separators_in_values_are_unrepresentable() {
        let dir = tempdir().unwrap();
        let file = load_file(dir.path());
        let table = TableDefinition::new("entry")
            .with_column(ColumnDefinition::new("id", LogicalType::INTEGER))
            .with_column(ColumnDefinition::new("title", LogicalType::text()));

        let clean = [SqlValue::Int(1), SqlValue::Text("tab\there".to_string())];
        assert!(file.unrepresentable(&table, &clean, Dialect::DuckDb).is_none());

        let dirty = [SqlValue::Int(1), SqlValue::Text("a&##&\tb".to_string())];
        assert_eq!(
            file.unrepresentable(&table, &dirty, Dialect::DuckDb).unwrap().name,
            "title"
        );
        assert!(!file.accepts(NULL_MARKER));
    }

    #[test]
    fn test_load_mode_serde() {
        let mode: LoadMode = serde_json::from_str("\"batch_file_append\"").unwrap();
        assert_eq!(mode, LoadMode::BatchFileAppend);
        assert!(mode.uses_file());
        assert!(!LoadMode::default().uses_file());
    }
}
