//! File task primitives: read with optional decoding, write with the same
//! stat-carrying result shape.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::yaml_to_json;
use crate::types::FileResult;

/// Accepted `read_file.format` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    #[default]
    Raw,
    Json,
    Yaml,
}

impl FileFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" => Ok(FileFormat::Raw),
            "json" => Ok(FileFormat::Json),
            "yaml" => Ok(FileFormat::Yaml),
            other => bail!("unknown read_file.format {other:?} (expected \"json\" or \"yaml\")"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileReader;

impl FileReader {
    pub fn read(&self, path: &Path, format: FileFormat) -> Result<FileResult> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let data = match format {
            FileFormat::Raw => None,
            FileFormat::Json => Some(
                serde_json::from_str(&text)
                    .with_context(|| format!("decoding {} as json", path.display()))?,
            ),
            FileFormat::Yaml => {
                let value: serde_yaml::Value = serde_yaml::from_str(&text)
                    .with_context(|| format!("decoding {} as yaml", path.display()))?;
                Some(yaml_to_json(value)?)
            }
        };
        stat_result(path, text, data)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileWriter;

impl FileWriter {
    /// Write `content` plus a trailing newline to `path`, or to a fresh
    /// uniquely named temporary file when `path` is empty.
    pub fn write(&self, path: &Path, content: &str) -> Result<FileResult> {
        let target: PathBuf = if path.as_os_str().is_empty() {
            let file = tempfile::Builder::new()
                .prefix("buildflow-")
                .tempfile()
                .context("creating temporary file")?;
            let (_, kept) = file.keep().context("persisting temporary file")?;
            kept
        } else {
            path.to_path_buf()
        };
        let text = format!("{content}\n");
        fs::write(&target, &text).with_context(|| format!("writing {}", target.display()))?;
        stat_result(&target, text, None)
    }
}

fn stat_result(path: &Path, text: String, data: Option<Value>) -> Result<FileResult> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let modified = meta.modified().ok().map(DateTime::<Utc>::from);
    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode()
    };
    #[cfg(not(unix))]
    let mode = 0;
    Ok(FileResult {
        path: path.display().to_string(),
        text,
        size: meta.len(),
        mode,
        modified,
        is_dir: meta.is_dir(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        fs::write(&path, "plain text").unwrap();
        let result = FileReader.read(&path, FileFormat::Raw).unwrap();
        assert_eq!(result.text, "plain text");
        assert_eq!(result.size, 10);
        assert!(!result.is_dir);
        assert!(result.data.is_none());
        assert!(result.modified.is_some());
    }

    #[test]
    fn test_read_decodes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, r#"{"count": 2}"#).unwrap();
        let result = FileReader.read(&path, FileFormat::Json).unwrap();
        assert_eq!(result.data, Some(json!({"count": 2})));
    }

    #[test]
    fn test_read_decodes_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.yaml");
        fs::write(&path, "count: 2\nnames:\n- a\n").unwrap();
        let result = FileReader.read(&path, FileFormat::Yaml).unwrap();
        assert_eq!(result.data, Some(json!({"count": 2, "names": ["a"]})));
    }

    #[test]
    fn test_read_invalid_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        assert!(FileReader.read(&path, FileFormat::Json).is_err());
    }

    #[test]
    fn test_write_appends_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let result = FileWriter.write(&path, "content").unwrap();
        assert_eq!(result.text, "content\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "content\n");
    }

    #[test]
    fn test_write_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, "a much longer previous body").unwrap();
        FileWriter.write(&path, "short").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "short\n");
    }

    #[test]
    fn test_write_empty_path_creates_temp_file() {
        let result = FileWriter.write(Path::new(""), "scratch").unwrap();
        assert!(!result.path.is_empty());
        assert_eq!(fs::read_to_string(&result.path).unwrap(), "scratch\n");
        fs::remove_file(&result.path).unwrap();
    }

    #[test]
    fn test_format_parse_rejects_unknown() {
        assert_eq!(FileFormat::parse("").unwrap(), FileFormat::Raw);
        assert_eq!(FileFormat::parse("json").unwrap(), FileFormat::Json);
        assert_eq!(FileFormat::parse("yaml").unwrap(), FileFormat::Yaml);
        assert!(FileFormat::parse("toml").is_err());
    }
}
