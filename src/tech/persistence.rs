use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Load a JSON document from a file.
pub fn load_json<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Save a JSON document to a file, pretty-printed.
pub fn save_json<T: Serialize>(data: &T, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, data)?;
    writer.flush()?;
    Ok(())
}

/// Load a JSON document from a ZIP entry.
pub fn load_json_from_zip<T: for<'de> Deserialize<'de>>(
    archive: &mut zip::ZipArchive<File>,
    entry_path: &str,
) -> Result<T> {
    let mut contents = String::new();
    archive.by_name(entry_path)?.read_to_string(&mut contents)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save a JSON document as a ZIP entry, pretty-printed.
pub fn save_json_to_zip<T: Serialize, W: Write + Seek>(
    writer: &mut zip::ZipWriter<W>,
    data: &T,
    entry_path: &str,
) -> Result<()> {
    writer.start_file(entry_path, zip::write::FileOptions::default())?;
    let json = serde_json::to_string_pretty(data)?;
    writer.write_all(json.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    #[test]
    fn test_json_roundtrip() {
        let mut data = HashMap::new();
        data.insert("key1".to_string(), "value1".to_string());
        data.insert("key2".to_string(), "value2".to_string());

        let temp_file = NamedTempFile::new().unwrap();
        save_json(&data, temp_file.path()).unwrap();

        let loaded: HashMap<String, String> = load_json(temp_file.path()).unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_zip_entry_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut data = HashMap::new();
        data.insert("entry".to_string(), "value".to_string());

        {
            let file = File::create(temp_file.path()).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            save_json_to_zip(&mut zip, &data, "meta/test").unwrap();
            zip.finish().unwrap();
        }

        let file = File::open(temp_file.path()).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let loaded: HashMap<String, String> =
            load_json_from_zip(&mut archive, "meta/test").unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_load_json_missing_file() {
        let result: Result<HashMap<String, String>> = load_json("/nonexistent/file.json");
        assert!(result.is_err());
    }
}
