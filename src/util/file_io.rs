
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// True when the path carries a `.gz` extension and should be (de)compressed.
fn is_gzipped(filename: &Path) -> bool {
    filename.extension().map(|e| e == "gz").unwrap_or(false)
}

/// Deserializes a JSON (or gzipped JSON) file into any owned type.
/// # Arguments
/// * `filename` - the file to read; compression is chosen by extension
/// # Errors
/// * if the file cannot be opened
/// * if its contents do not deserialize into `T`
pub fn load_json<T: serde::de::DeserializeOwned>(filename: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let file = File::open(filename)?;
    let result: T = if is_gzipped(filename) {
        serde_json::from_reader(flate2::read::MultiGzDecoder::new(file))?
    } else {
        serde_json::from_reader(file)?
    };
    Ok(result)
}

/// Serializes a value to pretty JSON, compressing when the path ends in `.gz`.
/// # Arguments
/// * `data` - the value to write
/// * `out_filename` - the destination; compression is chosen by extension
/// # Errors
/// * if the file cannot be created or written
/// * if serialization fails
pub fn save_json<T: serde::Serialize>(data: &T, out_filename: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::create(out_filename)?;
    if is_gzipped(out_filename) {
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::best());
        let mut writer = BufWriter::new(encoder);
        serde_json::to_writer_pretty(&mut writer, data)?;
        writer.flush()?;
    } else {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, data)?;
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    #[test]
    fn test_json_round_trip_plain_and_gz() {
        let temp = tempfile::tempdir().unwrap();
        let data: BTreeMap<String, usize> = [("A*01:01".to_string(), 3)].into_iter().collect();

        for name in ["scores.json", "scores.json.gz"] {
            let path = temp.path().join(name);
            save_json(&data, &path).unwrap();
            let loaded: BTreeMap<String, usize> = load_json(&path).unwrap();
            assert_eq!(loaded, data);
        }
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let result: Result<Vec<usize>, _> = load_json(Path::new("does/not/exist.json"));
        assert!(result.is_err());
    }
}
