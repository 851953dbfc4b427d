//! Segment codec: newline-delimited `timestamp,value` records.
//!
//! Sealed segments are gzip-compressed; the mirror of the open partition is
//! written in the clear so it can be appended to in place.

use crate::store::Store;
use crate::{PartsinkError, Result, Sample, Snapshot};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use tracing::debug;

/// Reads every record of a resource.
///
/// Empty lines are skipped. The first line that does not hold two integers
/// separated by a comma fails with [`PartsinkError::MalformedSegment`].
pub fn decode(store: &dyn Store, path: &Path, compressed: bool) -> Result<Snapshot> {
    let reader = store.reader(path)?;
    if compressed {
        decode_from(BufReader::new(GzDecoder::new(reader)), path)
    } else {
        decode_from(BufReader::new(reader), path)
    }
}

/// Overwrites a resource with the given samples.
pub fn encode(store: &dyn Store, path: &Path, samples: &[Sample], compressed: bool) -> Result<()> {
    let writer = store.writer(path)?;
    write_all(writer, path, samples, compressed)
}

/// Adds samples after the existing content of a resource.
///
/// Uncompressed resources on stores with true append support are written in
/// place. Anything else is rewritten in full, which is only meant for rare,
/// compressed appends.
pub fn append(store: &dyn Store, path: &Path, samples: &[Sample], compressed: bool) -> Result<()> {
    if !compressed && let Some(mut writer) = store.appender(path)? {
        write_records(&mut writer, samples).map_err(|e| PartsinkError::io_at(path, e))?;
        return writer.flush().map_err(|e| PartsinkError::io_at(path, e));
    }

    debug!(
        resource = %path.display(),
        compressed,
        appended = samples.len(),
        "Rewriting resource to append"
    );

    let mut current = if store.exists(path) {
        decode(store, path, compressed)?
    } else {
        Snapshot::new()
    };
    current.extend(Snapshot::from_values(samples.to_vec()));
    encode(store, path, current.values(), compressed)
}

fn write_all(
    writer: Box<dyn Write + Send>,
    path: &Path,
    samples: &[Sample],
    compressed: bool,
) -> Result<()> {
    let io_err = |e| PartsinkError::io_at(path, e);

    if compressed {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        write_records(&mut encoder, samples).map_err(io_err)?;
        let mut inner = encoder.finish().map_err(io_err)?;
        inner.flush().map_err(io_err)
    } else {
        let mut writer = writer;
        write_records(&mut writer, samples).map_err(io_err)?;
        writer.flush().map_err(io_err)
    }
}

fn write_records<W: Write + ?Sized>(writer: &mut W, samples: &[Sample]) -> std::io::Result<()> {
    for sample in samples {
        writeln!(writer, "{},{}", sample.timestamp, sample.value)?;
    }
    Ok(())
}

fn decode_from<R: Read>(reader: BufReader<R>, path: &Path) -> Result<Snapshot> {
    let mut values = Vec::new();

    for (index, line) in reader.split(b'\n').enumerate() {
        let line = line.map_err(|e| PartsinkError::io_at(path, e))?;
        if line.is_empty() {
            continue;
        }

        let sample = std::str::from_utf8(&line).ok().and_then(parse_record);
        match sample {
            Some(sample) => values.push(sample),
            None => {
                return Err(PartsinkError::MalformedSegment {
                    path: path.to_path_buf(),
                    line: index,
                    content: String::from_utf8_lossy(&line).into_owned(),
                });
            }
        }
    }

    Ok(Snapshot::from_values(values))
}

fn parse_record(line: &str) -> Option<Sample> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let (timestamp, value) = line.split_once(',')?;
    Some(Sample::new(timestamp.parse().ok()?, value.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::io::Write;

    fn samples() -> Vec<Sample> {
        vec![
            Sample::new(1000, 5),
            Sample::new(2000, -7),
            Sample::new(2000, 0),
            Sample::new(i64::MAX, i64::MIN),
        ]
    }

    fn write_raw(store: &MemoryStore, path: &Path, bytes: &[u8]) {
        let mut w = store.writer(path).unwrap();
        w.write_all(bytes).unwrap();
    }

    #[test]
    fn test_encode_decode_plain_and_compressed() {
        let store = MemoryStore::new();
        for compressed in [false, true] {
            let path = Path::new(if compressed { "s.csv.gz" } else { "s.csv" });
            encode(&store, path, &samples(), compressed).unwrap();
            let decoded = decode(&store, path, compressed).unwrap();
            assert_eq!(decoded.values(), samples().as_slice());
        }
    }

    #[test]
    fn test_encode_writes_line_format() {
        let store = MemoryStore::new();
        let path = Path::new("s.csv");
        encode(&store, path, &[Sample::new(1, 2), Sample::new(3, 4)], false).unwrap();
        assert_eq!(store.contents(path).unwrap(), b"1,2\n3,4\n");
    }

    #[test]
    fn test_encode_truncates() {
        let store = MemoryStore::new();
        let path = Path::new("s.csv");
        encode(&store, path, &samples(), false).unwrap();
        encode(&store, path, &[], false).unwrap();
        assert!(decode(&store, path, false).unwrap().is_empty());
    }

    #[test]
    fn test_decode_reports_malformed_line_index() {
        let store = MemoryStore::new();
        let path = Path::new("bad.csv");
        write_raw(&store, path, b"100,5\n200,x\n");

        match decode(&store, path, false).unwrap_err() {
            PartsinkError::MalformedSegment { line, content, .. } => {
                assert_eq!(line, 1);
                assert_eq!(content, "200,x");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_line_without_comma() {
        let store = MemoryStore::new();
        let path = Path::new("bad.csv");
        write_raw(&store, path, b"100,5\n200,6\n300\n");
        assert!(matches!(
            decode(&store, path, false),
            Err(PartsinkError::MalformedSegment { line: 2, .. })
        ));
    }

    #[test]
    fn test_decode_tolerates_missing_trailing_newline_and_blank_lines() {
        let store = MemoryStore::new();
        let path = Path::new("ok.csv");
        write_raw(&store, path, b"1,1\n\n2,2\r\n3,3");
        let decoded = decode(&store, path, false).unwrap();
        assert_eq!(
            decoded.values(),
            &[Sample::new(1, 1), Sample::new(2, 2), Sample::new(3, 3)]
        );
    }

    #[test]
    fn test_decode_of_plain_data_as_compressed_fails() {
        let store = MemoryStore::new();
        let path = Path::new("plain.csv");
        encode(&store, path, &samples(), false).unwrap();
        assert!(decode(&store, path, true).unwrap_err().is_storage_failure());
    }

    #[test]
    fn test_append_paths_are_equivalent() {
        let head = &samples()[..2];
        let tail = &samples()[2..];

        let fast = MemoryStore::new();
        let slow = MemoryStore::without_append();
        let path = Path::new("m.csv");
        for store in [&fast, &slow] {
            encode(store, path, head, false).unwrap();
            append(store, path, tail, false).unwrap();
        }

        assert_eq!(fast.contents(path), slow.contents(path));
        assert_eq!(
            decode(&fast, path, false).unwrap(),
            decode(&slow, path, false).unwrap()
        );
        assert_eq!(decode(&fast, path, false).unwrap().values(), samples().as_slice());
    }

    #[test]
    fn test_compressed_append_rewrites() {
        let store = MemoryStore::new();
        let path = Path::new("s.csv.gz");
        append(&store, path, &samples()[..1], true).unwrap();
        append(&store, path, &samples()[1..], true).unwrap();
        assert_eq!(
            decode(&store, path, true).unwrap().values(),
            samples().as_slice()
        );
    }

    #[test]
    fn test_append_creates_missing_resource() {
        let store = MemoryStore::without_append();
        let path = Path::new("new.csv");
        append(&store, path, &[Sample::new(9, 9)], false).unwrap();
        assert_eq!(store.contents(path).unwrap(), b"9,9\n");
    }
}
