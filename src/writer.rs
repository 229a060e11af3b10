//! The binary index writer (spec.md §4.3)
//!
//! Serializes an [`Aggregate`] into the fixed little-endian layout the [`crate::reader::Reader`]
//! seeks over: a header, a function-offset table, per-function records in index order, and a
//! trailing block of raw header lines.

use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Error;
use crate::model::FunctionRecord;
use crate::preprocessor::Aggregate;

/// The version word this crate writes and requires on read
pub const VERSION: u32 = 7;

/// Serialize `aggregate` to `output`, per spec.md §4.3
///
/// Streams to a temporary file in `output`'s parent directory and renames it into place once
/// every patch has succeeded, so a crash mid-write never leaves a half-written file at `output`
/// (spec.md §7's "simpler write-then-rename" alternative to "version written last").
pub fn write_index(output: &Path, aggregate: &Aggregate) -> Result<(), Error> {
    let dir = output.parent().filter(|p| !p.as_os_str().is_empty());
    let mut temp = match dir {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    }
    .map_err(|source| Error::IoOpen(output.to_path_buf(), source))?;

    write_body(temp.as_file_mut(), aggregate)
        .map_err(|source| Error::IoWrite(output.to_path_buf(), source))?;

    temp.persist(output)
        .map_err(|e| Error::IoWrite(output.to_path_buf(), e.error))?;
    Ok(())
}

fn write_body(file: &mut std::fs::File, aggregate: &Aggregate) -> io::Result<()> {
    let function_count = u32::try_from(aggregate.functions.len()).unwrap_or(u32::MAX);

    let mut writer = BufWriter::new(file);

    // Placeholder header: version, headersPos (patched later), functionCount.
    writer.write_all(&VERSION.to_le_bytes())?;
    writer.write_all(&0u32.to_le_bytes())?;
    writer.write_all(&function_count.to_le_bytes())?;

    // Reserve the offset table; patched once every record's position is known.
    for _ in 0..function_count {
        writer.write_all(&0u32.to_le_bytes())?;
    }

    let mut offsets = Vec::with_capacity(function_count as usize);
    for (_, record) in aggregate.functions.iter() {
        let position = writer.stream_position()?;
        offsets.push(u32::try_from(position).unwrap_or(u32::MAX));
        write_record(&mut writer, record)?;
    }

    let headers_pos = writer.stream_position()?;

    for line in &aggregate.headers {
        writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            writer.write_all(b"\n")?;
        }
    }
    writer.flush()?;

    let file = writer.get_mut();
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&u32::try_from(headers_pos).unwrap_or(u32::MAX).to_le_bytes())?;

    file.seek(SeekFrom::Start(12))?;
    for offset in offsets {
        file.write_all(&offset.to_le_bytes())?;
    }

    Ok(())
}

fn write_record(writer: &mut impl Write, record: &FunctionRecord) -> io::Result<()> {
    let self_cost = truncate_cost(record.summed_self_cost);
    let inclusive_cost = truncate_cost(record.summed_inclusive_cost);

    writer.write_all(&record.line.to_le_bytes())?;
    writer.write_all(&self_cost.to_le_bytes())?;
    writer.write_all(&inclusive_cost.to_le_bytes())?;
    writer.write_all(&record.invocation_count.to_le_bytes())?;
    writer.write_all(&(u32::try_from(record.called_from.len()).unwrap_or(u32::MAX)).to_le_bytes())?;
    writer.write_all(&(u32::try_from(record.sub_calls.len()).unwrap_or(u32::MAX)).to_le_bytes())?;

    for (key, stats) in &record.called_from {
        writer.write_all(&key.other.to_le_bytes())?;
        writer.write_all(&key.line.to_le_bytes())?;
        writer.write_all(&stats.call_count.to_le_bytes())?;
        writer.write_all(&truncate_cost(stats.summed_call_cost).to_le_bytes())?;
    }
    for (key, stats) in &record.sub_calls {
        writer.write_all(&key.other.to_le_bytes())?;
        writer.write_all(&key.line.to_le_bytes())?;
        writer.write_all(&stats.call_count.to_le_bytes())?;
        writer.write_all(&truncate_cost(stats.summed_call_cost).to_le_bytes())?;
    }

    write_cstring(writer, &record.filename)?;
    write_cstring(writer, &record.name)?;

    Ok(())
}

fn write_cstring(writer: &mut impl Write, s: &str) -> io::Result<()> {
    writer.write_all(s.as_bytes())?;
    writer.write_all(b"\n")
}

/// Truncate a widened `u64` cost accumulator to the `u32` the on-disk format carries
///
/// Per spec.md §9's Open Question on accumulator width: values are accumulated in `u64` in
/// memory and only narrowed here, at write time. A value too large to fit is clamped to
/// `u32::MAX` rather than silently wrapping; in practice no real trace accumulates a single
/// field past this bound.
fn truncate_cost(cost: u64) -> u32 {
    u32::try_from(cost).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::model::FunctionTable;

    #[test]
    fn test_header_and_offset_table_round_trip_bytes() {
        let mut functions = FunctionTable::new();
        let main = functions.index_of("{main}");
        functions.record_own_invocation(main, "main.php".to_owned(), 1, 5);
        let foo = functions.index_of("foo");
        functions.record_own_invocation(foo, "main.php".to_owned(), 10, 2);
        functions.record_call(main, foo, 1, 3);

        let aggregate = Aggregate {
            functions,
            headers: vec!["summary: 100".to_owned()],
        };

        let dir = tempdir().expect("tempdir should be creatable");
        let path = dir.path().join("trace.cgidx");
        write_index(&path, &aggregate).expect("write should succeed");

        let bytes = std::fs::read(&path).expect("file should exist after persist");
        let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let headers_pos = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let function_count = u32::from_le_bytes(bytes[8..12].try_into().unwrap());

        assert_eq!(version, VERSION);
        assert_eq!(function_count, 2);
        assert!((headers_pos as usize) < bytes.len());

        let offset_0 = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let offset_1 = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        assert!(offset_0 >= 20);
        assert!(offset_1 > offset_0);

        let headers_block = &bytes[headers_pos as usize..];
        assert_eq!(headers_block, b"summary: 100\n");
    }

    #[test]
    fn test_truncate_cost_clamps_overflow() {
        assert_eq!(truncate_cost(5), 5);
        assert_eq!(truncate_cost(u64::from(u32::MAX) + 1), u32::MAX);
    }

    #[test]
    fn test_writer_rejects_unwritable_directory() {
        let aggregate = Aggregate {
            functions: FunctionTable::new(),
            headers: Vec::new(),
        };
        let bogus = Path::new("/nonexistent-dir-for-callgrind-index-tests/out.cgidx");
        assert!(write_index(bogus, &aggregate).is_err());
    }
}
