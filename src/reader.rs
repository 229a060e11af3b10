//! Random-access reads against a binary index written by [`crate::writer`] (spec.md §4.4)
//!
//! A [`Reader`] owns one open file handle for its lifetime and answers per-function queries by
//! seeking directly to the relevant offset; the source trace is never rescanned. Per spec.md §5,
//! `Reader` carries no internal locking - independent callers open independent `Reader`s on
//! independent handles rather than sharing one across threads.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::format::{format_cost, CostFormat};
use crate::writer::VERSION;

/// One function's header fields plus derived edge counts, as returned by [`Reader::function_info`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    /// The file the function's first observed invocation was attributed to
    pub file: String,
    /// The source line of the function's first observed invocation
    pub line: u32,
    /// The function's name
    pub function_name: String,
    /// Self cost, formatted per the reader's configured [`CostFormat`]
    pub summed_self_cost: String,
    /// Self cost, unformatted, exactly as stored on disk
    pub summed_self_cost_raw: u32,
    /// Inclusive cost (self plus sub-calls), formatted per the reader's configured [`CostFormat`]
    pub summed_inclusive_cost: String,
    /// How many times this function was invoked directly
    pub invocation_count: u32,
    /// The number of `calledFrom` edges (`M`)
    pub called_from_info_count: u32,
    /// The number of `subCall` edges (`K`)
    pub sub_call_info_count: u32,
}

/// One caller/callee edge, as returned by [`Reader::called_from_info`] / [`Reader::sub_call_info`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeInfo {
    /// The index of the other function on this edge (the caller for `calledFrom`, the callee for
    /// `subCalls`)
    pub function_nr: u32,
    /// The source line of the call site
    pub line: u32,
    /// How many times this edge was observed
    pub call_count: u32,
    /// The summed cost attributed to this edge, formatted per the reader's configured
    /// [`CostFormat`]
    pub summed_call_cost: String,
}

/// The per-trace headers block, cached after its first read
#[derive(Debug, Clone, PartialEq, Eq)]
struct Headers {
    runs: u32,
    summary: u32,
    cmd: String,
    creator: String,
    other: HashMap<String, String>,
}

impl Default for Headers {
    fn default() -> Self {
        Self {
            runs: 0,
            summary: 0,
            cmd: String::new(),
            creator: String::new(),
            other: HashMap::new(),
        }
    }
}

/// A random-access reader over one binary index file
pub struct Reader {
    path: PathBuf,
    file: File,
    headers_pos: u32,
    function_offsets: Vec<u32>,
    headers: Option<Headers>,
    format: CostFormat,
}

impl Reader {
    /// Open `path` and read its header and offset table
    ///
    /// Fails with [`Error::VersionMismatch`] if the file was written with a different version
    /// than this crate writes.
    pub fn open(path: &Path, format: CostFormat) -> Result<Self, Error> {
        let mut file = File::open(path).map_err(|source| Error::IoOpen(path.to_path_buf(), source))?;

        let version = read_u32(&mut file, path)?;
        if version != VERSION {
            return Err(Error::VersionMismatch { found: version, expected: VERSION });
        }
        let headers_pos = read_u32(&mut file, path)?;
        let function_count = read_u32(&mut file, path)?;

        let mut function_offsets = Vec::with_capacity(function_count as usize);
        for _ in 0..function_count {
            function_offsets.push(read_u32(&mut file, path)?);
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            headers_pos,
            function_offsets,
            headers: None,
            format,
        })
    }

    /// The number of functions recorded in this index's offset table
    pub fn function_count(&self) -> u32 {
        self.function_offsets.len() as u32
    }

    /// Read function `index`'s header fields and edge counts
    ///
    /// `format_override`, if given, presents the costs in that [`CostFormat`] instead of the
    /// one the `Reader` was constructed with (spec.md §4.5: "a per-call override is allowed").
    pub fn function_info(
        &mut self,
        index: u32,
        format_override: Option<CostFormat>,
    ) -> Result<FunctionInfo, Error> {
        let offset = self.offset_of(index)?;
        self.seek(offset)?;

        let line = self.read_u32()?;
        let self_cost = self.read_u32()?;
        let inclusive_cost = self.read_u32()?;
        let invocation_count = self.read_u32()?;
        let called_from_count = self.read_u32()?;
        let sub_call_count = self.read_u32()?;

        self.skip(16 * (called_from_count + sub_call_count))?;
        let file = self.read_cstring()?;
        let function_name = self.read_cstring()?;

        let format = format_override.unwrap_or(self.format);
        let summary = self.summary()?;
        Ok(FunctionInfo {
            file,
            line,
            function_name,
            summed_self_cost: format_cost(self_cost, summary, format),
            summed_self_cost_raw: self_cost,
            summed_inclusive_cost: format_cost(inclusive_cost, summary, format),
            invocation_count,
            called_from_info_count: called_from_count,
            sub_call_info_count: sub_call_count,
        })
    }

    /// Read the `j`-th `calledFrom` edge of function `index`
    ///
    /// See [`Reader::function_info`] for `format_override`.
    pub fn called_from_info(
        &mut self,
        index: u32,
        j: u32,
        format_override: Option<CostFormat>,
    ) -> Result<EdgeInfo, Error> {
        let offset = self.offset_of(index)?;
        self.seek(offset + 4 * (6 + 4 * j))?;
        self.read_edge(format_override)
    }

    /// Read the `j`-th `subCalls` edge of function `index`
    ///
    /// See [`Reader::function_info`] for `format_override`.
    pub fn sub_call_info(
        &mut self,
        index: u32,
        j: u32,
        format_override: Option<CostFormat>,
    ) -> Result<EdgeInfo, Error> {
        let offset = self.offset_of(index)?;
        // The 5th of the 6 header words (`calledFromCount`, `M`) is at byte offset `4 * (6 - 2)`
        // from the record start; read it, then skip the remaining `calledFrom` entries and the
        // `subCallCount` slot to reach the `j`-th `subCalls` edge.
        self.seek(offset + 4 * (6 - 2))?;
        let called_from_count = self.read_u32()?;
        self.skip(4 * (4 * (called_from_count + j) + 1))?;
        self.read_edge(format_override)
    }

    /// Look up a header by name
    ///
    /// `summary` and `runs` are derived aggregates across every `summary:` occurrence in the
    /// trace (see [`Reader::summary`]/[`Reader::runs`]); every other header is looked up as last
    /// write wins. Defaults, if the header never occurred: `runs = 0`, `summary = 0`,
    /// `cmd = ""`, `creator = ""`, and the empty string for anything else.
    pub fn get_header(&mut self, name: &str) -> Result<String, Error> {
        self.ensure_headers_loaded()?;
        let headers = self.headers.as_ref().expect("just loaded");
        Ok(match name {
            "runs" => headers.runs.to_string(),
            "summary" => headers.summary.to_string(),
            "cmd" => headers.cmd.clone(),
            "creator" => headers.creator.clone(),
            other => headers.other.get(other).cloned().unwrap_or_default(),
        })
    }

    /// The aggregated `summary` header (the sum of the time component of each `summary:`
    /// occurrence), used as the denominator for `percent`-format costs
    pub fn summary(&mut self) -> Result<u32, Error> {
        self.ensure_headers_loaded()?;
        Ok(self.headers.as_ref().expect("just loaded").summary)
    }

    /// The number of `summary:` header occurrences seen in the trace
    pub fn runs(&mut self) -> Result<u32, Error> {
        self.ensure_headers_loaded()?;
        Ok(self.headers.as_ref().expect("just loaded").runs)
    }

    fn ensure_headers_loaded(&mut self) -> Result<(), Error> {
        if self.headers.is_some() {
            return Ok(());
        }
        self.seek(self.headers_pos)?;
        let mut headers = Headers::default();
        let mut reader = BufReader::new(&mut self.file);
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader
                .read_line(&mut line)
                .map_err(|source| Error::IoRead(self.path.clone(), source))?;
            let trimmed = line.trim_end_matches('\n');
            if bytes_read == 0 || trimmed.is_empty() {
                break;
            }
            let Some((key, value)) = trimmed.split_once(": ") else {
                continue;
            };
            if key == "summary" {
                headers.runs += 1;
                let field = value.split_whitespace().next().unwrap_or("0");
                headers.summary += field.parse::<u32>().unwrap_or(0);
            } else if key == "cmd" {
                headers.cmd = value.to_owned();
            } else if key == "creator" {
                headers.creator = value.to_owned();
            } else {
                headers.other.insert(key.to_owned(), value.to_owned());
            }
        }
        self.headers = Some(headers);
        Ok(())
    }

    fn offset_of(&self, index: u32) -> Result<u32, Error> {
        self.function_offsets
            .get(index as usize)
            .copied()
            .ok_or(Error::OutOfRange { index, bound: self.function_count() })
    }

    fn read_edge(&mut self, format_override: Option<CostFormat>) -> Result<EdgeInfo, Error> {
        let function_nr = self.read_u32()?;
        let line = self.read_u32()?;
        let call_count = self.read_u32()?;
        let raw_cost = self.read_u32()?;
        let format = format_override.unwrap_or(self.format);
        let summary = self.summary()?;
        Ok(EdgeInfo {
            function_nr,
            line,
            call_count,
            summed_call_cost: format_cost(raw_cost, summary, format),
        })
    }

    fn seek(&mut self, offset: u32) -> Result<(), Error> {
        self.file
            .seek(SeekFrom::Start(u64::from(offset)))
            .map_err(|source| Error::IoRead(self.path.clone(), source))?;
        Ok(())
    }

    fn skip(&mut self, bytes: u32) -> Result<(), Error> {
        self.file
            .seek(SeekFrom::Current(i64::from(bytes)))
            .map_err(|source| Error::IoRead(self.path.clone(), source))?;
        Ok(())
    }

    fn read_u32(&mut self) -> Result<u32, Error> {
        read_u32(&mut self.file, &self.path)
    }

    fn read_cstring(&mut self) -> Result<String, Error> {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            self.file
                .read_exact(&mut byte)
                .map_err(|source| Error::IoRead(self.path.clone(), source))?;
            if byte[0] == b'\n' {
                break;
            }
            bytes.push(byte[0]);
        }
        String::from_utf8(bytes).map_err(|source| Error::MalformedInput {
            path: self.path.clone(),
            reason: format!("non-UTF-8 string in index: {source}"),
        })
    }
}

fn read_u32(file: &mut File, path: &Path) -> Result<u32, Error> {
    let mut buf = [0u8; 4];
    read_exact(file, path, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_exact(file: &mut File, path: &Path, buf: &mut [u8]) -> Result<(), Error> {
    match file.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == io::ErrorKind::UnexpectedEof => Err(Error::MalformedInput {
            path: path.to_path_buf(),
            reason: "index truncated".to_owned(),
        }),
        Err(source) => Err(Error::IoRead(path.to_path_buf(), source)),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::model::FunctionTable;
    use crate::preprocessor::Aggregate;
    use crate::writer::write_index;

    fn write_sample(path: &Path) {
        let mut functions = FunctionTable::new();
        let main = functions.index_of("{main}");
        functions.record_own_invocation(main, "main.php".to_owned(), 1, 100);
        let foo = functions.index_of("foo");
        functions.record_own_invocation(foo, "foo.php".to_owned(), 10, 25);
        functions.record_call(main, foo, 4, 25);

        let aggregate = Aggregate {
            functions,
            headers: vec!["summary: 100".to_owned(), "cmd: php test.php".to_owned()],
        };
        write_index(path, &aggregate).expect("write should succeed");
    }

    #[test]
    fn test_round_trip_function_info_and_edges() {
        let dir = tempdir().expect("tempdir should be creatable");
        let path = dir.path().join("trace.cgidx");
        write_sample(&path);

        let mut reader = Reader::open(&path, CostFormat::Usec).expect("open should succeed");
        assert_eq!(reader.function_count(), 2);

        let main_info = reader.function_info(0, None).expect("function_info should succeed");
        assert_eq!(main_info.function_name, "{main}");
        assert_eq!(main_info.file, "main.php");
        assert_eq!(main_info.summed_self_cost_raw, 100);
        assert_eq!(main_info.summed_inclusive_cost, "125");
        assert_eq!(main_info.called_from_info_count, 0);
        assert_eq!(main_info.sub_call_info_count, 1);

        let foo_info = reader.function_info(1, None).expect("function_info should succeed");
        assert_eq!(foo_info.function_name, "foo");
        assert_eq!(foo_info.called_from_info_count, 1);

        let edge = reader.sub_call_info(0, 0, None).expect("sub_call_info should succeed");
        assert_eq!(edge.function_nr, 1);
        assert_eq!(edge.line, 4);
        assert_eq!(edge.call_count, 1);
        assert_eq!(edge.summed_call_cost, "25");

        let dual = reader.called_from_info(1, 0, None).expect("called_from_info should succeed");
        assert_eq!(dual.function_nr, 0);
        assert_eq!(dual.line, 4);
        assert_eq!(dual.call_count, edge.call_count);
    }

    #[test]
    fn test_headers_summary_and_runs_aggregate() {
        let dir = tempdir().expect("tempdir should be creatable");
        let path = dir.path().join("trace.cgidx");
        write_sample(&path);

        let mut reader = Reader::open(&path, CostFormat::Usec).expect("open should succeed");
        assert_eq!(reader.summary().unwrap(), 100);
        assert_eq!(reader.runs().unwrap(), 1);
        assert_eq!(reader.get_header("cmd").unwrap(), "php test.php");
        assert_eq!(reader.get_header("creator").unwrap(), "");
    }

    #[test]
    fn test_out_of_range_index_is_an_error() {
        let dir = tempdir().expect("tempdir should be creatable");
        let path = dir.path().join("trace.cgidx");
        write_sample(&path);

        let mut reader = Reader::open(&path, CostFormat::Usec).expect("open should succeed");
        let err = reader.function_info(5, None).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { index: 5, bound: 2 }));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = tempdir().expect("tempdir should be creatable");
        let path = dir.path().join("trace.cgidx");
        std::fs::write(&path, [0xFFu8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();

        let err = Reader::open(&path, CostFormat::Usec).unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { found: 255, expected: 7 }));
    }
}
