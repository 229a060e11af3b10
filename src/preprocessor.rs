//! Streams a Callgrind text trace into the in-memory aggregation model
//!
//! This is the line-oriented state machine described in spec.md §4.2: three line prefixes
//! (`fl=`, `cfn=`, and everything else) drive the parse, with the `{main}` block's fixed three
//! extra lines (skip, `summary:`, skip) handled as a special case.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::compression::CompressionTable;
use crate::error::Error;
use crate::model::{FunctionIndex, FunctionTable, ProxyCall, ProxyFunctions, ProxyQueues};
use crate::writer;

/// The entry-point function name; the trace's `summary` header appears inside its block
pub const ENTRY_POINT: &str = "{main}";

/// The complete aggregated result of one preprocessing run, ready to be written to an index
pub struct Aggregate {
    /// Every observed function, indexed in first-observation order
    pub functions: FunctionTable,
    /// Every raw header line observed, in file order
    pub headers: Vec<String>,
}

/// Streams one Callgrind trace and builds the in-memory [`Aggregate`]
///
/// Each instance owns its own compression tables and proxy queues; nothing here is process-global
/// (spec.md §5, §9).
pub struct Preprocessor {
    proxies: ProxyFunctions,
    file_names: CompressionTable,
    function_names: CompressionTable,
    functions: FunctionTable,
    proxy_queues: ProxyQueues,
    headers: Vec<String>,
    current_function: Option<FunctionIndex>,
}

impl Preprocessor {
    /// Create a preprocessor configured with the given proxy-function set
    pub fn new(proxies: ProxyFunctions) -> Self {
        Self {
            proxies,
            file_names: CompressionTable::new(),
            function_names: CompressionTable::new(),
            functions: FunctionTable::new(),
            proxy_queues: ProxyQueues::new(),
            headers: Vec::new(),
            current_function: None,
        }
    }

    /// Run the full pipeline: parse `input`, then write the binary index to `output`
    pub fn preprocess(mut self, input: &Path, output: &Path) -> Result<(), Error> {
        debug!(
            "Preprocessing '{}' into '{}'",
            input.display(),
            output.display()
        );
        self.parse_file(input)?;
        let aggregate = self.into_aggregate();
        writer::write_index(output, &aggregate)
    }

    /// Parse `path` into this preprocessor's running aggregate, without writing anything
    pub fn parse_file(&mut self, path: &Path) -> Result<(), Error> {
        let file = File::open(path).map_err(|source| Error::IoOpen(path.to_owned(), source))?;
        let mut lines = BufReader::new(file).lines();
        self.parse(path, &mut lines)
    }

    /// Consume the preprocessor, returning the aggregate ready for [`writer::write_index`]
    pub fn into_aggregate(self) -> Aggregate {
        Aggregate {
            functions: self.functions,
            headers: self.headers,
        }
    }

    fn parse(
        &mut self,
        path: &Path,
        lines: &mut impl Iterator<Item = io::Result<String>>,
    ) -> Result<(), Error> {
        loop {
            let Some(line) = next_line(path, lines)? else {
                break;
            };

            if let Some(file_spec) = line.strip_prefix("fl=") {
                self.handle_function_block(path, file_spec, lines)?;
            } else if let Some(name_spec) = line.strip_prefix("cfn=") {
                self.handle_sub_call(path, name_spec, lines)?;
            } else if line.contains(": ") {
                self.headers.push(line);
            }
            // Any other line (blank, `calls=` seen out of sequence, comments, ...) is silently
            // skipped: Callgrind is an extensible format (spec.md §7).
        }
        Ok(())
    }

    /// `fl=<file>` then `fn=<name>` then (for `{main}` only) the `summary:` line and one more
    /// discarded line, then a cost line
    fn handle_function_block(
        &mut self,
        path: &Path,
        file_spec: &str,
        lines: &mut impl Iterator<Item = io::Result<String>>,
    ) -> Result<(), Error> {
        let filename = self.file_names.resolve(file_spec);

        let fn_line = require_line(path, lines, "fl= must be followed by fn=")?;
        let name_spec = fn_line
            .strip_prefix("fn=")
            .ok_or_else(|| malformed(path, format!("fl= was followed by '{fn_line}', not fn=")))?;
        let name = self.function_names.resolve(name_spec);

        if name == ENTRY_POINT {
            // Callgrind's layout puts the `summary:` header inside {main}'s own block. The three
            // lines immediately preceding the cost line are discard/summary/discard, and the
            // already-consumed `fn={main}` line above is the first of those three (spec.md
            // §4.2) - so only one more discard follows the summary line here.
            let summary_line =
                require_line(path, lines, "expected the summary header inside {main}")?;
            if summary_line.contains(": ") {
                self.headers.push(summary_line);
            }
            let _discard = require_line(path, lines, "expected a line after the summary header")?;
        }

        let cost_line = require_line(path, lines, "expected a cost line")?;
        let (line_number, cost) = parse_cost_line(path, &cost_line)?;

        let index = self.functions.index_of(&name);
        self.functions
            .record_own_invocation(index, filename, line_number, cost);
        self.current_function = Some(index);
        trace!("fl=/fn= block for '{name}' at index {index}: line {line_number}, cost {cost}");
        Ok(())
    }

    /// `cfn=<name>` then a discarded `calls=` line then a cost line
    fn handle_sub_call(
        &mut self,
        path: &Path,
        name_spec: &str,
        lines: &mut impl Iterator<Item = io::Result<String>>,
    ) -> Result<(), Error> {
        let caller = self
            .current_function
            .ok_or_else(|| malformed(path, "cfn= line appeared before any fl= block"))?;

        let callee_name = self.function_names.resolve(name_spec);
        let _calls_line = require_line(path, lines, "cfn= must be followed by a calls= line")?;
        let cost_line = require_line(path, lines, "expected a cost line after calls=")?;
        let (call_line, mut cost) = parse_cost_line(path, &cost_line)?;

        let caller_name = self.functions.record(caller).name.clone();
        let mut callee = self.functions.index_of(&callee_name);

        if self.proxies.contains(&caller_name) {
            // The caller is itself a proxy: defer attribution instead of recording an edge.
            self.proxy_queues.enqueue(
                caller,
                ProxyCall {
                    callee,
                    line: call_line,
                    cost,
                },
            );
            trace!("Deferred call through proxy '{caller_name}' to '{callee_name}'");
            return Ok(());
        }

        if self.proxies.contains(&callee_name) {
            let substitution = self.proxy_queues.dequeue(callee).ok_or_else(|| {
                malformed(
                    path,
                    format!("proxy '{callee_name}' was called but its substitution queue is empty"),
                )
            })?;
            callee = substitution.callee;
            cost = substitution.cost;
            trace!("Substituted proxy '{callee_name}' with its queued real callee");
        }

        self.functions.record_call(caller, callee, call_line, cost);
        Ok(())
    }
}

fn next_line(
    path: &Path,
    lines: &mut impl Iterator<Item = io::Result<String>>,
) -> Result<Option<String>, Error> {
    match lines.next() {
        None => Ok(None),
        Some(Ok(line)) => Ok(Some(line)),
        Some(Err(source)) => Err(Error::IoRead(path.to_owned(), source)),
    }
}

fn require_line(
    path: &Path,
    lines: &mut impl Iterator<Item = io::Result<String>>,
    context: &str,
) -> Result<String, Error> {
    next_line(path, lines)?.ok_or_else(|| malformed(path, format!("{context}, but found EOF")))
}

fn malformed(path: &Path, reason: impl Into<String>) -> Error {
    Error::MalformedInput {
        path: path.to_owned(),
        reason: reason.into(),
    }
}

/// Parse a `"<lineNumber> <cost>"` cost line
///
/// Only the first two whitespace-delimited fields matter; Callgrind may emit further per-event
/// cost columns which this crate, tracking a single aggregate cost per the data model, ignores.
fn parse_cost_line(path: &Path, line: &str) -> Result<(u32, u64), Error> {
    let mut fields = line.split_ascii_whitespace();
    let line_number = fields
        .next()
        .ok_or_else(|| malformed(path, "empty cost line"))?;
    let cost = fields
        .next()
        .ok_or_else(|| malformed(path, format!("cost line '{line}' has no cost field")))?;

    let line_number: u32 = line_number
        .parse()
        .map_err(|_| malformed(path, format!("cost line '{line}' has a non-numeric line number")))?;
    let cost: u64 = cost
        .parse()
        .map_err(|_| malformed(path, format!("cost line '{line}' has a non-numeric cost")))?;

    Ok((line_number, cost))
}

/// Convenience wrapper used by the CLI: preprocess `input` into `output` using `proxies`
pub fn preprocess(input: &Path, output: &Path, proxies: ProxyFunctions) -> Result<(), Error> {
    Preprocessor::new(proxies).preprocess(input, output)
}

/// The path the index file would be written at, given an input trace path, if the caller wants a
/// default derived from the trace name rather than an explicit output path
pub fn default_output_path(input: &Path) -> PathBuf {
    let mut output = input.to_owned();
    output.set_extension("cgidx");
    output
}
