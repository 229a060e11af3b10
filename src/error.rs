//! The module containing the crate main [`Error`] type

use std::fmt::Display;
use std::path::PathBuf;

/// The error type returned by every fallible operation in this crate
#[derive(Debug)]
pub enum Error {
    /// The input trace or the output index file could not be opened
    ///
    /// `IoOpen(path, source)`
    IoOpen(PathBuf, std::io::Error),
    /// A read from an already opened file failed or was truncated
    ///
    /// `IoRead(path, source)`
    IoRead(PathBuf, std::io::Error),
    /// A write to the output index file failed or was short
    ///
    /// `IoWrite(path, source)`
    IoWrite(PathBuf, std::io::Error),
    /// The index file's version word did not match the version this crate writes and reads
    ///
    /// `VersionMismatch { found, expected }`
    VersionMismatch {
        /// The version word actually found at offset 0 of the index file
        found: u32,
        /// The version word this crate requires
        expected: u32,
    },
    /// A Callgrind trace could not be parsed because its state became unrecoverable
    ///
    /// `MalformedInput { path, reason }`
    MalformedInput {
        /// The trace file this error was encountered in
        path: PathBuf,
        /// A human-readable description of what was malformed
        reason: String,
    },
    /// A query index was out of the bounds recorded in the index file
    ///
    /// `OutOfRange { index, bound }`
    OutOfRange {
        /// The index that was requested
        index: u32,
        /// The exclusive upper bound the index was checked against
        bound: u32,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoOpen(path, source) => {
                write!(f, "Failed to open '{}': {source}", path.display())
            }
            Self::IoRead(path, source) => {
                write!(f, "Failed reading '{}': {source}", path.display())
            }
            Self::IoWrite(path, source) => {
                write!(f, "Failed writing '{}': {source}", path.display())
            }
            Self::VersionMismatch { found, expected } => {
                write!(
                    f,
                    "Version mismatch: index was built with version '{found}' but this reader \
                     requires version '{expected}'"
                )
            }
            Self::MalformedInput { path, reason } => {
                write!(f, "Malformed trace '{}': {reason}", path.display())
            }
            Self::OutOfRange { index, bound } => {
                write!(f, "Index '{index}' is out of range: must be < '{bound}'")
            }
        }
    }
}

impl std::error::Error for Error {}
