//! Durable storage for the CCS811 calibration baseline.
//!
//! The baseline is kept as a single line of text holding the decimal value, for example
//! `"33457\n"`. A missing record means no baseline has been captured yet, which is normal. A
//! record that exists but doesn't parse means the storage got corrupted; callers get a different
//! error for each so the two can be told apart in the logs.
use core::fmt::Write;
use heapless::String;

/// Longest record: five digits and the newline.
pub const RECORD_CAPACITY: usize = 6;

/// Baseline storage errors.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "use-defmt", derive(defmt::Format))]
pub enum BaselineError<E> {
    /// Nothing has been stored yet.
    NotFound,
    /// A record exists but is not a decimal 16-bit value.
    Parse,
    /// The underlying storage failed.
    Io(E),
}

impl<E> BaselineError<E> {
    /// Diagnostic code used when logging a skipped baseline load.
    pub fn code(&self) -> u8 {
        match self {
            BaselineError::NotFound => 1,
            BaselineError::Parse => 2,
            BaselineError::Io(_) => 3,
        }
    }
}

/// Storage for one baseline value. Storing overwrites whatever was there.
pub trait BaselineStore {
    type Error;

    fn exists(&mut self) -> bool;

    fn store(&mut self, value: u16) -> Result<(), BaselineError<Self::Error>>;

    fn retrieve(&mut self) -> Result<u16, BaselineError<Self::Error>>;

    /// Remove the record. Removing a record that isn't there is not an error.
    fn delete(&mut self) -> Result<(), BaselineError<Self::Error>>;
}

/// Render a baseline as its on-disk record.
pub fn format_record(value: u16) -> String<RECORD_CAPACITY> {
    let mut record = String::new();
    // u16::MAX is five digits, so this always fits.
    let _ = writeln!(record, "{}", value);
    record
}

/// Parse the first line of a record.
///
/// Surrounding whitespace (including a `\r` left by other tools) is ignored.
pub fn parse_record<E>(record: &[u8]) -> Result<u16, BaselineError<E>> {
    let line = match record.iter().position(|&b| b == b'\n') {
        Some(end) => &record[..end],
        None => record,
    };
    let line = core::str::from_utf8(line).map_err(|_| BaselineError::Parse)?;
    line.trim().parse::<u16>().map_err(|_| BaselineError::Parse)
}

#[cfg(any(test, feature = "std"))]
pub use file::FileBaselineStore;

#[cfg(any(test, feature = "std"))]
mod file {
    use super::{format_record, parse_record, BaselineError, BaselineStore};
    use std::io;
    use std::path::{Path, PathBuf};

    /// Name of the baseline record on the node's filesystem.
    pub const DEFAULT_FILE_NAME: &str = "ccs811_baseline.txt";

    /// A baseline kept in a small text file.
    pub struct FileBaselineStore {
        path: PathBuf,
    }

    impl FileBaselineStore {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            FileBaselineStore { path: path.into() }
        }

        /// Store the record as `ccs811_baseline.txt` inside `dir`.
        pub fn in_dir(dir: impl AsRef<Path>) -> Self {
            Self::new(dir.as_ref().join(DEFAULT_FILE_NAME))
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl BaselineStore for FileBaselineStore {
        type Error = io::Error;

        fn exists(&mut self) -> bool {
            self.path.is_file()
        }

        fn store(&mut self, value: u16) -> Result<(), BaselineError<io::Error>> {
            std::fs::write(&self.path, format_record(value).as_bytes()).map_err(BaselineError::Io)
        }

        fn retrieve(&mut self) -> Result<u16, BaselineError<io::Error>> {
            let record = std::fs::read(&self.path).map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => BaselineError::NotFound,
                _ => BaselineError::Io(e),
            })?;
            parse_record(&record)
        }

        fn delete(&mut self) -> Result<(), BaselineError<io::Error>> {
            match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(BaselineError::Io(e)),
            }
        }
    }
}
