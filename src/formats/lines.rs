//! Module that uses text files as input to the mapper phase and as output of the reducer.
//! This module implements only an iterator yielding single lines;
//! using the PosRecordIterator from formats::util, numbered records can be produced.

use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;

use crate::formats::util::SinkGenerator;

type LinesIterator<Src> = io::Split<io::BufReader<Src>>;

/// Payload of the error yielded for a line that is not valid UTF-8. Unlike a read error, the
/// line has been consumed and reading continues with the next one.
#[derive(Error, Debug)]
#[error("line is not valid UTF-8")]
pub struct NotUtf8;

/// Tells a skippable encoding error apart from a real read error.
pub fn is_not_utf8(e: &io::Error) -> bool {
    e.get_ref().is_some_and(|inner| inner.is::<NotUtf8>())
}

pub struct LinesReader<Src: Read> {
    src: LinesIterator<Src>,
    origin: String,
    failed: bool,
}

impl<Src: Read> LinesReader<Src> {
    /// Reads lines from any reader; `origin` names it in error messages.
    pub fn new(src: Src, origin: impl Into<String>) -> LinesReader<Src> {
        LinesReader {
            src: io::BufReader::new(src).split(b'\n'),
            origin: origin.into(),
            failed: false,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

/// Returns a LinesReader reading lines from stdin.
pub fn new_from_stdin() -> LinesReader<io::Stdin> {
    LinesReader::new(io::stdin(), "<stdin>")
}

/// Returns a LinesReader reading from the given file. If you have several
/// files, you can use new_from_dir() or chain several readers.
pub fn new_from_file(path: &Path) -> io::Result<LinesReader<fs::File>> {
    fs::OpenOptions::new()
        .read(true)
        .open(path)
        .map(|f| LinesReader::new(f, path.display().to_string()))
}

/// Returns a LinesReader reading from all files in the given directory that have
/// a given suffix, in file name order. Files that cannot be opened are skipped with a warning.
pub fn new_from_dir(path: &Path, with_suffix: &str) -> io::Result<LinesReader<Box<dyn Read + Send>>> {
    let mut names: Vec<PathBuf> = Vec::new();

    for entry in fs::read_dir(path)? {
        match entry {
            Err(e) => warn!("could not read entry of {}: {}", path.display(), e),
            Ok(direntry) => {
                let name = direntry.path();
                if name.to_string_lossy().ends_with(with_suffix) {
                    names.push(name);
                }
            }
        }
    }
    names.sort();

    let mut reader: Box<dyn Read + Send> = Box::new(io::empty());
    for name in names {
        match fs::OpenOptions::new().read(true).open(&name) {
            Err(e) => warn!("could not open file {}: {}", name.display(), e),
            // A file without a trailing newline must not run into the next file's first line.
            Ok(f) => reader = Box::new(reader.chain(f).chain(&b"\n"[..])),
        }
    }
    Ok(LinesReader::new(reader, path.display().to_string()))
}

/// Iterate over the lines from a LinesReader. Iteration stops after the first read error; a line
/// that is not UTF-8 yields a `NotUtf8` error and iteration goes on.
impl<Src: Read> Iterator for LinesReader<Src> {
    type Item = io::Result<String>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.src.next()? {
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
            Ok(mut raw) => {
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                Some(String::from_utf8(raw).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, NotUtf8)))
            }
        }
    }
}

/// Writer that terminates every record with a '\n' character.
pub struct LinesWriter<W: Write> {
    file: BufWriter<W>,
    written: u64,
}

impl LinesWriter<fs::File> {
    pub fn new_to_file(path: &Path) -> io::Result<LinesWriter<fs::File>> {
        let f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(LinesWriter::new_to_write(f))
    }
}

impl<W: Write> LinesWriter<W> {
    pub fn new_to_write(w: W) -> LinesWriter<W> {
        LinesWriter {
            file: BufWriter::new(w),
            written: 0,
        }
    }

    pub fn write_line<T: fmt::Display + ?Sized>(&mut self, line: &T) -> io::Result<()> {
        writeln!(self.file, "{}", line)?;
        self.written += 1;
        Ok(())
    }

    /// Number of lines written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> io::Result<W> {
        self.file.into_inner().map_err(|e| e.into_error())
    }
}

/// A SinkGenerator type creating plain text files.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinesSinkGenerator;

impl LinesSinkGenerator {
    pub fn new_to_files() -> LinesSinkGenerator {
        LinesSinkGenerator
    }
}

impl SinkGenerator for LinesSinkGenerator {
    type Sink = fs::File;
    fn new_output(&self, p: &Path) -> io::Result<LinesWriter<fs::File>> {
        LinesWriter::new_to_file(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_file() {
        let it = new_from_file(Path::new("Cargo.toml")).unwrap();
        assert_eq!(it.origin(), "Cargo.toml");

        let cnt = it.filter(|l| l.is_ok()).count();
        assert!(cnt > 5);
    }

    #[test]
    fn test_read_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), "1,2\n3,4").unwrap();
        fs::write(dir.path().join("b.csv"), "5,6\n").unwrap();
        fs::write(dir.path().join("c.txt"), "ignored\n").unwrap();

        let lines: Vec<String> = new_from_dir(dir.path(), ".csv")
            .unwrap()
            .map(|l| l.unwrap())
            .filter(|l| !l.is_empty())
            .collect();
        assert_eq!(lines, vec!["1,2", "3,4", "5,6"]);
    }

    #[test]
    fn test_bad_encoding_is_not_fatal() {
        let bad: &[u8] = b"ok\r\n\xff\xfe\nafter\n";
        let mut it = LinesReader::new(Cursor::new(bad), "bad");
        assert_eq!(it.next().unwrap().unwrap(), "ok");
        assert!(is_not_utf8(&it.next().unwrap().unwrap_err()));
        assert_eq!(it.next().unwrap().unwrap(), "after");
        assert!(it.next().is_none());
    }

    struct Failing(bool);

    impl Read for Failing {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk gone"));
            }
            self.0 = true;
            buf[..3].copy_from_slice(b"ok\n");
            Ok(3)
        }
    }

    #[test]
    fn test_stops_after_read_error() {
        let mut it = LinesReader::new(Failing(false), "failing");
        assert_eq!(it.next().unwrap().unwrap(), "ok");
        let e = it.next().unwrap().unwrap_err();
        assert!(!is_not_utf8(&e));
        assert!(it.next().is_none());
    }

    #[test]
    fn test_write_lines() {
        let mut w = LinesWriter::new_to_write(Vec::new());
        for _ in 0..10 {
            w.write_line("abc def hello world").unwrap();
        }
        assert_eq!(w.written(), 10);
        let buf = w.into_inner().unwrap();
        assert_eq!(buf.len(), 200);
        assert!(buf.ends_with(b"world\n"));
    }

    #[test]
    fn test_sink_generator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out_0");
        let mut w = LinesSinkGenerator::new_to_files().new_output(&path).unwrap();
        w.write_line("x").unwrap();
        w.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "x\n");
    }
}
