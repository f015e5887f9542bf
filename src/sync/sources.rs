//! Raw message sources.
//!
//! Each source is an iterator of `Result<Vec<u8>, SourceError>`, one item per
//! message, in a stable order. A failed read yields an error item: a maildir
//! moves on to its next file, an mbox or tarball stops.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tar::Archive;

use crate::error::SourceError;

/// Messages stored one per file in a maildir.
///
/// Reads `cur/` and `new/` when present, otherwise the directory itself.
/// Files are ordered by name; dotfiles and subdirectories are ignored.
#[derive(Debug)]
pub struct MaildirSource {
    files: std::vec::IntoIter<PathBuf>,
}

impl MaildirSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let subdirs: Vec<PathBuf> = ["cur", "new"]
            .iter()
            .map(|sub| dir.join(sub))
            .filter(|path| path.is_dir())
            .collect();
        let search = if subdirs.is_empty() {
            vec![dir.to_path_buf()]
        } else {
            subdirs
        };

        let mut files = Vec::new();
        for folder in &search {
            let entries = fs::read_dir(folder).map_err(|e| SourceError::io(folder, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| SourceError::io(folder, e))?;
                let path = entry.path();
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if !hidden && path.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        log::debug!("maildir {}: {} messages", dir.display(), files.len());
        Ok(Self {
            files: files.into_iter(),
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.len() == 0
    }
}

impl Iterator for MaildirSource {
    type Item = Result<Vec<u8>, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.files.next()?;
        Some(fs::read(&path).map_err(|e| SourceError::io(path, e)))
    }
}

/// Messages concatenated in an mbox file.
///
/// A message starts at a `From ` line that opens the file or follows a blank
/// line. The separator line itself is dropped, `>From ` escapes lose one `>`,
/// and the blank line before the next separator is trimmed.
pub struct MboxSource {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    current: Option<Vec<u8>>,
    prev_blank: bool,
    done: bool,
}

impl MboxSource {
    /// Open an mbox file, decompressing it when the name ends in `.gz`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SourceError::io(path, e))?;
        let gzipped = path.extension().is_some_and(|ext| ext == "gz");
        let reader: Box<dyn BufRead + Send> = if gzipped {
            Box::new(BufReader::new(GzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self::with_buffered(path.to_path_buf(), reader))
    }

    /// Wrap an already open reader; `path` is only used in error messages.
    pub fn from_reader(path: impl Into<PathBuf>, reader: impl Read + Send + 'static) -> Self {
        Self::with_buffered(path.into(), Box::new(BufReader::new(reader)))
    }

    fn with_buffered(path: PathBuf, reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            path,
            reader,
            current: None,
            prev_blank: true,
            done: false,
        }
    }
}

/// Messages stored one per regular file in a tar archive.
///
/// `.tgz` and `.tar.gz` archives are decompressed. Directories, links and
/// files whose name starts with a dot are skipped. Members come out in
/// archive order. The archive is read when the source is opened.
#[derive(Debug)]
pub struct TarballSource {
    messages: std::vec::IntoIter<Result<Vec<u8>, SourceError>>,
}

impl TarballSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| SourceError::io(path, e))?;
        let gzipped = path
            .extension()
            .is_some_and(|ext| ext == "gz" || ext == "tgz");
        if gzipped {
            Self::from_reader(path, GzDecoder::new(BufReader::new(file)))
        } else {
            Self::from_reader(path, BufReader::new(file))
        }
    }

    /// Read an uncompressed tar stream; `path` is only used in error messages.
    pub fn from_reader(path: impl AsRef<Path>, reader: impl Read) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let mut archive = Archive::new(reader);
        let entries = archive.entries().map_err(|e| SourceError::io(path, e))?;

        let mut messages = Vec::new();
        for entry in entries {
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    messages.push(Err(SourceError::io(path, e)));
                    break;
                }
            };
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let hidden = match entry.path() {
                Ok(member) => member
                    .file_name()
                    .is_none_or(|name| name.to_string_lossy().starts_with('.')),
                Err(e) => {
                    log::debug!("skipping tar member with unreadable name: {}", e);
                    true
                }
            };
            if hidden {
                continue;
            }

            let mut raw = Vec::new();
            if let Err(e) = entry.read_to_end(&mut raw) {
                messages.push(Err(SourceError::io(path, e)));
                break;
            }
            messages.push(Ok(raw));
        }

        log::debug!("tarball {}: {} messages", path.display(), messages.len());
        Ok(Self {
            messages: messages.into_iter(),
        })
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.len() == 0
    }
}

impl Iterator for TarballSource {
    type Item = Result<Vec<u8>, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.messages.next()
    }
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\n" || line == b"\r\n"
}

/// Turn `>From `, `>>From `, ... back into one less `>`.
fn unescape_from(line: &[u8]) -> &[u8] {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    if quotes > 0 && line[quotes..].starts_with(b"From ") {
        &line[1..]
    } else {
        line
    }
}

fn finish_message(mut message: Vec<u8>) -> Vec<u8> {
    if message.ends_with(b"\r\n\r\n") {
        message.truncate(message.len() - 2);
    } else if message.ends_with(b"\n\n") {
        message.truncate(message.len() - 1);
    }
    message
}

impl Iterator for MboxSource {
    type Item = Result<Vec<u8>, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut line = Vec::new();
        loop {
            line.clear();
            match self.reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    self.done = true;
                    return self.current.take().map(|m| Ok(finish_message(m)));
                }
                Ok(_) => {
                    let separator = self.prev_blank && line.starts_with(b"From ");
                    self.prev_blank = is_blank(&line);

                    if separator {
                        if let Some(finished) = self.current.replace(Vec::new()) {
                            return Some(Ok(finish_message(finished)));
                        }
                        continue;
                    }
                    // Text before the first separator is not a message
                    if let Some(current) = self.current.as_mut() {
                        current.extend_from_slice(unescape_from(&line));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(SourceError::io(self.path.clone(), e)));
                }
            }
        }
    }
}
