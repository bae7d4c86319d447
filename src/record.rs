// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{
    fs::File,
    io::{BufRead, BufReader, Seek, SeekFrom, Write},
};

macro_rules! fail_iter {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Some(Err(e.into())),
        }
    };
}

/// A decoded segment record
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct Record {
    /// Start byte of the record's line inside the segment
    pub offset: u64,

    pub key: String,

    /// The raw JSON encoding of the value; the empty string encodes as
    /// `""` and marks a tombstone
    pub value_json: String,
}

/// Appends one record (`key "," json(value) "\n"`) as a single write.
///
/// Returns the offset the record starts at, for indexing.
///
/// # Errors
///
/// Will return `Err` if an IO error occurs. Partial writes are not
/// repaired; the caller decides whether to keep going.
pub(crate) fn append(file: &mut File, key: &str, value: &str) -> crate::Result<u64> {
    let offset = file.seek(SeekFrom::End(0))?;

    let value_json = serde_json::to_string(value)?;

    let mut line = Vec::with_capacity(key.len() + value_json.len() + 2);
    line.extend_from_slice(key.as_bytes());
    line.push(b',');
    line.extend_from_slice(value_json.as_bytes());
    line.push(b'\n');

    file.write_all(&line)?;

    Ok(offset)
}

/// Reads the single record starting at `offset`.
///
/// Lines without a comma are not records and are skipped until one is
/// found or the file ends.
///
/// # Errors
///
/// Will return `Err` if an IO error occurs.
pub(crate) fn read_record<R: BufRead + Seek>(
    reader: &mut R,
    offset: u64,
) -> crate::Result<Option<(String, String)>> {
    reader.seek(SeekFrom::Start(offset))?;

    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }

        let trimmed = line.strip_suffix('\n').unwrap_or(&line);

        if let Some((key, value_json)) = trimmed.split_once(',') {
            return Ok(Some((key.to_owned(), value_json.to_owned())));
        }
    }
}

/// Iterates through a segment's records in file order, starting at a
/// given offset.
///
/// Because values are JSON strings, only the first comma of a line
/// separates key from value; lines without any comma are skipped. A final
/// line without a terminator is still yielded if it splits into two
/// fields, matching what the scan-based index rebuild accepts.
pub(crate) struct RecordReader {
    inner: BufReader<File>,
    offset: u64,
    line: String,
}

impl RecordReader {
    /// Initializes a new record reader positioned at `offset`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn new(file: File, offset: u64) -> std::io::Result<Self> {
        let mut inner = BufReader::new(file);
        inner.seek(SeekFrom::Start(offset))?;

        Ok(Self {
            inner,
            offset,
            line: String::new(),
        })
    }

    /// The byte position the next read starts at.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Iterator for RecordReader {
    type Item = crate::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();

            let read = fail_iter!(self.inner.read_line(&mut self.line));
            if read == 0 {
                return None;
            }

            let offset = self.offset;
            self.offset += read as u64;

            let trimmed = self.line.strip_suffix('\n').unwrap_or(&self.line);

            if let Some((key, value_json)) = trimmed.split_once(',') {
                return Some(Ok(Record {
                    offset,
                    key: key.to_owned(),
                    value_json: value_json.to_owned(),
                }));
            }
        }
    }
}
