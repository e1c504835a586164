use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use crate::constants::*;

/// Registry of append-mode bucket files under `output_dir/BUCKET/BUCKET.txt`.
///
/// Handles are opened on first write and stay open until [`OutputSink::close_all`].
pub struct OutputSink {
    output_directory: PathBuf,
    buffer_size: usize,
    handles: Mutex<HashMap<String, BufWriter<File>>>,
}

impl OutputSink {
    pub fn new(output_directory: PathBuf, buffer_size: usize) -> Self {
        Self {
            output_directory,
            buffer_size,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the output root and the two fixed bucket directories.
    pub fn prepare(&self) -> Result<()> {
        for dir in [
            self.output_directory.clone(),
            self.output_directory.join(INVALID_BUCKET),
            self.output_directory.join(OTHER_BUCKET),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn bucket_path(&self, bucket: &str) -> PathBuf {
        bucket_file_path(&self.output_directory, bucket)
    }

    pub fn write(&self, bucket: &str, address: &str) -> Result<()> {
        if !is_safe_bucket_name(bucket) {
            return Err(anyhow::anyhow!("Refusing to write to bucket {:?}", bucket));
        }

        let mut handles = self.handles.lock();
        if !handles.contains_key(bucket) {
            let writer = self.open_bucket(bucket)?;
            handles.insert(bucket.to_string(), writer);
        }

        if let Some(writer) = handles.get_mut(bucket) {
            writeln!(writer, "{}", address)
                .with_context(|| format!("Failed to append to bucket {}", bucket))?;
        }
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        let mut handles = self.handles.lock();
        for (bucket, writer) in handles.iter_mut() {
            writer
                .flush()
                .with_context(|| format!("Failed to flush bucket {}", bucket))?;
        }
        Ok(())
    }

    /// Flushes and releases every handle. Later writes reopen their bucket.
    pub fn close_all(&self) -> Result<()> {
        let drained: Vec<(String, BufWriter<File>)> = self.handles.lock().drain().collect();
        let mut first_error = None;

        for (bucket, mut writer) in drained {
            if let Err(e) = writer.flush() {
                tracing::error!("Failed to flush bucket {} on close: {}", bucket, e);
                first_error.get_or_insert_with(|| {
                    anyhow::anyhow!("Failed to flush bucket {}: {}", bucket, e)
                });
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn open_buckets(&self) -> usize {
        self.handles.lock().len()
    }

    fn open_bucket(&self, bucket: &str) -> Result<BufWriter<File>> {
        let dir = self.output_directory.join(bucket);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create bucket directory {}", dir.display()))?;

        let path = bucket_file_path(&self.output_directory, bucket);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open bucket file {}", path.display()))?;

        Ok(BufWriter::with_capacity(self.buffer_size, file))
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        if let Err(e) = self.close_all() {
            tracing::error!("Output sink dropped with unflushed data: {}", e);
        }
    }
}

pub fn bucket_file_path(output_directory: &Path, bucket: &str) -> PathBuf {
    output_directory
        .join(bucket)
        .join(format!("{}.{}", bucket, BUCKET_FILE_EXTENSION))
}

/// Bucket names become directory names, so only plain identifiers are allowed.
pub fn is_safe_bucket_name(bucket: &str) -> bool {
    !bucket.is_empty()
        && bucket.chars().count() <= MAX_BUCKET_NAME_LEN
        && bucket.chars().all(is_bucket_char)
}

/// Maps a free-form country code onto a safe bucket name: every character
/// outside letters, digits, `_` and `-` becomes `_`, and the result is cut
/// to the maximum name length.
pub fn bucket_name_for(code: &str) -> String {
    code.chars()
        .take(MAX_BUCKET_NAME_LEN)
        .map(|c| if is_bucket_char(c) { c } else { '_' })
        .collect()
}

fn is_bucket_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}
