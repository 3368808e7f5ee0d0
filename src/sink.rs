//! Newline-delimited JSON output, one file per resource.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use serde_json::Value;
use tracing::debug;

/// Appends records to `<dir>/<resource>.ndjson`.
///
/// Files are opened in append mode so a resumed run adds to the output of
/// the run it continues.
#[derive(Debug)]
pub struct JsonLinesSink {
    dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
    counts: BTreeMap<String, u64>,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writers: HashMap::new(),
            counts: BTreeMap::new(),
        })
    }

    /// Output file for `resource`.
    pub fn path_for(&self, resource: &str) -> PathBuf {
        self.dir.join(format!("{}.ndjson", resource))
    }

    /// Append one record.
    pub fn write(&mut self, resource: &str, record: &Value) -> io::Result<()> {
        if !self.writers.contains_key(resource) {
            let path = self.path_for(resource);
            debug!("Opening output file {}", path.display());
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            self.writers
                .insert(resource.to_string(), BufWriter::new(file));
        }

        if let Some(writer) = self.writers.get_mut(resource) {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
        }
        *self.counts.entry(resource.to_string()).or_insert(0) += 1;
        Ok(())
    }

    /// Append several records.
    pub fn write_all<'a, I>(&mut self, resource: &str, records: I) -> io::Result<usize>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut written = 0;
        for record in records {
            self.write(resource, record)?;
            written += 1;
        }
        Ok(written)
    }

    /// Flush every open file.
    pub fn flush(&mut self) -> io::Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Records written per resource by this sink.
    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
