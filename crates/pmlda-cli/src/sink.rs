//! JSON-lines chain output

use anyhow::{bail, Context, Result};
use pmlda_core::{ChainLink, ChainSink};
use pmlda_tree::State;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes one JSON object per chain step
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonLinesSink {
    /// Create (truncate) the output file
    ///
    /// # Errors
    /// The file cannot be created.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file =
            File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    /// Output path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChainSink for JsonLinesSink {
    fn record(&mut self, link: &ChainLink) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, link)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        tracing::debug!(path = %self.path.display(), links = self.written, "Chain output flushed");
        Ok(())
    }
}

/// Forwards every step to two sinks
pub struct Tee<A, B>(pub A, pub B);

impl<A: ChainSink, B: ChainSink> ChainSink for Tee<A, B> {
    fn record(&mut self, link: &ChainLink) -> io::Result<()> {
        self.0.record(link)?;
        self.1.record(link)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.0.finish()?;
        self.1.finish()
    }
}

/// Output path of chain `chain` in a run of `chains` chains
///
/// A single chain writes to `path` itself; otherwise the chain index is
/// inserted before the extension (`out.jsonl` becomes `out-1.jsonl`).
#[must_use]
pub fn chain_path(path: &Path, chain: usize, chains: usize) -> PathBuf {
    if chains <= 1 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{chain}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{chain}"),
    };
    path.with_file_name(name)
}

/// Read the chain output at `path` and return its last step
///
/// # Errors
/// The file cannot be read, holds no steps, or a line is not a chain step.
pub fn read_last_link(path: &Path) -> Result<ChainLink> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut last: Option<ChainLink> = None;
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let link: ChainLink = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: not a chain step", path.display(), number + 1))?;
        last = Some(link);
    }
    match last {
        Some(link) => Ok(link),
        None => bail!("{} contains no chain steps", path.display()),
    }
}

/// Last state recorded at `path`
///
/// # Errors
/// See [`read_last_link`].
pub fn read_last_state(path: &Path) -> Result<State> {
    read_last_link(path).map(|link| link.state)
}
