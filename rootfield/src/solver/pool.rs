//! Parallel root solving in worker processes.
//!
//! The dispatcher splits the matrix into contiguous chunks, hands each chunk
//! to a fresh worker process as one JSON job on stdin and reads one JSON
//! answer from stdout. One thread per chunk drives its process and sends
//! `(chunk index, root sets)` back over a channel; the dispatcher files the
//! answers by index, so completion order does not matter. A chunk that fails
//! in any way (spawn error, crash, non-zero exit, garbled output) yields an
//! empty root set for every one of its rows.

use crossbeam_channel::unbounded;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use super::{Backend, NativeLibrary, RootSet, RowSolver};
use crate::coeffs::CoefficientMatrix;

// =============================================================================
// CONFIGURATION
// =============================================================================
pub const WORKER_SUBCOMMAND: &str = "worker";

// =============================================================================
// WIRE FORMAT
// =============================================================================

/// A complex number as the raw bits of its parts, so every value
/// (non-finite ones included) crosses the pipe unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireComplex(u64, u64);

impl From<Complex64> for WireComplex {
    fn from(z: Complex64) -> Self {
        WireComplex(z.re.to_bits(), z.im.to_bits())
    }
}

impl From<WireComplex> for Complex64 {
    fn from(w: WireComplex) -> Self {
        Complex64::new(f64::from_bits(w.0), f64::from_bits(w.1))
    }
}

fn to_wire(values: &[Complex64]) -> Vec<WireComplex> {
    values.iter().copied().map(WireComplex::from).collect()
}

fn from_wire(values: Vec<WireComplex>) -> Vec<Complex64> {
    values.into_iter().map(Complex64::from).collect()
}

/// One chunk of rows plus everything needed to solve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkJob {
    pub backend: Backend,
    /// Library path for the high-precision backend.
    pub native_library: Option<PathBuf>,
    pub rows: Vec<Vec<WireComplex>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOutput {
    pub roots: Vec<Vec<WireComplex>>,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed worker message: {0}")]
    Wire(#[from] serde_json::Error),
    #[error("worker exited with {0}")]
    Exit(ExitStatus),
    #[error("worker returned {got} root sets for {expected} rows")]
    RowCount { got: usize, expected: usize },
    #[error(transparent)]
    Solver(#[from] crate::Error),
}

// =============================================================================
// WORKER SIDE
// =============================================================================

/// Serve one job: read a [`ChunkJob`], solve its rows in order, write a
/// [`ChunkOutput`].
pub fn run_worker<R: Read, W: Write>(input: R, output: W) -> Result<(), WorkerError> {
    let job: ChunkJob = serde_json::from_reader(BufReader::new(input))?;
    let native = NativeLibrary::new(job.native_library.unwrap_or_else(NativeLibrary::default_path));
    let solver = RowSolver::resolve(job.backend, &native)?;
    let rows: Vec<Vec<Complex64>> = job.rows.into_iter().map(from_wire).collect();
    let roots = solver.solve_rows(&rows);

    let answer = ChunkOutput { roots: roots.iter().map(|set| to_wire(set)).collect() };
    let mut writer = BufWriter::new(output);
    serde_json::to_writer(&mut writer, &answer)?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// DISPATCHER SIDE
// =============================================================================

/// Split `rows` into `chunks` contiguous ranges whose sizes differ by at
/// most one (larger ones first). Empty ranges are dropped, so more chunks
/// than rows gives one range per row.
pub fn chunk_ranges(rows: usize, chunks: usize) -> Vec<Range<usize>> {
    let chunks = chunks.max(1);
    let base = rows / chunks;
    let extra = rows % chunks;
    let mut start = 0;
    (0..chunks)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .filter(|range| !range.is_empty())
        .collect()
}

/// How to launch a worker process.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerPool {
    /// Workers run `<program> worker`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        WorkerPool { program: program.into(), args: vec![OsString::from(WORKER_SUBCOMMAND)] }
    }

    /// Workers are re-invocations of the running executable.
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Whether the program exists, looked up on `PATH` when given as a bare name.
    pub fn is_available(&self) -> bool {
        if self.program.components().count() > 1 {
            return self.program.is_file();
        }
        let Some(paths) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&paths).any(|dir| {
            let candidate = dir.join(&self.program);
            candidate.is_file()
                || (!std::env::consts::EXE_EXTENSION.is_empty()
                    && candidate.with_extension(std::env::consts::EXE_EXTENSION).is_file())
        })
    }

    /// Solve every row of `matrix` across up to `workers` processes.
    pub fn solve(&self, matrix: &CoefficientMatrix, backend: Backend, native_library: &Path, workers: usize) -> Vec<RootSet> {
        let ranges = chunk_ranges(matrix.nrows(), workers);
        let (sender, receiver) = unbounded::<(usize, Vec<RootSet>)>();

        std::thread::scope(|scope| {
            for (index, range) in ranges.iter().cloned().enumerate() {
                let sender = sender.clone();
                let job = ChunkJob {
                    backend,
                    native_library: Some(native_library.to_path_buf()),
                    rows: matrix
                        .outer_iter()
                        .skip(range.start)
                        .take(range.len())
                        .map(|row| to_wire(&row.to_vec()))
                        .collect(),
                };
                scope.spawn(move || {
                    let started = Instant::now();
                    let expected = range.len();
                    let roots = match self.run_chunk(&job) {
                        Ok(roots) if roots.len() == expected => roots,
                        Ok(roots) => {
                            let error = WorkerError::RowCount { got: roots.len(), expected };
                            warn!(chunk = index, rows = ?range, %error, "chunk discarded");
                            vec![Vec::new(); expected]
                        }
                        Err(error) => {
                            warn!(chunk = index, rows = ?range, %error, "chunk discarded");
                            vec![Vec::new(); expected]
                        }
                    };
                    debug!(chunk = index, rows = expected, elapsed = ?started.elapsed(), "chunk finished");
                    // the receiver outlives the scope
                    let _ = sender.send((index, roots));
                });
            }
        });
        drop(sender);

        let mut collected: Vec<Option<Vec<RootSet>>> = vec![None; ranges.len()];
        for (index, roots) in receiver.iter() {
            collected[index] = Some(roots);
        }
        collected
            .into_iter()
            .zip(&ranges)
            .flat_map(|(roots, range)| roots.unwrap_or_else(|| vec![Vec::new(); range.len()]))
            .collect()
    }

    fn run_chunk(&self, job: &ChunkJob) -> Result<Vec<RootSet>, WorkerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        // the worker reads its whole job before answering, so writing first
        // and then reading cannot deadlock
        if let Err(error) = send_job(&mut child, job) {
            // a worker that died early still has to be reaped
            let _ = child.kill();
            return Err(match child.wait() {
                Ok(status) if !status.success() => WorkerError::Exit(status),
                _ => error,
            });
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(WorkerError::Exit(output.status));
        }
        let answer: ChunkOutput = serde_json::from_slice(&output.stdout)?;
        Ok(answer.roots.into_iter().map(from_wire).collect())
    }
}

fn send_job(child: &mut Child, job: &ChunkJob) -> Result<(), WorkerError> {
    if let Some(stdin) = child.stdin.take() {
        let mut writer = BufWriter::new(stdin);
        serde_json::to_writer(&mut writer, job)?;
        writer.flush()?;
    }
    Ok(())
}
