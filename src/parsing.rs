//! Parsers for every input file the planner consumes.
//!
//! All formats are line-oriented human-readable text: labelled scalar
//! fields followed by whitespace-separated numbers, and polyhedral objects
//! in the library's own textual form. Parsing reads each file once at
//! startup; nothing here is touched again after the pipeline starts.

use crate::architecture::{
    Allocation, AllocationError, Architecture, ArchitectureKind, TaskParameters,
};
use crate::model::TaskModel;
use isl_rs::{Context, DimType, Schedule, Set, UnionMap, UnionSet};
use log::debug;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("cannot read {file}: {source}")]
    Io {
        file: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{file}: {message}")]
    Format { file: PathBuf, message: String },

    #[error("{file}: {source}")]
    Allocation {
        file: PathBuf,
        #[source]
        source: AllocationError,
    },
}

impl InputError {
    fn format(file: &Path, message: impl Into<String>) -> Self {
        InputError::Format {
            file: file.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Directory layout of the input tree.
///
/// Every input is addressed by name; the layout turns names into paths
/// under a configurable root so that no path convention is baked into the
/// pipeline itself.
#[derive(Clone, Debug)]
pub struct InputLayout {
    root: PathBuf,
}

impl InputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        InputLayout { root: root.into() }
    }

    pub fn architecture_file(&self, name: &str) -> PathBuf {
        self.root.join("Architectures").join(format!("{name}.txt"))
    }

    pub fn allocation_file(&self, name: &str) -> PathBuf {
        self.root.join("Allocations").join(format!("{name}.txt"))
    }

    pub fn task_file(&self, task: &str) -> PathBuf {
        self.root.join("Sources").join(format!("{task}.txt"))
    }

    pub fn parameter_file(&self, task: &str, name: &str) -> PathBuf {
        self.root
            .join("Sources")
            .join("Parameters")
            .join(task)
            .join(format!("{name}.txt"))
    }

    pub fn lattice_count_file(&self, num_banks: usize, dim: u32) -> PathBuf {
        self.root
            .join("Lattices")
            .join(format!("{num_banks}_dim{dim}_numLattices.txt"))
    }

    /// Translate files are 1-indexed in both the lattice and the translate
    /// position.
    pub fn translate_file(
        &self,
        num_banks: usize,
        dim: u32,
        lattice: usize,
        translate: usize,
    ) -> PathBuf {
        self.root.join("Lattices").join(format!(
            "{num_banks}_dim{dim}_lattice{lattice}_translate{translate}.txt"
        ))
    }
}

/// Sequential scanner over a labelled text file.
///
/// `expect` matches a literal label word by word with any amount of
/// interleaving whitespace, the way the original field-by-field readers
/// consumed their headers.
struct TextCursor<'a> {
    text: &'a str,
    pos: usize,
    file: &'a Path,
}

impl<'a> TextCursor<'a> {
    fn new(text: &'a str, file: &'a Path) -> Self {
        TextCursor { text, pos: 0, file }
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.text[self.pos..];
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn expect(&mut self, label: &str) -> Result<(), InputError> {
        for word in label.split_whitespace() {
            self.skip_whitespace();
            let rest = &self.text[self.pos..];
            if rest.starts_with(word) {
                self.pos += word.len();
            } else {
                return Err(InputError::format(
                    self.file,
                    format!("expected `{label}`"),
                ));
            }
        }
        Ok(())
    }

    fn next_token(&mut self) -> Result<&'a str, InputError> {
        self.skip_whitespace();
        let text = self.text;
        let rest = &text[self.pos..];
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(InputError::format(self.file, "unexpected end of file"));
        }
        self.pos += end;
        Ok(&rest[..end])
    }

    fn next_usize(&mut self) -> Result<usize, InputError> {
        let token = self.next_token()?;
        token.parse().map_err(|_| {
            InputError::format(self.file, format!("expected an unsigned integer, found `{token}`"))
        })
    }

    fn next_u64(&mut self) -> Result<u64, InputError> {
        let token = self.next_token()?;
        token.parse().map_err(|_| {
            InputError::format(self.file, format!("expected an unsigned integer, found `{token}`"))
        })
    }

    fn next_i64(&mut self) -> Result<i64, InputError> {
        let token = self.next_token()?;
        token.parse().map_err(|_| {
            InputError::format(self.file, format!("expected an integer, found `{token}`"))
        })
    }
}

fn read_file(file: &Path) -> Result<String, InputError> {
    std::fs::read_to_string(file).map_err(|source| InputError::Io {
        file: file.to_path_buf(),
        source,
    })
}

/// Parses the architecture description.
pub fn parse_architecture(file: &Path) -> Result<Architecture, InputError> {
    let text = read_file(file)?;
    let mut cursor = TextCursor::new(&text, file);

    cursor.expect("Architecture type:")?;
    let kind = match cursor.next_token()? {
        "UMA" => ArchitectureKind::Uma,
        "GNUMA" => ArchitectureKind::Numa,
        other => {
            return Err(InputError::format(
                file,
                format!("unrecognized architecture type `{other}`"),
            ))
        }
    };

    cursor.expect("Number of processors:")?;
    let num_processors = cursor.next_usize()?;
    cursor.expect("Number of memory banks:")?;
    let num_banks = cursor.next_usize()?;

    if num_processors == 0 || num_banks == 0 {
        return Err(InputError::format(
            file,
            "the architecture needs at least one processor and one bank",
        ));
    }

    let mut bank_latency = Vec::new();
    let mut delta = Vec::new();

    if kind == ArchitectureKind::Numa {
        cursor.expect("Bank latency:")?;
        match cursor.next_token()? {
            "Fixed" => {
                let latency = cursor.next_u64()?;
                bank_latency = vec![latency; num_banks];
            }
            "Variable" => {
                for _ in 0..num_banks {
                    bank_latency.push(cursor.next_u64()?);
                }
            }
            other => {
                return Err(InputError::format(
                    file,
                    format!("unrecognized bank latency mode `{other}`"),
                ))
            }
        }

        cursor.expect("Latency from each processor to each memory bank:")?;
        for _ in 0..num_processors {
            let mut row = Vec::with_capacity(num_banks);
            for _ in 0..num_banks {
                row.push(cursor.next_u64()?);
            }
            delta.push(row);
        }
    }

    Ok(Architecture {
        kind,
        num_processors,
        num_banks,
        bank_latency,
        delta,
    })
}

/// Parses the processor allocation.
///
/// Returns the number of working processors together with the allocation;
/// the working count may shrink the architecture's processor count but can
/// never exceed it.
pub fn parse_allocation(
    file: &Path,
    kind: ArchitectureKind,
    available_processors: usize,
    num_tasks: usize,
) -> Result<(usize, Allocation), InputError> {
    let text = read_file(file)?;
    let mut cursor = TextCursor::new(&text, file);

    cursor.expect("Number of working processors:")?;
    let working = cursor.next_usize()?;
    if working > available_processors {
        return Err(InputError::format(
            file,
            format!(
                "the allocation needs {working} processors but the architecture has {available_processors}"
            ),
        ));
    }

    cursor.expect("Number of executing tasks:")?;
    let executing = cursor.next_usize()?;
    if executing != num_tasks {
        return Err(InputError::format(
            file,
            format!(
                "the number of source files provided ({num_tasks}) is not equal to the number of tasks ({executing})"
            ),
        ));
    }

    let allocation = match kind {
        ArchitectureKind::Uma => {
            cursor.expect("Processors assigned to each task:")?;
            let mut counts = Vec::with_capacity(num_tasks);
            for _ in 0..num_tasks {
                counts.push(cursor.next_usize()?);
            }
            Allocation::uma(counts, working)
        }
        ArchitectureKind::Numa => {
            cursor.expect("Task ID executing on each processor:")?;
            let mut task_on_processor = Vec::with_capacity(working);
            for _ in 0..working {
                task_on_processor.push(cursor.next_usize()?);
            }
            Allocation::numa(task_on_processor, num_tasks)
        }
    }
    .map_err(|source| InputError::Allocation {
        file: file.to_path_buf(),
        source,
    })?;

    Ok((working, allocation))
}

/// Parses one task's parameter values.
pub fn parse_parameters(file: &Path) -> Result<TaskParameters, InputError> {
    let text = read_file(file)?;
    let mut cursor = TextCursor::new(&text, file);

    cursor.expect("Number of parameters:")?;
    let count = cursor.next_usize()?;
    cursor.expect("Parameters values:")?;

    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(cursor.next_i64()?);
    }

    Ok(TaskParameters { values })
}

fn isl_union_set(ctx: &Context, text: &str, file: &Path, key: &str) -> Result<UnionSet, InputError> {
    let parsed = catch_unwind(AssertUnwindSafe(|| UnionSet::read_from_str(ctx, text)))
        .map_err(|_| InputError::format(file, format!("`{key}` is not a valid union set")))?;
    if parsed.ptr == 0 {
        return Err(InputError::format(file, format!("`{key}` is not a valid union set")));
    }
    Ok(parsed)
}

fn isl_set(ctx: &Context, text: &str, file: &Path, key: &str) -> Result<Set, InputError> {
    let parsed = catch_unwind(AssertUnwindSafe(|| Set::read_from_str(ctx, text)))
        .map_err(|_| InputError::format(file, format!("`{key}` is not a valid set")))?;
    if parsed.ptr == 0 {
        return Err(InputError::format(file, format!("`{key}` is not a valid set")));
    }
    Ok(parsed)
}

fn isl_union_map(ctx: &Context, text: &str, file: &Path, key: &str) -> Result<UnionMap, InputError> {
    let parsed = catch_unwind(AssertUnwindSafe(|| UnionMap::read_from_str(ctx, text)))
        .map_err(|_| InputError::format(file, format!("`{key}` is not a valid union map")))?;
    if parsed.ptr == 0 {
        return Err(InputError::format(file, format!("`{key}` is not a valid union map")));
    }
    Ok(parsed)
}

fn isl_schedule(ctx: &Context, text: &str, file: &Path) -> Result<Schedule, InputError> {
    let parsed = catch_unwind(AssertUnwindSafe(|| Schedule::read_from_str(ctx, text)))
        .map_err(|_| InputError::format(file, "`Schedule` is not a valid schedule tree"))?;
    if parsed.ptr == 0 {
        return Err(InputError::format(file, "`Schedule` is not a valid schedule tree"));
    }
    Ok(parsed)
}

/// Parses one task's polyhedral model.
///
/// The file is a sequence of `key: value` lines whose values are the
/// library's textual representations; the schedule is a flow-format
/// schedule tree on a single line.
pub fn parse_task_model(ctx: &Context, file: &Path, name: &str) -> Result<TaskModel, InputError> {
    let text = read_file(file)?;

    let mut instance_set = None;
    let mut array_extent = None;
    let mut may_reads = None;
    let mut may_writes = None;
    let mut must_writes = None;
    let mut schedule = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(InputError::format(
                file,
                format!("expected `key: value`, found `{line}`"),
            ));
        };
        let value = value.trim();
        match key.trim() {
            "Instance set" => instance_set = Some(isl_union_set(ctx, value, file, "Instance set")?),
            "Array extent" => array_extent = Some(isl_set(ctx, value, file, "Array extent")?),
            "May reads" => may_reads = Some(isl_union_map(ctx, value, file, "May reads")?),
            "May writes" => may_writes = Some(isl_union_map(ctx, value, file, "May writes")?),
            "Must writes" => must_writes = Some(isl_union_map(ctx, value, file, "Must writes")?),
            "Schedule" => schedule = Some(isl_schedule(ctx, value, file)?),
            other => {
                return Err(InputError::format(
                    file,
                    format!("unrecognized key `{other}`"),
                ))
            }
        }
    }

    let missing = |key: &str| InputError::format(file, format!("missing `{key}`"));

    Ok(TaskModel {
        name: name.to_string(),
        instance_set: instance_set.ok_or_else(|| missing("Instance set"))?,
        schedule: schedule.ok_or_else(|| missing("Schedule"))?,
        array_extent: array_extent.ok_or_else(|| missing("Array extent"))?,
        may_reads: may_reads.ok_or_else(|| missing("May reads"))?,
        may_writes: may_writes.ok_or_else(|| missing("May writes"))?,
        must_writes: must_writes.ok_or_else(|| missing("Must writes"))?,
    })
}

/// Reads the lattice catalog for the given bank count and address-space
/// dimensionality.
///
/// Returns, for each fundamental lattice, its ordered list of translates.
/// Every translate must live in the virtual address space; a dimension
/// mismatch aborts the run before any cost is computed.
pub fn parse_lattices(
    ctx: &Context,
    layout: &InputLayout,
    num_banks: usize,
    dim: u32,
) -> Result<Vec<Vec<Set>>, InputError> {
    let count_file = layout.lattice_count_file(num_banks, dim);
    let text = read_file(&count_file)?;
    let mut cursor = TextCursor::new(&text, &count_file);
    cursor.expect("Number of different fundamental lattices:")?;
    let num_lattices = cursor.next_usize()?;
    if num_lattices == 0 {
        return Err(InputError::format(&count_file, "the catalog declares no lattices"));
    }

    debug!("lattice catalog: {num_lattices} fundamental lattices, {num_banks} translates each");

    let mut lattices = Vec::with_capacity(num_lattices);
    for lattice in 1..=num_lattices {
        let mut translates = Vec::with_capacity(num_banks);
        for translate in 1..=num_banks {
            let file = layout.translate_file(num_banks, dim, lattice, translate);
            let text = read_file(&file)?;
            let set = isl_set(ctx, text.trim(), &file, "translate")?;
            let set_dim = set.dim(DimType::Set) as u32;
            if set_dim != dim {
                return Err(InputError::format(
                    &file,
                    format!(
                        "translate has dimension {set_dim} but the virtual address space has dimension {dim}"
                    ),
                ));
            }
            translates.push(set);
        }
        lattices.push(translates);
    }

    Ok(lattices)
}
