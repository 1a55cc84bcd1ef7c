//! MILP formulation of the NUMA bank-mapping problem.
//!
//! The per-lattice dataset-type tables feed a mixed-integer linear program
//! whose objective bounds the maximum access latency any processor pays.
//! The formulation itself lives in an external GMPL model file; this module
//! produces the matching data section, drives the solver and interprets its
//! verdict. The solver is abstracted behind [`MilpOracle`] so that the
//! selection logic can be exercised without a solver installation.

use crate::model::DatasetTypeTable;
use crate::support;
use log::{debug, warn};
use regex::Regex;
use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

/// Data of one lattice's MILP instance.
pub struct MilpInstance<'a> {
    pub num_banks: usize,
    pub table: &'a DatasetTypeTable,
    /// Best objective bound established by earlier lattices, 0 before any.
    pub min_latency: f64,
    /// False only for the first lattice, which runs unbounded.
    pub non_first_lattice: bool,
    /// Uniform service latency of the banks.
    pub bank_latency: u64,
    /// `delta[p][b]` access delay from processor `p` to bank `b`.
    pub delta: &'a [Vec<u64>],
}

/// Verdict of the solver on one instance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MilpOutcome {
    /// Proved optimum with the given objective value.
    Optimal(f64),
    /// No feasible solution exists.
    Infeasible,
    /// A feasible solution was found but optimality was not proved within
    /// the allotted time.
    FeasibleOnly,
    Unbounded,
    Undefined,
}

#[derive(Debug, Error)]
pub enum MilpError {
    #[error("MILP model file {0} not found")]
    ModelMissing(PathBuf),

    #[error("cannot write the MILP data file {file}: {source}")]
    DataFile {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run the MILP solver: {0}")]
    SolverInvocation(String),

    #[error("cannot interpret the solver report: {0}")]
    MalformedReport(String),

    #[error("no lattice admitted a proved optimal solution")]
    NoOptimalLattice,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A solver for the bank-mapping MILP.
pub trait MilpOracle {
    fn solve(&self, lattice_index: usize, instance: &MilpInstance) -> Result<MilpOutcome, MilpError>;
}

/// Renders the GMPL data section of one instance.
///
/// Rows of the sparse `mc` parameter are indexed dataset type, processor,
/// translate; zero entries are left to the declared default.
pub fn gmpl_data(instance: &MilpInstance) -> String {
    let num_processors = instance.table.num_processors();
    let num_translates = instance.table.num_translates();
    let mut data = String::new();

    data.push_str("set P :=");
    for p in 0..num_processors {
        let _ = write!(data, " p{p}");
    }
    data.push_str(";\n");

    data.push_str("set B :=");
    for b in 0..instance.num_banks {
        let _ = write!(data, " b{b}");
    }
    data.push_str(";\n");

    data.push_str("set T :=");
    for t in 0..num_translates {
        let _ = write!(data, " t{t}");
    }
    data.push_str(";\n");

    data.push_str("set D :=");
    for d in 0..instance.table.types().len() {
        let _ = write!(data, " d{d}");
    }
    data.push_str(";\n\n");

    let _ = writeln!(data, "param minLatency := {:.6};", instance.min_latency);
    let _ = writeln!(
        data,
        "param nonFirstLattice := {};",
        u32::from(instance.non_first_lattice)
    );
    let _ = writeln!(data, "param l := {};", instance.bank_latency);
    data.push('\n');

    data.push_str("param delta := \n");
    for p in 0..num_processors {
        for b in 0..instance.num_banks {
            let _ = writeln!(data, "\tp{p}\tb{b}\t{}", instance.delta[p][b]);
        }
    }
    data.push_str(";\n\n");

    data.push_str("param n := \n");
    for (d, dataset_type) in instance.table.types().iter().enumerate() {
        let _ = writeln!(data, "\td{d}\t{}", dataset_type.multiplicity);
    }
    data.push_str(";\n\n");

    data.push_str("param mc default 0 := \n");
    for (d, dataset_type) in instance.table.types().iter().enumerate() {
        for p in 0..num_processors {
            for t in 0..num_translates {
                let count = dataset_type.access[t][p];
                if count != 0 {
                    let _ = writeln!(data, "\td{d}\tp{p}\tt{t}\t{count}");
                }
            }
        }
    }
    data.push_str(";\n\nend;\n");

    data
}

/// Maps the `Status:` and `Objective:` lines of a solver report to an
/// outcome.
pub fn parse_solution_report(report: &str) -> Result<MilpOutcome, MilpError> {
    let status_pattern = Regex::new(r"(?m)^Status:\s*(.+)$")
        .map_err(|e| MilpError::MalformedReport(e.to_string()))?;
    let objective_pattern = Regex::new(r"(?m)^Objective:.*=\s*([-+0-9.eE]+)")
        .map_err(|e| MilpError::MalformedReport(e.to_string()))?;

    let status = status_pattern
        .captures(report)
        .and_then(|captures| captures.get(1))
        .map(|status| status.as_str().trim().to_uppercase())
        .ok_or_else(|| MilpError::MalformedReport("no status line".to_string()))?;

    if status.contains("INTEGER OPTIMAL") || status == "OPTIMAL" {
        let objective = objective_pattern
            .captures(report)
            .and_then(|captures| captures.get(1))
            .and_then(|value| value.as_str().parse::<f64>().ok())
            .ok_or_else(|| MilpError::MalformedReport("no objective line".to_string()))?;
        return Ok(MilpOutcome::Optimal(objective));
    }
    if status.contains("NON-OPTIMAL") || status.contains("FEASIBLE") {
        return Ok(MilpOutcome::FeasibleOnly);
    }
    if status.contains("EMPTY") || status.contains("INFEASIBLE") || status.contains("HAS NO") {
        return Ok(MilpOutcome::Infeasible);
    }
    if status.contains("UNBOUNDED") {
        return Ok(MilpOutcome::Unbounded);
    }
    if status.contains("UNDEFINED") {
        return Ok(MilpOutcome::Undefined);
    }

    Err(MilpError::MalformedReport(format!(
        "unrecognized status `{status}`"
    )))
}

/// Oracle that shells out to `glpsol` with the GMPL model and a generated
/// data file, then reads back the solution report.
pub struct GlpsolOracle {
    model_dir: PathBuf,
    time_limit: Option<u64>,
}

impl GlpsolOracle {
    pub fn new(model_dir: impl Into<PathBuf>, time_limit: Option<u64>) -> Self {
        GlpsolOracle {
            model_dir: model_dir.into(),
            time_limit,
        }
    }

    fn model_file(&self) -> PathBuf {
        self.model_dir.join("model.mod")
    }
}

impl MilpOracle for GlpsolOracle {
    fn solve(
        &self,
        lattice_index: usize,
        instance: &MilpInstance,
    ) -> Result<MilpOutcome, MilpError> {
        let model_file = self.model_file();
        if !model_file.exists() {
            return Err(MilpError::ModelMissing(model_file));
        }

        let data_file = self.model_dir.join(format!("lattice{lattice_index}.dat"));
        let report_file = self.model_dir.join(format!("lattice{lattice_index}.sol"));

        std::fs::write(&data_file, gmpl_data(instance)).map_err(|source| {
            MilpError::DataFile {
                file: data_file.clone(),
                source,
            }
        })?;

        let mut command = Command::new("glpsol");
        command
            .arg("--model")
            .arg(&model_file)
            .arg("--data")
            .arg(&data_file)
            .arg("--output")
            .arg(&report_file);
        if let Some(seconds) = self.time_limit {
            command.arg("--tmlim").arg(seconds.to_string());
        }

        debug!("solving lattice {lattice_index} with {command:?}");

        let output = command
            .output()
            .map_err(|e| MilpError::SolverInvocation(e.to_string()))?;
        if !output.status.success() {
            return Err(MilpError::SolverInvocation(format!(
                "glpsol exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let report = std::fs::read_to_string(&report_file)?;
        parse_solution_report(&report)
    }
}

/// Solves every lattice's instance and keeps the best one.
///
/// A lattice replaces the incumbent only when the solver proves optimality
/// and its objective strictly improves on the previous optimum; the first
/// proved optimum is always accepted. Lattices whose instance turns out
/// infeasible, unbounded, undefined or merely feasible are skipped so that
/// the remaining candidates can still produce an answer.
pub fn select_best_lattice(
    stream: &mut dyn Write,
    oracle: &dyn MilpOracle,
    tables: &[DatasetTypeTable],
    num_banks: usize,
    bank_latency: u64,
    delta: &[Vec<u64>],
) -> Result<usize, MilpError> {
    let mut current_best = 0.0f64;
    let mut best_lattice: Option<usize> = None;

    for (index, table) in tables.iter().enumerate() {
        debug!("fundamental lattice {index}:\n{table}");

        let instance = MilpInstance {
            num_banks,
            table,
            min_latency: current_best,
            non_first_lattice: index > 0,
            bank_latency,
            delta,
        };

        match oracle.solve(index, &instance)? {
            MilpOutcome::Optimal(objective) => {
                if best_lattice.is_none() || objective < current_best + 1.0 {
                    current_best = objective - 1.0;
                    best_lattice = Some(index);
                    support::news(stream, "New current best lattice")?;
                } else {
                    debug!("lattice {index}: optimum {objective} does not improve the bound");
                }
            }
            MilpOutcome::Infeasible => {
                warn!("lattice {index}: no feasible solution");
            }
            MilpOutcome::FeasibleOnly => {
                support::warning(
                    stream,
                    "Integer feasible solution, but too much time to prove optimality",
                )?;
            }
            MilpOutcome::Unbounded => {
                warn!("lattice {index}: the relaxation is unbounded");
            }
            MilpOutcome::Undefined => {
                warn!("lattice {index}: undefined solution");
            }
        }
    }

    best_lattice.ok_or(MilpError::NoOptimalLattice)
}
