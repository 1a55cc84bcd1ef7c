//! Staged driver of the partitioning pipeline.
//!
//! The stages run in a fixed order and every stage is a hard gate: a
//! failure prints the stage banner with a red marker and aborts the run.
//! Everything up to date linearization is shared between the two machine
//! models; the per-date work and the final selection differ, so they sit
//! behind the [`CostEngine`] capability trait with one implementation per
//! model. The UMA engine accumulates per-lattice conflict counts and picks
//! their minimum; the NUMA engine accumulates dataset-type tables and
//! delegates the selection to the MILP oracle.

use crate::architecture::{Allocation, Architecture, ArchitectureKind, TaskParameters};
use crate::cost::{access_matrix, evaluate_lattice};
use crate::datasets::{concurrent_dataset, instant_local_datasets};
use crate::facade::{self, FacadeError, Visit};
use crate::linearize::{linearize_dates, linearized_date_set};
use crate::milp::{select_best_lattice, GlpsolOracle, MilpError, MilpOracle};
use crate::model::{DatasetTypeTable, ManipulatedModel, TaskModel};
use crate::parameters::eliminate_parameters;
use crate::parsing::{self, InputError, InputLayout};
use crate::schedule::{allocation_constraint, physical_schedule, ScheduleError};
use crate::slices::{instant_local_slice, polyhedral_slice};
use crate::support::{self, PhaseReport};
use crate::virtual_space::virtual_allocation;
use isl_rs::{Context, DimType, Point, Set, Space, UnionMap, UnionSet};
use log::debug;
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

const READING_INPUTS: &str = "Reading input files";
const VIRTUAL_ALLOCATION: &str = "Virtual address space allocation";
const READING_LATTICES: &str = "Reading lattices";
const PHYSICAL_SCHEDULE: &str = "Physical schedule building";
const ALLOCATION_BUILDING: &str = "Allocation building";
const LINEARIZED_SCHEDULE: &str = "Linearized schedule building";
const POLYHEDRAL_SLICES: &str = "Polyhedral slice building";
const CONCURRENT_DATASET: &str = "Concurrent dataset building";
const COST_COMPUTATION: &str = "Cost function computation";
const INSTANT_LOCAL_SLICES: &str = "Instant local slice building";
const MAPPING_PARAMETERS: &str = "Mapping parameters computation";
const SOLUTION_EVALUATION: &str = "Solution space evaluation";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Enumeration(#[from] FacadeError),

    #[error(transparent)]
    Solver(#[from] MilpError),

    #[error("polyhedral failure during {stage}: {message}")]
    Polyhedral {
        stage: &'static str,
        message: String,
    },

    #[error("internal invariant violated: {0}")]
    Internal(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Run-wide configuration, all of it plumbed in from the command line.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub input_root: PathBuf,
    pub milp_dir: PathBuf,
    pub milp_time_limit: Option<u64>,
}

/// One task to plan: its model name paired with its parameter file name.
#[derive(Clone, Debug)]
pub struct TaskRequest {
    pub task_name: String,
    pub parameter_name: String,
}

/// Runs one stage under its banner, turning any failure into a red marker.
fn stage<T>(
    report: &mut PhaseReport,
    stream: &mut dyn Write,
    name: &str,
    run: impl FnOnce(&mut dyn Write) -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    report.begin(stream, name)?;
    match run(stream) {
        Ok(value) => {
            report.complete(stream, name)?;
            Ok(value)
        }
        Err(failure) => {
            support::error(stream, &failure.to_string())?;
            report.fail(stream, name)?;
            Err(failure)
        }
    }
}

/// Contains panics of the underlying polyhedral library and reports them
/// as stage-labelled failures.
fn guarded<T>(stage_name: &'static str, run: impl FnOnce() -> T) -> Result<T, PipelineError> {
    catch_unwind(AssertUnwindSafe(run)).map_err(|payload| PipelineError::Polyhedral {
        stage: stage_name,
        message: facade::panic_message(payload.as_ref()),
    })
}

/// Per-date work and final selection of one machine model.
trait CostEngine {
    fn per_date_stage_count(&self) -> usize;

    fn process_date(
        &mut self,
        stream: &mut dyn Write,
        report: PhaseReport,
        date: &Point,
    ) -> Result<(), PipelineError>;

    fn finish(self: Box<Self>, stream: &mut dyn Write) -> Result<usize, PipelineError>;
}

struct UmaEngine {
    ctx: Arc<Context>,
    models: Vec<ManipulatedModel>,
    translates: Vec<Vec<Set>>,
    d_virt: u32,
    costs: Vec<u64>,
}

impl UmaEngine {
    fn new(
        ctx: Arc<Context>,
        models: Vec<ManipulatedModel>,
        translates: Vec<Vec<Set>>,
        d_virt: u32,
    ) -> Self {
        let costs = vec![0; translates.len()];
        UmaEngine {
            ctx,
            models,
            translates,
            d_virt,
            costs,
        }
    }
}

impl CostEngine for UmaEngine {
    fn per_date_stage_count(&self) -> usize {
        3
    }

    fn process_date(
        &mut self,
        stream: &mut dyn Write,
        mut report: PhaseReport,
        date: &Point,
    ) -> Result<(), PipelineError> {
        let date_value = date.get_coordinate_val(DimType::Set, 0).get_num_si();
        support::info(stream, &format!("Linearized date: {date_value}"))?;

        let models = &self.models;
        let slices = stage(&mut report, stream, POLYHEDRAL_SLICES, |_| {
            guarded(POLYHEDRAL_SLICES, || {
                models
                    .iter()
                    .map(|model| polyhedral_slice(model, date))
                    .collect::<Vec<UnionSet>>()
            })
        })?;

        let ctx = &self.ctx;
        let d_virt = self.d_virt;
        let dataset = stage(&mut report, stream, CONCURRENT_DATASET, |_| {
            guarded(CONCURRENT_DATASET, || {
                concurrent_dataset(ctx, models, &slices, d_virt)
            })
        })?;
        debug!("date {date_value}: concurrent dataset {}", dataset.to_str());

        let translates = &self.translates;
        let costs = &mut self.costs;
        stage(&mut report, stream, COST_COMPUTATION, |_| {
            for (index, lattice) in translates.iter().enumerate() {
                let conflicts = evaluate_lattice(&dataset, lattice)?;
                debug!("date {date_value}: lattice {index} adds {conflicts}");
                costs[index] += conflicts;
            }
            Ok(())
        })
    }

    fn finish(self: Box<Self>, _stream: &mut dyn Write) -> Result<usize, PipelineError> {
        let mut best = 0;
        let mut best_cost = self.costs[0];
        for (index, &cost) in self.costs.iter().enumerate() {
            debug!("fundamental lattice {index}: cost function value {cost}");
            if cost < best_cost {
                best = index;
                best_cost = cost;
            }
        }
        Ok(best)
    }
}

struct NumaEngine {
    ctx: Arc<Context>,
    models: Vec<ManipulatedModel>,
    allocations: Vec<UnionMap>,
    translates: Vec<Vec<Set>>,
    d_virt: u32,
    task_on_processor: Vec<usize>,
    task_offset: Vec<usize>,
    bank_latency: Vec<u64>,
    delta: Vec<Vec<u64>>,
    tables: Vec<DatasetTypeTable>,
    oracle: Box<dyn MilpOracle>,
}

impl NumaEngine {
    #[allow(clippy::too_many_arguments)]
    fn new(
        ctx: Arc<Context>,
        models: Vec<ManipulatedModel>,
        translates: Vec<Vec<Set>>,
        d_virt: u32,
        task_on_processor: Vec<usize>,
        task_offset: Vec<usize>,
        bank_latency: Vec<u64>,
        delta: Vec<Vec<u64>>,
        oracle: Box<dyn MilpOracle>,
    ) -> Result<Self, PipelineError> {
        let num_banks = translates.first().map_or(0, Vec::len);
        let num_processors = task_on_processor.len();
        let tables = translates
            .iter()
            .map(|_| DatasetTypeTable::new(num_banks, num_processors))
            .collect();

        let mut allocations = Vec::with_capacity(models.len());
        for model in &models {
            match &model.allocation {
                Some(allocation) => allocations.push(allocation.copy()),
                None => {
                    return Err(PipelineError::Internal(
                        "a NUMA run reached the date loop without allocation relations",
                    ))
                }
            }
        }

        Ok(NumaEngine {
            ctx,
            models,
            allocations,
            translates,
            d_virt,
            task_on_processor,
            task_offset,
            bank_latency,
            delta,
            tables,
            oracle,
        })
    }
}

impl CostEngine for NumaEngine {
    fn per_date_stage_count(&self) -> usize {
        2
    }

    fn process_date(
        &mut self,
        stream: &mut dyn Write,
        mut report: PhaseReport,
        date: &Point,
    ) -> Result<(), PipelineError> {
        let date_value = date.get_coordinate_val(DimType::Set, 0).get_num_si();
        support::info(stream, &format!("Linearized date: {date_value}"))?;

        let ctx = &self.ctx;
        let models = &self.models;
        let allocations = &self.allocations;
        let task_on_processor = &self.task_on_processor;
        let task_offset = &self.task_offset;
        let d_virt = self.d_virt;

        let datasets = stage(&mut report, stream, INSTANT_LOCAL_SLICES, |_| {
            guarded(INSTANT_LOCAL_SLICES, || {
                let slices: Vec<UnionSet> = task_on_processor
                    .iter()
                    .enumerate()
                    .map(|(processor, &task)| {
                        instant_local_slice(
                            ctx,
                            &models[task],
                            &allocations[task],
                            date,
                            processor - task_offset[task],
                        )
                    })
                    .collect();
                instant_local_datasets(ctx, models, &slices, task_on_processor, d_virt)
            })
        })?;

        let translates = &self.translates;
        let tables = &mut self.tables;
        stage(&mut report, stream, MAPPING_PARAMETERS, |_| {
            for (index, lattice) in translates.iter().enumerate() {
                let matrix = access_matrix(&datasets, lattice)?;
                tables[index].add(matrix);
            }
            Ok(())
        })
    }

    fn finish(self: Box<Self>, stream: &mut dyn Write) -> Result<usize, PipelineError> {
        support::warning(
            stream,
            "Different bank latencies are currently unsupported. Latencies other than the first bank will be ignored",
        )?;

        let num_banks = self.translates.first().map_or(0, Vec::len);
        let best = select_best_lattice(
            stream,
            self.oracle.as_ref(),
            &self.tables,
            num_banks,
            self.bank_latency.first().copied().unwrap_or(1),
            &self.delta,
        )?;
        Ok(best)
    }
}

fn read_inputs(
    ctx: &Context,
    layout: &InputLayout,
    stream: &mut dyn Write,
    architecture_name: &str,
    allocation_name: &str,
    requests: &[TaskRequest],
) -> Result<(Architecture, usize, Allocation, Vec<TaskParameters>, Vec<TaskModel>), PipelineError> {
    let architecture = parsing::parse_architecture(&layout.architecture_file(architecture_name))?;
    writeln!(
        stream,
        "Number of processors in the architecture: {}",
        architecture.num_processors
    )?;
    writeln!(
        stream,
        "Number of memory banks in the architecture: {}",
        architecture.num_banks
    )?;

    let (working, allocation) = parsing::parse_allocation(
        &layout.allocation_file(allocation_name),
        architecture.kind,
        architecture.num_processors,
        requests.len(),
    )?;
    writeln!(stream, "Number of working processors: {working}")?;
    writeln!(stream, "Number of executing tasks: {}", requests.len())?;

    let mut parameters = Vec::with_capacity(requests.len());
    let mut tasks = Vec::with_capacity(requests.len());
    for request in requests {
        parameters.push(parsing::parse_parameters(&layout.parameter_file(
            &request.task_name,
            &request.parameter_name,
        ))?);
        tasks.push(parsing::parse_task_model(
            ctx,
            &layout.task_file(&request.task_name),
            &request.task_name,
        )?);
    }

    Ok((architecture, working, allocation, parameters, tasks))
}

/// Runs the whole pipeline and returns the 0-based index of the selected
/// lattice.
pub fn run(
    stream: &mut dyn Write,
    config: &PipelineConfig,
    architecture_name: &str,
    allocation_name: &str,
    requests: &[TaskRequest],
) -> Result<usize, PipelineError> {
    let layout = InputLayout::new(&config.input_root);
    let ctx = Arc::new(Context::alloc());
    let mut report = PhaseReport::new();

    let (architecture, working, allocation, parameters, tasks) =
        stage(&mut report, stream, READING_INPUTS, |stream| {
            read_inputs(
                &ctx,
                &layout,
                stream,
                architecture_name,
                allocation_name,
                requests,
            )
        })?;

    let (remapped, d_virt) = stage(&mut report, stream, VIRTUAL_ALLOCATION, |_| {
        guarded(VIRTUAL_ALLOCATION, || virtual_allocation(&ctx, &tasks))
    })?;

    let translates = stage(&mut report, stream, READING_LATTICES, |_| {
        Ok(parsing::parse_lattices(
            &ctx,
            &layout,
            architecture.num_banks,
            d_virt,
        )?)
    })?;

    let processors_per_task = allocation.processors_per_task().to_vec();
    let physical = stage(&mut report, stream, PHYSICAL_SCHEDULE, |_| {
        Ok(guarded(PHYSICAL_SCHEDULE, || {
            physical_schedule(&ctx, &tasks, &processors_per_task)
        })??)
    })?;

    let allocation_relations = match architecture.kind {
        ArchitectureKind::Numa => Some(stage(&mut report, stream, ALLOCATION_BUILDING, |_| {
            guarded(ALLOCATION_BUILDING, || {
                allocation_constraint(&ctx, &physical, &processors_per_task)
            })
        })?),
        ArchitectureKind::Uma => None,
    };

    let (models, dates) = stage(&mut report, stream, LINEARIZED_SCHEDULE, |_| {
        let mut allocation_iter = allocation_relations.map(Vec::into_iter);
        let mut models: Vec<ManipulatedModel> = Vec::with_capacity(tasks.len());
        for (task, (accesses, schedule)) in
            tasks.iter().zip(remapped.into_iter().zip(physical))
        {
            models.push(ManipulatedModel {
                parallel_pos: schedule.parallel_pos,
                instance_set: task.instance_set.copy(),
                flattened_schedule: schedule.flattened,
                allocation: allocation_iter.as_mut().and_then(Iterator::next),
                remapped_may_reads: accesses.may_reads,
                remapped_may_writes: accesses.may_writes,
                remapped_must_writes: accesses.must_writes,
                linearized_schedule: UnionMap::empty(Space::params_alloc(&ctx, 0)),
            });
        }

        guarded(LINEARIZED_SCHEDULE, || {
            eliminate_parameters(&ctx, &mut models, &parameters)
        })?;
        guarded(LINEARIZED_SCHEDULE, || linearize_dates(&ctx, &mut models))??;

        let dates = guarded(LINEARIZED_SCHEDULE, || linearized_date_set(&ctx, &models))?;
        debug!("unified linearized schedule space: {}", dates.to_str());
        Ok((models, dates))
    })?;

    let mut engine: Box<dyn CostEngine> = match &allocation {
        Allocation::Uma { .. } => {
            Box::new(UmaEngine::new(ctx.clone(), models, translates, d_virt))
        }
        Allocation::Numa {
            task_on_processor,
            task_offset,
            ..
        } => {
            debug_assert_eq!(task_on_processor.len(), working);
            let oracle = Box::new(GlpsolOracle::new(
                &config.milp_dir,
                config.milp_time_limit,
            ));
            Box::new(NumaEngine::new(
                ctx.clone(),
                models,
                translates,
                d_virt,
                task_on_processor.clone(),
                task_offset.clone(),
                architecture.bank_latency.clone(),
                architecture.delta.clone(),
                oracle,
            )?)
        }
    };

    let per_date_stages = engine.per_date_stage_count();
    let mut date_failure: Option<PipelineError> = None;
    facade::for_each_point(&dates, |date| {
        match engine.process_date(stream, report.clone(), &date) {
            Ok(()) => Ok(Visit::Continue),
            Err(failure) => {
                date_failure = Some(failure);
                Ok(Visit::Stop)
            }
        }
    })?;
    if let Some(failure) = date_failure {
        return Err(failure);
    }
    report.advance(per_date_stages);

    stage(&mut report, stream, SOLUTION_EVALUATION, |stream| {
        engine.finish(stream)
    })
}
