//! Architecture, allocation and parameter value descriptions.
//!
//! These types are populated once from the input files and stay immutable
//! for the rest of the run. The allocation carries its own legality rules:
//! on a NUMA machine the processors assigned to a task must form one
//! contiguous range, so the per-task offsets are well defined.

use thiserror::Error;

/// Memory access time model of the target machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchitectureKind {
    Uma,
    Numa,
}

/// Target multi-bank memory architecture.
///
/// `bank_latency` and `delta` are only populated for NUMA machines; a UMA
/// machine is fully described by its processor and bank counts.
#[derive(Clone, Debug)]
pub struct Architecture {
    pub kind: ArchitectureKind,
    pub num_processors: usize,
    pub num_banks: usize,
    /// Service latency of each bank, one entry per bank.
    pub bank_latency: Vec<u64>,
    /// `delta[p][b]` is the delay of processor `p` accessing bank `b`.
    pub delta: Vec<Vec<u64>>,
}

/// Assignment of processors to tasks.
#[derive(Clone, Debug)]
pub enum Allocation {
    Uma {
        /// `n[t]` processors work on task `t`.
        processors_per_task: Vec<usize>,
    },
    Numa {
        /// Task executing on each processor.
        task_on_processor: Vec<usize>,
        /// First processor assigned to each task.
        task_offset: Vec<usize>,
        /// `n[t]` processors work on task `t`.
        processors_per_task: Vec<usize>,
    },
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("processor {processor} runs task {task}, but only {num_tasks} task(s) were provided")]
    UnknownTask {
        processor: usize,
        task: usize,
        num_tasks: usize,
    },

    #[error("task {task} runs on a non-contiguous processor range")]
    NonContiguous { task: usize },

    #[error("task {task} has no processor assigned")]
    UnassignedTask { task: usize },

    #[error("the allocation requests {requested} processors but only {available} are assignable")]
    TooManyProcessors { requested: usize, available: usize },
}

impl Allocation {
    /// Builds a UMA allocation from the per-task processor counts.
    pub fn uma(
        processors_per_task: Vec<usize>,
        num_processors: usize,
    ) -> Result<Self, AllocationError> {
        let requested: usize = processors_per_task.iter().sum();
        if requested > num_processors {
            return Err(AllocationError::TooManyProcessors {
                requested,
                available: num_processors,
            });
        }
        Ok(Allocation::Uma {
            processors_per_task,
        })
    }

    /// Builds a NUMA allocation from the task-per-processor map, deriving
    /// the per-task offsets and processor counts.
    ///
    /// The map is legal only when it consists of runs of equal task ids that
    /// never repeat a task, so that every task owns one contiguous range.
    pub fn numa(
        task_on_processor: Vec<usize>,
        num_tasks: usize,
    ) -> Result<Self, AllocationError> {
        let mut task_offset = vec![usize::MAX; num_tasks];
        let mut processors_per_task = vec![0usize; num_tasks];

        for (processor, &task) in task_on_processor.iter().enumerate() {
            if task >= num_tasks {
                return Err(AllocationError::UnknownTask {
                    processor,
                    task,
                    num_tasks,
                });
            }
            if processors_per_task[task] == 0 {
                task_offset[task] = processor;
            } else if task_offset[task] + processors_per_task[task] != processor {
                return Err(AllocationError::NonContiguous { task });
            }
            processors_per_task[task] += 1;
        }

        if let Some(task) = processors_per_task.iter().position(|&n| n == 0) {
            return Err(AllocationError::UnassignedTask { task });
        }

        Ok(Allocation::Numa {
            task_on_processor,
            task_offset,
            processors_per_task,
        })
    }

    pub fn processors_per_task(&self) -> &[usize] {
        match self {
            Allocation::Uma {
                processors_per_task,
            }
            | Allocation::Numa {
                processors_per_task,
                ..
            } => processors_per_task,
        }
    }
}

/// Concrete values of one task's symbolic parameters, in declaration order.
#[derive(Clone, Debug, Default)]
pub struct TaskParameters {
    pub values: Vec<i64>,
}
