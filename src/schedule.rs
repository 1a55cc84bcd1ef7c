//! Physical schedule and processor allocation construction.
//!
//! The schedule tree of a task marks its parallel loops through the
//! coincident flags of its band nodes. The outermost coincident band gives
//! the parallel time coordinate; dividing that coordinate by the number of
//! processors assigned to the task collapses the iterations that execute
//! simultaneously onto a single time step. The companion allocation
//! relation sends each iteration to the processor (within the task) that
//! executes it, through the residue of the same coordinate.

use crate::model::{PhysicalSchedule, TaskModel};
use isl_rs::{Context, DimType, Map, ScheduleNode, ScheduleNodeType, Set, UnionMap};
use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("no parallel dimension found in the schedule of task {task}")]
    NoParallelBand { task: usize },

    #[error("the schedule of task {task} is empty")]
    EmptySchedule { task: usize },

    #[error("task {task} has no processor assigned")]
    ZeroProcessors { task: usize },
}

/// Depth of the shallowest band whose first member is coincident. The
/// depth of a band is the number of schedule dimensions introduced by the
/// bands above it. A matching band prunes its own subtree; every other
/// branch is still scanned and the minimum depth across them wins.
fn outermost_coincident_depth(node: &ScheduleNode, depth: u32) -> Option<u32> {
    let mut child_depth = depth;

    if node.get_type() == ScheduleNodeType::Band {
        if node.band_member_get_coincident(0) {
            return Some(depth);
        }
        child_depth += node.band_n_member() as u32;
    }

    let mut shallowest: Option<u32> = None;
    if node.has_children() {
        for i in 0..node.n_children() {
            if let Some(found) = outermost_coincident_depth(&node.get_child(i), child_depth) {
                shallowest = Some(match shallowest {
                    None => found,
                    Some(best) => best.min(found),
                });
            }
        }
    }

    shallowest
}

fn schedule_dimensionality(schedule_map: &UnionMap) -> u32 {
    Set::from_union_set(schedule_map.copy().range()).dim(DimType::Set) as u32
}

fn time_tuple(dim: u32) -> Vec<String> {
    (0..dim).map(|i| format!("t{i}")).collect()
}

/// Builds the flattened physical schedule of every task.
///
/// The flattening replaces the parallel coordinate `k` of the schedule by
/// `floor(k / n)`, where `n` is the number of processors working on the
/// task, and leaves every other coordinate untouched.
pub fn physical_schedule(
    ctx: &Context,
    tasks: &[TaskModel],
    processors_per_task: &[usize],
) -> Result<Vec<PhysicalSchedule>, ScheduleError> {
    let mut physical = Vec::with_capacity(tasks.len());

    for (task, model) in tasks.iter().enumerate() {
        let n = processors_per_task[task];
        if n == 0 {
            return Err(ScheduleError::ZeroProcessors { task });
        }

        let root = model.schedule.get_root();
        let parallel_pos = outermost_coincident_depth(&root, 0)
            .ok_or(ScheduleError::NoParallelBand { task })?;

        debug!("task {task}: outermost parallel dimension at depth {parallel_pos}");

        let schedule_map = model.schedule.get_map();
        if schedule_map.is_empty() {
            return Err(ScheduleError::EmptySchedule { task });
        }

        let dim = schedule_dimensionality(&schedule_map);
        let inputs = time_tuple(dim);
        let outputs: Vec<String> = inputs
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if i as u32 == parallel_pos {
                    format!("floor(({t})/{n})")
                } else {
                    t.clone()
                }
            })
            .collect();
        let divider = format!(
            "{{ [{}] -> [{}] }}",
            inputs.join(", "),
            outputs.join(", ")
        );

        debug!("task {task}: physical schedule division {divider}");

        let divider = Map::read_from_str(ctx, &divider);
        let flattened = schedule_map
            .copy()
            .apply_range(UnionMap::from_map(divider));

        debug!("task {task}: flattened schedule {}", flattened.to_str());

        physical.push(PhysicalSchedule {
            parallel_pos,
            schedule_map,
            flattened,
        });
    }

    Ok(physical)
}

/// Builds the processor assignment of every task.
///
/// The resulting relation maps each iteration to `k mod n`, the identifier
/// of the executing processor within the task. Callers add the task's
/// processor offset to obtain global processor identifiers.
pub fn allocation_constraint(
    ctx: &Context,
    physical: &[PhysicalSchedule],
    processors_per_task: &[usize],
) -> Vec<UnionMap> {
    let mut allocations = Vec::with_capacity(physical.len());

    for (task, schedule) in physical.iter().enumerate() {
        let n = processors_per_task[task];
        let dim = schedule_dimensionality(&schedule.schedule_map);
        let inputs = time_tuple(dim);
        let residue = format!(
            "{{ [{}] -> [({}) mod {}] }}",
            inputs.join(", "),
            inputs[schedule.parallel_pos as usize],
            n
        );

        let residue = Map::read_from_str(ctx, &residue);
        let allocation = schedule
            .schedule_map
            .copy()
            .apply_range(UnionMap::from_map(residue));

        debug!("task {task}: allocation {}", allocation.to_str());

        allocations.push(allocation);
    }

    allocations
}
