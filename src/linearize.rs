//! Lexicographic date linearization.
//!
//! The flattened schedules of different tasks live in spaces of different
//! dimensionality, so their time tuples cannot be compared directly. Each
//! schedule point is therefore replaced by its rank in the lexicographic
//! order of the task's own schedule image: the rank of a point is the
//! number of points scheduled strictly before it. Counting points instead
//! of evaluating a closed-form cardinality keeps this independent of any
//! counting oracle; the enumeration is quadratic in the number of time
//! steps, which is acceptable at planning scales.

use crate::facade::{self, FacadeError, Visit};
use crate::model::ManipulatedModel;
use isl_rs::{Context, DimType, Point, Set, Space, UnionMap, UnionSet, Val};
use log::debug;

/// Computes the linearized schedule of every task.
///
/// The stored relation maps each iteration to the scalar date of its
/// flattened time tuple. Within one task it is an injection onto
/// `0..N`, where `N` is the number of distinct time tuples.
pub fn linearize_dates(
    ctx: &Context,
    models: &mut [ManipulatedModel],
) -> Result<(), FacadeError> {
    for (task, model) in models.iter_mut().enumerate() {
        let applied = model
            .instance_set
            .copy()
            .apply(model.flattened_schedule.copy());

        debug!("task {task}: applied schedule {}", applied.to_str());

        let mut partial: Option<UnionMap> = None;

        facade::for_each_union_point(&applied, |point| {
            let singleton = UnionSet::from_point(point);
            let earlier = applied
                .copy()
                .lex_lt_union_set(singleton.copy())
                .domain();
            let rank = facade::union_point_count(&earlier)?;

            let date = Point::zero(Space::set_alloc(ctx, 0, 1)).set_coordinate_val(
                DimType::Set,
                0,
                Val::int_from_si(ctx, rank as i64),
            );
            let entry =
                UnionMap::from_domain_and_range(singleton, UnionSet::from_point(date));

            partial = Some(match partial.take() {
                None => entry,
                Some(linearization) => linearization.union(entry),
            });
            Ok(Visit::Continue)
        })?;

        let partial =
            partial.unwrap_or_else(|| UnionMap::empty(Space::params_alloc(ctx, 0)));
        model.linearized_schedule = model
            .flattened_schedule
            .copy()
            .apply_range(partial)
            .coalesce();

        debug!(
            "task {task}: linearized schedule {}",
            model.linearized_schedule.to_str()
        );
    }

    Ok(())
}

/// Union of the linearized dates of all tasks, the index set of the
/// per-date part of the pipeline.
pub fn linearized_date_set(ctx: &Context, models: &[ManipulatedModel]) -> Set {
    let mut dates: Option<Set> = None;

    for model in models {
        let range = model.linearized_schedule.copy().range();
        if range.is_empty() {
            continue;
        }
        let range = Set::from_union_set(range);
        dates = Some(match dates {
            None => range,
            Some(collected) => collected.union(range),
        });
    }

    match dates {
        Some(collected) => collected.coalesce(),
        None => Set::empty(Space::set_alloc(ctx, 0, 1)),
    }
}
