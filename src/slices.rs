//! Per-date slices of the iteration space.
//!
//! A slice collects the iteration instances that are in flight at one
//! linearized date. On a NUMA machine the slice is further restricted to
//! one processor through the allocation relation.

use crate::model::ManipulatedModel;
use isl_rs::{Context, DimType, Point, Space, UnionMap, UnionSet, Val};

/// Iteration instances of one task whose linearized date equals `date`.
pub fn polyhedral_slice(model: &ManipulatedModel, date: &Point) -> UnionSet {
    let date_set = UnionSet::from_point(date.copy());
    model
        .linearized_schedule
        .copy()
        .intersect_range(date_set)
        .domain()
}

/// Iteration instances of one task that a single processor executes at
/// `date`.
///
/// `processor_within_task` is the processor identifier relative to the
/// task's first processor; the caller subtracts the task offset.
pub fn instant_local_slice(
    ctx: &Context,
    model: &ManipulatedModel,
    allocation: &UnionMap,
    date: &Point,
    processor_within_task: usize,
) -> UnionSet {
    let slice = polyhedral_slice(model, date);

    let processor_point = Point::zero(Space::set_alloc(ctx, 0, 1)).set_coordinate_val(
        DimType::Set,
        0,
        Val::int_from_si(ctx, processor_within_task as i64),
    );
    let on_processor = allocation
        .copy()
        .intersect_range(UnionSet::from_point(processor_point))
        .domain();

    slice
        .intersect(on_processor)
        .intersect(model.instance_set.copy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade;
    use isl_rs::UnionMap;

    fn date(ctx: &Context, value: i64) -> Point {
        Point::zero(Space::set_alloc(ctx, 0, 1)).set_coordinate_val(
            DimType::Set,
            0,
            Val::int_from_si(ctx, value),
        )
    }

    fn model(ctx: &Context) -> ManipulatedModel {
        ManipulatedModel {
            parallel_pos: 0,
            instance_set: UnionSet::read_from_str(ctx, "{ S[i] : 0 <= i < 6 }"),
            flattened_schedule: UnionMap::read_from_str(
                ctx,
                "{ S[i] -> [floor(i/2)] : 0 <= i < 6 }",
            ),
            allocation: Some(UnionMap::read_from_str(
                ctx,
                "{ S[i] -> [i mod 2] : 0 <= i < 6 }",
            )),
            remapped_may_reads: UnionMap::read_from_str(ctx, "{ }"),
            remapped_may_writes: UnionMap::read_from_str(ctx, "{ }"),
            remapped_must_writes: UnionMap::read_from_str(ctx, "{ }"),
            linearized_schedule: UnionMap::read_from_str(
                ctx,
                "{ S[i] -> [floor(i/2)] : 0 <= i < 6 }",
            ),
        }
    }

    #[test]
    fn slice_holds_all_instances_of_the_date() {
        let ctx = Context::alloc();
        let model = model(&ctx);
        let slice = polyhedral_slice(&model, &date(&ctx, 1));

        let expected = UnionSet::read_from_str(&ctx, "{ S[2]; S[3] }");
        assert!(slice.is_equal(&expected));
    }

    #[test]
    fn local_slice_restricts_to_one_processor() {
        let ctx = Context::alloc();
        let model = model(&ctx);
        let allocation = model.allocation.as_ref().unwrap().copy();

        let slice = instant_local_slice(&ctx, &model, &allocation, &date(&ctx, 1), 1);
        let expected = UnionSet::read_from_str(&ctx, "{ S[3] }");
        assert!(slice.is_equal(&expected));
    }

    #[test]
    fn slice_of_a_date_nobody_executes_is_empty() {
        let ctx = Context::alloc();
        let model = model(&ctx);
        let slice = polyhedral_slice(&model, &date(&ctx, 9));
        assert_eq!(facade::union_point_count(&slice).unwrap(), 0);
    }
}
