//! Accessed-data construction.
//!
//! Applying the remapped access relations to a slice yields the virtual
//! addresses touched at one date: the union of may-reads, may-writes and
//! must-writes images. The UMA cost model works on the union across all
//! tasks, the NUMA model on one dataset per processor.

use crate::model::ManipulatedModel;
use isl_rs::{Context, Set, Space, UnionMap, UnionSet};

fn apply_accesses(
    dataset: Set,
    slice: &UnionSet,
    relation: &UnionMap,
) -> Set {
    if relation.is_empty() {
        return dataset;
    }
    let partial = slice.copy().apply(relation.copy());
    if partial.is_empty() {
        return dataset;
    }
    dataset.union(Set::from_union_set(partial))
}

fn slice_dataset(ctx: &Context, model: &ManipulatedModel, slice: &UnionSet, d_virt: u32) -> Set {
    let dataset = Set::empty(Space::set_alloc(ctx, 0, d_virt));
    let dataset = apply_accesses(dataset, slice, &model.remapped_may_reads);
    let dataset = apply_accesses(dataset, slice, &model.remapped_may_writes);
    apply_accesses(dataset, slice, &model.remapped_must_writes)
}

/// Virtual addresses accessed by any task at the current date.
pub fn concurrent_dataset(
    ctx: &Context,
    models: &[ManipulatedModel],
    slices: &[UnionSet],
    d_virt: u32,
) -> Set {
    let mut dataset = Set::empty(Space::set_alloc(ctx, 0, d_virt));
    for (model, slice) in models.iter().zip(slices) {
        dataset = dataset.union(slice_dataset(ctx, model, slice, d_virt));
    }
    dataset.coalesce()
}

/// Virtual addresses accessed by each processor at the current date.
pub fn instant_local_datasets(
    ctx: &Context,
    models: &[ManipulatedModel],
    slices: &[UnionSet],
    task_on_processor: &[usize],
    d_virt: u32,
) -> Vec<Set> {
    task_on_processor
        .iter()
        .zip(slices)
        .map(|(&task, slice)| slice_dataset(ctx, &models[task], slice, d_virt).coalesce())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use isl_rs::UnionMap;

    fn model(ctx: &Context, reads: &str, must_writes: &str) -> ManipulatedModel {
        ManipulatedModel {
            parallel_pos: 0,
            instance_set: UnionSet::read_from_str(ctx, "{ S[i] : 0 <= i < 4 }"),
            flattened_schedule: UnionMap::read_from_str(ctx, "{ S[i] -> [i] }"),
            allocation: None,
            remapped_may_reads: UnionMap::read_from_str(ctx, reads),
            remapped_may_writes: UnionMap::read_from_str(ctx, "{ }"),
            remapped_must_writes: UnionMap::read_from_str(ctx, must_writes),
            linearized_schedule: UnionMap::read_from_str(ctx, "{ S[i] -> [i] : 0 <= i < 4 }"),
        }
    }

    #[test]
    fn dataset_unions_reads_and_writes() {
        let ctx = Context::alloc();
        let models = vec![model(
            &ctx,
            "{ S[i] -> [0, i + 1] : 0 <= i < 3 }",
            "{ S[i] -> [0, i] }",
        )];
        let slices = vec![UnionSet::read_from_str(&ctx, "{ S[1] }")];

        let dataset = concurrent_dataset(&ctx, &models, &slices, 2);
        let expected = Set::read_from_str(&ctx, "{ [0, 1]; [0, 2] }");
        assert!(dataset.is_equal(&expected));
    }

    #[test]
    fn empty_relations_contribute_nothing() {
        let ctx = Context::alloc();
        let models = vec![model(&ctx, "{ }", "{ }")];
        let slices = vec![UnionSet::read_from_str(&ctx, "{ S[1] }")];

        let dataset = concurrent_dataset(&ctx, &models, &slices, 2);
        assert!(dataset.is_empty());
    }

    #[test]
    fn per_processor_datasets_follow_the_task_map() {
        let ctx = Context::alloc();
        let models = vec![
            model(&ctx, "{ }", "{ S[i] -> [0, i] }"),
            model(&ctx, "{ }", "{ S[i] -> [1, i] }"),
        ];
        let slices = vec![
            UnionSet::read_from_str(&ctx, "{ S[0] }"),
            UnionSet::read_from_str(&ctx, "{ S[1] }"),
            UnionSet::read_from_str(&ctx, "{ S[2] }"),
        ];
        let datasets = instant_local_datasets(&ctx, &models, &slices, &[0, 0, 1], 2);

        assert!(datasets[0].is_equal(&Set::read_from_str(&ctx, "{ [0, 0] }")));
        assert!(datasets[1].is_equal(&Set::read_from_str(&ctx, "{ [0, 1] }")));
        assert!(datasets[2].is_equal(&Set::read_from_str(&ctx, "{ [1, 2] }")));
    }
}
