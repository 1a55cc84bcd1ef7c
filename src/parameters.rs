//! Symbolic parameter elimination.
//!
//! Loop bounds and access relations arrive with symbolic parameters whose
//! concrete values are supplied out of band, one list per task. This stage
//! pins every parameter to its value with an equality constraint and then
//! projects the parameter dimensions away, so that all later stages work on
//! fully concrete integer sets. After it has run, no map or set in the
//! manipulated model carries a parameter dimension.

use crate::architecture::TaskParameters;
use crate::model::ManipulatedModel;
use isl_rs::{Constraint, Context, DimType, LocalSpace, Space, UnionMap, UnionSet, Val};
use log::debug;

fn eliminate_in_union_map(ctx: &Context, umap: &UnionMap, values: &[i64]) -> UnionMap {
    let list = umap.get_map_list();
    let mut bounded: Option<UnionMap> = None;

    for i in 0..list.size() {
        let mut map = list.get_at(i);
        let num_params = map.dim(DimType::Param);
        let local_space = LocalSpace::from_space(map.get_space());

        for (position, &value) in values.iter().enumerate().take(num_params as usize) {
            let constraint = Constraint::alloc_equality(local_space.copy())
                .set_coefficient_si(DimType::Param, position as i32, 1)
                .set_constant_val(Val::int_from_si(ctx, -value));
            map = map.add_constraint(constraint);
        }

        let map = map.project_out(DimType::Param, 0, num_params as u32);
        let map = UnionMap::from_map(map);
        bounded = Some(match bounded {
            None => map,
            Some(partial) => partial.union(map),
        });
    }

    // An empty union keeps composing downstream, it just maps nothing.
    bounded.unwrap_or_else(|| UnionMap::empty(Space::params_alloc(ctx, 0)))
}

fn eliminate_in_union_set(ctx: &Context, uset: &UnionSet, values: &[i64]) -> UnionSet {
    let list = uset.get_set_list();
    let mut bounded: Option<UnionSet> = None;

    for i in 0..list.size() {
        let mut set = list.get_at(i);
        let num_params = set.dim(DimType::Param);
        let local_space = LocalSpace::from_space(set.get_space());

        for (position, &value) in values.iter().enumerate().take(num_params as usize) {
            let constraint = Constraint::alloc_equality(local_space.copy())
                .set_coefficient_si(DimType::Param, position as i32, 1)
                .set_constant_val(Val::int_from_si(ctx, -value));
            set = set.add_constraint(constraint);
        }

        let set = set.project_out(DimType::Param, 0, num_params as u32);
        let set = UnionSet::from_set(set);
        bounded = Some(match bounded {
            None => set,
            Some(partial) => partial.union(set),
        });
    }

    bounded.unwrap_or_else(|| UnionSet::empty(Space::params_alloc(ctx, 0)))
}

/// Substitutes every task's parameter values into its manipulated model and
/// projects all parameter dimensions out.
pub fn eliminate_parameters(
    ctx: &Context,
    models: &mut [ManipulatedModel],
    parameters: &[TaskParameters],
) {
    for (task, model) in models.iter_mut().enumerate() {
        let values = &parameters[task].values;
        debug!("task {task}: substituting parameter values {values:?}");

        model.instance_set = eliminate_in_union_set(ctx, &model.instance_set, values);
        model.flattened_schedule = eliminate_in_union_map(ctx, &model.flattened_schedule, values);
        if let Some(allocation) = &model.allocation {
            model.allocation = Some(eliminate_in_union_map(ctx, allocation, values));
        }
        model.remapped_may_reads = eliminate_in_union_map(ctx, &model.remapped_may_reads, values);
        model.remapped_may_writes = eliminate_in_union_map(ctx, &model.remapped_may_writes, values);
        model.remapped_must_writes =
            eliminate_in_union_map(ctx, &model.remapped_must_writes, values);
    }
}
