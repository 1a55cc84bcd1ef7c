//! Virtual address space allocation.
//!
//! Every task owns one array in its own index space. The planner needs all
//! accessed addresses in a single space, so each array is injected into a
//! common enclosing space whose coordinate 0 carries the owning task id,
//! coordinates 1..=d carry the original array indices and any remaining
//! coordinates are pinned to zero. Distinct tasks therefore occupy disjoint
//! address subspaces.

use crate::model::{RemappedAccesses, TaskModel};
use isl_rs::{Constraint, Context, DimType, LocalSpace, Map, Set, Space, UnionMap};
use log::debug;

/// Dimensions added by the mapping policy: one task-id coordinate.
const POLICY_DIMS: u32 = 1;

/// Remaps the access relations of every task into the common virtual
/// address space.
///
/// Returns the per-task remapped relations and the dimensionality of the
/// virtual address space.
pub fn virtual_allocation(ctx: &Context, tasks: &[TaskModel]) -> (Vec<RemappedAccesses>, u32) {
    let dims: Vec<u32> = tasks
        .iter()
        .map(|task| task.array_extent.dim(DimType::Set) as u32)
        .collect();
    let d_max = dims.iter().copied().max().unwrap_or(0);
    let d_virt = d_max + POLICY_DIMS;

    debug!("virtual address space dimensionality: {d_virt}");

    let mut remapped = Vec::with_capacity(tasks.len());

    for (index, task) in tasks.iter().enumerate() {
        let d_task = dims[index];

        let target = Set::universe(Space::set_alloc(ctx, 0, d_virt));
        let mut relation = Map::from_domain_and_range(task.array_extent.copy(), target);
        let local_space = LocalSpace::from_space(relation.get_space());

        // Coordinate 0 identifies the owning task.
        let constraint = Constraint::alloc_equality(local_space.copy())
            .set_coefficient_si(DimType::Out, 0, 1)
            .set_constant_si(-(index as i32));
        relation = relation.add_constraint(constraint);

        // The original array coordinates shift up by the policy dimension.
        for j in 0..d_task {
            let constraint = Constraint::alloc_equality(local_space.copy())
                .set_coefficient_si(DimType::In, j as i32, 1)
                .set_coefficient_si(DimType::Out, (POLICY_DIMS + j) as i32, -1);
            relation = relation.add_constraint(constraint);
        }

        // Narrower arrays pad the remaining coordinates with zeros.
        for j in (POLICY_DIMS + d_task)..d_virt {
            let constraint = Constraint::alloc_equality(local_space.copy())
                .set_coefficient_si(DimType::Out, j as i32, 1)
                .set_constant_si(0);
            relation = relation.add_constraint(constraint);
        }

        debug!(
            "task {index}: virtual address space allocation {}",
            relation.to_str()
        );

        let remap = UnionMap::from_map(relation);
        remapped.push(RemappedAccesses {
            may_reads: task.may_reads.copy().apply_range(remap.copy()),
            may_writes: task.may_writes.copy().apply_range(remap.copy()),
            must_writes: task.must_writes.copy().apply_range(remap),
        });
    }

    (remapped, d_virt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::{for_each_point, Visit};
    use isl_rs::{Schedule, UnionSet};

    fn task(ctx: &Context, name: &str, extent: &str, writes: &str) -> TaskModel {
        TaskModel {
            name: name.to_string(),
            instance_set: UnionSet::read_from_str(ctx, "{ S[i] : 0 <= i < 4 }"),
            schedule: Schedule::read_from_str(
                ctx,
                "{ domain: \"{ S[i] : 0 <= i < 4 }\", child: { schedule: \"[{ S[i] -> [(i)] }]\" } }",
            ),
            array_extent: Set::read_from_str(ctx, extent),
            may_reads: UnionMap::read_from_str(ctx, "{ }"),
            may_writes: UnionMap::read_from_str(ctx, "{ }"),
            must_writes: UnionMap::read_from_str(ctx, writes),
        }
    }

    #[test]
    fn remapped_ranges_carry_the_task_id() {
        let ctx = Context::alloc();
        let tasks = vec![
            task(&ctx, "a", "{ A[a] : 0 <= a < 4 }", "{ S[i] -> A[i] }"),
            task(&ctx, "b", "{ B[a] : 0 <= a < 2 }", "{ S[i] -> B[0] : 0 <= i < 2 }"),
        ];
        let (remapped, d_virt) = virtual_allocation(&ctx, &tasks);
        assert_eq!(d_virt, 2);

        for (index, accesses) in remapped.iter().enumerate() {
            let range = Set::from_union_set(accesses.must_writes.copy().range());
            assert_eq!(range.dim(DimType::Set) as u32, d_virt);
            for_each_point(&range, |point| {
                let task_id = point.get_coordinate_val(DimType::Set, 0).get_num_si();
                assert_eq!(task_id, index as i64);
                Ok(Visit::Continue)
            })
            .unwrap();
        }
    }

    #[test]
    fn projecting_the_policy_coordinates_recovers_the_extent() {
        let ctx = Context::alloc();
        let tasks = vec![
            task(&ctx, "a", "{ A[a] : 0 <= a < 4 }", "{ S[i] -> A[i] }"),
            task(&ctx, "b", "{ B[a, b] : 0 <= a < 2 and 0 <= b < 3 }", "{ }"),
        ];
        let (remapped, d_virt) = virtual_allocation(&ctx, &tasks);
        assert_eq!(d_virt, 3);

        // Task a has one padding coordinate after its single array index.
        let range = Set::from_union_set(remapped[0].must_writes.copy().range());
        let projected = range
            .project_out(DimType::Set, 2, 1)
            .project_out(DimType::Set, 0, 1);
        let expected = Set::read_from_str(&ctx, "{ [a] : 0 <= a < 4 }");
        assert!(projected.is_equal(&expected));
    }

    #[test]
    fn tasks_occupy_disjoint_subspaces() {
        let ctx = Context::alloc();
        let tasks = vec![
            task(&ctx, "a", "{ A[a] : 0 <= a < 4 }", "{ S[i] -> A[i] }"),
            task(&ctx, "b", "{ B[a] : 0 <= a < 4 }", "{ S[i] -> B[i] }"),
        ];
        let (remapped, _) = virtual_allocation(&ctx, &tasks);

        let first = Set::from_union_set(remapped[0].must_writes.copy().range());
        let second = Set::from_union_set(remapped[1].must_writes.copy().range());
        assert!(first.intersect(second).is_empty());
    }
}
