//! Polyhedral model containers.
//!
//! [`TaskModel`] holds the immutable inputs of one task. The pipeline
//! stages turn it into a [`ManipulatedModel`], one relation at a time; the
//! stage functions live in their own modules and this module only owns the
//! data. The NUMA cost function additionally accumulates access matrices in
//! a [`DatasetTypeTable`] across all linearized dates.

use isl_rs::{Schedule, Set, UnionMap, UnionSet};
use std::fmt;

/// Polyhedral description of one task, as read from its input file.
///
/// Each task owns exactly one array, so a single extent set suffices.
pub struct TaskModel {
    pub name: String,
    pub instance_set: UnionSet,
    pub schedule: Schedule,
    pub array_extent: Set,
    pub may_reads: UnionMap,
    pub may_writes: UnionMap,
    pub must_writes: UnionMap,
}

/// Access relations of one task remapped into the shared virtual address
/// space.
pub struct RemappedAccesses {
    pub may_reads: UnionMap,
    pub may_writes: UnionMap,
    pub must_writes: UnionMap,
}

/// Physical schedule of one task.
///
/// `schedule_map` is the unflattened `iteration -> time` relation; the
/// allocation constraint is derived from it, so it is kept alongside the
/// flattened form until that stage has run.
pub struct PhysicalSchedule {
    pub parallel_pos: u32,
    pub schedule_map: UnionMap,
    pub flattened: UnionMap,
}

/// Manipulated polyhedral model of one task.
///
/// Built once by the pipeline and then only read by the per-date stages.
/// `allocation` is only present on NUMA runs.
pub struct ManipulatedModel {
    pub parallel_pos: u32,
    pub instance_set: UnionSet,
    pub flattened_schedule: UnionMap,
    pub allocation: Option<UnionMap>,
    pub remapped_may_reads: UnionMap,
    pub remapped_may_writes: UnionMap,
    pub remapped_must_writes: UnionMap,
    pub linearized_schedule: UnionMap,
}

/// One distinct access-matrix shape together with its multiplicity.
///
/// `access[t][p]` is the number of points of translate `t` accessed by
/// processor `p` in one time instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetType {
    pub access: Vec<Vec<u32>>,
    pub multiplicity: u32,
}

/// Insertion-ordered association of distinct access matrices to
/// multiplicities, accumulated over all linearized dates of one lattice.
#[derive(Clone, Debug)]
pub struct DatasetTypeTable {
    types: Vec<DatasetType>,
    num_translates: usize,
    num_processors: usize,
}

impl DatasetTypeTable {
    pub fn new(num_translates: usize, num_processors: usize) -> Self {
        DatasetTypeTable {
            types: Vec::new(),
            num_translates,
            num_processors,
        }
    }

    /// Records one access matrix. A matrix equal to an already known shape
    /// bumps that shape's multiplicity, anything else starts a new entry.
    /// Equality is exact matrix equality.
    pub fn add(&mut self, access: Vec<Vec<u32>>) {
        debug_assert_eq!(access.len(), self.num_translates);
        debug_assert!(access.iter().all(|row| row.len() == self.num_processors));

        for known in &mut self.types {
            if known.access == access {
                known.multiplicity += 1;
                return;
            }
        }
        self.types.push(DatasetType {
            access,
            multiplicity: 1,
        });
    }

    pub fn types(&self) -> &[DatasetType] {
        &self.types
    }

    pub fn num_translates(&self) -> usize {
        self.num_translates
    }

    pub fn num_processors(&self) -> usize {
        self.num_processors
    }

    /// Sum of all multiplicities, which equals the number of dates seen.
    pub fn total_multiplicity(&self) -> u64 {
        self.types.iter().map(|t| u64::from(t.multiplicity)).sum()
    }
}

impl fmt::Display for DatasetTypeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of dataset types: {}", self.types.len())?;
        for (index, dataset_type) in self.types.iter().enumerate() {
            writeln!(
                f,
                "Type {}) multiplicity {}",
                index, dataset_type.multiplicity
            )?;
            for row in &dataset_type.access {
                let cells: Vec<String> = row.iter().map(|c| c.to_string()).collect();
                writeln!(f, "\t{}", cells.join("\t"))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_matrices_share_one_entry() {
        let mut table = DatasetTypeTable::new(2, 2);
        table.add(vec![vec![1, 0], vec![0, 1]]);
        table.add(vec![vec![1, 0], vec![0, 1]]);
        table.add(vec![vec![0, 1], vec![1, 0]]);

        assert_eq!(table.types().len(), 2);
        assert_eq!(table.types()[0].multiplicity, 2);
        assert_eq!(table.types()[1].multiplicity, 1);
        assert_eq!(table.total_multiplicity(), 3);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut table = DatasetTypeTable::new(1, 1);
        table.add(vec![vec![3]]);
        table.add(vec![vec![1]]);
        table.add(vec![vec![3]]);

        let shapes: Vec<u32> = table.types().iter().map(|t| t.access[0][0]).collect();
        assert_eq!(shapes, vec![3, 1]);
    }

    #[test]
    fn table_dump_lists_types_with_multiplicities() {
        let mut table = DatasetTypeTable::new(2, 1);
        table.add(vec![vec![4], vec![0]]);
        let dump = table.to_string();
        assert!(dump.contains("Number of dataset types: 1"));
        assert!(dump.contains("multiplicity 1"));
    }
}
