//! Per-date scoring of candidate lattices.
//!
//! Intersecting a dataset with each translate of a lattice splits the
//! accessed addresses by memory bank. On a UMA machine the date's cost is
//! the largest per-bank count, the number of conflicting accesses the worst
//! bank must serve. On a NUMA machine the per-translate per-processor
//! counts form the access matrix consumed by the MILP formulation.

use crate::facade::{self, FacadeError};
use isl_rs::Set;

/// Maximum number of concurrent accesses any single translate receives
/// from `dataset`.
pub fn evaluate_lattice(dataset: &Set, translates: &[Set]) -> Result<u64, FacadeError> {
    let mut worst = 0u64;

    for translate in translates {
        let z_polyhedron = dataset.copy().intersect(translate.copy());
        let accesses = facade::point_count(&z_polyhedron)?;
        if accesses > worst {
            worst = accesses;
        }
    }

    Ok(worst)
}

/// Access matrix of one lattice at one date.
///
/// `matrix[t][p]` counts the points of translate `t` accessed by processor
/// `p`.
pub fn access_matrix(
    datasets: &[Set],
    translates: &[Set],
) -> Result<Vec<Vec<u32>>, FacadeError> {
    let mut matrix = Vec::with_capacity(translates.len());

    for translate in translates {
        let mut row = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            let z_polyhedron = dataset
                .copy()
                .intersect(translate.copy())
                .coalesce()
                .detect_equalities();
            row.push(facade::point_count(&z_polyhedron)? as u32);
        }
        matrix.push(row);
    }

    Ok(matrix)
}
