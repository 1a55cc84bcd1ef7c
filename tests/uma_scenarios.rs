//! End-to-end scenarios for the UMA cost path.
//!
//! The first group drives the full file-based pipeline from a staged input
//! tree; the second composes the stage functions directly and checks the
//! exact cost sums of small hand-analyzable workloads.

use isl_rs::{Context, Set, UnionMap, UnionSet};
use latpart::cost::evaluate_lattice;
use latpart::datasets::concurrent_dataset;
use latpart::facade::{self, Visit};
use latpart::linearize::{linearize_dates, linearized_date_set};
use latpart::model::{ManipulatedModel, TaskModel};
use latpart::parameters::eliminate_parameters;
use latpart::pipeline::{self, PipelineConfig, PipelineError, TaskRequest};
use latpart::schedule::physical_schedule;
use latpart::slices::polyhedral_slice;
use latpart::virtual_space::virtual_allocation;
use latpart::TaskParameters;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn write_file(root: &TempDir, relative: &str, contents: &str) {
    let path = root.path().join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut file = std::fs::File::create(path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
}

fn parallel_loop_task(root: &TempDir, name: &str, trip_count: usize, array: &str) {
    let contents = format!(
        "Instance set: {{ S[i] : 0 <= i < {n} }}\n\
         Array extent: {{ {a}[x] : 0 <= x < {n} }}\n\
         May reads: {{ }}\n\
         May writes: {{ }}\n\
         Must writes: {{ S[i] -> {a}[i] }}\n\
         Schedule: {{ domain: \"{{ S[i] : 0 <= i < {n} }}\", child: {{ schedule: \"[{{ S[i] -> [(i)] }}]\", permutable: 1, coincident: [ 1 ] }} }}\n",
        n = trip_count,
        a = array,
    );
    write_file(root, &format!("Sources/{name}.txt"), &contents);
    write_file(
        root,
        &format!("Sources/Parameters/{name}/default.txt"),
        "Number of parameters: 0\nParameters values:\n",
    );
}

fn parity_lattices(root: &TempDir) {
    write_file(
        root,
        "Lattices/2_dim2_numLattices.txt",
        "Number of different fundamental lattices: 2\n",
    );
    write_file(
        root,
        "Lattices/2_dim2_lattice1_translate1.txt",
        "{ [t, a] : a mod 2 = 0 }\n",
    );
    write_file(
        root,
        "Lattices/2_dim2_lattice1_translate2.txt",
        "{ [t, a] : a mod 2 = 1 }\n",
    );
    write_file(
        root,
        "Lattices/2_dim2_lattice2_translate1.txt",
        "{ [t, a] : a mod 2 = 1 }\n",
    );
    write_file(
        root,
        "Lattices/2_dim2_lattice2_translate2.txt",
        "{ [t, a] : a mod 2 = 0 }\n",
    );
}

fn config(root: &TempDir) -> PipelineConfig {
    PipelineConfig {
        input_root: root.path().to_path_buf(),
        milp_dir: PathBuf::from("MLP"),
        milp_time_limit: None,
    }
}

fn requests(names: &[&str]) -> Vec<TaskRequest> {
    names
        .iter()
        .map(|name| TaskRequest {
            task_name: (*name).to_string(),
            parameter_name: "default".to_string(),
        })
        .collect()
}

/// Two single-loop tasks over a two-bank machine: the mirrored lattices
/// cost the same, so the tie falls to the first one.
#[test]
fn equal_cost_lattices_tie_break_to_the_lowest_index() {
    let root = TempDir::new().unwrap();
    write_file(
        &root,
        "Architectures/two-banks.txt",
        "Architecture type: UMA\nNumber of processors: 2\nNumber of memory banks: 2\n",
    );
    write_file(
        &root,
        "Allocations/one-each.txt",
        "Number of working processors: 2\n\
         Number of executing tasks: 2\n\
         Processors assigned to each task:\n1 1\n",
    );
    parallel_loop_task(&root, "long", 6, "A");
    parallel_loop_task(&root, "short", 2, "B");
    parity_lattices(&root);

    let mut output = Vec::new();
    let best = pipeline::run(
        &mut output,
        &config(&root),
        "two-banks",
        "one-each",
        &requests(&["long", "short"]),
    )
    .unwrap();

    assert_eq!(best, 0);
    let report = String::from_utf8(output).unwrap();
    assert!(report.contains("Completed"));
    assert!(!report.contains("Failed"));
}

/// A task whose schedule carries no coincident band aborts the physical
/// schedule stage.
#[test]
fn a_sequential_schedule_fails_the_physical_schedule_stage() {
    let root = TempDir::new().unwrap();
    write_file(
        &root,
        "Architectures/two-banks.txt",
        "Architecture type: UMA\nNumber of processors: 2\nNumber of memory banks: 2\n",
    );
    write_file(
        &root,
        "Allocations/single.txt",
        "Number of working processors: 1\n\
         Number of executing tasks: 1\n\
         Processors assigned to each task:\n1\n",
    );
    write_file(
        &root,
        "Sources/seq.txt",
        "Instance set: { S[i] : 0 <= i < 4 }\n\
         Array extent: { A[x] : 0 <= x < 4 }\n\
         May reads: { }\n\
         May writes: { }\n\
         Must writes: { S[i] -> A[i] }\n\
         Schedule: { domain: \"{ S[i] : 0 <= i < 4 }\", child: { schedule: \"[{ S[i] -> [(i)] }]\" } }\n",
    );
    write_file(
        &root,
        "Sources/Parameters/seq/default.txt",
        "Number of parameters: 0\nParameters values:\n",
    );
    parity_lattices(&root);

    let mut output = Vec::new();
    let outcome = pipeline::run(
        &mut output,
        &config(&root),
        "two-banks",
        "single",
        &requests(&["seq"]),
    );

    assert!(matches!(outcome, Err(PipelineError::Schedule(_))));
    let report = String::from_utf8(output).unwrap();
    assert!(report.contains("no parallel dimension found"));
    assert!(report.contains("Failed"));
}

fn task(ctx: &Context, instances: &str, extent: &str, writes: &str, schedule: &str) -> TaskModel {
    TaskModel {
        name: "task".to_string(),
        instance_set: UnionSet::read_from_str(ctx, instances),
        schedule: isl_rs::Schedule::read_from_str(ctx, schedule),
        array_extent: Set::read_from_str(ctx, extent),
        may_reads: UnionMap::read_from_str(ctx, "{ }"),
        may_writes: UnionMap::read_from_str(ctx, "{ }"),
        must_writes: UnionMap::read_from_str(ctx, writes),
    }
}

/// Composes the UMA stage functions and returns the total cost of each
/// lattice.
fn uma_costs(
    ctx: &Arc<Context>,
    tasks: &[TaskModel],
    processors_per_task: &[usize],
    lattices: &[Vec<Set>],
) -> Vec<u64> {
    let (remapped, d_virt) = virtual_allocation(ctx, tasks);
    let physical = physical_schedule(ctx, tasks, processors_per_task).unwrap();

    let mut models: Vec<ManipulatedModel> = tasks
        .iter()
        .zip(remapped.into_iter().zip(physical))
        .map(|(task, (accesses, schedule))| ManipulatedModel {
            parallel_pos: schedule.parallel_pos,
            instance_set: task.instance_set.copy(),
            flattened_schedule: schedule.flattened,
            allocation: None,
            remapped_may_reads: accesses.may_reads,
            remapped_may_writes: accesses.may_writes,
            remapped_must_writes: accesses.must_writes,
            linearized_schedule: UnionMap::read_from_str(ctx, "{ }"),
        })
        .collect();

    let parameters = vec![TaskParameters::default(); tasks.len()];
    eliminate_parameters(ctx, &mut models, &parameters);
    linearize_dates(ctx, &mut models).unwrap();
    let dates = linearized_date_set(ctx, &models);

    let mut costs = vec![0u64; lattices.len()];
    facade::for_each_point(&dates, |date| {
        let slices: Vec<UnionSet> = models
            .iter()
            .map(|model| polyhedral_slice(model, &date))
            .collect();
        let dataset = concurrent_dataset(ctx, &models, &slices, d_virt);
        for (index, translates) in lattices.iter().enumerate() {
            costs[index] += evaluate_lattice(&dataset, translates).unwrap();
        }
        Ok(Visit::Continue)
    })
    .unwrap();

    costs
}

fn parity_translate_sets(ctx: &Context) -> Vec<Vec<Set>> {
    vec![
        vec![
            Set::read_from_str(ctx, "{ [t, a] : a mod 2 = 0 }"),
            Set::read_from_str(ctx, "{ [t, a] : a mod 2 = 1 }"),
        ],
        vec![
            Set::read_from_str(ctx, "{ [t, a] : a mod 2 = 1 }"),
            Set::read_from_str(ctx, "{ [t, a] : a mod 2 = 0 }"),
        ],
    ]
}

/// One processor per task: at the two dates both tasks are live their
/// accesses share a translate, afterwards only the longer task pays.
#[test]
fn sequential_widths_accumulate_per_date_maxima() {
    let ctx = Arc::new(Context::alloc());
    let tasks = vec![
        task(
            &ctx,
            "{ S[i] : 0 <= i < 6 }",
            "{ A[x] : 0 <= x < 6 }",
            "{ S[i] -> A[i] }",
            "{ domain: \"{ S[i] : 0 <= i < 6 }\", child: { schedule: \"[{ S[i] -> [(i)] }]\", permutable: 1, coincident: [ 1 ] } }",
        ),
        task(
            &ctx,
            "{ T[i] : 0 <= i < 2 }",
            "{ B[x] : 0 <= x < 2 }",
            "{ T[i] -> B[i] }",
            "{ domain: \"{ T[i] : 0 <= i < 2 }\", child: { schedule: \"[{ T[i] -> [(i)] }]\", permutable: 1, coincident: [ 1 ] } }",
        ),
    ];

    let lattices = parity_translate_sets(&ctx);
    let costs = uma_costs(&ctx, &tasks, &[1, 1], &lattices);

    // Dates 0 and 1 put both live addresses in the same parity class, the
    // remaining four dates touch a single address each: 2 + 2 + 4.
    assert_eq!(costs, vec![8, 8]);
}

/// Doubling the first task's processors halves its dates; each of its
/// dates then touches both parity classes at once.
#[test]
fn widening_a_task_compresses_its_dates() {
    let ctx = Arc::new(Context::alloc());
    let tasks = vec![
        task(
            &ctx,
            "{ S[i] : 0 <= i < 6 }",
            "{ A[x] : 0 <= x < 6 }",
            "{ S[i] -> A[i] }",
            "{ domain: \"{ S[i] : 0 <= i < 6 }\", child: { schedule: \"[{ S[i] -> [(i)] }]\", permutable: 1, coincident: [ 1 ] } }",
        ),
        task(
            &ctx,
            "{ T[i] : 0 <= i < 2 }",
            "{ B[x] : 0 <= x < 2 }",
            "{ T[i] -> B[i] }",
            "{ domain: \"{ T[i] : 0 <= i < 2 }\", child: { schedule: \"[{ T[i] -> [(i)] }]\", permutable: 1, coincident: [ 1 ] } }",
        ),
    ];

    let lattices = parity_translate_sets(&ctx);
    let costs = uma_costs(&ctx, &tasks, &[2, 1], &lattices);

    // Date 0: task 0 touches A[0], A[1] and task 1 touches B[0], two
    // addresses share the even class. Date 1 mirrors it on the odd class.
    // Date 2: only task 0 is live with one address per class.
    assert_eq!(costs, vec![5, 5]);
}

/// A 4x4 iteration over a checkerboard of four banks touches one element
/// per date, so the total cost equals the date count.
#[test]
fn checkerboard_lattice_serves_one_access_per_date() {
    let ctx = Arc::new(Context::alloc());
    let tasks = vec![task(
        &ctx,
        "{ S[i, j] : 0 <= i < 4 and 0 <= j < 4 }",
        "{ A[x, y] : 0 <= x < 4 and 0 <= y < 4 }",
        "{ S[i, j] -> A[i, j] }",
        "{ domain: \"{ S[i, j] : 0 <= i < 4 and 0 <= j < 4 }\", child: { schedule: \"[{ S[i, j] -> [(i)] }, { S[i, j] -> [(j)] }]\", permutable: 1, coincident: [ 1, 1 ] } }",
    )];

    let checkerboard = vec![vec![
        Set::read_from_str(&ctx, "{ [t, x, y] : x mod 2 = 0 and y mod 2 = 0 }"),
        Set::read_from_str(&ctx, "{ [t, x, y] : x mod 2 = 0 and y mod 2 = 1 }"),
        Set::read_from_str(&ctx, "{ [t, x, y] : x mod 2 = 1 and y mod 2 = 0 }"),
        Set::read_from_str(&ctx, "{ [t, x, y] : x mod 2 = 1 and y mod 2 = 1 }"),
    ]];

    let costs = uma_costs(&ctx, &tasks, &[1], &checkerboard);
    assert_eq!(costs, vec![16]);
}

/// Parameter values flow from the parameter files into the bounds.
#[test]
fn parametric_bounds_are_resolved_before_linearization() {
    let ctx = Arc::new(Context::alloc());
    let tasks = vec![task(
        &ctx,
        "[N] -> { S[i] : 0 <= i < N }",
        "[N] -> { A[x] : 0 <= x < N }",
        "[N] -> { S[i] -> A[i] }",
        "{ domain: \"[N] -> { S[i] : 0 <= i < N }\", child: { schedule: \"[{ S[i] -> [(i)] }]\", permutable: 1, coincident: [ 1 ] } }",
    )];

    let (remapped, _) = virtual_allocation(&ctx, &tasks);
    let physical = physical_schedule(&ctx, &tasks, &[1]).unwrap();
    let mut models = vec![ManipulatedModel {
        parallel_pos: physical[0].parallel_pos,
        instance_set: tasks[0].instance_set.copy(),
        flattened_schedule: physical[0].flattened.copy(),
        allocation: None,
        remapped_may_reads: remapped[0].may_reads.copy(),
        remapped_may_writes: remapped[0].may_writes.copy(),
        remapped_must_writes: remapped[0].must_writes.copy(),
        linearized_schedule: UnionMap::read_from_str(&ctx, "{ }"),
    }];

    let parameters = vec![TaskParameters { values: vec![6] }];
    eliminate_parameters(&ctx, &mut models, &parameters);
    linearize_dates(&ctx, &mut models).unwrap();

    let dates = linearized_date_set(&ctx, &models);
    let expected = Set::read_from_str(&ctx, "{ [d] : 0 <= d < 6 }");
    assert!(dates.is_equal(&expected));
}
