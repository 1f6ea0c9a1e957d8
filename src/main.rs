#[macro_use]
extern crate log;

use std::time::Instant;

use anyhow::{bail, Result};
use clap::Parser;

use heapgraph::cli::{Args, Commands, DumpArgs, LivenessArgs};
use heapgraph::*;

fn dump(model: &SnapshotObjectModel, args: &DumpArgs) -> Result<()> {
    let start = Instant::now();
    let stats = write_heap_dump(model, &args.output, &args.options())?;
    info!(
        "Finished writing {} in {} ms",
        args.output.display(),
        start.elapsed().as_millis()
    );
    for t in &stats.truncations {
        println!(
            "truncated {} array {} from {} to {} elements",
            t.type_name, t.object, t.length, t.truncated_length
        );
    }
    if stats.skipped_objects > 0 {
        println!("skipped {} unreadable objects", stats.skipped_objects);
    }
    Ok(())
}

fn liveness(model: &SnapshotObjectModel, args: LivenessArgs) -> Result<()> {
    let mut session = AnalysisSession::new(model);
    let mut progress = LogProgress::default();
    session.build_reverse_ptrs(Some(&mut progress))?;
    let Some(paths) = session.compute_all_liveness_paths(args.object, !args.no_trim) else {
        bail!("{} is not reachable from any root", args.object);
    };
    let Some(rev) = session.reverse_ptrs() else {
        bail!("reverse pointer index is missing");
    };
    println!("{} liveness path(s) for {}", paths.len(), args.object);
    for (i, path) in paths.iter().enumerate() {
        println!("path #{}:", i);
        print!("{}", path.describe(rev));
    }
    Ok(())
}

fn revptrs(model: &SnapshotObjectModel) -> Result<()> {
    let mut session = AnalysisSession::new(model);
    let start = Instant::now();
    let mut progress = LogProgress::default();
    let rev = session.build_reverse_ptrs(Some(&mut progress))?;
    let elapsed = start.elapsed();
    if cfg!(debug_assertions) {
        let sanity_traced_objects = verify_reverse_ptrs(model, rev)?;
        info!(
            "Sanity trace reporting {} reachable objects",
            sanity_traced_objects
        );
    }
    let stats = rev.stats();
    println!("============================ Tabulate Statistics ============================");
    println!("roots\treachable\tedges\tskipped_edges\tbytes\ttime_ms");
    println!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        stats.roots,
        stats.reachable_objects,
        stats.edges,
        stats.skipped_edges,
        stats.visited_bytes,
        elapsed.as_micros() as f64 / 1000f64
    );
    println!("-------------------------- End Tabulate Statistics --------------------------");
    Ok(())
}

pub fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let start = Instant::now();
    let heapdump = HeapDump::from_path(&args.snapshot)?;
    let model = SnapshotObjectModel::new(heapdump)?;
    info!(
        "Finish loading {} in {} ms",
        args.snapshot.display(),
        start.elapsed().as_millis()
    );
    match args.command {
        Commands::Dump(ref a) => dump(&model, a),
        Commands::Liveness(a) => liveness(&model, a),
        Commands::Revptrs => revptrs(&model),
    }
}
