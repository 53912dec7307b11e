use anyhow::{Context, Result};
use nwb_trace_importer::{extract_traces_for_session, save_traces_npz, SessionConfig};
use std::env;
use std::path::PathBuf;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let config = match args.len() {
        2 => SessionConfig::from_json_file(&args[1])
            .with_context(|| format!("loading configuration from {}", args[1]))?,
        4 | 5 => SessionConfig {
            session_name: args[1].clone(),
            base_dir: PathBuf::from(&args[2]),
            out_dir: PathBuf::from(&args[3]),
            prefix: args.get(4).cloned(),
        },
        _ => {
            let program = program_name(&args);
            eprintln!(
                "Usage: {} <session_name> <base_dir> <out_dir> [prefix]\n       {} <config.json>",
                program, program
            );
            std::process::exit(1);
        }
    };

    let traces = extract_traces_for_session(&config.session_name, &config.base_dir)
        .with_context(|| format!("extracting session {}", config.session_name))?;

    println!("session: {}", traces.session_name);
    println!("stim_table rows: {}", traces.stim_table.num_rows());
    println!("planes extracted: {}", traces.planes.len());
    for plane in &traces.planes {
        println!(
            " - {}: X=({}, {}), dt={:.4}s, rois={}",
            plane.plane_key,
            plane.num_samples(),
            plane.num_rois(),
            plane.dt,
            plane.roi_ids.len()
        );
    }

    let saved = save_traces_npz(&traces, &config.out_dir, Some(config.prefix()))
        .with_context(|| format!("saving archives to {}", config.out_dir.display()))?;
    let saved: Vec<String> = saved.iter().map(|p| p.display().to_string()).collect();
    println!("saved: {}", saved.join("\n "));

    let table_path = config
        .out_dir
        .join(format!("{}_stimulus_table.csv", config.prefix()));
    traces
        .stim_table
        .write_csv(&table_path)
        .with_context(|| format!("writing {}", table_path.display()))?;
    println!("stimulus table: {}", table_path.display());

    Ok(())
}

// Helper function to get the name the program was invoked as
fn program_name(args: &[String]) -> &str {
    args.first().map_or("extract_traces", String::as_str)
}
