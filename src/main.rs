use std::path::PathBuf;
use std::process::exit;

use lalrpop_util::lalrpop_mod;
use log::{error, info};
use structopt::StructOpt;

use crate::cpu::{CPU, load_cpu_config};
use crate::loader::loader::{load, LoadError};

mod cpu;
mod loader;
mod backend;
mod instructions;

lalrpop_mod!(pub program, "/loader/program.rs");

#[derive(StructOpt, Debug)]
#[structopt(name = "Tomasulo CPU Emulator")]
struct Opt {
    /// Path of the program to load
    #[structopt(short, long, parse(from_os_str))]
    file: PathBuf,

    /// Sets a custom config file
    #[structopt(short, long, parse(from_os_str), default_value = "cpu.yaml")]
    config: PathBuf,

    /// Runs up to and including the given cycle instead of running to completion
    #[structopt(long)]
    cycle: Option<u64>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opt = Opt::from_args();

    let cpu_config_path = opt.config.to_string_lossy();
    let cpu_config = match load_cpu_config(&cpu_config_path) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load {}. Cause: {}", cpu_config_path, err);
            exit(1);
        }
    };

    let path = opt.file.to_string_lossy();
    info!("Loading {}", path);
    let program = match load(cpu_config.clone(), &path) {
        Ok(program) => program,
        Err(err) => {
            error!("Loading program '{}' failed.", path);
            match err {
                LoadError::AnalysisError(msg_vec) => {
                    for msg in msg_vec {
                        error!("{}", msg);
                    }
                }
                err => error!("{}", err),
            }
            exit(1);
        }
    };

    let mut cpu = CPU::new(&cpu_config);
    if let Err(err) = cpu.load(&program).map_err(LoadError::from) {
        error!("Loading program '{}' failed. Cause: {}", path, err);
        exit(1);
    }
    info!("Cycle budget of the program: {}", program.cycle_budget);

    match opt.cycle {
        Some(target) => {
            if let Err(err) = cpu.run_to(target) {
                error!("{}", err);
                exit(1);
            }
        }
        None => {
            if !cpu.run() {
                error!("The program didn't complete within {} cycles", cpu_config.max_cycles);
            }
        }
    }

    cpu.dump_state();

    for (reg, value) in cpu.registers().iter().enumerate() {
        println!("R{} = {}", reg, value);
    }

    let perf_counters = cpu.perf_counters();
    println!("cycles={} issued={} dispatched={} broadcast={} committed={} flushes={} stalls={}",
             perf_counters.cycle_cnt,
             perf_counters.issue_cnt,
             perf_counters.dispatch_cnt,
             perf_counters.broadcast_cnt,
             perf_counters.commit_cnt,
             perf_counters.flush_cnt,
             perf_counters.stall_cnt);
}
