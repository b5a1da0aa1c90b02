use std::error::Error;
use std::fs::File;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::backend::backend::{Backend, CommitOutcome, CycleReport, InvalidLoad};
use crate::instructions::instructions::{Opcode, Program, WordType};

#[derive(Clone, Debug, Default)]
pub(crate) struct PerfCounters {
    pub cycle_cnt: u64,
    pub issue_cnt: u64,
    pub dispatch_cnt: u64,
    pub broadcast_cnt: u64,
    pub commit_cnt: u64,
    pub flush_cnt: u64,
    // cycles in which the head of the instruction queue couldn't be issued
    pub stall_cnt: u64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Clone, Deserialize, Debug)]
pub(crate) struct Trace {
    pub issue: bool,
    pub dispatch: bool,
    pub broadcast: bool,
    pub commit: bool,
    pub flush: bool,
    pub cycle: bool,
}

/// The number of cycles an operation occupies its execution unit.
#[derive(Clone, Deserialize, Debug)]
pub(crate) struct Latency {
    pub add: u8,
    pub sub: u8,
    pub mul: u8,
    pub div: u8,
}

impl Latency {
    pub fn cycles(&self, opcode: Opcode) -> u8 {
        match opcode {
            Opcode::ADD => self.add,
            Opcode::SUB => self.sub,
            Opcode::MUL => self.mul,
            Opcode::DIV => self.div,
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub(crate) struct CPUConfig {
    // the number of architectural registers
    pub(crate) arch_reg_count: u16,
    // the number of reservation stations for ADD/SUB
    pub(crate) add_rs_count: u16,
    // the number of reservation stations for MUL/DIV
    pub(crate) mul_rs_count: u16,
    // the capacity of the reorder buffer; its slot indices are the tags
    pub(crate) rob_capacity: u16,
    // the capacity of the instruction queue; a program can't be longer
    pub(crate) instr_queue_capacity: u16,
    // the frequency of the CPU in Hz. 0 disables throttling.
    pub(crate) frequency_hz: u64,
    // running to completion gives up after this number of cycles
    pub(crate) max_cycles: u64,
    pub(crate) latency: Latency,
    // which stages should be traced (logged)
    pub(crate) trace: Trace,
}

impl Default for CPUConfig {
    fn default() -> Self {
        CPUConfig {
            arch_reg_count: 8,
            add_rs_count: 3,
            mul_rs_count: 2,
            rob_capacity: 6,
            instr_queue_capacity: 64,
            frequency_hz: 0,
            max_cycles: 10_000,
            latency: Latency { add: 2, sub: 2, mul: 10, div: 40 },
            trace: Trace { issue: false, dispatch: false, broadcast: false, commit: false, flush: false, cycle: false },
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be larger than 0")]
    Zero(&'static str),
    #[error("the reservation station count {0} doesn't fit a station index")]
    TooManyStations(u32),
}

impl CPUConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("arch_reg_count", self.arch_reg_count as u64),
            ("add_rs_count", self.add_rs_count as u64),
            ("mul_rs_count", self.mul_rs_count as u64),
            ("rob_capacity", self.rob_capacity as u64),
            ("instr_queue_capacity", self.instr_queue_capacity as u64),
            ("max_cycles", self.max_cycles),
            ("latency.add", self.latency.add as u64),
            ("latency.sub", self.latency.sub as u64),
            ("latency.mul", self.latency.mul as u64),
            ("latency.div", self.latency.div as u64),
        ];

        if let Some((name, _)) = counts.iter().find(|(_, count)| *count == 0) {
            return Err(ConfigError::Zero(*name));
        }

        let rs_count = self.add_rs_count as u32 + self.mul_rs_count as u32;
        if rs_count > u16::MAX as u32 {
            return Err(ConfigError::TooManyStations(rs_count));
        }

        Ok(())
    }
}

pub fn load_cpu_config(file_path: &str) -> Result<CPUConfig, Box<dyn Error>> {
    let file = File::open(file_path)?;
    let config: CPUConfig = serde_yaml::from_reader(file)?;
    config.validate()?;
    Ok(config)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GotoError {
    #[error("go to cycle must be after the current cycle {current}, but {target} was requested")]
    NotAfterCurrent { current: u64, target: u64 },
}

/// Drives the backend one cycle at a time and traces what happened.
pub(crate) struct CPU {
    backend: Backend,
    cycle_period: Option<Duration>,
    max_cycles: u64,
    trace: Trace,
}

impl CPU {
    pub(crate) fn new(cpu_config: &CPUConfig) -> CPU {
        let cycle_period = match cpu_config.frequency_hz {
            0 => None,
            hz => Some(Duration::from_micros(1_000_000 / hz)),
        };

        CPU {
            backend: Backend::new(cpu_config),
            cycle_period,
            max_cycles: cpu_config.max_cycles,
            trace: cpu_config.trace.clone(),
        }
    }

    pub(crate) fn load(&mut self, program: &Program) -> Result<(), InvalidLoad> {
        self.backend.load_program(program)?;
        info!("Loaded {} instructions, registers {:?}", program.code.len(), program.registers);
        Ok(())
    }

    pub(crate) fn cycle(&self) -> u64 {
        self.backend.perf_counters.cycle_cnt
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.backend.is_idle()
    }

    pub(crate) fn step(&mut self) -> CycleReport {
        let report = self.backend.do_cycle();
        self.trace_report(&report);

        if let Some(period) = self.cycle_period {
            thread::sleep(period);
        }
        report
    }

    /// Steps until the program is complete. Returns false if `max_cycles`
    /// was reached first.
    pub(crate) fn run(&mut self) -> bool {
        while !self.backend.is_idle() {
            if self.cycle() >= self.max_cycles {
                warn!("Giving up after {} cycles", self.cycle());
                return false;
            }
            self.step();
        }

        info!("Program complete after {} cycles", self.cycle());
        true
    }

    /// Steps until the given cycle has been executed. Stops earlier when the
    /// program completes or `max_cycles` is reached.
    pub(crate) fn run_to(&mut self, target: u64) -> Result<Vec<CycleReport>, GotoError> {
        let current = self.cycle();
        if target <= current {
            return Err(GotoError::NotAfterCurrent { current, target });
        }

        let mut reports = Vec::new();
        while self.cycle() < target {
            if self.backend.is_idle() {
                info!("Program complete after {} cycles", self.cycle());
                break;
            }
            if self.cycle() >= self.max_cycles {
                warn!("Giving up after {} cycles", self.cycle());
                break;
            }
            reports.push(self.step());
        }
        Ok(reports)
    }

    pub(crate) fn registers(&self) -> Vec<WordType> {
        self.backend.registers()
    }

    pub(crate) fn perf_counters(&self) -> &PerfCounters {
        &self.backend.perf_counters
    }

    fn trace_report(&self, report: &CycleReport) {
        let cycle = report.cycle;

        match report.commit {
            CommitOutcome::Committed { rob_slot_index, register, value } if self.trace.commit => {
                info!("[Cycle:{}] Committed ROB{} R{}={}", cycle, rob_slot_index, register, value);
            }
            CommitOutcome::Flushed { rob_slot_index, exception } if self.trace.flush => {
                info!("[Cycle:{}] Pipeline flush: ROB{} raised '{}'", cycle, rob_slot_index, exception);
            }
            _ => {}
        }

        if self.trace.broadcast {
            if let Some(broadcast) = report.broadcast {
                match broadcast.result {
                    Ok(value) => info!("[Cycle:{}] Broadcast ROB{}={} from RS{}", cycle, broadcast.rob_slot_index, value, broadcast.rs_index),
                    Err(exception) => info!("[Cycle:{}] Broadcast ROB{} exception '{}' from RS{}", cycle, broadcast.rob_slot_index, exception, broadcast.rs_index),
                }
            }
        }

        if self.trace.dispatch {
            for dispatched in &report.dispatched {
                info!("[Cycle:{}] Dispatched RS{} to the {:?} unit for {} cycles", cycle, dispatched.rs_index, dispatched.class, dispatched.cycles);
            }
        }

        if self.trace.issue {
            if let Some(issued) = &report.issued {
                info!("[Cycle:{}] Issued [{}] to RS{} ROB{}", cycle, issued.instr, issued.rs_index, issued.rob_slot_index);
            }
        }

        if self.trace.cycle {
            let perf_counters = &self.backend.perf_counters;
            info!("[Cycles:{}][Issued={}][Dispatched={}][Broadcast={}][Committed={}][Flushes={}][IPC={:.2}]",
                  perf_counters.cycle_cnt,
                  perf_counters.issue_cnt,
                  perf_counters.dispatch_cnt,
                  perf_counters.broadcast_cnt,
                  perf_counters.commit_cnt,
                  perf_counters.flush_cnt,
                  perf_counters.commit_cnt as f32 / perf_counters.cycle_cnt as f32);
        }
    }

    /// Logs the instruction queue, RAT, reservation stations, execution units
    /// and reorder buffer.
    pub(crate) fn dump_state(&self) {
        for (index, instr) in self.backend.instr_queue().enumerate() {
            debug!("IQ{}: {}", index, instr);
        }

        for (reg, entry) in self.backend.rat_entries().iter().enumerate() {
            match entry.producer {
                Some(tag) => debug!("R{}: {} (ROB{})", reg, entry.value, tag),
                None => debug!("R{}: {}", reg, entry.value),
            }
        }

        for rs in self.backend.stations() {
            debug!("RS{}: busy={} ready={} dispatched={} op={:?} Vj={} Vk={} Qj={:?} Qk={:?} ROB={:?}",
                   rs.index, rs.busy, rs.ready, rs.dispatched, rs.opcode, rs.vj, rs.vk, rs.qj, rs.qk, rs.rob_slot_index);
        }

        for eu in self.backend.units() {
            debug!("EU {:?}: state={:?} op={:?} remaining={} RS={:?} ROB={:?} broadcasted={} exception={}",
                   eu.class, eu.state, eu.opcode, eu.cycles_remaining, eu.rs_index, eu.rob_slot_index, eu.broadcasted, eu.exception);
        }

        let (commit_pointer, issue_pointer) = self.backend.rob_pointers();
        debug!("ROB commit pointer={} issue pointer={}", commit_pointer, issue_pointer);
        for slot in self.backend.rob_slots() {
            let instr = slot.instr.as_ref().map_or(String::new(), |instr| instr.to_string());
            debug!("ROB{}: [{}] R{} value={:?} state={:?} exception={:?}", slot.index, instr, slot.sink, slot.value, slot.state, slot.exception);
        }
    }
}
