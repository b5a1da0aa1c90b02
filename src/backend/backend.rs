use std::rc::Rc;

use thiserror::Error;

use crate::backend::execution_unit::{CDBBroadcast, EU, EUTable};
use crate::backend::register_alias_table::{RAT, RATEntry, Resolved};
use crate::backend::reorder_buffer::{ROB, ROBSlot, ROBSlotState};
use crate::backend::reservation_station::{RS, RSTable};
use crate::cpu::{CPUConfig, Latency, PerfCounters};
use crate::instructions::instructions::{ArithmeticException, Instr, InstrQueue, OpClass, Operand, Program, RegisterType, Tag, WordType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidLoad {
    #[error("expected {expected} register values, but {actual} are provided")]
    RegisterCount { expected: usize, actual: usize },
    #[error("instruction {instr} references R{reg}, but there are only {count} registers")]
    RegisterOutOfBounds { instr: usize, reg: RegisterType, count: usize },
    #[error("the program has {len} instructions, but the instruction queue holds {capacity}")]
    QueueCapacity { len: usize, capacity: u16 },
}

#[derive(Clone, Debug)]
pub struct IssueEvent {
    pub instr: Rc<Instr>,
    pub rs_index: u16,
    pub rob_slot_index: Tag,
    pub source: [Resolved; 2],
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DispatchEvent {
    pub rs_index: u16,
    pub rob_slot_index: Tag,
    pub class: OpClass,
    pub cycles: u8,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CommitOutcome {
    // the reorder buffer is empty
    Idle,
    // the oldest slot hasn't executed yet
    Stalled(Tag),
    Committed { rob_slot_index: Tag, register: RegisterType, value: WordType },
    // the oldest slot faulted; all in-flight state is discarded
    Flushed { rob_slot_index: Tag, exception: ArithmeticException },
}

/// Everything that happened during a single clock cycle.
#[derive(Clone, Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub commit: CommitOutcome,
    pub broadcast: Option<CDBBroadcast>,
    pub dispatched: Vec<DispatchEvent>,
    pub issued: Option<IssueEvent>,
}

impl CycleReport {
    /// True if the cycle didn't change anything.
    pub fn is_quiet(&self) -> bool {
        matches!(self.commit, CommitOutcome::Idle | CommitOutcome::Stalled(_))
            && self.broadcast.is_none()
            && self.dispatched.is_empty()
            && self.issued.is_none()
    }
}

/// The out-of-order backend. It owns all machine state: the instruction queue,
/// the RAT, both reservation station pools, the execution units and the
/// reorder buffer.
pub(crate) struct Backend {
    instr_queue: InstrQueue,
    rat: RAT,
    rs_table: RSTable,
    eu_table: EUTable,
    rob: ROB,
    latency: Latency,
    // results put on the bus this cycle; the stations see them at the end of the cycle
    cdb_broadcast_buffer: Vec<CDBBroadcast>,
    pub(crate) perf_counters: PerfCounters,
}

impl Backend {
    pub(crate) fn new(cpu_config: &CPUConfig) -> Backend {
        Backend {
            instr_queue: InstrQueue::new(cpu_config.instr_queue_capacity),
            rat: RAT::new(cpu_config.arch_reg_count),
            rs_table: RSTable::new(cpu_config.add_rs_count, cpu_config.mul_rs_count),
            eu_table: EUTable::new(),
            rob: ROB::new(cpu_config.rob_capacity),
            latency: cpu_config.latency.clone(),
            cdb_broadcast_buffer: Vec::with_capacity(1),
            perf_counters: PerfCounters::new(),
        }
    }

    /// Resets the machine and queues the program. Nothing is changed when the
    /// program doesn't fit the machine.
    pub(crate) fn load_program(&mut self, program: &Program) -> Result<(), InvalidLoad> {
        let reg_count = self.rat.table.len();
        if program.registers.len() != reg_count {
            return Err(InvalidLoad::RegisterCount { expected: reg_count, actual: program.registers.len() });
        }

        if program.code.len() > self.instr_queue.capacity() as usize {
            return Err(InvalidLoad::QueueCapacity { len: program.code.len(), capacity: self.instr_queue.capacity() });
        }

        for (index, instr) in program.code.iter().enumerate() {
            if let Some(reg) = instr.registers().find(|reg| *reg as usize >= reg_count) {
                return Err(InvalidLoad::RegisterOutOfBounds { instr: index, reg, count: reg_count });
            }
        }

        self.flush();
        self.rat.load(&program.registers);
        for instr in &program.code {
            self.instr_queue.enqueue(Rc::clone(instr));
        }
        self.perf_counters = PerfCounters::new();
        Ok(())
    }

    pub(crate) fn do_cycle(&mut self) -> CycleReport {
        self.perf_counters.cycle_cnt += 1;

        let commit = self.cycle_commit();
        let broadcast = self.cycle_broadcast();
        let dispatched = self.cycle_dispatch();
        let issued = self.cycle_issue();
        self.cdb_broadcast();

        CycleReport {
            cycle: self.perf_counters.cycle_cnt,
            commit,
            broadcast,
            dispatched,
            issued,
        }
    }

    /// True when there is nothing left to issue and nothing in flight.
    pub(crate) fn is_idle(&self) -> bool {
        let idle = self.instr_queue.is_empty() && self.rob.is_empty();
        debug_assert!(!idle || (self.rs_table.is_empty() && self.eu_table.is_idle()));
        idle
    }

    // Commits the oldest slot if it has executed.
    fn cycle_commit(&mut self) -> CommitOutcome {
        let (rob_slot_index, sink, value, exception) = match self.rob.head() {
            None => return CommitOutcome::Idle,
            Some(slot) if !slot.is_done() => return CommitOutcome::Stalled(slot.index),
            Some(slot) => (slot.index, slot.sink, slot.value, slot.exception),
        };

        match (value, exception) {
            (_, Some(exception)) => {
                self.flush();
                self.perf_counters.flush_cnt += 1;
                CommitOutcome::Flushed { rob_slot_index, exception }
            }
            (Some(value), None) => {
                self.rat.commit(sink, rob_slot_index, value);
                self.rob.retire();
                self.perf_counters.commit_cnt += 1;
                CommitOutcome::Committed { rob_slot_index, register: sink, value }
            }
            (None, None) => unreachable!("rob slot {} executed without a value", rob_slot_index),
        }
    }

    // Advances the execution units and lets at most one of them use the bus.
    fn cycle_broadcast(&mut self) -> Option<CDBBroadcast> {
        self.eu_table.cycle();

        let broadcast = self.eu_table.broadcast()?;
        self.rob.complete(broadcast.rob_slot_index, broadcast.result);

        // a faulting result has no consumers; they are all going to be flushed
        if broadcast.result.is_ok() {
            self.cdb_broadcast_buffer.push(broadcast);
        }

        self.perf_counters.broadcast_cnt += 1;
        Some(broadcast)
    }

    // Hands the first dispatchable station of each pool to its idle unit.
    fn cycle_dispatch(&mut self) -> Vec<DispatchEvent> {
        let mut dispatched = Vec::with_capacity(2);

        for class in [OpClass::MULTIPLICATIVE, OpClass::ADDITIVE] {
            if !self.eu_table.get(class).is_idle() {
                continue;
            }

            let Some(rs_index) = self.rs_table.find_dispatchable(class) else {
                continue;
            };

            let work = self.rs_table.dispatch(rs_index);
            let cycles = self.latency.cycles(work.opcode);
            self.eu_table.get_mut(class).dispatch(rs_index, work.rob_slot_index, work.opcode, work.operands, cycles);
            self.rob.get_mut(work.rob_slot_index).state = ROBSlotState::DISPATCHED;

            self.perf_counters.dispatch_cnt += 1;
            dispatched.push(DispatchEvent { rs_index, rob_slot_index: work.rob_slot_index, class, cycles });
        }

        dispatched
    }

    fn cycle_issue(&mut self) -> Option<IssueEvent> {
        let issued = self.issue();
        if issued.is_none() && !self.instr_queue.is_empty() {
            self.perf_counters.stall_cnt += 1;
        }

        // stations freed during this cycle become available in the next one
        self.rs_table.refresh_readiness();
        issued
    }

    // Issues the head of the instruction queue if a station and a rob slot are available.
    fn issue(&mut self) -> Option<IssueEvent> {
        let instr = self.instr_queue.peek()?;

        if !self.rob.has_space() {
            return None;
        }

        let rs_index = self.rs_table.find_ready(instr.opcode.class())?;

        // the sources are resolved before the sink is renamed: ADD R1, R1, R1 reads the old R1
        let source = [self.resolve(instr.source[0]), self.resolve(instr.source[1])];

        let rob_slot_index = self.rob.allocate(Rc::clone(&instr));
        self.rs_table.allocate(rs_index, instr.opcode, source, rob_slot_index);
        self.rat.rename(instr.sink, rob_slot_index);
        self.instr_queue.dequeue();

        self.perf_counters.issue_cnt += 1;
        Some(IssueEvent { instr, rs_index, rob_slot_index, source })
    }

    fn resolve(&self, operand: Operand) -> Resolved {
        match operand {
            Operand::Immediate(value) => Resolved::Value(value),
            Operand::Register(arch_reg) => match self.rat.resolve(arch_reg) {
                // the producer may already have broadcast without having committed
                Resolved::Pending(tag) => match self.rob.completed_value(tag) {
                    Some(value) => Resolved::Value(value),
                    None => Resolved::Pending(tag),
                },
                resolved => resolved,
            },
        }
    }

    // Delivers this cycle's bus value to the waiting stations.
    fn cdb_broadcast(&mut self) {
        for broadcast in self.cdb_broadcast_buffer.drain(..) {
            if let Ok(value) = broadcast.result {
                self.rs_table.wakeup(broadcast.rob_slot_index, value);
            }
        }
    }

    fn flush(&mut self) {
        self.instr_queue.flush();
        self.rat.flush();
        self.rs_table.flush();
        self.eu_table.flush();
        self.rob.flush();
        self.cdb_broadcast_buffer.clear();
    }

    pub(crate) fn registers(&self) -> Vec<WordType> {
        self.rat.values()
    }

    pub(crate) fn instr_queue(&self) -> impl Iterator<Item=&Rc<Instr>> + '_ {
        self.instr_queue.iter()
    }

    pub(crate) fn rat_entries(&self) -> &[RATEntry] {
        &self.rat.table
    }

    pub(crate) fn stations(&self) -> impl Iterator<Item=&RS> + '_ {
        self.rs_table.iter()
    }

    pub(crate) fn units(&self) -> impl Iterator<Item=&EU> + '_ {
        self.eu_table.iter()
    }

    pub(crate) fn rob_slots(&self) -> impl Iterator<Item=&ROBSlot> + '_ {
        self.rob.iter()
    }

    /// The commit and issue pointer of the reorder buffer.
    pub(crate) fn rob_pointers(&self) -> (Tag, Tag) {
        (self.rob.commit_pointer(), self.rob.issue_pointer())
    }
}

#[cfg(test)]
mod tests {
    use crate::instructions::instructions::Opcode;

    use super::*;

    fn instr(opcode: Opcode, sink: RegisterType, left: RegisterType, right: RegisterType) -> Rc<Instr> {
        Rc::new(Instr::new(opcode, sink, [Operand::Register(left), Operand::Register(right)]))
    }

    fn program(code: Vec<Rc<Instr>>, registers: [WordType; 8]) -> Program {
        Program { code, registers: registers.to_vec(), cycle_budget: 0 }
    }

    fn backend(config: &CPUConfig, program: &Program) -> Backend {
        let mut backend = Backend::new(config);
        backend.load_program(program).unwrap();
        backend
    }

    fn run(backend: &mut Backend) -> Vec<CycleReport> {
        let mut reports = Vec::new();
        while !backend.is_idle() {
            assert!(reports.len() < 1000, "no progress");
            reports.push(backend.do_cycle());
        }
        reports
    }

    fn committed(reports: &[CycleReport]) -> Vec<(u64, Tag)> {
        reports.iter().filter_map(|report| match report.commit {
            CommitOutcome::Committed { rob_slot_index, .. } => Some((report.cycle, rob_slot_index)),
            _ => None,
        }).collect()
    }

    fn broadcasts(reports: &[CycleReport]) -> Vec<(u64, Tag)> {
        reports.iter()
            .filter_map(|report| report.broadcast.map(|b| (report.cycle, b.rob_slot_index)))
            .collect()
    }

    // every recorded producer names a live slot that targets the register,
    // and every pending operand names a live slot
    fn assert_tags_consistent(backend: &Backend) {
        for (reg, entry) in backend.rat_entries().iter().enumerate() {
            if let Some(tag) = entry.producer {
                let slot = backend.rob.get(tag);
                assert_ne!(slot.state, ROBSlotState::UNUSED, "R{} aliases unused slot {}", reg, tag);
                assert_eq!(slot.sink as usize, reg);
            }
        }
        for rs in backend.stations().filter(|rs| rs.busy) {
            for tag in [rs.qj, rs.qk].into_iter().flatten() {
                assert_ne!(backend.rob.get(tag).state, ROBSlotState::UNUSED);
            }
        }
    }

    #[test]
    fn test_single_add() {
        let config = CPUConfig::default();
        let program = program(vec![instr(Opcode::ADD, 0, 1, 2)], [0, 3, 4, 0, 0, 0, 0, 0]);
        let mut backend = backend(&config, &program);

        let reports = run(&mut backend);
        assert_eq!(reports.len(), 5);

        let issued = reports[0].issued.as_ref().unwrap();
        assert_eq!(issued.rs_index, 0);
        assert_eq!(issued.rob_slot_index, 0);
        assert_eq!(issued.source, [Resolved::Value(3), Resolved::Value(4)]);

        assert_eq!(reports[1].dispatched, vec![DispatchEvent {
            rs_index: 0,
            rob_slot_index: 0,
            class: OpClass::ADDITIVE,
            cycles: 2,
        }]);
        assert_eq!(reports[1].commit, CommitOutcome::Stalled(0));
        assert_eq!(reports[3].broadcast.unwrap().result, Ok(7));
        assert_eq!(reports[4].commit, CommitOutcome::Committed { rob_slot_index: 0, register: 0, value: 7 });

        assert_eq!(backend.registers()[0], 7);
        assert!(backend.instr_queue().next().is_none());
        assert!(backend.stations().all(|rs| !rs.busy));
        assert!(backend.rob_slots().next().is_none());
        assert!(backend.rat_entries().iter().all(|entry| entry.producer.is_none()));
    }

    #[test]
    fn test_divide_by_zero_flushes() {
        let config = CPUConfig::default();
        let program = program(vec![
            instr(Opcode::DIV, 0, 1, 2),
            instr(Opcode::ADD, 3, 0, 1),
            instr(Opcode::ADD, 4, 0, 1),
            instr(Opcode::ADD, 5, 0, 0),
            instr(Opcode::ADD, 6, 0, 1),
            instr(Opcode::ADD, 7, 1, 1),
        ], [0, 8, 0, 1, 2, 3, 4, 5]);
        let mut backend = backend(&config, &program);

        // the DIV is dispatched in cycle 2 and completes 40 cycles later
        for _ in 0..41 {
            let report = backend.do_cycle();
            assert!(report.broadcast.is_none());
        }
        let report = backend.do_cycle();
        assert_eq!(report.broadcast.unwrap().result, Err(ArithmeticException::DivisionByZero));
        assert_eq!(backend.rob.get(0).exception, Some(ArithmeticException::DivisionByZero));

        // the dependent ADDs occupy all stations, the rest is still queued
        assert_eq!(backend.instr_queue().count(), 2);
        assert!(backend.stations().filter(|rs| rs.class == OpClass::ADDITIVE).all(|rs| rs.busy));

        let report = backend.do_cycle();
        assert_eq!(report.commit, CommitOutcome::Flushed {
            rob_slot_index: 0,
            exception: ArithmeticException::DivisionByZero,
        });

        assert!(backend.is_idle());
        assert!(backend.instr_queue().next().is_none());
        assert!(backend.stations().all(|rs| !rs.busy));
        assert!(backend.units().all(|eu| eu.is_idle()));
        assert!(backend.rat_entries().iter().all(|entry| entry.producer.is_none()));
        assert_eq!(backend.registers(), vec![0, 8, 0, 1, 2, 3, 4, 5]);
        assert_eq!(backend.perf_counters.flush_cnt, 1);

        for _ in 0..5 {
            let report = backend.do_cycle();
            assert!(report.is_quiet());
            assert_eq!(report.commit, CommitOutcome::Idle);
        }
    }

    #[test]
    fn test_committed_state_survives_flush() {
        let config = CPUConfig::default();
        let program = program(vec![
            instr(Opcode::ADD, 6, 4, 5),
            instr(Opcode::DIV, 0, 1, 2),
            instr(Opcode::ADD, 3, 4, 5),
        ], [0, 8, 0, 0, 3, 4, 0, 0]);
        let mut backend = backend(&config, &program);

        let reports = run(&mut backend);
        let flushes = reports.iter().filter(|r| matches!(r.commit, CommitOutcome::Flushed { .. })).count();
        assert_eq!(flushes, 1);

        // the ADD after the DIV executed, but never committed
        assert_eq!(backend.registers(), vec![0, 8, 0, 0, 3, 4, 7, 0]);
    }

    #[test]
    fn test_readiness_delay() {
        let config = CPUConfig::default();
        let program = program(vec![
            instr(Opcode::ADD, 0, 4, 5),
            instr(Opcode::ADD, 1, 4, 5),
            instr(Opcode::ADD, 2, 4, 5),
            instr(Opcode::ADD, 3, 4, 5),
        ], [0, 0, 0, 0, 1, 2, 0, 0]);
        let mut backend = backend(&config, &program);

        let reports = run(&mut backend);

        // RS0 is freed by the dispatch in cycle 2, but only reused in cycle 3
        assert_eq!(reports[1].dispatched[0].rs_index, 0);
        assert_eq!(reports[1].issued.as_ref().unwrap().rs_index, 1);
        assert_eq!(reports[2].issued.as_ref().unwrap().rs_index, 0);
        assert_eq!(reports[3].issued.as_ref().unwrap().rs_index, 2);

        assert_eq!(&backend.registers()[0..4], &[3, 3, 3, 3]);
    }

    #[test]
    fn test_independent_adds_commit_in_order() {
        let config = CPUConfig::default();
        let program = program(vec![
            instr(Opcode::ADD, 0, 1, 2),
            instr(Opcode::ADD, 3, 4, 5),
        ], [0, 1, 2, 0, 3, 4, 0, 0]);
        let mut backend = backend(&config, &program);

        let reports = run(&mut backend);

        // the second ADD is dispatched as soon as the unit is free again
        assert_eq!(reports[3].broadcast.unwrap().rob_slot_index, 0);
        assert_eq!(reports[3].dispatched[0].rs_index, 1);
        assert_eq!(committed(&reports), vec![(5, 0), (7, 1)]);
        assert_eq!(backend.registers()[0], 3);
        assert_eq!(backend.registers()[3], 7);
    }

    #[test]
    fn test_out_of_order_completion_in_order_commit() {
        let config = CPUConfig::default();
        let program = program(vec![
            instr(Opcode::MUL, 0, 1, 2),
            instr(Opcode::ADD, 3, 4, 5),
        ], [0, 3, 4, 0, 1, 1, 0, 0]);
        let mut backend = backend(&config, &program);

        let reports = run(&mut backend);

        assert_eq!(broadcasts(&reports), vec![(5, 1), (12, 0)]);
        assert_eq!(committed(&reports), vec![(13, 0), (14, 1)]);
        assert_eq!(backend.registers()[0], 12);
        assert_eq!(backend.registers()[3], 2);
    }

    #[test]
    fn test_broadcast_value_is_dispatched_next_cycle() {
        let config = CPUConfig::default();
        let program = program(vec![
            instr(Opcode::MUL, 0, 1, 2),
            instr(Opcode::ADD, 3, 0, 1),
        ], [0, 3, 4, 0, 0, 0, 0, 0]);
        let mut backend = backend(&config, &program);

        let reports = run(&mut backend);

        assert_eq!(reports[1].issued.as_ref().unwrap().source, [Resolved::Pending(0), Resolved::Value(3)]);
        assert_eq!(reports[11].broadcast.unwrap().rob_slot_index, 0);
        assert!(reports[11].dispatched.is_empty());
        assert_eq!(reports[12].dispatched[0].rs_index, 0);
        assert_eq!(committed(&reports), vec![(13, 0), (16, 1)]);
        assert_eq!(backend.registers()[3], 15);
    }

    #[test]
    fn test_issue_reads_executed_but_uncommitted_value() {
        let config = CPUConfig::default();
        let program = program(vec![
            instr(Opcode::ADD, 0, 1, 2),
            instr(Opcode::MUL, 5, 1, 1),
            instr(Opcode::MUL, 6, 1, 1),
            instr(Opcode::MUL, 7, 0, 1),
        ], [0, 3, 4, 0, 0, 0, 0, 0]);
        let mut backend = backend(&config, &program);

        let reports = run(&mut backend);

        // the ADD broadcasts in cycle 4 and the last MUL is issued later in that same cycle
        assert_eq!(reports[3].broadcast.unwrap().rob_slot_index, 0);
        let issued = reports[3].issued.as_ref().unwrap();
        assert_eq!(issued.rob_slot_index, 3);
        assert_eq!(issued.source, [Resolved::Value(7), Resolved::Value(3)]);
        assert_eq!(backend.registers()[7], 21);
    }

    #[test]
    fn test_single_broadcast_per_cycle() {
        let mut config = CPUConfig::default();
        config.latency.add = 3;
        config.latency.mul = 2;
        let program = program(vec![
            instr(Opcode::ADD, 0, 1, 2),
            instr(Opcode::MUL, 3, 1, 2),
        ], [0, 2, 5, 0, 0, 0, 0, 0]);
        let mut backend = backend(&config, &program);

        let reports = run(&mut backend);

        // both units complete in cycle 5; the multiplicative unit has priority
        assert_eq!(broadcasts(&reports), vec![(5, 1), (6, 0)]);
        assert_eq!(committed(&reports), vec![(7, 0), (8, 1)]);
        assert_eq!(backend.registers()[0], 7);
        assert_eq!(backend.registers()[3], 10);
    }

    #[test]
    fn test_dispatch_to_both_units_in_one_cycle() {
        let config = CPUConfig::default();
        let program = program(vec![
            instr(Opcode::ADD, 0, 1, 2),
            instr(Opcode::ADD, 3, 0, 1),
            instr(Opcode::MUL, 4, 0, 1),
        ], [0, 1, 2, 0, 0, 0, 0, 0]);
        let mut backend = backend(&config, &program);

        let reports = run(&mut backend);

        assert!(reports[3].dispatched.is_empty());
        let dispatched: Vec<u16> = reports[4].dispatched.iter().map(|d| d.rs_index).collect();
        assert_eq!(dispatched, vec![3, 1]);
        assert_eq!(backend.registers()[3], 4);
        assert_eq!(backend.registers()[4], 3);
    }

    #[test]
    fn test_full_rob_stalls_issue() {
        let mut config = CPUConfig::default();
        config.rob_capacity = 2;
        let program = program(vec![
            instr(Opcode::ADD, 0, 4, 5),
            instr(Opcode::ADD, 1, 4, 5),
            instr(Opcode::ADD, 2, 4, 5),
        ], [0, 0, 0, 0, 1, 2, 0, 0]);
        let mut backend = backend(&config, &program);

        let reports = run(&mut backend);

        assert!(reports[2].issued.is_none());
        assert!(reports[3].issued.is_none());
        let issued = reports[4].issued.as_ref().unwrap();
        assert_eq!(issued.rob_slot_index, 0);
        assert_eq!(issued.rs_index, 0);
        assert_eq!(backend.perf_counters.stall_cnt, 2);
        assert_eq!(committed(&reports).iter().map(|c| c.1).collect::<Vec<_>>(), vec![0, 1, 0]);
    }

    #[test]
    fn test_last_issued_producer_wins() {
        let config = CPUConfig::default();
        let program = program(vec![
            instr(Opcode::MUL, 0, 1, 2),
            instr(Opcode::ADD, 0, 3, 4),
            instr(Opcode::ADD, 5, 0, 0),
        ], [0, 2, 5, 1, 1, 0, 0, 0]);
        let mut backend = backend(&config, &program);

        for _ in 0..13 {
            backend.do_cycle();
        }
        // the MUL committed, the younger ADD still owns the alias
        assert_eq!(backend.rat_entries()[0].value, 10);
        assert_eq!(backend.rat_entries()[0].producer, Some(1));

        run(&mut backend);
        assert_eq!(backend.registers()[0], 2);
        assert_eq!(backend.registers()[5], 4);
    }

    #[test]
    fn test_tags_and_commit_order() {
        let mut config = CPUConfig::default();
        config.rob_capacity = 4;
        config.latency.div = 5;
        let program = program(vec![
            instr(Opcode::MUL, 0, 1, 2),
            instr(Opcode::ADD, 1, 0, 2),
            instr(Opcode::SUB, 2, 1, 0),
            instr(Opcode::DIV, 3, 0, 2),
            instr(Opcode::ADD, 0, 3, 3),
            instr(Opcode::MUL, 4, 0, 1),
            instr(Opcode::SUB, 5, 4, 2),
            instr(Opcode::ADD, 6, 5, 5),
        ], [0, 3, 2, 0, 0, 0, 0, 0]);
        let mut backend = backend(&config, &program);

        let mut reports = Vec::new();
        while !backend.is_idle() {
            reports.push(backend.do_cycle());
            assert_tags_consistent(&backend);
        }

        let slots: Vec<Tag> = committed(&reports).iter().map(|c| c.1).collect();
        let expected: Vec<Tag> = (0..8).map(|i| i % 4).collect();
        assert_eq!(slots, expected);

        // R0=6, R1=8, R2=2, R3=3, R0=6, R4=48, R5=46, R6=92
        assert_eq!(backend.registers(), vec![6, 8, 2, 3, 48, 46, 92, 0]);
    }

    #[test]
    fn test_immediate_operands() {
        let config = CPUConfig::default();
        let program = program(vec![
            Rc::new(Instr::new(Opcode::SUB, 0, [Operand::Immediate(10), Operand::Register(1)])),
        ], [0, 4, 0, 0, 0, 0, 0, 0]);
        let mut backend = backend(&config, &program);

        run(&mut backend);
        assert_eq!(backend.registers()[0], 6);
    }

    #[test]
    fn test_invalid_load() {
        let config = CPUConfig::default();
        let mut backend = Backend::new(&config);

        let short = Program { code: vec![], registers: vec![1, 2], cycle_budget: 0 };
        assert_eq!(backend.load_program(&short), Err(InvalidLoad::RegisterCount { expected: 8, actual: 2 }));

        let out_of_bounds = program(vec![instr(Opcode::ADD, 0, 1, 2), instr(Opcode::ADD, 0, 8, 2)], [0; 8]);
        assert_eq!(backend.load_program(&out_of_bounds),
                   Err(InvalidLoad::RegisterOutOfBounds { instr: 1, reg: 8, count: 8 }));

        let mut small = CPUConfig::default();
        small.instr_queue_capacity = 1;
        let mut backend = Backend::new(&small);
        let too_long = program(vec![instr(Opcode::ADD, 0, 1, 2), instr(Opcode::ADD, 0, 1, 2)], [0; 8]);
        assert_eq!(backend.load_program(&too_long), Err(InvalidLoad::QueueCapacity { len: 2, capacity: 1 }));
        assert!(backend.is_idle());
    }

    #[test]
    fn test_load_resets_previous_run() {
        let config = CPUConfig::default();
        let first = program(vec![instr(Opcode::MUL, 0, 1, 2)], [0, 3, 4, 0, 0, 0, 0, 0]);
        let mut backend = backend(&config, &first);
        backend.do_cycle();
        backend.do_cycle();

        let second = program(vec![instr(Opcode::ADD, 1, 2, 3)], [0, 0, 5, 6, 0, 0, 0, 0]);
        backend.load_program(&second).unwrap();
        assert_eq!(backend.perf_counters.cycle_cnt, 0);
        assert!(backend.units().all(|eu| eu.is_idle()));

        run(&mut backend);
        assert_eq!(backend.registers(), vec![0, 11, 5, 6, 0, 0, 0, 0]);
    }
}
