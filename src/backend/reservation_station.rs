use std::ops::Range;

use crate::backend::register_alias_table::Resolved;
use crate::instructions::instructions::{OpClass, Opcode, Tag, WordType};

// A single reservation station
pub struct RS {
    // global index; stations of both pools share one index space
    pub(crate) index: u16,
    pub(crate) class: OpClass,
    pub(crate) busy: bool,
    // free and seen free by at least one readiness refresh
    pub(crate) ready: bool,
    pub(crate) dispatched: bool,
    pub(crate) opcode: Opcode,
    pub(crate) vj: WordType,
    pub(crate) vk: WordType,
    pub(crate) qj: Option<Tag>,
    pub(crate) qk: Option<Tag>,
    // the reorder buffer slot receiving the result
    pub(crate) rob_slot_index: Option<Tag>,
}

impl RS {
    fn new(index: u16, class: OpClass) -> Self {
        Self {
            index,
            class,
            busy: false,
            ready: true,
            dispatched: false,
            opcode: Opcode::ADD,
            vj: 0,
            vk: 0,
            qj: None,
            qk: None,
            rob_slot_index: None,
        }
    }

    pub(crate) fn is_dispatchable(&self) -> bool {
        self.busy && !self.dispatched && self.qj.is_none() && self.qk.is_none()
    }

    // The operands are handed to a functional unit; the station is free but
    // won't be ready before the next readiness refresh.
    fn release(&mut self) {
        self.busy = false;
        self.dispatched = true;
    }

    fn reset(&mut self) {
        self.busy = false;
        self.ready = true;
        self.dispatched = false;
        self.vj = 0;
        self.vk = 0;
        self.qj = None;
        self.qk = None;
        self.rob_slot_index = None;
    }
}

fn split(resolved: Resolved) -> (WordType, Option<Tag>) {
    match resolved {
        Resolved::Value(value) => (value, None),
        Resolved::Pending(tag) => (0, Some(tag)),
    }
}

/// The operands of a dispatched station.
pub(crate) struct Dispatched {
    pub(crate) opcode: Opcode,
    pub(crate) operands: [WordType; 2],
    pub(crate) rob_slot_index: Tag,
}

/// Both reservation station pools. The additive stations come first, followed
/// by the multiplicative ones.
pub(crate) struct RSTable {
    add_count: u16,
    mul_count: u16,
    array: Vec<RS>,
}

impl RSTable {
    pub(crate) fn new(add_count: u16, mul_count: u16) -> Self {
        let mut array = Vec::with_capacity((add_count + mul_count) as usize);
        for i in 0..add_count {
            array.push(RS::new(i, OpClass::ADDITIVE));
        }
        for i in 0..mul_count {
            array.push(RS::new(add_count + i, OpClass::MULTIPLICATIVE));
        }

        RSTable { add_count, mul_count, array }
    }

    fn pool(&self, class: OpClass) -> Range<usize> {
        match class {
            OpClass::ADDITIVE => 0..self.add_count as usize,
            OpClass::MULTIPLICATIVE => self.add_count as usize..(self.add_count + self.mul_count) as usize,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item=&RS> + '_ {
        self.array.iter()
    }

    /// The lowest indexed ready station of the pool.
    pub(crate) fn find_ready(&self, class: OpClass) -> Option<u16> {
        self.array[self.pool(class)].iter().find(|rs| rs.ready).map(|rs| rs.index)
    }

    pub(crate) fn allocate(&mut self,
                           rs_index: u16,
                           opcode: Opcode,
                           source: [Resolved; 2],
                           rob_slot_index: Tag) {
        let rs = &mut self.array[rs_index as usize];
        debug_assert!(rs.ready, "RS{} is allocated while not ready", rs_index);
        debug_assert!(rs.class == opcode.class());

        let (vj, qj) = split(source[0]);
        let (vk, qk) = split(source[1]);

        rs.busy = true;
        rs.ready = false;
        rs.dispatched = false;
        rs.opcode = opcode;
        rs.vj = vj;
        rs.qj = qj;
        rs.vk = vk;
        rs.qk = qk;
        rs.rob_slot_index = Some(rob_slot_index);
    }

    /// Stations that were free during this cycle become ready. The free set is
    /// collected before any flag is updated.
    pub(crate) fn refresh_readiness(&mut self) {
        let free: Vec<usize> = self.array.iter()
            .filter(|rs| !rs.busy && !rs.ready)
            .map(|rs| rs.index as usize)
            .collect();

        for index in free {
            self.array[index].ready = true;
        }
    }

    /// The lowest indexed station of the pool with both operands available.
    pub(crate) fn find_dispatchable(&self, class: OpClass) -> Option<u16> {
        self.array[self.pool(class)].iter().find(|rs| rs.is_dispatchable()).map(|rs| rs.index)
    }

    pub(crate) fn dispatch(&mut self, rs_index: u16) -> Dispatched {
        let rs = &mut self.array[rs_index as usize];
        debug_assert!(rs.is_dispatchable(), "RS{} is not dispatchable", rs_index);

        rs.release();
        Dispatched {
            opcode: rs.opcode,
            operands: [rs.vj, rs.vk],
            rob_slot_index: rs.rob_slot_index.expect("a busy station has a rob slot"),
        }
    }

    /// Captures a broadcast value in every operand waiting for the tag. Returns
    /// the number of operands that got resolved.
    pub(crate) fn wakeup(&mut self, tag: Tag, value: WordType) -> usize {
        let mut resolved = 0;
        for rs in self.array.iter_mut().filter(|rs| rs.busy) {
            if rs.qj == Some(tag) {
                rs.vj = value;
                rs.qj = None;
                resolved += 1;
            }
            if rs.qk == Some(tag) {
                rs.vk = value;
                rs.qk = None;
                resolved += 1;
            }
        }
        resolved
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.array.iter().all(|rs| !rs.busy)
    }

    pub(crate) fn flush(&mut self) {
        for rs in &mut self.array {
            rs.reset();
        }
    }
}
