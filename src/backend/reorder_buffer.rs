use std::rc::Rc;

use crate::instructions::instructions::{ArithmeticException, Instr, RegisterType, Tag, WordType};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ROBSlotState {
    UNUSED,
    ISSUED,
    DISPATCHED,
    EXECUTED,
}

pub struct ROBSlot {
    pub(crate) index: Tag,
    pub(crate) instr: Option<Rc<Instr>>,
    pub(crate) state: ROBSlotState,
    pub(crate) sink: RegisterType,
    pub(crate) value: Option<WordType>,
    pub(crate) exception: Option<ArithmeticException>,
}

impl ROBSlot {
    fn reset(&mut self) {
        self.instr = None;
        self.state = ROBSlotState::UNUSED;
        self.sink = 0;
        self.value = None;
        self.exception = None;
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == ROBSlotState::EXECUTED
    }
}

/// The reorder buffer: a ring of slots. The slots between the commit pointer
/// (inclusive) and the issue pointer (exclusive) are in flight.
pub(crate) struct ROB {
    capacity: u16,
    // everything before this point is committed.
    head: u64,
    // everything before this point is issued.
    tail: u64,
    slots: Vec<ROBSlot>,
}

impl ROB {
    pub(crate) fn new(capacity: u16) -> Self {
        let mut slots = Vec::with_capacity(capacity as usize);
        for k in 0..capacity {
            slots.push(ROBSlot {
                index: k,
                instr: None,
                state: ROBSlotState::UNUSED,
                sink: 0,
                value: None,
                exception: None,
            });
        }

        Self { capacity, head: 0, tail: 0, slots }
    }

    pub(crate) fn to_index(&self, seq: u64) -> Tag {
        (seq % self.capacity as u64) as Tag
    }

    pub(crate) fn issue_pointer(&self) -> Tag {
        self.to_index(self.tail)
    }

    pub(crate) fn commit_pointer(&self) -> Tag {
        self.to_index(self.head)
    }

    pub(crate) fn get(&self, slot_index: Tag) -> &ROBSlot {
        &self.slots[slot_index as usize]
    }

    pub(crate) fn get_mut(&mut self, slot_index: Tag) -> &mut ROBSlot {
        &mut self.slots[slot_index as usize]
    }

    pub(crate) fn allocate(&mut self, instr: Rc<Instr>) -> Tag {
        assert!(self.has_space(), "ROB: Can't allocate if no space.");

        let index = self.to_index(self.tail);
        self.tail += 1;

        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.state == ROBSlotState::UNUSED);
        slot.sink = instr.sink;
        slot.instr = Some(instr);
        slot.state = ROBSlotState::ISSUED;
        index
    }

    /// Records the broadcast result in the slot.
    pub(crate) fn complete(&mut self, slot_index: Tag, result: Result<WordType, ArithmeticException>) {
        let slot = self.get_mut(slot_index);
        debug_assert!(slot.state == ROBSlotState::DISPATCHED,
                      "rob slot {} is not in dispatched state, but in {:?}", slot_index, slot.state);

        slot.state = ROBSlotState::EXECUTED;
        match result {
            Ok(value) => slot.value = Some(value),
            Err(exception) => slot.exception = Some(exception),
        }
    }

    /// The value of a slot that has executed without an exception.
    pub(crate) fn completed_value(&self, slot_index: Tag) -> Option<WordType> {
        let slot = self.get(slot_index);
        if slot.is_done() { slot.value } else { None }
    }

    /// The oldest in-flight slot.
    pub(crate) fn head(&self) -> Option<&ROBSlot> {
        if self.is_empty() {
            return None;
        }

        Some(self.get(self.commit_pointer()))
    }

    /// Retires the oldest slot; it must have executed.
    pub(crate) fn retire(&mut self) -> Tag {
        assert!(self.head().is_some_and(|slot| slot.is_done()), "ROB: can't retire a slot that hasn't executed");

        let index = self.commit_pointer();
        self.head += 1;
        self.slots[index as usize].reset();
        index
    }

    /// The live slots, oldest first.
    pub(crate) fn iter(&self) -> impl Iterator<Item=&ROBSlot> + '_ {
        (self.head..self.tail).map(move |seq| self.get(self.to_index(seq)))
    }

    pub(crate) fn size(&self) -> u16 {
        (self.tail - self.head) as u16
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub(crate) fn has_space(&self) -> bool {
        self.capacity > self.size()
    }

    pub(crate) fn flush(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
        self.head = 0;
        self.tail = 0;
    }
}
