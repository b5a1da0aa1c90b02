use crate::instructions::instructions::{ArithmeticException, evaluate, OpClass, Opcode, Tag, WordType};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EUState {
    IDLE,
    EXECUTING,
    // the result is available but not yet broadcast
    COMPLETED,
}

/// The value put on the common data bus.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CDBBroadcast {
    pub rob_slot_index: Tag,
    pub rs_index: u16,
    pub result: Result<WordType, ArithmeticException>,
}

/// A single, non-pipelined execution unit.
pub struct EU {
    pub(crate) class: OpClass,
    pub(crate) state: EUState,
    pub(crate) opcode: Opcode,
    pub(crate) operands: [WordType; 2],
    // the station the work came from; only for reporting
    pub(crate) rs_index: Option<u16>,
    pub(crate) rob_slot_index: Option<Tag>,
    pub(crate) cycles_remaining: u8,
    pub(crate) broadcasted: bool,
    pub(crate) exception: bool,
}

impl EU {
    fn new(class: OpClass) -> Self {
        Self {
            class,
            state: EUState::IDLE,
            opcode: Opcode::ADD,
            operands: [0, 0],
            rs_index: None,
            rob_slot_index: None,
            cycles_remaining: 0,
            broadcasted: false,
            exception: false,
        }
    }

    fn reset(&mut self) {
        self.state = EUState::IDLE;
        self.rs_index = None;
        self.rob_slot_index = None;
        self.cycles_remaining = 0;
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state == EUState::IDLE
    }

    pub(crate) fn dispatch(&mut self,
                           rs_index: u16,
                           rob_slot_index: Tag,
                           opcode: Opcode,
                           operands: [WordType; 2],
                           cycles: u8) {
        debug_assert!(self.is_idle());
        debug_assert!(opcode.class() == self.class);

        self.state = EUState::EXECUTING;
        self.opcode = opcode;
        self.operands = operands;
        self.rs_index = Some(rs_index);
        self.rob_slot_index = Some(rob_slot_index);
        self.cycles_remaining = cycles;
        self.broadcasted = false;
        self.exception = false;
    }

    /// Advances the unit by one clock cycle.
    pub(crate) fn cycle(&mut self) {
        if self.state != EUState::EXECUTING {
            return;
        }

        self.cycles_remaining = self.cycles_remaining.saturating_sub(1);
        if self.cycles_remaining == 0 {
            self.state = EUState::COMPLETED;
        }
    }

    /// Computes the result and frees the unit. A failing operation is only
    /// detected here, never at dispatch.
    pub(crate) fn broadcast(&mut self) -> CDBBroadcast {
        debug_assert!(self.state == EUState::COMPLETED);

        let result = evaluate(self.opcode, self.operands[0], self.operands[1]);
        let broadcast = CDBBroadcast {
            rob_slot_index: self.rob_slot_index.expect("a completed unit has a rob slot"),
            rs_index: self.rs_index.expect("a completed unit has a station"),
            result,
        };

        self.exception = result.is_err();
        self.broadcasted = true;
        self.reset();
        broadcast
    }
}

/// The multiplicative and the additive unit, in bus priority order.
pub(crate) struct EUTable {
    array: [EU; 2],
}

impl EUTable {
    pub(crate) fn new() -> EUTable {
        EUTable {
            array: [EU::new(OpClass::MULTIPLICATIVE), EU::new(OpClass::ADDITIVE)],
        }
    }

    pub(crate) fn get(&self, class: OpClass) -> &EU {
        self.array.iter().find(|eu| eu.class == class).expect("every class has a unit")
    }

    pub(crate) fn get_mut(&mut self, class: OpClass) -> &mut EU {
        self.array.iter_mut().find(|eu| eu.class == class).expect("every class has a unit")
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item=&EU> + '_ {
        self.array.iter()
    }

    pub(crate) fn cycle(&mut self) {
        for eu in &mut self.array {
            eu.cycle();
        }
    }

    /// Arbitration for the single bus: the first completed unit in priority
    /// order gets to broadcast. The other one keeps its result.
    pub(crate) fn broadcast(&mut self) -> Option<CDBBroadcast> {
        self.array.iter_mut()
            .find(|eu| eu.state == EUState::COMPLETED)
            .map(|eu| eu.broadcast())
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.array.iter().all(|eu| eu.is_idle())
    }

    pub(crate) fn flush(&mut self) {
        for eu in &mut self.array {
            eu.reset();
        }
    }
}
