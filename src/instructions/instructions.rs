use std::fmt;
use std::fmt::Display;
use std::rc::Rc;

use thiserror::Error;

pub type WordType = i64;
pub type RegisterType = u16;

/// Identifies the in-flight producer of a value. Tags are reorder buffer slot
/// indices, so they are unambiguous across both reservation station pools.
pub type Tag = u16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    ADD,
    SUB,
    MUL,
    DIV,
}

/// The reservation station pool (and functional unit) an opcode is executed by.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpClass {
    ADDITIVE,
    MULTIPLICATIVE,
}

impl Opcode {
    pub fn class(self) -> OpClass {
        match self {
            Opcode::ADD | Opcode::SUB => OpClass::ADDITIVE,
            Opcode::MUL | Opcode::DIV => OpClass::MULTIPLICATIVE,
        }
    }
}

pub(crate) fn mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::ADD => "ADD",
        Opcode::SUB => "SUB",
        Opcode::MUL => "MUL",
        Opcode::DIV => "DIV",
    }
}

/// Maps the numeric opcode of the program file format onto an [Opcode].
pub(crate) fn get_opcode(code: i64) -> Option<Opcode> {
    match code {
        0 => Some(Opcode::ADD),
        1 => Some(Opcode::SUB),
        2 => Some(Opcode::MUL),
        3 => Some(Opcode::DIV),
        _ => None,
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum ArithmeticException {
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
}

/// Computes the result of an operation. This is the only place where an
/// [ArithmeticException] can originate.
pub fn evaluate(opcode: Opcode, left: WordType, right: WordType) -> Result<WordType, ArithmeticException> {
    let result = match opcode {
        Opcode::ADD => left.checked_add(right),
        Opcode::SUB => left.checked_sub(right),
        Opcode::MUL => left.checked_mul(right),
        Opcode::DIV => {
            if right == 0 {
                return Err(ArithmeticException::DivisionByZero);
            }
            left.checked_div(right)
        }
    };
    result.ok_or(ArithmeticException::Overflow)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operand {
    Register(RegisterType),
    Immediate(WordType),
}

impl Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => write!(f, "R{}", reg),
            Operand::Immediate(value) => write!(f, "#{}", value),
        }
    }
}

#[derive(Debug)]
pub struct Instr {
    pub(crate) opcode: Opcode,
    pub(crate) sink: RegisterType,
    pub(crate) source: [Operand; 2],
    // the line in the program file; None when created programmatically
    pub(crate) line: Option<usize>,
}

impl Instr {
    pub fn new(opcode: Opcode, sink: RegisterType, source: [Operand; 2]) -> Self {
        Self { opcode, sink, source, line: None }
    }

    // registers referenced by this instruction, sink first
    pub(crate) fn registers(&self) -> impl Iterator<Item=RegisterType> + '_ {
        std::iter::once(self.sink).chain(self.source.iter().filter_map(|op| match op {
            Operand::Register(reg) => Some(*reg),
            Operand::Immediate(_) => None,
        }))
    }
}

impl Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} R{}, {}, {}", mnemonic(self.opcode), self.sink, self.source[0], self.source[1])?;
        if let Some(line) = self.line {
            write!(f, " ; line {}", line)?;
        }
        Ok(())
    }
}

/// A loaded program: the instructions in program order and the initial value
/// of every architectural register.
pub struct Program {
    pub code: Vec<Rc<Instr>>,
    pub registers: Vec<WordType>,
    // informational only; the simulation never stops because of it
    pub cycle_budget: u64,
}

/// The in-order queue instructions wait in until they are issued.
pub(crate) struct InstrQueue {
    capacity: u16,
    head: u64,
    tail: u64,
    slots: Vec<Option<Rc<Instr>>>,
}

impl InstrQueue {
    pub fn new(capacity: u16) -> Self {
        let mut slots = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            slots.push(None);
        }

        Self { capacity, head: 0, tail: 0, slots }
    }

    fn to_index(&self, seq: u64) -> usize {
        (seq % self.capacity as u64) as usize
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn size(&self) -> u16 {
        (self.tail - self.head) as u16
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.size() == self.capacity
    }

    pub fn enqueue(&mut self, instr: Rc<Instr>) {
        assert!(!self.is_full(), "InstrQueue: can't enqueue when the queue is full");

        let index = self.to_index(self.tail);
        self.slots[index] = Some(instr);
        self.tail += 1;
    }

    pub fn peek(&self) -> Option<Rc<Instr>> {
        if self.is_empty() {
            return None;
        }

        self.slots[self.to_index(self.head)].clone()
    }

    pub fn dequeue(&mut self) -> Option<Rc<Instr>> {
        if self.is_empty() {
            return None;
        }

        let index = self.to_index(self.head);
        self.head += 1;
        self.slots[index].take()
    }

    pub fn iter(&self) -> impl Iterator<Item=&Rc<Instr>> + '_ {
        (self.head..self.tail).filter_map(move |seq| self.slots[self.to_index(seq)].as_ref())
    }

    pub fn flush(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
    }
}
