use crate::instructions::instructions::{RegisterType, Tag, WordType};

pub struct RATEntry {
    // the committed value of the architectural register
    pub(crate) value: WordType,
    // the reorder buffer slot that will produce the next value; None if the value is current
    pub(crate) producer: Option<Tag>,
}

/// What a source register resolves to at issue time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Resolved {
    Value(WordType),
    Pending(Tag),
}

/// The Register Alias Table. For every architectural register it either holds
/// the committed value or the tag of the in-flight instruction that is going to
/// produce the next value. Only a single producer is tracked per register: the
/// most recently issued one.
pub(crate) struct RAT {
    pub(crate) table: Vec<RATEntry>,
}

impl RAT {
    pub fn new(arch_reg_count: u16) -> Self {
        let mut table = Vec::with_capacity(arch_reg_count as usize);
        for _ in 0..arch_reg_count {
            table.push(RATEntry { value: 0, producer: None });
        }
        Self { table }
    }

    /// Overwrites the register values and drops all producers.
    pub fn load(&mut self, values: &[WordType]) {
        debug_assert!(values.len() == self.table.len());

        for (entry, value) in self.table.iter_mut().zip(values) {
            entry.value = *value;
            entry.producer = None;
        }
    }

    pub fn get(&self, arch_reg: RegisterType) -> &RATEntry {
        &self.table[arch_reg as usize]
    }

    pub fn resolve(&self, arch_reg: RegisterType) -> Resolved {
        let entry = self.get(arch_reg);
        match entry.producer {
            Some(tag) => Resolved::Pending(tag),
            None => Resolved::Value(entry.value),
        }
    }

    /// Last issued wins; older consumers hold on to the tag they captured.
    pub fn rename(&mut self, arch_reg: RegisterType, tag: Tag) {
        self.table[arch_reg as usize].producer = Some(tag);
    }

    /// Writes a committed value. The producer is only cleared when it still
    /// points to the committing slot; a younger in-flight definition keeps its
    /// alias.
    pub fn commit(&mut self, arch_reg: RegisterType, tag: Tag, value: WordType) {
        let entry = &mut self.table[arch_reg as usize];
        entry.value = value;
        if entry.producer == Some(tag) {
            entry.producer = None;
        }
    }

    /// Drops all aliases. The committed values are retained.
    pub fn flush(&mut self) {
        for entry in &mut self.table {
            entry.producer = None;
        }
    }

    pub fn values(&self) -> Vec<WordType> {
        self.table.iter().map(|entry| entry.value).collect()
    }
}
