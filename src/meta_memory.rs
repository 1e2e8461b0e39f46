//! 地址元数据：记录哪些地址带有指令断点标记

use std::collections::HashSet;

use nohash_hasher::BuildNoHashHasher;

use crate::host::InstructionBreaks;

type NoHashHashSet<T> = HashSet<T, BuildNoHashHasher<T>>;

#[derive(Debug, Default, Clone)]
pub struct MetaMemory {
    instruction_breaks: NoHashHashSet<u32>,
}

impl MetaMemory {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn is_instruction_break(&self, addr: u32) -> bool {
        self.instruction_breaks.contains(&addr)
    }

    /// 已标记的地址（升序）
    pub fn instruction_breaks(&self) -> Vec<u32> {
        let mut addrs: Vec<u32> = self.instruction_breaks.iter().copied().collect();
        addrs.sort_unstable();
        addrs
    }
}

impl InstructionBreaks for MetaMemory {
    fn mark_instruction_break(&mut self, addr: u32) {
        self.instruction_breaks.insert(addr);
    }

    fn unmark_instruction_break(&mut self, addr: u32) {
        self.instruction_breaks.remove(&addr);
    }
}
