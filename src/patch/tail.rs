//! 待执行尾补丁索引
//!
//! 每个返回地址至多一条记录；同一陷阱在返回前被重入时只增加引用计数。
//! 索引中的返回地址集合与已安装的指令断点集合始终一致。

use std::collections::HashMap;

use nohash_hasher::BuildNoHashHasher;
use tracing::{debug, trace, warn};

use super::module::TailHook;
use crate::context::CallContext;
use crate::host::InstructionBreaks;

type NoHashHashMap<K, V> = HashMap<K, V, BuildNoHashHasher<K>>;

#[derive(Debug, Clone)]
pub struct TailpatchRecord {
    pub context: CallContext,
    /// 恢复会话后重新解析，可能已不存在
    pub tailpatch: Option<TailHook>,
    pub count: u32,
}

#[derive(Debug, Default, Clone)]
pub struct TailpatchIndex {
    records: NoHashHashMap<u32, TailpatchRecord>,
}

impl TailpatchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为即将执行的原始例程挂上尾补丁，返回该地址当前的引用计数
    pub fn arm(
        &mut self,
        tailpatch: TailHook,
        context: &CallContext,
        breaks: &mut dyn InstructionBreaks,
    ) -> u32 {
        let addr = context.return_pc;
        if let Some(record) = self.records.get_mut(&addr) {
            record.count += 1;
            trace!(ret = %format_args!("{:#010x}", addr), count = record.count, "尾补丁重入");
            return record.count;
        }

        self.records.insert(
            addr,
            TailpatchRecord {
                context: *context,
                tailpatch: Some(tailpatch),
                count: 1,
            },
        );
        breaks.mark_instruction_break(addr);
        trace!(ret = %format_args!("{:#010x}", addr), "安装尾补丁");
        1
    }

    /// 执行到断点地址时取出到期的尾补丁
    ///
    /// 计数归零时删除记录并撤销该地址的断点；地址没有记录时不做任何事。
    pub fn recover(
        &mut self,
        addr: u32,
        breaks: &mut dyn InstructionBreaks,
    ) -> Option<(TailHook, CallContext)> {
        let record = self.records.get_mut(&addr)?;
        record.count = record.count.saturating_sub(1);

        let due = record
            .tailpatch
            .clone()
            .map(|tp| (tp, record.context));

        if record.count == 0 {
            self.records.remove(&addr);
            breaks.unmark_instruction_break(addr);
            trace!(ret = %format_args!("{:#010x}", addr), "移除尾补丁");
        }
        due
    }

    /// 插入从会话中恢复的记录，不做重入合并
    pub fn restore(&mut self, record: TailpatchRecord, breaks: &mut dyn InstructionBreaks) -> bool {
        let addr = record.context.return_pc;
        if record.count == 0 {
            debug!(ret = %format_args!("{:#010x}", addr), "忽略计数为零的尾补丁记录");
            return false;
        }
        if self.records.insert(addr, record).is_some() {
            warn!(ret = %format_args!("{:#010x}", addr), "恢复的尾补丁记录地址重复，保留后者");
        }
        breaks.mark_instruction_break(addr);
        true
    }

    pub fn install_breaks(&self, breaks: &mut dyn InstructionBreaks) {
        for addr in self.records.keys() {
            breaks.mark_instruction_break(*addr);
        }
    }

    pub fn remove_breaks(&self, breaks: &mut dyn InstructionBreaks) {
        for addr in self.records.keys() {
            breaks.unmark_instruction_break(*addr);
        }
    }

    /// 撤销全部断点并清空索引
    pub fn clear(&mut self, breaks: &mut dyn InstructionBreaks) {
        self.remove_breaks(breaks);
        self.records.clear();
    }

    pub fn get(&self, addr: u32) -> Option<&TailpatchRecord> {
        self.records.get(&addr)
    }

    /// 按返回地址排序的记录
    pub fn records(&self) -> Vec<&TailpatchRecord> {
        let mut records: Vec<&TailpatchRecord> = self.records.values().collect();
        records.sort_by_key(|r| r.context.return_pc);
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
