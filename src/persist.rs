//! 会话文件中的补丁数据块
//!
//! 布局（大端）：
//! - i32 版本号
//! - 子状态第一阶段
//! - i32 尾补丁记录数
//! - 每条记录: dest_pc1, extra, return_pc, pc (u32), trap_index, trap_word (u16), count (i32)
//! - 子状态第二阶段
//!
//! 尾补丁例程本身不写入，加载后按上下文重新解析。

use std::io::{self, Cursor};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::context::CallContext;
use crate::patch::{PatchState, PersistStep};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("补丁数据块读写错误: {0}")]
    Io(#[from] io::Error),
    #[error("尾补丁记录数无效: {0}")]
    BadRecordCount(i32),
    #[error("尾补丁引用计数无效: 返回地址 {addr:#x}, 计数 {count}")]
    BadUseCount { addr: u32, count: i32 },
}

/// 一条持久化的尾补丁记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedTailpatch {
    pub context: CallContext,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchInfo {
    pub version: i32,
    pub state: PatchState,
    pub tailpatches: Vec<SavedTailpatch>,
}

impl PatchInfo {
    pub fn encode(&self) -> Result<Vec<u8>, PersistError> {
        let mut w = Vec::new();
        w.write_i32::<BigEndian>(self.version)?;

        // 与 decode 相同：版本 0 只有第二阶段
        if self.version >= 1 {
            self.state.save(&mut w, self.version, PersistStep::Step1)?;

            w.write_i32::<BigEndian>(self.tailpatches.len() as i32)?;
            for saved in &self.tailpatches {
                let ctx = &saved.context;
                w.write_u32::<BigEndian>(ctx.dest_pc1)?;
                w.write_u32::<BigEndian>(ctx.extra)?;
                w.write_u32::<BigEndian>(ctx.return_pc)?;
                w.write_u32::<BigEndian>(ctx.pc)?;
                w.write_u16::<BigEndian>(ctx.trap_index)?;
                w.write_u16::<BigEndian>(ctx.trap_word)?;
                w.write_i32::<BigEndian>(saved.count as i32)?;
            }
        }

        self.state.save(&mut w, self.version, PersistStep::Step2)?;
        Ok(w)
    }

    pub fn decode(chunk: &[u8]) -> Result<Self, PersistError> {
        let mut r = Cursor::new(chunk);
        let version = r.read_i32::<BigEndian>()?;
        let mut state = PatchState::new();
        let mut tailpatches = Vec::new();

        if version >= 1 {
            state.load(&mut r, version, PersistStep::Step1)?;

            let num = r.read_i32::<BigEndian>()?;
            if num < 0 {
                return Err(PersistError::BadRecordCount(num));
            }
            for _ in 0..num {
                let dest_pc1 = r.read_u32::<BigEndian>()?;
                let extra = r.read_u32::<BigEndian>()?;
                let return_pc = r.read_u32::<BigEndian>()?;
                let pc = r.read_u32::<BigEndian>()?;
                let trap_index = r.read_u16::<BigEndian>()?;
                let trap_word = r.read_u16::<BigEndian>()?;
                let count = r.read_i32::<BigEndian>()?;
                if count <= 0 {
                    return Err(PersistError::BadUseCount { addr: return_pc, count });
                }

                tailpatches.push(SavedTailpatch {
                    context: CallContext {
                        pc,
                        return_pc,
                        dest_pc1,
                        // 第二目标地址不单独保存
                        dest_pc2: dest_pc1,
                        trap_word,
                        trap_index,
                        extra,
                    },
                    count: count as u32,
                });
            }
        }

        state.load(&mut r, version, PersistStep::Step2)?;

        Ok(Self {
            version,
            state,
            tailpatches,
        })
    }
}
