//! 系统调用拦截与补丁分派
//!
//! 解释器在每次陷阱时调用 [`PatchEngine::handle_system_call`]，引擎解析出
//! 头/尾补丁并决定是否执行 ROM 中的原始例程。需要延后执行的尾补丁挂在
//! 返回地址的指令断点上，解释器到达该地址时调用
//! [`PatchEngine::handle_instruction_break`]。
//!
//! 补丁例程和加载后修复会调用客户机例程，其中的陷阱再次进入同一个引擎。
//! 因此引擎的可变部分都放在 `RefCell` 中，入口只需 `&self`，
//! 调用补丁例程或客户机例程时不持有任何内部借用。

pub mod app_switch;
mod lib_cache;
pub mod module;
mod state;
pub mod system;
mod tail;

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tracing::{debug, info, trace, warn};

pub use lib_cache::LibPatchCache;
pub use module::{
    HeadHook, HookEnv, ModuleMap, PatchModule, PatchModuleMap, PatchTable, TailHook,
};
pub use state::{PatchState, PersistStep};
pub use tail::{TailpatchIndex, TailpatchRecord};

use crate::const_values::{
    EngineConfig, GDB_FTR_CREATOR, GDB_FTR_VALUE, GUEST_EPOCH_OFFSET_SECS, OM_FTR_CREATOR,
    OM_FTR_SHOW_ERRORS_FLAG, SYS_FILE_C_SYSTEM, SYS_FTR_NUM_ROM_VERSION,
    SYS_TRAP_DLK_GET_SYNC_INFO, is_system_trap,
};
use crate::context::{CallContext, CallRom};
use crate::host::{GuestCalls, Host, InstructionBreaks, Pref, UartDevice};
use crate::persist::{PatchInfo, SavedTailpatch};
use crate::session_file::SessionFile;

pub struct PatchEngine {
    config: EngineConfig,
    modules: RefCell<Box<dyn PatchModuleMap>>,
    lib_cache: RefCell<LibPatchCache>,
    tailpatches: RefCell<TailpatchIndex>,
    state: RefCell<PatchState>,
    system_module: RefCell<Option<Rc<dyn PatchModule>>>,
    htal_module: RefCell<Option<Rc<dyn PatchModule>>>,
}

impl PatchEngine {
    pub fn new(config: EngineConfig, modules: Box<dyn PatchModuleMap>) -> Self {
        Self {
            config,
            modules: RefCell::new(modules),
            lib_cache: RefCell::new(LibPatchCache::new()),
            tailpatches: RefCell::new(TailpatchIndex::new()),
            state: RefCell::new(PatchState::new()),
            system_module: RefCell::new(None),
            htal_module: RefCell::new(None),
        }
    }

    /// 使用只含内置系统模块的注册表
    pub fn with_builtin(config: EngineConfig) -> Self {
        Self::new(config, Box::new(ModuleMap::with_builtin()))
    }

    /// 新会话：重新加载全部补丁模块
    pub fn initialize(&self) {
        {
            let mut modules = self.modules.borrow_mut();
            modules.clear_all();
            modules.load_all(&self.config);
        }
        self.forget_well_known_modules();
        self.state.borrow_mut().reset();
        info!("补丁引擎初始化完成");
    }

    pub fn reset(&self, breaks: &mut dyn InstructionBreaks) {
        self.tailpatches.borrow_mut().clear(breaks);
        self.lib_cache.borrow_mut().clear();
        self.forget_well_known_modules();
        self.state.borrow_mut().reset();
        debug!("补丁引擎已复位");
    }

    pub fn dispose(&self, breaks: &mut dyn InstructionBreaks) {
        self.reset(breaks);
        self.modules.borrow_mut().clear_all();
    }

    fn forget_well_known_modules(&self) {
        *self.system_module.borrow_mut() = None;
        *self.htal_module.borrow_mut() = None;
    }

    /// 当前状态编码成补丁数据块
    pub fn patch_info(&self) -> PatchInfo {
        PatchInfo {
            version: self.config.persist.save_version,
            state: self.state.borrow().clone(),
            tailpatches: self
                .tailpatches
                .borrow()
                .records()
                .into_iter()
                .map(|r| SavedTailpatch {
                    context: r.context,
                    count: r.count,
                })
                .collect(),
        }
    }

    pub fn save(&self, file: &mut dyn SessionFile) -> anyhow::Result<()> {
        let info = self.patch_info();
        let chunk = info.encode().context("无法编码补丁数据块")?;
        file.write_patch_info(&chunk);
        info!(
            version = info.version,
            tailpatches = info.tailpatches.len(),
            "保存补丁数据块"
        );
        Ok(())
    }

    /// 从会话中恢复；尾补丁例程按恢复的上下文重新解析
    pub fn load(&self, file: &mut dyn SessionFile, host: &mut dyn Host) -> anyhow::Result<()> {
        let Some(chunk) = file.read_patch_info() else {
            warn!("会话中没有补丁数据块，标记为不可重新加载");
            file.set_can_reload(false);
            return Ok(());
        };

        let info = match PatchInfo::decode(&chunk) {
            Ok(info) => info,
            Err(e) => {
                file.set_can_reload(false);
                return Err(e).context("补丁数据块损坏");
            }
        };

        if info.version >= 1 {
            self.lib_cache.borrow_mut().clear();
            self.tailpatches.borrow_mut().clear(host.breaks());

            for saved in &info.tailpatches {
                let (_, tailpatch) = self.resolve(host.guest(), &saved.context);
                if tailpatch.is_none() {
                    debug!(context = %saved.context, "恢复的尾补丁已无对应例程");
                }
                self.tailpatches.borrow_mut().restore(
                    TailpatchRecord {
                        context: saved.context,
                        tailpatch,
                        count: saved.count,
                    },
                    host.breaks(),
                );
            }
            *self.state.borrow_mut() = info.state;
        }

        info!(
            version = info.version,
            tailpatches = self.tailpatches.borrow().len(),
            "加载补丁数据块"
        );
        Ok(())
    }

    /// 为调用上下文选出补丁模块，再取该调用索引上的头/尾补丁
    pub fn resolve(
        &self,
        guest: &mut dyn GuestCalls,
        context: &CallContext,
    ) -> (Option<HeadHook>, Option<TailHook>) {
        let module = if is_system_trap(context.trap_word) {
            self.system_module()
        } else if context.extra == self.config.patch.htal_magic_refnum {
            self.htal_module()
        } else {
            u16::try_from(context.extra)
                .ok()
                .and_then(|refnum| self.library_module(guest, refnum))
        };

        match module {
            Some(module) => (
                module.headpatch(context.trap_index),
                module.tailpatch(context.trap_index),
            ),
            None => (None, None),
        }
    }

    fn system_module(&self) -> Option<Rc<dyn PatchModule>> {
        let mut cached = self.system_module.borrow_mut();
        if cached.is_none() {
            *cached = self.modules.borrow().module_by_name(&self.config.patch.system_module);
        }
        cached.clone()
    }

    fn htal_module(&self) -> Option<Rc<dyn PatchModule>> {
        let mut cached = self.htal_module.borrow_mut();
        if cached.is_none() {
            *cached = self.modules.borrow().module_by_name(&self.config.patch.htal_module);
        }
        cached.clone()
    }

    fn library_module(
        &self,
        guest: &mut dyn GuestCalls,
        refnum: u16,
    ) -> Option<Rc<dyn PatchModule>> {
        let cached = self.lib_cache.borrow_mut().cached(refnum);
        if let Some(module) = cached {
            return module;
        }

        // 读库名可能进入客户机，期间不持有缓存借用
        let lib_name = guest.library_name(refnum);
        let modules = self.modules.borrow();
        self.lib_cache.borrow_mut().refresh(refnum, lib_name.as_deref(), &**modules)
    }

    /// 解释器拦截到陷阱时的入口，可在补丁例程内重入
    pub fn handle_system_call(&self, host: &mut dyn Host, context: &CallContext) -> CallRom {
        if host.session().need_post_load() {
            host.session().set_need_post_load(false);
            self.post_load(host);
        }

        let (headpatch, tailpatch) = self.resolve(host.guest(), context);
        self.handle_patches(host, context, headpatch, tailpatch)
    }

    pub fn handle_patches(
        &self,
        host: &mut dyn Host,
        context: &CallContext,
        headpatch: Option<HeadHook>,
        tailpatch: Option<TailHook>,
    ) -> CallRom {
        let call_rom = match &headpatch {
            Some(hp) => self.call_headpatch(host, hp, context),
            None => CallRom::Execute,
        };

        if let Some(tp) = tailpatch {
            match call_rom {
                // 原始例程尚未执行，等返回时再调用
                CallRom::Execute => {
                    self.tailpatches.borrow_mut().arm(tp, context, host.breaks());
                }
                CallRom::Skip => self.call_tailpatch(host, &tp, context),
            }
        }

        trace!(context = %context, ?call_rom, "陷阱处理完成");
        call_rom
    }

    /// 解释器执行到带断点标记的地址时调用
    pub fn handle_instruction_break(&self, host: &mut dyn Host) {
        let pc = host.cpu().pc();
        let due = self.tailpatches.borrow_mut().recover(pc, host.breaks());
        if let Some((tp, context)) = due {
            self.call_tailpatch(host, &tp, &context);
        }
    }

    pub fn install_instruction_breaks(&self, breaks: &mut dyn InstructionBreaks) {
        self.tailpatches.borrow().install_breaks(breaks);
    }

    pub fn remove_instruction_breaks(&self, breaks: &mut dyn InstructionBreaks) {
        self.tailpatches.borrow().remove_breaks(breaks);
    }

    fn call_headpatch(
        &self,
        host: &mut dyn Host,
        hp: &HeadHook,
        context: &CallContext,
    ) -> CallRom {
        let profiling = host.session().set_profiling_enabled(false);
        let call_rom = hp.call(&mut HookEnv::new(&mut *host, self, context));
        host.session().set_profiling_enabled(profiling);
        call_rom
    }

    fn call_tailpatch(&self, host: &mut dyn Host, tp: &TailHook, context: &CallContext) {
        trace!(module = tp.module(), index = tp.index(), "调用尾补丁");
        let profiling = host.session().set_profiling_enabled(false);
        tp.call(&mut HookEnv::new(&mut *host, self, context));
        host.session().set_profiling_enabled(profiling);
    }

    /// 会话加载后第一次陷阱时执行的一次性修复
    pub fn post_load(&self, host: &mut dyn Host) {
        let ui_initialized = self.state.borrow().ui_initialized();
        if ui_initialized {
            info!("执行加载后修复");

            let debugger = host.session().connected_to_debugger();
            let gdb = if debugger {
                host.guest().ftr_set(GDB_FTR_CREATOR, 0, GDB_FTR_VALUE)
            } else {
                host.guest().ftr_unregister(GDB_FTR_CREATOR, 0)
            };
            if let Err(e) = gdb {
                debug!(debugger, error = %e, "无法更新调试器特性");
            }

            let strict = host.session().preference(Pref::ReportStrictIntlChecks);
            if intl_mgr_available(host.guest()) {
                host.guest().intl_set_strict_checks(strict);
            }

            let overlay = host.session().preference(Pref::ReportOverlayErrors);
            if let Err(e) = host
                .guest()
                .ftr_set(OM_FTR_CREATOR, OM_FTR_SHOW_ERRORS_FLAG, overlay as u32)
            {
                debug!(error = %e, "无法设置覆盖层错误特性");
            }

            if host.guest().trap_exists(SYS_TRAP_DLK_GET_SYNC_INFO) {
                match host.guest().sync_user_name() {
                    Ok(name) => host.session().set_user_name(&name),
                    Err(e) => debug!(error = %e, "无法读取 HotSync 用户名"),
                }
            }

            if let Err(e) = host.session().autoload() {
                warn!("自动加载失败: {:#}", e);
            }

            host.guest().set_seconds(current_guest_seconds());
            host.guest().evt_wakeup();
        }

        for uart in UartDevice::ALL {
            if host.session().line_driver_active(uart) {
                if let Err(e) = host.session().open_transport(uart) {
                    warn!(?uart, "无法重新打开传输通道: {:#}", e);
                }
            }
        }
    }

    pub fn mark_library_dirty(&self, refnum: u16) {
        self.lib_cache.borrow_mut().mark_dirty(refnum);
    }

    pub fn mark_all_libraries_dirty(&self) {
        self.lib_cache.borrow_mut().mark_all_dirty();
    }

    pub fn state(&self) -> Ref<'_, PatchState> {
        self.state.borrow()
    }

    /// 持有期间不能再次进入引擎
    pub fn state_mut(&self) -> RefMut<'_, PatchState> {
        self.state.borrow_mut()
    }

    pub fn tailpatches(&self) -> Ref<'_, TailpatchIndex> {
        self.tailpatches.borrow()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

/// 国际化管理器从 ROM 4.0 起提供
pub fn intl_mgr_available(guest: &mut dyn GuestCalls) -> bool {
    let rom_version = guest
        .ftr_get(SYS_FILE_C_SYSTEM, SYS_FTR_NUM_ROM_VERSION)
        .unwrap_or(0);
    ((rom_version >> 24) & 0xFF) >= 4
}

/// 当前时间，以客户机纪元（1904-01-01）计的秒数
fn current_guest_seconds() -> u32 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (unix + GUEST_EPOCH_OFFSET_SECS) as u32
}
