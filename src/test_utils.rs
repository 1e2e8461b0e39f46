//! 测试用宿主：实现全部协作者接口并记录客户机调用

use std::collections::VecDeque;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::const_values::{DM_ERR_CANT_FIND, EVT_WAIT_FOREVER, FTR_ERR_NO_SUCH_FEATURE};
use crate::context::{CallContext, CallRom};
use crate::host::{
    Cpu, DatabaseInfo, EventPlayback, GuestCalls, GuestError, GuestResult, Hordes, Host,
    InstructionBreaks, KeyEvent, PenEvent, Point, Pref, Session, UartDevice,
};
use crate::meta_memory::MetaMemory;
use crate::patch::PatchEngine;

const HEAP_BASE: u32 = 0x0001_0000;

pub struct MockHost {
    // CPU
    pub pc: u32,
    pub result: u32,
    pub wait_timeout: i32,
    pub breaks: MetaMemory,

    // 会话
    pub need_post_load: bool,
    pub nested: bool,
    pub idle: bool,
    pub key_events: VecDeque<KeyEvent>,
    pub pen_events: VecDeque<PenEvent>,
    pub idle_signals: u32,
    pub debugger: bool,
    pub strict_intl: bool,
    pub overlay_errors: bool,
    pub user_name: Option<String>,
    pub autoload_calls: u32,
    pub autoload_fails: bool,
    pub active_lines: Vec<UartDevice>,
    pub opened_transports: Vec<UartDevice>,
    pub profiling: bool,
    pub profiling_log: Vec<bool>,

    // 客户机例程
    pub sync_trap: bool,
    pub sync_name: Option<String>,
    pub features: FxHashMap<(u32, u16), u32>,
    pub intl_strict: Option<bool>,
    pub wakeups: u32,
    pub seconds: Option<u32>,
    pub keys: Vec<(u16, u16, u16)>,
    pub pens: Vec<Point>,
    pub libraries: FxHashMap<u16, String>,
    pub library_name_calls: u32,
    pub databases: FxHashMap<(u16, u32), DatabaseInfo>,
    pub apps_by_creator: FxHashMap<u32, (u16, u32)>,
    pub alloc_fails: bool,
    pub allocations: Vec<u32>,
    pub owners: Vec<(u32, u16)>,
    pub puts16: Vec<(u32, u16)>,
    pub puts32: Vec<(u32, u32)>,
    pub app_switches: Vec<(u16, u32, u16, Option<u32>)>,
    /// 应用切换期间客户机再次陷入的引擎与陷阱
    pub reenter: Option<(Rc<PatchEngine>, CallContext)>,
    pub reentered: Vec<CallRom>,

    // 回放与压力注入
    pub replaying: bool,
    pub replay_event_ok: bool,
    pub replay_calls: Vec<&'static str>,
    pub hordes_on: bool,
    pub hordes_event_ok: bool,
    pub hordes_calls: Vec<&'static str>,
}

impl MockHost {
    /// 空闲、无限等待、没有任何待处理输入的客户机
    pub fn new() -> Self {
        Self {
            pc: 0,
            result: 0,
            wait_timeout: EVT_WAIT_FOREVER,
            breaks: MetaMemory::new(),
            need_post_load: false,
            nested: false,
            idle: true,
            key_events: VecDeque::new(),
            pen_events: VecDeque::new(),
            idle_signals: 0,
            debugger: false,
            strict_intl: false,
            overlay_errors: false,
            user_name: None,
            autoload_calls: 0,
            autoload_fails: false,
            active_lines: Vec::new(),
            opened_transports: Vec::new(),
            profiling: false,
            profiling_log: Vec::new(),
            sync_trap: false,
            sync_name: None,
            features: FxHashMap::default(),
            intl_strict: None,
            wakeups: 0,
            seconds: None,
            keys: Vec::new(),
            pens: Vec::new(),
            libraries: FxHashMap::default(),
            library_name_calls: 0,
            databases: FxHashMap::default(),
            apps_by_creator: FxHashMap::default(),
            alloc_fails: false,
            allocations: Vec::new(),
            owners: Vec::new(),
            puts16: Vec::new(),
            puts32: Vec::new(),
            app_switches: Vec::new(),
            reenter: None,
            reentered: Vec::new(),
            replaying: false,
            replay_event_ok: true,
            replay_calls: Vec::new(),
            hordes_on: false,
            hordes_event_ok: true,
            hordes_calls: Vec::new(),
        }
    }
}

impl Cpu for MockHost {
    fn pc(&self) -> u32 {
        self.pc
    }

    fn set_result(&mut self, value: u32) {
        self.result = value;
    }

    fn wait_timeout(&self) -> i32 {
        self.wait_timeout
    }

    fn set_wait_timeout(&mut self, ticks: i32) {
        self.wait_timeout = ticks;
    }
}

impl InstructionBreaks for MockHost {
    fn mark_instruction_break(&mut self, addr: u32) {
        self.breaks.mark_instruction_break(addr);
    }

    fn unmark_instruction_break(&mut self, addr: u32) {
        self.breaks.unmark_instruction_break(addr);
    }
}

impl Session for MockHost {
    fn need_post_load(&self) -> bool {
        self.need_post_load
    }

    fn set_need_post_load(&mut self, need: bool) {
        self.need_post_load = need;
    }

    fn is_nested(&self) -> bool {
        self.nested
    }

    fn evt_mgr_idle(&self) -> bool {
        self.idle
    }

    fn has_key_event(&self) -> bool {
        !self.key_events.is_empty()
    }

    fn get_key_event(&mut self) -> KeyEvent {
        self.key_events.pop_front().unwrap_or_default()
    }

    fn has_pen_event(&self) -> bool {
        !self.pen_events.is_empty()
    }

    fn get_pen_event(&mut self) -> PenEvent {
        self.pen_events.pop_front().unwrap_or_default()
    }

    fn signal_idle_waiters(&mut self) {
        self.idle_signals += 1;
    }

    fn connected_to_debugger(&self) -> bool {
        self.debugger
    }

    fn preference(&self, pref: Pref) -> bool {
        match pref {
            Pref::ReportStrictIntlChecks => self.strict_intl,
            Pref::ReportOverlayErrors => self.overlay_errors,
        }
    }

    fn set_user_name(&mut self, name: &str) {
        self.user_name = Some(name.to_string());
    }

    fn autoload(&mut self) -> anyhow::Result<()> {
        self.autoload_calls += 1;
        if self.autoload_fails {
            anyhow::bail!("autoload directory missing");
        }
        Ok(())
    }

    fn line_driver_active(&self, uart: UartDevice) -> bool {
        self.active_lines.contains(&uart)
    }

    fn open_transport(&mut self, uart: UartDevice) -> anyhow::Result<()> {
        self.opened_transports.push(uart);
        Ok(())
    }

    fn set_profiling_enabled(&mut self, enabled: bool) -> bool {
        self.profiling_log.push(enabled);
        std::mem::replace(&mut self.profiling, enabled)
    }
}

impl GuestCalls for MockHost {
    fn trap_exists(&self, _trap_word: u16) -> bool {
        self.sync_trap
    }

    fn ftr_get(&mut self, creator: u32, num: u16) -> GuestResult<u32> {
        self.features
            .get(&(creator, num))
            .copied()
            .ok_or(GuestError(FTR_ERR_NO_SUCH_FEATURE))
    }

    fn ftr_set(&mut self, creator: u32, num: u16, value: u32) -> GuestResult<()> {
        self.features.insert((creator, num), value);
        Ok(())
    }

    fn ftr_unregister(&mut self, creator: u32, num: u16) -> GuestResult<()> {
        self.features
            .remove(&(creator, num))
            .map(|_| ())
            .ok_or(GuestError(FTR_ERR_NO_SUCH_FEATURE))
    }

    fn intl_set_strict_checks(&mut self, on: bool) {
        self.intl_strict = Some(on);
    }

    fn sync_user_name(&mut self) -> GuestResult<String> {
        self.sync_name.clone().ok_or(GuestError(DM_ERR_CANT_FIND))
    }

    fn evt_wakeup(&mut self) {
        self.wakeups += 1;
    }

    fn set_seconds(&mut self, seconds: u32) {
        self.seconds = Some(seconds);
    }

    fn enqueue_key(&mut self, chr: u16, key_code: u16, modifiers: u16) {
        self.keys.push((chr, key_code, modifiers));
    }

    fn enqueue_pen_point(&mut self, point: Point) {
        self.pens.push(point);
    }

    fn library_name(&mut self, refnum: u16) -> Option<String> {
        self.library_name_calls += 1;
        self.libraries.get(&refnum).cloned()
    }

    fn database_info(&mut self, card_no: u16, db_id: u32) -> GuestResult<DatabaseInfo> {
        self.databases
            .get(&(card_no, db_id))
            .copied()
            .ok_or(GuestError(DM_ERR_CANT_FIND))
    }

    fn next_database_by_type_creator(
        &mut self,
        _db_type: u32,
        creator: u32,
    ) -> GuestResult<(u16, u32)> {
        self.apps_by_creator
            .get(&creator)
            .copied()
            .ok_or(GuestError(DM_ERR_CANT_FIND))
    }

    fn mem_ptr_new(&mut self, size: u32) -> Option<u32> {
        if self.alloc_fails {
            return None;
        }
        let ptr = self
            .allocations
            .last()
            .map_or(HEAP_BASE, |last| last + size.next_multiple_of(2));
        self.allocations.push(ptr);
        Some(ptr)
    }

    fn mem_ptr_set_owner(&mut self, ptr: u32, owner: u16) {
        self.owners.push((ptr, owner));
    }

    fn put16(&mut self, addr: u32, value: u16) {
        self.puts16.push((addr, value));
    }

    fn put32(&mut self, addr: u32, value: u32) {
        self.puts32.push((addr, value));
    }

    fn ui_app_switch(
        &mut self,
        card_no: u16,
        db_id: u32,
        cmd: u16,
        param: Option<u32>,
    ) -> GuestResult<()> {
        self.app_switches.push((card_no, db_id, cmd, param));
        // 宿主调用客户机例程期间处于嵌套调用中
        if let Some((engine, context)) = self.reenter.clone() {
            let was_nested = std::mem::replace(&mut self.nested, true);
            let call_rom = engine.handle_system_call(self, &context);
            self.nested = was_nested;
            self.reentered.push(call_rom);
        }
        Ok(())
    }
}

impl EventPlayback for MockHost {
    fn replaying(&self) -> bool {
        self.replaying
    }

    fn replay_get_event(&mut self) -> bool {
        self.replay_calls.push("event");
        self.replay_event_ok
    }

    fn replay_get_pen(&mut self) -> bool {
        self.replay_calls.push("pen");
        true
    }
}

impl Hordes for MockHost {
    fn is_on(&self) -> bool {
        self.hordes_on
    }

    fn post_fake_event(&mut self) -> bool {
        self.hordes_calls.push("event");
        self.hordes_event_ok
    }

    fn post_fake_pen_event(&mut self) -> bool {
        self.hordes_calls.push("pen");
        true
    }
}

impl Host for MockHost {
    fn cpu(&mut self) -> &mut dyn Cpu {
        self
    }

    fn breaks(&mut self) -> &mut dyn InstructionBreaks {
        self
    }

    fn session(&mut self) -> &mut dyn Session {
        self
    }

    fn guest(&mut self) -> &mut dyn GuestCalls {
        self
    }

    fn playback(&mut self) -> &mut dyn EventPlayback {
        self
    }

    fn hordes(&mut self) -> &mut dyn Hordes {
        self
    }
}
