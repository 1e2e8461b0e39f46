//! 补丁模块与模块注册表

use std::cell::RefMut;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::debug;

use super::PatchEngine;
use super::state::PatchState;
use crate::const_values::EngineConfig;
use crate::context::{CallContext, CallRom};
use crate::host::Host;

/// 补丁例程运行时可访问的环境
///
/// 调用补丁例程时引擎不持有任何内部借用，例程中调用的客户机例程
/// 可以再次陷入同一个引擎。
pub struct HookEnv<'a> {
    pub host: &'a mut dyn Host,
    pub context: &'a CallContext,
    engine: &'a PatchEngine,
}

impl<'a> HookEnv<'a> {
    pub fn new(host: &'a mut dyn Host, engine: &'a PatchEngine, context: &'a CallContext) -> Self {
        Self {
            host,
            context,
            engine,
        }
    }

    /// 引擎状态；借用须在调用客户机例程前释放
    pub fn state(&self) -> RefMut<'a, PatchState> {
        self.engine.state_mut()
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.engine.config()
    }

    /// 在补丁例程内分派一次嵌套陷阱
    pub fn dispatch(&mut self, context: &CallContext) -> CallRom {
        self.engine.handle_system_call(&mut *self.host, context)
    }
}

pub type HeadpatchProc = Rc<dyn Fn(&mut HookEnv<'_>) -> CallRom>;
pub type TailpatchProc = Rc<dyn Fn(&mut HookEnv<'_>)>;

/// 已解析的补丁例程引用，身份为 (模块名, 调用索引)
#[derive(Clone)]
pub struct HookRef<P> {
    module: Rc<str>,
    index: u16,
    proc_: P,
}

pub type HeadHook = HookRef<HeadpatchProc>;
pub type TailHook = HookRef<TailpatchProc>;

impl<P> HookRef<P> {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn index(&self) -> u16 {
        self.index
    }
}

impl<P> fmt::Debug for HookRef<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRef")
            .field("module", &self.module)
            .field("index", &self.index)
            .finish()
    }
}

impl HookRef<HeadpatchProc> {
    #[inline(always)]
    pub(crate) fn call(&self, env: &mut HookEnv<'_>) -> CallRom {
        (self.proc_)(env)
    }
}

impl HookRef<TailpatchProc> {
    #[inline(always)]
    pub(crate) fn call(&self, env: &mut HookEnv<'_>) {
        (self.proc_)(env)
    }
}

/// 按调用索引提供头/尾补丁
pub trait PatchModule {
    fn name(&self) -> &str;

    fn headpatch(&self, index: u16) -> Option<HeadHook>;

    fn tailpatch(&self, index: u16) -> Option<TailHook>;
}

/// 以哈希表实现的补丁模块
#[derive(Clone)]
pub struct PatchTable {
    name: Rc<str>,
    heads: FxHashMap<u16, HeadpatchProc>,
    tails: FxHashMap<u16, TailpatchProc>,
}

impl PatchTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: Rc::from(name),
            heads: FxHashMap::default(),
            tails: FxHashMap::default(),
        }
    }

    pub fn with_head<F>(mut self, index: u16, f: F) -> Self
    where
        F: Fn(&mut HookEnv<'_>) -> CallRom + 'static,
    {
        self.heads.insert(index, Rc::new(f));
        self
    }

    pub fn with_tail<F>(mut self, index: u16, f: F) -> Self
    where
        F: Fn(&mut HookEnv<'_>) + 'static,
    {
        self.tails.insert(index, Rc::new(f));
        self
    }

    /// 合并另一张同名表，后者覆盖相同索引
    pub fn merge(&mut self, other: PatchTable) {
        self.heads.extend(other.heads);
        self.tails.extend(other.tails);
    }

    pub fn len(&self) -> usize {
        self.heads.len() + self.tails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty() && self.tails.is_empty()
    }
}

impl PatchModule for PatchTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn headpatch(&self, index: u16) -> Option<HeadHook> {
        self.heads.get(&index).map(|p| HookRef {
            module: self.name.clone(),
            index,
            proc_: p.clone(),
        })
    }

    fn tailpatch(&self, index: u16) -> Option<TailHook> {
        self.tails.get(&index).map(|p| HookRef {
            module: self.name.clone(),
            index,
            proc_: p.clone(),
        })
    }
}

/// 以名字查找补丁模块的注册表
pub trait PatchModuleMap {
    fn clear_all(&mut self);

    fn load_all(&mut self, config: &EngineConfig);

    fn module_by_name(&self, name: &str) -> Option<Rc<dyn PatchModule>>;
}

pub type ModuleLoader = Box<dyn Fn(&EngineConfig) -> PatchTable>;

/// 默认注册表：由一组加载器生成补丁表，同名表合并
#[derive(Default)]
pub struct ModuleMap {
    loaders: Vec<ModuleLoader>,
    modules: FxHashMap<String, Rc<dyn PatchModule>>,
}

impl ModuleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 带内置系统模块的注册表
    pub fn with_builtin() -> Self {
        let mut map = Self::new();
        map.add_loader(super::system::system_module);
        map
    }

    pub fn add_loader<F>(&mut self, loader: F)
    where
        F: Fn(&EngineConfig) -> PatchTable + 'static,
    {
        self.loaders.push(Box::new(loader));
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl PatchModuleMap for ModuleMap {
    fn clear_all(&mut self) {
        self.modules.clear();
    }

    fn load_all(&mut self, config: &EngineConfig) {
        let mut tables: FxHashMap<String, PatchTable> = FxHashMap::default();
        for loader in &self.loaders {
            let table = loader(config);
            match tables.get_mut(table.name()) {
                Some(existing) => existing.merge(table),
                None => {
                    tables.insert(table.name().to_string(), table);
                }
            }
        }

        self.modules = tables
            .into_iter()
            .map(|(name, table)| {
                debug!(module = %name, hooks = table.len(), "加载补丁模块");
                (name, Rc::new(table) as Rc<dyn PatchModule>)
            })
            .collect();
    }

    fn module_by_name(&self, name: &str) -> Option<Rc<dyn PatchModule>> {
        self.modules.get(name).cloned()
    }
}
