//! 共享库补丁表缓存
//!
//! 库句柄会在加载/卸载之间被复用，引擎无法直接观察到，
//! 所以条目先标记为脏，在下次使用时按库名重新解析。

use std::rc::Rc;

use tracing::debug;

use super::module::{PatchModule, PatchModuleMap};

#[derive(Clone)]
struct LibPatchEntry {
    module: Option<Rc<dyn PatchModule>>,
    dirty: bool,
}

impl Default for LibPatchEntry {
    fn default() -> Self {
        Self {
            module: None,
            dirty: true,
        }
    }
}

#[derive(Default, Clone)]
pub struct LibPatchCache {
    entries: Vec<LibPatchEntry>,
}

impl LibPatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 干净条目直接给出缓存的模块；脏条目返回 `None`，需调用方按库名刷新
    pub fn cached(&mut self, refnum: u16) -> Option<Option<Rc<dyn PatchModule>>> {
        let entry = self.entry(refnum);
        (!entry.dirty).then(|| entry.module.clone())
    }

    /// 按库名重新解析条目并清除脏标记
    pub fn refresh(
        &mut self,
        refnum: u16,
        lib_name: Option<&str>,
        modules: &dyn PatchModuleMap,
    ) -> Option<Rc<dyn PatchModule>> {
        let entry = self.entry(refnum);
        entry.module = lib_name.and_then(|name| modules.module_by_name(name));
        entry.dirty = false;
        debug!(
            refnum,
            library = lib_name.unwrap_or("<none>"),
            patched = entry.module.is_some(),
            "刷新库补丁表"
        );
        entry.module.clone()
    }

    /// 缓存按句柄稀疏增长，新条目为脏
    fn entry(&mut self, refnum: u16) -> &mut LibPatchEntry {
        let slot = refnum as usize;
        if slot >= self.entries.len() {
            self.entries.resize(slot + 1, LibPatchEntry::default());
        }
        &mut self.entries[slot]
    }

    pub fn mark_dirty(&mut self, refnum: u16) {
        if let Some(entry) = self.entries.get_mut(refnum as usize) {
            entry.dirty = true;
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.entries.iter_mut().for_each(|e| e.dirty = true);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 当前缓存容量（按最大句柄增长）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::const_values::EngineConfig;
    use crate::host::GuestCalls;
    use crate::patch::module::{ModuleMap, PatchTable};
    use crate::test_utils::MockHost;

    /// 与引擎解析库句柄的顺序一致：先查缓存，脏了再取库名
    fn lookup(
        cache: &mut LibPatchCache,
        refnum: u16,
        host: &mut MockHost,
        map: &ModuleMap,
    ) -> Option<Rc<dyn PatchModule>> {
        match cache.cached(refnum) {
            Some(module) => module,
            None => {
                let name = host.library_name(refnum);
                cache.refresh(refnum, name.as_deref(), map)
            }
        }
    }

    fn net_lib_map() -> ModuleMap {
        let mut map = ModuleMap::new();
        map.add_loader(|_| PatchTable::new("Net.lib").with_tail(4, |_| {}));
        map.load_all(&EngineConfig::default());
        map
    }

    #[test]
    fn test_lookup_grows_and_resolves() {
        let map = net_lib_map();
        let mut host = MockHost::new();
        host.libraries.insert(9, "Net.lib".to_string());

        let mut cache = LibPatchCache::new();
        let module = lookup(&mut cache, 9, &mut host, &map).unwrap();
        assert_eq!(module.name(), "Net.lib");
        assert_eq!(cache.len(), 10);
    }

    #[test]
    fn test_repeated_lookup_is_cached() {
        let map = net_lib_map();
        let mut host = MockHost::new();
        host.libraries.insert(2, "Net.lib".to_string());

        let mut cache = LibPatchCache::new();
        let first = lookup(&mut cache, 2, &mut host, &map).unwrap();
        let second = lookup(&mut cache, 2, &mut host, &map).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(host.library_name_calls, 1);
    }

    #[test]
    fn test_dirty_forces_reresolution() {
        let mut map = net_lib_map();
        let mut host = MockHost::new();
        host.libraries.insert(2, "Net.lib".to_string());

        let mut cache = LibPatchCache::new();
        let first = lookup(&mut cache, 2, &mut host, &map).unwrap();

        // 名字不变，但注册表已重新加载
        map.load_all(&EngineConfig::default());
        let stale = lookup(&mut cache, 2, &mut host, &map).unwrap();
        assert!(Rc::ptr_eq(&first, &stale));

        cache.mark_dirty(2);
        let fresh = lookup(&mut cache, 2, &mut host, &map).unwrap();
        assert!(!Rc::ptr_eq(&first, &fresh));
        assert_eq!(host.library_name_calls, 2);
    }

    #[test]
    fn test_unknown_library_is_none() {
        let map = net_lib_map();
        let mut host = MockHost::new();
        host.libraries.insert(1, "Serial.lib".to_string());

        let mut cache = LibPatchCache::new();
        assert!(lookup(&mut cache, 1, &mut host, &map).is_none());
        assert!(lookup(&mut cache, 5, &mut host, &map).is_none());
        assert!(matches!(cache.cached(5), Some(None)));

        // 句柄被复用为一个有补丁的库
        host.libraries.insert(1, "Net.lib".to_string());
        cache.mark_all_dirty();
        assert!(lookup(&mut cache, 1, &mut host, &map).is_some());
    }
}
