// zfs/memory.rs
// In-memory libzfs/libnvpair: the same contract as the native backend,
// with call logging, allocation tracking and error injection

use super::abi::AbiMode;
use super::backend::{NativeZfs, ZfsIterFn, ZpoolIterFn, NV_UNIQUE_NAME, ZPROP_INVAL};
use super::byref::{BooleanSlot, EnumSlot, PropBuf, PtrSlot};
use super::error::ErrorCode;
use super::handle::{LibHandle, NvListPtr, OpaqueHandle, ZfsHandle, ZpoolHandle};
use super::helpers::{ancestors, pool_of};
use super::types::{DatasetKind, PoolState, PoolStatus, PropSource, ShareProtocol, ZfsProp, ZpoolProp};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ffi::{c_int, c_uint, CStr};
use std::sync::{Mutex, MutexGuard};

const FAILED: c_int = -1;

#[derive(Debug, Clone)]
enum NvVal {
    Str(String),
    Bool(bool),
    Flag,
    /// Embedded list, owned by the containing list
    List(usize),
}

#[derive(Debug, Default)]
struct NvData {
    unique: bool,
    pairs: Vec<(String, NvVal)>,
}

#[derive(Debug, Clone)]
struct Node {
    kind: DatasetKind,
    createtxg: u64,
    props: BTreeMap<String, String>,
    mounted: Option<String>,
    shared: BTreeSet<ShareProtocol>,
    iscsi: bool,
    origin: Option<String>,
    perms: BTreeMap<String, BTreeSet<String>>,
}

impl Node {
    fn new(kind: DatasetKind, createtxg: u64) -> Self {
        Node {
            kind,
            createtxg,
            props: BTreeMap::new(),
            mounted: None,
            shared: BTreeSet::new(),
            iscsi: false,
            origin: None,
            perms: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Pool {
    props: BTreeMap<String, String>,
    status: PoolStatus,
    state: PoolState,
}

#[derive(Debug)]
struct OpenZfs {
    name: String,
    lib: usize,
    user_props: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    next_addr: usize,
    txg: u64,
    libs: HashSet<usize>,
    errors: HashMap<usize, (c_int, String)>,
    datasets: BTreeMap<String, Node>,
    pools: BTreeMap<String, Pool>,
    zfs_handles: HashMap<usize, OpenZfs>,
    zpool_handles: HashMap<usize, (String, usize)>,
    nvlists: HashMap<usize, NvData>,
    freed: HashSet<usize>,
    double_frees: usize,
    stray_closes: usize,
    calls: Vec<String>,
    denied: HashSet<String>,
    failures: HashMap<String, ErrorCode>,
    fail_alloc: bool,
}

impl Inner {
    fn addr(&mut self) -> usize {
        self.next_addr += 0x10;
        self.next_addr
    }

    fn next_txg(&mut self) -> u64 {
        self.txg += 1;
        self.txg
    }

    /// Log a call. The last error of a library is only replaced by the
    /// next failure, never cleared.
    fn begin(&mut self, _lib: usize, call: String) {
        self.calls.push(call);
    }

    fn fail(&mut self, lib: usize, code: ErrorCode, what: &str) -> c_int {
        self.errors
            .insert(lib, (code.code(), format!("{}: {}", what, code.description())));
        FAILED
    }

    /// Injected failure for `op`, if any.
    fn injected(&mut self, lib: usize, op: &str, what: &str) -> Option<c_int> {
        let code = *self.failures.get(op)?;
        Some(self.fail(lib, code, what))
    }

    fn handle(&self, zhp: ZfsHandle) -> Option<&OpenZfs> {
        self.zfs_handles.get(&zhp.addr())
    }

    fn lib_of(&self, zhp: ZfsHandle) -> usize {
        self.handle(zhp).map_or(0, |h| h.lib)
    }

    fn name_of(&self, zhp: ZfsHandle) -> Option<String> {
        self.handle(zhp).map(|h| h.name.clone())
    }

    fn open_handle(&mut self, lib: usize, name: &str) -> Option<ZfsHandle> {
        let addr = self.addr();
        self.zfs_handles.insert(
            addr,
            OpenZfs {
                name: name.to_string(),
                lib,
                user_props: None,
            },
        );
        ZfsHandle::from_addr(addr)
    }

    fn insert_dataset(&mut self, name: &str, kind: DatasetKind) {
        let txg = self.next_txg();
        self.datasets.insert(name.to_string(), Node::new(kind, txg));
    }

    fn insert_pool(&mut self, name: &str) {
        let mut props = BTreeMap::new();
        props.insert("health".to_string(), "ONLINE".to_string());
        props.insert("size".to_string(), "10G".to_string());
        props.insert("allocated".to_string(), "1G".to_string());
        props.insert("free".to_string(), "9G".to_string());
        props.insert("capacity".to_string(), "10%".to_string());
        self.pools.insert(
            name.to_string(),
            Pool {
                props,
                status: PoolStatus::Ok,
                state: PoolState::Active,
            },
        );
        self.insert_dataset(name, DatasetKind::FileSystem);
    }

    /// Direct filesystem and volume children of `parent`, by name.
    fn child_datasets(&self, parent: &str) -> Vec<String> {
        let prefix = format!("{}/", parent);
        self.datasets
            .iter()
            .filter(|(name, node)| {
                node.kind != DatasetKind::Snapshot
                    && name
                        .strip_prefix(&prefix)
                        .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Snapshots of `parent`, in name order.
    fn snapshots_of(&self, parent: &str) -> Vec<String> {
        let prefix = format!("{}@", parent);
        self.datasets
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn has_dependents(&self, name: &str) -> bool {
        !self.child_datasets(name).is_empty() || !self.snapshots_of(name).is_empty()
    }

    /// Effective value and source of `prop` on `name`, walking ancestors for
    /// inheritable properties.
    fn effective(&self, name: &str, prop: &str) -> Option<(String, PropSource)> {
        let node = self.datasets.get(name)?;
        match prop {
            "name" => return Some((name.to_string(), PropSource::None)),
            "type" => return Some((node.kind.to_string(), PropSource::None)),
            "createtxg" => return Some((node.createtxg.to_string(), PropSource::None)),
            "mounted" => {
                let v = if node.mounted.is_some() { "yes" } else { "no" };
                return Some((v.to_string(), PropSource::None));
            }
            "origin" => return node.origin.clone().map(|o| (o, PropSource::None)),
            _ => {}
        }
        if let Some(v) = node.props.get(prop) {
            return Some((v.clone(), PropSource::Local));
        }
        if node.kind == DatasetKind::Snapshot {
            return None;
        }
        for ancestor in ancestors(name).into_iter().rev() {
            if let Some(v) = self.datasets.get(ancestor).and_then(|n| n.props.get(prop)) {
                let v = if prop == "mountpoint" && v != "none" && v != "legacy" {
                    format!("{}{}", v, &name[ancestor.len()..])
                } else {
                    v.clone()
                };
                return Some((v, PropSource::Inherited));
            }
        }
        match prop {
            "mountpoint" if node.kind == DatasetKind::FileSystem => {
                Some((format!("/{}", name), PropSource::Default))
            }
            "compression" | "sharenfs" | "sharesmb" | "readonly" => {
                Some(("off".to_string(), PropSource::Default))
            }
            _ => None,
        }
    }

    fn user_props_of(&self, name: &str) -> Vec<(String, String, String)> {
        let mut out: BTreeMap<String, (String, String)> = BTreeMap::new();
        let chain = ancestors(name).into_iter().chain(std::iter::once(name));
        for ds in chain {
            if let Some(node) = self.datasets.get(ds) {
                for (k, v) in node.props.iter().filter(|(k, _)| k.contains(':')) {
                    out.insert(k.clone(), (v.clone(), ds.to_string()));
                }
            }
        }
        out.into_iter()
            .map(|(k, (v, from))| {
                let source = if from == name { "local".to_string() } else { from };
                (k, v, source)
            })
            .collect()
    }

    fn alloc_list(&mut self, unique: bool) -> usize {
        let addr = self.addr();
        self.nvlists.insert(
            addr,
            NvData {
                unique,
                pairs: Vec::new(),
            },
        );
        addr
    }

    fn free_list(&mut self, addr: usize) {
        match self.nvlists.remove(&addr) {
            Some(data) => {
                self.freed.insert(addr);
                for (_, v) in data.pairs {
                    if let NvVal::List(child) = v {
                        self.free_list(child);
                    }
                }
            }
            None if self.freed.contains(&addr) => self.double_frees += 1,
            None => {}
        }
    }

    fn copy_list(&mut self, src: usize) -> Option<usize> {
        let data = self.nvlists.get(&src)?;
        let unique = data.unique;
        let pairs = data.pairs.clone();
        let dst = self.alloc_list(unique);
        let mut copied = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            let v = match v {
                NvVal::List(child) => NvVal::List(self.copy_list(child)?),
                other => other,
            };
            copied.push((k, v));
        }
        if let Some(d) = self.nvlists.get_mut(&dst) {
            d.pairs = copied;
        }
        Some(dst)
    }

    fn add_pair(&mut self, nvl: usize, name: &str, value: NvVal) -> c_int {
        let Some(data) = self.nvlists.get_mut(&nvl) else {
            return libc::EINVAL;
        };
        let mut replaced = Vec::new();
        if data.unique {
            data.pairs.retain(|(k, v)| {
                if k == name {
                    if let NvVal::List(child) = v {
                        replaced.push(*child);
                    }
                    false
                } else {
                    true
                }
            });
        }
        data.pairs.push((name.to_string(), value));
        for child in replaced {
            self.free_list(child);
        }
        0
    }

    fn lookup(&self, nvl: usize, name: &str) -> Result<&NvVal, c_int> {
        let data = self.nvlists.get(&nvl).ok_or(libc::EINVAL)?;
        data.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
            .ok_or(libc::ENOENT)
    }

    /// String pairs of a props list, as given to create/clone/snapshot.
    fn string_pairs(&self, nvl: Option<NvListPtr>) -> Vec<(String, String)> {
        nvl.and_then(|p| self.nvlists.get(&p.addr()))
            .map(|d| {
                d.pairs
                    .iter()
                    .filter_map(|(k, v)| match v {
                        NvVal::Str(s) => Some((k.clone(), s.clone())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `who -> permission names` view of a delegation list.
    fn perm_entries(&self, nvl: usize) -> Vec<(String, Vec<String>)> {
        let Some(data) = self.nvlists.get(&nvl) else {
            return Vec::new();
        };
        data.pairs
            .iter()
            .map(|(who, v)| {
                let perms = match v {
                    NvVal::List(child) => self
                        .nvlists
                        .get(child)
                        .map(|c| c.pairs.iter().map(|(k, _)| k.clone()).collect())
                        .unwrap_or_default(),
                    _ => Vec::new(),
                };
                (who.clone(), perms)
            })
            .collect()
    }

    fn rename_tree(&mut self, from: &str, to: &str) {
        let moved: Vec<String> = self
            .datasets
            .keys()
            .filter(|n| {
                *n == from
                    || n.strip_prefix(from)
                        .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('@'))
            })
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = self.datasets.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                self.datasets.insert(new, node);
            }
        }
        for h in self.zfs_handles.values_mut() {
            if h.name == from {
                h.name = to.to_string();
            }
        }
    }
}

/// In-memory stand-in for libzfs and libnvpair.
///
/// Datasets, pools and nvlists live in process memory. Every entry point
/// is recorded in a call log; nvlist allocations and frees are tracked so
/// leaks and double frees are observable; failures can be injected per
/// entry point or per dataset name.
#[derive(Debug)]
pub struct MemoryZfs {
    symbols: HashSet<String>,
    panicking: HashSet<String>,
    inner: Mutex<Inner>,
}

/// Builder for [`MemoryZfs`].
#[derive(Debug, Default)]
pub struct MemoryZfsBuilder {
    symbols: Vec<String>,
    panicking: Vec<String>,
    pools: Vec<String>,
    fail_alloc: bool,
}

impl MemoryZfsBuilder {
    /// Symbols reported by `has_symbol`.
    pub fn symbols(mut self, symbols: &[&str]) -> Self {
        self.symbols = symbols.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Probing `symbol` panics.
    pub fn panicking_probe(mut self, symbol: &str) -> Self {
        self.panicking.push(symbol.to_string());
        self
    }

    /// A pool with its root filesystem.
    pub fn pool(mut self, name: &str) -> Self {
        self.pools.push(name.to_string());
        self
    }

    /// Every `nvlist_alloc` fails with `ENOMEM`.
    pub fn fail_nvlist_alloc(mut self) -> Self {
        self.fail_alloc = true;
        self
    }

    pub fn build(self) -> MemoryZfs {
        let mut inner = Inner {
            next_addr: 0x1000,
            fail_alloc: self.fail_alloc,
            ..Inner::default()
        };
        for pool in &self.pools {
            inner.insert_pool(pool);
        }
        MemoryZfs {
            symbols: self.symbols.into_iter().collect(),
            panicking: self.panicking.into_iter().collect(),
            inner: Mutex::new(inner),
        }
    }
}

impl Default for MemoryZfs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryZfs {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MemoryZfsBuilder {
        MemoryZfsBuilder::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- fixtures --------------------------------------------------------

    pub fn add_pool(&self, name: &str) {
        self.lock().insert_pool(name);
    }

    pub fn add_filesystem(&self, name: &str) {
        self.lock().insert_dataset(name, DatasetKind::FileSystem);
    }

    pub fn add_volume(&self, name: &str) {
        self.lock().insert_dataset(name, DatasetKind::Volume);
    }

    pub fn add_snapshot(&self, name: &str) {
        self.lock().insert_dataset(name, DatasetKind::Snapshot);
    }

    pub fn set_prop(&self, dataset: &str, prop: &str, value: &str) {
        if let Some(node) = self.lock().datasets.get_mut(dataset) {
            node.props.insert(prop.to_string(), value.to_string());
        }
    }

    pub fn set_pool_status(&self, pool: &str, status: PoolStatus) {
        if let Some(p) = self.lock().pools.get_mut(pool) {
            p.status = status;
        }
    }

    pub fn set_pool_state(&self, pool: &str, state: PoolState) {
        if let Some(p) = self.lock().pools.get_mut(pool) {
            p.state = state;
        }
    }

    /// Opening or creating `name` fails with `EZFS_PERM`.
    pub fn deny(&self, name: &str) {
        self.lock().denied.insert(name.to_string());
    }

    /// Every call to entry point `op` fails with `code`.
    pub fn fail(&self, op: &str, code: ErrorCode) {
        self.lock().failures.insert(op.to_string(), code);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    // --- inspection ------------------------------------------------------

    /// Entry points called so far, as `"<function> <argument>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of logged calls to `function`.
    pub fn call_count(&self, function: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(function))
            .count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().datasets.contains_key(name)
    }

    pub fn datasets(&self) -> Vec<String> {
        self.lock().datasets.keys().cloned().collect()
    }

    pub fn prop(&self, dataset: &str, prop: &str) -> Option<String> {
        self.lock().effective(dataset, prop).map(|(v, _)| v)
    }

    pub fn permissions(&self, dataset: &str) -> BTreeMap<String, BTreeSet<String>> {
        self.lock()
            .datasets
            .get(dataset)
            .map(|n| n.perms.clone())
            .unwrap_or_default()
    }

    pub fn live_libs(&self) -> usize {
        self.lock().libs.len()
    }

    pub fn open_zfs_handles(&self) -> usize {
        self.lock().zfs_handles.len()
    }

    pub fn open_zpool_handles(&self) -> usize {
        self.lock().zpool_handles.len()
    }

    /// Closes of handles that were not open.
    pub fn stray_closes(&self) -> usize {
        self.lock().stray_closes
    }

    pub fn live_nvlists(&self) -> usize {
        self.lock().nvlists.len()
    }

    pub fn double_frees(&self) -> usize {
        self.lock().double_frees
    }
}

fn s(c: &CStr) -> String {
    c.to_string_lossy().into_owned()
}

impl NativeZfs for MemoryZfs {
    fn has_symbol(&self, symbol: &str) -> bool {
        self.lock().calls.push(format!("has_symbol {}", symbol));
        if self.panicking.contains(symbol) {
            panic!("probe of {} failed", symbol);
        }
        self.symbols.contains(symbol)
    }

    fn libzfs_init(&self) -> Option<LibHandle> {
        let mut inner = self.lock();
        inner.calls.push("libzfs_init".to_string());
        if inner.failures.contains_key("libzfs_init") {
            return None;
        }
        let addr = inner.addr();
        inner.libs.insert(addr);
        LibHandle::from_addr(addr)
    }

    fn libzfs_fini(&self, lib: LibHandle) {
        let mut inner = self.lock();
        inner.calls.push("libzfs_fini".to_string());
        if !inner.libs.remove(&lib.addr()) {
            inner.stray_closes += 1;
        }
    }

    fn libzfs_errno(&self, lib: LibHandle) -> c_int {
        self.lock().errors.get(&lib.addr()).map_or(0, |(c, _)| *c)
    }

    fn libzfs_error_description(&self, lib: LibHandle) -> String {
        self.lock()
            .errors
            .get(&lib.addr())
            .map(|(_, d)| d.clone())
            .unwrap_or_else(|| "no error".to_string())
    }

    fn libzfs_print_on_error(&self, _lib: LibHandle, enabled: bool) {
        self.lock()
            .calls
            .push(format!("libzfs_print_on_error {}", enabled));
    }

    fn zfs_open(&self, lib: LibHandle, name: &CStr, types: c_int) -> Option<ZfsHandle> {
        let name = s(name);
        let lib = lib.addr();
        let mut inner = self.lock();
        inner.begin(lib, format!("zfs_open {}", name));
        if inner.injected(lib, "zfs_open", &name).is_some() {
            return None;
        }
        if inner.denied.contains(&name) {
            inner.fail(lib, ErrorCode::Perm, &format!("cannot open '{}'", name));
            return None;
        }
        let kind = match inner.datasets.get(&name) {
            Some(node) => node.kind,
            None => {
                inner.fail(lib, ErrorCode::NoEnt, &format!("cannot open '{}'", name));
                return None;
            }
        };
        if types & kind.tag() == 0 {
            inner.fail(lib, ErrorCode::BadType, &format!("cannot open '{}'", name));
            return None;
        }
        inner.open_handle(lib, &name)
    }

    fn zfs_close(&self, zhp: ZfsHandle) {
        let mut inner = self.lock();
        inner.calls.push(format!("zfs_close {:#x}", zhp.addr()));
        match inner.zfs_handles.remove(&zhp.addr()) {
            Some(h) => {
                if let Some(nvl) = h.user_props {
                    inner.free_list(nvl);
                }
            }
            None => inner.stray_closes += 1,
        }
    }

    fn zfs_get_type(&self, zhp: ZfsHandle) -> c_int {
        let inner = self.lock();
        inner
            .name_of(zhp)
            .and_then(|n| inner.datasets.get(&n))
            .map_or(0, |node| node.kind.tag())
    }

    fn zfs_get_name(&self, zhp: ZfsHandle) -> String {
        self.lock().name_of(zhp).unwrap_or_default()
    }

    fn zfs_dataset_exists(&self, lib: LibHandle, name: &CStr, types: c_int) -> bool {
        let name = s(name);
        let mut inner = self.lock();
        inner.begin(lib.addr(), format!("zfs_dataset_exists {}", name));
        inner
            .datasets
            .get(&name)
            .is_some_and(|node| types & node.kind.tag() != 0)
    }

    fn zfs_create(&self, lib: LibHandle, name: &CStr, kind: c_int, props: Option<NvListPtr>) -> c_int {
        let name = s(name);
        let lib = lib.addr();
        let mut inner = self.lock();
        inner.begin(lib, format!("zfs_create {}", name));
        let what = format!("cannot create '{}'", name);
        if let Some(ret) = inner.injected(lib, "zfs_create", &what) {
            return ret;
        }
        if inner.denied.contains(&name) {
            return inner.fail(lib, ErrorCode::Perm, &what);
        }
        let kind = match DatasetKind::from_tag(kind) {
            Some(k @ (DatasetKind::FileSystem | DatasetKind::Volume)) => k,
            _ => return inner.fail(lib, ErrorCode::BadType, &what),
        };
        if name.contains('@') {
            return inner.fail(lib, ErrorCode::InvalidName, &what);
        }
        if inner.datasets.contains_key(&name) {
            return inner.fail(lib, ErrorCode::Exists, &what);
        }
        let parent_ok = match ancestors(&name).last() {
            Some(parent) => inner.datasets.contains_key(*parent),
            None => false,
        };
        if !parent_ok {
            return inner.fail(lib, ErrorCode::NoEnt, &what);
        }
        let pairs = inner.string_pairs(props);
        inner.insert_dataset(&name, kind);
        if let Some(node) = inner.datasets.get_mut(&name) {
            node.props.extend(pairs);
        }
        0
    }

    fn zfs_destroy(&self, zhp: ZfsHandle, defer: bool, abi: &AbiMode) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        inner.begin(lib, format!("zfs_destroy {} defer={} abi={}", name, defer, abi));
        let what = format!("cannot destroy '{}'", name);
        if let Some(ret) = inner.injected(lib, "zfs_destroy", &what) {
            return ret;
        }
        if inner.has_dependents(&name) {
            return inner.fail(lib, ErrorCode::Exists, &what);
        }
        if inner.datasets.get(&name).is_some_and(|n| n.mounted.is_some()) {
            return inner.fail(lib, ErrorCode::Busy, &what);
        }
        inner.datasets.remove(&name);
        0
    }

    fn zfs_snapshot(
        &self,
        lib: LibHandle,
        path: &CStr,
        recursive: bool,
        props: Option<NvListPtr>,
        abi: &AbiMode,
    ) -> c_int {
        let path = s(path);
        let lib = lib.addr();
        let mut inner = self.lock();
        inner.begin(lib, format!("zfs_snapshot {} recursive={} abi={}", path, recursive, abi));
        let what = format!("cannot create snapshot '{}'", path);
        if let Some(ret) = inner.injected(lib, "zfs_snapshot", &what) {
            return ret;
        }
        let Some((base, snap)) = path.split_once('@') else {
            return inner.fail(lib, ErrorCode::InvalidName, &what);
        };
        if snap.is_empty() || !inner.datasets.contains_key(base) {
            return inner.fail(lib, ErrorCode::NoEnt, &what);
        }
        let mut targets = vec![base.to_string()];
        if recursive {
            let prefix = format!("{}/", base);
            targets.extend(
                inner
                    .datasets
                    .iter()
                    .filter(|(n, node)| n.starts_with(&prefix) && node.kind != DatasetKind::Snapshot)
                    .map(|(n, _)| n.clone()),
            );
        }
        let snaps: Vec<String> = targets.iter().map(|t| format!("{}@{}", t, snap)).collect();
        if snaps.iter().any(|n| inner.datasets.contains_key(n)) {
            return inner.fail(lib, ErrorCode::Exists, &what);
        }
        let pairs = inner.string_pairs(props);
        let txg = inner.next_txg();
        for name in snaps {
            let mut node = Node::new(DatasetKind::Snapshot, txg);
            node.props.extend(pairs.iter().cloned());
            inner.datasets.insert(name, node);
        }
        0
    }

    fn zfs_clone(&self, zhp: ZfsHandle, target: &CStr, props: Option<NvListPtr>) -> c_int {
        let target = s(target);
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(origin) = inner.name_of(zhp) else {
            return FAILED;
        };
        inner.begin(lib, format!("zfs_clone {} {}", origin, target));
        let what = format!("cannot create '{}'", target);
        if let Some(ret) = inner.injected(lib, "zfs_clone", &what) {
            return ret;
        }
        if inner.datasets.get(&origin).map(|n| n.kind) != Some(DatasetKind::Snapshot) {
            return inner.fail(lib, ErrorCode::BadType, &what);
        }
        if inner.datasets.contains_key(&target) {
            return inner.fail(lib, ErrorCode::Exists, &what);
        }
        if pool_of(&target) != pool_of(&origin) {
            return inner.fail(lib, ErrorCode::CrossTarget, &what);
        }
        let parent_ok = ancestors(&target)
            .last()
            .is_some_and(|p| inner.datasets.contains_key(*p));
        if !parent_ok {
            return inner.fail(lib, ErrorCode::NoEnt, &what);
        }
        let pairs = inner.string_pairs(props);
        inner.insert_dataset(&target, DatasetKind::FileSystem);
        if let Some(node) = inner.datasets.get_mut(&target) {
            node.origin = Some(origin);
            node.props.extend(pairs);
        }
        0
    }

    fn zfs_rollback(&self, zhp: ZfsHandle, snap: ZfsHandle, force: bool) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let (Some(name), Some(snap_name)) = (inner.name_of(zhp), inner.name_of(snap)) else {
            return FAILED;
        };
        inner.begin(lib, format!("zfs_rollback {} {} force={}", name, snap_name, force));
        let what = format!("cannot rollback '{}'", name);
        if let Some(ret) = inner.injected(lib, "zfs_rollback", &what) {
            return ret;
        }
        if !snap_name.starts_with(&format!("{}@", name)) {
            return inner.fail(lib, ErrorCode::BadType, &what);
        }
        let Some(txg) = inner.datasets.get(&snap_name).map(|n| n.createtxg) else {
            return inner.fail(lib, ErrorCode::NoEnt, &what);
        };
        let later: Vec<String> = inner
            .snapshots_of(&name)
            .into_iter()
            .filter(|n| inner.datasets.get(n).is_some_and(|node| node.createtxg > txg))
            .collect();
        for n in later {
            inner.datasets.remove(&n);
        }
        0
    }

    fn zfs_rename(
        &self,
        zhp: ZfsHandle,
        target: &CStr,
        recursive: bool,
        force_unmount: bool,
        abi: &AbiMode,
    ) -> c_int {
        let target = s(target);
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        inner.begin(
            lib,
            format!(
                "zfs_rename {} {} recursive={} force={} abi={}",
                name, target, recursive, force_unmount, abi
            ),
        );
        let what = format!("cannot rename '{}'", name);
        if let Some(ret) = inner.injected(lib, "zfs_rename", &what) {
            return ret;
        }
        if inner.datasets.contains_key(&target) {
            return inner.fail(lib, ErrorCode::Exists, &what);
        }
        if pool_of(&target) != pool_of(&name) {
            return inner.fail(lib, ErrorCode::CrossTarget, &what);
        }
        let parent_ok = match target.split_once('@') {
            Some((base, _)) => base == name.split('@').next().unwrap_or(&name),
            None => ancestors(&target)
                .last()
                .is_some_and(|p| inner.datasets.contains_key(*p)),
        };
        if !parent_ok {
            return inner.fail(lib, ErrorCode::NoEnt, &what);
        }
        inner.rename_tree(&name, &target);
        0
    }

    fn zfs_promote(&self, zhp: ZfsHandle) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        inner.begin(lib, format!("zfs_promote {}", name));
        let what = format!("cannot promote '{}'", name);
        if let Some(ret) = inner.injected(lib, "zfs_promote", &what) {
            return ret;
        }
        match inner.datasets.get_mut(&name).and_then(|n| n.origin.take()) {
            Some(_) => 0,
            None => inner.fail(lib, ErrorCode::BadType, &format!("{}: not a cloned filesystem", what)),
        }
    }

    fn zfs_iter_root(&self, lib: LibHandle, f: ZfsIterFn<'_>) -> c_int {
        let roots: Vec<String> = {
            let mut inner = self.lock();
            inner.begin(lib.addr(), "zfs_iter_root".to_string());
            inner
                .pools
                .keys()
                .filter(|p| inner.datasets.contains_key(*p))
                .cloned()
                .collect()
        };
        self.yield_each(lib.addr(), roots, f)
    }

    fn zfs_iter_children(&self, zhp: ZfsHandle, f: ZfsIterFn<'_>, abi: &AbiMode) -> c_int {
        let (lib, names) = {
            let mut inner = self.lock();
            let lib = inner.lib_of(zhp);
            let Some(name) = inner.name_of(zhp) else {
                return FAILED;
            };
            inner.begin(lib, format!("zfs_iter_children {} abi={}", name, abi));
            let mut names = inner.child_datasets(&name);
            names.extend(inner.snapshots_of(&name));
            (lib, names)
        };
        self.yield_each(lib, names, f)
    }

    fn zfs_iter_filesystems(&self, zhp: ZfsHandle, f: ZfsIterFn<'_>, abi: &AbiMode) -> c_int {
        let (lib, names) = {
            let mut inner = self.lock();
            let lib = inner.lib_of(zhp);
            let Some(name) = inner.name_of(zhp) else {
                return FAILED;
            };
            inner.begin(lib, format!("zfs_iter_filesystems {} abi={}", name, abi));
            (lib, inner.child_datasets(&name))
        };
        self.yield_each(lib, names, f)
    }

    fn zfs_iter_snapshots(&self, zhp: ZfsHandle, f: ZfsIterFn<'_>, abi: &AbiMode) -> c_int {
        let (lib, names) = {
            let mut inner = self.lock();
            let lib = inner.lib_of(zhp);
            let Some(name) = inner.name_of(zhp) else {
                return FAILED;
            };
            inner.begin(lib, format!("zfs_iter_snapshots {} abi={}", name, abi));
            (lib, inner.snapshots_of(&name))
        };
        self.yield_each(lib, names, f)
    }

    fn zpool_iter(&self, lib: LibHandle, f: ZpoolIterFn<'_>) -> c_int {
        let pools: Vec<String> = {
            let mut inner = self.lock();
            inner.begin(lib.addr(), "zpool_iter".to_string());
            inner.pools.keys().cloned().collect()
        };
        for pool in pools {
            let zph = {
                let mut inner = self.lock();
                let addr = inner.addr();
                inner.zpool_handles.insert(addr, (pool, lib.addr()));
                ZpoolHandle::from_addr(addr)
            };
            if let Some(zph) = zph {
                let ret = f(zph);
                if ret != 0 {
                    return ret;
                }
            }
        }
        0
    }

    fn zfs_name_to_prop(&self, name: &CStr) -> c_int {
        let name = s(name);
        ZfsProp::ALL
            .iter()
            .position(|p| p.name() == name)
            .map_or(ZPROP_INVAL, |i| i as c_int)
    }

    fn zfs_prop_get(
        &self,
        zhp: ZfsHandle,
        prop: c_int,
        buf: &mut PropBuf,
        source: &mut EnumSlot<PropSource>,
        literal: bool,
    ) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        let Some(prop) = usize::try_from(prop).ok().and_then(|i| ZfsProp::ALL.get(i)) else {
            inner.begin(lib, format!("zfs_prop_get {} {}", name, prop));
            return inner.fail(lib, ErrorCode::BadProp, "invalid property");
        };
        inner.begin(lib, format!("zfs_prop_get {} {} literal={}", name, prop, literal));
        match inner.effective(&name, prop.name()) {
            Some((value, src)) => {
                buf.write(&value);
                source.set(src);
                0
            }
            None => FAILED,
        }
    }

    fn zfs_prop_set(&self, zhp: ZfsHandle, name: &CStr, value: &CStr) -> c_int {
        let (prop, value) = (s(name), s(value));
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(ds) = inner.name_of(zhp) else {
            return FAILED;
        };
        inner.begin(lib, format!("zfs_prop_set {} {}={}", ds, prop, value));
        let what = format!("cannot set property for '{}'", ds);
        if let Some(ret) = inner.injected(lib, "zfs_prop_set", &what) {
            return ret;
        }
        let known = prop.contains(':') || prop.parse::<ZfsProp>().is_ok();
        if !known {
            return inner.fail(lib, ErrorCode::BadProp, &what);
        }
        let readonly = matches!(
            prop.as_str(),
            "type" | "creation" | "used" | "available" | "referenced" | "createtxg" | "name" | "guid"
        );
        if readonly {
            return inner.fail(lib, ErrorCode::PropReadonly, &what);
        }
        match inner.datasets.get_mut(&ds) {
            Some(node) => {
                node.props.insert(prop, value);
                0
            }
            None => inner.fail(lib, ErrorCode::NoEnt, &what),
        }
    }

    fn zfs_prop_inherit(&self, zhp: ZfsHandle, name: &CStr, received: bool, abi: &AbiMode) -> c_int {
        let prop = s(name);
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(ds) = inner.name_of(zhp) else {
            return FAILED;
        };
        inner.begin(
            lib,
            format!("zfs_prop_inherit {} {} received={} abi={}", ds, prop, received, abi),
        );
        let what = format!("cannot inherit {} for '{}'", prop, ds);
        if let Some(ret) = inner.injected(lib, "zfs_prop_inherit", &what) {
            return ret;
        }
        if matches!(prop.as_str(), "type" | "creation" | "used" | "name" | "createtxg") {
            return inner.fail(lib, ErrorCode::PropNonInherit, &what);
        }
        if let Some(node) = inner.datasets.get_mut(&ds) {
            node.props.remove(&prop);
        }
        0
    }

    fn zfs_refresh_properties(&self, zhp: ZfsHandle) {
        let mut inner = self.lock();
        inner.calls.push(format!("zfs_refresh_properties {:#x}", zhp.addr()));
        let cached = inner
            .zfs_handles
            .get_mut(&zhp.addr())
            .and_then(|h| h.user_props.take());
        if let Some(nvl) = cached {
            inner.free_list(nvl);
        }
    }

    fn zfs_get_user_props(&self, zhp: ZfsHandle) -> Option<NvListPtr> {
        let mut inner = self.lock();
        let name = inner.name_of(zhp)?;
        inner.calls.push(format!("zfs_get_user_props {}", name));
        if let Some(cached) = inner.handle(zhp).and_then(|h| h.user_props) {
            return NvListPtr::from_addr(cached);
        }
        let root = inner.alloc_list(true);
        for (key, value, source) in inner.user_props_of(&name) {
            let entry = inner.alloc_list(true);
            inner.add_pair(entry, "value", NvVal::Str(value));
            inner.add_pair(entry, "source", NvVal::Str(source));
            inner.add_pair(root, &key, NvVal::List(entry));
        }
        if let Some(h) = inner.zfs_handles.get_mut(&zhp.addr()) {
            h.user_props = Some(root);
        }
        NvListPtr::from_addr(root)
    }

    fn zfs_get_pool_name(&self, zhp: ZfsHandle) -> String {
        self.lock()
            .name_of(zhp)
            .map(|n| pool_of(&n).to_string())
            .unwrap_or_default()
    }

    fn zfs_is_mounted(&self, zhp: ZfsHandle, mountpoint: &mut Option<String>) -> bool {
        let inner = self.lock();
        let mounted = inner
            .name_of(zhp)
            .and_then(|n| inner.datasets.get(&n))
            .and_then(|node| node.mounted.clone());
        *mountpoint = mounted.clone();
        mounted.is_some()
    }

    fn zfs_mount(&self, zhp: ZfsHandle, options: Option<&CStr>, flags: c_int) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        let opts = options.map(s).unwrap_or_default();
        inner.begin(lib, format!("zfs_mount {} opts={} flags={:#x}", name, opts, flags));
        let what = format!("cannot mount '{}'", name);
        if let Some(ret) = inner.injected(lib, "zfs_mount", &what) {
            return ret;
        }
        let where_ = match inner.effective(&name, "mountpoint") {
            Some((mp, _)) if mp == "none" || mp == "legacy" => return 0,
            Some((mp, _)) => mp,
            None => return inner.fail(lib, ErrorCode::BadType, &what),
        };
        if let Some(node) = inner.datasets.get_mut(&name) {
            node.mounted = Some(where_);
        }
        0
    }

    fn zfs_unmount(&self, zhp: ZfsHandle, mountpoint: Option<&CStr>, flags: c_int) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        let mp = mountpoint.map(s).unwrap_or_default();
        inner.begin(lib, format!("zfs_unmount {} mp={} flags={:#x}", name, mp, flags));
        let what = format!("cannot unmount '{}'", name);
        if let Some(ret) = inner.injected(lib, "zfs_unmount", &what) {
            return ret;
        }
        if let Some(node) = inner.datasets.get_mut(&name) {
            node.mounted = None;
            node.shared.clear();
        }
        0
    }

    fn zfs_share(&self, zhp: ZfsHandle, abi: &AbiMode) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        inner.begin(lib, format!("zfs_share {} abi={}", name, abi));
        let what = format!("cannot share '{}'", name);
        if let Some(ret) = inner.injected(lib, "zfs_share", &what) {
            return ret;
        }
        let enabled: Vec<ShareProtocol> = [ShareProtocol::Nfs, ShareProtocol::Smb]
            .into_iter()
            .filter(|p| {
                inner
                    .effective(&name, p.property().name())
                    .is_some_and(|(v, _)| v != "off")
            })
            .collect();
        if let Some(node) = inner.datasets.get_mut(&name) {
            if node.mounted.is_some() {
                node.shared.extend(enabled);
            }
        }
        0
    }

    fn zfs_unshare(&self, zhp: ZfsHandle, abi: &AbiMode) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        inner.begin(lib, format!("zfs_unshare {} abi={}", name, abi));
        let what = format!("cannot unshare '{}'", name);
        if let Some(ret) = inner.injected(lib, "zfs_unshare", &what) {
            return ret;
        }
        if let Some(node) = inner.datasets.get_mut(&name) {
            node.shared.clear();
        }
        0
    }

    fn zfs_share_proto(&self, zhp: ZfsHandle, proto: ShareProtocol, abi: &AbiMode) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        inner.begin(lib, format!("zfs_share_{} {} abi={}", proto.name(), name, abi));
        let (op, code) = match proto {
            ShareProtocol::Nfs => ("zfs_share_nfs", ErrorCode::ShareNfsFailed),
            ShareProtocol::Smb => ("zfs_share_smb", ErrorCode::ShareSmbFailed),
        };
        let what = format!("cannot share '{}'", name);
        if let Some(ret) = inner.injected(lib, op, &what) {
            return ret;
        }
        match inner.datasets.get_mut(&name) {
            Some(node) if node.mounted.is_some() => {
                node.shared.insert(proto);
                0
            }
            _ => inner.fail(lib, code, &what),
        }
    }

    fn zfs_unshare_proto(&self, zhp: ZfsHandle, proto: ShareProtocol, abi: &AbiMode) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        inner.begin(lib, format!("zfs_unshare_{} {} abi={}", proto.name(), name, abi));
        let op = match proto {
            ShareProtocol::Nfs => "zfs_unshare_nfs",
            ShareProtocol::Smb => "zfs_unshare_smb",
        };
        if let Some(ret) = inner.injected(lib, op, &format!("cannot unshare '{}'", name)) {
            return ret;
        }
        if let Some(node) = inner.datasets.get_mut(&name) {
            node.shared.remove(&proto);
        }
        0
    }

    fn zfs_is_shared(&self, zhp: ZfsHandle) -> bool {
        let inner = self.lock();
        inner
            .name_of(zhp)
            .and_then(|n| inner.datasets.get(&n))
            .is_some_and(|node| !node.shared.is_empty() || node.iscsi)
    }

    fn zfs_share_iscsi(&self, zhp: ZfsHandle) -> c_int {
        self.set_iscsi(zhp, true)
    }

    fn zfs_unshare_iscsi(&self, zhp: ZfsHandle) -> c_int {
        self.set_iscsi(zhp, false)
    }

    fn zfs_perm_set(&self, zhp: ZfsHandle, perms: NvListPtr, abi: &AbiMode) -> c_int {
        self.update_perms(zhp, perms, abi, false)
    }

    fn zfs_perm_remove(&self, zhp: ZfsHandle, perms: NvListPtr, abi: &AbiMode) -> c_int {
        self.update_perms(zhp, perms, abi, true)
    }

    fn zpool_open(&self, lib: LibHandle, name: &CStr) -> Option<ZpoolHandle> {
        let name = s(name);
        let lib = lib.addr();
        let mut inner = self.lock();
        inner.begin(lib, format!("zpool_open {}", name));
        if inner.injected(lib, "zpool_open", &name).is_some() {
            return None;
        }
        if !inner.pools.contains_key(&name) {
            inner.fail(lib, ErrorCode::NoEnt, &format!("cannot open '{}'", name));
            return None;
        }
        let addr = inner.addr();
        inner.zpool_handles.insert(addr, (name, lib));
        ZpoolHandle::from_addr(addr)
    }

    fn zpool_close(&self, zph: ZpoolHandle) {
        let mut inner = self.lock();
        inner.calls.push(format!("zpool_close {:#x}", zph.addr()));
        if inner.zpool_handles.remove(&zph.addr()).is_none() {
            inner.stray_closes += 1;
        }
    }

    fn zpool_get_name(&self, zph: ZpoolHandle) -> String {
        self.lock()
            .zpool_handles
            .get(&zph.addr())
            .map(|(n, _)| n.clone())
            .unwrap_or_default()
    }

    fn zpool_name_to_prop(&self, name: &CStr) -> c_int {
        let name = match s(name).as_str() {
            "used" => "allocated".to_string(),
            "available" => "free".to_string(),
            other => other.to_string(),
        };
        ZpoolProp::ALL
            .iter()
            .position(|p| p.name() == name)
            .map_or(ZPROP_INVAL, |i| i as c_int)
    }

    fn zpool_get_prop(
        &self,
        zph: ZpoolHandle,
        prop: c_int,
        buf: &mut PropBuf,
        source: &mut EnumSlot<PropSource>,
        abi: &AbiMode,
    ) -> c_int {
        let mut inner = self.lock();
        let Some((pool, lib)) = inner.zpool_handles.get(&zph.addr()).cloned() else {
            return FAILED;
        };
        inner.begin(lib, format!("zpool_get_prop {} {} abi={}", pool, prop, abi));
        if let Some(ret) = inner.injected(lib, "zpool_get_prop", &pool) {
            return ret;
        }
        let Some(prop) = usize::try_from(prop).ok().and_then(|i| ZpoolProp::ALL.get(i)) else {
            return inner.fail(lib, ErrorCode::BadProp, "invalid property");
        };
        let value = match prop {
            ZpoolProp::Name => Some(pool.clone()),
            _ => inner
                .pools
                .get(&pool)
                .and_then(|p| p.props.get(prop.name()).cloned()),
        };
        match value {
            Some(v) => {
                buf.write(&v);
                source.set(PropSource::Default);
                0
            }
            None => FAILED,
        }
    }

    fn zpool_get_status(&self, zph: ZpoolHandle, abi: &AbiMode) -> c_int {
        let mut inner = self.lock();
        let Some((pool, lib)) = inner.zpool_handles.get(&zph.addr()).cloned() else {
            return FAILED;
        };
        inner.begin(lib, format!("zpool_get_status {} abi={}", pool, abi));
        inner
            .pools
            .get(&pool)
            .and_then(|p| p.status.to_ordinal(abi))
            .unwrap_or(FAILED)
    }

    fn zpool_get_state(&self, zph: ZpoolHandle, abi: &AbiMode) -> c_int {
        let mut inner = self.lock();
        let Some((pool, lib)) = inner.zpool_handles.get(&zph.addr()).cloned() else {
            return FAILED;
        };
        inner.begin(lib, format!("zpool_get_state {} abi={}", pool, abi));
        inner
            .pools
            .get(&pool)
            .and_then(|p| p.state.to_ordinal(abi))
            .unwrap_or(FAILED)
    }

    fn zpool_disable_datasets(&self, zph: ZpoolHandle, force: bool) -> c_int {
        let mut inner = self.lock();
        let Some((pool, lib)) = inner.zpool_handles.get(&zph.addr()).cloned() else {
            return FAILED;
        };
        inner.begin(lib, format!("zpool_disable_datasets {} force={}", pool, force));
        if let Some(ret) = inner.injected(lib, "zpool_disable_datasets", &pool) {
            return ret;
        }
        for (name, node) in inner.datasets.iter_mut() {
            if pool_of(name) == pool {
                node.mounted = None;
                node.shared.clear();
            }
        }
        0
    }

    fn zpool_export(&self, zph: ZpoolHandle, force: bool, abi: &AbiMode) -> c_int {
        self.export(zph, if force { "force" } else { "gentle" }, abi)
    }

    fn zpool_export_force(&self, zph: ZpoolHandle, abi: &AbiMode) -> c_int {
        self.export(zph, "hardforce", abi)
    }

    fn nvlist_alloc(&self, out: &mut PtrSlot<NvListPtr>, flags: c_uint) -> c_int {
        let mut inner = self.lock();
        inner.calls.push(format!("nvlist_alloc {:#x}", flags));
        if inner.fail_alloc {
            out.set(None);
            return libc::ENOMEM;
        }
        let addr = inner.alloc_list(flags & NV_UNIQUE_NAME != 0);
        out.set(NvListPtr::from_addr(addr));
        0
    }

    fn nvlist_free(&self, nvl: NvListPtr) {
        let mut inner = self.lock();
        inner.calls.push(format!("nvlist_free {:#x}", nvl.addr()));
        inner.free_list(nvl.addr());
    }

    fn nvlist_add_string(&self, nvl: NvListPtr, name: &CStr, value: &CStr) -> c_int {
        self.lock().add_pair(nvl.addr(), &s(name), NvVal::Str(s(value)))
    }

    fn nvlist_add_boolean_value(&self, nvl: NvListPtr, name: &CStr, value: bool) -> c_int {
        self.lock().add_pair(nvl.addr(), &s(name), NvVal::Bool(value))
    }

    fn nvlist_add_boolean(&self, nvl: NvListPtr, name: &CStr) -> c_int {
        self.lock().add_pair(nvl.addr(), &s(name), NvVal::Flag)
    }

    fn nvlist_add_nvlist(&self, nvl: NvListPtr, name: &CStr, value: NvListPtr) -> c_int {
        let mut inner = self.lock();
        let Some(copy) = inner.copy_list(value.addr()) else {
            return libc::EINVAL;
        };
        inner.add_pair(nvl.addr(), &s(name), NvVal::List(copy))
    }

    fn nvlist_lookup_string(&self, nvl: NvListPtr, name: &CStr, out: &mut Option<String>) -> c_int {
        match self.lock().lookup(nvl.addr(), &s(name)) {
            Ok(NvVal::Str(v)) => {
                *out = Some(v.clone());
                0
            }
            Ok(_) => libc::EINVAL,
            Err(errno) => errno,
        }
    }

    fn nvlist_lookup_boolean_value(&self, nvl: NvListPtr, name: &CStr, out: &mut BooleanSlot) -> c_int {
        match self.lock().lookup(nvl.addr(), &s(name)) {
            Ok(NvVal::Bool(v)) => {
                out.set(*v);
                0
            }
            Ok(_) => libc::EINVAL,
            Err(errno) => errno,
        }
    }

    fn nvlist_lookup_nvlist(&self, nvl: NvListPtr, name: &CStr, out: &mut PtrSlot<NvListPtr>) -> c_int {
        match self.lock().lookup(nvl.addr(), &s(name)) {
            Ok(NvVal::List(child)) => {
                out.set(NvListPtr::from_addr(*child));
                0
            }
            Ok(_) => libc::EINVAL,
            Err(errno) => errno,
        }
    }

    fn nvlist_exists(&self, nvl: NvListPtr, name: &CStr) -> bool {
        self.lock().lookup(nvl.addr(), &s(name)).is_ok()
    }

    fn nvlist_names(&self, nvl: NvListPtr) -> Vec<String> {
        self.lock()
            .nvlists
            .get(&nvl.addr())
            .map(|d| d.pairs.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }
}

impl MemoryZfs {
    /// Open a fresh handle per name and hand it to `f` until it returns
    /// nonzero. The lock is not held while `f` runs.
    fn yield_each(&self, lib: usize, names: Vec<String>, f: ZfsIterFn<'_>) -> c_int {
        for name in names {
            let zhp = {
                let mut inner = self.lock();
                if !inner.datasets.contains_key(&name) {
                    continue;
                }
                inner.open_handle(lib, &name)
            };
            let Some(zhp) = zhp else {
                continue;
            };
            let ret = f(zhp);
            if ret != 0 {
                return ret;
            }
        }
        0
    }

    fn set_iscsi(&self, zhp: ZfsHandle, on: bool) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        let op = if on { "zfs_share_iscsi" } else { "zfs_unshare_iscsi" };
        inner.begin(lib, format!("{} {}", op, name));
        let code = if on {
            ErrorCode::ShareIscsiFailed
        } else {
            ErrorCode::UnshareIscsiFailed
        };
        let what = format!("cannot {} '{}'", if on { "share" } else { "unshare" }, name);
        if let Some(ret) = inner.injected(lib, op, &what) {
            return ret;
        }
        match inner.datasets.get_mut(&name) {
            Some(node) if node.kind == DatasetKind::Volume => {
                node.iscsi = on;
                0
            }
            _ => inner.fail(lib, code, &what),
        }
    }

    fn update_perms(&self, zhp: ZfsHandle, perms: NvListPtr, abi: &AbiMode, remove: bool) -> c_int {
        let mut inner = self.lock();
        let lib = inner.lib_of(zhp);
        let Some(name) = inner.name_of(zhp) else {
            return FAILED;
        };
        let op = if remove { "zfs_perm_remove" } else { "zfs_perm_set" };
        inner.begin(lib, format!("{} {} abi={}", op, name, abi));
        let what = format!("cannot update permissions on '{}'", name);
        if let Some(ret) = inner.injected(lib, op, &what) {
            return ret;
        }
        let entries = inner.perm_entries(perms.addr());
        if entries.is_empty() {
            return inner.fail(lib, ErrorCode::BadPerm, &what);
        }
        let Some(node) = inner.datasets.get_mut(&name) else {
            return inner.fail(lib, ErrorCode::NoEnt, &what);
        };
        for (who, names) in entries {
            if remove {
                if let Some(set) = node.perms.get_mut(&who) {
                    for n in &names {
                        set.remove(n);
                    }
                    if names.is_empty() || set.is_empty() {
                        node.perms.remove(&who);
                    }
                }
            } else {
                node.perms.entry(who).or_default().extend(names);
            }
        }
        0
    }

    fn export(&self, zph: ZpoolHandle, mode: &str, abi: &AbiMode) -> c_int {
        let mut inner = self.lock();
        let Some((pool, lib)) = inner.zpool_handles.get(&zph.addr()).cloned() else {
            return FAILED;
        };
        inner.begin(lib, format!("zpool_export {} {} abi={}", pool, mode, abi));
        let what = format!("cannot export '{}'", pool);
        if let Some(ret) = inner.injected(lib, "zpool_export", &what) {
            return ret;
        }
        let busy = inner
            .datasets
            .iter()
            .any(|(n, node)| pool_of(n) == pool && node.mounted.is_some());
        if busy && mode == "gentle" {
            return inner.fail(lib, ErrorCode::Busy, &what);
        }
        inner.pools.remove(&pool);
        inner.datasets.retain(|n, _| pool_of(n) != pool);
        0
    }
}
