//! Value fold registry
//!
//! Tracks every managed value exposed to the native side: which engine owns
//! it, which native handle it pairs with, how aliases of the same value are
//! chained, and which folds are still waiting for their engine. It is only
//! mutated on the event-loop thread.

use crate::error::{BridgeError, BridgeResult};
use crate::fold::{Fold, FoldArena, FoldId, InitFn};
use crate::managed::{Managed, ValueKey};
use crate::native::{EngineAddr, NativeHandle, NativeRuntime, Ownership};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tether_metrics::BridgeStats;

struct EngineRecord {
    /// Root of the alias chain for each value identity.
    values: HashMap<ValueKey, FoldId>,
    destroyed: bool,
}

/// Outcome of resolving a fold's engine.
pub(crate) struct Resolved {
    pub engine: EngineAddr,
    pub value: Managed,
    pub handle: NativeHandle,
    /// Present only the first time a pending fold is resolved.
    pub init: Option<InitFn>,
}

/// Registry of engines, folds and pending folds.
pub struct Registry {
    folds: FoldArena,
    engines: HashMap<EngineAddr, EngineRecord>,
    pending: HashSet<FoldId>,
    stats: Arc<BridgeStats>,
    trace_values: bool,
}

impl Registry {
    pub(crate) fn new(stats: Arc<BridgeStats>, trace_values: bool) -> Self {
        Self {
            folds: FoldArena::new(),
            engines: HashMap::new(),
            pending: HashSet::new(),
            stats,
            trace_values,
        }
    }

    pub(crate) fn add_engine(&mut self, addr: EngineAddr) {
        self.engines.insert(
            addr,
            EngineRecord {
                values: HashMap::new(),
                destroyed: false,
            },
        );
        self.stats.engines_alive(1);
        tracing::debug!(engine = %addr, "engine registered");
    }

    /// Mark an engine destroyed. Returns whether it was released right away,
    /// which happens when no value references it anymore.
    pub(crate) fn destroy_engine(&mut self, addr: EngineAddr) -> BridgeResult<bool> {
        let record = self
            .engines
            .get_mut(&addr)
            .ok_or(BridgeError::UnknownEngine(addr))?;
        if record.destroyed {
            return Ok(false);
        }
        record.destroyed = true;
        if record.values.is_empty() {
            self.release_engine(addr);
            return Ok(true);
        }
        tracing::debug!(engine = %addr, values = record.values.len(), "engine destroyed; draining values");
        Ok(false)
    }

    fn release_engine(&mut self, addr: EngineAddr) {
        self.engines.remove(&addr);
        self.stats.engines_alive(-1);
        tracing::debug!(engine = %addr, "engine released");
        if self.engines.is_empty() && self.pending.is_empty() && self.folds.is_empty() {
            self.folds.reset();
        }
    }

    /// Find or create the native handle for `value` in `engine`.
    pub(crate) fn wrap(
        &mut self,
        runtime: &dyn NativeRuntime,
        engine: EngineAddr,
        value: &Managed,
        owner: Ownership,
        painting: bool,
    ) -> BridgeResult<NativeHandle> {
        let key = value.key()?;
        let record = self
            .engines
            .get(&engine)
            .ok_or(BridgeError::UnknownEngine(engine))?;

        if let Some(root) = record.values.get(&key).copied() {
            let mut cursor = Some(root);
            while let Some(id) = cursor {
                let fold = self.fold(id)?;
                if fold.owner == owner {
                    return Ok(fold.handle);
                }
                cursor = fold.next;
            }
            // TODO: painting reuses a handle of any ownership; decide whether a
            // mismatch here should be reported instead of silently accepted.
            if owner != Ownership::Native || painting {
                return Ok(self.fold(root)?.handle);
            }
        }

        if painting {
            return Err(BridgeError::AllocWhilePainting);
        }

        let parent = (owner == Ownership::Native).then_some(engine);
        let mut fold = Fold::new(value.clone(), key, owner);
        fold.engine = Some(engine);
        let id = self.folds.insert(fold);
        let handle = runtime.new_value(id, value.descriptor(), parent);
        self.fold_mut(id)?.handle = handle;
        self.link(engine, key, id)?;
        self.stats.values_alive(1);

        if self.trace_values {
            tracing::trace!(fold = %id, handle = %handle, value = ?value, "value alive (wrapped)");
        }

        runtime.set_context(engine, handle);
        runtime.set_ownership(engine, handle, owner);
        Ok(handle)
    }

    /// Record a value instantiated natively by a registered type. Its engine
    /// is unknown until a callback supplies one.
    pub(crate) fn type_new(
        &mut self,
        handle: NativeHandle,
        value: Managed,
        init: InitFn,
    ) -> BridgeResult<FoldId> {
        let key = value.key()?;
        let mut fold = Fold::new(value, key, Ownership::Script);
        fold.handle = handle;
        fold.init = Some(init);
        let id = self.folds.insert(fold);
        self.pending.insert(id);
        self.stats.values_alive(1);

        if self.trace_values {
            tracing::trace!(fold = %id, handle = %handle, "value alive (type-created)");
        }
        Ok(id)
    }

    /// Make sure `id` knows its engine, moving it out of the pending set on
    /// first use.
    pub(crate) fn resolve(
        &mut self,
        engine: Option<EngineAddr>,
        id: FoldId,
    ) -> BridgeResult<Resolved> {
        let fold = self.fold(id)?;
        if let Some(known) = fold.engine {
            return Ok(Resolved {
                engine: known,
                value: fold.value.clone(),
                handle: fold.handle,
                init: None,
            });
        }
        let key = fold.key;

        let engine = engine.ok_or(BridgeError::MissingEnginePointer)?;
        if !self.engines.contains_key(&engine) {
            return Err(BridgeError::UnknownEngine(engine));
        }
        if !self.pending.remove(&id) {
            return Err(BridgeError::NotPending);
        }
        self.link(engine, key, id)?;

        let fold = self.fold_mut(id)?;
        fold.engine = Some(engine);
        tracing::trace!(fold = %id, engine = %engine, "pending value resolved");
        Ok(Resolved {
            engine,
            value: fold.value.clone(),
            handle: fold.handle,
            init: fold.init.take(),
        })
    }

    /// Forget a fold after the native side destroyed its handle.
    pub(crate) fn destroy(&mut self, id: FoldId) -> BridgeResult<()> {
        let fold = self.fold(id)?;
        let (engine, key, prev, next) = (fold.engine, fold.key, fold.prev, fold.next);

        match engine {
            None => {
                if !self.pending.remove(&id) {
                    return Err(BridgeError::DestroyedWithoutEngine);
                }
            }
            Some(addr) => {
                // The engine holds state the native side depends on; it must
                // outlive its values.
                let record = self
                    .engines
                    .get_mut(&addr)
                    .ok_or(BridgeError::EngineReleased(addr))?;
                match (prev, next) {
                    (Some(prev), next) => {
                        fold_mut_in(&mut self.folds, prev)?.next = next;
                        if let Some(next) = next {
                            fold_mut_in(&mut self.folds, next)?.prev = Some(prev);
                        }
                    }
                    (None, Some(next)) => {
                        if record.values.get(&key) != Some(&id) {
                            return Err(BridgeError::EngineForgotValue);
                        }
                        record.values.insert(key, next);
                        fold_mut_in(&mut self.folds, next)?.prev = None;
                    }
                    (None, None) => {
                        if record.values.remove(&key) != Some(id) {
                            return Err(BridgeError::EngineForgotValue);
                        }
                        if record.destroyed && record.values.is_empty() {
                            self.release_engine(addr);
                        }
                    }
                }
            }
        }

        if let Some(fold) = self.folds.remove(id) {
            if self.trace_values {
                tracing::trace!(fold = %id, handle = %fold.handle, value = ?fold.value, "value destroyed");
            }
        }
        self.stats.values_alive(-1);
        if self.engines.is_empty() && self.pending.is_empty() && self.folds.is_empty() {
            self.folds.reset();
        }
        Ok(())
    }

    pub(crate) fn value_of(&self, id: FoldId) -> BridgeResult<Managed> {
        Ok(self.fold(id)?.value.clone())
    }

    pub(crate) fn engine_of(&self, id: FoldId) -> BridgeResult<Option<EngineAddr>> {
        Ok(self.fold(id)?.engine)
    }

    /// Handles of every fold wrapping `key`: chained ones first, then pending.
    pub(crate) fn handles_for(&self, key: ValueKey) -> (Vec<NativeHandle>, Vec<NativeHandle>) {
        let mut chained = Vec::new();
        for record in self.engines.values() {
            let mut cursor = record.values.get(&key).copied();
            while let Some(id) = cursor {
                match self.folds.get(id) {
                    Some(fold) => {
                        chained.push(fold.handle);
                        cursor = fold.next;
                    }
                    None => break,
                }
            }
        }
        let pending = self
            .pending
            .iter()
            .filter_map(|id| self.folds.get(*id))
            .filter(|fold| fold.key == key)
            .map(|fold| fold.handle)
            .collect();
        (chained, pending)
    }

    fn link(&mut self, engine: EngineAddr, key: ValueKey, id: FoldId) -> BridgeResult<()> {
        let root = self
            .engines
            .get(&engine)
            .ok_or(BridgeError::UnknownEngine(engine))?
            .values
            .get(&key)
            .copied();
        match root {
            None => {
                if let Some(record) = self.engines.get_mut(&engine) {
                    record.values.insert(key, id);
                }
            }
            Some(root) => {
                let tail = self.tail_of(root)?;
                self.fold_mut(tail)?.next = Some(id);
                self.fold_mut(id)?.prev = Some(tail);
            }
        }
        Ok(())
    }

    fn tail_of(&self, root: FoldId) -> BridgeResult<FoldId> {
        let mut tail = root;
        while let Some(next) = self.fold(tail)?.next {
            tail = next;
        }
        Ok(tail)
    }

    fn fold(&self, id: FoldId) -> BridgeResult<&Fold> {
        self.folds.get(id).ok_or(BridgeError::UnknownFold(id))
    }

    fn fold_mut(&mut self, id: FoldId) -> BridgeResult<&mut Fold> {
        fold_mut_in(&mut self.folds, id)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    pub fn has_engine(&self, addr: EngineAddr) -> bool {
        self.engines.contains_key(&addr)
    }

    pub fn is_engine_destroyed(&self, addr: EngineAddr) -> Option<bool> {
        self.engines.get(&addr).map(|record| record.destroyed)
    }

    pub fn fold_count(&self) -> usize {
        self.folds.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: FoldId) -> bool {
        self.pending.contains(&id)
    }

    pub fn fold_engine(&self, id: FoldId) -> Option<EngineAddr> {
        self.folds.get(id).and_then(|fold| fold.engine)
    }

    pub fn fold_handle(&self, id: FoldId) -> Option<NativeHandle> {
        self.folds.get(id).map(|fold| fold.handle)
    }

    pub fn fold_ownership(&self, id: FoldId) -> Option<Ownership> {
        self.folds.get(id).map(|fold| fold.owner)
    }

    /// Alias chain of `value` in `engine`, root first.
    pub fn chain(&self, engine: EngineAddr, value: &Managed) -> Vec<FoldId> {
        let Ok(key) = value.key() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut cursor = self
            .engines
            .get(&engine)
            .and_then(|record| record.values.get(&key).copied());
        while let Some(id) = cursor {
            out.push(id);
            cursor = self.folds.get(id).and_then(|fold| fold.next);
        }
        out
    }

    /// Number of live folds wrapping `value`, pending ones included.
    pub fn alias_count(&self, value: &Managed) -> usize {
        let Ok(key) = value.key() else {
            return 0;
        };
        self.folds.iter().filter(|(_, fold)| fold.key == key).count()
    }

    /// Verify that every fold sits in exactly one place and that chain links
    /// are mutually consistent.
    pub fn check_integrity(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for (addr, record) in &self.engines {
            for (key, root) in &record.values {
                let mut prev: Option<FoldId> = None;
                let mut cursor = Some(*root);
                while let Some(id) = cursor {
                    let fold = self
                        .folds
                        .get(id)
                        .ok_or_else(|| format!("engine {addr} chains dead fold {id}"))?;
                    if !seen.insert(id) {
                        return Err(format!("fold {id} visited twice"));
                    }
                    if fold.prev != prev {
                        return Err(format!("fold {id} has prev {:?}, expected {:?}", fold.prev, prev));
                    }
                    if fold.engine != Some(*addr) {
                        return Err(format!("fold {id} chained in engine {addr} but owned by {:?}", fold.engine));
                    }
                    if fold.key != *key {
                        return Err(format!("fold {id} chained under a different value"));
                    }
                    prev = Some(id);
                    cursor = fold.next;
                }
            }
        }
        for id in &self.pending {
            let fold = self
                .folds
                .get(*id)
                .ok_or_else(|| format!("pending set holds dead fold {id}"))?;
            if fold.engine.is_some() {
                return Err(format!("pending fold {id} already has an engine"));
            }
            if !seen.insert(*id) {
                return Err(format!("fold {id} is both chained and pending"));
            }
        }
        if seen.len() != self.folds.len() {
            return Err(format!(
                "{} folds alive but only {} reachable",
                self.folds.len(),
                seen.len()
            ));
        }
        Ok(())
    }
}

fn fold_mut_in(folds: &mut FoldArena, id: FoldId) -> BridgeResult<&mut Fold> {
    folds.get_mut(id).ok_or(BridgeError::UnknownFold(id))
}
