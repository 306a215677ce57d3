//! Ungrouping and flattening: structural rewrites that replace a
//! hierarchical instance with a copy of its referenced sub-hierarchy.
//!
//! The rewrite renames the expanded nets and instances under a
//! hierarchical prefix, merges the sub-hierarchy's boundary nets into the
//! nets the instance's pins connect, and re-derives a private parameter
//! context for every copied instance so that two occurrences of the same
//! cell never share evaluated state.

use std::collections::HashMap;

use arcstr::ArcStr;
use indexmap::IndexMap;
use thiserror::Error as ThisError;

use crate::params::{build_inst_ctx, ParamContext, ParamEvalError};
use crate::{Ckt, EntityKind, Error, Pin, ScopeId};

/// Separator joining the hierarchical name components introduced by
/// expansion (`x1/mn`, `x1/int`).
pub const HIER_SEPARATOR: char = '/';

/// An error rewriting a hierarchical instance.
#[derive(Debug, Clone, ThisError)]
pub enum UngroupError {
    /// The instance has not been linked, so its sub-hierarchy is unknown.
    #[error("cannot ungroup `{instance}` in `{scope}` before it is linked")]
    Unlinked {
        /// The name of the instance.
        instance: ArcStr,
        /// Full path of the owning scope.
        scope: String,
    },
    /// A pin of a linked instance has no bound port.
    #[error("pin of instance `{instance}` is not bound to a port")]
    UnboundPin {
        /// The name of the instance.
        instance: ArcStr,
    },
    /// Parameter evaluation failed while re-deriving copied contexts.
    #[error(transparent)]
    Param(#[from] ParamEvalError),
    /// A lookup or insertion failed during the rewrite.
    #[error(transparent)]
    Db(#[from] Error),
}

impl Ckt {
    /// Rewrites one hierarchical instance of `scope` (or, with
    /// `instance == None`, every instance it currently owns) by copying the
    /// referenced sub-hierarchy's nets and instances into `scope` and
    /// deleting the expanded instance.
    ///
    /// With `flatten = false` a single level is expanded; with
    /// `flatten = true` the referenced sub-hierarchy is itself fully
    /// flattened (on a private copy) before being copied in, so no
    /// hierarchical instances remain afterwards.
    ///
    /// Non-hierarchical instances are silently skipped; ungrouping an
    /// unlinked hierarchical instance is an error.
    pub fn ungroup(
        &mut self,
        scope: ScopeId,
        instance: Option<&str>,
        flatten: bool,
    ) -> Result<(), UngroupError> {
        self.ungroup_prefixed(scope, instance, flatten, "")
    }

    /// Like [`ungroup`](Ckt::ungroup), prepending `prefix` to every name
    /// introduced by the expansion.
    pub fn ungroup_prefixed(
        &mut self,
        scope: ScopeId,
        instance: Option<&str>,
        flatten: bool,
        prefix: &str,
    ) -> Result<(), UngroupError> {
        let ctx = self.cell_ctx(scope)?;
        self.ungroup_in(scope, &ctx, instance, flatten, prefix)
    }

    fn ungroup_in(
        &mut self,
        scope: ScopeId,
        scope_ctx: &ParamContext,
        instance: Option<&str>,
        flatten: bool,
        prefix: &str,
    ) -> Result<(), UngroupError> {
        // the rewrite mutates the instance map; iterate over a snapshot
        let names: Vec<ArcStr> = match instance {
            Some(name) => vec![self.scope(scope).get_instance(name)?.name.clone()],
            None => self.scope(scope).instances.keys().cloned().collect(),
        };
        for name in names {
            self.ungroup_instance(scope, scope_ctx, &name, flatten, prefix)?;
        }
        Ok(())
    }

    fn ungroup_instance(
        &mut self,
        scope: ScopeId,
        scope_ctx: &ParamContext,
        name: &ArcStr,
        flatten: bool,
        prefix: &str,
    ) -> Result<(), UngroupError> {
        let (hierarchical, linked, reference) = {
            let inst = self.scope(scope).get_instance(name)?;
            (inst.is_hierarchical, inst.is_linked, inst.reference)
        };
        if !hierarchical {
            return Ok(());
        }
        let target = match (linked, reference) {
            (true, Some(target)) => target,
            _ => {
                return Err(UngroupError::Unlinked {
                    instance: name.clone(),
                    scope: self.full_name(scope),
                })
            }
        };
        tracing::debug!(
            instance = %name,
            scope = %self.full_name(scope),
            flatten,
            "ungrouping instance"
        );

        // context of the referenced scope as seen through this instance:
        // the instance's evaluated overrides win, the referenced scope's
        // declared defaults fill in the rest
        let mut exp_ctx = self.inst_ctx_in(scope, name, scope_ctx)?;
        self.build_cell_ctx_into(target, &mut exp_ctx)?;

        // with flatten, expand a fully flattened *private* copy so sibling
        // occurrences of the same cell never share rewritten state
        let source = if flatten {
            let copy = self.dedup_copy(target);
            self.ungroup_in(copy, &exp_ctx, None, true, "")?;
            copy
        } else {
            target
        };

        let mut port2net: IndexMap<ArcStr, ArcStr> = IndexMap::new();
        {
            let inst = self.scope(scope).get_instance(name)?;
            for pin in inst.pins.iter() {
                let port = pin.port.clone().ok_or_else(|| UngroupError::UnboundPin {
                    instance: name.clone(),
                })?;
                port2net.insert(port, pin.net.clone());
            }
        }

        // boundary nets merge into the nets this instance connects;
        // internal nets are uniquified by hierarchical path
        let source_nets: Vec<ArcStr> = self.scope(source).nets.keys().cloned().collect();
        let mut netname_map: IndexMap<ArcStr, ArcStr> = IndexMap::new();
        for old in source_nets {
            let new = match port2net.get(old.as_str()) {
                Some(net) => net.clone(),
                None => arcstr::format!("{}{}{}{}", prefix, name, HIER_SEPARATOR, old),
            };
            self.scope_mut(scope).add_net(new.clone())?;
            netname_map.insert(old, new);
        }

        let source_insts: Vec<ArcStr> = self.scope(source).instances.keys().cloned().collect();
        for old_name in source_insts {
            let old = self.scope(source).get_instance(&old_name)?.clone();
            let mut pins = Vec::with_capacity(old.pins.len());
            for pin in old.pins.iter() {
                let net = netname_map
                    .get(pin.net.as_str())
                    .ok_or_else(|| Error::NotFound {
                        kind: EntityKind::Net,
                        name: pin.net.clone(),
                        scope: self.scope(source).name.clone(),
                    })?;
                pins.push(Pin::new(pin.port.clone(), net.clone()));
            }

            let mut copy = old;
            copy.name = arcstr::format!("{}{}{}{}", prefix, name, HIER_SEPARATOR, copy.name);
            copy.pins = pins;
            // every occurrence gets its own evaluated context, derived
            // through this instantiation site; instances the recursive
            // flatten already expanded into the private copy carry the
            // context threaded through their own site, which must win over
            // this one
            let threaded = if flatten { copy.resolved.take() } else { None };
            let resolved = match threaded {
                Some(ctx) => ctx,
                None => {
                    let owner = format!("{}/{}", self.full_name(scope), copy.name);
                    build_inst_ctx(&copy, &exp_ctx, &owner)?
                }
            };
            copy.resolved = Some(resolved);
            copy.ref_resolved = None;
            if let Some(r) = copy.reference {
                self.scope_mut(r).ref_count += 1;
            }
            self.scope_mut(scope).insert_instance(copy)?;
        }

        if flatten {
            self.remove_copied_tree(source);
        }
        let target_scope = self.scope_mut(target);
        target_scope.ref_count = target_scope.ref_count.saturating_sub(1);
        self.scope_mut(scope).instances.shift_remove(name.as_str());
        Ok(())
    }

    /// Deep, independent copy of a scope subtree with fresh IDs.
    ///
    /// Nested cell declarations are copied recursively and instance
    /// references into the copied subtree are remapped onto the copies.
    /// Prim references stay pointed at the shared, immutable templates.
    /// Memoized contexts are dropped so each occurrence re-derives its own.
    fn dedup_copy(&mut self, src: ScopeId) -> ScopeId {
        let mut map: HashMap<ScopeId, ScopeId> = HashMap::new();
        let parent = self.scope(src).parent;
        let root = self.copy_scope_rec(src, parent, &mut map);

        let copies: Vec<ScopeId> = map.values().copied().collect();
        for id in copies {
            let mut bumps: Vec<ScopeId> = Vec::new();
            let scope = self.scope_mut(id);
            for (_, inst) in scope.instances.iter_mut() {
                if let Some(r) = inst.reference {
                    let r = map.get(&r).copied().unwrap_or(r);
                    inst.reference = Some(r);
                    bumps.push(r);
                }
                inst.resolved = None;
                inst.ref_resolved = None;
            }
            for r in bumps {
                self.scope_mut(r).ref_count += 1;
            }
        }
        root
    }

    fn copy_scope_rec(
        &mut self,
        src: ScopeId,
        parent: Option<ScopeId>,
        map: &mut HashMap<ScopeId, ScopeId>,
    ) -> ScopeId {
        let id = self.alloc_id();
        map.insert(src, id);
        let mut data = self.scope(src).clone();
        data.parent = parent;
        data.ref_count = 0;
        let children: Vec<(ArcStr, ScopeId)> =
            data.cells.iter().map(|(k, v)| (k.clone(), *v)).collect();
        data.cells.clear();
        self.scopes.insert(id, data);
        for (name, child) in children {
            let cid = self.copy_scope_rec(child, Some(id), map);
            self.scope_mut(id).cells.insert(name, cid);
        }
        id
    }

    /// Removes a copied subtree, decrementing the reference counts its
    /// instances hold on scopes that outlive the copy.
    fn remove_copied_tree(&mut self, root: ScopeId) {
        let children: Vec<ScopeId> = self.scope(root).cells.values().copied().collect();
        for child in children {
            self.remove_copied_tree(child);
        }
        if let Some(scope) = self.scopes.remove(&root) {
            for (_, inst) in scope.instances.iter() {
                if let Some(r) = inst.reference {
                    if let Some(t) = self.scopes.get_mut(&r) {
                        t.ref_count = t.ref_count.saturating_sub(1);
                    }
                }
            }
        }
    }
}
