//! Parameter contexts: lazily evaluated numeric namespaces.
//!
//! Parameter values are symbolic until someone asks for a number. The
//! builders here thread contexts down the scope chain: a scope's context is
//! its ancestors' resolved bindings plus its own declared parameters, an
//! instance's context is its overrides evaluated in the *owning* scope's
//! context, and the referenced scope's context as seen through an instance
//! starts from the instance context (overrides win) and falls back to the
//! referenced scope's declared defaults.
//!
//! Contexts are memoized per instance in owned `Option` fields and are only
//! dropped when a fresh de-duplicated copy of a sub-hierarchy is produced
//! during flattening.

use arcstr::ArcStr;
use indexmap::IndexMap;
use thiserror::Error;

use crate::expr::{self, ExprError};
use crate::{Ckt, Instance, ScopeId};

/// A flat numeric namespace: lowercase parameter name to value, in
/// insertion order.
pub type ParamContext = IndexMap<ArcStr, f64>;

pub(crate) fn ctx_key(name: &str) -> ArcStr {
    if name.bytes().any(|b| b.is_ascii_uppercase()) {
        ArcStr::from(name.to_ascii_lowercase())
    } else {
        ArcStr::from(name)
    }
}

/// An error evaluating a parameter against its context.
#[derive(Debug, Clone, Error)]
pub enum ParamEvalError {
    /// Evaluation of a parameter's symbolic value failed.
    #[error("failed to evaluate parameter `{param}` of `{owner}`: {source}")]
    Eval {
        /// The offending parameter.
        param: ArcStr,
        /// Full path of the cell, prim, or instance owning the parameter.
        owner: String,
        /// The underlying expression error.
        #[source]
        source: ExprError,
    },
    /// The requested parameter is not defined anywhere in the context.
    #[error("parameter `{param}` is not defined for `{owner}`")]
    Undefined {
        /// The requested parameter.
        param: ArcStr,
        /// Full path of the instance queried.
        owner: String,
    },
    /// A referenced-scope context was requested for an unlinked instance.
    #[error("instance `{owner}` must be linked before its ref parameters can be evaluated")]
    Unlinked {
        /// Full path of the instance queried.
        owner: String,
    },
    /// A lookup failed while building the context.
    #[error(transparent)]
    Db(#[from] crate::Error),
}

/// Evaluates an instance's parameter overrides against the owning scope's
/// resolved context, producing the instance's private numeric namespace.
pub(crate) fn build_inst_ctx(
    inst: &Instance,
    cell_ctx: &ParamContext,
    owner: &str,
) -> Result<ParamContext, ParamEvalError> {
    let mut ctx = ParamContext::new();
    for (name, value) in inst.params.iter() {
        let v = expr::evaluate(value, cell_ctx).map_err(|e| ParamEvalError::Eval {
            param: name.clone(),
            owner: owner.to_string(),
            source: e,
        })?;
        ctx.insert(ctx_key(name), v);
    }
    Ok(ctx)
}

impl Ckt {
    /// The chain of scopes from the root down to `scope`, inclusive.
    fn ancestry(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut chain = Vec::new();
        let mut cur = Some(scope);
        while let Some(id) = cur {
            chain.push(id);
            cur = self.scope(id).parent;
        }
        chain.reverse();
        chain
    }

    /// Evaluates the parameters declared on `scope` into `ctx`, in
    /// declaration order, skipping names already present (so overrides
    /// inserted by the caller win). Each expression may reference
    /// earlier-declared parameters of the same scope and anything already
    /// in `ctx`.
    pub(crate) fn build_cell_ctx_into(
        &self,
        scope: ScopeId,
        ctx: &mut ParamContext,
    ) -> Result<(), ParamEvalError> {
        let s = self.scope(scope);
        for (name, value) in s.params.iter() {
            let key = ctx_key(name);
            if ctx.contains_key(key.as_str()) {
                continue;
            }
            let v = expr::evaluate(value, ctx).map_err(|e| ParamEvalError::Eval {
                param: name.clone(),
                owner: self.full_name(scope),
                source: e,
            })?;
            ctx.insert(key, v);
        }
        Ok(())
    }

    /// The fully evaluated parameter context of a scope, threaded from the
    /// root down the enclosing-scope chain.
    pub fn cell_ctx(&self, scope: ScopeId) -> Result<ParamContext, ParamEvalError> {
        let mut ctx = ParamContext::new();
        for id in self.ancestry(scope) {
            self.build_cell_ctx_into(id, &mut ctx)?;
        }
        Ok(ctx)
    }

    /// Like [`inst_ctx`](Ckt::inst_ctx), with the owning scope's context
    /// supplied by the caller (used when a rewrite threads contexts through
    /// copied sub-hierarchies).
    pub(crate) fn inst_ctx_in(
        &mut self,
        scope: ScopeId,
        name: &str,
        cell_ctx: &ParamContext,
    ) -> Result<ParamContext, ParamEvalError> {
        if let Some(ctx) = &self.scope(scope).get_instance(name)?.resolved {
            return Ok(ctx.clone());
        }
        let owner = format!("{}/{}", self.full_name(scope), name);
        let ctx = build_inst_ctx(self.scope(scope).get_instance(name)?, cell_ctx, &owner)?;
        self.scope_mut(scope).get_instance_mut(name)?.resolved = Some(ctx.clone());
        Ok(ctx)
    }

    /// The instance's private numeric namespace: its parameter overrides
    /// evaluated against the owning scope's context. Memoized on the
    /// instance after the first evaluation.
    pub fn inst_ctx(&mut self, scope: ScopeId, name: &str) -> Result<ParamContext, ParamEvalError> {
        if let Some(ctx) = &self.scope(scope).get_instance(name)?.resolved {
            return Ok(ctx.clone());
        }
        let cell_ctx = self.cell_ctx(scope)?;
        self.inst_ctx_in(scope, name, &cell_ctx)
    }

    /// The referenced scope's context as seen through the instance: the
    /// instance context is the inherited base (overrides win), and the
    /// referenced scope's declared defaults fill in the rest. Only valid
    /// once the instance is linked. Memoized on the instance.
    pub fn ref_ctx(&mut self, scope: ScopeId, name: &str) -> Result<ParamContext, ParamEvalError> {
        if let Some(ctx) = &self.scope(scope).get_instance(name)?.ref_resolved {
            return Ok(ctx.clone());
        }
        let inst = self.scope(scope).get_instance(name)?;
        let target = match (inst.is_linked, inst.reference) {
            (true, Some(target)) => target,
            _ => {
                return Err(ParamEvalError::Unlinked {
                    owner: format!("{}/{}", self.full_name(scope), name),
                })
            }
        };
        let mut ctx = self.inst_ctx(scope, name)?;
        self.build_cell_ctx_into(target, &mut ctx)?;
        self.scope_mut(scope).get_instance_mut(name)?.ref_resolved = Some(ctx.clone());
        Ok(ctx)
    }

    /// Evaluates one parameter of the referenced scope as seen through the
    /// instance, e.g. the effective `w` of a device occurrence.
    pub fn eval_ref_param(
        &mut self,
        scope: ScopeId,
        name: &str,
        param: &str,
    ) -> Result<f64, ParamEvalError> {
        let ctx = self.ref_ctx(scope, name)?;
        ctx.get(ctx_key(param).as_str())
            .copied()
            .ok_or_else(|| ParamEvalError::Undefined {
                param: param.into(),
                owner: format!("{}/{}", self.full_name(scope), name),
            })
    }
}
