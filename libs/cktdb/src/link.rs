//! Linking: binding instances to the cells and prims they reference.
//!
//! Resolution walks the enclosing-scope chain (prims are tried before
//! cells, innermost declaration wins) and binding assigns pins to the
//! target's ports positionally, which is why port order is preserved from
//! declaration throughout the database.

use arcstr::ArcStr;
use thiserror::Error;

use crate::{Ckt, ScopeId};

/// An error linking one instance.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// The scope chain was exhausted without finding the referenced name.
    #[error("failed to resolve ref `{refname}` of `{instance}` in cell `{scope}`")]
    UnresolvedReference {
        /// The unresolved reference name.
        refname: ArcStr,
        /// The name of the instance being linked.
        instance: ArcStr,
        /// Full path of the owning cell.
        scope: String,
    },
    /// The instance pin count does not match the target's port count.
    #[error(
        "port count mismatch\n> cell {target} : {ports:?}\n> inst {instance} : {nets:?}"
    )]
    PortCountMismatch {
        /// Full path of the resolved target.
        target: String,
        /// The target's declared port names, in order.
        ports: Vec<ArcStr>,
        /// Full path of the instance being linked.
        instance: String,
        /// The nets connected to the instance's pins, in order.
        nets: Vec<ArcStr>,
    },
    /// A lookup failed while linking.
    #[error(transparent)]
    Db(#[from] crate::Error),
}

/// A collection of link errors gathered by a best-effort link pass.
#[derive(Debug, Clone, Default)]
pub struct LinkIssues {
    issues: Vec<LinkError>,
}

impl LinkIssues {
    /// Creates a new, empty issue set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the given issue, logging it immediately.
    pub fn add(&mut self, issue: LinkError) {
        tracing::warn!(issue = %issue, "link error");
        self.issues.push(issue);
    }

    /// Returns an iterator over all issues in the set.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &LinkError> {
        self.issues.iter()
    }

    /// The number of issues in this set.
    #[inline]
    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// Returns `true` if no link errors were collected.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns `true` if any link error was collected.
    #[inline]
    pub fn has_error(&self) -> bool {
        !self.issues.is_empty()
    }
}

impl IntoIterator for LinkIssues {
    type Item = LinkError;
    type IntoIter = <Vec<LinkError> as IntoIterator>::IntoIter;
    fn into_iter(self) -> Self::IntoIter {
        self.issues.into_iter()
    }
}

impl std::fmt::Display for LinkIssues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for issue in self.issues.iter() {
            writeln!(f, "{}", issue)?;
        }
        Ok(())
    }
}

impl Ckt {
    /// Links `scope` and everything beneath it: nested cell declarations
    /// first, then every instance owned directly by `scope`. Fails on the
    /// first link error.
    pub fn link(&mut self, scope: ScopeId) -> Result<(), LinkError> {
        let cells: Vec<ScopeId> = self.scope(scope).cells.values().copied().collect();
        for cell in cells {
            self.link(cell)?;
        }
        let instances: Vec<ArcStr> = self.scope(scope).instances.keys().cloned().collect();
        for name in instances {
            self.link_instance(scope, &name)?;
        }
        Ok(())
    }

    /// Best-effort variant of [`link`](Ckt::link): per-instance errors are
    /// collected and reported instead of aborting the pass, so downstream
    /// code can proceed with whatever linked successfully.
    pub fn link_ignoring_errors(&mut self, scope: ScopeId) -> LinkIssues {
        let mut issues = LinkIssues::new();
        self.link_collecting(scope, &mut issues);
        issues
    }

    fn link_collecting(&mut self, scope: ScopeId, issues: &mut LinkIssues) {
        let cells: Vec<ScopeId> = self.scope(scope).cells.values().copied().collect();
        for cell in cells {
            self.link_collecting(cell, issues);
        }
        let instances: Vec<ArcStr> = self.scope(scope).instances.keys().cloned().collect();
        for name in instances {
            if let Err(e) = self.link_instance(scope, &name) {
                issues.add(e);
            }
        }
    }

    /// Links one instance. Idempotent: linking an already-linked instance
    /// is a no-op. A failure leaves the instance (and the target's
    /// reference count) untouched.
    fn link_instance(&mut self, scope: ScopeId, name: &str) -> Result<(), LinkError> {
        let (refname, pin_count) = {
            let inst = self.scope(scope).get_instance(name)?;
            if inst.is_linked {
                return Ok(());
            }
            (inst.refname.clone(), inst.pins.len())
        };

        let target = match self.search_scope_prim(scope, &refname) {
            Ok(target) => target,
            Err(_) => self.search_scope_cell(scope, &refname).map_err(|_| {
                LinkError::UnresolvedReference {
                    refname: refname.clone(),
                    instance: name.into(),
                    scope: self.full_name(scope),
                }
            })?,
        };

        let ports: Vec<ArcStr> = self.scope(target).ports.keys().cloned().collect();
        if ports.len() != pin_count {
            let nets = self
                .scope(scope)
                .get_instance(name)?
                .pins
                .iter()
                .map(|pin| pin.net.clone())
                .collect();
            return Err(LinkError::PortCountMismatch {
                target: self.full_name(target),
                ports,
                instance: format!("{}/{}", self.full_name(scope), name),
                nets,
            });
        }

        self.scope_mut(target).ref_count += 1;
        let inst = self.scope_mut(scope).get_instance_mut(name)?;
        for (pin, port) in inst.pins.iter_mut().zip(ports) {
            pin.port = Some(port);
        }
        inst.reference = Some(target);
        inst.is_linked = true;
        tracing::debug!(instance = %name, refname = %refname, "linked instance");
        Ok(())
    }
}
