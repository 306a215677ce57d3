//! Hierarchical circuit-netlist database (CKTDB).
//!
//! An in-memory representation of transistor-level designs described as
//! nested subcircuits (cells), primitive device templates (prims), instances
//! of cells/prims, nets, and ports.
//!
//! The database supports declaration-order scoping: a cell acts as a
//! declaration scope, and instances inside it may reference cells or prims
//! declared in any enclosing scope (innermost declaration wins). Instance
//! references are resolved by the [linker](Ckt::link); per-instance parameter
//! overrides are symbolic expressions evaluated lazily against the chain of
//! enclosing parameter contexts; and hierarchical instances can be rewritten
//! into their owner one level at a time ([`Ckt::ungroup`]) or recursively
//! until no hierarchy remains (flattening).
//!
//! All structures use strings to name ports, nets, and parameters, so the
//! format is easy to populate from netlist readers (e.g. SPICE) and easy to
//! walk from reporting code. Name maps iterate in insertion order, which is
//! what makes positional pin binding and deterministic flattening possible.
//!
//! The database is single-threaded: one [`Ckt`] must not be mutated from
//! multiple threads. Flattening is proportional to the *expanded* instance
//! count, which can be exponential for very deep, very wide hierarchies.
#![warn(missing_docs)]

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use arcstr::ArcStr;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod expr;
mod link;
mod params;
mod ungroup;

#[cfg(test)]
pub(crate) mod tests;

pub use link::{LinkError, LinkIssues};
pub use params::{ParamContext, ParamEvalError};
pub use ungroup::{UngroupError, HIER_SEPARATOR};

/// An opaque scope identifier.
///
/// A scope ID created in the context of one database must *not* be used in
/// the context of another database.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScopeId(u64);

impl Display for ScopeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope{}", self.0)
    }
}

/// The kinds of entities a scope can declare.
///
/// Used in error messages and name validation.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    /// A connection point on a cell or prim.
    Port,
    /// A wire within a scope.
    Net,
    /// A symbolic parameter.
    Param,
    /// A nested cell declaration.
    Cell,
    /// A primitive device template declaration.
    Prim,
    /// An instance of a cell or prim.
    Instance,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Port => write!(f, "port"),
            Self::Net => write!(f, "net"),
            Self::Param => write!(f, "param"),
            Self::Cell => write!(f, "cell"),
            Self::Prim => write!(f, "prim"),
            Self::Instance => write!(f, "instance"),
        }
    }
}

/// Errors arising from construction and lookup operations on the database.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An entity with this name already exists in the owning scope, or a
    /// parameter was re-declared (parameters are write-once).
    #[error("{kind} name `{name}` collides with an existing declaration in `{scope}`")]
    NameCollision {
        /// The kind of entity being added.
        kind: EntityKind,
        /// The colliding name.
        name: ArcStr,
        /// The name of the owning scope.
        scope: ArcStr,
    },
    /// An empty or reserved name was used at construction.
    #[error("invalid {kind} name `{name}`: {reason}")]
    InvalidName {
        /// The kind of entity being added.
        kind: EntityKind,
        /// The offending name.
        name: ArcStr,
        /// Why the name is rejected.
        reason: &'static str,
    },
    /// A lookup failed: no entity of this kind with this name exists.
    #[error("no {kind} named `{name}` in `{scope}`")]
    NotFound {
        /// The kind of entity looked up.
        kind: EntityKind,
        /// The missing name.
        name: ArcStr,
        /// The scope (or scope chain origin) searched.
        scope: ArcStr,
    },
    /// The root scope cannot declare entities of this kind.
    #[error("the root scope cannot declare {kind}s")]
    RootDeclaration {
        /// The kind of entity being added.
        kind: EntityKind,
    },
}

fn check_name(kind: EntityKind, name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidName {
            kind,
            name: ArcStr::new(),
            reason: "names must be non-empty",
        });
    }
    let reserved = matches!(
        kind,
        EntityKind::Port | EntityKind::Net | EntityKind::Cell | EntityKind::Instance
    );
    if reserved && name.eq_ignore_ascii_case("m") {
        return Err(Error::InvalidName {
            kind,
            name: name.into(),
            reason: "`m` is reserved for the multiplier parameter",
        });
    }
    Ok(())
}

/// A named connection point declared on a cell or prim.
///
/// Ports are immutable after creation and unique within their owning scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    name: ArcStr,
}

impl Port {
    /// The name of this port.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }
}

/// A named wire within a scope.
///
/// A net declared with a port's name is implicitly the net visible at that
/// port from outside the scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Net {
    name: ArcStr,
}

impl Net {
    /// The name of this net.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }
}

/// The association of one instance pin position with a net in the owning
/// scope, and (once linked) with a port of the referenced scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    port: Option<ArcStr>,
    net: ArcStr,
}

impl Pin {
    pub(crate) fn new(port: Option<ArcStr>, net: ArcStr) -> Self {
        Self { port, net }
    }

    /// The name of the bound port, if this pin has been bound.
    ///
    /// Pins created position-only (port unknown until the reference is
    /// resolved) return [`None`] until the owning instance is linked.
    #[inline]
    pub fn port(&self) -> Option<&ArcStr> {
        self.port.as_ref()
    }

    /// The name of the connected net in the instance's owning scope.
    #[inline]
    pub fn net(&self) -> &ArcStr {
        &self.net
    }
}

/// A named reference to a cell or prim, connected via pins to nets in its
/// owning scope.
///
/// Lifecycle: created during cell construction, then linked (reference
/// resolved, pins bound positionally), then optionally ungrouped (destroyed;
/// its sub-hierarchy is copied into the owner).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub(crate) name: ArcStr,
    pub(crate) refname: ArcStr,
    pub(crate) reference: Option<ScopeId>,
    pub(crate) pins: Vec<Pin>,
    pub(crate) params: IndexMap<ArcStr, ArcStr>,
    pub(crate) is_hierarchical: bool,
    pub(crate) is_linked: bool,
    /// Memoized numeric namespace of this instance's own parameter
    /// overrides. Owned by the instance; dropped only when a fresh
    /// de-duplicated copy is produced during flattening.
    pub(crate) resolved: Option<ParamContext>,
    /// Memoized numeric namespace of the referenced scope as seen through
    /// this instance.
    pub(crate) ref_resolved: Option<ParamContext>,
}

impl Instance {
    fn new(name: ArcStr, refname: ArcStr) -> Self {
        Self {
            name,
            refname,
            reference: None,
            pins: Vec::new(),
            params: IndexMap::new(),
            is_hierarchical: false,
            is_linked: false,
            resolved: None,
            ref_resolved: None,
        }
    }

    /// The name of this instance.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The name of the referenced cell or prim.
    #[inline]
    pub fn refname(&self) -> &ArcStr {
        &self.refname
    }

    /// The resolved referenced scope, populated by linking.
    #[inline]
    pub fn reference(&self) -> Option<ScopeId> {
        self.reference
    }

    /// Whether this instance references a cell (as opposed to a prim).
    ///
    /// Set by the constructor of the design (typically a format reader),
    /// which knows how the instance was declared.
    #[inline]
    pub fn is_hierarchical(&self) -> bool {
        self.is_hierarchical
    }

    /// Marks this instance as referencing a cell rather than a prim.
    #[inline]
    pub fn set_hierarchical(&mut self, hierarchical: bool) {
        self.is_hierarchical = hierarchical;
    }

    /// Whether this instance has been linked.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.is_linked
    }

    /// Appends a pin connecting `net` in the owning scope.
    ///
    /// `port` may be [`None`] for position-only bindings; the linker assigns
    /// ports positionally from the referenced scope's declaration order.
    pub fn add_pin(&mut self, port: Option<&str>, net: impl Into<ArcStr>) {
        self.pins.push(Pin::new(port.map(ArcStr::from), net.into()));
    }

    /// The pins of this instance, in declaration order.
    #[inline]
    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    /// All pins of this instance, in declaration order.
    #[inline]
    pub fn all_pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins.iter()
    }

    /// The pin bound to the named port, if any.
    pub fn get_pin(&self, port: &str) -> Option<&Pin> {
        self.pins
            .iter()
            .find(|pin| pin.port.as_deref() == Some(port))
    }

    /// Sets a parameter override. Parameters are write-once: re-declaring
    /// an existing parameter fails with [`Error::NameCollision`].
    pub fn set_param(&mut self, name: impl Into<ArcStr>, value: impl Into<ArcStr>) -> Result<(), Error> {
        let name = name.into();
        check_name(EntityKind::Param, &name)?;
        if self.params.contains_key(name.as_str()) {
            return Err(Error::NameCollision {
                kind: EntityKind::Param,
                name,
                scope: self.name.clone(),
            });
        }
        self.params.insert(name, value.into());
        Ok(())
    }

    /// The symbolic value of a parameter override.
    pub fn get_param(&self, name: &str) -> Result<&ArcStr, Error> {
        self.params.get(name).ok_or_else(|| Error::NotFound {
            kind: EntityKind::Param,
            name: name.into(),
            scope: self.name.clone(),
        })
    }

    /// All parameter overrides as `(name, symbolic value)` pairs, in
    /// insertion order.
    #[inline]
    pub fn all_params(&self) -> impl Iterator<Item = (&ArcStr, &ArcStr)> {
        self.params.iter()
    }
}

/// The variant of a [`Scope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScopeKind {
    /// The unique root scope of a database.
    Root,
    /// A (possibly hierarchical) circuit building block.
    Cell,
    /// A primitive, non-decomposable device template.
    Prim {
        /// The device-type tag (e.g. `mos`, `c`).
        device_type: ArcStr,
    },
}

/// A named declaration scope: ports, nets, parameters, instances, and
/// nested cell/prim declarations, all in insertion order.
///
/// A scope owns all of its directly declared children; the parent link is
/// non-owning. The root scope of a [`Ckt`] carries no ports or parameters
/// of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub(crate) name: ArcStr,
    pub(crate) kind: ScopeKind,
    pub(crate) parent: Option<ScopeId>,
    pub(crate) ports: IndexMap<ArcStr, Port>,
    pub(crate) nets: IndexMap<ArcStr, Net>,
    pub(crate) params: IndexMap<ArcStr, ArcStr>,
    pub(crate) cells: IndexMap<ArcStr, ScopeId>,
    pub(crate) prims: IndexMap<ArcStr, ScopeId>,
    pub(crate) instances: IndexMap<ArcStr, Instance>,
    /// Number of linked instances pointing at this scope.
    pub(crate) ref_count: u32,
}

impl Scope {
    fn new(name: ArcStr, kind: ScopeKind, parent: Option<ScopeId>) -> Self {
        Self {
            name,
            kind,
            parent,
            ports: IndexMap::new(),
            nets: IndexMap::new(),
            params: IndexMap::new(),
            cells: IndexMap::new(),
            prims: IndexMap::new(),
            instances: IndexMap::new(),
            ref_count: 0,
        }
    }

    /// The name of this scope.
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The scope that declared this scope, if any.
    #[inline]
    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Whether this scope is the database root.
    #[inline]
    pub fn is_root(&self) -> bool {
        matches!(self.kind, ScopeKind::Root)
    }

    /// Whether this scope is a primitive device template.
    #[inline]
    pub fn is_prim(&self) -> bool {
        matches!(self.kind, ScopeKind::Prim { .. })
    }

    /// The device-type tag, for prim scopes.
    pub fn device_type(&self) -> Option<&ArcStr> {
        match &self.kind {
            ScopeKind::Prim { device_type } => Some(device_type),
            _ => None,
        }
    }

    /// The number of linked instances pointing at this scope.
    #[inline]
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Declares a port on this scope.
    pub fn add_port(&mut self, name: impl Into<ArcStr>) -> Result<&Port, Error> {
        let name = name.into();
        check_name(EntityKind::Port, &name)?;
        if self.is_root() {
            return Err(Error::RootDeclaration {
                kind: EntityKind::Port,
            });
        }
        if self.ports.contains_key(name.as_str()) {
            return Err(Error::NameCollision {
                kind: EntityKind::Port,
                name,
                scope: self.name.clone(),
            });
        }
        self.ports.insert(name.clone(), Port { name: name.clone() });
        Ok(self.ports.get(name.as_str()).unwrap())
    }

    /// Declares a net on this scope, reusing an existing net of the same
    /// name if one is already present.
    pub fn add_net(&mut self, name: impl Into<ArcStr>) -> Result<&Net, Error> {
        let name = name.into();
        check_name(EntityKind::Net, &name)?;
        if !self.nets.contains_key(name.as_str()) {
            self.nets.insert(name.clone(), Net { name: name.clone() });
        }
        Ok(self.nets.get(name.as_str()).unwrap())
    }

    /// Declares a parameter with a symbolic value. Parameters are
    /// write-once: re-declaring fails with [`Error::NameCollision`].
    pub fn add_param(&mut self, name: impl Into<ArcStr>, value: impl Into<ArcStr>) -> Result<(), Error> {
        let name = name.into();
        check_name(EntityKind::Param, &name)?;
        if self.is_root() {
            return Err(Error::RootDeclaration {
                kind: EntityKind::Param,
            });
        }
        if self.params.contains_key(name.as_str()) {
            return Err(Error::NameCollision {
                kind: EntityKind::Param,
                name,
                scope: self.name.clone(),
            });
        }
        self.params.insert(name, value.into());
        Ok(())
    }

    /// Creates a new, unlinked instance referencing `refname`.
    ///
    /// Returns a mutable handle so the caller can add pins, parameter
    /// overrides, and the hierarchical flag.
    pub fn add_instance(
        &mut self,
        name: impl Into<ArcStr>,
        refname: impl Into<ArcStr>,
    ) -> Result<&mut Instance, Error> {
        let name = name.into();
        check_name(EntityKind::Instance, &name)?;
        if self.instances.contains_key(name.as_str()) {
            return Err(Error::NameCollision {
                kind: EntityKind::Instance,
                name,
                scope: self.name.clone(),
            });
        }
        let inst = Instance::new(name.clone(), refname.into());
        self.instances.insert(name.clone(), inst);
        Ok(self.instances.get_mut(name.as_str()).unwrap())
    }

    /// Inserts a fully formed instance, failing on name collision.
    pub(crate) fn insert_instance(&mut self, inst: Instance) -> Result<(), Error> {
        if self.instances.contains_key(inst.name.as_str()) {
            return Err(Error::NameCollision {
                kind: EntityKind::Instance,
                name: inst.name.clone(),
                scope: self.name.clone(),
            });
        }
        self.instances.insert(inst.name.clone(), inst);
        Ok(())
    }

    fn not_found(&self, kind: EntityKind, name: &str) -> Error {
        Error::NotFound {
            kind,
            name: name.into(),
            scope: self.name.clone(),
        }
    }

    /// The named port.
    pub fn get_port(&self, name: &str) -> Result<&Port, Error> {
        self.ports
            .get(name)
            .ok_or_else(|| self.not_found(EntityKind::Port, name))
    }

    /// The named net.
    pub fn get_net(&self, name: &str) -> Result<&Net, Error> {
        self.nets
            .get(name)
            .ok_or_else(|| self.not_found(EntityKind::Net, name))
    }

    /// The symbolic value of the named parameter.
    pub fn get_param(&self, name: &str) -> Result<&ArcStr, Error> {
        self.params
            .get(name)
            .ok_or_else(|| self.not_found(EntityKind::Param, name))
    }

    /// The named instance.
    pub fn get_instance(&self, name: &str) -> Result<&Instance, Error> {
        self.instances
            .get(name)
            .ok_or_else(|| self.not_found(EntityKind::Instance, name))
    }

    /// The named instance, mutably.
    pub fn get_instance_mut(&mut self, name: &str) -> Result<&mut Instance, Error> {
        if !self.instances.contains_key(name) {
            return Err(self.not_found(EntityKind::Instance, name));
        }
        Ok(self.instances.get_mut(name).unwrap())
    }

    /// The named directly declared cell.
    pub fn get_cell(&self, name: &str) -> Result<ScopeId, Error> {
        self.cells
            .get(name)
            .copied()
            .ok_or_else(|| self.not_found(EntityKind::Cell, name))
    }

    /// The named directly declared prim.
    pub fn get_prim(&self, name: &str) -> Result<ScopeId, Error> {
        self.prims
            .get(name)
            .copied()
            .ok_or_else(|| self.not_found(EntityKind::Prim, name))
    }

    /// Iterates over the ports of this scope in declaration order.
    #[inline]
    pub fn all_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    /// Iterates over the nets of this scope in declaration order.
    #[inline]
    pub fn all_nets(&self) -> impl Iterator<Item = &Net> {
        self.nets.values()
    }

    /// Iterates over `(name, symbolic value)` parameter pairs in
    /// declaration order.
    #[inline]
    pub fn all_params(&self) -> impl Iterator<Item = (&ArcStr, &ArcStr)> {
        self.params.iter()
    }

    /// Iterates over the instances of this scope in declaration order.
    #[inline]
    pub fn all_instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    /// Iterates over the directly declared cells in declaration order.
    #[inline]
    pub fn all_cells(&self) -> impl Iterator<Item = ScopeId> + '_ {
        self.cells.values().copied()
    }

    /// Iterates over the directly declared prims in declaration order.
    #[inline]
    pub fn all_prims(&self) -> impl Iterator<Item = ScopeId> + '_ {
        self.prims.values().copied()
    }
}

/// The circuit netlist database: the unique root scope plus every cell and
/// prim scope declared beneath it.
///
/// All scopes live in one arena keyed by [`ScopeId`]; parent and reference
/// links are non-owning IDs into the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ckt {
    /// The current ID counter. Incremented before assigning a new ID.
    scope_id: u64,
    root: ScopeId,
    scopes: HashMap<ScopeId, Scope>,
}

impl Ckt {
    /// Creates a new database whose root scope has the given name.
    pub fn new(name: impl Into<ArcStr>) -> Self {
        let root = ScopeId(0);
        let mut scopes = HashMap::new();
        scopes.insert(root, Scope::new(name.into(), ScopeKind::Root, None));
        Self {
            scope_id: 0,
            root,
            scopes,
        }
    }

    /// The root scope of the design.
    #[inline]
    pub fn root(&self) -> ScopeId {
        self.root
    }

    pub(crate) fn alloc_id(&mut self) -> ScopeId {
        self.scope_id += 1;
        ScopeId(self.scope_id)
    }

    /// Gets the scope with the given ID.
    ///
    /// # Panics
    ///
    /// Panics if no scope has the given ID.
    /// For a non-panicking alternative, see [`try_scope`](Ckt::try_scope).
    pub fn scope(&self, id: ScopeId) -> &Scope {
        self.scopes.get(&id).unwrap()
    }

    /// Gets the scope with the given ID.
    #[inline]
    pub fn try_scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(&id)
    }

    /// Gets the scope with the given ID, mutably.
    ///
    /// # Panics
    ///
    /// Panics if no scope has the given ID.
    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        self.scopes.get_mut(&id).unwrap()
    }

    /// Declares a cell in `parent`, declaring its ports and the nets
    /// implicitly visible at those ports.
    pub fn add_cell(
        &mut self,
        parent: ScopeId,
        name: impl Into<ArcStr>,
        ports: &[&str],
        params: &[(&str, &str)],
    ) -> Result<ScopeId, Error> {
        let name = name.into();
        check_name(EntityKind::Cell, &name)?;
        if self.scope(parent).cells.contains_key(name.as_str()) {
            return Err(Error::NameCollision {
                kind: EntityKind::Cell,
                name,
                scope: self.scope(parent).name.clone(),
            });
        }
        let mut scope = Scope::new(name.clone(), ScopeKind::Cell, Some(parent));
        for port in ports {
            scope.add_port(*port)?;
            scope.add_net(*port)?;
        }
        for (k, v) in params {
            scope.add_param(*k, *v)?;
        }
        let id = self.alloc_id();
        self.scopes.insert(id, scope);
        self.scope_mut(parent).cells.insert(name, id);
        Ok(id)
    }

    /// Declares a primitive device template in `parent`.
    pub fn add_prim(
        &mut self,
        parent: ScopeId,
        name: impl Into<ArcStr>,
        device_type: impl Into<ArcStr>,
        ports: &[&str],
        params: &[(&str, &str)],
    ) -> Result<ScopeId, Error> {
        let name = name.into();
        check_name(EntityKind::Prim, &name)?;
        if self.scope(parent).prims.contains_key(name.as_str()) {
            return Err(Error::NameCollision {
                kind: EntityKind::Prim,
                name,
                scope: self.scope(parent).name.clone(),
            });
        }
        let mut scope = Scope::new(
            name.clone(),
            ScopeKind::Prim {
                device_type: device_type.into(),
            },
            Some(parent),
        );
        for port in ports {
            scope.add_port(*port)?;
        }
        for (k, v) in params {
            scope.add_param(*k, *v)?;
        }
        let id = self.alloc_id();
        self.scopes.insert(id, scope);
        self.scope_mut(parent).prims.insert(name, id);
        Ok(id)
    }

    /// The `/`-joined path from the root scope to this scope.
    pub fn full_name(&self, scope: ScopeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = self.scope(id);
            parts.push(s.name.as_str());
            cur = s.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Resolves a cell name by walking the enclosing-scope chain, innermost
    /// first. Used only while linking unresolved instance references.
    pub fn search_scope_cell(&self, scope: ScopeId, name: &str) -> Result<ScopeId, Error> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if let Some(&cell) = self.scope(id).cells.get(name) {
                return Ok(cell);
            }
            cur = self.scope(id).parent;
        }
        Err(Error::NotFound {
            kind: EntityKind::Cell,
            name: name.into(),
            scope: self.full_name(scope).into(),
        })
    }

    /// Resolves a prim name by walking the enclosing-scope chain, innermost
    /// first. Used only while linking unresolved instance references.
    pub fn search_scope_prim(&self, scope: ScopeId, name: &str) -> Result<ScopeId, Error> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if let Some(&prim) = self.scope(id).prims.get(name) {
                return Ok(prim);
            }
            cur = self.scope(id).parent;
        }
        Err(Error::NotFound {
            kind: EntityKind::Prim,
            name: name.into(),
            scope: self.full_name(scope).into(),
        })
    }

    /// The design entry points: cells declared directly on the root that no
    /// linked instance references.
    pub fn get_topcells(&self) -> Vec<ScopeId> {
        self.scope(self.root)
            .all_cells()
            .filter(|&id| self.scope(id).ref_count == 0)
            .collect()
    }
}
