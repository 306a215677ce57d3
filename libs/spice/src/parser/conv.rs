//! Conversion of parsed SPICE statements into netlist-database
//! construction calls.

use std::collections::HashMap;

use arcstr::ArcStr;
use cktdb::{Ckt, ScopeId};

use super::{Card, Parser, SpiceError, Stmt};

const MOS_PORTS: [&str; 4] = ["s", "g", "d", "b"];

/// Reads SPICE text into a [`Ckt`] database.
///
/// The reader maintains a scope stack (`.subckt`/`.ends` push and pop cell
/// scopes, `.macromodel`/`.endmacromodel` prim scopes) and a table of known
/// macromodel names: an `x` card whose reference is a known macromodel is a
/// device occurrence, not a hierarchical instance, and is wired up against
/// the model's declared port order.
pub struct Reader<'a> {
    ckt: &'a mut Ckt,
    stack: Vec<ScopeId>,
    current: ScopeId,
    macromodels: HashMap<ArcStr, ScopeId>,
    /// Depth of subcircuit definitions being skipped as duplicates.
    skipping: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader targeting the given database.
    ///
    /// Registers the implicit `c` capacitor template (ports `plus minus`,
    /// parameter `cap`) if the design does not declare one, and picks up
    /// macromodels declared by earlier reads (e.g. a model library file).
    pub fn new(ckt: &'a mut Ckt) -> Result<Self, SpiceError> {
        let root = ckt.root();
        if ckt.scope(root).get_prim("c").is_err() {
            ckt.add_prim(root, "c", "c", &["plus", "minus"], &[("cap", "0")])?;
        }
        let macromodels = ckt
            .scope(root)
            .all_prims()
            .map(|id| (ckt.scope(id).name().clone(), id))
            .collect();
        Ok(Self {
            ckt,
            stack: Vec::new(),
            current: root,
            macromodels,
            skipping: 0,
        })
    }

    /// Reads one SPICE source into the database.
    pub fn read(&mut self, source: &str) -> Result<(), SpiceError> {
        let mut parser = Parser::new(source);
        while let Some(stmt) = parser.next_stmt()? {
            self.process(stmt, &parser)?;
        }
        if !self.stack.is_empty() || self.skipping > 0 {
            return Err(SpiceError::Syntax {
                line: parser.line(),
                message: "unterminated .subckt or .macromodel".to_string(),
            });
        }
        Ok(())
    }

    fn process(&mut self, stmt: Stmt, parser: &Parser) -> Result<(), SpiceError> {
        match stmt {
            Stmt::Subckt {
                name,
                ports,
                params,
            } => {
                if self.skipping > 0 {
                    self.skipping += 1;
                    return Ok(());
                }
                let ports: Vec<&str> = ports.iter().map(|p| p.as_str()).collect();
                let params: Vec<(&str, &str)> = params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                match self.ckt.add_cell(self.current, name.clone(), &ports, &params) {
                    Ok(cell) => {
                        self.stack.push(self.current);
                        self.current = cell;
                    }
                    Err(cktdb::Error::NameCollision { .. }) => {
                        tracing::warn!(
                            name = %name,
                            "duplicate subcircuit definition, keeping the first"
                        );
                        self.skipping = 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Stmt::Ends => {
                if self.skipping > 0 {
                    self.skipping -= 1;
                    return Ok(());
                }
                self.current = self.stack.pop().ok_or_else(|| SpiceError::Syntax {
                    line: parser.line(),
                    message: "keyword `.ends` unexpected here".to_string(),
                })?;
            }
            Stmt::Macromodel {
                name,
                device_type,
                ports,
                params,
            } => {
                if self.skipping > 0 {
                    return Ok(());
                }
                let ports: Vec<&str> = if ports.is_empty() {
                    MOS_PORTS.to_vec()
                } else {
                    ports.iter().map(|p| p.as_str()).collect()
                };
                let params: Vec<(&str, &str)> = params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let prim =
                    self.ckt
                        .add_prim(self.current, name.clone(), device_type, &ports, &params)?;
                self.macromodels.insert(name, prim);
                self.stack.push(self.current);
                self.current = prim;
            }
            Stmt::EndMacromodel => {
                if self.skipping > 0 {
                    return Ok(());
                }
                self.current = self.stack.pop().ok_or_else(|| SpiceError::Syntax {
                    line: parser.line(),
                    message: "keyword `.endmacromodel` unexpected here".to_string(),
                })?;
            }
            Stmt::Param { params } => {
                if self.skipping > 0 {
                    return Ok(());
                }
                if self.current == self.ckt.root() {
                    tracing::warn!("ignoring top-level .param: the root scope has no parameters");
                    return Ok(());
                }
                for (k, v) in params {
                    if let Err(e) = self.ckt.scope_mut(self.current).add_param(k, v) {
                        tracing::warn!(error = %e, "skipping parameter");
                    }
                }
            }
            Stmt::Card(card) => {
                if self.skipping > 0 {
                    return Ok(());
                }
                self.process_card(card)?;
            }
        }
        Ok(())
    }

    fn process_card(&mut self, card: Card) -> Result<(), SpiceError> {
        match card {
            Card::Mos {
                name,
                s,
                g,
                d,
                b,
                model,
                params,
            } => {
                let nets = [s, g, d, b];
                self.add_device(name, model, &MOS_PORTS, &nets, params)?;
            }
            Card::Cap {
                name,
                pos,
                neg,
                value,
            } => {
                let nets = [pos, neg];
                let params = vec![(arcstr::literal!("cap"), value)];
                self.add_device(name, arcstr::literal!("c"), &["plus", "minus"], &nets, params)?;
            }
            Card::Subcircuit {
                name,
                nets,
                refname,
                params,
            } => {
                if let Some(&prim) = self.macromodels.get(&refname) {
                    // a device occurrence in x-card form: wire positionally
                    // against the model's declared port order
                    let ports: Vec<ArcStr> = self
                        .ckt
                        .scope(prim)
                        .all_ports()
                        .map(|p| p.name().clone())
                        .collect();
                    let ports: Vec<&str> = ports.iter().map(|p| p.as_str()).collect();
                    self.add_device(name, refname, &ports, &nets, params)?;
                    return Ok(());
                }
                let scope = self.ckt.scope_mut(self.current);
                for net in nets.iter() {
                    scope.add_net(net.clone())?;
                }
                match scope.add_instance(name, refname) {
                    Ok(inst) => {
                        inst.set_hierarchical(true);
                        for net in nets {
                            inst.add_pin(None, net);
                        }
                        for (k, v) in params {
                            if let Err(e) = inst.set_param(k, v) {
                                tracing::warn!(error = %e, "skipping parameter");
                            }
                        }
                    }
                    Err(e @ cktdb::Error::NameCollision { .. }) => {
                        tracing::warn!(error = %e, "skipping duplicate instance");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Adds a primitive-device occurrence: nets are declared as needed and
    /// pins carry the template's port names positionally.
    fn add_device(
        &mut self,
        name: ArcStr,
        refname: ArcStr,
        ports: &[&str],
        nets: &[ArcStr],
        params: Vec<(ArcStr, ArcStr)>,
    ) -> Result<(), SpiceError> {
        let scope = self.ckt.scope_mut(self.current);
        for net in nets.iter() {
            scope.add_net(net.clone())?;
        }
        match scope.add_instance(name, refname) {
            Ok(inst) => {
                for (i, net) in nets.iter().enumerate() {
                    inst.add_pin(ports.get(i).copied(), net.clone());
                }
                for (k, v) in params {
                    if let Err(e) = inst.set_param(k, v) {
                        tracing::warn!(error = %e, "skipping parameter");
                    }
                }
            }
            Err(e @ cktdb::Error::NameCollision { .. }) => {
                tracing::warn!(error = %e, "skipping duplicate instance");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
