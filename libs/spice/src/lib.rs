//! SPICE format adapter for the [`cktdb`] netlist database.
//!
//! [`Reader`] turns SPICE text into construction calls on the database;
//! [`Netlister`] emits a cell (and every subcircuit it references) back out
//! as SPICE, preserving port declaration order, net connectivity as
//! currently resolved, and parameter insertion order.
#![warn(missing_docs)]

pub mod parser;

use std::collections::HashSet;
use std::io::{BufWriter, Write};

use cktdb::{Ckt, Instance, ScopeId};

pub use parser::conv::Reader;
pub use parser::SpiceError;

type Result<T> = std::result::Result<T, std::io::Error>;

/// Reads SPICE text into the given database.
pub fn read_spice(ckt: &mut Ckt, source: &str) -> std::result::Result<(), SpiceError> {
    Reader::new(ckt)?.read(source)
}

/// A SPICE netlister.
pub struct Netlister<'a, W: Write> {
    ckt: &'a Ckt,
    out: BufWriter<&'a mut W>,
}

impl<'a, W: Write> Netlister<'a, W> {
    /// Creates a new SPICE netlister writing to the given output stream.
    pub fn new(ckt: &'a Ckt, out: &'a mut W) -> Self {
        Self {
            ckt,
            out: BufWriter::new(out),
        }
    }

    /// Exports the given cell and every subcircuit it transitively
    /// references (referenced definitions first) to the output stream.
    pub fn export(mut self, cell: ScopeId) -> Result<()> {
        let mut written = HashSet::new();
        self.export_cell(cell, &mut written)?;
        self.out.flush()
    }

    fn export_cell(&mut self, cell: ScopeId, written: &mut HashSet<ScopeId>) -> Result<()> {
        if !written.insert(cell) {
            return Ok(());
        }
        let ckt = self.ckt;
        let children: Vec<ScopeId> = ckt
            .scope(cell)
            .all_instances()
            .filter(|inst| inst.is_hierarchical())
            .filter_map(|inst| inst.reference())
            .collect();
        for child in children {
            self.export_cell(child, written)?;
        }

        let scope = ckt.scope(cell);
        write!(self.out, ".subckt {}", scope.name())?;
        for port in scope.all_ports() {
            write!(self.out, " {}", port.name())?;
        }
        for (name, value) in scope.all_params() {
            write!(self.out, " {}={}", name, value)?;
        }
        writeln!(self.out)?;
        for inst in scope.all_instances() {
            self.write_instance(inst)?;
        }
        writeln!(self.out, ".ends {}", scope.name())?;
        Ok(())
    }

    fn write_instance(&mut self, inst: &Instance) -> Result<()> {
        if self.is_cap(inst) {
            write!(self.out, "{}", inst.name())?;
            for pin in inst.pins() {
                write!(self.out, " {}", pin.net())?;
            }
            if let Ok(value) = inst.get_param("cap") {
                write!(self.out, " {}", value)?;
            }
            writeln!(self.out)?;
            return Ok(());
        }
        // subcircuit and device instances both take the x-card form; the
        // reader routes device references back through the model table
        write!(self.out, "x{}", inst.name())?;
        for pin in inst.pins() {
            write!(self.out, " {}", pin.net())?;
        }
        write!(self.out, " {}", inst.refname())?;
        for (name, value) in inst.all_params() {
            write!(self.out, " {}={}", name, value)?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn is_cap(&self, inst: &Instance) -> bool {
        match inst.reference() {
            Some(id) => self
                .ckt
                .scope(id)
                .device_type()
                .map(|t| t.as_str() == "c")
                .unwrap_or(false),
            None => inst.refname().as_str() == "c",
        }
    }
}
