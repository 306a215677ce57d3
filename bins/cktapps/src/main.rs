use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use cktdb::{Ckt, ScopeId};
use cktdb_spice::Netlister;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Hierarchy { input } => hierarchy(input),
        Command::Nets { input } => nets(input),
        Command::Flatten { input, out } => flatten(input, out),
    }
}

/// Analyze hierarchical SPICE netlists.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report the instance hierarchy of a cell.
    Hierarchy {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Flatten a cell and report per-net capacitance and fanout.
    Nets {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Flatten a cell and write it back out as SPICE.
    Flatten {
        #[command(flatten)]
        input: InputArgs,
        /// The output path. If unspecified, the netlist goes to stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// SPICE netlist file(s).
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Library file with model (e.g. nch, pch) definitions.
    #[arg(long)]
    lib: Option<PathBuf>,
    /// The cell to analyze (first top cell by default).
    #[arg(long)]
    cell: Option<String>,
}

/// Reads all inputs, links best-effort, and selects the cell to analyze.
fn load(input: &InputArgs) -> anyhow::Result<(Ckt, ScopeId)> {
    let mut ckt = Ckt::new("$root");

    if let Some(lib) = &input.lib {
        let text = std::fs::read_to_string(lib)
            .with_context(|| format!("failed to read library {}", lib.display()))?;
        cktdb_spice::read_spice(&mut ckt, &text)
            .with_context(|| format!("failed to parse library {}", lib.display()))?;
    }
    for file in &input.files {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        cktdb_spice::read_spice(&mut ckt, &text)
            .with_context(|| format!("failed to parse {}", file.display()))?;
    }

    let root = ckt.root();
    let issues = ckt.link_ignoring_errors(root);
    for issue in issues.iter() {
        eprintln!("link: {issue}");
    }

    let cell = match &input.cell {
        Some(name) => ckt
            .scope(root)
            .get_cell(name)
            .with_context(|| format!("no cell named `{name}`"))?,
        None => *ckt
            .get_topcells()
            .first()
            .context("design has no top cell")?,
    };
    Ok((ckt, cell))
}

fn hierarchy(input: InputArgs) -> anyhow::Result<()> {
    let (ckt, cell) = load(&input)?;
    println!("{}", ckt.full_name(cell));
    print_hierarchy(&ckt, cell, 1);
    Ok(())
}

fn print_hierarchy(ckt: &Ckt, cell: ScopeId, depth: usize) {
    for inst in ckt.scope(cell).all_instances() {
        println!("{}{} ({})", "    ".repeat(depth), inst.name(), inst.refname());
        if inst.is_hierarchical() {
            if let Some(child) = inst.reference() {
                print_hierarchy(ckt, child, depth + 1);
            }
        }
    }
}

#[derive(Default)]
struct NetInfo {
    drivers: Vec<String>,
    loads: Vec<String>,
    caps: Vec<String>,
}

/// Per-net capacitance and fanout report over the flattened cell.
///
/// Source/drain pins drive a net, gate pins load it, and explicit
/// capacitor devices add to its wire capacitance. Gate and diffusion
/// capacitance is estimated as `w * l * 0.05` per device.
fn nets(input: InputArgs) -> anyhow::Result<()> {
    let (mut ckt, cell) = load(&input)?;
    ckt.ungroup(cell, None, true)
        .context("failed to flatten the selected cell")?;

    let mut info: BTreeMap<String, NetInfo> = BTreeMap::new();
    for net in ckt.scope(cell).all_nets() {
        info.insert(net.name().to_string(), NetInfo::default());
    }

    let instances: Vec<String> = ckt
        .scope(cell)
        .all_instances()
        .map(|i| i.name().to_string())
        .collect();
    for name in instances {
        let inst = ckt.scope(cell).get_instance(&name)?;
        let is_cap = inst
            .reference()
            .and_then(|id| ckt.scope(id).device_type().cloned())
            .map(|t| t.as_str() == "c")
            .unwrap_or(false);
        let pins: Vec<(Option<String>, String)> = inst
            .pins()
            .iter()
            .map(|p| (p.port().map(|s| s.to_string()), p.net().to_string()))
            .collect();
        for (port, net) in pins {
            let entry = match info.get_mut(&net) {
                Some(entry) => entry,
                None => continue,
            };
            match port.as_deref() {
                _ if is_cap => entry.caps.push(name.clone()),
                Some("s") | Some("d") => entry.drivers.push(name.clone()),
                Some("g") => entry.loads.push(name.clone()),
                _ => {}
            }
        }
    }

    println!(
        "fo: {:<12} {:>8} {:>8} {:>8} fanout=(cnet+cload)/cdriver",
        "net", "cnet", "cload", "cdriver"
    );
    for (net, info) in &info {
        let net_cap: f64 = info
            .caps
            .iter()
            .map(|i| ckt.eval_ref_param(cell, i, "cap").unwrap_or(0.0))
            .sum();
        let driver_cap: f64 = info
            .drivers
            .iter()
            .map(|i| gate_cap(&mut ckt, cell, i))
            .sum();
        let load_cap: f64 = info
            .loads
            .iter()
            .map(|i| gate_cap(&mut ckt, cell, i))
            .sum();
        let fanout = if driver_cap == 0.0 {
            0.0
        } else {
            (net_cap + load_cap) / driver_cap
        };
        println!(
            "fo: {:<12} {:>8.2e} {:>8.2e} {:>8.2e} {:>8.1}",
            net, net_cap, load_cap, driver_cap, fanout
        );
    }
    Ok(())
}

fn gate_cap(ckt: &mut Ckt, cell: ScopeId, inst: &str) -> f64 {
    let w = ckt.eval_ref_param(cell, inst, "w").unwrap_or(0.0);
    let l = ckt.eval_ref_param(cell, inst, "l").unwrap_or(0.0);
    w * l * 0.05
}

fn flatten(input: InputArgs, out: Option<PathBuf>) -> anyhow::Result<()> {
    let (mut ckt, cell) = load(&input)?;
    ckt.ungroup(cell, None, true)
        .context("failed to flatten the selected cell")?;

    if let Some(path) = out {
        let mut file = std::fs::File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        Netlister::new(&ckt, &mut file).export(cell)?;
    } else {
        let mut stdout = io::stdout().lock();
        Netlister::new(&ckt, &mut stdout).export(cell)?;
    }
    Ok(())
}
