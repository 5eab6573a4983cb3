//! Command-line host for rtoscope.
//!
//! Opens a target (a JSON snapshot, or a live chip through a debug probe),
//! detects the kernel running on it and prints its tables.

#![allow(missing_docs)]

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use rtoscope_core::format::{hex32, parse_number};
use rtoscope_core::kernel::{providers, KernelSpec};
use rtoscope_core::provider::OsProvider;
use rtoscope_core::{
    Address, Attachment, AwarenessCommand, AwarenessEvent, AwarenessHandle, Config, DetectionState, LayoutTarget,
    Snapshot, SymbolTable, TableView, TargetAccess, TypeRegistry,
};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "rtoscope", author, version, about, long_about = None)]
pub struct Cli {
    /// Memory snapshot (JSON) to inspect instead of a live target
    #[arg(long, global = true)]
    pub snapshot: Option<PathBuf>,

    /// Chip to attach to through a debug probe
    #[cfg(feature = "hardware")]
    #[arg(long, global = true)]
    pub chip: Option<String>,

    /// Index of probe to use
    #[cfg(feature = "hardware")]
    #[arg(long, global = true, default_value_t = 0)]
    pub probe_index: usize,

    /// Firmware ELF to take symbols from
    #[arg(long, global = true)]
    pub elf: Option<PathBuf>,

    /// Config file (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List known kernels
    Kernels {
        /// Print the named kernel's spec as JSON
        #[arg(long)]
        dump: Option<String>,
    },
    /// Detect the kernel on the target
    Detect,
    /// Print kernel tables
    Tables {
        /// Only this table
        #[arg(long)]
        table: Option<String>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the registers a suspended task saved on its stack
    Context {
        /// Address of the task's control block
        address: String,
    },
    /// Refresh tables repeatedly
    Watch {
        /// Stop after this many refreshes (0 runs until interrupted)
        #[arg(long, default_value_t = 0)]
        count: u64,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let specs = config.kernel_specs()?;

    if let Command::Kernels { dump } = &cli.command {
        return kernels(&specs, dump.as_deref());
    }

    let providers = providers(specs, config.limits).context("Invalid kernel spec")?;
    let mut target = open_target(&cli)?;

    match cli.command {
        Command::Kernels { .. } => Ok(()),
        Command::Detect => {
            match Attachment::detect(&providers, target.as_mut()) {
                Some(attachment) => println!("{}: {}", attachment.kernel(), attachment.state()),
                None => println!("No supported kernel found"),
            }
            Ok(())
        }
        Command::Tables { table, json } => {
            let attachment = attach(&providers, target.as_mut())?;
            let views = match table {
                Some(id) => match attachment.refresh_table(&id, target.as_mut())? {
                    Some(view) => vec![view],
                    None => bail!("{} has no table `{id}`", attachment.kernel()),
                },
                None => attachment.refresh(target.as_mut())?,
            };
            print_views(&views, json)
        }
        Command::Context { address } => {
            let task = Address::new(parse_number(&address).with_context(|| format!("Bad address `{address}`"))?);
            let attachment = attach(&providers, target.as_mut())?;
            let registers = attachment
                .context(target.as_mut(), task)
                .with_context(|| format!("{} does not expose task context", attachment.kernel()))?
                .with_context(|| format!("Cannot read context of task {task}"))?;
            for register in registers {
                println!("{:>10} {}", register.name, hex32(register.value));
            }
            Ok(())
        }
        Command::Watch { count } => watch(target, providers, &config, count),
    }
}

fn kernels(specs: &[KernelSpec], dump: Option<&str>) -> Result<()> {
    if let Some(name) = dump {
        let spec = specs.iter().find(|s| s.name == name).with_context(|| format!("Unknown kernel `{name}`"))?;
        println!("{}", spec.to_json()?);
        return Ok(());
    }
    for spec in specs {
        let tables: Vec<&str> = spec.tables.iter().map(|t| t.id.as_str()).collect();
        println!("{:<12} {}", spec.name, tables.join(", "));
    }
    Ok(())
}

fn symbols(cli: &Cli, snapshot: Option<&Snapshot>) -> Result<SymbolTable> {
    let mut symbols = match &cli.elf {
        Some(path) => SymbolTable::from_elf(path)?,
        None => SymbolTable::new(),
    };
    if let Some(snapshot) = snapshot {
        symbols.extend(SymbolTable::from(&snapshot.symbols));
    }
    Ok(symbols)
}

/// The target starts without layouts: whichever kernel reads it binds its own.
fn open_target(cli: &Cli) -> Result<Box<dyn TargetAccess + Send>> {
    let types = TypeRegistry::new();
    if let Some(path) = &cli.snapshot {
        let snapshot = Snapshot::load(path)?;
        let symbols = symbols(cli, Some(&snapshot))?;
        return Ok(Box::new(LayoutTarget::new(symbols, types, snapshot.memory)));
    }

    #[cfg(feature = "hardware")]
    if let Some(chip) = &cli.chip {
        if cli.elf.is_none() {
            bail!("--chip needs --elf for symbols");
        }
        let memory = rtoscope_core::ProbeMemory::attach(chip, cli.probe_index)?;
        return Ok(Box::new(LayoutTarget::new(symbols(cli, None)?, types, memory)));
    }

    bail!("No target: give --snapshot or --chip")
}

fn attach(providers: &[Arc<dyn OsProvider>], target: &mut dyn TargetAccess) -> Result<Attachment> {
    let attachment = Attachment::detect(providers, target).context("No supported kernel found")?;
    log::info!("{}: {}", attachment.kernel(), attachment.state());
    Ok(attachment)
}

fn print_views(views: &[TableView], json: bool) -> Result<()> {
    if json {
        let values: Vec<_> = views.iter().map(view_json).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else {
        for view in views {
            println!("{}", render(view));
        }
    }
    Ok(())
}

pub fn view_json(view: &TableView) -> serde_json::Value {
    match &view.outcome {
        Ok(records) => serde_json::json!({
            "table": view.table,
            "label": view.label,
            "fields": view.fields,
            "records": records,
        }),
        Err(err) => serde_json::json!({
            "table": view.table,
            "label": view.label,
            "fields": view.fields,
            "error": err.to_string(),
        }),
    }
}

/// Plain text table, columns padded to their widest cell.
pub fn render(view: &TableView) -> String {
    let mut out = format!("== {} ==\n", view.label);
    let records = match &view.outcome {
        Ok(records) => records,
        Err(err) => {
            let _ = writeln!(out, "error: {err}");
            return out;
        }
    };

    let rows: Vec<Vec<String>> =
        records.iter().map(|r| r.cells().iter().map(ToString::to_string).collect()).collect();
    let widths: Vec<usize> = view
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| rows.iter().map(|row| row[i].len()).fold(field.label.len(), usize::max))
        .collect();

    let line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells.iter().zip(&widths).map(|(c, &w)| format!("{c:<w$}")).collect();
        padded.join("  ").trim_end().to_string()
    };
    let _ = writeln!(out, "{}", line(view.fields.iter().map(|f| f.label.as_str()).collect()));
    for row in &rows {
        let _ = writeln!(out, "{}", line(row.iter().map(String::as_str).collect()));
    }
    if rows.is_empty() {
        out.push_str("(none)\n");
    }
    out
}

fn watch(
    target: Box<dyn TargetAccess + Send>,
    providers: Vec<Arc<dyn OsProvider>>,
    config: &Config,
    count: u64,
) -> Result<()> {
    use rtoscope_core::session::RecvError;

    let handle = AwarenessHandle::spawn(target, providers, config);
    let mut events = handle.subscribe();
    handle.send(AwarenessCommand::Poll)?;

    let mut shown = 0;
    while count == 0 || shown < count {
        match events.blocking_recv() {
            Ok(AwarenessEvent::Attached { kernel }) => println!("Attached to {kernel}"),
            Ok(AwarenessEvent::NoKernel) => {
                println!("No supported kernel found");
                break;
            }
            Ok(AwarenessEvent::State { kernel, state }) => {
                println!("{kernel}: {state}");
                if state == DetectionState::Initialised {
                    handle.send(AwarenessCommand::Refresh)?;
                }
            }
            Ok(AwarenessEvent::Tables(views)) => {
                for view in &views {
                    println!("{}", render(view));
                }
                shown += 1;
                std::thread::sleep(config.poll_interval());
                handle.send(AwarenessCommand::Refresh)?;
            }
            // Wait for the worker's next poll to report the kernel up.
            Ok(AwarenessEvent::NotReady(not_ready)) => println!("{not_ready}"),
            Ok(AwarenessEvent::Context { .. }) => {}
            Ok(AwarenessEvent::Error(err)) => log::warn!("{err}"),
            Err(RecvError::Lagged(n)) => log::warn!("Dropped {n} events"),
            Err(RecvError::Closed) => break,
        }
    }
    handle.shutdown()
}
