#![deny(warnings)]

//! Command-line front end: compute ratios and manage saved production chains.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use persistence::{ChainStore, StoreConfig};
use planner::{BuildingInput, ChainForm};
use prod_core::{parse_duration, Minutes, ProductionChain};
use prod_ratio::calculate_ratios_exact;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: cli [--data-dir <dir>] <command>

commands:
  calc <duration>...                         print base and ratios
  add --name <chain> --building <name>=<duration>...
                                             compute and save a chain
  import <file>                              save a chain from a YAML/JSON form
  list [--search <query>] [--json]           list saved chains
  show <id>                                  show one chain
  remove <id>                                delete a chain
  version                                    print build information

durations: minutes (\"2\") or M.SS / M,SS / M:SS (\"1:30\")";

#[derive(Debug, PartialEq)]
enum Command {
    Calc { durations: Vec<String>, json: bool },
    Add { name: String, buildings: Vec<BuildingInput> },
    Import { path: PathBuf },
    List { search: Option<String>, json: bool },
    Show { id: String },
    Remove { id: String },
    Version,
    Help,
}

#[derive(Debug, PartialEq)]
struct Args {
    data_dir: Option<PathBuf>,
    command: Command,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut data_dir: Option<PathBuf> = None;
    let mut rest: Vec<String> = Vec::new();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--data-dir" => {
                data_dir = Some(PathBuf::from(
                    it.next().ok_or_else(|| anyhow!("--data-dir needs a value"))?,
                ))
            }
            _ => rest.push(arg),
        }
    }

    let mut it = rest.into_iter();
    let command = match it.next().as_deref() {
        None | Some("help") | Some("--help") | Some("-h") => Command::Help,
        Some("version") | Some("--version") => Command::Version,
        Some("calc") => {
            let mut durations = Vec::new();
            let mut json = false;
            for arg in it {
                if arg == "--json" {
                    json = true;
                } else {
                    durations.push(arg);
                }
            }
            if durations.is_empty() {
                bail!("calc needs at least one duration");
            }
            Command::Calc { durations, json }
        }
        Some("add") => {
            let mut name = None;
            let mut buildings = Vec::new();
            while let Some(arg) = it.next() {
                match arg.as_str() {
                    "--name" => name = it.next(),
                    "--building" => {
                        let pair = it
                            .next()
                            .ok_or_else(|| anyhow!("--building needs <name>=<duration>"))?;
                        let (b, d) = pair
                            .rsplit_once('=')
                            .ok_or_else(|| anyhow!("expected <name>=<duration>, got {pair:?}"))?;
                        buildings.push(BuildingInput::new(b, d));
                    }
                    other => bail!("unexpected argument {other:?}"),
                }
            }
            Command::Add {
                name: name.unwrap_or_default(),
                buildings,
            }
        }
        Some("import") => Command::Import {
            path: PathBuf::from(it.next().ok_or_else(|| anyhow!("import needs a file"))?),
        },
        Some("list") => {
            let mut search = None;
            let mut json = false;
            while let Some(arg) = it.next() {
                match arg.as_str() {
                    "--search" => search = it.next(),
                    "--json" => json = true,
                    other => bail!("unexpected argument {other:?}"),
                }
            }
            Command::List { search, json }
        }
        Some("show") => Command::Show {
            id: it.next().ok_or_else(|| anyhow!("show needs an id"))?,
        },
        Some("remove") => Command::Remove {
            id: it.next().ok_or_else(|| anyhow!("remove needs an id"))?,
        },
        Some(other) => bail!("unknown command {other:?}\n\n{USAGE}"),
    };
    Ok(Args { data_dir, command })
}

fn open_store(data_dir: Option<PathBuf>) -> Result<ChainStore> {
    let config = match data_dir {
        Some(dir) => StoreConfig::new(dir),
        None => StoreConfig::from_env(),
    };
    ChainStore::open(&config)
        .with_context(|| format!("opening {}", config.storage_path().display()))
}

fn format_duration(minutes: f64) -> String {
    Minutes::from_f64(minutes)
        .map(|m| m.to_clock_string())
        .unwrap_or_else(|| minutes.to_string())
}

fn print_chain(chain: &ProductionChain) {
    let created = DateTime::<Utc>::from_timestamp_millis(chain.created_at)
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "?".to_string());
    println!(
        "{} | {} | base: {} min | created {}",
        chain.id, chain.name, chain.base, created
    );
    for b in &chain.buildings {
        println!(
            "    {:<24} {:>8}  x{}",
            b.name,
            format_duration(b.duration),
            b.effective_ratio(chain.base)
        );
    }
}

fn submit(form: &mut ChainForm, store: &mut ChainStore) -> Result<()> {
    let saved = form.submit(store)?;
    println!("Saved chain {}", saved.id);
    print_chain(&saved);
    Ok(())
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Help => println!("{USAGE}"),
        Command::Version => println!(
            "cli {} ({} built {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        ),
        Command::Calc { durations, json } => {
            let parsed = durations
                .iter()
                .map(|d| parse_duration(d).with_context(|| format!("duration {d:?}")))
                .collect::<Result<Vec<_>>>()?;
            let result = calculate_ratios_exact(&parsed);
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Base (LCM): {} minutes", result.base);
                let positive = durations.iter().zip(&parsed).filter(|(_, m)| !m.is_zero());
                for ((text, m), ratio) in positive.zip(&result.ratios) {
                    println!("  {:>8} ({})  ratio {}", text, m.to_clock_string(), ratio);
                }
            }
        }
        Command::Add { name, buildings } => {
            let mut store = open_store(args.data_dir)?;
            let mut form = ChainForm::with_rows(name, buildings);
            submit(&mut form, &mut store)?;
        }
        Command::Import { path } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let mut form = ChainForm::from_yaml(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            let mut store = open_store(args.data_dir)?;
            submit(&mut form, &mut store)?;
        }
        Command::List { search, json } => {
            let store = open_store(args.data_dir)?;
            let chains = store.search(search.as_deref().unwrap_or(""));
            if json {
                println!("{}", serde_json::to_string_pretty(&chains)?);
            } else if chains.is_empty() {
                println!("No saved chains");
            } else {
                for chain in chains {
                    print_chain(chain);
                }
            }
        }
        Command::Show { id } => {
            let store = open_store(args.data_dir)?;
            let chain = store.get(&id).ok_or_else(|| anyhow!("no chain with id {id}"))?;
            print_chain(chain);
        }
        Command::Remove { id } => {
            let mut store = open_store(args.data_dir)?;
            match store.remove(&id)? {
                Some(chain) => println!("Removed {} ({})", chain.name, chain.id),
                None => bail!("no chain with id {id}"),
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    info!(command = ?args.command, "starting CLI");
    run(args)
}
