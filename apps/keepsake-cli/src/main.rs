mod demo;

use clap::{Parser, Subcommand};
use demo::Harbour;
use keepsake_persist::{FileStore, MemoryStore, SaveStore};
use keepsake_tools::{BlobInspector, WorldInspector};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keepsake-cli", about = "CLI tool for keepsake save files")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and registered object types
    Info,
    /// Save, disturb and reload a harbour scene in memory
    Demo {
        /// Number of couriers to launch
        #[arg(short, long, default_value = "5")]
        couriers: usize,
        /// Ticks to simulate before saving
        #[arg(short, long, default_value = "12")]
        ticks: u64,
    },
    /// Simulate a harbour scene and save it to a store directory
    Save {
        /// Store directory
        #[arg(short, long, default_value = "save_data")]
        dir: PathBuf,
        #[arg(short, long, default_value = "quicksave")]
        slot: String,
        /// Display name stored with the save
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, default_value = "5")]
        couriers: usize,
        #[arg(short, long, default_value = "12")]
        ticks: u64,
    },
    /// Load a save into a freshly built harbour scene
    Load {
        #[arg(short, long, default_value = "save_data")]
        dir: PathBuf,
        #[arg(short, long, default_value = "quicksave")]
        slot: String,
    },
    /// Show the structure of a saved blob
    Inspect {
        #[arg(short, long, default_value = "save_data")]
        dir: PathBuf,
        #[arg(short, long, default_value = "quicksave")]
        slot: String,
        /// Number of registry sections the save was written with
        #[arg(long, default_value_t = demo::SECTIONS)]
        sections: usize,
    },
    /// List the saves in a store directory
    List {
        #[arg(short, long, default_value = "save_data")]
        dir: PathBuf,
    },
}

const BEACONS: usize = 4;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("keepsake-cli v{}", env!("CARGO_PKG_VERSION"));
            let harbour = Harbour::new(BEACONS)?;
            println!("types: {}", harbour.world.types().names().collect::<Vec<_>>().join(", "));
            println!("sections: {}", harbour.system.sections().writer_count());
            println!("{}", WorldInspector::summary(&harbour.world));
        }
        Commands::Demo { couriers, ticks } => {
            let mut harbour = Harbour::new(BEACONS)?;
            harbour.launch(couriers)?;
            harbour.step(ticks);
            let before = WorldInspector::summary(&harbour.world);
            println!("Before: {before}");

            let mut store = MemoryStore::new();
            harbour.system.set_display_name("Demo Harbour");
            let save = harbour.system.save(&harbour.world, &mut store, "demo")?;
            println!("{save}");

            // Keep playing past the save point, then go back.
            harbour.launch(2)?;
            harbour.step(5);
            println!("Drifted: {}", WorldInspector::summary(&harbour.world));

            let report = harbour.system.load(&mut harbour.world, &store, "demo")?;
            println!("{report}");
            let after = WorldInspector::summary(&harbour.world);
            println!("After: {after}");
            println!(
                "Match: {}",
                if after.state_hash == before.state_hash && harbour.clock.borrow().tick == ticks {
                    "OK"
                } else {
                    "MISMATCH"
                }
            );
        }
        Commands::Save {
            dir,
            slot,
            name,
            couriers,
            ticks,
        } => {
            let mut harbour = Harbour::new(BEACONS)?;
            harbour.launch(couriers)?;
            harbour.step(ticks);
            if let Some(name) = name {
                harbour.system.set_display_name(name);
            }
            let mut store = FileStore::open(&dir)?;
            let save = harbour.system.save(&harbour.world, &mut store, &slot)?;
            println!("{save}");
            println!("Written to {}", store.root().display());
        }
        Commands::Load { dir, slot } => {
            let store = FileStore::open(&dir)?;
            let mut harbour = Harbour::new(BEACONS)?;
            let report = harbour.system.load(&mut harbour.world, &store, &slot)?;
            println!("Loaded \"{}\"", harbour.system.display_name());
            println!("{report}");
            for (outcome, reason) in report.skipped() {
                println!("  skipped [{}] {}: {reason}", outcome.index, outcome.type_name);
            }
            for rekey in &report.rekeyed {
                println!("  rekeyed {rekey}");
            }
            for failure in &report.section_failures {
                println!("  section {} ({}) failed: {}", failure.index, failure.label, failure.error);
            }
            println!("tide tick: {}", harbour.clock.borrow().tick);
            println!("{}", WorldInspector::summary(&harbour.world));
            for id in WorldInspector::list_entities(&harbour.world) {
                if let Some(info) = WorldInspector::inspect_entity(&harbour.world, id) {
                    println!("  {info}");
                }
            }
        }
        Commands::Inspect {
            dir,
            slot,
            sections,
        } => {
            let store = FileStore::open(&dir)?;
            let meta = store.meta(&slot)?;
            let saved = store.read(&slot)?;
            println!(
                "Slot {slot}: \"{}\" {} bytes sha256={}",
                meta.display_name, meta.size, meta.sha256
            );
            let summary = BlobInspector::inspect(&saved.data, sections)?;
            println!("{summary}");
            for (index, bytes) in summary.section_bytes.iter().enumerate() {
                println!("  section {index}: {bytes}B");
            }
            for record in &summary.records {
                println!("  {record}");
            }
            if summary.trailing_bytes > 0 {
                println!("  {} trailing bytes", summary.trailing_bytes);
            }
        }
        Commands::List { dir } => {
            let store = FileStore::open(&dir)?;
            let slots = store.slots()?;
            if slots.is_empty() {
                println!("No saves in {}", dir.display());
            }
            for slot in slots {
                match store.meta(&slot) {
                    Ok(meta) => println!("{slot}: \"{}\" {} bytes", meta.display_name, meta.size),
                    Err(e) => println!("{slot}: unreadable ({e})"),
                }
            }
        }
    }

    Ok(())
}
