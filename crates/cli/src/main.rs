//! Coherence-engine simulator CLI.
//!
//! This binary builds a platform from a JSON configuration (or the
//! built-in defaults), runs a workload, and prints the activity report.
//! Two workloads are available:
//! 1. **Smoke:** every core walks a shared region with loads, stores and
//!    LL/SC pairs, exercising refills, update episodes and cleanups
//!    across all tiles.
//! 2. **Disk:** core 0 programs the block device to DMA a disk block into
//!    tile 0's memory, then polls the status register.

use clap::Parser;
use std::process;

use dsmsim_core::common::PhysAddr;
use dsmsim_core::proc::{DataOp, DataRequest, Processor, ScriptOp, ScriptedProcessor};
use dsmsim_core::soc::block_device;
use dsmsim_core::{Config, Platform};

#[derive(Parser, Debug)]
#[command(
    name = "sim",
    author,
    version,
    about = "Cycle-accurate simulator of a tiled cache-coherent multiprocessor",
    long_about = "Build a mesh platform from a JSON configuration and run a built-in \
workload.\n\nExamples:\n  sim --cycles 20000\n  sim --config platform.json --workload disk\n  sim --json"
)]
struct Cli {
    /// JSON configuration file (defaults used when omitted).
    #[arg(short, long)]
    config: Option<String>,

    /// Maximum number of simulated cycles.
    #[arg(long, default_value_t = 100_000)]
    cycles: u64,

    /// Workload: "smoke" or "disk".
    #[arg(long, default_value = "smoke")]
    workload: String,

    /// Print the report as JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config: Config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
                eprintln!("error reading {path}: {e}");
                process::exit(1);
            });
            serde_json::from_str(&text).unwrap_or_else(|e| {
                eprintln!("error parsing {path}: {e}");
                process::exit(1);
            })
        }
        None => Config::default(),
    };
    if let Err(e) = config.validate() {
        eprintln!("{e}");
        process::exit(1);
    }

    let cores = config.topology.tiles() as usize * config.topology.procs_per_tile;
    let procs: Vec<Box<dyn Processor>> = (0..cores)
        .map(|core| {
            let script = match cli.workload.as_str() {
                "disk" if core == 0 => disk_script(&config),
                "disk" => Vec::new(),
                _ => smoke_script(&config, core),
            };
            Box::new(ScriptedProcessor::new(script)) as Box<dyn Processor>
        })
        .collect();

    let disk_image = vec![0xA5u8; 16 * config.soc.disk_block_size as usize];
    let mut platform = match Platform::new(&config, procs, disk_image) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    // seed the shared region with a recognizable pattern
    for word in 0..256u64 {
        platform.preload_word(PhysAddr(word * 4), (word as u32) << 8);
    }

    match platform.run(cli.cycles) {
        Ok(exit) => {
            let report = platform.report();
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{text}"),
                    Err(e) => eprintln!("report serialization failed: {e}"),
                }
            } else {
                print!("{}", report.summary());
            }
            if let Some(code) = exit {
                println!("exit code {code}");
                process::exit(code as i32);
            }
        }
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    }
}

/// Shared-region walk: each core loads, stores and runs an LL/SC pair on
/// words spread over every tile's memory, reaching remote tiles through
/// the physical-address extension register.
fn smoke_script(config: &Config, core: usize) -> Vec<ScriptOp> {
    use dsmsim_core::common::VirtAddr;
    use dsmsim_core::proc::{Mode, XtnOp};

    let tiles = u64::from(config.topology.tiles());
    let shift = u64::from(
        config.topology.paddr_width - config.topology.x_width - config.topology.y_width,
    );
    let data = |op: DataOp, addr: u32, wdata: u32, be: u8| {
        ScriptOp::Data(DataRequest {
            valid: true,
            op,
            addr: VirtAddr(addr),
            wdata,
            be,
            mode: Mode::Kernel,
        })
    };
    let set_ext = |tile: u64| {
        data(
            DataOp::XtnWrite,
            XtnOp::DataPaddrExt.addr().val(),
            (tile << (shift - 32)) as u32,
            0xF,
        )
    };

    let mut script = Vec::new();
    for round in 0..4u64 {
        for tile in 0..tiles {
            let addr = ((0x100 + 4 * (core as u64 % 16)) | (round << 6)) as u32;
            script.push(set_ext(tile));
            script.push(data(DataOp::Read, addr, 0, 0));
            script.push(data(DataOp::Write, addr, ((core as u32) << 16) | round as u32, 0xF));
            script.push(ScriptOp::Idle(8));
        }
    }
    // one LL/SC pair per core on a contended word of tile 0
    script.push(set_ext(0));
    script.push(data(DataOp::Ll, 0x40, 0, 0));
    script.push(data(DataOp::Sc, 0x40, core as u32 + 1, 0xF));
    script
}

/// Programs the block device for a one-block DMA read into tile 0 memory,
/// then polls the status register until it leaves BUSY.
fn disk_script(config: &Config) -> Vec<ScriptOp> {
    let disk_base = {
        // segment 2 on the I/O tile
        let shift =
            config.topology.paddr_width - config.topology.x_width - config.topology.y_width;
        (u64::from(config.soc.io_tile) << shift) + 2 * config.soc.segment_size
    };
    let write = |offset: u64, wdata: u32| {
        ScriptOp::Data(DataRequest {
            valid: true,
            op: DataOp::Write,
            addr: dsmsim_core::common::VirtAddr((disk_base + offset) as u32),
            wdata,
            be: 0xF,
            mode: dsmsim_core::proc::Mode::Kernel,
        })
    };
    let read_status = ScriptOp::Data(DataRequest {
        valid: true,
        op: DataOp::Read,
        addr: dsmsim_core::common::VirtAddr((disk_base + block_device::REG_STATUS) as u32),
        wdata: 0,
        be: 0,
        mode: dsmsim_core::proc::Mode::Kernel,
    });

    let mut script = vec![
        write(block_device::REG_BUFFER, 0x2000),
        write(block_device::REG_COUNT, 1),
        write(block_device::REG_LBA, 0),
        write(block_device::REG_OP, block_device::op::READ),
    ];
    for _ in 0..64 {
        script.push(ScriptOp::Idle(16));
        script.push(read_status);
    }
    script
}
