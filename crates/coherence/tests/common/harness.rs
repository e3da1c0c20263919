//! Platform test harness.
//!
//! Builds a default 4-tile platform driven by scripted processors and
//! provides request constructors plus a run-until-quiescent loop.

use dsmsim_core::common::VirtAddr;
use dsmsim_core::proc::{
    DataOp, DataRequest, DataResponse, Mode, Processor, ScriptOp, ScriptedProcessor, XtnOp,
};
use dsmsim_core::{Config, Platform};

/// A platform plus the script bookkeeping of each core.
pub struct TestBench {
    /// The platform under test.
    pub platform: Platform,
    cores: usize,
}

impl TestBench {
    /// Builds a default-config platform. `scripts` assigns a workload per
    /// core, in (tile, proc) order; missing cores idle.
    pub fn new(scripts: Vec<Vec<ScriptOp>>) -> Self {
        Self::with_config(Config::default(), scripts)
    }

    /// Builds a platform with an explicit configuration.
    pub fn with_config(config: Config, mut scripts: Vec<Vec<ScriptOp>>) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let cores = config.topology.tiles() as usize * config.topology.procs_per_tile;
        scripts.resize(cores, Vec::new());
        let procs: Vec<Box<dyn Processor>> = scripts
            .into_iter()
            .map(|s| Box::new(ScriptedProcessor::new(s)) as Box<dyn Processor>)
            .collect();
        let disk_image = (0..16 * 512).map(|i| (i % 251) as u8).collect();
        let platform = Platform::new(&config, procs, disk_image).expect("platform");
        Self { platform, cores }
    }

    /// Runs until every scripted operation completed, up to `max_cycles`.
    /// Panics on a protocol error or when the scripts do not finish.
    pub fn run_to_completion(&mut self, max_cycles: u64) {
        for _ in 0..max_cycles {
            self.platform.step().expect("platform step");
            if self.all_finished() {
                // drain in-flight coherence traffic (acks, clacks)
                for _ in 0..2_000 {
                    self.platform.step().expect("platform step");
                }
                return;
            }
        }
        panic!("scripts did not complete within {max_cycles} cycles");
    }

    fn all_finished(&mut self) -> bool {
        (0..self.cores).all(|i| {
            self.platform
                .proc(i)
                .as_scripted_mut()
                .is_none_or(|s| s.finished())
        })
    }

    /// Completed data responses of one core, in script order.
    pub fn data_log(&mut self, core: usize) -> Vec<DataResponse> {
        self.platform
            .proc(core)
            .as_scripted_mut()
            .map(|s| s.data_log.clone())
            .unwrap_or_default()
    }
}

/// A data request, one per script step.
pub fn data(op: DataOp, addr: u32, wdata: u32, be: u8) -> ScriptOp {
    ScriptOp::Data(DataRequest {
        valid: true,
        op,
        addr: VirtAddr(addr),
        wdata,
        be,
        mode: Mode::Kernel,
    })
}

/// A cacheable load.
pub fn load(addr: u32) -> ScriptOp {
    data(DataOp::Read, addr, 0, 0)
}

/// A full-word store.
pub fn store(addr: u32, wdata: u32) -> ScriptOp {
    data(DataOp::Write, addr, wdata, 0xF)
}

/// An XTN register write.
pub fn xtn_write(op: XtnOp, wdata: u32) -> ScriptOp {
    data(DataOp::XtnWrite, op.addr().val(), wdata, 0xF)
}

/// An idle window of `n` cycles.
pub fn idle(n: u32) -> ScriptOp {
    ScriptOp::Idle(n)
}

/// An instruction fetch.
pub fn fetch(addr: u32) -> ScriptOp {
    ScriptOp::Fetch(dsmsim_core::proc::InstructionRequest {
        valid: true,
        addr: VirtAddr(addr),
        mode: Mode::Kernel,
    })
}
