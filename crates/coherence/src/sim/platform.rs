//! Platform assembly and cycle scheduler.
//!
//! The platform owns every per-tile component plus the five networks and
//! advances them with a single-threaded cooperative schedule: each
//! component's `step` runs exactly once per cycle, then the channels
//! commit, so every component samples only the previous cycle's outputs.
//! Results are identical to a per-tile parallel schedule with a barrier
//! at the cycle end.

use tracing::info;

use crate::common::{PhysAddr, SimError};
use crate::config::Config;
use crate::l1::L1Wrapper;
use crate::l2::MemCache;
use crate::noc::Channel;
use crate::proc::Processor;
use crate::sim::ports::{
    cmd_endpoints, disk_cmd_endpoint, exit_cmd_endpoint, tty_cmd_endpoint, Ports,
};
use crate::soc::{AddressMap, BlockDevice, Tty};
use crate::stats::Report;
use crate::vci::{VciCmd, VciRsp};

/// The simulated platform.
pub struct Platform {
    map: AddressMap,
    wrappers: Vec<L1Wrapper>,
    procs: Vec<Box<dyn Processor>>,
    memcaches: Vec<MemCache>,
    tty: Tty,
    disk: BlockDevice,

    cmd_net: Channel<VciCmd>,
    rsp_net: Channel<VciRsp>,
    m2p_net: Channel<u64>,
    p2m_net: Channel<u64>,
    clack_net: Channel<u64>,

    cycle: u64,
    exit_code: Option<u32>,
}

impl Platform {
    /// Builds a platform. `procs` must hold one driver per core, in
    /// (tile, proc) order; `disk_image` backs the block device.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Config`] on invalid geometry or a driver-count
    /// mismatch.
    pub fn new(
        config: &Config,
        procs: Vec<Box<dyn Processor>>,
        disk_image: Vec<u8>,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let map = AddressMap::new(config);
        let tiles = map.tiles();
        let expected = tiles as usize * map.procs_per_tile();
        if procs.len() != expected {
            return Err(SimError::Config(format!(
                "expected {expected} processor drivers, got {}",
                procs.len()
            )));
        }

        let mut wrappers = Vec::with_capacity(expected);
        let mut memcaches = Vec::with_capacity(tiles as usize);
        for tile in 0..tiles {
            for proc in 0..map.procs_per_tile() {
                wrappers.push(L1Wrapper::new(config, tile, proc as u32));
            }
            memcaches.push(MemCache::new(config, tile, map.tile_ram_base(tile)));
        }

        let disk = BlockDevice::new(
            map.disk_srcid(),
            disk_image,
            config.soc.disk_block_size,
            config.soc.disk_burst_size,
        );

        Ok(Self {
            cmd_net: Channel::new(cmd_endpoints(tiles)),
            rsp_net: Channel::new(map.rsp_endpoints()),
            m2p_net: Channel::new(map.l1_endpoints()),
            p2m_net: Channel::new(tiles as usize),
            clack_net: Channel::new(map.l1_endpoints()),
            map,
            wrappers,
            procs,
            memcaches,
            tty: Tty::default(),
            disk,
            cycle: 0,
            exit_code: None,
        })
    }

    /// The address map of this platform.
    pub const fn map(&self) -> &AddressMap {
        &self.map
    }

    /// Current simulated cycle.
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Exit code written to the simulator-exit register, if any.
    pub const fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// Preloads one word of RAM (the external loader's interface).
    pub fn preload_word(&mut self, addr: PhysAddr, value: u32) {
        let tile = self.map.home_tile(addr) as usize;
        self.memcaches[tile].ram_mut().preload_word(addr, value);
    }

    /// One L1 wrapper, in (tile, proc) order.
    pub fn wrapper(&mut self, index: usize) -> &mut L1Wrapper {
        &mut self.wrappers[index]
    }

    /// One memory cache, by tile index.
    pub fn memcache(&mut self, tile: usize) -> &mut MemCache {
        &mut self.memcaches[tile]
    }

    /// One processor driver, in (tile, proc) order.
    pub fn proc(&mut self, index: usize) -> &mut dyn Processor {
        self.procs[index].as_mut()
    }

    /// The TTY device.
    pub const fn tty(&self) -> &Tty {
        &self.tty
    }

    /// The block device.
    pub const fn disk(&self) -> &BlockDevice {
        &self.disk
    }

    /// Advances the whole platform by one cycle.
    ///
    /// # Errors
    ///
    /// Propagates the first protocol or watchdog error raised by any
    /// component; the simulation is not resumable afterwards.
    pub fn step(&mut self) -> Result<(), SimError> {
        let tiles = self.map.tiles();

        for (i, wrapper) in self.wrappers.iter_mut().enumerate() {
            let (ireq, dreq) = self.procs[i].requests();
            let mut ports = Ports {
                cmd: &mut self.cmd_net,
                rsp: &mut self.rsp_net,
                m2p: &mut self.m2p_net,
                p2m: &mut self.p2m_net,
                clack: &mut self.clack_net,
                map: &self.map,
            };
            let out = wrapper.step(&ireq, &dreq, &mut ports)?;
            self.procs[i].responses(&out.irsp, &out.drsp, out.wberr);
        }

        for memcache in &mut self.memcaches {
            let mut ports = Ports {
                cmd: &mut self.cmd_net,
                rsp: &mut self.rsp_net,
                m2p: &mut self.m2p_net,
                p2m: &mut self.p2m_net,
                clack: &mut self.clack_net,
                map: &self.map,
            };
            memcache.step(&mut ports)?;
        }

        {
            let mut ports = Ports {
                cmd: &mut self.cmd_net,
                rsp: &mut self.rsp_net,
                m2p: &mut self.m2p_net,
                p2m: &mut self.p2m_net,
                clack: &mut self.clack_net,
                map: &self.map,
            };
            self.tty.step(tty_cmd_endpoint(tiles), &mut ports);
            self.disk.step(disk_cmd_endpoint(tiles), &mut ports);
        }

        // simulator-exit register
        if let Some(cmd) = self.cmd_net.pop(exit_cmd_endpoint(tiles)) {
            if let Some(word) = cmd.words.first() {
                info!(code = word.wdata, "exit register written");
                self.exit_code = Some(word.wdata);
            }
            let ep = self.map.rsp_endpoint(cmd.srcid);
            self.rsp_net.push(
                ep,
                VciRsp {
                    rsrcid: cmd.srcid,
                    rtrdid: cmd.trdid,
                    rpktid: cmd.pktid,
                    rerror: false,
                    rdata: vec![0],
                },
            );
        }

        // cycle boundary: outputs become inputs
        self.cmd_net.commit();
        self.rsp_net.commit();
        self.m2p_net.commit();
        self.p2m_net.commit();
        self.clack_net.commit();
        self.cycle += 1;
        Ok(())
    }

    /// Runs until the exit register is written or `max_cycles` elapse.
    ///
    /// # Errors
    ///
    /// Propagates any component error.
    pub fn run(&mut self, max_cycles: u64) -> Result<Option<u32>, SimError> {
        for _ in 0..max_cycles {
            self.step()?;
            if self.exit_code.is_some() {
                break;
            }
        }
        Ok(self.exit_code)
    }

    /// Aggregates activity counters into a report.
    pub fn report(&self) -> Report {
        Report {
            cycles: self.cycle,
            l1: self.wrappers.iter().map(|w| w.stats).collect(),
            l2: self.memcaches.iter().map(|m| m.stats).collect(),
        }
    }
}
