//! L2 memory cache and coherence directory.
//!
//! One [`MemCache`] per tile serves direct-network commands from every
//! tile for its physical address range, maintains the inclusive L2
//! content plus the directory, orchestrates update/invalidation episodes
//! toward the L1s, and drives the external RAM through the transaction
//! table.
//!
//! The target engine processes one command at a time with explicit wait
//! phases (victim drain, writeback, fetch); cleanups and multicast
//! acknowledgements arrive on the P2M channel and are processed
//! concurrently, one packet per cycle, which is what unblocks the waits.

/// L2 storage, directory entries and the sharer heap.
pub mod directory;
/// TRT / UPT / IVT and the LL/SC generation table.
pub mod tables;

pub use directory::{DirEntry, DirState, Directory, L2Storage, Owner};
pub use tables::{EpisodeTable, LlscTable, PendingRsp, TransactionTable, TrtKind};

use tracing::trace;

use crate::common::{CcId, NLine, PhysAddr, SimError};
use crate::config::Config;
use crate::noc::dhccp::{self, clack_type, m2p_type, p2m_type, FlitField};
use crate::sim::ports::{l2_cmd_endpoint, Ports};
use crate::soc::memory::ExternalRam;
use crate::stats::L2Stats;
use crate::vci::{PktId, VciCmd, VciRsp};

/// Wait phase of the target engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Phase {
    /// Ready for (or retrying) a command.
    #[default]
    Idle,
    /// Victim in ZOMBI, waiting for its sharers to drain.
    VictimDrain,
    /// Waiting for the victim writeback to complete.
    RamPut,
    /// Waiting for the line fetch to complete.
    RamGet,
}

/// P2M receive state (cleanup packets are two flits).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum P2mState {
    #[default]
    Idle,
    /// Header consumed; waiting for the NLINE flit.
    CleanupNline {
        srcid: u32,
        way: usize,
        inst: bool,
        nline_msb: u64,
    },
}

/// Outcome of a line residency check.
enum LineStatus {
    Ready(usize, usize),
    Busy,
}

/// The L2 memory cache of one tile.
pub struct MemCache {
    tile: u32,
    l_width: u32,
    y_width: u32,
    words: usize,
    broadcast_threshold: usize,
    ram_latency: u32,

    storage: L2Storage,
    dir: Directory,
    trt: TransactionTable,
    upt: EpisodeTable,
    ivt: EpisodeTable,
    llsc: LlscTable,
    ram: ExternalRam,

    cycle: u64,
    phase: Phase,
    cur: Option<VciCmd>,
    victim_way: usize,
    victim_set: usize,
    fetch_nline: NLine,
    trt_idx: usize,
    p2m_state: P2mState,
    // update/invalidate packets serialized one per cycle
    m2p_out: std::collections::VecDeque<M2pSend>,

    /// Activity counters.
    pub stats: L2Stats,
}

/// One queued M2P emission.
enum M2pSend {
    /// Unicast packet to one L1 cache.
    Unicast(CcId, Vec<u64>),
    /// Broadcast packet replicated to every L1 inside the bounding box.
    Broadcast(Vec<u64>, (u32, u32, u32, u32)),
}

impl MemCache {
    /// Builds the memory cache of `tile`.
    pub fn new(config: &Config, tile: u32, ram_base: PhysAddr) -> Self {
        let l2 = &config.l2;
        let geom = l2.geometry;
        Self {
            tile,
            l_width: config.topology.l_width,
            y_width: config.topology.y_width,
            words: geom.words,
            broadcast_threshold: l2.broadcast_threshold,
            ram_latency: l2.ram_latency,
            storage: L2Storage::new(geom.ways, geom.sets, geom.words),
            dir: Directory::new(geom.ways, geom.sets, l2.heap_size),
            trt: TransactionTable::new(l2.trt_entries),
            upt: EpisodeTable::new(l2.upt_entries),
            ivt: EpisodeTable::new(l2.ivt_entries),
            llsc: LlscTable::default(),
            ram: ExternalRam::new(ram_base, config.soc.segment_size, geom.words),
            cycle: 0,
            phase: Phase::Idle,
            cur: None,
            victim_way: 0,
            victim_set: 0,
            fetch_nline: NLine(0),
            trt_idx: 0,
            p2m_state: P2mState::Idle,
            m2p_out: std::collections::VecDeque::new(),
            stats: L2Stats::default(),
        }
    }

    /// Direct access to the backing RAM, for the platform preloader and
    /// the test harness.
    pub fn ram_mut(&mut self) -> &mut ExternalRam {
        &mut self.ram
    }

    /// Directory entry of a resident line, if any (verifier interface).
    pub fn dir_entry(&mut self, nline: NLine) -> Option<DirEntry> {
        self.storage
            .lookup(nline)
            .map(|(way, set)| self.dir.entry(way, set))
    }

    /// Current word value of a resident line (verifier interface).
    pub fn peek_word(&mut self, addr: PhysAddr) -> Option<u32> {
        let nline = addr.nline(self.words);
        self.storage
            .lookup(nline)
            .map(|(way, set)| self.storage.read_word(way, set, addr.word_of_line(self.words)))
    }

    /// Advances the memory cache by one cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::Protocol`] on directory inconsistencies
    /// (cleanup for an absent line or unregistered sharer, heap
    /// exhaustion).
    pub fn step(&mut self, ports: &mut Ports<'_>) -> Result<(), SimError> {
        self.cycle += 1;
        self.p2m_step(ports)?;
        self.target_step(ports)?;
        self.m2p_drain(ports);
        Ok(())
    }

    // ---- P2M receive: cleanups and multicast acknowledgements ----

    fn p2m_step(&mut self, ports: &mut Ports<'_>) -> Result<(), SimError> {
        let ep = self.tile as usize;
        match self.p2m_state {
            P2mState::Idle => {
                let Some(&flit) = ports.p2m.head(ep) else {
                    return Ok(());
                };
                match dhccp::get(flit, FlitField::P2mType) {
                    p2m_type::MULTI_ACK => {
                        let _ = ports.p2m.pop(ep);
                        let idx = dhccp::get(flit, FlitField::MultiAckUpdtIndex) as usize;
                        self.stats.multi_acks += 1;
                        if let Some(rsp) = self.upt.ack(idx) {
                            if let Some(rsp) = rsp {
                                self.send_rsp(ports, rsp);
                            }
                        }
                        Ok(())
                    }
                    _ => {
                        let _ = ports.p2m.pop(ep);
                        self.p2m_state = P2mState::CleanupNline {
                            srcid: dhccp::get(flit, FlitField::CleanupSrcid) as u32,
                            way: dhccp::get(flit, FlitField::CleanupWayIndex) as usize,
                            inst: dhccp::get(flit, FlitField::P2mType)
                                == p2m_type::CLEANUP_INST,
                            nline_msb: dhccp::get(flit, FlitField::CleanupNlineMsb),
                        };
                        Ok(())
                    }
                }
            }
            P2mState::CleanupNline {
                srcid,
                way,
                inst,
                nline_msb,
            } => {
                let Some(flit) = ports.p2m.pop(ep) else {
                    return Ok(());
                };
                let nline =
                    NLine((nline_msb << 32) | dhccp::get(flit, FlitField::CleanupNlineLsb));
                self.p2m_state = P2mState::Idle;
                self.handle_cleanup(ports, CcId(srcid), way, inst, nline)
            }
        }
    }

    fn handle_cleanup(
        &mut self,
        ports: &mut Ports<'_>,
        cc_id: CcId,
        l1_way: usize,
        inst: bool,
        nline: NLine,
    ) -> Result<(), SimError> {
        self.stats.cleanups += 1;
        let owner = Owner { cc_id, inst };
        let Some((way, set)) = self.storage.lookup(nline) else {
            return Err(SimError::protocol(
                self.tile,
                "MEMC_CLEANUP",
                "CLEANUP_NLINE",
                format!("cleanup for a line absent from the L2 (nline {:#x})", nline.val()),
            ));
        };
        if !self.dir.remove_sharer(way, set, owner) {
            return Err(SimError::protocol(
                self.tile,
                "MEMC_CLEANUP",
                "CLEANUP_NLINE",
                format!(
                    "cleanup from an unregistered sharer (cc_id {}, nline {:#x})",
                    cc_id.0,
                    nline.val()
                ),
            ));
        }
        trace!(tile = self.tile, nline = nline.val(), cc = cc_id.0, "cleanup");

        // the acknowledgement is sent only after the cleanup is recorded
        let mut flit = 0u64;
        dhccp::set(&mut flit, 1, FlitField::M2pEop);
        dhccp::set(&mut flit, u64::from(cc_id.0), FlitField::ClackDest);
        dhccp::set(&mut flit, nline.val(), FlitField::ClackSet);
        dhccp::set(&mut flit, l1_way as u64, FlitField::ClackWay);
        let ty = if inst {
            clack_type::CLACK_INST
        } else {
            clack_type::CLACK_DATA
        };
        dhccp::set(&mut flit, ty, FlitField::ClackType);
        ports.clack.push(ports.map.l1_endpoint(cc_id), flit);

        // progress any invalidation episode on this line
        if let Some(idx) = self.ivt.find(nline) {
            if let Some(rsp) = self.ivt.ack(idx) {
                if let Some(rsp) = rsp {
                    self.send_rsp(ports, rsp);
                }
            }
        }
        Ok(())
    }

    // ---- target engine: direct-network commands ----

    fn target_step(&mut self, ports: &mut Ports<'_>) -> Result<(), SimError> {
        match self.phase {
            Phase::Idle => {
                if self.cur.is_none() {
                    self.cur = ports.cmd.pop(l2_cmd_endpoint(self.tile));
                }
                if let Some(cmd) = self.cur.take() {
                    self.dispatch(ports, cmd)?;
                }
                Ok(())
            }
            Phase::VictimDrain => {
                let entry = self.dir.entry(self.victim_way, self.victim_set);
                if entry.count == 0 {
                    self.victim_release();
                }
                Ok(())
            }
            Phase::RamPut => {
                if self.trt.ready(self.trt_idx, self.cycle) {
                    let e = self.trt.get(self.trt_idx);
                    let (nline, data) = (e.nline, e.data.clone());
                    self.ram.write_line(nline, &data);
                    self.stats.ram_puts += 1;
                    self.trt.free(self.trt_idx);
                    self.start_fetch();
                }
                Ok(())
            }
            Phase::RamGet => {
                if self.trt.ready(self.trt_idx, self.cycle) {
                    let nline = self.trt.get(self.trt_idx).nline;
                    let data = self.ram.read_line(nline);
                    self.stats.ram_gets += 1;
                    self.trt.free(self.trt_idx);
                    self.storage
                        .install(self.victim_way, self.victim_set, nline, &data);
                    self.dir
                        .set_state(self.victim_way, self.victim_set, DirState::Empty);
                    self.phase = Phase::Idle;
                }
                Ok(())
            }
        }
    }

    /// Releases a drained victim: writeback if dirty, then fetch.
    fn victim_release(&mut self) {
        let (way, set) = (self.victim_way, self.victim_set);
        if self.storage.is_dirty(way, set) {
            let nline = self.storage.slot_nline(way, set);
            let data = self.storage.read_line(way, set);
            self.stats.writebacks += 1;
            if let Some(idx) = self.trt.alloc(
                TrtKind::Put,
                nline,
                data,
                self.cycle + u64::from(self.ram_latency),
            ) {
                self.trt_idx = idx;
                self.storage.invalidate(way, set);
                self.dir.set_state(way, set, DirState::Empty);
                self.phase = Phase::RamPut;
            }
            // TRT full: stay in VictimDrain and retry next cycle
        } else {
            self.storage.invalidate(way, set);
            self.dir.set_state(way, set, DirState::Empty);
            self.start_fetch();
        }
    }

    /// Allocates the TRT GET for the line being fetched.
    fn start_fetch(&mut self) {
        if let Some(idx) = self.trt.alloc(
            TrtKind::Get,
            self.fetch_nline,
            Vec::new(),
            self.cycle + u64::from(self.ram_latency),
        ) {
            self.trt_idx = idx;
            self.phase = Phase::RamGet;
        } else {
            // TRT full: hold in a drained-victim phase until a slot frees
            self.phase = Phase::VictimDrain;
        }
    }

    /// Checks residency of `nline`, starting eviction/fetch when absent.
    fn ensure_line(&mut self, nline: NLine) -> LineStatus {
        // a line with an invalidation episode in flight is not touched
        if self.ivt.find(nline).is_some() {
            return LineStatus::Busy;
        }
        if let Some((way, set)) = self.storage.lookup(nline) {
            if self.dir.entry(way, set).state == DirState::Zombi {
                return LineStatus::Busy;
            }
            return LineStatus::Ready(way, set);
        }

        // miss: pick a victim and start the eviction/fetch pipeline
        let set = self.storage.set_of(nline);
        let dir = &self.dir;
        let Some(way) = self
            .storage
            .select_victim(set, |w| dir.entry(w, set).state != DirState::Zombi)
        else {
            return LineStatus::Busy;
        };
        self.victim_way = way;
        self.victim_set = set;
        self.fetch_nline = nline;

        let entry = self.dir.entry(way, set);
        if self.storage.is_valid(way, set) && entry.count > 0 {
            // sharers must be invalidated first
            let victim_nline = self.storage.slot_nline(way, set);
            if self.ivt.find(victim_nline).is_some() {
                return LineStatus::Busy;
            }
            let sharers = self.dir.sharers(way, set);
            if self
                .start_inval_episode(victim_nline, &sharers, None)
            {
                self.dir.set_state(way, set, DirState::Zombi);
                self.phase = Phase::VictimDrain;
            }
            LineStatus::Busy
        } else if self.storage.is_valid(way, set) {
            // no sharers: writeback if dirty, then fetch
            self.victim_release();
            LineStatus::Busy
        } else {
            self.start_fetch();
            LineStatus::Busy
        }
    }

    fn dispatch(&mut self, ports: &mut Ports<'_>, cmd: VciCmd) -> Result<(), SimError> {
        let nline = cmd.address.nline(self.words);
        let (way, set) = match self.ensure_line(nline) {
            LineStatus::Ready(way, set) => (way, set),
            LineStatus::Busy => {
                if self.phase != Phase::Idle {
                    // an eviction/fetch pipeline just started for this miss
                    match cmd.pktid {
                        PktId::Write => self.stats.write_misses += 1,
                        PktId::ReadInsMiss | PktId::ReadDataMiss => {
                            self.stats.read_misses += 1;
                        }
                        _ => {}
                    }
                }
                self.cur = Some(cmd);
                return Ok(());
            }
        };
        let word = cmd.address.word_of_line(self.words);
        let owner_cc = CcId(cmd.srcid.0);

        match cmd.pktid {
            PktId::ReadInsMiss | PktId::ReadDataMiss => {
                self.stats.reads += 1;
                let owner = Owner {
                    cc_id: owner_cc,
                    inst: cmd.pktid == PktId::ReadInsMiss,
                };
                if !self.dir.add_sharer(way, set, owner) {
                    return Err(SimError::protocol(
                        self.tile,
                        "MEMC_READ",
                        "READ_DIR_UPDT",
                        "sharer heap exhausted; increase l2.heap_size",
                    ));
                }
                self.send_rsp(ports, PendingRsp {
                    srcid: cmd.srcid,
                    trdid: cmd.trdid,
                    pktid: cmd.pktid,
                    rdata: self.storage.read_line(way, set),
                });
                Ok(())
            }

            PktId::DataUnc => {
                if cmd.words.is_empty() {
                    // uncacheable read: plen/4 words inside one line, no
                    // sharer registration (single word from an L1, burst
                    // from a DMA initiator)
                    self.stats.reads += 1;
                    let nwords = (cmd.plen.div_ceil(4).max(1) as usize)
                        .min(self.words - word);
                    let rdata = (0..nwords)
                        .map(|i| self.storage.read_word(way, set, word + i))
                        .collect();
                    self.send_rsp(ports, PendingRsp {
                        srcid: cmd.srcid,
                        trdid: cmd.trdid,
                        pktid: cmd.pktid,
                        rdata,
                    });
                    Ok(())
                } else {
                    // uncacheable write: one word, ordinary update episode
                    self.write_words(ports, cmd, way, set, word, false)
                }
            }

            PktId::Write => {
                self.stats.writes += 1;
                self.write_words(ports, cmd, way, set, word, true)
            }

            PktId::Cas => {
                self.stats.cas_ops += 1;
                let old = self.storage.read_word(way, set, word);
                let expected = cmd.words.first().map_or(0, |w| w.wdata);
                let new = cmd.words.get(1).map_or(0, |w| w.wdata);
                if old == expected {
                    self.commit_word_write(ports, &cmd, way, set, word, new, vec![old])
                } else {
                    self.send_rsp(ports, PendingRsp {
                        srcid: cmd.srcid,
                        trdid: cmd.trdid,
                        pktid: cmd.pktid,
                        rdata: vec![old],
                    });
                    Ok(())
                }
            }

            PktId::Ll => {
                self.stats.ll_ops += 1;
                let key = self.llsc.key(cmd.address);
                let data = self.storage.read_word(way, set, word);
                self.send_rsp(ports, PendingRsp {
                    srcid: cmd.srcid,
                    trdid: cmd.trdid,
                    pktid: cmd.pktid,
                    rdata: vec![key, data],
                });
                Ok(())
            }

            PktId::Sc => {
                self.stats.sc_ops += 1;
                let key = cmd.words.first().map_or(0, |w| w.wdata);
                let new = cmd.words.get(1).map_or(0, |w| w.wdata);
                if self.llsc.key(cmd.address) == key {
                    self.commit_word_write(ports, &cmd, way, set, word, new, vec![0])
                } else {
                    self.stats.sc_failures += 1;
                    self.send_rsp(ports, PendingRsp {
                        srcid: cmd.srcid,
                        trdid: cmd.trdid,
                        pktid: cmd.pktid,
                        rdata: vec![1],
                    });
                    Ok(())
                }
            }

            PktId::ReadInsUnc => {
                self.stats.reads += 1;
                let rdata = vec![self.storage.read_word(way, set, word)];
                self.send_rsp(ports, PendingRsp {
                    srcid: cmd.srcid,
                    trdid: cmd.trdid,
                    pktid: cmd.pktid,
                    rdata,
                });
                Ok(())
            }
        }
    }

    /// Commits a write burst: updates the L2 line, bumps the LL/SC keys,
    /// and runs the update/invalidation episode toward the sharers.
    ///
    /// `exclude_writer` removes the writer's own data-cache copy from the
    /// update targets (it already updated its copy in its P1 stage).
    fn write_words(
        &mut self,
        ports: &mut Ports<'_>,
        cmd: VciCmd,
        way: usize,
        set: usize,
        first_word: usize,
        exclude_writer: bool,
    ) -> Result<(), SimError> {
        let nline = cmd.address.nline(self.words);
        let writer = Owner {
            cc_id: CcId(cmd.srcid.0),
            inst: false,
        };
        let entry = self.dir.entry(way, set);
        let sharers = self.dir.sharers(way, set);
        let targets: Vec<Owner> = sharers
            .iter()
            .copied()
            .filter(|o| !(exclude_writer && *o == writer))
            .collect();

        let rsp = PendingRsp {
            srcid: cmd.srcid,
            trdid: cmd.trdid,
            pktid: cmd.pktid,
            rdata: if cmd.pktid == PktId::Write {
                Vec::new()
            } else {
                vec![0]
            },
        };

        if targets.is_empty() {
            self.apply_write(&cmd, way, set, first_word);
            self.send_rsp(ports, rsp);
            return Ok(());
        }

        if entry.count > self.broadcast_threshold {
            // too many sharers: single broadcast invalidation; the
            // response waits for every copy's cleanup
            if !self.start_inval_episode(nline, &sharers, Some(rsp)) {
                self.cur = Some(cmd);
                return Ok(());
            }
            self.apply_write(&cmd, way, set, first_word);
            return Ok(());
        }

        // multicast update episode, acknowledged per target
        let Some(idx) = self.upt.alloc(nline, targets.len(), Some(rsp)) else {
            self.cur = Some(cmd);
            return Ok(());
        };
        self.apply_write(&cmd, way, set, first_word);
        let words: Vec<(u32, u8)> = cmd.words.iter().map(|w| (w.wdata, w.be)).collect();
        for target in &targets {
            self.stats.multi_updates += 1;
            self.queue_updt(*target, idx, nline, first_word, &words);
        }
        Ok(())
    }

    /// Single-word committed write (CAS, SC) with its episode. Every
    /// sharer is updated, including the initiator's own copies.
    #[allow(clippy::too_many_arguments)]
    fn commit_word_write(
        &mut self,
        ports: &mut Ports<'_>,
        cmd: &VciCmd,
        way: usize,
        set: usize,
        word: usize,
        value: u32,
        rdata: Vec<u32>,
    ) -> Result<(), SimError> {
        let be = 0xF;
        let nline = cmd.address.nline(self.words);
        let entry = self.dir.entry(way, set);
        let targets = self.dir.sharers(way, set);

        let rsp = PendingRsp {
            srcid: cmd.srcid,
            trdid: cmd.trdid,
            pktid: cmd.pktid,
            rdata,
        };

        if targets.is_empty() {
            self.storage.write_word(way, set, word, value, be);
            self.llsc.bump(cmd.address);
            self.send_rsp(ports, rsp);
            return Ok(());
        }

        if entry.count > self.broadcast_threshold {
            if !self.start_inval_episode(nline, &targets, Some(rsp)) {
                self.cur = Some(cmd.clone());
                return Ok(());
            }
            self.storage.write_word(way, set, word, value, be);
            self.llsc.bump(cmd.address);
            return Ok(());
        }

        let Some(idx) = self.upt.alloc(nline, targets.len(), Some(rsp)) else {
            self.cur = Some(cmd.clone());
            return Ok(());
        };
        self.storage.write_word(way, set, word, value, be);
        self.llsc.bump(cmd.address);
        for target in &targets {
            self.stats.multi_updates += 1;
            self.queue_updt(*target, idx, nline, word, &[(value, be)]);
        }
        Ok(())
    }

    /// Applies a write burst to the L2 line and bumps the LL/SC keys of
    /// every written word.
    fn apply_write(&mut self, cmd: &VciCmd, way: usize, set: usize, first_word: usize) {
        for (i, w) in cmd.words.iter().enumerate() {
            if w.be != 0 {
                self.storage.write_word(way, set, first_word + i, w.wdata, w.be);
                self.llsc
                    .bump(PhysAddr(cmd.address.val() + ((i as u64) << 2)));
            }
        }
    }

    /// Starts a multicast or broadcast invalidation episode. Returns
    /// `false` if the IVT is full.
    fn start_inval_episode(
        &mut self,
        nline: NLine,
        sharers: &[Owner],
        rsp: Option<PendingRsp>,
    ) -> bool {
        if sharers.len() > self.broadcast_threshold {
            let Some(_) = self.ivt.alloc(nline, sharers.len(), rsp) else {
                return false;
            };
            self.stats.broadcasts += 1;
            self.queue_broadcast(nline, sharers);
            true
        } else {
            let Some(_) = self.ivt.alloc(nline, sharers.len(), rsp) else {
                return false;
            };
            for target in sharers {
                self.stats.multi_invals += 1;
                self.queue_inval(*target, nline);
            }
            true
        }
    }

    // ---- M2P packet construction and serialization ----

    fn queue_updt(
        &mut self,
        target: Owner,
        updt_idx: usize,
        nline: NLine,
        word_index: usize,
        words: &[(u32, u8)],
    ) {
        let mut packet = Vec::with_capacity(2 + words.len());
        let mut header = 0u64;
        dhccp::set(&mut header, u64::from(target.cc_id.0), FlitField::MultiUpdtDest);
        dhccp::set(&mut header, u64::from(self.tile), FlitField::MultiUpdtSrcid);
        dhccp::set(&mut header, updt_idx as u64, FlitField::MultiUpdtUpdtIndex);
        let ty = if target.inst {
            m2p_type::MULTI_UPDT_INST
        } else {
            m2p_type::MULTI_UPDT_DATA
        };
        dhccp::set(&mut header, ty, FlitField::M2pType);
        packet.push(header);

        let mut nline_flit = 0u64;
        dhccp::set(&mut nline_flit, word_index as u64, FlitField::MultiUpdtWordIndex);
        dhccp::set(&mut nline_flit, nline.val(), FlitField::MultiUpdtNline);
        packet.push(nline_flit);

        for (i, &(wdata, be)) in words.iter().enumerate() {
            let mut flit = 0u64;
            if i + 1 == words.len() {
                dhccp::set(&mut flit, 1, FlitField::M2pEop);
            }
            dhccp::set(&mut flit, u64::from(be), FlitField::MultiUpdtBe);
            dhccp::set(&mut flit, u64::from(wdata), FlitField::MultiUpdtData);
            packet.push(flit);
        }
        self.m2p_out
            .push_back(M2pSend::Unicast(target.cc_id, packet));
    }

    fn queue_inval(&mut self, target: Owner, nline: NLine) {
        let mut header = 0u64;
        dhccp::set(&mut header, u64::from(target.cc_id.0), FlitField::MultiInvalDest);
        dhccp::set(&mut header, u64::from(self.tile), FlitField::MultiInvalSrcid);
        let ty = if target.inst {
            m2p_type::MULTI_INVAL_INST
        } else {
            m2p_type::MULTI_INVAL_DATA
        };
        dhccp::set(&mut header, ty, FlitField::M2pType);

        let mut nline_flit = 0u64;
        dhccp::set(&mut nline_flit, 1, FlitField::M2pEop);
        dhccp::set(&mut nline_flit, nline.val(), FlitField::MultiInvalNline);

        self.m2p_out
            .push_back(M2pSend::Unicast(target.cc_id, vec![header, nline_flit]));
    }

    fn queue_broadcast(&mut self, nline: NLine, sharers: &[Owner]) {
        // bounding box proven to cover the sharer set
        let mut xmin = u32::MAX;
        let mut xmax = 0;
        let mut ymin = u32::MAX;
        let mut ymax = 0;
        for s in sharers {
            let tile = s.cc_id.tile(self.l_width);
            let coord = crate::common::TileCoord::from_index(tile, self.y_width);
            xmin = xmin.min(coord.x);
            xmax = xmax.max(coord.x);
            ymin = ymin.min(coord.y);
            ymax = ymax.max(coord.y);
        }

        let mut header = 0u64;
        dhccp::set(&mut header, 1, FlitField::M2pBc);
        dhccp::set(
            &mut header,
            dhccp::pack_broadcast_box(xmin, xmax, ymin, ymax),
            FlitField::BroadcastBox,
        );
        dhccp::set(&mut header, u64::from(self.tile), FlitField::BroadcastSrcid);

        let mut nline_flit = 0u64;
        dhccp::set(&mut nline_flit, 1, FlitField::M2pEop);
        dhccp::set(&mut nline_flit, nline.val(), FlitField::BroadcastNline);

        self.m2p_out.push_back(M2pSend::Broadcast(
            vec![header, nline_flit],
            (xmin, xmax, ymin, ymax),
        ));
    }

    fn m2p_drain(&mut self, ports: &mut Ports<'_>) {
        let Some(send) = self.m2p_out.pop_front() else {
            return;
        };
        match send {
            M2pSend::Unicast(cc_id, packet) => {
                let ep = ports.map.l1_endpoint(cc_id);
                ports.m2p.push_packet(ep, packet);
            }
            M2pSend::Broadcast(packet, (xmin, xmax, ymin, ymax)) => {
                // the routers replicate at every hop inside the box;
                // recipients without a copy drop the packet after decode
                for ep in ports.map.endpoints_in_box(xmin, xmax, ymin, ymax) {
                    ports.m2p.push_packet(ep, packet.clone());
                }
            }
        }
    }

    fn send_rsp(&mut self, ports: &mut Ports<'_>, rsp: PendingRsp) {
        let ep = ports.map.rsp_endpoint(rsp.srcid);
        ports.rsp.push(
            ep,
            VciRsp {
                rsrcid: rsp.srcid,
                rtrdid: rsp.trdid,
                rpktid: rsp.pktid,
                rerror: false,
                rdata: rsp.rdata,
            },
        );
    }
}
