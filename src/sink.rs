//! The `FlowSource` sink contract: everything the core observes about or
//! writes into the caller's world. The core never owns an output buffer,
//! a socket, or a file — every observable effect flows through this
//! trait, matching `spec.md` §6's external-interface boundary.

use std::net::IpAddr;
use std::time::SystemTime;

use serde::Serialize;

use crate::element_catalog::ExtensionId;
use crate::error::DecodeResult;

/// Per-protocol-class counters the sink tracks across the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
    pub flows: u64,
    pub packets: u64,
    pub bytes: u64,
    pub out_packets: u64,
    pub out_bytes: u64,
}

/// The statistics record a `FlowSource` exposes, updated by the executor
/// and dispatcher as records and datagrams are processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsRecord {
    pub icmp: ProtocolStats,
    pub tcp: ProtocolStats,
    pub udp: ProtocolStats,
    pub other: ProtocolStats,
    pub total_flows: u64,
    pub total_packets: u64,
    pub total_bytes: u64,
    pub sequence_failures: u64,
    pub first_seen: Option<u64>,
    pub last_seen: Option<u64>,
}

impl StatsRecord {
    fn class_mut(&mut self, protocol: u8) -> &mut ProtocolStats {
        match protocol {
            1 | 58 => &mut self.icmp,
            6 => &mut self.tcp,
            17 => &mut self.udp,
            _ => &mut self.other,
        }
    }

    pub fn record_flow(&mut self, protocol: u8, packets: u64, bytes: u64, out_packets: u64, out_bytes: u64) {
        {
            let c = self.class_mut(protocol);
            c.flows += 1;
            c.packets += packets;
            c.bytes += bytes;
            c.out_packets += out_packets;
            c.out_bytes += out_bytes;
        }
        self.total_flows += 1;
        self.total_packets += packets;
        self.total_bytes += bytes;
    }

    pub fn observe_time(&mut self, millis: u64) {
        self.first_seen = Some(self.first_seen.map_or(millis, |v| v.min(millis)));
        self.last_seen = Some(self.last_seen.map_or(millis, |v| v.max(millis)));
    }
}

/// A sysid assigned by the sink on first flush of a newly learned
/// exporter. `spec.md` §9 leaves assignment policy to the sink; the core
/// only requires it be stable and non-reused for the life of the process
/// (see DESIGN.md's Open Question resolution).
pub type ExporterSysId = u32;

/// Everything the core needs from the caller's world: identity of the
/// remote exporter, a clock, an append-only output buffer with a block
/// header, a statistics record, and the handful of lifecycle callbacks
/// the template/sampler subsystems trigger.
pub trait FlowSource {
    /// Address family/IP of the datagram's source, as seen by the socket
    /// layer (out of this crate's scope to obtain).
    fn remote_ip(&self) -> IpAddr;

    /// Wall-clock time the datagram was received, used to stamp
    /// `received_ms` and to resolve `TimeDeltaMicro` timestamps.
    fn receive_time(&self) -> SystemTime;

    /// Assign (or return the existing) local sysid for an exporter first
    /// seen at `(remote_ip, observation_domain)`.
    fn assign_sysid(&mut self, observation_domain: u32) -> ExporterSysId;

    /// True if there is room for `need` more bytes in the current output
    /// block without exceeding its size cap.
    fn check_buffer_space(&self, need: usize) -> bool;

    /// Append one fully-formed output record to the block, advance the
    /// write pointer, and increment the block's record count. Returns
    /// `DecodeError::BufferFull`/`BufferOverflow` if the append could not
    /// be completed cleanly; the caller aborts the current datagram.
    fn append_record(&mut self, record: &[u8]) -> DecodeResult<()>;

    /// Mutable access to the statistics record the executor updates.
    fn stats_mut(&mut self) -> &mut StatsRecord;

    fn stats(&self) -> &StatsRecord;

    /// Register (or update) the extension map for `extension_map_id`
    /// with the ordered list of extensions it carries. Called whenever a
    /// translation table's extension map changes.
    fn add_extension_map(&mut self, extension_map_id: u16, extensions: &[ExtensionId]);

    fn remove_extension_map(&mut self, extension_map_id: u16);

    /// Drop and rebuild the whole extension-map registry, used when a
    /// `FlowSource` is reset independently of any one template.
    fn reinit_extension_map_list(&mut self);

    /// Flush an exporter's identity/counters to the sink (called when an
    /// exporter is first learned and periodically thereafter).
    fn flush_info_exporter(&mut self, observation_domain: u32, sysid: ExporterSysId);

    /// Flush a sampler descriptor change to the sink.
    fn flush_info_sampler(&mut self, observation_domain: u32, sampler_id: i32, mode: u8, interval: u32);
}
