use std::net::IpAddr;
use std::time::SystemTime;

use ipfix_core::element_catalog::ExtensionId;
use ipfix_core::{DecodeResult, ExporterSysId, FlowSource, StatsRecord};

/// In-memory `FlowSource`: collects every emitted record and the
/// extension-map registrations it was told about, with a fixed receive
/// time so timestamp assertions are deterministic.
pub struct RecordingSink {
    pub ip: IpAddr,
    pub receive_time: SystemTime,
    pub stats: StatsRecord,
    pub records: Vec<Vec<u8>>,
    pub extension_maps: Vec<(u16, Vec<ExtensionId>)>,
    pub removed_maps: Vec<u16>,
    pub buffer_cap: usize,
}

impl RecordingSink {
    pub fn new(ip: &str, receive_time_secs: u64) -> Self {
        RecordingSink {
            ip: ip.parse().unwrap(),
            receive_time: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(receive_time_secs),
            stats: StatsRecord::default(),
            records: Vec::new(),
            extension_maps: Vec::new(),
            removed_maps: Vec::new(),
            buffer_cap: usize::MAX,
        }
    }
}

impl FlowSource for RecordingSink {
    fn remote_ip(&self) -> IpAddr {
        self.ip
    }

    fn receive_time(&self) -> SystemTime {
        self.receive_time
    }

    fn assign_sysid(&mut self, _observation_domain: u32) -> ExporterSysId {
        1
    }

    fn check_buffer_space(&self, need: usize) -> bool {
        need <= self.buffer_cap
    }

    fn append_record(&mut self, record: &[u8]) -> DecodeResult<()> {
        self.records.push(record.to_vec());
        Ok(())
    }

    fn stats_mut(&mut self) -> &mut StatsRecord {
        &mut self.stats
    }

    fn stats(&self) -> &StatsRecord {
        &self.stats
    }

    fn add_extension_map(&mut self, extension_map_id: u16, extensions: &[ExtensionId]) {
        self.extension_maps.push((extension_map_id, extensions.to_vec()));
    }

    fn remove_extension_map(&mut self, extension_map_id: u16) {
        self.removed_maps.push(extension_map_id);
    }

    fn reinit_extension_map_list(&mut self) {
        self.extension_maps.clear();
    }

    fn flush_info_exporter(&mut self, _observation_domain: u32, _sysid: ExporterSysId) {}

    fn flush_info_sampler(&mut self, _observation_domain: u32, _sampler_id: i32, _mode: u8, _interval: u32) {}
}

pub fn push_u16(v: &mut Vec<u8>, x: u16) {
    v.extend_from_slice(&x.to_be_bytes());
}

pub fn push_u32(v: &mut Vec<u8>, x: u32) {
    v.extend_from_slice(&x.to_be_bytes());
}

pub fn message_header(version: u16, length: u16, export_time: u32, sequence: u32, observation_domain: u32) -> Vec<u8> {
    let mut h = Vec::new();
    push_u16(&mut h, version);
    push_u16(&mut h, length);
    push_u32(&mut h, export_time);
    push_u32(&mut h, sequence);
    push_u32(&mut h, observation_domain);
    h
}

/// Builds a template flowset (id 2) with one template record whose
/// fields are `(element_id, length)` pairs (no enterprise numbers).
pub fn template_flowset(template_id: u16, fields: &[(u16, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    push_u16(&mut body, template_id);
    push_u16(&mut body, fields.len() as u16);
    for &(id, len) in fields {
        push_u16(&mut body, id);
        push_u16(&mut body, len);
    }
    let mut set = Vec::new();
    push_u16(&mut set, 2);
    push_u16(&mut set, 4 + body.len() as u16);
    set.extend_from_slice(&body);
    set
}

/// Builds a template-withdrawal flowset (id 2) with field count 0.
pub fn template_withdrawal_flowset(template_id: u16) -> Vec<u8> {
    let mut body = Vec::new();
    push_u16(&mut body, template_id);
    push_u16(&mut body, 0);
    let mut set = Vec::new();
    push_u16(&mut set, 2);
    push_u16(&mut set, 4 + body.len() as u16);
    set.extend_from_slice(&body);
    set
}

pub fn data_flowset(flowset_id: u16, record_bytes: &[u8]) -> Vec<u8> {
    let mut set = Vec::new();
    push_u16(&mut set, flowset_id);
    push_u16(&mut set, 4 + record_bytes.len() as u16);
    set.extend_from_slice(record_bytes);
    set
}

pub fn option_template_flowset(
    template_id: u16,
    scope_fields: &[(u16, u16)],
    option_fields: &[(u16, u16)],
) -> Vec<u8> {
    let mut body = Vec::new();
    push_u16(&mut body, template_id);
    push_u16(&mut body, (scope_fields.len() + option_fields.len()) as u16);
    push_u16(&mut body, scope_fields.len() as u16);
    for &(id, len) in scope_fields.iter().chain(option_fields) {
        push_u16(&mut body, id);
        push_u16(&mut body, len);
    }
    let mut set = Vec::new();
    push_u16(&mut set, 3);
    push_u16(&mut set, 4 + body.len() as u16);
    set.extend_from_slice(&body);
    set
}

/// Assembles a full IPFIX message from a header and a list of already
/// wire-encoded flowsets.
pub fn assemble_message(export_time: u32, sequence: u32, observation_domain: u32, flowsets: &[Vec<u8>]) -> Vec<u8> {
    let total_flowsets: usize = flowsets.iter().map(Vec::len).sum();
    let mut msg = message_header(10, (16 + total_flowsets) as u16, export_time, sequence, observation_domain);
    for f in flowsets {
        msg.extend_from_slice(f);
    }
    msg
}
