//! Translation table, sequencer, and the template compiler (`spec.md`
//! §3/§4.4): compiles one template record into an ordered decoding
//! program executed per data record by [`crate::executor`].

use std::collections::HashMap;
use std::time::Instant;

use log::{trace, warn};

use crate::config::ExtensionTable;
use crate::element_catalog::{ElementCatalog, ExtensionId, FieldKind, PEN_UNSUPPORTED_6871};
use crate::error::{DecodeError, DecodeResult};

/// Marker wire length for an IPFIX variable-length field.
pub const VARIABLE_LENGTH: u16 = 65535;

/// Which of the four timestamp encodings a template uses, in priority
/// order (first family present wins) per `spec.md` §4.4 step 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFamily {
    #[default]
    None,
    DeltaMicro,
    AbsoluteMs,
    SysUpRelative,
    AbsoluteSeconds,
}

/// Named scratch slots a sequencer opcode can write into, reset to zero
/// at the start of every record (`spec.md` §3's translation-table
/// scratch fields).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackTarget {
    FlowStart,
    FlowEnd,
    Duration,
    Packets,
    Bytes,
    OutPackets,
    OutBytes,
    SysUpTime,
    IcmpTypeCode,
}

/// Per-record scratch state living on the translation table, zeroed by
/// the executor before each record (`spec.md` §4.6 step 4).
#[derive(Debug, Clone, Copy, Default)]
pub struct Scratch {
    pub flow_start_ms: u64,
    pub flow_end_ms: u64,
    pub duration_ms: u32,
    pub packets: u64,
    pub bytes: u64,
    pub out_packets: u64,
    pub out_bytes: u64,
    pub sysuptime_ms: u64,
    pub icmp_type_code: u16,
    pub has_time_mili: bool,
    pub has_duration: bool,
    pub has_system_init_time: bool,
    pub icmp_captured: bool,
}

impl Scratch {
    pub fn set(&mut self, target: StackTarget, value: u64) {
        match target {
            StackTarget::FlowStart => self.flow_start_ms = value,
            StackTarget::FlowEnd => self.flow_end_ms = value,
            StackTarget::Duration => {
                self.duration_ms = value as u32;
                self.has_duration = true;
            }
            StackTarget::Packets => self.packets = value,
            StackTarget::Bytes => self.bytes = value,
            StackTarget::OutPackets => self.out_packets = value,
            StackTarget::OutBytes => self.out_bytes = value,
            StackTarget::SysUpTime => {
                self.sysuptime_ms = value;
                self.has_system_init_time = true;
            }
            StackTarget::IcmpTypeCode => {
                self.icmp_type_code = value as u16;
                self.icmp_captured = true;
            }
        }
    }
}

/// One compiled sequencer opcode. Input-side widths/offsets live on the
/// enclosing [`SequencerSlot`]; the variants here only carry what the
/// opcode itself needs to know (an output offset, a stack target, or
/// nothing at all).
///
/// The C collector this crate's behavior is grounded on carries explicit
/// `zero8`/`zero16`/… opcodes because its output buffer is a reused ring
/// buffer that can leak a previous record's bytes. This crate allocates a
/// fresh zero-filled `Vec<u8>` per output record (see `executor.rs`), so
/// those opcodes have no work left to do and are omitted; the canonical
/// field layout that would have driven their placement still determines
/// every `out_offset` below.
#[derive(Debug, Clone, Copy)]
pub enum SequencerOp {
    Nop,
    DynSkip,
    /// Big-endian zero-extending copy: `input_length` source bytes to
    /// `output_length` output bytes at `out_offset` (covers the straight
    /// copies and the narrow-to-wide widenings alike).
    Move { out_offset: u16 },
    /// Widen to 64 bits, multiply by the record's sampling rate, write
    /// 64 bits at `out_offset`, and mirror the corrected value into
    /// `target` for statistics.
    MoveSampling { out_offset: u16, target: StackTarget },
    /// 16-bit source; only the low byte is written, at `out_offset`.
    MoveFlags { out_offset: u16 },
    Time64Mili { target: StackTarget },
    Time64MiliDur { target: StackTarget },
    TimeUnix { target: StackTarget },
    TimeDeltaMicro { target: StackTarget },
    SystemInitTime,
    TimeMili { target: StackTarget },
    /// Reads its own absolute wire offset rather than the sequential
    /// cursor — pushed once per matched ICMP field, after the main walk
    /// (`spec.md` §4.4 step 7).
    SaveIcmp { wire_offset: u16 },
}

#[derive(Debug, Clone, Copy)]
pub struct SequencerSlot {
    pub op: SequencerOp,
    /// Wire bytes this slot consumes from the sequential cursor. Zero
    /// for `SaveIcmp` (absolute offset instead) — excluded from the
    /// `Σ(input_length + skip_count) == template_wire_size` invariant.
    pub input_length: u16,
    pub output_length: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputFlags {
    pub ipv6_addr: bool,
    pub ipv6_next_hop: bool,
    pub ipv6_bgp_next_hop: bool,
    pub ipv6_exporter: bool,
    pub sampled: bool,
}

/// Per-template decoding program plus the output-record shape it
/// produces (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct TranslationTable {
    pub template_id: u16,
    pub last_update: Instant,
    pub flags: OutputFlags,
    pub output_record_size: u16,
    pub time_family: TimeFamily,
    pub time_start_offset: u16,
    pub time_end_offset: u16,
    pub router_ip_offset: u16,
    pub received_offset: u16,
    pub protocol_offset: u16,
    pub src_port_offset: u16,
    pub dst_port_offset: u16,
    pub extension_map_id: u16,
    pub extensions: Vec<ExtensionId>,
    pub extension_map_dirty: bool,
    pub sequencer: Vec<SequencerSlot>,
    pub scratch: Scratch,
}

impl TranslationTable {
    pub fn reset_scratch(&mut self) {
        self.scratch = Scratch::default();
    }
}

struct InputField {
    wire_length: u16,
    resolved: Option<(FieldKind, u16, Option<ExtensionId>)>,
}

enum WireSlot {
    Skip { length: u16 },
    DynSkip,
    Field { kind: FieldKind, wire_length: u16, output_length: u16 },
}

/// Compiles template records into [`TranslationTable`]s. Scratch state
/// lives here, per-`FlowSource`, rather than in a process-wide `static`
/// — see `spec.md` §5/§9 and the concurrency resolution recorded in
/// DESIGN.md.
pub struct TemplateCompiler {
    catalog: ElementCatalog,
}

impl TemplateCompiler {
    pub fn new() -> Self {
        TemplateCompiler { catalog: ElementCatalog::build() }
    }

    /// `fields`: `(element_id, wire_length, enterprise_number)` in wire
    /// order. `exporter_is_ipv6`: address family of the exporter itself,
    /// used only for the unconditional router-IP reservation.
    pub fn compile(
        &self,
        template_id: u16,
        fields: &[(u16, u16, Option<u32>)],
        exporter_is_ipv6: bool,
        extensions_cfg: &ExtensionTable,
        max_field_count: usize,
        extension_map_id: u16,
    ) -> DecodeResult<TranslationTable> {
        if fields.len() > max_field_count {
            return Err(DecodeError::AllocationAbandoned { context: "template field count exceeds configured maximum" });
        }

        // Step 1/2: resolve every field against the catalog (MapElement).
        let mut input_order: Vec<InputField> = Vec::with_capacity(fields.len());
        let mut wire_offset: u16 = 0;
        let mut icmp_offsets: Vec<(FieldKind, u16)> = Vec::new();
        for &(element_id, length, enterprise) in fields {
            let resolved = if enterprise == Some(PEN_UNSUPPORTED_6871) {
                trace!("template {template_id}: dropping field with unsupported PEN 6871 (element {element_id})");
                None
            } else if length == VARIABLE_LENGTH {
                None
            } else {
                self.catalog.map_element(element_id, length, enterprise).map(|m| (m.kind, m.output_length, m.extension_id))
            };

            if let Some((kind @ (FieldKind::IcmpTypeCodeV4 | FieldKind::IcmpTypeCodeV6), _, _)) = resolved {
                icmp_offsets.push((kind, wire_offset));
            }

            input_order.push(InputField { wire_length: length, resolved });
            if length != VARIABLE_LENGTH {
                wire_offset = wire_offset.saturating_add(length);
            }
        }

        // Step 3: per-kind quick lookup + union of common extensions.
        let mut by_kind: HashMap<FieldKind, u16> = HashMap::new();
        for f in &input_order {
            if let Some((kind, output_length, _)) = f.resolved {
                by_kind.insert(kind, output_length);
            }
        }

        // Step 4: compact_input_order.
        let mut wire_slots: Vec<WireSlot> = Vec::with_capacity(input_order.len());
        let mut pending_skip: u16 = 0;
        let mut any_non_skip = false;
        for f in &input_order {
            match f.resolved {
                None if f.wire_length == VARIABLE_LENGTH => {
                    if pending_skip > 0 {
                        wire_slots.push(WireSlot::Skip { length: pending_skip });
                        pending_skip = 0;
                    }
                    wire_slots.push(WireSlot::DynSkip);
                }
                None => {
                    pending_skip = pending_skip.saturating_add(f.wire_length);
                }
                Some((kind, output_length, _)) => {
                    if pending_skip > 0 {
                        wire_slots.push(WireSlot::Skip { length: pending_skip });
                        pending_skip = 0;
                    }
                    wire_slots.push(WireSlot::Field { kind, wire_length: f.wire_length, output_length });
                    any_non_skip = true;
                }
            }
        }
        if pending_skip > 0 {
            wire_slots.push(WireSlot::Skip { length: pending_skip });
        }
        if !any_non_skip {
            return Err(DecodeError::AllocationAbandoned { context: "template has no non-skipped fields" });
        }

        // Steps 5-7: canonical layout (output offsets, family choices,
        // extension presence).
        let layout = self.canonical_layout(&by_kind, exporter_is_ipv6, extensions_cfg);

        // Step 8: reorder_sequencer — walk wire_slots in wire order,
        // turning each into an executable opcode using the canonical
        // offsets computed above.
        let mut sequencer = Vec::with_capacity(wire_slots.len());
        for slot in &wire_slots {
            match *slot {
                WireSlot::Skip { length } => {
                    sequencer.push(SequencerSlot { op: SequencerOp::Nop, input_length: length, output_length: 0 });
                }
                WireSlot::DynSkip => {
                    sequencer.push(SequencerSlot { op: SequencerOp::DynSkip, input_length: 0, output_length: 0 });
                }
                WireSlot::Field { kind, wire_length, output_length } => {
                    if let Some(op) = layout.opcode_for(kind) {
                        sequencer.push(SequencerSlot { op, input_length: wire_length, output_length });
                    } else {
                        // Matched by the catalog but not part of the
                        // canonical output layout for this template
                        // (e.g. a second address-family variant that
                        // lost the family-selection tie-break): still
                        // consumes wire bytes, contributes no output.
                        sequencer.push(SequencerSlot { op: SequencerOp::Nop, input_length: wire_length, output_length: 0 });
                    }
                }
            }
        }

        // Step 7 (ICMP fix-up): appended after the main walk, each reads
        // its own absolute wire offset instead of the sequential cursor.
        for (_, offset) in &icmp_offsets {
            sequencer.push(SequencerSlot {
                op: SequencerOp::SaveIcmp { wire_offset: *offset },
                input_length: 0,
                output_length: 0,
            });
        }

        if sequencer.iter().all(|s| matches!(s.op, SequencerOp::Nop | SequencerOp::DynSkip)) {
            warn!("template {template_id}: no field survived canonical placement, discarding");
            return Err(DecodeError::SequencerReorderFailed { template_id });
        }

        Ok(TranslationTable {
            template_id,
            last_update: Instant::now(),
            flags: layout.flags,
            output_record_size: layout.output_record_size,
            time_family: layout.time_family,
            time_start_offset: layout.time_start_offset,
            time_end_offset: layout.time_end_offset,
            router_ip_offset: layout.router_ip_offset,
            received_offset: layout.received_offset,
            protocol_offset: layout.protocol_offset,
            src_port_offset: layout.src_port_offset,
            dst_port_offset: layout.dst_port_offset,
            extension_map_id,
            extensions: layout.extensions,
            extension_map_dirty: true,
            sequencer,
            scratch: Scratch::default(),
        })
    }

    fn canonical_layout(&self, by_kind: &HashMap<FieldKind, u16>, exporter_is_ipv6: bool, ext_cfg: &ExtensionTable) -> CanonicalLayout {
        CanonicalLayout::build(by_kind, exporter_is_ipv6, ext_cfg)
    }
}

impl Default for TemplateCompiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Intermediate result of the canonical-order pass: every output offset
/// and family/extension choice a template needs, plus a lookup from
/// matched [`FieldKind`] to the opcode that should run for it.
struct CanonicalLayout {
    offsets: HashMap<FieldKind, (SequencerOp, u16)>,
    flags: OutputFlags,
    time_family: TimeFamily,
    time_start_offset: u16,
    time_end_offset: u16,
    router_ip_offset: u16,
    received_offset: u16,
    protocol_offset: u16,
    src_port_offset: u16,
    dst_port_offset: u16,
    extensions: Vec<ExtensionId>,
    output_record_size: u16,
}

impl CanonicalLayout {
    fn opcode_for(&self, kind: FieldKind) -> Option<SequencerOp> {
        self.offsets.get(&kind).map(|(op, _)| *op)
    }

    fn build(by_kind: &HashMap<FieldKind, u16>, exporter_is_ipv6: bool, ext_cfg: &ExtensionTable) -> Self {
        let has = |k: FieldKind| by_kind.contains_key(&k);
        let mut offsets: HashMap<FieldKind, (SequencerOp, u16)> = HashMap::new();
        let mut flags = OutputFlags::default();
        let mut off: u16 = 0;

        // Time block: always 16 bytes (8 start + 8 end), regardless of
        // which family (or none) is chosen.
        let time_start_offset = off;
        off += 8;
        let time_end_offset = off;
        off += 8;

        let time_family = if has(FieldKind::TimeStartDeltaMicro) || has(FieldKind::TimeEndDeltaMicro) {
            TimeFamily::DeltaMicro
        } else if has(FieldKind::TimeStartAbsoluteMs) || has(FieldKind::TimeEndAbsoluteMs) {
            TimeFamily::AbsoluteMs
        } else if has(FieldKind::TimeStartSysUpRelative) || has(FieldKind::TimeEndSysUpRelative) {
            TimeFamily::SysUpRelative
        } else if has(FieldKind::TimeStartAbsoluteSeconds) || has(FieldKind::TimeEndAbsoluteSeconds) {
            TimeFamily::AbsoluteSeconds
        } else {
            TimeFamily::None
        };

        match time_family {
            TimeFamily::DeltaMicro => {
                offsets.insert(FieldKind::TimeStartDeltaMicro, (SequencerOp::TimeDeltaMicro { target: StackTarget::FlowStart }, 0));
                offsets.insert(FieldKind::TimeEndDeltaMicro, (SequencerOp::TimeDeltaMicro { target: StackTarget::FlowEnd }, 0));
            }
            TimeFamily::AbsoluteMs => {
                offsets.insert(FieldKind::TimeStartAbsoluteMs, (SequencerOp::Time64Mili { target: StackTarget::FlowStart }, 0));
                offsets.insert(FieldKind::TimeEndAbsoluteMs, (SequencerOp::Time64Mili { target: StackTarget::FlowEnd }, 0));
            }
            TimeFamily::SysUpRelative => {
                offsets.insert(FieldKind::TimeStartSysUpRelative, (SequencerOp::TimeMili { target: StackTarget::FlowStart }, 0));
                offsets.insert(FieldKind::TimeEndSysUpRelative, (SequencerOp::TimeMili { target: StackTarget::FlowEnd }, 0));
            }
            TimeFamily::AbsoluteSeconds => {
                offsets.insert(FieldKind::TimeStartAbsoluteSeconds, (SequencerOp::TimeUnix { target: StackTarget::FlowStart }, 0));
                offsets.insert(FieldKind::TimeEndAbsoluteSeconds, (SequencerOp::TimeUnix { target: StackTarget::FlowEnd }, 0));
            }
            TimeFamily::None => {}
        }
        if has(FieldKind::DurationMs) {
            offsets.insert(FieldKind::DurationMs, (SequencerOp::Time64MiliDur { target: StackTarget::Duration }, 0));
        }
        if has(FieldKind::SystemInitTimeMs) {
            offsets.insert(FieldKind::SystemInitTimeMs, (SequencerOp::SystemInitTime, 0));
        }

        macro_rules! scalar {
            ($kind:expr) => {{
                let o = off;
                offsets.insert($kind, (SequencerOp::Move { out_offset: o }, 1));
                off += 1;
            }};
        }
        scalar!(FieldKind::ForwardingStatus);
        offsets.insert(FieldKind::TcpFlags, (SequencerOp::MoveFlags { out_offset: off }, 1));
        off += 1;
        let protocol_offset = off;
        scalar!(FieldKind::Protocol);
        scalar!(FieldKind::Tos);
        let src_port_offset = off;
        {
            let o = off;
            offsets.insert(FieldKind::SrcPort, (SequencerOp::Move { out_offset: o }, 2));
            off += 2;
        }
        let dst_port_offset = off;
        {
            let o = off;
            offsets.insert(FieldKind::DstPort, (SequencerOp::Move { out_offset: o }, 2));
            off += 2;
        }
        off += 2; // reserved (historically the inline exporter-sysid slot)
        scalar!(FieldKind::BiflowDirection);
        scalar!(FieldKind::FlowEndReason);

        // Addresses: v4 pair unless an IPv6 source was captured.
        if has(FieldKind::SrcAddrV4) || !has(FieldKind::SrcAddrV6) {
            let src = off;
            offsets.insert(FieldKind::SrcAddrV4, (SequencerOp::Move { out_offset: src }, 4));
            let dst = off + 4;
            offsets.insert(FieldKind::DstAddrV4, (SequencerOp::Move { out_offset: dst }, 4));
            off += 8;
        } else {
            flags.ipv6_addr = true;
            let src = off;
            offsets.insert(FieldKind::SrcAddrV6, (SequencerOp::Move { out_offset: src }, 16));
            let dst = off + 16;
            offsets.insert(FieldKind::DstAddrV6, (SequencerOp::Move { out_offset: dst }, 16));
            off += 32;
        }

        // Counters: prefer *Total over *Delta; always 64-bit.
        {
            let packets_off = off;
            if has(FieldKind::PacketsTotal) {
                offsets.insert(FieldKind::PacketsTotal, (SequencerOp::MoveSampling { out_offset: packets_off, target: StackTarget::Packets }, 8));
            } else if has(FieldKind::PacketsDelta) {
                offsets.insert(FieldKind::PacketsDelta, (SequencerOp::MoveSampling { out_offset: packets_off, target: StackTarget::Packets }, 8));
            }
            off += 8;
            let bytes_off = off;
            if has(FieldKind::BytesTotal) {
                offsets.insert(FieldKind::BytesTotal, (SequencerOp::MoveSampling { out_offset: bytes_off, target: StackTarget::Bytes }, 8));
            } else if has(FieldKind::BytesDelta) {
                offsets.insert(FieldKind::BytesDelta, (SequencerOp::MoveSampling { out_offset: bytes_off, target: StackTarget::Bytes }, 8));
            }
            off += 8;
        }

        let mut extensions: Vec<ExtensionId> = Vec::new();

        // Snmp in/out.
        if ext_cfg.is_enabled(ExtensionId::Snmp) && (has(FieldKind::SnmpIn) || has(FieldKind::SnmpOut)) {
            extensions.push(ExtensionId::Snmp);
            if has(FieldKind::SnmpIn) {
                offsets.insert(FieldKind::SnmpIn, (SequencerOp::Move { out_offset: off }, 4));
            }
            if has(FieldKind::SnmpOut) {
                offsets.insert(FieldKind::SnmpOut, (SequencerOp::Move { out_offset: off + 4 }, 4));
            }
            off += 8;
        }

        // AS src/dst.
        if ext_cfg.is_enabled(ExtensionId::AsNumber) && (has(FieldKind::AsSrc) || has(FieldKind::AsDst)) {
            extensions.push(ExtensionId::AsNumber);
            if has(FieldKind::AsSrc) {
                offsets.insert(FieldKind::AsSrc, (SequencerOp::Move { out_offset: off }, 4));
            }
            if has(FieldKind::AsDst) {
                offsets.insert(FieldKind::AsDst, (SequencerOp::Move { out_offset: off + 4 }, 4));
            }
            off += 8;
        }

        // Multi: postTOS, direction, src/dst prefix length (matching the
        // address family already chosen above).
        let (src_prefix_kind, dst_prefix_kind) =
            if flags.ipv6_addr { (FieldKind::SrcPrefixV6, FieldKind::DstPrefixV6) } else { (FieldKind::SrcPrefixV4, FieldKind::DstPrefixV4) };
        if ext_cfg.is_enabled(ExtensionId::Multi)
            && (has(FieldKind::PostTos) || has(FieldKind::Direction) || has(src_prefix_kind) || has(dst_prefix_kind))
        {
            extensions.push(ExtensionId::Multi);
            if has(FieldKind::PostTos) {
                offsets.insert(FieldKind::PostTos, (SequencerOp::Move { out_offset: off }, 1));
            }
            if has(FieldKind::Direction) {
                offsets.insert(FieldKind::Direction, (SequencerOp::Move { out_offset: off + 1 }, 1));
            }
            if has(src_prefix_kind) {
                offsets.insert(src_prefix_kind, (SequencerOp::Move { out_offset: off + 2 }, 1));
            }
            if has(dst_prefix_kind) {
                offsets.insert(dst_prefix_kind, (SequencerOp::Move { out_offset: off + 3 }, 1));
            }
            off += 4;
        }

        // Next-hop v4/v6.
        if ext_cfg.is_enabled(ExtensionId::NextHop) && (has(FieldKind::NextHopV4) || has(FieldKind::NextHopV6)) {
            extensions.push(ExtensionId::NextHop);
            if has(FieldKind::NextHopV4) {
                offsets.insert(FieldKind::NextHopV4, (SequencerOp::Move { out_offset: off }, 4));
                off += 4;
            } else {
                flags.ipv6_next_hop = true;
                offsets.insert(FieldKind::NextHopV6, (SequencerOp::Move { out_offset: off }, 16));
                off += 16;
            }
        }

        // BGP next-hop v4/v6.
        if ext_cfg.is_enabled(ExtensionId::BgpNextHop) && (has(FieldKind::BgpNextHopV4) || has(FieldKind::BgpNextHopV6)) {
            extensions.push(ExtensionId::BgpNextHop);
            if has(FieldKind::BgpNextHopV4) {
                offsets.insert(FieldKind::BgpNextHopV4, (SequencerOp::Move { out_offset: off }, 4));
                off += 4;
            } else {
                flags.ipv6_bgp_next_hop = true;
                offsets.insert(FieldKind::BgpNextHopV6, (SequencerOp::Move { out_offset: off }, 16));
                off += 16;
            }
        }

        // VLAN in/out.
        if ext_cfg.is_enabled(ExtensionId::Vlan) && (has(FieldKind::VlanIn) || has(FieldKind::VlanOut)) {
            extensions.push(ExtensionId::Vlan);
            if has(FieldKind::VlanIn) {
                offsets.insert(FieldKind::VlanIn, (SequencerOp::Move { out_offset: off }, 2));
            }
            if has(FieldKind::VlanOut) {
                offsets.insert(FieldKind::VlanOut, (SequencerOp::Move { out_offset: off + 2 }, 2));
            }
            off += 4;
        }

        // Out-packet/out-byte counters.
        if ext_cfg.is_enabled(ExtensionId::OutCounters) && (has(FieldKind::OutPackets) || has(FieldKind::OutBytes)) {
            extensions.push(ExtensionId::OutCounters);
            if has(FieldKind::OutPackets) {
                offsets.insert(FieldKind::OutPackets, (SequencerOp::MoveSampling { out_offset: off, target: StackTarget::OutPackets }, 8));
            }
            if has(FieldKind::OutBytes) {
                offsets.insert(FieldKind::OutBytes, (SequencerOp::MoveSampling { out_offset: off + 8, target: StackTarget::OutBytes }, 8));
            }
            off += 16;
        }

        // MAC pairs.
        if ext_cfg.is_enabled(ExtensionId::Mac1) && (has(FieldKind::SrcMacIn) || has(FieldKind::DstMacIn)) {
            extensions.push(ExtensionId::Mac1);
            if has(FieldKind::SrcMacIn) {
                offsets.insert(FieldKind::SrcMacIn, (SequencerOp::Move { out_offset: off }, 8));
            }
            if has(FieldKind::DstMacIn) {
                offsets.insert(FieldKind::DstMacIn, (SequencerOp::Move { out_offset: off + 8 }, 8));
            }
            off += 16;
        }
        if ext_cfg.is_enabled(ExtensionId::Mac2) && (has(FieldKind::SrcMacOut) || has(FieldKind::DstMacOut)) {
            extensions.push(ExtensionId::Mac2);
            if has(FieldKind::SrcMacOut) {
                offsets.insert(FieldKind::SrcMacOut, (SequencerOp::Move { out_offset: off }, 8));
            }
            if has(FieldKind::DstMacOut) {
                offsets.insert(FieldKind::DstMacOut, (SequencerOp::Move { out_offset: off + 8 }, 8));
            }
            off += 16;
        }

        // MPLS labels 1..10.
        let mpls_present = (1..=10).any(|n| has(FieldKind::MplsLabel(n)));
        if ext_cfg.is_enabled(ExtensionId::Mpls) && mpls_present {
            extensions.push(ExtensionId::Mpls);
            for n in 1..=10u8 {
                let kind = FieldKind::MplsLabel(n);
                if has(kind) {
                    offsets.insert(kind, (SequencerOp::Move { out_offset: off + u16::from(n - 1) * 4 }, 4));
                }
            }
            off += 40;
        }

        // NAT event/VRF/xlate address/xlate port.
        if ext_cfg.is_enabled(ExtensionId::Nat)
            && (has(FieldKind::NatEvent) || has(FieldKind::Vrf) || has(FieldKind::XlateAddrV4) || has(FieldKind::XlatePort))
        {
            extensions.push(ExtensionId::Nat);
            if has(FieldKind::NatEvent) {
                offsets.insert(FieldKind::NatEvent, (SequencerOp::Move { out_offset: off }, 1));
            }
            if has(FieldKind::Vrf) {
                offsets.insert(FieldKind::Vrf, (SequencerOp::Move { out_offset: off + 1 }, 4));
            }
            if has(FieldKind::XlateAddrV4) {
                offsets.insert(FieldKind::XlateAddrV4, (SequencerOp::Move { out_offset: off + 5 }, 4));
            }
            if has(FieldKind::XlatePort) {
                offsets.insert(FieldKind::XlatePort, (SequencerOp::Move { out_offset: off + 9 }, 2));
            }
            off += 12;
        }

        // Unconditional: received time, then router IP (dimension chosen
        // by exporter address family).
        extensions.push(ExtensionId::Received);
        let received_offset = off;
        off += 8;

        extensions.push(ExtensionId::RouterIp);
        let router_ip_offset = off;
        if exporter_is_ipv6 {
            flags.ipv6_exporter = true;
            off += 16;
        } else {
            off += 4;
        }

        // router id (skipped): recognized but intentionally a no-op —
        // see DESIGN.md.

        // ICMP type/code is handled entirely by the `SaveIcmp` slots
        // appended after the main wire walk (they carry their own
        // absolute wire offset); deliberately no entry here so the main
        // walk treats a matched `IcmpTypeCodeV4`/`V6` field as
        // consume-only.

        // Align to 4 bytes.
        let output_record_size = off.div_ceil(4) * 4;

        extensions.sort();

        CanonicalLayout {
            offsets,
            flags,
            time_family,
            time_start_offset,
            time_end_offset,
            router_ip_offset,
            received_offset,
            protocol_offset,
            src_port_offset,
            dst_port_offset,
            extensions,
            output_record_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> TemplateCompiler {
        TemplateCompiler::new()
    }

    #[test]
    fn wire_walk_consumes_exact_template_size() {
        let c = compiler();
        let fields = vec![
            (152u16, 8u16, None),   // flowStartMilliseconds
            (153, 8, None),         // flowEndMilliseconds
            (4, 1, None),           // protocolIdentifier
            (7, 2, None),           // srcPort
            (11, 2, None),          // dstPort
            (8, 4, None),           // srcAddrV4
            (12, 4, None),          // dstAddrV4
            (2, 4, None),           // packetDeltaCount
            (1, 4, None),           // octetDeltaCount
        ];
        let table = c.compile(256, &fields, false, &ExtensionTable::default(), 64, 1).unwrap();
        let total: u32 = fields.iter().map(|f| u32::from(f.1)).sum();
        let consumed: u32 = table.sequencer.iter().filter(|s| !matches!(s.op, SequencerOp::SaveIcmp { .. })).map(|s| u32::from(s.input_length)).sum();
        assert_eq!(consumed, total);
        assert_eq!(table.output_record_size % 4, 0);
        assert!(matches!(table.time_family, TimeFamily::AbsoluteMs));
    }

    #[test]
    fn unmatched_template_is_abandoned() {
        let c = compiler();
        let fields = vec![(9999u16, 7u16, None)];
        let err = c.compile(1, &fields, false, &ExtensionTable::default(), 64, 1);
        assert!(matches!(err, Err(DecodeError::AllocationAbandoned { .. })));
    }

    #[test]
    fn reverse_element_selects_out_counters() {
        let c = compiler();
        let fields = vec![
            (4u16, 1u16, None),
            (86, 4, Some(crate::element_catalog::PEN_REVERSE_INFORMATION_ELEMENT)),
        ];
        let table = c.compile(2, &fields, false, &ExtensionTable::default(), 64, 1).unwrap();
        assert!(table.extensions.contains(&ExtensionId::OutCounters));
    }
}
