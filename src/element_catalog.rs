//! Static `(element id, input length) -> field kind` catalog plus the
//! reverse-information-element table for PEN 29305.
//!
//! IANA IPFIX Information Element identifiers below follow the published
//! registry (RFC 7012 and successors); a couple of ICMP-related ids are a
//! long-standing collector convention rather than an IANA assignment and
//! are called out inline.

use std::collections::HashMap;

/// Enterprise number for the IPFIX reverse-information-element PEN.
pub const PEN_REVERSE_INFORMATION_ELEMENT: u32 = 29305;

/// Enterprise number the compiler drops unconditionally (see `spec.md` §9
/// open question — PEN 6871).
pub const PEN_UNSUPPORTED_6871: u32 = 6871;

/// Ordered grouping of optional output fields. Order here is the order
/// extension maps are registered and iterated in, matching the invariant
/// that the extension-map list is strictly ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ExtensionId {
    Received = 0,
    RouterIp = 1,
    Snmp = 2,
    AsNumber = 3,
    Multi = 4,
    NextHop = 5,
    BgpNextHop = 6,
    Vlan = 7,
    OutCounters = 8,
    Mac1 = 9,
    Mac2 = 10,
    Mpls = 11,
    Nat = 12,
}

impl ExtensionId {
    pub const ALL: [ExtensionId; 13] = [
        ExtensionId::Received,
        ExtensionId::RouterIp,
        ExtensionId::Snmp,
        ExtensionId::AsNumber,
        ExtensionId::Multi,
        ExtensionId::NextHop,
        ExtensionId::BgpNextHop,
        ExtensionId::Vlan,
        ExtensionId::OutCounters,
        ExtensionId::Mac1,
        ExtensionId::Mac2,
        ExtensionId::Mpls,
        ExtensionId::Nat,
    ];
}

/// What a catalog-matched field contributes to the output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    TimeStartDeltaMicro,
    TimeEndDeltaMicro,
    TimeStartAbsoluteMs,
    TimeEndAbsoluteMs,
    TimeStartSysUpRelative,
    TimeEndSysUpRelative,
    TimeStartAbsoluteSeconds,
    TimeEndAbsoluteSeconds,
    DurationMs,
    SystemInitTimeMs,
    ForwardingStatus,
    TcpFlags,
    Protocol,
    Tos,
    SrcPort,
    DstPort,
    BiflowDirection,
    FlowEndReason,
    SrcAddrV4,
    DstAddrV4,
    SrcAddrV6,
    DstAddrV6,
    PacketsDelta,
    PacketsTotal,
    BytesDelta,
    BytesTotal,
    SnmpIn,
    SnmpOut,
    AsSrc,
    AsDst,
    PostTos,
    Direction,
    SrcPrefixV4,
    DstPrefixV4,
    SrcPrefixV6,
    DstPrefixV6,
    NextHopV4,
    NextHopV6,
    BgpNextHopV4,
    BgpNextHopV6,
    VlanIn,
    VlanOut,
    OutPackets,
    OutBytes,
    SrcMacIn,
    DstMacIn,
    SrcMacOut,
    DstMacOut,
    MplsLabel(u8),
    NatEvent,
    Vrf,
    XlateAddrV4,
    XlatePort,
    IcmpTypeCodeV4,
    IcmpTypeCodeV6,
}

/// One row of the static element catalog: an `(element id, input length)`
/// pair maps to a field kind, its output width, and the optional
/// extension group it belongs to (`None` for mandatory/core fields).
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub element_id: u16,
    pub input_length: u16,
    pub output_length: u16,
    pub kind: FieldKind,
    pub extension_id: Option<ExtensionId>,
}

macro_rules! entry {
    ($id:expr, $len:expr, $out:expr, $kind:expr) => {
        CatalogEntry { element_id: $id, input_length: $len, output_length: $out, kind: $kind, extension_id: None }
    };
    ($id:expr, $len:expr, $out:expr, $kind:expr, $ext:expr) => {
        CatalogEntry { element_id: $id, input_length: $len, output_length: $out, kind: $kind, extension_id: Some($ext) }
    };
}

const CATALOG: &[CatalogEntry] = &[
    // Time stamps: delta-microseconds (158/159), absolute-ms (152/153),
    // sysup-relative (22/21), absolute-seconds (150/151). Output width is
    // 0 here: these decode into translation-table scratch, not a direct
    // per-entry output slot — the executor writes the fixed 16-byte
    // start/end block once scratch is resolved (step 9).
    entry!(158, 4, 0, FieldKind::TimeStartDeltaMicro),
    entry!(159, 4, 0, FieldKind::TimeEndDeltaMicro),
    entry!(152, 8, 0, FieldKind::TimeStartAbsoluteMs),
    entry!(153, 8, 0, FieldKind::TimeEndAbsoluteMs),
    entry!(22, 4, 0, FieldKind::TimeStartSysUpRelative),
    entry!(21, 4, 0, FieldKind::TimeEndSysUpRelative),
    entry!(150, 4, 0, FieldKind::TimeStartAbsoluteSeconds),
    entry!(151, 4, 0, FieldKind::TimeEndAbsoluteSeconds),
    entry!(161, 4, 0, FieldKind::DurationMs),
    entry!(160, 8, 0, FieldKind::SystemInitTimeMs),
    // Core per-record scalars.
    entry!(89, 1, 1, FieldKind::ForwardingStatus),
    entry!(6, 1, 1, FieldKind::TcpFlags),
    entry!(6, 2, 1, FieldKind::TcpFlags),
    entry!(4, 1, 1, FieldKind::Protocol),
    entry!(5, 1, 1, FieldKind::Tos),
    entry!(7, 2, 2, FieldKind::SrcPort),
    entry!(11, 2, 2, FieldKind::DstPort),
    entry!(61, 1, 1, FieldKind::BiflowDirection),
    entry!(136, 1, 1, FieldKind::FlowEndReason),
    // Addresses.
    entry!(8, 4, 4, FieldKind::SrcAddrV4),
    entry!(12, 4, 4, FieldKind::DstAddrV4),
    entry!(27, 16, 16, FieldKind::SrcAddrV6),
    entry!(28, 16, 16, FieldKind::DstAddrV6),
    // Counters: prefer *TotalCount over *DeltaCount.
    entry!(2, 4, 8, FieldKind::PacketsDelta),
    entry!(2, 8, 8, FieldKind::PacketsDelta),
    entry!(86, 4, 8, FieldKind::PacketsTotal),
    entry!(86, 8, 8, FieldKind::PacketsTotal),
    entry!(1, 4, 8, FieldKind::BytesDelta),
    entry!(1, 8, 8, FieldKind::BytesDelta),
    entry!(85, 4, 8, FieldKind::BytesTotal),
    entry!(85, 8, 8, FieldKind::BytesTotal),
    // Optional extensions, in extension-id order.
    entry!(10, 2, 4, FieldKind::SnmpIn, ExtensionId::Snmp),
    entry!(10, 4, 4, FieldKind::SnmpIn, ExtensionId::Snmp),
    entry!(14, 2, 4, FieldKind::SnmpOut, ExtensionId::Snmp),
    entry!(14, 4, 4, FieldKind::SnmpOut, ExtensionId::Snmp),
    entry!(16, 2, 4, FieldKind::AsSrc, ExtensionId::AsNumber),
    entry!(16, 4, 4, FieldKind::AsSrc, ExtensionId::AsNumber),
    entry!(17, 2, 4, FieldKind::AsDst, ExtensionId::AsNumber),
    entry!(17, 4, 4, FieldKind::AsDst, ExtensionId::AsNumber),
    entry!(55, 1, 1, FieldKind::PostTos, ExtensionId::Multi),
    entry!(61, 1, 1, FieldKind::Direction, ExtensionId::Multi),
    entry!(9, 1, 1, FieldKind::SrcPrefixV4, ExtensionId::Multi),
    entry!(13, 1, 1, FieldKind::DstPrefixV4, ExtensionId::Multi),
    entry!(29, 1, 1, FieldKind::SrcPrefixV6, ExtensionId::Multi),
    entry!(30, 1, 1, FieldKind::DstPrefixV6, ExtensionId::Multi),
    entry!(15, 4, 4, FieldKind::NextHopV4, ExtensionId::NextHop),
    entry!(62, 16, 16, FieldKind::NextHopV6, ExtensionId::NextHop),
    entry!(18, 4, 4, FieldKind::BgpNextHopV4, ExtensionId::BgpNextHop),
    entry!(63, 16, 16, FieldKind::BgpNextHopV6, ExtensionId::BgpNextHop),
    entry!(58, 2, 2, FieldKind::VlanIn, ExtensionId::Vlan),
    entry!(59, 2, 2, FieldKind::VlanOut, ExtensionId::Vlan),
    entry!(24, 4, 8, FieldKind::OutPackets, ExtensionId::OutCounters),
    entry!(24, 8, 8, FieldKind::OutPackets, ExtensionId::OutCounters),
    entry!(23, 4, 8, FieldKind::OutBytes, ExtensionId::OutCounters),
    entry!(23, 8, 8, FieldKind::OutBytes, ExtensionId::OutCounters),
    entry!(56, 6, 8, FieldKind::SrcMacIn, ExtensionId::Mac1),
    entry!(80, 6, 8, FieldKind::DstMacIn, ExtensionId::Mac1),
    entry!(81, 6, 8, FieldKind::SrcMacOut, ExtensionId::Mac2),
    entry!(57, 6, 8, FieldKind::DstMacOut, ExtensionId::Mac2),
    entry!(70, 3, 4, FieldKind::MplsLabel(1), ExtensionId::Mpls),
    entry!(71, 3, 4, FieldKind::MplsLabel(2), ExtensionId::Mpls),
    entry!(72, 3, 4, FieldKind::MplsLabel(3), ExtensionId::Mpls),
    entry!(73, 3, 4, FieldKind::MplsLabel(4), ExtensionId::Mpls),
    entry!(74, 3, 4, FieldKind::MplsLabel(5), ExtensionId::Mpls),
    entry!(75, 3, 4, FieldKind::MplsLabel(6), ExtensionId::Mpls),
    entry!(76, 3, 4, FieldKind::MplsLabel(7), ExtensionId::Mpls),
    entry!(77, 3, 4, FieldKind::MplsLabel(8), ExtensionId::Mpls),
    entry!(78, 3, 4, FieldKind::MplsLabel(9), ExtensionId::Mpls),
    entry!(79, 3, 4, FieldKind::MplsLabel(10), ExtensionId::Mpls),
    entry!(230, 1, 1, FieldKind::NatEvent, ExtensionId::Nat),
    entry!(234, 4, 4, FieldKind::Vrf, ExtensionId::Nat),
    entry!(225, 4, 4, FieldKind::XlateAddrV4, ExtensionId::Nat),
    entry!(227, 2, 2, FieldKind::XlatePort, ExtensionId::Nat),
    // ICMP type+code, combined 16-bit field. icmpTypeCodeIPv4 (32) is an
    // IANA id; icmpTypeCodeIPv6 (139) is the collector-convention id this
    // crate was distilled against, not an IANA assignment.
    entry!(32, 2, 2, FieldKind::IcmpTypeCodeV4),
    entry!(139, 2, 2, FieldKind::IcmpTypeCodeV6),
];

/// Reverse-information-element table: standard element id -> reverse
/// element id, used when a field arrives with PEN 29305. Only the ids
/// this crate tracks are listed; an id with no reverse mapping is
/// skipped the same as an unsupported enterprise number.
const REVERSE_ELEMENTS: &[(u16, u16)] = &[
    (1, 23),  // octetDeltaCount -> postOctetDeltaCount
    (2, 24),  // packetDeltaCount -> postPacketDeltaCount
    (85, 23), // octetTotalCount -> postOctetDeltaCount family (out-bytes)
    (86, 24), // packetTotalCount -> postPacketDeltaCount family (out-packets)
];

pub fn reverse_element_id(standard_id: u16) -> Option<u16> {
    REVERSE_ELEMENTS
        .iter()
        .find(|(std, _)| *std == standard_id)
        .map(|(_, rev)| *rev)
}

/// Lookup result for one field of a template being compiled.
#[derive(Debug, Clone, Copy)]
pub struct MapResult {
    pub output_length: u16,
    pub kind: FieldKind,
    pub extension_id: Option<ExtensionId>,
}

/// Per-`FlowSource` scratch state for template compilation. Kept as a
/// field on a long-lived compiler instance (one per `FlowSource`) rather
/// than a process-wide `static`, per `spec.md` §5/§9 and the concurrency
/// resolution in SPEC_FULL.md §5.
pub struct ElementCatalog {
    by_id: HashMap<u16, Vec<usize>>,
}

impl ElementCatalog {
    pub fn build() -> Self {
        let mut by_id: HashMap<u16, Vec<usize>> = HashMap::new();
        for (idx, e) in CATALOG.iter().enumerate() {
            by_id.entry(e.element_id).or_default().push(idx);
        }
        ElementCatalog { by_id }
    }

    /// Resolve `(element_id, length)` against the catalog. `enterprise`
    /// is `None` for standard elements, `Some(pen)` otherwise.
    pub fn map_element(&self, element_id: u16, length: u16, enterprise: Option<u32>) -> Option<MapResult> {
        let effective_id = match enterprise {
            None => element_id,
            Some(PEN_REVERSE_INFORMATION_ELEMENT) => reverse_element_id(element_id)?,
            Some(_) => return None,
        };
        let candidates = self.by_id.get(&effective_id)?;
        for &idx in candidates {
            let e = &CATALOG[idx];
            if e.input_length == length {
                return Some(MapResult { output_length: e.output_length, kind: e.kind, extension_id: e.extension_id });
            }
        }
        None
    }
}

impl Default for ElementCatalog {
    fn default() -> Self {
        Self::build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_standard_element_by_id_and_length() {
        let cat = ElementCatalog::build();
        let r = cat.map_element(8, 4, None).unwrap();
        assert!(matches!(r.kind, FieldKind::SrcAddrV4));
    }

    #[test]
    fn unknown_length_variant_does_not_match() {
        let cat = ElementCatalog::build();
        assert!(cat.map_element(8, 16, None).is_none());
    }

    #[test]
    fn reverse_element_rewrites_packet_total_count() {
        let cat = ElementCatalog::build();
        let r = cat.map_element(86, 4, Some(PEN_REVERSE_INFORMATION_ELEMENT)).unwrap();
        assert!(matches!(r.kind, FieldKind::OutPackets));
    }

    #[test]
    fn unsupported_pen_6871_is_dropped() {
        let cat = ElementCatalog::build();
        assert!(cat.map_element(8, 4, Some(PEN_UNSUPPORTED_6871)).is_none());
    }
}
