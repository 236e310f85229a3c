//! Data executor: walks one template's sequencer over one data record,
//! producing a fixed-layout output record with sampling correction,
//! time-stamp normalization, and ICMP fix-ups (`spec.md` §4.6).

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::byte_reader::{read_u16, read_u32, read_u64, read_uint};
use crate::config::DecoderConfig;
use crate::error::{DecodeError, DecodeResult};
use crate::exporter::ExporterState;
use crate::sink::FlowSource;
use crate::template::{SequencerOp, StackTarget, TranslationTable};

/// Fixed prefix written ahead of every output record's body: size,
/// packed flags, extension-map id, exporter sysid, protocol version.
pub const HEADER_SIZE: u16 = 16;
const NFVERSION: u8 = 10;

/// 1996-01-01T00:00:00Z — times before this are treated as unset noise
/// rather than trusted (`spec.md` §4.6 step 10).
const SANITY_EPOCH_SECONDS: u64 = 820_454_400;

fn write_u16(out: &mut [u8], offset: usize, v: u16) {
    out[offset..offset + 2].copy_from_slice(&v.to_be_bytes());
}

fn write_u32(out: &mut [u8], offset: usize, v: u32) {
    out[offset..offset + 4].copy_from_slice(&v.to_be_bytes());
}

fn write_u64(out: &mut [u8], offset: usize, v: u64) {
    out[offset..offset + 8].copy_from_slice(&v.to_be_bytes());
}

fn write_uint_be(out: &mut [u8], offset: usize, width: usize, v: u64) {
    let bytes = v.to_be_bytes();
    out[offset..offset + width].copy_from_slice(&bytes[8 - width..]);
}

/// Big-endian zero-extending copy: `src` (length `in_len`) into
/// `out[offset..offset + out_len]`, right-justified. Used for widths
/// beyond what fits in a `u64` (IPv6 addresses) as well as the narrower
/// numeric widenings, so `Move` never has to special-case width.
fn copy_be_widen(src: &[u8], out: &mut [u8], offset: usize, in_len: usize, out_len: usize) {
    let pad = out_len - in_len;
    out[offset..offset + pad].fill(0);
    out[offset + pad..offset + out_len].copy_from_slice(src);
}

fn pack_flags(flags: crate::template::OutputFlags) -> u16 {
    let mut bits = 0u16;
    if flags.ipv6_addr {
        bits |= 1 << 0;
    }
    if flags.ipv6_next_hop {
        bits |= 1 << 1;
    }
    if flags.ipv6_bgp_next_hop {
        bits |= 1 << 2;
    }
    if flags.ipv6_exporter {
        bits |= 1 << 3;
    }
    if flags.sampled {
        bits |= 1 << 4;
    }
    bits
}

fn millis_since_epoch(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Executes `table`'s sequencer over `record`, appends the resulting
/// output record to `sink`, and returns the number of wire bytes
/// consumed from `record` (the caller advances its own cursor by this
/// amount and checks it against the flowset's declared size).
pub fn execute_record(
    table: &mut TranslationTable,
    exporter: &mut ExporterState,
    sink: &mut impl FlowSource,
    cfg: &DecoderConfig,
    record: &[u8],
    export_time_secs: u32,
) -> DecodeResult<usize> {
    let total_size = HEADER_SIZE as usize + table.output_record_size as usize;
    if !sink.check_buffer_space(total_size) {
        return Err(DecodeError::BufferFull);
    }

    exporter.flows += 1;
    table.reset_scratch();

    let rate = exporter.effective_sampling_rate(cfg.overwrite_sampling, cfg.default_sampling);
    table.flags.sampled = rate != 1;

    let mut out = vec![0u8; total_size];
    let body = HEADER_SIZE as usize;

    let mut pos: usize = 0;
    for slot in &table.sequencer {
        match slot.op {
            SequencerOp::Nop => {
                pos += slot.input_length as usize;
            }
            SequencerOp::DynSkip => {
                let first = crate::byte_reader::read_u8(record, pos)?;
                pos += 1;
                if first < 255 {
                    pos += first as usize;
                } else {
                    let inner = read_u16(record, pos)?;
                    pos += 2;
                    pos += inner as usize;
                }
            }
            SequencerOp::Move { out_offset } => {
                let in_len = slot.input_length as usize;
                let out_len = slot.output_length as usize;
                if in_len > 8 || out_len > 8 {
                    let src = record.get(pos..pos + in_len).ok_or(DecodeError::Truncated {
                        context: "move",
                        needed: in_len,
                        available: record.len().saturating_sub(pos),
                    })?;
                    copy_be_widen(src, &mut out, body + out_offset as usize, in_len, out_len);
                } else {
                    let v = read_uint(record, pos, in_len)?;
                    write_uint_be(&mut out, body + out_offset as usize, out_len, v);
                }
                pos += in_len;
            }
            SequencerOp::MoveSampling { out_offset, target } => {
                let v = read_uint(record, pos, slot.input_length as usize)?;
                let corrected = v.saturating_mul(u64::from(rate));
                write_u64(&mut out, body + out_offset as usize, corrected);
                table.scratch.set(target, corrected);
                pos += slot.input_length as usize;
            }
            SequencerOp::MoveFlags { out_offset } => {
                let in_len = slot.input_length as usize;
                let v = read_uint(record, pos, in_len)?;
                out[body + out_offset as usize] = (v & 0x00FF) as u8;
                pos += in_len;
            }
            SequencerOp::Time64Mili { target } => {
                let v = read_u64(record, pos)?;
                table.scratch.set(target, v);
                pos += 8;
            }
            SequencerOp::Time64MiliDur { target } => {
                let v = read_u32(record, pos)?;
                table.scratch.set(target, u64::from(v));
                pos += 4;
            }
            SequencerOp::TimeUnix { target } => {
                let v = read_u32(record, pos)?;
                table.scratch.set(target, u64::from(v) * 1000);
                pos += 4;
            }
            SequencerOp::TimeDeltaMicro { target } => {
                let v = read_u32(record, pos)?;
                let export_micro = u64::from(export_time_secs) * 1_000_000;
                let ms = export_micro.saturating_sub(u64::from(v)) / 1000;
                table.scratch.set(target, ms);
                pos += 4;
            }
            SequencerOp::SystemInitTime => {
                let v = read_u64(record, pos)?;
                table.scratch.set(StackTarget::SysUpTime, v);
                pos += 8;
            }
            SequencerOp::TimeMili { target } => {
                let v = read_u32(record, pos)?;
                table.scratch.set(target, u64::from(v));
                table.scratch.has_time_mili = true;
                pos += 4;
            }
            SequencerOp::SaveIcmp { wire_offset } => {
                let v = read_u16(record, wire_offset as usize)?;
                table.scratch.set(StackTarget::IcmpTypeCode, u64::from(v));
            }
        }
    }

    // Step 7: ICMP fix-up.
    let protocol = out[body + table.protocol_offset as usize];
    if (protocol == 1 || protocol == 58) && table.scratch.icmp_captured {
        write_u16(&mut out, body + table.dst_port_offset as usize, table.scratch.icmp_type_code);
        write_u16(&mut out, body + table.src_port_offset as usize, 0);
    }

    // Step 8: received time, always reserved.
    let received_ms = millis_since_epoch(sink.receive_time());
    write_u64(&mut out, body + table.received_offset as usize, received_ms);

    // Step 9: resolve absolute flow times.
    if table.scratch.has_system_init_time && table.scratch.has_time_mili {
        table.scratch.flow_start_ms += table.scratch.sysuptime_ms;
        table.scratch.flow_end_ms += table.scratch.sysuptime_ms;
    } else if let Some(sysup) = exporter.system_init_time_ms {
        if table.scratch.has_time_mili {
            table.scratch.flow_start_ms += sysup;
            table.scratch.flow_end_ms += sysup;
        }
    }
    if table.scratch.has_duration && table.scratch.flow_end_ms == 0 {
        table.scratch.flow_end_ms = table.scratch.flow_start_ms + u64::from(table.scratch.duration_ms);
    }

    // Step 10: sanity against the 1996-01-01 floor.
    let start_sec = table.scratch.flow_start_ms / 1000;
    let end_sec = table.scratch.flow_end_ms / 1000;
    if start_sec < SANITY_EPOCH_SECONDS || end_sec < SANITY_EPOCH_SECONDS {
        table.scratch.flow_start_ms = 0;
        table.scratch.flow_end_ms = 0;
    }

    write_u32(&mut out, body + table.time_start_offset as usize, (table.scratch.flow_start_ms / 1000) as u32);
    write_u32(&mut out, body + table.time_start_offset as usize + 4, (table.scratch.flow_start_ms % 1000) as u32);
    write_u32(&mut out, body + table.time_end_offset as usize, (table.scratch.flow_end_ms / 1000) as u32);
    write_u32(&mut out, body + table.time_end_offset as usize + 4, (table.scratch.flow_end_ms % 1000) as u32);

    // Step 11: observed time range.
    sink.stats_mut().observe_time(table.scratch.flow_start_ms);
    sink.stats_mut().observe_time(table.scratch.flow_end_ms);

    // Step 12: stamp router IP.
    match sink.remote_ip() {
        IpAddr::V4(v4) => {
            out[body + table.router_ip_offset as usize..body + table.router_ip_offset as usize + 4]
                .copy_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            out[body + table.router_ip_offset as usize..body + table.router_ip_offset as usize + 16]
                .copy_from_slice(&v6.octets());
        }
    }

    // Header: size, flags, extension-map id, exporter sysid, nfversion.
    write_u16(&mut out, 0, total_size as u16);
    write_u16(&mut out, 2, pack_flags(table.flags));
    write_u16(&mut out, 4, table.extension_map_id);
    write_u32(&mut out, 8, exporter.sysid);
    out[12] = NFVERSION;

    // Step 13: per-protocol statistics.
    sink.stats_mut().record_flow(
        protocol,
        table.scratch.packets,
        table.scratch.bytes,
        table.scratch.out_packets,
        table.scratch.out_bytes,
    );

    // Step 14: append to the sink.
    sink.append_record(&out)?;

    Ok(pos)
}
