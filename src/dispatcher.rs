//! Top-level message dispatcher (`spec.md` §4.1-§4.3): parses the IPFIX
//! message header, resolves the sending exporter, and walks flowsets,
//! routing each to the template compiler, option-template compiler, or
//! data executor.

use log::{debug, trace, warn};
use nom_derive::{Nom, Parse};

use crate::byte_reader::Cursor;
use crate::config::{DecoderConfig, TemplateEvent};
use crate::error::{DecodeError, DecodeResult};
use crate::executor::execute_record;
use crate::exporter::{ExporterRegistry, ExporterState};
use crate::option_template::{compile_option_template, OptionField};
use crate::sampler::process_option_data;
use crate::sink::FlowSource;
use crate::template::TemplateCompiler;

const TEMPLATE_FLOWSET_ID: u16 = 2;
const OPTION_TEMPLATE_FLOWSET_ID: u16 = 3;
const DATA_FLOWSET_MIN_ID: u16 = 256;
const ENTERPRISE_BIT: u16 = 0x8000;

#[derive(Debug, Clone, Copy, Nom)]
pub struct MessageHeader {
    pub version: u16,
    pub length: u16,
    pub export_time: u32,
    pub sequence_number: u32,
    pub observation_domain_id: u32,
}

#[derive(Debug, Clone, Copy, Nom)]
struct FlowsetHeader {
    id: u16,
    length: u16,
}

/// One `(element_id, length, enterprise_number)` field spec, shared by
/// template and option-template records.
fn parse_field_spec(cursor: &mut Cursor<'_>) -> DecodeResult<(u16, u16, Option<u32>)> {
    let raw_id = cursor.take_u16()?;
    let length = cursor.take_u16()?;
    if raw_id & ENTERPRISE_BIT != 0 {
        let element_id = raw_id & !ENTERPRISE_BIT;
        let enterprise = cursor.take_u32()?;
        Ok((element_id, length, Some(enterprise)))
    } else {
        Ok((raw_id, length, None))
    }
}

/// Drives one IPFIX message end to end against `sink`, updating
/// `registry`'s exporter state and installing/refreshing templates as it
/// goes (`spec.md` §4.1-§4.5).
pub fn process_message(
    buf: &[u8],
    sink: &mut impl FlowSource,
    registry: &mut ExporterRegistry,
    compiler: &TemplateCompiler,
    config: &mut DecoderConfig,
) -> DecodeResult<()> {
    let (rest, header) = MessageHeader::parse_be(buf)
        .map_err(|_| DecodeError::Truncated { context: "message header", needed: 16, available: buf.len() })?;
    if header.version != 10 {
        return Err(DecodeError::ProtocolViolation { context: "unsupported message version" });
    }

    let observation_domain = header.observation_domain_id;
    let exporter_key = (sink.remote_ip(), observation_domain);

    {
        let exporter = registry.get_or_create(exporter_key, config.max_template_cache_size);
        if !exporter.has_received_data {
            exporter.has_received_data = true;
            exporter.expected_sequence = header.sequence_number;
            let sysid = sink.assign_sysid(observation_domain);
            exporter.sysid = sysid;
            sink.flush_info_exporter(observation_domain, sysid);
        } else if header.sequence_number != exporter.expected_sequence {
            exporter.sequence_failures += 1;
            sink.stats_mut().sequence_failures += 1;
            debug!(
                "exporter {:?}/{}: sequence mismatch, expected {} got {}",
                exporter.source_ip, observation_domain, exporter.expected_sequence, header.sequence_number
            );
        }
        exporter.expected_sequence = header.sequence_number.wrapping_add(1);
        exporter.packets += 1;
    }

    let mut cursor = Cursor::new(rest);
    while !cursor.is_empty() {
        if cursor.remaining() < 4 {
            exporter_mut(registry, exporter_key).padding_errors += 1;
            break;
        }
        let (after_header, set_header) = FlowsetHeader::parse_be(cursor.take_bytes(4)?)
            .map_err(|_| DecodeError::Truncated { context: "flowset header", needed: 4, available: cursor.remaining() })?;
        debug_assert!(after_header.is_empty());

        if set_header.length == 0 {
            return Err(DecodeError::ProtocolViolation { context: "flowset declares zero length" });
        }
        if set_header.length <= 4 {
            // Padding-only flowset: nothing left to walk.
            break;
        }
        let body_len = set_header.length as usize - 4;
        if body_len > cursor.remaining() {
            return Err(DecodeError::ProtocolViolation { context: "flowset length exceeds remaining message" });
        }
        let body = cursor.take_bytes(body_len)?;

        match set_header.id {
            TEMPLATE_FLOWSET_ID => dispatch_template_flowset(body, exporter_key, exporter_mut(registry, exporter_key), compiler, config, sink)?,
            OPTION_TEMPLATE_FLOWSET_ID => {
                dispatch_option_template_flowset(body, exporter_mut(registry, exporter_key))?
            }
            id if id < DATA_FLOWSET_MIN_ID => {
                trace!("flowset id {id} reserved, skipping");
            }
            id => dispatch_data_flowset(id, body, exporter_key, registry, sink, config, header.export_time)?,
        }
    }

    Ok(())
}

fn exporter_mut<'a>(registry: &'a mut ExporterRegistry, key: crate::exporter::ExporterKey) -> &'a mut ExporterState {
    registry.get_mut(&key).expect("exporter created at message entry")
}

fn dispatch_template_flowset(
    body: &[u8],
    exporter_key: crate::exporter::ExporterKey,
    exporter: &mut ExporterState,
    compiler: &TemplateCompiler,
    config: &mut DecoderConfig,
    sink: &mut impl FlowSource,
) -> DecodeResult<()> {
    let mut cursor = Cursor::new(body);
    while cursor.remaining() >= 4 {
        let template_id = cursor.take_u16()?;
        let field_count = cursor.take_u16()?;

        if field_count == 0 {
            exporter.templates.pop(&template_id);
            sink.remove_extension_map(template_id);
            config.fire(TemplateEvent::Withdrawn { exporter: exporter_key, template_id });
            continue;
        }

        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(parse_field_spec(&mut cursor)?);
        }

        let exporter_is_ipv6 = exporter_key.0.is_ipv6();
        match compiler.compile(template_id, &fields, exporter_is_ipv6, &config.extensions, config.max_field_count, template_id) {
            Ok(table) => {
                sink.add_extension_map(template_id, &table.extensions);
                let event = if exporter.templates.contains(&template_id) {
                    TemplateEvent::Refreshed { exporter: exporter_key, template_id }
                } else {
                    TemplateEvent::Learned { exporter: exporter_key, template_id }
                };
                if let Some((evicted_id, _)) = exporter.templates.push(template_id, table) {
                    if evicted_id != template_id {
                        config.fire(TemplateEvent::Evicted { exporter: exporter_key, template_id: evicted_id });
                    }
                }
                config.fire(event);
            }
            Err(e) => {
                warn!("template {template_id}: compile failed: {e}");
            }
        }
    }
    Ok(())
}

fn dispatch_option_template_flowset(body: &[u8], exporter: &mut ExporterState) -> DecodeResult<()> {
    let mut cursor = Cursor::new(body);
    while cursor.remaining() >= 6 {
        let template_id = cursor.take_u16()?;
        let field_count = cursor.take_u16()?;
        let scope_field_count = cursor.take_u16()?;

        if field_count == 0 {
            exporter.sampler_options.retain(|o| o.table_id != template_id);
            continue;
        }
        if scope_field_count == 0 || scope_field_count > field_count {
            return Err(DecodeError::ProtocolViolation { context: "option template scope count out of range" });
        }

        let mut scope_fields = Vec::with_capacity(scope_field_count as usize);
        for _ in 0..scope_field_count {
            let (element_id, length, enterprise) = parse_field_spec(&mut cursor)?;
            scope_fields.push(OptionField { element_id, length, enterprise_number: enterprise });
        }
        let option_field_count = field_count - scope_field_count;
        let mut option_fields = Vec::with_capacity(option_field_count as usize);
        for _ in 0..option_field_count {
            let (element_id, length, enterprise) = parse_field_spec(&mut cursor)?;
            option_fields.push(OptionField { element_id, length, enterprise_number: enterprise });
        }

        match compile_option_template(template_id, &scope_fields, &option_fields) {
            Ok(option) => exporter.upsert_sampler_option(option),
            Err(e) => warn!("option template {template_id}: compile failed: {e}"),
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn dispatch_data_flowset(
    flowset_id: u16,
    body: &[u8],
    exporter_key: crate::exporter::ExporterKey,
    registry: &mut ExporterRegistry,
    sink: &mut impl FlowSource,
    config: &mut DecoderConfig,
    export_time_secs: u32,
) -> DecodeResult<()> {
    let exporter = exporter_mut(registry, exporter_key);

    if let Some(mut table) = exporter.templates.pop(&flowset_id) {
        let mut pos = 0usize;
        while body.len().saturating_sub(pos) >= 4 {
            match execute_record(&mut table, exporter, sink, config, &body[pos..], export_time_secs) {
                Ok(consumed) if consumed > 0 => pos += consumed,
                Ok(_) => break,
                Err(e) => {
                    warn!("data flowset {flowset_id}: record decode failed: {e}");
                    break;
                }
            }
        }
        let exporter = exporter_mut(registry, exporter_key);
        exporter.templates.put(flowset_id, table);
        return Ok(());
    }

    let exporter = exporter_mut(registry, exporter_key);
    if exporter.sampler_option_mut(flowset_id).is_some() {
        process_option_data(exporter, sink, flowset_id, body);
        return Ok(());
    }

    config.fire(TemplateEvent::MissingTemplate { exporter: exporter_key, template_id: flowset_id });
    trace!("data flowset {flowset_id}: no known template, discarding {} bytes", body.len());
    Ok(())
}
