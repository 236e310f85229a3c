mod support;

use ipfix_core::{DecoderConfig, IpfixDecoder};
use support::{assemble_message, data_flowset, message_header, push_u16, template_flowset, RecordingSink};

const TEMPLATE_ID: u16 = 700;

fn fields() -> Vec<(u16, u16)> {
    vec![(4, 1), (7, 2), (11, 2), (8, 4), (12, 4), (2, 4), (1, 4)]
}

fn one_record() -> Vec<u8> {
    let mut r = Vec::new();
    r.push(6);
    r.extend_from_slice(&1u16.to_be_bytes());
    r.extend_from_slice(&2u16.to_be_bytes());
    r.extend_from_slice(&0u32.to_be_bytes());
    r.extend_from_slice(&0u32.to_be_bytes());
    r.extend_from_slice(&1u32.to_be_bytes());
    r.extend_from_slice(&1u32.to_be_bytes());
    r
}

/// A sequence gap bumps the exporter's failure counter exactly once,
/// and the next datagram that resumes the expected count does not.
#[test]
fn sequence_gap_counts_once_then_recovers() {
    let mut decoder = IpfixDecoder::new(DecoderConfig::default());
    let mut sink = RecordingSink::new("192.0.2.50", 1_700_000_001);

    let template = template_flowset(TEMPLATE_ID, &fields());
    let data = data_flowset(TEMPLATE_ID, &one_record());

    let msg_a = assemble_message(1_700_000_001, 100, 1, &[template, data.clone()]);
    decoder.process_packet(&msg_a, &mut sink).unwrap();
    assert_eq!(sink.stats.tcp.packets, 1);

    // Exporter expected seq 101 (100 + one record in A), but B arrives at 150.
    let msg_b = assemble_message(1_700_000_002, 150, 1, &[data.clone()]);
    decoder.process_packet(&msg_b, &mut sink).unwrap();

    assert_eq!(sink.stats.sequence_failures, 1);

    let msg_c = assemble_message(1_700_000_003, 151, 1, &[data]);
    decoder.process_packet(&msg_c, &mut sink).unwrap();

    assert_eq!(sink.stats.sequence_failures, 1);
    assert_eq!(sink.stats.tcp.packets, 3);
}

/// A header-only flowset (declared length 4, zero records) is legitimate
/// padding, not an error, and trailing bytes after the last flowset in
/// the datagram are likewise ignored rather than treated as a new flowset.
#[test]
fn padding_flowset_and_trailing_bytes_are_not_errors() {
    let mut decoder = IpfixDecoder::new(DecoderConfig::default());
    let mut sink = RecordingSink::new("192.0.2.50", 1_700_000_001);

    let template = template_flowset(TEMPLATE_ID, &fields());
    let data = data_flowset(TEMPLATE_ID, &one_record());

    let mut padding_flowset = Vec::new();
    push_u16(&mut padding_flowset, TEMPLATE_ID);
    push_u16(&mut padding_flowset, 4);

    let mut msg = message_header(10, 0, 1_700_000_004, 0, 1);
    msg.extend_from_slice(&template);
    msg.extend_from_slice(&data);
    msg.extend_from_slice(&padding_flowset);
    msg.extend_from_slice(&[0u8, 0, 0]); // trailing padding, shorter than any header
    let total_len = msg.len() as u16;
    msg[2..4].copy_from_slice(&total_len.to_be_bytes());

    let result = decoder.process_packet(&msg, &mut sink);
    assert!(result.is_ok());
    assert_eq!(sink.records.len(), 1);
}

/// A flowset whose declared length overruns the remaining datagram bytes
/// aborts the datagram without emitting the record it claimed to carry.
#[test]
fn flowset_length_overrunning_datagram_aborts_without_panicking() {
    let mut decoder = IpfixDecoder::new(DecoderConfig::default());
    let mut sink = RecordingSink::new("192.0.2.50", 1_700_000_001);

    let template = template_flowset(TEMPLATE_ID, &fields());
    let msg1 = assemble_message(1_700_000_001, 0, 1, &[template]);
    decoder.process_packet(&msg1, &mut sink).unwrap();

    let mut bad_flowset = Vec::new();
    push_u16(&mut bad_flowset, TEMPLATE_ID);
    push_u16(&mut bad_flowset, 4 + one_record().len() as u16 + 100); // overstates its length
    bad_flowset.extend_from_slice(&one_record());

    let mut msg = message_header(10, 0, 1_700_000_002, 1, 1);
    msg.extend_from_slice(&bad_flowset);
    let total_len = msg.len() as u16;
    msg[2..4].copy_from_slice(&total_len.to_be_bytes());

    let result = decoder.process_packet(&msg, &mut sink);
    assert!(result.is_err());
    assert!(sink.records.is_empty());
}

/// The RFC 7011 variable-length prefix convention: a first byte below
/// 255 is the length itself; 255 means a following big-endian u16 holds
/// the real length. Exercised here through a template that mixes one
/// variable-length field (an opaque octet array) with fixed counters.
#[test]
fn variable_length_prefix_is_skipped_both_short_and_long_forms() {
    let mut decoder = IpfixDecoder::new(DecoderConfig::default());
    let mut sink = RecordingSink::new("192.0.2.50", 1_700_000_001);

    let mut var_fields = fields();
    var_fields.push((210, 65535)); // paddingOctets, wire-coded as variable-length

    let template = template_flowset(TEMPLATE_ID, &var_fields);
    let msg1 = assemble_message(1_700_000_001, 0, 1, &[template]);
    decoder.process_packet(&msg1, &mut sink).unwrap();

    // Short form: length byte 5, then 5 bytes of payload.
    let mut record_short = one_record();
    record_short.push(5);
    record_short.extend_from_slice(&[0xAA; 5]);
    let msg2 = assemble_message(1_700_000_002, 1, 1, &[data_flowset(TEMPLATE_ID, &record_short)]);
    decoder.process_packet(&msg2, &mut sink).unwrap();

    // Long form: length byte 255, then u16 = 300, then 300 bytes of payload.
    let mut record_long = one_record();
    record_long.push(255);
    record_long.extend_from_slice(&300u16.to_be_bytes());
    record_long.extend_from_slice(&[0xBB; 300]);
    let msg3 = assemble_message(1_700_000_003, 2, 1, &[data_flowset(TEMPLATE_ID, &record_long)]);
    decoder.process_packet(&msg3, &mut sink).unwrap();

    assert_eq!(sink.records.len(), 2);
    assert_eq!(sink.stats.tcp.packets, 2);
}
