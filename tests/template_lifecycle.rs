mod support;

use ipfix_core::{DecoderConfig, IpfixDecoder};
use support::{assemble_message, data_flowset, template_flowset, template_withdrawal_flowset, RecordingSink};

const TEMPLATE_ID: u16 = 256;

fn base_fields() -> Vec<(u16, u16)> {
    vec![
        (152, 8), // flowStartMilliseconds
        (153, 8), // flowEndMilliseconds
        (4, 1),   // protocolIdentifier
        (7, 2),   // srcPort
        (11, 2),  // dstPort
        (8, 4),   // srcIPv4
        (12, 4),  // dstIPv4
        (2, 4),   // packetDeltaCount
        (1, 4),   // octetDeltaCount
    ]
}

fn sample_record() -> Vec<u8> {
    let mut r = Vec::new();
    r.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    r.extend_from_slice(&1_700_000_000_500u64.to_be_bytes());
    r.push(6);
    r.extend_from_slice(&443u16.to_be_bytes());
    r.extend_from_slice(&33000u16.to_be_bytes());
    r.extend_from_slice(&0x01020304u32.to_be_bytes());
    r.extend_from_slice(&0x05060708u32.to_be_bytes());
    r.extend_from_slice(&10u32.to_be_bytes());
    r.extend_from_slice(&1500u32.to_be_bytes());
    r
}

#[test]
fn template_add_then_single_ipv4_record() {
    let template = template_flowset(TEMPLATE_ID, &base_fields());
    let data = data_flowset(TEMPLATE_ID, &sample_record());
    let msg = assemble_message(1_700_000_001, 0, 1, &[template, data]);

    let mut decoder = IpfixDecoder::new(DecoderConfig::default());
    let mut sink = RecordingSink::new("198.51.100.1", 1_700_000_001);
    decoder.process_packet(&msg, &mut sink).unwrap();

    assert_eq!(sink.records.len(), 1);
    let rec = &sink.records[0];
    let body = 16usize; // HEADER_SIZE
    let first_sec = u32::from_be_bytes(rec[body..body + 4].try_into().unwrap());
    let first_msec = u32::from_be_bytes(rec[body + 4..body + 8].try_into().unwrap());
    let last_sec = u32::from_be_bytes(rec[body + 8..body + 12].try_into().unwrap());
    let last_msec = u32::from_be_bytes(rec[body + 12..body + 16].try_into().unwrap());
    assert_eq!((first_sec, first_msec, last_sec, last_msec), (1_700_000_000, 0, 1_700_000_000, 500));
    assert_eq!(sink.stats.tcp.packets, 10);
    assert_eq!(sink.stats.tcp.bytes, 1500);
}

#[test]
fn refresh_with_widened_counter_decodes_at_new_width() {
    let mut decoder = IpfixDecoder::new(DecoderConfig::default());
    let mut sink = RecordingSink::new("198.51.100.1", 1_700_000_001);

    let template_v1 = template_flowset(TEMPLATE_ID, &base_fields());
    let msg1 = assemble_message(1_700_000_001, 0, 1, &[template_v1]);
    decoder.process_packet(&msg1, &mut sink).unwrap();

    let mut widened = base_fields();
    let last = widened.last_mut().unwrap();
    last.1 = 8; // octetDeltaCount widened 4 -> 8
    let template_v2 = template_flowset(TEMPLATE_ID, &widened);
    let msg2 = assemble_message(1_700_000_002, 1, 1, &[template_v2]);
    decoder.process_packet(&msg2, &mut sink).unwrap();

    let mut record = Vec::new();
    record.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    record.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    record.push(6);
    record.extend_from_slice(&1u16.to_be_bytes());
    record.extend_from_slice(&2u16.to_be_bytes());
    record.extend_from_slice(&0u32.to_be_bytes());
    record.extend_from_slice(&0u32.to_be_bytes());
    record.extend_from_slice(&1u32.to_be_bytes());
    record.extend_from_slice(&0x00000001_00000000u64.to_be_bytes());

    let msg3 = assemble_message(1_700_000_003, 2, 1, &[data_flowset(TEMPLATE_ID, &record)]);
    decoder.process_packet(&msg3, &mut sink).unwrap();

    assert_eq!(sink.records.len(), 1);
    assert_eq!(sink.stats.tcp.bytes, 1u64 << 32);
}

#[test]
fn withdrawal_then_data_emits_nothing() {
    let mut decoder = IpfixDecoder::new(DecoderConfig::default());
    let mut sink = RecordingSink::new("198.51.100.1", 1_700_000_001);

    let template = template_flowset(TEMPLATE_ID, &base_fields());
    let msg1 = assemble_message(1_700_000_001, 0, 1, &[template]);
    decoder.process_packet(&msg1, &mut sink).unwrap();

    let withdrawal = template_withdrawal_flowset(TEMPLATE_ID);
    let msg2 = assemble_message(1_700_000_002, 1, 1, &[withdrawal]);
    decoder.process_packet(&msg2, &mut sink).unwrap();

    let data = data_flowset(TEMPLATE_ID, &sample_record());
    let msg3 = assemble_message(1_700_000_003, 2, 1, &[data]);
    decoder.process_packet(&msg3, &mut sink).unwrap();

    assert!(sink.records.is_empty());
}
