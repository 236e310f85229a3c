//! Sampler subsystem: installs sampler descriptors derived from option
//! data; the data executor consults them to scale counters
//! (`spec.md` §4.8).

use log::debug;

use crate::byte_reader::read_uint;
use crate::exporter::ExporterState;
use crate::option_template::SamplerOption;
use crate::sink::FlowSource;

/// `id == -1` denotes the default/standard sampler (the `STDMASK`
/// fields, #34/#35).
pub const STANDARD_SAMPLER_ID: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerDescriptor {
    pub id: i32,
    pub mode: u8,
    pub interval: u32,
}

/// Inserts or updates a sampler descriptor in `exporter`'s sampler list,
/// keyed by `id`. A sink flush only fires when `mode` or `interval`
/// actually changed, matching the teacher's own "flush on real change"
/// discipline for cached state.
pub fn insert_sampler(exporter: &mut ExporterState, sink: &mut impl FlowSource, id: i32, mode: u8, interval: u32) {
    if let Some(existing) = exporter.sampler_mut(id) {
        if existing.mode == mode && existing.interval == interval {
            return;
        }
        existing.mode = mode;
        existing.interval = interval;
    } else {
        exporter.samplers.push(SamplerDescriptor { id, mode, interval });
    }
    sink.flush_info_sampler(exporter.observation_domain, id, mode, interval);
}

/// Extracts `SystemInitTime` (if the option describes it) then every
/// sampler group an option data record carries, for every
/// `SamplerOption` registered under `table_id`.
pub fn process_option_data(exporter: &mut ExporterState, sink: &mut impl FlowSource, table_id: u16, data: &[u8]) {
    let options: Vec<SamplerOption> =
        exporter.sampler_options.iter().filter(|o| o.table_id == table_id).cloned().collect();

    for option in &options {
        if let Some(field) = option.system_init_time {
            if let Ok(v) = read_uint(data, field.offset as usize, field.length as usize) {
                exporter.system_init_time_ms = Some(v);
            }
        }

        if option.has_sampler_group() {
            let id_field = option.sampler_id.unwrap();
            let mode_field = option.sampler_mode.unwrap();
            let interval_field = option.sampler_interval.unwrap();
            let (Ok(id), Ok(mode), Ok(interval)) = (
                read_uint(data, id_field.offset as usize, id_field.length as usize),
                read_uint(data, mode_field.offset as usize, mode_field.length as usize),
                read_uint(data, interval_field.offset as usize, interval_field.length as usize),
            ) else {
                debug!("option data record too short for table {table_id}");
                continue;
            };
            insert_sampler(exporter, sink, id as i32, mode as u8, interval as u32);
        } else if option.has_standard_group() {
            let interval_field = option.standard_interval.unwrap();
            let algorithm_field = option.standard_algorithm.unwrap();
            let (Ok(interval), Ok(algorithm)) = (
                read_uint(data, interval_field.offset as usize, interval_field.length as usize),
                read_uint(data, algorithm_field.offset as usize, algorithm_field.length as usize),
            ) else {
                debug!("standard-sampling option data record too short for table {table_id}");
                continue;
            };
            insert_sampler(exporter, sink, STANDARD_SAMPLER_ID, algorithm as u8, interval as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::option_template::FieldOffset;
    use crate::sink::{ExporterSysId, StatsRecord};
    use crate::element_catalog::ExtensionId;
    use std::net::IpAddr;
    use std::time::SystemTime;

    struct NullSink(StatsRecord);

    impl FlowSource for NullSink {
        fn remote_ip(&self) -> IpAddr { "127.0.0.1".parse().unwrap() }
        fn receive_time(&self) -> SystemTime { SystemTime::UNIX_EPOCH }
        fn assign_sysid(&mut self, _observation_domain: u32) -> ExporterSysId { 1 }
        fn check_buffer_space(&self, _need: usize) -> bool { true }
        fn append_record(&mut self, _record: &[u8]) -> crate::error::DecodeResult<()> { Ok(()) }
        fn stats_mut(&mut self) -> &mut StatsRecord { &mut self.0 }
        fn stats(&self) -> &StatsRecord { &self.0 }
        fn add_extension_map(&mut self, _id: u16, _ext: &[ExtensionId]) {}
        fn remove_extension_map(&mut self, _id: u16) {}
        fn reinit_extension_map_list(&mut self) {}
        fn flush_info_exporter(&mut self, _od: u32, _sysid: ExporterSysId) {}
        fn flush_info_sampler(&mut self, _od: u32, _id: i32, _mode: u8, _interval: u32) {}
    }

    #[test]
    fn per_sampler_group_installs_descriptor() {
        let mut exporter = ExporterState::new("127.0.0.1".parse().unwrap(), 1, 1, 4);
        exporter.upsert_sampler_option(SamplerOption {
            table_id: 10,
            record_length: 10,
            sampler_id: Some(FieldOffset { offset: 0, length: 4 }),
            sampler_mode: Some(FieldOffset { offset: 4, length: 2 }),
            sampler_interval: Some(FieldOffset { offset: 6, length: 4 }),
            ..Default::default()
        });
        let mut sink = NullSink(StatsRecord::default());
        let data = [0, 0, 0, 7, 0, 2, 0, 0, 3, 0xE8];
        process_option_data(&mut exporter, &mut sink, 10, &data);
        let s = exporter.sampler_mut(7).unwrap();
        assert_eq!(s.mode, 2);
        assert_eq!(s.interval, 1000);
    }

    #[test]
    fn unchanged_descriptor_does_not_refire() {
        let mut exporter = ExporterState::new("127.0.0.1".parse().unwrap(), 1, 1, 4);
        let mut sink = NullSink(StatsRecord::default());
        insert_sampler(&mut exporter, &mut sink, 7, 2, 1000);
        insert_sampler(&mut exporter, &mut sink, 7, 2, 1000);
        assert_eq!(exporter.samplers.len(), 1);
    }
}
