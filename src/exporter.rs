//! Exporter registry: maps `(source IP, observation domain)` to the
//! per-exporter state that owns templates, sampler table, and sequence
//! counters. Exporters are created on first packet and never evicted
//! (`spec.md` §3/§4.3); the bounded resource underneath is the
//! per-exporter *template* cache, not the exporter itself.

use std::collections::HashMap;
use std::net::IpAddr;

use lru::LruCache;

use crate::option_template::SamplerOption;
use crate::sampler::SamplerDescriptor;
use crate::sink::ExporterSysId;
use crate::template::TranslationTable;

pub type ExporterKey = (IpAddr, u32);

/// State owned by one exporter: identity, counters, its template cache,
/// and the sampler/option tables the option-template compiler and
/// sampler subsystem populate.
pub struct ExporterState {
    pub source_ip: IpAddr,
    pub observation_domain: u32,
    pub sysid: ExporterSysId,
    pub packets: u64,
    pub flows: u64,
    pub sequence_failures: u64,
    pub padding_errors: u64,
    pub expected_sequence: u32,
    pub has_received_data: bool,
    pub templates: LruCache<u16, TranslationTable>,
    pub sampler_options: Vec<SamplerOption>,
    pub samplers: Vec<SamplerDescriptor>,
    pub system_init_time_ms: Option<u64>,
}

impl ExporterState {
    pub fn new(source_ip: IpAddr, observation_domain: u32, sysid: ExporterSysId, template_cache_size: usize) -> Self {
        let cap = std::num::NonZeroUsize::new(template_cache_size.max(1)).unwrap();
        ExporterState {
            source_ip,
            observation_domain,
            sysid,
            packets: 0,
            flows: 0,
            sequence_failures: 0,
            padding_errors: 0,
            expected_sequence: 0,
            has_received_data: false,
            templates: LruCache::new(cap),
            sampler_options: Vec::new(),
            samplers: Vec::new(),
            system_init_time_ms: None,
        }
    }

    pub fn key(&self) -> ExporterKey {
        (self.source_ip, self.observation_domain)
    }

    /// Resolves the sampler that applies right now, honoring precedence:
    /// `overwrite_sampling` (non-zero) > a sampler with `id == -1` >
    /// `default_sampling`.
    pub fn effective_sampling_rate(&self, overwrite_sampling: u32, default_sampling: u32) -> u32 {
        if overwrite_sampling > 0 {
            return overwrite_sampling;
        }
        if let Some(sampler) = self.samplers.iter().find(|s| s.id == -1) {
            return sampler.interval.max(1);
        }
        default_sampling.max(1)
    }

    pub fn sampler_option_mut(&mut self, table_id: u16) -> Option<&mut SamplerOption> {
        self.sampler_options.iter_mut().find(|o| o.table_id == table_id)
    }

    pub fn upsert_sampler_option(&mut self, option: SamplerOption) {
        if let Some(slot) = self.sampler_option_mut(option.table_id) {
            *slot = option;
        } else {
            self.sampler_options.push(option);
        }
    }

    pub fn sampler_mut(&mut self, id: i32) -> Option<&mut SamplerDescriptor> {
        self.samplers.iter_mut().find(|s| s.id == id)
    }
}

/// Registry of exporters, keyed by `(source IP, observation domain)`.
/// Backed by a plain `HashMap` since exporters are never evicted — the
/// bounded-cache machinery (`lru`) is reserved for the per-exporter
/// template map inside [`ExporterState`].
#[derive(Default)]
pub struct ExporterRegistry {
    exporters: HashMap<ExporterKey, ExporterState>,
    next_sysid: ExporterSysId,
}

impl ExporterRegistry {
    pub fn new() -> Self {
        ExporterRegistry { exporters: HashMap::new(), next_sysid: 1 }
    }

    /// Look up the exporter for `key`, allocating a fresh one (with a
    /// freshly assigned sysid) on first sight.
    pub fn get_or_create(&mut self, key: ExporterKey, template_cache_size: usize) -> &mut ExporterState {
        if !self.exporters.contains_key(&key) {
            let sysid = self.next_sysid;
            self.next_sysid += 1;
            self.exporters.insert(key, ExporterState::new(key.0, key.1, sysid, template_cache_size));
        }
        self.exporters.get_mut(&key).unwrap()
    }

    pub fn get_mut(&mut self, key: &ExporterKey) -> Option<&mut ExporterState> {
        self.exporters.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.exporters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exporters.is_empty()
    }
}
