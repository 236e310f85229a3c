#![doc = include_str!("../README.md")]

pub mod byte_reader;
pub mod config;
pub mod dispatcher;
pub mod element_catalog;
pub mod error;
pub mod executor;
pub mod exporter;
pub mod option_template;
pub mod sampler;
pub mod sink;
pub mod template;

pub use config::{DecoderConfig, DecoderConfigBuilder, TemplateEvent};
pub use error::{DecodeError, DecodeResult};
pub use exporter::ExporterRegistry;
pub use sink::{ExporterSysId, FlowSource, ProtocolStats, StatsRecord};
pub use template::TemplateCompiler;

/// Bundles the exporter registry, template compiler, and configuration a
/// caller needs to decode a stream of IPFIX messages from one or more
/// exporters against a single [`FlowSource`] sink.
pub struct IpfixDecoder {
    registry: ExporterRegistry,
    compiler: TemplateCompiler,
    config: DecoderConfig,
}

impl IpfixDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        IpfixDecoder { registry: ExporterRegistry::new(), compiler: TemplateCompiler::new(), config }
    }

    /// Decodes one UDP datagram's worth of IPFIX message, dispatching
    /// learned templates, option data, and flow records into `sink`.
    pub fn process_packet(&mut self, buf: &[u8], sink: &mut impl FlowSource) -> DecodeResult<()> {
        dispatcher::process_message(buf, sink, &mut self.registry, &self.compiler, &mut self.config)
    }

    pub fn exporter_count(&self) -> usize {
        self.registry.len()
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }
}

impl Default for IpfixDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}
