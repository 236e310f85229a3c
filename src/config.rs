//! Decoder configuration: sampling defaults, the extension-descriptor
//! table, resource caps, and the template-lifecycle hook, built the same
//! way the teacher's `NetflowParserBuilder` assembles a `NetflowParser`.

use std::fmt;

use serde::Serialize;

use crate::element_catalog::ExtensionId;
use crate::exporter::ExporterKey;

/// Per-extension enable bit and output width, replacing a bare
/// `extension_descriptor[]` array index with a small typed API.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionDescriptor {
    pub enabled: bool,
    pub output_size: u16,
}

/// Wraps the extension-descriptor table behind `is_enabled`/`output_size`
/// lookups keyed by [`ExtensionId`].
#[derive(Debug, Clone)]
pub struct ExtensionTable {
    descriptors: [ExtensionDescriptor; ExtensionId::ALL.len()],
}

impl ExtensionTable {
    pub fn is_enabled(&self, id: ExtensionId) -> bool {
        self.descriptors[id as usize].enabled
    }

    pub fn output_size(&self, id: ExtensionId) -> u16 {
        self.descriptors[id as usize].output_size
    }

    pub fn set_enabled(&mut self, id: ExtensionId, enabled: bool) {
        self.descriptors[id as usize].enabled = enabled;
    }
}

impl Default for ExtensionTable {
    fn default() -> Self {
        ExtensionTable {
            descriptors: [ExtensionDescriptor { enabled: true, output_size: 0 }; ExtensionId::ALL.len()],
        }
    }
}

/// Events fired as templates are learned, refreshed, withdrawn, evicted
/// from the bounded per-exporter cache, or referenced before they exist.
/// Observability only; modeled on the teacher's own template-event hook.
#[derive(Debug, Clone, Serialize)]
pub enum TemplateEvent {
    Learned { exporter: ExporterKey, template_id: u16 },
    Refreshed { exporter: ExporterKey, template_id: u16 },
    Withdrawn { exporter: ExporterKey, template_id: u16 },
    Evicted { exporter: ExporterKey, template_id: u16 },
    MissingTemplate { exporter: ExporterKey, template_id: u16 },
}

pub type TemplateEventHook = Box<dyn FnMut(TemplateEvent) + Send>;

/// Top-level decoder configuration, passed to `init`.
pub struct DecoderConfig {
    pub verbose: bool,
    pub default_sampling: u32,
    pub overwrite_sampling: u32,
    pub extensions: ExtensionTable,
    pub max_template_cache_size: usize,
    pub max_field_count: usize,
    pub on_template_event: Option<TemplateEventHook>,
}

impl fmt::Debug for DecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderConfig")
            .field("verbose", &self.verbose)
            .field("default_sampling", &self.default_sampling)
            .field("overwrite_sampling", &self.overwrite_sampling)
            .field("extensions", &self.extensions)
            .field("max_template_cache_size", &self.max_template_cache_size)
            .field("max_field_count", &self.max_field_count)
            .field("on_template_event", &self.on_template_event.is_some())
            .finish()
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfigBuilder::default().build()
    }
}

impl DecoderConfig {
    pub fn builder() -> DecoderConfigBuilder {
        DecoderConfigBuilder::default()
    }

    pub(crate) fn fire(&mut self, event: TemplateEvent) {
        if let Some(hook) = self.on_template_event.as_mut() {
            hook(event);
        }
    }
}

#[derive(Default)]
pub struct DecoderConfigBuilder {
    verbose: bool,
    default_sampling: u32,
    overwrite_sampling: u32,
    extensions: Option<ExtensionTable>,
    max_template_cache_size: Option<usize>,
    max_field_count: Option<usize>,
    on_template_event: Option<TemplateEventHook>,
}

impl DecoderConfigBuilder {
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn with_default_sampling(mut self, rate: u32) -> Self {
        self.default_sampling = rate;
        self
    }

    #[must_use]
    pub fn with_overwrite_sampling(mut self, rate: u32) -> Self {
        self.overwrite_sampling = rate;
        self
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: ExtensionTable) -> Self {
        self.extensions = Some(extensions);
        self
    }

    #[must_use]
    pub fn with_max_template_cache_size(mut self, size: usize) -> Self {
        self.max_template_cache_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_max_field_count(mut self, count: usize) -> Self {
        self.max_field_count = Some(count);
        self
    }

    #[must_use]
    pub fn on_template_event<F>(mut self, hook: F) -> Self
    where
        F: FnMut(TemplateEvent) + Send + 'static,
    {
        self.on_template_event = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> DecoderConfig {
        DecoderConfig {
            verbose: self.verbose,
            default_sampling: if self.default_sampling == 0 { 1 } else { self.default_sampling },
            overwrite_sampling: self.overwrite_sampling,
            extensions: self.extensions.unwrap_or_default(),
            max_template_cache_size: self.max_template_cache_size.unwrap_or(256),
            max_field_count: self.max_field_count.unwrap_or(256),
            on_template_event: self.on_template_event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sampling_of_zero_is_treated_as_unsampled() {
        let cfg = DecoderConfigBuilder::default().build();
        assert_eq!(cfg.default_sampling, 1);
    }

    #[test]
    fn extension_table_defaults_to_enabled() {
        let table = ExtensionTable::default();
        assert!(table.is_enabled(ExtensionId::Mpls));
    }
}
