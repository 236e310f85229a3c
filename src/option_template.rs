//! Option-template compiler: recognizes sampler-describing and
//! system-uptime option templates (`spec.md` §4.5) and stores field
//! offsets/lengths for later data-driven extraction by the sampler
//! subsystem.

use crate::error::{DecodeError, DecodeResult};

/// Offset and wire width of one recognized field within an option data
/// record, resolved once at compile time and reused for every
/// subsequent option data record carrying this `table_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOffset {
    pub offset: u16,
    pub length: u16,
}

/// One field in the option template's scope+option field-spec list, as
/// handed to the compiler by the dispatcher after parsing the template
/// record header.
#[derive(Debug, Clone, Copy)]
pub struct OptionField {
    pub element_id: u16,
    pub length: u16,
    pub enterprise_number: Option<u32>,
}

const ELEM_STANDARD_INTERVAL: u16 = 34;
const ELEM_STANDARD_ALGORITHM: u16 = 35;
const ELEM_SAMPLER_ID: u16 = 48;
const ELEM_SAMPLER_ID_ALT: u16 = 302;
const ELEM_SAMPLER_MODE: u16 = 49;
const ELEM_SAMPLER_MODE_ALT: u16 = 304;
const ELEM_SAMPLER_INTERVAL: u16 = 50;
const ELEM_SAMPLER_INTERVAL_ALT: u16 = 305;
const ELEM_SYSTEM_INIT_TIME_MS: u16 = 160;

/// Compiled option template: offsets into a wire option-data record for
/// every recognized field, plus the flags telling the sampler subsystem
/// which group(s) are complete enough to extract.
#[derive(Debug, Clone, Default)]
pub struct SamplerOption {
    pub table_id: u16,
    pub record_length: u16,
    pub standard_interval: Option<FieldOffset>,
    pub standard_algorithm: Option<FieldOffset>,
    pub sampler_id: Option<FieldOffset>,
    pub sampler_mode: Option<FieldOffset>,
    pub sampler_interval: Option<FieldOffset>,
    pub system_init_time: Option<FieldOffset>,
}

impl SamplerOption {
    pub fn has_standard_group(&self) -> bool {
        self.standard_interval.is_some() && self.standard_algorithm.is_some()
    }

    pub fn has_sampler_group(&self) -> bool {
        self.sampler_id.is_some() && self.sampler_mode.is_some() && self.sampler_interval.is_some()
    }
}

/// Compiles one option template: `scope_fields` are walked only to
/// advance the cumulative offset (per `spec.md` §4.5, scope fields carry
/// no recognized payload here), then `option_fields` are matched against
/// the small set of recognized element ids.
pub fn compile_option_template(
    table_id: u16,
    scope_fields: &[OptionField],
    option_fields: &[OptionField],
) -> DecodeResult<SamplerOption> {
    if scope_fields.is_empty() {
        return Err(DecodeError::ProtocolViolation { context: "option template scope count is zero" });
    }

    let mut offset: u16 = 0;
    for f in scope_fields {
        offset = offset.saturating_add(f.length);
    }

    let mut result = SamplerOption { table_id, ..Default::default() };

    for f in option_fields {
        let here = FieldOffset { offset, length: f.length };
        if f.enterprise_number.is_none() {
            match f.element_id {
                ELEM_STANDARD_INTERVAL => result.standard_interval = Some(here),
                ELEM_STANDARD_ALGORITHM => result.standard_algorithm = Some(here),
                ELEM_SAMPLER_ID | ELEM_SAMPLER_ID_ALT => result.sampler_id = Some(here),
                ELEM_SAMPLER_MODE | ELEM_SAMPLER_MODE_ALT => result.sampler_mode = Some(here),
                ELEM_SAMPLER_INTERVAL | ELEM_SAMPLER_INTERVAL_ALT => result.sampler_interval = Some(here),
                ELEM_SYSTEM_INIT_TIME_MS => result.system_init_time = Some(here),
                _ => {}
            }
        }
        offset = offset.saturating_add(f.length);
    }

    result.record_length = offset;
    Ok(result)
}
