//! Quality filter deciding which synthesized variants are reported.

use super::variant::{StrandBias, VarType, Variant};
use crate::config::CallerConfig;
use crate::walker::SpliceSet;

const BIASED: StrandBias = StrandBias { reference: 2, variant: 1 };

/// True when `variant` passes the reporting filters.
///
/// `reference` is the reference record at the same position; its mapping quality is used to
/// reject low-frequency variants whose reads map much worse than the reference reads.
#[must_use]
pub fn is_good_var(
    variant: &Variant,
    reference: Option<&Variant>,
    var_type: VarType,
    splices: &SpliceSet,
    config: &CallerConfig,
) -> bool {
    if variant.ref_allele.is_empty() {
        return false;
    }
    if variant.frequency < config.freq
        || variant.high_quality_count < config.min_reads
        || variant.mean_position < config.read_pos_filter
        || variant.mean_quality < config.good_quality
    {
        return false;
    }

    if let Some(r) = reference.filter(|r| r.high_quality_count > config.min_reads && variant.frequency < 0.25) {
        let d = variant.mean_mapq + variant.ref_allele.len() as f64 + variant.var_allele.len() as f64;
        if (d - 2.0 < 5.0 && r.mean_mapq > 20.0) || (1.0 + d) / (r.mean_mapq + 1.0) < 0.25 {
            return false;
        }
    }

    if var_type == VarType::Deletion
        && splices.lock().contains(&format!("{}-{}", variant.start, variant.end))
    {
        return false;
    }
    if variant.quality_ratio < config.qratio {
        return false;
    }
    if variant.frequency > 0.35 {
        return true;
    }
    if variant.mean_mapq < config.min_mean_mapq {
        return false;
    }
    if variant.msi >= 13.0 && variant.frequency <= 0.275 && variant.msi_unit == 1 {
        return false;
    }
    if variant.msi >= 8.0 && variant.frequency <= 0.2 && variant.msi_unit > 1 {
        return false;
    }
    if variant.bias == BIASED
        && variant.frequency < 0.25
        && (var_type == VarType::Snv || (variant.ref_allele.len() <= 3 && variant.var_allele.len() <= 3))
    {
        return false;
    }
    true
}
