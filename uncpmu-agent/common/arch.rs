// Uncore generation detection

use once_cell::sync::Lazy;
use uncpmu_raw::Generation;

use crate::common::cpuid::CpuSignature;
use crate::error::{Result, UncpmuError};

/// Generation of the running processor, if it carries a supported uncore
pub static CPU_GENERATION: Lazy<Option<Generation>> = Lazy::new(|| match detect_generation() {
    Ok(generation) => Some(generation),
    Err(e) => {
        tracing::warn!("{}", e);
        None
    }
});

fn detect_generation() -> Result<Generation> {
    let sig = CpuSignature::current();

    tracing::info!(
        "CPU: Family {:X}, Model {:X}, Stepping {:X}",
        sig.family,
        sig.model,
        sig.stepping
    );

    generation_for(sig)
}

pub fn generation_for(sig: CpuSignature) -> Result<Generation> {
    // Intel architectures are Family 6
    if sig.family != 0x6 {
        return Err(UncpmuError::UnsupportedArchitecture(format!(
            "family {:X} has no supported uncore",
            sig.family
        )));
    }

    let generation = u8::try_from(sig.model)
        .ok()
        .and_then(Generation::from_cpu_model)
        .ok_or_else(|| {
            UncpmuError::UnsupportedArchitecture(format!("model {:X}", sig.model))
        })?;

    tracing::info!("Detected uncore generation: {}", generation);
    Ok(generation)
}
