#[cfg(target_arch = "x86_64")]
pub fn cpuid(eax: u32, ecx: u32) -> (u32, u32, u32, u32) {
    let mut ebx: u32;
    let mut edx: u32;
    let mut eax_out = eax;
    let mut ecx_out = ecx;

    unsafe {
        std::arch::asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("eax") eax_out,
            inout("ecx") ecx_out,
            out("edx") edx,
            options(nostack, preserves_flags)
        );
    }

    (eax_out, ebx, ecx_out, edx)
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpuid(_eax: u32, _ecx: u32) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}

/// Display family, model and stepping decoded from leaf 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSignature {
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
}

impl CpuSignature {
    pub fn from_eax(eax: u32) -> Self {
        let stepping = eax & 0xF;
        let model = (eax >> 4) & 0xF;
        let family = (eax >> 8) & 0xF;
        let extended_model = (eax >> 16) & 0xF;
        let extended_family = (eax >> 20) & 0xFF;

        let display_family = if family == 0xF {
            family + extended_family
        } else {
            family
        };

        let display_model = if family == 0x6 || family == 0xF {
            (extended_model << 4) + model
        } else {
            model
        };

        Self {
            family: display_family,
            model: display_model,
            stepping,
        }
    }

    pub fn current() -> Self {
        let (eax, _ebx, _ecx, _edx) = cpuid(1, 0);
        Self::from_eax(eax)
    }
}
