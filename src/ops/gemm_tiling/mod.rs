//! Blocking parameters and template sources for the loop-tiling GEMM.
//!
//! The C++ templates are shipped with the compiler and inlined verbatim into
//! the generated translation unit; only the instantiation line is emitted per
//! call site.

use crate::ops::ExternalFile;

/// Blocking configuration of the five-loop tiled GEMM.
///
/// `nc`/`kc`/`mc` size the cache panels of B and A, `mr x nr` is the register
/// microkernel tile and `mv x nu` the unit-update shape inside it.
/// Constraints: `nr % nu == 0`, `mr % mv == 0`, `mc % mr == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTilingParams {
    pub nc: usize,
    pub kc: usize,
    pub mc: usize,
    pub mr: usize,
    pub nr: usize,
    pub mv: usize,
    pub nu: usize,
}

impl Default for LoopTilingParams {
    fn default() -> Self {
        LoopTilingParams {
            nc: 4096,
            kc: 256,
            mc: 256,
            mr: 4,
            nr: 8,
            mv: 4,
            nu: 4,
        }
    }
}

pub const EXTERNAL_FILES: [ExternalFile; 4] = [
    ExternalFile {
        name: "gpackA.cpp",
        contents: include_str!("gpackA.cpp"),
    },
    ExternalFile {
        name: "gpackB.cpp",
        contents: include_str!("gpackB.cpp"),
    },
    ExternalFile {
        name: "microkernel.cpp",
        contents: include_str!("microkernel.cpp"),
    },
    ExternalFile {
        name: "gemm.cpp",
        contents: include_str!("gemm.cpp"),
    },
];

/// Instantiation line for one call site. The B panel width is clamped to the
/// next power of two of N so small problems do not pay for a 4096-wide pack.
pub fn call_gemm(m: usize, k: usize, n: usize, params: &LoopTilingParams, args: &str) -> String {
    debug_assert!(params.nr % params.nu == 0);
    debug_assert!(params.mr % params.mv == 0);
    debug_assert!(params.mc % params.mr == 0);
    let nc = n.next_power_of_two().min(params.nc);
    format!(
        "gemm<{m},{k},{n},{nc},{kc},{mc},{mr},{nr},{mv},{nu}>({args});",
        kc = params.kc,
        mc = params.mc,
        mr = params.mr,
        nr = params.nr,
        mv = params.mv,
        nu = params.nu,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_match_tuning() {
        let p = LoopTilingParams::default();
        assert_eq!((p.nc, p.kc, p.mc, p.mr, p.nr, p.mv, p.nu), (4096, 256, 256, 4, 8, 4, 4));
    }

    #[test]
    fn panel_width_clamps_to_power_of_two() {
        let p = LoopTilingParams::default();
        assert_eq!(
            call_gemm(512, 512, 512, &p, "A, B, OUT"),
            "gemm<512,512,512,512,256,256,4,8,4,4>(A, B, OUT);"
        );
        assert_eq!(
            call_gemm(16, 16, 6000, &p, "A, B, OUT"),
            "gemm<16,16,6000,4096,256,256,4,8,4,4>(A, B, OUT);"
        );
    }
}
