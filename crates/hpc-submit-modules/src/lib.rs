//! Program plug-ins for hpc-submit.
//!
//! Each module implements [`SubmitModule`] for one quantum-chemistry
//! program. The core never names a program; it looks modules up in the
//! registry returned by [`registry`].
//!
//! # Shipped modules
//!
//! | Id | Inputs | Scratch | Archive | Body |
//! |----|--------|---------|---------|------|
//! | `orca` | `.inp` | yes | yes | generic |
//! | `gaussian` | `.com` / `.gjf` | yes | no | generic |
//! | `xtb` | `.xyz` | no | no | generic |
//! | `dirac` | `.inp` + `.mol` pairs | `DIRAC_SCRATCH` | no | custom |
//! | `turbomole` | `control` + `coord` pairs | no | no | custom |
//! | `dalton` | `.dal [.mol] [.pot] [.tar.gz]` | `DALTON_TMPDIR` | no | custom |
//!
//! # Site paths
//!
//! Executables are looked up in the `[paths]` table of the site files:
//!
//! | Module | Key | Default |
//! |--------|-----|---------|
//! | `orca` | `orca_path` (directory) | `orca` on `PATH` |
//! | `gaussian` | `gaussian_exec` | `g16` |
//! | `xtb` | `xtb_exec` | `xtb` |
//! | `dirac` | `dirac_pam` | `pam` |
//! | `turbomole` | `turbomole_exec` | `dscf` |
//! | `dalton` | `dalton_exec_32i`, `dalton_exec_64i` | `dalton` |
//!
//! # Example
//!
//! ```ignore
//! use hpc_submit_core::Dispatcher;
//!
//! let dispatcher = Dispatcher::new(hpc_submit_modules::registry(), std::env::current_dir()?);
//! ```

mod common;
pub mod dalton;
pub mod dirac;
pub mod gaussian;
pub mod orca;
pub mod turbomole;
pub mod xtb;

use hpc_submit_core::ModuleRegistry;

pub use dalton::DaltonModule;
pub use dirac::DiracModule;
pub use gaussian::GaussianModule;
pub use orca::OrcaModule;
pub use turbomole::TurbomoleModule;
pub use xtb::XtbModule;

/// Registry holding every shipped module.
pub fn registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry
        .register("orca", || Box::new(OrcaModule))
        .register("gaussian", || Box::new(GaussianModule))
        .register("xtb", || Box::new(XtbModule::default()))
        .register("dirac", || Box::new(DiracModule))
        .register("turbomole", || Box::new(TurbomoleModule))
        .register("dalton", || Box::new(DaltonModule::default()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_ids() {
        let registry = registry();
        assert_eq!(
            registry.ids(),
            vec!["dalton", "dirac", "gaussian", "orca", "turbomole", "xtb"]
        );
        for id in registry.ids() {
            assert_eq!(registry.create(id).unwrap().descriptor().id, id);
        }
    }
}
