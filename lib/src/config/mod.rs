use std::path::{Path, PathBuf};

use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use log::warn;
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

/// Maximum number of mark pairs the VM can address. Start descriptors carry
/// one 32-bits mask per mark pair, with one bit per mark.
pub const MARK_MASK_BITS: u8 = 32;

/// Configuration for the compiler and the character class loader.
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Capacity of the target virtual machine.
    pub vm: VmLimits,
    /// Character class loading.
    pub classes: ClassConfig,
}

/// Capacity limits of the target virtual machine.
///
/// The compiler treats these as hard ceilings, a pattern that doesn't fit
/// within them fails to compile.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VmLimits {
    /// Total number of automaton states.
    pub max_states: u32,
    /// Total number of bytecode instructions.
    pub max_bytecode: u32,
    /// Number of loop counters a program can use simultaneously.
    pub max_counters: u8,
    /// Number of capture mark pairs.
    pub max_mark_pairs: u8,
    /// Number of repeat guards.
    pub max_guards: u32,
}

impl Default for VmLimits {
    fn default() -> Self {
        Self {
            max_states: 16384,
            max_bytecode: 49152,
            max_counters: 4,
            max_mark_pairs: MARK_MASK_BITS,
            max_guards: 4096,
        }
    }
}

/// Character class loading configuration.
#[derive(Deserialize, Serialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClassConfig {
    /// Directory with pre-built character class files, organized in one
    /// sub-directory per encoding.
    pub search_path: Option<PathBuf>,
}

/// Load config file from a given path. Path must contain a valid TOML file or
/// this function will propagate the error. Values missing in the file take
/// their defaults from [`Config::default`].
pub fn load_config_from_file(
    config_file: &Path,
) -> Result<Config, figment::Error> {
    let mut config: Config =
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file_exact(config_file))
            .extract()?;

    if config.vm.max_mark_pairs > MARK_MASK_BITS {
        warn!(
            "max_mark_pairs = {} exceeds the width of mark masks, using {}",
            config.vm.max_mark_pairs, MARK_MASK_BITS
        );
        config.vm.max_mark_pairs = MARK_MASK_BITS;
    }

    // 0xFFFF is reserved as the "character accepted" destination.
    if config.vm.max_states > 0xFFFF {
        warn!(
            "max_states = {} collides with reserved state ids, using {}",
            config.vm.max_states, 0xFFFF
        );
        config.vm.max_states = 0xFFFF;
    }

    Ok(config)
}
