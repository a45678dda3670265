use log::info;
use serde_json::Value;

use crate::{Md4Config, Overrides, Result};

/// Lists the variants to start as separate work units, one `add` call each.
pub fn sweep(add: &mut dyn FnMut(Overrides)) {
    // Best likelihood. For best sample quality use cosine / uniform instead.
    add(Overrides::from_iter([
        ("noise_schedule".to_string(), Value::from("linear")),
        ("sampling_grid".to_string(), Value::from("cosine")),
    ]));
}

/// Configurations of every work unit of the sweep over `base`.
pub fn sweep_configs(base: &Md4Config) -> Result<Vec<Md4Config>> {
    let mut variants = Vec::new();
    sweep(&mut |overrides| variants.push(overrides));
    info!("Sweep defines {} work units", variants.len());

    variants
        .iter()
        .map(|overrides| base.with_overrides(overrides))
        .collect()
}
