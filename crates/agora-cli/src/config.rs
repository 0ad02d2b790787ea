//! Config file loading and writing.

use std::path::Path;

use agora_governance::GovernanceConfig;

fn reject_traversal(path: &Path) -> anyhow::Result<()> {
    if path.to_string_lossy().contains("..") {
        anyhow::bail!("Invalid path: directory traversal detected");
    }
    Ok(())
}

/// Load and validate a governance config file.
pub fn load_config(path: &Path) -> anyhow::Result<GovernanceConfig> {
    reject_traversal(path)?;
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
    let config = GovernanceConfig::from_toml_str(&contents)
        .map_err(|e| anyhow::anyhow!("Config file '{}': {}", path.display(), e))?;
    Ok(config)
}

/// Write `config` to `path`. Refuses to overwrite unless `force` is set.
pub fn write_config(path: &Path, config: &GovernanceConfig, force: bool) -> anyhow::Result<()> {
    reject_traversal(path)?;
    if path.exists() && !force {
        anyhow::bail!("'{}' already exists (use --force to overwrite)", path.display());
    }
    let contents = config.to_toml_string()?;
    std::fs::write(path, contents)
        .map_err(|e| anyhow::anyhow!("Failed to write config file '{}': {}", path.display(), e))?;
    Ok(())
}
