use tracing::warn;

/// Root constants available to a program's constant buffer, in bytes.
///
/// D3D12 root signatures are limited to 64 DWORDs; one is reserved per resource table.
pub const DEFAULT_CONSTANT_BUFFER_LIMIT: u32 = 192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Check dispatch arguments against the program's reflected element types.
    pub validation: bool,
    /// Closed command lists created when the device is built.
    pub command_list_prewarm: usize,
    /// Upper bound on a program's constant buffer size, in bytes.
    pub constant_buffer_limit: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            command_list_prewarm: 0,
            constant_buffer_limit: DEFAULT_CONSTANT_BUFFER_LIMIT,
        }
    }
}

impl DeviceConfig {
    /// Defaults overridden by `DXCOMPUTE_VALIDATION` and `DXCOMPUTE_COMMAND_LIST_PREWARM`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup("DXCOMPUTE_VALIDATION") {
            match parse_flag(&raw) {
                Some(validation) => config.validation = validation,
                None => warn!(value = %raw, "ignoring invalid DXCOMPUTE_VALIDATION"),
            }
        }

        if let Some(raw) = lookup("DXCOMPUTE_COMMAND_LIST_PREWARM") {
            match raw.trim().parse() {
                Ok(count) => config.command_list_prewarm = count,
                Err(_) => warn!(value = %raw, "ignoring invalid DXCOMPUTE_COMMAND_LIST_PREWARM"),
            }
        }

        config
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    let v = raw.trim();
    if v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
    {
        Some(true)
    } else if v == "0"
        || v.eq_ignore_ascii_case("false")
        || v.eq_ignore_ascii_case("no")
        || v.eq_ignore_ascii_case("off")
    {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> DeviceConfig {
        DeviceConfig::from_lookup(|name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        })
    }

    #[test]
    fn unset_environment_keeps_defaults() {
        assert_eq!(config(&[]), DeviceConfig::default());
    }

    #[test]
    fn truthy_and_falsy_flags() {
        for raw in ["1", "true", "YES", " on "] {
            assert!(config(&[("DXCOMPUTE_VALIDATION", raw)]).validation, "{raw}");
        }
        for raw in ["0", "false", "No", "off"] {
            assert!(!config(&[("DXCOMPUTE_VALIDATION", raw)]).validation, "{raw}");
        }
    }

    #[test]
    fn invalid_values_are_ignored() {
        let c = config(&[
            ("DXCOMPUTE_VALIDATION", "maybe"),
            ("DXCOMPUTE_COMMAND_LIST_PREWARM", "lots"),
        ]);
        assert_eq!(c, DeviceConfig::default());
    }

    #[test]
    fn prewarm_count() {
        let c = config(&[("DXCOMPUTE_COMMAND_LIST_PREWARM", "8")]);
        assert_eq!(c.command_list_prewarm, 8);
    }
}
