//! Host-tunable engine defaults.
//!
//! The original has no equivalent — every knob here (creation flags, wait
//! timeout, eager vs. lazy section-name resolution) was a call-site literal
//! in `debugger.c`. Pulled out into one `Config` value the way the teacher
//! centralizes tunables (`probe-rs`'s `Permissions`/target selection in
//! `config/`), so a host can override a default without threading extra
//! parameters through every method.

/// When to resolve a module's backing file path (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SectionNameResolution {
    /// Resolve immediately when the module is observed (on `LoadDll` /
    /// initial `CreateProcess`). Costs one extra native call per module but
    /// means [`crate::module::Module::path`] never blocks on first access.
    Eager,
    /// Resolve lazily on first [`crate::module::Module::path`] call. Cheaper
    /// for hosts that only care about a handful of modules out of many.
    Lazy,
}

impl Default for SectionNameResolution {
    fn default() -> Self {
        SectionNameResolution::Lazy
    }
}

/// Engine-wide configuration, built with [`Config::builder`] or used via
/// [`Default`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Default timeout, in milliseconds, passed to
    /// [`crate::Dispatcher::wait_event`] when a host doesn't specify one.
    /// `None` means block indefinitely, matching the original's default.
    pub default_wait_timeout_ms: Option<u32>,
    /// Whether the debug object should terminate every attached process
    /// when its handle is closed without an explicit detach
    /// (`original_source/debugger.c`'s `init`'s `TRUE` flag to
    /// `NtCreateDebugObject`).
    pub kill_on_close: bool,
    pub section_name_resolution: SectionNameResolution,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_wait_timeout_ms: None,
            kill_on_close: true,
            section_name_resolution: SectionNameResolution::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// A builder for [`Config`], following the same narrow-surface pattern the
/// teacher uses for its session/permission builders.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: ConfigInner,
}

#[derive(Debug, Clone, Default)]
struct ConfigInner {
    default_wait_timeout_ms: Option<Option<u32>>,
    kill_on_close: Option<bool>,
    section_name_resolution: Option<SectionNameResolution>,
}

impl ConfigBuilder {
    pub fn default_wait_timeout_ms(mut self, timeout: Option<u32>) -> Self {
        self.config.default_wait_timeout_ms = Some(timeout);
        self
    }

    pub fn kill_on_close(mut self, kill_on_close: bool) -> Self {
        self.config.kill_on_close = Some(kill_on_close);
        self
    }

    pub fn section_name_resolution(mut self, mode: SectionNameResolution) -> Self {
        self.config.section_name_resolution = Some(mode);
        self
    }

    pub fn build(self) -> Config {
        let defaults = Config::default();
        Config {
            default_wait_timeout_ms: self.config.default_wait_timeout_ms.unwrap_or(defaults.default_wait_timeout_ms),
            kill_on_close: self.config.kill_on_close.unwrap_or(defaults.kill_on_close),
            section_name_resolution: self
                .config
                .section_name_resolution
                .unwrap_or(defaults.section_name_resolution),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_original_defaults() {
        let config = Config::default();
        assert_eq!(config.default_wait_timeout_ms, None);
        assert!(config.kill_on_close);
        assert_eq!(config.section_name_resolution, SectionNameResolution::Lazy);
    }

    #[test]
    fn builder_overrides_only_the_fields_touched() {
        let config = Config::builder().kill_on_close(false).build();
        assert!(!config.kill_on_close);
        assert_eq!(config.default_wait_timeout_ms, None);
        assert_eq!(config.section_name_resolution, SectionNameResolution::Lazy);
    }
}
