//! Lowering configuration.

use arbor_ir::ObjectModel;

/// Environment variable that disables the equality fast path when set.
pub const DISABLE_EQUALITY_FASTPATH_ENV: &str = "ARBOR_DISABLE_EQUALITY_FASTPATH";

/// Options for [`crate::TreeLowering`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoweringConfig {
    /// Only rebind equality calls to the runtime helper; insert no fast path.
    pub disable_equality_fastpath: bool,
    pub object_model: ObjectModel,
}

impl LoweringConfig {
    /// Default configuration, honouring [`DISABLE_EQUALITY_FASTPATH_ENV`].
    pub fn from_env() -> Self {
        Self {
            disable_equality_fastpath: std::env::var_os(DISABLE_EQUALITY_FASTPATH_ENV).is_some(),
            ..Self::default()
        }
    }

    pub fn with_object_model(mut self, object_model: ObjectModel) -> Self {
        self.object_model = object_model;
        self
    }

    pub fn with_equality_fastpath(mut self, enabled: bool) -> Self {
        self.disable_equality_fastpath = !enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides() {
        let config = LoweringConfig::default()
            .with_equality_fastpath(false)
            .with_object_model(ObjectModel::without_value_types());
        assert!(config.disable_equality_fastpath);
        assert!(!config.object_model.are_value_types_enabled());
    }
}
