//! Object-model capabilities consumed by lowering.

/// Class-flag bit set on value-type classes.
pub const CLASS_IS_VALUE_TYPE: u32 = 0x0010_0000;

/// What the runtime's object model reports about value types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectModel {
    /// Whether value-type classes may exist in the running program.
    pub value_types_enabled: bool,
    /// Bit in a class's flags word marking it as a value type.
    pub value_type_class_flag: u32,
}

impl ObjectModel {
    pub fn with_value_types() -> Self {
        Self {
            value_types_enabled: true,
            value_type_class_flag: CLASS_IS_VALUE_TYPE,
        }
    }

    pub fn without_value_types() -> Self {
        Self {
            value_types_enabled: false,
            value_type_class_flag: CLASS_IS_VALUE_TYPE,
        }
    }

    pub fn are_value_types_enabled(&self) -> bool {
        self.value_types_enabled
    }
}

impl Default for ObjectModel {
    fn default() -> Self {
        Self::with_value_types()
    }
}
