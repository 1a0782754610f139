//! Interned names.

use std::fmt;
use std::sync::LazyLock;

use lasso::{Rodeo, Spur};
use parking_lot::RwLock;

static NAMES: LazyLock<RwLock<Rodeo>> = LazyLock::new(|| RwLock::new(Rodeo::default()));

/// Interned name of a slot, a callee or a method body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(Spur);

impl Symbol {
    pub fn intern(name: &str) -> Self {
        if let Some(key) = NAMES.read().get(name) {
            return Symbol(key);
        }
        Symbol(NAMES.write().get_or_intern(name))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(NAMES.read_recursive().resolve(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_names_intern_to_one_symbol() {
        let lhs = Symbol::intern("lhs");
        assert_eq!(lhs, Symbol::intern(&String::from("lhs")));
        assert_ne!(lhs, Symbol::intern("rhs"));
        assert_eq!(lhs.to_string(), "lhs");
    }
}
