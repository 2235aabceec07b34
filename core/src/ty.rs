//! Canonical resolved types. A canonical type is a single normalized textual
//! form: primitives as-is, structs and enums by FQN, pointers by trailing
//! `*`, generic instances by their mangled FQN (`ns::List$int`).
//!
//! [Ty::Error] replaces the reserved `unknown` string of older builds with
//! an explicit tag. It marks "an error has already been reported"; the
//! analyzer propagates it to suppress cascaded diagnostics, and it must
//! never reach code generation.

use std::fmt::{self, Display, Formatter};

/// The display form of [Ty::Error]. Still reserved as a type name so that a
/// resolver asked to resolve it can point at the earlier failure.
pub const ERROR_TYPE_NAME: &str = "unknown";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
    /// Sentinel for "error already reported".
    Error,
    /// A canonical type string.
    Named(String),
}

impl Ty {
    pub fn named(name: impl Into<String>) -> Ty {
        Ty::Named(name.into())
    }

    pub fn int() -> Ty {
        Ty::named("int")
    }

    pub fn char_() -> Ty {
        Ty::named("char")
    }

    pub fn void() -> Ty {
        Ty::named("void")
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Ty::Error)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Ty::Error => None,
            Ty::Named(name) => Some(name),
        }
    }

    pub fn is_void(&self) -> bool {
        self.name() == Some("void")
    }

    pub fn is_pointer(&self) -> bool {
        self.name().map_or(false, |n| n.ends_with('*'))
    }

    /// Exactly `int`, `char` or `void` (pointers to them are not primitive).
    pub fn is_primitive(&self) -> bool {
        matches!(self.name(), Some("int") | Some("char") | Some("void"))
    }

    /// The single-uppercase-letter heuristic for an unbound generic type
    /// parameter.
    pub fn is_generic_param(&self) -> bool {
        self.name().map_or(false, is_generic_param_name)
    }

    /// One more level of indirection. Errors stay errors.
    pub fn pointer(&self) -> Ty {
        match self {
            Ty::Error => Ty::Error,
            Ty::Named(name) => Ty::Named(format!("{}*", name)),
        }
    }

    /// One less level of indirection, or `None` for non-pointers.
    pub fn deref(&self) -> Option<Ty> {
        let name = self.name()?;
        name.strip_suffix('*').map(Ty::named)
    }

    /// The name a member access resolves against: the canonical name with a
    /// single trailing `*` stripped, if there is one.
    pub fn base_struct_name(&self) -> Option<&str> {
        let name = self.name()?;
        Some(name.strip_suffix('*').unwrap_or(name))
    }
}

impl Display for Ty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Error => write!(f, "{}", ERROR_TYPE_NAME),
            Ty::Named(name) => write!(f, "{}", name),
        }
    }
}

pub fn is_generic_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_round_trip() {
        let t = Ty::int().pointer();
        assert_eq!(t, Ty::named("int*"));
        assert_eq!(t.deref(), Some(Ty::int()));
        assert_eq!(Ty::int().deref(), None);
    }

    #[test]
    fn test_base_struct_name_strips_one_star() {
        assert_eq!(
            Ty::named("ns::Box**").base_struct_name(),
            Some("ns::Box*")
        );
        assert_eq!(Ty::named("ns::Box").base_struct_name(), Some("ns::Box"));
    }

    #[test]
    fn test_generic_param_heuristic() {
        assert!(Ty::named("T").is_generic_param());
        assert!(!Ty::named("Ty").is_generic_param());
        assert!(!Ty::named("t").is_generic_param());
        assert!(!Ty::Error.is_generic_param());
    }

    #[test]
    fn test_error_propagates_through_pointer() {
        assert!(Ty::Error.pointer().is_error());
        assert_eq!(Ty::Error.to_string(), "unknown");
    }
}
