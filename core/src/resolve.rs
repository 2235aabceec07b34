//! Name and type resolution: turns parsed [TypeNode]s into canonical [Ty]
//! strings in the context of a namespace and compilation unit.
//!
//! Generic types are materialized on demand (see `monomorph.rs`, which is
//! the other half of this service). Type resolution and monomorphization
//! are mutually recursive, so they live on one struct with internal
//! function references instead of two peers wired back-to-back.

use crate::ast::{CompilationUnit, IdGen, Struct, TypeNode};
use crate::error::ResolveError;
use crate::repository::TypeRepository;
use crate::ty::{is_generic_param_name, Ty, ERROR_TYPE_NAME};
use std::collections::HashSet;
use std::rc::Rc;

/// Where a name is being resolved from: the file-scoped namespace of the
/// enclosing definition, and the unit whose `using` directives apply.
#[derive(Clone, Debug)]
pub struct ResolveCtx {
    pub namespace: Option<String>,
    pub unit: Rc<CompilationUnit>,
}

impl ResolveCtx {
    pub fn new(namespace: Option<String>, unit: Rc<CompilationUnit>) -> Self {
        Self { namespace, unit }
    }
}

pub struct Resolver {
    pub(crate) repo: Rc<TypeRepository>,
    pub(crate) ids: Rc<IdGen>,
}

impl Resolver {
    pub fn new(repo: Rc<TypeRepository>, ids: Rc<IdGen>) -> Self {
        Self { repo, ids }
    }

    /// Resolves a parsed type to its canonical form.
    pub fn resolve(
        &self,
        node: &TypeNode,
        ctx: &ResolveCtx,
    ) -> Result<Ty, ResolveError> {
        match node {
            TypeNode::Simple(token) => self.resolve_name(&token.text, ctx),
            TypeNode::Pointer(inner) => {
                Ok(self.resolve(inner, ctx)?.pointer())
            }
            TypeNode::Generic(name, args) => {
                let instance = self.instantiate(&name.text, args, ctx)?;
                Ok(Ty::named(instance.fqn()))
            }
        }
    }

    /// Resolves a textual type name. Canonical strings resolve to themselves
    /// (idempotence), including pointer suffixes and mangled generic FQNs.
    pub fn resolve_name(
        &self,
        name: &str,
        ctx: &ResolveCtx,
    ) -> Result<Ty, ResolveError> {
        if name.is_empty() || name == ERROR_TYPE_NAME {
            return Err(ResolveError::new(
                "Type name could not be resolved because of an earlier \
                 syntax error",
            ));
        }
        // Canonical pointer forms: strip the stars, resolve the base, put
        // them back.
        if let Some(base) = name.strip_suffix('*') {
            return Ok(self.resolve_name(base, ctx)?.pointer());
        }
        if matches!(name, "int" | "char" | "void") {
            return Ok(Ty::named(name));
        }
        // A single uppercase letter is an unbound generic parameter, left
        // as-is until substitution binds it.
        if is_generic_param_name(name) {
            return Ok(Ty::named(name));
        }
        if name.contains("::") {
            let expanded = expand_alias(name, &ctx.unit);
            if let Some(s) = self.repo.find_struct(&expanded) {
                self.reject_bare_template(&s)?;
                return Ok(Ty::named(expanded));
            }
            if self.repo.find_enum(&expanded).is_some() {
                return Ok(Ty::int());
            }
            return Err(ResolveError::new(format!(
                "Unknown type '{}'",
                name
            )));
        }

        let hits: Vec<String> = self
            .candidates(name, ctx)
            .into_iter()
            .filter(|fqn| self.repo.find_struct(fqn).is_some())
            .collect();
        match hits.len() {
            1 => {
                let fqn = hits.into_iter().next().unwrap_or_default();
                if let Some(s) = self.repo.find_struct(&fqn) {
                    self.reject_bare_template(&s)?;
                }
                Ok(Ty::named(fqn))
            }
            0 => {
                // Not a struct; it may still name an enum, which is
                // int-typed everywhere in the language.
                if self.resolve_enum_name(name, ctx).is_some() {
                    return Ok(Ty::int());
                }
                Err(ResolveError::new(format!("Unknown type '{}'", name)))
            }
            _ => Err(ResolveError::new(format!(
                "Ambiguous type '{}' (could be {})",
                name,
                hits.join(" or ")
            ))),
        }
    }

    /// A generic template is not a type by itself; only its instantiations
    /// are.
    fn reject_bare_template(&self, s: &Struct) -> Result<(), ResolveError> {
        if s.is_generic() {
            return Err(ResolveError::new(format!(
                "Generic type '{}' requires type arguments",
                s.fqn()
            )));
        }
        Ok(())
    }

    /// Resolves a name to an enum FQN using the same namespace-search order
    /// as struct resolution. Returns `None` instead of failing; callers may
    /// interpret absence as "not an enum".
    pub fn resolve_enum_name(
        &self,
        name: &str,
        ctx: &ResolveCtx,
    ) -> Option<String> {
        if name.contains("::") {
            let expanded = expand_alias(name, &ctx.unit);
            return self.repo.find_enum(&expanded).map(|_| expanded);
        }
        self.candidates(name, ctx)
            .into_iter()
            .find(|fqn| self.repo.find_enum(fqn).is_some())
    }

    /// Finds a struct by unqualified (or qualified) name. Used for
    /// inheritance bases, generic templates and static method qualifiers.
    pub fn lookup_struct(
        &self,
        name: &str,
        ctx: &ResolveCtx,
    ) -> Option<Rc<Struct>> {
        if name.contains("::") {
            let expanded = expand_alias(name, &ctx.unit);
            return self.repo.find_struct(&expanded);
        }
        self.candidates(name, ctx)
            .into_iter()
            .find_map(|fqn| self.repo.find_struct(&fqn))
    }

    /// The candidate FQNs for an unqualified name, in search order: the
    /// current namespace, then each opened (non-aliased) `using` namespace,
    /// then the global namespace.
    fn candidates(&self, name: &str, ctx: &ResolveCtx) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(ns) = &ctx.namespace {
            out.push(format!("{}::{}", ns, name));
        }
        for using in &ctx.unit.usings {
            if using.alias.is_none() {
                out.push(format!("{}::{}", using.ns, name));
            }
        }
        out.push(name.to_string());
        out.dedup();
        out
    }

    /// The inheritance chain starting at `fqn`, derived-first. Stops at a
    /// missing base (reported elsewhere); cycles terminate via a visited
    /// set.
    pub fn chain(&self, fqn: &str) -> Vec<Rc<Struct>> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut current = self.repo.find_struct(fqn);
        while let Some(s) = current {
            if !visited.insert(s.fqn()) {
                break;
            }
            let next = s.base_name.as_ref().and_then(|base| {
                let unit = self.repo.unit_for_struct(&s.fqn())?;
                let ctx = ResolveCtx::new(s.namespace.clone(), unit);
                self.lookup_struct(&base.text, &ctx)
            });
            out.push(s);
            current = next;
        }
        out
    }
}

/// Expands a `using A = N;` alias on the first `::`-separated segment.
/// Deeper qualifiers are left alone; they are assumed to already be FQNs.
pub(crate) fn expand_alias(name: &str, unit: &CompilationUnit) -> String {
    if let Some((head, rest)) = split_qualifier(name) {
        for using in &unit.usings {
            if using.alias.as_deref() == Some(head) {
                return format!("{}::{}", using.ns, rest);
            }
        }
    }
    name.to_string()
}

fn split_qualifier(name: &str) -> Option<(&str, &str)> {
    let idx = name.find("::")?;
    Some((&name[..idx], &name[idx + 2..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ParentMap;
    use crate::error::Diagnostics;
    use crate::parse;
    use crate::token::Token;

    fn setup(source: &str) -> (Rc<TypeRepository>, Resolver, ResolveCtx) {
        let diags = Diagnostics::new();
        let ids = Rc::new(IdGen::new());
        let tokens = crate::lexer::tokenize(source);
        let unit =
            Rc::new(parse::parse_unit("test.ct", &tokens, &diags, &ids));
        assert!(!diags.has_errors(), "{:?}", diags.all());
        let mut parents = ParentMap::new();
        parents.link_unit(&unit);
        let repo = Rc::new(TypeRepository::new());
        repo.register_unit(&unit, &diags);
        let resolver = Resolver::new(Rc::clone(&repo), ids);
        let ctx = ResolveCtx::new(None, unit);
        (repo, resolver, ctx)
    }

    fn simple(name: &str) -> TypeNode {
        TypeNode::Simple(Token::new(crate::token::TokenKind::Ident, name, 1, 1))
    }

    #[test]
    fn test_primitives_resolve_to_themselves() {
        let (_, resolver, ctx) = setup("");
        for name in &["int", "char", "void"] {
            assert_eq!(
                resolver.resolve(&simple(name), &ctx).unwrap(),
                Ty::named(*name)
            );
        }
    }

    #[test]
    fn test_global_struct() {
        let (_, resolver, ctx) = setup("struct Point { public: int x; };");
        assert_eq!(
            resolver.resolve(&simple("Point"), &ctx).unwrap(),
            Ty::named("Point")
        );
    }

    #[test]
    fn test_namespaced_struct_through_using() {
        let source = "
            namespace geo;
            struct Point { public: int x; };
        ";
        let (repo, resolver, _) = setup(source);
        assert!(repo.find_struct("geo::Point").is_some());

        // A second unit that opens the namespace
        let diags = Diagnostics::new();
        let ids = Rc::new(IdGen::new());
        let tokens = crate::lexer::tokenize("using geo;");
        let user =
            Rc::new(parse::parse_unit("user.ct", &tokens, &diags, &ids));
        let ctx = ResolveCtx::new(None, user);
        assert_eq!(
            resolver.resolve(&simple("Point"), &ctx).unwrap(),
            Ty::named("geo::Point")
        );
    }

    #[test]
    fn test_alias_expansion() {
        let source = "
            namespace geo;
            struct Point { public: int x; };
        ";
        let (_, resolver, _) = setup(source);
        let diags = Diagnostics::new();
        let ids = Rc::new(IdGen::new());
        let tokens = crate::lexer::tokenize("using g = geo;");
        let user =
            Rc::new(parse::parse_unit("user.ct", &tokens, &diags, &ids));
        let ctx = ResolveCtx::new(None, user);
        assert_eq!(
            resolver.resolve(&simple("g::Point"), &ctx).unwrap(),
            Ty::named("geo::Point")
        );
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let (_, resolver, ctx) = setup("");
        let err = resolver.resolve(&simple("Missing"), &ctx).unwrap_err();
        assert_eq!(err.message, "Unknown type 'Missing'");
    }

    #[test]
    fn test_error_sentinel_is_rejected_with_pointer_at_parse() {
        let (_, resolver, ctx) = setup("");
        let err = resolver.resolve(&simple("unknown"), &ctx).unwrap_err();
        assert!(err.message.contains("earlier syntax error"));
    }

    #[test]
    fn test_pointer_resolution() {
        let (_, resolver, ctx) = setup("struct Point { public: int x; };");
        let node = TypeNode::Pointer(Box::new(simple("Point")));
        assert_eq!(
            resolver.resolve(&node, &ctx).unwrap(),
            Ty::named("Point*")
        );
    }

    #[test]
    fn test_canonicalization_idempotence() {
        let (_, resolver, ctx) = setup("struct Point { public: int x; };");
        let once = resolver.resolve_name("Point", &ctx).unwrap();
        let twice = resolver
            .resolve_name(once.name().unwrap(), &ctx)
            .unwrap();
        assert_eq!(once, twice);
        // And for pointer forms
        let ptr = once.pointer();
        assert_eq!(
            resolver.resolve_name(ptr.name().unwrap(), &ctx).unwrap(),
            ptr
        );
    }

    #[test]
    fn test_single_uppercase_letter_is_generic_param() {
        let (_, resolver, ctx) = setup("");
        assert_eq!(
            resolver.resolve(&simple("T"), &ctx).unwrap(),
            Ty::named("T")
        );
    }

    #[test]
    fn test_enum_name_resolves_to_int() {
        let (_, resolver, ctx) = setup("enum Color { RED, GREEN };");
        assert_eq!(
            resolver.resolve(&simple("Color"), &ctx).unwrap(),
            Ty::int()
        );
        assert_eq!(
            resolver.resolve_enum_name("Color", &ctx),
            Some("Color".to_string())
        );
        assert_eq!(resolver.resolve_enum_name("Missing", &ctx), None);
    }

    #[test]
    fn test_bare_template_reference_is_rejected() {
        let (_, resolver, ctx) =
            setup("struct List<T> { public: T value; };");
        let err = resolver.resolve(&simple("List"), &ctx).unwrap_err();
        assert_eq!(
            err.message,
            "Generic type 'List' requires type arguments"
        );
    }

    #[test]
    fn test_inheritance_chain() {
        let source = "
            struct A { public: int x; };
            struct B : A { public: int y; };
        ";
        let (_, resolver, _) = setup(source);
        let chain: Vec<String> =
            resolver.chain("B").iter().map(|s| s.fqn()).collect();
        assert_eq!(chain, vec!["B".to_string(), "A".to_string()]);
    }
}
