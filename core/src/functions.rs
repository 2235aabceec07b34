//! Call-target resolution: free functions by (possibly qualified) name,
//! methods through the inheritance chain, plus the enum-member lookup
//! helpers that share the same reachability rules.
//!
//! Overload disambiguation is by arity only. Method resolution takes the
//! already-computed receiver type from the analyzer instead of calling back
//! into it, which is what keeps this service and the analyzer acyclic.

use crate::ast::{make_fqn, CompilationUnit, Function, Program};
use crate::error::ResolveError;
use crate::repository::TypeRepository;
use crate::resolve::{expand_alias, ResolveCtx, Resolver};
use crate::ty::Ty;
use std::collections::HashMap;
use std::rc::Rc;

/// A resolved call target together with the unit its signature types are
/// resolved in.
#[derive(Clone, Debug)]
pub struct ResolvedFn {
    pub func: Rc<Function>,
    pub unit: Rc<CompilationUnit>,
}

pub struct FunctionResolver {
    repo: Rc<TypeRepository>,
    resolver: Rc<Resolver>,
    /// FQN (or plain name, for global functions) -> declarations.
    index: HashMap<String, Vec<ResolvedFn>>,
}

impl FunctionResolver {
    pub fn new(
        repo: Rc<TypeRepository>,
        resolver: Rc<Resolver>,
        program: &Program,
    ) -> Self {
        let mut index: HashMap<String, Vec<ResolvedFn>> = HashMap::new();
        for unit in &program.units {
            for f in &unit.functions {
                let key =
                    make_fqn(f.namespace.as_deref(), &f.name.text);
                index.entry(key).or_default().push(ResolvedFn {
                    func: Rc::clone(f),
                    unit: Rc::clone(unit),
                });
            }
        }
        Self {
            repo,
            resolver,
            index,
        }
    }

    /// Resolves an unqualified call like `f(a, b)`. Search order: the
    /// current namespace, each opened `using` namespace, then the global
    /// scope. The first scope with a declaration wins.
    pub fn resolve_named(
        &self,
        name: &str,
        arity: usize,
        ctx: &ResolveCtx,
    ) -> Result<ResolvedFn, ResolveError> {
        let mut keys = Vec::new();
        if let Some(ns) = &ctx.namespace {
            keys.push(format!("{}::{}", ns, name));
        }
        for using in &ctx.unit.usings {
            if using.alias.is_none() {
                keys.push(format!("{}::{}", using.ns, name));
            }
        }
        keys.push(name.to_string());

        for key in keys {
            if let Some(candidates) = self.index.get(&key) {
                return pick(candidates.clone(), name, arity);
            }
        }
        Err(ResolveError::new(format!("Unknown function '{}'", name)))
    }

    /// Resolves `A::B::f(...)`: either a namespace-qualified function or a
    /// static reference to a struct method.
    pub fn resolve_qualified(
        &self,
        qualifier: &str,
        member: &str,
        arity: usize,
        ctx: &ResolveCtx,
    ) -> Result<ResolvedFn, ResolveError> {
        let expanded = expand_alias(qualifier, &ctx.unit);
        let key = format!("{}::{}", expanded, member);
        if let Some(candidates) = self.index.get(&key) {
            return pick(candidates.clone(), member, arity);
        }
        if let Some(s) = self.resolver.lookup_struct(qualifier, ctx) {
            return self.resolve_in_chain(&s.fqn(), member, arity);
        }
        Err(ResolveError::new(format!(
            "Unknown function '{}::{}'",
            qualifier, member
        )))
    }

    /// Resolves `recv.m(...)` / `recv->m(...)` given the receiver's
    /// resolved type. Walks the inheritance chain for the first level that
    /// declares the method.
    pub fn resolve_method(
        &self,
        recv: &Ty,
        member: &str,
        arity: usize,
    ) -> Result<ResolvedFn, ResolveError> {
        let base = recv.base_struct_name().ok_or_else(|| {
            ResolveError::new(format!(
                "Type '{}' has no method '{}'",
                recv, member
            ))
        })?;
        if self.repo.find_struct(base).is_none() {
            return Err(ResolveError::new(format!(
                "Type '{}' has no method '{}'",
                recv, member
            )));
        }
        self.resolve_in_chain(base, member, arity)
    }

    fn resolve_in_chain(
        &self,
        fqn: &str,
        member: &str,
        arity: usize,
    ) -> Result<ResolvedFn, ResolveError> {
        for s in self.resolver.chain(fqn) {
            let methods = s.methods_named(member);
            if methods.is_empty() {
                continue;
            }
            let unit = self
                .repo
                .unit_for_struct(&s.fqn())
                .ok_or_else(|| {
                    ResolveError::new(format!(
                        "Struct '{}' has no method '{}'",
                        fqn, member
                    ))
                })?;
            let candidates = methods
                .into_iter()
                .map(|m| ResolvedFn {
                    func: Rc::clone(m),
                    unit: Rc::clone(&unit),
                })
                .collect();
            return pick(candidates, member, arity);
        }
        Err(ResolveError::new(format!(
            "Struct '{}' has no method '{}'",
            fqn, member
        )))
    }

    /// True if any function (free or static method) exists under the
    /// qualified name, regardless of arity. Used for static function
    /// references that are not immediately called.
    pub fn qualified_exists(
        &self,
        qualifier: &str,
        member: &str,
        ctx: &ResolveCtx,
    ) -> bool {
        let expanded = expand_alias(qualifier, &ctx.unit);
        if self
            .index
            .contains_key(&format!("{}::{}", expanded, member))
        {
            return true;
        }
        self.resolver
            .lookup_struct(qualifier, ctx)
            .map_or(false, |s| {
                self.resolver
                    .chain(&s.fqn())
                    .iter()
                    .any(|level| !level.methods_named(member).is_empty())
            })
    }

    /// O(1) enum member lookup by FQN.
    pub fn enum_value(&self, fqn: &str, member: &str) -> Option<i32> {
        self.repo.enum_value(fqn, member)
    }

    /// Scans the reachable enums (current namespace, opened namespaces,
    /// global) for a member with the given name. Deterministic: enums are
    /// visited in FQN order.
    pub fn unqualified_enum_member(
        &self,
        name: &str,
        ctx: &ResolveCtx,
    ) -> Option<i32> {
        let mut enums = self.repo.all_enums();
        enums.sort_by_key(|e| e.fqn());
        for e in enums {
            let reachable = match &e.namespace {
                None => true,
                Some(ns) => {
                    ctx.namespace.as_deref() == Some(ns.as_str())
                        || ctx
                            .unit
                            .usings
                            .iter()
                            .any(|u| u.alias.is_none() && &u.ns == ns)
                }
            };
            if !reachable {
                continue;
            }
            if let Some(value) = self.repo.enum_value(&e.fqn(), name) {
                return Some(value);
            }
        }
        None
    }
}

/// Arity-based overload disambiguation. A single candidate is returned
/// as-is (the analyzer reports a count mismatch against it); among several,
/// exactly one arity match must exist.
fn pick(
    candidates: Vec<ResolvedFn>,
    name: &str,
    arity: usize,
) -> Result<ResolvedFn, ResolveError> {
    if candidates.len() == 1 {
        return candidates
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::new("empty candidate set"));
    }
    let matching: Vec<ResolvedFn> = candidates
        .into_iter()
        .filter(|c| c.func.params.len() == arity)
        .collect();
    match matching.len() {
        1 => matching
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::new("empty candidate set")),
        0 => Err(ResolveError::new(format!(
            "No overload of '{}' takes {} argument(s)",
            name, arity
        ))),
        _ => Err(ResolveError::new(format!(
            "Ambiguous call to '{}'",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::IdGen;
    use crate::error::Diagnostics;

    fn setup(sources: &[(&str, &str)]) -> (FunctionResolver, Vec<Rc<CompilationUnit>>) {
        let diags = Diagnostics::new();
        let ids = Rc::new(IdGen::new());
        let mut program = Program::default();
        for (path, source) in sources {
            let tokens = crate::lexer::tokenize(source);
            let unit = Rc::new(crate::parse::parse_unit(
                path, &tokens, &diags, &ids,
            ));
            program.units.push(unit);
        }
        assert!(!diags.has_errors(), "{:?}", diags.all());
        let repo = Rc::new(TypeRepository::new());
        for unit in &program.units {
            repo.register_unit(unit, &diags);
        }
        let resolver =
            Rc::new(Resolver::new(Rc::clone(&repo), Rc::clone(&ids)));
        let functions =
            FunctionResolver::new(repo, resolver, &program);
        (functions, program.units)
    }

    fn ctx_for(unit: &Rc<CompilationUnit>, ns: Option<&str>) -> ResolveCtx {
        ResolveCtx::new(ns.map(String::from), Rc::clone(unit))
    }

    #[test]
    fn test_global_function_by_name() {
        let (functions, units) =
            setup(&[("a.ct", "int add(int a, int b) { return a + b; }")]);
        let ctx = ctx_for(&units[0], None);
        let resolved = functions.resolve_named("add", 2, &ctx).unwrap();
        assert_eq!(resolved.func.name.text, "add");
    }

    #[test]
    fn test_same_namespace_preferred_over_global() {
        let source = "
            namespace app;
            int ping() { return 1; }
        ";
        let (functions, units) = setup(&[
            ("app.ct", source),
            ("global.ct", "int ping() { return 2; }"),
        ]);
        let ctx = ctx_for(&units[0], Some("app"));
        let resolved = functions.resolve_named("ping", 0, &ctx).unwrap();
        assert_eq!(resolved.func.namespace.as_deref(), Some("app"));

        let global_ctx = ctx_for(&units[1], None);
        let resolved =
            functions.resolve_named("ping", 0, &global_ctx).unwrap();
        assert_eq!(resolved.func.namespace, None);
    }

    #[test]
    fn test_overload_by_arity() {
        let source = "
            int f(int a) { return a; }
            int f(int a, int b) { return a + b; }
        ";
        let (functions, units) = setup(&[("a.ct", source)]);
        let ctx = ctx_for(&units[0], None);
        assert_eq!(
            functions.resolve_named("f", 2, &ctx).unwrap().func.params.len(),
            2
        );
        let err = functions.resolve_named("f", 3, &ctx).unwrap_err();
        assert_eq!(err.message, "No overload of 'f' takes 3 argument(s)");
    }

    #[test]
    fn test_unknown_function() {
        let (functions, units) = setup(&[("a.ct", "")]);
        let ctx = ctx_for(&units[0], None);
        let err = functions.resolve_named("nope", 0, &ctx).unwrap_err();
        assert_eq!(err.message, "Unknown function 'nope'");
    }

    #[test]
    fn test_qualified_namespace_function() {
        let source = "
            namespace math;
            int square(int x) { return x * x; }
        ";
        let (functions, units) =
            setup(&[("math.ct", source), ("main.ct", "")]);
        let ctx = ctx_for(&units[1], None);
        let resolved = functions
            .resolve_qualified("math", "square", 1, &ctx)
            .unwrap();
        assert_eq!(resolved.func.name.text, "square");
    }

    #[test]
    fn test_method_through_inheritance_chain() {
        let source = "
            struct A {
            public:
                int base_method() { return 1; }
            };
            struct B : A {
            public:
                int own_method() { return 2; }
            };
        ";
        let (functions, _) = setup(&[("a.ct", source)]);
        let recv = Ty::named("B*");
        let resolved =
            functions.resolve_method(&recv, "base_method", 0).unwrap();
        assert_eq!(resolved.func.owner_struct.as_deref(), Some("A"));
        let err = functions
            .resolve_method(&recv, "missing", 0)
            .unwrap_err();
        assert_eq!(err.message, "Struct 'B' has no method 'missing'");
    }

    #[test]
    fn test_method_on_non_struct_type() {
        let (functions, _) = setup(&[("a.ct", "")]);
        let err = functions
            .resolve_method(&Ty::int(), "m", 0)
            .unwrap_err();
        assert_eq!(err.message, "Type 'int' has no method 'm'");
    }

    #[test]
    fn test_unqualified_enum_member_reachability() {
        let source = "
            namespace app;
            enum Mode { ON = 7, OFF = 9 };
        ";
        let (functions, units) =
            setup(&[("app.ct", source), ("other.ct", "using app;")]);
        // Reachable through the `using`
        let ctx = ctx_for(&units[1], None);
        assert_eq!(functions.unqualified_enum_member("ON", &ctx), Some(7));
        // Not reachable without it
        let (functions2, units2) =
            setup(&[("app.ct", source), ("other.ct", "")]);
        let ctx2 = ctx_for(&units2[1], None);
        assert_eq!(functions2.unqualified_enum_member("ON", &ctx2), None);
        let _ = functions;
    }

    #[test]
    fn test_enum_value_by_fqn() {
        let (functions, _) =
            setup(&[("a.ct", "enum Color { RED, GREEN, BLUE };")]);
        assert_eq!(functions.enum_value("Color", "BLUE"), Some(2));
        assert_eq!(functions.enum_value("Color", "MAUVE"), None);
    }
}
