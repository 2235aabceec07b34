//! Monomorphization: materializing a concrete struct from a generic
//! template by cloning its AST with a type-parameter substitution map.
//!
//! Instances are created lazily the first time a `Generic` type node
//! resolves, registered in the TypeRepository under their mangled FQN
//! (`List$int`), and reused for the rest of the compilation. The cloner is
//! a structural deep copy over the closed set of node variants with a
//! single substitution hook on `Simple` type tokens; it allocates fresh
//! node ids so parent linking and string labels stay unique.

use crate::ast::{
    make_fqn, Accessor, BaseInit, Constructor, Destructor, Expr, ExprKind,
    Function, IdGen, MemberVariable, Param, Property, Stmt, StmtKind, Struct,
    TypeNode,
};
use crate::error::ResolveError;
use crate::resolve::{ResolveCtx, Resolver};
use crate::token::{Token, TokenKind};
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Type-parameter name -> canonical replacement type string.
type Subs = HashMap<String, String>;

impl Resolver {
    /// Resolves `base<args...>` to its concrete struct, cloning the
    /// template on first use. Idempotent: equal argument canonicalizations
    /// always yield the same registered struct.
    pub fn instantiate(
        &self,
        base: &str,
        args: &[TypeNode],
        ctx: &ResolveCtx,
    ) -> Result<Rc<Struct>, ResolveError> {
        let template = self.lookup_struct(base, ctx).ok_or_else(|| {
            ResolveError::new(format!("Unknown generic type '{}'", base))
        })?;
        if !template.is_generic() {
            return Err(ResolveError::new(format!(
                "Type '{}' is not generic",
                template.fqn()
            )));
        }
        if template.generic_params.len() != args.len() {
            return Err(ResolveError::new(format!(
                "Type '{}' expects {} type argument(s), got {}",
                template.fqn(),
                template.generic_params.len(),
                args.len()
            )));
        }

        // Resolving an argument may itself trigger monomorphization.
        let mut resolved = Vec::with_capacity(args.len());
        for arg in args {
            resolved.push(self.resolve(arg, ctx)?.to_string());
        }

        let mangled =
            format!("{}${}", template.name.text, resolved.join("$"));
        let fqn = make_fqn(template.namespace.as_deref(), &mangled);
        if let Some(existing) = self.repo.find_struct(&fqn) {
            return Ok(existing);
        }

        let subs: Subs = template
            .generic_params
            .iter()
            .map(|p| p.text.clone())
            .zip(resolved.into_iter())
            .collect();
        let unit = self
            .repo
            .unit_for_struct(&template.fqn())
            .ok_or_else(|| {
                ResolveError::new(format!(
                    "Unknown generic type '{}'",
                    base
                ))
            })?;

        debug!("monomorphizing {}", fqn);
        let instance =
            Rc::new(clone_struct(&template, &mangled, &subs, &self.ids));
        self.repo
            .register_instance(Rc::clone(&instance), unit);
        Ok(instance)
    }
}

fn clone_struct(
    template: &Struct,
    new_name: &str,
    subs: &Subs,
    ids: &IdGen,
) -> Struct {
    Struct {
        id: ids.next(),
        name: Token::new(
            TokenKind::Ident,
            new_name,
            template.name.line,
            template.name.column,
        ),
        // The instance is concrete; the parameter list does not survive.
        generic_params: Vec::new(),
        base_name: template.base_name.clone(),
        namespace: template.namespace.clone(),
        members: template
            .members
            .iter()
            .map(|m| clone_member(m, subs, ids))
            .collect(),
        properties: template
            .properties
            .iter()
            .map(|p| clone_property(p, subs, ids))
            .collect(),
        methods: template
            .methods
            .iter()
            .map(|m| Rc::new(clone_function(m, new_name, subs, ids)))
            .collect(),
        ctors: template
            .ctors
            .iter()
            .map(|c| clone_ctor(c, new_name, subs, ids))
            .collect(),
        dtors: template
            .dtors
            .iter()
            .map(|d| clone_dtor(d, new_name, subs, ids))
            .collect(),
    }
}

/// The substitution hook: a `Simple` type token whose text is a bound
/// parameter is replaced by its canonical argument. Everything else is
/// reconstructed identically.
fn clone_type(node: &TypeNode, subs: &Subs) -> TypeNode {
    match node {
        TypeNode::Simple(token) => match subs.get(&token.text) {
            Some(replacement) => TypeNode::Simple(Token::new(
                TokenKind::Ident,
                replacement.clone(),
                token.line,
                token.column,
            )),
            None => TypeNode::Simple(token.clone()),
        },
        TypeNode::Pointer(inner) => {
            TypeNode::Pointer(Box::new(clone_type(inner, subs)))
        }
        TypeNode::Generic(name, args) => TypeNode::Generic(
            name.clone(),
            args.iter().map(|a| clone_type(a, subs)).collect(),
        ),
    }
}

fn clone_member(m: &MemberVariable, subs: &Subs, ids: &IdGen) -> MemberVariable {
    MemberVariable {
        id: ids.next(),
        is_const: m.is_const,
        ty: clone_type(&m.ty, subs),
        name: m.name.clone(),
        access: m.access,
    }
}

fn clone_property(p: &Property, subs: &Subs, ids: &IdGen) -> Property {
    Property {
        id: ids.next(),
        ty: clone_type(&p.ty, subs),
        name: p.name.clone(),
        access: p.access,
        accessors: p
            .accessors
            .iter()
            .map(|a| Accessor {
                id: ids.next(),
                kind: a.kind,
                keyword: a.keyword.clone(),
                body: RefCell::new(
                    a.body.borrow().as_ref().map(|b| clone_stmt(b, subs, ids)),
                ),
            })
            .collect(),
    }
}

fn clone_param(p: &Param, subs: &Subs, ids: &IdGen) -> Param {
    Param {
        id: ids.next(),
        ty: clone_type(&p.ty, subs),
        name: p.name.clone(),
    }
}

fn clone_function(
    f: &Function,
    owner: &str,
    subs: &Subs,
    ids: &IdGen,
) -> Function {
    Function {
        id: ids.next(),
        return_type: clone_type(&f.return_type, subs),
        name: f.name.clone(),
        params: f.params.iter().map(|p| clone_param(p, subs, ids)).collect(),
        body: RefCell::new(
            f.body.borrow().as_ref().map(|b| clone_stmt(b, subs, ids)),
        ),
        owner_struct: Some(owner.to_string()),
        namespace: f.namespace.clone(),
        access: f.access,
        is_virtual: f.is_virtual,
        is_override: f.is_override,
    }
}

fn clone_ctor(
    c: &Constructor,
    owner: &str,
    subs: &Subs,
    ids: &IdGen,
) -> Constructor {
    Constructor {
        id: ids.next(),
        owner_struct: owner.to_string(),
        namespace: c.namespace.clone(),
        access: c.access,
        params: c.params.iter().map(|p| clone_param(p, subs, ids)).collect(),
        base_init: c.base_init.as_ref().map(|init| BaseInit {
            name: init.name.clone(),
            args: init.args.iter().map(|a| clone_expr(a, subs, ids)).collect(),
        }),
        body: RefCell::new(clone_stmt(&c.body.borrow(), subs, ids)),
    }
}

fn clone_dtor(
    d: &Destructor,
    owner: &str,
    subs: &Subs,
    ids: &IdGen,
) -> Destructor {
    Destructor {
        id: ids.next(),
        owner_struct: owner.to_string(),
        namespace: d.namespace.clone(),
        access: d.access,
        is_virtual: d.is_virtual,
        body: RefCell::new(clone_stmt(&d.body.borrow(), subs, ids)),
    }
}

fn clone_stmt(stmt: &Stmt, subs: &Subs, ids: &IdGen) -> Stmt {
    let kind = match &stmt.kind {
        StmtKind::Block(stmts) => StmtKind::Block(
            stmts.iter().map(|s| clone_stmt(s, subs, ids)).collect(),
        ),
        StmtKind::Return { keyword, value } => StmtKind::Return {
            keyword: keyword.clone(),
            value: value.as_ref().map(|v| clone_expr(v, subs, ids)),
        },
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => StmtKind::If {
            cond: clone_expr(cond, subs, ids),
            then_branch: Box::new(clone_stmt(then_branch, subs, ids)),
            else_branch: else_branch
                .as_ref()
                .map(|e| Box::new(clone_stmt(e, subs, ids))),
        },
        StmtKind::While { cond, body } => StmtKind::While {
            cond: clone_expr(cond, subs, ids),
            body: Box::new(clone_stmt(body, subs, ids)),
        },
        StmtKind::Declaration {
            is_const,
            ty,
            name,
            init,
        } => StmtKind::Declaration {
            is_const: *is_const,
            ty: clone_type(ty, subs),
            name: name.clone(),
            init: init.as_ref().map(|init| match init {
                crate::ast::DeclInit::Expr(e) => {
                    crate::ast::DeclInit::Expr(clone_expr(e, subs, ids))
                }
                crate::ast::DeclInit::Ctor(args) => crate::ast::DeclInit::Ctor(
                    args.iter().map(|a| clone_expr(a, subs, ids)).collect(),
                ),
            }),
        },
        StmtKind::Expression(e) => {
            StmtKind::Expression(clone_expr(e, subs, ids))
        }
        StmtKind::Delete { keyword, operand } => StmtKind::Delete {
            keyword: keyword.clone(),
            operand: clone_expr(operand, subs, ids),
        },
    };
    Stmt {
        id: ids.next(),
        kind,
    }
}

fn clone_expr(expr: &Expr, subs: &Subs, ids: &IdGen) -> Expr {
    let id = ids.next();
    let kind = match &expr.kind {
        ExprKind::IntLit { token, value } => ExprKind::IntLit {
            token: token.clone(),
            value: *value,
        },
        // String literals get a fresh data label tied to the new node.
        ExprKind::StrLit { token, .. } => ExprKind::StrLit {
            token: token.clone(),
            label: format!("str_{}", id.0),
        },
        ExprKind::Variable { name } => ExprKind::Variable {
            name: name.clone(),
        },
        ExprKind::Unary { op, right } => ExprKind::Unary {
            op: op.clone(),
            right: Box::new(clone_expr(right, subs, ids)),
        },
        ExprKind::Binary { left, op, right } => ExprKind::Binary {
            left: Box::new(clone_expr(left, subs, ids)),
            op: op.clone(),
            right: Box::new(clone_expr(right, subs, ids)),
        },
        ExprKind::Assignment { left, op, right } => ExprKind::Assignment {
            left: Box::new(clone_expr(left, subs, ids)),
            op: op.clone(),
            right: Box::new(clone_expr(right, subs, ids)),
        },
        ExprKind::MemberAccess { left, op, member } => {
            ExprKind::MemberAccess {
                left: Box::new(clone_expr(left, subs, ids)),
                op: op.clone(),
                member: member.clone(),
            }
        }
        ExprKind::QualifiedAccess { left, member } => {
            ExprKind::QualifiedAccess {
                left: Box::new(clone_expr(left, subs, ids)),
                member: member.clone(),
            }
        }
        ExprKind::Call { callee, args } => ExprKind::Call {
            callee: Box::new(clone_expr(callee, subs, ids)),
            args: args.iter().map(|a| clone_expr(a, subs, ids)).collect(),
        },
        ExprKind::New { keyword, ty, args } => ExprKind::New {
            keyword: keyword.clone(),
            ty: clone_type(ty, subs),
            args: args.iter().map(|a| clone_expr(a, subs, ids)).collect(),
        },
        ExprKind::Sizeof { keyword, ty } => ExprKind::Sizeof {
            keyword: keyword.clone(),
            ty: clone_type(ty, subs),
        },
        ExprKind::InitializerList { open, values } => {
            ExprKind::InitializerList {
                open: open.clone(),
                values: values
                    .iter()
                    .map(|v| clone_expr(v, subs, ids))
                    .collect(),
            }
        }
    };
    Expr { id, kind }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::repository::TypeRepository;
    use crate::ty::Ty;

    fn setup(source: &str) -> (Rc<TypeRepository>, Resolver, ResolveCtx) {
        let diags = Diagnostics::new();
        let ids = Rc::new(IdGen::new());
        let tokens = crate::lexer::tokenize(source);
        let unit = Rc::new(crate::parse::parse_unit(
            "test.ct", &tokens, &diags, &ids,
        ));
        assert!(!diags.has_errors(), "{:?}", diags.all());
        let repo = Rc::new(TypeRepository::new());
        repo.register_unit(&unit, &diags);
        let resolver = Resolver::new(Rc::clone(&repo), ids);
        let ctx = ResolveCtx::new(None, unit);
        (repo, resolver, ctx)
    }

    fn int_arg() -> TypeNode {
        TypeNode::Simple(Token::new(TokenKind::Int, "int", 1, 1))
    }

    const LIST: &str = "
        struct List<T> {
        public:
            T value;
            T head() { return value; }
        };
    ";

    #[test]
    fn test_instantiation_registers_mangled_struct() {
        let (repo, resolver, ctx) = setup(LIST);
        let instance =
            resolver.instantiate("List", &[int_arg()], &ctx).unwrap();
        assert_eq!(instance.fqn(), "List$int");
        assert!(!instance.is_generic());
        assert!(repo.find_struct("List$int").is_some());
        // The unit mapping points at the template's unit.
        assert!(repo.unit_for_struct("List$int").is_some());
    }

    #[test]
    fn test_substitution_reaches_members_and_methods() {
        let (_, resolver, ctx) = setup(LIST);
        let instance =
            resolver.instantiate("List", &[int_arg()], &ctx).unwrap();
        let member_ty =
            resolver.resolve(&instance.members[0].ty, &ctx).unwrap();
        assert_eq!(member_ty, Ty::int());
        let ret_ty = resolver
            .resolve(&instance.methods[0].return_type, &ctx)
            .unwrap();
        assert_eq!(ret_ty, Ty::int());
    }

    #[test]
    fn test_instantiation_is_idempotent() {
        let (repo, resolver, ctx) = setup(LIST);
        let first =
            resolver.instantiate("List", &[int_arg()], &ctx).unwrap();
        let pending_after_first = repo.take_pending().len();
        let second =
            resolver.instantiate("List", &[int_arg()], &ctx).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(pending_after_first, 1);
        // The duplicate request queued nothing new.
        assert!(repo.take_pending().is_empty());
    }

    #[test]
    fn test_nested_instantiation() {
        let (repo, resolver, ctx) = setup(LIST);
        let inner = TypeNode::Generic(
            Token::new(TokenKind::Ident, "List", 1, 1),
            vec![int_arg()],
        );
        let outer =
            resolver.instantiate("List", &[inner], &ctx).unwrap();
        assert_eq!(outer.fqn(), "List$List$int");
        assert!(repo.find_struct("List$int").is_some());
    }

    #[test]
    fn test_wrong_arity_is_an_error() {
        let (_, resolver, ctx) = setup(LIST);
        let err = resolver
            .instantiate("List", &[int_arg(), int_arg()], &ctx)
            .unwrap_err();
        assert!(err.message.contains("expects 1 type argument"));
    }

    #[test]
    fn test_non_generic_base_is_an_error() {
        let (_, resolver, ctx) =
            setup("struct Point { public: int x; };");
        let err = resolver
            .instantiate("Point", &[int_arg()], &ctx)
            .unwrap_err();
        assert!(err.message.contains("is not generic"));
    }
}
