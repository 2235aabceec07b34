//! The semantic analyzer: walks every function body, computes canonical
//! expression types, enforces access control and the conversion rules, and
//! appends diagnostics.
//!
//! Every computed expression type is recorded in a side table keyed by node
//! id, along with resolved call targets and folded enum constants; code
//! generation consumes those annotations instead of re-running analysis.
//!
//! [Ty::Error] marks "already reported": once a subexpression yields it, no
//! further type mismatch is raised for its ancestors on account of that
//! subexpression.

use crate::ast::{
    Access, AccessorKind, CompilationUnit, Constructor, DeclInit, Destructor,
    Expr, ExprKind, Function, MemberVariable, NodeId, ParentMap, Program,
    Property, Stmt, StmtKind, Struct, TypeNode,
};
use crate::error::Diagnostics;
use crate::functions::{FunctionResolver, ResolvedFn};
use crate::repository::TypeRepository;
use crate::resolve::{ResolveCtx, Resolver};
use crate::token::Token;
use crate::ty::Ty;
use log::debug;
use std::collections::HashMap;
use std::rc::Rc;

struct Symbol {
    name: String,
    ty: Ty,
    token: Token,
    is_const: bool,
    is_param: bool,
    read: bool,
}

struct Scope {
    symbols: Vec<Symbol>,
}

/// The context of the body currently being analyzed.
#[derive(Clone)]
struct FnCtx {
    resolve: ResolveCtx,
    owner_fqn: Option<String>,
    return_ty: Ty,
    /// Set inside a property accessor: the property's type and which
    /// accessor this is.
    property: Option<(Ty, AccessorKind)>,
}

pub struct Analyzer {
    repo: Rc<TypeRepository>,
    resolver: Rc<Resolver>,
    functions: Rc<FunctionResolver>,
    diags: Rc<Diagnostics>,
    parents: ParentMap,
    scopes: Vec<Scope>,
    ctx: Option<FnCtx>,
    /// Annotations for code generation.
    types: HashMap<NodeId, Ty>,
    call_targets: HashMap<NodeId, ResolvedFn>,
    enum_consts: HashMap<NodeId, i32>,
    sizeof_targets: HashMap<NodeId, Ty>,
}

impl Analyzer {
    pub fn new(
        repo: Rc<TypeRepository>,
        resolver: Rc<Resolver>,
        functions: Rc<FunctionResolver>,
        diags: Rc<Diagnostics>,
    ) -> Self {
        Self {
            repo,
            resolver,
            functions,
            diags,
            parents: ParentMap::new(),
            scopes: Vec::new(),
            ctx: None,
            types: HashMap::new(),
            call_targets: HashMap::new(),
            enum_consts: HashMap::new(),
            sizeof_targets: HashMap::new(),
        }
    }

    // ===== Annotation accessors (used by codegen) =====

    pub fn expr_type(&self, id: NodeId) -> Option<&Ty> {
        self.types.get(&id)
    }

    pub fn call_target(&self, id: NodeId) -> Option<&ResolvedFn> {
        self.call_targets.get(&id)
    }

    pub fn enum_const(&self, id: NodeId) -> Option<i32> {
        self.enum_consts.get(&id).copied()
    }

    /// The resolved operand type of a `sizeof` expression.
    pub fn sizeof_target(&self, id: NodeId) -> Option<&Ty> {
        self.sizeof_targets.get(&id)
    }

    pub fn parents(&self) -> &ParentMap {
        &self.parents
    }

    // ===== Program walk =====

    /// Analyzes every function body in the program, then drains the queue
    /// of monomorphized structs until no new instances appear.
    pub fn analyze_program(&mut self, program: &Program) {
        for unit in &program.units {
            self.parents.link_unit(unit);
        }
        for unit in &program.units {
            for s in &unit.structs {
                // Generic templates are checked through their instances;
                // their bodies mention unbound parameters.
                if s.is_generic() {
                    continue;
                }
                self.check_struct(s, unit);
                self.analyze_struct(s, unit);
            }
            for f in &unit.functions {
                self.analyze_function(f, unit);
            }
        }
        loop {
            let pending = self.repo.take_pending();
            if pending.is_empty() {
                break;
            }
            debug!("analyzing {} monomorphized struct(s)", pending.len());
            for s in pending {
                let unit = match self.repo.unit_for_struct(&s.fqn()) {
                    Some(unit) => unit,
                    None => continue,
                };
                self.parents.link_struct(&s, unit.id);
                self.check_struct(&s, &unit);
                self.analyze_struct(&s, &unit);
            }
        }
    }

    /// Well-formedness checks that need no body walk: the base exists,
    /// member names are unique, `override` has something to override,
    /// properties declare at least one accessor.
    fn check_struct(&mut self, s: &Rc<Struct>, unit: &Rc<CompilationUnit>) {
        let ctx = ResolveCtx::new(s.namespace.clone(), Rc::clone(unit));
        if let Some(base) = &s.base_name {
            if self.resolver.lookup_struct(&base.text, &ctx).is_none() {
                self.diags.error_at(
                    &unit.path,
                    base,
                    format!("Unknown base struct '{}'", base.text),
                );
            }
        }

        let mut seen: HashMap<&str, &Token> = HashMap::new();
        for (name, token) in s
            .members
            .iter()
            .map(|m| (m.name.text.as_str(), &m.name))
            .chain(s.properties.iter().map(|p| (p.name.text.as_str(), &p.name)))
        {
            if seen.insert(name, token).is_some() {
                self.diags.error_at(
                    &unit.path,
                    token,
                    format!("Duplicate member '{}' in struct '{}'", name, s.name.text),
                );
            }
        }

        for p in &s.properties {
            if p.accessors.is_empty() {
                self.diags.error_at(
                    &unit.path,
                    &p.name,
                    format!(
                        "Property '{}' must declare at least one accessor",
                        p.name.text
                    ),
                );
            }
        }

        let chain = self.resolver.chain(&s.fqn());
        let bases = chain.get(1..).unwrap_or(&[]);
        for m in &s.methods {
            if !m.is_override {
                continue;
            }
            let has_base_virtual = bases.iter().any(|base| {
                base.methods_named(&m.name.text)
                    .iter()
                    .any(|candidate| candidate.is_virtual || candidate.is_override)
            });
            if !has_base_virtual {
                self.diags.error_at(
                    &unit.path,
                    &m.name,
                    format!(
                        "Method '{}' is marked override but no base virtual \
                         method was found",
                        m.name.text
                    ),
                );
            }
        }
    }

    fn analyze_struct(&mut self, s: &Rc<Struct>, unit: &Rc<CompilationUnit>) {
        for m in &s.methods {
            self.analyze_function(m, unit);
        }
        for c in &s.ctors {
            self.analyze_ctor(s, c, unit);
        }
        for d in &s.dtors {
            self.analyze_dtor(s, d, unit);
        }
        for p in &s.properties {
            self.analyze_property(s, p, unit);
        }
    }

    pub fn analyze_function(
        &mut self,
        f: &Rc<Function>,
        unit: &Rc<CompilationUnit>,
    ) {
        let resolve = ResolveCtx::new(f.namespace.clone(), Rc::clone(unit));
        let return_ty = self.resolve_or_report(
            &f.return_type,
            &resolve,
            f.return_type.first_token(),
        );
        self.ctx = Some(FnCtx {
            resolve,
            owner_fqn: f.owner_fqn(),
            return_ty,
            property: None,
        });

        let body = f.body.borrow();
        let body = match body.as_ref() {
            Some(body) => body,
            None => return,
        };
        self.push_scope();
        self.declare_this();
        for p in &f.params {
            let ctx = self.fctx().resolve.clone();
            let ty = self.resolve_or_report(&p.ty, &ctx, p.ty.first_token());
            self.declare(p.name.clone(), ty, false, true);
        }
        self.stmt(body);
        self.pop_scope();
    }

    fn analyze_ctor(
        &mut self,
        s: &Rc<Struct>,
        c: &Constructor,
        unit: &Rc<CompilationUnit>,
    ) {
        let resolve = ResolveCtx::new(c.namespace.clone(), Rc::clone(unit));
        self.ctx = Some(FnCtx {
            resolve,
            owner_fqn: Some(s.fqn()),
            return_ty: Ty::void(),
            property: None,
        });
        self.push_scope();
        self.declare_this();
        for p in &c.params {
            let ctx = self.fctx().resolve.clone();
            let ty = self.resolve_or_report(&p.ty, &ctx, p.ty.first_token());
            self.declare(p.name.clone(), ty, false, true);
        }

        if let Some(init) = &c.base_init {
            let arg_tys: Vec<Ty> =
                init.args.iter().map(|a| self.expr(a)).collect();
            match &s.base_name {
                None => self.error_at(
                    &init.name,
                    format!(
                        "Struct '{}' has no base to initialize",
                        s.name.text
                    ),
                ),
                Some(base) => {
                    if base.text != init.name.text {
                        self.error_at(
                            &init.name,
                            format!(
                                "Base initializer '{}' does not match base \
                                 struct '{}'",
                                init.name.text, base.text
                            ),
                        );
                    } else {
                        let ctx = self.fctx().resolve.clone();
                        if let Some(base_struct) =
                            self.resolver.lookup_struct(&base.text, &ctx)
                        {
                            self.check_ctor_args(
                                &base_struct,
                                &init.args,
                                &arg_tys,
                                &init.name,
                            );
                        }
                    }
                }
            }
        }

        self.stmt(&c.body.borrow());
        self.pop_scope();
    }

    fn analyze_dtor(
        &mut self,
        s: &Rc<Struct>,
        d: &Destructor,
        unit: &Rc<CompilationUnit>,
    ) {
        let resolve = ResolveCtx::new(d.namespace.clone(), Rc::clone(unit));
        self.ctx = Some(FnCtx {
            resolve,
            owner_fqn: Some(s.fqn()),
            return_ty: Ty::void(),
            property: None,
        });
        self.push_scope();
        self.declare_this();
        self.stmt(&d.body.borrow());
        self.pop_scope();
    }

    fn analyze_property(
        &mut self,
        s: &Rc<Struct>,
        p: &Property,
        unit: &Rc<CompilationUnit>,
    ) {
        let resolve = ResolveCtx::new(s.namespace.clone(), Rc::clone(unit));
        let prop_ty =
            self.resolve_or_report(&p.ty, &resolve, p.ty.first_token());
        for a in &p.accessors {
            let return_ty = match a.kind {
                AccessorKind::Get => prop_ty.clone(),
                AccessorKind::Set => Ty::void(),
            };
            self.ctx = Some(FnCtx {
                resolve: resolve.clone(),
                owner_fqn: Some(s.fqn()),
                return_ty,
                property: Some((prop_ty.clone(), a.kind)),
            });
            let body = a.body.borrow();
            if let Some(body) = body.as_ref() {
                self.push_scope();
                self.declare_this();
                self.stmt(body);
                self.pop_scope();
            }
        }
    }

    // ===== Statements =====

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Block(stmts) => {
                self.push_scope();
                for s in stmts {
                    self.stmt(s);
                }
                self.pop_scope();
            }
            StmtKind::Return { keyword, value } => {
                let return_ty = self.fctx().return_ty.clone();
                match value {
                    Some(expr) => {
                        let actual = self.expr(expr);
                        if return_ty.is_void() {
                            self.error_at(
                                keyword,
                                "Cannot return a value from a void function",
                            );
                        } else {
                            self.check_compat(
                                &return_ty,
                                &actual,
                                Some(expr),
                                false,
                                expr.first_token(),
                            );
                        }
                    }
                    None => {
                        if !return_ty.is_void() && !return_ty.is_error() {
                            self.error_at(
                                keyword,
                                "Non-void function must return a value",
                            );
                        }
                    }
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                // The condition is unconstrained: any non-void value is
                // truthy, as in C.
                self.expr(cond);
                self.stmt(then_branch);
                if let Some(e) = else_branch {
                    self.stmt(e);
                }
            }
            StmtKind::While { cond, body } => {
                self.expr(cond);
                self.stmt(body);
            }
            StmtKind::Declaration {
                is_const,
                ty,
                name,
                init,
            } => self.declaration(stmt.id, *is_const, ty, name, init),
            StmtKind::Expression(e) => {
                self.expr(e);
            }
            StmtKind::Delete { keyword, operand } => {
                let ty = self.expr(operand);
                if !ty.is_error() && !ty.is_pointer() {
                    self.error_at(
                        keyword,
                        format!("Cannot delete non-pointer type '{}'", ty),
                    );
                }
            }
        }
    }

    fn declaration(
        &mut self,
        stmt_id: NodeId,
        is_const: bool,
        ty: &TypeNode,
        name: &Token,
        init: &Option<DeclInit>,
    ) {
        let ctx = self.fctx().resolve.clone();
        let declared = self.resolve_or_report(ty, &ctx, ty.first_token());
        self.types.insert(stmt_id, declared.clone());
        if declared.is_void() {
            self.error_at(
                name,
                format!("Cannot declare variable '{}' of type 'void'", name.text),
            );
        }

        match init {
            None => {}
            Some(DeclInit::Expr(e)) => {
                if let ExprKind::InitializerList { open, values } = &e.kind {
                    self.initializer_list(&declared, open, values);
                } else {
                    let actual = self.expr(e);
                    self.check_compat(
                        &declared,
                        &actual,
                        Some(e),
                        true,
                        e.first_token(),
                    );
                }
            }
            Some(DeclInit::Ctor(args)) => {
                let arg_tys: Vec<Ty> =
                    args.iter().map(|a| self.expr(a)).collect();
                match declared.name().and_then(|n| self.repo.find_struct(n)) {
                    Some(s) => {
                        self.check_ctor_args(&s, args, &arg_tys, name)
                    }
                    None => {
                        if !declared.is_error() {
                            self.error_at(
                                name,
                                format!(
                                    "Constructor-call form requires a struct \
                                     type, found '{}'",
                                    declared
                                ),
                            );
                        }
                    }
                }
            }
        }

        if self.current_scope_has(&name.text) {
            self.error_at(
                name,
                format!("Variable '{}' is already defined in this scope", name.text),
            );
        }
        self.declare(name.clone(), declared, is_const, false);
    }

    /// `T x = { a, b };` requires a struct type; values are checked
    /// against the declared fields in order. Extra values are reported
    /// once; missing values are allowed.
    fn initializer_list(&mut self, declared: &Ty, open: &Token, values: &[Expr]) {
        let fields = match declared
            .name()
            .filter(|n| !declared.is_pointer())
            .and_then(|n| self.repo.find_struct(n))
        {
            Some(s) => self.chain_fields(&s),
            None => {
                if !declared.is_error() {
                    self.error_at(
                        open,
                        format!(
                            "An initializer list requires a struct type, \
                             found '{}'",
                            declared
                        ),
                    );
                }
                for v in values {
                    self.expr(v);
                }
                return;
            }
        };

        for (i, value) in values.iter().enumerate() {
            let actual = self.expr(value);
            match fields.get(i) {
                Some((_, field_ty)) => self.check_compat(
                    field_ty,
                    &actual,
                    Some(value),
                    true,
                    value.first_token(),
                ),
                None => {
                    self.error_at(
                        value.first_token(),
                        format!(
                            "Too many values in initializer for '{}'",
                            declared
                        ),
                    );
                    for rest in &values[i + 1..] {
                        self.expr(rest);
                    }
                    break;
                }
            }
        }
    }

    /// Declared fields of the whole chain, bases first, with resolved
    /// types.
    fn chain_fields(&mut self, s: &Rc<Struct>) -> Vec<(String, Ty)> {
        let chain = self.resolver.chain(&s.fqn());
        let mut out = Vec::new();
        for level in chain.iter().rev() {
            for m in &level.members {
                let ty = self
                    .member_type(level, m)
                    .unwrap_or(Ty::Error);
                out.push((m.name.text.clone(), ty));
            }
        }
        out
    }

    fn check_ctor_args(
        &mut self,
        s: &Rc<Struct>,
        args: &[Expr],
        arg_tys: &[Ty],
        at: &Token,
    ) {
        if s.ctors.is_empty() {
            if !args.is_empty() {
                self.error_at(
                    at,
                    format!(
                        "No constructor of '{}' takes {} argument(s)",
                        s.fqn(),
                        args.len()
                    ),
                );
            }
            return;
        }
        let matching: Vec<&Constructor> = s
            .ctors
            .iter()
            .filter(|c| c.params.len() == args.len())
            .collect();
        let ctor = match matching.first() {
            Some(ctor) => *ctor,
            None => {
                self.error_at(
                    at,
                    format!(
                        "No constructor of '{}' takes {} argument(s)",
                        s.fqn(),
                        args.len()
                    ),
                );
                return;
            }
        };
        let unit = match self.repo.unit_for_struct(&s.fqn()) {
            Some(unit) => unit,
            None => return,
        };
        let ctx = ResolveCtx::new(s.namespace.clone(), unit);
        for ((param, arg), actual) in
            ctor.params.iter().zip(args).zip(arg_tys)
        {
            if let Ok(expected) = self.resolver.resolve(&param.ty, &ctx) {
                self.check_compat(
                    &expected,
                    actual,
                    Some(arg),
                    true,
                    arg.first_token(),
                );
            }
        }
    }

    // ===== Expressions =====

    /// Computes and records the canonical type of an expression.
    pub fn expr(&mut self, e: &Expr) -> Ty {
        let ty = self.expr_inner(e);
        self.types.insert(e.id, ty.clone());
        ty
    }

    fn expr_inner(&mut self, e: &Expr) -> Ty {
        match &e.kind {
            ExprKind::IntLit { .. } => Ty::int(),
            ExprKind::StrLit { .. } => Ty::char_().pointer(),
            ExprKind::Sizeof { keyword, ty } => {
                let ctx = self.fctx().resolve.clone();
                match self.resolver.resolve(ty, &ctx) {
                    Ok(resolved) => {
                        self.sizeof_targets.insert(e.id, resolved);
                    }
                    Err(err) => self.error_at(keyword, err.message),
                }
                Ty::int()
            }
            ExprKind::InitializerList { open, values } => {
                self.error_at(
                    open,
                    "An initializer list is only valid in a declaration",
                );
                for v in values {
                    self.expr(v);
                }
                Ty::Error
            }
            ExprKind::Variable { name } => self.variable(e.id, name),
            ExprKind::Unary { op, right } => {
                let ty = self.expr(right);
                match op.kind {
                    crate::token::TokenKind::Amp => ty.pointer(),
                    crate::token::TokenKind::Star => {
                        if ty.is_error() {
                            return Ty::Error;
                        }
                        match ty.deref() {
                            Some(inner) => inner,
                            None => {
                                self.error_at(
                                    op,
                                    format!(
                                        "Cannot dereference non-pointer \
                                         type '{}'",
                                        ty
                                    ),
                                );
                                Ty::Error
                            }
                        }
                    }
                    _ => ty,
                }
            }
            ExprKind::Binary { left, op, right } => {
                self.binary(e.id, left, op, right)
            }
            ExprKind::Assignment { left, right, .. } => {
                let actual = self.expr(right);
                let target = self.expr(left);
                self.check_const_assignment(left);
                self.check_compat(
                    &target,
                    &actual,
                    Some(right),
                    false,
                    right.first_token(),
                );
                target
            }
            ExprKind::MemberAccess { left, member, .. } => {
                self.member_access(e.id, left, member)
            }
            ExprKind::QualifiedAccess { left, member } => {
                self.qualified_access(e.id, left, member)
            }
            ExprKind::Call { callee, args } => self.call(e.id, callee, args),
            ExprKind::New { keyword, ty, args } => {
                self.new_expr(keyword, ty, args)
            }
        }
    }

    /// Resolution order for a bare identifier: property accessor keywords,
    /// local symbols, unqualified enum members, implicit `this` fields.
    fn variable(&mut self, id: NodeId, name: &Token) -> Ty {
        if let Some((prop_ty, kind)) = self.fctx().property.clone() {
            if name.text == "value" {
                if kind != AccessorKind::Set {
                    self.error_at(
                        name,
                        "'value' is only available in a set accessor",
                    );
                    return Ty::Error;
                }
                return prop_ty;
            }
            if name.text == "field" {
                return prop_ty;
            }
        }

        if let Some(ty) = self.lookup_and_mark(&name.text) {
            return ty;
        }

        let ctx = self.fctx().resolve.clone();
        if let Some(value) =
            self.functions.unqualified_enum_member(&name.text, &ctx)
        {
            self.enum_consts.insert(id, value);
            return Ty::int();
        }

        if let Some(owner) = self.fctx().owner_fqn.clone() {
            for level in self.resolver.chain(&owner) {
                if let Some(m) = level.find_member(&name.text) {
                    // An implicit `this->name` counts as a use of `this`.
                    self.lookup_and_mark("this");
                    self.check_access(
                        m.access,
                        &level.fqn(),
                        name,
                        &name.text,
                    );
                    return match self.member_type(&level, m) {
                        Ok(ty) => ty,
                        Err(err) => {
                            self.error_at(name, err.message);
                            Ty::Error
                        }
                    };
                }
            }
        }

        self.error_at(name, format!("Undefined variable '{}'", name.text));
        Ty::Error
    }

    fn binary(
        &mut self,
        id: NodeId,
        left: &Expr,
        op: &Token,
        right: &Expr,
    ) -> Ty {
        let lt = self.expr(left);
        let rt = self.expr(right);
        if lt.is_error() || rt.is_error() {
            return Ty::Error;
        }

        // A struct on the left means operator overloading.
        let is_struct = lt
            .name()
            .filter(|_| !lt.is_pointer())
            .map_or(false, |n| self.repo.find_struct(n).is_some());
        if is_struct {
            let method = match op.kind.operator_name() {
                Some(fragment) => format!("operator_{}", fragment),
                None => {
                    self.error_at(
                        op,
                        format!(
                            "No operator '{}' defined for type '{}'",
                            op.text, lt
                        ),
                    );
                    return Ty::Error;
                }
            };
            return match self.functions.resolve_method(&lt, &method, 1) {
                Ok(target) => {
                    let ty = self.fn_return_type(&target, op);
                    self.call_targets.insert(id, target);
                    ty
                }
                Err(_) => {
                    self.error_at(
                        op,
                        format!(
                            "No operator '{}' defined for type '{}'",
                            op.text, lt
                        ),
                    );
                    Ty::Error
                }
            };
        }

        use crate::token::TokenKind::*;
        match op.kind {
            EqEq | NotEq | Lt | Gt => Ty::int(),
            _ => lt,
        }
    }

    fn member_access(
        &mut self,
        id: NodeId,
        left: &Expr,
        member: &Token,
    ) -> Ty {
        let recv = self.expr(left);
        if recv.is_error() {
            return Ty::Error;
        }
        let base = match recv.base_struct_name() {
            Some(base) => base.to_string(),
            None => return Ty::Error,
        };
        if self.repo.find_struct(&base).is_none() {
            self.error_at(
                member,
                format!(
                    "Cannot access member '{}' of non-struct type '{}'",
                    member.text, recv
                ),
            );
            return Ty::Error;
        }

        for level in self.resolver.chain(&base) {
            if let Some(m) = level.find_member(&member.text) {
                self.check_access(m.access, &level.fqn(), member, &member.text);
                return match self.member_type(&level, m) {
                    Ok(ty) => ty,
                    Err(err) => {
                        self.error_at(member, err.message);
                        Ty::Error
                    }
                };
            }
            if let Some(p) = level.find_property(&member.text) {
                self.check_access(p.access, &level.fqn(), member, &member.text);
                // L-value position requires `set`, everything else `get`.
                let (required, label) = if self.parents.is_assign_target(id)
                {
                    (AccessorKind::Set, "set")
                } else {
                    (AccessorKind::Get, "get")
                };
                if p.accessor(required).is_none() {
                    self.error_at(
                        member,
                        format!(
                            "Property '{}' has no {} accessor",
                            member.text, label
                        ),
                    );
                }
                let unit = self.repo.unit_for_struct(&level.fqn());
                return match unit {
                    Some(unit) => {
                        let ctx =
                            ResolveCtx::new(level.namespace.clone(), unit);
                        self.resolve_or_report(
                            &p.ty,
                            &ctx,
                            member,
                        )
                    }
                    None => Ty::Error,
                };
            }
        }

        self.error_at(
            member,
            format!("Struct '{}' has no member '{}'", base, member.text),
        );
        Ty::Error
    }

    /// `A::B::m`: an enum member, or a static function reference.
    fn qualified_access(
        &mut self,
        id: NodeId,
        left: &Expr,
        member: &Token,
    ) -> Ty {
        let qualifier = match left.flatten_qualifier() {
            Some(q) => q,
            None => {
                self.error_at(
                    left.first_token(),
                    "Invalid qualified name",
                );
                return Ty::Error;
            }
        };
        let ctx = self.fctx().resolve.clone();
        if let Some(enum_fqn) = self.resolver.resolve_enum_name(&qualifier, &ctx)
        {
            return match self.functions.enum_value(&enum_fqn, &member.text) {
                Some(value) => {
                    self.enum_consts.insert(id, value);
                    Ty::int()
                }
                None => {
                    self.error_at(
                        member,
                        format!(
                            "Enum '{}' has no member '{}'",
                            enum_fqn, member.text
                        ),
                    );
                    Ty::Error
                }
            };
        }
        if self
            .functions
            .qualified_exists(&qualifier, &member.text, &ctx)
        {
            // A bare reference to a function degrades to an opaque pointer.
            return Ty::void().pointer();
        }
        self.error_at(
            member,
            format!("Unknown name '{}::{}'", qualifier, member.text),
        );
        Ty::Error
    }

    fn call(&mut self, id: NodeId, callee: &Expr, args: &[Expr]) -> Ty {
        let ctx = self.fctx().resolve.clone();
        let target = match &callee.kind {
            ExprKind::Variable { name } => self
                .functions
                .resolve_named(&name.text, args.len(), &ctx)
                .map_err(|err| (name.clone(), err)),
            ExprKind::QualifiedAccess { left, member } => {
                match left.flatten_qualifier() {
                    Some(qualifier) => self
                        .functions
                        .resolve_qualified(
                            &qualifier,
                            &member.text,
                            args.len(),
                            &ctx,
                        )
                        .map_err(|err| (member.clone(), err)),
                    None => {
                        self.error_at(
                            left.first_token(),
                            "Invalid qualified name",
                        );
                        for a in args {
                            self.expr(a);
                        }
                        return Ty::Error;
                    }
                }
            }
            ExprKind::MemberAccess { left, member, .. } => {
                let recv = self.expr(left);
                if recv.is_error() {
                    for a in args {
                        self.expr(a);
                    }
                    return Ty::Error;
                }
                self.functions
                    .resolve_method(&recv, &member.text, args.len())
                    .map_err(|err| (member.clone(), err))
            }
            _ => {
                self.error_at(
                    callee.first_token(),
                    "Expression is not callable",
                );
                for a in args {
                    self.expr(a);
                }
                return Ty::Error;
            }
        };

        let target = match target {
            Ok(target) => target,
            Err((token, err)) => {
                self.error_at(&token, err.message);
                for a in args {
                    self.expr(a);
                }
                return Ty::Error;
            }
        };

        if target.func.access == Access::Private {
            if let Some(owner) = target.func.owner_fqn() {
                if self.fctx().owner_fqn.as_deref() != Some(owner.as_str()) {
                    self.error_at(
                        callee.first_token(),
                        format!(
                            "Method '{}' of struct '{}' is private",
                            target.func.name.text, owner
                        ),
                    );
                }
            }
        }

        if target.func.params.len() != args.len() {
            self.error_at(
                callee.first_token(),
                format!(
                    "Function '{}' expects {} argument(s), got {}",
                    target.func.name.text,
                    target.func.params.len(),
                    args.len()
                ),
            );
        }
        for a in args {
            self.expr(a);
        }

        let return_ty = self.fn_return_type(&target, callee.first_token());
        self.call_targets.insert(id, target);
        return_ty
    }

    fn new_expr(
        &mut self,
        keyword: &Token,
        ty: &TypeNode,
        args: &[Expr],
    ) -> Ty {
        let ctx = self.fctx().resolve.clone();
        let resolved = match self.resolver.resolve(ty, &ctx) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.error_at(keyword, err.message);
                for a in args {
                    self.expr(a);
                }
                return Ty::Error;
            }
        };
        if resolved.is_primitive() || resolved.is_pointer() {
            self.error_at(
                keyword,
                format!(
                    "\"new\" cannot be used with primitive type '{}'",
                    resolved
                ),
            );
            for a in args {
                self.expr(a);
            }
            return Ty::Error;
        }

        let arg_tys: Vec<Ty> = args.iter().map(|a| self.expr(a)).collect();
        if let Some(s) =
            resolved.name().and_then(|n| self.repo.find_struct(n))
        {
            self.check_ctor_args(&s, args, &arg_tys, keyword);
        }
        resolved.pointer()
    }

    // ===== Shared checks =====

    /// Implicit conversions are deliberately narrow: identical types, a
    /// literal int into char, int into any pointer when initializing
    /// (malloc-style interop), and pass-through for unbound generic
    /// parameters. Everything else is a mismatch, reported once per site.
    fn check_compat(
        &mut self,
        expected: &Ty,
        actual: &Ty,
        rhs: Option<&Expr>,
        initializing: bool,
        at: &Token,
    ) {
        if expected.is_error() || actual.is_error() {
            return;
        }
        if expected == actual {
            return;
        }
        if expected.name() == Some("char")
            && actual.name() == Some("int")
            && rhs.map_or(false, |e| {
                matches!(e.kind, ExprKind::IntLit { .. })
            })
        {
            return;
        }
        if initializing
            && expected.is_pointer()
            && actual.name() == Some("int")
        {
            return;
        }
        if expected.is_generic_param() || actual.is_generic_param() {
            return;
        }
        self.error_at(
            at,
            format!("Type mismatch: expected '{}', found '{}'", expected, actual),
        );
    }

    fn check_access(
        &mut self,
        access: Access,
        defining_fqn: &str,
        at: &Token,
        member_name: &str,
    ) {
        if access == Access::Private
            && self.fctx().owner_fqn.as_deref() != Some(defining_fqn)
        {
            self.error_at(
                at,
                format!(
                    "Member '{}' of struct '{}' is private",
                    member_name, defining_fqn
                ),
            );
        }
    }

    fn check_const_assignment(&mut self, left: &Expr) {
        if let ExprKind::Variable { name } = &left.kind {
            let is_const = self
                .scopes
                .iter()
                .rev()
                .flat_map(|s| s.symbols.iter().rev())
                .find(|s| s.name == name.text)
                .map_or(false, |s| s.is_const);
            if is_const {
                self.error_at(
                    name,
                    format!("Cannot assign to constant '{}'", name.text),
                );
            }
        }
    }

    fn member_type(
        &self,
        level: &Rc<Struct>,
        m: &MemberVariable,
    ) -> Result<Ty, crate::error::ResolveError> {
        let unit = self.repo.unit_for_struct(&level.fqn()).ok_or_else(|| {
            crate::error::ResolveError::new(format!(
                "Unknown struct '{}'",
                level.fqn()
            ))
        })?;
        let ctx = ResolveCtx::new(level.namespace.clone(), unit);
        self.resolver.resolve(&m.ty, &ctx)
    }

    fn fn_return_type(&mut self, target: &ResolvedFn, at: &Token) -> Ty {
        let ctx = ResolveCtx::new(
            target.func.namespace.clone(),
            Rc::clone(&target.unit),
        );
        self.resolve_or_report(&target.func.return_type, &ctx, at)
    }

    fn resolve_or_report(
        &mut self,
        node: &TypeNode,
        ctx: &ResolveCtx,
        at: &Token,
    ) -> Ty {
        match self.resolver.resolve(node, ctx) {
            Ok(ty) => ty,
            Err(err) => {
                self.error_at(at, err.message);
                Ty::Error
            }
        }
    }

    // ===== Scopes =====

    fn push_scope(&mut self) {
        self.scopes.push(Scope {
            symbols: Vec::new(),
        });
    }

    /// Closing a scope reports every local that was never read.
    fn pop_scope(&mut self) {
        let path = self.fctx().resolve.unit.path.clone();
        if let Some(scope) = self.scopes.pop() {
            for symbol in scope.symbols {
                if !symbol.read && !symbol.is_param {
                    self.diags.warning_at(
                        &path,
                        &symbol.token,
                        format!("Unused variable '{}'", symbol.name),
                    );
                }
            }
        }
    }

    fn declare(&mut self, token: Token, ty: Ty, is_const: bool, is_param: bool) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.symbols.push(Symbol {
                name: token.text.clone(),
                ty,
                token,
                is_const,
                is_param,
                read: false,
            });
        }
    }

    fn declare_this(&mut self) {
        if let Some(owner) = self.fctx().owner_fqn.clone() {
            let token = Token::new(
                crate::token::TokenKind::Ident,
                "this",
                0,
                0,
            );
            self.declare(token, Ty::named(owner).pointer(), false, true);
        }
    }

    fn current_scope_has(&self, name: &str) -> bool {
        self.scopes
            .last()
            .map_or(false, |s| s.symbols.iter().any(|sym| sym.name == name))
    }

    fn lookup_and_mark(&mut self, name: &str) -> Option<Ty> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(symbol) =
                scope.symbols.iter_mut().rev().find(|s| s.name == name)
            {
                symbol.read = true;
                return Some(symbol.ty.clone());
            }
        }
        None
    }

    fn fctx(&self) -> &FnCtx {
        self.ctx
            .as_ref()
            .expect("analyzer entered an expression without a function context")
    }

    fn error_at(&mut self, token: &Token, message: impl Into<String>) {
        let path = self.fctx().resolve.unit.path.clone();
        self.diags.error_at(&path, token, message);
    }
}
