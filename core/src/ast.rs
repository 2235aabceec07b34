//! All the different node types that can appear in a CTilde abstract syntax
//! tree. The tree is a closed set of sum types; analysis dispatches by
//! pattern match, never by reflection.
//!
//! Every definition, statement and expression carries a [NodeId]. Parent
//! back-links live outside the tree, in a [ParentMap] side table built by a
//! single post-parse traversal, so they never participate in ownership.

use crate::token::Token;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Identity of an AST node within one compilation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Monotonic [NodeId] allocator, shared by the parser and the AST cloner.
#[derive(Debug, Default)]
pub struct IdGen {
    next: Cell<u32>,
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> NodeId {
        let id = self.next.get();
        self.next.set(id + 1);
        NodeId(id)
    }
}

/// Member visibility. The default section of a struct body is private.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Public,
    Private,
}

/// A parsed (unresolved) type reference. Pointer depth and base name are
/// computable by a pure structural walk.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeNode {
    Simple(Token),
    Pointer(Box<TypeNode>),
    Generic(Token, Vec<TypeNode>),
}

impl TypeNode {
    /// The token that starts this type, for diagnostic positions.
    pub fn first_token(&self) -> &Token {
        match self {
            TypeNode::Simple(token) => token,
            TypeNode::Pointer(inner) => inner.first_token(),
            TypeNode::Generic(name, _) => name,
        }
    }

    pub fn pointer_depth(&self) -> usize {
        match self {
            TypeNode::Pointer(inner) => inner.pointer_depth() + 1,
            _ => 0,
        }
    }
}

/// `using N;` opens namespace `N`; `using A = N;` aliases `A` to `N`.
#[derive(Clone, Debug)]
pub struct Using {
    pub id: NodeId,
    pub ns: String,
    pub alias: Option<String>,
    pub token: Token,
}

#[derive(Clone, Debug)]
pub struct EnumMember {
    pub name: Token,
    pub value: i32,
}

#[derive(Clone, Debug)]
pub struct Enum {
    pub id: NodeId,
    pub name: Token,
    pub namespace: Option<String>,
    pub members: Vec<EnumMember>,
}

impl Enum {
    pub fn fqn(&self) -> String {
        make_fqn(self.namespace.as_deref(), &self.name.text)
    }

    pub fn member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name.text == name)
    }
}

#[derive(Clone, Debug)]
pub struct MemberVariable {
    pub id: NodeId,
    pub is_const: bool,
    pub ty: TypeNode,
    pub name: Token,
    pub access: Access,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessorKind {
    Get,
    Set,
}

/// One `get`/`set` entry of a property. The body is optional: auto
/// properties declare bare `get;`/`set;`.
#[derive(Clone, Debug)]
pub struct Accessor {
    pub id: NodeId,
    pub kind: AccessorKind,
    pub keyword: Token,
    pub body: RefCell<Option<Stmt>>,
}

#[derive(Clone, Debug)]
pub struct Property {
    pub id: NodeId,
    pub ty: TypeNode,
    pub name: Token,
    pub access: Access,
    pub accessors: Vec<Accessor>,
}

impl Property {
    pub fn accessor(&self, kind: AccessorKind) -> Option<&Accessor> {
        self.accessors.iter().find(|a| a.kind == kind)
    }
}

#[derive(Clone, Debug)]
pub struct Param {
    pub id: NodeId,
    pub ty: TypeNode,
    pub name: Token,
}

/// A free function or a struct method. Methods have `owner_struct` set to
/// the owning struct's simple name; combine with `namespace` for the owner
/// FQN. The body is absent for external declarations such as
/// `int malloc(int size);`.
#[derive(Clone, Debug)]
pub struct Function {
    pub id: NodeId,
    pub return_type: TypeNode,
    pub name: Token,
    pub params: Vec<Param>,
    pub body: RefCell<Option<Stmt>>,
    pub owner_struct: Option<String>,
    pub namespace: Option<String>,
    pub access: Access,
    pub is_virtual: bool,
    pub is_override: bool,
}

impl Function {
    pub fn is_method(&self) -> bool {
        self.owner_struct.is_some()
    }

    /// FQN of the owning struct, if this is a method.
    pub fn owner_fqn(&self) -> Option<String> {
        self.owner_struct
            .as_deref()
            .map(|owner| make_fqn(self.namespace.as_deref(), owner))
    }
}

#[derive(Clone, Debug)]
pub struct BaseInit {
    pub name: Token,
    pub args: Vec<Expr>,
}

#[derive(Clone, Debug)]
pub struct Constructor {
    pub id: NodeId,
    pub owner_struct: String,
    pub namespace: Option<String>,
    pub access: Access,
    pub params: Vec<Param>,
    pub base_init: Option<BaseInit>,
    pub body: RefCell<Stmt>,
}

#[derive(Clone, Debug)]
pub struct Destructor {
    pub id: NodeId,
    pub owner_struct: String,
    pub namespace: Option<String>,
    pub access: Access,
    pub is_virtual: bool,
    pub body: RefCell<Stmt>,
}

#[derive(Clone, Debug)]
pub struct Struct {
    pub id: NodeId,
    pub name: Token,
    pub generic_params: Vec<Token>,
    pub base_name: Option<Token>,
    pub namespace: Option<String>,
    pub members: Vec<MemberVariable>,
    pub properties: Vec<Property>,
    pub methods: Vec<Rc<Function>>,
    pub ctors: Vec<Constructor>,
    pub dtors: Vec<Destructor>,
}

impl Struct {
    pub fn fqn(&self) -> String {
        make_fqn(self.namespace.as_deref(), &self.name.text)
    }

    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }

    pub fn find_member(&self, name: &str) -> Option<&MemberVariable> {
        self.members.iter().find(|m| m.name.text == name)
    }

    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name.text == name)
    }

    pub fn methods_named(&self, name: &str) -> Vec<&Rc<Function>> {
        self.methods
            .iter()
            .filter(|m| m.name.text == name)
            .collect()
    }

    /// True if this struct itself declares anything virtual. Whether the
    /// final layout carries a vtable pointer depends on the whole chain.
    pub fn declares_virtual(&self) -> bool {
        self.methods.iter().any(|m| m.is_virtual)
            || self.dtors.iter().any(|d| d.is_virtual)
    }
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub id: NodeId,
    pub kind: StmtKind,
}

/// How a declaration initializes its variable, if at all.
#[derive(Clone, Debug)]
pub enum DeclInit {
    /// `T x = expr;` (the expression may be an initializer list)
    Expr(Expr),
    /// Constructor-call form, `T x(a, b);`
    Ctor(Vec<Expr>),
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Block(Vec<Stmt>),
    Return {
        keyword: Token,
        value: Option<Expr>,
    },
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Declaration {
        is_const: bool,
        ty: TypeNode,
        name: Token,
        init: Option<DeclInit>,
    },
    Expression(Expr),
    Delete {
        keyword: Token,
        operand: Expr,
    },
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    IntLit {
        token: Token,
        value: i32,
    },
    StrLit {
        token: Token,
        label: String,
    },
    Variable {
        name: Token,
    },
    Unary {
        op: Token,
        right: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: Token,
        right: Box<Expr>,
    },
    Assignment {
        left: Box<Expr>,
        op: Token,
        right: Box<Expr>,
    },
    MemberAccess {
        left: Box<Expr>,
        /// `.` or `->`
        op: Token,
        member: Token,
    },
    QualifiedAccess {
        left: Box<Expr>,
        member: Token,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        keyword: Token,
        ty: TypeNode,
        args: Vec<Expr>,
    },
    Sizeof {
        keyword: Token,
        ty: TypeNode,
    },
    InitializerList {
        open: Token,
        values: Vec<Expr>,
    },
}

impl Expr {
    /// The token that starts this expression, for diagnostic positions.
    pub fn first_token(&self) -> &Token {
        match &self.kind {
            ExprKind::IntLit { token, .. } => token,
            ExprKind::StrLit { token, .. } => token,
            ExprKind::Variable { name } => name,
            ExprKind::Unary { op, .. } => op,
            ExprKind::Binary { left, .. } => left.first_token(),
            ExprKind::Assignment { left, .. } => left.first_token(),
            ExprKind::MemberAccess { left, .. } => left.first_token(),
            ExprKind::QualifiedAccess { left, .. } => left.first_token(),
            ExprKind::Call { callee, .. } => callee.first_token(),
            ExprKind::New { keyword, .. } => keyword,
            ExprKind::Sizeof { keyword, .. } => keyword,
            ExprKind::InitializerList { open, .. } => open,
        }
    }

    /// Flattens a chain of qualified accesses (and its variable leaf) into a
    /// `::`-joined name, e.g. `A::B::C`. Returns `None` for any other shape.
    pub fn flatten_qualifier(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Variable { name } => Some(name.text.clone()),
            ExprKind::QualifiedAccess { left, member } => {
                Some(format!("{}::{}", left.flatten_qualifier()?, member.text))
            }
            _ => None,
        }
    }
}

/// A single parsed source file.
#[derive(Clone, Debug)]
pub struct CompilationUnit {
    pub id: NodeId,
    pub path: String,
    pub usings: Vec<Using>,
    pub imports: Vec<String>,
    pub structs: Vec<Rc<Struct>>,
    pub functions: Vec<Rc<Function>>,
    pub enums: Vec<Rc<Enum>>,
}

/// The merged program: all units plus the union of their imported library
/// names.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub imports: Vec<String>,
    pub units: Vec<Rc<CompilationUnit>>,
}

pub fn make_fqn(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}::{}", ns, name),
        None => name.to_string(),
    }
}

/// Upward links for every node, keyed by [NodeId]. Built once per unit (and
/// once per monomorphized struct) after construction; purely observational.
#[derive(Debug, Default)]
pub struct ParentMap {
    parents: HashMap<NodeId, NodeId>,
    assign_targets: HashSet<NodeId>,
}

impl ParentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(&id).copied()
    }

    /// True if the node is the left operand of an assignment. This is the
    /// question the analyzer asks of parent links when deciding whether a
    /// property access needs a `set` accessor.
    pub fn is_assign_target(&self, id: NodeId) -> bool {
        self.assign_targets.contains(&id)
    }

    fn set(&mut self, child: NodeId, parent: NodeId) {
        self.parents.insert(child, parent);
    }

    pub fn link_unit(&mut self, unit: &CompilationUnit) {
        for using in &unit.usings {
            self.set(using.id, unit.id);
        }
        for s in &unit.structs {
            self.link_struct(s, unit.id);
        }
        for f in &unit.functions {
            self.link_function(f, unit.id);
        }
        for e in &unit.enums {
            self.set(e.id, unit.id);
        }
    }

    pub fn link_struct(&mut self, s: &Struct, parent: NodeId) {
        self.set(s.id, parent);
        for m in &s.members {
            self.set(m.id, s.id);
        }
        for p in &s.properties {
            self.set(p.id, s.id);
            for a in &p.accessors {
                self.set(a.id, p.id);
                if let Some(body) = a.body.borrow().as_ref() {
                    self.link_stmt(body, a.id);
                }
            }
        }
        for m in &s.methods {
            self.link_function(m, s.id);
        }
        for c in &s.ctors {
            self.set(c.id, s.id);
            for p in &c.params {
                self.set(p.id, c.id);
            }
            if let Some(init) = &c.base_init {
                for arg in &init.args {
                    self.link_expr(arg, c.id);
                }
            }
            self.link_stmt(&c.body.borrow(), c.id);
        }
        for d in &s.dtors {
            self.set(d.id, s.id);
            self.link_stmt(&d.body.borrow(), d.id);
        }
    }

    pub fn link_function(&mut self, f: &Function, parent: NodeId) {
        self.set(f.id, parent);
        for p in &f.params {
            self.set(p.id, f.id);
        }
        if let Some(body) = f.body.borrow().as_ref() {
            self.link_stmt(body, f.id);
        }
    }

    pub fn link_stmt(&mut self, stmt: &Stmt, parent: NodeId) {
        self.set(stmt.id, parent);
        match &stmt.kind {
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.link_stmt(s, stmt.id);
                }
            }
            StmtKind::Return { value, .. } => {
                if let Some(v) = value {
                    self.link_expr(v, stmt.id);
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.link_expr(cond, stmt.id);
                self.link_stmt(then_branch, stmt.id);
                if let Some(e) = else_branch {
                    self.link_stmt(e, stmt.id);
                }
            }
            StmtKind::While { cond, body } => {
                self.link_expr(cond, stmt.id);
                self.link_stmt(body, stmt.id);
            }
            StmtKind::Declaration { init, .. } => match init {
                Some(DeclInit::Expr(e)) => self.link_expr(e, stmt.id),
                Some(DeclInit::Ctor(args)) => {
                    for a in args {
                        self.link_expr(a, stmt.id);
                    }
                }
                None => {}
            },
            StmtKind::Expression(e) => self.link_expr(e, stmt.id),
            StmtKind::Delete { operand, .. } => {
                self.link_expr(operand, stmt.id)
            }
        }
    }

    pub fn link_expr(&mut self, expr: &Expr, parent: NodeId) {
        self.set(expr.id, parent);
        match &expr.kind {
            ExprKind::IntLit { .. }
            | ExprKind::StrLit { .. }
            | ExprKind::Variable { .. }
            | ExprKind::Sizeof { .. } => {}
            ExprKind::Unary { right, .. } => self.link_expr(right, expr.id),
            ExprKind::Binary { left, right, .. } => {
                self.link_expr(left, expr.id);
                self.link_expr(right, expr.id);
            }
            ExprKind::Assignment { left, right, .. } => {
                self.assign_targets.insert(left.id);
                self.link_expr(left, expr.id);
                self.link_expr(right, expr.id);
            }
            ExprKind::MemberAccess { left, .. } => {
                self.link_expr(left, expr.id)
            }
            ExprKind::QualifiedAccess { left, .. } => {
                self.link_expr(left, expr.id)
            }
            ExprKind::Call { callee, args } => {
                self.link_expr(callee, expr.id);
                for a in args {
                    self.link_expr(a, expr.id);
                }
            }
            ExprKind::New { args, .. } => {
                for a in args {
                    self.link_expr(a, expr.id);
                }
            }
            ExprKind::InitializerList { values, .. } => {
                for v in values {
                    self.link_expr(v, expr.id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;

    fn parsed(source: &str) -> (CompilationUnit, ParentMap) {
        let diags = Diagnostics::new();
        let ids = IdGen::new();
        let tokens = crate::lexer::tokenize(source);
        let unit = crate::parse::parse_unit("test.ct", &tokens, &diags, &ids);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        let mut parents = ParentMap::new();
        parents.link_unit(&unit);
        (unit, parents)
    }

    /// Collects the id of every statement and expression in a body.
    fn collect_ids(stmt: &Stmt, out: &mut Vec<NodeId>) {
        out.push(stmt.id);
        match &stmt.kind {
            StmtKind::Block(stmts) => {
                for s in stmts {
                    collect_ids(s, out);
                }
            }
            StmtKind::Return { value, .. } => {
                if let Some(v) = value {
                    collect_expr_ids(v, out);
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                collect_expr_ids(cond, out);
                collect_ids(then_branch, out);
                if let Some(e) = else_branch {
                    collect_ids(e, out);
                }
            }
            StmtKind::While { cond, body } => {
                collect_expr_ids(cond, out);
                collect_ids(body, out);
            }
            StmtKind::Declaration { init, .. } => match init {
                Some(DeclInit::Expr(e)) => collect_expr_ids(e, out),
                Some(DeclInit::Ctor(args)) => {
                    for a in args {
                        collect_expr_ids(a, out);
                    }
                }
                None => {}
            },
            StmtKind::Expression(e) => collect_expr_ids(e, out),
            StmtKind::Delete { operand, .. } => {
                collect_expr_ids(operand, out)
            }
        }
    }

    fn collect_expr_ids(expr: &Expr, out: &mut Vec<NodeId>) {
        out.push(expr.id);
        match &expr.kind {
            ExprKind::Unary { right, .. } => collect_expr_ids(right, out),
            ExprKind::Binary { left, right, .. }
            | ExprKind::Assignment { left, right, .. } => {
                collect_expr_ids(left, out);
                collect_expr_ids(right, out);
            }
            ExprKind::MemberAccess { left, .. }
            | ExprKind::QualifiedAccess { left, .. } => {
                collect_expr_ids(left, out)
            }
            ExprKind::Call { callee, args } => {
                collect_expr_ids(callee, out);
                for a in args {
                    collect_expr_ids(a, out);
                }
            }
            ExprKind::New { args, .. } => {
                for a in args {
                    collect_expr_ids(a, out);
                }
            }
            ExprKind::InitializerList { values, .. } => {
                for v in values {
                    collect_expr_ids(v, out);
                }
            }
            _ => {}
        }
    }

    #[test]
    fn test_every_node_has_a_parent() {
        let (unit, parents) = parsed(
            "
            struct Counter {
                int n;
            public:
                Counter(int start) { n = start; }
                ~Counter() { }
                int bump() {
                    if (n > 10) { n = 0; } else { n = n + 1; }
                    while (n < 3) { n = n + 1; }
                    return n;
                }
                int doubled { get { return n + n; } };
            };
            int main() {
                Counter* c = new Counter(1);
                int total = c->bump();
                delete c;
                return total;
            }
            ",
        );
        let mut ids = Vec::new();
        for s in &unit.structs {
            ids.push(s.id);
            for m in &s.members {
                ids.push(m.id);
            }
            for m in &s.methods {
                ids.push(m.id);
                for p in &m.params {
                    ids.push(p.id);
                }
                if let Some(body) = m.body.borrow().as_ref() {
                    collect_ids(body, &mut ids);
                }
            }
            for c in &s.ctors {
                ids.push(c.id);
                for p in &c.params {
                    ids.push(p.id);
                }
                collect_ids(&c.body.borrow(), &mut ids);
            }
            for d in &s.dtors {
                ids.push(d.id);
                collect_ids(&d.body.borrow(), &mut ids);
            }
            for p in &s.properties {
                ids.push(p.id);
                for a in &p.accessors {
                    ids.push(a.id);
                    if let Some(body) = a.body.borrow().as_ref() {
                        collect_ids(body, &mut ids);
                    }
                }
            }
        }
        for f in &unit.functions {
            ids.push(f.id);
            if let Some(body) = f.body.borrow().as_ref() {
                collect_ids(body, &mut ids);
            }
        }

        assert!(ids.len() > 30, "walk visited {} nodes", ids.len());
        for id in ids {
            assert!(
                parents.parent(id).is_some(),
                "node {:?} has no parent",
                id
            );
        }
        // The unit itself is the root.
        assert!(parents.parent(unit.id).is_none());
    }

    #[test]
    fn test_assignment_targets_recorded() {
        let (unit, parents) = parsed(
            "
            struct P { public: int x; };
            int main(P* p) {
                p->x = 1;
                return p->x;
            }
            ",
        );
        let body = unit.functions[0].body.borrow();
        let stmts = match body.as_ref().map(|b| &b.kind) {
            Some(StmtKind::Block(stmts)) => stmts,
            other => panic!("expected block, got {:?}", other),
        };
        let assigned = match &stmts[0].kind {
            StmtKind::Expression(e) => match &e.kind {
                ExprKind::Assignment { left, .. } => left.id,
                other => panic!("expected assignment, got {:?}", other),
            },
            other => panic!("expected expression, got {:?}", other),
        };
        let read = match &stmts[1].kind {
            StmtKind::Return {
                value: Some(e), ..
            } => e.id,
            other => panic!("expected return, got {:?}", other),
        };
        assert!(parents.is_assign_target(assigned));
        assert!(!parents.is_assign_target(read));
    }

    #[test]
    fn test_fqn_forms() {
        assert_eq!(make_fqn(Some("ns"), "Point"), "ns::Point");
        assert_eq!(make_fqn(None, "Point"), "Point");
    }

    #[test]
    fn test_flatten_qualifier() {
        let (unit, _) = parsed(
            "
            enum Mode { ON };
            int main() { return app::Mode::ON; }
            ",
        );
        let body = unit.functions[0].body.borrow();
        let stmts = match body.as_ref().map(|b| &b.kind) {
            Some(StmtKind::Block(stmts)) => stmts,
            other => panic!("expected block, got {:?}", other),
        };
        match &stmts[0].kind {
            StmtKind::Return {
                value: Some(e), ..
            } => {
                assert_eq!(
                    e.flatten_qualifier().as_deref(),
                    Some("app::Mode::ON")
                );
            }
            other => panic!("expected return, got {:?}", other),
        }
    }
}
