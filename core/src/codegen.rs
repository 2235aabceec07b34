//! 32-bit x86 code generation (NASM syntax). This is a collaborator of the
//! front-end, not part of it: by the time it runs, analysis has succeeded
//! and every expression carries a resolved type annotation. An unresolved
//! annotation here is a compiler bug and panics.
//!
//! The model is deliberately simple: cdecl calls, all scalars in 4-byte
//! stack slots, results in `eax`, `ecx` as the scratch register. Methods
//! receive `this` as a leading hidden argument. Objects with virtual
//! declarations carry a vtable pointer at offset 0; property accessors are
//! compiled as functions, with auto-property storage in hidden trailing
//! slots.

use crate::analyze::Analyzer;
use crate::ast::{
    AccessorKind, Constructor, DeclInit, Expr, ExprKind, Function, Param,
    Program, Stmt, StmtKind, Struct,
};
use crate::consts::POINTER_SIZE;
use crate::layout::MemoryLayoutManager;
use crate::repository::TypeRepository;
use crate::resolve::Resolver;
use crate::token::TokenKind;
use crate::ty::Ty;
use crate::vtable::{VTableManager, DTOR_SLOT};
use log::debug;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

pub struct CodeGenerator<'a> {
    repo: Rc<TypeRepository>,
    resolver: Rc<Resolver>,
    analyzer: &'a Analyzer,
    layout: &'a MemoryLayoutManager,
    vtables: &'a VTableManager,
    text: String,
    strings: Vec<(String, String)>,
    label_count: u32,
    /// Name -> ebp-relative offset for the current function.
    slots: HashMap<String, i32>,
    /// `(owner FQN, property name)` while emitting an accessor body.
    current_prop: Option<(String, String)>,
}

pub fn generate(
    program: &Program,
    repo: Rc<TypeRepository>,
    resolver: Rc<Resolver>,
    analyzer: &Analyzer,
    layout: &MemoryLayoutManager,
    vtables: &VTableManager,
) -> String {
    CodeGenerator {
        repo,
        resolver,
        analyzer,
        layout,
        vtables,
        text: String::new(),
        strings: Vec::new(),
        label_count: 0,
        slots: HashMap::new(),
        current_prop: None,
    }
    .run(program)
}

fn mangle(fqn: &str) -> String {
    fqn.replace("::", "__").replace('$', "_")
}

impl<'a> CodeGenerator<'a> {
    fn run(mut self, program: &Program) -> String {
        let mut structs = self.repo.all_structs();
        structs.sort_by_key(|s| s.fqn());
        structs.retain(|s| !s.is_generic());

        for unit in &program.units {
            for f in &unit.functions {
                if f.body.borrow().is_none() {
                    continue;
                }
                let symbol = self.function_symbol(f);
                self.emit_function(&symbol, &f.params, None, f);
            }
        }
        for s in &structs {
            self.emit_struct(s);
        }

        let mut out = String::new();
        let _ = writeln!(out, "bits 32");
        let _ = writeln!(out, "global main");
        for import in &program.imports {
            let _ = writeln!(out, "; import {}", import);
        }
        let _ = writeln!(out, "extern malloc");
        let _ = writeln!(out, "extern free");
        for unit in &program.units {
            for f in &unit.functions {
                if f.body.borrow().is_none() {
                    let _ =
                        writeln!(out, "extern {}", self.function_symbol(f));
                }
            }
        }

        let _ = writeln!(out, "\nsection .data");
        for (label, value) in &self.strings {
            let mut bytes = String::new();
            for b in value.as_bytes() {
                let _ = write!(bytes, "{}, ", b);
            }
            let _ = writeln!(out, "{}: db {}0", label, bytes);
        }
        for s in &structs {
            let table = self.vtables.vtable(&s.fqn());
            if table.is_empty() {
                continue;
            }
            let entries: Vec<String> = table
                .iter()
                .map(|slot| {
                    if slot.name == DTOR_SLOT {
                        format!("{}__dtor", mangle(&slot.impl_fqn))
                    } else {
                        let owner = self
                            .repo
                            .find_struct(&slot.impl_fqn)
                            .expect("vtable references unknown struct");
                        let arity = owner
                            .methods_named(&slot.name)
                            .first()
                            .map_or(0, |m| m.params.len());
                        format!(
                            "{}__{}_{}",
                            mangle(&slot.impl_fqn),
                            slot.name,
                            arity
                        )
                    }
                })
                .collect();
            let _ = writeln!(
                out,
                "vt_{}: dd {}",
                mangle(&s.fqn()),
                entries.join(", ")
            );
        }

        let _ = writeln!(out, "\nsection .text");
        out.push_str(&self.text);
        debug!("generated {} bytes of assembly", out.len());
        out
    }

    // ===== Symbols =====

    fn function_symbol(&self, f: &Function) -> String {
        match f.owner_fqn() {
            Some(owner) => format!(
                "{}__{}_{}",
                mangle(&owner),
                f.name.text,
                f.params.len()
            ),
            None => {
                let fqn = crate::ast::make_fqn(
                    f.namespace.as_deref(),
                    &f.name.text,
                );
                // External declarations keep their C-ABI name; defined
                // functions carry an arity suffix so overloads get
                // distinct symbols.
                if fqn == crate::consts::ENTRY_SYMBOL
                    || f.body.borrow().is_none()
                {
                    mangle(&fqn)
                } else {
                    format!("{}_{}", mangle(&fqn), f.params.len())
                }
            }
        }
    }

    fn ctor_symbol(&self, owner_fqn: &str, arity: usize) -> String {
        format!("{}__ctor_{}", mangle(owner_fqn), arity)
    }

    fn dtor_symbol(&self, owner_fqn: &str) -> String {
        format!("{}__dtor", mangle(owner_fqn))
    }

    fn accessor_symbol(
        &self,
        owner_fqn: &str,
        kind: AccessorKind,
        prop: &str,
    ) -> String {
        let prefix = match kind {
            AccessorKind::Get => "get",
            AccessorKind::Set => "set",
        };
        format!("{}__{}_{}", mangle(owner_fqn), prefix, prop)
    }

    fn fresh_label(&mut self, stem: &str) -> String {
        self.label_count += 1;
        format!(".L{}_{}", stem, self.label_count)
    }

    // ===== Object model helpers =====

    /// Allocation size: the field layout plus one hidden slot per property
    /// in the chain (auto-property backing storage).
    fn alloc_size(&self, fqn: &str) -> u32 {
        let base = self.layout.struct_size(fqn).unwrap_or(0);
        base + POINTER_SIZE * self.chain_properties(fqn).len() as u32
    }

    /// Properties of the whole chain, bases first, with their owning FQN.
    fn chain_properties(&self, fqn: &str) -> Vec<(String, String)> {
        let chain = self.resolver.chain(fqn);
        let mut out = Vec::new();
        for level in chain.iter().rev() {
            for p in &level.properties {
                out.push((level.fqn(), p.name.text.clone()));
            }
        }
        out
    }

    fn property_slot(&self, fqn: &str, prop: &str) -> u32 {
        let base = self.layout.struct_size(fqn).unwrap_or(0);
        let index = self
            .chain_properties(fqn)
            .iter()
            .position(|(_, name)| name == prop)
            .unwrap_or(0);
        base + POINTER_SIZE * index as u32
    }

    fn expr_ty(&self, e: &Expr) -> Ty {
        match &e.kind {
            ExprKind::IntLit { .. } => Ty::int(),
            ExprKind::StrLit { .. } => Ty::char_().pointer(),
            _ => self
                .analyzer
                .expr_type(e.id)
                .cloned()
                .unwrap_or(Ty::int()),
        }
    }

    fn is_value_struct(&self, ty: &Ty) -> bool {
        !ty.is_pointer()
            && ty
                .name()
                .map_or(false, |n| self.repo.find_struct(n).is_some())
    }

    fn struct_of(&self, ty: &Ty) -> Option<Rc<Struct>> {
        ty.base_struct_name()
            .and_then(|n| self.repo.find_struct(n))
    }

    // ===== Emission =====

    fn line(&mut self, s: &str) {
        self.text.push_str("    ");
        self.text.push_str(s);
        self.text.push('\n');
    }

    fn label(&mut self, s: &str) {
        self.text.push_str(s);
        self.text.push_str(":\n");
    }

    fn emit_struct(&mut self, s: &Rc<Struct>) {
        let fqn = s.fqn();
        for m in &s.methods {
            if m.body.borrow().is_none() {
                continue;
            }
            let symbol = self.function_symbol(m);
            self.emit_function(&symbol, &m.params, Some(&fqn), m);
        }
        for c in &s.ctors {
            self.emit_ctor(s, c);
        }
        for d in &s.dtors {
            let symbol = self.dtor_symbol(&fqn);
            self.label(&symbol);
            self.slots.clear();
            self.slots.insert("this".to_string(), 8);
            self.prologue(0);
            self.reserve_locals(&d.body.borrow());
            let frame = self.frame_size();
            if frame > 0 {
                self.line(&format!("sub esp, {}", frame));
            }
            let body = d.body.borrow();
            self.stmt(&body, &fqn);
            drop(body);
            self.epilogue();
        }
        for p in &s.properties {
            for a in &p.accessors {
                self.emit_accessor(s, &p.name.text, a.kind, &a.body.borrow());
            }
        }
    }

    fn emit_function(
        &mut self,
        symbol: &str,
        params: &[Param],
        owner: Option<&str>,
        f: &Function,
    ) {
        self.label(symbol);
        self.slots.clear();
        let mut offset = 8;
        if owner.is_some() {
            self.slots.insert("this".to_string(), offset);
            offset += 4;
        }
        for p in params {
            self.slots.insert(p.name.text.clone(), offset);
            offset += 4;
        }

        let body = f.body.borrow();
        let body = match body.as_ref() {
            Some(body) => body,
            None => return,
        };
        self.prologue(0);
        self.reserve_locals(body);
        let frame = self.frame_size();
        if frame > 0 {
            self.line(&format!("sub esp, {}", frame));
        }
        self.stmt(body, owner.unwrap_or(""));
        self.epilogue();
    }

    fn emit_ctor(&mut self, s: &Rc<Struct>, c: &Constructor) {
        let fqn = s.fqn();
        let symbol = self.ctor_symbol(&fqn, c.params.len());
        self.label(&symbol);
        self.slots.clear();
        self.slots.insert("this".to_string(), 8);
        let mut offset = 12;
        for p in &c.params {
            self.slots.insert(p.name.text.clone(), offset);
            offset += 4;
        }
        self.prologue(0);
        let body = c.body.borrow();
        self.reserve_locals(&body);
        let frame = self.frame_size();
        if frame > 0 {
            self.line(&format!("sub esp, {}", frame));
        }

        if let Some(init) = &c.base_init {
            if let Some(base) = s.base_name.as_ref() {
                let base_fqn = self
                    .resolver
                    .chain(&fqn)
                    .get(1)
                    .map(|b| b.fqn())
                    .unwrap_or_else(|| base.text.clone());
                for arg in init.args.iter().rev() {
                    self.expr(arg, &fqn);
                    self.line("push eax");
                }
                self.line("mov eax, [ebp + 8]");
                self.line("push eax");
                let call = self.ctor_symbol(&base_fqn, init.args.len());
                self.line(&format!("call {}", call));
                self.line(&format!(
                    "add esp, {}",
                    4 * (init.args.len() + 1)
                ));
            }
        }

        self.stmt(&body, &fqn);
        drop(body);
        self.epilogue();
    }

    fn emit_accessor(
        &mut self,
        s: &Rc<Struct>,
        prop: &str,
        kind: AccessorKind,
        body: &Option<Stmt>,
    ) {
        let fqn = s.fqn();
        self.current_prop = Some((fqn.clone(), prop.to_string()));
        let symbol = self.accessor_symbol(&fqn, kind, prop);
        self.label(&symbol);
        self.slots.clear();
        self.slots.insert("this".to_string(), 8);
        if kind == AccessorKind::Set {
            self.slots.insert("value".to_string(), 12);
        }
        self.prologue(0);

        match body {
            Some(body) => {
                self.reserve_locals(body);
                let frame = self.frame_size();
                if frame > 0 {
                    self.line(&format!("sub esp, {}", frame));
                }
                self.stmt(body, &fqn);
            }
            None => {
                // Auto accessor: read or write the hidden backing slot.
                let slot = self.property_slot(&fqn, prop);
                self.line("mov ecx, [ebp + 8]");
                match kind {
                    AccessorKind::Get => {
                        self.line(&format!("mov eax, [ecx + {}]", slot))
                    }
                    AccessorKind::Set => {
                        self.line("mov eax, [ebp + 12]");
                        self.line(&format!("mov [ecx + {}], eax", slot));
                    }
                }
            }
        }
        self.epilogue();
        self.current_prop = None;
    }

    fn prologue(&mut self, frame: u32) {
        self.line("push ebp");
        self.line("mov ebp, esp");
        if frame > 0 {
            self.line(&format!("sub esp, {}", frame));
        }
    }

    fn epilogue(&mut self) {
        self.line("mov esp, ebp");
        self.line("pop ebp");
        self.line("ret");
    }

    /// Walks the body assigning an ebp-negative slot to every declaration.
    /// Shadowed names reuse their slot.
    fn reserve_locals(&mut self, body: &Stmt) {
        let mut next = 0i32;
        // Recompute from the existing param offsets downward.
        fn walk(
            gen: &mut CodeGenerator<'_>,
            stmt: &Stmt,
            next: &mut i32,
        ) {
            match &stmt.kind {
                StmtKind::Block(stmts) => {
                    for s in stmts {
                        walk(gen, s, next);
                    }
                }
                StmtKind::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    walk(gen, then_branch, next);
                    if let Some(e) = else_branch {
                        walk(gen, e, next);
                    }
                }
                StmtKind::While { body, .. } => walk(gen, body, next),
                StmtKind::Declaration { name, .. } => {
                    if gen.slots.contains_key(&name.text) {
                        return;
                    }
                    let ty = gen
                        .analyzer
                        .expr_type(stmt.id)
                        .cloned()
                        .unwrap_or(Ty::int());
                    let size = if gen.is_value_struct(&ty) {
                        let fqn = ty.name().unwrap_or_default();
                        (gen.alloc_size(fqn) + 3) & !3
                    } else {
                        4
                    };
                    *next -= size as i32;
                    gen.slots.insert(name.text.clone(), *next);
                }
                _ => {}
            }
        }
        walk(self, body, &mut next);
    }

    fn frame_size(&self) -> u32 {
        let min = self.slots.values().copied().min().unwrap_or(0);
        if min < 0 {
            (-min) as u32
        } else {
            0
        }
    }

    // ===== Statements =====

    fn stmt(&mut self, stmt: &Stmt, owner: &str) {
        match &stmt.kind {
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.stmt(s, owner);
                }
            }
            StmtKind::Return { value, .. } => {
                if let Some(e) = value {
                    self.expr(e, owner);
                }
                self.epilogue();
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let else_label = self.fresh_label("else");
                let end_label = self.fresh_label("endif");
                self.expr(cond, owner);
                self.line("cmp eax, 0");
                self.line(&format!("je {}", else_label));
                self.stmt(then_branch, owner);
                self.line(&format!("jmp {}", end_label));
                self.label(&else_label);
                if let Some(e) = else_branch {
                    self.stmt(e, owner);
                }
                self.label(&end_label);
            }
            StmtKind::While { cond, body } => {
                let top = self.fresh_label("loop");
                let end = self.fresh_label("endloop");
                self.label(&top);
                self.expr(cond, owner);
                self.line("cmp eax, 0");
                self.line(&format!("je {}", end));
                self.stmt(body, owner);
                self.line(&format!("jmp {}", top));
                self.label(&end);
            }
            StmtKind::Declaration { name, init, .. } => {
                self.declaration(stmt, name, init, owner)
            }
            StmtKind::Expression(e) => {
                self.expr(e, owner);
            }
            StmtKind::Delete { operand, .. } => {
                self.expr(operand, owner);
                self.line("push eax");
                let ty = self.expr_ty(operand);
                if let Some(target) = ty
                    .deref()
                    .and_then(|inner| self.struct_of(&inner))
                {
                    let dtor_owner = self
                        .resolver
                        .chain(&target.fqn())
                        .iter()
                        .find(|level| !level.dtors.is_empty())
                        .map(|level| level.fqn());
                    if let Some(dtor_owner) = dtor_owner {
                        self.line("mov eax, [esp]");
                        self.line("push eax");
                        if let Some(slot) = self
                            .vtables
                            .slot_index(&target.fqn(), DTOR_SLOT)
                        {
                            self.line("mov ecx, [eax]");
                            self.line(&format!(
                                "call [ecx + {}]",
                                4 * slot
                            ));
                        } else {
                            let call = self.dtor_symbol(&dtor_owner);
                            self.line(&format!("call {}", call));
                        }
                        self.line("add esp, 4");
                    }
                }
                self.line("call free");
                self.line("add esp, 4");
            }
        }
    }

    fn declaration(
        &mut self,
        stmt: &Stmt,
        name: &crate::token::Token,
        init: &Option<DeclInit>,
        owner: &str,
    ) {
        let slot = match self.slots.get(&name.text).copied() {
            Some(slot) => slot,
            None => return,
        };
        let declared = self
            .analyzer
            .expr_type(stmt.id)
            .cloned()
            .unwrap_or(Ty::int());

        match init {
            None => {
                if self.is_value_struct(&declared) {
                    self.init_value_struct(slot, &declared);
                }
            }
            Some(DeclInit::Expr(e)) => {
                if let ExprKind::InitializerList { values, .. } = &e.kind {
                    self.init_value_struct(slot, &declared);
                    let fqn =
                        declared.name().unwrap_or_default().to_string();
                    let members =
                        self.layout.all_members(&fqn).unwrap_or_default();
                    for (value, member) in values.iter().zip(members) {
                        self.expr(value, owner);
                        self.line(&format!(
                            "mov [ebp + {} + {}], eax",
                            slot, member.offset
                        ));
                    }
                } else {
                    self.expr(e, owner);
                    self.line(&format!("mov [ebp + {}], eax", slot));
                }
            }
            Some(DeclInit::Ctor(args)) => {
                if let Some(s) = self.struct_of(&declared) {
                    self.init_value_struct(slot, &declared);
                    if s.ctors.iter().any(|c| c.params.len() == args.len())
                    {
                        for arg in args.iter().rev() {
                            self.expr(arg, owner);
                            self.line("push eax");
                        }
                        self.line(&format!("lea eax, [ebp + {}]", slot));
                        self.line("push eax");
                        let call =
                            self.ctor_symbol(&s.fqn(), args.len());
                        self.line(&format!("call {}", call));
                        self.line(&format!(
                            "add esp, {}",
                            4 * (args.len() + 1)
                        ));
                    }
                } else if let Some(e) = args.first() {
                    self.expr(e, owner);
                    self.line(&format!("mov [ebp + {}], eax", slot));
                }
            }
        }
    }

    /// Stores the vtable pointer of a stack-allocated object, if any.
    fn init_value_struct(&mut self, slot: i32, declared: &Ty) {
        if let Some(fqn) = declared.name() {
            if self.vtables.has_vtable(fqn) {
                let fqn = fqn.to_string();
                self.line(&format!(
                    "mov dword [ebp + {}], vt_{}",
                    slot,
                    mangle(&fqn)
                ));
            }
        }
    }

    // ===== Expressions =====

    /// Evaluates an expression into `eax`.
    fn expr(&mut self, e: &Expr, owner: &str) {
        match &e.kind {
            ExprKind::IntLit { value, .. } => {
                self.line(&format!("mov eax, {}", value));
            }
            ExprKind::StrLit { label, token } => {
                self.strings
                    .push((label.clone(), token.text.clone()));
                self.line(&format!("mov eax, {}", label));
            }
            ExprKind::Variable { .. } => {
                if let Some(value) = self.analyzer.enum_const(e.id) {
                    self.line(&format!("mov eax, {}", value));
                    return;
                }
                let ty = self.expr_ty(e);
                if self.is_value_struct(&ty) {
                    self.address(e, owner);
                } else {
                    self.address(e, owner);
                    self.load(&ty);
                }
            }
            ExprKind::Unary { op, right } => match op.kind {
                TokenKind::Minus => {
                    self.expr(right, owner);
                    self.line("neg eax");
                }
                TokenKind::Plus => self.expr(right, owner),
                TokenKind::Amp => self.address(right, owner),
                TokenKind::Star => {
                    self.expr(right, owner);
                    let inner = self
                        .expr_ty(right)
                        .deref()
                        .unwrap_or(Ty::int());
                    self.load(&inner);
                }
                _ => panic!("codegen: unexpected unary operator"),
            },
            ExprKind::Binary { left, op, right } => {
                if let Some(target) =
                    self.analyzer.call_target(e.id).cloned()
                {
                    // Operator overload: a method call in disguise.
                    self.expr(right, owner);
                    self.line("push eax");
                    self.receiver(left, owner);
                    self.line("push eax");
                    let call = self.function_symbol(&target.func);
                    self.line(&format!("call {}", call));
                    self.line("add esp, 8");
                    return;
                }
                self.expr(left, owner);
                self.line("push eax");
                self.expr(right, owner);
                self.line("mov ecx, eax");
                self.line("pop eax");
                match op.kind {
                    TokenKind::Plus => self.line("add eax, ecx"),
                    TokenKind::Minus => self.line("sub eax, ecx"),
                    TokenKind::Star => self.line("imul eax, ecx"),
                    TokenKind::Slash => {
                        self.line("cdq");
                        self.line("idiv ecx");
                    }
                    TokenKind::EqEq => self.compare("sete"),
                    TokenKind::NotEq => self.compare("setne"),
                    TokenKind::Lt => self.compare("setl"),
                    TokenKind::Gt => self.compare("setg"),
                    _ => panic!("codegen: unexpected binary operator"),
                }
            }
            ExprKind::Assignment { left, right, .. } => {
                if let Some((target, prop_owner)) =
                    self.property_target(left)
                {
                    // Property store compiles to the set accessor.
                    self.expr(right, owner);
                    self.line("push eax");
                    if let ExprKind::MemberAccess { left: recv, .. } =
                        &left.kind
                    {
                        self.receiver(recv, owner);
                        self.line("push eax");
                    }
                    let call = self.accessor_symbol(
                        &prop_owner,
                        AccessorKind::Set,
                        &target,
                    );
                    self.line(&format!("call {}", call));
                    self.line("add esp, 8");
                    return;
                }
                self.expr(right, owner);
                self.line("push eax");
                self.address(left, owner);
                self.line("pop ecx");
                let ty = self.expr_ty(left);
                if ty.name() == Some("char") {
                    self.line("mov [eax], cl");
                } else {
                    self.line("mov [eax], ecx");
                }
                self.line("mov eax, ecx");
            }
            ExprKind::MemberAccess { left, .. } => {
                if let Some((prop, prop_owner)) = self.property_target(e) {
                    self.receiver(left, owner);
                    self.line("push eax");
                    let call = self.accessor_symbol(
                        &prop_owner,
                        AccessorKind::Get,
                        &prop,
                    );
                    self.line(&format!("call {}", call));
                    self.line("add esp, 4");
                    return;
                }
                let ty = self.expr_ty(e);
                self.address(e, owner);
                if !self.is_value_struct(&ty) {
                    self.load(&ty);
                }
            }
            ExprKind::QualifiedAccess { member, .. } => {
                if let Some(value) = self.analyzer.enum_const(e.id) {
                    self.line(&format!("mov eax, {}", value));
                } else {
                    // Static function reference; degrade to its address.
                    self.line(&format!("mov eax, {}", member.text));
                }
            }
            ExprKind::Call { callee, args } => self.call(e, callee, args, owner),
            ExprKind::New { args, .. } => self.new_expr(e, args, owner),
            ExprKind::Sizeof { .. } => {
                let target = self
                    .analyzer
                    .sizeof_target(e.id)
                    .cloned()
                    .unwrap_or(Ty::int());
                let size = if self.is_value_struct(&target) {
                    self.alloc_size(target.name().unwrap_or_default())
                } else {
                    self.layout.size_of(&target).unwrap_or(POINTER_SIZE)
                };
                self.line(&format!("mov eax, {}", size));
            }
            ExprKind::InitializerList { .. } => {
                panic!("codegen: initializer list outside a declaration")
            }
        }
    }

    fn compare(&mut self, set: &str) {
        self.line("cmp eax, ecx");
        self.line(&format!("{} al", set));
        self.line("movzx eax, al");
    }

    fn load(&mut self, ty: &Ty) {
        if ty.name() == Some("char") {
            self.line("movzx eax, byte [eax]");
        } else {
            self.line("mov eax, [eax]");
        }
    }

    /// Is this expression a property access? Returns the property name and
    /// the FQN of the level that declares it.
    fn property_target(&self, e: &Expr) -> Option<(String, String)> {
        if let ExprKind::MemberAccess { left, member, .. } = &e.kind {
            let recv = self.expr_ty(left);
            let base = recv.base_struct_name()?;
            for level in self.resolver.chain(base) {
                if level.find_property(&member.text).is_some() {
                    return Some((member.text.clone(), level.fqn()));
                }
                if level.find_member(&member.text).is_some() {
                    return None;
                }
            }
        }
        None
    }

    /// Pushes nothing; leaves the receiver value (an object pointer) in
    /// `eax`. Value structs are passed by address.
    fn receiver(&mut self, recv: &Expr, owner: &str) {
        let ty = self.expr_ty(recv);
        if self.is_value_struct(&ty) {
            self.address(recv, owner);
        } else {
            self.expr(recv, owner);
        }
    }

    /// Evaluates the address of an l-value into `eax`.
    fn address(&mut self, e: &Expr, owner: &str) {
        match &e.kind {
            ExprKind::Variable { name } => {
                if let Some(slot) = self.slots.get(&name.text).copied() {
                    self.line(&format!("lea eax, [ebp + {}]", slot));
                    return;
                }
                if name.text == "field" {
                    let (fqn, prop) = self
                        .current_prop
                        .clone()
                        .expect("codegen: 'field' outside an accessor");
                    let slot = self.property_slot(&fqn, &prop);
                    self.line("mov eax, [ebp + 8]");
                    self.line(&format!("add eax, {}", slot));
                    return;
                }
                // Implicit this->member
                let member = self
                    .resolver
                    .chain(owner)
                    .iter()
                    .find_map(|level| {
                        self.layout
                            .member_info(&level.fqn(), &name.text)
                            .ok()
                            .flatten()
                    })
                    .or_else(|| {
                        self.layout
                            .member_info(owner, &name.text)
                            .ok()
                            .flatten()
                    });
                match member {
                    Some((offset, _)) => {
                        self.line("mov eax, [ebp + 8]");
                        self.line(&format!("add eax, {}", offset));
                    }
                    None => panic!(
                        "codegen: unresolved variable '{}'",
                        name.text
                    ),
                }
            }
            ExprKind::Unary { op, right }
                if op.kind == TokenKind::Star =>
            {
                self.expr(right, owner);
            }
            ExprKind::MemberAccess { left, member, .. } => {
                let recv = self.expr_ty(left);
                let base = recv
                    .base_struct_name()
                    .expect("codegen: member access on non-struct")
                    .to_string();
                self.receiver(left, owner);
                let offset = self
                    .layout
                    .member_info(&base, &member.text)
                    .ok()
                    .flatten()
                    .map(|(offset, _)| offset)
                    .expect("codegen: unknown member offset");
                self.line(&format!("add eax, {}", offset));
            }
            _ => panic!("codegen: expression is not an l-value"),
        }
    }

    fn call(
        &mut self,
        e: &Expr,
        callee: &Expr,
        args: &[Expr],
        owner: &str,
    ) {
        let target = self
            .analyzer
            .call_target(e.id)
            .cloned()
            .expect("codegen: unresolved call target");

        for arg in args.iter().rev() {
            self.expr(arg, owner);
            self.line("push eax");
        }

        let mut pushed = args.len();
        if target.func.is_method() {
            match &callee.kind {
                ExprKind::MemberAccess { left, .. } => {
                    self.receiver(left, owner);
                    self.line("push eax");
                    pushed += 1;
                }
                _ => {
                    // Implicit this (a bare method name inside another
                    // method) or a qualified static call.
                    if self.slots.contains_key("this") {
                        self.line("mov eax, [ebp + 8]");
                        self.line("push eax");
                        pushed += 1;
                    }
                }
            }
        }

        let virtual_dispatch = (target.func.is_virtual
            || target.func.is_override)
            && matches!(callee.kind, ExprKind::MemberAccess { .. });
        if virtual_dispatch {
            let recv_fqn = match &callee.kind {
                ExprKind::MemberAccess { left, .. } => self
                    .expr_ty(left)
                    .base_struct_name()
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            };
            let slot = self
                .vtables
                .slot_index(&recv_fqn, &target.func.name.text)
                .expect("codegen: virtual method without a vtable slot");
            self.line("mov eax, [esp]");
            self.line("mov ecx, [eax]");
            self.line(&format!("call [ecx + {}]", 4 * slot));
        } else {
            let call = self.function_symbol(&target.func);
            self.line(&format!("call {}", call));
        }
        if pushed > 0 {
            self.line(&format!("add esp, {}", 4 * pushed));
        }
    }

    fn new_expr(&mut self, e: &Expr, args: &[Expr], owner: &str) {
        let ty = self.expr_ty(e);
        let fqn = ty
            .deref()
            .and_then(|inner| inner.name().map(String::from))
            .expect("codegen: new expression without a struct type");
        let size = self.alloc_size(&fqn);
        self.line(&format!("push {}", size));
        self.line("call malloc");
        self.line("add esp, 4");
        if self.vtables.has_vtable(&fqn) {
            self.line(&format!(
                "mov dword [eax], vt_{}",
                mangle(&fqn)
            ));
        }
        if let Some(s) = self.repo.find_struct(&fqn) {
            if s.ctors.iter().any(|c| c.params.len() == args.len()) {
                self.line("push eax");
                for arg in args.iter().rev() {
                    self.expr(arg, owner);
                    self.line("push eax");
                }
                self.line(&format!(
                    "mov eax, [esp + {}]",
                    4 * args.len()
                ));
                self.line("push eax");
                let call = self.ctor_symbol(&fqn, args.len());
                self.line(&format!("call {}", call));
                self.line(&format!("add esp, {}", 4 * (args.len() + 1)));
                self.line("pop eax");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::IdGen;
    use crate::error::Diagnostics;
    use crate::functions::FunctionResolver;

    fn generate_source(source: &str) -> String {
        let diags = Rc::new(Diagnostics::new());
        let ids = Rc::new(IdGen::new());
        let tokens = crate::lexer::tokenize(source);
        let unit = Rc::new(crate::parse::parse_unit(
            "test.ct", &tokens, &diags, &ids,
        ));
        let mut program = Program::default();
        program.units.push(unit);
        let repo = Rc::new(TypeRepository::new());
        for unit in &program.units {
            repo.register_unit(unit, &diags);
        }
        let resolver =
            Rc::new(Resolver::new(Rc::clone(&repo), Rc::clone(&ids)));
        let functions = Rc::new(FunctionResolver::new(
            Rc::clone(&repo),
            Rc::clone(&resolver),
            &program,
        ));
        let mut analyzer = Analyzer::new(
            Rc::clone(&repo),
            Rc::clone(&resolver),
            functions,
            Rc::clone(&diags),
        );
        analyzer.analyze_program(&program);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        let layout = MemoryLayoutManager::new(
            Rc::clone(&repo),
            Rc::clone(&resolver),
        );
        let vtables = VTableManager::new(Rc::clone(&resolver));
        generate(&program, repo, resolver, &analyzer, &layout, &vtables)
    }

    #[test]
    fn test_minimal_function_shape() {
        let asm = generate_source("int main() { return 7; }");
        assert!(asm.contains("bits 32"));
        assert!(asm.contains("global main"));
        assert!(asm.contains("main:"));
        assert!(asm.contains("mov eax, 7"));
        assert!(asm.contains("ret"));
    }

    #[test]
    fn test_extern_declarations() {
        let asm = generate_source(
            "int malloc(int size);\nint main() { return 0; }",
        );
        assert!(asm.contains("extern malloc"));
    }

    #[test]
    fn test_string_literal_lands_in_data() {
        let asm = generate_source(
            "int puts(char* s);\nint main() { puts(\"hi\"); return 0; }",
        );
        assert!(asm.contains("section .data"));
        assert!(asm.contains("104, 105, 0"));
    }

    #[test]
    fn test_vtable_emitted_for_virtual_struct() {
        let asm = generate_source(
            "
            struct Shape {
            public:
                virtual int area() { return 0; }
            };
            int main() { return 0; }
            ",
        );
        assert!(asm.contains("vt_Shape: dd Shape__area_0"));
    }

    #[test]
    fn test_member_call_pushes_this() {
        let asm = generate_source(
            "
            struct Counter {
                int n;
            public:
                int bump() { n = n + 1; return n; }
            };
            int main() {
                Counter* c = new Counter();
                return c->bump();
            }
            ",
        );
        assert!(asm.contains("call Counter__bump_0"));
        assert!(asm.contains("call malloc"));
    }
}
