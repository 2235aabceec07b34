//! Recursive-descent parser for CTilde, with operator precedence climbing
//! for expressions and panic-mode error recovery.
//!
//! All parse errors are recorded into the shared diagnostic list. A failed
//! `eat` synthesizes a zero-width token and continues; a failed `expect`
//! aborts the enclosing production, and the nearest recovery point
//! synchronizes by skipping to the next `;` or `}`. Parsing therefore always
//! terminates and always produces a [CompilationUnit].

use crate::ast::{
    Accessor, AccessorKind, Access, BaseInit, CompilationUnit, Constructor,
    DeclInit, Destructor, Enum, EnumMember, Expr, ExprKind, Function, IdGen,
    MemberVariable, Param, Property, Stmt, StmtKind, Struct, TypeNode, Using,
};
use crate::error::Diagnostics;
use crate::token::{Token, TokenKind};
use log::debug;
use std::cell::RefCell;
use std::rc::Rc;

/// Marker for an abandoned production. The diagnostic has already been
/// recorded by the time this is raised.
#[derive(Debug)]
struct ParseAbort;

type ParseResult<T> = Result<T, ParseAbort>;

/// Parses one token stream into a compilation unit. Total: any input
/// produces a unit and a finite diagnostic list.
pub fn parse_unit(
    path: &str,
    tokens: &[Token],
    diags: &Diagnostics,
    ids: &IdGen,
) -> CompilationUnit {
    Parser::new(path, tokens, diags, ids).unit()
}

struct Parser<'a> {
    path: String,
    tokens: &'a [Token],
    pos: usize,
    diags: &'a Diagnostics,
    ids: &'a IdGen,
    /// File-scoped namespace, set by a `namespace N;` directive and applied
    /// to every definition parsed after it.
    namespace: Option<String>,
}

impl<'a> Parser<'a> {
    fn new(
        path: &str,
        tokens: &'a [Token],
        diags: &'a Diagnostics,
        ids: &'a IdGen,
    ) -> Self {
        debug_assert!(
            tokens.last().map_or(false, |t| t.kind == TokenKind::Eof),
            "token stream must end with EOF"
        );
        Self {
            path: path.to_string(),
            tokens,
            pos: 0,
            diags,
            ids,
            namespace: None,
        }
    }

    // ===== Cursor primitives =====

    fn peek(&self) -> &Token {
        let idx = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx]
    }

    fn kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn nth_kind(&self, n: usize) -> TokenKind {
        let idx = (self.pos + n).min(self.tokens.len().saturating_sub(1));
        self.tokens[idx].kind
    }

    fn nth_text(&self, n: usize) -> &str {
        let idx = (self.pos + n).min(self.tokens.len().saturating_sub(1));
        &self.tokens[idx].text
    }

    fn at_eof(&self) -> bool {
        self.kind() == TokenKind::Eof
    }

    /// Consumes and returns the current token. Never advances past EOF.
    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.kind() == kind
    }

    fn accept(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    /// Consumes the expected token, or records a diagnostic and returns a
    /// zero-width synthetic token without advancing. The caller continues.
    fn eat(&mut self, kind: TokenKind) -> Token {
        if self.check(kind) {
            return self.advance();
        }
        let found = self.peek().clone();
        self.diags.error_at(
            &self.path,
            &found,
            format!("Expected {} but found {}", kind.describe(), found),
        );
        Token::synthetic(kind, found.line, found.column)
    }

    /// Consumes the expected token, or records a diagnostic and aborts the
    /// enclosing production.
    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        let found = self.peek().clone();
        Err(self.error_at(
            &found,
            format!("Expected {} but found {}", kind.describe(), found),
        ))
    }

    fn error_at(&mut self, token: &Token, message: String) -> ParseAbort {
        self.diags.error_at(&self.path, token, message);
        ParseAbort
    }

    fn error_here(&mut self, message: String) -> ParseAbort {
        let token = self.peek().clone();
        self.error_at(&token, message)
    }

    /// Panic-mode synchronization for top-level declarations: discards
    /// tokens up to and including the next `;` or `}`.
    fn sync_top(&mut self) {
        loop {
            match self.kind() {
                TokenKind::Eof => return,
                TokenKind::Semi | TokenKind::RBrace => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Synchronization inside a block or struct body: discards up to and
    /// including the next `;`, but leaves a `}` for the enclosing
    /// production to close on.
    fn sync_inner(&mut self) {
        loop {
            match self.kind() {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Semi => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Runs a speculative parse. On failure the position is rewound and any
    /// diagnostics recorded during the attempt are discarded.
    fn speculate<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> ParseResult<T>,
    ) -> Option<T> {
        let pos = self.pos;
        let mark = self.diags.len();
        match f(self) {
            Ok(value) => Some(value),
            Err(ParseAbort) => {
                self.pos = pos;
                self.diags.truncate(mark);
                None
            }
        }
    }

    // ===== Node construction =====

    fn expr(&self, kind: ExprKind) -> Expr {
        Expr {
            id: self.ids.next(),
            kind,
        }
    }

    fn stmt(&self, kind: StmtKind) -> Stmt {
        Stmt {
            id: self.ids.next(),
            kind,
        }
    }

    // ===== Top level =====

    fn unit(mut self) -> CompilationUnit {
        let id = self.ids.next();
        let mut usings = Vec::new();
        let mut imports = Vec::new();
        let mut structs = Vec::new();
        let mut functions = Vec::new();
        let mut enums = Vec::new();

        while !self.at_eof() {
            let before = self.pos;
            let result = match self.kind() {
                TokenKind::Hash => self.directive(&mut imports),
                TokenKind::Using => self.using_directive(&mut usings),
                TokenKind::Namespace => self.namespace_directive(),
                TokenKind::Struct if self.is_struct_definition() => {
                    self.struct_def().map(|s| structs.push(Rc::new(s)))
                }
                TokenKind::Enum => {
                    self.enum_def().map(|e| enums.push(Rc::new(e)))
                }
                _ => self
                    .function(None, Access::Public, false, false)
                    .map(|f| functions.push(Rc::new(f))),
            };
            if result.is_err() {
                self.sync_top();
            }
            if self.pos == before && !self.at_eof() {
                // Whatever it was, it neither parsed nor synchronized.
                self.advance();
            }
        }

        debug!(
            "parsed {}: {} structs, {} functions, {} enums",
            self.path,
            structs.len(),
            functions.len(),
            enums.len()
        );
        CompilationUnit {
            id,
            path: self.path,
            usings,
            imports,
            structs,
            functions,
            enums,
        }
    }

    /// `struct` opens a definition only when followed by a name and a body,
    /// generic parameter list or base clause; otherwise it prefixes a type.
    fn is_struct_definition(&self) -> bool {
        self.nth_kind(1) == TokenKind::Ident
            && matches!(
                self.nth_kind(2),
                TokenKind::LBrace | TokenKind::Lt | TokenKind::Colon
            )
    }

    fn directive(&mut self, imports: &mut Vec<String>) -> ParseResult<()> {
        self.eat(TokenKind::Hash);
        let name = self.expect(TokenKind::Ident)?;
        match name.text.as_str() {
            "import" => {
                let lib = self.expect(TokenKind::StrLit)?;
                imports.push(lib.text);
            }
            "include" => {
                // The preprocessor has already followed the edge; the token
                // only needs to be consumed here.
                self.expect(TokenKind::StrLit)?;
            }
            _ => {
                return Err(self.error_at(
                    &name,
                    format!("Unknown directive '#{}'", name.text),
                ));
            }
        }
        Ok(())
    }

    fn using_directive(&mut self, usings: &mut Vec<Using>) -> ParseResult<()> {
        self.eat(TokenKind::Using);
        let first = self.expect(TokenKind::Ident)?;
        let (ns, alias) = if self.accept(TokenKind::Assign).is_some() {
            let target = self.expect(TokenKind::Ident)?;
            (target.text, Some(first.text.clone()))
        } else {
            (first.text.clone(), None)
        };
        self.eat(TokenKind::Semi);
        usings.push(Using {
            id: self.ids.next(),
            ns,
            alias,
            token: first,
        });
        Ok(())
    }

    fn namespace_directive(&mut self) -> ParseResult<()> {
        self.eat(TokenKind::Namespace);
        let name = self.expect(TokenKind::Ident)?;
        self.eat(TokenKind::Semi);
        self.namespace = Some(name.text);
        Ok(())
    }

    // ===== Definitions =====

    fn struct_def(&mut self) -> ParseResult<Struct> {
        let id = self.ids.next();
        self.eat(TokenKind::Struct);
        let name = self.expect(TokenKind::Ident)?;

        let mut generic_params = Vec::new();
        if self.accept(TokenKind::Lt).is_some() {
            loop {
                generic_params.push(self.expect(TokenKind::Ident)?);
                if self.accept(TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.eat(TokenKind::Gt);
        }

        let base_name = if self.accept(TokenKind::Colon).is_some() {
            Some(self.expect(TokenKind::Ident)?)
        } else {
            None
        };

        self.eat(TokenKind::LBrace);
        let mut s = Struct {
            id,
            name,
            generic_params,
            base_name,
            namespace: self.namespace.clone(),
            members: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            ctors: Vec::new(),
            dtors: Vec::new(),
        };

        let mut access = Access::Private;
        while !self.check(TokenKind::RBrace) && !self.at_eof() {
            let before = self.pos;
            if self.member(&mut s, &mut access).is_err() {
                self.sync_inner();
            }
            if self.pos == before && !self.at_eof() {
                self.advance();
            }
        }
        self.eat(TokenKind::RBrace);
        self.eat(TokenKind::Semi);
        Ok(s)
    }

    fn member(
        &mut self,
        s: &mut Struct,
        access: &mut Access,
    ) -> ParseResult<()> {
        match self.kind() {
            TokenKind::Public => {
                self.advance();
                self.eat(TokenKind::Colon);
                *access = Access::Public;
                Ok(())
            }
            TokenKind::Private => {
                self.advance();
                self.eat(TokenKind::Colon);
                *access = Access::Private;
                Ok(())
            }
            TokenKind::Tilde => {
                let dtor = self.destructor(&s.name.text, *access, false)?;
                s.dtors.push(dtor);
                Ok(())
            }
            TokenKind::Virtual if self.nth_kind(1) == TokenKind::Tilde => {
                self.advance();
                let dtor = self.destructor(&s.name.text, *access, true)?;
                s.dtors.push(dtor);
                Ok(())
            }
            TokenKind::Ident
                if self.nth_text(0) == s.name.text
                    && self.nth_kind(1) == TokenKind::LParen =>
            {
                let ctor = self.constructor(&s.name.text, *access)?;
                s.ctors.push(ctor);
                Ok(())
            }
            _ => self.field_method_or_property(s, *access),
        }
    }

    fn field_method_or_property(
        &mut self,
        s: &mut Struct,
        access: Access,
    ) -> ParseResult<()> {
        let mut is_virtual = false;
        let mut is_override = false;
        let mut is_const = false;
        loop {
            match self.kind() {
                TokenKind::Virtual => {
                    is_virtual = true;
                    self.advance();
                }
                TokenKind::Override => {
                    is_override = true;
                    self.advance();
                }
                TokenKind::Const => {
                    is_const = true;
                    self.advance();
                }
                _ => break,
            }
        }

        let ty = self.parse_type()?;

        // `operator` methods get a synthesized name from the operator token.
        let name = if self.check(TokenKind::Operator) {
            self.advance();
            let op = self.advance();
            let text = match op.kind.operator_name() {
                Some(fragment) => format!("operator_{}", fragment),
                None => {
                    self.diags.error_at(
                        &self.path,
                        &op,
                        format!("Invalid overloaded operator {}", op),
                    );
                    "operator_Invalid".to_string()
                }
            };
            Token::new(TokenKind::Ident, text, op.line, op.column)
        } else {
            self.expect(TokenKind::Ident)?
        };

        match self.kind() {
            TokenKind::LParen => {
                let mut f = self.function_rest(ty, name)?;
                f.owner_struct = Some(s.name.text.clone());
                f.access = access;
                f.is_virtual = is_virtual;
                f.is_override = is_override;
                s.methods.push(Rc::new(f));
            }
            TokenKind::LBrace => {
                let property = self.property(ty, name, access)?;
                s.properties.push(property);
            }
            _ => {
                self.eat(TokenKind::Semi);
                s.members.push(MemberVariable {
                    id: self.ids.next(),
                    is_const,
                    ty,
                    name,
                    access,
                });
            }
        }
        Ok(())
    }

    fn property(
        &mut self,
        ty: TypeNode,
        name: Token,
        access: Access,
    ) -> ParseResult<Property> {
        let id = self.ids.next();
        self.eat(TokenKind::LBrace);
        let mut accessors: Vec<Accessor> = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.at_eof() {
            let keyword = self.expect(TokenKind::Ident)?;
            let kind = match keyword.text.as_str() {
                "get" => AccessorKind::Get,
                "set" => AccessorKind::Set,
                _ => {
                    return Err(self.error_at(
                        &keyword,
                        format!(
                            "Expected 'get' or 'set' but found {}",
                            keyword
                        ),
                    ));
                }
            };
            if accessors.iter().any(|a| a.kind == kind) {
                self.diags.error_at(
                    &self.path,
                    &keyword,
                    format!("Duplicate '{}' accessor", keyword.text),
                );
            }
            // Auto form is `get;`; the full form carries a block body.
            let body = if self.check(TokenKind::LBrace) {
                Some(self.block()?)
            } else {
                self.eat(TokenKind::Semi);
                None
            };
            accessors.push(Accessor {
                id: self.ids.next(),
                kind,
                keyword,
                body: RefCell::new(body),
            });
        }
        self.eat(TokenKind::RBrace);
        self.eat(TokenKind::Semi);
        Ok(Property {
            id,
            ty,
            name,
            access,
            accessors,
        })
    }

    fn constructor(
        &mut self,
        owner: &str,
        access: Access,
    ) -> ParseResult<Constructor> {
        let id = self.ids.next();
        self.advance(); // the struct-name token
        let params = self.param_list()?;
        let base_init = if self.accept(TokenKind::Colon).is_some() {
            let name = self.expect(TokenKind::Ident)?;
            self.eat(TokenKind::LParen);
            let args = self.expr_list(TokenKind::RParen)?;
            self.eat(TokenKind::RParen);
            Some(BaseInit { name, args })
        } else {
            None
        };
        let body = self.block()?;
        Ok(Constructor {
            id,
            owner_struct: owner.to_string(),
            namespace: self.namespace.clone(),
            access,
            params,
            base_init,
            body: RefCell::new(body),
        })
    }

    fn destructor(
        &mut self,
        owner: &str,
        access: Access,
        is_virtual: bool,
    ) -> ParseResult<Destructor> {
        let id = self.ids.next();
        self.eat(TokenKind::Tilde);
        let name = self.expect(TokenKind::Ident)?;
        if name.text != owner {
            self.diags.error_at(
                &self.path,
                &name,
                format!(
                    "Destructor name '{}' does not match struct '{}'",
                    name.text, owner
                ),
            );
        }
        self.eat(TokenKind::LParen);
        self.eat(TokenKind::RParen);
        let body = self.block()?;
        Ok(Destructor {
            id,
            owner_struct: owner.to_string(),
            namespace: self.namespace.clone(),
            access,
            is_virtual,
            body: RefCell::new(body),
        })
    }

    fn function(
        &mut self,
        owner: Option<String>,
        access: Access,
        is_virtual: bool,
        is_override: bool,
    ) -> ParseResult<Function> {
        let ty = self.parse_type()?;
        let name = self.expect(TokenKind::Ident)?;
        let mut f = self.function_rest(ty, name)?;
        f.owner_struct = owner;
        f.access = access;
        f.is_virtual = is_virtual;
        f.is_override = is_override;
        Ok(f)
    }

    /// Parameters and body, shared by free functions and methods.
    fn function_rest(
        &mut self,
        return_type: TypeNode,
        name: Token,
    ) -> ParseResult<Function> {
        let id = self.ids.next();
        let params = self.param_list()?;
        let body = if self.check(TokenKind::LBrace) {
            Some(self.block()?)
        } else {
            self.eat(TokenKind::Semi);
            None
        };
        Ok(Function {
            id,
            return_type,
            name,
            params,
            body: RefCell::new(body),
            owner_struct: None,
            namespace: self.namespace.clone(),
            access: Access::Public,
            is_virtual: false,
            is_override: false,
        })
    }

    fn param_list(&mut self) -> ParseResult<Vec<Param>> {
        self.eat(TokenKind::LParen);
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) && !self.at_eof() {
            loop {
                let ty = self.parse_type()?;
                let name = self.expect(TokenKind::Ident)?;
                params.push(Param {
                    id: self.ids.next(),
                    ty,
                    name,
                });
                if self.accept(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.eat(TokenKind::RParen);
        Ok(params)
    }

    fn enum_def(&mut self) -> ParseResult<Enum> {
        let id = self.ids.next();
        self.eat(TokenKind::Enum);
        let name = self.expect(TokenKind::Ident)?;
        self.eat(TokenKind::LBrace);
        let mut members = Vec::new();
        let mut next_value: i32 = 0;
        while !self.check(TokenKind::RBrace) && !self.at_eof() {
            let member_name = self.expect(TokenKind::Ident)?;
            let value = if self.accept(TokenKind::Assign).is_some() {
                let negative = self.accept(TokenKind::Minus).is_some();
                let literal = self.expect(TokenKind::IntLit)?;
                let magnitude = self.int_value(&literal);
                if negative {
                    -magnitude
                } else {
                    magnitude
                }
            } else {
                next_value
            };
            next_value = value.wrapping_add(1);
            members.push(EnumMember {
                name: member_name,
                value,
            });
            if self.accept(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.eat(TokenKind::RBrace);
        self.eat(TokenKind::Semi);
        Ok(Enum {
            id,
            name,
            namespace: self.namespace.clone(),
            members,
        })
    }

    // ===== Types =====

    /// `type := ('struct'? IDENT ('::' IDENT)? | 'int'|'char'|'void')
    /// ('<' typeList '>')? '*'*`
    ///
    /// `<` opens a type-argument list only here; in expression context it is
    /// always relational.
    fn parse_type(&mut self) -> ParseResult<TypeNode> {
        self.accept(TokenKind::Struct);
        let mut base = match self.kind() {
            TokenKind::Int | TokenKind::Char | TokenKind::Void => {
                self.advance()
            }
            TokenKind::Ident => self.advance(),
            _ => {
                return Err(self.error_here(format!(
                    "Expected type but found {}",
                    self.peek()
                )));
            }
        };

        // One level of qualification is folded into the name token; the
        // resolver splits it back out.
        if base.kind == TokenKind::Ident
            && self.check(TokenKind::ColonColon)
            && self.nth_kind(1) == TokenKind::Ident
        {
            self.advance();
            let second = self.advance();
            base = Token::new(
                TokenKind::Ident,
                format!("{}::{}", base.text, second.text),
                base.line,
                base.column,
            );
        }

        let mut node = if base.kind == TokenKind::Ident
            && self.accept(TokenKind::Lt).is_some()
        {
            let mut args = Vec::new();
            loop {
                args.push(self.parse_type()?);
                if self.accept(TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.expect(TokenKind::Gt)?;
            TypeNode::Generic(base, args)
        } else {
            TypeNode::Simple(base)
        };

        while self.accept(TokenKind::Star).is_some() {
            node = TypeNode::Pointer(Box::new(node));
        }
        Ok(node)
    }

    // ===== Statements =====

    fn block(&mut self) -> ParseResult<Stmt> {
        let id = self.ids.next();
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.at_eof() {
            let before = self.pos;
            match self.statement() {
                Ok(s) => stmts.push(s),
                Err(ParseAbort) => self.sync_inner(),
            }
            if self.pos == before && !self.at_eof() {
                self.advance();
            }
        }
        self.eat(TokenKind::RBrace);
        Ok(Stmt {
            id,
            kind: StmtKind::Block(stmts),
        })
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        match self.kind() {
            TokenKind::LBrace => self.block(),
            TokenKind::Return => {
                let keyword = self.advance();
                let value = if self.check(TokenKind::Semi) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.eat(TokenKind::Semi);
                Ok(self.stmt(StmtKind::Return { keyword, value }))
            }
            TokenKind::If => {
                self.advance();
                self.eat(TokenKind::LParen);
                let cond = self.expression()?;
                self.eat(TokenKind::RParen);
                let then_branch = Box::new(self.statement()?);
                let else_branch = if self.accept(TokenKind::Else).is_some() {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(self.stmt(StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }))
            }
            TokenKind::While => {
                self.advance();
                self.eat(TokenKind::LParen);
                let cond = self.expression()?;
                self.eat(TokenKind::RParen);
                let body = Box::new(self.statement()?);
                Ok(self.stmt(StmtKind::While { cond, body }))
            }
            TokenKind::Delete => {
                let keyword = self.advance();
                let operand = self.expression()?;
                self.eat(TokenKind::Semi);
                Ok(self.stmt(StmtKind::Delete { keyword, operand }))
            }
            TokenKind::Const
            | TokenKind::Int
            | TokenKind::Char
            | TokenKind::Void
            | TokenKind::Struct => self.declaration(),
            TokenKind::Ident => {
                // An identifier can start either a declaration
                // (`List<int>* p;`) or an expression (`p = 1;`). Try the
                // declaration speculatively; on failure, rewind and parse
                // an expression statement.
                if let Some(decl) = self.speculate(Parser::declaration) {
                    Ok(decl)
                } else {
                    self.expression_statement()
                }
            }
            _ => self.expression_statement(),
        }
    }

    fn declaration(&mut self) -> ParseResult<Stmt> {
        let is_const = self.accept(TokenKind::Const).is_some();
        let ty = self.parse_type()?;
        let name = self.expect(TokenKind::Ident)?;
        let init = match self.kind() {
            TokenKind::Assign => {
                self.advance();
                if self.check(TokenKind::LBrace) {
                    Some(DeclInit::Expr(self.initializer_list()?))
                } else {
                    Some(DeclInit::Expr(self.expression()?))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let args = self.expr_list(TokenKind::RParen)?;
                self.eat(TokenKind::RParen);
                Some(DeclInit::Ctor(args))
            }
            _ => None,
        };
        self.eat(TokenKind::Semi);
        Ok(self.stmt(StmtKind::Declaration {
            is_const,
            ty,
            name,
            init,
        }))
    }

    fn initializer_list(&mut self) -> ParseResult<Expr> {
        let open = self.eat(TokenKind::LBrace);
        let values = self.expr_list(TokenKind::RBrace)?;
        self.eat(TokenKind::RBrace);
        Ok(self.expr(ExprKind::InitializerList { open, values }))
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let e = self.expression()?;
        self.eat(TokenKind::Semi);
        Ok(self.stmt(StmtKind::Expression(e)))
    }

    // ===== Expressions =====

    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    /// Assignment is right-associative. Legality of the left operand is
    /// checked after the fact; an invalid target is reported and the left
    /// operand returned as-is so parsing can continue.
    fn assignment(&mut self) -> ParseResult<Expr> {
        let left = self.equality()?;
        if self.check(TokenKind::Assign) {
            let op = self.advance();
            let right = self.assignment()?;
            let valid_target = match &left.kind {
                ExprKind::Variable { .. }
                | ExprKind::MemberAccess { .. } => true,
                ExprKind::Unary { op, .. } => op.kind == TokenKind::Star,
                _ => false,
            };
            if !valid_target {
                self.diags.error_at(
                    &self.path,
                    left.first_token(),
                    "Invalid assignment target".to_string(),
                );
                return Ok(left);
            }
            return Ok(self.expr(ExprKind::Assignment {
                left: Box::new(left),
                op,
                right: Box::new(right),
            }));
        }
        Ok(left)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut left = self.relational()?;
        while matches!(self.kind(), TokenKind::EqEq | TokenKind::NotEq) {
            let op = self.advance();
            let right = self.relational()?;
            left = self.expr(ExprKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn relational(&mut self) -> ParseResult<Expr> {
        let mut left = self.additive()?;
        while matches!(self.kind(), TokenKind::Lt | TokenKind::Gt) {
            let op = self.advance();
            let right = self.additive()?;
            left = self.expr(ExprKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.multiplicative()?;
        while matches!(self.kind(), TokenKind::Plus | TokenKind::Minus) {
            let op = self.advance();
            let right = self.multiplicative()?;
            left = self.expr(ExprKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        while matches!(self.kind(), TokenKind::Star | TokenKind::Slash) {
            let op = self.advance();
            let right = self.unary()?;
            left = self.expr(ExprKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            });
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        match self.kind() {
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Star
            | TokenKind::Amp => {
                let op = self.advance();
                let right = self.unary()?;
                Ok(self.expr(ExprKind::Unary {
                    op,
                    right: Box::new(right),
                }))
            }
            TokenKind::New => {
                let keyword = self.advance();
                let ty = self.parse_type()?;
                let args = if self.accept(TokenKind::LParen).is_some() {
                    let args = self.expr_list(TokenKind::RParen)?;
                    self.eat(TokenKind::RParen);
                    args
                } else {
                    Vec::new()
                };
                Ok(self.expr(ExprKind::New { keyword, ty, args }))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let mut e = self.primary()?;
        loop {
            match self.kind() {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.expr_list(TokenKind::RParen)?;
                    self.eat(TokenKind::RParen);
                    e = self.expr(ExprKind::Call {
                        callee: Box::new(e),
                        args,
                    });
                }
                TokenKind::Dot | TokenKind::Arrow => {
                    let op = self.advance();
                    let member = self.expect(TokenKind::Ident)?;
                    e = self.expr(ExprKind::MemberAccess {
                        left: Box::new(e),
                        op,
                        member,
                    });
                }
                TokenKind::ColonColon => {
                    self.advance();
                    let member = self.expect(TokenKind::Ident)?;
                    e = self.expr(ExprKind::QualifiedAccess {
                        left: Box::new(e),
                        member,
                    });
                }
                _ => return Ok(e),
            }
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        match self.kind() {
            TokenKind::IntLit => {
                let token = self.advance();
                let value = self.int_value(&token);
                Ok(self.expr(ExprKind::IntLit { token, value }))
            }
            TokenKind::StrLit => {
                let token = self.advance();
                let id = self.ids.next();
                let label = format!("str_{}", id.0);
                Ok(Expr {
                    id,
                    kind: ExprKind::StrLit { token, label },
                })
            }
            TokenKind::Ident
                if self.nth_text(0) == "sizeof"
                    && self.nth_kind(1) == TokenKind::LParen =>
            {
                let keyword = self.advance();
                self.eat(TokenKind::LParen);
                let ty = self.parse_type()?;
                self.eat(TokenKind::RParen);
                Ok(self.expr(ExprKind::Sizeof { keyword, ty }))
            }
            TokenKind::Ident => {
                let name = self.advance();
                Ok(self.expr(ExprKind::Variable { name }))
            }
            TokenKind::LParen => {
                self.advance();
                let e = self.expression()?;
                self.eat(TokenKind::RParen);
                Ok(e)
            }
            _ => {
                let found = self.peek().clone();
                Err(self.error_at(
                    &found,
                    format!("Expected expression but found {}", found),
                ))
            }
        }
    }

    /// Comma-separated expressions up to (not including) the closing token.
    fn expr_list(&mut self, close: TokenKind) -> ParseResult<Vec<Expr>> {
        let mut out = Vec::new();
        if self.check(close) || self.at_eof() {
            return Ok(out);
        }
        loop {
            out.push(self.expression()?);
            if self.accept(TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok(out)
    }

    /// Decodes a decimal or `0x` hex literal. Values are wrapped into the
    /// 32-bit range the target works in.
    fn int_value(&mut self, token: &Token) -> i32 {
        let text = token.text.as_str();
        let parsed = if let Some(hex) =
            text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
        {
            i64::from_str_radix(hex, 16)
        } else {
            text.parse::<i64>()
        };
        match parsed {
            Ok(value) => value as i32,
            Err(_) => {
                self.diags.error_at(
                    &self.path,
                    token,
                    format!("Invalid integer literal '{}'", text),
                );
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(source: &str) -> (CompilationUnit, Vec<crate::error::Diagnostic>) {
        let diags = Diagnostics::new();
        let ids = IdGen::new();
        let tokens = tokenize(source);
        let unit = parse_unit("test.ct", &tokens, &diags, &ids);
        (unit, diags.all())
    }

    fn parse_clean(source: &str) -> CompilationUnit {
        let (unit, diags) = parse(source);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        unit
    }

    fn body_of(f: &Function) -> Vec<Stmt> {
        match f.body.borrow().as_ref().map(|b| b.kind.clone()) {
            Some(StmtKind::Block(stmts)) => stmts,
            other => panic!("expected block body, got {:?}", other),
        }
    }

    #[test]
    fn test_minimal_function() {
        let unit = parse_clean("int main() { return 0; }");
        assert_eq!(unit.functions.len(), 1);
        let main = &unit.functions[0];
        assert_eq!(main.name.text, "main");
        assert!(main.params.is_empty());
        let body = body_of(main);
        assert!(matches!(
            &body[0].kind,
            StmtKind::Return { value: Some(_), .. }
        ));
    }

    #[test]
    fn test_external_declaration_has_no_body() {
        let unit = parse_clean("int malloc(int size);");
        assert!(unit.functions[0].body.borrow().is_none());
    }

    #[test]
    fn test_struct_sections_and_members() {
        let unit = parse_clean(
            "
            struct Point {
                int hidden;
            public:
                int x;
                int y;
                int length() { return x; }
            };
            ",
        );
        let s = &unit.structs[0];
        assert_eq!(s.members.len(), 3);
        assert_eq!(s.members[0].access, Access::Private);
        assert_eq!(s.members[1].access, Access::Public);
        assert_eq!(s.methods.len(), 1);
        assert_eq!(s.methods[0].owner_struct.as_deref(), Some("Point"));
    }

    #[test]
    fn test_constructor_destructor_and_base_init() {
        let unit = parse_clean(
            "
            struct Base {
            public:
                Base(int v) { }
            };
            struct Derived : Base {
            public:
                Derived() : Base(1) { }
                virtual ~Derived() { }
            };
            ",
        );
        let derived = &unit.structs[1];
        assert_eq!(derived.base_name.as_ref().map(|t| t.text.as_str()), Some("Base"));
        assert_eq!(derived.ctors.len(), 1);
        let init = derived.ctors[0].base_init.as_ref().expect("base init");
        assert_eq!(init.name.text, "Base");
        assert_eq!(init.args.len(), 1);
        assert!(derived.dtors[0].is_virtual);
    }

    #[test]
    fn test_property_forms() {
        let unit = parse_clean(
            "
            struct Circle {
            public:
                int radius;
                int diameter {
                    get { return radius + radius; }
                };
                int tag { get; set; };
            };
            ",
        );
        let s = &unit.structs[0];
        assert_eq!(s.properties.len(), 2);
        let diameter = &s.properties[0];
        assert!(diameter
            .accessor(AccessorKind::Get)
            .expect("get accessor")
            .body
            .borrow()
            .is_some());
        let tag = &s.properties[1];
        assert!(tag
            .accessor(AccessorKind::Get)
            .expect("get accessor")
            .body
            .borrow()
            .is_none());
        assert!(tag.accessor(AccessorKind::Set).is_some());
    }

    #[test]
    fn test_operator_method_name() {
        let unit = parse_clean(
            "
            struct Vec {
            public:
                int x;
                Vec* operator + (Vec* other) { return other; }
            };
            ",
        );
        assert_eq!(unit.structs[0].methods[0].name.text, "operator_Plus");
    }

    #[test]
    fn test_generic_struct_and_declaration() {
        let unit = parse_clean(
            "
            struct List<T> {
            public:
                T value;
            };
            int main() {
                List<int>* items;
                return 0;
            }
            ",
        );
        assert_eq!(unit.structs[0].generic_params.len(), 1);
        let body = body_of(&unit.functions[0]);
        match &body[0].kind {
            StmtKind::Declaration { ty, name, .. } => {
                assert_eq!(name.text, "items");
                assert_eq!(ty.pointer_depth(), 1);
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_less_than_stays_relational_in_expressions() {
        let unit = parse_clean(
            "
            int main() {
                int a;
                int b;
                a = 1;
                b = 2;
                return a < b;
            }
            ",
        );
        let body = body_of(&unit.functions[0]);
        match &body[4].kind {
            StmtKind::Return {
                value: Some(expr), ..
            } => match &expr.kind {
                ExprKind::Binary { op, .. } => {
                    assert_eq!(op.kind, TokenKind::Lt)
                }
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_ident_ident_is_declaration() {
        let unit = parse_clean(
            "
            struct Point { public: int x; };
            int main() {
                Point p;
                p.x = 1;
                return 0;
            }
            ",
        );
        let body = body_of(&unit.functions[1]);
        assert!(matches!(&body[0].kind, StmtKind::Declaration { .. }));
        assert!(matches!(&body[1].kind, StmtKind::Expression(_)));
    }

    #[test]
    fn test_namespace_and_qualified_access() {
        let unit = parse_clean(
            "
            namespace app;
            enum Mode { ON, OFF };
            int main() {
                return app::Mode::ON;
            }
            ",
        );
        assert_eq!(unit.enums[0].namespace.as_deref(), Some("app"));
        let body = body_of(&unit.functions[0]);
        match &body[0].kind {
            StmtKind::Return {
                value: Some(expr), ..
            } => {
                assert_eq!(
                    expr.flatten_qualifier().as_deref(),
                    Some("app::Mode::ON")
                );
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_enum_values_explicit_and_implicit() {
        let unit = parse_clean("enum E { A, B = 5, C, D = -1 };");
        let values: Vec<i32> =
            unit.enums[0].members.iter().map(|m| m.value).collect();
        assert_eq!(values, vec![0, 5, 6, -1]);
    }

    #[test]
    fn test_invalid_assignment_target() {
        let (unit, diags) = parse("int main() { 1 = 2; return 0; }");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "Invalid assignment target");
        // The function still parsed completely.
        assert_eq!(unit.functions.len(), 1);
    }

    #[test]
    fn test_missing_semi_recovers_and_parses_next_function() {
        let (unit, diags) = parse(
            "
            int first() { return 1 }
            int second() { return 2; }
            ",
        );
        assert!(!diags.is_empty());
        assert!(diags
            .iter()
            .any(|d| d.message.contains("Expected ';'")));
        assert_eq!(unit.functions.len(), 2);
        assert_eq!(unit.functions[1].name.text, "second");
    }

    #[test]
    fn test_garbage_terminates_with_diagnostics() {
        let (unit, diags) = parse("@ $ ) } ; struct");
        assert!(!diags.is_empty());
        assert!(unit.functions.is_empty());
    }

    #[test]
    fn test_new_and_delete() {
        let unit = parse_clean(
            "
            struct Point { public: int x; };
            int main() {
                Point* p = new Point();
                delete p;
                return 0;
            }
            ",
        );
        let body = body_of(&unit.functions[0]);
        match &body[0].kind {
            StmtKind::Declaration {
                init: Some(DeclInit::Expr(e)),
                ..
            } => assert!(matches!(e.kind, ExprKind::New { .. })),
            other => panic!("expected declaration, got {:?}", other),
        }
        assert!(matches!(&body[1].kind, StmtKind::Delete { .. }));
    }

    #[test]
    fn test_initializer_list() {
        let unit = parse_clean(
            "
            struct Point { public: int x; int y; };
            int main() {
                Point p = { 1, 2 };
                return 0;
            }
            ",
        );
        let body = body_of(&unit.functions[1]);
        match &body[0].kind {
            StmtKind::Declaration {
                init: Some(DeclInit::Expr(e)),
                ..
            } => match &e.kind {
                ExprKind::InitializerList { values, .. } => {
                    assert_eq!(values.len(), 2)
                }
                other => panic!("expected initializer list, got {:?}", other),
            },
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_sizeof_builtin() {
        let unit = parse_clean("int main() { return sizeof(int); }");
        let body = body_of(&unit.functions[0]);
        match &body[0].kind {
            StmtKind::Return {
                value: Some(expr), ..
            } => assert!(matches!(expr.kind, ExprKind::Sizeof { .. })),
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_hex_literal() {
        let unit = parse_clean("int main() { return 0x10; }");
        let body = body_of(&unit.functions[0]);
        match &body[0].kind {
            StmtKind::Return {
                value: Some(expr), ..
            } => match &expr.kind {
                ExprKind::IntLit { value, .. } => assert_eq!(*value, 16),
                other => panic!("expected int literal, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_import_directive() {
        let unit = parse_clean("#import \"raylib\"\nint main() { return 0; }");
        assert_eq!(unit.imports, vec!["raylib".to_string()]);
    }
}
