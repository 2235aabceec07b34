//! The TypeRepository: the index of every struct and enum in the program,
//! keyed by fully-qualified name, plus the map back to the compilation unit
//! that defined each one.
//!
//! The repository is populated when parsed units are registered, and again
//! by the monomorphizer when generic instances materialize mid-analysis;
//! interior mutability keeps both callers on `&self` (the compiler is
//! single-threaded). Monomorphized structs are additionally queued so the
//! driver can analyze their method bodies to a fixpoint.

use crate::ast::{CompilationUnit, Enum, Function, Struct};
use crate::error::Diagnostics;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct TypeRepository {
    structs: RefCell<HashMap<String, Rc<Struct>>>,
    enums: RefCell<HashMap<String, Rc<Enum>>>,
    /// FQN of a struct or enum -> the unit it was defined in.
    units: RefCell<HashMap<String, Rc<CompilationUnit>>>,
    /// `(enum FQN, member name)` -> value, for O(1) member lookup.
    enum_members: RefCell<HashMap<(String, String), i32>>,
    /// Monomorphized structs whose bodies have not been analyzed yet.
    pending: RefCell<Vec<Rc<Struct>>>,
}

impl TypeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every struct and enum of a parsed unit. Duplicate FQNs are
    /// reported once and the first definition wins.
    pub fn register_unit(&self, unit: &Rc<CompilationUnit>, diags: &Diagnostics) {
        for s in &unit.structs {
            let fqn = s.fqn();
            if self.structs.borrow().contains_key(&fqn) {
                diags.error_at(
                    &unit.path,
                    &s.name,
                    format!("Duplicate definition of struct '{}'", fqn),
                );
                continue;
            }
            self.structs.borrow_mut().insert(fqn.clone(), Rc::clone(s));
            self.units.borrow_mut().insert(fqn, Rc::clone(unit));
        }
        for e in &unit.enums {
            let fqn = e.fqn();
            if self.enums.borrow().contains_key(&fqn) {
                diags.error_at(
                    &unit.path,
                    &e.name,
                    format!("Duplicate definition of enum '{}'", fqn),
                );
                continue;
            }
            for member in &e.members {
                self.enum_members
                    .borrow_mut()
                    .insert((fqn.clone(), member.name.text.clone()), member.value);
            }
            self.enums.borrow_mut().insert(fqn.clone(), Rc::clone(e));
            self.units.borrow_mut().insert(fqn, Rc::clone(unit));
        }
    }

    /// Registers a freshly monomorphized struct. Idempotent from the
    /// caller's point of view: the monomorphizer checks for an existing
    /// instance before cloning.
    pub fn register_instance(&self, s: Rc<Struct>, unit: Rc<CompilationUnit>) {
        let fqn = s.fqn();
        self.structs
            .borrow_mut()
            .insert(fqn.clone(), Rc::clone(&s));
        self.units.borrow_mut().insert(fqn, unit);
        self.pending.borrow_mut().push(s);
    }

    pub fn find_struct(&self, fqn: &str) -> Option<Rc<Struct>> {
        self.structs.borrow().get(fqn).cloned()
    }

    pub fn find_enum(&self, fqn: &str) -> Option<Rc<Enum>> {
        self.enums.borrow().get(fqn).cloned()
    }

    pub fn unit_for_struct(&self, fqn: &str) -> Option<Rc<CompilationUnit>> {
        self.units.borrow().get(fqn).cloned()
    }

    pub fn enum_value(&self, fqn: &str, member: &str) -> Option<i32> {
        self.enum_members
            .borrow()
            .get(&(fqn.to_string(), member.to_string()))
            .copied()
    }

    /// FQN of the struct a function belongs to, combining its namespace and
    /// owner. `None` for free functions.
    pub fn fqn_of_owner(&self, function: &Function) -> Option<String> {
        function.owner_fqn()
    }

    /// All registered enums, for unqualified member scans.
    pub fn all_enums(&self) -> Vec<Rc<Enum>> {
        self.enums.borrow().values().cloned().collect()
    }

    /// All registered structs, for code generation.
    pub fn all_structs(&self) -> Vec<Rc<Struct>> {
        self.structs.borrow().values().cloned().collect()
    }

    /// Drains the queue of monomorphized structs awaiting analysis.
    pub fn take_pending(&self) -> Vec<Rc<Struct>> {
        self.pending.borrow_mut().drain(..).collect()
    }
}
