//! Per-struct vtable layouts for virtual dispatch. Slots are assigned in
//! declaration order across the inheritance chain, root first; an
//! `override` reuses its base slot, replacing the implementing struct.
//! Virtual destructors occupy a slot under a reserved name.

use crate::resolve::Resolver;
use std::rc::Rc;

/// Slot name reserved for the virtual destructor.
pub const DTOR_SLOT: &str = "~";

#[derive(Clone, Debug, PartialEq)]
pub struct VTableSlot {
    /// Method name (or [DTOR_SLOT]).
    pub name: String,
    /// FQN of the struct providing the implementation for this slot.
    pub impl_fqn: String,
}

pub struct VTableManager {
    resolver: Rc<Resolver>,
}

impl VTableManager {
    pub fn new(resolver: Rc<Resolver>) -> Self {
        Self { resolver }
    }

    pub fn has_vtable(&self, fqn: &str) -> bool {
        self.resolver
            .chain(fqn)
            .iter()
            .any(|s| s.declares_virtual())
    }

    /// The full vtable for a struct, or an empty list if the chain has no
    /// virtual declarations.
    pub fn vtable(&self, fqn: &str) -> Vec<VTableSlot> {
        let mut slots: Vec<VTableSlot> = Vec::new();
        let chain = self.resolver.chain(fqn);
        for s in chain.iter().rev() {
            let impl_fqn = s.fqn();
            for d in &s.dtors {
                let overrides_base =
                    slots.iter().any(|slot| slot.name == DTOR_SLOT);
                if d.is_virtual || overrides_base {
                    upsert(&mut slots, DTOR_SLOT, &impl_fqn);
                }
            }
            for m in &s.methods {
                if m.is_virtual || m.is_override {
                    upsert(&mut slots, &m.name.text, &impl_fqn);
                }
            }
        }
        slots
    }

    /// Index of a method's slot in the struct's vtable.
    pub fn slot_index(&self, fqn: &str, method: &str) -> Option<usize> {
        self.vtable(fqn).iter().position(|slot| slot.name == method)
    }
}

/// Replaces the implementation of an existing slot, or appends a new one in
/// declaration order.
fn upsert(slots: &mut Vec<VTableSlot>, name: &str, impl_fqn: &str) {
    if let Some(slot) = slots.iter_mut().find(|slot| slot.name == name) {
        slot.impl_fqn = impl_fqn.to_string();
    } else {
        slots.push(VTableSlot {
            name: name.to_string(),
            impl_fqn: impl_fqn.to_string(),
        });
    }
}
