//! Memory layout of struct instances: field offsets and full member lists
//! with inheritance. Base members precede derived members; a chain with any
//! virtual declarations reserves a vtable pointer at offset 0 of the root.
//!
//! Sizes follow the 32-bit target: `int` and pointers are 4 bytes, `char`
//! is 1, struct-by-value members occupy their own layout size. There is no
//! padding.

use crate::consts::{CHAR_SIZE, INT_SIZE, POINTER_SIZE};
use crate::error::ResolveError;
use crate::repository::TypeRepository;
use crate::resolve::{ResolveCtx, Resolver};
use crate::ty::Ty;
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq)]
pub struct MemberLayout {
    pub name: String,
    pub ty: Ty,
    pub offset: u32,
    pub is_const: bool,
}

pub struct MemoryLayoutManager {
    repo: Rc<TypeRepository>,
    resolver: Rc<Resolver>,
}

impl MemoryLayoutManager {
    pub fn new(repo: Rc<TypeRepository>, resolver: Rc<Resolver>) -> Self {
        Self { repo, resolver }
    }

    /// Every field of a struct with its resolved type and offset, bases
    /// first.
    pub fn all_members(
        &self,
        fqn: &str,
    ) -> Result<Vec<MemberLayout>, ResolveError> {
        let mut visiting = HashSet::new();
        Ok(self.members_guarded(fqn, &mut visiting)?.0)
    }

    /// Offset and resolved type of one named member, searching the whole
    /// chain. `Ok(None)` means the struct exists but has no such field.
    pub fn member_info(
        &self,
        fqn: &str,
        member: &str,
    ) -> Result<Option<(u32, Ty)>, ResolveError> {
        Ok(self
            .all_members(fqn)?
            .into_iter()
            .find(|m| m.name == member)
            .map(|m| (m.offset, m.ty)))
    }

    /// Total instance size, including the vtable pointer slot if the chain
    /// has one.
    pub fn struct_size(&self, fqn: &str) -> Result<u32, ResolveError> {
        let mut visiting = HashSet::new();
        Ok(self.members_guarded(fqn, &mut visiting)?.1)
    }

    pub fn size_of(&self, ty: &Ty) -> Result<u32, ResolveError> {
        let mut visiting = HashSet::new();
        self.size_guarded(ty, &mut visiting)
    }

    fn members_guarded(
        &self,
        fqn: &str,
        visiting: &mut HashSet<String>,
    ) -> Result<(Vec<MemberLayout>, u32), ResolveError> {
        if !visiting.insert(fqn.to_string()) {
            return Err(ResolveError::new(format!(
                "Struct '{}' recursively contains itself by value",
                fqn
            )));
        }
        let chain = self.resolver.chain(fqn);
        if chain.is_empty() {
            return Err(ResolveError::new(format!(
                "Unknown struct '{}'",
                fqn
            )));
        }

        let mut offset = if chain.iter().any(|s| s.declares_virtual()) {
            POINTER_SIZE
        } else {
            0
        };
        let mut out = Vec::new();
        for s in chain.iter().rev() {
            let unit =
                self.repo.unit_for_struct(&s.fqn()).ok_or_else(|| {
                    ResolveError::new(format!("Unknown struct '{}'", fqn))
                })?;
            let ctx = ResolveCtx::new(s.namespace.clone(), unit);
            for m in &s.members {
                let ty = self.resolver.resolve(&m.ty, &ctx)?;
                let size = self.size_guarded(&ty, visiting)?;
                out.push(MemberLayout {
                    name: m.name.text.clone(),
                    ty,
                    offset,
                    is_const: m.is_const,
                });
                offset += size;
            }
        }
        visiting.remove(fqn);
        Ok((out, offset))
    }

    fn size_guarded(
        &self,
        ty: &Ty,
        visiting: &mut HashSet<String>,
    ) -> Result<u32, ResolveError> {
        if ty.is_pointer() {
            return Ok(POINTER_SIZE);
        }
        match ty.name() {
            None => Err(ResolveError::new(
                "Cannot compute the size of an unresolved type",
            )),
            Some("int") => Ok(INT_SIZE),
            Some("char") => Ok(CHAR_SIZE),
            Some("void") => {
                Err(ResolveError::new("Type 'void' has no size"))
            }
            Some(name) => {
                if ty.is_generic_param() {
                    return Err(ResolveError::new(format!(
                        "Unbound type parameter '{}' has no size",
                        name
                    )));
                }
                if self.repo.find_struct(name).is_some() {
                    Ok(self.members_guarded(name, visiting)?.1)
                } else if self.repo.find_enum(name).is_some() {
                    Ok(INT_SIZE)
                } else {
                    Err(ResolveError::new(format!(
                        "Unknown type '{}'",
                        name
                    )))
                }
            }
        }
    }
}
