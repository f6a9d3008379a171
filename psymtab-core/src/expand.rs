use crate::error::Error;
use crate::objfile::ObjectFile;
use crate::psymtab::PsymtabRef;
use crate::storage::PsymtabStorage;

/// The reader callback that turns a partial symtab into a full compunit.
///
/// The core never parses full debug records itself; when a query needs
/// full information it drives the expander installed by whichever reader
/// built the psymtabs. Implementations parse the unit located by the
/// psymtab's `read_locator` and install the resulting compunit with
/// [`ObjectFile::add_compunit`], storing the reference on the psymtab.
///
/// Implementations must not check or set `readin` themselves — the
/// orchestration in [`expand_psymtab`] owns that flag.
pub trait Expander {
    /// Builds the full compunit for `pst`.
    fn expand(
        &mut self,
        objfile: &mut ObjectFile,
        storage: &mut PsymtabStorage,
        pst: PsymtabRef,
    ) -> Result<(), Error>;
}

/// Expands `pst` exactly once, dependencies first.
///
/// `readin` is set *before* the dependency walk so that a dependency
/// cycle — which should not occur, but is defended against — terminates
/// instead of recursing. Shared dependencies (those with a `user`) are
/// skipped; they are expanded through their canonical includer.
pub fn expand_psymtab(
    storage: &mut PsymtabStorage,
    objfile: &mut ObjectFile,
    pst: PsymtabRef,
    expander: &mut dyn Expander,
) -> Result<(), Error> {
    if storage[pst].readin {
        return Ok(());
    }
    storage[pst].readin = true;

    expand_dependencies(storage, objfile, pst, expander)?;
    expander.expand(objfile, storage, pst)
}

/// Reads in all partial symtabs this one depends on.
pub fn expand_dependencies(
    storage: &mut PsymtabStorage,
    objfile: &mut ObjectFile,
    pst: PsymtabRef,
    expander: &mut dyn Expander,
) -> Result<(), Error> {
    let dependencies = storage[pst].dependencies.clone();
    for dep in dependencies {
        if !storage[dep].readin && storage[dep].user.is_none() {
            tracing::debug!(
                dependency = %storage[dep].filename,
                of = %storage[pst].filename,
                "expanding dependency"
            );
            expand_psymtab(storage, objfile, dep, expander)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objfile::{CompunitSymtab, FileTab};
    use psymtab_common::Language;
    use similar_asserts::assert_eq;
    use std::sync::Arc;

    /// Test expander that records the order units were expanded in.
    pub(crate) struct TraceExpander {
        pub order: Vec<String>,
    }

    impl Expander for TraceExpander {
        fn expand(
            &mut self,
            objfile: &mut ObjectFile,
            storage: &mut PsymtabStorage,
            pst: PsymtabRef,
        ) -> Result<(), Error> {
            let filename = Arc::clone(&storage[pst].filename);
            self.order.push(filename.to_string());
            let cu = objfile.add_compunit(CompunitSymtab::new(FileTab {
                filename,
                language: storage[pst].language,
            }));
            storage[pst].compunit = Some(cu);
            Ok(())
        }
    }

    #[test]
    fn test_dependencies_first_and_idempotent() {
        let mut objfile = ObjectFile::new("a.out");
        let mut storage = PsymtabStorage::new();

        let a = storage.new_psymtab("a.c", &mut objfile);
        let b = storage.new_psymtab("b.c", &mut objfile);
        storage[b].dependencies = vec![a];

        let mut expander = TraceExpander { order: Vec::new() };
        expand_psymtab(&mut storage, &mut objfile, b, &mut expander).unwrap();
        assert_eq!(expander.order, vec!["a.c".to_owned(), "b.c".to_owned()]);
        assert!(storage[a].readin && storage[b].readin);

        // A second expansion is a no-op.
        expand_psymtab(&mut storage, &mut objfile, b, &mut expander).unwrap();
        expand_psymtab(&mut storage, &mut objfile, a, &mut expander).unwrap();
        assert_eq!(expander.order.len(), 2);
    }

    #[test]
    fn test_dependency_cycle_terminates() {
        let mut objfile = ObjectFile::new("a.out");
        let mut storage = PsymtabStorage::new();

        let a = storage.new_psymtab("a.c", &mut objfile);
        let b = storage.new_psymtab("b.c", &mut objfile);
        storage[a].dependencies = vec![b];
        storage[b].dependencies = vec![a];

        let mut expander = TraceExpander { order: Vec::new() };
        expand_psymtab(&mut storage, &mut objfile, a, &mut expander).unwrap();
        assert_eq!(expander.order, vec!["b.c".to_owned(), "a.c".to_owned()]);
    }

    #[test]
    fn test_shared_dependency_skipped() {
        let mut objfile = ObjectFile::new("a.out");
        let mut storage = PsymtabStorage::new();

        let shared = storage.new_psymtab("common.h", &mut objfile);
        let user = storage.new_psymtab("a.c", &mut objfile);
        storage[shared].user = Some(user);
        let b = storage.new_psymtab("b.c", &mut objfile);
        storage[b].dependencies = vec![shared];

        let mut expander = TraceExpander { order: Vec::new() };
        expand_psymtab(&mut storage, &mut objfile, b, &mut expander).unwrap();
        assert_eq!(expander.order, vec!["b.c".to_owned()]);
        assert!(!storage[shared].readin);
    }
}
