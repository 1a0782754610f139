//! Register-dependency propagation onto new branches.
//!
//! A branch inserted inside an extended block jumps to a block that
//! expects the same registers as the fall-through path, so its manifest is
//! a copy of the manifest on the block boundary it bypasses. Copies follow
//! the ownership rule of [`RegDep`]: carried entries are shared, fresh
//! entries are duplicated.

use arbor_ir::{FreshDef, IrContext, ManifestRef, NodeRef, RegDep};
use smallvec::SmallVec;

/// Copy the entries of `source`.
///
/// When `substitute` names the same register as a source entry it replaces
/// that entry. It is installed at most once; if no entry names its register
/// it is dropped.
pub fn copy_manifest(
    ctx: &IrContext,
    source: ManifestRef,
    mut substitute: Option<FreshDef>,
) -> SmallVec<[RegDep; 4]> {
    ctx.manifest(source)
        .entries
        .iter()
        .map(|entry| {
            let register = entry.register(ctx);
            if let Some(def) = substitute.take_if(|def| def.register == register) {
                return RegDep::Fresh(def);
            }
            match entry {
                RegDep::Fresh(def) => RegDep::Fresh(def.duplicate()),
                RegDep::Carried(load) => RegDep::Carried(*load),
            }
        })
        .collect()
}

/// Attach a copy of `source` (see [`copy_manifest`]) to `branch`.
///
/// Returns the new manifest, or `None` without attaching anything when
/// there is no source manifest.
///
/// # Panics
///
/// Panics if `branch` already carries a manifest.
pub fn copy_and_attach_manifest(
    ctx: &mut IrContext,
    branch: NodeRef,
    source: Option<ManifestRef>,
    substitute: Option<FreshDef>,
) -> Option<ManifestRef> {
    assert!(
        ctx.node(branch).manifest.is_none(),
        "copy_and_attach_manifest: {branch} already has a manifest",
    );
    let source = source?;
    let entries = copy_manifest(ctx, source, substitute);
    let manifest = ctx.create_manifest(entries);
    ctx.attach_manifest(branch, manifest);
    Some(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_ir::{GlobalRegister, NodeDataBuilder, Opcode, parse_method, print_tree};

    fn exit_manifest_of_first_block(ctx: &IrContext) -> ManifestRef {
        let block = ctx.entry_block().expect("entry block");
        ctx.exit_manifest(block).expect("exit manifest")
    }

    const INPUT: &str = "method @m registers=3 {
  block_0 {
    in { %0 = iRegLoad $0 }
    iRegStore $1(%1 = iconst #7)
    out { $0: %0, $1: pass(%1) }
  }
  block_1 {
    in { %2 = iRegLoad $0, %3 = iRegLoad $1 }
    return
  }
}";

    #[test]
    fn carried_entries_are_shared_and_fresh_entries_duplicated() {
        let mut ctx = parse_method(INPUT).expect("parse");
        let source = exit_manifest_of_first_block(&ctx);
        let branch = ctx.create_node(NodeDataBuilder::new(Opcode::Goto).build());
        let copy = copy_and_attach_manifest(&mut ctx, branch, Some(source), None)
            .expect("manifest copied");

        assert_ne!(copy, source);
        let original = &ctx.manifest(source).entries;
        let copied = &ctx.manifest(copy).entries;
        assert_eq!(copied.len(), 2);
        assert_eq!(copied[0], original[0]);
        let (RegDep::Fresh(a), RegDep::Fresh(b)) = (&original[1], &copied[1]) else {
            panic!("expected fresh entries");
        };
        assert_eq!((a.register, a.value), (b.register, b.value));
        // Carried load and stored constant are each referenced once more.
        assert_eq!(ctx.node(original[0].node()).reference_count, 3);
        assert_eq!(ctx.node(a.value).reference_count, 3);
        assert_eq!(
            print_tree(&ctx, branch),
            "goto { $0: %0 = iRegLoad $0, $1: pass(%1 = iconst #7) }"
        );
    }

    #[test]
    fn substitute_replaces_matching_register_once() {
        let mut ctx = parse_method(INPUT).expect("parse");
        let source = exit_manifest_of_first_block(&ctx);
        let zero = ctx.iconst(0);
        let entries = copy_manifest(&ctx, source, Some(FreshDef::new(GlobalRegister(1), zero)));
        assert_eq!(entries[1], RegDep::Fresh(FreshDef::new(GlobalRegister(1), zero)));

        // A substitute for a register the source does not name is dropped.
        let unused = copy_manifest(&ctx, source, Some(FreshDef::new(GlobalRegister(2), zero)));
        assert!(unused.iter().all(|e| e.node() != zero));
        assert_eq!(unused.len(), 2);
    }

    #[test]
    fn missing_source_attaches_nothing() {
        let mut ctx = parse_method(INPUT).expect("parse");
        let branch = ctx.create_node(NodeDataBuilder::new(Opcode::Goto).build());
        assert_eq!(copy_and_attach_manifest(&mut ctx, branch, None, None), None);
        assert_eq!(ctx.node(branch).manifest, None);
    }

    #[test]
    #[should_panic(expected = "already has a manifest")]
    fn branch_with_manifest_is_rejected() {
        let mut ctx = parse_method(INPUT).expect("parse");
        let source = exit_manifest_of_first_block(&ctx);
        let branch = ctx.create_node(NodeDataBuilder::new(Opcode::Goto).build());
        copy_and_attach_manifest(&mut ctx, branch, Some(source), None);
        copy_and_attach_manifest(&mut ctx, branch, Some(source), None);
    }
}
