use arbor_eval::{Completion, Exception, Heap, Machine, Value};
use arbor_ir::object_model::CLASS_IS_VALUE_TYPE;
use arbor_ir::{GlobalRegister, IrContext, ObjectModel, Opcode, parse_method, print_method, validate};

use super::*;
use crate::gate::TransformationBudget;

const EQUALS: &str = "method @equals registers=1 {
  block_0 {
    treetop(%0 = icall @object_equality(%1 = aload @lhs, %2 = aload @rhs))
    ireturn(%0)
  }
}";

const ARRAY_STORE: &str = "method @store registers=2 {
  block_0 {
    ArrayStoreCHK(%0 = awrtbari(%1 = aladd(%2 = aload @array, %3 = iload @index), %4 = aload @value, %2))
    return
  }
}";

fn parse(input: &str) -> IrContext {
    parse_method(input).unwrap_or_else(|e| panic!("{e}\n\nInput:\n{input}"))
}

fn lower_with(input: &str, config: LoweringConfig) -> (IrContext, LoweringStats) {
    let mut ctx = parse(input);
    let stats = TreeLowering::new(config).perform(&mut ctx).expect("lowering");
    assert_valid(&ctx);
    (ctx, stats)
}

fn lower(input: &str) -> IrContext {
    lower_with(input, LoweringConfig::default()).0
}

fn assert_valid(ctx: &IrContext) {
    let result = validate(ctx);
    assert!(result.is_ok(), "{result}\n\n{}", print_method(ctx));
}

/// Run with the given slots, returning the outcome and the number of
/// equality comparisons that reached a call.
fn run(ctx: &IrContext, heap: &mut Heap, slots: &[(&str, Value)]) -> (Completion, usize) {
    run_with(ctx, heap, slots, |m| m)
}

fn run_with(
    ctx: &IrContext,
    heap: &mut Heap,
    slots: &[(&str, Value)],
    setup: impl FnOnce(Machine<'_>) -> Machine<'_>,
) -> (Completion, usize) {
    let mut machine = Machine::new(ctx, heap);
    for &(name, value) in slots {
        machine = machine.with_slot(name, value);
    }
    let mut machine = setup(machine);
    let completion = machine
        .run()
        .unwrap_or_else(|e| panic!("{e}\n\n{}", print_method(ctx)));
    (completion, machine.helper_calls())
}

struct EqualityCase {
    name: &'static str,
    lhs: Value,
    rhs: Value,
    /// Whether the lowered code still has to call the helper.
    reaches_helper: bool,
}

fn equality_cases(heap: &mut Heap) -> Vec<EqualityCase> {
    let point = heap.define_class("Point", CLASS_IS_VALUE_TYPE);
    let pair = heap.define_class("Pair", CLASS_IS_VALUE_TYPE);
    let plain = heap.define_class("Plain", 0);
    let p1 = Value::object(heap.new_object(point, vec![Value::Int(1), Value::Int(2)]));
    let p2 = Value::object(heap.new_object(point, vec![Value::Int(1), Value::Int(2)]));
    let p3 = Value::object(heap.new_object(point, vec![Value::Int(3), Value::Int(4)]));
    let q = Value::object(heap.new_object(pair, vec![Value::Int(1), Value::Int(2)]));
    let a = Value::object(heap.new_object(plain, vec![]));
    let b = Value::object(heap.new_object(plain, vec![]));

    let case = |name, lhs, rhs, reaches_helper| EqualityCase {
        name,
        lhs,
        rhs,
        reaches_helper,
    };
    vec![
        case("identical objects", a, a, false),
        case("identical values", p1, p1, false),
        case("null lhs", Value::NULL, a, false),
        case("null rhs", p1, Value::NULL, false),
        case("both null", Value::NULL, Value::NULL, false),
        case("distinct identity objects", a, b, false),
        case("value type on the left", p1, a, false),
        case("value type on the right", a, p1, false),
        case("equal values", p1, p2, true),
        case("unequal values", p1, p3, true),
        case("different value classes", p1, q, true),
    ]
}

/// Every case computes the same result in `lowered` as in `input`.
fn assert_equality_preserved(input: &str, lowered: &IrContext, check_helper_calls: bool) {
    let original = parse(input);
    let mut heap = Heap::new();
    for case in equality_cases(&mut heap) {
        let slots = [("lhs", case.lhs), ("rhs", case.rhs)];
        let (expected, _) = run(&original, &mut heap, &slots);
        let (actual, helper_calls) = run(lowered, &mut heap, &slots);
        assert_eq!(actual, expected, "{}", case.name);
        if check_helper_calls {
            assert_eq!(
                helper_calls,
                usize::from(case.reaches_helper),
                "{}: helper calls",
                case.name
            );
        }
    }
}

#[test]
fn equality_call_gets_fast_path_chain() {
    let (ctx, stats) = lower_with(EQUALS, LoweringConfig::default());
    assert_eq!(
        stats,
        LoweringStats {
            rebound_calls: 1,
            equality_calls_lowered: 1,
            ..LoweringStats::default()
        }
    );
    insta::assert_snapshot!(print_method(&ctx), @r"
    method @equals registers=1 {
      block_0 {
        treetop(%0 = aload @lhs)
        treetop(%1 = aload @rhs)
        iRegStore $0(%2 = iconst #1)
        ifacmpeq(%0, %1) -> block_1 { $0: pass(%2) }
      }
      block_2 extension {
        iRegStore $0(%3 = iconst #0)
        ifacmpeq(%0, %4 = aconst #0) -> block_1 { $0: pass(%3) }
      }
      block_3 extension {
        ifacmpeq(%1, %4) -> block_1 { $0: pass(%3) }
      }
      block_4 extension {
        ificmpeq(%5 = iand(%6 = iloadi @class_flags(%7 = aloadi @vft(%0)), %8 = iconst #1048576), %3) -> block_1 { $0: pass(%3) }
      }
      block_5 extension {
        ificmpeq(%9 = iand(%10 = iloadi @class_flags(%11 = aloadi @vft(%1)), %8), %3) -> block_1 { $0: pass(%3) }
      }
      block_6 extension {
        treetop(%12 = icall @acmp_helper(%0, %1))
        iRegStore $0(%12)
        out { $0: pass(%12) }
      }
      block_1 {
        in { %13 = iRegLoad $0 }
        treetop(%13)
        ireturn(%13)
      }
    }
    ");
}

#[test]
fn fast_path_preserves_equality_semantics() {
    let ctx = lower(EQUALS);
    assert_equality_preserved(EQUALS, &ctx, true);
}

#[test]
fn every_fast_path_edge_reaches_the_merge_block() {
    let ctx = lower(EQUALS);
    let blocks = ctx.blocks_in_order();
    let merge = blocks[blocks.len() - 1];
    for &block in &blocks[..blocks.len() - 1] {
        assert!(
            ctx.cfg.successors(block).contains(&merge),
            "{block} has no edge to {merge}"
        );
    }
    assert_eq!(ctx.cfg.predecessors(merge).len(), blocks.len() - 1);
}

#[test]
fn live_registers_are_carried_to_every_branch() {
    let input = "method @m registers=2 {
  block_0 {
    in { %0 = iRegLoad $1 }
    treetop(%1 = icall @object_equality(%2 = aload @lhs, %3 = aload @rhs))
    ireturn(%4 = iadd(%1, %0))
  }
}";
    let original = parse(input);
    let lowered = lower(input);
    let printed = print_method(&lowered);
    // Five branches and the fall-through into the merge block.
    assert_eq!(printed.matches("$1: %").count(), 6, "{printed}");

    fn bias(machine: Machine<'_>) -> Machine<'_> {
        machine.with_register(GlobalRegister(1), Value::Int(100))
    }
    let mut heap = Heap::new();
    for case in equality_cases(&mut heap) {
        let slots = [("lhs", case.lhs), ("rhs", case.rhs)];
        let (expected, _) = run_with(&original, &mut heap, &slots, bias);
        let (actual, _) = run_with(&lowered, &mut heap, &slots, bias);
        assert_eq!(actual, expected, "{}", case.name);
    }
}

#[test]
fn passthrough_registers_are_redefined_on_every_branch() {
    let input = "method @m registers=2 {
  block_0 {
    iRegStore $1(%0 = iconst #100)
    treetop(%1 = icall @object_equality(%2 = aload @lhs, %3 = aload @rhs))
    istore @r(%1)
    out { $1: pass(%0) }
  }
  block_1 {
    in { %4 = iRegLoad $1 }
    ireturn(%5 = iadd(%6 = iload @r, %4))
  }
}";
    let lowered = lower(input);
    let printed = print_method(&lowered);
    // Five branches and the exit of the block holding the call.
    assert!(printed.matches("$1: pass(").count() >= 6, "{printed}");
    assert_equality_preserved(input, &lowered, true);
}

#[test]
fn call_stored_by_its_statement_is_anchored_first() {
    let input = "method @m registers=1 {
  block_0 {
    istore @r(%0 = icall @object_equality(%1 = aload @lhs, %2 = aload @rhs))
    ireturn(%3 = iload @r)
  }
}";
    let (lowered, stats) = lower_with(input, LoweringConfig::default());
    assert_eq!(stats.equality_calls_lowered, 1);
    assert_equality_preserved(input, &lowered, true);

    // The store runs in the merge block, after every fast path.
    let blocks = lowered.blocks_in_order();
    let merge = blocks[blocks.len() - 1];
    let stores_r = lowered.block_tree_tops(merge).into_iter().any(|tt| {
        let root = lowered.node(lowered.tt_node(tt));
        root.opcode == Opcode::IStore
            && root.symbol.is_some_and(|sym| lowered.symbols.name(sym) == "r")
    });
    assert!(stores_r, "{}", print_method(&lowered));
}

#[test]
fn call_returned_by_its_statement_is_anchored_first() {
    let input = "method @m registers=1 {
  block_0 {
    ireturn(%0 = icall @object_equality(%1 = aload @lhs, %2 = aload @rhs))
  }
}";
    let (lowered, stats) = lower_with(input, LoweringConfig::default());
    assert_eq!(stats.equality_calls_lowered, 1);
    assert_equality_preserved(input, &lowered, true);
}

#[test]
fn call_compared_by_a_branch_is_anchored_first() {
    let input = "method @m registers=1 {
  block_0 {
    ificmpne(%0 = icall @object_equality(%1 = aload @lhs, %2 = aload @rhs), %3 = iconst #0) -> block_2
  }
  block_1 {
    ireturn(%4 = iconst #0)
  }
  block_2 {
    ireturn(%5 = iconst #1)
  }
}";
    let (lowered, stats) = lower_with(input, LoweringConfig::default());
    assert_eq!(stats.equality_calls_lowered, 1);
    assert_equality_preserved(input, &lowered, true);
}

#[test]
fn result_goes_through_a_temporary_without_free_registers() {
    let input = EQUALS.replace("registers=1", "registers=0");
    let ctx = lower(&input);
    let printed = print_method(&ctx);
    assert!(printed.contains("istore @temp0(%2 = iconst #1)"), "{printed}");
    assert!(!printed.contains("RegStore"), "{printed}");
    assert!(!printed.contains("pass("), "{printed}");

    let original = parse(&input);
    let mut heap = Heap::new();
    for case in equality_cases(&mut heap) {
        let slots = [("lhs", case.lhs), ("rhs", case.rhs)];
        let (expected, _) = run(&original, &mut heap, &slots);
        let (actual, _) = run(&ctx, &mut heap, &slots);
        assert_eq!(actual, expected, "{}", case.name);
    }
}

#[test]
fn consecutive_equality_calls_are_both_lowered() {
    let input = "method @twice registers=2 {
  block_0 {
    treetop(%0 = icall @object_equality(%1 = aload @a, %2 = aload @b))
    treetop(%3 = icall @object_equality(%2, %4 = aload @c))
    ireturn(%5 = iadd(%0, %3))
  }
}";
    let original = parse(input);
    let (lowered, stats) = lower_with(input, LoweringConfig::default());
    assert_eq!(stats.rebound_calls, 2);
    assert_eq!(stats.equality_calls_lowered, 2);

    let mut heap = Heap::new();
    let point = heap.define_class("Point", CLASS_IS_VALUE_TYPE);
    let plain = heap.define_class("Plain", 0);
    let p1 = Value::object(heap.new_object(point, vec![Value::Int(7)]));
    let p2 = Value::object(heap.new_object(point, vec![Value::Int(7)]));
    let x = Value::object(heap.new_object(plain, vec![]));
    let triples = [
        (p1, p2, p1),
        (p1, p1, x),
        (x, x, x),
        (Value::NULL, x, Value::NULL),
        (x, p2, p2),
    ];
    for (a, b, c) in triples {
        let slots = [("a", a), ("b", b), ("c", c)];
        let (expected, _) = run(&original, &mut heap, &slots);
        let (actual, _) = run(&lowered, &mut heap, &slots);
        assert_eq!(actual, expected, "a={a} b={b} c={c}");
    }
}

#[test]
fn lowering_twice_changes_nothing() {
    let mut ctx = lower(EQUALS);
    let before = print_method(&ctx);
    let stats = TreeLowering::default().perform(&mut ctx).expect("lowering");
    assert_eq!(stats, LoweringStats::default());
    assert_eq!(print_method(&ctx), before);
}

#[test]
fn disabled_fast_path_only_rebinds_the_call() {
    let config = LoweringConfig::default().with_equality_fastpath(false);
    let (ctx, stats) = lower_with(EQUALS, config);
    assert_eq!(stats.rebound_calls, 1);
    assert_eq!(stats.equality_calls_lowered, 0);
    assert_eq!(
        print_method(&ctx),
        EQUALS.replace("@object_equality", "@acmp_helper")
    );
}

#[test]
fn nothing_happens_without_value_types() {
    let config = LoweringConfig::default().with_object_model(ObjectModel::without_value_types());
    for input in [EQUALS, ARRAY_STORE] {
        let (ctx, stats) = lower_with(input, config);
        assert_eq!(stats, LoweringStats::default());
        assert_eq!(print_method(&ctx), input);
    }
}

#[test]
fn address_typed_equality_call_is_rejected() {
    let input = "method @m registers=1 {
  block_0 {
    treetop(%0 = acall @object_equality(%1 = aload @lhs, %2 = aload @rhs))
    areturn(%0)
  }
}";
    let mut ctx = parse(input);
    let err = TreeLowering::default()
        .perform(&mut ctx)
        .expect_err("address result");
    assert!(
        matches!(
            err,
            LoweringError::UnexpectedAnchoredOpcode {
                opcode: Opcode::ARegLoad,
                ..
            }
        ),
        "{err}"
    );
}

#[test]
fn every_gate_budget_leaves_a_correct_body() {
    const STEPS: usize = 7;
    for budget in 0..=STEPS + 1 {
        let mut ctx = parse(EQUALS);
        let mut gate = TransformationBudget::new(budget);
        let stats = TreeLowering::default()
            .perform_with_gate(&mut ctx, &mut gate)
            .expect("lowering");
        assert_valid(&ctx);
        assert_eq!(gate.requested(), (budget + 1).min(STEPS), "budget {budget}");
        assert_eq!(stats.rebound_calls, 1);
        assert_eq!(stats.equality_calls_lowered, usize::from(budget >= STEPS));
        assert_eq!(stats.vetoed, usize::from(budget < STEPS));
        assert_equality_preserved(EQUALS, &ctx, budget >= STEPS);
    }
}

#[test]
fn array_store_check_gets_value_type_null_guard() {
    let (ctx, stats) = lower_with(ARRAY_STORE, LoweringConfig::default());
    assert_eq!(stats.array_store_checks_lowered, 1);
    insta::assert_snapshot!(print_method(&ctx), @r"
    method @store registers=2 {
      block_0 {
        treetop(%0 = aload @array)
        treetop(%1 = aload @value)
        aRegStore $0(%0)
        aRegStore $1(%1)
        ificmpeq(%2 = iand(%3 = iloadi @class_flags(%4 = aloadi @component_class(%5 = aloadi @vft(%0))), %6 = iconst #1048576), %7 = iconst #0) -> block_1 { $0: pass(%0), $1: pass(%1) }
      }
      block_2 extension {
        NULLCHK @null_check(%8 = PassThrough(%1))
        out { $0: pass(%0), $1: pass(%1) }
      }
      block_1 {
        in { %9 = aRegLoad $0, %10 = aRegLoad $1 }
        ArrayStoreCHK(%11 = awrtbari(%12 = aladd(%9, %13 = iload @index), %10, %9))
        return
      }
    }
    ");
}

#[test]
fn null_stores_into_value_type_arrays_throw() {
    let original = parse(ARRAY_STORE);
    let lowered = lower(ARRAY_STORE);

    let mut heap = Heap::new();
    let point = heap.define_class("Point", CLASS_IS_VALUE_TYPE);
    let plain = heap.define_class("Plain", 0);
    let points = heap.define_array_class(point);
    let plains = heap.define_array_class(plain);
    let p = Value::object(heap.new_object(point, vec![Value::Int(1)]));
    let x = Value::object(heap.new_object(plain, vec![]));

    let returned = Completion::Returned(None);
    let cases = [
        (points, Value::NULL, returned, Completion::Threw(Exception::NullPointer)),
        (plains, Value::NULL, returned, returned),
        (points, p, returned, returned),
        (plains, x, returned, returned),
        (
            points,
            x,
            Completion::Threw(Exception::ArrayStore),
            Completion::Threw(Exception::ArrayStore),
        ),
    ];
    for (array_class, value, before, after) in cases {
        for (ctx, expected) in [(&original, before), (&lowered, after)] {
            let array = heap.new_array(array_class, 1);
            let slots = [
                ("array", Value::object(array)),
                ("index", Value::Int(0)),
                ("value", value),
            ];
            let (completion, _) = run(ctx, &mut heap, &slots);
            assert_eq!(completion, expected, "storing {value} into {array_class}");
            if completion == returned {
                assert_eq!(heap.element(array, 0), Some(value));
            }
        }
    }
}

#[test]
fn non_null_array_stores_are_left_alone() {
    let input = ARRAY_STORE.replace("aload @value", "aload @value nonnull");
    let (ctx, stats) = lower_with(&input, LoweringConfig::default());
    assert_eq!(stats.skipped_non_null, 1);
    assert_eq!(stats.array_store_checks_lowered, 0);
    assert_eq!(print_method(&ctx), input);
}

#[test]
fn vetoed_array_store_check_is_untouched() {
    let mut ctx = parse(ARRAY_STORE);
    let mut gate = TransformationBudget::new(0);
    let stats = TreeLowering::default()
        .perform_with_gate(&mut ctx, &mut gate)
        .expect("lowering");
    assert_eq!(stats.vetoed, 1);
    assert_eq!(stats.array_store_checks_lowered, 0);
    assert_eq!(print_method(&ctx), ARRAY_STORE);
}

#[test]
fn custom_transformers_run_in_walk_order() {
    struct CountReturns;

    impl Transformer for CountReturns {
        fn matches(&self, ctx: &IrContext, node: NodeRef) -> bool {
            ctx.opcode(node).is_return()
        }

        fn lower(
            &self,
            _ctx: &mut IrContext,
            session: &mut LoweringSession<'_>,
            _node: NodeRef,
            _tt: TreeTopRef,
        ) -> Result<(), LoweringError> {
            session.stats.vetoed += 10;
            Ok(())
        }
    }

    let mut ctx = parse(EQUALS);
    let stats = TreeLowering::new(LoweringConfig::default())
        .add_transformer(CountReturns)
        .perform(&mut ctx)
        .expect("lowering");
    assert_eq!(stats.equality_calls_lowered, 1);
    assert_eq!(stats.vetoed, 10);
    assert_valid(&ctx);
}
