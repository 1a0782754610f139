mod common;

use common::{run_arbor, stdout};

const EQUALS: &str = "method @equals registers=1 {
  block_0 {
    treetop(%0 = icall @object_equality(%1 = aload @lhs, %2 = aload @rhs))
    ireturn(%0)
  }
}";

#[test]
fn lower_prints_the_fast_path() {
    let output = run_arbor("lower", EQUALS, &["--stats"]);
    let text = stdout(&output);
    assert_eq!(text.matches(" extension {").count(), 5, "{text}");
    assert!(text.contains("icall @acmp_helper"), "{text}");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("equality fast paths:    1"), "{stderr}");
}

#[test]
fn disabled_fast_path_only_rebinds() {
    let output = run_arbor("lower", EQUALS, &["--disable-equality-fastpath"]);
    insta::assert_snapshot!(stdout(&output).trim_end(), @r"
    method @equals registers=1 {
      block_0 {
        treetop(%0 = icall @acmp_helper(%1 = aload @lhs, %2 = aload @rhs))
        ireturn(%0)
      }
    }
    ");
}

#[test]
fn no_value_types_leaves_the_body_alone() {
    let output = run_arbor("lower", EQUALS, &["--no-value-types"]);
    assert_eq!(stdout(&output).trim_end(), EQUALS);
}

#[test]
fn last_transformation_stops_early() {
    let output = run_arbor("lower", EQUALS, &["--last-transformation", "3"]);
    let text = stdout(&output);
    assert_eq!(text.matches(" extension {").count(), 1, "{text}");
}

#[test]
fn print_canonicalises_labels() {
    let source = "method @m registers=0 {
  // comments and labels are not preserved
  block_7 {
    goto -> block_9
  }
  block_9 {
    return
  }
}";
    insta::assert_snapshot!(stdout(&run_arbor("print", source, &[])).trim_end(), @r"
    method @m registers=0 {
      block_0 {
        goto -> block_1
      }
      block_1 {
        return
      }
    }
    ");
}

#[test]
fn validate_reports_errors_and_fails() {
    let source = "method @m registers=1 {
  block_0 {
    iRegStore $0(%0 = iconst #1)
    goto -> block_1
  }
  block_1 {
    in { %1 = iRegLoad $0 }
    ireturn(%1)
  }
}";
    let output = run_arbor("validate", source, &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("input method body is malformed"), "{stderr}");
    assert!(stderr.contains("but block_1 expects {$0}"), "{stderr}");
}

#[test]
fn validate_accepts_well_formed_bodies() {
    let output = run_arbor("validate", EQUALS, &[]);
    assert!(stdout(&output).ends_with(": ok\n"));
}

#[test]
fn parse_errors_fail() {
    let output = run_arbor("lower", "method @m registers=0 { block_0 { bogus } }", &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown opcode 'bogus'"), "{stderr}");
}
