//! Class-file validation and batch installation against generated classes.

mod common;

use common::ClassBuilder;
use snipbox::access::graph::PermissionGraph;
use snipbox::access::signature::MethodSignature;
use snipbox::store::{CodeStore, SandboxCodeStore};
use snipbox::validation::{Analysis, BytecodeCheck, ForbiddenMemberFilter, Rule, Violation};
use snipbox::SandboxError;
use std::collections::BTreeSet;
use std::sync::Arc;

fn check_for(policy: &[&str]) -> BytecodeCheck {
    let graph = Arc::new(PermissionGraph::of(policy).unwrap());
    BytecodeCheck::with_rules(vec![Arc::new(ForbiddenMemberFilter::new(graph)) as Arc<dyn Rule>])
}

fn violations(check: &BytecodeCheck, class: &[u8]) -> BTreeSet<Violation> {
    let analysis = Analysis::new();
    check.run(&analysis, class).unwrap();
    match analysis.report_violations() {
        Ok(()) => BTreeSet::new(),
        Err(failed) => failed.violations,
    }
}

const PRINTING_POLICY: [&str; 3] = [
    "java.lang.Object",
    "java.lang.System.out",
    "java.io.PrintStream#println",
];

#[test]
fn test_println_to_stdout_is_clean() {
    let class = ClassBuilder::new("demo/Hello")
        .get_static("java/lang/System", "out", "Ljava/io/PrintStream;")
        .invoke_virtual("java/io/PrintStream", "println", "(Ljava/lang/String;)V")
        .build();
    assert!(violations(&check_for(&PRINTING_POLICY), &class).is_empty());
}

#[test]
fn test_println_to_stderr_is_one_field_violation() {
    let class = ClassBuilder::new("demo/Hello")
        .get_static("java/lang/System", "err", "Ljava/io/PrintStream;")
        .invoke_virtual("java/io/PrintStream", "println", "(Ljava/lang/String;)V")
        .build();
    let found = violations(&check_for(&PRINTING_POLICY), &class);
    assert_eq!(
        found,
        BTreeSet::from([Violation::ForbiddenField {
            owner: "java.lang.System".to_string(),
            field: "err".to_string(),
        }])
    );
    let message = found.iter().next().unwrap().message();
    assert_eq!(message, "The field err in java.lang.System is not allowed");
}

#[test]
fn test_one_bad_call_and_one_bad_field_give_two_violations() {
    let class = ClassBuilder::new("demo/Sneaky")
        .get_static("java/lang/System", "out", "Ljava/io/PrintStream;")
        .get_static("java/lang/System", "in", "Ljava/io/InputStream;")
        .invoke_static("java/lang/System", "exit", "(I)V")
        .invoke_static("java/lang/System", "exit", "(I)V")
        .invoke_virtual("java/io/PrintStream", "println", "(I)V")
        .build();
    let found = violations(&check_for(&PRINTING_POLICY), &class);
    assert_eq!(found.len(), 2, "{found:?}");
    assert!(found.contains(&Violation::ForbiddenMethod(MethodSignature::new(
        "java.lang.System",
        "exit",
        "void",
        vec!["int".to_string()]
    ))));
    assert!(found.contains(&Violation::ForbiddenField {
        owner: "java.lang.System".to_string(),
        field: "in".to_string(),
    }));
}

#[test]
fn test_snippet_wrapper_members_are_not_checked() {
    let class = ClassBuilder::new("REPL/$JShell$12")
        .get_static("REPL/$JShell$11", "x", "I")
        .invoke_static("REPL/$JShell$11", "helper", "()V")
        .build();
    assert!(violations(&check_for(&PRINTING_POLICY), &class).is_empty());
}

#[test]
fn test_batch_is_rejected_as_a_whole() {
    let store = SandboxCodeStore::for_graph(Arc::new(
        PermissionGraph::of(["java.lang.Object", "demo.Holder.visible"]).unwrap(),
    ));
    let holder = ClassBuilder::new("demo/Holder")
        .field("secret", "I")
        .field("visible", "I")
        .unit();
    let reader = ClassBuilder::new("demo/Reader")
        .get_static("demo/Holder", "visible", "I")
        .get_static("demo/Holder", "secret", "I")
        .unit();

    let rejected = match store.load(&[holder, reader]).unwrap_err() {
        SandboxError::InstallRejected(rejected) => rejected,
        other => panic!("expected rejection, got {other}"),
    };
    assert_eq!(rejected.violations.len(), 1);
    let secret = Violation::ForbiddenField {
        owner: "demo.Holder".to_string(),
        field: "secret".to_string(),
    };
    assert_eq!(
        rejected.origins[&secret],
        BTreeSet::from(["demo.Reader".to_string()])
    );
    assert_eq!(rejected.outcomes.len(), 2);
    assert!(rejected.outcomes.iter().all(|outcome| !outcome.installed));
    assert!(!store.is_installed("demo.Holder"));
    assert!(!store.is_installed("demo.Reader"));
}

#[test]
fn test_clean_batch_is_installed() {
    let store = SandboxCodeStore::for_graph(Arc::new(PermissionGraph::of(PRINTING_POLICY).unwrap()));
    let unit = ClassBuilder::new("demo/Hello")
        .get_static("java/lang/System", "out", "Ljava/io/PrintStream;")
        .invoke_virtual("java/io/PrintStream", "println", "(I)V")
        .unit();
    let outcomes = store.load(&[unit]).unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].installed);
    assert!(store.is_installed("demo.Hello"));
}
