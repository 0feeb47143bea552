//! Permission graph lookups through the public API: closest match, deny
//! rules layered over packages, overloads and policy files.

use snipbox::access::graph::PermissionGraph;
use snipbox::access::key::SymbolKey;
use snipbox::access::policy::read_policy_file;
use snipbox::access::signature::MethodSignature;
use snipbox::access::PolicyParseError;

fn permitted(graph: &PermissionGraph, symbol: &str) -> bool {
    graph.is_permitted(&SymbolKey::infer(symbol))
}

fn method_permitted(graph: &PermissionGraph, signature: &str) -> bool {
    graph.is_method_permitted(&MethodSignature::parse(signature).unwrap())
}

#[test]
fn test_absent_node_answers_with_closest_ancestor() {
    let graph = PermissionGraph::of(["java.util", "!java.util.concurrent"]).unwrap();
    assert!(permitted(&graph, "java.util.List"));
    assert!(permitted(&graph, "java/util/Map$Entry"));
    assert!(!permitted(&graph, "java.util.concurrent.Executors"));
    assert!(!permitted(&graph, "java.util.concurrent.locks.Lock"));
    assert!(!permitted(&graph, "java.io.File"));
}

#[test]
fn test_deny_rules_layered_over_packages() {
    let graph = PermissionGraph::of([
        "java.lang",
        "java.util.List",
        "java.lang.Thread#sleep",
        "java.lang.System",
        "!java.lang.System#exit",
    ])
    .unwrap();

    assert!(!permitted(&graph, "java/io"));
    assert!(permitted(&graph, "java/lang"));
    assert!(permitted(&graph, "java/util/List"));
    assert!(permitted(&graph, "java/lang/System/out"));
    assert!(!permitted(&graph, "java/lang/System#exit"));
    assert!(permitted(&graph, "java.lang.String"));

    assert!(method_permitted(&graph, "java/lang/Thread#sleep()"));
    assert!(!method_permitted(&graph, "java/lang/System#exit"));

    assert!(method_permitted(&graph, "java.lang.Thread#sleep(long):void"));
    assert!(!method_permitted(&graph, "java.lang.System#exit(int):void"));
    assert!(method_permitted(&graph, "java.lang.System#currentTimeMillis():long"));
}

#[test]
fn test_latest_rule_for_a_symbol_wins() {
    let mut builder = PermissionGraph::builder();
    builder
        .permit("a.b.Foo")
        .unwrap()
        .deny("a.b.Foo")
        .unwrap()
        .deny("a.b.Foo#run(int)")
        .unwrap()
        .permit("a.b.Foo#run(int)")
        .unwrap();
    let graph = builder.build();
    assert!(!permitted(&graph, "a.b.Foo"));
    assert!(method_permitted(&graph, "a.b.Foo#run(int):void"));
}

#[test]
fn test_overloads_are_told_apart() {
    let graph = PermissionGraph::of(["A#run(int)"]).unwrap();
    assert!(graph.is_method_permitted(&MethodSignature::new(
        "A",
        "run",
        "void",
        vec!["int".to_string()]
    )));
    assert!(!graph.is_method_permitted(&MethodSignature::new(
        "A",
        "run",
        "void",
        vec!["String".to_string()]
    )));
}

#[test]
fn test_rule_without_parameters_matches_every_overload() {
    let graph = PermissionGraph::of(["java.io.PrintStream#println"]).unwrap();
    for parameters in [vec![], vec!["int"], vec!["java.lang.String"], vec!["char[]"]] {
        let call = MethodSignature::new(
            "java.io.PrintStream",
            "println",
            "void",
            parameters.iter().map(|p| p.to_string()).collect(),
        );
        assert!(graph.is_method_permitted(&call), "{call}");
    }
    assert!(!method_permitted(&graph, "java.io.PrintStream#print(int):void"));
}

#[test]
fn test_full_signature_rule() {
    let graph = PermissionGraph::of(["a.b.c.Foo#run(String[], int):void"]).unwrap();
    assert!(method_permitted(&graph, "a.b.c.Foo#run(String[], int):void"));
    assert!(!method_permitted(&graph, "a.b.c.Foo#run():void"));
    assert!(!method_permitted(&graph, "a.b.c.Foo#run(String[], int):int"));
}

fn write_policy(name: &str, text: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("snipbox-policy-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_policy_file_blank_lines_and_padding() {
    let path = write_policy("padded.txt", "java.lang\n\n!java.lang.Runtime\n   java.util.List  \n");

    let mut builder = PermissionGraph::builder();
    builder.apply(read_policy_file(&path).unwrap()).unwrap();
    let graph = builder.build();
    assert!(permitted(&graph, "java.lang.Math"));
    assert!(!permitted(&graph, "java.lang.Runtime"));
    assert!(permitted(&graph, "java.util.List"));

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_bad_rule_in_file_reports_the_file_line() {
    let path = write_policy("broken.txt", "java.lang\n\n   \n\njava.lang.Math#max(int\n");

    let rules = read_policy_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    let mut builder = PermissionGraph::builder();
    let err = builder.apply(rules).err().unwrap();
    assert!(matches!(err, PolicyParseError::Line { line: 5, .. }), "{err}");
    assert!(err.to_string().starts_with("line 5:"), "{err}");
}

#[test]
fn test_bad_rule_reports_its_line() {
    let err = PermissionGraph::of(["java.lang", "java.lang.Math#max(int"]).unwrap_err();
    assert!(err.to_string().starts_with("line 2:"), "{err}");
    assert!(matches!(err, PolicyParseError::Line { line: 2, .. }));
}
