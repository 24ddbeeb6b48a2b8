mod common;

use std::path::Path;

use common::mocks::{MockEngine, ScriptedEngine};
use common::test_helpers::{SpecWorkspace, read};
use xspec_runner::classify::SpecKind;
use xspec_runner::engine::ProgramKind;
use xspec_runner::error::{EngineError, RunnerError};
use xspec_runner::file_discovery::FileDiscovery;
use xspec_runner::runner::{FileStatus, TestCounts};

#[test]
fn test_passing_specification() {
    let workspace = SpecWorkspace::new();
    let spec = workspace.write_spec(
        "math.xspec",
        r#"<x:scenario label="adds"><x:call function="add"/><x:expect label="sum" select="3"/></x:scenario>"#,
    );

    let record = workspace.runner(ScriptedEngine::new()).process_file(&spec);

    assert_eq!(record.status, FileStatus::Passed, "{:?}", record.error);
    assert_eq!(record.kind, Some(SpecKind::Xslt));
    assert_eq!(
        record.counts,
        TestCounts {
            total: 1,
            passed: 1,
            pending: 0,
            failed: 0,
            missed: 0,
        }
    );

    let run_dir = workspace.run_dir();
    assert_eq!(record.report_path, run_dir.join("math.xml"));
    assert!(read(&run_dir.join("math.xml")).contains("successful=\"true\""));
    assert!(run_dir.join("math.html").is_file());
    assert!(run_dir.join("xslt/math.xslt").is_file());
    assert!(!run_dir.join("junit-math.xml").exists());
}

#[test]
fn test_pending_tests_are_neither_passed_nor_failed() {
    let workspace = SpecWorkspace::new();
    let spec = workspace.write_spec(
        "pending.xspec",
        r#"<x:pending label="not yet">
             <x:scenario label="later"><x:expect label="one"/><x:expect label="two"/></x:scenario>
           </x:pending>"#,
    );

    let record = workspace.runner(ScriptedEngine::new()).process_file(&spec);

    assert_eq!(record.status, FileStatus::Passed);
    assert_eq!(record.counts.total, 2);
    assert_eq!(record.counts.pending, 2);
    assert_eq!(record.counts.passed, 0);
    assert_eq!(record.counts.failed, 0);
    assert_eq!(record.counts.missed, 0);
}

#[test]
fn test_failed_expectation_fails_the_file() {
    let workspace = SpecWorkspace::new();
    let spec = workspace.write_spec(
        "broken.xspec",
        r#"<x:scenario label="s">
             <x:expect label="good"/>
             <x:expect label="bad" select="false()"/>
           </x:scenario>"#,
    );

    let record = workspace.runner(ScriptedEngine::new()).process_file(&spec);

    assert_eq!(record.status, FileStatus::Failed);
    assert_eq!(record.counts.passed, 1);
    assert_eq!(record.counts.failed, 1);
    assert_eq!(record.error, None);
}

#[test]
fn test_tests_missing_from_the_report_are_missed() {
    let workspace = SpecWorkspace::new();
    let spec = workspace.write_spec(
        "lossy.xspec",
        r#"<x:scenario label="s"><x:expect label="kept"/><x:expect label="lost"/></x:scenario>"#,
    );

    let record = workspace
        .runner(ScriptedEngine::new().omitting("lost"))
        .process_file(&spec);

    assert_eq!(record.status, FileStatus::Failed);
    assert_eq!(record.counts.total, 1);
    assert_eq!(record.counts.passed, 1);
    assert_eq!(record.counts.missed, 1);
    assert_eq!(record.error.as_deref(), Some("1 test(s) missed"));
}

#[test]
fn test_aborted_run_keeps_partial_counts() {
    let workspace = SpecWorkspace::new();
    let spec = workspace.write_spec(
        "abort.xspec",
        r#"<x:scenario label="s"><x:expect label="a"/><x:expect label="b"/><x:expect label="c"/></x:scenario>"#,
    );

    let record = workspace
        .runner(ScriptedEngine::new().aborting_after(1))
        .process_file(&spec);

    assert_eq!(record.status, FileStatus::Error);
    assert_eq!(record.counts.total, 1);
    assert_eq!(record.counts.missed, 2);
    let error = record.error.unwrap();
    assert!(error.contains("Execution failed"), "{}", error);
    assert!(error.contains("XPTY0004"), "{}", error);
}

#[test]
fn test_like_before_definition_is_a_compile_failure() {
    let workspace = SpecWorkspace::new();
    let spec = workspace.write_spec(
        "order.xspec",
        r#"<x:scenario label="user"><x:like label="common"/></x:scenario>
           <x:scenario shared="yes" label="common"><x:expect label="c"/></x:scenario>"#,
    );

    let engine = ScriptedEngine::new();
    let record = workspace.runner(engine.clone()).process_file(&spec);

    assert_eq!(record.status, FileStatus::Error);
    let error = record.error.unwrap();
    assert!(error.contains("Compilation failed"), "{}", error);
    assert!(error.contains("common"), "{}", error);
    assert!(engine.loaded_programs().is_empty());
}

#[test]
fn test_schematron_specification_is_bridged() {
    let workspace = SpecWorkspace::new();
    workspace.write(
        "schema/rules.sch",
        r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron"><pattern/></schema>"#,
    );
    let spec = workspace.write(
        "schema/rules.xspec",
        r#"<x:description xmlns:x="http://www.jenitennison.com/xslt/xspec" schematron="rules.sch">
  <x:scenario label="valid document"><x:context/><x:expect label="no errors"/></x:scenario>
</x:description>"#,
    );

    let record = workspace.runner(ScriptedEngine::new()).process_file(&spec);

    assert_eq!(record.status, FileStatus::Passed, "{:?}", record.error);
    assert_eq!(record.kind, Some(SpecKind::Schematron));
    assert_eq!(record.counts.total, 1);
    assert_eq!(record.counts.passed, 1);

    let run_dir = workspace.run_dir().join("schema");
    assert!(run_dir.join("schematron/rules-sch-compiled.xsl").is_file());
    assert!(run_dir.join("schematron/rules-compiled.xspec").is_file());
    assert!(run_dir.join("xslt/rules.xslt").is_file());
    assert_eq!(record.report_path, run_dir.join("rules.xml"));
}

#[test]
fn test_xquery_specification_uses_query_compiler() {
    let workspace = SpecWorkspace::new();
    let spec = workspace.write(
        "query.xspec",
        r#"<x:description xmlns:x="http://www.jenitennison.com/xslt/xspec" query="urn:example:functions" query-at="functions.xqm">
  <x:scenario label="q"><x:expect label="r"/></x:scenario>
</x:description>"#,
    );

    let engine = ScriptedEngine::new();
    let record = workspace.runner(engine.clone()).process_file(&spec);

    assert_eq!(record.status, FileStatus::Passed, "{:?}", record.error);
    assert_eq!(record.kind, Some(SpecKind::XQuery));
    assert!(workspace.run_dir().join("xquery/query.xquery").is_file());

    let calls = engine.calls.lock().unwrap();
    assert!(calls[0].program.ends_with("compile-xquery-tests.xsl"));
    assert!(
        calls
            .iter()
            .any(|call| call.kind == ProgramKind::XQuery && call.program.ends_with("query.xquery"))
    );
}

#[test]
fn test_junit_and_coverage_reports() {
    let mut workspace = SpecWorkspace::new();
    workspace.reports.junit = true;
    workspace.reports.coverage = true;
    let spec = workspace.write_spec(
        "covered.xspec",
        r#"<x:scenario label="outer">
             <x:scenario label="inner"><x:expect label="works"/></x:scenario>
             <x:expect label="fails" select="false()"/>
           </x:scenario>"#,
    );

    let record = workspace.runner(ScriptedEngine::new()).process_file(&spec);
    assert_eq!(record.status, FileStatus::Failed);

    let run_dir = workspace.run_dir();
    let junit = read(&run_dir.join("junit-covered.xml"));
    assert!(junit.contains("<testsuite"));
    assert!(junit.contains("name=\"outer\""));
    assert!(junit.contains("works"));
    assert!(junit.contains("<failure"));

    assert_eq!(record.coverage_path, Some(run_dir.join("coverage-covered.xml")));
    assert!(run_dir.join("covered-coverage.html").is_file());
}

#[tokio::test]
async fn test_run_directory_mirrors_layout_and_fails_once() {
    let workspace = SpecWorkspace::new();
    workspace.write_spec("a.xspec", r#"<x:scenario label="a"><x:expect label="ok"/></x:scenario>"#);
    workspace.write_spec(
        "nested/b.xspec",
        r#"<x:scenario label="b"><x:expect label="no" select="false()"/></x:scenario>"#,
    );
    workspace.write("nested/notes.xml", "<notes/>");

    let runner = workspace.runner(ScriptedEngine::new());
    let results = runner
        .run_path(&workspace.test_root(), &FileDiscovery::new(), None)
        .await
        .unwrap();

    assert_eq!(results.total_files, 2);
    assert_eq!(results.passed_files, 1);
    assert_eq!(results.failed_files, 1);
    assert_eq!(results.totals.total, 2);
    assert_eq!(results.file_results[0].source, Path::new("a.xspec"));
    assert_eq!(results.file_results[1].source, Path::new("nested/b.xspec"));
    assert!(workspace.run_dir().join("nested/b.xml").is_file());

    match results.ensure_success() {
        Err(RunnerError::RunFailed {
            failed_files,
            total_files,
        }) => {
            assert_eq!(failed_files, 1);
            assert_eq!(total_files, 2);
        }
        other => panic!("Expected RunFailed, got {:?}", other),
    }
}

#[test]
fn test_engine_failure_stops_the_file() {
    let workspace = SpecWorkspace::new();
    let spec = workspace.write_spec("a.xspec", r#"<x:scenario><x:expect/></x:scenario>"#);

    let mut engine = MockEngine::new();
    engine
        .expect_load()
        .withf(|kind, program| {
            *kind == ProgramKind::Xslt && program.system_id().ends_with("compile-xslt-tests.xsl")
        })
        .times(1)
        .returning(|_, program| {
            Err(EngineError::Load {
                kind: "xslt".to_string(),
                system_id: program.system_id().to_string(),
                details: "XTSE0010".to_string(),
            }
            .into())
        });

    let record = workspace.runner(engine).process_file(&spec);

    assert_eq!(record.status, FileStatus::Error);
    assert_eq!(record.counts, TestCounts::default());
    assert!(record.error.unwrap().contains("Compilation failed"));
    assert!(!workspace.run_dir().join("a.xml").exists());
}
